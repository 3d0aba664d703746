//! Job store reached through a queue API server.
//!
//! Lets a worker on another host (a notebook behind a tunnel) claim and
//! report over `/api/v2/queue/*` instead of connecting to Postgres.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::config::ConfigError;
use crate::models::job::{ClaimedJob, GenerationMode, Job, JobOutput, JobStatus, NewJob};
use crate::models::outcome::{FailOutcome, QueueStats, ReclaimPolicy, ReclaimReport};
use crate::models::queue::{
    AckResponse, CleanupRequest, CleanupResponse, ClaimRequest, ClaimResponse, CompleteRequest,
    FailRequest, FailResponse, ProgressRequest, SubmitResponse,
};

use super::store::{JobStore, StoreError};

/// Per-request limit; a claim or report never waits longer on the server.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Largest sweep timeout the cleanup endpoint accepts, in minutes.
const MAX_CLEANUP_MINUTES: u64 = 10_080;

pub struct HttpJobStore {
    http: Client,
    base: Url,
    gpu: Option<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// What a request was about, so 404 and 409 map to the right error.
#[derive(Clone, Copy)]
enum Subject<'a> {
    Queue,
    Job(&'a str),
    Held { job_id: &'a str, worker_id: &'a str },
}

impl HttpJobStore {
    pub fn new(base_url: &str) -> Result<Self, ConfigError> {
        let base = Url::parse(base_url.trim())
            .map_err(|e| ConfigError::Invalid(format!("server URL '{base_url}': {e}")))?;
        if !matches!(base.scheme(), "http" | "https") || base.cannot_be_a_base() {
            return Err(ConfigError::Invalid(format!(
                "server URL '{base_url}' must be http(s)"
            )));
        }
        Ok(Self {
            http: Client::new(),
            base,
            gpu: None,
        })
    }

    /// GPU name sent with every claim, for the server's logs.
    pub fn with_gpu(mut self, gpu: Option<String>) -> Self {
        self.gpu = gpu;
        self
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        // Checked in `new`: the base can carry path segments.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn queue_endpoint(&self, action: &str) -> Url {
        self.endpoint(&["api", "v2", "queue", action])
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        subject: Subject<'_>,
    ) -> Result<T, StoreError> {
        let response = request
            // localtunnel answers with an interstitial page without this
            .header("Bypass-Tunnel-Reminder", "true")
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let message = match response.json::<ErrorBody>().await {
            Ok(body) => body.error,
            Err(_) => status.to_string(),
        };
        Err(match (status, subject) {
            (StatusCode::NOT_FOUND, Subject::Job(job_id) | Subject::Held { job_id, .. }) => {
                StoreError::NotFound(job_id.to_string())
            }
            (StatusCode::CONFLICT, Subject::Job(job_id)) => StoreError::Duplicate(job_id.to_string()),
            (StatusCode::CONFLICT, Subject::Held { job_id, worker_id }) => StoreError::NotClaimedBy {
                job_id: job_id.to_string(),
                worker_id: worker_id.to_string(),
            },
            _ => StoreError::Remote {
                status: status.as_u16(),
                message,
            },
        })
    }
}

#[async_trait]
impl JobStore for HttpJobStore {
    async fn submit(&self, job: NewJob) -> Result<Job, StoreError> {
        let job_id = job.resolved_id();
        let job = NewJob {
            id: Some(job_id.clone()),
            ..job
        };
        let _: SubmitResponse = self
            .send(
                self.http.post(self.queue_endpoint("submit")).json(&job),
                Subject::Job(&job_id),
            )
            .await?;
        self.get(&job_id)
            .await?
            .ok_or(StoreError::NotFound(job_id))
    }

    async fn get(&self, job_id: &str) -> Result<Option<Job>, StoreError> {
        let url = self.endpoint(&["api", "v2", "status", job_id]);
        match self.send::<Job>(self.http.get(url), Subject::Job(job_id)).await {
            Ok(mut job) => {
                // The flattened output fields are all optional, so they
                // always parse; only a complete job carries an output.
                if job.status != JobStatus::Complete {
                    job.output = None;
                }
                Ok(Some(job))
            }
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn claim(
        &self,
        worker_id: &str,
        worker_type: &str,
    ) -> Result<Option<ClaimedJob>, StoreError> {
        let request = ClaimRequest {
            worker_id: worker_id.to_string(),
            worker_type: Some(worker_type.to_string()),
            gpu: self.gpu.clone(),
        };
        let response: ClaimResponse = self
            .send(
                self.http.post(self.queue_endpoint("claim")).json(&request),
                Subject::Queue,
            )
            .await?;
        Ok(response.job)
    }

    async fn update_progress(
        &self,
        job_id: &str,
        worker_id: &str,
        progress: i32,
        message: &str,
        generation_mode: Option<GenerationMode>,
    ) -> Result<(), StoreError> {
        let request = ProgressRequest {
            job_id: job_id.to_string(),
            worker_id: worker_id.to_string(),
            progress,
            message: message.to_string(),
            generation_mode,
        };
        let _: AckResponse = self
            .send(
                self.http.post(self.queue_endpoint("progress")).json(&request),
                Subject::Held { job_id, worker_id },
            )
            .await?;
        Ok(())
    }

    async fn complete(
        &self,
        job_id: &str,
        worker_id: &str,
        output: &JobOutput,
    ) -> Result<(), StoreError> {
        let request = CompleteRequest {
            job_id: job_id.to_string(),
            worker_id: worker_id.to_string(),
            output: output.clone(),
        };
        let _: AckResponse = self
            .send(
                self.http.post(self.queue_endpoint("complete")).json(&request),
                Subject::Held { job_id, worker_id },
            )
            .await?;
        Ok(())
    }

    async fn fail(
        &self,
        job_id: &str,
        worker_id: &str,
        error: &str,
    ) -> Result<FailOutcome, StoreError> {
        let request = FailRequest {
            job_id: job_id.to_string(),
            worker_id: worker_id.to_string(),
            error: Some(error.to_string()),
        };
        let response: FailResponse = self
            .send(
                self.http.post(self.queue_endpoint("fail")).json(&request),
                Subject::Held { job_id, worker_id },
            )
            .await?;
        Ok(response.outcome)
    }

    /// Triggers a sweep on the server. The server applies its own reclaim
    /// policy, and the timeout is rounded up to whole minutes.
    async fn reclaim_stale(
        &self,
        timeout: Duration,
        _policy: ReclaimPolicy,
    ) -> Result<ReclaimReport, StoreError> {
        let request = CleanupRequest {
            timeout_minutes: Some(timeout.as_secs().div_ceil(60).clamp(1, MAX_CLEANUP_MINUTES)),
        };
        let response: CleanupResponse = self
            .send(
                self.http.post(self.queue_endpoint("cleanup")).json(&request),
                Subject::Queue,
            )
            .await?;
        Ok(response.report)
    }

    async fn stats(&self) -> Result<QueueStats, StoreError> {
        self.send(self.http.get(self.queue_endpoint("stats")), Subject::Queue)
            .await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let _: serde_json::Value = self
            .send(
                self.http.get(self.endpoint(&["api", "health"])),
                Subject::Queue,
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_extend_the_base_path() {
        let store = HttpJobStore::new("https://canvas.loca.lt/").unwrap();
        assert_eq!(
            store.queue_endpoint("claim").as_str(),
            "https://canvas.loca.lt/api/v2/queue/claim"
        );

        let store = HttpJobStore::new("http://10.0.0.5:8888/gpu").unwrap();
        assert_eq!(
            store.endpoint(&["api", "v2", "status", "a b/c"]).as_str(),
            "http://10.0.0.5:8888/gpu/api/v2/status/a%20b%2Fc"
        );
    }

    #[test]
    fn server_url_must_be_http() {
        assert!(HttpJobStore::new("not a url").is_err());
        assert!(HttpJobStore::new("mailto:ops@example.com").is_err());
        assert!(HttpJobStore::new("ftp://example.com").is_err());
    }
}
