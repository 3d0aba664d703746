use std::time::Duration;

use reqwest::Client;

/// HTTP health probe with a hard timeout.
#[derive(Debug, Clone)]
pub struct HttpHealthProbe {
    http: Client,
    url: String,
    timeout: Duration,
}

impl HttpHealthProbe {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http: Client::new(),
            url: url.into(),
            timeout,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// True only for a 2xx answer inside the timeout.
    pub async fn check(&self) -> bool {
        let request = self
            .http
            .get(&self.url)
            // localtunnel answers with an interstitial page without this
            .header("Bypass-Tunnel-Reminder", "true")
            .timeout(self.timeout)
            .send();

        match request.await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                tracing::debug!(url = %self.url, status = %response.status(), "Health probe rejected");
                false
            }
            Err(e) => {
                tracing::debug!(url = %self.url, error = %e, "Health probe failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::get, Router};

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn success_status_is_healthy() {
        let base = serve(Router::new().route("/api/health", get(|| async { "ok" }))).await;
        let probe = HttpHealthProbe::new(format!("{base}/api/health"), Duration::from_secs(5));
        assert!(probe.check().await);
    }

    #[tokio::test]
    async fn error_status_is_unhealthy() {
        let base = serve(Router::new().route(
            "/api/health",
            get(|| async { StatusCode::SERVICE_UNAVAILABLE }),
        ))
        .await;
        let probe = HttpHealthProbe::new(format!("{base}/api/health"), Duration::from_secs(5));
        assert!(!probe.check().await);
    }

    #[tokio::test]
    async fn slow_endpoint_times_out() {
        let base = serve(Router::new().route(
            "/api/health",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "late"
            }),
        ))
        .await;
        let probe = HttpHealthProbe::new(format!("{base}/api/health"), Duration::from_millis(200));
        assert!(!probe.check().await);
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_unhealthy() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let probe = HttpHealthProbe::new(format!("http://{addr}/api/health"), Duration::from_secs(1));
        assert!(!probe.check().await);
    }
}
