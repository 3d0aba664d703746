use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use crate::models::job::{
    ClaimInfo, ClaimedJob, GenerationMode, Job, JobInput, JobOutput, JobStatus, NewJob,
    DEFAULT_MAX_ATTEMPTS, DEFAULT_PRIORITY,
};
use crate::models::outcome::{
    FailOutcome, QueueStats, ReclaimReport, RECLAIMED_DEAD_MESSAGE, RECLAIMED_MESSAGE,
};
use crate::services::store::StoreError;

/// Column list for `canvas_jobs` queries.
const COLUMNS: &str = "\
    id, status, created_at, updated_at, \
    input_path, input_url, direction, emotional_dna, params, \
    claimed_by, claimed_at, worker_type, \
    progress, message, generation_mode, \
    output_url, output_dir, quality_score, loop_score, \
    attempt, max_attempts, error, priority";

/// Raw `canvas_jobs` row before the claim/output invariants are checked.
#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: String,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    input_path: String,
    input_url: Option<String>,
    direction: Option<serde_json::Value>,
    emotional_dna: Option<serde_json::Value>,
    params: serde_json::Value,
    claimed_by: Option<String>,
    claimed_at: Option<DateTime<Utc>>,
    worker_type: Option<String>,
    progress: i32,
    message: String,
    generation_mode: String,
    output_url: Option<String>,
    output_dir: Option<String>,
    quality_score: Option<f64>,
    loop_score: Option<f64>,
    attempt: i32,
    max_attempts: i32,
    error: Option<String>,
    priority: i32,
}

impl TryFrom<JobRow> for Job {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let corrupt = |reason: String| StoreError::Corrupt {
            job_id: row.id.clone(),
            reason,
        };

        let status = JobStatus::from_str(&row.status)
            .map_err(|_| corrupt(format!("unknown status '{}'", row.status)))?;
        let generation_mode = GenerationMode::from_str(&row.generation_mode)
            .map_err(|_| corrupt(format!("unknown generation mode '{}'", row.generation_mode)))?;

        let claim = match (row.claimed_by, row.worker_type, row.claimed_at) {
            (Some(claimed_by), Some(worker_type), Some(claimed_at)) => Some(ClaimInfo {
                claimed_by,
                worker_type,
                claimed_at,
            }),
            (None, None, None) => None,
            _ => return Err(corrupt("claim fields partially set".to_string())),
        };
        if claim.is_some() != status.is_claimed() {
            return Err(corrupt(format!("claim fields do not match status {status}")));
        }

        let output = (status == JobStatus::Complete).then(|| JobOutput {
            output_url: row.output_url,
            output_dir: row.output_dir,
            quality_score: row.quality_score,
            loop_score: row.loop_score,
        });

        Ok(Job {
            id: row.id,
            status,
            created_at: row.created_at,
            updated_at: row.updated_at,
            input: JobInput {
                input_path: row.input_path,
                input_url: row.input_url,
                direction: row.direction,
                emotional_dna: row.emotional_dna,
                params: row.params,
            },
            claim,
            progress: row.progress,
            message: row.message,
            generation_mode,
            output,
            attempt: row.attempt,
            max_attempts: row.max_attempts,
            error: row.error,
            priority: row.priority,
        })
    }
}

/// Insert a new queued job
pub async fn create_job(pool: &PgPool, new_job: &NewJob) -> Result<Job, StoreError> {
    let id = new_job.resolved_id();
    let query = format!(
        "INSERT INTO canvas_jobs \
             (id, status, input_path, input_url, direction, emotional_dna, params, \
              generation_mode, max_attempts, priority) \
         VALUES ($1, 'queued', $2, $3, $4, $5, $6, $7, $8, $9) \
         RETURNING {COLUMNS}"
    );

    let row = sqlx::query_as::<_, JobRow>(&query)
        .bind(&id)
        .bind(&new_job.input_path)
        .bind(&new_job.input_url)
        .bind(&new_job.direction)
        .bind(&new_job.emotional_dna)
        .bind(new_job.resolved_params())
        .bind(new_job.generation_mode.unwrap_or_default().as_ref())
        .bind(new_job.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS).max(1))
        .bind(new_job.priority.unwrap_or(DEFAULT_PRIORITY))
        .fetch_one(pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                StoreError::Duplicate(id.clone())
            }
            other => StoreError::Database(other),
        })?;

    row.try_into()
}

/// Get a job by ID
pub async fn get_job(pool: &PgPool, job_id: &str) -> Result<Option<Job>, StoreError> {
    let query = format!("SELECT {COLUMNS} FROM canvas_jobs WHERE id = $1");
    let row = sqlx::query_as::<_, JobRow>(&query)
        .bind(job_id)
        .fetch_optional(pool)
        .await?;

    row.map(Job::try_from).transpose()
}

/// Atomically claim the best queued job for a worker.
///
/// The inner `FOR UPDATE SKIP LOCKED` makes a concurrent claimant pass over
/// the row another claimant is holding and take the next candidate instead
/// of waiting for it.
pub async fn claim_next_job(
    pool: &PgPool,
    worker_id: &str,
    worker_type: &str,
) -> Result<Option<ClaimedJob>, StoreError> {
    let query = format!(
        "UPDATE canvas_jobs \
         SET status = 'claimed', \
             claimed_by = $1, \
             worker_type = $2, \
             claimed_at = NOW(), \
             attempt = LEAST(attempt + 1, max_attempts), \
             updated_at = NOW() \
         WHERE id = ( \
             SELECT id FROM canvas_jobs \
             WHERE status = 'queued' \
             ORDER BY priority ASC, created_at ASC, seq ASC \
             LIMIT 1 \
             FOR UPDATE SKIP LOCKED \
         ) \
         AND status = 'queued' \
         RETURNING {COLUMNS}"
    );

    let row = sqlx::query_as::<_, JobRow>(&query)
        .bind(worker_id)
        .bind(worker_type)
        .fetch_optional(pool)
        .await?;

    match row {
        Some(row) => {
            let job = Job::try_from(row)?;
            Ok(Some(ClaimedJob::from(&job)))
        }
        None => Ok(None),
    }
}

/// Update progress on a job held by `worker_id`
pub async fn update_progress(
    pool: &PgPool,
    job_id: &str,
    worker_id: &str,
    progress: i32,
    message: &str,
    generation_mode: Option<GenerationMode>,
) -> Result<(), StoreError> {
    let result = sqlx::query(
        r#"
        UPDATE canvas_jobs
        SET status = 'generating',
            progress = $3,
            message = $4,
            generation_mode = COALESCE($5, generation_mode),
            updated_at = NOW()
        WHERE id = $1
          AND claimed_by = $2
          AND status IN ('claimed', 'generating')
        "#,
    )
    .bind(job_id)
    .bind(worker_id)
    .bind(progress.clamp(0, 100))
    .bind(message)
    .bind(generation_mode.map(|mode| mode.as_ref().to_string()))
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(ownership_error(pool, job_id, worker_id).await);
    }
    Ok(())
}

/// Mark a job held by `worker_id` as complete
pub async fn complete_job(
    pool: &PgPool,
    job_id: &str,
    worker_id: &str,
    output: &JobOutput,
) -> Result<(), StoreError> {
    let result = sqlx::query(
        r#"
        UPDATE canvas_jobs
        SET status = 'complete',
            progress = 100,
            message = 'Generation complete',
            output_url = $3,
            output_dir = $4,
            quality_score = $5,
            loop_score = $6,
            claimed_by = NULL,
            claimed_at = NULL,
            worker_type = NULL,
            updated_at = NOW()
        WHERE id = $1
          AND claimed_by = $2
          AND status IN ('claimed', 'generating')
        "#,
    )
    .bind(job_id)
    .bind(worker_id)
    .bind(&output.output_url)
    .bind(&output.output_dir)
    .bind(output.quality_score)
    .bind(output.loop_score)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(ownership_error(pool, job_id, worker_id).await);
    }
    Ok(())
}

/// Record a failure and resolve it to `queued` or `dead`
pub async fn fail_job(
    pool: &PgPool,
    job_id: &str,
    worker_id: &str,
    error: &str,
) -> Result<FailOutcome, StoreError> {
    let mut tx = pool.begin().await?;

    let row = sqlx::query(
        r#"
        SELECT attempt, max_attempts
        FROM canvas_jobs
        WHERE id = $1
          AND claimed_by = $2
          AND status IN ('claimed', 'generating')
        FOR UPDATE
        "#,
    )
    .bind(job_id)
    .bind(worker_id)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(row) = row else {
        tx.rollback().await?;
        return Err(ownership_error(pool, job_id, worker_id).await);
    };

    let attempt: i32 = row.try_get("attempt")?;
    let max_attempts: i32 = row.try_get("max_attempts")?;
    let outcome = FailOutcome::resolve(attempt, max_attempts);

    sqlx::query(
        r#"
        UPDATE canvas_jobs
        SET status = $2,
            error = $3,
            message = $4,
            claimed_by = NULL,
            claimed_at = NULL,
            worker_type = NULL,
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(job_id)
    .bind(outcome.status().as_ref())
    .bind(error)
    .bind(outcome.message(error))
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(outcome)
}

/// Release every claim older than `timeout_secs`
pub async fn reclaim_stale_jobs(
    pool: &PgPool,
    timeout_secs: f64,
    dead_letter_exhausted: bool,
) -> Result<ReclaimReport, StoreError> {
    let rows = sqlx::query(
        r#"
        UPDATE canvas_jobs
        SET status = CASE WHEN $2 AND attempt >= max_attempts THEN 'dead' ELSE 'queued' END,
            message = CASE WHEN $2 AND attempt >= max_attempts THEN $3 ELSE $4 END,
            claimed_by = NULL,
            claimed_at = NULL,
            worker_type = NULL,
            updated_at = NOW()
        WHERE status IN ('claimed', 'generating')
          AND claimed_at < NOW() - make_interval(secs => $1)
        RETURNING status
        "#,
    )
    .bind(timeout_secs)
    .bind(dead_letter_exhausted)
    .bind(RECLAIMED_DEAD_MESSAGE)
    .bind(RECLAIMED_MESSAGE)
    .fetch_all(pool)
    .await?;

    let mut report = ReclaimReport::default();
    for row in rows {
        let status: String = row.try_get("status")?;
        if status == JobStatus::Dead.as_ref() {
            report.dead_lettered += 1;
        } else {
            report.requeued += 1;
        }
    }
    Ok(report)
}

/// Counts per status plus score averages over complete jobs
pub async fn queue_stats(pool: &PgPool) -> Result<QueueStats, StoreError> {
    let rows = sqlx::query("SELECT status, COUNT(*) AS count FROM canvas_jobs GROUP BY status")
        .fetch_all(pool)
        .await?;

    let mut stats = QueueStats::default();
    for row in rows {
        let status: String = row.try_get("status")?;
        let count: i64 = row.try_get("count")?;
        match JobStatus::from_str(&status) {
            Ok(status) => stats.add(status, count),
            Err(_) => tracing::warn!(status = %status, count, "Ignoring unknown job status"),
        }
    }

    let averages = sqlx::query(
        r#"
        SELECT AVG(quality_score) AS avg_quality, AVG(loop_score) AS avg_loop
        FROM canvas_jobs
        WHERE status = 'complete'
        "#,
    )
    .fetch_one(pool)
    .await?;
    stats.avg_quality_score = averages.try_get("avg_quality")?;
    stats.avg_loop_score = averages.try_get("avg_loop")?;

    Ok(stats)
}

/// Explain why a write keyed on `(job_id, worker_id)` matched nothing.
async fn ownership_error(pool: &PgPool, job_id: &str, worker_id: &str) -> StoreError {
    match sqlx::query("SELECT 1 FROM canvas_jobs WHERE id = $1")
        .bind(job_id)
        .fetch_optional(pool)
        .await
    {
        Ok(Some(_)) => StoreError::NotClaimedBy {
            job_id: job_id.to_string(),
            worker_id: worker_id.to_string(),
        },
        Ok(None) => StoreError::NotFound(job_id.to_string()),
        Err(e) => StoreError::Database(e),
    }
}
