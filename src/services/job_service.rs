//! src/services/job_service.rs
//!
//! JobService: the upload, analyse, persist and retrieve workflow. Job
//! metadata lives in SQLite, artifacts live in the [`ArtifactStore`], and the
//! analysis itself is delegated to an [`Analyser`].
//!
//! Every job runs on its own spawned task. The synchronous endpoint awaits
//! that task, the asynchronous one returns immediately; either way a client
//! going away never cancels an analysis half way.

use crate::{
    models::job::{Job, JobStatus},
    services::{
        analyser::{Analyser, AnalysisError, AnalysisRequest},
        storage_service::{ArtifactStore, StorageError, display_filename},
    },
};
use bytes::Bytes;
use chrono::Utc;
use futures::Stream;
use serde_json::Value;
use sqlx::{QueryBuilder, SqlitePool, sqlite::Sqlite};
use std::{io, sync::Arc, time::Instant};
use thiserror::Error;
use tokio::{fs::File, sync::Semaphore, task::JoinHandle};
use tracing::{error, info, warn};
use uuid::Uuid;

const JOB_COLUMNS: &str = "id, original_filename, content_type, upload_name, processed_name, \
     size_bytes, checksum, status, error, created_at, updated_at, completed_at";

pub const DEFAULT_LIST_LIMIT: usize = 20;
pub const MAX_LIST_LIMIT: usize = 100;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("job `{0}` not found")]
    NotFound(Uuid),
    #[error("request does not contain a file upload")]
    MissingFile,
    #[error("uploaded filename `{0}` is not usable")]
    InvalidFilename(String),
    #[error("uploaded file is empty")]
    EmptyUpload,
    #[error("job `{id}` is {status}, its report is not available yet")]
    NotReady { id: Uuid, status: JobStatus },
    #[error("job `{id}` is still {status}")]
    Busy { id: Uuid, status: JobStatus },
    #[error("analyser did not produce a report for job `{0}`")]
    ReportNotFound(Uuid),
    #[error("report for job `{id}` is not valid JSON: {source}")]
    ReportParse {
        id: Uuid,
        #[source]
        source: serde_json::Error,
    },
    #[error("report for job `{0}` is not a JSON object")]
    ReportShape(Uuid),
    #[error(transparent)]
    Analysis(#[from] AnalysisError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type JobResult<T> = Result<T, JobError>;

/// A finished job together with its parsed report.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub job: Job,
    pub report: Value,
}

#[derive(Clone)]
pub struct JobService {
    /// Shared SQLite connection pool used for job metadata.
    pub db: SqlitePool,

    /// Artifact directories.
    pub store: ArtifactStore,

    analyser: Arc<dyn Analyser>,

    /// Bounds how many analyses run at once.
    slots: Arc<Semaphore>,

    mode: i64,
}

impl JobService {
    pub fn new(
        db: SqlitePool,
        store: ArtifactStore,
        analyser: Arc<dyn Analyser>,
        mode: i64,
        max_concurrent_jobs: usize,
    ) -> Self {
        Self {
            db,
            store,
            analyser,
            slots: Arc::new(Semaphore::new(max_concurrent_jobs.max(1))),
            mode,
        }
    }

    /// Persist an upload and register a pending job for it.
    ///
    /// Empty uploads are removed again and rejected; no job row is written
    /// for them.
    pub async fn accept_upload<S>(
        &self,
        filename: Option<&str>,
        content_type: Option<String>,
        stream: S,
    ) -> JobResult<Job>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        let raw_name = filename.unwrap_or_default();
        let original_filename = display_filename(raw_name)
            .ok_or_else(|| JobError::InvalidFilename(raw_name.to_string()))?;

        let id = Uuid::new_v4();
        let upload_name = ArtifactStore::upload_name(id, &original_filename);
        let processed_name = ArtifactStore::processed_name(&upload_name);

        let stored = self.store.store_upload_stream(&upload_name, stream).await?;
        if stored.size_bytes == 0 {
            self.store.remove_upload(&upload_name).await?;
            return Err(JobError::EmptyUpload);
        }

        let now = Utc::now();
        let job = sqlx::query_as::<_, Job>(&format!(
            "INSERT INTO jobs ({JOB_COLUMNS}) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, NULL, ?, ?, NULL) \
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(id)
        .bind(&original_filename)
        .bind(content_type)
        .bind(&upload_name)
        .bind(&processed_name)
        .bind(stored.size_bytes)
        .bind(&stored.checksum)
        .bind(JobStatus::Pending)
        .bind(now)
        .bind(now)
        .fetch_one(&self.db)
        .await;

        match job {
            Ok(job) => {
                info!(
                    job_id = %job.id,
                    original_filename = %job.original_filename,
                    size_bytes = job.size_bytes,
                    "accepted upload"
                );
                Ok(job)
            }
            Err(err) => {
                let _ = self.store.remove_upload(&upload_name).await;
                Err(JobError::Sqlx(err))
            }
        }
    }

    /// Run a job on a background task.
    pub fn spawn(&self, job: Job) -> JoinHandle<JobResult<JobOutcome>> {
        let service = self.clone();
        tokio::spawn(async move { service.run(job).await })
    }

    /// Run a job on a background task and wait for it to finish.
    pub async fn analyse_now(&self, job: Job) -> JobResult<JobOutcome> {
        let job_id = job.id;
        match self.spawn(job).await {
            Ok(result) => result,
            Err(join_err) => {
                error!(job_id = %job_id, error = %join_err, "analysis task aborted");
                let message = join_err.to_string();
                self.record_failure(job_id, &message).await;
                Err(AnalysisError::Aborted(message).into())
            }
        }
    }

    /// Wait for an analysis slot, analyse, and record the terminal state.
    pub async fn run(&self, job: Job) -> JobResult<JobOutcome> {
        let _permit = match self.slots.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(err) => {
                let message = format!("analysis slots closed: {}", err);
                self.record_failure(job.id, &message).await;
                return Err(AnalysisError::Aborted(message).into());
            }
        };

        if let Err(err) = self.set_status(job.id, JobStatus::Running, None).await {
            self.record_failure(job.id, &err.to_string()).await;
            return Err(err);
        }
        let start = Instant::now();
        info!(job_id = %job.id, analyser = %self.analyser.describe(), "analysis started");

        match self.execute(&job).await {
            Ok(report) => {
                let job = self.set_status(job.id, JobStatus::Completed, None).await?;
                info!(
                    job_id = %job.id,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "analysis completed"
                );
                Ok(JobOutcome { job, report })
            }
            Err(err) => {
                warn!(
                    job_id = %job.id,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    error = %err,
                    "analysis failed"
                );
                self.record_failure(job.id, &err.to_string()).await;
                Err(err)
            }
        }
    }

    async fn execute(&self, job: &Job) -> JobResult<Value> {
        let request = AnalysisRequest {
            mode: self.mode,
            input: self.store.upload_path(&job.upload_name),
            output: self.store.processed_path(&job.processed_name),
            report: self.store.report_path(job.id),
        };
        self.analyser.analyse(&request).await?;

        if !self.store.processed_exists(&job.processed_name).await {
            return Err(AnalysisError::MissingOutput.into());
        }

        let raw = match self.store.read_report(job.id).await {
            Ok(raw) => raw,
            Err(StorageError::ArtifactNotFound(_)) => return Err(JobError::ReportNotFound(job.id)),
            Err(err) => return Err(err.into()),
        };
        parse_report(job.id, &raw)
    }

    /// Best effort: a failure to record the failure is only logged.
    async fn record_failure(&self, id: Uuid, message: &str) {
        if let Err(db_err) = self.set_status(id, JobStatus::Failed, Some(message)).await {
            error!(job_id = %id, error = %db_err, "could not record job failure");
        }
    }

    /// Fetch a job by id.
    pub async fn get(&self, id: Uuid) -> JobResult<Job> {
        sqlx::query_as::<_, Job>(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?"))
            .bind(id)
            .fetch_one(&self.db)
            .await
            .map_err(|err| match err {
                sqlx::Error::RowNotFound => JobError::NotFound(id),
                other => JobError::Sqlx(other),
            })
    }

    /// Most recent jobs first, optionally filtered by status.
    pub async fn list(&self, status: Option<JobStatus>, limit: usize) -> JobResult<Vec<Job>> {
        let limit = limit.clamp(1, MAX_LIST_LIMIT);
        let mut builder =
            QueryBuilder::<Sqlite>::new(format!("SELECT {JOB_COLUMNS} FROM jobs"));
        if let Some(status) = status {
            builder.push(" WHERE status = ");
            builder.push_bind(status);
        }
        builder.push(" ORDER BY created_at DESC LIMIT ");
        builder.push_bind(limit as i64);

        Ok(builder
            .build_query_as::<Job>()
            .fetch_all(&self.db)
            .await?)
    }

    /// Parsed report of a completed job.
    pub async fn report(&self, id: Uuid) -> JobResult<Value> {
        let job = self.get(id).await?;
        if job.status != JobStatus::Completed {
            return Err(JobError::NotReady {
                id,
                status: job.status,
            });
        }
        let raw = self.store.read_report(id).await?;
        parse_report(id, &raw)
    }

    /// Open the processed video of a completed job for download.
    ///
    /// Names that no completed job produced are reported as missing, even
    /// when a file of that name exists (failed or still running jobs).
    pub async fn open_download(&self, processed_name: &str) -> JobResult<(File, u64)> {
        ArtifactStore::ensure_name_safe(processed_name)?;
        let completed: Option<(Uuid,)> =
            sqlx::query_as("SELECT id FROM jobs WHERE processed_name = ? AND status = ?")
                .bind(processed_name)
                .bind(JobStatus::Completed)
                .fetch_optional(&self.db)
                .await?;
        if completed.is_none() {
            return Err(StorageError::ArtifactNotFound(processed_name.to_string()).into());
        }
        Ok(self.store.open_result(processed_name).await?)
    }

    /// Remove a finished job and all of its artifacts.
    pub async fn delete(&self, id: Uuid) -> JobResult<Job> {
        let job = self.get(id).await?;
        if !job.status.is_terminal() {
            return Err(JobError::Busy {
                id,
                status: job.status,
            });
        }

        self.store
            .remove_job_artifacts(job.id, &job.upload_name, &job.processed_name)
            .await?;
        sqlx::query("DELETE FROM jobs WHERE id = ?")
            .bind(id)
            .execute(&self.db)
            .await?;

        info!(job_id = %id, "deleted job");
        Ok(job)
    }

    /// Fail jobs a previous process left pending or running.
    pub async fn recover_interrupted(&self) -> JobResult<u64> {
        let result = sqlx::query(
            "UPDATE jobs SET status = ?, error = ?, updated_at = ?, completed_at = ?
             WHERE status IN (?, ?)",
        )
        .bind(JobStatus::Failed)
        .bind("interrupted by restart")
        .bind(Utc::now())
        .bind(Utc::now())
        .bind(JobStatus::Pending)
        .bind(JobStatus::Running)
        .execute(&self.db)
        .await?;

        let count = result.rows_affected();
        if count > 0 {
            warn!(count, "marked interrupted jobs as failed");
        }
        Ok(count)
    }

    async fn set_status(
        &self,
        id: Uuid,
        status: JobStatus,
        error: Option<&str>,
    ) -> JobResult<Job> {
        let now = Utc::now();
        let completed_at = status.is_terminal().then_some(now);
        sqlx::query_as::<_, Job>(&format!(
            "UPDATE jobs SET status = ?, error = ?, updated_at = ?, \
             completed_at = COALESCE(?, completed_at) \
             WHERE id = ? RETURNING {JOB_COLUMNS}"
        ))
        .bind(status)
        .bind(error)
        .bind(now)
        .bind(completed_at)
        .bind(id)
        .fetch_one(&self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => JobError::NotFound(id),
            other => JobError::Sqlx(other),
        })
    }
}

/// Reports must be JSON objects.
fn parse_report(id: Uuid, raw: &[u8]) -> JobResult<Value> {
    let report: Value =
        serde_json::from_slice(raw).map_err(|source| JobError::ReportParse { id, source })?;
    if !report.is_object() {
        return Err(JobError::ReportShape(id));
    }
    Ok(report)
}
