//! HTTP handlers for analysis jobs and processed-video downloads.
//! Upload bodies are streamed straight to disk, and downloads are streamed back
//! out, so neither is buffered in memory.

use crate::{
    errors::AppError,
    models::job::{Job, JobStatus},
    services::{
        job_service::{DEFAULT_LIST_LIMIT, JobError, JobService},
        storage_service::StorageError,
    },
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, Query, State, multipart::MultipartError},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io;
use tokio_util::io::ReaderStream;
use uuid::Uuid;

const VIDEO_CONTENT_TYPE: &str = "video/mp4";

/// Body of a successful `POST /analyze-squat/`.
#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    pub job_id: Uuid,
    pub analysis: Value,
    pub processed_video: String,
}

/// Body of `POST /jobs`.
#[derive(Debug, Serialize)]
pub struct SubmittedJob {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub status_url: String,
}

/// Public view of a job.
#[derive(Debug, Serialize)]
pub struct JobView {
    pub id: Uuid,
    pub original_filename: String,
    pub content_type: Option<String>,
    pub status: JobStatus,
    pub size_bytes: i64,
    pub checksum: String,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_video: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_url: Option<String>,
}

impl From<Job> for JobView {
    fn from(job: Job) -> Self {
        let completed = job.status == JobStatus::Completed;
        Self {
            processed_video: completed.then(|| job.download_url()),
            report_url: completed.then(|| job.report_url()),
            id: job.id,
            original_filename: job.original_filename,
            content_type: job.content_type,
            status: job.status,
            size_bytes: job.size_bytes,
            checksum: job.checksum,
            error: job.error,
            created_at: job.created_at,
            updated_at: job.updated_at,
            completed_at: job.completed_at,
        }
    }
}

/// Query params accepted by `GET /jobs`.
#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    pub status: Option<String>,
    pub limit: Option<usize>,
}

/// `POST /analyze-squat/`: store the upload, analyse it and answer with the
/// report and a download link once the analysis has finished.
pub async fn analyze_squat(
    State(service): State<JobService>,
    multipart: Multipart,
) -> Result<Json<AnalyzeResponse>, AppError> {
    let job = accept_multipart(&service, multipart).await?;
    let outcome = service.analyse_now(job).await?;

    Ok(Json(AnalyzeResponse {
        job_id: outcome.job.id,
        processed_video: outcome.job.download_url(),
        analysis: outcome.report,
    }))
}

/// `POST /jobs`: store the upload and analyse it in the background.
pub async fn submit_job(
    State(service): State<JobService>,
    multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let job = accept_multipart(&service, multipart).await?;
    let body = SubmittedJob {
        job_id: job.id,
        status: job.status,
        status_url: job.status_url(),
    };
    // Detached: the job records its own outcome.
    service.spawn(job);

    Ok((StatusCode::ACCEPTED, Json(body)))
}

/// `GET /jobs`
pub async fn list_jobs(
    State(service): State<JobService>,
    Query(q): Query<ListJobsQuery>,
) -> Result<Json<Vec<JobView>>, AppError> {
    let status = q
        .status
        .as_deref()
        .map(str::parse::<JobStatus>)
        .transpose()
        .map_err(AppError::bad_request)?;
    let limit = q.limit.unwrap_or(DEFAULT_LIST_LIMIT);

    let jobs = service.list(status, limit).await?;
    Ok(Json(jobs.into_iter().map(JobView::from).collect()))
}

/// `GET /jobs/{id}`
pub async fn get_job(
    State(service): State<JobService>,
    Path(id): Path<Uuid>,
) -> Result<Json<JobView>, AppError> {
    Ok(Json(service.get(id).await?.into()))
}

/// `GET /jobs/{id}/report`
pub async fn get_job_report(
    State(service): State<JobService>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    Ok(Json(service.report(id).await?))
}

/// `DELETE /jobs/{id}`
pub async fn delete_job(
    State(service): State<JobService>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    service.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /download/{filename}`: stream the processed video of a completed job.
pub async fn download_video(
    State(service): State<JobService>,
    Path(filename): Path<String>,
) -> Result<Response, AppError> {
    let (file, len) = service.open_download(&filename).await?;
    let body = Body::from_stream(ReaderStream::new(file));

    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(VIDEO_CONTENT_TYPE),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    if let Ok(value) =
        HeaderValue::from_str(&format!("attachment; filename=\"{}\"", filename.replace('"', "")))
    {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }

    Ok(response)
}

/// Pull the first file field out of a multipart body and hand it to the
/// service as a stream.
async fn accept_multipart(service: &JobService, mut multipart: Multipart) -> Result<Job, AppError> {
    while let Some(field) = multipart.next_field().await? {
        if field.file_name().is_none() && field.name() != Some("file") {
            continue;
        }

        let filename = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);
        let stream = field.map(|chunk| chunk.map_err(io::Error::other));

        return service
            .accept_upload(filename.as_deref(), content_type, stream)
            .await
            .map_err(upload_error);
    }

    Err(JobError::MissingFile.into())
}

/// Surface body errors (size limit, malformed parts) with their own status
/// instead of as storage failures.
fn upload_error(err: JobError) -> AppError {
    match err {
        JobError::Storage(StorageError::Io(io_err))
            if io_err
                .get_ref()
                .is_some_and(|inner| inner.is::<MultipartError>()) =>
        {
            match io_err
                .into_inner()
                .map(|inner| inner.downcast::<MultipartError>())
            {
                Some(Ok(multipart_err)) => AppError::from(*multipart_err),
                _ => AppError::internal("upload stream failed"),
            }
        }
        other => other.into(),
    }
}
