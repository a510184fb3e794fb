//! Defines routes for analysis jobs and downloads.
//!
//! ## Structure
//! - **Synchronous analysis**
//!   - `POST   /analyze-squat/`: upload, analyse, answer with report + download link
//!
//! - **Jobs**
//!   - `POST   /jobs`: upload and analyse in the background
//!   - `GET    /jobs`: list recent jobs (`?status=&limit=`)
//!   - `GET    /jobs/{id}`: job status
//!   - `GET    /jobs/{id}/report`: analysis report of a completed job
//!   - `DELETE /jobs/{id}`: remove a finished job and its artifacts
//!
//! - **Artifacts**
//!   - `GET    /download/{filename}`: stream a processed video

use crate::{
    handlers::{
        analysis_handlers::{
            analyze_squat, delete_job, download_video, get_job, get_job_report, list_jobs,
            submit_job,
        },
        health_handlers::{healthz, readyz},
    },
    services::job_service::JobService,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

/// Build and return the router for all service routes.
///
/// The router carries shared state (`JobService`) to all handlers. Upload
/// bodies may be up to `max_upload_bytes`.
pub fn routes(max_upload_bytes: usize) -> Router<JobService> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/analyze-squat/", post(analyze_squat))
        .route("/analyze-squat", post(analyze_squat))
        .route("/jobs", post(submit_job).get(list_jobs))
        .route("/jobs/{id}", get(get_job).delete(delete_job))
        .route("/jobs/{id}/report", get(get_job_report))
        .route("/download/{filename}", get(download_video))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
}
