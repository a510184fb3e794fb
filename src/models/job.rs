//! Represents one analysis run: the uploaded video, its derived artifacts and
//! where it is in its lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::{fmt, str::FromStr};
use uuid::Uuid;

/// Lifecycle of a job. `Completed` and `Failed` are terminal.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status `{}`", other)),
        }
    }
}

/// A single upload-and-analyse run.
///
/// Every artifact on disk is named after `id`; the client's filename is kept
/// only for display.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Job {
    /// Job identifier, also the storage key for all artifacts.
    pub id: Uuid,

    /// Filename as sent by the client, stripped of any path components.
    pub original_filename: String,

    /// Content type declared by the client, if any.
    pub content_type: Option<String>,

    /// Name of the stored upload inside the upload directory.
    pub upload_name: String,

    /// Name of the processed video inside the results directory.
    pub processed_name: String,

    /// Size of the upload in bytes.
    pub size_bytes: i64,

    /// MD5 of the upload, lowercase hex.
    pub checksum: String,

    pub status: JobStatus,

    /// Failure message when `status` is `failed`.
    pub error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Download link for the processed video.
    pub fn download_url(&self) -> String {
        format!("/download/{}", self.processed_name)
    }

    pub fn status_url(&self) -> String {
        format!("/jobs/{}", self.id)
    }

    pub fn report_url(&self) -> String {
        format!("/jobs/{}/report", self.id)
    }
}
