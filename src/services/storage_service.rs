//! src/services/storage_service.rs
//!
//! ArtifactStore: the explicit storage capability for job artifacts. It owns
//! three flat directories:
//!
//! - `upload_dir/{job_id}.{ext}`: the raw upload, written once
//! - `results_dir/processed_{job_id}.{ext}`: processed video written by the analyser
//! - `report_dir/{job_id}.json`: per-job analysis report written by the analyser
//!
//! Client-supplied filenames never reach a path; every name is derived from the
//! job id. Names coming back in from the outside (downloads) go through
//! [`ArtifactStore::ensure_name_safe`].

use bytes::Bytes;
use futures::{Stream, StreamExt, pin_mut};
use md5::Context;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("artifact `{0}` not found")]
    ArtifactNotFound(String),
    #[error("invalid artifact name `{0}`")]
    InvalidName(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Result of streaming an upload to disk.
#[derive(Debug, Clone)]
pub struct StoredUpload {
    pub path: PathBuf,
    pub size_bytes: i64,
    pub checksum: String,
}

#[derive(Clone, Debug)]
pub struct ArtifactStore {
    upload_dir: PathBuf,
    results_dir: PathBuf,
    report_dir: PathBuf,
}

const MAX_ARTIFACT_NAME_LEN: usize = 255;
const MAX_EXTENSION_LEN: usize = 8;
const DEFAULT_EXTENSION: &str = "mp4";

impl ArtifactStore {
    pub fn new(
        upload_dir: impl Into<PathBuf>,
        results_dir: impl Into<PathBuf>,
        report_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            upload_dir: upload_dir.into(),
            results_dir: results_dir.into(),
            report_dir: report_dir.into(),
        }
    }

    /// Create all artifact directories.
    pub async fn ensure_dirs(&self) -> StorageResult<()> {
        for (label, dir) in self.directories() {
            if !fs::try_exists(dir).await.unwrap_or(false) {
                fs::create_dir_all(dir).await?;
                tracing::info!("Created {} directory at {}", label, dir.display());
            }
        }
        Ok(())
    }

    /// Labelled artifact directories, used by the readiness probe.
    pub fn directories(&self) -> [(&'static str, &Path); 3] {
        [
            ("uploads", self.upload_dir.as_path()),
            ("results", self.results_dir.as_path()),
            ("reports", self.report_dir.as_path()),
        ]
    }

    /// Validate a name that must address a single file inside one of the
    /// artifact directories.
    ///
    /// Rejects empty or overlong names, separators, `..` and control bytes.
    pub fn ensure_name_safe(name: &str) -> StorageResult<()> {
        let invalid = || StorageError::InvalidName(name.to_string());
        if name.is_empty() || name.len() > MAX_ARTIFACT_NAME_LEN {
            return Err(invalid());
        }
        if name == "." || name.contains("..") || name.starts_with('.') {
            return Err(invalid());
        }
        if name
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'/' || b == b'\\' || b == b'\0')
        {
            return Err(invalid());
        }
        Ok(())
    }

    /// Stored upload name for a job: `{job_id}.{ext}`.
    pub fn upload_name(job_id: Uuid, original_filename: &str) -> String {
        format!("{}.{}", job_id, stored_extension(original_filename))
    }

    /// Processed video name derived from the stored upload name.
    pub fn processed_name(upload_name: &str) -> String {
        format!("processed_{}", upload_name)
    }

    pub fn upload_path(&self, upload_name: &str) -> PathBuf {
        self.upload_dir.join(upload_name)
    }

    pub fn processed_path(&self, processed_name: &str) -> PathBuf {
        self.results_dir.join(processed_name)
    }

    pub fn report_path(&self, job_id: Uuid) -> PathBuf {
        self.report_dir.join(format!("{}.json", job_id))
    }

    /// Stream an upload to `upload_dir/{upload_name}`.
    ///
    /// - Writes bytes incrementally to a temporary file.
    /// - Computes MD5 and size while streaming.
    /// - Renames into final location after fsync.
    ///
    /// The temp file is removed on every error path.
    pub async fn store_upload_stream<S>(
        &self,
        upload_name: &str,
        stream: S,
    ) -> StorageResult<StoredUpload>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        Self::ensure_name_safe(upload_name)?;
        fs::create_dir_all(&self.upload_dir).await?;

        let file_path = self.upload_path(upload_name);
        let tmp_path = self.upload_dir.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let mut size_bytes: i64 = 0;
        let mut digest = Context::new();
        pin_mut!(stream);
        while let Some(chunk_res) = stream.next().await {
            let chunk = match chunk_res {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(StorageError::Io(err));
                }
            };
            size_bytes += chunk.len() as i64;
            digest.consume(&chunk);
            if let Err(err) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::Io(err));
            }
        }
        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }
        drop(file);

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }

        debug!(
            path = %file_path.display(),
            size_bytes,
            "stored upload"
        );

        Ok(StoredUpload {
            path: file_path,
            size_bytes,
            checksum: format!("{:x}", digest.compute()),
        })
    }

    /// Open a file from the results directory for streaming out.
    ///
    /// Returns the handle and its length. Missing files and anything that is
    /// not a regular file map to `ArtifactNotFound`.
    pub async fn open_result(&self, name: &str) -> StorageResult<(File, u64)> {
        Self::ensure_name_safe(name)?;
        let path = self.results_dir.join(name);
        let not_found = || StorageError::ArtifactNotFound(name.to_string());

        let meta = match fs::metadata(&path).await {
            Ok(meta) => meta,
            Err(err) if err.kind() == ErrorKind::NotFound => return Err(not_found()),
            Err(err) => return Err(StorageError::Io(err)),
        };
        if !meta.is_file() {
            return Err(not_found());
        }

        let file = File::open(&path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                not_found()
            } else {
                StorageError::Io(err)
            }
        })?;

        Ok((file, meta.len()))
    }

    /// Whether a processed video exists.
    pub async fn processed_exists(&self, processed_name: &str) -> bool {
        fs::metadata(self.processed_path(processed_name))
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
    }

    /// Read the raw report for a job.
    pub async fn read_report(&self, job_id: Uuid) -> StorageResult<Vec<u8>> {
        let path = self.report_path(job_id);
        fs::read(&path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StorageError::ArtifactNotFound(format!("{}.json", job_id))
            } else {
                StorageError::Io(err)
            }
        })
    }

    /// Remove a stored upload. Missing files are not an error.
    pub async fn remove_upload(&self, upload_name: &str) -> StorageResult<()> {
        remove_if_present(&self.upload_path(upload_name)).await
    }

    /// Remove every artifact belonging to a job. Missing files are skipped.
    pub async fn remove_job_artifacts(
        &self,
        job_id: Uuid,
        upload_name: &str,
        processed_name: &str,
    ) -> StorageResult<()> {
        remove_if_present(&self.upload_path(upload_name)).await?;
        remove_if_present(&self.processed_path(processed_name)).await?;
        remove_if_present(&self.report_path(job_id)).await?;
        Ok(())
    }
}

async fn remove_if_present(path: &Path) -> StorageResult<()> {
    match fs::remove_file(path).await {
        Ok(_) => {
            debug!("removed artifact {}", path.display());
            Ok(())
        }
        Err(err) if err.kind() == ErrorKind::NotFound => {
            debug!("artifact {} already missing", path.display());
            Ok(())
        }
        Err(err) => Err(StorageError::Io(err)),
    }
}

/// Extension used for the stored copy of an upload.
///
/// Lower-cased, alphanumeric and at most eight characters, otherwise `mp4`.
pub fn stored_extension(original_filename: &str) -> String {
    Path::new(original_filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| {
            !ext.is_empty()
                && ext.len() <= MAX_EXTENSION_LEN
                && ext.chars().all(|c| c.is_ascii_alphanumeric())
        })
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string())
}

/// Reduce a client filename to its final path component for display.
///
/// Handles both `/` and `\` separators. Returns `None` when nothing usable
/// remains.
pub fn display_filename(raw: &str) -> Option<String> {
    let last = raw.rsplit(['/', '\\']).next().unwrap_or(raw);
    let cleaned: String = last.chars().filter(|c| !c.is_control()).collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        None
    } else {
        Some(cleaned.to_string())
    }
}
