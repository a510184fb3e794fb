//! The analysis capability.
//!
//! Pose detection and issue classification live outside this service. The
//! service only knows how to ask for an analysis of a stored video and where
//! the processed video and report are expected to appear afterwards.

use async_trait::async_trait;
use std::{
    path::PathBuf,
    process::{ExitStatus, Stdio},
    time::{Duration, Instant},
};
use thiserror::Error;
use tokio::process::Command;

/// Longest slice of analyser stderr carried in an error.
const MAX_STDERR_BYTES: usize = 2048;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("failed to launch analyser `{program}`: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("analyser exited with {status}: {stderr}")]
    Failed { status: ExitStatus, stderr: String },
    #[error("analyser did not finish within {0:?}")]
    TimedOut(Duration),
    #[error("analyser finished without writing the processed video")]
    MissingOutput,
    #[error("analysis task aborted: {0}")]
    Aborted(String),
}

/// One analysis invocation.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub mode: i64,
    /// Stored upload.
    pub input: PathBuf,
    /// Where the processed video must be written.
    pub output: PathBuf,
    /// Where the JSON report must be written.
    pub report: PathBuf,
}

#[async_trait]
pub trait Analyser: Send + Sync {
    /// Run the analysis to completion. Blocks the calling task for the full
    /// duration of the analysis.
    async fn analyse(&self, request: &AnalysisRequest) -> Result<(), AnalysisError>;

    /// Short description used in logs.
    fn describe(&self) -> String;
}

/// Runs an external analyser executable:
///
/// `<program> <args...> --mode <n> --input <path> --output <path> --report <path>`
#[derive(Debug, Clone)]
pub struct CommandAnalyser {
    program: String,
    args: Vec<String>,
    timeout: Option<Duration>,
}

impl CommandAnalyser {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Option<Duration>) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    fn command(&self, request: &AnalysisRequest) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg("--mode")
            .arg(request.mode.to_string())
            .arg("--input")
            .arg(&request.input)
            .arg("--output")
            .arg(&request.output)
            .arg("--report")
            .arg(&request.report)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl Analyser for CommandAnalyser {
    #[tracing::instrument(skip(self, request), fields(program = %self.program, input = %request.input.display()))]
    async fn analyse(&self, request: &AnalysisRequest) -> Result<(), AnalysisError> {
        let start = Instant::now();
        let mut cmd = self.command(request);
        let run = cmd.output();

        let output = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(res) => res,
                Err(_) => {
                    tracing::warn!(timeout_secs = limit.as_secs(), "analyser timed out");
                    return Err(AnalysisError::TimedOut(limit));
                }
            },
            None => run.await,
        }
        .map_err(|source| AnalysisError::Launch {
            program: self.program.clone(),
            source,
        })?;

        if !output.status.success() {
            let stderr = truncate_stderr(&output.stderr);
            tracing::warn!(status = %output.status, %stderr, "analyser failed");
            return Err(AnalysisError::Failed {
                status: output.status,
                stderr,
            });
        }

        tracing::debug!(
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "analyser finished"
        );
        Ok(())
    }

    fn describe(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

fn truncate_stderr(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    let text = text.trim();
    if text.len() <= MAX_STDERR_BYTES {
        return text.to_string();
    }
    let mut cut = MAX_STDERR_BYTES;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...", &text[..cut])
}
