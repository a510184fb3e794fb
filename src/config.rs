use anyhow::{Context, Result};
use clap::Parser;
use std::{env, path::PathBuf, str::FromStr, time::Duration};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub upload_dir: PathBuf,
    pub results_dir: PathBuf,
    pub report_dir: PathBuf,
    pub database_url: String,
    pub analyser_program: String,
    pub analyser_args: Vec<String>,
    pub analysis_mode: i64,
    pub analysis_timeout: Option<Duration>,
    pub max_concurrent_jobs: usize,
    pub max_upload_bytes: usize,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Squat video analysis service")]
pub struct Args {
    /// Host to bind to (overrides SQUAT_ANALYSIS_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides SQUAT_ANALYSIS_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where uploaded videos are stored (overrides SQUAT_ANALYSIS_UPLOAD_DIR)
    #[arg(long)]
    pub upload_dir: Option<PathBuf>,

    /// Directory where processed videos are written (overrides SQUAT_ANALYSIS_RESULTS_DIR)
    #[arg(long)]
    pub results_dir: Option<PathBuf>,

    /// Directory where per-job reports are written (overrides SQUAT_ANALYSIS_REPORT_DIR)
    #[arg(long)]
    pub report_dir: Option<PathBuf>,

    /// Database URL (overrides SQUAT_ANALYSIS_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Analyser executable (overrides SQUAT_ANALYSIS_ANALYSER_PROGRAM)
    #[arg(long)]
    pub analyser_program: Option<String>,

    /// Extra argument passed to the analyser before the job arguments. Repeatable.
    #[arg(long = "analyser-arg", allow_hyphen_values = true)]
    pub analyser_args: Vec<String>,

    /// Analysis mode handed to the analyser (overrides SQUAT_ANALYSIS_MODE)
    #[arg(long)]
    pub analysis_mode: Option<i64>,

    /// Seconds before a running analysis is killed, 0 disables (overrides SQUAT_ANALYSIS_TIMEOUT_SECS)
    #[arg(long)]
    pub analysis_timeout_secs: Option<u64>,

    /// Number of analyses allowed to run at once (overrides SQUAT_ANALYSIS_MAX_CONCURRENT_JOBS)
    #[arg(long)]
    pub max_concurrent_jobs: Option<usize>,

    /// Largest accepted upload body in bytes (overrides SQUAT_ANALYSIS_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<usize>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

const DEFAULT_MAX_UPLOAD_BYTES: usize = 1024 * 1024 * 1024;

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        Ok((Self::from_args(args)?, migrate))
    }

    /// Merge already-parsed CLI args with the environment. CLI values win.
    pub fn from_args(args: Args) -> Result<Self> {
        // --- Environment fallback ---
        let env_host = env::var("SQUAT_ANALYSIS_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = env_parse("SQUAT_ANALYSIS_PORT", 8000u16)?;
        let env_upload =
            env::var("SQUAT_ANALYSIS_UPLOAD_DIR").unwrap_or_else(|_| "./data/uploads".into());
        let env_results =
            env::var("SQUAT_ANALYSIS_RESULTS_DIR").unwrap_or_else(|_| "./data/results".into());
        let env_reports =
            env::var("SQUAT_ANALYSIS_REPORT_DIR").unwrap_or_else(|_| "./data/reports".into());
        let env_db = env::var("SQUAT_ANALYSIS_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/jobs.db".into());
        let env_program = env::var("SQUAT_ANALYSIS_ANALYSER_PROGRAM")
            .unwrap_or_else(|_| "squat-analyser".into());
        let env_args: Vec<String> = env::var("SQUAT_ANALYSIS_ANALYSER_ARGS")
            .map(|raw| raw.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();
        let env_mode = env_parse("SQUAT_ANALYSIS_MODE", 1i64)?;
        let env_timeout = env_parse("SQUAT_ANALYSIS_TIMEOUT_SECS", 0u64)?;
        let env_jobs = env_parse("SQUAT_ANALYSIS_MAX_CONCURRENT_JOBS", 2usize)?;
        let env_max_upload =
            env_parse("SQUAT_ANALYSIS_MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?;

        let timeout_secs = args.analysis_timeout_secs.unwrap_or(env_timeout);
        let max_concurrent_jobs = args.max_concurrent_jobs.unwrap_or(env_jobs);
        if max_concurrent_jobs == 0 {
            anyhow::bail!("max concurrent jobs must be at least 1");
        }

        // --- Merge ---
        Ok(Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            upload_dir: args.upload_dir.unwrap_or_else(|| env_upload.into()),
            results_dir: args.results_dir.unwrap_or_else(|| env_results.into()),
            report_dir: args.report_dir.unwrap_or_else(|| env_reports.into()),
            database_url: args.database_url.unwrap_or(env_db),
            analyser_program: args.analyser_program.unwrap_or(env_program),
            analyser_args: if args.analyser_args.is_empty() {
                env_args
            } else {
                args.analyser_args
            },
            analysis_mode: args.analysis_mode.unwrap_or(env_mode),
            analysis_timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)),
            max_concurrent_jobs,
            max_upload_bytes: args.max_upload_bytes.unwrap_or(env_max_upload),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Read and parse an optional environment variable, falling back to `default` when unset.
fn env_parse<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}
