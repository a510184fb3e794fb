use anyhow::{Context, Result};
use axum::Router;
use squat_analysis_service::{
    config, db, routes,
    services::{
        analyser::CommandAnalyser, job_service::JobService, storage_service::ArtifactStore,
    },
};
use std::{io::ErrorKind, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting squat-analysis-service with config: {:?}", cfg);

    // --- Initialize SQLite connection ---
    let pool = db::connect(&cfg.database_url).await?;
    db::run_migrations(&pool).await?;

    // --- Handle migration mode ---
    if migrate {
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Ensure artifact directories exist ---
    let store = ArtifactStore::new(&cfg.upload_dir, &cfg.results_dir, &cfg.report_dir);
    store
        .ensure_dirs()
        .await
        .context("creating artifact directories")?;

    // --- Initialize core service ---
    let analyser = CommandAnalyser::new(
        cfg.analyser_program.clone(),
        cfg.analyser_args.clone(),
        cfg.analysis_timeout,
    );
    let jobs = JobService::new(
        pool,
        store,
        Arc::new(analyser),
        cfg.analysis_mode,
        cfg.max_concurrent_jobs,
    );
    jobs.recover_interrupted()
        .await
        .context("recovering interrupted jobs")?;

    // --- Build router ---
    let app: Router = routes::routes::routes(cfg.max_upload_bytes).with_state(jobs);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received, draining connections");
}
