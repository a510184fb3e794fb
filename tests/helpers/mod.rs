//! Test helpers: build a JobService backed by temp directories and an
//! in-process analyser, and wrap the router in an axum-test server.

#![allow(dead_code)]

use async_trait::async_trait;
use axum_test::TestServer;
use squat_analysis_service::{
    db,
    routes::routes::routes,
    services::{
        analyser::{Analyser, AnalysisError, AnalysisRequest},
        job_service::JobService,
        storage_service::ArtifactStore,
    },
};
use std::{sync::Arc, time::Duration};
use tempfile::TempDir;
use tokio::sync::Notify;

/// Test application: server, service and the owned temp directory.
pub struct TestApp {
    pub server: TestServer,
    pub service: JobService,
    pub _temp_dir: TempDir,
}

impl TestApp {
    pub fn client(&self) -> &TestServer {
        &self.server
    }

    pub fn results_dir(&self) -> std::path::PathBuf {
        self._temp_dir.path().join("results")
    }
}

pub async fn setup_test_app(analyser: Arc<dyn Analyser>) -> TestApp {
    setup_test_app_with_limit(analyser, 16 * 1024 * 1024).await
}

pub async fn setup_test_app_with_limit(
    analyser: Arc<dyn Analyser>,
    max_upload_bytes: usize,
) -> TestApp {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let root = temp_dir.path();

    let pool = db::connect(&format!("sqlite://{}", root.join("meta/jobs.db").display()))
        .await
        .expect("Failed to open database");
    db::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");

    let store = ArtifactStore::new(
        root.join("uploads"),
        root.join("results"),
        root.join("reports"),
    );
    store.ensure_dirs().await.expect("Failed to create dirs");

    let service = JobService::new(pool, store, analyser, 1, 4);
    let app = routes(max_upload_bytes).with_state(service.clone());
    let server = TestServer::new(app).expect("Failed to create test server");

    TestApp {
        server,
        service,
        _temp_dir: temp_dir,
    }
}

/// Behaves like a well-formed analyser: copies the input to the processed
/// path and writes a report that echoes the input size and content.
pub struct EchoAnalyser {
    pub delay: Duration,
}

pub fn echo_analyser() -> Arc<dyn Analyser> {
    Arc::new(EchoAnalyser {
        delay: Duration::ZERO,
    })
}

pub fn slow_echo_analyser(delay: Duration) -> Arc<dyn Analyser> {
    Arc::new(EchoAnalyser { delay })
}

#[async_trait]
impl Analyser for EchoAnalyser {
    async fn analyse(&self, request: &AnalysisRequest) -> Result<(), AnalysisError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let input = tokio::fs::read(&request.input)
            .await
            .map_err(|e| AnalysisError::Aborted(e.to_string()))?;
        tokio::fs::write(&request.output, &input)
            .await
            .map_err(|e| AnalysisError::Aborted(e.to_string()))?;

        let report = serde_json::json!({
            "mode": request.mode,
            "input_bytes": input.len(),
            "input_text": String::from_utf8_lossy(&input),
            "issues": [
                { "frame": 42, "issue": "knees caving in" }
            ]
        });
        tokio::fs::write(&request.report, report.to_string())
            .await
            .map_err(|e| AnalysisError::Aborted(e.to_string()))?;
        Ok(())
    }

    fn describe(&self) -> String {
        "echo".into()
    }
}

/// Finishes without producing anything.
pub struct SilentAnalyser;

#[async_trait]
impl Analyser for SilentAnalyser {
    async fn analyse(&self, _request: &AnalysisRequest) -> Result<(), AnalysisError> {
        Ok(())
    }

    fn describe(&self) -> String {
        "silent".into()
    }
}

/// Copies the input to the processed path and writes `report` verbatim.
pub struct FixedReportAnalyser {
    pub report: &'static str,
}

#[async_trait]
impl Analyser for FixedReportAnalyser {
    async fn analyse(&self, request: &AnalysisRequest) -> Result<(), AnalysisError> {
        tokio::fs::copy(&request.input, &request.output)
            .await
            .map_err(|e| AnalysisError::Aborted(e.to_string()))?;
        tokio::fs::write(&request.report, self.report)
            .await
            .map_err(|e| AnalysisError::Aborted(e.to_string()))?;
        Ok(())
    }

    fn describe(&self) -> String {
        "fixed-report".into()
    }
}

/// Blocks until released, then behaves like [`EchoAnalyser`].
pub struct GatedAnalyser {
    pub gate: Arc<Notify>,
}

#[async_trait]
impl Analyser for GatedAnalyser {
    async fn analyse(&self, request: &AnalysisRequest) -> Result<(), AnalysisError> {
        self.gate.notified().await;
        EchoAnalyser {
            delay: Duration::ZERO,
        }
        .analyse(request)
        .await
    }

    fn describe(&self) -> String {
        "gated".into()
    }
}

/// Poll `GET /jobs/{id}` until the job reaches a terminal state.
pub async fn wait_for_terminal(server: &TestServer, job_id: &str) -> serde_json::Value {
    for _ in 0..100 {
        let res = server.get(&format!("/jobs/{}", job_id)).await;
        assert_eq!(res.status_code(), 200);
        let body: serde_json::Value = res.json();
        if matches!(body["status"].as_str(), Some("completed") | Some("failed")) {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("job {} did not finish in time", job_id);
}

/// Poll until the job leaves `pending`.
pub async fn wait_for_running(server: &TestServer, job_id: &str) {
    for _ in 0..100 {
        let body: serde_json::Value = server.get(&format!("/jobs/{}", job_id)).await.json();
        if body["status"] == "running" {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("job {} never started running", job_id);
}
