//! API integration tests for the upload, analyse and download workflow.
//!
//! Run with: `cargo test --test analysis_test`

mod helpers;

use axum_test::multipart::{MultipartForm, Part};
use bytes::Bytes;
use helpers::{
    FixedReportAnalyser, SilentAnalyser, echo_analyser, setup_test_app, slow_echo_analyser,
};
use std::{sync::Arc, time::Duration};

fn video_form(filename: &str, content: &'static [u8]) -> MultipartForm {
    let part = Part::bytes(Bytes::from_static(content))
        .file_name(filename)
        .mime_type("video/mp4");
    MultipartForm::new().add_part("file", part)
}

#[tokio::test]
async fn test_analyze_returns_report_and_download_link() {
    let app = setup_test_app(echo_analyser()).await;
    let client = app.client();

    let res = client
        .post("/analyze-squat/")
        .multipart(video_form("squat1.mp4", b"squat frames"))
        .await;
    assert_eq!(res.status_code(), 200);

    let body: serde_json::Value = res.json();
    assert!(body.get("analysis").is_some());
    assert_eq!(body["analysis"]["input_bytes"], 12);
    assert_eq!(body["analysis"]["mode"], 1);

    let job_id = body["job_id"].as_str().expect("job_id in response");
    let link = body["processed_video"]
        .as_str()
        .expect("processed_video in response");
    assert!(link.starts_with("/download/"));
    assert_eq!(link, format!("/download/processed_{}.mp4", job_id));

    let processed_name = link.trim_start_matches("/download/");
    assert!(app.results_dir().join(processed_name).is_file());

    let download = client.get(link).await;
    assert_eq!(download.status_code(), 200);
    assert_eq!(download.header("content-type"), "video/mp4");
    assert_eq!(download.as_bytes().as_ref(), b"squat frames");
    let disposition = download.header("content-disposition");
    assert!(
        disposition
            .to_str()
            .unwrap()
            .contains(&format!("processed_{}.mp4", job_id))
    );
}

#[tokio::test]
async fn test_analyze_without_trailing_slash() {
    let app = setup_test_app(echo_analyser()).await;

    let res = app
        .client()
        .post("/analyze-squat")
        .multipart(video_form("squat.mov", b"frames"))
        .await;
    assert_eq!(res.status_code(), 200);
    let body: serde_json::Value = res.json();
    assert!(body["processed_video"].as_str().unwrap().ends_with(".mov"));
}

#[tokio::test]
async fn test_download_unknown_file_is_not_found() {
    let app = setup_test_app(echo_analyser()).await;

    let res = app.client().get("/download/processed_squat1.mp4").await;
    assert_eq!(res.status_code(), 404);
    let body: serde_json::Value = res.json();
    assert_eq!(body["status"], 404);
    assert!(body["error"].as_str().is_some());
}

#[tokio::test]
async fn test_download_rejects_traversal() {
    let app = setup_test_app(echo_analyser()).await;

    let res = app.client().get("/download/..%2F..%2Fetc%2Fpasswd").await;
    assert_eq!(res.status_code(), 400);

    let res = app.client().get("/download/.hidden").await;
    assert_eq!(res.status_code(), 400);
}

#[tokio::test]
async fn test_empty_upload_is_rejected() {
    let app = setup_test_app(echo_analyser()).await;
    let client = app.client();

    let res = client
        .post("/analyze-squat/")
        .multipart(video_form("empty.mp4", b""))
        .await;
    assert_eq!(res.status_code(), 400);
    let body: serde_json::Value = res.json();
    assert_eq!(body["error"], "uploaded file is empty");

    // Service keeps working afterwards.
    let res = client
        .post("/analyze-squat/")
        .multipart(video_form("squat.mp4", b"frames"))
        .await;
    assert_eq!(res.status_code(), 200);
}

#[tokio::test]
async fn test_request_without_file_is_rejected() {
    let app = setup_test_app(echo_analyser()).await;

    let form = MultipartForm::new().add_text("note", "no video attached");
    let res = app.client().post("/analyze-squat/").multipart(form).await;
    assert_eq!(res.status_code(), 400);
}

#[tokio::test]
async fn test_concurrent_uploads_with_same_name_do_not_collide() {
    let app = setup_test_app(slow_echo_analyser(Duration::from_millis(100))).await;
    let client = app.client();

    let first = async {
        client
            .post("/analyze-squat/")
            .multipart(video_form("squat1.mp4", b"first athlete"))
            .await
    };
    let second = async {
        client
            .post("/analyze-squat/")
            .multipart(video_form("squat1.mp4", b"second athlete"))
            .await
    };
    let (first, second) = tokio::join!(first, second);

    assert_eq!(first.status_code(), 200);
    assert_eq!(second.status_code(), 200);
    let first: serde_json::Value = first.json();
    let second: serde_json::Value = second.json();

    assert_ne!(first["job_id"], second["job_id"]);
    assert_ne!(first["processed_video"], second["processed_video"]);
    assert_eq!(first["analysis"]["input_text"], "first athlete");
    assert_eq!(second["analysis"]["input_text"], "second athlete");

    let first_video = client
        .get(first["processed_video"].as_str().unwrap())
        .await;
    let second_video = client
        .get(second["processed_video"].as_str().unwrap())
        .await;
    assert_eq!(first_video.as_bytes().as_ref(), b"first athlete");
    assert_eq!(second_video.as_bytes().as_ref(), b"second athlete");
}

#[tokio::test]
async fn test_analyser_without_output_is_bad_gateway() {
    let app = setup_test_app(Arc::new(SilentAnalyser)).await;
    let client = app.client();

    let res = client
        .post("/analyze-squat/")
        .multipart(video_form("squat.mp4", b"frames"))
        .await;
    assert_eq!(res.status_code(), 502);

    let failed: Vec<serde_json::Value> = client.get("/jobs?status=failed").await.json();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0]["original_filename"], "squat.mp4");
    assert!(failed[0]["error"].as_str().unwrap().contains("processed video"));
}

#[tokio::test]
async fn test_client_filename_never_reaches_disk() {
    let app = setup_test_app(echo_analyser()).await;

    let res = app
        .client()
        .post("/analyze-squat/")
        .multipart(video_form("../../outside.mp4", b"frames"))
        .await;
    assert_eq!(res.status_code(), 200);
    let body: serde_json::Value = res.json();

    let job: serde_json::Value = app
        .client()
        .get(&format!("/jobs/{}", body["job_id"].as_str().unwrap()))
        .await
        .json();
    assert_eq!(job["original_filename"], "outside.mp4");
    assert!(!app._temp_dir.path().join("outside.mp4").exists());
}

#[tokio::test]
async fn test_report_that_is_not_an_object_is_bad_gateway() {
    let app = setup_test_app(Arc::new(FixedReportAnalyser { report: "[]" })).await;
    let client = app.client();

    let res = client
        .post("/analyze-squat/")
        .multipart(video_form("squat.mp4", b"frames"))
        .await;
    assert_eq!(res.status_code(), 502);
    let body: serde_json::Value = res.json();
    assert!(body["error"].as_str().unwrap().contains("not a JSON object"));

    let failed: Vec<serde_json::Value> = client.get("/jobs?status=failed").await.json();
    assert_eq!(failed.len(), 1);
}

#[tokio::test]
async fn test_failed_job_video_is_not_downloadable() {
    let app = setup_test_app(Arc::new(FixedReportAnalyser { report: "{broken" })).await;
    let client = app.client();

    let res = client
        .post("/analyze-squat/")
        .multipart(video_form("squat.mp4", b"frames"))
        .await;
    assert_eq!(res.status_code(), 502);

    let failed: Vec<serde_json::Value> = client.get("/jobs?status=failed").await.json();
    assert_eq!(failed.len(), 1);
    assert!(failed[0].get("processed_video").is_none());
    let job_id = failed[0]["id"].as_str().unwrap();

    let processed_name = format!("processed_{}.mp4", job_id);
    assert!(app.results_dir().join(&processed_name).is_file());

    let download = client.get(&format!("/download/{}", processed_name)).await;
    assert_eq!(download.status_code(), 404);
}
