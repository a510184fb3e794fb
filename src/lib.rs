//! Squat analysis service: accepts squat videos over HTTP, hands them to an
//! external analyser and serves back the report and the processed video.

pub mod config;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
