//! Core data models for the squat analysis service.
//!
//! A `Job` maps to the `jobs` table via `sqlx::FromRow` and serializes
//! naturally as JSON via `serde`.

pub mod job;
