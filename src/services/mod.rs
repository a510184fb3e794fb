pub mod analyser;
pub mod job_service;
pub mod storage_service;
