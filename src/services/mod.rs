pub mod backfill;
pub mod background_jobs;
pub mod scoring;
pub mod vote_service;
