//! Persistence trait for scheduled jobs.

use async_trait::async_trait;

use crate::{
    Result,
    types::{Job, JobRunRecord},
};

/// Persistence backend for jobs and run history.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn load_jobs(&self) -> Result<Vec<Job>>;
    /// Insert or replace by id.
    async fn save_job(&self, job: &Job) -> Result<()>;
    async fn delete_job(&self, id: &str) -> Result<()>;
    async fn update_job(&self, job: &Job) -> Result<()>;
    async fn append_run(&self, job_id: &str, run: &JobRunRecord) -> Result<()>;
    /// The most recent `limit` runs, oldest first.
    async fn get_runs(&self, job_id: &str, limit: usize) -> Result<Vec<JobRunRecord>>;
}
