//! Durable scheduled jobs: one-shot announcements and recurring contact
//! distribution.
//!
//! Jobs live in a [`store::JobStore`] (SQLite or memory) and are re-armed from
//! it when the [`service::Scheduler`] starts. What a job actually does is up
//! to the [`service::JobRunner`] the caller supplies.

pub mod error;
pub mod schedule;
pub mod service;
pub mod store;
pub mod store_memory;
pub mod store_sqlite;
pub mod types;

pub use {
    error::{Error, Result},
    service::{JobRunner, Scheduler},
    store::JobStore,
    types::{Job, JobCreate, JobPayload, JobRunRecord, JobSchedule, RunStatus},
};

/// Run database migrations for the scheduler.
///
/// Creates the `scheduled_jobs` and `job_runs` tables.
pub async fn run_migrations(pool: &sqlx::SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .set_ignore_missing(true)
        .run(pool)
        .await?;
    Ok(())
}
