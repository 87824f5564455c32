//! SQLite-backed job store using sqlx.

use {
    async_trait::async_trait,
    sqlx::{Row, SqlitePool, sqlite::SqlitePoolOptions},
};

use crate::{
    Error, Result,
    store::JobStore,
    types::{Job, JobRunRecord},
};

/// SQLite-backed persistence for jobs and run history.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a store with its own connection pool and run migrations.
    pub async fn new(database_url: &str) -> Result<Self> {
        let max_connections = if database_url.contains(":memory:") {
            1
        } else {
            5
        };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        crate::run_migrations(&pool).await?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl JobStore for SqliteStore {
    async fn load_jobs(&self) -> Result<Vec<Job>> {
        let rows = sqlx::query("SELECT data FROM scheduled_jobs")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| Ok(serde_json::from_str(row.get::<&str, _>("data"))?))
            .collect()
    }

    async fn save_job(&self, job: &Job) -> Result<()> {
        let data = serde_json::to_string(job)?;
        sqlx::query(
            "INSERT INTO scheduled_jobs (id, data) VALUES (?, ?)
             ON CONFLICT(id) DO UPDATE SET data = excluded.data",
        )
        .bind(&job.id)
        .bind(&data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_job(&self, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM scheduled_jobs WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::job_not_found(id));
        }
        Ok(())
    }

    async fn update_job(&self, job: &Job) -> Result<()> {
        let data = serde_json::to_string(job)?;
        let result = sqlx::query("UPDATE scheduled_jobs SET data = ? WHERE id = ?")
            .bind(&data)
            .bind(&job.id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::job_not_found(&job.id));
        }
        Ok(())
    }

    async fn append_run(&self, job_id: &str, run: &JobRunRecord) -> Result<()> {
        let status = serde_json::to_string(&run.status)?;
        sqlx::query(
            "INSERT INTO job_runs (job_id, started_at_ms, finished_at_ms, status, error, duration_ms, output)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(job_id)
        .bind(run.started_at_ms as i64)
        .bind(run.finished_at_ms as i64)
        .bind(&status)
        .bind(&run.error)
        .bind(run.duration_ms as i64)
        .bind(&run.output)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_runs(&self, job_id: &str, limit: usize) -> Result<Vec<JobRunRecord>> {
        let rows = sqlx::query(
            "SELECT job_id, started_at_ms, finished_at_ms, status, error, duration_ms, output
             FROM job_runs
             WHERE job_id = ?
             ORDER BY started_at_ms DESC, id DESC
             LIMIT ?",
        )
        .bind(job_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut runs = Vec::with_capacity(rows.len());
        for row in rows {
            let status = serde_json::from_str(row.get::<&str, _>("status"))?;
            runs.push(JobRunRecord {
                job_id: row.get("job_id"),
                started_at_ms: row.get::<i64, _>("started_at_ms") as u64,
                finished_at_ms: row.get::<i64, _>("finished_at_ms") as u64,
                status,
                error: row.get("error"),
                duration_ms: row.get::<i64, _>("duration_ms") as u64,
                output: row.get("output"),
            });
        }
        runs.reverse();
        Ok(runs)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, crate::types::*};

    async fn make_store() -> SqliteStore {
        SqliteStore::new("sqlite::memory:").await.unwrap()
    }

    fn make_job(id: &str) -> Job {
        Job {
            id: id.into(),
            name: format!("job-{id}"),
            enabled: true,
            delete_after_run: true,
            system: false,
            schedule: JobSchedule::At { at_ms: 1000 },
            payload: JobPayload::Announcement {
                text: "hi".into(),
                to: None,
            },
            state: JobState::default(),
            created_at_ms: 1000,
            updated_at_ms: 1000,
        }
    }

    #[tokio::test]
    async fn save_is_an_upsert() {
        let store = make_store().await;
        store.save_job(&make_job("1")).await.unwrap();
        store.save_job(&make_job("2")).await.unwrap();

        let mut job = make_job("1");
        job.name = "updated".into();
        store.save_job(&job).await.unwrap();

        let mut jobs = store.load_jobs().await.unwrap();
        jobs.sort_by(|a, b| a.id.cmp(&b.id));
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0], job);
    }

    #[tokio::test]
    async fn delete_and_update_require_existing_job() {
        let store = make_store().await;
        assert!(matches!(
            store.delete_job("nope").await,
            Err(Error::JobNotFound { .. })
        ));
        assert!(matches!(
            store.update_job(&make_job("nope")).await,
            Err(Error::JobNotFound { .. })
        ));

        store.save_job(&make_job("1")).await.unwrap();
        store.delete_job("1").await.unwrap();
        assert!(store.load_jobs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn runs_return_latest_in_order() {
        let store = make_store().await;
        store.save_job(&make_job("j1")).await.unwrap();

        for i in 0..5 {
            let run = JobRunRecord {
                job_id: "j1".into(),
                started_at_ms: i * 1000,
                finished_at_ms: i * 1000 + 500,
                status: if i == 4 { RunStatus::Error } else { RunStatus::Ok },
                error: (i == 4).then(|| "not connected".to_string()),
                duration_ms: 500,
                output: None,
            };
            store.append_run("j1", &run).await.unwrap();
        }

        let runs = store.get_runs("j1", 3).await.unwrap();
        assert_eq!(runs.len(), 3);
        assert_eq!(runs[0].started_at_ms, 2000);
        assert_eq!(runs[2].status, RunStatus::Error);
        assert_eq!(runs[2].error.as_deref(), Some("not connected"));
        assert!(store.get_runs("none", 10).await.unwrap().is_empty());
    }
}
