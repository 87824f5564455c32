//! In-memory job store.

use std::{collections::HashMap, sync::Mutex};

use async_trait::async_trait;

use crate::{
    Error, Result,
    store::JobStore,
    types::{Job, JobRunRecord},
};

/// Keeps jobs in a `HashMap`; nothing survives a restart.
#[derive(Default)]
pub struct InMemoryStore {
    jobs: Mutex<HashMap<String, Job>>,
    runs: Mutex<HashMap<String, Vec<JobRunRecord>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for InMemoryStore {
    async fn load_jobs(&self) -> Result<Vec<Job>> {
        let jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        Ok(jobs.values().cloned().collect())
    }

    async fn save_job(&self, job: &Job) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn delete_job(&self, id: &str) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        jobs.remove(id)
            .map(drop)
            .ok_or_else(|| Error::job_not_found(id))
    }

    async fn update_job(&self, job: &Job) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        let slot = jobs
            .get_mut(&job.id)
            .ok_or_else(|| Error::job_not_found(&job.id))?;
        *slot = job.clone();
        Ok(())
    }

    async fn append_run(&self, job_id: &str, run: &JobRunRecord) -> Result<()> {
        let mut runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
        runs.entry(job_id.to_string())
            .or_default()
            .push(run.clone());
        Ok(())
    }

    async fn get_runs(&self, job_id: &str, limit: usize) -> Result<Vec<JobRunRecord>> {
        let runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
        let records = runs.get(job_id).map(Vec::as_slice).unwrap_or_default();
        let start = records.len().saturating_sub(limit);
        Ok(records[start..].to_vec())
    }
}
