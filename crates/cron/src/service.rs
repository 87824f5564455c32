//! Core scheduler: timer loop, job execution, add/remove/list.

use std::{
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use {
    async_trait::async_trait,
    tokio::{
        sync::{Mutex, Notify, RwLock},
        task::JoinHandle,
    },
    tracing::{debug, error, info, warn},
};

use crate::{Error, Result, schedule::compute_next_run, store::JobStore, types::*};

/// Carries out a job's payload.
#[async_trait]
pub trait JobRunner: Send + Sync {
    /// Returns a short human-readable summary for the run history.
    async fn run(&self, job: &Job) -> Result<Option<String>>;
}

/// Max time a job can be in "running" state before we consider it stuck (2 hours).
const STUCK_THRESHOLD_MS: u64 = 2 * 60 * 60 * 1000;

/// Idle wake-up interval when nothing is scheduled.
const IDLE_POLL_MS: u64 = 60_000;

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// The scheduler.
pub struct Scheduler {
    store: Arc<dyn JobStore>,
    runner: Arc<dyn JobRunner>,
    jobs: RwLock<Vec<Job>>,
    timer_handle: Mutex<Option<JoinHandle<()>>>,
    wake_notify: Arc<Notify>,
    running: RwLock<bool>,
}

impl Scheduler {
    pub fn new(store: Arc<dyn JobStore>, runner: Arc<dyn JobRunner>) -> Arc<Self> {
        Arc::new(Self {
            store,
            runner,
            jobs: RwLock::new(Vec::new()),
            timer_handle: Mutex::new(None),
            wake_notify: Arc::new(Notify::new()),
            running: RwLock::new(false),
        })
    }

    /// Load jobs from the store, re-arm them and start the timer loop.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let loaded = self.store.load_jobs().await?;
        info!(count = loaded.len(), "loaded scheduled jobs");

        *self.jobs.write().await = loaded;
        self.rearm_all().await;
        *self.running.write().await = true;

        let svc = Arc::clone(self);
        let handle = tokio::spawn(async move {
            svc.timer_loop().await;
        });
        *self.timer_handle.lock().await = Some(handle);
        Ok(())
    }

    /// Stop the timer loop. Runs already in flight are left to finish.
    pub async fn stop(&self) {
        *self.running.write().await = false;
        self.wake_notify.notify_one();

        if let Some(h) = self.timer_handle.lock().await.take() {
            h.abort();
        }
        info!("scheduler stopped");
    }

    pub async fn add(&self, create: JobCreate) -> Result<Job> {
        let now = now_ms();
        let mut job = Job {
            id: create
                .id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            name: create.name,
            enabled: create.enabled,
            delete_after_run: create.delete_after_run,
            system: create.system,
            schedule: create.schedule,
            payload: create.payload,
            state: JobState::default(),
            created_at_ms: now,
            updated_at_ms: now,
        };

        validate_job(&job)?;

        if job.enabled {
            job.state.next_run_at_ms = compute_next_run(&job.schedule, now)?;
            if job.state.next_run_at_ms.is_none() {
                return Err(Error::invalid("scheduled time is in the past"));
            }
        }

        self.store.save_job(&job).await?;
        {
            let mut jobs = self.jobs.write().await;
            jobs.retain(|j| j.id != job.id);
            jobs.push(job.clone());
        }

        self.wake_notify.notify_one();
        info!(id = %job.id, name = %job.name, kind = job.payload.kind(), "job added");
        Ok(job)
    }

    pub async fn remove(&self, id: &str) -> Result<()> {
        self.store.delete_job(id).await?;
        self.jobs.write().await.retain(|j| j.id != id);
        info!(id, "job removed");
        Ok(())
    }

    pub async fn list(&self) -> Vec<Job> {
        self.jobs.read().await.clone()
    }

    pub async fn get(&self, id: &str) -> Option<Job> {
        self.jobs.read().await.iter().find(|j| j.id == id).cloned()
    }

    /// The latest `limit` runs of a job, oldest first.
    pub async fn runs(&self, job_id: &str, limit: usize) -> Result<Vec<JobRunRecord>> {
        self.store.get_runs(job_id, limit).await
    }

    // ── Internal ────────────────────────────────────────────────────────

    async fn timer_loop(self: &Arc<Self>) {
        loop {
            if !*self.running.read().await {
                break;
            }

            let sleep_ms = self.ms_until_next_wake().await;
            if sleep_ms > 0 {
                let notify = Arc::clone(&self.wake_notify);
                tokio::select! {
                    () = tokio::time::sleep(Duration::from_millis(sleep_ms)) => {},
                    () = notify.notified() => {
                        debug!("timer loop woken by notify");
                        continue;
                    },
                }
            }

            if !*self.running.read().await {
                break;
            }

            self.process_due_jobs().await;
        }
    }

    async fn ms_until_next_wake(&self) -> u64 {
        let jobs = self.jobs.read().await;
        let now = now_ms();
        jobs.iter()
            .filter(|j| j.enabled && j.state.running_at_ms.is_none())
            .filter_map(|j| j.state.next_run_at_ms)
            .map(|t| t.saturating_sub(now))
            .min()
            .unwrap_or(IDLE_POLL_MS)
    }

    async fn process_due_jobs(self: &Arc<Self>) {
        let now = now_ms();
        let due_jobs: Vec<Job> = {
            let mut jobs = self.jobs.write().await;
            let mut due = Vec::new();
            for job in jobs.iter_mut() {
                if job.enabled
                    && job.state.next_run_at_ms.is_some_and(|t| t <= now)
                    && job.state.running_at_ms.is_none()
                {
                    // Claimed under the write lock so the next tick skips it.
                    job.state.running_at_ms = Some(now);
                    due.push(job.clone());
                }
            }
            due
        };

        self.clear_stuck_jobs(now).await;

        for job in due_jobs {
            let svc = Arc::clone(self);
            tokio::spawn(async move {
                svc.execute_job(&job).await;
            });
        }
    }

    async fn execute_job(self: &Arc<Self>, job: &Job) {
        let started = now_ms();
        info!(id = %job.id, name = %job.name, kind = job.payload.kind(), "executing job");

        let result = self.runner.run(job).await;

        let finished = now_ms();
        let duration_ms = finished.saturating_sub(started);
        let (status, error_msg, output) = match result {
            Ok(output) => (RunStatus::Ok, None, output),
            Err(e) => {
                error!(id = %job.id, error = %e, "job failed");
                (RunStatus::Error, Some(e.to_string()), None)
            },
        };

        let run = JobRunRecord {
            job_id: job.id.clone(),
            started_at_ms: started,
            finished_at_ms: finished,
            status,
            error: error_msg.clone(),
            duration_ms,
            output,
        };
        if let Err(e) = self.store.append_run(&job.id, &run).await {
            warn!(error = %e, "failed to record job run");
        }

        let next_run = compute_next_run(&job.schedule, now_ms()).unwrap_or(None);

        if next_run.is_none() && job.delete_after_run {
            if let Err(e) = self.remove(&job.id).await {
                warn!(id = %job.id, error = %e, "failed to delete one-shot job");
            } else {
                info!(id = %job.id, "one-shot job deleted after run");
            }
        } else {
            let updated = {
                let mut jobs = self.jobs.write().await;
                jobs.iter_mut().find(|j| j.id == job.id).map(|j| {
                    j.state.running_at_ms = None;
                    j.state.last_run_at_ms = Some(finished);
                    j.state.last_status = Some(status);
                    j.state.last_error = error_msg;
                    j.state.last_duration_ms = Some(duration_ms);
                    j.state.next_run_at_ms = next_run;
                    if next_run.is_none() {
                        j.enabled = false;
                    }
                    j.clone()
                })
            };
            if let Some(updated) = updated
                && let Err(e) = self.store.update_job(&updated).await
            {
                warn!(id = %job.id, error = %e, "failed to persist job state");
            }
        }

        self.wake_notify.notify_one();
        info!(id = %job.id, status = ?status, duration_ms, "job finished");
    }

    /// Recompute next runs after loading. A one-shot whose time passed while
    /// the scheduler was down fires once, now.
    async fn rearm_all(&self) {
        let now = now_ms();
        let mut jobs = self.jobs.write().await;
        for job in jobs.iter_mut() {
            job.state.running_at_ms = None;
            if !job.enabled {
                job.state.next_run_at_ms = None;
                continue;
            }
            job.state.next_run_at_ms = match compute_next_run(&job.schedule, now) {
                Ok(None) if job.schedule.is_one_shot() && job.state.last_run_at_ms.is_none() => {
                    info!(id = %job.id, "one-shot job missed while offline, firing now");
                    Some(now)
                },
                Ok(next) => next,
                Err(e) => {
                    warn!(id = %job.id, error = %e, "cannot schedule job");
                    None
                },
            };
        }
    }

    async fn clear_stuck_jobs(&self, now: u64) {
        let mut jobs = self.jobs.write().await;
        for job in jobs.iter_mut() {
            if let Some(running_at) = job.state.running_at_ms
                && now.saturating_sub(running_at) > STUCK_THRESHOLD_MS
            {
                warn!(id = %job.id, "clearing stuck job");
                job.state.running_at_ms = None;
                job.state.last_status = Some(RunStatus::Error);
                job.state.last_error = Some("stuck: exceeded 2h timeout".into());
            }
        }
    }
}

fn validate_job(job: &Job) -> Result<()> {
    if job.name.trim().is_empty() {
        return Err(Error::invalid("job name must not be empty"));
    }
    if let JobPayload::Announcement { text, .. } = &job.payload
        && text.trim().is_empty()
    {
        return Err(Error::invalid("announcement text must not be empty"));
    }
    // Surfaces bad cron expressions and time zones at creation time.
    compute_next_run(&job.schedule, 0)?;
    Ok(())
}
