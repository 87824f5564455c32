//! Scheduled job payloads carried out through the [`Distributor`].

use std::sync::Arc;

use {
    async_trait::async_trait,
    rollcall_config::RollcallConfig,
    rollcall_cron::{Job, JobCreate, JobPayload, JobRunner, JobSchedule, Scheduler},
    tracing::{info, warn},
};

use crate::distribution::Distributor;

pub const WHATSAPP_DISTRIBUTION_JOB: &str = "system:distribute-whatsapp";
pub const EMAIL_DISTRIBUTION_JOB: &str = "system:distribute-email";

pub struct DistributionJobs {
    distributor: Arc<Distributor>,
}

impl DistributionJobs {
    pub fn new(distributor: Arc<Distributor>) -> Self {
        Self { distributor }
    }
}

#[async_trait]
impl JobRunner for DistributionJobs {
    async fn run(&self, job: &Job) -> rollcall_cron::Result<Option<String>> {
        let summary = match &job.payload {
            JobPayload::Announcement { text, to } => {
                let receipt = self
                    .distributor
                    .send_text(to.as_deref(), text)
                    .await
                    .map_err(|e| rollcall_cron::Error::external("announcement", e))?;
                receipt
                    .message_id
                    .map(|id| format!("announcement sent ({id})"))
                    .unwrap_or_else(|| "announcement sent".into())
            },
            JobPayload::DistributeContacts => {
                let count = self
                    .distributor
                    .distribute()
                    .await
                    .map_err(|e| rollcall_cron::Error::external("contact distribution", e))?;
                format!("sent contact file with {count} contacts")
            },
            JobPayload::EmailContacts { subject } => {
                let report = self
                    .distributor
                    .email_contacts(subject.as_deref())
                    .await
                    .map_err(|e| rollcall_cron::Error::external("email distribution", e))?;
                format!(
                    "emailed {} of {} recipients ({} rejected, {} failed)",
                    report.accepted, report.recipients, report.rejected, report.failed
                )
            },
        };
        Ok(Some(summary))
    }
}

/// Make the scheduler's system jobs match the `distribution` crons:
/// create or replace the configured ones and drop the rest.
pub async fn sync_system_jobs(
    scheduler: &Scheduler,
    config: &RollcallConfig,
) -> rollcall_cron::Result<()> {
    let tz = config.distribution.timezone.clone();
    let wanted = [
        (
            WHATSAPP_DISTRIBUTION_JOB,
            "Send contact file to WhatsApp channel",
            config.distribution.whatsapp_cron.as_deref(),
            JobPayload::DistributeContacts,
        ),
        (
            EMAIL_DISTRIBUTION_JOB,
            "Email contact file",
            config.distribution.email_cron.as_deref(),
            JobPayload::EmailContacts { subject: None },
        ),
    ];

    for (id, name, expr, payload) in wanted {
        let Some(expr) = expr.map(str::trim).filter(|e| !e.is_empty()) else {
            if scheduler.get(id).await.is_some() {
                scheduler.remove(id).await?;
                info!(id, "removed unconfigured distribution job");
            }
            continue;
        };
        let job = scheduler
            .add(JobCreate {
                id: Some(id.into()),
                name: name.into(),
                schedule: JobSchedule::Cron {
                    expr: expr.into(),
                    tz: tz.clone(),
                },
                payload,
                delete_after_run: false,
                enabled: true,
                system: true,
            })
            .await;
        match job {
            Ok(job) => info!(id, expr, next_run_at_ms = ?job.state.next_run_at_ms, "distribution job armed"),
            Err(e) if e.is_invalid_input() => {
                warn!(id, expr, error = %e, "ignoring invalid distribution schedule");
            },
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        rollcall_cron::{JobStore, store_memory::InMemoryStore},
        rollcall_whatsapp::{MemoryCredentialStore, ScriptedConnector, SessionAdapter, SessionOptions},
    };

    use crate::{broadcast::StatusBroadcaster, distribution::DistributionSettings};

    fn runner(dir: &std::path::Path) -> Arc<DistributionJobs> {
        let session = Arc::new(SessionAdapter::new(
            Arc::new(ScriptedConnector::new()),
            Arc::new(MemoryCredentialStore::new()),
            Arc::new(StatusBroadcaster::new()),
            SessionOptions::default(),
        ));
        let distributor = Distributor::new(
            Arc::new(rollcall_contacts::store_memory::InMemoryStore::new()),
            Arc::new(rollcall_contacts::ContactCardExport::new(dir.join("c.vcf"))),
            session,
            None,
            DistributionSettings::from_config(&RollcallConfig::default()),
        );
        Arc::new(DistributionJobs::new(Arc::new(distributor)))
    }

    #[tokio::test]
    async fn payload_failures_become_job_errors() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(dir.path());
        let job = Job {
            id: "a".into(),
            name: "Announcement".into(),
            enabled: true,
            delete_after_run: true,
            system: false,
            schedule: JobSchedule::At { at_ms: 1 },
            payload: JobPayload::Announcement {
                text: "hi".into(),
                to: None,
            },
            state: Default::default(),
            created_at_ms: 0,
            updated_at_ms: 0,
        };
        // No channel configured and no session.
        let err = runner.run(&job).await.unwrap_err();
        assert!(err.to_string().starts_with("announcement:"));

        let email = Job {
            payload: JobPayload::EmailContacts { subject: None },
            ..job
        };
        let err = runner.run(&email).await.unwrap_err();
        assert!(err.to_string().contains("not configured"));
    }

    #[tokio::test]
    async fn system_jobs_follow_the_config() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(InMemoryStore::new());
        let scheduler = Scheduler::new(store.clone(), runner(dir.path()));

        let mut config = RollcallConfig::default();
        config.distribution.whatsapp_cron = Some("0 9 * * 1".into());
        config.distribution.email_cron = Some("not a cron".into());
        config.distribution.timezone = Some("Africa/Lagos".into());
        sync_system_jobs(&scheduler, &config).await.unwrap();

        let jobs = scheduler.list().await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, WHATSAPP_DISTRIBUTION_JOB);
        assert!(jobs[0].system);
        assert!(jobs[0].state.next_run_at_ms.is_some());
        assert_eq!(store.load_jobs().await.unwrap().len(), 1);

        // Re-running with the same config does not duplicate.
        sync_system_jobs(&scheduler, &config).await.unwrap();
        assert_eq!(scheduler.list().await.len(), 1);

        config.distribution.whatsapp_cron = None;
        sync_system_jobs(&scheduler, &config).await.unwrap();
        assert!(scheduler.list().await.is_empty());
    }
}
