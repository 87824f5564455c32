//! Core data types for scheduled jobs.

use serde::{Deserialize, Serialize};

/// How a job is scheduled.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum JobSchedule {
    /// One-shot: fire once at `at_ms` (epoch millis).
    At { at_ms: u64 },
    /// Cron expression (5-field standard or 6-field with seconds).
    Cron {
        expr: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tz: Option<String>,
    },
}

impl JobSchedule {
    pub fn is_one_shot(&self) -> bool {
        matches!(self, Self::At { .. })
    }
}

/// What happens when a job fires.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum JobPayload {
    /// Post `text` to the announcement channel, or to `to` when given.
    Announcement {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to: Option<String>,
    },
    /// Regenerate the contact export and send it to the channel.
    DistributeContacts,
    /// Mail the contact export to every mailable contact.
    EmailContacts {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        subject: Option<String>,
    },
}

impl JobPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Announcement { .. } => "announcement",
            Self::DistributeContacts => "distributeContacts",
            Self::EmailContacts { .. } => "emailContacts",
        }
    }
}

/// Outcome of a single job run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum RunStatus {
    Ok,
    Error,
    Skipped,
}

/// Mutable runtime state of a job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct JobState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_run_at_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub running_at_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run_at_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_status: Option<RunStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_duration_ms: Option<u64>,
}

/// A scheduled job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub delete_after_run: bool,
    /// Created from configuration rather than by an operator.
    #[serde(default)]
    pub system: bool,
    pub schedule: JobSchedule,
    pub payload: JobPayload,
    #[serde(default)]
    pub state: JobState,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
}

/// Record of a completed run, stored in run history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobRunRecord {
    pub job_id: String,
    pub started_at_ms: u64,
    pub finished_at_ms: u64,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

/// Input for creating a new job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobCreate {
    /// Fixed id, for jobs that must not be duplicated across restarts.
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    pub schedule: JobSchedule,
    pub payload: JobPayload,
    #[serde(default)]
    pub delete_after_run: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub system: bool,
}

fn default_true() -> bool {
    true
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    #[test]
    fn schedule_wire_shape() {
        let s = JobSchedule::Cron {
            expr: "0 9 * * 1".into(),
            tz: Some("Africa/Lagos".into()),
        };
        assert_eq!(
            serde_json::to_value(&s).unwrap(),
            json!({"kind": "cron", "expr": "0 9 * * 1", "tz": "Africa/Lagos"})
        );
        let back: JobSchedule =
            serde_json::from_value(json!({"kind": "cron", "expr": "0 9 * * *"})).unwrap();
        assert_eq!(back, JobSchedule::Cron {
            expr: "0 9 * * *".into(),
            tz: None
        });
    }

    #[test]
    fn payload_wire_shape() {
        let p = JobPayload::Announcement {
            text: "Meeting at 9".into(),
            to: None,
        };
        assert_eq!(
            serde_json::to_value(&p).unwrap(),
            json!({"kind": "announcement", "text": "Meeting at 9"})
        );
        let back: JobPayload = serde_json::from_value(json!({"kind": "distributeContacts"})).unwrap();
        assert_eq!(back, JobPayload::DistributeContacts);
        assert_eq!(back.kind(), "distributeContacts");
    }

    #[test]
    fn job_state_uses_camel_case() {
        let job = Job {
            id: "abc".into(),
            name: "test".into(),
            enabled: true,
            delete_after_run: true,
            system: false,
            schedule: JobSchedule::At { at_ms: 5 },
            payload: JobPayload::EmailContacts { subject: None },
            state: JobState {
                next_run_at_ms: Some(5),
                ..JobState::default()
            },
            created_at_ms: 1,
            updated_at_ms: 1,
        };
        let v = serde_json::to_value(&job).unwrap();
        assert_eq!(v["deleteAfterRun"], true);
        assert_eq!(v["state"]["nextRunAtMs"], 5);
        assert_eq!(v["schedule"]["atMs"], 5);
    }

    #[test]
    fn job_create_defaults() {
        let create: JobCreate = serde_json::from_value(json!({
            "name": "test",
            "schedule": { "kind": "at", "atMs": 1000 },
            "payload": { "kind": "announcement", "text": "hi" }
        }))
        .unwrap();
        assert!(create.enabled);
        assert!(!create.delete_after_run);
        assert!(!create.system);
        assert!(create.id.is_none());
    }
}
