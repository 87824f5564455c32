//! Scheduled announcements.

use {
    axum::{
        Json,
        extract::{State, rejection::JsonRejection},
    },
    chrono::{DateTime, NaiveDateTime, TimeZone},
    rollcall_cron::{Job, JobCreate, JobPayload, JobRunRecord, JobSchedule},
    serde::{Deserialize, Serialize},
    serde_json::{Value, json},
    tracing::{info, warn},
};

use crate::{
    error::{ApiError, OrApiError},
    server::AppState,
};

const LOCAL_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

/// Parse an RFC 3339 timestamp, or a local `YYYY-MM-DDTHH:MM[:SS]` time in
/// `tz`, into epoch millis.
pub fn parse_date_time(raw: &str, tz: chrono_tz::Tz) -> Option<u64> {
    let raw = raw.trim();
    let ms = if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        dt.timestamp_millis()
    } else {
        let naive = LOCAL_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())?;
        // Times skipped by a DST jump do not exist.
        tz.from_local_datetime(&naive).earliest()?.timestamp_millis()
    };
    u64::try_from(ms).ok()
}

fn job_name(text: &str) -> String {
    const MAX: usize = 40;
    let first_line = text.lines().next().unwrap_or_default();
    if first_line.chars().count() > MAX {
        let short: String = first_line.chars().take(MAX).collect();
        format!("Announcement: {short}…")
    } else {
        format!("Announcement: {first_line}")
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ScheduleBody {
    pub message: String,
    pub date_time: String,
    /// Recipient JID; the configured channel when absent.
    pub to: Option<String>,
}

/// `POST /api/scheduleAnnouncement`
pub async fn schedule_announcement(
    State(state): State<AppState>,
    payload: Result<Json<ScheduleBody>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(body) = payload?;
    let gw = &state.gateway;
    let text = body.message.trim();
    if text.is_empty() {
        return Err(ApiError::bad_request("Message is required"));
    }
    if body.date_time.trim().is_empty() {
        return Err(ApiError::bad_request("Date and time are required"));
    }
    let Some(at_ms) = parse_date_time(&body.date_time, gw.settings.timezone) else {
        return Err(ApiError::bad_request(
            "Invalid date/time, expected RFC 3339 or YYYY-MM-DDTHH:MM",
        ));
    };

    let job = gw
        .scheduler
        .add(JobCreate {
            id: None,
            name: job_name(text),
            schedule: JobSchedule::At { at_ms },
            payload: JobPayload::Announcement {
                text: text.to_string(),
                to: body.to.filter(|t| !t.trim().is_empty()),
            },
            delete_after_run: true,
            enabled: true,
            system: false,
        })
        .await
        .or_api("Failed to schedule announcement")?;
    info!(id = %job.id, at_ms, "announcement scheduled");

    Ok(Json(json!({
        "message": "Announcement scheduled",
        "id": job.id,
        "runAtMs": at_ms,
    })))
}

/// Runs listed per job in `GET /api/announcements`.
const RECENT_RUNS: usize = 5;

#[derive(Debug, Serialize)]
pub struct ScheduledJob {
    #[serde(flatten)]
    pub job: Job,
    /// Latest runs, oldest first.
    pub runs: Vec<JobRunRecord>,
}

/// `GET /api/announcements`: every scheduled job, soonest first.
pub async fn list_announcements(State(state): State<AppState>) -> Json<Vec<ScheduledJob>> {
    let scheduler = &state.gateway.scheduler;
    let mut jobs = scheduler.list().await;
    jobs.sort_by_key(|j| (j.state.next_run_at_ms.is_none(), j.state.next_run_at_ms));

    let mut out = Vec::with_capacity(jobs.len());
    for job in jobs {
        let runs = scheduler
            .runs(&job.id, RECENT_RUNS)
            .await
            .unwrap_or_else(|e| {
                warn!(id = %job.id, error = %e, "failed to load job runs");
                Vec::new()
            });
        out.push(ScheduledJob { job, runs });
    }
    Json(out)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CancelBody {
    pub id: String,
}

/// `POST /api/cancelAnnouncement`
pub async fn cancel_announcement(
    State(state): State<AppState>,
    payload: Result<Json<CancelBody>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(body) = payload?;
    let scheduler = &state.gateway.scheduler;
    let Some(job) = scheduler.get(&body.id).await else {
        return Err(ApiError::not_found("Announcement not found"));
    };
    if job.system {
        return Err(ApiError::bad_request(
            "Distribution schedules are set in the configuration file",
        ));
    }
    scheduler
        .remove(&job.id)
        .await
        .or_api("Failed to cancel announcement")?;
    info!(id = %job.id, "announcement cancelled");
    Ok(Json(json!({ "message": "Announcement cancelled" })))
}
