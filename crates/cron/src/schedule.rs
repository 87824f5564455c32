//! Next-run computation for all schedule kinds.

use {
    chrono::{DateTime, Utc},
    cron::Schedule,
};

use crate::{Error, Result, types::JobSchedule};

/// Parse a 5-, 6- or 7-field cron expression.
pub fn parse_cron(expr: &str) -> Result<Schedule> {
    expr.parse::<Schedule>()
        .or_else(|_| {
            // The `cron` crate wants seconds and year; operators write the
            // classic five fields.
            format!("0 {expr} *").parse::<Schedule>()
        })
        .map_err(|source| Error::CronParse {
            expr: expr.to_owned(),
            source,
        })
}

pub fn parse_timezone(name: &str) -> Result<chrono_tz::Tz> {
    name.parse().map_err(|_| Error::unknown_timezone(name))
}

/// Compute the next run time (epoch millis) strictly after `now_ms`.
///
/// Returns `None` if the schedule has no future runs (e.g. a past one-shot).
pub fn compute_next_run(schedule: &JobSchedule, now_ms: u64) -> Result<Option<u64>> {
    match schedule {
        JobSchedule::At { at_ms } => Ok((*at_ms > now_ms).then_some(*at_ms)),
        JobSchedule::Cron { expr, tz } => {
            let schedule = parse_cron(expr)?;
            let now = DateTime::<Utc>::from_timestamp_millis(now_ms as i64)
                .unwrap_or_default();

            let next = match tz {
                Some(name) => {
                    let tz = parse_timezone(name)?;
                    schedule
                        .after(&now.with_timezone(&tz))
                        .next()
                        .map(|dt| dt.timestamp_millis())
                },
                None => schedule.after(&now).next().map(|dt| dt.timestamp_millis()),
            };
            Ok(next.and_then(|ms| u64::try_from(ms).ok()))
        },
    }
}
