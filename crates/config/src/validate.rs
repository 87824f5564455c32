//! Semantic checks on a loaded configuration.
//!
//! Parsing already guarantees the shape; this catches values that parse but
//! cannot work (bad cron expressions, unknown timezones, half-configured
//! mail) and a few security smells.

use std::str::FromStr;

use secrecy::ExposeSecret;

use crate::schema::RollcallConfig;

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Dotted path, e.g. "distribution.email_cron"
    pub path: &'static str,
    pub message: String,
}

impl Diagnostic {
    fn error(path: &'static str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            path,
            message: message.into(),
        }
    }

    fn warning(path: &'static str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            path,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}: {}", self.severity, self.path, self.message)
    }
}

/// Passwords that ship in tutorials and must never guard a real panel.
const WEAK_PASSWORDS: &[&str] = &["admin", "admin123", "password", "changeme"];

pub fn validate(cfg: &RollcallConfig) -> Vec<Diagnostic> {
    let mut out = Vec::new();

    match cfg.admin.password.as_ref().map(|p| p.expose_secret().as_str()) {
        None => out.push(Diagnostic::warning(
            "admin.password",
            "no admin password configured; the admin panel rejects every request",
        )),
        Some(pw) if WEAK_PASSWORDS.contains(&pw) => out.push(Diagnostic::warning(
            "admin.password",
            "admin password is a well-known default",
        )),
        Some(_) => {},
    }

    if cfg.mail.enabled {
        if cfg.mail.smtp_host.is_none() {
            out.push(Diagnostic::error(
                "mail.smtp_host",
                "mail is enabled but no SMTP host is set",
            ));
        }
        if cfg.mail.from.is_none() {
            out.push(Diagnostic::error(
                "mail.from",
                "mail is enabled but no sender address is set",
            ));
        }
    }

    let limits = &cfg.server.rate_limits;
    if limits.window_secs == 0 {
        out.push(Diagnostic::error(
            "server.rate_limits.window_secs",
            "rate limit window must be at least one second",
        ));
    }
    for (path, max) in [
        ("server.rate_limits.admin_login", limits.admin_login),
        ("server.rate_limits.register", limits.register),
        ("server.rate_limits.api", limits.api),
        ("server.rate_limits.ws", limits.ws),
    ] {
        if max == 0 {
            out.push(Diagnostic::warning(path, "0 rejects every request to this route"));
        }
    }

    let reconnect = &cfg.whatsapp.reconnect;
    if reconnect.base_delay_ms == 0 || reconnect.base_delay_ms > reconnect.max_delay_ms {
        out.push(Diagnostic::error(
            "whatsapp.reconnect",
            "base_delay_ms must be positive and not exceed max_delay_ms",
        ));
    }
    if reconnect.max_attempts == 0 {
        out.push(Diagnostic::warning(
            "whatsapp.reconnect.max_attempts",
            "0 disables automatic reconnects",
        ));
    }

    let wants_channel =
        cfg.distribution.send_on_register || cfg.distribution.whatsapp_cron.is_some();
    if wants_channel && cfg.whatsapp.channel_jid.is_none() {
        out.push(Diagnostic::warning(
            "whatsapp.channel_jid",
            "no channel configured; the contact file will not be sent over WhatsApp",
        ));
    }

    if let Some(tz) = &cfg.distribution.timezone
        && chrono_tz::Tz::from_str(tz).is_err()
    {
        out.push(Diagnostic::error(
            "distribution.timezone",
            format!("unknown timezone '{tz}'"),
        ));
    }
    if let Some(expr) = &cfg.distribution.whatsapp_cron
        && let Err(e) = check_cron(expr)
    {
        out.push(Diagnostic::error("distribution.whatsapp_cron", e));
    }
    if let Some(expr) = &cfg.distribution.email_cron {
        if let Err(e) = check_cron(expr) {
            out.push(Diagnostic::error("distribution.email_cron", e));
        }
        if !cfg.mail.enabled {
            out.push(Diagnostic::warning(
                "distribution.email_cron",
                "email schedule set but mail is disabled",
            ));
        }
    }

    out
}

/// Accepts standard 5-field expressions as well as the 6/7-field form.
fn check_cron(expr: &str) -> Result<(), String> {
    let fields = expr.split_whitespace().count();
    let full = if fields == 5 {
        format!("0 {expr} *")
    } else {
        expr.to_string()
    };
    cron::Schedule::from_str(&full)
        .map(|_| ())
        .map_err(|e| format!("invalid cron expression '{expr}': {e}"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {super::*, secrecy::Secret};

    fn paths(diags: &[Diagnostic], severity: Severity) -> Vec<&'static str> {
        diags
            .iter()
            .filter(|d| d.severity == severity)
            .map(|d| d.path)
            .collect()
    }

    #[test]
    fn default_config_only_warns() {
        let diags = validate(&RollcallConfig::default());
        assert!(paths(&diags, Severity::Error).is_empty());
        let warnings = paths(&diags, Severity::Warning);
        assert!(warnings.contains(&"admin.password"));
        assert!(warnings.contains(&"whatsapp.channel_jid"));
    }

    #[test]
    fn flags_weak_password() {
        let mut cfg = RollcallConfig::default();
        cfg.admin.password = Some(Secret::new("admin123".into()));
        let diags = validate(&cfg);
        assert!(
            diags
                .iter()
                .any(|d| d.path == "admin.password" && d.message.contains("default"))
        );
    }

    #[test]
    fn rejects_bad_schedule_values() {
        let mut cfg = RollcallConfig::default();
        cfg.distribution.whatsapp_cron = Some("every tuesday".into());
        cfg.distribution.timezone = Some("Mars/Olympus".into());
        let errors = paths(&validate(&cfg), Severity::Error);
        assert!(errors.contains(&"distribution.whatsapp_cron"));
        assert!(errors.contains(&"distribution.timezone"));
    }

    #[test]
    fn accepts_five_field_cron() {
        let mut cfg = RollcallConfig::default();
        cfg.distribution.whatsapp_cron = Some("0 9 * * MON".into());
        cfg.distribution.timezone = Some("Africa/Lagos".into());
        assert!(paths(&validate(&cfg), Severity::Error).is_empty());
    }

    #[test]
    fn half_configured_mail_is_an_error() {
        let mut cfg = RollcallConfig::default();
        cfg.mail.enabled = true;
        let errors = paths(&validate(&cfg), Severity::Error);
        assert!(errors.contains(&"mail.smtp_host"));
        assert!(errors.contains(&"mail.from"));
    }

    #[test]
    fn rate_limit_values_are_checked() {
        let mut cfg = RollcallConfig::default();
        cfg.server.rate_limits.window_secs = 0;
        cfg.server.rate_limits.register = 0;
        let diags = validate(&cfg);
        assert_eq!(paths(&diags, Severity::Error), vec![
            "server.rate_limits.window_secs"
        ]);
        assert!(paths(&diags, Severity::Warning).contains(&"server.rate_limits.register"));
    }

    #[test]
    fn inverted_backoff_bounds_are_an_error() {
        let mut cfg = RollcallConfig::default();
        cfg.whatsapp.reconnect.base_delay_ms = 120_000;
        let errors = paths(&validate(&cfg), Severity::Error);
        assert_eq!(errors, vec!["whatsapp.reconnect"]);
    }
}
