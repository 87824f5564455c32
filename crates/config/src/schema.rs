//! Config schema types.
use std::path::PathBuf;

use {
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RollcallConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub admin: AdminConfig,
    pub whatsapp: WhatsAppConfig,
    pub mail: MailConfig,
    pub export: ExportConfig,
    pub distribution: DistributionConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to. Defaults to "0.0.0.0".
    pub bind: String,
    pub port: u16,
    /// Trust `X-Forwarded-For` / `X-Real-IP` when resolving client addresses.
    pub behind_proxy: bool,
    /// Directory served for every path that is not an API route.
    pub public_dir: PathBuf,
    pub rate_limits: RateLimitsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 3000,
            behind_proxy: false,
            public_dir: PathBuf::from("public"),
            rate_limits: RateLimitsConfig::default(),
        }
    }
}

/// Requests allowed per client IP in each window. `0` blocks the route.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitsConfig {
    pub window_secs: u64,
    pub admin_login: usize,
    pub register: usize,
    /// Every other `/api/` route.
    pub api: usize,
    pub ws: usize,
}

impl Default for RateLimitsConfig {
    fn default() -> Self {
        Self {
            window_secs: 60,
            admin_login: 5,
            register: 10,
            api: 120,
            ws: 30,
        }
    }
}

/// Contact storage.
///
/// `sqlite:` URLs use the embedded store; `mongodb://` and `mongodb+srv://`
/// select the document-database backend (only when built with the `mongodb`
/// feature).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    /// Database name for document-database backends.
    pub name: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://rollcall.db?mode=rwc".into(),
            name: "rollcall".into(),
        }
    }
}

impl DatabaseConfig {
    pub fn is_mongodb(&self) -> bool {
        self.url.starts_with("mongodb://") || self.url.starts_with("mongodb+srv://")
    }
}

/// Admin panel credentials.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Plain-text password, or an Argon2 PHC string (`$argon2id$...`).
    #[serde(
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub password: Option<Secret<String>>,
}

impl std::fmt::Debug for AdminConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminConfig")
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// WhatsApp session settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WhatsAppConfig {
    /// Account identifier passed to the sidecar.
    pub account_id: String,
    /// Channel or group JID the contact file and announcements are sent to.
    pub channel_jid: Option<String>,
    /// Directory holding persisted session credentials.
    pub auth_dir: PathBuf,
    /// Reject registrations for numbers that have no WhatsApp account.
    pub verify_registration: bool,
    /// Send a confirmation text to the bot's own number after connecting.
    pub announce_on_connect: bool,
    /// Browser name reported to WhatsApp for the linked device.
    pub browser: String,
    pub sidecar: SidecarConfig,
    pub reconnect: ReconnectConfig,
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            account_id: "default".into(),
            channel_jid: None,
            auth_dir: PathBuf::from("session"),
            verify_registration: true,
            announce_on_connect: true,
            browser: "Rollcall".into(),
            sidecar: SidecarConfig::default(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Baileys sidecar process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SidecarConfig {
    pub port: u16,
    /// Sidecar project directory; discovered next to the binary when unset.
    pub dir: Option<PathBuf>,
    /// Spawn and supervise the sidecar instead of connecting to one that is
    /// already running.
    pub auto_start: bool,
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            port: 32882,
            dir: None,
            auto_start: true,
        }
    }
}

/// Bounded exponential backoff for session reconnects.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Consecutive failed attempts before giving up until an operator
    /// starts a new session.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
            max_attempts: 10,
        }
    }
}

/// SMTP delivery of the contact file.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MailConfig {
    pub enabled: bool,
    pub smtp_host: Option<String>,
    pub smtp_port: u16,
    pub username: Option<String>,
    #[serde(
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub password: Option<Secret<String>>,
    /// Sender mailbox, e.g. `Rollcall <noreply@example.org>`.
    pub from: Option<String>,
    pub subject: String,
    pub body: String,
}

impl std::fmt::Debug for MailConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailConfig")
            .field("enabled", &self.enabled)
            .field("smtp_host", &self.smtp_host)
            .field("smtp_port", &self.smtp_port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("from", &self.from)
            .field("subject", &self.subject)
            .finish_non_exhaustive()
    }
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            smtp_host: None,
            smtp_port: 587,
            username: None,
            password: None,
            from: None,
            subject: "Updated contact list".into(),
            body: "Hello! Attached is the latest contact file. Import it into your phone to save every registered contact.".into(),
        }
    }
}

/// Contact-card export file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub path: PathBuf,
    /// Keep opted-out contacts in the shared file.
    pub include_opted_out: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("contacts.vcf"),
            include_opted_out: false,
        }
    }
}

/// Automatic distribution of the contact file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DistributionConfig {
    /// Send the refreshed file to the channel after every registration.
    pub send_on_register: bool,
    /// Cron expression for periodic WhatsApp distribution.
    pub whatsapp_cron: Option<String>,
    /// Cron expression for periodic email distribution.
    pub email_cron: Option<String>,
    /// IANA timezone for cron expressions and local announcement times.
    pub timezone: Option<String>,
}

impl Default for DistributionConfig {
    fn default() -> Self {
        Self {
            send_on_register: true,
            whatsapp_cron: None,
            email_cron: None,
            timezone: None,
        }
    }
}

// ── Serde helpers for Secret<String> ────────────────────────────────────────

fn serialize_option_secret<S: serde::Serializer>(
    secret: &Option<Secret<String>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match secret {
        Some(s) => serializer.serialize_some(s.expose_secret()),
        None => serializer.serialize_none(),
    }
}
