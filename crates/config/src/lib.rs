//! Configuration loading, validation and env substitution for rollcall.
//!
//! Config files: `rollcall.toml`, `rollcall.yaml` or `rollcall.json`,
//! searched in `./` then `~/.config/rollcall/`.
//!
//! `${ENV_VAR}` placeholders are substituted before parsing, and a fixed set
//! of well-known variables (`PORT`, `DATABASE_URL`, `ADMIN_PASSWORD`, ...)
//! override the parsed values.

pub mod env_subst;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    loader::{apply_env_overrides, config_dir, discover_and_load, load_config},
    schema::{
        AdminConfig, DatabaseConfig, DistributionConfig, ExportConfig, MailConfig,
        RateLimitsConfig, ReconnectConfig, RollcallConfig, ServerConfig, SidecarConfig,
        WhatsAppConfig,
    },
    validate::{Diagnostic, Severity, validate},
};
