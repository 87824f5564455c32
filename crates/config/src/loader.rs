use std::path::{Path, PathBuf};

use {
    secrecy::Secret,
    tracing::{debug, warn},
};

use crate::{env_subst::substitute_env, schema::RollcallConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "rollcall.toml",
    "rollcall.yaml",
    "rollcall.yml",
    "rollcall.json",
];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<RollcallConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./rollcall.{toml,yaml,yml,json}`
/// 2. `~/.config/rollcall/rollcall.{toml,yaml,yml,json}`
///
/// Returns `RollcallConfig::default()` if no config file is found. Environment
/// overrides are applied in both cases.
pub fn discover_and_load() -> RollcallConfig {
    let mut cfg = match find_config_file() {
        Some(path) => {
            debug!(path = %path.display(), "loading config");
            match load_config(&path) {
                Ok(cfg) => cfg,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
                    RollcallConfig::default()
                },
            }
        },
        None => {
            debug!("no config file found, using defaults");
            RollcallConfig::default()
        },
    };
    apply_env_overrides(&mut cfg, |name| std::env::var(name).ok());
    cfg
}

/// Find the first config file in standard locations.
fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    let dir = config_dir()?;
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

/// Returns the user-global config directory (`~/.config/rollcall/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "rollcall").map(|d| d.config_dir().to_path_buf())
}

/// Overlay well-known environment variables on top of the parsed config.
///
/// `DATABASE_URL` wins over `MONGO_URI`; empty values are ignored.
pub fn apply_env_overrides(cfg: &mut RollcallConfig, lookup: impl Fn(&str) -> Option<String>) {
    let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    if let Some(port) = var("PORT") {
        match port.trim().parse() {
            Ok(p) => cfg.server.port = p,
            Err(_) => warn!(value = %port, "ignoring invalid PORT"),
        }
    }
    if let Some(url) = var("DATABASE_URL").or_else(|| var("MONGO_URI")) {
        cfg.database.url = url;
    }
    if let Some(pw) = var("ADMIN_PASSWORD") {
        cfg.admin.password = Some(Secret::new(pw));
    }
    if let Some(jid) = var("WHATSAPP_CHANNEL_JID") {
        cfg.whatsapp.channel_jid = Some(jid);
    }

    if let Some(host) = var("SMTP_HOST") {
        cfg.mail.smtp_host = Some(host);
        cfg.mail.enabled = true;
    }
    if let Some(port) = var("SMTP_PORT") {
        match port.trim().parse() {
            Ok(p) => cfg.mail.smtp_port = p,
            Err(_) => warn!(value = %port, "ignoring invalid SMTP_PORT"),
        }
    }
    if let Some(user) = var("SMTP_USER") {
        cfg.mail.username = Some(user);
    }
    if let Some(pass) = var("SMTP_PASS") {
        cfg.mail.password = Some(Secret::new(pass));
    }
    if let Some(from) = var("MAIL_FROM") {
        cfg.mail.from = Some(from);
    }
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<RollcallConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {super::*, secrecy::ExposeSecret};

    #[test]
    fn loads_each_supported_format() {
        let dir = tempfile::tempdir().unwrap();

        let toml_path = dir.path().join("rollcall.toml");
        std::fs::write(&toml_path, "[server]\nport = 8080\n").unwrap();
        assert_eq!(load_config(&toml_path).unwrap().server.port, 8080);

        let yaml_path = dir.path().join("rollcall.yaml");
        std::fs::write(&yaml_path, "server:\n  port: 8081\n").unwrap();
        assert_eq!(load_config(&yaml_path).unwrap().server.port, 8081);

        let json_path = dir.path().join("rollcall.json");
        std::fs::write(&json_path, r#"{"server":{"port":8082}}"#).unwrap();
        assert_eq!(load_config(&json_path).unwrap().server.port, 8082);
    }

    #[test]
    fn rejects_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rollcall.ini");
        std::fs::write(&path, "port=1").unwrap();
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn env_overrides_replace_file_values() {
        let mut cfg = RollcallConfig::default();
        apply_env_overrides(&mut cfg, |name| match name {
            "PORT" => Some("4000".into()),
            "MONGO_URI" => Some("mongodb://localhost:27017".into()),
            "ADMIN_PASSWORD" => Some("letmein".into()),
            "SMTP_HOST" => Some("smtp.example.org".into()),
            "SMTP_PORT" => Some("465".into()),
            "WHATSAPP_CHANNEL_JID" => Some("12036302@newsletter".into()),
            _ => None,
        });
        assert_eq!(cfg.server.port, 4000);
        assert!(cfg.database.is_mongodb());
        assert_eq!(cfg.admin.password.unwrap().expose_secret(), "letmein");
        assert!(cfg.mail.enabled);
        assert_eq!(cfg.mail.smtp_port, 465);
        assert_eq!(
            cfg.whatsapp.channel_jid.as_deref(),
            Some("12036302@newsletter")
        );
    }

    #[test]
    fn database_url_wins_over_mongo_uri() {
        let mut cfg = RollcallConfig::default();
        apply_env_overrides(&mut cfg, |name| match name {
            "DATABASE_URL" => Some("sqlite::memory:".into()),
            "MONGO_URI" => Some("mongodb://localhost".into()),
            _ => None,
        });
        assert_eq!(cfg.database.url, "sqlite::memory:");
    }

    #[test]
    fn invalid_and_empty_values_are_ignored() {
        let mut cfg = RollcallConfig::default();
        apply_env_overrides(&mut cfg, |name| match name {
            "PORT" => Some("not-a-port".into()),
            "ADMIN_PASSWORD" => Some("   ".into()),
            _ => None,
        });
        assert_eq!(cfg.server.port, 3000);
        assert!(cfg.admin.password.is_none());
    }
}
