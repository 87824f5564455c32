//! Launching and stopping the Node.js Baileys sidecar.

use std::{
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use {
    tokio::{
        io::{AsyncBufReadExt, BufReader},
        process::{Child, Command},
    },
    tracing::{debug, error, info, warn},
};

use crate::{Error, Result, sidecar::DEFAULT_SIDECAR_PORT};

const DIR_ENV: &str = "ROLLCALL_WHATSAPP_SIDECAR_DIR";
const PORT_ENV: &str = "ROLLCALL_WHATSAPP_PORT";
const RELATIVE_DIR: &str = "sidecar/whatsapp";

/// A running sidecar; killed when dropped.
pub struct SidecarProcess {
    child: Child,
    port: u16,
}

impl SidecarProcess {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// SIGTERM, then kill if it is still around after five seconds.
    pub async fn stop(&mut self) {
        info!("stopping WhatsApp sidecar");

        #[cfg(unix)]
        {
            use nix::{
                sys::signal::{Signal, kill},
                unistd::Pid,
            };

            if let Some(pid) = self.child.id()
                && let Ok(pid) = i32::try_from(pid)
            {
                let _ = kill(Pid::from_raw(pid), Signal::SIGTERM);
            }
        }

        #[cfg(not(unix))]
        {
            let _ = self.child.kill().await;
        }

        match tokio::time::timeout(Duration::from_secs(5), self.child.wait()).await {
            Ok(Ok(status)) => info!(?status, "WhatsApp sidecar exited"),
            Ok(Err(e)) => warn!(error = %e, "error waiting for WhatsApp sidecar"),
            Err(_) => {
                warn!("WhatsApp sidecar ignored SIGTERM, killing");
                let _ = self.child.kill().await;
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct SidecarLaunch {
    /// Directory holding the sidecar's `package.json`.
    pub dir: PathBuf,
    pub port: u16,
}

impl SidecarLaunch {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            port: DEFAULT_SIDECAR_PORT,
        }
    }
}

/// Locate the sidecar sources.
///
/// An explicit path wins, then `ROLLCALL_WHATSAPP_SIDECAR_DIR`, then
/// `sidecar/whatsapp` next to the executable or below the working directory.
pub fn find_sidecar_dir(explicit: Option<&Path>) -> Result<PathBuf> {
    let has_package = |dir: &Path| dir.join("package.json").exists();

    if let Some(path) = explicit {
        if has_package(path) {
            return Ok(path.to_path_buf());
        }
        return Err(Error::message(format!(
            "no package.json in WhatsApp sidecar directory {}",
            path.display()
        )));
    }

    if let Ok(dir) = std::env::var(DIR_ENV) {
        let path = PathBuf::from(&dir);
        if has_package(&path) {
            return Ok(path);
        }
        warn!(path = %dir, "{DIR_ENV} is set but has no package.json");
    }

    let mut candidates = Vec::new();
    if let Ok(exe) = std::env::current_exe()
        && let Some(exe_dir) = exe.parent()
    {
        candidates.push(exe_dir.join("..").join(RELATIVE_DIR));
        candidates.push(exe_dir.join("../..").join(RELATIVE_DIR));
    }
    candidates.push(PathBuf::from(RELATIVE_DIR));
    candidates.push(Path::new("..").join(RELATIVE_DIR));

    candidates
        .into_iter()
        .find(|p| has_package(p))
        .map(|p| p.canonicalize().unwrap_or(p))
        .ok_or_else(|| {
            Error::message(format!(
                "WhatsApp sidecar not found; set {DIR_ENV} or install it under {RELATIVE_DIR}"
            ))
        })
}

/// Build the sidecar if needed and start it.
pub async fn start_sidecar(launch: SidecarLaunch) -> Result<SidecarProcess> {
    let dir = &launch.dir;
    if !dir.join("dist/index.js").exists() {
        info!(path = %dir.display(), "building WhatsApp sidecar");
        if !dir.join("node_modules").exists() {
            run_npm(dir, &["install"]).await?;
        }
        run_npm(dir, &["run", "build"]).await?;
    }

    info!(path = %dir.display(), port = launch.port, "starting WhatsApp sidecar");
    let mut child = Command::new("node")
        .arg("dist/index.js")
        .current_dir(dir)
        .env(PORT_ENV, launch.port.to_string())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                forward_log_line(&line);
            }
        });
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                warn!(target: "whatsapp_sidecar", "{line}");
            }
        });
    }

    // Catch immediate crashes (missing node, port in use).
    tokio::time::sleep(Duration::from_millis(500)).await;
    if let Some(status) = child.try_wait()? {
        return Err(Error::message(format!(
            "WhatsApp sidecar exited immediately with {status}"
        )));
    }

    Ok(SidecarProcess {
        child,
        port: launch.port,
    })
}

/// Re-emit a pino JSON line at its own level.
fn forward_log_line(line: &str) {
    let parsed = line
        .starts_with('{')
        .then(|| serde_json::from_str::<serde_json::Value>(line).ok())
        .flatten();
    let Some(log) = parsed else {
        info!(target: "whatsapp_sidecar", "{line}");
        return;
    };
    let level = log.get("level").and_then(|v| v.as_u64()).unwrap_or(30);
    let msg = log.get("msg").and_then(|v| v.as_str()).unwrap_or(line);
    match level {
        0..=20 => debug!(target: "whatsapp_sidecar", "{msg}"),
        21..=30 => info!(target: "whatsapp_sidecar", "{msg}"),
        31..=40 => warn!(target: "whatsapp_sidecar", "{msg}"),
        _ => error!(target: "whatsapp_sidecar", "{msg}"),
    }
}

async fn run_npm(dir: &Path, args: &[&str]) -> Result<()> {
    info!(path = %dir.display(), ?args, "running npm");
    let output = Command::new("npm")
        .args(args)
        .current_dir(dir)
        .output()
        .await?;
    if !output.status.success() {
        return Err(Error::message(format!(
            "npm {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}
