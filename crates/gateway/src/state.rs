use std::{path::PathBuf, sync::Arc, time::Instant};

use {
    rollcall_config::RollcallConfig,
    rollcall_contacts::{ContactCardExport, ContactStore},
    rollcall_cron::Scheduler,
    rollcall_whatsapp::SessionAdapter,
    tokio::sync::mpsc,
    tracing::warn,
};

use crate::{
    auth::AdminPassword, broadcast::StatusBroadcaster, distribution::Distributor,
    request_throttle::RequestThrottle,
};

// ── Connected client ─────────────────────────────────────────────────────────

/// A WebSocket observer of the session status.
#[derive(Debug)]
pub struct ConnectedClient {
    pub conn_id: String,
    pub remote_ip: String,
    /// Channel for sending serialized frames to this client's write loop.
    pub sender: mpsc::UnboundedSender<String>,
    pub connected_at: Instant,
}

impl ConnectedClient {
    /// Queue a frame. `false` means the client is gone.
    pub fn send(&self, frame: &str) -> bool {
        self.sender.send(frame.to_string()).is_ok()
    }
}

// ── Settings ─────────────────────────────────────────────────────────────────

/// Request-handling switches taken from the configuration.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    /// Resolve client IPs from forwarding headers.
    pub behind_proxy: bool,
    /// Ask WhatsApp whether a number exists before registering it.
    pub verify_registration: bool,
    /// Push the contact file to the channel after each registration.
    pub send_on_register: bool,
    /// Zone for announcement times given without an offset.
    pub timezone: chrono_tz::Tz,
    pub public_dir: PathBuf,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            behind_proxy: false,
            verify_registration: true,
            send_on_register: true,
            timezone: chrono_tz::UTC,
            public_dir: PathBuf::from("public"),
        }
    }
}

impl GatewaySettings {
    pub fn from_config(config: &RollcallConfig) -> Self {
        let timezone = match config.distribution.timezone.as_deref() {
            Some(name) => name.parse().unwrap_or_else(|_| {
                warn!(timezone = name, "unknown distribution timezone, using UTC");
                chrono_tz::UTC
            }),
            None => chrono_tz::UTC,
        };
        Self {
            behind_proxy: config.server.behind_proxy,
            verify_registration: config.whatsapp.verify_registration,
            send_on_register: config.distribution.send_on_register,
            timezone,
            public_dir: config.server.public_dir.clone(),
        }
    }
}

// ── Gateway state ────────────────────────────────────────────────────────────

/// Everything the HTTP and WebSocket handlers share.
pub struct GatewayState {
    pub contacts: Arc<dyn ContactStore>,
    pub export: Arc<ContactCardExport>,
    pub session: Arc<SessionAdapter>,
    pub broadcaster: Arc<StatusBroadcaster>,
    pub distributor: Arc<Distributor>,
    pub scheduler: Arc<Scheduler>,
    /// `None` locks every admin route.
    pub admin_password: Option<AdminPassword>,
    pub settings: GatewaySettings,
    pub request_throttle: RequestThrottle,
}

impl GatewayState {
    /// Rebuild the shared contact file after records changed. The file is
    /// derived data, so a failure is logged and the request still succeeds.
    pub async fn refresh_export(&self) {
        if let Err(e) = self.distributor.refresh_export().await {
            warn!(error = %e, path = %self.export.path().display(), "failed to rebuild contact file");
        }
    }
}
