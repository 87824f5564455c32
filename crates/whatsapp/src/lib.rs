//! WhatsApp session management for rollcall.
//!
//! [`SessionAdapter`] supervises a single linked account: login by QR code or
//! pairing code, credential persistence, bounded reconnects and logout. The
//! protocol itself runs in a Node.js Baileys sidecar reached over a local
//! WebSocket ([`SidecarConnector`]); [`ScriptedConnector`] stands in for it in
//! tests.

pub mod connector;
pub mod credentials;
pub mod error;
pub mod process;
pub mod qr;
pub mod reconnect;
pub mod scripted;
pub mod session;
pub mod sidecar;
pub mod state;
pub mod status;
pub mod types;

pub use {
    connector::{ConnectRequest, EventSender, SessionConnector, SessionHandle},
    credentials::{CredentialStore, Credentials, FileCredentialStore, MemoryCredentialStore},
    error::{Error, Result},
    process::{SidecarLaunch, SidecarProcess, find_sidecar_dir, start_sidecar},
    reconnect::ReconnectPolicy,
    scripted::{ScriptedConnector, ScriptedSession, SentMessage},
    session::{CONNECTED_ANNOUNCEMENT, SessionAdapter, SessionLease, SessionOptions},
    sidecar::{DEFAULT_SIDECAR_PORT, SidecarConnector},
    state::{DisconnectReason, SessionState},
    status::{StatusSink, StatusUpdate},
    types::{LoginMethod, OutboundDocument, Receipt, SessionEvent},
};
