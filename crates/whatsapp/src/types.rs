//! Session events and the JSON protocol spoken with the Baileys sidecar.

use serde::{Deserialize, Serialize};

use crate::{credentials::Credentials, state::DisconnectReason};

/// How a fresh (unpaired) session should be linked.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LoginMethod {
    /// Show a QR code to scan from the phone.
    #[default]
    Qr,
    /// Request an 8-character code to type on the phone with this number.
    PairingCode { phone: String },
}

impl LoginMethod {
    pub fn pairing_phone(&self) -> Option<&str> {
        match self {
            Self::Qr => None,
            Self::PairingCode { phone } => Some(phone),
        }
    }
}

/// Lifecycle events emitted by a live connection.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Qr(String),
    PairingCode(String),
    Open { own_jid: Option<String> },
    Close { reason: DisconnectReason },
    CredsUpdate(Credentials),
}

/// A file to deliver as a document message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundDocument {
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub mimetype: String,
    pub caption: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Receipt {
    pub message_id: Option<String>,
}

// ── Sidecar wire protocol ───────────────────────────────────────────────────

/// Messages sent from rollcall to the sidecar.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayMessage {
    Login {
        account_id: String,
        credentials: Credentials,
        #[serde(skip_serializing_if = "Option::is_none")]
        pairing_phone: Option<String>,
        browser: String,
    },
    SendText {
        request_id: String,
        account_id: String,
        to: String,
        text: String,
    },
    SendDocument {
        request_id: String,
        account_id: String,
        to: String,
        data_base64: String,
        file_name: String,
        mimetype: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
    },
    CheckNumber {
        request_id: String,
        account_id: String,
        phone: String,
    },
    Logout {
        account_id: String,
    },
}

/// Messages received from the sidecar.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SidecarMessage {
    Qr {
        account_id: String,
        qr: String,
    },
    PairingCode {
        account_id: String,
        code: String,
    },
    Connected {
        account_id: String,
        #[serde(default)]
        jid: Option<String>,
    },
    Disconnected {
        account_id: String,
        #[serde(default)]
        status_code: Option<u16>,
        #[serde(default)]
        reason: Option<String>,
    },
    CredsUpdate {
        account_id: String,
        delta: Credentials,
    },
    SendResult {
        request_id: String,
        success: bool,
        #[serde(default)]
        message_id: Option<String>,
        #[serde(default)]
        error: Option<String>,
    },
    CheckNumberResult {
        request_id: String,
        exists: bool,
        #[serde(default)]
        error: Option<String>,
    },
    Error {
        #[serde(default)]
        account_id: Option<String>,
        error: String,
    },
}
