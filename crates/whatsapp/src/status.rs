use async_trait::async_trait;

use crate::state::SessionState;

/// Something observers should see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusUpdate {
    State(SessionState),
    /// QR code rendered as a `data:` URL.
    Qr { data_url: String },
    PairingCode { code: String },
}

/// Receives status updates from the session adapter.
///
/// Publishing must not block on slow observers; the adapter awaits each call
/// before handling the next backend event.
#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn publish(&self, update: StatusUpdate);
}
