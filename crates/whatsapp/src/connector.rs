//! Seams between the session adapter and a concrete messaging backend.

use std::sync::Arc;

use {async_trait::async_trait, tokio::sync::mpsc};

use crate::{
    Result,
    credentials::Credentials,
    types::{LoginMethod, OutboundDocument, Receipt, SessionEvent},
};

#[derive(Debug, Clone)]
pub struct ConnectRequest {
    /// Generation the adapter assigned to this attempt.
    pub generation: u64,
    pub credentials: Credentials,
    pub login: LoginMethod,
}

/// Opens connections. Each call produces an independent handle whose events
/// are delivered through the given [`EventSender`].
#[async_trait]
pub trait SessionConnector: Send + Sync {
    async fn connect(
        &self,
        request: ConnectRequest,
        events: EventSender,
    ) -> Result<Arc<dyn SessionHandle>>;
}

/// One live connection. Only the session adapter holds these directly.
#[async_trait]
pub trait SessionHandle: Send + Sync {
    async fn send_text(&self, to: &str, text: &str) -> Result<Receipt>;
    async fn send_document(&self, to: &str, document: &OutboundDocument) -> Result<Receipt>;
    /// Whether `phone` (digits only) belongs to a WhatsApp account.
    async fn check_number(&self, phone: &str) -> Result<bool>;
    /// Unlink the account on the backend.
    async fn logout(&self) -> Result<()>;
    /// Drop the connection. Must not emit further events.
    async fn close(&self);
}

/// Delivers a connection's events to the adapter, tagged with the
/// connection's generation.
#[derive(Debug, Clone)]
pub struct EventSender {
    generation: u64,
    tx: mpsc::UnboundedSender<(u64, SessionEvent)>,
}

impl EventSender {
    pub(crate) fn new(generation: u64, tx: mpsc::UnboundedSender<(u64, SessionEvent)>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns `false` once the adapter has shut down.
    pub fn emit(&self, event: SessionEvent) -> bool {
        self.tx.send((self.generation, event)).is_ok()
    }
}
