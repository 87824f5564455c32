//! Outbound mail: batches of identical messages with per-recipient results.

pub mod error;
pub mod memory;
pub mod smtp;
pub mod types;

use async_trait::async_trait;

pub use {
    error::{Error, Result},
    memory::RecordingMailer,
    smtp::{SmtpMailer, SmtpSettings},
    types::{Attachment, BatchOutcome, MailBatch},
};

/// Delivers a batch and classifies every recipient.
///
/// Per-recipient failures are part of the [`BatchOutcome`]; an `Err` means
/// the batch could not be attempted at all.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send_batch(&self, batch: &MailBatch) -> Result<BatchOutcome>;
}
