use serde::Serialize;

/// A file attached to every message of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// The same message sent individually to each recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailBatch {
    pub recipients: Vec<String>,
    pub subject: String,
    pub body: String,
    pub attachment: Option<Attachment>,
}

/// Per-recipient result of a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    pub accepted: Vec<String>,
    /// Malformed addresses and permanent (5xx) rejections. These will not
    /// succeed on retry.
    pub rejected: Vec<String>,
    /// Transient failures: network errors, 4xx replies, timeouts.
    pub failed: Vec<String>,
}

impl BatchOutcome {
    /// Nothing was delivered and at least one delivery failed for reasons
    /// other than a bad address.
    pub fn is_total_failure(&self) -> bool {
        self.accepted.is_empty() && !self.failed.is_empty()
    }
}
