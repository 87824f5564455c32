//! Mail transport that records batches instead of sending them.

use std::{collections::HashSet, sync::Mutex};

use async_trait::async_trait;

use crate::{
    MailTransport, Result,
    types::{BatchOutcome, MailBatch},
};

/// Accepts every recipient except those configured as rejected or failing.
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<MailBatch>>,
    reject: HashSet<String>,
    fail: HashSet<String>,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Treat these addresses as permanently undeliverable.
    #[must_use]
    pub fn rejecting<I, S>(mut self, addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reject.extend(addresses.into_iter().map(Into::into));
        self
    }

    /// Treat these addresses as transiently failing.
    #[must_use]
    pub fn failing<I, S>(mut self, addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fail.extend(addresses.into_iter().map(Into::into));
        self
    }

    pub fn sent(&self) -> Vec<MailBatch> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl MailTransport for RecordingMailer {
    async fn send_batch(&self, batch: &MailBatch) -> Result<BatchOutcome> {
        let mut outcome = BatchOutcome::default();
        for r in &batch.recipients {
            if self.reject.contains(r) {
                outcome.rejected.push(r.clone());
            } else if self.fail.contains(r) {
                outcome.failed.push(r.clone());
            } else {
                outcome.accepted.push(r.clone());
            }
        }
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(batch.clone());
        Ok(outcome)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sorts_recipients_by_configured_behaviour() {
        let mailer = RecordingMailer::new()
            .rejecting(["bounce@example.org"])
            .failing(["later@example.org"]);
        let batch = MailBatch {
            recipients: vec![
                "ok@example.org".into(),
                "bounce@example.org".into(),
                "later@example.org".into(),
            ],
            subject: "s".into(),
            body: "b".into(),
            attachment: None,
        };
        let out = mailer.send_batch(&batch).await.unwrap();
        assert_eq!(out.accepted, vec!["ok@example.org".to_string()]);
        assert_eq!(out.rejected, vec!["bounce@example.org".to_string()]);
        assert_eq!(out.failed, vec!["later@example.org".to_string()]);
        assert!(!out.is_total_failure());
        assert_eq!(mailer.sent().len(), 1);
    }
}
