//! Outbound dispatch of the contact file and announcements.

use std::sync::Arc;

use {
    rollcall_config::RollcallConfig,
    rollcall_contacts::{ContactCardExport, ContactFilter, ContactStore, export::VCARD_MIME},
    rollcall_mail::{Attachment, BatchOutcome, MailBatch, MailTransport},
    rollcall_whatsapp::{OutboundDocument, Receipt, SessionAdapter},
    serde::Serialize,
    tracing::{info, warn},
};

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct DistributionSettings {
    /// Channel or group receiving the contact file and announcements.
    pub channel_jid: Option<String>,
    pub include_opted_out: bool,
    pub mail_subject: String,
    pub mail_body: String,
}

impl DistributionSettings {
    pub fn from_config(config: &RollcallConfig) -> Self {
        Self {
            channel_jid: config
                .whatsapp
                .channel_jid
                .clone()
                .filter(|j| !j.trim().is_empty()),
            include_opted_out: config.export.include_opted_out,
            mail_subject: config.mail.subject.clone(),
            mail_body: config.mail.body.clone(),
        }
    }
}

/// Counts reported after an email batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailReport {
    pub recipients: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub failed: usize,
    /// Contacts newly flagged as undeliverable.
    pub marked_invalid: u64,
}

pub struct Distributor {
    contacts: Arc<dyn ContactStore>,
    export: Arc<ContactCardExport>,
    session: Arc<SessionAdapter>,
    mailer: Option<Arc<dyn MailTransport>>,
    settings: DistributionSettings,
}

impl Distributor {
    pub fn new(
        contacts: Arc<dyn ContactStore>,
        export: Arc<ContactCardExport>,
        session: Arc<SessionAdapter>,
        mailer: Option<Arc<dyn MailTransport>>,
        settings: DistributionSettings,
    ) -> Self {
        Self {
            contacts,
            export,
            session,
            mailer,
            settings,
        }
    }

    pub fn settings(&self) -> &DistributionSettings {
        &self.settings
    }

    /// Rewrite the contact file from the store. Returns the card count.
    ///
    /// The store is read under the file lock, so a registration cannot slip
    /// in between the read and the rewrite.
    pub async fn refresh_export(&self) -> Result<usize> {
        let filter = ContactFilter::exportable(self.settings.include_opted_out);
        let writer = self.export.writer().await;
        let contacts = self.contacts.find(&filter).await?;
        Ok(writer.regenerate(&contacts).await?)
    }

    /// Send the current contact file to the channel.
    pub async fn send_export(&self) -> Result<Receipt> {
        let channel = self.settings.channel_jid.as_deref().ok_or(Error::NoChannel)?;
        let lease = self
            .session
            .current_handle()
            .ok_or(rollcall_whatsapp::Error::NoSession)?;
        let document = OutboundDocument {
            bytes: self.export.read().await?,
            file_name: self.export.file_name(),
            mimetype: VCARD_MIME.into(),
            caption: None,
        };
        let receipt = self.session.send_document(&lease, channel, &document).await?;
        info!(
            channel,
            bytes = document.bytes.len(),
            message_id = ?receipt.message_id,
            "contact file sent to channel"
        );
        Ok(receipt)
    }

    /// Rebuild the contact file, then send it. Returns the card count.
    pub async fn distribute(&self) -> Result<usize> {
        let count = self.refresh_export().await?;
        self.send_export().await?;
        Ok(count)
    }

    /// Send `text` to `to`, or to the channel when `to` is `None`.
    pub async fn send_text(&self, to: Option<&str>, text: &str) -> Result<Receipt> {
        let to = match to {
            Some(to) => to,
            None => self.settings.channel_jid.as_deref().ok_or(Error::NoChannel)?,
        };
        let lease = self
            .session
            .current_handle()
            .ok_or(rollcall_whatsapp::Error::NoSession)?;
        Ok(self.session.send_text(&lease, to, text).await?)
    }

    /// Mail the contact file to every mailable contact.
    ///
    /// Rejected addresses are flagged on their contacts before the outcome
    /// is judged, so a batch where nothing got through still records them.
    pub async fn email_contacts(&self, subject: Option<&str>) -> Result<EmailReport> {
        let mailer = self.mailer.as_ref().ok_or(Error::MailDisabled)?;

        self.refresh_export().await?;
        let contacts = self
            .contacts
            .find(&ContactFilter {
                opted_out: Some(false),
                invalid_email: Some(false),
                ..ContactFilter::default()
            })
            .await?;
        let mut recipients: Vec<String> = contacts
            .into_iter()
            .filter(|c| c.is_mailable())
            .map(|c| c.email)
            .collect();
        recipients.sort();
        recipients.dedup();
        if recipients.is_empty() {
            info!("no mailable contacts, skipping email batch");
            return Ok(EmailReport::default());
        }

        let batch = MailBatch {
            recipients,
            subject: subject
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(&self.settings.mail_subject)
                .to_string(),
            body: self.settings.mail_body.clone(),
            attachment: Some(Attachment {
                file_name: self.export.file_name(),
                content_type: VCARD_MIME.into(),
                bytes: self.export.read().await?,
            }),
        };
        let outcome = mailer.send_batch(&batch).await?;
        let marked_invalid = self.mark_rejected(&outcome).await?;

        let report = EmailReport {
            recipients: batch.recipients.len(),
            accepted: outcome.accepted.len(),
            rejected: outcome.rejected.len(),
            failed: outcome.failed.len(),
            marked_invalid,
        };
        if outcome.is_total_failure() {
            return Err(Error::MailBatchFailed {
                failed: report.failed,
            });
        }
        info!(
            accepted = report.accepted,
            rejected = report.rejected,
            failed = report.failed,
            "email batch sent"
        );
        Ok(report)
    }

    async fn mark_rejected(&self, outcome: &BatchOutcome) -> Result<u64> {
        if outcome.rejected.is_empty() {
            return Ok(0);
        }
        let marked = self.contacts.mark_invalid_emails(&outcome.rejected).await?;
        warn!(
            rejected = outcome.rejected.len(),
            marked, "flagged undeliverable email addresses"
        );
        Ok(marked)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        rollcall_contacts::{NewContact, store_memory::InMemoryStore},
        rollcall_mail::RecordingMailer,
        rollcall_whatsapp::{
            MemoryCredentialStore, ScriptedConnector, SentMessage, SessionOptions, SessionState,
        },
        std::time::Duration,
    };

    use crate::broadcast::StatusBroadcaster;

    struct Harness {
        contacts: Arc<InMemoryStore>,
        connector: Arc<ScriptedConnector>,
        session: Arc<SessionAdapter>,
        mailer: Arc<RecordingMailer>,
        distributor: Distributor,
        _dir: tempfile::TempDir,
    }

    fn settings() -> DistributionSettings {
        DistributionSettings {
            channel_jid: Some("120363000000000000@newsletter".into()),
            include_opted_out: false,
            mail_subject: "Contacts".into(),
            mail_body: "Attached.".into(),
        }
    }

    async fn harness(connector: ScriptedConnector, mailer: RecordingMailer) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let contacts = Arc::new(InMemoryStore::new());
        let connector = Arc::new(connector);
        let session = Arc::new(SessionAdapter::new(
            connector.clone(),
            Arc::new(MemoryCredentialStore::new()),
            Arc::new(StatusBroadcaster::new()),
            SessionOptions {
                announce_on_connect: false,
                ..SessionOptions::default()
            },
        ));
        let mailer = Arc::new(mailer);
        let distributor = Distributor::new(
            contacts.clone(),
            Arc::new(ContactCardExport::new(dir.path().join("contacts.vcf"))),
            session.clone(),
            Some(mailer.clone()),
            settings(),
        );
        Harness {
            contacts,
            connector,
            session,
            mailer,
            distributor,
            _dir: dir,
        }
    }

    async fn connect(session: &SessionAdapter) {
        session.start();
        for _ in 0..200 {
            if session.state() == SessionState::Connected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("session did not connect");
    }

    async fn add(store: &InMemoryStore, name: &str, phone: &str, email: &str) {
        store
            .insert(NewContact {
                name: name.into(),
                phone: phone.into(),
                email: email.into(),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn send_requires_a_session() {
        let h = harness(ScriptedConnector::new(), RecordingMailer::new()).await;
        assert!(matches!(
            h.distributor.send_export().await,
            Err(Error::WhatsApp(rollcall_whatsapp::Error::NoSession))
        ));
    }

    #[tokio::test]
    async fn distribute_sends_the_rebuilt_file() {
        let h = harness(
            ScriptedConnector::new().opening_with(Some("15550001111@s.whatsapp.net")),
            RecordingMailer::new(),
        )
        .await;
        add(&h.contacts, "Ada", "447700900123", "ada@example.org").await;
        add(&h.contacts, "Out", "447700900124", "out@example.org").await;
        h.contacts
            .update("447700900124", &rollcall_contacts::ContactPatch {
                opted_out: Some(true),
                ..Default::default()
            })
            .await
            .unwrap();
        connect(&h.session).await;

        assert_eq!(h.distributor.distribute().await.unwrap(), 1);
        let sent = h.connector.last_session().unwrap().sent();
        let [SentMessage::Document {
            to,
            file_name,
            mimetype,
            bytes,
            ..
        }] = sent.as_slice()
        else {
            panic!("expected one document, got {sent:?}");
        };
        assert_eq!(to, "120363000000000000@newsletter");
        assert_eq!(file_name, "contacts.vcf");
        assert_eq!(mimetype, "text/vcard");
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert!(text.contains("FN:Ada"));
        assert!(!text.contains("FN:Out"));
    }

    #[tokio::test]
    async fn text_defaults_to_the_channel() {
        let h = harness(
            ScriptedConnector::new().opening_with(None),
            RecordingMailer::new(),
        )
        .await;
        connect(&h.session).await;
        h.distributor.send_text(None, "Meetup at 6").await.unwrap();
        h.distributor
            .send_text(Some("447700900123@s.whatsapp.net"), "hi")
            .await
            .unwrap();
        let sent = h.connector.last_session().unwrap().sent();
        assert_eq!(sent[0].to(), "120363000000000000@newsletter");
        assert_eq!(sent[1].to(), "447700900123@s.whatsapp.net");
    }

    #[tokio::test]
    async fn email_batch_marks_rejected_addresses() {
        let h = harness(
            ScriptedConnector::new(),
            RecordingMailer::new().rejecting(["bounce@example.org"]),
        )
        .await;
        add(&h.contacts, "Ada", "447700900123", "ada@example.org").await;
        add(&h.contacts, "Bo", "447700900124", "bounce@example.org").await;
        add(&h.contacts, "Cy", "447700900125", "").await;

        let report = h.distributor.email_contacts(None).await.unwrap();
        assert_eq!(report.recipients, 2);
        assert_eq!(report.accepted, 1);
        assert_eq!(report.rejected, 1);
        assert_eq!(report.marked_invalid, 1);

        let bo = h.contacts.find_one("447700900124").await.unwrap().unwrap();
        assert!(bo.invalid_email);
        let batch = &h.mailer.sent()[0];
        assert_eq!(batch.subject, "Contacts");
        assert_eq!(
            batch.attachment.as_ref().unwrap().content_type,
            "text/vcard"
        );

        // Flagged addresses are left out of the next batch.
        let report = h.distributor.email_contacts(Some("Update")).await.unwrap();
        assert_eq!(report.recipients, 1);
        assert_eq!(h.mailer.sent()[1].subject, "Update");
    }

    #[tokio::test]
    async fn total_failure_is_an_error_after_marking() {
        let h = harness(
            ScriptedConnector::new(),
            RecordingMailer::new()
                .rejecting(["bounce@example.org"])
                .failing(["later@example.org"]),
        )
        .await;
        add(&h.contacts, "Bo", "447700900124", "bounce@example.org").await;
        add(&h.contacts, "Li", "447700900126", "later@example.org").await;

        assert!(matches!(
            h.distributor.email_contacts(None).await,
            Err(Error::MailBatchFailed { failed: 1 })
        ));
        let bo = h.contacts.find_one("447700900124").await.unwrap().unwrap();
        assert!(bo.invalid_email);
    }
}
