//! SMTP delivery through lettre's tokio transport.

use {
    async_trait::async_trait,
    lettre::{
        AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
        message::{
            Attachment as MimeAttachment, Mailbox, MultiPart, SinglePart, header::ContentType,
        },
        transport::smtp::authentication::Credentials,
    },
    secrecy::{ExposeSecret, Secret},
    tracing::{debug, info, warn},
};

use crate::{
    Error, MailTransport, Result,
    types::{BatchOutcome, MailBatch},
};

/// Port that speaks TLS from the first byte; every other port uses STARTTLS.
const IMPLICIT_TLS_PORT: u16 = 465;

pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<Secret<String>>,
    pub from: String,
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(settings: &SmtpSettings) -> Result<Self> {
        let from: Mailbox = settings
            .from
            .parse()
            .map_err(|e| Error::config(format!("invalid sender address '{}': {e}", settings.from)))?;

        let builder = if settings.port == IMPLICIT_TLS_PORT {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)?
        };
        let mut builder = builder.port(settings.port);
        if let (Some(user), Some(pass)) = (&settings.username, &settings.password) {
            builder = builder.credentials(Credentials::new(
                user.clone(),
                pass.expose_secret().clone(),
            ));
        }

        info!(host = %settings.host, port = settings.port, "SMTP mailer configured");
        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl MailTransport for SmtpMailer {
    async fn send_batch(&self, batch: &MailBatch) -> Result<BatchOutcome> {
        let mut outcome = BatchOutcome::default();

        for recipient in &batch.recipients {
            let to: Mailbox = match recipient.parse() {
                Ok(m) => m,
                Err(e) => {
                    debug!(recipient = %recipient, error = %e, "rejecting malformed address");
                    outcome.rejected.push(recipient.clone());
                    continue;
                },
            };
            let message = compose(&self.from, to, batch)?;

            match self.transport.send(message).await {
                Ok(_) => outcome.accepted.push(recipient.clone()),
                Err(e) if e.is_permanent() => {
                    warn!(recipient = %recipient, error = %e, "recipient rejected");
                    outcome.rejected.push(recipient.clone());
                },
                Err(e) => {
                    warn!(recipient = %recipient, error = %e, "delivery failed");
                    outcome.failed.push(recipient.clone());
                },
            }
        }

        info!(
            accepted = outcome.accepted.len(),
            rejected = outcome.rejected.len(),
            failed = outcome.failed.len(),
            "mail batch finished"
        );
        Ok(outcome)
    }
}

/// Build one message of a batch.
pub(crate) fn compose(from: &Mailbox, to: Mailbox, batch: &MailBatch) -> Result<Message> {
    let builder = Message::builder()
        .from(from.clone())
        .to(to)
        .subject(batch.subject.clone());

    let message = match &batch.attachment {
        Some(att) => {
            let content_type = ContentType::parse(&att.content_type).map_err(|e| {
                Error::config(format!("invalid content type '{}': {e}", att.content_type))
            })?;
            builder.multipart(
                MultiPart::mixed()
                    .singlepart(SinglePart::plain(batch.body.clone()))
                    .singlepart(
                        MimeAttachment::new(att.file_name.clone())
                            .body(att.bytes.clone(), content_type),
                    ),
            )?
        },
        None => builder
            .header(ContentType::TEXT_PLAIN)
            .body(batch.body.clone())?,
    };
    Ok(message)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {super::*, crate::types::Attachment};

    fn batch(attachment: Option<Attachment>) -> MailBatch {
        MailBatch {
            recipients: vec!["ada@example.org".into()],
            subject: "Updated contact list".into(),
            body: "See attached.".into(),
            attachment,
        }
    }

    fn from() -> Mailbox {
        "Rollcall <noreply@example.org>".parse().unwrap()
    }

    #[test]
    fn composes_message_with_vcard_attachment() {
        let att = Attachment {
            file_name: "contacts.vcf".into(),
            content_type: "text/vcard".into(),
            bytes: b"BEGIN:VCARD\r\nEND:VCARD\r\n".to_vec(),
        };
        let msg = compose(&from(), "ada@example.org".parse().unwrap(), &batch(Some(att)))
            .unwrap();
        let raw = String::from_utf8(msg.formatted()).unwrap();
        assert!(raw.contains("Subject: Updated contact list"));
        assert!(raw.contains("multipart/mixed"));
        assert!(raw.contains("filename=\"contacts.vcf\""));
        assert!(raw.contains("text/vcard"));
    }

    #[test]
    fn composes_plain_message_without_attachment() {
        let msg = compose(&from(), "ada@example.org".parse().unwrap(), &batch(None)).unwrap();
        let raw = String::from_utf8(msg.formatted()).unwrap();
        assert!(!raw.contains("multipart"));
        assert!(raw.contains("See attached."));
    }

    #[test]
    fn rejects_bad_sender() {
        let settings = SmtpSettings {
            host: "smtp.example.org".into(),
            port: 587,
            username: None,
            password: None,
            from: "not an address".into(),
        };
        assert!(matches!(SmtpMailer::new(&settings), Err(Error::Config { .. })));
    }

    #[tokio::test]
    async fn malformed_recipients_are_rejected_without_sending() {
        let settings = SmtpSettings {
            host: "127.0.0.1".into(),
            port: 2525,
            username: None,
            password: None,
            from: "noreply@example.org".into(),
        };
        let mailer = SmtpMailer::new(&settings).unwrap();
        let mut b = batch(None);
        b.recipients = vec!["not-an-address".into()];
        let outcome = mailer.send_batch(&b).await.unwrap();
        assert_eq!(outcome.rejected, vec!["not-an-address".to_string()]);
        assert!(outcome.accepted.is_empty());
        assert!(!outcome.is_total_failure());
    }
}
