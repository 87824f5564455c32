use serde::{Deserialize, Serialize};

/// A registered contact.
///
/// `phone` holds digits only (country code included, no `+`) and is the
/// unique key across every store backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub phone: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub joined_channel: bool,
    #[serde(default)]
    pub opted_out: bool,
    /// Set when a mail batch bounced for this address.
    #[serde(default)]
    pub invalid_email: bool,
    #[serde(default)]
    pub created_at_ms: u64,
    #[serde(default)]
    pub updated_at_ms: u64,
}

impl Contact {
    /// WhatsApp user JID for this contact.
    pub fn jid(&self) -> String {
        format!("{}@s.whatsapp.net", self.phone)
    }

    /// Whether this contact can receive the email batch.
    pub fn is_mailable(&self) -> bool {
        !self.opted_out && !self.invalid_email && !self.email.is_empty()
    }
}

/// Validated input for a new contact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewContact {
    pub name: String,
    pub phone: String,
    pub email: String,
}

impl NewContact {
    pub fn into_contact(self, now_ms: u64) -> Contact {
        Contact {
            id: uuid::Uuid::new_v4().to_string(),
            name: self.name,
            phone: self.phone,
            email: self.email,
            joined_channel: false,
            opted_out: false,
            invalid_email: false,
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
        }
    }
}

/// Partial update of a contact. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContactPatch {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub joined_channel: Option<bool>,
    pub opted_out: Option<bool>,
    pub invalid_email: Option<bool>,
}

impl ContactPatch {
    pub fn apply(&self, contact: &mut Contact, now_ms: u64) {
        if let Some(name) = &self.name {
            contact.name.clone_from(name);
        }
        if let Some(phone) = &self.phone {
            contact.phone.clone_from(phone);
        }
        if let Some(email) = &self.email {
            // A corrected address gets another chance at delivery.
            if *email != contact.email {
                contact.invalid_email = false;
            }
            contact.email.clone_from(email);
        }
        if let Some(v) = self.joined_channel {
            contact.joined_channel = v;
        }
        if let Some(v) = self.opted_out {
            contact.opted_out = v;
        }
        if let Some(v) = self.invalid_email {
            contact.invalid_email = v;
        }
        contact.updated_at_ms = now_ms;
    }
}

/// Equality filter over contact fields. An empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContactFilter {
    pub phone: Option<String>,
    pub opted_out: Option<bool>,
    pub joined_channel: Option<bool>,
    pub invalid_email: Option<bool>,
}

impl ContactFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn by_phone(phone: impl Into<String>) -> Self {
        Self {
            phone: Some(phone.into()),
            ..Self::default()
        }
    }

    /// Contacts that belong in the shared export file.
    pub fn exportable(include_opted_out: bool) -> Self {
        Self {
            opted_out: (!include_opted_out).then_some(false),
            ..Self::default()
        }
    }

    pub fn matches(&self, contact: &Contact) -> bool {
        self.phone.as_ref().is_none_or(|p| *p == contact.phone)
            && self.opted_out.is_none_or(|v| v == contact.opted_out)
            && self.joined_channel.is_none_or(|v| v == contact.joined_channel)
            && self.invalid_email.is_none_or(|v| v == contact.invalid_email)
    }
}

/// Result of an upsert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Upserted {
    Created(Contact),
    Updated(Contact),
}

impl Upserted {
    pub fn contact(&self) -> &Contact {
        match self {
            Self::Created(c) | Self::Updated(c) => c,
        }
    }
}

pub(crate) fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn contact() -> Contact {
        NewContact {
            name: "Ada".into(),
            phone: "2348012345678".into(),
            email: "ada@example.org".into(),
        }
        .into_contact(1_000)
    }

    #[test]
    fn serializes_camel_case_flags() {
        let json = serde_json::to_value(contact()).unwrap();
        assert_eq!(json["joinedChannel"], false);
        assert_eq!(json["optedOut"], false);
        assert_eq!(json["invalidEmail"], false);
        assert_eq!(json["createdAtMs"], 1_000);
    }

    #[test]
    fn legacy_documents_without_flags_deserialize() {
        let c: Contact =
            serde_json::from_str(r#"{"name":"Bo","phone":"4915112345678","email":"bo@x.de"}"#)
                .unwrap();
        assert!(!c.opted_out);
        assert!(c.is_mailable());
    }

    #[test]
    fn patch_touches_only_given_fields() {
        let mut c = contact();
        c.invalid_email = true;
        ContactPatch {
            email: Some("ada@new.example".into()),
            opted_out: Some(true),
            ..ContactPatch::default()
        }
        .apply(&mut c, 2_000);
        assert_eq!(c.name, "Ada");
        assert_eq!(c.email, "ada@new.example");
        assert!(!c.invalid_email);
        assert!(c.opted_out);
        assert_eq!(c.updated_at_ms, 2_000);
    }

    #[test]
    fn export_filter_respects_opt_out_flag() {
        let mut c = contact();
        c.opted_out = true;
        assert!(!ContactFilter::exportable(false).matches(&c));
        assert!(ContactFilter::exportable(true).matches(&c));
        assert!(ContactFilter::by_phone("2348012345678").matches(&c));
        assert!(!ContactFilter::by_phone("1").matches(&c));
    }
}
