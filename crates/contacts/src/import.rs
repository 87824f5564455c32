//! Bulk import of an uploaded vCard file.

use {serde::Serialize, tracing::debug};

use crate::{
    Error, Result,
    store::ContactStore,
    types::{NewContact, Upserted},
    validate, vcard,
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub created: usize,
    pub updated: usize,
    /// Cards without a usable name or phone number.
    pub skipped: usize,
}

impl ImportSummary {
    pub fn total(&self) -> usize {
        self.created + self.updated + self.skipped
    }
}

/// Upsert every usable card in `text`. Invalid email addresses are dropped
/// rather than rejecting the whole card, and a card without a usable address
/// leaves the stored one in place.
pub async fn import_vcards(store: &dyn ContactStore, text: &str) -> Result<ImportSummary> {
    let cards = vcard::parse_cards(text);
    if cards.is_empty() {
        return Err(Error::invalid("file", "No contact cards found in file"));
    }

    let mut summary = ImportSummary::default();
    for card in cards {
        let Some(contact) = to_new_contact(&card) else {
            debug!(?card, "skipping unusable card");
            summary.skipped += 1;
            continue;
        };
        match store.upsert(contact).await? {
            Upserted::Created(_) => summary.created += 1,
            Upserted::Updated(_) => summary.updated += 1,
        }
    }
    Ok(summary)
}

fn to_new_contact(card: &vcard::Card) -> Option<NewContact> {
    let name = validate::normalize_name(card.name.as_deref()?).ok()?;
    let phone = validate::normalize_phone(card.phone.as_deref()?).ok()?;
    let email = card
        .email
        .as_deref()
        .and_then(|e| validate::normalize_email(e).ok())
        .unwrap_or_default();
    Some(NewContact { name, phone, email })
}
