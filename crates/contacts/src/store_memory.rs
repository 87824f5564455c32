//! In-memory contact store for tests and ephemeral runs.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::{
    Error, Result,
    store::ContactStore,
    types::{Contact, ContactFilter, ContactPatch, NewContact, Upserted, now_ms},
};

/// Contacts kept in registration order behind a single lock, so the
/// uniqueness check and the insert are one critical section.
#[derive(Default)]
pub struct InMemoryStore {
    contacts: Mutex<Vec<Contact>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ContactStore for InMemoryStore {
    async fn find(&self, filter: &ContactFilter) -> Result<Vec<Contact>> {
        let contacts = self.contacts.lock().unwrap_or_else(|e| e.into_inner());
        Ok(contacts
            .iter()
            .filter(|c| filter.matches(c))
            .cloned()
            .collect())
    }

    async fn find_one(&self, phone: &str) -> Result<Option<Contact>> {
        let contacts = self.contacts.lock().unwrap_or_else(|e| e.into_inner());
        Ok(contacts.iter().find(|c| c.phone == phone).cloned())
    }

    async fn insert(&self, contact: NewContact) -> Result<Contact> {
        let mut contacts = self.contacts.lock().unwrap_or_else(|e| e.into_inner());
        if contacts.iter().any(|c| c.phone == contact.phone) {
            return Err(Error::conflict(contact.phone));
        }
        let contact = contact.into_contact(now_ms());
        contacts.push(contact.clone());
        Ok(contact)
    }

    async fn upsert(&self, contact: NewContact) -> Result<Upserted> {
        let mut contacts = self.contacts.lock().unwrap_or_else(|e| e.into_inner());
        let now = now_ms();
        if let Some(existing) = contacts.iter_mut().find(|c| c.phone == contact.phone) {
            existing.name = contact.name;
            if !contact.email.is_empty() && contact.email != existing.email {
                existing.email = contact.email;
                existing.invalid_email = false;
            }
            existing.updated_at_ms = now;
            return Ok(Upserted::Updated(existing.clone()));
        }
        let contact = contact.into_contact(now);
        contacts.push(contact.clone());
        Ok(Upserted::Created(contact))
    }

    async fn update(&self, phone: &str, patch: &ContactPatch) -> Result<Option<Contact>> {
        let mut contacts = self.contacts.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(new_phone) = &patch.phone
            && new_phone != phone
            && contacts.iter().any(|c| c.phone == *new_phone)
        {
            return Err(Error::conflict(new_phone.clone()));
        }
        let Some(contact) = contacts.iter_mut().find(|c| c.phone == phone) else {
            return Ok(None);
        };
        patch.apply(contact, now_ms());
        Ok(Some(contact.clone()))
    }

    async fn delete(&self, filter: &ContactFilter) -> Result<u64> {
        let mut contacts = self.contacts.lock().unwrap_or_else(|e| e.into_inner());
        let before = contacts.len();
        contacts.retain(|c| !filter.matches(c));
        Ok((before - contacts.len()) as u64)
    }

    async fn count(&self, filter: &ContactFilter) -> Result<u64> {
        let contacts = self.contacts.lock().unwrap_or_else(|e| e.into_inner());
        Ok(contacts.iter().filter(|c| filter.matches(c)).count() as u64)
    }

    async fn mark_invalid_emails(&self, emails: &[String]) -> Result<u64> {
        let mut contacts = self.contacts.lock().unwrap_or_else(|e| e.into_inner());
        let now = now_ms();
        let mut changed = 0;
        for c in contacts.iter_mut().filter(|c| emails.contains(&c.email)) {
            c.invalid_email = true;
            c.updated_at_ms = now;
            changed += 1;
        }
        Ok(changed)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {super::*, std::sync::Arc};

    fn new_contact(phone: &str) -> NewContact {
        NewContact {
            name: format!("Contact {phone}"),
            phone: phone.into(),
            email: format!("{phone}@example.org"),
        }
    }

    #[tokio::test]
    async fn concurrent_duplicate_inserts_yield_one_winner() {
        let store = Arc::new(InMemoryStore::new());
        let mut tasks = Vec::new();
        for _ in 0..16 {
            let store = Arc::clone(&store);
            tasks.push(tokio::spawn(async move {
                store.insert(new_contact("2348012345678")).await
            }));
        }
        let mut ok = 0;
        let mut conflicts = 0;
        for t in tasks {
            match t.await.unwrap() {
                Ok(_) => ok += 1,
                Err(Error::Conflict { .. }) => conflicts += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(ok, 1);
        assert_eq!(conflicts, 15);
        assert_eq!(store.count(&ContactFilter::all()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn update_rejects_taken_phone() {
        let store = InMemoryStore::new();
        store.insert(new_contact("111111111")).await.unwrap();
        store.insert(new_contact("222222222")).await.unwrap();
        let patch = ContactPatch {
            phone: Some("222222222".into()),
            ..ContactPatch::default()
        };
        assert!(matches!(
            store.update("111111111", &patch).await,
            Err(Error::Conflict { .. })
        ));
        assert!(store.update("999999999", &ContactPatch::default()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn upsert_keeps_flags() {
        let store = InMemoryStore::new();
        store.insert(new_contact("333333333")).await.unwrap();
        store
            .update(
                "333333333",
                &ContactPatch {
                    opted_out: Some(true),
                    ..ContactPatch::default()
                },
            )
            .await
            .unwrap();
        let mut again = new_contact("333333333");
        again.name = "Renamed".into();
        let out = store.upsert(again).await.unwrap();
        assert!(matches!(out, Upserted::Updated(_)));
        assert_eq!(out.contact().name, "Renamed");
        assert!(out.contact().opted_out);
    }
}
