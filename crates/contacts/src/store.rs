//! Persistence trait for contact records.

use async_trait::async_trait;

use crate::{
    Result,
    types::{Contact, ContactFilter, ContactPatch, NewContact, Upserted},
};

/// Storage backend for contacts.
///
/// Every backend enforces uniqueness of `phone` itself; callers never
/// check-then-insert. A duplicate surfaces as [`crate::Error::Conflict`].
#[async_trait]
pub trait ContactStore: Send + Sync {
    /// Contacts matching `filter`, oldest registration first.
    async fn find(&self, filter: &ContactFilter) -> Result<Vec<Contact>>;

    async fn find_one(&self, phone: &str) -> Result<Option<Contact>>;

    /// Insert a new contact. Fails with `Conflict` if the phone exists.
    async fn insert(&self, contact: NewContact) -> Result<Contact>;

    /// Insert, or refresh name and email of the contact with the same phone.
    /// An empty `email` keeps the stored address. Flags of an existing
    /// contact are preserved, except that a changed address clears
    /// `invalid_email`.
    async fn upsert(&self, contact: NewContact) -> Result<Upserted>;

    /// Apply `patch` to the contact with `phone`. Returns `None` when no such
    /// contact exists, `Conflict` when the patch moves it onto a taken phone.
    async fn update(&self, phone: &str, patch: &ContactPatch) -> Result<Option<Contact>>;

    /// Delete matching contacts and return how many were removed.
    async fn delete(&self, filter: &ContactFilter) -> Result<u64>;

    async fn count(&self, filter: &ContactFilter) -> Result<u64>;

    /// Flag every contact using one of `emails` as undeliverable.
    async fn mark_invalid_emails(&self, emails: &[String]) -> Result<u64>;
}
