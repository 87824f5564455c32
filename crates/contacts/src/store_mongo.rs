//! MongoDB-backed contact store.
//!
//! Documents use the same camelCase layout as the JSON API, so collections
//! written by earlier deployments of the registration form load unchanged.

use {
    async_trait::async_trait,
    bson::{Document, doc},
    futures::TryStreamExt,
    mongodb::{
        Client, Collection, IndexModel,
        error::{ErrorKind, WriteFailure},
        options::{IndexOptions, ReturnDocument},
    },
    tracing::info,
};

use crate::{
    Error, Result,
    store::ContactStore,
    types::{Contact, ContactFilter, ContactPatch, NewContact, Upserted, now_ms},
};

const DUPLICATE_KEY: i32 = 11000;

pub struct MongoStore {
    contacts: Collection<Contact>,
}

impl MongoStore {
    /// Connect, verify the server answers, and ensure the unique phone index.
    pub async fn connect(uri: &str, database: &str) -> Result<Self> {
        let client = Client::with_uri_str(uri).await?;
        let db = client.database(database);
        db.run_command(doc! { "ping": 1 }).await?;

        let contacts = db.collection::<Contact>("contacts");
        contacts
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "phone": 1 })
                    .options(IndexOptions::builder().unique(true).build())
                    .build(),
            )
            .await?;
        info!(database, "connected to MongoDB contact store");

        Ok(Self { contacts })
    }
}

fn filter_doc(filter: &ContactFilter) -> Document {
    let mut d = Document::new();
    if let Some(phone) = &filter.phone {
        d.insert("phone", phone.as_str());
    }
    if let Some(v) = filter.opted_out {
        d.insert("optedOut", v);
    }
    if let Some(v) = filter.joined_channel {
        d.insert("joinedChannel", v);
    }
    if let Some(v) = filter.invalid_email {
        d.insert("invalidEmail", v);
    }
    d
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(e)) if e.code == DUPLICATE_KEY
    )
}

#[async_trait]
impl ContactStore for MongoStore {
    async fn find(&self, filter: &ContactFilter) -> Result<Vec<Contact>> {
        let cursor = self
            .contacts
            .find(filter_doc(filter))
            .sort(doc! { "createdAtMs": 1, "id": 1 })
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn find_one(&self, phone: &str) -> Result<Option<Contact>> {
        Ok(self.contacts.find_one(doc! { "phone": phone }).await?)
    }

    async fn insert(&self, contact: NewContact) -> Result<Contact> {
        let contact = contact.into_contact(now_ms());
        match self.contacts.insert_one(&contact).await {
            Ok(_) => Ok(contact),
            Err(e) if is_duplicate_key(&e) => Err(Error::conflict(contact.phone)),
            Err(e) => Err(e.into()),
        }
    }

    async fn upsert(&self, contact: NewContact) -> Result<Upserted> {
        let fresh = contact.into_contact(now_ms());
        // Pipeline update: every `$field` reference reads the stored document,
        // which is absent on insert.
        let mut set = doc! {
            "id": { "$ifNull": ["$id", &fresh.id] },
            "name": &fresh.name,
            "joinedChannel": { "$ifNull": ["$joinedChannel", false] },
            "optedOut": { "$ifNull": ["$optedOut", false] },
            "createdAtMs": { "$ifNull": ["$createdAtMs", fresh.created_at_ms as i64] },
            "updatedAtMs": fresh.updated_at_ms as i64,
        };
        if fresh.email.is_empty() {
            set.insert("email", doc! { "$ifNull": ["$email", ""] });
            set.insert("invalidEmail", doc! { "$ifNull": ["$invalidEmail", false] });
        } else {
            set.insert("email", fresh.email.as_str());
            set.insert(
                "invalidEmail",
                doc! {
                    "$cond": [
                        { "$eq": ["$email", &fresh.email] },
                        { "$ifNull": ["$invalidEmail", false] },
                        false,
                    ]
                },
            );
        }
        let stored = self
            .contacts
            .find_one_and_update(doc! { "phone": &fresh.phone }, vec![doc! { "$set": set }])
            .upsert(true)
            .return_document(ReturnDocument::After)
            .await?
            .ok_or_else(|| Error::message("upsert returned no document"))?;

        Ok(if stored.id == fresh.id {
            Upserted::Created(stored)
        } else {
            Upserted::Updated(stored)
        })
    }

    async fn update(&self, phone: &str, patch: &ContactPatch) -> Result<Option<Contact>> {
        let Some(mut contact) = self.find_one(phone).await? else {
            return Ok(None);
        };
        patch.apply(&mut contact, now_ms());
        match self
            .contacts
            .replace_one(doc! { "phone": phone }, &contact)
            .await
        {
            Ok(r) if r.matched_count == 0 => Ok(None),
            Ok(_) => Ok(Some(contact)),
            Err(e) if is_duplicate_key(&e) => Err(Error::conflict(contact.phone)),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, filter: &ContactFilter) -> Result<u64> {
        Ok(self
            .contacts
            .delete_many(filter_doc(filter))
            .await?
            .deleted_count)
    }

    async fn count(&self, filter: &ContactFilter) -> Result<u64> {
        Ok(self.contacts.count_documents(filter_doc(filter)).await?)
    }

    async fn mark_invalid_emails(&self, emails: &[String]) -> Result<u64> {
        if emails.is_empty() {
            return Ok(0);
        }
        let result = self
            .contacts
            .update_many(
                doc! { "email": { "$in": emails } },
                doc! { "$set": { "invalidEmail": true, "updatedAtMs": now_ms() as i64 } },
            )
            .await?;
        Ok(result.modified_count)
    }
}
