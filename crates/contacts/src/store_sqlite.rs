//! SQLite-backed contact store using sqlx.

use {
    async_trait::async_trait,
    sqlx::{
        QueryBuilder, Row, Sqlite, SqlitePool,
        sqlite::{SqlitePoolOptions, SqliteRow},
    },
};

use crate::{
    Error, Result,
    store::ContactStore,
    types::{Contact, ContactFilter, ContactPatch, NewContact, Upserted, now_ms},
};

const COLUMNS: &str =
    "id, name, phone, email, joined_channel, opted_out, invalid_email, created_at_ms, updated_at_ms";

/// SQLite-backed persistence for contacts.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a store with its own connection pool and run migrations.
    pub async fn new(database_url: &str) -> Result<Self> {
        // Each connection to `sqlite::memory:` is a separate database.
        let max_connections = if database_url.contains(":memory:") {
            1
        } else {
            5
        };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        crate::run_migrations(&pool).await?;

        Ok(Self { pool })
    }

    async fn fetch_by_phone(&self, phone: &str) -> Result<Option<Contact>> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM contacts WHERE phone = ?"))
            .bind(phone)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_contact).transpose()
    }
}

fn row_to_contact(row: &SqliteRow) -> Result<Contact> {
    Ok(Contact {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        phone: row.try_get("phone")?,
        email: row.try_get("email")?,
        joined_channel: row.try_get("joined_channel")?,
        opted_out: row.try_get("opted_out")?,
        invalid_email: row.try_get("invalid_email")?,
        created_at_ms: row.try_get::<i64, _>("created_at_ms")? as u64,
        updated_at_ms: row.try_get::<i64, _>("updated_at_ms")? as u64,
    })
}

fn push_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &ContactFilter) {
    let mut sep = " WHERE ";
    if let Some(phone) = &filter.phone {
        qb.push(sep).push("phone = ").push_bind(phone.clone());
        sep = " AND ";
    }
    if let Some(v) = filter.opted_out {
        qb.push(sep).push("opted_out = ").push_bind(v);
        sep = " AND ";
    }
    if let Some(v) = filter.joined_channel {
        qb.push(sep).push("joined_channel = ").push_bind(v);
        sep = " AND ";
    }
    if let Some(v) = filter.invalid_email {
        qb.push(sep).push("invalid_email = ").push_bind(v);
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[async_trait]
impl ContactStore for SqliteStore {
    async fn find(&self, filter: &ContactFilter) -> Result<Vec<Contact>> {
        let mut qb = QueryBuilder::new(format!("SELECT {COLUMNS} FROM contacts"));
        push_filter(&mut qb, filter);
        qb.push(" ORDER BY created_at_ms, id");
        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_contact).collect()
    }

    async fn find_one(&self, phone: &str) -> Result<Option<Contact>> {
        self.fetch_by_phone(phone).await
    }

    async fn insert(&self, contact: NewContact) -> Result<Contact> {
        let contact = contact.into_contact(now_ms());
        let result = sqlx::query(&format!(
            "INSERT INTO contacts ({COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(&contact.id)
        .bind(&contact.name)
        .bind(&contact.phone)
        .bind(&contact.email)
        .bind(contact.joined_channel)
        .bind(contact.opted_out)
        .bind(contact.invalid_email)
        .bind(contact.created_at_ms as i64)
        .bind(contact.updated_at_ms as i64)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(contact),
            Err(e) if is_unique_violation(&e) => Err(Error::conflict(contact.phone)),
            Err(e) => Err(e.into()),
        }
    }

    async fn upsert(&self, contact: NewContact) -> Result<Upserted> {
        let fresh = contact.into_contact(now_ms());
        let row = sqlx::query(&format!(
            "INSERT INTO contacts ({COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(phone) DO UPDATE SET
                 name = excluded.name,
                 email = CASE WHEN excluded.email <> '' THEN excluded.email ELSE contacts.email END,
                 invalid_email = CASE
                     WHEN excluded.email <> '' AND excluded.email <> contacts.email THEN 0
                     ELSE contacts.invalid_email
                 END,
                 updated_at_ms = excluded.updated_at_ms
             RETURNING {COLUMNS}"
        ))
        .bind(&fresh.id)
        .bind(&fresh.name)
        .bind(&fresh.phone)
        .bind(&fresh.email)
        .bind(fresh.joined_channel)
        .bind(fresh.opted_out)
        .bind(fresh.invalid_email)
        .bind(fresh.created_at_ms as i64)
        .bind(fresh.updated_at_ms as i64)
        .fetch_one(&self.pool)
        .await?;

        let stored = row_to_contact(&row)?;
        Ok(if stored.id == fresh.id {
            Upserted::Created(stored)
        } else {
            Upserted::Updated(stored)
        })
    }

    async fn update(&self, phone: &str, patch: &ContactPatch) -> Result<Option<Contact>> {
        let Some(mut contact) = self.fetch_by_phone(phone).await? else {
            return Ok(None);
        };
        patch.apply(&mut contact, now_ms());

        let result = sqlx::query(
            "UPDATE contacts
             SET name = ?, phone = ?, email = ?, joined_channel = ?, opted_out = ?,
                 invalid_email = ?, updated_at_ms = ?
             WHERE id = ?",
        )
        .bind(&contact.name)
        .bind(&contact.phone)
        .bind(&contact.email)
        .bind(contact.joined_channel)
        .bind(contact.opted_out)
        .bind(contact.invalid_email)
        .bind(contact.updated_at_ms as i64)
        .bind(&contact.id)
        .execute(&self.pool)
        .await;

        match result {
            Ok(r) if r.rows_affected() == 0 => Ok(None),
            Ok(_) => Ok(Some(contact)),
            Err(e) if is_unique_violation(&e) => Err(Error::conflict(contact.phone)),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, filter: &ContactFilter) -> Result<u64> {
        let mut qb = QueryBuilder::new("DELETE FROM contacts");
        push_filter(&mut qb, filter);
        let result = qb.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn count(&self, filter: &ContactFilter) -> Result<u64> {
        let mut qb = QueryBuilder::new("SELECT COUNT(*) AS n FROM contacts");
        push_filter(&mut qb, filter);
        let row = qb.build().fetch_one(&self.pool).await?;
        Ok(row.try_get::<i64, _>("n")? as u64)
    }

    async fn mark_invalid_emails(&self, emails: &[String]) -> Result<u64> {
        if emails.is_empty() {
            return Ok(0);
        }
        let mut qb = QueryBuilder::new("UPDATE contacts SET invalid_email = 1, updated_at_ms = ");
        qb.push_bind(now_ms() as i64);
        qb.push(" WHERE email IN (");
        let mut list = qb.separated(", ");
        for email in emails {
            list.push_bind(email.clone());
        }
        list.push_unseparated(")");
        let result = qb.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}
