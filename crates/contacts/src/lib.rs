//! Contact records: validation, storage backends, and the vCard/CSV exports.
//!
//! Storage is SQLite by default. Building with the `mongodb` feature adds a
//! document-database backend selected by a `mongodb://` URL.

pub mod error;
pub mod export;
pub mod import;
pub mod store;
#[cfg(feature = "mongodb")]
pub mod store_mongo;
pub mod store_memory;
pub mod store_sqlite;
pub mod types;
pub mod validate;
pub mod vcard;

use std::sync::Arc;

pub use {
    error::{Error, Result},
    export::{ContactCardExport, ExportWriter},
    import::{ImportSummary, import_vcards},
    store::ContactStore,
    types::{Contact, ContactFilter, ContactPatch, NewContact, Upserted},
};

/// Run database migrations for the contacts table.
pub async fn run_migrations(pool: &sqlx::SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .set_ignore_missing(true)
        .run(pool)
        .await?;
    Ok(())
}

/// Open the store selected by `url`.
///
/// `database` names the database for document-database backends and is
/// ignored for SQLite.
pub async fn open_store(url: &str, database: &str) -> Result<Arc<dyn ContactStore>> {
    if url.starts_with("mongodb://") || url.starts_with("mongodb+srv://") {
        #[cfg(feature = "mongodb")]
        {
            let store = store_mongo::MongoStore::connect(url, database).await?;
            return Ok(Arc::new(store));
        }
        #[cfg(not(feature = "mongodb"))]
        {
            return Err(Error::message(
                "MongoDB URL configured but rollcall was built without the `mongodb` feature",
            ));
        }
    }
    let _ = database;
    Ok(Arc::new(store_sqlite::SqliteStore::new(url).await?))
}
