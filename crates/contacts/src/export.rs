//! The shared contact-card file and the admin CSV export.
//!
//! The vCard file is derived data: registrations append to it, and it is
//! rebuilt from the store whenever records change in other ways. Writers go
//! through an [`ExportWriter`], which holds the file lock. A rebuild reads the
//! store and a registration inserts into it while holding that lock, so every
//! contact lands in the file exactly once.

use std::path::{Path, PathBuf};

use {
    tokio::{
        fs,
        io::AsyncWriteExt,
        sync::{Mutex, MutexGuard},
    },
    tracing::debug,
};

use crate::{Result, types::Contact, vcard};

pub const VCARD_MIME: &str = "text/vcard";

pub struct ContactCardExport {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl ContactCardExport {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name used when the export is attached to a message or email.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("contacts.vcf")
            .to_string()
    }

    /// Exclusive write access until the returned writer is dropped.
    pub async fn writer(&self) -> ExportWriter<'_> {
        ExportWriter {
            export: self,
            _guard: self.write_lock.lock().await,
        }
    }

    /// Current file contents; a missing file reads as empty.
    pub async fn read(&self) -> Result<Vec<u8>> {
        let _guard = self.write_lock.lock().await;
        match fs::read(&self.path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn ensure_parent(&self) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

/// Holds the export's write lock.
pub struct ExportWriter<'a> {
    export: &'a ContactCardExport,
    _guard: MutexGuard<'a, ()>,
}

impl ExportWriter<'_> {
    pub async fn append(&self, contact: &Contact) -> Result<()> {
        let path = &self.export.path;
        self.export.ensure_parent().await?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(vcard::render_card(contact).as_bytes())
            .await?;
        file.flush().await?;
        debug!(path = %path.display(), phone = %contact.phone, "appended contact card");
        Ok(())
    }

    /// Replace the file with exactly `contacts`. Returns the card count.
    pub async fn regenerate(&self, contacts: &[Contact]) -> Result<usize> {
        let path = &self.export.path;
        self.export.ensure_parent().await?;
        let tmp = path.with_extension("vcf.tmp");
        fs::write(&tmp, vcard::render_cards(contacts)).await?;
        fs::rename(&tmp, path).await?;
        debug!(path = %path.display(), count = contacts.len(), "regenerated contact file");
        Ok(contacts.len())
    }
}

const CSV_HEADER: &str = "name,phone,email,joinedChannel,optedOut,invalidEmail,registeredAt";

/// Render contacts as CSV: header first, then one row per contact.
pub fn render_csv(contacts: &[Contact]) -> String {
    let mut out = String::with_capacity(64 * (contacts.len() + 1));
    out.push_str(CSV_HEADER);
    out.push_str("\r\n");
    for c in contacts {
        let registered = chrono::DateTime::from_timestamp_millis(c.created_at_ms as i64)
            .map(|t| t.to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
            .unwrap_or_default();
        let row = [
            csv_field(&c.name),
            csv_field(&c.phone),
            csv_field(&c.email),
            c.joined_channel.to_string(),
            c.opted_out.to_string(),
            c.invalid_email.to_string(),
            registered,
        ];
        out.push_str(&row.join(","));
        out.push_str("\r\n");
    }
    out
}

fn csv_field(value: &str) -> String {
    // Spreadsheet apps evaluate cells starting with these as formulas.
    let guarded = if value.starts_with(['=', '+', '-', '@']) {
        format!("'{value}")
    } else {
        value.to_string()
    };
    if guarded.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", guarded.replace('"', "\"\""))
    } else {
        guarded
    }
}
