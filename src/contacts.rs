//! Contacts worker
//!
//! A small address book kept as a JSON-lines file, one contact per
//! line in insertion order. It has no relation to the mail sessions.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

/// A contact as supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactInput {
    pub name: String,
    #[serde(default)]
    pub emails: Vec<String>,
    #[serde(default)]
    pub notes: String,
}

/// A stored contact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub id: Uuid,
    pub name: String,
    pub emails: Vec<String>,
    #[serde(default)]
    pub notes: String,
}

/// Address-book access backed by the file at `path`.
pub struct ContactsWorker {
    path: PathBuf,
}

impl ContactsWorker {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All contacts, in the order they were added.
    ///
    /// A store that does not exist yet is empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or a line is not a
    /// valid contact record.
    pub async fn list_contacts(&self) -> Result<Vec<Contact>> {
        let raw = match fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let contacts = raw
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(n, line)| {
                serde_json::from_str(line).map_err(|e| {
                    Error::Storage(format!("{} line {}: {e}", self.path.display(), n + 1))
                })
            })
            .collect::<Result<Vec<Contact>>>()?;

        debug!("Loaded {} contacts", contacts.len());
        Ok(contacts)
    }

    /// Validate and store a new contact, returning it with its id.
    ///
    /// # Errors
    ///
    /// `Validation` if no usable email address is given; IO errors if
    /// the store cannot be written.
    pub async fn add_contact(&self, input: ContactInput) -> Result<Contact> {
        let emails = validate_emails(&input.emails)?;

        let contact = Contact {
            id: Uuid::new_v4(),
            name: input.name.trim().to_string(),
            emails,
            notes: input.notes,
        };

        let mut line = serde_json::to_string(&contact)?;
        line.push('\n');

        let path = self.path.clone();
        tokio::task::spawn_blocking(move || append_record(&path, line.as_bytes()))
            .await
            .map_err(|e| Error::Storage(format!("contact append did not finish: {e}")))??;

        info!("Added contact {}", contact.id);
        Ok(contact)
    }
}

/// Append one complete record to the store, creating it if needed.
///
/// The record goes out in a single `write` on an `O_APPEND` handle, so
/// concurrent appends never interleave within a line.
fn append_record(path: &Path, record: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    file.write_all(record)
}

fn validate_emails(raw: &[String]) -> Result<Vec<String>> {
    let emails: Vec<String> = raw
        .iter()
        .map(|e| e.trim())
        .filter(|e| !e.is_empty())
        .map(ToString::to_string)
        .collect();

    if emails.is_empty() {
        return Err(Error::Validation(
            "a contact needs at least one email address".into(),
        ));
    }

    for email in &emails {
        email
            .parse::<lettre::Address>()
            .map_err(|e| Error::Validation(format!("invalid email '{email}': {e}")))?;
    }
    Ok(emails)
}
