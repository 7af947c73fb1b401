//! Local contact list
//!
//! Stored as a JSON array next to the configuration. Only the local user
//! reads it; the server never sees it.

use std::path::Path;

use nebulo_keys::RecipientKey;
use serde::{Deserialize, Serialize};

use crate::error::{ClientError, Result};
use crate::files::{write_restricted, OWNER_READ_WRITE};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub name: String,
    pub public_key_b64: String,
}

/// Read the contact list
pub fn load_contacts(path: &Path) -> Result<Vec<Contact>> {
    let raw = std::fs::read(path).map_err(|e| {
        ClientError::Configuration(format!("unable to read contacts file {path:?}: {e}"))
    })?;
    Ok(serde_json::from_slice(&raw)?)
}

/// Append a contact and rewrite the file.
///
/// An unreadable file is replaced. The public key must be a usable
/// recipient key.
pub fn add_contact(path: &Path, name: &str, public_key_b64: &str) -> Result<Vec<Contact>> {
    RecipientKey::from_base64(public_key_b64)?;

    let mut contacts = load_contacts(path).unwrap_or_else(|e| {
        log::warn!("unable to load contacts from {path:?}: {e}, save will replace file content");
        Vec::new()
    });
    contacts.push(Contact {
        name: name.to_string(),
        public_key_b64: public_key_b64.to_string(),
    });

    let raw = serde_json::to_vec_pretty(&contacts)?;
    write_restricted(path, &raw, OWNER_READ_WRITE)?;
    Ok(contacts)
}
