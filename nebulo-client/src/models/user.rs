use chrono::{DateTime, Utc};
use nebulo_keys::RecipientKey;
use serde::{Deserialize, Serialize};

use super::contact::Contact;
use crate::error::Result;

/// Profile of a user as returned by the server
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct User {
    pub key_fingerprint: String,
    pub display_name: String,
    pub signup: DateTime<Utc>,
    pub login_first: DateTime<Utc>,
    pub login_last: DateTime<Utc>,
    pub public_key_der_b64: String,
    #[serde(deserialize_with = "super::null_as_default")]
    pub contacts: Vec<Contact>,
}

impl User {
    /// Public key to seal messages for this user
    pub fn recipient_key(&self) -> Result<RecipientKey> {
        Ok(RecipientKey::from_base64(&self.public_key_der_b64)?)
    }

    /// Display name, or the fingerprint when the user has none
    pub fn label(&self) -> &str {
        if self.display_name.is_empty() {
            &self.key_fingerprint
        } else {
            &self.display_name
        }
    }
}
