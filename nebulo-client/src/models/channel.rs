use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::user::User;

/// A conversation between members
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Channel {
    pub name: String,
    pub created: DateTime<Utc>,
    #[serde(deserialize_with = "super::null_as_default")]
    pub creator: User,
    #[serde(deserialize_with = "super::null_as_default")]
    pub members: Vec<User>,
    pub members_can_edit: bool,
    pub members_can_invite: bool,
}

impl Channel {
    /// Whether `public_key_der_b64` belongs to one of the members
    pub fn has_member(&self, public_key_der_b64: &str) -> bool {
        self.members
            .iter()
            .any(|m| m.public_key_der_b64 == public_key_der_b64)
    }
}

/// Body of the channel creation call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelCreateRequest {
    pub name: String,
    pub members_public_key: Vec<String>,
}
