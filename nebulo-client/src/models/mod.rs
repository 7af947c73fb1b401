//! Wire models exchanged with the nebulo server

pub mod channel;
pub mod contact;
pub mod message;
pub mod user;

use serde::{Deserialize, Deserializer, Serialize};

pub use channel::{Channel, ChannelCreateRequest};
pub use contact::Contact;
pub use message::{IncomingMessage, MessageCreateRequest, OutgoingMessage, ReadMessage};
pub use user::User;

/// Answer of the `version` endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerVersion {
    pub build_version: String,
    pub build_time: String,
}

/// Read `null` as the default value. The server writes empty lists and
/// absent objects as `null`.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
