use chrono::{DateTime, Utc};
use nebulo_keys::SecureEnvelope;
use serde::{Deserialize, Serialize};

use super::channel::Channel;
use super::user::User;
use crate::error::Result;

/// One sealed copy of a message, addressed to a single member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub message: SecureEnvelope,
    /// Recipient public key, base64 DER, exactly as published by the server
    pub receiver_pkey: String,
}

/// Body of the message creation call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageCreateRequest {
    pub channel_name: String,
    pub messages: Vec<OutgoingMessage>,
}

/// A message as listed by the server: the copy sealed for the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingMessage {
    #[serde(flatten)]
    pub envelope: SecureEnvelope,
    #[serde(default, deserialize_with = "super::null_as_default")]
    pub channel: Channel,
    #[serde(default, deserialize_with = "super::null_as_default")]
    pub sender: User,
    #[serde(default)]
    pub posted: DateTime<Utc>,
}

/// Outcome of opening one listed message
#[derive(Debug)]
pub struct ReadMessage {
    pub sender: User,
    pub posted: DateTime<Utc>,
    pub plaintext: Result<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outgoing_wire_format() {
        let request = MessageCreateRequest {
            channel_name: "general".to_string(),
            messages: vec![OutgoingMessage {
                message: SecureEnvelope::from_parts(vec![1], vec![2], vec![3]),
                receiver_pkey: "cGtleQ==".to_string(),
            }],
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["channel_name"], "general");
        assert_eq!(json["messages"][0]["receiver_pkey"], "cGtleQ==");
        assert_eq!(json["messages"][0]["message"]["message"], "AQ==");
        assert_eq!(json["messages"][0]["message"]["keys"], "Ag==");
        assert_eq!(json["messages"][0]["message"]["integrity"], "Aw==");
    }

    #[test]
    fn test_incoming_envelope_is_flattened() {
        let raw = r#"{
            "message": "AQ==",
            "keys": "Ag==",
            "integrity": "Aw==",
            "sender": {"display_name": "bob"},
            "posted": "2017-06-03T08:30:00Z"
        }"#;
        let incoming: IncomingMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(incoming.envelope.ciphertext(), &[1]);
        assert_eq!(incoming.envelope.wrapped_key_material(), &[2]);
        assert_eq!(incoming.envelope.integrity_tag(), &[3]);
        assert_eq!(incoming.sender.display_name, "bob");
        assert!(incoming.channel.name.is_empty());
    }

    #[test]
    fn test_incoming_null_fields() {
        let raw = r#"{
            "message": "AQ==",
            "keys": null,
            "integrity": null,
            "channel": null,
            "sender": {"display_name": "bob", "contacts": null},
            "posted": "2017-06-03T08:30:00Z"
        }"#;
        let incoming: IncomingMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(incoming.envelope.ciphertext(), &[1]);
        assert!(incoming.envelope.wrapped_key_material().is_empty());
        assert!(incoming.envelope.integrity_tag().is_empty());
        assert!(incoming.channel.members.is_empty());
        assert_eq!(incoming.sender.display_name, "bob");
    }
}
