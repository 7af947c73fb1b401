//! Secure message envelope codec
//!
//! Every (message, recipient) pair gets its own envelope:
//!
//! 1. 64 bytes of fresh key material (AES-256 key || HMAC-SHA256 key)
//! 2. `ciphertext` = AES-256-GCM(payload)
//! 3. `wrapped_key_material` = RSA-OAEP-SHA256(key material) under the
//!    recipient public key
//! 4. `integrity_tag` = HMAC-SHA256 over the wrapped key material and the
//!    ciphertext
//!
//! Decryption verifies the tag before touching the ciphertext. Key material
//! is never shared between recipients of the same message.

use rand::rngs::OsRng;
use rand::RngCore;
use rsa::traits::PublicKeyParts;
use rsa::Oaep;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::encryption::{self, MAC_KEY_LEN, SYMMETRIC_KEY_LEN, TAG_LEN};
use crate::error::{KeyError, Result};
use crate::keys::{IdentityKey, RecipientKey};

const KEY_MATERIAL_LEN: usize = SYMMETRIC_KEY_LEN + MAC_KEY_LEN;
const TAG_CONTEXT: &[u8] = b"nebulo-envelope-v1";

/// Encrypted message for a single recipient.
///
/// Serialized with the field names used on the wire (`message`, `keys`,
/// `integrity`), byte fields as standard base64.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SecureEnvelope {
    #[serde(rename = "message", with = "base64_bytes")]
    ciphertext: Vec<u8>,
    #[serde(rename = "keys", with = "base64_bytes")]
    wrapped_key_material: Vec<u8>,
    #[serde(rename = "integrity", with = "base64_bytes")]
    integrity_tag: Vec<u8>,
}

impl SecureEnvelope {
    /// Rebuild an envelope received from the network
    pub fn from_parts(
        ciphertext: Vec<u8>,
        wrapped_key_material: Vec<u8>,
        integrity_tag: Vec<u8>,
    ) -> Self {
        Self {
            ciphertext,
            wrapped_key_material,
            integrity_tag,
        }
    }

    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    pub fn wrapped_key_material(&self) -> &[u8] {
        &self.wrapped_key_material
    }

    pub fn integrity_tag(&self) -> &[u8] {
        &self.integrity_tag
    }

    /// Decompose into `(ciphertext, wrapped_key_material, integrity_tag)`
    pub fn into_parts(self) -> (Vec<u8>, Vec<u8>, Vec<u8>) {
        (self.ciphertext, self.wrapped_key_material, self.integrity_tag)
    }
}

/// Encrypt `plaintext` for a single recipient
pub fn encrypt(plaintext: &[u8], recipient: &RecipientKey) -> Result<SecureEnvelope> {
    let mut key_material = Zeroizing::new([0u8; KEY_MATERIAL_LEN]);
    OsRng.fill_bytes(&mut key_material[..]);
    let (enc_key, mac_key) = split_key_material(&key_material[..])?;

    let ciphertext = encryption::encrypt(&enc_key, plaintext)?;
    let wrapped_key_material = recipient
        .rsa()
        .encrypt(&mut OsRng, Oaep::new::<Sha256>(), &key_material[..])
        .map_err(|e| KeyError::EncryptionError(format!("key wrapping failed: {e}")))?;
    let integrity_tag = encryption::compute_tag(
        &mac_key,
        &[TAG_CONTEXT, wrapped_key_material.as_slice(), ciphertext.as_slice()],
    )?;

    Ok(SecureEnvelope {
        ciphertext,
        wrapped_key_material,
        integrity_tag,
    })
}

/// Verify and decrypt an envelope addressed to `identity`.
///
/// A wrapped key that fails OAEP unwrapping is reported as an integrity
/// failure, the same as a bad tag: both mean the envelope was altered or was
/// not produced for this identity.
pub fn decrypt(envelope: &SecureEnvelope, identity: &IdentityKey) -> Result<Vec<u8>> {
    let modulus_len = identity.rsa().size();
    if envelope.wrapped_key_material.len() != modulus_len {
        return Err(KeyError::MalformedEnvelope(format!(
            "wrapped key material is {} bytes, expected {modulus_len}",
            envelope.wrapped_key_material.len()
        )));
    }
    if envelope.integrity_tag.len() != TAG_LEN {
        return Err(KeyError::MalformedEnvelope(format!(
            "integrity tag is {} bytes, expected {TAG_LEN}",
            envelope.integrity_tag.len()
        )));
    }

    let unwrapped = Zeroizing::new(
        identity
            .rsa()
            .decrypt_blinded(
                &mut OsRng,
                Oaep::new::<Sha256>(),
                &envelope.wrapped_key_material,
            )
            .map_err(|_| KeyError::IntegrityCheckFailed)?,
    );
    if unwrapped.len() != KEY_MATERIAL_LEN {
        return Err(KeyError::MalformedEnvelope(format!(
            "unwrapped key material is {} bytes, expected {KEY_MATERIAL_LEN}",
            unwrapped.len()
        )));
    }
    let (enc_key, mac_key) = split_key_material(unwrapped.as_slice())?;

    encryption::verify_tag(
        &mac_key,
        &[
            TAG_CONTEXT,
            envelope.wrapped_key_material.as_slice(),
            envelope.ciphertext.as_slice(),
        ],
        &envelope.integrity_tag,
    )?;

    encryption::decrypt(&enc_key, &envelope.ciphertext)
}

fn split_key_material(
    material: &[u8],
) -> Result<(
    Zeroizing<[u8; SYMMETRIC_KEY_LEN]>,
    Zeroizing<[u8; MAC_KEY_LEN]>,
)> {
    let (enc, mac) = material.split_at(SYMMETRIC_KEY_LEN);
    let enc: [u8; SYMMETRIC_KEY_LEN] = enc
        .try_into()
        .map_err(|_| KeyError::MalformedEnvelope("invalid encryption key length".to_string()))?;
    let mac: [u8; MAC_KEY_LEN] = mac
        .try_into()
        .map_err(|_| KeyError::MalformedEnvelope("invalid MAC key length".to_string()))?;
    Ok((Zeroizing::new(enc), Zeroizing::new(mac)))
}

/// Serde adapter writing byte fields as standard base64 strings
pub mod base64_bytes {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    /// `null` reads as no bytes
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_wire_field_names() {
        let envelope = SecureEnvelope::from_parts(vec![1, 2], vec![3], vec![4, 5, 6]);
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["message"], "AQI=");
        assert_eq!(json["keys"], "Aw==");
        assert_eq!(json["integrity"], "BAUG");

        let back: SecureEnvelope = serde_json::from_value(json).unwrap();
        assert_eq!(back, envelope);
    }

    #[test]
    fn test_null_byte_fields_decode_as_malformed() {
        let raw = r#"{"message": "AQI=", "keys": null, "integrity": null}"#;
        let envelope: SecureEnvelope = serde_json::from_str(raw).unwrap();
        assert_eq!(envelope.ciphertext(), &[1, 2]);
        assert!(envelope.wrapped_key_material().is_empty());

        let identity = IdentityKey::generate_default().unwrap();
        let err = decrypt(&envelope, &identity).unwrap_err();
        assert!(matches!(err, KeyError::MalformedEnvelope(_)));
    }

    #[test]
    fn test_wrapped_key_length_mismatch_is_malformed() {
        let identity = IdentityKey::generate_default().unwrap();
        let mut envelope = encrypt(b"hello", identity.public_key()).unwrap();
        envelope.wrapped_key_material.truncate(10);

        let err = decrypt(&envelope, &identity).unwrap_err();
        assert!(matches!(err, KeyError::MalformedEnvelope(_)));
    }

    #[test]
    fn test_truncated_tag_is_malformed() {
        let identity = IdentityKey::generate_default().unwrap();
        let mut envelope = encrypt(b"hello", identity.public_key()).unwrap();
        envelope.integrity_tag.pop();

        let err = decrypt(&envelope, &identity).unwrap_err();
        assert!(matches!(err, KeyError::MalformedEnvelope(_)));
    }

    #[test]
    fn test_fresh_key_material_per_call() {
        let identity = IdentityKey::generate_default().unwrap();
        let first = encrypt(b"same", identity.public_key()).unwrap();
        let second = encrypt(b"same", identity.public_key()).unwrap();
        assert_ne!(first.wrapped_key_material, second.wrapped_key_material);
        assert_ne!(first.ciphertext, second.ciphertext);
    }
}
