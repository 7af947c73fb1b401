//! Symmetric primitives used by the message envelope.
//!
//! * AES-256-GCM for the payload, with a random 96-bit nonce prepended to the
//!   ciphertext.
//! * HMAC-SHA256 for the envelope integrity tag, verified in constant time.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{KeyError, Result};

pub const SYMMETRIC_KEY_LEN: usize = 32;
pub const MAC_KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 32;

type HmacSha256 = Hmac<Sha256>;

/* -------------------------------------------------------------------------
 * Payload encryption
 * ---------------------------------------------------------------------- */

/// Encrypt `plaintext`, returning `nonce || ciphertext`
pub fn encrypt(key: &[u8; SYMMETRIC_KEY_LEN], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| KeyError::EncryptionError(format!("AES init failed: {e}")))?;
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| KeyError::EncryptionError(format!("AES encryption failed: {e}")))?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt data produced by [`encrypt`]
pub fn decrypt(key: &[u8; SYMMETRIC_KEY_LEN], data: &[u8]) -> Result<Vec<u8>> {
    if data.len() < NONCE_LEN {
        return Err(KeyError::MalformedEnvelope(
            "ciphertext shorter than its nonce".to_string(),
        ));
    }
    let (nonce, ciphertext) = data.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| KeyError::EncryptionError(format!("AES init failed: {e}")))?;
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| KeyError::IntegrityCheckFailed)
}

/* -------------------------------------------------------------------------
 * Integrity tag
 * ---------------------------------------------------------------------- */

fn tag_mac(key: &[u8; MAC_KEY_LEN], parts: &[&[u8]]) -> Result<HmacSha256> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|e| KeyError::EncryptionError(format!("HMAC init failed: {e}")))?;
    for part in parts {
        // Length prefixes keep the boundaries between parts unambiguous.
        mac.update(&(part.len() as u64).to_be_bytes());
        mac.update(part);
    }
    Ok(mac)
}

/// Compute the integrity tag over `parts`
pub fn compute_tag(key: &[u8; MAC_KEY_LEN], parts: &[&[u8]]) -> Result<Vec<u8>> {
    Ok(tag_mac(key, parts)?.finalize().into_bytes().to_vec())
}

/// Verify `tag` over `parts` in constant time
pub fn verify_tag(key: &[u8; MAC_KEY_LEN], parts: &[&[u8]], tag: &[u8]) -> Result<()> {
    tag_mac(key, parts)?
        .verify_slice(tag)
        .map_err(|_| KeyError::IntegrityCheckFailed)
}
