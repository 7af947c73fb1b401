//! Certificate revocation lists
//!
//! Only the parts needed for a login-time check are kept: the issuer name
//! and the revoked serial numbers. The list signature is not verified, the
//! file is expected to come from the same trusted channel as the CA bundle.

use std::path::Path;

use x509_parser::time::ASN1Time;

use crate::certificate::X509Certificate;
use crate::error::{KeyError, Result};

const PEM_CRL_LABEL: &str = "X509 CRL";

/// Parsed certificate revocation list
#[derive(Debug, Clone)]
pub struct RevocationList {
    issuer: String,
    revoked_serials: Vec<Vec<u8>>,
    next_update: Option<i64>,
}

impl RevocationList {
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let (_, crl) = x509_parser::parse_x509_crl(der)
            .map_err(|e| KeyError::RevocationListError(format!("invalid CRL: {e}")))?;

        let revoked_serials = crl
            .iter_revoked_certificates()
            .map(|revoked| normalize_serial(revoked.raw_serial()).to_vec())
            .collect();

        Ok(Self {
            issuer: crl.issuer().to_string(),
            revoked_serials,
            next_update: crl.next_update().map(|t| t.timestamp()),
        })
    }

    pub fn from_pem(pem: &[u8]) -> Result<Self> {
        let (_, block) = x509_parser::pem::parse_x509_pem(pem)
            .map_err(|e| KeyError::RevocationListError(format!("invalid PEM: {e}")))?;
        if block.label != PEM_CRL_LABEL {
            return Err(KeyError::RevocationListError(format!(
                "unexpected PEM label {:?}",
                block.label
            )));
        }
        Self::from_der(&block.contents)
    }

    /// Parse PEM or DER, whichever the bytes look like
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let leading = data.iter().take_while(|b| b.is_ascii_whitespace()).count();
        if data[leading..].starts_with(b"-----BEGIN") {
            Self::from_pem(data)
        } else {
            Self::from_der(data)
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read(path).map_err(|e| KeyError::file_read(path, e))?;
        Self::from_bytes(&data)
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn revoked_count(&self) -> usize {
        self.revoked_serials.len()
    }

    /// Whether the list's next update time has passed
    pub fn is_stale(&self) -> bool {
        self.next_update
            .is_some_and(|next| next < ASN1Time::now().timestamp())
    }

    /// Whether `certificate` is listed.
    ///
    /// A list from a different issuer cannot answer the question and yields
    /// an error rather than `false`.
    pub fn is_revoked(&self, certificate: &X509Certificate) -> Result<bool> {
        if certificate.issuer() != self.issuer {
            return Err(KeyError::RevocationListError(format!(
                "CRL issuer {:?} does not match certificate issuer {:?}",
                self.issuer,
                certificate.issuer()
            )));
        }
        let serial = certificate.serial()?;
        let serial = normalize_serial(&serial);
        Ok(self
            .revoked_serials
            .iter()
            .any(|revoked| revoked.as_slice() == serial))
    }
}

fn normalize_serial(serial: &[u8]) -> &[u8] {
    let start = serial
        .iter()
        .position(|b| *b != 0)
        .unwrap_or(serial.len().saturating_sub(1));
    &serial[start..]
}
