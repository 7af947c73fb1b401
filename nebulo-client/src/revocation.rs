//! Revocation checks consulted during login
//!
//! A checker answers "is this certificate revoked"; an error means the
//! status could not be determined, which blocks login just like a positive
//! answer would.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use nebulo_keys::{RevocationList, X509Certificate};

use crate::config::Options;
use crate::error::{ClientError, Result};

#[async_trait]
pub trait RevocationChecker: Send + Sync {
    /// `Ok(true)` when revoked, `Err(RevocationUnknown)` when undecidable
    async fn is_revoked(&self, certificate: &X509Certificate) -> Result<bool>;
}

/// Checks against a CRL file that is re-read on every call
#[derive(Debug, Clone)]
pub struct CrlRevocationChecker {
    path: PathBuf,
}

impl CrlRevocationChecker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RevocationChecker for CrlRevocationChecker {
    async fn is_revoked(&self, certificate: &X509Certificate) -> Result<bool> {
        let data = tokio::fs::read(&self.path).await.map_err(|e| {
            ClientError::RevocationUnknown(format!("unable to read {:?}: {e}", self.path))
        })?;
        let list = RevocationList::from_bytes(&data)
            .map_err(|e| ClientError::RevocationUnknown(e.to_string()))?;
        if list.is_stale() {
            log::warn!(
                "revocation list {:?} from {} is past its next update",
                self.path,
                list.issuer()
            );
        }

        let revoked = list
            .is_revoked(certificate)
            .map_err(|e| ClientError::RevocationUnknown(e.to_string()))?;
        log::debug!(
            "checked {} against {} revoked entries: revoked={revoked}",
            certificate.subject(),
            list.revoked_count()
        );
        Ok(revoked)
    }
}

/// Accepts every certificate
#[derive(Debug, Clone, Copy, Default)]
pub struct UncheckedRevocation;

#[async_trait]
impl RevocationChecker for UncheckedRevocation {
    async fn is_revoked(&self, certificate: &X509Certificate) -> Result<bool> {
        log::warn!(
            "no revocation list configured, {} is trusted without a revocation check",
            certificate.subject()
        );
        Ok(false)
    }
}

/// CRL checker when `run.tls.crl` is set, otherwise [`UncheckedRevocation`]
pub fn checker_from_options(options: &Options) -> Arc<dyn RevocationChecker> {
    match options.run.tls.crl_path() {
        Some(path) => Arc::new(CrlRevocationChecker::new(path)),
        None => Arc::new(UncheckedRevocation),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nebulo_keys::{CertificateRequest, IdentityKey, SubjectFields};
    use rcgen::{
        BasicConstraints, Certificate, CertificateParams, CertificateRevocationListParams,
        CertificateSigningRequest, DnType, IsCa, KeyIdMethod, KeyUsagePurpose, RevokedCertParams,
        SerialNumber,
    };
    use tempfile::TempDir;

    fn ca() -> Certificate {
        let mut params = CertificateParams::new(Vec::<String>::new());
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
        params
            .distinguished_name
            .push(DnType::CommonName, "Revocation Test CA");
        Certificate::from_params(params).unwrap()
    }

    fn issue(ca: &Certificate, serial: u64) -> X509Certificate {
        let key = IdentityKey::generate_default().unwrap();
        let csr = CertificateRequest::create(&key, &SubjectFields::default()).unwrap();
        let mut csr = CertificateSigningRequest::from_pem(&csr).unwrap();
        csr.params.serial_number = Some(SerialNumber::from(serial));
        let pem = csr.serialize_pem_with_signer(ca).unwrap();
        X509Certificate::from_pem(pem.as_bytes()).unwrap()
    }

    fn crl(ca: &Certificate, revoked: &[u64]) -> String {
        let params = CertificateRevocationListParams {
            this_update: rcgen::date_time_ymd(2024, 1, 1),
            next_update: rcgen::date_time_ymd(2099, 1, 1),
            crl_number: SerialNumber::from(1u64),
            issuing_distribution_point: None,
            revoked_certs: revoked
                .iter()
                .map(|serial| RevokedCertParams {
                    serial_number: SerialNumber::from(*serial),
                    revocation_time: rcgen::date_time_ymd(2024, 1, 2),
                    reason_code: None,
                    invalidity_date: None,
                })
                .collect(),
            alg: &rcgen::PKCS_ECDSA_P256_SHA256,
            key_identifier_method: KeyIdMethod::Sha256,
        };
        rcgen::CertificateRevocationList::from_params(params)
            .unwrap()
            .serialize_pem_with_signer(ca)
            .unwrap()
    }

    #[tokio::test]
    async fn test_crl_checker() {
        let dir = TempDir::new().unwrap();
        let ca = ca();
        let good = issue(&ca, 10);
        let bad = issue(&ca, 11);
        let path = dir.path().join("clients.crl");
        std::fs::write(&path, crl(&ca, &[11])).unwrap();

        let checker = CrlRevocationChecker::new(&path);
        assert!(!checker.is_revoked(&good).await.unwrap());
        assert!(checker.is_revoked(&bad).await.unwrap());

        // The file is re-read, so an updated list takes effect immediately
        std::fs::write(&path, crl(&ca, &[10, 11])).unwrap();
        assert!(checker.is_revoked(&good).await.unwrap());
    }

    #[tokio::test]
    async fn test_unreadable_crl_is_unknown() {
        let dir = TempDir::new().unwrap();
        let ca = ca();
        let cert = issue(&ca, 3);

        let missing = CrlRevocationChecker::new(dir.path().join("missing.crl"));
        assert!(matches!(
            missing.is_revoked(&cert).await,
            Err(ClientError::RevocationUnknown(_))
        ));

        let garbage_path = dir.path().join("garbage.crl");
        std::fs::write(&garbage_path, b"garbage").unwrap();
        let garbage = CrlRevocationChecker::new(&garbage_path);
        assert!(matches!(
            garbage.is_revoked(&cert).await,
            Err(ClientError::RevocationUnknown(_))
        ));
    }

    #[tokio::test]
    async fn test_unchecked_accepts() {
        let cert = issue(&ca(), 4);
        assert!(!UncheckedRevocation.is_revoked(&cert).await.unwrap());
    }
}
