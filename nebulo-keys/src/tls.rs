//! Mutual-TLS client context
//!
//! The CA trust file is mandatory. A client identity (certificate + private
//! key) is optional: when it cannot be loaded the context is still built,
//! without client authentication, so unauthenticated calls keep working and
//! authenticated ones fail later at the server.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::{ClientConfig, RootCertStore};
use rustls_pki_types::CertificateDer;
use zeroize::Zeroizing;

use crate::certificate::{certificates_from_pem, X509Certificate};
use crate::error::{KeyError, Result};
use crate::keys::IdentityKey;

/// Immutable client TLS configuration plus the identity it was built with
#[derive(Clone)]
pub struct TlsContext {
    config: Arc<ClientConfig>,
    ca_certificates: Vec<X509Certificate>,
    client_certificate: Option<X509Certificate>,
    client_key: Option<IdentityKey>,
}

impl TlsContext {
    /// rustls configuration to hand to the HTTP client
    pub fn client_config(&self) -> Arc<ClientConfig> {
        self.config.clone()
    }

    /// Whether the context presents a client certificate during the handshake
    pub fn has_client_auth(&self) -> bool {
        self.client_certificate.is_some() && self.client_key.is_some()
    }

    pub fn ca_certificates(&self) -> &[X509Certificate] {
        &self.ca_certificates
    }

    /// Client certificate, present even when its key could not be loaded
    pub fn client_certificate(&self) -> Option<&X509Certificate> {
        self.client_certificate.as_ref()
    }

    pub fn client_key(&self) -> Option<&IdentityKey> {
        self.client_key.as_ref()
    }
}

impl fmt::Debug for TlsContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsContext")
            .field("ca_certificates", &self.ca_certificates.len())
            .field(
                "client_certificate",
                &self.client_certificate.as_ref().map(X509Certificate::subject),
            )
            .field("has_client_auth", &self.has_client_auth())
            .finish()
    }
}

/// Builder for [`TlsContext`]
#[derive(Clone, Default)]
pub struct TlsContextBuilder {
    ca_file: PathBuf,
    cert_file: Option<PathBuf>,
    key_file: Option<PathBuf>,
    key_password: Option<Zeroizing<String>>,
}

impl TlsContextBuilder {
    pub fn new(ca_file: impl Into<PathBuf>) -> Self {
        Self {
            ca_file: ca_file.into(),
            ..Default::default()
        }
    }

    /// Client certificate chain (PEM). Empty paths are ignored.
    pub fn with_client_certificate(mut self, cert_file: impl Into<PathBuf>) -> Self {
        self.cert_file = non_empty_path(cert_file.into());
        self
    }

    /// Client private key (PEM) and its optional password. Empty paths are ignored.
    pub fn with_client_key(mut self, key_file: impl Into<PathBuf>, password: Option<&str>) -> Self {
        self.key_file = non_empty_path(key_file.into());
        self.key_password = password
            .filter(|p| !p.is_empty())
            .map(|p| Zeroizing::new(p.to_string()));
        self
    }

    /// Build the context.
    ///
    /// Errors only when the CA trust file cannot be read or holds no usable
    /// certificate. Client identity problems are logged and leave the context
    /// without client authentication.
    pub fn build(&self) -> Result<TlsContext> {
        let (roots, ca_certificates) = load_roots(&self.ca_file)?;

        let builder = ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_protocol_versions(&[&rustls::version::TLS13, &rustls::version::TLS12])?
        .with_root_certificates(roots);

        let client_certificate = match &self.cert_file {
            Some(path) => match X509Certificate::from_pem_file(path) {
                Ok(cert) => Some(cert),
                Err(e) => {
                    log::warn!("client certificate {path:?} unusable: {e}");
                    None
                }
            },
            None => None,
        };

        let identity = match (&client_certificate, &self.key_file) {
            (Some(_), Some(key_path)) => match self.load_client_identity(key_path) {
                Ok(identity) => Some(identity),
                Err(e) => {
                    log::warn!("client key {key_path:?} unusable, continuing without client authentication: {e}");
                    None
                }
            },
            (None, Some(key_path)) => {
                log::warn!("client key {key_path:?} configured without a certificate, ignoring it");
                None
            }
            _ => None,
        };

        let (config, client_key) = match identity {
            Some((chain, key)) => {
                let der = key.to_rustls_private_key()?;
                match builder.clone().with_client_auth_cert(chain, der) {
                    Ok(config) => (config, Some(key)),
                    Err(e) => {
                        log::warn!("client identity rejected by TLS stack: {e}");
                        (builder.with_no_client_auth(), None)
                    }
                }
            }
            None => (builder.with_no_client_auth(), None),
        };

        let context = TlsContext {
            config: Arc::new(config),
            ca_certificates,
            client_certificate,
            client_key,
        };
        log::debug!("built {context:?}");
        Ok(context)
    }

    fn load_client_identity(
        &self,
        key_path: &Path,
    ) -> Result<(Vec<CertificateDer<'static>>, IdentityKey)> {
        let cert_path = self.cert_file.as_deref().ok_or_else(|| {
            KeyError::CertificateError("no client certificate configured".to_string())
        })?;
        let pem = std::fs::read(cert_path).map_err(|e| KeyError::file_read(cert_path, e))?;
        let chain = certificates_from_pem(&pem)?;
        let leaf = chain.first().ok_or_else(|| {
            KeyError::CertificateError(format!("no certificate in {cert_path:?}"))
        })?;

        let key = IdentityKey::from_pem_file(
            key_path,
            self.key_password.as_ref().map(|p| p.as_bytes()),
        )?;
        if !leaf.matches_key(&key)? {
            return Err(KeyError::CertificateError(
                "client certificate does not certify the configured key".to_string(),
            ));
        }

        let chain = chain
            .iter()
            .map(X509Certificate::to_rustls_certificate)
            .collect();
        Ok((chain, key))
    }
}

impl fmt::Debug for TlsContextBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsContextBuilder")
            .field("ca_file", &self.ca_file)
            .field("cert_file", &self.cert_file)
            .field("key_file", &self.key_file)
            .field("key_password", &self.key_password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Build a TLS context from file paths. Empty or absent client paths mean
/// no client identity.
pub fn build_tls_context(
    ca_file: &Path,
    cert_file: Option<&Path>,
    key_file: Option<&Path>,
    key_password: Option<&str>,
) -> Result<TlsContext> {
    let mut builder = TlsContextBuilder::new(ca_file);
    if let Some(cert_file) = cert_file {
        builder = builder.with_client_certificate(cert_file);
    }
    if let Some(key_file) = key_file {
        builder = builder.with_client_key(key_file, key_password);
    }
    builder.build()
}

fn load_roots(ca_file: &Path) -> Result<(RootCertStore, Vec<X509Certificate>)> {
    if ca_file.as_os_str().is_empty() {
        return Err(KeyError::TlsConfiguration(
            "no CA trust file configured".to_string(),
        ));
    }
    let pem = std::fs::read(ca_file).map_err(|e| KeyError::file_read(ca_file, e))?;
    let certificates = certificates_from_pem(&pem)
        .map_err(|e| KeyError::TlsConfiguration(format!("CA file {ca_file:?}: {e}")))?;

    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(
        certificates
            .iter()
            .map(X509Certificate::to_rustls_certificate),
    );
    if ignored > 0 {
        log::warn!("ignored {ignored} unusable certificate(s) in {ca_file:?}");
    }
    if added == 0 {
        return Err(KeyError::TlsConfiguration(format!(
            "no usable CA certificate in {ca_file:?}"
        )));
    }
    Ok((roots, certificates))
}

fn non_empty_path(path: PathBuf) -> Option<PathBuf> {
    (!path.as_os_str().is_empty()).then_some(path)
}
