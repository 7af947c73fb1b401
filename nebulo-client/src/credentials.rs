//! Credential Store
//!
//! Holds the on-disk locations of the identity certificate and private key,
//! plus the key password, and writes changes back through a persistence hook.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use nebulo_keys::{TlsContext, TlsContextBuilder};
use tokio::sync::{Mutex, RwLock};
use zeroize::Zeroizing;

use crate::config::{Options, TlsOptions};
use crate::error::{ClientError, Result};

/// Paths and password of the identity
#[derive(Clone, Default)]
pub struct CredentialReference {
    pub cert_path: Option<PathBuf>,
    pub key_path: Option<PathBuf>,
    pub key_password: Option<Zeroizing<String>>,
}

impl CredentialReference {
    pub fn new(
        cert_path: Option<PathBuf>,
        key_path: Option<PathBuf>,
        key_password: Option<String>,
    ) -> Self {
        Self {
            cert_path,
            key_path,
            key_password: key_password.filter(|p| !p.is_empty()).map(Zeroizing::new),
        }
    }

    pub fn from_tls_options(tls: &TlsOptions) -> Self {
        Self::new(
            tls.cert_path(),
            tls.key_path(),
            Some(tls.key_password.clone()),
        )
    }

    /// Write these credentials into configuration options
    pub fn apply_to(&self, tls: &mut TlsOptions) {
        let display = |p: &Option<PathBuf>| {
            p.as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default()
        };
        tls.cert = display(&self.cert_path);
        tls.key = display(&self.key_path);
        tls.key_password = self
            .key_password
            .as_ref()
            .map(|p| p.as_str().to_string())
            .unwrap_or_default();
    }

    /// Both a certificate and a key are configured
    pub fn is_complete(&self) -> bool {
        self.cert_path.is_some() && self.key_path.is_some()
    }

    pub fn password_bytes(&self) -> Option<&[u8]> {
        self.key_password.as_ref().map(|p| p.as_bytes())
    }
}

impl fmt::Debug for CredentialReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialReference")
            .field("cert_path", &self.cert_path)
            .field("key_path", &self.key_path)
            .field(
                "key_password",
                &self.key_password.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

/// Where credential changes are written
#[async_trait]
pub trait CredentialPersistence: Send + Sync {
    async fn persist(&self, credentials: &CredentialReference) -> Result<()>;
}

/// Persists credentials into the JSON configuration file
pub struct ConfigFilePersistence {
    path: PathBuf,
    options: Mutex<Options>,
}

impl ConfigFilePersistence {
    /// `options` is the configuration written out on every change, usually
    /// the merged configuration the client runs with.
    pub fn new(path: impl Into<PathBuf>, options: Options) -> Self {
        Self {
            path: path.into(),
            options: Mutex::new(options),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CredentialPersistence for ConfigFilePersistence {
    async fn persist(&self, credentials: &CredentialReference) -> Result<()> {
        let mut options = self.options.lock().await;
        credentials.apply_to(&mut options.run.tls);
        options.save(&self.path)
    }
}

/// Keeps every persisted snapshot in memory
#[derive(Default)]
pub struct MemoryPersistence {
    saved: Mutex<Vec<CredentialReference>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recently persisted credentials
    pub async fn last(&self) -> Option<CredentialReference> {
        self.saved.lock().await.last().cloned()
    }

    pub async fn count(&self) -> usize {
        self.saved.lock().await.len()
    }
}

#[async_trait]
impl CredentialPersistence for MemoryPersistence {
    async fn persist(&self, credentials: &CredentialReference) -> Result<()> {
        self.saved.lock().await.push(credentials.clone());
        Ok(())
    }
}

/// Current credentials plus the CA trust file used to build TLS contexts
pub struct CredentialStore {
    credentials: RwLock<CredentialReference>,
    ca_file: PathBuf,
    persistence: Arc<dyn CredentialPersistence>,
}

impl CredentialStore {
    pub fn new(
        credentials: CredentialReference,
        ca_file: impl Into<PathBuf>,
        persistence: Arc<dyn CredentialPersistence>,
    ) -> Self {
        Self {
            credentials: RwLock::new(credentials),
            ca_file: ca_file.into(),
            persistence,
        }
    }

    pub fn from_options(options: &Options, persistence: Arc<dyn CredentialPersistence>) -> Self {
        Self::new(
            CredentialReference::from_tls_options(&options.run.tls),
            options.run.tls.ca_path().unwrap_or_default(),
            persistence,
        )
    }

    pub fn ca_file(&self) -> &Path {
        &self.ca_file
    }

    pub async fn snapshot(&self) -> CredentialReference {
        self.credentials.read().await.clone()
    }

    pub async fn set_certificate(&self, cert_path: impl Into<PathBuf>) {
        self.credentials.write().await.cert_path = Some(cert_path.into());
    }

    pub async fn set_key(&self, key_path: impl Into<PathBuf>, password: Option<String>) {
        let mut credentials = self.credentials.write().await;
        credentials.key_path = Some(key_path.into());
        credentials.key_password = password.filter(|p| !p.is_empty()).map(Zeroizing::new);
    }

    pub async fn replace(&self, credentials: CredentialReference) {
        *self.credentials.write().await = credentials;
    }

    /// Write the current credentials through the persistence hook
    pub async fn persist(&self) -> Result<()> {
        let credentials = self.credentials.read().await.clone();
        self.persistence.persist(&credentials).await
    }

    /// Forget the key path and password, then persist.
    ///
    /// The certificate path is kept: the user re-supplies only the key.
    pub async fn clear_key(&self) -> Result<()> {
        let credentials = {
            let mut credentials = self.credentials.write().await;
            credentials.key_path = None;
            credentials.key_password = None;
            credentials.clone()
        };
        log::info!("stored private key reference cleared");
        self.persistence.persist(&credentials).await
    }

    /// Build a fresh TLS context from the current credentials
    pub async fn build_tls_context(&self) -> Result<TlsContext> {
        let credentials = self.snapshot().await;
        let mut builder = TlsContextBuilder::new(&self.ca_file);
        if let Some(cert_path) = &credentials.cert_path {
            builder = builder.with_client_certificate(cert_path);
        }
        if let Some(key_path) = &credentials.key_path {
            builder = builder.with_client_key(
                key_path,
                credentials.key_password.as_ref().map(|p| p.as_str()),
            );
        }
        builder
            .build()
            .map_err(|e| ClientError::Configuration(format!("tls configuration error: {e}")))
    }
}
