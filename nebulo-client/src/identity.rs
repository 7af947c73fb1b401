//! Identity lifecycle
//!
//! Registration, login and logout of the local identity. The manager owns
//! the login state and the single live [`Session`]:
//!
//! ```text
//! LoggedOut -> Registering    -> LoggedOut | LoggedIn
//! LoggedOut -> Authenticating -> LoggedOut | LoggedIn
//! LoggedIn  -> LoggedOut
//! ```
//!
//! Identity operations are serialized. The state and the session are
//! published together through one atomic swap, so readers never see a
//! session under a state that does not name it.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use nebulo_keys::{CertificateRequest, IdentityKey, SubjectFields, TlsContext, X509Certificate};
use tokio::sync::Mutex;

use crate::api::{ApiClient, Connector, DEFAULT_TIMEOUT};
use crate::credentials::{CredentialReference, CredentialStore};
use crate::error::{ClientError, Result};
use crate::files::{write_restricted, OWNER_READ_ONLY};
use crate::models::contact::load_contacts;
use crate::models::ServerVersion;
use crate::revocation::RevocationChecker;
use crate::session::Session;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginState {
    LoggedOut,
    Registering,
    Authenticating,
    LoggedIn { fingerprint: String },
}

impl fmt::Display for LoginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoginState::LoggedOut => f.write_str("logged out"),
            LoginState::Registering => f.write_str("registering"),
            LoginState::Authenticating => f.write_str("authenticating"),
            LoginState::LoggedIn { fingerprint } => write!(f, "logged in as {fingerprint}"),
        }
    }
}

/// Login state and the session it refers to
struct Published<T> {
    state: LoginState,
    session: Option<Arc<Session<T>>>,
}

impl<T> Published<T> {
    fn logged_out() -> Self {
        Self {
            state: LoginState::LoggedOut,
            session: None,
        }
    }
}

pub struct IdentityManager<C: Connector> {
    connector: C,
    credentials: Arc<CredentialStore>,
    revocation: Arc<dyn RevocationChecker>,
    contacts_file: Option<PathBuf>,
    timeout: Duration,
    subject: SubjectFields,
    published: ArcSwap<Published<C::Transport>>,
    operation: Mutex<()>,
}

impl<C: Connector> IdentityManager<C> {
    pub fn new(
        connector: C,
        credentials: Arc<CredentialStore>,
        revocation: Arc<dyn RevocationChecker>,
    ) -> Self {
        Self {
            connector,
            credentials,
            revocation,
            contacts_file: None,
            timeout: DEFAULT_TIMEOUT,
            subject: SubjectFields::default(),
            published: ArcSwap::from_pointee(Published::logged_out()),
            operation: Mutex::new(()),
        }
    }

    pub fn with_contacts_file(mut self, path: Option<PathBuf>) -> Self {
        self.contacts_file = path;
        self
    }

    /// Budget applied to every network call of the sessions created here
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Subject placed in certificate requests
    pub fn with_subject(mut self, subject: SubjectFields) -> Self {
        self.subject = subject;
        self
    }

    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }

    pub fn state(&self) -> LoginState {
        self.published.load().state.clone()
    }

    pub fn session(&self) -> Option<Arc<Session<C::Transport>>> {
        self.published.load().session.clone()
    }

    /// State and session read together
    pub fn current(&self) -> (LoginState, Option<Arc<Session<C::Transport>>>) {
        let published = self.published.load();
        (published.state.clone(), published.session.clone())
    }

    pub fn require_session(&self) -> Result<Arc<Session<C::Transport>>> {
        self.session().ok_or(ClientError::NotAuthenticated)
    }

    fn publish(&self, state: LoginState, session: Option<Arc<Session<C::Transport>>>) {
        log::debug!("identity state: {state}");
        self.published.store(Arc::new(Published { state, session }));
    }

    fn api(&self, tls: &TlsContext) -> Result<ApiClient<C::Transport>> {
        Ok(ApiClient::new(self.connector.connect(tls)?, self.timeout))
    }

    /// Server build information. Works without a usable client identity.
    pub async fn server_version(&self) -> Result<ServerVersion> {
        let tls = self.credentials.build_tls_context().await?;
        self.api(&tls)?.version().await
    }

    /// Log in with the configured credentials.
    ///
    /// A live session is logged out first. On failure the stored key path
    /// and password are cleared and persisted before the error is returned;
    /// when that write fails the error is [`ClientError::CredentialsNotCleared`].
    pub async fn login(&self) -> Result<Arc<Session<C::Transport>>> {
        let _operation = self.operation.lock().await;
        self.login_locked().await
    }

    /// Load and check the given files, store them as the credentials, then
    /// log in. File problems are reported as [`ClientError::CredentialFile`]
    /// and leave the stored credentials untouched.
    pub async fn login_with_credential_files(
        &self,
        cert_path: &Path,
        key_path: &Path,
        key_password: Option<&str>,
    ) -> Result<Arc<Session<C::Transport>>> {
        let _operation = self.operation.lock().await;

        let certificate = X509Certificate::from_pem_file(cert_path)
            .map_err(|e| ClientError::credential_file(cert_path, e))?;
        let key = IdentityKey::from_pem_file(key_path, key_password.map(str::as_bytes))
            .map_err(|e| ClientError::credential_file(key_path, e))?;
        if !certificate.matches_key(&key)? {
            log::warn!("certificate {cert_path:?} does not certify the key in {key_path:?}");
        }
        drop(key);

        self.credentials
            .replace(CredentialReference::new(
                Some(cert_path.to_path_buf()),
                Some(key_path.to_path_buf()),
                key_password.map(str::to_string),
            ))
            .await;
        self.credentials.persist().await?;
        self.login_locked().await
    }

    /// Register `key` with the server and log in with the issued
    /// certificate. The credential store must already point at the key file
    /// and name the certificate destination.
    pub async fn register(&self, key: IdentityKey) -> Result<Arc<Session<C::Transport>>> {
        let _operation = self.operation.lock().await;
        self.ensure_logged_out()?;
        self.register_locked(key).await
    }

    /// Load the key file, store it as the credential key, then register
    pub async fn register_with_key_file(
        &self,
        key_path: &Path,
        key_password: Option<&str>,
    ) -> Result<Arc<Session<C::Transport>>> {
        let _operation = self.operation.lock().await;
        self.ensure_logged_out()?;

        let key = IdentityKey::from_pem_file(key_path, key_password.map(str::as_bytes))
            .map_err(|e| ClientError::credential_file(key_path, e))?;
        self.credentials
            .set_key(key_path, key_password.map(str::to_string))
            .await;
        self.register_locked(key).await
    }

    /// Drop the live session, returns whether there was one
    pub async fn logout(&self) -> bool {
        let _operation = self.operation.lock().await;
        self.logout_locked()
    }

    fn ensure_logged_out(&self) -> Result<()> {
        match self.session() {
            Some(session) => Err(ClientError::AlreadyAuthenticated {
                fingerprint: session.fingerprint(),
            }),
            None => Ok(()),
        }
    }

    fn logout_locked(&self) -> bool {
        let previous = self.session();
        self.publish(LoginState::LoggedOut, None);
        match previous {
            Some(session) => {
                session.close();
                log::info!("logged out {}", session.fingerprint());
                true
            }
            None => false,
        }
    }

    async fn login_locked(&self) -> Result<Arc<Session<C::Transport>>> {
        if self.logout_locked() {
            log::info!("previous session closed before new login");
        }
        self.publish(LoginState::Authenticating, None);

        match self.authenticate().await {
            Ok(session) => {
                let session = Arc::new(session);
                self.publish(
                    LoginState::LoggedIn {
                        fingerprint: session.fingerprint(),
                    },
                    Some(session.clone()),
                );
                log::info!(
                    "logged in as {} ({})",
                    session.user().label(),
                    session.fingerprint()
                );
                Ok(session)
            }
            Err(e) => {
                log::warn!("login failed: {e}");
                let cleared = self.credentials.clear_key().await;
                self.publish(LoginState::LoggedOut, None);
                match cleared {
                    Ok(()) => Err(e),
                    Err(persist) => {
                        log::error!("unable to persist cleared credentials: {persist}");
                        Err(ClientError::CredentialsNotCleared {
                            error: Box::new(e),
                            persist: Box::new(persist),
                        })
                    }
                }
            }
        }
    }

    async fn authenticate(&self) -> Result<Session<C::Transport>> {
        let tls = self.credentials.build_tls_context().await?;
        let (certificate, key) = match (tls.client_certificate(), tls.client_key()) {
            (Some(certificate), Some(key)) if tls.has_client_auth() => {
                (certificate.clone(), key.clone())
            }
            _ => {
                return Err(ClientError::Authentication(
                    "no usable client certificate and key configured".to_string(),
                ))
            }
        };

        let api = self.api(&tls)?;
        let user = api.user_profile().await?;

        if self.revocation.is_revoked(&certificate).await? {
            return Err(ClientError::CertificateRevoked {
                serial: hex::encode(certificate.serial()?),
            });
        }

        let own_key = key.public_key().to_base64();
        if !user.public_key_der_b64.is_empty() && user.public_key_der_b64 != own_key {
            log::warn!(
                "server profile {} carries a different public key than the local identity",
                user.key_fingerprint
            );
        }

        let contacts = match &self.contacts_file {
            Some(path) if path.exists() => load_contacts(path).unwrap_or_else(|e| {
                log::warn!("unable to load contacts: {e}");
                Vec::new()
            }),
            _ => user.contacts.clone(),
        };

        Ok(Session::new(
            user,
            key,
            certificate,
            api,
            contacts,
            self.contacts_file.clone(),
        ))
    }

    async fn register_locked(&self, key: IdentityKey) -> Result<Arc<Session<C::Transport>>> {
        let credentials = self.credentials.snapshot().await;
        let cert_path = credentials.cert_path.clone().ok_or_else(|| {
            ClientError::Configuration("a certificate path is required to register".to_string())
        })?;
        if credentials.key_path.is_none() {
            return Err(ClientError::Configuration(
                "a key path is required to register".to_string(),
            ));
        }

        self.publish(LoginState::Registering, None);
        if let Err(e) = self.submit_request(&key, &cert_path).await {
            log::warn!("registration failed: {e}");
            self.publish(LoginState::LoggedOut, None);
            return Err(e);
        }
        drop(key);

        self.credentials.set_certificate(&cert_path).await;
        self.credentials.persist().await?;
        self.login_locked().await
    }

    async fn submit_request(&self, key: &IdentityKey, cert_path: &Path) -> Result<()> {
        let csr = CertificateRequest::create(key, &self.subject)?;
        let tls = self.credentials.build_tls_context().await?;
        let pem = self.api(&tls)?.register(&csr).await?;

        let certificate = X509Certificate::from_pem(pem.as_bytes())?;
        if !certificate.matches_key(key)? {
            return Err(ClientError::Authentication(
                "issued certificate does not certify the submitted key".to_string(),
            ));
        }

        write_restricted(cert_path, pem.as_bytes(), OWNER_READ_ONLY)?;
        log::info!(
            "registered {}, certificate written to {cert_path:?}",
            key.public_key().fingerprint()
        );
        Ok(())
    }
}
