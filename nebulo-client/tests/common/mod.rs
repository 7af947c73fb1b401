//! In-memory server, connector and revocation checker shared by the
//! integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use nebulo_client::api::{Connector, Transport};
use nebulo_client::models::{
    Channel, ChannelCreateRequest, IncomingMessage, MessageCreateRequest, ServerVersion, User,
};
use nebulo_client::{
    ClientError, CredentialReference, CredentialStore, IdentityManager, MemoryPersistence,
    RevocationChecker, TransportError,
};
use nebulo_keys::{
    CertificateRequest, IdentityKey, RecipientKey, SecureEnvelope, TlsContext, X509Certificate,
};
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, CertificateSigningRequest, DnType, IsCa,
    KeyUsagePurpose, SerialNumber,
};
use tempfile::TempDir;

pub struct StoredMessage {
    pub channel: String,
    pub receiver: String,
    pub envelope: SecureEnvelope,
    pub sender: User,
}

/// Plays the registration CA and the messaging API
pub struct FakeServer {
    ca: Mutex<Certificate>,
    next_serial: AtomicU64,
    pub users: Mutex<HashMap<String, User>>,
    pub channels: Mutex<HashMap<String, Channel>>,
    pub messages: Mutex<Vec<StoredMessage>>,
    pub delay: Mutex<Option<Duration>>,
    pub requests: AtomicUsize,
}

impl FakeServer {
    pub fn new() -> Arc<Self> {
        let mut params = CertificateParams::new(Vec::<String>::new());
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
        params
            .distinguished_name
            .push(DnType::CommonName, "Nebulo Clients CA");
        Arc::new(Self {
            ca: Mutex::new(Certificate::from_params(params).unwrap()),
            next_serial: AtomicU64::new(100),
            users: Mutex::new(HashMap::new()),
            channels: Mutex::new(HashMap::new()),
            messages: Mutex::new(Vec::new()),
            delay: Mutex::new(None),
            requests: AtomicUsize::new(0),
        })
    }

    pub fn ca_pem(&self) -> String {
        self.ca.lock().unwrap().serialize_pem().unwrap()
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap() = delay;
    }

    /// Forget a registered user, so its certificate no longer logs in
    pub fn forget(&self, public_key_b64: &str) {
        self.users.lock().unwrap().remove(public_key_b64);
    }

    pub fn message_count(&self) -> usize {
        self.messages.lock().unwrap().len()
    }

    fn sign(&self, csr_pem: &str) -> Result<(String, User), TransportError> {
        let info = CertificateRequest::inspect(csr_pem).map_err(|e| TransportError::Status {
            expected: 201,
            received: 400,
            detail: e.to_string(),
        })?;
        let public_key = RecipientKey::from_der(&info.public_key_der).unwrap();

        let mut csr = CertificateSigningRequest::from_pem(csr_pem).unwrap();
        csr.params.serial_number = Some(SerialNumber::from(
            self.next_serial.fetch_add(1, Ordering::SeqCst),
        ));
        let pem = csr
            .serialize_pem_with_signer(&self.ca.lock().unwrap())
            .unwrap();

        let now = Utc::now();
        let user = User {
            key_fingerprint: public_key.fingerprint(),
            display_name: info.common_name.unwrap_or_default(),
            signup: now,
            login_first: now,
            login_last: now,
            public_key_der_b64: public_key.to_base64(),
            contacts: Vec::new(),
        };
        Ok((pem, user))
    }

    fn user_for(&self, identity: &Option<String>) -> Result<User, TransportError> {
        let unauthorized = |detail: &str| TransportError::Unauthorized {
            status: 401,
            detail: detail.to_string(),
        };
        let identity = identity
            .as_ref()
            .ok_or_else(|| unauthorized("no client certificate"))?;
        self.users
            .lock()
            .unwrap()
            .get(identity)
            .cloned()
            .ok_or_else(|| unauthorized("certificate unknown"))
    }

    fn member(&self, public_key_b64: &str) -> User {
        self.users
            .lock()
            .unwrap()
            .get(public_key_b64)
            .cloned()
            .unwrap_or_else(|| User {
                public_key_der_b64: public_key_b64.to_string(),
                ..Default::default()
            })
    }
}

fn channel_of(endpoint: &str, suffix: &str) -> Option<String> {
    endpoint
        .strip_prefix("chan/")
        .and_then(|rest| rest.strip_suffix(suffix))
        .map(str::to_string)
}

/// Serialize the way the server does: empty lists are written as `null`
fn json<T: serde::Serialize>(value: &T) -> Vec<u8> {
    fn null_empty_lists(value: &mut serde_json::Value) {
        match value {
            serde_json::Value::Array(items) if items.is_empty() => {
                *value = serde_json::Value::Null
            }
            serde_json::Value::Array(items) => items.iter_mut().for_each(null_empty_lists),
            serde_json::Value::Object(map) => map.values_mut().for_each(null_empty_lists),
            _ => {}
        }
    }
    let mut value = serde_json::to_value(value).unwrap();
    null_empty_lists(&mut value);
    serde_json::to_vec(&value).unwrap()
}

pub struct FakeTransport {
    server: Arc<FakeServer>,
    identity: Option<String>,
}

#[async_trait]
impl Transport for FakeTransport {
    async fn get(
        &self,
        endpoint: &str,
        _query: &[(&str, String)],
        _expected_status: u16,
    ) -> Result<Vec<u8>, TransportError> {
        let delay = *self.server.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.server.requests.fetch_add(1, Ordering::SeqCst);

        if endpoint == "version" {
            return Ok(json(&ServerVersion {
                build_version: "test".to_string(),
                build_time: "now".to_string(),
            }));
        }

        let user = self.server.user_for(&self.identity)?;
        if endpoint == "user" {
            return Ok(json(&user));
        }
        if endpoint == "chans" {
            let channels: HashMap<String, Channel> = self
                .server
                .channels
                .lock()
                .unwrap()
                .iter()
                .filter(|(_, c)| c.has_member(&user.public_key_der_b64))
                .map(|(name, c)| (name.clone(), c.clone()))
                .collect();
            return Ok(json(&channels));
        }
        if let Some(name) = channel_of(endpoint, "/messages") {
            let channel = self
                .server
                .channels
                .lock()
                .unwrap()
                .get(&name)
                .cloned()
                .unwrap_or_default();
            let listed: Vec<IncomingMessage> = self
                .server
                .messages
                .lock()
                .unwrap()
                .iter()
                .filter(|m| m.channel == name && m.receiver == user.public_key_der_b64)
                .map(|m| IncomingMessage {
                    envelope: m.envelope.clone(),
                    channel: channel.clone(),
                    sender: m.sender.clone(),
                    posted: Utc::now(),
                })
                .collect();
            return Ok(json(&listed));
        }

        Err(TransportError::Status {
            expected: 200,
            received: 404,
            detail: format!("no route {endpoint}"),
        })
    }

    async fn post(
        &self,
        endpoint: &str,
        _content_type: &str,
        body: Vec<u8>,
        _expected_status: u16,
    ) -> Result<Vec<u8>, TransportError> {
        self.server.requests.fetch_add(1, Ordering::SeqCst);

        if endpoint == "user" {
            let csr = String::from_utf8(body).unwrap();
            let (pem, user) = self.server.sign(&csr)?;
            self.server
                .users
                .lock()
                .unwrap()
                .insert(user.public_key_der_b64.clone(), user);
            return Ok(pem.into_bytes());
        }

        let user = self.server.user_for(&self.identity)?;
        if endpoint == "chan" {
            let request: ChannelCreateRequest = serde_json::from_slice(&body).unwrap();
            let channel = Channel {
                name: request.name.clone(),
                created: Utc::now(),
                creator: user,
                members: request
                    .members_public_key
                    .iter()
                    .map(|key| self.server.member(key))
                    .collect(),
                members_can_edit: false,
                members_can_invite: false,
            };
            self.server
                .channels
                .lock()
                .unwrap()
                .insert(request.name, channel.clone());
            return Ok(json(&channel));
        }
        if let Some(name) = channel_of(endpoint, "/message") {
            let request: MessageCreateRequest = serde_json::from_slice(&body).unwrap();
            assert_eq!(request.channel_name, name);
            let mut messages = self.server.messages.lock().unwrap();
            for outgoing in request.messages {
                messages.push(StoredMessage {
                    channel: name.clone(),
                    receiver: outgoing.receiver_pkey,
                    envelope: outgoing.message,
                    sender: user.clone(),
                });
            }
            return Ok(Vec::new());
        }

        Err(TransportError::Status {
            expected: 201,
            received: 404,
            detail: format!("no route {endpoint}"),
        })
    }
}

/// Identifies the caller by the public key of its client certificate, the
/// way the mutual TLS handshake would
pub struct FakeConnector {
    pub server: Arc<FakeServer>,
}

impl Connector for FakeConnector {
    type Transport = FakeTransport;

    fn connect(&self, tls: &TlsContext) -> nebulo_client::Result<FakeTransport> {
        let identity = if tls.has_client_auth() {
            tls.client_certificate()
                .and_then(|c| c.public_key_der().ok())
                .and_then(|der| RecipientKey::from_der(&der).ok())
                .map(|key| key.to_base64())
        } else {
            None
        };
        Ok(FakeTransport {
            server: self.server.clone(),
            identity,
        })
    }
}

#[derive(Default)]
pub struct FakeRevocation {
    pub revoked: AtomicBool,
    pub unknown: AtomicBool,
    pub checks: AtomicUsize,
}

#[async_trait]
impl RevocationChecker for FakeRevocation {
    async fn is_revoked(&self, _certificate: &X509Certificate) -> nebulo_client::Result<bool> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        if self.unknown.load(Ordering::SeqCst) {
            return Err(ClientError::RevocationUnknown("responder unavailable".to_string()));
        }
        Ok(self.revoked.load(Ordering::SeqCst))
    }
}

/// One client installation: key file, certificate destination, CA file and
/// an identity manager wired to the fake server
pub struct Client {
    pub dir: TempDir,
    pub key: IdentityKey,
    pub key_path: PathBuf,
    pub cert_path: PathBuf,
    pub persistence: Arc<MemoryPersistence>,
    pub revocation: Arc<FakeRevocation>,
    pub manager: Arc<IdentityManager<FakeConnector>>,
}

pub fn write_file(dir: &Path, name: &str, contents: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

impl Client {
    pub fn new(server: &Arc<FakeServer>, password: Option<&str>) -> Self {
        Self::with_timeout(server, password, Duration::from_secs(5))
    }

    pub fn with_timeout(server: &Arc<FakeServer>, password: Option<&str>, timeout: Duration) -> Self {
        let dir = TempDir::new().unwrap();
        let key = IdentityKey::generate_default().unwrap();
        let key_path = write_file(
            dir.path(),
            "client.key",
            key.to_pem(password.map(str::as_bytes)).unwrap().as_bytes(),
        );
        let ca_path = write_file(dir.path(), "ca.crt", server.ca_pem().as_bytes());
        let cert_path = dir.path().join("client.crt");

        let persistence = Arc::new(MemoryPersistence::new());
        let credentials = Arc::new(CredentialStore::new(
            CredentialReference::new(
                Some(cert_path.clone()),
                Some(key_path.clone()),
                password.map(str::to_string),
            ),
            ca_path,
            persistence.clone(),
        ));
        let revocation = Arc::new(FakeRevocation::default());
        let manager = Arc::new(
            IdentityManager::new(
                FakeConnector {
                    server: server.clone(),
                },
                credentials,
                revocation.clone(),
            )
            .with_contacts_file(Some(dir.path().join("contacts.json")))
            .with_timeout(timeout),
        );

        Self {
            dir,
            key,
            key_path,
            cert_path,
            persistence,
            revocation,
            manager,
        }
    }

    pub fn public_key_b64(&self) -> String {
        self.key.public_key().to_base64()
    }

    /// Register and leave the client logged in
    pub async fn registered(server: &Arc<FakeServer>) -> Self {
        let client = Self::new(server, None);
        client.manager.register(client.key.clone()).await.unwrap();
        client
    }
}
