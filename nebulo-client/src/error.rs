use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use nebulo_keys::KeyError;
use thiserror::Error;

/// Failure talking to the server
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("unable to do request: {0}")]
    Connection(String),

    #[error("bad status code: expected {expected} received {received}: {detail}")]
    Status {
        expected: u16,
        received: u16,
        detail: String,
    },

    #[error("server rejected the client identity ({status}): {detail}")]
    Unauthorized { status: u16, detail: String },

    #[error("unable to read response data: {0}")]
    Body(String),
}

/// Encryption failure for one member of a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientFailure {
    /// Recipient as published by the server (base64 DER public key)
    pub recipient: String,
    pub reason: String,
}

impl fmt::Display for RecipientFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short: String = self.recipient.chars().take(16).collect();
        write!(f, "{short}…: {}", self.reason)
    }
}

struct FailureList<'a>(&'a [RecipientFailure]);

impl fmt::Display for FailureList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} recipient(s): ", self.0.len())?;
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{failure}")?;
        }
        Ok(())
    }
}

/// Error types for the nebulo client
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unable to load credential file {path:?}: {source}")]
    CredentialFile {
        path: PathBuf,
        #[source]
        source: KeyError,
    },

    #[error("Transport error: {0}")]
    Transport(TransportError),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Certificate {serial} has been revoked")]
    CertificateRevoked { serial: String },

    #[error("Unable to determine revocation status: {0}")]
    RevocationUnknown(String),

    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("Envelope integrity check failed")]
    IntegrityCheckFailed,

    #[error("User {fingerprint} is already logged in")]
    AlreadyAuthenticated { fingerprint: String },

    #[error("No user is logged in")]
    NotAuthenticated,

    #[error("Unknown channel {0:?}")]
    UnknownChannel(String),

    #[error("Encryption failed for {}", FailureList(.0))]
    RecipientEncryption(Vec<RecipientFailure>),

    #[error("{error}; the stored key reference could not be cleared: {persist}")]
    CredentialsNotCleared {
        error: Box<ClientError>,
        persist: Box<ClientError>,
    },

    #[error("Key error: {0}")]
    Keys(KeyError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ClientError {
    /// Whether retrying the same operation unchanged may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::Transport(_))
    }

    /// Whether the stored identity must be re-supplied before trying again
    pub fn invalidates_credentials(&self) -> bool {
        match self {
            ClientError::Authentication(_) | ClientError::CertificateRevoked { .. } => true,
            ClientError::CredentialsNotCleared { error, .. } => error.invalidates_credentials(),
            _ => false,
        }
    }

    pub(crate) fn credential_file(path: impl Into<PathBuf>, source: KeyError) -> Self {
        ClientError::CredentialFile {
            path: path.into(),
            source,
        }
    }
}

impl From<KeyError> for ClientError {
    fn from(err: KeyError) -> Self {
        match err {
            KeyError::MalformedEnvelope(msg) => ClientError::MalformedEnvelope(msg),
            KeyError::IntegrityCheckFailed => ClientError::IntegrityCheckFailed,
            KeyError::TlsConfiguration(msg) => ClientError::Configuration(msg),
            other => ClientError::Keys(other),
        }
    }
}

impl From<TransportError> for ClientError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Unauthorized { status, detail } => {
                ClientError::Authentication(format!("server answered {status}: {detail}"))
            }
            other => ClientError::Transport(other),
        }
    }
}

/// Result type for client operations
pub type Result<T> = std::result::Result<T, ClientError>;
