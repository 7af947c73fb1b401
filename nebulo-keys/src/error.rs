use std::path::PathBuf;

use thiserror::Error;

/// Error types for the nebulo-keys crate
#[derive(Error, Debug)]
pub enum KeyError {
    #[error("Invalid key format: {0}")]
    InvalidKeyFormat(String),

    #[error("Unable to decrypt private key: {0}")]
    KeyDecryption(String),

    #[error("Unsupported key: {0}")]
    UnsupportedKey(String),

    #[error("Unsupported key size: {bits} bits (minimum {minimum})")]
    UnsupportedKeySize { bits: usize, minimum: usize },

    #[error("Key generation error: {0}")]
    KeyGeneration(String),

    #[error("Certificate error: {0}")]
    CertificateError(String),

    #[error("Certificate request error: {0}")]
    CertificateRequestError(String),

    #[error("Revocation list error: {0}")]
    RevocationListError(String),

    #[error("Encryption error: {0}")]
    EncryptionError(String),

    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("Envelope integrity check failed")]
    IntegrityCheckFailed,

    #[error("TLS configuration error: {0}")]
    TlsConfiguration(String),

    #[error("Unable to read {path:?}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<rcgen::Error> for KeyError {
    fn from(err: rcgen::Error) -> Self {
        KeyError::CertificateRequestError(err.to_string())
    }
}

impl From<rsa::Error> for KeyError {
    fn from(err: rsa::Error) -> Self {
        KeyError::EncryptionError(err.to_string())
    }
}

impl From<rustls::Error> for KeyError {
    fn from(err: rustls::Error) -> Self {
        KeyError::TlsConfiguration(err.to_string())
    }
}

impl KeyError {
    /// Wrap an IO error with the path that produced it
    pub fn file_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        KeyError::FileRead {
            path: path.into(),
            source,
        }
    }
}

/// Result type for nebulo-keys operations
pub type Result<T> = std::result::Result<T, KeyError>;
