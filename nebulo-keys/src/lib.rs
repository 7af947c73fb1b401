//! Nebulo Keys – public API facade
//!
//! Identity keys, X.509 certificates and requests, revocation lists, the
//! mutual-TLS client context and the per-recipient secure envelope codec.
//! Nothing in this crate performs network I/O.

pub mod certificate;
pub mod crl;
pub mod encryption;
pub mod envelope;
pub mod error;
pub mod keys;
pub mod tls;

pub use error::{KeyError, Result};

pub use keys::{IdentityKey, RecipientKey, DEFAULT_KEY_BITS, MIN_KEY_BITS};

pub use certificate::{
    certificates_from_pem, CertificateRequest, RequestInfo, SubjectFields, X509Certificate,
};

pub use crl::RevocationList;

pub use envelope::SecureEnvelope;

pub use tls::{build_tls_context, TlsContext, TlsContextBuilder};
