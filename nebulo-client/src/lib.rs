//! Nebulo Client Library
//!
//! Configuration and credentials, the server API, the identity lifecycle
//! and the session of the logged-in user. The `nebulo` binary is a thin
//! command line front end over this crate.

pub mod api;
pub mod config;
pub mod credentials;
pub mod error;
pub mod files;
pub mod identity;
pub mod logging;
pub mod models;
pub mod revocation;
pub mod session;
pub mod worker;

// Re-export main types for convenience
pub use api::{ApiClient, Connector, HttpConnector, HttpTransport, Transport};
pub use config::Options;
pub use credentials::{
    ConfigFilePersistence, CredentialPersistence, CredentialReference, CredentialStore,
    MemoryPersistence,
};
pub use error::{ClientError, RecipientFailure, Result, TransportError};
pub use identity::{IdentityManager, LoginState};
pub use logging::{init_logging, Verbosity};
pub use revocation::{
    checker_from_options, CrlRevocationChecker, RevocationChecker, UncheckedRevocation,
};
pub use session::{SealedMessage, Session};
pub use worker::{IdentityCommand, IdentityEvent, IdentityHandle, IdentityWorker};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
