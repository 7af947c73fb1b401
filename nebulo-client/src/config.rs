//! Configuration management for the nebulo client
//!
//! Configuration comes from an optional JSON file and from the command line.
//! Both are parsed into [`Options`]; non-empty command line values win.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::api::DEFAULT_TIMEOUT;
use crate::error::{ClientError, Result};
use crate::files::{write_restricted, OWNER_READ_WRITE};
use crate::logging::Verbosity;

/// All available configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    pub global: GlobalOptions,
    pub run: RunOptions,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalOptions {
    pub log: LogOptions,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogOptions {
    /// One of quiet|critical|error|warning|info|request|debug
    pub verbose: String,
    pub file: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunOptions {
    pub baseurl: String,
    pub contacts_file: String,
    /// Per-request budget in seconds, 0 for the default
    pub timeout_secs: u64,
    pub tls: TlsOptions,
}

/// Identity and trust files
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsOptions {
    pub cert: String,
    pub key: String,
    pub key_password: String,
    pub clients_ca_cert: String,
    pub crl: String,
}

impl fmt::Debug for TlsOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let password = if self.key_password.is_empty() {
            ""
        } else {
            "<redacted>"
        };
        f.debug_struct("TlsOptions")
            .field("cert", &self.cert)
            .field("key", &self.key)
            .field("key_password", &password)
            .field("clients_ca_cert", &self.clients_ca_cert)
            .field("crl", &self.crl)
            .finish()
    }
}

fn overlay_string(target: &mut String, value: &str) {
    if !value.is_empty() {
        *target = value.to_string();
    }
}

fn optional_path(value: &str) -> Option<PathBuf> {
    (!value.is_empty()).then(|| PathBuf::from(value))
}

fn check_readable(what: &str, path: &str) -> Result<()> {
    std::fs::File::open(path)
        .map(|_| ())
        .map_err(|e| ClientError::Configuration(format!("{what} {path:?} is not readable: {e}")))
}

impl Options {
    /// Default location: `<config dir>/nebulo/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("nebulo").join("config.json"))
    }

    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ClientError::Configuration(format!("unable to read configuration file {path:?}: {e}"))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            ClientError::Configuration(format!("unable to parse configuration file {path:?}: {e}"))
        })
    }

    /// Save configuration to file, readable by the owner only
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(self)?;
        write_restricted(path, raw.as_bytes(), OWNER_READ_WRITE).map_err(|e| {
            ClientError::Configuration(format!("unable to write configuration file {path:?}: {e}"))
        })?;
        log::debug!("configuration saved to {path:?}");
        Ok(())
    }

    /// Apply every non-empty value of `other` on top of `self`
    pub fn overlay(&mut self, other: &Options) {
        overlay_string(&mut self.global.log.verbose, &other.global.log.verbose);
        overlay_string(&mut self.global.log.file, &other.global.log.file);

        overlay_string(&mut self.run.baseurl, &other.run.baseurl);
        overlay_string(&mut self.run.contacts_file, &other.run.contacts_file);
        if other.run.timeout_secs != 0 {
            self.run.timeout_secs = other.run.timeout_secs;
        }

        let (tls, from) = (&mut self.run.tls, &other.run.tls);
        overlay_string(&mut tls.cert, &from.cert);
        overlay_string(&mut tls.key, &from.key);
        overlay_string(&mut tls.key_password, &from.key_password);
        overlay_string(&mut tls.clients_ca_cert, &from.clients_ca_cert);
        overlay_string(&mut tls.crl, &from.crl);
    }

    /// File layer overlaid with the command line layer
    pub fn merge(file: &Options, cli: &Options) -> Options {
        let mut merged = file.clone();
        merged.overlay(cli);
        merged
    }

    /// Check the configuration before anything uses it
    pub fn validate(&self) -> Result<()> {
        self.verbosity()?;

        if !self.run.baseurl.is_empty() {
            url::Url::parse(&self.run.baseurl).map_err(|e| {
                ClientError::Configuration(format!("invalid baseurl {:?}: {e}", self.run.baseurl))
            })?;
        }

        let tls = &self.run.tls;
        if tls.clients_ca_cert.is_empty() {
            return Err(ClientError::Configuration(
                "run.tls.clients_ca_cert is required".to_string(),
            ));
        }
        check_readable("clients CA certificate", &tls.clients_ca_cert)?;
        if !tls.key.is_empty() && tls.cert.is_empty() {
            return Err(ClientError::Configuration(
                "run.tls.key is set but run.tls.cert is not".to_string(),
            ));
        }
        if !tls.key.is_empty() {
            check_readable("private key", &tls.key)?;
        }
        if !tls.crl.is_empty() {
            check_readable("revocation list", &tls.crl)?;
        }
        Ok(())
    }

    /// Like [`Options::validate`] and additionally requires a server URL
    pub fn validate_for_run(&self) -> Result<()> {
        self.validate()?;
        if self.run.baseurl.is_empty() {
            return Err(ClientError::Configuration(
                "run.baseurl is required".to_string(),
            ));
        }
        Ok(())
    }

    pub fn verbosity(&self) -> Result<Verbosity> {
        match self.global.log.verbose.as_str() {
            "" => Ok(Verbosity::default()),
            name => name.parse(),
        }
    }

    pub fn log_file(&self) -> Option<PathBuf> {
        optional_path(&self.global.log.file)
    }

    pub fn contacts_file(&self) -> Option<PathBuf> {
        optional_path(&self.run.contacts_file)
    }

    pub fn timeout(&self) -> Duration {
        match self.run.timeout_secs {
            0 => DEFAULT_TIMEOUT,
            secs => Duration::from_secs(secs),
        }
    }
}

impl TlsOptions {
    pub fn cert_path(&self) -> Option<PathBuf> {
        optional_path(&self.cert)
    }

    pub fn key_path(&self) -> Option<PathBuf> {
        optional_path(&self.key)
    }

    pub fn ca_path(&self) -> Option<PathBuf> {
        optional_path(&self.clients_ca_cert)
    }

    pub fn crl_path(&self) -> Option<PathBuf> {
        optional_path(&self.crl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_overlay_prefers_non_empty_values() {
        let mut file = Options::default();
        file.run.baseurl = "https://file.example".to_string();
        file.run.tls.cert = "file.crt".to_string();
        file.run.timeout_secs = 10;

        let mut cli = Options::default();
        cli.run.baseurl = "https://cli.example".to_string();

        let merged = Options::merge(&file, &cli);
        assert_eq!(merged.run.baseurl, "https://cli.example");
        assert_eq!(merged.run.tls.cert, "file.crt");
        assert_eq!(merged.timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut options = Options::default();
        options.global.log.verbose = "debug".to_string();
        options.run.tls.key_password = "secret".to_string();
        options.save(&path).unwrap();

        assert_eq!(Options::load(&path).unwrap(), options);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"run": {"baseurl": "https://nebulo.test"}}"#).unwrap();

        let options = Options::load(&path).unwrap();
        assert_eq!(options.run.baseurl, "https://nebulo.test");
        assert_eq!(options.timeout(), DEFAULT_TIMEOUT);
        assert_eq!(options.verbosity().unwrap(), Verbosity::Warning);
    }

    #[test]
    fn test_validate() {
        let dir = TempDir::new().unwrap();
        let ca = dir.path().join("ca.pem");
        std::fs::write(&ca, "ca").unwrap();

        let mut options = Options::default();
        assert!(options.validate().is_err());

        options.run.tls.clients_ca_cert = ca.display().to_string();
        options.validate().unwrap();
        assert!(options.validate_for_run().is_err());

        options.run.tls.key = ca.display().to_string();
        assert!(options.validate().is_err());

        options.run.tls.cert = "anything.crt".to_string();
        options.validate().unwrap();

        options.global.log.verbose = "shouting".to_string();
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_password_not_in_debug_output() {
        let mut options = Options::default();
        options.run.tls.key_password = "hunter2".to_string();
        assert!(!format!("{options:?}").contains("hunter2"));
    }
}
