//! Logging setup for the nebulo binary
//!
//! Verbosity names follow the configuration file vocabulary and map onto
//! `log` level filters. Output goes to stderr unless a log file is set.

use std::fs::OpenOptions;
use std::path::Path;
use std::str::FromStr;

use log::LevelFilter;

use crate::error::{ClientError, Result};

/// Configured verbosity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    Quiet,
    Critical,
    Error,
    #[default]
    Warning,
    Info,
    Request,
    Debug,
}

impl Verbosity {
    pub const NAMES: [&'static str; 7] = [
        "quiet", "critical", "error", "warning", "info", "request", "debug",
    ];

    pub fn level_filter(self) -> LevelFilter {
        match self {
            Verbosity::Quiet => LevelFilter::Off,
            Verbosity::Critical | Verbosity::Error => LevelFilter::Error,
            Verbosity::Warning => LevelFilter::Warn,
            Verbosity::Info => LevelFilter::Info,
            Verbosity::Request => LevelFilter::Debug,
            Verbosity::Debug => LevelFilter::Trace,
        }
    }
}

impl FromStr for Verbosity {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "quiet" => Ok(Verbosity::Quiet),
            "critical" => Ok(Verbosity::Critical),
            "error" => Ok(Verbosity::Error),
            "warning" => Ok(Verbosity::Warning),
            "info" => Ok(Verbosity::Info),
            "request" => Ok(Verbosity::Request),
            "debug" => Ok(Verbosity::Debug),
            other => Err(ClientError::Configuration(format!(
                "unknown verbosity {other:?}, expected one of {}",
                Verbosity::NAMES.join("|")
            ))),
        }
    }
}

/// Install the global logger.
///
/// `RUST_LOG` still overrides the configured level for individual modules.
pub fn init_logging(verbosity: Verbosity, file: Option<&Path>) -> Result<()> {
    let mut builder = env_logger::Builder::new();
    builder
        .filter_level(verbosity.level_filter())
        .parse_default_env();

    if let Some(path) = file {
        let output = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| {
                ClientError::Configuration(format!("unable to set log output file {path:?}: {e}"))
            })?;
        builder.target(env_logger::Target::Pipe(Box::new(output)));
    }

    builder
        .try_init()
        .map_err(|e| ClientError::Configuration(format!("logger already initialised: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_name_parses() {
        for name in Verbosity::NAMES {
            assert!(name.parse::<Verbosity>().is_ok(), "{name}");
        }
        assert!("loud".parse::<Verbosity>().is_err());
    }

    #[test]
    fn test_level_mapping() {
        assert_eq!(Verbosity::Quiet.level_filter(), LevelFilter::Off);
        assert_eq!(Verbosity::Critical.level_filter(), LevelFilter::Error);
        assert_eq!(Verbosity::Request.level_filter(), LevelFilter::Debug);
        assert_eq!(Verbosity::Debug.level_filter(), LevelFilter::Trace);
        assert_eq!(Verbosity::default(), Verbosity::Warning);
    }
}
