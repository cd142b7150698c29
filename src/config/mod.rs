//! Configuration for the billing ledger.
//!
//! The crate is embedded as a library, so configuration arrives as already
//! deserialized structs; the host process decides where they come from
//! (TOML file, environment, hardcoded test values).

mod database;

pub use database::*;
use thiserror::Error;

/// Configuration errors surfaced during validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration validation error: {0}")]
    Validation(String),
}

/// Root configuration for the ledger.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LedgerConfig {
    /// Database configuration for persistent storage.
    #[serde(default)]
    pub database: DatabaseConfig,
}

impl LedgerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.database.validate()
    }
}
