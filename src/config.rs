//! Configuration management
//!
//! Loads configuration from config.toml with support for:
//! - Server binding settings
//! - Ledger owner and low-balance policy
//! - Oracle reference prefix and callback secret
//! - Optional SQLite event journal

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::events::DEFAULT_EVENT_LOG_CAPACITY;
use crate::ledger::LowBalancePolicy;
use crate::types::DEFAULT_REFERENCE_PREFIX;

const DEFAULT_CONFIG: &str = include_str!("../config.toml");

/// Well-known development key (`//Alice`); override in production.
const DEV_OWNER_HOTKEY: &str = "5GrwvaEF5zXb26Fz9rcQpDWS57CtERHpNehXCPcNoHGKutQY";

/// Main configuration structure matching config.toml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub oracle: OracleConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// SS58 hotkey with administrative rights over the ledger
    pub owner: String,
    #[serde(default)]
    pub low_balance_policy: LowBalancePolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    /// URL prefix stripped from submitted post links
    #[serde(default = "default_reference_prefix")]
    pub reference_prefix: String,
    /// Shared secret expected on resolution callbacks (empty = none)
    #[serde(default)]
    pub callback_token: String,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            reference_prefix: default_reference_prefix(),
            callback_token: String::new(),
        }
    }
}

fn default_reference_prefix() -> String {
    DEFAULT_REFERENCE_PREFIX.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite journal path (empty = journal disabled)
    #[serde(default)]
    pub journal_path: String,
    /// Events kept in memory for `/events`; older ones live in the journal
    #[serde(default = "default_event_log_capacity")]
    pub event_log_capacity: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            journal_path: String::new(),
            event_log_capacity: default_event_log_capacity(),
        }
    }
}

fn default_event_log_capacity() -> usize {
    DEFAULT_EVENT_LOG_CAPACITY
}

impl Config {
    /// Load from config.toml or use defaults
    pub fn load() -> Result<Self> {
        Self::load_from("config.toml")
    }

    /// Load from specific path
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if path.exists() {
            let content = std::fs::read_to_string(path).context("Failed to read config file")?;
            Self::parse(&content).context("Failed to parse config file")
        } else {
            // Use embedded default config
            Self::parse(DEFAULT_CONFIG).context("Failed to parse default config")
        }
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Ledger owner (env var takes precedence)
    pub fn owner(&self) -> String {
        env_or("LEDGER_OWNER", &self.ledger.owner)
    }

    /// Callback secret (env var takes precedence), `None` when disabled
    pub fn callback_token(&self) -> Option<String> {
        Some(env_or("ORACLE_CALLBACK_TOKEN", &self.oracle.callback_token)).filter(|t| !t.is_empty())
    }

    /// Journal path (env var takes precedence), `None` when disabled
    pub fn journal_path(&self) -> Option<PathBuf> {
        Some(env_or("BOUNTY_JOURNAL_PATH", &self.storage.journal_path))
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
    }
}

fn env_or(var: &str, fallback: &str) -> String {
    match std::env::var(var) {
        Ok(value) if !value.is_empty() => value,
        _ => fallback.to_string(),
    }
}

impl Default for Config {
    fn default() -> Self {
        // The embedded default config is covered by tests; this fallback
        // only guards against an edited file.
        Self::parse(DEFAULT_CONFIG).unwrap_or_else(|_| Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            ledger: LedgerConfig {
                owner: DEV_OWNER_HOTKEY.to_string(),
                low_balance_policy: LowBalancePolicy::Reject,
            },
            oracle: OracleConfig::default(),
            storage: StorageConfig::default(),
        })
    }
}
