use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::auth::Keyring;
use crate::ledger::{AccountId, Amount, DEFAULT_TOTAL_SUPPLY_BYTES};
use crate::pricing::DEFAULT_PRICE_UNIT;

/// Settings for the ledger binary, read from TOML. Every field has a default.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct LedgerConfig {
    /// Account representing the shared storage pool.
    pub ledger_account: AccountId,
    /// Capacity seeded at genesis.
    pub total_supply_bytes: u64,
    /// Tokens buying one whole share.
    pub price_unit: Amount,
    pub state_path: PathBuf,
    /// JSON object of account -> hex ed25519 verifying key.
    pub keyring_path: Option<PathBuf>,
    pub logging: LoggingConfig,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            ledger_account: "storage".to_string(),
            total_supply_bytes: DEFAULT_TOTAL_SUPPLY_BYTES,
            price_unit: DEFAULT_PRICE_UNIT,
            state_path: PathBuf::from("storage-ledger.json"),
            keyring_path: None,
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// `pretty`, `compact` or `json`.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl LedgerConfig {
    /// Reads `path`, falling back to defaults when it does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_toml(&raw).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        if config.price_unit == 0 {
            anyhow::bail!("price_unit must be positive");
        }
        if config.ledger_account.is_empty() {
            anyhow::bail!("ledger_account must not be empty");
        }
        Ok(config)
    }

    pub fn load_keyring(&self) -> Result<Keyring> {
        let Some(path) = &self.keyring_path else {
            return Ok(Keyring::new());
        };
        let raw = fs::read(path).with_context(|| format!("reading keyring {}", path.display()))?;
        let entries: BTreeMap<AccountId, String> = serde_json::from_slice(&raw)
            .with_context(|| format!("parsing keyring {}", path.display()))?;
        Ok(Keyring::from_hex(&entries)?)
    }
}
