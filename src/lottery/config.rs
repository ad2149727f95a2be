// =============================================================================
// LOTTERYNET - Engine Configuration
// =============================================================================

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::encoder::{validate_bits, Guess};
use crate::address::Address;
use crate::{DEFAULT_BITS_OF_RANDOMNESS, DEFAULT_CONFIRMATIONS, ENTRY_STAKE, MIN_TX_FEE};

pub const DEFAULT_CONFIG_FILE: &str = "lotterynet.json";

#[derive(Debug)]
pub enum ConfigError {
    Io(String),
    Parse(String),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(msg) => write!(f, "Read error: {}", msg),
            ConfigError::Parse(msg) => write!(f, "Parse error: {}", msg),
            ConfigError::Invalid(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Value locked by every entry
    pub stake: u64,

    /// Fixed fee per lottery transaction
    pub fee: u64,

    /// Proof strength used in new entries and reveals
    pub bits_of_randomness: u32,

    /// Rollover payee; the wallet's change address when unset
    pub operator: Option<Address>,

    /// Enter once per round when funds arrive
    pub auto_enter: bool,

    /// Claim with every tracked guess when the chain advances
    pub auto_claim: bool,

    /// Guess used by auto-enter; random in 1..=100 when unset
    pub auto_guess: Option<i64>,

    /// Confirmations awaited in automatic mode
    pub confirmations: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            stake: ENTRY_STAKE,
            fee: MIN_TX_FEE,
            bits_of_randomness: DEFAULT_BITS_OF_RANDOMNESS,
            operator: None,
            auto_enter: false,
            auto_claim: false,
            auto_guess: None,
            confirmations: DEFAULT_CONFIRMATIONS,
        }
    }
}

impl EngineConfig {
    /// Missing file means defaults
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(EngineConfig::default());
        }

        let json = fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let config: EngineConfig =
            serde_json::from_str(&json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))?;
        fs::write(path, json).map_err(|e| ConfigError::Io(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stake == 0 {
            return Err(ConfigError::Invalid("stake must be positive".into()));
        }
        if self.fee >= self.stake {
            return Err(ConfigError::Invalid(format!(
                "fee {} must be below stake {}",
                self.fee, self.stake
            )));
        }
        validate_bits(self.bits_of_randomness).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if let Some(guess) = self.auto_guess {
            Guess::new(guess).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        }
        if self.confirmations == 0 {
            return Err(ConfigError::Invalid("confirmations must be at least 1".into()));
        }
        Ok(())
    }
}
