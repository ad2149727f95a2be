// =============================================================================
// LOTTERYNET - Lottery Protocol
// =============================================================================
//
// Commit-reveal lottery settled by scripts:
//
//   enter(guess)  -> stake locked behind a two-branch commitment script
//   claim(guess)  -> reveal spends the commitment during the claim window
//   rollover      -> operator sweeps unclaimed stakes after the window
//
// Round timing is a pure function of the chain's round constants; entries
// are tracked in memory and consumed at most once by a claim attempt.
//
// =============================================================================

pub mod round;
pub mod encoder;
pub mod entry;
pub mod candidates;
pub mod config;
pub mod engine;
pub mod triggers;

pub use round::{RoundConfig, RoundSelector, RoundWindow};
pub use encoder::{entry_script, is_entry_script, reveal_script, EntryTerms, Guess};
pub use entry::{Entry, EntryStore};
pub use candidates::{select_candidates, CandidateSet};
pub use config::{ConfigError, EngineConfig};
pub use engine::{
    CandidateOutcome, ClaimOutcome, ClaimState, EnterOutcome, EntrySubmitted, LotteryEngine,
};
pub use triggers::{run_triggers, Completion};

use crate::ledger::LedgerError;
use crate::script::ScriptError;

// =============================================================================
// Errors
// =============================================================================

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LotteryError {
    /// Round constants or engine settings are unusable (fatal)
    InvalidConfiguration(String),

    /// Guess does not fit the 32-bit commitment encoding
    InvalidGuess(i64),

    /// Script inputs unavailable, e.g. chain height unknown
    EncoderPreconditionFailed(String),

    /// Template could not be assembled
    Script(ScriptError),

    /// Wallet/ledger failure outside the expected outcomes
    Ledger(LedgerError),
}

impl LotteryError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, LotteryError::InvalidConfiguration(_))
    }
}

impl std::fmt::Display for LotteryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LotteryError::InvalidConfiguration(msg) => write!(f, "Invalid configuration: {}", msg),
            LotteryError::InvalidGuess(g) => {
                write!(f, "Invalid guess {}: must fit a signed 32-bit integer", g)
            }
            LotteryError::EncoderPreconditionFailed(msg) => {
                write!(f, "Cannot build lottery script: {}", msg)
            }
            LotteryError::Script(e) => write!(f, "Script error: {}", e),
            LotteryError::Ledger(e) => write!(f, "Ledger error: {}", e),
        }
    }
}

impl std::error::Error for LotteryError {}

impl From<ScriptError> for LotteryError {
    fn from(e: ScriptError) -> Self {
        LotteryError::Script(e)
    }
}

impl From<LedgerError> for LotteryError {
    fn from(e: LedgerError) -> Self {
        LotteryError::Ledger(e)
    }
}
