// =============================================================================
// LOTTERYNET - Ledger / Wallet Collaborator
// =============================================================================
//
// The narrow interface the lottery engine consumes from the wallet and chain
// layer: chain height, round constants, balance, spendable outputs, and a
// send primitive whose completion arrives later over a oneshot channel.
//
// =============================================================================

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::address::Address;
use crate::lottery::encoder::is_entry_script;
use crate::lottery::round::RoundConfig;
use crate::script::Script;
use crate::transaction::{OutPoint, Transaction, TxHash};

// =============================================================================
// Outputs
// =============================================================================

/// A ledger-owned unspent output, as seen by the lottery
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Output {
    pub outpoint: OutPoint,
    pub value: u64,
    pub script_pubkey: Script,
}

/// Which outputs `spendable_outputs` should return
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScriptPattern {
    /// Commitment scripts of lottery entries
    LotteryEntry,
    /// Every output the wallet tracks
    Any,
}

impl ScriptPattern {
    pub fn matches(&self, script: &Script) -> bool {
        match self {
            ScriptPattern::LotteryEntry => is_entry_script(script),
            ScriptPattern::Any => true,
        }
    }
}

// =============================================================================
// Broadcast
// =============================================================================

/// Terminal state of a submitted transaction
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BroadcastOutcome {
    /// Reached the requested confirmation depth
    Confirmed { tx_hash: TxHash, depth: u32 },
    /// Refused by the network; reason when one was given
    Rejected { tx_hash: TxHash, reason: Option<String> },
}

impl BroadcastOutcome {
    pub fn tx_hash(&self) -> TxHash {
        match self {
            BroadcastOutcome::Confirmed { tx_hash, .. } => *tx_hash,
            BroadcastOutcome::Rejected { tx_hash, .. } => *tx_hash,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self, BroadcastOutcome::Confirmed { .. })
    }
}

/// Handle to a transaction accepted locally and handed to the network
#[derive(Debug)]
pub struct TxHandle {
    pub tx_hash: TxHash,
    outcome: oneshot::Receiver<BroadcastOutcome>,
}

impl TxHandle {
    pub fn new(tx_hash: TxHash, outcome: oneshot::Receiver<BroadcastOutcome>) -> Self {
        TxHandle { tx_hash, outcome }
    }

    /// Wait for the terminal outcome. A dropped notifier counts as a
    /// rejection without a reason.
    pub async fn wait(self) -> BroadcastOutcome {
        match self.outcome.await {
            Ok(outcome) => outcome,
            Err(_) => BroadcastOutcome::Rejected {
                tx_hash: self.tx_hash,
                reason: None,
            },
        }
    }

    /// Non-blocking poll, None while still pending
    pub fn try_outcome(&mut self) -> Option<BroadcastOutcome> {
        match self.outcome.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(BroadcastOutcome::Rejected {
                tx_hash: self.tx_hash,
                reason: None,
            }),
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LedgerError {
    /// Wallet cannot cover the transaction
    InsufficientFunds { needed: u64, available: u64 },
    /// Wallet or network layer not usable right now
    Unavailable(String),
}

impl std::fmt::Display for LedgerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LedgerError::InsufficientFunds { needed, available } => {
                write!(f, "Insufficient funds: {} needed, {} available", needed, available)
            }
            LedgerError::Unavailable(msg) => write!(f, "Ledger unavailable: {}", msg),
        }
    }
}

impl std::error::Error for LedgerError {}

// =============================================================================
// Events
// =============================================================================

/// Wallet/chain notifications that drive automatic mode
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LedgerEvent {
    /// Coins arrived in the wallet and reached the configured depth
    FundsReceived { tx_hash: TxHash, value: u64 },
    /// Chain tip or wallet state changed
    ChainAdvanced { height: u64 },
}

// =============================================================================
// Ledger
// =============================================================================

pub trait Ledger: Send + Sync {
    /// Height of the last block seen, None while unknown
    fn current_height(&self) -> Option<u64>;

    /// Round constants governed by the chain
    fn round_config(&self) -> RoundConfig;

    fn balance(&self) -> u64;

    fn change_address(&self) -> Address;

    fn spendable_outputs(&self, pattern: ScriptPattern) -> Vec<Output>;

    /// Complete (inputs, change, signatures), accept locally and broadcast.
    /// The handle resolves once the transaction reaches `depth`
    /// confirmations or is rejected.
    fn build_and_send(&self, tx: Transaction, depth: u32) -> Result<TxHandle, LedgerError>;
}
