// =============================================================================
// LOTTERYNET - Lottery Engine
// =============================================================================
//
// Owns the entry store and the per-round latches, and drives entry and claim
// submission against a `Ledger`.
//
// Claim attempt, per candidate:
//
//   Idle -> CandidatesFetched -> EntryMatched -> TxBuilt -> Broadcast
//        -> Confirmed | Rejected   (reported by the ledger through TxHandle)
//
// =============================================================================

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use log::{debug, info, warn};

use super::candidates::{select_candidates, CandidateSet};
use super::config::EngineConfig;
use super::encoder::{entry_script, reveal_script, validate_bits, EntryTerms, Guess};
use super::entry::{Entry, EntryStore};
use super::round::{RoundConfig, RoundSelector, RoundWindow};
use super::LotteryError;
use crate::address::Address;
use crate::ledger::{Ledger, LedgerError, Output, ScriptPattern, TxHandle};
use crate::script::Script;
use crate::transaction::{OutPoint, Transaction, TxHash, TxIn, TxOut};
use crate::CLAIM_SEQUENCE;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// Outcomes
// =============================================================================

/// Furthest point a claim attempt reached
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ClaimState {
    Idle,
    CandidatesFetched,
    EntryMatched,
    TxBuilt,
    Broadcast,
    Confirmed,
    Rejected,
}

#[derive(Debug)]
pub struct EntrySubmitted {
    pub tx_hash: TxHash,
    pub guess: Guess,
    pub window: RoundWindow,
    pub script: Script,
    /// Resolves when the funding transaction confirms or is rejected
    pub handle: TxHandle,
}

#[derive(Debug)]
pub enum EnterOutcome {
    Submitted(EntrySubmitted),
    InsufficientBalance { needed: u64, available: u64 },
}

impl EnterOutcome {
    pub fn is_submitted(&self) -> bool {
        matches!(self, EnterOutcome::Submitted(_))
    }
}

/// Result of one candidate within a claim attempt
#[derive(Debug)]
pub enum CandidateOutcome {
    /// Claim handed to the network; `handle` reports Confirmed or Rejected
    Broadcast {
        outpoint: OutPoint,
        entry: Entry,
        tx_hash: TxHash,
        handle: TxHandle,
    },
    /// Candidate commits to another guess, or this process never committed
    /// the guess (or already revealed it)
    NoMatchingEntry { outpoint: OutPoint },
    /// Candidate value or wallet cannot cover the fee
    InsufficientFunds {
        outpoint: OutPoint,
        needed: u64,
        available: u64,
    },
    /// Ledger refused the built claim; the entry went back to the store
    SendFailed {
        outpoint: OutPoint,
        entry: Entry,
        reason: String,
    },
    /// Reveal could not be built; the entry went back to the store
    Failed { outpoint: OutPoint, reason: String },
}

impl CandidateOutcome {
    pub fn outpoint(&self) -> OutPoint {
        match self {
            CandidateOutcome::Broadcast { outpoint, .. }
            | CandidateOutcome::NoMatchingEntry { outpoint }
            | CandidateOutcome::InsufficientFunds { outpoint, .. }
            | CandidateOutcome::SendFailed { outpoint, .. }
            | CandidateOutcome::Failed { outpoint, .. } => *outpoint,
        }
    }

    pub fn state(&self) -> ClaimState {
        match self {
            CandidateOutcome::Broadcast { .. } => ClaimState::Broadcast,
            CandidateOutcome::NoMatchingEntry { .. } => ClaimState::CandidatesFetched,
            CandidateOutcome::InsufficientFunds { .. } => ClaimState::CandidatesFetched,
            CandidateOutcome::SendFailed { .. } => ClaimState::TxBuilt,
            CandidateOutcome::Failed { .. } => ClaimState::EntryMatched,
        }
    }
}

#[derive(Debug)]
pub enum ClaimOutcome {
    Attempted(Vec<CandidateOutcome>),
    NotInClaimPeriod { window: RoundWindow, height: u64 },
    NoPreviousRound,
}

impl ClaimOutcome {
    pub fn broadcast_count(&self) -> usize {
        match self {
            ClaimOutcome::Attempted(outcomes) => outcomes
                .iter()
                .filter(|o| o.state() == ClaimState::Broadcast)
                .count(),
            _ => 0,
        }
    }
}

// =============================================================================
// Round Latch
// =============================================================================

/// "Already entered / already claimed" markers, keyed by round start block
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RoundLatch {
    entered: Option<u64>,
    claimed: Option<u64>,
}

impl RoundLatch {
    pub fn entered(&self, round_start: u64) -> bool {
        self.entered == Some(round_start)
    }

    pub fn claimed(&self, round_start: u64) -> bool {
        self.claimed == Some(round_start)
    }

    pub fn mark_entered(&mut self, round_start: u64) {
        self.entered = Some(round_start);
    }

    pub fn mark_claimed(&mut self, round_start: u64) {
        self.claimed = Some(round_start);
    }
}

// =============================================================================
// Engine
// =============================================================================

pub struct LotteryEngine<L: Ledger> {
    ledger: Arc<L>,
    config: EngineConfig,
    bits_of_randomness: AtomicU32,
    entries: Mutex<EntryStore>,
    latch: Mutex<RoundLatch>,
}

impl<L: Ledger> LotteryEngine<L> {
    pub fn new(ledger: Arc<L>, config: EngineConfig) -> Result<Self, LotteryError> {
        config
            .validate()
            .map_err(|e| LotteryError::InvalidConfiguration(e.to_string()))?;
        ledger.round_config().validate()?;

        Ok(LotteryEngine {
            bits_of_randomness: AtomicU32::new(config.bits_of_randomness),
            ledger,
            config,
            entries: Mutex::new(EntryStore::new()),
            latch: Mutex::new(RoundLatch::default()),
        })
    }

    pub fn ledger(&self) -> &Arc<L> {
        &self.ledger
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn bits_of_randomness(&self) -> u32 {
        self.bits_of_randomness.load(Ordering::SeqCst)
    }

    /// Applies to entries built from now on; reveals use the bits their
    /// commitment carries
    pub fn set_bits_of_randomness(&self, bits: u32) -> Result<(), LotteryError> {
        validate_bits(bits)?;
        self.bits_of_randomness.store(bits, Ordering::SeqCst);
        info!("Bits of randomness set to {}", bits);
        Ok(())
    }

    pub fn height(&self) -> Option<u64> {
        self.ledger.current_height()
    }

    pub fn balance(&self) -> u64 {
        self.ledger.balance()
    }

    pub fn round(&self) -> RoundConfig {
        self.ledger.round_config()
    }

    pub fn current_window(&self) -> Result<RoundWindow, LotteryError> {
        self.ledger.round_config().window()
    }

    pub fn operator(&self) -> Address {
        self.config
            .operator
            .unwrap_or_else(|| self.ledger.change_address())
    }

    /// Snapshot of tracked entries
    pub fn entries(&self) -> Vec<Entry> {
        lock(&self.entries).entries().to_vec()
    }

    pub fn tracked_guesses(&self) -> Vec<Guess> {
        lock(&self.entries).guesses()
    }

    pub(crate) fn latch(&self) -> MutexGuard<'_, RoundLatch> {
        lock(&self.latch)
    }

    fn require_height(&self) -> Result<u64, LotteryError> {
        self.ledger
            .current_height()
            .ok_or_else(|| LotteryError::EncoderPreconditionFailed("chain height unknown".into()))
    }

    // =========================================================================
    // Entering
    // =========================================================================

    pub fn enter(&self, guess: i64) -> Result<EnterOutcome, LotteryError> {
        let guess = Guess::new(guess)?;
        self.require_height()?;

        let window = self.current_window()?;
        let bits = self.bits_of_randomness();
        let script = entry_script(&window, guess, bits, &self.operator())?;

        let output = TxOut::new(self.config.stake, script.clone());
        let needed = self.config.stake + output.min_non_dust_value() + self.config.fee;
        let available = self.ledger.balance();
        if available < needed {
            warn!(
                "Not enough balance to enter: needed {}, wallet has {}",
                needed, available
            );
            return Ok(EnterOutcome::InsufficientBalance { needed, available });
        }

        let mut tx = Transaction::new();
        tx.add_output(output);

        let handle = match self.ledger.build_and_send(tx, self.config.confirmations) {
            Ok(handle) => handle,
            Err(LedgerError::InsufficientFunds { needed, available }) => {
                warn!("Wallet refused entry: needed {}, available {}", needed, available);
                return Ok(EnterOutcome::InsufficientBalance { needed, available });
            }
            Err(e) => return Err(e.into()),
        };

        let tx_hash = handle.tx_hash;
        lock(&self.entries).record(Entry::new(tx_hash, guess, Utc::now()));
        info!("Sent entry for guess {} in {}: tx {}", guess, window, tx_hash);

        Ok(EnterOutcome::Submitted(EntrySubmitted {
            tx_hash,
            guess,
            window,
            script,
            handle,
        }))
    }

    // =========================================================================
    // Candidates
    // =========================================================================

    pub fn list_candidates(&self, include_previous: bool) -> Result<CandidateSet, LotteryError> {
        let selector = if include_previous {
            RoundSelector::Previous
        } else {
            RoundSelector::Current
        };
        self.candidates(selector)
    }

    fn candidates(&self, selector: RoundSelector) -> Result<CandidateSet, LotteryError> {
        let height = self.require_height()?;
        let outputs = self.ledger.spendable_outputs(ScriptPattern::LotteryEntry);
        select_candidates(&outputs, height, &self.ledger.round_config(), selector)
    }

    /// Total value of in-window candidates; zero outside the claim period
    pub fn claimable(&self, include_previous: bool) -> Result<u64, LotteryError> {
        Ok(self.list_candidates(include_previous)?.total_value())
    }

    // =========================================================================
    // Claiming
    // =========================================================================

    /// Claim in the current round, or in the previous one when the current
    /// round's claim window has not opened. With rolling rounds the previous
    /// round is the one being claimed.
    pub fn claim(&self, guess: i64) -> Result<ClaimOutcome, LotteryError> {
        match self.claim_round(guess, RoundSelector::Current)? {
            ClaimOutcome::NotInClaimPeriod { window, height } => {
                match self.claim_round(guess, RoundSelector::Previous)? {
                    attempted @ ClaimOutcome::Attempted(_) => Ok(attempted),
                    _ => Ok(ClaimOutcome::NotInClaimPeriod { window, height }),
                }
            }
            outcome => Ok(outcome),
        }
    }

    pub fn claim_round(&self, guess: i64, selector: RoundSelector) -> Result<ClaimOutcome, LotteryError> {
        let guess = Guess::new(guess)?;
        let height = self.require_height()?;
        let lock_time = u32::try_from(height).map_err(|_| {
            LotteryError::EncoderPreconditionFailed(format!("height {} exceeds lock time range", height))
        })?;

        let outputs = match self.candidates(selector)? {
            CandidateSet::InWindow { outputs, .. } => outputs,
            CandidateSet::NotInClaimPeriod { window, height } => {
                info!("Not in claiming period: height {} outside {}", height, window);
                return Ok(ClaimOutcome::NotInClaimPeriod { window, height });
            }
            CandidateSet::NoPreviousRound => return Ok(ClaimOutcome::NoPreviousRound),
        };

        if outputs.is_empty() {
            info!("No current claim candidates");
        }

        let mut results = Vec::with_capacity(outputs.len());
        for candidate in &outputs {
            // Keep going so handles of claims already sent reach the caller
            let outcome = self
                .claim_candidate(candidate, guess, lock_time)
                .unwrap_or_else(|e| {
                    warn!("Claim for {} failed: {}", candidate.outpoint, e);
                    CandidateOutcome::Failed {
                        outpoint: candidate.outpoint,
                        reason: e.to_string(),
                    }
                });
            results.push(outcome);
        }

        Ok(ClaimOutcome::Attempted(results))
    }

    fn claim_candidate(
        &self,
        candidate: &Output,
        guess: Guess,
        lock_time: u32,
    ) -> Result<CandidateOutcome, LotteryError> {
        let outpoint = candidate.outpoint;
        debug!("Trying to claim {}", outpoint);

        let balance = self.ledger.balance();
        if balance < self.config.fee {
            warn!("Not enough money to send off a claim: wallet has {}", balance);
            return Ok(CandidateOutcome::InsufficientFunds {
                outpoint,
                needed: self.config.fee,
                available: balance,
            });
        }

        let payout_script = self.ledger.change_address().script_pubkey();
        let needed = self.config.fee + TxOut::new(0, payout_script.clone()).min_non_dust_value();
        if candidate.value <= needed {
            warn!("Candidate {} worth {} cannot cover fee", outpoint, candidate.value);
            return Ok(CandidateOutcome::InsufficientFunds {
                outpoint,
                needed,
                available: candidate.value,
            });
        }

        // A reveal for another commitment's guess can only fail and would
        // burn the entry
        let terms = match EntryTerms::parse(&candidate.script_pubkey) {
            Some(terms) if terms.guess == guess => terms,
            _ => {
                debug!("Candidate {} does not commit to guess {}", outpoint, guess);
                return Ok(CandidateOutcome::NoMatchingEntry { outpoint });
            }
        };

        let entry = match lock(&self.entries).take_earliest_matching(guess) {
            Some(entry) => entry,
            None => {
                info!("No entry with guess {} to reveal for {}", guess, outpoint);
                return Ok(CandidateOutcome::NoMatchingEntry { outpoint });
            }
        };
        debug!("Found earliest entry: {} guess {}", entry.funding_hash, entry.guess);

        let reveal = match reveal_script(&entry, terms.bits) {
            Ok(script) => script,
            Err(e) => {
                lock(&self.entries).restore(entry);
                return Err(e);
            }
        };

        let mut tx = Transaction::new();
        tx.add_input(TxIn::with_sequence(outpoint, reveal, CLAIM_SEQUENCE))
            .add_output(TxOut::new(candidate.value - self.config.fee, payout_script))
            .set_lock_time(lock_time);

        match self.ledger.build_and_send(tx, self.config.confirmations) {
            Ok(handle) => {
                info!("Sent out claim for {}: tx {}", outpoint, handle.tx_hash);
                Ok(CandidateOutcome::Broadcast {
                    outpoint,
                    tx_hash: handle.tx_hash,
                    entry,
                    handle,
                })
            }
            Err(LedgerError::InsufficientFunds { needed, available }) => {
                warn!("Not enough money to send out claim for {}", outpoint);
                lock(&self.entries).restore(entry);
                Ok(CandidateOutcome::InsufficientFunds {
                    outpoint,
                    needed,
                    available,
                })
            }
            Err(e) => {
                warn!("Claim for {} refused: {}", outpoint, e);
                lock(&self.entries).restore(entry.clone());
                Ok(CandidateOutcome::SendFailed {
                    outpoint,
                    entry,
                    reason: e.to_string(),
                })
            }
        }
    }
}
