// =============================================================================
// LOTTERYNET - Simulated Ledger
// =============================================================================
//
// In-memory chain + wallet implementing `Ledger`. Blocks are produced on
// demand with `mine`, spends of lottery outputs are checked with the script
// interpreter, and pending handles resolve once their transaction reaches
// the requested depth.
//
// =============================================================================

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::{debug, info, warn};
use secp256k1::Secp256k1;
use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, oneshot};

use crate::address::Address;
use crate::ledger::{BroadcastOutcome, Ledger, LedgerError, LedgerEvent, Output, ScriptPattern, TxHandle};
use crate::lottery::encoder::Guess;
use crate::lottery::round::{RoundConfig, RoundWindow};
use crate::script::{verify_spend, ExecutionContext, Script};
use crate::transaction::{OutPoint, Transaction, TxHash, TxIn};
use crate::MIN_TX_FEE;

/// How the simulated chain publishes its round constants
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoundSchedule {
    /// One round, never advancing
    Fixed(RoundConfig),
    /// A new round every `period` blocks from `anchor`
    Rolling {
        anchor: u64,
        period: u64,
        delay: u64,
        claiming_period: u64,
    },
}

impl RoundSchedule {
    pub fn at(&self, height: u64) -> RoundConfig {
        match *self {
            RoundSchedule::Fixed(config) => config,
            RoundSchedule::Rolling {
                anchor,
                period,
                delay,
                claiming_period,
            } => RoundConfig::for_height(anchor, height, period, delay, claiming_period),
        }
    }
}

struct Pending {
    tx_hash: TxHash,
    included_at: u64,
    depth: u32,
    /// Paid back into the wallet once confirmed
    credit: u64,
    notify: oneshot::Sender<BroadcastOutcome>,
}

struct SimState {
    height: Option<u64>,
    balance: u64,
    outputs: BTreeMap<OutPoint, Output>,
    pending: Vec<Pending>,
    beacon_overrides: HashMap<(u64, u64), [u8; 32]>,
    nonce: u64,
}

pub struct SimLedger {
    schedule: RoundSchedule,
    address: Address,
    state: Mutex<SimState>,
    events: Option<mpsc::Sender<LedgerEvent>>,
}

impl SimLedger {
    pub fn new(schedule: RoundSchedule, height: u64) -> Self {
        let secp = Secp256k1::new();
        let (_, public_key) = secp.generate_keypair(&mut rand::thread_rng());

        SimLedger {
            schedule,
            address: Address::from_pubkey(&public_key),
            state: Mutex::new(SimState {
                height: Some(height),
                balance: 0,
                outputs: BTreeMap::new(),
                pending: Vec::new(),
                beacon_overrides: HashMap::new(),
                nonce: 0,
            }),
            events: None,
        }
    }

    /// Wallet/chain events for automatic mode
    pub fn with_events(mut self, events: mpsc::Sender<LedgerEvent>) -> Self {
        self.events = Some(events);
        self
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: LedgerEvent) {
        if let Some(events) = &self.events {
            if let Err(e) = events.try_send(event) {
                warn!("Dropped ledger event: {}", e);
            }
        }
    }

    // =========================================================================
    // Chain
    // =========================================================================

    /// Forget the tip, as a wallet does before its first sync
    pub fn set_height(&self, height: Option<u64>) {
        self.state().height = height;
    }

    /// Produce `blocks` blocks, resolving pending transactions that reach
    /// their depth
    pub fn mine(&self, blocks: u64) -> u64 {
        let mut tip = 0;
        for _ in 0..blocks {
            let (height, confirmed) = {
                let mut state = self.state();
                let height = state.height.unwrap_or(0) + 1;
                state.height = Some(height);

                let (done, waiting): (Vec<Pending>, Vec<Pending>) = state
                    .pending
                    .drain(..)
                    .partition(|p| height + 1 >= p.included_at + p.depth as u64);
                state.pending = waiting;

                let mut confirmed = Vec::with_capacity(done.len());
                for p in done {
                    state.balance += p.credit;
                    confirmed.push(p);
                }
                (height, confirmed)
            };

            for p in confirmed {
                debug!("Confirmed {} at height {}", p.tx_hash.short(), height);
                if p.credit > 0 {
                    self.emit(LedgerEvent::FundsReceived {
                        tx_hash: p.tx_hash,
                        value: p.credit,
                    });
                }
                let _ = p.notify.send(BroadcastOutcome::Confirmed {
                    tx_hash: p.tx_hash,
                    depth: p.depth,
                });
            }

            self.emit(LedgerEvent::ChainAdvanced { height });
            tip = height;
        }
        tip
    }

    /// Coins paid to the wallet from outside, confirmed immediately
    pub fn fund(&self, value: u64) -> TxHash {
        let tx_hash = {
            let mut state = self.state();
            state.balance += value;
            Self::next_hash(&mut state, b"fund")
        };
        info!("Wallet funded with {} in {}", value, tx_hash.short());
        self.emit(LedgerEvent::FundsReceived { tx_hash, value });
        tx_hash
    }

    fn next_hash(state: &mut SimState, tag: &[u8]) -> TxHash {
        state.nonce += 1;
        let mut hasher = Sha256::new();
        hasher.update(tag);
        hasher.update(state.nonce.to_be_bytes());
        TxHash(hasher.finalize().into())
    }

    // =========================================================================
    // Beacon
    // =========================================================================

    /// Published once block `end` exists
    pub fn beacon_digest(&self, start: u64, end: u64) -> Option<[u8; 32]> {
        let state = self.state();
        Self::beacon_for(&state, start, end)
    }

    fn beacon_for(state: &SimState, start: u64, end: u64) -> Option<[u8; 32]> {
        if start > end || state.height.map_or(true, |h| h < end) {
            return None;
        }
        if let Some(digest) = state.beacon_overrides.get(&(start, end)) {
            return Some(*digest);
        }
        let mut hasher = Sha256::new();
        hasher.update(b"beacon");
        hasher.update(start.to_be_bytes());
        hasher.update(end.to_be_bytes());
        Some(hasher.finalize().into())
    }

    pub fn set_beacon(&self, start: u64, end: u64, digest: [u8; 32]) {
        self.state().beacon_overrides.insert((start, end), digest);
    }

    /// Make the round's beacon equal the commitment of a given entry
    pub fn rig_beacon(&self, window: &RoundWindow, funding_hash: &TxHash, guess: Guess) {
        let mut hasher = Sha256::new();
        hasher.update(funding_hash.as_bytes());
        hasher.update(guess.to_bytes());
        self.set_beacon(window.reveal_opens_at, window.beacon_end(), hasher.finalize().into());
    }

    // =========================================================================
    // Broadcast
    // =========================================================================

    fn validate_spend(state: &SimState, tx: &Transaction, height: u64) -> Result<u64, String> {
        if tx.lock_time as u64 > height {
            return Err(format!("non-final: lock time {} above height {}", tx.lock_time, height));
        }

        let sighash = tx.signature_hash();
        let beacon = |start: u64, end: u64| Self::beacon_for(state, start, end);
        let mut input_value = 0u64;

        for TxIn { previous_output, script_sig, sequence } in &tx.inputs {
            let spent = state
                .outputs
                .get(previous_output)
                .ok_or_else(|| format!("input {} missing or already spent", previous_output))?;

            let context = ExecutionContext {
                lock_time: tx.lock_time,
                sequence: *sequence,
                sighash,
            };
            match verify_spend(script_sig, &spent.script_pubkey, context, &beacon) {
                Ok(true) => {}
                Ok(false) => return Err(format!("script for {} evaluated to false", previous_output)),
                Err(e) => return Err(format!("script for {} failed: {}", previous_output, e)),
            }
            input_value += spent.value;
        }

        if tx.output_sum() > input_value {
            return Err(format!("outputs {} exceed inputs {}", tx.output_sum(), input_value));
        }
        Ok(input_value)
    }

    fn reject(tx_hash: TxHash, reason: String) -> TxHandle {
        warn!("Rejected {}: {}", tx_hash.short(), reason);
        let (notify, outcome) = oneshot::channel();
        let _ = notify.send(BroadcastOutcome::Rejected {
            tx_hash,
            reason: Some(reason),
        });
        TxHandle::new(tx_hash, outcome)
    }
}

impl Ledger for SimLedger {
    fn current_height(&self) -> Option<u64> {
        self.state().height
    }

    fn round_config(&self) -> RoundConfig {
        self.schedule.at(self.state().height.unwrap_or(0))
    }

    fn balance(&self) -> u64 {
        self.state().balance
    }

    fn change_address(&self) -> Address {
        self.address
    }

    fn spendable_outputs(&self, pattern: ScriptPattern) -> Vec<Output> {
        self.state()
            .outputs
            .values()
            .filter(|o| pattern.matches(&o.script_pubkey))
            .cloned()
            .collect()
    }

    fn build_and_send(&self, mut tx: Transaction, depth: u32) -> Result<TxHandle, LedgerError> {
        let mut state = self.state();
        let height = state
            .height
            .ok_or_else(|| LedgerError::Unavailable("chain not synced".into()))?;
        let change_script = self.address.script_pubkey();

        let mut credit = 0;
        if tx.inputs.is_empty() {
            // Funded from the wallet balance
            let needed = tx.output_sum() + MIN_TX_FEE;
            if needed > state.balance {
                return Err(LedgerError::InsufficientFunds {
                    needed,
                    available: state.balance,
                });
            }
            let coin = Self::next_hash(&mut state, b"coin");
            tx.add_input(TxIn::new(OutPoint::new(coin, 0), Script::new()));
            state.balance -= needed;
        } else {
            if let Err(reason) = Self::validate_spend(&state, &tx, height) {
                return Ok(Self::reject(tx.hash(), reason));
            }
            for input in &tx.inputs {
                state.outputs.remove(&input.previous_output);
            }
        }

        let tx_hash = tx.hash();
        for (index, out) in tx.outputs.iter().enumerate() {
            if out.script_pubkey == change_script {
                credit += out.value;
            } else {
                state.outputs.insert(
                    OutPoint::new(tx_hash, index as u32),
                    Output {
                        outpoint: OutPoint::new(tx_hash, index as u32),
                        value: out.value,
                        script_pubkey: out.script_pubkey.clone(),
                    },
                );
            }
        }

        let (notify, outcome) = oneshot::channel();
        state.pending.push(Pending {
            tx_hash,
            included_at: height + 1,
            depth: depth.max(1),
            credit,
            notify,
        });
        debug!("Accepted {} ({} bytes)", tx_hash.short(), tx.size());

        Ok(TxHandle::new(tx_hash, outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lottery::encoder::entry_script;
    use crate::transaction::TxOut;
    use crate::COIN;

    fn ledger() -> SimLedger {
        SimLedger::new(RoundSchedule::Fixed(RoundConfig::new(100, 50, 6, 20)), 120)
    }

    #[test]
    fn test_rolling_schedule() {
        let schedule = RoundSchedule::Rolling {
            anchor: 0,
            period: 50,
            delay: 6,
            claiming_period: 20,
        };
        assert_eq!(schedule.at(120).start_block, 100);
        assert_eq!(schedule.at(150).start_block, 150);
    }

    #[test]
    fn test_beacon_published_after_end() {
        let ledger = ledger();
        assert_eq!(ledger.beacon_digest(150, 155), None);

        ledger.mine(35);
        let first = ledger.beacon_digest(150, 155).unwrap();
        assert_eq!(ledger.beacon_digest(150, 155), Some(first));
        assert_ne!(ledger.beacon_digest(150, 154), Some(first));
    }

    #[test]
    fn test_funding_needs_balance() {
        let ledger = ledger();
        let mut tx = Transaction::new();
        tx.add_output(TxOut::new(COIN, ledger.change_address().script_pubkey()));

        assert_eq!(
            ledger.build_and_send(tx, 1).unwrap_err(),
            LedgerError::InsufficientFunds { needed: COIN + MIN_TX_FEE, available: 0 }
        );
    }

    #[tokio::test]
    async fn test_entry_output_tracked_and_confirmed() {
        let ledger = ledger();
        ledger.fund(2 * COIN);

        let window = ledger.round_config().window().unwrap();
        let script = entry_script(&window, Guess::from(5), 20, &ledger.change_address()).unwrap();
        let mut tx = Transaction::new();
        tx.add_output(TxOut::new(COIN, script));

        let handle = ledger.build_and_send(tx, 2).unwrap();
        assert_eq!(ledger.spendable_outputs(ScriptPattern::LotteryEntry).len(), 1);
        assert_eq!(ledger.balance(), COIN - MIN_TX_FEE);

        ledger.mine(2);
        assert!(handle.wait().await.is_confirmed());
    }

    #[tokio::test]
    async fn test_missing_input_rejected() {
        let ledger = ledger();
        let mut tx = Transaction::new();
        tx.add_input(TxIn::new(OutPoint::new(TxHash([9; 32]), 0), Script::new()));
        tx.set_lock_time(120);

        let handle = ledger.build_and_send(tx, 1).unwrap();
        assert!(matches!(
            handle.wait().await,
            BroadcastOutcome::Rejected { reason: Some(_), .. }
        ));
    }
}
