// =============================================================================
// LOTTERYNET - Automatic Mode
// =============================================================================
//
//   FundsReceived  -> auto-enter, once per round
//   ChainAdvanced  -> auto-claim with every tracked guess, once per round,
//                     from revealClosesAt until the claim window ends
//
// Broadcast completions are awaited on spawned tasks and forwarded as
// `Completion` notices when a listener is attached.
//
// =============================================================================

use std::sync::Arc;

use log::{debug, error, info, warn};
use rand::Rng;
use tokio::sync::mpsc;

use super::engine::{CandidateOutcome, ClaimOutcome, EnterOutcome, LotteryEngine};
use super::round::RoundSelector;
use super::LotteryError;
use crate::ledger::{BroadcastOutcome, Ledger, LedgerEvent, TxHandle};
use crate::transaction::{OutPoint, TxHash};
use crate::{AUTO_GUESS_MAX, AUTO_GUESS_MIN};

/// Terminal outcome of a transaction sent in automatic mode
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Completion {
    Entered { guess: i32, outcome: BroadcastOutcome },
    Claimed { outpoint: OutPoint, outcome: BroadcastOutcome },
}

impl Completion {
    pub fn tx_hash(&self) -> TxHash {
        match self {
            Completion::Entered { outcome, .. } | Completion::Claimed { outcome, .. } => outcome.tx_hash(),
        }
    }
}

/// Consume ledger events until the channel closes
pub async fn run_triggers<L: Ledger + 'static>(
    engine: Arc<LotteryEngine<L>>,
    mut events: mpsc::Receiver<LedgerEvent>,
    completions: Option<mpsc::Sender<Completion>>,
) {
    info!(
        "Automatic mode: auto-enter {}, auto-claim {}",
        engine.config().auto_enter,
        engine.config().auto_claim
    );

    while let Some(event) = events.recv().await {
        let result = match event {
            LedgerEvent::FundsReceived { tx_hash, value } => {
                debug!("Received {} in {}", value, tx_hash.short());
                auto_enter(&engine, completions.as_ref())
            }
            LedgerEvent::ChainAdvanced { height } => {
                debug!("Chain advanced to {}", height);
                auto_claim(&engine, completions.as_ref())
            }
        };

        if let Err(e) = result {
            if e.is_fatal() {
                error!("Automatic mode stopped: {}", e);
                return;
            }
            warn!("Automatic mode: {}", e);
        }
    }

    debug!("Ledger event channel closed");
}

/// Enter the current round unless already entered
pub fn auto_enter<L: Ledger + 'static>(
    engine: &LotteryEngine<L>,
    completions: Option<&mpsc::Sender<Completion>>,
) -> Result<bool, LotteryError> {
    if !engine.config().auto_enter {
        return Ok(false);
    }

    let round_start = engine.round().start_block;
    let mut latch = engine.latch();
    if latch.entered(round_start) {
        return Ok(false);
    }

    let guess = engine
        .config()
        .auto_guess
        .unwrap_or_else(|| rand::thread_rng().gen_range(AUTO_GUESS_MIN..=AUTO_GUESS_MAX));

    info!("Received funds: entering the lottery with guess {}", guess);
    match engine.enter(guess)? {
        EnterOutcome::Submitted(submitted) => {
            latch.mark_entered(round_start);
            let guess = submitted.guess.value();
            watch(submitted.handle, completions, move |outcome| Completion::Entered { guess, outcome });
            Ok(true)
        }
        EnterOutcome::InsufficientBalance { needed, available } => {
            debug!("Auto-enter waiting for funds: {} of {}", available, needed);
            Ok(false)
        }
    }
}

/// Claim in whichever round's claim window holds the current height, once
/// its beacon range is complete
pub fn auto_claim<L: Ledger + 'static>(
    engine: &LotteryEngine<L>,
    completions: Option<&mpsc::Sender<Completion>>,
) -> Result<bool, LotteryError> {
    if !engine.config().auto_claim {
        return Ok(false);
    }
    let height = match engine.height() {
        Some(height) => height,
        None => return Ok(false),
    };

    let round = engine.round();
    let selected = [RoundSelector::Current, RoundSelector::Previous]
        .into_iter()
        .filter_map(|selector| round.select(selector).map(|r| (selector, r)))
        .find(|(_, r)| {
            r.window()
                .map(|w| w.in_claim_period(height) && height >= w.reveal_closes_at)
                .unwrap_or(false)
        });

    let (selector, round) = match selected {
        Some(found) => found,
        None => return Ok(false),
    };

    let mut latch = engine.latch();
    if latch.claimed(round.start_block) {
        return Ok(false);
    }

    let guesses = engine.tracked_guesses();
    if guesses.is_empty() {
        return Ok(false);
    }

    info!("Block listener: in claiming period at {}, claiming with {} guess(es)", height, guesses.len());
    let mut broadcast = 0;
    for guess in guesses {
        if let ClaimOutcome::Attempted(outcomes) = engine.claim_round(i64::from(guess.value()), selector)? {
            for outcome in outcomes {
                if let CandidateOutcome::Broadcast { outpoint, handle, .. } = outcome {
                    broadcast += 1;
                    watch(handle, completions, move |outcome| Completion::Claimed { outpoint, outcome });
                }
            }
        }
    }

    if broadcast > 0 {
        latch.mark_claimed(round.start_block);
    }
    Ok(broadcast > 0)
}

fn watch<F>(handle: TxHandle, completions: Option<&mpsc::Sender<Completion>>, notice: F)
where
    F: FnOnce(BroadcastOutcome) -> Completion + Send + 'static,
{
    let completions = completions.cloned();
    tokio::spawn(async move {
        let outcome = handle.wait().await;
        match &outcome {
            BroadcastOutcome::Confirmed { tx_hash, depth } => {
                info!("Transaction {} confirmed at depth {}", tx_hash.short(), depth)
            }
            BroadcastOutcome::Rejected { tx_hash, reason } => warn!(
                "Transaction {} rejected: {}",
                tx_hash.short(),
                reason.as_deref().unwrap_or("no reason given")
            ),
        }
        if let Some(tx) = completions {
            let _ = tx.send(notice(outcome)).await;
        }
    });
}
