// =============================================================================
// LOTTERYNET - End-to-end lottery rounds on the simulated ledger
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use lotterynet::address::Address;
use lotterynet::ledger::{BroadcastOutcome, Ledger, LedgerError, Output, ScriptPattern, TxHandle};
use lotterynet::lottery::{
    run_triggers, CandidateOutcome, CandidateSet, ClaimOutcome, ClaimState, Completion, EngineConfig,
    EnterOutcome, Guess, LotteryEngine, LotteryError, RoundConfig, RoundSelector, RoundWindow,
};
use lotterynet::script::{Opcode, Script, ScriptBuilder};
use lotterynet::sim::{RoundSchedule, SimLedger};
use lotterynet::transaction::{OutPoint, Transaction, TxHash};
use lotterynet::{COIN, MIN_TX_FEE};

fn sim(height: u64) -> Arc<SimLedger> {
    Arc::new(SimLedger::new(RoundSchedule::Fixed(RoundConfig::new(100, 50, 6, 20)), height))
}

fn engine(ledger: &Arc<SimLedger>) -> LotteryEngine<SimLedger> {
    LotteryEngine::new(ledger.clone(), EngineConfig::default()).unwrap()
}

fn mine_to(ledger: &SimLedger, height: u64) {
    let current = ledger.current_height().unwrap();
    ledger.mine(height - current);
}

fn submitted(outcome: EnterOutcome) -> lotterynet::lottery::EntrySubmitted {
    match outcome {
        EnterOutcome::Submitted(s) => s,
        other => panic!("entry not submitted: {:?}", other),
    }
}

fn attempted(outcome: ClaimOutcome) -> Vec<CandidateOutcome> {
    match outcome {
        ClaimOutcome::Attempted(outcomes) => outcomes,
        other => panic!("claim not attempted: {:?}", other),
    }
}

// =============================================================================
// Entering
// =============================================================================

#[test]
fn test_window_from_ledger() {
    let ledger = sim(120);
    let w = engine(&ledger).current_window().unwrap();
    assert_eq!((w.reveal_opens_at, w.reveal_closes_at, w.claim_window_end), (150, 156, 176));
}

#[test]
fn test_enter_with_low_balance_records_nothing() {
    let ledger = sim(120);
    ledger.fund(COIN);
    let engine = engine(&ledger);

    match engine.enter(42).unwrap() {
        EnterOutcome::InsufficientBalance { needed, available } => {
            assert!(needed > COIN + MIN_TX_FEE);
            assert_eq!(available, COIN);
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(engine.entries().is_empty());
    assert!(ledger.spendable_outputs(ScriptPattern::LotteryEntry).is_empty());
}

#[test]
fn test_enter_records_entry() {
    let ledger = sim(120);
    ledger.fund(2 * COIN);
    let engine = engine(&ledger);

    let s = submitted(engine.enter(42).unwrap());
    assert_eq!(s.guess, Guess::from(42));
    assert_eq!(s.window.reveal_opens_at, 150);

    let entries = engine.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].funding_hash, s.tx_hash);
    assert_eq!(ledger.balance(), COIN - MIN_TX_FEE);

    let outputs = ledger.spendable_outputs(ScriptPattern::LotteryEntry);
    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs[0].outpoint.tx_hash, s.tx_hash);
    assert_eq!(outputs[0].script_pubkey, s.script);
}

#[test]
fn test_guess_out_of_range() {
    let ledger = sim(120);
    ledger.fund(2 * COIN);
    let engine = engine(&ledger);

    assert_eq!(engine.enter(1 << 40).unwrap_err(), LotteryError::InvalidGuess(1 << 40));
    assert!(engine.entries().is_empty());
}

#[test]
fn test_unknown_height() {
    let ledger = sim(120);
    ledger.fund(2 * COIN);
    ledger.set_height(None);
    let engine = engine(&ledger);

    assert!(matches!(engine.enter(1), Err(LotteryError::EncoderPreconditionFailed(_))));
    assert!(matches!(engine.claim(1), Err(LotteryError::EncoderPreconditionFailed(_))));
}

#[test]
fn test_invalid_round_constants_fatal() {
    let ledger = Arc::new(SimLedger::new(RoundSchedule::Fixed(RoundConfig::new(100, 50, 0, 20)), 120));
    match LotteryEngine::new(ledger, EngineConfig::default()) {
        Err(e) => assert!(e.is_fatal()),
        Ok(_) => panic!("engine accepted a zero delay"),
    }
}

// =============================================================================
// Claiming
// =============================================================================

#[tokio::test]
async fn test_claim_before_reveal_closes_is_built_then_rejected() {
    let ledger = sim(120);
    ledger.fund(2 * COIN);
    let engine = engine(&ledger);
    submitted(engine.enter(7).unwrap());

    mine_to(&ledger, 155);
    let mut outcomes = attempted(engine.claim(7).unwrap());
    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].state() >= ClaimState::TxBuilt);
    assert!(engine.entries().is_empty());

    match outcomes.remove(0) {
        CandidateOutcome::Broadcast { handle, .. } => {
            assert!(matches!(handle.wait().await, BroadcastOutcome::Rejected { reason: Some(_), .. }));
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_claim_after_window() {
    let ledger = sim(120);
    ledger.fund(2 * COIN);
    let engine = engine(&ledger);
    submitted(engine.enter(7).unwrap());

    mine_to(&ledger, 180);
    match engine.claim(7).unwrap() {
        ClaimOutcome::NotInClaimPeriod { window, height } => {
            assert_eq!(height, 180);
            assert_eq!(window.claim_window_end, 176);
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(engine.entries().len(), 1);
}

#[test]
fn test_claim_without_entry_leaves_store_unchanged() {
    let ledger = sim(120);
    ledger.fund(2 * COIN);
    let engine = engine(&ledger);
    submitted(engine.enter(7).unwrap());
    let before = engine.entries();

    mine_to(&ledger, 160);
    let outcomes = attempted(engine.claim(9).unwrap());
    assert_eq!(outcomes.len(), 1);
    assert!(matches!(outcomes[0], CandidateOutcome::NoMatchingEntry { .. }));
    assert_eq!(outcomes[0].state(), ClaimState::CandidatesFetched);
    assert_eq!(engine.entries(), before);
}

#[test]
fn test_candidate_bounds() {
    let ledger = sim(120);
    ledger.fund(2 * COIN);
    let engine = engine(&ledger);
    submitted(engine.enter(7).unwrap());

    mine_to(&ledger, 149);
    assert!(matches!(engine.list_candidates(false).unwrap(), CandidateSet::NotInClaimPeriod { .. }));

    ledger.mine(1);
    assert_eq!(engine.list_candidates(false).unwrap().outputs().len(), 1);
    assert_eq!(engine.claimable(false).unwrap(), COIN);

    mine_to(&ledger, 176);
    assert!(matches!(engine.list_candidates(false).unwrap(), CandidateSet::NotInClaimPeriod { .. }));
    assert_eq!(engine.claimable(false).unwrap(), 0);
}

#[test]
fn test_no_previous_round() {
    let ledger = Arc::new(SimLedger::new(RoundSchedule::Fixed(RoundConfig::new(50, 50, 6, 20)), 110));
    let engine = engine(&ledger);

    assert_eq!(engine.list_candidates(true).unwrap(), CandidateSet::NoPreviousRound);
    assert!(matches!(
        engine.claim_round(1, RoundSelector::Previous).unwrap(),
        ClaimOutcome::NoPreviousRound
    ));
}

#[tokio::test]
async fn test_winning_claim_confirms() {
    let ledger = sim(120);
    ledger.fund(2 * COIN);
    let engine = engine(&ledger);
    let entry = submitted(engine.enter(7).unwrap());

    mine_to(&ledger, 156);
    ledger.rig_beacon(&entry.window, &entry.tx_hash, entry.guess);

    let mut outcomes = attempted(engine.claim(7).unwrap());
    let handle = match outcomes.remove(0) {
        CandidateOutcome::Broadcast { handle, entry: used, .. } => {
            assert_eq!(used.funding_hash, entry.tx_hash);
            handle
        }
        other => panic!("unexpected {:?}", other),
    };
    assert!(ledger.spendable_outputs(ScriptPattern::LotteryEntry).is_empty());

    ledger.mine(1);
    assert!(handle.wait().await.is_confirmed());
    assert_eq!(ledger.balance(), 2 * COIN - 2 * MIN_TX_FEE);
}

#[tokio::test]
async fn test_losing_claim_rejected() {
    let ledger = sim(120);
    ledger.fund(2 * COIN);
    let engine = engine(&ledger);
    submitted(engine.enter(7).unwrap());

    mine_to(&ledger, 156);
    let mut outcomes = attempted(engine.claim(7).unwrap());
    match outcomes.remove(0) {
        CandidateOutcome::Broadcast { handle, .. } => match handle.wait().await {
            BroadcastOutcome::Rejected { reason, .. } => {
                assert!(reason.unwrap().contains("Verification failed"));
            }
            other => panic!("unexpected {:?}", other),
        },
        other => panic!("unexpected {:?}", other),
    }
    // Output is still there for the operator's rollover
    assert_eq!(ledger.spendable_outputs(ScriptPattern::LotteryEntry).len(), 1);
}

#[test]
fn test_earliest_entry_revealed_first() {
    let ledger = sim(120);
    ledger.fund(3 * COIN);
    let engine = engine(&ledger);
    let first = submitted(engine.enter(7).unwrap());
    let second = submitted(engine.enter(7).unwrap());
    assert_ne!(first.tx_hash, second.tx_hash);

    mine_to(&ledger, 156);
    let outcomes = attempted(engine.claim(7).unwrap());
    assert_eq!(outcomes.len(), 2);

    let used: Vec<_> = outcomes
        .iter()
        .filter_map(|o| match o {
            CandidateOutcome::Broadcast { entry, .. } => Some(entry.funding_hash),
            _ => None,
        })
        .collect();
    assert_eq!(used, vec![first.tx_hash, second.tx_hash]);
    assert!(engine.entries().is_empty());
}

#[tokio::test]
async fn test_claim_skips_candidates_committed_to_other_guess() {
    let ledger = sim(120);
    ledger.fund(3 * COIN);
    let engine = engine(&ledger);
    let five = submitted(engine.enter(5).unwrap());
    let seven = submitted(engine.enter(7).unwrap());

    mine_to(&ledger, 156);
    ledger.rig_beacon(&five.window, &five.tx_hash, five.guess);

    let outcomes = attempted(engine.claim(5).unwrap());
    assert_eq!(outcomes.len(), 2);

    let mut handles = Vec::new();
    for outcome in outcomes {
        match outcome {
            CandidateOutcome::Broadcast { outpoint, entry, handle, .. } => {
                assert_eq!(outpoint.tx_hash, five.tx_hash);
                assert_eq!(entry.funding_hash, five.tx_hash);
                handles.push(handle);
            }
            CandidateOutcome::NoMatchingEntry { outpoint } => assert_eq!(outpoint.tx_hash, seven.tx_hash),
            other => panic!("unexpected {:?}", other),
        }
    }
    assert_eq!(handles.len(), 1);

    // The guess-7 entry stays tracked for its own claim
    let left = engine.entries();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].funding_hash, seven.tx_hash);

    ledger.mine(1);
    assert!(handles.remove(0).wait().await.is_confirmed());
}

#[test]
fn test_claim_needs_wallet_fee() {
    let ledger = sim(120);
    let engine = engine(&ledger);
    let needed = match engine.enter(7).unwrap() {
        EnterOutcome::InsufficientBalance { needed, .. } => needed,
        other => panic!("unexpected {:?}", other),
    };

    // Exactly enough to enter leaves less than a fee behind
    ledger.fund(needed);
    submitted(engine.enter(7).unwrap());
    assert!(ledger.balance() < MIN_TX_FEE);

    mine_to(&ledger, 156);
    let outcomes = attempted(engine.claim(7).unwrap());
    match &outcomes[0] {
        CandidateOutcome::InsufficientFunds { needed, available, .. } => {
            assert_eq!(*needed, MIN_TX_FEE);
            assert_eq!(*available, ledger.balance());
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(engine.entries().len(), 1);
}

#[tokio::test]
async fn test_claim_previous_round_under_rolling_schedule() {
    let schedule = RoundSchedule::Rolling {
        anchor: 100,
        period: 50,
        delay: 6,
        claiming_period: 20,
    };
    let ledger = Arc::new(SimLedger::new(schedule, 120));
    ledger.fund(2 * COIN);
    let engine = engine(&ledger);
    let entry = submitted(engine.enter(7).unwrap());
    assert_eq!(entry.window.start_block, 100);

    mine_to(&ledger, 156);
    assert_eq!(engine.round().start_block, 150);
    assert!(matches!(engine.list_candidates(false).unwrap(), CandidateSet::NotInClaimPeriod { .. }));
    ledger.rig_beacon(&entry.window, &entry.tx_hash, entry.guess);

    let mut outcomes = attempted(engine.claim(7).unwrap());
    assert_eq!(outcomes.len(), 1);
    let handle = match outcomes.remove(0) {
        CandidateOutcome::Broadcast { handle, .. } => handle,
        other => panic!("unexpected {:?}", other),
    };
    ledger.mine(1);
    assert!(handle.wait().await.is_confirmed());

    // Neither round is claimable once the previous window has closed
    mine_to(&ledger, 190);
    assert!(matches!(engine.claim(7).unwrap(), ClaimOutcome::NotInClaimPeriod { .. }));
}

#[test]
fn test_candidate_too_small_keeps_entry() {
    let ledger = sim(120);
    ledger.fund(COIN);
    let config = EngineConfig {
        stake: MIN_TX_FEE + 100,
        ..EngineConfig::default()
    };
    let engine = LotteryEngine::new(ledger.clone(), config).unwrap();
    submitted(engine.enter(3).unwrap());

    mine_to(&ledger, 156);
    let outcomes = attempted(engine.claim(3).unwrap());
    assert!(matches!(outcomes[0], CandidateOutcome::InsufficientFunds { .. }));
    assert_eq!(engine.entries().len(), 1);
}

// =============================================================================
// Ledger refusing the claim before broadcast
// =============================================================================

struct RefusingLedger(SimLedger);

impl Ledger for RefusingLedger {
    fn current_height(&self) -> Option<u64> {
        self.0.current_height()
    }
    fn round_config(&self) -> RoundConfig {
        self.0.round_config()
    }
    fn balance(&self) -> u64 {
        self.0.balance()
    }
    fn change_address(&self) -> Address {
        self.0.change_address()
    }
    fn spendable_outputs(&self, pattern: ScriptPattern) -> Vec<Output> {
        self.0.spendable_outputs(pattern)
    }
    fn build_and_send(&self, tx: Transaction, depth: u32) -> Result<TxHandle, LedgerError> {
        if tx.inputs.is_empty() {
            self.0.build_and_send(tx, depth)
        } else {
            Err(LedgerError::Unavailable("peer group offline".into()))
        }
    }
}

#[test]
fn test_refused_claim_restores_entry() {
    let inner = SimLedger::new(RoundSchedule::Fixed(RoundConfig::new(100, 50, 6, 20)), 120);
    inner.fund(2 * COIN);
    let ledger = Arc::new(RefusingLedger(inner));
    let engine = LotteryEngine::new(ledger.clone(), EngineConfig::default()).unwrap();
    submitted(engine.enter(5).unwrap());
    let before = engine.entries();

    ledger.0.mine(36);
    let outcomes = attempted(engine.claim(5).unwrap());
    match &outcomes[0] {
        CandidateOutcome::SendFailed { reason, .. } => assert!(reason.contains("offline")),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(outcomes[0].state(), ClaimState::TxBuilt);
    assert_eq!(engine.entries(), before);
}

// =============================================================================
// One candidate failing mid-claim
// =============================================================================

/// Entry script whose bits operand no reveal can satisfy
fn unrevealable_entry(window: &RoundWindow, guess: Guess, operator: &Address) -> Script {
    ScriptBuilder::new()
        .op(Opcode::OP_IF)
        .push_int(window.reveal_closes_at as i64)
        .op(Opcode::OP_CHECKLOCKTIMEVERIFY)
        .op(Opcode::OP_DROP)
        .push_int(300)
        .op(Opcode::OP_EQUALVERIFY)
        .push_int(window.reveal_opens_at as i64)
        .push_int(window.beacon_end() as i64)
        .push_int(300)
        .op(Opcode::OP_BEACON)
        .op(Opcode::OP_EQUALVERIFY)
        .push_data(&guess.to_bytes())
        .op(Opcode::OP_EQUAL)
        .op(Opcode::OP_ELSE)
        .push_int(window.claim_window_end as i64)
        .op(Opcode::OP_CHECKLOCKTIMEVERIFY)
        .op(Opcode::OP_DROP)
        .op(Opcode::OP_DUP)
        .op(Opcode::OP_HASH160)
        .push_data(operator.pubkey_hash())
        .op(Opcode::OP_EQUALVERIFY)
        .op(Opcode::OP_CHECKSIG)
        .op(Opcode::OP_ENDIF)
        .build()
        .unwrap()
}

/// Shows one real candidate followed by `extra`
struct ExtraOutputLedger {
    inner: SimLedger,
    extra: Output,
}

impl Ledger for ExtraOutputLedger {
    fn current_height(&self) -> Option<u64> {
        self.inner.current_height()
    }
    fn round_config(&self) -> RoundConfig {
        self.inner.round_config()
    }
    fn balance(&self) -> u64 {
        self.inner.balance()
    }
    fn change_address(&self) -> Address {
        self.inner.change_address()
    }
    fn spendable_outputs(&self, pattern: ScriptPattern) -> Vec<Output> {
        let mut outputs = self.inner.spendable_outputs(pattern);
        outputs.truncate(1);
        outputs.push(self.extra.clone());
        outputs
    }
    fn build_and_send(&self, tx: Transaction, depth: u32) -> Result<TxHandle, LedgerError> {
        self.inner.build_and_send(tx, depth)
    }
}

#[test]
fn test_failed_candidate_keeps_earlier_broadcasts() {
    let inner = SimLedger::new(RoundSchedule::Fixed(RoundConfig::new(100, 50, 6, 20)), 120);
    inner.fund(3 * COIN);
    let window = inner.round_config().window().unwrap();
    let extra = Output {
        outpoint: OutPoint::new(TxHash([9; 32]), 0),
        value: COIN,
        script_pubkey: unrevealable_entry(&window, Guess::from(7), &inner.change_address()),
    };
    let ledger = Arc::new(ExtraOutputLedger { inner, extra });
    let engine = LotteryEngine::new(ledger.clone(), EngineConfig::default()).unwrap();
    submitted(engine.enter(7).unwrap());
    submitted(engine.enter(7).unwrap());

    ledger.inner.mine(36);
    let outcomes = attempted(engine.claim(7).unwrap());
    assert_eq!(outcomes.len(), 2);
    assert!(matches!(outcomes[0], CandidateOutcome::Broadcast { .. }));

    match outcomes.last().unwrap() {
        CandidateOutcome::Failed { outpoint, .. } => assert_eq!(outpoint.tx_hash, TxHash([9; 32])),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(outcomes.last().unwrap().state(), ClaimState::EntryMatched);
    assert_eq!(engine.entries().len(), 1);
}

// =============================================================================
// Automatic mode
// =============================================================================

#[tokio::test]
async fn test_automatic_round() {
    let (event_tx, event_rx) = mpsc::channel(256);
    let (done_tx, mut done_rx) = mpsc::channel(16);
    let ledger = Arc::new(
        SimLedger::new(RoundSchedule::Fixed(RoundConfig::new(100, 50, 6, 20)), 100).with_events(event_tx),
    );
    let config = EngineConfig {
        auto_enter: true,
        auto_claim: true,
        auto_guess: Some(11),
        ..EngineConfig::default()
    };
    let engine = Arc::new(LotteryEngine::new(ledger.clone(), config).unwrap());
    let triggers = tokio::spawn(run_triggers(engine.clone(), event_rx, Some(done_tx)));

    ledger.fund(3 * COIN);
    for _ in 0..100 {
        if !engine.entries().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let entry = engine.entries().remove(0);
    assert_eq!(entry.guess, Guess::from(11));

    // A second deposit in the same round does not enter again
    ledger.fund(COIN);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(engine.entries().len(), 1);

    let window = engine.current_window().unwrap();
    ledger.rig_beacon(&window, &entry.funding_hash, entry.guess);
    while ledger.current_height().unwrap() < 160 {
        ledger.mine(1);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let mut claimed = None;
    for _ in 0..10 {
        match tokio::time::timeout(Duration::from_millis(200), done_rx.recv()).await {
            Ok(Some(Completion::Claimed { outcome, .. })) => {
                claimed = Some(outcome);
                break;
            }
            Ok(Some(Completion::Entered { outcome, .. })) => assert!(outcome.is_confirmed()),
            _ => break,
        }
    }
    assert!(claimed.map(|o| o.is_confirmed()).unwrap_or(false));
    assert!(engine.entries().is_empty());

    triggers.abort();
}
