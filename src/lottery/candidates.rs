// =============================================================================
// LOTTERYNET - Claim Candidates
// =============================================================================

use serde::{Deserialize, Serialize};

use super::encoder::is_entry_script;
use super::round::{RoundConfig, RoundSelector, RoundWindow};
use super::LotteryError;
use crate::ledger::Output;

/// Result of a candidate lookup. Being outside the claim period is distinct
/// from an in-window lookup that found nothing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CandidateSet {
    InWindow { window: RoundWindow, outputs: Vec<Output> },
    NotInClaimPeriod { window: RoundWindow, height: u64 },
    NoPreviousRound,
}

impl CandidateSet {
    pub fn outputs(&self) -> &[Output] {
        match self {
            CandidateSet::InWindow { outputs, .. } => outputs,
            _ => &[],
        }
    }

    pub fn total_value(&self) -> u64 {
        self.outputs().iter().map(|o| o.value).sum()
    }
}

/// Entry-shaped outputs, if `height` lies in the selected round's claim period
pub fn select_candidates(
    outputs: &[Output],
    height: u64,
    round: &RoundConfig,
    selector: RoundSelector,
) -> Result<CandidateSet, LotteryError> {
    let round = match round.select(selector) {
        Some(round) => round,
        None => return Ok(CandidateSet::NoPreviousRound),
    };
    let window = round.window()?;

    if !window.in_claim_period(height) {
        return Ok(CandidateSet::NotInClaimPeriod { window, height });
    }

    let outputs = outputs
        .iter()
        .filter(|o| is_entry_script(&o.script_pubkey))
        .cloned()
        .collect();

    Ok(CandidateSet::InWindow { window, outputs })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Address;
    use crate::lottery::encoder::{entry_script, Guess};
    use crate::transaction::{OutPoint, TxHash};

    fn round() -> RoundConfig {
        RoundConfig::new(100, 50, 6, 20)
    }

    fn outputs() -> Vec<Output> {
        let window = round().window().unwrap();
        let operator = Address::from_pubkey_hash([3; 20]);
        vec![
            Output {
                outpoint: OutPoint::new(TxHash([1; 32]), 0),
                value: 100_000_000,
                script_pubkey: entry_script(&window, Guess::from(7), 20, &operator).unwrap(),
            },
            Output {
                outpoint: OutPoint::new(TxHash([2; 32]), 1),
                value: 5_000_000,
                script_pubkey: operator.script_pubkey(),
            },
        ]
    }

    #[test]
    fn test_inclusive_lower_bound() {
        let set = select_candidates(&outputs(), 150, &round(), RoundSelector::Current).unwrap();
        assert_eq!(set.outputs().len(), 1);
        assert_eq!(set.outputs()[0].outpoint.tx_hash, TxHash([1; 32]));
        assert_eq!(set.total_value(), 100_000_000);
    }

    #[test]
    fn test_exclusive_upper_bound() {
        let set = select_candidates(&outputs(), 176, &round(), RoundSelector::Current).unwrap();
        assert!(matches!(set, CandidateSet::NotInClaimPeriod { height: 176, .. }));

        let set = select_candidates(&outputs(), 149, &round(), RoundSelector::Current).unwrap();
        assert!(matches!(set, CandidateSet::NotInClaimPeriod { .. }));
    }

    #[test]
    fn test_empty_in_window_is_not_out_of_period() {
        let set = select_candidates(&[], 160, &round(), RoundSelector::Current).unwrap();
        assert!(matches!(set, CandidateSet::InWindow { ref outputs, .. } if outputs.is_empty()));
    }

    #[test]
    fn test_previous_round() {
        // previous round starts at 50: claims in [100, 126)
        let set = select_candidates(&outputs(), 110, &round(), RoundSelector::Previous).unwrap();
        match set {
            CandidateSet::InWindow { window, .. } => assert_eq!(window.start_block, 50),
            other => panic!("unexpected {:?}", other),
        }

        let first = RoundConfig::new(50, 50, 6, 20);
        assert_eq!(
            select_candidates(&outputs(), 110, &first, RoundSelector::Previous).unwrap(),
            CandidateSet::NoPreviousRound
        );
    }

    #[test]
    fn test_bad_round_constants() {
        let bad = RoundConfig::new(100, 0, 6, 20);
        assert!(select_candidates(&outputs(), 150, &bad, RoundSelector::Current).is_err());
    }
}
