// =============================================================================
// LOTTERYNET - Round Clock
// =============================================================================
//
//   startBlock ── period ──> revealOpensAt ── delay ──> revealClosesAt
//              ── claimingPeriod ──> claimWindowEnd
//
// Reveals are checked against the beacon over [revealOpensAt, revealClosesAt-1];
// claims are accepted in [revealOpensAt, claimWindowEnd); after that the
// stake rolls over to the operator.
//
// =============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};

use super::LotteryError;

/// Round constants published by the chain
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoundConfig {
    pub start_block: u64,
    pub period: u64,
    pub delay: u64,
    pub claiming_period: u64,
}

/// Which round a claim or listing refers to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum RoundSelector {
    #[default]
    Current,
    Previous,
}

impl RoundConfig {
    pub fn new(start_block: u64, period: u64, delay: u64, claiming_period: u64) -> Self {
        RoundConfig {
            start_block,
            period,
            delay,
            claiming_period,
        }
    }

    /// Round that contains `height`, for rounds starting every `period`
    /// blocks from `anchor`. Heights before the anchor map to the first round.
    pub fn for_height(anchor: u64, height: u64, period: u64, delay: u64, claiming_period: u64) -> Self {
        let start_block = if period == 0 || height <= anchor {
            anchor
        } else {
            anchor + (height - anchor) / period * period
        };
        RoundConfig::new(start_block, period, delay, claiming_period)
    }

    pub fn validate(&self) -> Result<(), LotteryError> {
        let mut problems = Vec::new();
        if self.period == 0 {
            problems.push("period");
        }
        if self.delay == 0 {
            problems.push("delay");
        }
        if self.claiming_period == 0 {
            problems.push("claiming period");
        }
        if !problems.is_empty() {
            return Err(LotteryError::InvalidConfiguration(format!(
                "{} must be positive",
                problems.join(", ")
            )));
        }
        if self
            .start_block
            .checked_add(self.period)
            .and_then(|h| h.checked_add(self.delay))
            .and_then(|h| h.checked_add(self.claiming_period))
            .is_none()
        {
            return Err(LotteryError::InvalidConfiguration("round boundaries overflow".into()));
        }
        Ok(())
    }

    pub fn window(&self) -> Result<RoundWindow, LotteryError> {
        RoundWindow::new(self.start_block, self.period, self.delay, self.claiming_period)
    }

    /// The immediately preceding round; None when `start_block - period <= 0`
    pub fn previous(&self) -> Option<RoundConfig> {
        if self.start_block <= self.period {
            return None;
        }
        Some(RoundConfig {
            start_block: self.start_block - self.period,
            ..*self
        })
    }

    pub fn select(&self, selector: RoundSelector) -> Option<RoundConfig> {
        match selector {
            RoundSelector::Current => Some(*self),
            RoundSelector::Previous => self.previous(),
        }
    }
}

/// Derived round boundaries, recomputed on demand
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoundWindow {
    pub start_block: u64,
    pub period: u64,
    pub delay: u64,
    pub claiming_period: u64,
    pub reveal_opens_at: u64,
    pub reveal_closes_at: u64,
    pub claim_window_end: u64,
}

impl RoundWindow {
    pub fn new(start_block: u64, period: u64, delay: u64, claiming_period: u64) -> Result<Self, LotteryError> {
        RoundConfig::new(start_block, period, delay, claiming_period).validate()?;

        let reveal_opens_at = start_block + period;
        let reveal_closes_at = reveal_opens_at + delay;
        let claim_window_end = reveal_closes_at + claiming_period;

        Ok(RoundWindow {
            start_block,
            period,
            delay,
            claiming_period,
            reveal_opens_at,
            reveal_closes_at,
            claim_window_end,
        })
    }

    /// Last height whose beacon value the reveal is checked against
    pub fn beacon_end(&self) -> u64 {
        self.reveal_closes_at - 1
    }

    /// revealOpensAt <= height < claimWindowEnd
    pub fn in_claim_period(&self, height: u64) -> bool {
        height >= self.reveal_opens_at && height < self.claim_window_end
    }

    /// Rollover branch is spendable
    pub fn rollover_open(&self, height: u64) -> bool {
        height >= self.claim_window_end
    }

    pub fn blocks_until_reveal(&self, height: u64) -> u64 {
        self.reveal_opens_at.saturating_sub(height)
    }
}

impl fmt::Display for RoundWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "round@{}: reveal [{}, {}) claim until {}",
            self.start_block, self.reveal_opens_at, self.reveal_closes_at, self.claim_window_end
        )
    }
}
