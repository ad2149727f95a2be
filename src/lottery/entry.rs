// =============================================================================
// LOTTERYNET - Entry Store
// =============================================================================
//
// Entries submitted by this process, kept in memory only. A claim attempt
// takes the earliest entry for its guess out of the store, so every tracked
// commitment is revealed at most once.
//
// =============================================================================

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::encoder::Guess;
use crate::transaction::TxHash;

/// A locally submitted lottery entry
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Transaction whose output holds the stake
    pub funding_hash: TxHash,
    pub guess: Guess,
    /// Local wall-clock time of submission
    pub submitted_at: DateTime<Utc>,
}

impl Entry {
    pub fn new(funding_hash: TxHash, guess: Guess, submitted_at: DateTime<Utc>) -> Self {
        Entry {
            funding_hash,
            guess,
            submitted_at,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct EntryStore {
    entries: Vec<Entry>,
}

impl EntryStore {
    pub fn new() -> Self {
        EntryStore { entries: Vec::new() }
    }

    /// Duplicates are allowed; each copy is taken separately
    pub fn record(&mut self, entry: Entry) {
        self.entries.push(entry);
    }

    /// Remove and return the entry with this guess and the smallest
    /// `submitted_at`. Equal timestamps go to the one recorded first.
    pub fn take_earliest_matching(&mut self, guess: Guess) -> Option<Entry> {
        let mut best: Option<usize> = None;

        for (i, entry) in self.entries.iter().enumerate() {
            if entry.guess != guess {
                continue;
            }
            match best {
                Some(b) if self.entries[b].submitted_at <= entry.submitted_at => {}
                _ => best = Some(i),
            }
        }

        best.map(|i| self.entries.remove(i))
    }

    /// Put back an entry whose reveal never left the process
    pub fn restore(&mut self, entry: Entry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Distinct tracked guesses, ascending
    pub fn guesses(&self) -> Vec<Guess> {
        self.entries
            .iter()
            .map(|e| e.guess)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn contains_guess(&self, guess: Guess) -> bool {
        self.entries.iter().any(|e| e.guess == guess)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
