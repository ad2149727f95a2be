// =============================================================================
// LOTTERYNET - Lottery Script Templates
// =============================================================================
//
// Entry (commitment), locks the stake:
//
//   OP_IF
//       <revealClosesAt> OP_CHECKLOCKTIMEVERIFY OP_DROP
//       <bits> OP_EQUALVERIFY
//       <revealOpensAt> <revealClosesAt-1> <bits> OP_BEACON OP_EQUALVERIFY
//       <guess> OP_EQUAL
//   OP_ELSE
//       <claimWindowEnd> OP_CHECKLOCKTIMEVERIFY OP_DROP
//       OP_DUP OP_HASH160 <operator> OP_EQUALVERIFY OP_CHECKSIG
//   OP_ENDIF
//
// Reveal (guess), unlocks the claim branch:
//
//   <fundingHash> <guess> <bits> OP_FLEXIHASH <bits> OP_1
//
// =============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};

use super::entry::Entry;
use super::round::RoundWindow;
use super::LotteryError;
use crate::address::Address;
use crate::script::{Opcode, Script, ScriptBuilder, ScriptElement};
use crate::MAX_BITS_OF_RANDOMNESS;

// =============================================================================
// Guess
// =============================================================================

/// A guess in its committed form: signed 32-bit, 4 bytes big-endian
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Guess(i32);

impl Guess {
    pub fn new(value: i64) -> Result<Self, LotteryError> {
        i32::try_from(value)
            .map(Guess)
            .map_err(|_| LotteryError::InvalidGuess(value))
    }

    pub fn value(&self) -> i32 {
        self.0
    }

    pub fn to_bytes(&self) -> [u8; 4] {
        self.0.to_be_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; 4] = bytes.try_into().ok()?;
        Some(Guess(i32::from_be_bytes(arr)))
    }
}

impl From<i32> for Guess {
    fn from(value: i32) -> Self {
        Guess(value)
    }
}

impl fmt::Display for Guess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub fn validate_bits(bits: u32) -> Result<(), LotteryError> {
    if bits == 0 || bits > MAX_BITS_OF_RANDOMNESS {
        return Err(LotteryError::InvalidConfiguration(format!(
            "bits of randomness must be in 1..={}, got {}",
            MAX_BITS_OF_RANDOMNESS, bits
        )));
    }
    Ok(())
}

// =============================================================================
// Templates
// =============================================================================

/// Commitment script locking one entry's stake
pub fn entry_script(
    window: &RoundWindow,
    guess: Guess,
    bits: u32,
    operator: &Address,
) -> Result<Script, LotteryError> {
    validate_bits(bits)?;

    let script = ScriptBuilder::new()
        .op(Opcode::OP_IF)
        .push_int(window.reveal_closes_at as i64)
        .op(Opcode::OP_CHECKLOCKTIMEVERIFY)
        .op(Opcode::OP_DROP)
        .push_int(bits as i64)
        .op(Opcode::OP_EQUALVERIFY)
        .push_int(window.reveal_opens_at as i64)
        .push_int(window.beacon_end() as i64)
        .push_int(bits as i64)
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
        .build()?;

    Ok(script)
}

/// Reveal for a tracked entry; the trailing OP_1 selects the claim branch
pub fn reveal_script(entry: &Entry, bits: u32) -> Result<Script, LotteryError> {
    validate_bits(bits)?;

    let script = ScriptBuilder::new()
        .push_data(entry.funding_hash.as_bytes())
        .push_data(&entry.guess.to_bytes())
        .push_int(bits as i64)
        .op(Opcode::OP_FLEXIHASH)
        .push_int(bits as i64)
        .op(Opcode::OP_1)
        .build()?;

    Ok(script)
}

// =============================================================================
// Pattern Matching
// =============================================================================

#[derive(Clone, Copy)]
enum Slot {
    Op(Opcode),
    Data,
}

const ENTRY_SKELETON: [Slot; 23] = [
    Slot::Op(Opcode::OP_IF),
    Slot::Data,
    Slot::Op(Opcode::OP_CHECKLOCKTIMEVERIFY),
    Slot::Op(Opcode::OP_DROP),
    Slot::Data,
    Slot::Op(Opcode::OP_EQUALVERIFY),
    Slot::Data,
    Slot::Data,
    Slot::Data,
    Slot::Op(Opcode::OP_BEACON),
    Slot::Op(Opcode::OP_EQUALVERIFY),
    Slot::Data,
    Slot::Op(Opcode::OP_EQUAL),
    Slot::Op(Opcode::OP_ELSE),
    Slot::Data,
    Slot::Op(Opcode::OP_CHECKLOCKTIMEVERIFY),
    Slot::Op(Opcode::OP_DROP),
    Slot::Op(Opcode::OP_DUP),
    Slot::Op(Opcode::OP_HASH160),
    Slot::Data,
    Slot::Op(Opcode::OP_EQUALVERIFY),
    Slot::Op(Opcode::OP_CHECKSIG),
    Slot::Op(Opcode::OP_ENDIF),
];

/// True if the script has the entry opcode skeleton, whatever the embedded
/// heights, guess and operator
pub fn is_entry_script(script: &Script) -> bool {
    let elements = script.elements();
    elements.len() == ENTRY_SKELETON.len()
        && elements.iter().zip(ENTRY_SKELETON.iter()).all(|(element, slot)| match slot {
            Slot::Op(op) => element == &ScriptElement::Op(*op),
            Slot::Data => element.is_push_like(),
        })
}

/// Values embedded in an entry script
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryTerms {
    pub reveal_opens_at: u64,
    pub beacon_end: u64,
    pub reveal_closes_at: u64,
    pub claim_window_end: u64,
    pub bits: u32,
    pub guess: Guess,
    pub operator: Address,
}

impl EntryTerms {
    pub fn parse(script: &Script) -> Option<EntryTerms> {
        if !is_entry_script(script) {
            return None;
        }
        let e = script.elements();

        let height = |i: usize| e[i].as_int().and_then(|n| u64::try_from(n).ok());
        let bits = e[4].as_int().and_then(|n| u32::try_from(n).ok())?;
        // Both bits operands must agree or the claim branch can never pass
        if e[8].as_int() != Some(bits as i64) {
            return None;
        }

        let guess = Guess::from_bytes(e[11].as_push()?)?;
        let operator_hash: [u8; 20] = e[19].as_push()?.try_into().ok()?;

        Some(EntryTerms {
            reveal_closes_at: height(1)?,
            reveal_opens_at: height(6)?,
            beacon_end: height(7)?,
            claim_window_end: height(14)?,
            bits,
            guess,
            operator: Address::from_pubkey_hash(operator_hash),
        })
    }

    /// True if a reveal built from `entry` with these bits targets this commitment
    pub fn accepts(&self, entry: &Entry, bits: u32) -> bool {
        self.guess == entry.guess && self.bits == bits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::TxHash;
    use chrono::Utc;

    fn operator() -> Address {
        Address::from_pubkey_hash([0x11; 20])
    }

    fn window() -> RoundWindow {
        RoundWindow::new(100, 50, 6, 20).unwrap()
    }

    #[test]
    fn test_guess_range() {
        assert_eq!(Guess::new(7).unwrap().to_bytes(), [0, 0, 0, 7]);
        assert_eq!(Guess::new(-1).unwrap().to_bytes(), [0xff; 4]);
        assert_eq!(Guess::new(i64::from(i32::MAX) + 1), Err(LotteryError::InvalidGuess(2_147_483_648)));
        assert!(Guess::new(i64::from(i32::MIN)).is_ok());
    }

    #[test]
    fn test_entry_script_layout() {
        let script = entry_script(&window(), Guess::from(7), 20, &operator()).unwrap();
        let e = script.elements();

        assert_eq!(e[0], ScriptElement::Op(Opcode::OP_IF));
        assert_eq!(e[1].as_int(), Some(156));
        assert_eq!(e[6].as_int(), Some(150));
        assert_eq!(e[7].as_int(), Some(155));
        assert_eq!(e[9], ScriptElement::Op(Opcode::OP_BEACON));
        assert_eq!(e[13], ScriptElement::Op(Opcode::OP_ELSE));
        assert_eq!(e[14].as_int(), Some(176));
        assert_eq!(e[22], ScriptElement::Op(Opcode::OP_ENDIF));
        assert!(is_entry_script(&script));
    }

    #[test]
    fn test_pattern_survives_serialization() {
        let script = entry_script(&window(), Guess::from(-12), 8, &operator()).unwrap();
        let parsed = Script::from_bytes(&script.to_bytes()).unwrap();
        assert!(is_entry_script(&parsed));
        assert!(!is_entry_script(&operator().script_pubkey()));
    }

    #[test]
    fn test_reveal_matches_commitment() {
        let script = entry_script(&window(), Guess::from(42), 20, &operator()).unwrap();
        let entry = Entry::new(TxHash([7; 32]), Guess::from(42), Utc::now());
        let reveal = reveal_script(&entry, 20).unwrap();

        let terms = EntryTerms::parse(&script).unwrap();
        assert!(terms.accepts(&entry, 20));
        assert!(!terms.accepts(&entry, 21));
        assert_eq!(terms.operator, operator());
        assert_eq!(terms.reveal_closes_at, 156);

        let r = reveal.elements();
        assert_eq!(r[0].as_push(), Some(&[7u8; 32][..]));
        assert_eq!(r[1].as_push(), Some(&42i32.to_be_bytes()[..]));
        assert_eq!(r[2].as_int(), Some(20));
        assert_eq!(r[3], ScriptElement::Op(Opcode::OP_FLEXIHASH));
        assert_eq!(r[4].as_int(), Some(20));
        assert_eq!(r[5], ScriptElement::Op(Opcode::OP_1));
    }

    #[test]
    fn test_bits_validated() {
        assert!(entry_script(&window(), Guess::from(1), 0, &operator()).is_err());
        assert!(entry_script(&window(), Guess::from(1), 257, &operator()).is_err());
        assert!(entry_script(&window(), Guess::from(1), 256, &operator()).is_ok());
    }
}
