// =============================================================================
// LOTTERYNET - Protocol Constants
// Commit-reveal lottery over beacon and timelock scripts
// =============================================================================

pub mod address;
pub mod transaction;
pub mod script;
pub mod ledger;
pub mod lottery;
pub mod sim;
pub mod shell;

// --- Amounts ---
pub const COIN: u64 = 100_000_000;                 // Base units per coin (10^8)
pub const ENTRY_STAKE: u64 = COIN;                 // Fixed stake locked by every entry
pub const MIN_TX_FEE: u64 = 5_000;                 // Fixed network fee per lottery tx
pub const DUST_RELAY_FEE_PER_BYTE: u64 = 3;        // Dust floor multiplier
pub const DUST_SPEND_SIZE: u64 = 148;              // Bytes needed to spend a P2PKH output later

// --- Proof strength ---
pub const DEFAULT_BITS_OF_RANDOMNESS: u32 = 20;
pub const MAX_BITS_OF_RANDOMNESS: u32 = 256;

// --- Transactions ---
pub const TX_VERSION: u32 = 1;
pub const SEQUENCE_FINAL: u32 = 0xFFFF_FFFF;
pub const CLAIM_SEQUENCE: u32 = 100;               // Any non-final value keeps nLockTime active
pub const LOCKTIME_THRESHOLD: u32 = 500_000_000;   // Below: block height, above: timestamp

// --- Address ---
pub const ADDRESS_VERSION: u8 = 0x6f;

// --- Automatic mode ---
pub const AUTO_GUESS_MIN: i64 = 1;
pub const AUTO_GUESS_MAX: i64 = 100;
pub const DEFAULT_CONFIRMATIONS: u32 = 1;

// --- Utilities ---

/// Minimum non-dust value of an output with a script of `script_len` bytes.
pub fn min_non_dust_value(script_len: usize) -> u64 {
    let output_len = 8 + varint_len(script_len as u64) + script_len as u64;
    DUST_RELAY_FEE_PER_BYTE * (output_len + DUST_SPEND_SIZE)
}

fn varint_len(n: u64) -> u64 {
    match n {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x1_0000..=0xffff_ffff => 5,
        _ => 9,
    }
}

pub fn format_coins(units: u64) -> String {
    let whole = units / COIN;
    let frac = units % COIN;
    if frac == 0 {
        format!("{} LOT", whole)
    } else {
        format!("{}.{:08} LOT", whole, frac)
    }
}
