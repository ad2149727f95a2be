// =============================================================================
// LOTTERYNET - Transactions (UTXO Model)
// =============================================================================

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::script::{hash256, Script};
use crate::{SEQUENCE_FINAL, TX_VERSION};

// =============================================================================
// Transaction Hash
// =============================================================================

/// 32-byte transaction identifier (double SHA-256)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct TxHash(pub [u8; 32]);

impl TxHash {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, String> {
        let bytes = hex::decode(s.trim()).map_err(|e| e.to_string())?;
        if bytes.len() != 32 {
            return Err(format!("Expected 32 bytes, got {}", bytes.len()));
        }
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&bytes);
        Ok(TxHash(hash))
    }

    /// First 8 hex chars, for logs
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for TxHash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_hex().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for TxHash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let hex_str = String::deserialize(deserializer)?;
        TxHash::from_hex(&hex_str).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Inputs / Outputs
// =============================================================================

/// Reference to a transaction output: (tx_hash, output_index)
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutPoint {
    pub tx_hash: TxHash,
    pub index: u32,
}

impl OutPoint {
    pub fn new(tx_hash: TxHash, index: u32) -> Self {
        OutPoint { tx_hash, index }
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.tx_hash, self.index)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TxIn {
    pub previous_output: OutPoint,
    pub script_sig: Script,
    pub sequence: u32,
}

impl TxIn {
    pub fn new(previous_output: OutPoint, script_sig: Script) -> Self {
        TxIn {
            previous_output,
            script_sig,
            sequence: SEQUENCE_FINAL,
        }
    }

    pub fn with_sequence(previous_output: OutPoint, script_sig: Script, sequence: u32) -> Self {
        TxIn {
            previous_output,
            script_sig,
            sequence,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TxOut {
    pub value: u64,
    pub script_pubkey: Script,
}

impl TxOut {
    pub fn new(value: u64, script_pubkey: Script) -> Self {
        TxOut { value, script_pubkey }
    }

    /// Serialized size: value + varint(script_len) + script
    pub fn serialized_len(&self) -> usize {
        let script_len = self.script_pubkey.to_bytes().len();
        8 + if script_len < 0xfd { 1 } else { 3 } + script_len
    }

    pub fn min_non_dust_value(&self) -> u64 {
        crate::min_non_dust_value(self.script_pubkey.to_bytes().len())
    }
}

// =============================================================================
// Transaction
// =============================================================================

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    pub version: u32,
    pub inputs: Vec<TxIn>,
    pub outputs: Vec<TxOut>,
    pub lock_time: u32,
}

impl Default for Transaction {
    fn default() -> Self {
        Transaction::new()
    }
}

impl Transaction {
    pub fn new() -> Self {
        Transaction {
            version: TX_VERSION,
            inputs: Vec::new(),
            outputs: Vec::new(),
            lock_time: 0,
        }
    }

    pub fn add_input(&mut self, input: TxIn) -> &mut Self {
        self.inputs.push(input);
        self
    }

    pub fn add_output(&mut self, output: TxOut) -> &mut Self {
        self.outputs.push(output);
        self
    }

    pub fn set_lock_time(&mut self, lock_time: u32) -> &mut Self {
        self.lock_time = lock_time;
        self
    }

    pub fn output_sum(&self) -> u64 {
        self.outputs.iter().map(|o| o.value).sum()
    }

    /// Double SHA-256 of the canonical encoding
    pub fn hash(&self) -> TxHash {
        TxHash(hash256(&self.encode()))
    }

    /// Digest signed by OP_CHECKSIG (all scriptSigs blanked)
    pub fn signature_hash(&self) -> [u8; 32] {
        let mut copy = self.clone();
        for input in &mut copy.inputs {
            input.script_sig = Script::new();
        }
        hash256(&copy.encode())
    }

    pub fn encode(&self) -> Vec<u8> {
        // Every field is a plain integer, byte string or vector
        bincode::serialize(self).unwrap_or_default()
    }

    pub fn size(&self) -> usize {
        self.encode().len()
    }
}
