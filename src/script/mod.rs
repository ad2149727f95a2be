// =============================================================================
// LOTTERYNET - Script System
// =============================================================================
//
// Scripts are immutable sequences of tagged elements (opcode or data push).
// They are assembled with `ScriptBuilder`, which validates the sequence once
// at build time, and serialized to the usual Bitcoin byte encoding.
//
// Example P2PKH:
//   scriptPubKey: OP_DUP OP_HASH160 <pubKeyHash> OP_EQUALVERIFY OP_CHECKSIG
//
// =============================================================================

pub mod opcodes;
pub mod builder;
pub mod interpreter;

pub use opcodes::Opcode;
pub use builder::ScriptBuilder;
pub use interpreter::{
    verify_spend, flexihash, truncate_to_bits,
    BeaconSource, ExecutionContext, Interpreter,
};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Sha256, Digest};
use ripemd::Ripemd160;

/// Largest data push accepted by the builder and the parser
pub const MAX_PUSH_SIZE: usize = 520;

/// Largest script number operand (5 bytes covers every u32 lock time)
pub const MAX_NUM_SIZE: usize = 5;

// =============================================================================
// Errors
// =============================================================================

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScriptError {
    /// IF/NOTIF/ELSE/ENDIF do not nest properly
    UnbalancedConditional,
    /// Data push exceeds MAX_PUSH_SIZE
    PushTooLarge(usize),
    /// Byte encoding is truncated or malformed
    InvalidEncoding(String),
    /// Byte does not map to a supported opcode
    UnknownOpcode(u8),
    /// Not enough stack elements for the operation
    StackUnderflow,
    /// OP_VERIFY / OP_EQUALVERIFY failed
    VerifyFailed,
    /// Operand is not a valid script number
    InvalidNumber,
    /// Negative lock time operand
    NegativeLocktime,
    /// Transaction lock time below the required one
    LocktimeNotSatisfied { required: i64, lock_time: u32 },
    /// Input sequence is final, lock time is ignored
    SequenceFinal,
    /// Beacon value for the height range is not published yet
    BeaconUnavailable { start: u64, end: u64 },
    /// OP_CHECKSIG could not parse its operands
    SigCheckFailed(String),
}

impl std::fmt::Display for ScriptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScriptError::UnbalancedConditional => write!(f, "Unbalanced IF/ELSE/ENDIF"),
            ScriptError::PushTooLarge(len) => {
                write!(f, "Push of {} bytes exceeds {} bytes", len, MAX_PUSH_SIZE)
            }
            ScriptError::InvalidEncoding(msg) => write!(f, "Invalid script encoding: {}", msg),
            ScriptError::UnknownOpcode(b) => write!(f, "Unknown opcode 0x{:02x}", b),
            ScriptError::StackUnderflow => write!(f, "Stack underflow"),
            ScriptError::VerifyFailed => write!(f, "Verification failed"),
            ScriptError::InvalidNumber => write!(f, "Invalid script number"),
            ScriptError::NegativeLocktime => write!(f, "Negative lock time"),
            ScriptError::LocktimeNotSatisfied { required, lock_time } => {
                write!(f, "Lock time {} below required {}", lock_time, required)
            }
            ScriptError::SequenceFinal => write!(f, "Sequence is final, lock time disabled"),
            ScriptError::BeaconUnavailable { start, end } => {
                write!(f, "Beacon for heights {}..={} unavailable", start, end)
            }
            ScriptError::SigCheckFailed(msg) => write!(f, "Signature check failed: {}", msg),
        }
    }
}

impl std::error::Error for ScriptError {}

// =============================================================================
// Script Elements
// =============================================================================

/// One element of a script: an opcode or a data push
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ScriptElement {
    Op(Opcode),
    Push(Vec<u8>),
}

impl ScriptElement {
    pub fn as_push(&self) -> Option<&[u8]> {
        match self {
            ScriptElement::Push(data) => Some(data),
            ScriptElement::Op(_) => None,
        }
    }

    /// Numeric value of a push or small-int opcode
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ScriptElement::Push(data) => decode_num(data, MAX_NUM_SIZE).ok(),
            ScriptElement::Op(op) => op.small_int(),
        }
    }

    /// True for anything that places a value on the stack
    pub fn is_push_like(&self) -> bool {
        match self {
            ScriptElement::Push(_) => true,
            ScriptElement::Op(op) => op.small_int().is_some(),
        }
    }
}

// =============================================================================
// Script
// =============================================================================

/// A validated, immutable script
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Script {
    elements: Vec<ScriptElement>,
}

impl Script {
    pub fn new() -> Self {
        Script { elements: Vec::new() }
    }

    /// Only the builder and the parser create non-empty scripts
    pub(crate) fn from_elements(elements: Vec<ScriptElement>) -> Self {
        Script { elements }
    }

    pub fn elements(&self) -> &[ScriptElement] {
        &self.elements
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Parse a serialized script
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ScriptError> {
        let mut elements = Vec::new();
        let mut i = 0;

        while i < bytes.len() {
            let b = bytes[i];

            let (len, header) = match b {
                0x01..=0x4b => (b as usize, 1),
                0x4c => {
                    let len = *bytes.get(i + 1)
                        .ok_or_else(|| ScriptError::InvalidEncoding("missing PUSHDATA1 length".into()))?;
                    (len as usize, 2)
                }
                0x4d => {
                    if i + 2 >= bytes.len() {
                        return Err(ScriptError::InvalidEncoding("missing PUSHDATA2 length".into()));
                    }
                    (u16::from_le_bytes([bytes[i + 1], bytes[i + 2]]) as usize, 3)
                }
                _ => {
                    let op = Opcode::from_byte(b).ok_or(ScriptError::UnknownOpcode(b))?;
                    elements.push(ScriptElement::Op(op));
                    i += 1;
                    continue;
                }
            };

            let start = i + header;
            if start + len > bytes.len() {
                return Err(ScriptError::InvalidEncoding(format!("push of {} bytes runs past end", len)));
            }
            if len > MAX_PUSH_SIZE {
                return Err(ScriptError::PushTooLarge(len));
            }
            elements.push(ScriptElement::Push(bytes[start..start + len].to_vec()));
            i = start + len;
        }

        Ok(Script { elements })
    }

    pub fn from_hex(s: &str) -> Result<Self, ScriptError> {
        let bytes = hex::decode(s.trim())
            .map_err(|e| ScriptError::InvalidEncoding(e.to_string()))?;
        Self::from_bytes(&bytes)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();

        for element in &self.elements {
            match element {
                ScriptElement::Op(op) => bytes.push(op.to_byte()),
                ScriptElement::Push(data) => {
                    let len = data.len();
                    if len <= 75 {
                        bytes.push(len as u8);
                    } else if len <= 255 {
                        bytes.push(Opcode::OP_PUSHDATA1.to_byte());
                        bytes.push(len as u8);
                    } else {
                        bytes.push(Opcode::OP_PUSHDATA2.to_byte());
                        bytes.extend_from_slice(&(len as u16).to_le_bytes());
                    }
                    bytes.extend_from_slice(data);
                }
            }
        }

        bytes
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// OP_DUP OP_HASH160 <pubKeyHash> OP_EQUALVERIFY OP_CHECKSIG
    pub fn p2pkh(pubkey_hash: &[u8; 20]) -> Self {
        Script {
            elements: vec![
                ScriptElement::Op(Opcode::OP_DUP),
                ScriptElement::Op(Opcode::OP_HASH160),
                ScriptElement::Push(pubkey_hash.to_vec()),
                ScriptElement::Op(Opcode::OP_EQUALVERIFY),
                ScriptElement::Op(Opcode::OP_CHECKSIG),
            ],
        }
    }

    pub fn is_p2pkh(&self) -> bool {
        self.p2pkh_hash().is_some()
    }

    pub fn p2pkh_hash(&self) -> Option<[u8; 20]> {
        match self.elements.as_slice() {
            [ScriptElement::Op(Opcode::OP_DUP),
             ScriptElement::Op(Opcode::OP_HASH160),
             ScriptElement::Push(hash),
             ScriptElement::Op(Opcode::OP_EQUALVERIFY),
             ScriptElement::Op(Opcode::OP_CHECKSIG)] if hash.len() == 20 => {
                let mut out = [0u8; 20];
                out.copy_from_slice(hash);
                Some(out)
            }
            _ => None,
        }
    }

    /// Human-readable form, pushes shown as <hex>
    pub fn disassemble(&self) -> String {
        self.elements
            .iter()
            .map(|element| match element {
                ScriptElement::Op(op) => op.name().to_string(),
                ScriptElement::Push(data) => format!("<{}>", hex::encode(data)),
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl Serialize for Script {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_hex().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Script {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let hex_str = String::deserialize(deserializer)?;
        Script::from_hex(&hex_str).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Script Numbers
// =============================================================================

/// Minimal little-endian sign-magnitude encoding (Bitcoin CScriptNum)
pub fn encode_num(n: i64) -> Vec<u8> {
    if n == 0 {
        return vec![];
    }

    let negative = n < 0;
    let mut abs_n = n.unsigned_abs();
    let mut result = Vec::new();

    while abs_n > 0 {
        result.push((abs_n & 0xff) as u8);
        abs_n >>= 8;
    }

    if result.last().map_or(false, |&b| b & 0x80 != 0) {
        result.push(if negative { 0x80 } else { 0x00 });
    } else if negative {
        let last = result.len() - 1;
        result[last] |= 0x80;
    }

    result
}

pub fn decode_num(data: &[u8], max_len: usize) -> Result<i64, ScriptError> {
    if data.len() > max_len {
        return Err(ScriptError::InvalidNumber);
    }
    if data.is_empty() {
        return Ok(0);
    }

    let last = data.len() - 1;
    let negative = data[last] & 0x80 != 0;
    let mut result: i64 = 0;

    for (i, &byte) in data.iter().enumerate() {
        let b = if i == last { byte & 0x7f } else { byte };
        result |= (b as i64) << (8 * i);
    }

    Ok(if negative { -result } else { result })
}

// =============================================================================
// Hash Helpers
// =============================================================================

/// SHA256 then RIPEMD160
pub fn hash160(data: &[u8]) -> [u8; 20] {
    let sha = Sha256::digest(data);
    let digest = Ripemd160::digest(sha);
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest);
    out
}

/// Double SHA256
pub fn hash256(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    let mut out = [0u8; 32];
    out.copy_from_slice(&second);
    out
}
