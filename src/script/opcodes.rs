// =============================================================================
// LOTTERYNET - Script Opcodes
// =============================================================================
//
// The subset of Bitcoin Script used by lottery entries and reveals, plus the
// two lottery opcodes that occupy former NOP slots:
//
//   OP_BEACON    (0xb3)  <start> <end> <bits> -> <beacon value>
//   OP_FLEXIHASH (0xb4)  <hash> <guess> <bits> -> <guess> <digest>
//
// =============================================================================

use std::fmt;

/// Opcodes understood by the lottery templates
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
#[allow(non_camel_case_types)]
pub enum Opcode {
    // Constants
    OP_0 = 0x00,
    OP_PUSHDATA1 = 0x4c,
    OP_PUSHDATA2 = 0x4d,
    OP_1NEGATE = 0x4f,
    OP_1 = 0x51,
    OP_2 = 0x52,
    OP_3 = 0x53,
    OP_4 = 0x54,
    OP_5 = 0x55,
    OP_6 = 0x56,
    OP_7 = 0x57,
    OP_8 = 0x58,
    OP_9 = 0x59,
    OP_10 = 0x5a,
    OP_11 = 0x5b,
    OP_12 = 0x5c,
    OP_13 = 0x5d,
    OP_14 = 0x5e,
    OP_15 = 0x5f,
    OP_16 = 0x60,

    // Flow control
    OP_IF = 0x63,
    OP_NOTIF = 0x64,
    OP_ELSE = 0x67,
    OP_ENDIF = 0x68,
    OP_VERIFY = 0x69,

    // Stack
    OP_DROP = 0x75,
    OP_DUP = 0x76,

    // Bitwise logic
    OP_EQUAL = 0x87,
    OP_EQUALVERIFY = 0x88,

    // Crypto
    OP_HASH160 = 0xa9,
    OP_CHECKSIG = 0xac,

    // Locktime
    OP_CHECKLOCKTIMEVERIFY = 0xb1,

    // Lottery
    OP_BEACON = 0xb3,
    OP_FLEXIHASH = 0xb4,
}

impl Opcode {
    pub fn from_byte(b: u8) -> Option<Self> {
        use Opcode::*;
        let op = match b {
            0x00 => OP_0,
            0x4c => OP_PUSHDATA1,
            0x4d => OP_PUSHDATA2,
            0x4f => OP_1NEGATE,
            0x51 => OP_1,
            0x52 => OP_2,
            0x53 => OP_3,
            0x54 => OP_4,
            0x55 => OP_5,
            0x56 => OP_6,
            0x57 => OP_7,
            0x58 => OP_8,
            0x59 => OP_9,
            0x5a => OP_10,
            0x5b => OP_11,
            0x5c => OP_12,
            0x5d => OP_13,
            0x5e => OP_14,
            0x5f => OP_15,
            0x60 => OP_16,
            0x63 => OP_IF,
            0x64 => OP_NOTIF,
            0x67 => OP_ELSE,
            0x68 => OP_ENDIF,
            0x69 => OP_VERIFY,
            0x75 => OP_DROP,
            0x76 => OP_DUP,
            0x87 => OP_EQUAL,
            0x88 => OP_EQUALVERIFY,
            0xa9 => OP_HASH160,
            0xac => OP_CHECKSIG,
            0xb1 => OP_CHECKLOCKTIMEVERIFY,
            0xb3 => OP_BEACON,
            0xb4 => OP_FLEXIHASH,
            _ => return None,
        };
        Some(op)
    }

    pub fn to_byte(self) -> u8 {
        self as u8
    }

    /// Small integer pushed by OP_1NEGATE / OP_0 / OP_1..OP_16
    pub fn small_int(self) -> Option<i64> {
        match self {
            Opcode::OP_0 => Some(0),
            Opcode::OP_1NEGATE => Some(-1),
            op if (0x51..=0x60).contains(&(op as u8)) => Some((op as u8 - 0x50) as i64),
            _ => None,
        }
    }

    /// Opcode that pushes `n`, for 0 and 1..=16
    pub fn for_small_int(n: i64) -> Option<Self> {
        match n {
            -1 => Some(Opcode::OP_1NEGATE),
            0 => Some(Opcode::OP_0),
            1..=16 => Opcode::from_byte(0x50 + n as u8),
            _ => None,
        }
    }

    pub fn is_conditional(self) -> bool {
        matches!(self, Opcode::OP_IF | Opcode::OP_NOTIF | Opcode::OP_ELSE | Opcode::OP_ENDIF)
    }

    pub fn name(self) -> &'static str {
        use Opcode::*;
        match self {
            OP_0 => "OP_0",
            OP_PUSHDATA1 => "OP_PUSHDATA1",
            OP_PUSHDATA2 => "OP_PUSHDATA2",
            OP_1NEGATE => "OP_1NEGATE",
            OP_1 => "OP_1",
            OP_2 => "OP_2",
            OP_3 => "OP_3",
            OP_4 => "OP_4",
            OP_5 => "OP_5",
            OP_6 => "OP_6",
            OP_7 => "OP_7",
            OP_8 => "OP_8",
            OP_9 => "OP_9",
            OP_10 => "OP_10",
            OP_11 => "OP_11",
            OP_12 => "OP_12",
            OP_13 => "OP_13",
            OP_14 => "OP_14",
            OP_15 => "OP_15",
            OP_16 => "OP_16",
            OP_IF => "OP_IF",
            OP_NOTIF => "OP_NOTIF",
            OP_ELSE => "OP_ELSE",
            OP_ENDIF => "OP_ENDIF",
            OP_VERIFY => "OP_VERIFY",
            OP_DROP => "OP_DROP",
            OP_DUP => "OP_DUP",
            OP_EQUAL => "OP_EQUAL",
            OP_EQUALVERIFY => "OP_EQUALVERIFY",
            OP_HASH160 => "OP_HASH160",
            OP_CHECKSIG => "OP_CHECKSIG",
            OP_CHECKLOCKTIMEVERIFY => "OP_CHECKLOCKTIMEVERIFY",
            OP_BEACON => "OP_BEACON",
            OP_FLEXIHASH => "OP_FLEXIHASH",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
