// =============================================================================
// LOTTERYNET - Spend Verifier
// =============================================================================
//
// Stack machine for the opcodes that appear in lottery entries, reveals and
// P2PKH rollover payouts. Anything else is rejected as an unknown opcode.
//
// Lottery opcode conventions:
//   OP_FLEXIHASH  pops <bits> <guess> <hash>
//                 pushes <guess> <low `bits` bits of SHA256(hash || guess)>
//   OP_BEACON     pops <bits> <end> <start>
//                 pushes <low `bits` bits of the beacon for [start, end]>
//
// =============================================================================

use secp256k1::{ecdsa::Signature, Message, PublicKey, Secp256k1};
use sha2::{Digest, Sha256};

use super::{decode_num, hash160, Opcode, Script, ScriptElement, ScriptError, MAX_NUM_SIZE};
use crate::{LOCKTIME_THRESHOLD, MAX_BITS_OF_RANDOMNESS, SEQUENCE_FINAL};

// =============================================================================
// Beacon
// =============================================================================

/// Source of the per-range beacon digest published by the chain
pub trait BeaconSource {
    /// Full 32-byte beacon digest for the inclusive height range, once known
    fn beacon_digest(&self, start: u64, end: u64) -> Option<[u8; 32]>;
}

impl<F> BeaconSource for F
where
    F: Fn(u64, u64) -> Option<[u8; 32]>,
{
    fn beacon_digest(&self, start: u64, end: u64) -> Option<[u8; 32]> {
        self(start, end)
    }
}

/// Low `bits` bits of a digest as ceil(bits/8) big-endian bytes
pub fn truncate_to_bits(digest: &[u8; 32], bits: u32) -> Vec<u8> {
    let bits = bits.min(MAX_BITS_OF_RANDOMNESS) as usize;
    let len = (bits + 7) / 8;
    let mut out = digest[32 - len..].to_vec();
    let spare = len * 8 - bits;
    if let Some(first) = out.first_mut() {
        *first &= 0xffu8 >> spare;
    }
    out
}

/// Commitment value proven by a reveal
pub fn flexihash(funding_hash: &[u8], guess: &[u8], bits: u32) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(funding_hash);
    hasher.update(guess);
    let mut digest = [0u8; 32];
    digest.copy_from_slice(&hasher.finalize());
    truncate_to_bits(&digest, bits)
}

// =============================================================================
// Execution Context
// =============================================================================

/// Per-input data the scripts are checked against
#[derive(Clone, Debug)]
pub struct ExecutionContext {
    /// Transaction nLockTime
    pub lock_time: u32,
    /// Sequence of the input being verified
    pub sequence: u32,
    /// Digest signed by OP_CHECKSIG
    pub sighash: [u8; 32],
}

// =============================================================================
// Interpreter
// =============================================================================

pub struct Interpreter<'a, B: BeaconSource + ?Sized> {
    stack: Vec<Vec<u8>>,
    context: ExecutionContext,
    beacon: &'a B,
}

impl<'a, B: BeaconSource + ?Sized> Interpreter<'a, B> {
    pub fn new(context: ExecutionContext, beacon: &'a B) -> Self {
        Interpreter {
            stack: Vec::new(),
            context,
            beacon,
        }
    }

    pub fn stack(&self) -> &[Vec<u8>] {
        &self.stack
    }

    pub fn execute(&mut self, script: &Script) -> Result<(), ScriptError> {
        let mut if_stack: Vec<bool> = Vec::new();

        for element in script.elements() {
            let executing = if_stack.iter().all(|&b| b);

            let op = match element {
                ScriptElement::Push(data) => {
                    if executing {
                        self.stack.push(data.clone());
                    }
                    continue;
                }
                ScriptElement::Op(op) => *op,
            };

            match op {
                Opcode::OP_IF | Opcode::OP_NOTIF => {
                    let branch = if executing {
                        let value = Self::is_true(&self.pop()?);
                        if op == Opcode::OP_IF { value } else { !value }
                    } else {
                        false
                    };
                    if_stack.push(branch);
                }
                Opcode::OP_ELSE => {
                    let last = if_stack.last_mut().ok_or(ScriptError::UnbalancedConditional)?;
                    *last = !*last;
                }
                Opcode::OP_ENDIF => {
                    if_stack.pop().ok_or(ScriptError::UnbalancedConditional)?;
                }

                _ if !executing => continue,

                op if op.small_int().is_some() => {
                    let n = op.small_int().unwrap_or_default();
                    self.stack.push(super::encode_num(n));
                }
                Opcode::OP_PUSHDATA1 | Opcode::OP_PUSHDATA2 => {
                    return Err(ScriptError::InvalidEncoding("bare PUSHDATA opcode".into()));
                }

                Opcode::OP_VERIFY => {
                    if !Self::is_true(&self.pop()?) {
                        return Err(ScriptError::VerifyFailed);
                    }
                }
                Opcode::OP_DROP => {
                    self.pop()?;
                }
                Opcode::OP_DUP => {
                    let top = self.stack.last().cloned().ok_or(ScriptError::StackUnderflow)?;
                    self.stack.push(top);
                }
                Opcode::OP_EQUAL => {
                    let a = self.pop()?;
                    let b = self.pop()?;
                    self.push_bool(a == b);
                }
                Opcode::OP_EQUALVERIFY => {
                    let a = self.pop()?;
                    let b = self.pop()?;
                    if a != b {
                        return Err(ScriptError::VerifyFailed);
                    }
                }
                Opcode::OP_HASH160 => {
                    let data = self.pop()?;
                    self.stack.push(hash160(&data).to_vec());
                }
                Opcode::OP_CHECKSIG => {
                    let pubkey = self.pop()?;
                    let sig = self.pop()?;
                    let valid = self.verify_signature(&sig, &pubkey)?;
                    self.push_bool(valid);
                }
                Opcode::OP_CHECKLOCKTIMEVERIFY => self.check_lock_time()?,
                Opcode::OP_BEACON => {
                    let bits = self.pop_bits()?;
                    let end = self.pop_height()?;
                    let start = self.pop_height()?;
                    let digest = self
                        .beacon
                        .beacon_digest(start, end)
                        .ok_or(ScriptError::BeaconUnavailable { start, end })?;
                    self.stack.push(truncate_to_bits(&digest, bits));
                }
                Opcode::OP_FLEXIHASH => {
                    let bits = self.pop_bits()?;
                    let guess = self.pop()?;
                    let hash = self.pop()?;
                    let digest = flexihash(&hash, &guess, bits);
                    self.stack.push(guess);
                    self.stack.push(digest);
                }
                // Small ints are handled above
                _ => return Err(ScriptError::UnknownOpcode(op.to_byte())),
            }
        }

        if !if_stack.is_empty() {
            return Err(ScriptError::UnbalancedConditional);
        }

        Ok(())
    }

    /// BIP65: the operand stays on the stack
    fn check_lock_time(&self) -> Result<(), ScriptError> {
        let top = self.stack.last().ok_or(ScriptError::StackUnderflow)?;
        let required = decode_num(top, MAX_NUM_SIZE)?;
        if required < 0 {
            return Err(ScriptError::NegativeLocktime);
        }

        let lock_time = self.context.lock_time;
        let same_kind = (required < LOCKTIME_THRESHOLD as i64) == (lock_time < LOCKTIME_THRESHOLD);
        if !same_kind || required > lock_time as i64 {
            return Err(ScriptError::LocktimeNotSatisfied { required, lock_time });
        }

        if self.context.sequence == SEQUENCE_FINAL {
            return Err(ScriptError::SequenceFinal);
        }

        Ok(())
    }

    fn verify_signature(&self, sig: &[u8], pubkey: &[u8]) -> Result<bool, ScriptError> {
        if sig.is_empty() {
            return Ok(false);
        }

        let pk = PublicKey::from_slice(pubkey)
            .map_err(|e| ScriptError::SigCheckFailed(format!("invalid pubkey: {}", e)))?;

        // Last byte is the sighash type
        let der = &sig[..sig.len() - 1];
        let signature = Signature::from_der(der)
            .map_err(|e| ScriptError::SigCheckFailed(format!("invalid signature: {}", e)))?;

        let secp = Secp256k1::verification_only();
        let message = Message::from_digest(self.context.sighash);
        Ok(secp.verify_ecdsa(&message, &signature, &pk).is_ok())
    }

    fn pop(&mut self) -> Result<Vec<u8>, ScriptError> {
        self.stack.pop().ok_or(ScriptError::StackUnderflow)
    }

    fn pop_num(&mut self) -> Result<i64, ScriptError> {
        let data = self.pop()?;
        decode_num(&data, MAX_NUM_SIZE)
    }

    fn pop_height(&mut self) -> Result<u64, ScriptError> {
        u64::try_from(self.pop_num()?).map_err(|_| ScriptError::InvalidNumber)
    }

    fn pop_bits(&mut self) -> Result<u32, ScriptError> {
        match self.pop_num()? {
            n if n >= 1 && n <= MAX_BITS_OF_RANDOMNESS as i64 => Ok(n as u32),
            _ => Err(ScriptError::InvalidNumber),
        }
    }

    fn push_bool(&mut self, value: bool) {
        self.stack.push(if value { vec![1] } else { vec![] });
    }

    fn is_true(data: &[u8]) -> bool {
        for (i, &byte) in data.iter().enumerate() {
            if byte != 0 {
                // Negative zero
                if i == data.len() - 1 && byte == 0x80 {
                    return false;
                }
                return true;
            }
        }
        false
    }
}

/// Run scriptSig then scriptPubKey; true if the final top element is truthy
pub fn verify_spend<B: BeaconSource + ?Sized>(
    script_sig: &Script,
    script_pubkey: &Script,
    context: ExecutionContext,
    beacon: &B,
) -> Result<bool, ScriptError> {
    let mut interpreter = Interpreter::new(context, beacon);
    interpreter.execute(script_sig)?;
    interpreter.execute(script_pubkey)?;

    Ok(interpreter
        .stack
        .last()
        .map(|top| Interpreter::<B>::is_true(top))
        .unwrap_or(false))
}
