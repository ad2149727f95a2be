// =============================================================================
// LOTTERYNET - Script Builder
// =============================================================================
//
// Fluent builder producing an immutable `Script`. Pushes are normalized
// (small integers become OP_N, empty data becomes OP_0) and the whole
// sequence is checked once in `build()`.
//
// =============================================================================

use super::{encode_num, Opcode, Script, ScriptElement, ScriptError, MAX_PUSH_SIZE};

#[derive(Clone, Debug, Default)]
pub struct ScriptBuilder {
    elements: Vec<ScriptElement>,
}

impl ScriptBuilder {
    pub fn new() -> Self {
        ScriptBuilder { elements: Vec::new() }
    }

    pub fn op(mut self, op: Opcode) -> Self {
        self.elements.push(ScriptElement::Op(op));
        self
    }

    /// Push raw bytes
    pub fn push_data(mut self, data: &[u8]) -> Self {
        if data.is_empty() {
            self.elements.push(ScriptElement::Op(Opcode::OP_0));
        } else {
            self.elements.push(ScriptElement::Push(data.to_vec()));
        }
        self
    }

    /// Push a script number, using OP_N for -1 and 0..=16
    pub fn push_int(mut self, n: i64) -> Self {
        match Opcode::for_small_int(n) {
            Some(op) => self.elements.push(ScriptElement::Op(op)),
            None => self.elements.push(ScriptElement::Push(encode_num(n))),
        }
        self
    }

    /// Append every element of another script
    pub fn append(mut self, script: &Script) -> Self {
        self.elements.extend_from_slice(script.elements());
        self
    }

    pub fn build(self) -> Result<Script, ScriptError> {
        let mut depth: usize = 0;

        for element in &self.elements {
            match element {
                ScriptElement::Push(data) if data.len() > MAX_PUSH_SIZE => {
                    return Err(ScriptError::PushTooLarge(data.len()));
                }
                ScriptElement::Op(Opcode::OP_PUSHDATA1) | ScriptElement::Op(Opcode::OP_PUSHDATA2) => {
                    return Err(ScriptError::InvalidEncoding(
                        "bare PUSHDATA opcode, use push_data".into(),
                    ));
                }
                ScriptElement::Op(Opcode::OP_IF) | ScriptElement::Op(Opcode::OP_NOTIF) => depth += 1,
                ScriptElement::Op(Opcode::OP_ELSE) => {
                    if depth == 0 {
                        return Err(ScriptError::UnbalancedConditional);
                    }
                }
                ScriptElement::Op(Opcode::OP_ENDIF) => {
                    depth = depth.checked_sub(1).ok_or(ScriptError::UnbalancedConditional)?;
                }
                _ => {}
            }
        }

        if depth != 0 {
            return Err(ScriptError::UnbalancedConditional);
        }

        Ok(Script::from_elements(self.elements))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_ints_become_opcodes() {
        let script = ScriptBuilder::new().push_int(0).push_int(1).push_int(16).push_int(17).build().unwrap();

        assert_eq!(script.elements()[0], ScriptElement::Op(Opcode::OP_0));
        assert_eq!(script.elements()[1], ScriptElement::Op(Opcode::OP_1));
        assert_eq!(script.elements()[2], ScriptElement::Op(Opcode::OP_16));
        assert_eq!(script.elements()[3], ScriptElement::Push(vec![17]));
    }

    #[test]
    fn test_unbalanced_conditionals() {
        assert_eq!(
            ScriptBuilder::new().op(Opcode::OP_IF).build(),
            Err(ScriptError::UnbalancedConditional)
        );
        assert_eq!(
            ScriptBuilder::new().op(Opcode::OP_ELSE).op(Opcode::OP_ENDIF).build(),
            Err(ScriptError::UnbalancedConditional)
        );
        assert_eq!(
            ScriptBuilder::new().op(Opcode::OP_ENDIF).build(),
            Err(ScriptError::UnbalancedConditional)
        );
        assert!(ScriptBuilder::new()
            .op(Opcode::OP_IF)
            .op(Opcode::OP_ELSE)
            .op(Opcode::OP_ENDIF)
            .build()
            .is_ok());
    }

    #[test]
    fn test_push_limits() {
        let big = vec![0u8; MAX_PUSH_SIZE + 1];
        assert_eq!(
            ScriptBuilder::new().push_data(&big).build(),
            Err(ScriptError::PushTooLarge(MAX_PUSH_SIZE + 1))
        );
        assert!(ScriptBuilder::new().op(Opcode::OP_PUSHDATA1).build().is_err());
    }

    #[test]
    fn test_bytes_survive_parse() {
        let script = ScriptBuilder::new()
            .op(Opcode::OP_IF)
            .push_int(156)
            .op(Opcode::OP_CHECKLOCKTIMEVERIFY)
            .op(Opcode::OP_DROP)
            .push_data(&[0xde, 0xad, 0xbe, 0xef])
            .op(Opcode::OP_ENDIF)
            .build()
            .unwrap();

        assert_eq!(Script::from_bytes(&script.to_bytes()).unwrap(), script);
    }
}
