use crate::bytecode::op::Op;

// =============================================================================
// INSTR - Textual instruction form produced by lowering
// =============================================================================

/// One entry of the lowered instruction sequence: either a label marker or an
/// opcode with textual operands. Insertion order is execution order; labels
/// occupy no bytes once assembled.
#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    /// `name:` — a symbolic byte address, erased by the assembler.
    Label(String),

    /// `MNEMONIC arg...` — operands stay textual (a literal number, a label
    /// name, a variable name, or a raw string payload) until the assembler
    /// resolves them.
    Code { op: Op, args: Vec<String> },
}

impl Instr {
    pub fn op(op: Op) -> Instr {
        Instr::Code {
            op,
            args: Vec::new(),
        }
    }

    pub fn with(op: Op, arg: impl Into<String>) -> Instr {
        Instr::Code {
            op,
            args: vec![arg.into()],
        }
    }

    pub fn call(target: impl Into<String>, argc: usize) -> Instr {
        Instr::Code {
            op: Op::Call,
            args: vec![target.into(), argc.to_string()],
        }
    }

    pub fn label(name: impl Into<String>) -> Instr {
        Instr::Label(name.into())
    }

    pub fn is(&self, wanted: Op) -> bool {
        matches!(self, Instr::Code { op, .. } if *op == wanted)
    }
}

impl std::fmt::Display for Instr {
    /// The line form: `name:` for labels, `MNEMONIC arg1 arg2` otherwise.
    /// A `PUSH_STR` operand is emitted verbatim, spaces included.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Instr::Label(name) => write!(f, "{}:", name),
            Instr::Code { op, args } => {
                write!(f, "{}", op.mnemonic())?;
                for arg in args {
                    write!(f, " {}", arg)?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_zero_operand() {
        assert_eq!(Instr::op(Op::Add).to_string(), "ADD");
    }

    #[test]
    fn test_display_one_operand() {
        assert_eq!(Instr::with(Op::PushNum, "42").to_string(), "PUSH_NUM 42");
        assert_eq!(Instr::with(Op::Store, "count").to_string(), "STORE count");
    }

    #[test]
    fn test_display_call() {
        assert_eq!(Instr::call("area", 2).to_string(), "CALL area 2");
    }

    #[test]
    fn test_display_label() {
        assert_eq!(Instr::label(".L3").to_string(), ".L3:");
    }

    #[test]
    fn test_display_string_operand_keeps_spaces() {
        assert_eq!(
            Instr::with(Op::PushStr, "hello there world").to_string(),
            "PUSH_STR hello there world"
        );
    }

    #[test]
    fn test_is() {
        assert!(Instr::op(Op::Ret).is(Op::Ret));
        assert!(!Instr::op(Op::Add).is(Op::Ret));
        assert!(!Instr::label("f").is(Op::Ret));
    }
}
