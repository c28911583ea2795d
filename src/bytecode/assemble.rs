use std::collections::HashMap;

use crate::bytecode::instr::Instr;
use crate::bytecode::lower::{ENTRY_LABEL, FunctionTable};
use crate::bytecode::op::Op;

// =============================================================================
// ASSEMBLE - Two-pass label/slot resolution into the binary stream
// =============================================================================

/// Assembled program: a flat byte buffer (no header, no constant pool) plus
/// the entry offset where top-level execution starts.
#[derive(Debug, Clone, PartialEq)]
pub struct Bytecode {
    pub bytes: Vec<u8>,
    pub entry: usize,
}

#[derive(Debug, Clone)]
pub enum AssembleError {
    /// A mnemonic that is not in the opcode table.
    UnknownInstruction { mnemonic: String },

    /// A label operand that no label marker defines.
    UndefinedLabel { name: String },

    /// An instruction carrying the wrong number of textual operands.
    BadOperandCount {
        mnemonic: &'static str,
        expected: usize,
        got: usize,
    },

    /// A numeric operand, label address or slot id outside 0..=65535.
    OperandOutOfRange { operand: String },

    /// An operand that must be a numeric literal but is not.
    BadOperand {
        mnemonic: &'static str,
        operand: String,
    },
}

impl std::fmt::Display for AssembleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssembleError::UnknownInstruction { mnemonic } => {
                write!(f, "assemble error: unknown instruction '{}'", mnemonic)
            }
            AssembleError::UndefinedLabel { name } => {
                write!(f, "assemble error: undefined label '{}'", name)
            }
            AssembleError::BadOperandCount {
                mnemonic,
                expected,
                got,
            } => write!(
                f,
                "assemble error: {} takes {} operand(s), got {}",
                mnemonic, expected, got
            ),
            AssembleError::OperandOutOfRange { operand } => write!(
                f,
                "assemble error: operand '{}' does not fit in 16 bits",
                operand
            ),
            AssembleError::BadOperand { mnemonic, operand } => write!(
                f,
                "assemble error: {} operand '{}' is not a number",
                mnemonic, operand
            ),
        }
    }
}

impl std::error::Error for AssembleError {}

/// Variable slots of one scope (one function, or the top level). Parameters
/// are pre-seeded at slots 0..n-1 so they line up with how CALL populates a
/// fresh frame; everything else allocates on first sighting.
#[derive(Debug, Default)]
struct VarScope {
    slots: HashMap<String, u16>,
}

impl VarScope {
    fn seeded(params: &[String]) -> VarScope {
        let slots = params
            .iter()
            .enumerate()
            .map(|(i, p)| (p.clone(), i as u16))
            .collect();
        VarScope { slots }
    }

    fn slot(&mut self, name: &str) -> Result<u16, AssembleError> {
        if let Some(&id) = self.slots.get(name) {
            return Ok(id);
        }
        let id = u16::try_from(self.slots.len()).map_err(|_| AssembleError::OperandOutOfRange {
            operand: name.to_string(),
        })?;
        self.slots.insert(name.to_string(), id);
        Ok(id)
    }
}

/// Assemble an instruction sequence into bytecode.
///
/// Pass one walks the sequence accumulating byte offsets to place every label;
/// pass two encodes opcodes and operands, resolving each textual operand as a
/// numeric literal, a known label, or a variable slot, in that order. The
/// function table drives call-label resolution and per-function slot scoping.
pub fn assemble(instrs: &[Instr], functions: &FunctionTable) -> Result<Bytecode, AssembleError> {
    let mut labels: HashMap<&str, usize> = HashMap::new();
    let mut offset = 0usize;

    for instr in instrs {
        match instr {
            Instr::Label(name) => {
                labels.insert(name, offset);
            }
            Instr::Code { op, args } => {
                if args.len() != op.operand_count() {
                    return Err(AssembleError::BadOperandCount {
                        mnemonic: op.mnemonic(),
                        expected: op.operand_count(),
                        got: args.len(),
                    });
                }
                offset += instr_size(*op, args);
            }
        }
    }

    let entry = labels.get(ENTRY_LABEL).copied().unwrap_or(0);

    let mut bytes = Vec::with_capacity(offset);
    let mut scopes: HashMap<String, VarScope> = HashMap::new();
    let mut top = VarScope::default();
    // Name of the function whose body is being encoded, for slot scoping.
    let mut current: Option<String> = None;

    for instr in instrs {
        let (op, args) = match instr {
            // A function label opens that function's scope; the entry label
            // closes whatever body came before it. A body may hold several
            // returns, so only labels delimit scopes, never RET.
            Instr::Label(name) => {
                if functions.contains_key(name) {
                    current = Some(name.clone());
                } else if name == ENTRY_LABEL {
                    current = None;
                }
                continue;
            }
            Instr::Code { op, args } => (*op, args),
        };

        bytes.push(op.opcode());

        match op {
            Op::PushStr => {
                let payload = args[0].as_bytes();
                let len = u16::try_from(payload.len()).map_err(|_| {
                    AssembleError::OperandOutOfRange {
                        operand: args[0].clone(),
                    }
                })?;
                bytes.extend_from_slice(&len.to_le_bytes());
                bytes.extend_from_slice(payload);
            }
            Op::Call => {
                let target = resolve_call_target(&args[0], &labels)?;
                let argc = parse_u16(op, &args[1])?;
                bytes.extend_from_slice(&target.to_le_bytes());
                bytes.extend_from_slice(&argc.to_le_bytes());
            }
            _ => {
                for arg in args {
                    let scope = match &current {
                        Some(name) => scopes.entry(name.clone()).or_insert_with(|| {
                            VarScope::seeded(functions.get(name).map_or(&[], Vec::as_slice))
                        }),
                        None => &mut top,
                    };
                    let word = resolve_operand(arg, &labels, scope)?;
                    bytes.extend_from_slice(&word.to_le_bytes());
                }
            }
        }
    }

    Ok(Bytecode { bytes, entry })
}

/// Byte size of one encoded instruction: opcode byte plus two bytes per
/// operand, except string pushes whose payload is length-prefixed UTF-8.
fn instr_size(op: Op, args: &[String]) -> usize {
    match op {
        Op::PushStr => 1 + 2 + args[0].len(),
        _ => 1 + 2 * args.len(),
    }
}

/// A call target is either a literal address or the callee's label.
fn resolve_call_target(
    arg: &str,
    labels: &HashMap<&str, usize>,
) -> Result<u16, AssembleError> {
    if let Ok(n) = arg.parse::<i64>() {
        return range_check(n, arg);
    }
    let addr = labels
        .get(arg)
        .copied()
        .ok_or_else(|| AssembleError::UndefinedLabel {
            name: arg.to_string(),
        })?;
    range_check(addr as i64, arg)
}

/// Literal number, else known label, else variable slot.
fn resolve_operand(
    arg: &str,
    labels: &HashMap<&str, usize>,
    scope: &mut VarScope,
) -> Result<u16, AssembleError> {
    if let Ok(n) = arg.parse::<i64>() {
        return range_check(n, arg);
    }
    if let Some(&addr) = labels.get(arg) {
        return range_check(addr as i64, arg);
    }
    scope.slot(arg)
}

fn parse_u16(op: Op, arg: &str) -> Result<u16, AssembleError> {
    let n = arg.parse::<i64>().map_err(|_| AssembleError::BadOperand {
        mnemonic: op.mnemonic(),
        operand: arg.to_string(),
    })?;
    range_check(n, arg)
}

fn range_check(n: i64, arg: &str) -> Result<u16, AssembleError> {
    u16::try_from(n).map_err(|_| AssembleError::OperandOutOfRange {
        operand: arg.to_string(),
    })
}

/// Parse the textual instruction form back into a sequence: one instruction
/// per line, labels as `name:`, a `PUSH_STR` operand spanning the line's
/// remainder. Blank lines are skipped.
pub fn parse_listing(src: &str) -> Result<Vec<Instr>, AssembleError> {
    let mut instrs = Vec::new();

    for line in src.lines() {
        let line = line.trim_end();
        if line.trim().is_empty() {
            continue;
        }
        if let Some(name) = line.strip_suffix(':') {
            instrs.push(Instr::Label(name.to_string()));
            continue;
        }

        let (head, rest) = match line.split_once(' ') {
            Some((head, rest)) => (head, rest),
            None => (line, ""),
        };
        let op = Op::from_mnemonic(head).ok_or_else(|| AssembleError::UnknownInstruction {
            mnemonic: head.to_string(),
        })?;

        let args = match op {
            Op::PushStr => vec![rest.to_string()],
            _ => rest.split_whitespace().map(str::to_string).collect(),
        };
        instrs.push(Instr::Code { op, args });
    }

    Ok(instrs)
}
