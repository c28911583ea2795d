/// Terminal execution fault. Every variant carries the byte offset of the
/// opcode that faulted; no fault is recoverable and all machine state is
/// discarded with the run.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeError {
    /// An opcode byte outside the published table.
    UnknownOpcode { opcode: u8, at: usize },

    /// A pop against an empty operand stack.
    StackUnderflow { at: usize },

    /// A return with no call in flight.
    CallStackUnderflow { at: usize },

    /// A load from a slot that was never stored to.
    UninitializedVariable { slot: u16, at: usize },

    /// An operand of the wrong runtime type (no silent coercion).
    TypeError {
        expected: &'static str,
        got: &'static str,
        at: usize,
    },

    DivisionByZero { at: usize },

    IndexOutOfBounds { index: i64, len: usize, at: usize },

    /// Integer overflow in an arithmetic opcode.
    NumericOverflow { at: usize },

    /// The output sink rejected a write.
    OutputFailed { message: String, at: usize },

    /// The stream ended in the middle of an instruction.
    TruncatedBytecode { at: usize },
}

impl RuntimeError {
    pub fn offset(&self) -> usize {
        match self {
            RuntimeError::UnknownOpcode { at, .. }
            | RuntimeError::StackUnderflow { at }
            | RuntimeError::CallStackUnderflow { at }
            | RuntimeError::UninitializedVariable { at, .. }
            | RuntimeError::TypeError { at, .. }
            | RuntimeError::DivisionByZero { at }
            | RuntimeError::IndexOutOfBounds { at, .. }
            | RuntimeError::NumericOverflow { at }
            | RuntimeError::OutputFailed { at, .. }
            | RuntimeError::TruncatedBytecode { at } => *at,
        }
    }
}

impl std::fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeError::UnknownOpcode { opcode, at } => {
                write!(f, "runtime error: unknown opcode 0x{:02x} at {}", opcode, at)
            }
            RuntimeError::StackUnderflow { at } => {
                write!(f, "runtime error: operand stack underflow at {}", at)
            }
            RuntimeError::CallStackUnderflow { at } => {
                write!(f, "runtime error: return with empty call stack at {}", at)
            }
            RuntimeError::UninitializedVariable { slot, at } => write!(
                f,
                "runtime error: read of uninitialized variable slot {} at {}",
                slot, at
            ),
            RuntimeError::TypeError { expected, got, at } => write!(
                f,
                "runtime error: expected {}, got {} at {}",
                expected, got, at
            ),
            RuntimeError::DivisionByZero { at } => {
                write!(f, "runtime error: division by zero at {}", at)
            }
            RuntimeError::IndexOutOfBounds { index, len, at } => write!(
                f,
                "runtime error: index {} out of bounds for length {} at {}",
                index, len, at
            ),
            RuntimeError::NumericOverflow { at } => {
                write!(f, "runtime error: integer overflow at {}", at)
            }
            RuntimeError::OutputFailed { message, at } => {
                write!(f, "runtime error: output failed at {}: {}", at, message)
            }
            RuntimeError::TruncatedBytecode { at } => {
                write!(f, "runtime error: truncated bytecode at {}", at)
            }
        }
    }
}

impl std::error::Error for RuntimeError {}
