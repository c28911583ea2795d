// =============================================================================
// OP - Instruction set shared by lowering, assembly and execution
// =============================================================================

/// One opcode of the virtual machine.
///
/// The mnemonic is the textual intermediate form; the opcode byte is the
/// binary form. The table is byte-stable: a persisted byte stream stays valid
/// across releases, so bytes are never reassigned. `0x00` is reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    /// Push an integer literal. Operand: the value.
    PushNum,
    /// Push the literal 1 (zero-operand fast path).
    PushNum1,
    /// Push the literal 2 (zero-operand fast path).
    PushNum2,
    /// Push a string literal; encoded as u16 length + UTF-8 bytes inline.
    PushStr,

    // arithmetic, integer domain
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,

    // comparison; result is 1 or 0
    Gt,
    Lt,
    Gte,
    Lte,
    Eq,
    Neq,

    /// Pop into a frame slot. Operand: slot id.
    Store,
    /// Push a frame slot. Operand: slot id.
    Load,

    /// Unconditional jump. Operand: absolute byte address.
    Jump,
    /// Pop a condition, jump when it is exactly 0. Operand: address.
    Jif,

    /// Call a function. Operands: target address, argument count.
    Call,
    /// Pop the current frame and return to the caller.
    Ret,

    /// Pop one value and emit it as one output line.
    Puts,

    /// Pop `count` elements into an array. Operand: count.
    NewArray,
    /// Pop index then array, push the element.
    IndexGet,
    /// Pop value, index, array; push the updated array.
    IndexSet,
    /// Pop an array, push a random permutation of it.
    Shuffle,

    /// Stop execution.
    Halt,
}

/// Every opcode, for table-driven tests and tooling.
pub const ALL_OPS: &[Op] = &[
    Op::PushNum,
    Op::PushNum1,
    Op::PushNum2,
    Op::PushStr,
    Op::Add,
    Op::Sub,
    Op::Mul,
    Op::Div,
    Op::Rem,
    Op::Pow,
    Op::Gt,
    Op::Lt,
    Op::Gte,
    Op::Lte,
    Op::Eq,
    Op::Neq,
    Op::Store,
    Op::Load,
    Op::Jump,
    Op::Jif,
    Op::Call,
    Op::Ret,
    Op::Puts,
    Op::NewArray,
    Op::IndexGet,
    Op::IndexSet,
    Op::Shuffle,
    Op::Halt,
];

impl Op {
    pub fn mnemonic(self) -> &'static str {
        match self {
            Op::PushNum => "PUSH_NUM",
            Op::PushNum1 => "PUSH_NUM1",
            Op::PushNum2 => "PUSH_NUM2",
            Op::PushStr => "PUSH_STR",
            Op::Add => "ADD",
            Op::Sub => "SUB",
            Op::Mul => "MUL",
            Op::Div => "DIV",
            Op::Rem => "REM",
            Op::Pow => "POW",
            Op::Gt => "GT",
            Op::Lt => "LT",
            Op::Gte => "GTE",
            Op::Lte => "LTE",
            Op::Eq => "EQ",
            Op::Neq => "NEQ",
            Op::Store => "STORE",
            Op::Load => "LOAD",
            Op::Jump => "JUMP",
            Op::Jif => "JIF",
            Op::Call => "CALL",
            Op::Ret => "RET",
            Op::Puts => "PUTS",
            Op::NewArray => "NEW_ARRAY",
            Op::IndexGet => "INDEX_GET",
            Op::IndexSet => "INDEX_SET",
            Op::Shuffle => "SHUFFLE",
            Op::Halt => "HALT",
        }
    }

    pub fn opcode(self) -> u8 {
        match self {
            Op::PushNum => 0x01,
            Op::Add => 0x02,
            Op::Puts => 0x03,
            Op::Sub => 0x04,
            Op::Mul => 0x05,
            Op::Div => 0x06,
            Op::Rem => 0x07,
            Op::Pow => 0x08,
            Op::Gt => 0x09,
            Op::Lt => 0x0a,
            Op::Gte => 0x0b,
            Op::Lte => 0x0c,
            Op::Eq => 0x0d,
            Op::Neq => 0x0e,
            Op::Store => 0x0f,
            Op::Load => 0x10,
            Op::Jump => 0x11,
            Op::Jif => 0x12,
            Op::Call => 0x13,
            Op::Ret => 0x14,
            Op::PushStr => 0x15,
            Op::PushNum1 => 0x16,
            Op::PushNum2 => 0x17,
            Op::NewArray => 0x18,
            Op::IndexGet => 0x19,
            Op::IndexSet => 0x1a,
            Op::Shuffle => 0x1b,
            Op::Halt => 0xff,
        }
    }

    /// Number of operands in the textual form. `PUSH_STR`'s single operand is
    /// length-prefixed UTF-8 in the binary form; every other operand encodes
    /// as an unsigned 16-bit little-endian word.
    pub fn operand_count(self) -> usize {
        match self {
            Op::PushNum | Op::PushStr | Op::Store | Op::Load | Op::Jump | Op::Jif
            | Op::NewArray => 1,
            Op::Call => 2,
            _ => 0,
        }
    }

    pub fn from_mnemonic(mnemonic: &str) -> Option<Op> {
        ALL_OPS.iter().copied().find(|op| op.mnemonic() == mnemonic)
    }

    pub fn from_opcode(byte: u8) -> Option<Op> {
        ALL_OPS.iter().copied().find(|op| op.opcode() == byte)
    }
}
