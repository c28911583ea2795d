pub mod assemble;
pub mod compile_error;
pub mod disasm;
pub mod instr;
pub mod lower;
pub mod op;

pub use assemble::{Bytecode, assemble};
pub use instr::Instr;
pub use lower::{Lowered, Lowerer};
pub use op::Op;
