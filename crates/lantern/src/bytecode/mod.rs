//! Bytecode model and interpreter.
//!
//! - `op`: the supported opcode subset and its safe/unsafe classification
//! - `code`: code objects and version-aware instruction decoding
//! - `builder`: emission of native bytecode with label patching
//! - `vm`: frames and opcode handlers

pub mod builder;
pub mod code;
pub mod op;
pub mod vm;

pub use builder::{BuildError, CodeBuilder};
pub use code::{
    CodeFlags, CodeObject, CodeParts, CompilerFlag, IndexTable, Instruction, Instructions, InvalidCode,
    instruction_width,
};
pub use op::{CompareOp, HAVE_ARGUMENT, Opcode, OperandKind, has_argument};
pub use vm::{Context, Flow, Frame, Savepoint};
