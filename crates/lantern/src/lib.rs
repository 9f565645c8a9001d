#![doc = include_str!("../../../README.md")]

pub mod assembler;
pub mod builtins;
pub mod bytecode;
pub mod debugger;
pub mod disassemble;
mod error;
pub mod exception;
pub mod expressions;
pub mod fault;
pub mod marshal;
pub mod namespace;
pub mod pyc;
pub mod resource;
pub mod tracer;
pub mod value;
pub mod version;

pub use crate::{
    assembler::{AssembleError, AssembleErrorKind, assemble},
    builtins::Builtin,
    bytecode::{CodeFlags, CodeObject, CodeParts, CompareOp, Frame, Instruction, Opcode},
    debugger::Debugger,
    error::LoadError,
    exception::{ExcType, SimpleException},
    expressions::{Condition, ExprError},
    fault::{ContractError, Fault, FaultCause},
    marshal::MarshalError,
    pyc::PycError,
    resource::{InterruptHandle, ResourceError, ResourceLimits},
    tracer::{NoopTracer, RecordingTracer, StderrTracer, TraceEvent, VmTracer},
    value::{Function, Value},
    version::{NATIVE_MAGIC, NATIVE_VERSION, Version},
};
