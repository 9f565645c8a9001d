//! Faults returned by stepping, and contract violations of debugger commands.
//!
//! Faults are values, not control flow: `step` and `cont` return them, and the
//! faulting instruction is never consumed, so it can be retried in place.

use std::fmt;

use crate::{
    bytecode::Opcode, exception::SimpleException, expressions::ExprError, resource::ResourceError,
};

/// A fault raised while executing one instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Fault {
    /// An unsafe opcode was reached without permission to run it.
    UnsafeOperation { address: usize, opcode: Opcode },
    /// The instruction could not be executed.
    Unresolvable { address: usize, cause: FaultCause },
    /// Execution was cancelled through the interrupt handle before this instruction.
    Interrupted { address: usize },
}

impl Fault {
    /// Address of the instruction that faulted.
    #[must_use]
    pub fn address(&self) -> usize {
        match self {
            Self::UnsafeOperation { address, .. } | Self::Unresolvable { address, .. } | Self::Interrupted { address } => {
                *address
            }
        }
    }

    /// Whether this is the unsafe-operation subtype.
    #[must_use]
    pub fn is_unsafe_operation(&self) -> bool {
        matches!(self, Self::UnsafeOperation { .. })
    }

    /// The host exception at the root of this fault, if any.
    #[must_use]
    pub fn exception(&self) -> Option<&SimpleException> {
        match self {
            Self::Unresolvable { cause, .. } => match cause {
                FaultCause::Exception(exc) => Some(exc),
                FaultCause::Nested(inner) => inner.exception(),
                _ => None,
            },
            _ => None,
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsafeOperation { address, opcode } => {
                write!(f, "unsafe operation {opcode} at {address}")
            }
            Self::Unresolvable { address, cause } => write!(f, "cannot execute instruction at {address}: {cause}"),
            Self::Interrupted { address } => write!(f, "interrupted before {address}"),
        }
    }
}

impl std::error::Error for Fault {}

/// Why an instruction could not be executed.
#[derive(Debug, Clone, PartialEq)]
pub enum FaultCause {
    /// The byte at the counter is not a supported opcode.
    UnknownOpcode(u8),
    /// The counter is at or past the end of the bytecode.
    EndOfCode,
    /// `RETURN_VALUE` in the root frame.
    ReturnOutsideCall,
    /// The instruction needs more operands than the stack holds.
    StackUnderflow { needed: usize, available: usize },
    /// The handler raised a host exception.
    Exception(SimpleException),
    /// A bytecode function called by `CALL_FUNCTION` faulted.
    Nested(Box<Fault>),
    /// A resource limit stopped a nested call run.
    Resource(ResourceError),
    /// An allowlist guard could not be evaluated.
    Guard(ExprError),
}

impl fmt::Display for FaultCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownOpcode(byte) => write!(f, "unknown opcode {byte}"),
            Self::EndOfCode => f.write_str("end of code"),
            Self::ReturnOutsideCall => f.write_str("'return' outside function"),
            Self::StackUnderflow { needed, available } => {
                write!(f, "stack underflow: needed {needed} values, {available} available")
            }
            Self::Exception(exc) => write!(f, "{exc}"),
            Self::Nested(fault) => write!(f, "in called function: {fault}"),
            Self::Resource(err) => write!(f, "{err}"),
            Self::Guard(err) => write!(f, "allow guard failed: {err}"),
        }
    }
}

impl From<SimpleException> for FaultCause {
    fn from(exc: SimpleException) -> Self {
        Self::Exception(exc)
    }
}

impl From<ResourceError> for FaultCause {
    fn from(err: ResourceError) -> Self {
        Self::Resource(err)
    }
}

/// A debugger command was used outside its contract.
///
/// Returned instead of touching any state.
#[derive(Debug, Clone, PartialEq)]
pub enum ContractError {
    /// `call` found something other than a function below the arguments.
    NotAFunction { type_name: &'static str },
    /// `call` without an argument count, but the current instruction is not a call.
    NotACallInstruction,
    /// An operation needed more stack values than there are.
    StackUnderflow { needed: usize, available: usize },
    /// `return` in the root frame.
    NoParentFrame,
    /// `return` with nothing on the stack to return.
    EmptyStack,
    /// `pop` index out of range.
    IndexOutOfRange(isize),
    /// `restore` of a snapshot that does not exist.
    NoSuchSavepoint(usize),
    /// An opcode name outside the supported subset.
    UnknownOpcode(String),
    /// More positional arguments than parameters.
    TooManyArguments { name: String, expected: usize, given: usize },
    /// Parameters left without a value or a default.
    MissingArguments { name: String, missing: Vec<String> },
    /// The callee relies on a calling convention this debugger does not model.
    Unsupported(String),
    /// A child frame would exceed the recursion limit.
    Resource(ResourceError),
    /// An expression given to a command failed to parse or evaluate.
    Expression(ExprError),
}

impl fmt::Display for ContractError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAFunction { type_name } => write!(f, "'{type_name}' object is not a function"),
            Self::NotACallInstruction => f.write_str("current instruction is not a call; give an argument count"),
            Self::StackUnderflow { needed, available } => {
                write!(f, "stack underflow: needed {needed} values, {available} available")
            }
            Self::NoParentFrame => f.write_str("already in the outermost frame"),
            Self::EmptyStack => f.write_str("nothing on the stack to return"),
            Self::IndexOutOfRange(index) => write!(f, "stack index {index} out of range"),
            Self::NoSuchSavepoint(n) => write!(f, "no savepoint {n}"),
            Self::UnknownOpcode(name) => write!(f, "unknown opcode '{name}'"),
            Self::TooManyArguments { name, expected, given } => {
                write!(f, "{name}() takes {expected} positional arguments but {given} were given")
            }
            Self::MissingArguments { name, missing } => {
                write!(f, "{name}() missing {} required positional argument", missing.len())?;
                if missing.len() > 1 {
                    f.write_str("s")?;
                }
                let quoted: Vec<String> = missing.iter().map(|arg| format!("'{arg}'")).collect();
                write!(f, ": {}", quoted.join(", "))
            }
            Self::Unsupported(what) => write!(f, "unsupported: {what}"),
            Self::Resource(err) => write!(f, "{err}"),
            Self::Expression(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for ContractError {}

impl From<ExprError> for ContractError {
    fn from(err: ExprError) -> Self {
        Self::Expression(err)
    }
}

impl From<ResourceError> for ContractError {
    fn from(err: ResourceError) -> Self {
        Self::Resource(err)
    }
}
