//! Interpreter-level exceptions raised by opcode handlers and builtins.

use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

/// Result type alias for operations that can raise an interpreter exception.
pub type RunResult<T> = Result<T, SimpleException>;

/// Exception types the emulated interpreter can raise.
///
/// Uses strum derives for automatic `Display`, `FromStr`, and `Into<&'static str>` implementations.
/// The string representation matches the variant name exactly (e.g., `ValueError` -> "ValueError").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, Serialize, Deserialize)]
pub enum ExcType {
    Exception,
    ArithmeticError,
    OverflowError,
    ZeroDivisionError,
    LookupError,
    IndexError,
    KeyError,
    NameError,
    UnboundLocalError,
    TypeError,
    ValueError,
    RecursionError,
    SystemError,
}

/// Lightweight exception: a type plus an optional message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SimpleException {
    exc_type: ExcType,
    arg: Option<String>,
}

impl fmt::Display for SimpleException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.arg {
            Some(arg) => write!(f, "{}: {arg}", self.exc_type),
            None => write!(f, "{}", self.exc_type),
        }
    }
}

impl std::error::Error for SimpleException {}

impl SimpleException {
    /// Creates a new exception with the given type and optional argument message.
    #[must_use]
    pub fn new(exc_type: ExcType, arg: Option<String>) -> Self {
        Self { exc_type, arg }
    }

    /// Creates an exception carrying a message.
    #[must_use]
    pub fn new_msg(exc_type: ExcType, arg: impl Into<String>) -> Self {
        Self::new(exc_type, Some(arg.into()))
    }

    #[must_use]
    pub fn exc_type(&self) -> ExcType {
        self.exc_type
    }

    #[must_use]
    pub fn arg(&self) -> Option<&str> {
        self.arg.as_deref()
    }
}

impl ExcType {
    pub(crate) fn type_error(msg: impl Into<String>) -> SimpleException {
        SimpleException::new_msg(Self::TypeError, msg)
    }

    pub(crate) fn value_error(msg: impl Into<String>) -> SimpleException {
        SimpleException::new_msg(Self::ValueError, msg)
    }

    pub(crate) fn index_error(msg: impl Into<String>) -> SimpleException {
        SimpleException::new_msg(Self::IndexError, msg)
    }

    pub(crate) fn zero_division(msg: impl Into<String>) -> SimpleException {
        SimpleException::new_msg(Self::ZeroDivisionError, msg)
    }

    pub(crate) fn overflow(msg: impl Into<String>) -> SimpleException {
        SimpleException::new_msg(Self::OverflowError, msg)
    }

    pub(crate) fn name_error(name: &str) -> SimpleException {
        SimpleException::new_msg(Self::NameError, format!("name '{name}' is not defined"))
    }

    pub(crate) fn unbound_local(name: &str) -> SimpleException {
        SimpleException::new_msg(
            Self::UnboundLocalError,
            format!("local variable '{name}' referenced before assignment"),
        )
    }

    /// `unsupported operand type(s) for +: 'int' and 'str'`
    pub(crate) fn binary_type_error(op: &str, lhs: &str, rhs: &str) -> SimpleException {
        Self::type_error(format!("unsupported operand type(s) for {op}: '{lhs}' and '{rhs}'"))
    }

    /// `bad operand type for unary -: 'str'`
    pub(crate) fn unary_type_error(op: &str, operand: &str) -> SimpleException {
        Self::type_error(format!("bad operand type for unary {op}: '{operand}'"))
    }

    /// `len() takes exactly one argument (2 given)`
    pub(crate) fn type_error_arg_count(name: &str, expected: usize, actual: usize) -> SimpleException {
        if expected == 1 {
            Self::type_error(format!("{name}() takes exactly one argument ({actual} given)"))
        } else {
            Self::type_error(format!("{name} expected {expected} arguments, got {actual}"))
        }
    }

    pub(crate) fn type_error_at_least(name: &str, min: usize, actual: usize) -> SimpleException {
        Self::type_error(format!("{name} expected at least {min} argument, got {actual}"))
    }

    pub(crate) fn type_error_at_most(name: &str, max: usize, actual: usize) -> SimpleException {
        Self::type_error(format!("{name} expected at most {max} arguments, got {actual}"))
    }
}
