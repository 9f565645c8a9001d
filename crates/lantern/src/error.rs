use std::{fmt, str::Utf8Error};

use crate::{assembler::AssembleError, pyc::PycError};

/// Error loading a program into the debugger, separated by input kind.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadError {
    /// The input was taken as an assembler listing and did not assemble.
    Assemble(AssembleError),
    /// The input was taken as a compiled module and did not decode.
    Module(PycError),
    /// The input is neither a compiled module nor UTF-8 text.
    Encoding(Utf8Error),
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Assemble(error) => write!(f, "assembly failed: {error}"),
            Self::Module(error) => write!(f, "{error}"),
            Self::Encoding(error) => write!(f, "listing is not valid UTF-8: {error}"),
        }
    }
}

impl std::error::Error for LoadError {}

impl From<AssembleError> for LoadError {
    fn from(error: AssembleError) -> Self {
        Self::Assemble(error)
    }
}

impl From<PycError> for LoadError {
    fn from(error: PycError) -> Self {
        Self::Module(error)
    }
}

impl From<Utf8Error> for LoadError {
    fn from(error: Utf8Error) -> Self {
        Self::Encoding(error)
    }
}
