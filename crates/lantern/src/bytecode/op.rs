//! The supported opcode subset and its static classification.
//!
//! Opcode numbers follow the 3.10 instruction set. The numbering of this subset
//! did not change across the 3.x line, so the same table decodes older modules;
//! only operand widths and jump units vary with the version.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, FromRepr, IntoStaticStr};

/// Opcodes with a number at or above this threshold take an operand.
pub const HAVE_ARGUMENT: u8 = 90;

/// Returns whether an opcode byte takes an operand.
///
/// Works for any byte, including opcodes outside the supported subset, which
/// is what instruction-width decoding needs.
#[must_use]
pub fn has_argument(byte: u8) -> bool {
    byte >= HAVE_ARGUMENT
}

/// A supported opcode.
///
/// Mnemonics are the upper snake case names used in listings (`LOAD_CONST`).
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    EnumString,
    IntoStaticStr,
    FromRepr,
    EnumIter,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum Opcode {
    PopTop = 1,
    RotTwo = 2,
    RotThree = 3,
    DupTop = 4,
    DupTopTwo = 5,
    RotFour = 6,
    Nop = 9,
    UnaryPositive = 10,
    UnaryNegative = 11,
    UnaryNot = 12,
    UnaryInvert = 15,
    BinaryMatrixMultiply = 16,
    InplaceMatrixMultiply = 17,
    BinaryPower = 19,
    BinaryMultiply = 20,
    BinaryModulo = 22,
    BinaryAdd = 23,
    BinarySubtract = 24,
    BinarySubscr = 25,
    BinaryFloorDivide = 26,
    BinaryTrueDivide = 27,
    InplaceFloorDivide = 28,
    InplaceTrueDivide = 29,
    InplaceAdd = 55,
    InplaceSubtract = 56,
    InplaceMultiply = 57,
    InplaceModulo = 59,
    BinaryLshift = 62,
    BinaryRshift = 63,
    BinaryAnd = 64,
    BinaryXor = 65,
    BinaryOr = 66,
    InplacePower = 67,
    InplaceLshift = 75,
    InplaceRshift = 76,
    InplaceAnd = 77,
    InplaceXor = 78,
    InplaceOr = 79,
    ReturnValue = 83,
    // operand-bearing opcodes from here on
    StoreName = 90,
    UnpackSequence = 92,
    StoreGlobal = 97,
    LoadConst = 100,
    LoadName = 101,
    BuildTuple = 102,
    BuildList = 103,
    CompareOp = 107,
    JumpForward = 110,
    JumpIfFalseOrPop = 111,
    JumpIfTrueOrPop = 112,
    JumpAbsolute = 113,
    PopJumpIfFalse = 114,
    PopJumpIfTrue = 115,
    LoadGlobal = 116,
    IsOp = 117,
    ContainsOp = 118,
    LoadFast = 124,
    StoreFast = 125,
    CallFunction = 131,
    MakeFunction = 132,
}

/// What an opcode's operand refers to.
///
/// Drives assembler operand resolution, disassembly rendering and index
/// validation of decoded code objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    /// The opcode takes no operand; the operand byte is ignored.
    None,
    /// Index into `constants`.
    Const,
    /// Index into `names`.
    Name,
    /// Index into `varnames`.
    Local,
    /// Absolute jump target.
    JumpAbsolute,
    /// Jump delta relative to the next instruction.
    JumpRelative,
    /// Index into the comparison table.
    Compare,
    /// A count, flag set or other plain integer.
    Count,
}

impl Opcode {
    /// Decodes an opcode byte, returning `None` for opcodes outside the subset.
    #[must_use]
    pub fn from_byte(byte: u8) -> Option<Self> {
        Self::from_repr(byte)
    }

    /// Whether this opcode takes an operand.
    #[must_use]
    pub fn has_argument(self) -> bool {
        has_argument(self as u8)
    }

    /// Whether running this opcode needs explicit operator permission.
    ///
    /// Unsafe opcodes can reach arbitrary behavior of the values involved:
    /// every operator, comparison, subscript and call. Everything else only
    /// moves values between the stack, the scopes and the constant pool.
    #[must_use]
    pub fn is_unsafe(self) -> bool {
        matches!(
            self,
            Self::UnaryPositive
                | Self::UnaryNegative
                | Self::UnaryNot
                | Self::UnaryInvert
                | Self::BinaryMatrixMultiply
                | Self::InplaceMatrixMultiply
                | Self::BinaryPower
                | Self::BinaryMultiply
                | Self::BinaryModulo
                | Self::BinaryAdd
                | Self::BinarySubtract
                | Self::BinarySubscr
                | Self::BinaryFloorDivide
                | Self::BinaryTrueDivide
                | Self::InplaceFloorDivide
                | Self::InplaceTrueDivide
                | Self::InplaceAdd
                | Self::InplaceSubtract
                | Self::InplaceMultiply
                | Self::InplaceModulo
                | Self::BinaryLshift
                | Self::BinaryRshift
                | Self::BinaryAnd
                | Self::BinaryXor
                | Self::BinaryOr
                | Self::InplacePower
                | Self::InplaceLshift
                | Self::InplaceRshift
                | Self::InplaceAnd
                | Self::InplaceXor
                | Self::InplaceOr
                | Self::CompareOp
                | Self::IsOp
                | Self::ContainsOp
                | Self::CallFunction
        )
    }

    #[must_use]
    pub fn operand_kind(self) -> OperandKind {
        match self {
            Self::LoadConst => OperandKind::Const,
            Self::StoreName | Self::LoadName | Self::StoreGlobal | Self::LoadGlobal => OperandKind::Name,
            Self::LoadFast | Self::StoreFast => OperandKind::Local,
            Self::JumpIfFalseOrPop
            | Self::JumpIfTrueOrPop
            | Self::JumpAbsolute
            | Self::PopJumpIfFalse
            | Self::PopJumpIfTrue => OperandKind::JumpAbsolute,
            Self::JumpForward => OperandKind::JumpRelative,
            Self::CompareOp => OperandKind::Compare,
            Self::UnpackSequence
            | Self::BuildTuple
            | Self::BuildList
            | Self::IsOp
            | Self::ContainsOp
            | Self::CallFunction
            | Self::MakeFunction => OperandKind::Count,
            _ => OperandKind::None,
        }
    }

    /// Whether this opcode transfers control through its operand.
    #[must_use]
    pub fn is_jump(self) -> bool {
        matches!(self.operand_kind(), OperandKind::JumpAbsolute | OperandKind::JumpRelative)
    }

    /// Mnemonic as written in listings.
    #[must_use]
    pub fn mnemonic(self) -> &'static str {
        self.into()
    }
}

/// Rich comparison selected by the `COMPARE_OP` operand.
///
/// Indices 6..=9 are only produced by compilers predating `IS_OP`/`CONTAINS_OP`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr, EnumIter)]
#[repr(u8)]
pub enum CompareOp {
    Lt = 0,
    Le = 1,
    Eq = 2,
    Ne = 3,
    Gt = 4,
    Ge = 5,
    In = 6,
    NotIn = 7,
    Is = 8,
    IsNot = 9,
}

impl CompareOp {
    #[must_use]
    pub fn from_operand(arg: u32) -> Option<Self> {
        u8::try_from(arg).ok().and_then(Self::from_repr)
    }

    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::In => "in",
            Self::NotIn => "not in",
            Self::Is => "is",
            Self::IsNot => "is not",
        }
    }

    /// Parses an operator symbol, tolerating extra inner whitespace (`not  in`).
    #[must_use]
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        let normalized = symbol.split_whitespace().collect::<Vec<_>>().join(" ");
        match normalized.as_str() {
            "<" => Some(Self::Lt),
            "<=" => Some(Self::Le),
            "==" => Some(Self::Eq),
            "!=" => Some(Self::Ne),
            ">" => Some(Self::Gt),
            ">=" => Some(Self::Ge),
            "in" => Some(Self::In),
            "not in" => Some(Self::NotIn),
            "is" => Some(Self::Is),
            "is not" => Some(Self::IsNot),
            _ => None,
        }
    }
}
