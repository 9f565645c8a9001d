//! Emission of native bytecode.
//!
//! [`CodeBuilder`] owns the tables of the code object under construction and
//! appends fixed-width instructions. Labels are counted in instruction slots;
//! a jump to a label that is not defined yet emits a placeholder operand that
//! is patched as soon as the label is defined.

use std::fmt;

use ahash::AHashMap;

use super::{
    code::{CodeFlags, CodeObject, CodeParts, InvalidCode},
    op::{Opcode, OperandKind},
};
use crate::{value::Value, version::NATIVE_VERSION};

/// Largest operand a single instruction can carry.
pub const MAX_OPERAND: u32 = 0xff;

/// Stand-in for object identity when pooling constants.
///
/// The host caches a few immutable objects, so equal literals of those kinds
/// are the same object; everything else is a distinct object per literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LiteralIdentity {
    None,
    Ellipsis,
    StopIteration,
    Bool(bool),
    /// Integers in the small-int cache, `-5..=256`.
    SmallInt(i16),
    EmptyTuple,
    /// Construction-order id of a literal with no shared identity.
    Fresh(u64),
}

impl LiteralIdentity {
    /// The cached identity of `value`, if the host caches objects like it.
    #[must_use]
    pub fn cached(value: &Value) -> Option<Self> {
        match value {
            Value::None => Some(Self::None),
            Value::Ellipsis => Some(Self::Ellipsis),
            Value::StopIteration => Some(Self::StopIteration),
            Value::Bool(b) => Some(Self::Bool(*b)),
            Value::Int(i) if (-5..=256).contains(i) => Some(Self::SmallInt(*i as i16)),
            Value::Tuple(items) if items.is_empty() => Some(Self::EmptyTuple),
            _ => None,
        }
    }
}

/// Error building a code object.
#[derive(Debug, Clone, PartialEq)]
pub enum BuildError {
    /// An operand does not fit in one instruction.
    OperandTooLarge { opcode: Opcode, value: u64 },
    /// A table grew past what an operand can index.
    TableFull { opcode: Opcode },
    DuplicateLabel(String),
    UndefinedLabel(String),
    /// A relative jump to a label before the jump.
    BackwardRelativeJump { opcode: Opcode, label: String },
    /// A label reference on an opcode that does not jump.
    NotAJump(Opcode),
    /// The finished code indexes past one of its tables.
    Invalid(InvalidCode),
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OperandTooLarge { opcode, value } => {
                write!(f, "operand {value} of {opcode} does not fit in {MAX_OPERAND}")
            }
            Self::TableFull { opcode } => write!(f, "too many entries for {opcode} to index"),
            Self::DuplicateLabel(label) => write!(f, "label '{label}' defined twice"),
            Self::UndefinedLabel(label) => write!(f, "label '{label}' is never defined"),
            Self::BackwardRelativeJump { opcode, label } => {
                write!(f, "{opcode} cannot jump backwards to '{label}'")
            }
            Self::NotAJump(opcode) => write!(f, "{opcode} does not take a label"),
            Self::Invalid(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for BuildError {}

impl From<InvalidCode> for BuildError {
    fn from(err: InvalidCode) -> Self {
        Self::Invalid(err)
    }
}

/// A jump operand waiting for its label.
#[derive(Debug, Clone, Copy)]
struct Patch {
    opcode: Opcode,
    /// Byte offset of the operand.
    at: usize,
}

/// Builds a [`CodeObject`] in the native instruction encoding.
#[derive(Debug)]
pub struct CodeBuilder {
    parts: CodeParts,
    identities: Vec<LiteralIdentity>,
    next_fresh: u64,
    labels: AHashMap<String, usize>,
    pending: AHashMap<String, Vec<Patch>>,
}

impl CodeBuilder {
    #[must_use]
    pub fn new(filename: &str, name: &str) -> Self {
        Self {
            parts: CodeParts {
                filename: filename.to_owned(),
                name: name.to_owned(),
                firstlineno: 1,
                ..CodeParts::default()
            },
            identities: Vec::new(),
            next_fresh: 0,
            labels: AHashMap::new(),
            pending: AHashMap::new(),
        }
    }

    /// Scalar and name-table fields, for metadata directives.
    pub fn parts_mut(&mut self) -> &mut CodeParts {
        &mut self.parts
    }

    pub fn set_flags(&mut self, flags: CodeFlags) {
        self.parts.flags = flags;
    }

    /// Replaces the constant pool. Every entry gets its own identity.
    pub fn set_constants(&mut self, constants: Vec<Value>) {
        let identities = constants.iter().map(|value| self.identity_of(value)).collect();
        self.identities = identities;
        self.parts.constants = constants;
    }

    /// The identity a freshly constructed literal equal to `value` would have.
    pub fn identity_of(&mut self, value: &Value) -> LiteralIdentity {
        LiteralIdentity::cached(value).unwrap_or_else(|| {
            self.next_fresh += 1;
            LiteralIdentity::Fresh(self.next_fresh)
        })
    }

    /// Current length of the bytecode in instruction slots.
    #[must_use]
    pub fn slot(&self) -> usize {
        self.parts.bytecode.len() / 2
    }

    /// Appends one instruction.
    pub fn emit(&mut self, opcode: Opcode, arg: u32) -> Result<(), BuildError> {
        if arg > MAX_OPERAND {
            return Err(BuildError::OperandTooLarge {
                opcode,
                value: u64::from(arg),
            });
        }
        self.parts.bytecode.push(opcode as u8);
        self.parts.bytecode.push(arg as u8);
        Ok(())
    }

    /// Appends `opcode` operating on `value`, reusing a constant slot only
    /// when it holds the same object.
    pub fn emit_const(&mut self, opcode: Opcode, value: Value, identity: LiteralIdentity) -> Result<(), BuildError> {
        let index = match self.identities.iter().position(|existing| *existing == identity) {
            Some(index) => index,
            None => {
                self.parts.constants.push(value);
                self.identities.push(identity);
                self.parts.constants.len() - 1
            }
        };
        self.emit(opcode, table_operand(opcode, index)?)
    }

    /// Appends `opcode` operating on a global or attribute name, pooled by value.
    pub fn emit_name(&mut self, opcode: Opcode, name: &str) -> Result<(), BuildError> {
        let index = intern(&mut self.parts.names, name);
        self.emit(opcode, table_operand(opcode, index)?)
    }

    /// Appends `opcode` operating on a local variable, pooled by value.
    pub fn emit_local(&mut self, opcode: Opcode, name: &str) -> Result<(), BuildError> {
        let index = intern(&mut self.parts.varnames, name);
        self.emit(opcode, table_operand(opcode, index)?)
    }

    /// Appends a jump to `label`, patching it later if the label is not defined yet.
    pub fn emit_jump(&mut self, opcode: Opcode, label: &str) -> Result<(), BuildError> {
        if !opcode.is_jump() {
            return Err(BuildError::NotAJump(opcode));
        }
        let at = self.parts.bytecode.len() + 1;
        match self.labels.get(label) {
            Some(&target) => {
                let arg = self.jump_operand(opcode, at, target, label)?;
                self.emit(opcode, arg)
            }
            None => {
                self.emit(opcode, 0)?;
                self.pending
                    .entry(label.to_owned())
                    .or_default()
                    .push(Patch { opcode, at });
                Ok(())
            }
        }
    }

    /// Marks the current slot as `label` and patches every jump waiting for it.
    pub fn define_label(&mut self, label: &str) -> Result<(), BuildError> {
        if self.labels.contains_key(label) {
            return Err(BuildError::DuplicateLabel(label.to_owned()));
        }
        let target = self.slot();
        self.labels.insert(label.to_owned(), target);
        for patch in self.pending.remove(label).unwrap_or_default() {
            let arg = self.jump_operand(patch.opcode, patch.at, target, label)?;
            self.parts.bytecode[patch.at] = arg as u8;
        }
        Ok(())
    }

    /// Operand of a jump whose operand byte is at `at`.
    fn jump_operand(&self, opcode: Opcode, at: usize, target: usize, label: &str) -> Result<u32, BuildError> {
        let value = if opcode.operand_kind() == OperandKind::JumpRelative {
            // relative to the instruction after the jump
            let next = (at + 1) / 2;
            target
                .checked_sub(next)
                .ok_or_else(|| BuildError::BackwardRelativeJump {
                    opcode,
                    label: label.to_owned(),
                })?
        } else {
            target
        };
        u32::try_from(value)
            .ok()
            .filter(|value| *value <= MAX_OPERAND)
            .ok_or(BuildError::OperandTooLarge {
                opcode,
                value: value as u64,
            })
    }

    /// Validates and freezes the code object.
    pub fn finish(mut self) -> Result<CodeObject, BuildError> {
        if let Some(label) = self.pending.keys().min() {
            return Err(BuildError::UndefinedLabel(label.clone()));
        }
        if self.parts.nlocals == 0 {
            self.parts.nlocals = self.parts.varnames.len() as u32;
        }
        Ok(self.parts.build(NATIVE_VERSION)?)
    }
}

fn intern(table: &mut Vec<String>, name: &str) -> usize {
    table.iter().position(|existing| existing == name).unwrap_or_else(|| {
        table.push(name.to_owned());
        table.len() - 1
    })
}

fn table_operand(opcode: Opcode, index: usize) -> Result<u32, BuildError> {
    u32::try_from(index)
        .ok()
        .filter(|index| *index <= MAX_OPERAND)
        .ok_or(BuildError::TableFull { opcode })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_and_backward_labels() {
        let mut builder = CodeBuilder::new("<test>", "f");
        builder.emit_jump(Opcode::JumpAbsolute, "end").unwrap();
        builder.define_label("top").unwrap();
        builder.emit(Opcode::Nop, 0).unwrap();
        builder.emit_jump(Opcode::JumpForward, "end").unwrap();
        builder.emit_jump(Opcode::JumpAbsolute, "top").unwrap();
        builder.define_label("end").unwrap();
        builder.emit(Opcode::Nop, 0).unwrap();
        let code = builder.finish().unwrap();
        assert_eq!(
            code.bytecode(),
            &[
                Opcode::JumpAbsolute as u8,
                4,
                Opcode::Nop as u8,
                0,
                Opcode::JumpForward as u8,
                1,
                Opcode::JumpAbsolute as u8,
                1,
                Opcode::Nop as u8,
                0
            ]
        );
    }

    #[test]
    fn test_label_errors() {
        let mut builder = CodeBuilder::new("<test>", "f");
        builder.define_label("a").unwrap();
        assert_eq!(builder.define_label("a"), Err(BuildError::DuplicateLabel("a".to_owned())));
        builder.emit(Opcode::Nop, 0).unwrap();
        assert!(matches!(
            builder.emit_jump(Opcode::JumpForward, "a"),
            Err(BuildError::BackwardRelativeJump { .. })
        ));
        assert_eq!(builder.emit_jump(Opcode::LoadConst, "a"), Err(BuildError::NotAJump(Opcode::LoadConst)));
        builder.emit_jump(Opcode::JumpAbsolute, "missing").unwrap();
        assert_eq!(builder.finish().unwrap_err(), BuildError::UndefinedLabel("missing".to_owned()));
    }

    #[test]
    fn test_constants_pool_by_identity() {
        let mut builder = CodeBuilder::new("<test>", "f");
        for value in [Value::Int(0), Value::Int(0), Value::Int(1000), Value::Int(1000), Value::None, Value::None] {
            let identity = builder.identity_of(&value);
            builder.emit_const(Opcode::LoadConst, value, identity).unwrap();
        }
        let code = builder.finish().unwrap();
        assert_eq!(
            code.constants(),
            &[Value::Int(0), Value::Int(1000), Value::Int(1000), Value::None]
        );
        let operands: Vec<u32> = code.instructions(NATIVE_VERSION).map(|i| i.arg).collect();
        assert_eq!(operands, vec![0, 0, 1, 2, 3, 3]);
    }

    #[test]
    fn test_names_pool_by_value() {
        let mut builder = CodeBuilder::new("<test>", "f");
        builder.emit_name(Opcode::LoadName, "x").unwrap();
        builder.emit_name(Opcode::StoreName, "y").unwrap();
        builder.emit_name(Opcode::LoadGlobal, "x").unwrap();
        builder.emit_local(Opcode::LoadFast, "a").unwrap();
        let code = builder.finish().unwrap();
        assert_eq!(code.names(), &["x".to_owned(), "y".to_owned()]);
        assert_eq!(code.varnames(), &["a".to_owned()]);
        assert_eq!(code.nlocals(), 1);
    }

    #[test]
    fn test_operand_limit() {
        let mut builder = CodeBuilder::new("<test>", "f");
        assert_eq!(
            builder.emit(Opcode::BuildTuple, 256),
            Err(BuildError::OperandTooLarge {
                opcode: Opcode::BuildTuple,
                value: 256
            })
        );
    }

    #[test]
    fn test_cached_identities() {
        assert_eq!(LiteralIdentity::cached(&Value::Int(-5)), LiteralIdentity::cached(&Value::Int(-5)));
        assert_ne!(LiteralIdentity::cached(&Value::Int(256)), LiteralIdentity::cached(&Value::Int(0)));
        assert_eq!(LiteralIdentity::cached(&Value::Int(257)), None);
        assert_ne!(LiteralIdentity::cached(&Value::Bool(true)), LiteralIdentity::cached(&Value::Int(1)));
        assert_eq!(LiteralIdentity::cached(&Value::str("a")), None);
    }
}
