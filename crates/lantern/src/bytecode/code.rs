//! Compiled code objects.
//!
//! A [`CodeObject`] is built once (by the assembler, the module decoder or a
//! [`CodeParts`] literal) and never mutated afterwards; frames and constant
//! pools share it through `Rc`.

use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};

use super::op::{OperandKind, Opcode, has_argument};
use crate::{value::Value, version::Version};

/// A single compiler flag bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, EnumIter)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[repr(u32)]
pub enum CompilerFlag {
    Optimized = 1,
    Newlocals = 1 << 1,
    Varargs = 1 << 2,
    Varkeywords = 1 << 3,
    Nested = 1 << 4,
    Generator = 1 << 5,
    Nofree = 1 << 6,
    Coroutine = 1 << 7,
    IterableCoroutine = 1 << 8,
    AsyncGenerator = 1 << 9,
    FutureDivision = 1 << 17,
    FutureAbsoluteImport = 1 << 18,
    FutureWithStatement = 1 << 19,
    FuturePrintFunction = 1 << 20,
    FutureUnicodeLiterals = 1 << 21,
    FutureBarryAsBdfl = 1 << 22,
    FutureGeneratorStop = 1 << 23,
    FutureAnnotations = 1 << 24,
}

impl CompilerFlag {
    #[must_use]
    pub fn bit(self) -> u32 {
        self as u32
    }
}

/// Compiler flag set of a code object.
///
/// Stored as the raw word so bits without a [`CompilerFlag`] survive a
/// decode/export round trip untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct CodeFlags(pub u32);

impl CodeFlags {
    #[must_use]
    pub fn contains(self, flag: CompilerFlag) -> bool {
        self.0 & flag.bit() != 0
    }

    #[must_use]
    pub fn with(self, flag: CompilerFlag) -> Self {
        Self(self.0 | flag.bit())
    }

    /// Known flags that are set, in bit order.
    pub fn known(self) -> impl Iterator<Item = CompilerFlag> {
        CompilerFlag::iter().filter(move |flag| self.contains(*flag))
    }

    /// Bit positions that are set but have no known meaning.
    pub fn unknown_bits(self) -> impl Iterator<Item = u32> {
        let known = CompilerFlag::iter().fold(0, |acc, flag| acc | flag.bit());
        let unknown = self.0 & !known;
        (0..32).filter(move |bit| unknown & (1 << bit) != 0)
    }
}

/// A compiled unit: bytecode, constant pool, name tables and metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeObject {
    argcount: u32,
    posonlyargcount: u32,
    kwonlyargcount: u32,
    nlocals: u32,
    stacksize: u32,
    flags: CodeFlags,
    bytecode: Vec<u8>,
    constants: Vec<Value>,
    names: Vec<String>,
    varnames: Vec<String>,
    freevars: Vec<String>,
    cellvars: Vec<String>,
    filename: String,
    name: String,
    firstlineno: u32,
    linetable: Vec<u8>,
}

/// The fields of a [`CodeObject`] before validation.
#[derive(Debug, Clone, Default)]
pub struct CodeParts {
    pub argcount: u32,
    pub posonlyargcount: u32,
    pub kwonlyargcount: u32,
    pub nlocals: u32,
    pub stacksize: u32,
    pub flags: CodeFlags,
    pub bytecode: Vec<u8>,
    pub constants: Vec<Value>,
    pub names: Vec<String>,
    pub varnames: Vec<String>,
    pub freevars: Vec<String>,
    pub cellvars: Vec<String>,
    pub filename: String,
    pub name: String,
    pub firstlineno: u32,
    pub linetable: Vec<u8>,
}

/// Which table an out-of-range operand pointed into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum IndexTable {
    Constants,
    Names,
    Varnames,
}

/// A bytecode operand indexing past the end of its table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidCode {
    pub code_name: String,
    pub offset: usize,
    pub opcode: Opcode,
    pub index: u32,
    pub table: IndexTable,
    pub table_len: usize,
}

impl fmt::Display for InvalidCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} at offset {} in {} indexes {} {} of {}",
            self.opcode, self.offset, self.code_name, self.table, self.index, self.table_len
        )
    }
}

impl std::error::Error for InvalidCode {}

impl CodeParts {
    /// Validates operand indices under `version`'s instruction encoding and
    /// freezes the parts into a code object.
    pub fn build(self, version: Version) -> Result<CodeObject, InvalidCode> {
        let code = CodeObject {
            argcount: self.argcount,
            posonlyargcount: self.posonlyargcount,
            kwonlyargcount: self.kwonlyargcount,
            nlocals: self.nlocals,
            stacksize: self.stacksize,
            flags: self.flags,
            bytecode: self.bytecode,
            constants: self.constants,
            names: self.names,
            varnames: self.varnames,
            freevars: self.freevars,
            cellvars: self.cellvars,
            filename: self.filename,
            name: self.name,
            firstlineno: self.firstlineno,
            linetable: self.linetable,
        };
        code.validate(version)?;
        Ok(code)
    }
}

impl CodeObject {
    #[must_use]
    pub fn argcount(&self) -> u32 {
        self.argcount
    }

    #[must_use]
    pub fn posonlyargcount(&self) -> u32 {
        self.posonlyargcount
    }

    #[must_use]
    pub fn kwonlyargcount(&self) -> u32 {
        self.kwonlyargcount
    }

    #[must_use]
    pub fn nlocals(&self) -> u32 {
        self.nlocals
    }

    #[must_use]
    pub fn stacksize(&self) -> u32 {
        self.stacksize
    }

    #[must_use]
    pub fn flags(&self) -> CodeFlags {
        self.flags
    }

    #[must_use]
    pub fn bytecode(&self) -> &[u8] {
        &self.bytecode
    }

    #[must_use]
    pub fn constants(&self) -> &[Value] {
        &self.constants
    }

    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    #[must_use]
    pub fn varnames(&self) -> &[String] {
        &self.varnames
    }

    #[must_use]
    pub fn freevars(&self) -> &[String] {
        &self.freevars
    }

    #[must_use]
    pub fn cellvars(&self) -> &[String] {
        &self.cellvars
    }

    #[must_use]
    pub fn filename(&self) -> &str {
        &self.filename
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn firstlineno(&self) -> u32 {
        self.firstlineno
    }

    #[must_use]
    pub fn linetable(&self) -> &[u8] {
        &self.linetable
    }

    /// Copies the fields back out, e.g. to derive a modified code object.
    #[must_use]
    pub fn to_parts(&self) -> CodeParts {
        CodeParts {
            argcount: self.argcount,
            posonlyargcount: self.posonlyargcount,
            kwonlyargcount: self.kwonlyargcount,
            nlocals: self.nlocals,
            stacksize: self.stacksize,
            flags: self.flags,
            bytecode: self.bytecode.clone(),
            constants: self.constants.clone(),
            names: self.names.clone(),
            varnames: self.varnames.clone(),
            freevars: self.freevars.clone(),
            cellvars: self.cellvars.clone(),
            filename: self.filename.clone(),
            name: self.name.clone(),
            firstlineno: self.firstlineno,
            linetable: self.linetable.clone(),
        }
    }

    /// Decodes the instruction starting at `offset`.
    ///
    /// Returns `None` when `offset` is past the end of the bytecode. A
    /// truncated trailing operand reads as zero.
    #[must_use]
    pub fn instruction_at(&self, offset: usize, version: Version) -> Option<Instruction> {
        let byte = *self.bytecode.get(offset)?;
        let at = |i: usize| self.bytecode.get(offset + i).copied().unwrap_or(0);
        let arg = if version.has_fixed_width_opcodes() {
            u32::from(at(1))
        } else if has_argument(byte) {
            u32::from(u16::from_le_bytes([at(1), at(2)]))
        } else {
            0
        };
        Some(Instruction {
            offset,
            byte,
            opcode: Opcode::from_byte(byte),
            arg,
        })
    }

    /// Offset of the instruction following the one at `offset`.
    ///
    /// Before fixed-width opcodes, instructions without an operand take one
    /// byte and the rest take three; afterwards every instruction is two bytes.
    #[must_use]
    pub fn next_offset(&self, offset: usize, version: Version) -> usize {
        instruction_width(self.bytecode.get(offset).copied().unwrap_or(0), version) + offset
    }

    /// Lazily decodes every instruction. Call again to restart.
    #[must_use]
    pub fn instructions(&self, version: Version) -> Instructions<'_> {
        Instructions {
            code: self,
            version,
            offset: 0,
        }
    }

    /// Code objects stored in the constant pool.
    pub fn nested_code(&self) -> impl Iterator<Item = &Self> {
        self.constants.iter().filter_map(|value| match value {
            Value::Code(code) => Some(&**code),
            _ => None,
        })
    }

    fn validate(&self, version: Version) -> Result<(), InvalidCode> {
        for instruction in self.instructions(version) {
            let Some(opcode) = instruction.opcode else {
                continue;
            };
            let (table, table_len) = match opcode.operand_kind() {
                OperandKind::Const => (IndexTable::Constants, self.constants.len()),
                OperandKind::Name => (IndexTable::Names, self.names.len()),
                OperandKind::Local => (IndexTable::Varnames, self.varnames.len()),
                _ => continue,
            };
            if instruction.arg as usize >= table_len {
                return Err(InvalidCode {
                    code_name: self.name.clone(),
                    offset: instruction.offset,
                    opcode,
                    index: instruction.arg,
                    table,
                    table_len,
                });
            }
        }
        Ok(())
    }
}

/// Width in bytes of an instruction starting with `byte`.
#[must_use]
pub fn instruction_width(byte: u8, version: Version) -> usize {
    if version.has_fixed_width_opcodes() {
        2
    } else if has_argument(byte) {
        3
    } else {
        1
    }
}

/// One decoded instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    /// Byte offset of the opcode.
    pub offset: usize,
    /// Raw opcode byte.
    pub byte: u8,
    /// The opcode, or `None` outside the supported subset.
    pub opcode: Option<Opcode>,
    pub arg: u32,
}

/// Iterator over the instructions of a code object.
#[derive(Debug, Clone)]
pub struct Instructions<'a> {
    code: &'a CodeObject,
    version: Version,
    offset: usize,
}

impl Iterator for Instructions<'_> {
    type Item = Instruction;

    fn next(&mut self) -> Option<Self::Item> {
        let instruction = self.code.instruction_at(self.offset, self.version)?;
        self.offset = self.code.next_offset(self.offset, self.version);
        Some(instruction)
    }
}
