//! Compiled module files: header, version detection and the code object splice.
//!
//! A module file is a two byte little endian magic, the `\r\n` sentinel, a
//! version dependent number of header words, then one serialized code object.
//!
//! Before positional-only parameters, serialized code objects had one field
//! fewer. Rather than teaching the object reader a second layout, legacy files
//! are pre-scanned and every code record (at any nesting depth) gets four zero
//! bytes spliced in where `posonlyargcount` now lives.

use std::{borrow::Cow, fmt, rc::Rc};

use smallvec::SmallVec;

use crate::{
    bytecode::CodeObject,
    marshal::{self, CodeLayout, FLAG_REF, MarshalError, TYPE_CODE},
    value::Value,
    version::{NATIVE_MAGIC, UNSUPPORTED, Version, version_for_magic},
};

/// Bytes 2..4 of every module file.
pub const MODULE_SENTINEL: &[u8; 2] = b"\r\n";

/// Error reading or writing a module file.
#[derive(Debug, Clone, PartialEq)]
pub enum PycError {
    /// The magic is outside the 3.x range or the sentinel is missing.
    NotACompiledModule { magic: u16 },
    /// The bytecode format is newer than anything this crate understands.
    UnsupportedVersion(Version),
    /// The file ends before the object at `offset` is complete.
    Truncated { offset: usize },
    /// The pre-scan met a tag it cannot measure.
    UnknownTag { offset: usize, byte: u8 },
    /// The serialized object is not a code object.
    NotCode { offset: usize, byte: u8 },
    Marshal(MarshalError),
}

impl fmt::Display for PycError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotACompiledModule { magic } => write!(f, "not a recognized compiled module (magic {magic})"),
            Self::UnsupportedVersion(version) => write!(f, "unsupported bytecode version {version}"),
            Self::Truncated { offset } => write!(f, "module truncated at offset {offset}"),
            Self::UnknownTag { offset, byte } => write!(f, "unknown type code 0x{byte:02x} at offset {offset}"),
            Self::NotCode { offset, byte } => {
                write!(f, "expected a code object at offset {offset}, found type code 0x{byte:02x}")
            }
            Self::Marshal(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for PycError {}

impl From<MarshalError> for PycError {
    fn from(err: MarshalError) -> Self {
        Self::Marshal(err)
    }
}

/// Whether `data` starts like a module file.
#[must_use]
pub fn is_module(data: &[u8]) -> bool {
    data.get(2..4) == Some(MODULE_SENTINEL.as_slice())
}

/// Decodes a module file into its version marker and top-level code object.
pub fn read_module(data: &[u8]) -> Result<(Version, CodeObject), PycError> {
    let magic = data
        .get(..2)
        .map(|bytes| u16::from_le_bytes([bytes[0], bytes[1]]))
        .ok_or(PycError::Truncated { offset: 0 })?;
    if !is_module(data) {
        return Err(PycError::NotACompiledModule { magic });
    }
    let version = version_for_magic(magic).ok_or(PycError::NotACompiledModule { magic })?;
    if version >= UNSUPPORTED {
        return Err(PycError::UnsupportedVersion(version));
    }

    let start = version.header_len();
    let &byte = data.get(start).ok_or(PycError::Truncated { offset: start })?;
    if byte & !FLAG_REF != TYPE_CODE {
        return Err(PycError::NotCode { offset: start, byte });
    }
    let body = if version.has_posonly_field() {
        Cow::Borrowed(&data[start..])
    } else {
        Cow::Owned(splice_posonly(&data[start..]).map_err(|err| err.shifted(start))?)
    };
    let value = marshal::loads(&body, version).map_err(|mut err| {
        err.offset += start;
        PycError::Marshal(err)
    })?;
    match value {
        Value::Code(code) => Ok((version, Rc::unwrap_or_clone(code))),
        _ => Err(PycError::NotCode { offset: start, byte }),
    }
}

/// Encodes `code` as a module file of the native bytecode version.
pub fn write_module(code: &CodeObject) -> Result<Vec<u8>, PycError> {
    write_module_for(code, NATIVE_MAGIC)
}

/// Encodes `code` under `magic`, with that version's header and code object layout.
///
/// The bytecode itself is written as is; it is up to the caller to pass
/// instructions in the encoding `magic` implies.
pub fn write_module_for(code: &CodeObject, magic: u16) -> Result<Vec<u8>, PycError> {
    let version = version_for_magic(magic).ok_or(PycError::NotACompiledModule { magic })?;
    if version >= UNSUPPORTED {
        return Err(PycError::UnsupportedVersion(version));
    }
    let mut out = Vec::with_capacity(version.header_len() + code.bytecode().len() * 2);
    out.extend_from_slice(&magic.to_le_bytes());
    out.extend_from_slice(MODULE_SENTINEL);
    // flags (when present), mtime and source size are left zero
    out.resize(version.header_len(), 0);
    marshal::write_code(&mut out, code, CodeLayout::for_version(version))?;
    Ok(out)
}

// ============================================================================
// Pre-scan splice
// ============================================================================

/// Serialized objects in a legacy code record after its integer fields:
/// code, consts, names, varnames, freevars, cellvars, filename, name, lnotab.
const CODE_OBJECT_FIELDS: u32 = 9;

/// Integer fields of a legacy code record after `argcount`.
const LEGACY_INT_FIELDS_AFTER_ARGCOUNT: usize = 4;

/// Work left in an open container while scanning.
#[derive(Debug, Clone, Copy)]
enum Pending {
    /// Items left in a tuple, list or set.
    Items(u32),
    /// Objects left in a code record. The raw `firstlineno` word sits
    /// before the last one.
    CodeFields(u32),
}

/// Rewrites a legacy object graph so every code record carries a zero
/// `posonlyargcount`.
///
/// Scans exactly one object from the start of `data`; trailing bytes are
/// copied through.
pub fn splice_posonly(data: &[u8]) -> Result<Vec<u8>, PycError> {
    let mut scan = Splice {
        data,
        pos: 0,
        out: Vec::with_capacity(data.len() + 64),
    };
    let mut pending: SmallVec<[Pending; 16]> = SmallVec::new();
    pending.push(Pending::Items(1));

    while let Some(top) = pending.pop() {
        match top {
            Pending::Items(0) | Pending::CodeFields(0) => continue,
            Pending::Items(left) => pending.push(Pending::Items(left - 1)),
            Pending::CodeFields(left) => {
                pending.push(Pending::CodeFields(left - 1));
                if left == 1 {
                    scan.copy(4)?;
                }
            }
        }
        if let Some(opened) = scan.object()? {
            pending.push(opened);
        }
    }
    scan.out.extend_from_slice(&data[scan.pos..]);
    Ok(scan.out)
}

struct Splice<'a> {
    data: &'a [u8],
    pos: usize,
    out: Vec<u8>,
}

impl Splice<'_> {
    /// Copies one object header, returning the container it opens, if any.
    fn object(&mut self) -> Result<Option<Pending>, PycError> {
        let offset = self.pos;
        let byte = self.peek(0)?;
        let opened = match byte & !FLAG_REF {
            marshal::TYPE_NULL
            | marshal::TYPE_NONE
            | marshal::TYPE_FALSE
            | marshal::TYPE_TRUE
            | marshal::TYPE_STOPITER
            | marshal::TYPE_ELLIPSIS => {
                self.copy(1)?;
                None
            }
            marshal::TYPE_INT | marshal::TYPE_REF => {
                self.copy(5)?;
                None
            }
            marshal::TYPE_INT64 | marshal::TYPE_BINARY_FLOAT => {
                self.copy(9)?;
                None
            }
            marshal::TYPE_BINARY_COMPLEX => {
                self.copy(17)?;
                None
            }
            marshal::TYPE_FLOAT => {
                self.copy(1)?;
                self.copy_short_text()?;
                None
            }
            marshal::TYPE_COMPLEX => {
                self.copy(1)?;
                self.copy_short_text()?;
                self.copy_short_text()?;
                None
            }
            // Marshal writes 15-bit digits, each in a 2-byte word, whatever
            // digit width the writing interpreter used internally. The count
            // is signed by the sign of the number.
            marshal::TYPE_LONG => {
                let digits = self.peek_u32(1)? as i32;
                self.copy(5 + 2 * digits.unsigned_abs() as usize)?;
                None
            }
            marshal::TYPE_STRING
            | marshal::TYPE_INTERNED
            | marshal::TYPE_UNICODE
            | marshal::TYPE_ASCII
            | marshal::TYPE_ASCII_INTERNED => {
                let len = self.peek_u32(1)? as usize;
                self.copy(5 + len)?;
                None
            }
            marshal::TYPE_SHORT_ASCII | marshal::TYPE_SHORT_ASCII_INTERNED => {
                let len = usize::from(self.peek(1)?);
                self.copy(2 + len)?;
                None
            }
            marshal::TYPE_SMALL_TUPLE => {
                let len = self.peek(1)?;
                self.copy(2)?;
                Some(Pending::Items(u32::from(len)))
            }
            marshal::TYPE_TUPLE | marshal::TYPE_LIST | marshal::TYPE_SET | marshal::TYPE_FROZENSET => {
                let len = self.peek_u32(1)?;
                self.copy(5)?;
                Some(Pending::Items(len))
            }
            TYPE_CODE => {
                // tag and argcount, then the new field
                self.copy(5)?;
                self.out.extend_from_slice(&0u32.to_le_bytes());
                self.copy(4 * LEGACY_INT_FIELDS_AFTER_ARGCOUNT)?;
                Some(Pending::CodeFields(CODE_OBJECT_FIELDS))
            }
            _ => return Err(PycError::UnknownTag { offset, byte }),
        };
        Ok(opened)
    }

    /// Copies a one byte length followed by that many bytes.
    fn copy_short_text(&mut self) -> Result<(), PycError> {
        let len = usize::from(self.peek(0)?);
        self.copy(1 + len)
    }

    fn peek(&self, at: usize) -> Result<u8, PycError> {
        self.data
            .get(self.pos + at)
            .copied()
            .ok_or(PycError::Truncated { offset: self.pos })
    }

    fn peek_u32(&self, at: usize) -> Result<u32, PycError> {
        let start = self.pos + at;
        self.data
            .get(start..start + 4)
            .map(|bytes| u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            .ok_or(PycError::Truncated { offset: self.pos })
    }

    fn copy(&mut self, len: usize) -> Result<(), PycError> {
        let bytes = self
            .data
            .get(self.pos..self.pos + len)
            .ok_or(PycError::Truncated { offset: self.pos })?;
        self.out.extend_from_slice(bytes);
        self.pos += len;
        Ok(())
    }
}

impl PycError {
    /// Moves an offset relative to the object graph to one relative to the file.
    fn shifted(self, by: usize) -> Self {
        match self {
            Self::Truncated { offset } => Self::Truncated { offset: offset + by },
            Self::UnknownTag { offset, byte } => Self::UnknownTag {
                offset: offset + by,
                byte,
            },
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        bytecode::{CodeParts, Opcode},
        version::{DETERMINISTIC_PYC, FIXED_WIDTH_OPCODES, NATIVE_VERSION},
    };

    /// A legacy code record with empty tables.
    fn legacy_code(argcount: u32, consts: &[u8]) -> Vec<u8> {
        let mut out = vec![TYPE_CODE | FLAG_REF];
        for field in [argcount, 0, 0, 0, 0] {
            out.extend_from_slice(&field.to_le_bytes());
        }
        out.extend_from_slice(b"s\x00\x00\x00\x00");
        out.extend_from_slice(consts);
        out.extend_from_slice(b")\x00)\x00)\x00)\x00)\x00");
        out.extend_from_slice(b"z\x01fz\x01m");
        out.extend_from_slice(&7u32.to_le_bytes());
        out.extend_from_slice(b"s\x00\x00\x00\x00");
        out
    }

    #[test]
    fn test_splice_inserts_after_argcount() {
        let legacy = legacy_code(3, b")\x00");
        let spliced = splice_posonly(&legacy).unwrap();
        assert_eq!(spliced.len(), legacy.len() + 4);
        assert_eq!(&spliced[..5], &legacy[..5]);
        assert_eq!(&spliced[5..9], &[0, 0, 0, 0]);
        assert_eq!(&spliced[9..], &legacy[5..]);
    }

    #[test]
    fn test_splice_reaches_nested_code_in_small_tuple() {
        let inner = legacy_code(2, b")\x00");
        let mut consts = vec![marshal::TYPE_SMALL_TUPLE, 3, b'N'];
        consts.extend_from_slice(&inner);
        // a long spanning two 15-bit digits after the nested record
        consts.extend_from_slice(b"l\x02\x00\x00\x00\x01\x00\x01\x00");
        let outer = legacy_code(0, &consts);

        let spliced = splice_posonly(&outer).unwrap();
        assert_eq!(spliced.len(), outer.len() + 8);
        let Value::Code(code) = marshal::loads(&spliced, FIXED_WIDTH_OPCODES).unwrap() else {
            panic!("expected a code object");
        };
        let Value::Code(nested) = &code.constants()[1] else {
            panic!("expected a nested code object");
        };
        assert_eq!(nested.argcount(), 2);
        assert_eq!(nested.posonlyargcount(), 0);
        assert_eq!(nested.firstlineno(), 7);
        assert_eq!(code.constants()[2], Value::Int(32769));
    }

    #[test]
    fn test_splice_errors() {
        let err = splice_posonly(b")\x02N\x01").unwrap_err();
        assert_eq!(err, PycError::UnknownTag { offset: 3, byte: 1 });
        let err = splice_posonly(b"z\x09abc").unwrap_err();
        assert_eq!(err, PycError::Truncated { offset: 0 });
    }

    #[test]
    fn test_magic_checks() {
        assert_eq!(read_module(b"\x00"), Err(PycError::Truncated { offset: 0 }));
        let err = read_module(b"\x6b\x0d\x0a\x0a").unwrap_err();
        assert_eq!(err, PycError::NotACompiledModule { magic: 0x0d6b });
        let err = read_module(b"\x10\x27\r\n").unwrap_err();
        assert_eq!(err, PycError::NotACompiledModule { magic: 10000 });
        let mut future = 3550u16.to_le_bytes().to_vec();
        future.extend_from_slice(b"\r\n");
        assert_eq!(
            read_module(&future),
            Err(PycError::UnsupportedVersion(crate::version::UNSUPPORTED))
        );
    }

    fn sample() -> CodeObject {
        CodeParts {
            bytecode: vec![Opcode::LoadConst as u8, 0, Opcode::ReturnValue as u8, 0],
            constants: vec![Value::Int(1 << 40), Value::Float(0.5), Value::str("naïve")],
            names: vec!["x".to_owned()],
            filename: "m.py".to_owned(),
            name: "<module>".to_owned(),
            firstlineno: 1,
            ..CodeParts::default()
        }
        .build(NATIVE_VERSION)
        .unwrap()
    }

    #[test]
    fn test_native_round_trip() {
        let code = sample();
        let bytes = write_module(&code).unwrap();
        assert_eq!(&bytes[..4], &[0x6f, 0x0d, b'\r', b'\n']);
        assert_eq!(bytes[16], TYPE_CODE | FLAG_REF);
        assert!(is_module(&bytes));
        assert_eq!(read_module(&bytes).unwrap(), (NATIVE_VERSION, code));
    }

    #[test]
    fn test_legacy_round_trip() {
        let code = sample();
        let bytes = write_module_for(&code, 3379).unwrap();
        assert_eq!(bytes[12], TYPE_CODE | FLAG_REF);
        let (version, decoded) = read_module(&bytes).unwrap();
        assert_eq!(version, FIXED_WIDTH_OPCODES);
        assert_eq!(decoded, code);

        let bytes = write_module_for(&code, 3394).unwrap();
        assert_eq!(read_module(&bytes).unwrap().0, DETERMINISTIC_PYC);
    }

    #[test]
    fn test_non_code_payload() {
        let mut bytes = NATIVE_MAGIC.to_le_bytes().to_vec();
        bytes.extend_from_slice(b"\r\n");
        bytes.resize(16, 0);
        bytes.push(b'N');
        assert_eq!(read_module(&bytes), Err(PycError::NotCode { offset: 16, byte: b'N' }));
    }
}
