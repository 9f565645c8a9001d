//! The tagged object serialization used inside module files.
//!
//! Every object starts with a one byte tag; bit `0x80` of the tag
//! ([`FLAG_REF`]) registers the object in a reference table so later `r`
//! records can point back at it. Integers are little endian.
//!
//! Only the objects a code object can hold are supported. Dictionaries and
//! mutable sets never appear in constant pools and are rejected.

use std::{fmt, rc::Rc};

use num_bigint::{BigInt, Sign};
use num_traits::{Signed, ToPrimitive, Zero};

use crate::{
    bytecode::{CodeFlags, CodeObject, CodeParts, InvalidCode},
    value::Value,
    version::Version,
};

/// Tag bit marking an object that later records may reference.
pub const FLAG_REF: u8 = 0x80;

pub const TYPE_NULL: u8 = b'0';
pub const TYPE_NONE: u8 = b'N';
pub const TYPE_FALSE: u8 = b'F';
pub const TYPE_TRUE: u8 = b'T';
pub const TYPE_STOPITER: u8 = b'S';
pub const TYPE_ELLIPSIS: u8 = b'.';
pub const TYPE_INT: u8 = b'i';
pub const TYPE_INT64: u8 = b'I';
pub const TYPE_FLOAT: u8 = b'f';
pub const TYPE_BINARY_FLOAT: u8 = b'g';
pub const TYPE_COMPLEX: u8 = b'x';
pub const TYPE_BINARY_COMPLEX: u8 = b'y';
pub const TYPE_LONG: u8 = b'l';
pub const TYPE_STRING: u8 = b's';
pub const TYPE_INTERNED: u8 = b't';
pub const TYPE_REF: u8 = b'r';
pub const TYPE_TUPLE: u8 = b'(';
pub const TYPE_LIST: u8 = b'[';
pub const TYPE_DICT: u8 = b'{';
pub const TYPE_CODE: u8 = b'c';
pub const TYPE_UNICODE: u8 = b'u';
pub const TYPE_SET: u8 = b'<';
pub const TYPE_FROZENSET: u8 = b'>';
pub const TYPE_ASCII: u8 = b'a';
pub const TYPE_ASCII_INTERNED: u8 = b'A';
pub const TYPE_SMALL_TUPLE: u8 = b')';
pub const TYPE_SHORT_ASCII: u8 = b'z';
pub const TYPE_SHORT_ASCII_INTERNED: u8 = b'Z';

/// Bits per digit of a serialized long integer, independent of the host's digit size.
pub const LONG_DIGIT_BITS: u32 = 15;

/// Nesting depth at which reading gives up.
const MAX_DEPTH: usize = 2000;

/// Serialization failure at a byte offset of the input.
#[derive(Debug, Clone, PartialEq)]
pub struct MarshalError {
    pub offset: usize,
    pub kind: MarshalErrorKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MarshalErrorKind {
    /// The input ended inside an object.
    Truncated,
    UnknownTag(u8),
    /// A known tag for an object that cannot be represented (`{`, `<`, `0`).
    Unsupported(u8),
    /// An `r` record that points past the reference table or at an unfinished object.
    BadReference(u32),
    InvalidUtf8,
    InvalidFloat(String),
    /// A code object field holds the wrong kind of object.
    BadCodeField(&'static str),
    TooDeep,
    Code(InvalidCode),
    /// Writing an object that has no serialized form.
    Unmarshalable(&'static str),
}

impl fmt::Display for MarshalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            MarshalErrorKind::Truncated => write!(f, "unexpected end of data at offset {}", self.offset),
            MarshalErrorKind::UnknownTag(tag) => write!(f, "unknown type code 0x{tag:02x} at offset {}", self.offset),
            MarshalErrorKind::Unsupported(tag) => {
                write!(f, "unsupported type code '{}' at offset {}", char::from(*tag), self.offset)
            }
            MarshalErrorKind::BadReference(index) => write!(f, "invalid reference {index} at offset {}", self.offset),
            MarshalErrorKind::InvalidUtf8 => write!(f, "invalid utf-8 string at offset {}", self.offset),
            MarshalErrorKind::InvalidFloat(text) => write!(f, "invalid float {text:?} at offset {}", self.offset),
            MarshalErrorKind::BadCodeField(field) => {
                write!(f, "bad code object field {field} at offset {}", self.offset)
            }
            MarshalErrorKind::TooDeep => write!(f, "object nesting too deep at offset {}", self.offset),
            MarshalErrorKind::Code(err) => write!(f, "invalid code object at offset {}: {err}", self.offset),
            MarshalErrorKind::Unmarshalable(type_name) => write!(f, "cannot serialize '{type_name}' object"),
        }
    }
}

impl std::error::Error for MarshalError {}

// ============================================================================
// Reading
// ============================================================================

/// Deserializes one object from the start of `data`.
///
/// `version` decides how nested bytecode is validated; the code object layout
/// read is always the one with `posonlyargcount`.
pub fn loads(data: &[u8], version: Version) -> Result<Value, MarshalError> {
    Reader::new(data, version).read_object()
}

/// Cursor over serialized data with its reference table.
#[derive(Debug)]
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
    version: Version,
    refs: Vec<Option<Value>>,
    depth: usize,
}

impl<'a> Reader<'a> {
    #[must_use]
    pub fn new(data: &'a [u8], version: Version) -> Self {
        Self {
            data,
            pos: 0,
            version,
            refs: Vec::new(),
            depth: 0,
        }
    }

    /// Starts reading at `pos` instead of the beginning.
    #[must_use]
    pub fn starting_at(mut self, pos: usize) -> Self {
        self.pos = pos;
        self
    }

    /// Offset of the next unread byte.
    #[must_use]
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn read_object(&mut self) -> Result<Value, MarshalError> {
        if self.depth >= MAX_DEPTH {
            return Err(self.error(MarshalErrorKind::TooDeep));
        }
        self.depth += 1;
        let result = self.read_tagged();
        self.depth -= 1;
        result
    }

    fn read_tagged(&mut self) -> Result<Value, MarshalError> {
        let start = self.pos;
        let byte = self.u8()?;
        let tag = byte & !FLAG_REF;
        let slot = (byte & FLAG_REF != 0).then(|| {
            self.refs.push(None);
            self.refs.len() - 1
        });
        let value = match tag {
            TYPE_NONE => Value::None,
            TYPE_FALSE => Value::Bool(false),
            TYPE_TRUE => Value::Bool(true),
            TYPE_STOPITER => Value::StopIteration,
            TYPE_ELLIPSIS => Value::Ellipsis,
            TYPE_INT => Value::Int(i64::from(self.i32()?)),
            TYPE_INT64 => Value::Int(i64::from_le_bytes(self.array()?)),
            TYPE_LONG => self.long()?,
            TYPE_FLOAT => Value::Float(self.text_float()?),
            TYPE_BINARY_FLOAT => Value::Float(f64::from_le_bytes(self.array()?)),
            TYPE_COMPLEX => {
                let re = self.text_float()?;
                let im = self.text_float()?;
                Value::Complex { re, im }
            }
            TYPE_BINARY_COMPLEX => {
                let re = f64::from_le_bytes(self.array()?);
                let im = f64::from_le_bytes(self.array()?);
                Value::Complex { re, im }
            }
            TYPE_STRING => {
                let len = self.len32()?;
                Value::bytes(self.take(len)?)
            }
            TYPE_INTERNED | TYPE_UNICODE | TYPE_ASCII | TYPE_ASCII_INTERNED => {
                let len = self.len32()?;
                self.string(len)?
            }
            TYPE_SHORT_ASCII | TYPE_SHORT_ASCII_INTERNED => {
                let len = usize::from(self.u8()?);
                self.string(len)?
            }
            TYPE_TUPLE => {
                let len = self.len32()?;
                Value::tuple(self.items(len)?)
            }
            TYPE_SMALL_TUPLE => {
                let len = usize::from(self.u8()?);
                Value::tuple(self.items(len)?)
            }
            TYPE_LIST => {
                let len = self.len32()?;
                Value::list(self.items(len)?)
            }
            TYPE_FROZENSET => {
                let len = self.len32()?;
                Value::FrozenSet(Rc::from(self.items(len)?))
            }
            TYPE_CODE => Value::Code(Rc::new(self.code(start)?)),
            TYPE_REF => {
                let index = self.u32()?;
                return usize::try_from(index)
                    .ok()
                    .and_then(|i| self.refs.get(i).cloned().flatten())
                    .ok_or(MarshalError {
                        offset: start,
                        kind: MarshalErrorKind::BadReference(index),
                    });
            }
            TYPE_NULL | TYPE_DICT | TYPE_SET => {
                return Err(MarshalError {
                    offset: start,
                    kind: MarshalErrorKind::Unsupported(tag),
                });
            }
            other => {
                return Err(MarshalError {
                    offset: start,
                    kind: MarshalErrorKind::UnknownTag(other),
                });
            }
        };
        if let Some(slot) = slot {
            self.refs[slot] = Some(value.clone());
        }
        Ok(value)
    }

    fn code(&mut self, start: usize) -> Result<CodeObject, MarshalError> {
        let argcount = self.u32()?;
        let posonlyargcount = self.u32()?;
        let kwonlyargcount = self.u32()?;
        let nlocals = self.u32()?;
        let stacksize = self.u32()?;
        let flags = CodeFlags(self.u32()?);
        let bytecode = self.bytes_field("co_code")?;
        let constants = self.tuple_field("co_consts")?;
        let names = self.strings_field("co_names")?;
        let varnames = self.strings_field("co_varnames")?;
        let freevars = self.strings_field("co_freevars")?;
        let cellvars = self.strings_field("co_cellvars")?;
        let filename = self.str_field("co_filename")?;
        let name = self.str_field("co_name")?;
        let firstlineno = self.u32()?;
        let linetable = self.bytes_field("co_linetable")?;
        CodeParts {
            argcount,
            posonlyargcount,
            kwonlyargcount,
            nlocals,
            stacksize,
            flags,
            bytecode,
            constants,
            names,
            varnames,
            freevars,
            cellvars,
            filename,
            name,
            firstlineno,
            linetable,
        }
        .build(self.version)
        .map_err(|err| MarshalError {
            offset: start,
            kind: MarshalErrorKind::Code(err),
        })
    }

    fn bytes_field(&mut self, field: &'static str) -> Result<Vec<u8>, MarshalError> {
        let offset = self.pos;
        match self.read_object()? {
            Value::Bytes(bytes) => Ok(bytes.to_vec()),
            _ => Err(bad_field(offset, field)),
        }
    }

    fn tuple_field(&mut self, field: &'static str) -> Result<Vec<Value>, MarshalError> {
        let offset = self.pos;
        match self.read_object()? {
            Value::Tuple(items) => Ok(items.to_vec()),
            _ => Err(bad_field(offset, field)),
        }
    }

    fn strings_field(&mut self, field: &'static str) -> Result<Vec<String>, MarshalError> {
        let offset = self.pos;
        self.tuple_field(field)?
            .into_iter()
            .map(|item| match item {
                Value::Str(s) => Ok(s.to_string()),
                _ => Err(bad_field(offset, field)),
            })
            .collect()
    }

    fn str_field(&mut self, field: &'static str) -> Result<String, MarshalError> {
        let offset = self.pos;
        match self.read_object()? {
            Value::Str(s) => Ok(s.to_string()),
            _ => Err(bad_field(offset, field)),
        }
    }

    fn items(&mut self, len: usize) -> Result<Vec<Value>, MarshalError> {
        // every item takes at least one byte
        if len > self.data.len().saturating_sub(self.pos) {
            return Err(self.error(MarshalErrorKind::Truncated));
        }
        (0..len).map(|_| self.read_object()).collect()
    }

    fn long(&mut self) -> Result<Value, MarshalError> {
        let count = self.i32()?;
        let mut magnitude = BigInt::zero();
        for i in 0..count.unsigned_abs() {
            let digit = u16::from_le_bytes(self.array()?);
            magnitude += BigInt::from(digit) << (LONG_DIGIT_BITS * i);
        }
        Ok(Value::from_bigint(if count < 0 { -magnitude } else { magnitude }))
    }

    fn text_float(&mut self) -> Result<f64, MarshalError> {
        let offset = self.pos;
        let len = usize::from(self.u8()?);
        let text = std::str::from_utf8(self.take(len)?).map_err(|_| MarshalError {
            offset,
            kind: MarshalErrorKind::InvalidUtf8,
        })?;
        parse_float_text(text).ok_or_else(|| MarshalError {
            offset,
            kind: MarshalErrorKind::InvalidFloat(text.to_owned()),
        })
    }

    fn string(&mut self, len: usize) -> Result<Value, MarshalError> {
        let offset = self.pos;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes).map(Value::str).map_err(|_| MarshalError {
            offset,
            kind: MarshalErrorKind::InvalidUtf8,
        })
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], MarshalError> {
        let end = self.pos.checked_add(len).filter(|end| *end <= self.data.len());
        match end {
            Some(end) => {
                let bytes = &self.data[self.pos..end];
                self.pos = end;
                Ok(bytes)
            }
            None => Err(self.error(MarshalErrorKind::Truncated)),
        }
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], MarshalError> {
        let mut out = [0; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, MarshalError> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, MarshalError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn i32(&mut self) -> Result<i32, MarshalError> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    fn len32(&mut self) -> Result<usize, MarshalError> {
        let len = self.u32()?;
        usize::try_from(len).map_err(|_| self.error(MarshalErrorKind::Truncated))
    }

    fn error(&self, kind: MarshalErrorKind) -> MarshalError {
        MarshalError { offset: self.pos, kind }
    }
}

fn bad_field(offset: usize, field: &'static str) -> MarshalError {
    MarshalError {
        offset,
        kind: MarshalErrorKind::BadCodeField(field),
    }
}

/// Parses the `repr` style text of a float record (`1.5`, `inf`, `-nan`).
fn parse_float_text(text: &str) -> Option<f64> {
    match text.trim().to_ascii_lowercase().as_str() {
        "inf" | "+inf" => Some(f64::INFINITY),
        "-inf" => Some(f64::NEG_INFINITY),
        "nan" | "+nan" | "-nan" => Some(f64::NAN),
        other => other.parse().ok(),
    }
}

// ============================================================================
// Writing
// ============================================================================

/// Layout of serialized code objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CodeLayout {
    /// With `posonlyargcount`.
    #[default]
    Current,
    /// Without `posonlyargcount`, as written before positional-only parameters.
    Legacy,
}

impl CodeLayout {
    #[must_use]
    pub fn for_version(version: Version) -> Self {
        if version.has_posonly_field() { Self::Current } else { Self::Legacy }
    }
}

/// Serializes `value`.
pub fn dumps(value: &Value, layout: CodeLayout) -> Result<Vec<u8>, MarshalError> {
    let mut out = Vec::new();
    write_object(&mut out, value, layout)?;
    Ok(out)
}

/// Appends the serialized form of `value` to `out`.
pub fn write_object(out: &mut Vec<u8>, value: &Value, layout: CodeLayout) -> Result<(), MarshalError> {
    match value {
        Value::None => out.push(TYPE_NONE),
        Value::Ellipsis => out.push(TYPE_ELLIPSIS),
        Value::StopIteration => out.push(TYPE_STOPITER),
        Value::Bool(true) => out.push(TYPE_TRUE),
        Value::Bool(false) => out.push(TYPE_FALSE),
        Value::Int(n) => match i32::try_from(*n) {
            Ok(small) => {
                out.push(TYPE_INT);
                out.extend_from_slice(&small.to_le_bytes());
            }
            Err(_) => write_long(out, &BigInt::from(*n)),
        },
        Value::LongInt(n) => write_long(out, n),
        Value::Float(f) => {
            out.push(TYPE_BINARY_FLOAT);
            out.extend_from_slice(&f.to_le_bytes());
        }
        Value::Complex { re, im } => {
            out.push(TYPE_BINARY_COMPLEX);
            out.extend_from_slice(&re.to_le_bytes());
            out.extend_from_slice(&im.to_le_bytes());
        }
        Value::Str(s) => write_str(out, s),
        Value::Bytes(bytes) => {
            out.push(TYPE_STRING);
            write_len(out, bytes.len());
            out.extend_from_slice(bytes);
        }
        Value::Tuple(items) => {
            if let Ok(len) = u8::try_from(items.len()) {
                out.push(TYPE_SMALL_TUPLE);
                out.push(len);
            } else {
                out.push(TYPE_TUPLE);
                write_len(out, items.len());
            }
            write_items(out, items, layout)?;
        }
        Value::List(items) => {
            let items = items.borrow();
            out.push(TYPE_LIST);
            write_len(out, items.len());
            write_items(out, &items, layout)?;
        }
        Value::FrozenSet(items) => {
            out.push(TYPE_FROZENSET);
            write_len(out, items.len());
            write_items(out, items, layout)?;
        }
        Value::Code(code) => write_code(out, code, layout)?,
        Value::Function(_) | Value::Builtin(_) => {
            return Err(MarshalError {
                offset: out.len(),
                kind: MarshalErrorKind::Unmarshalable(value.type_name()),
            });
        }
    }
    Ok(())
}

/// Appends a code object record, tagged with [`FLAG_REF`] as compilers write it.
pub fn write_code(out: &mut Vec<u8>, code: &CodeObject, layout: CodeLayout) -> Result<(), MarshalError> {
    out.push(TYPE_CODE | FLAG_REF);
    out.extend_from_slice(&code.argcount().to_le_bytes());
    if layout == CodeLayout::Current {
        out.extend_from_slice(&code.posonlyargcount().to_le_bytes());
    }
    for field in [
        code.kwonlyargcount(),
        code.nlocals(),
        code.stacksize(),
        code.flags().0,
    ] {
        out.extend_from_slice(&field.to_le_bytes());
    }
    write_object(out, &Value::bytes(code.bytecode()), layout)?;
    write_object(out, &Value::tuple(code.constants().to_vec()), layout)?;
    for table in [code.names(), code.varnames(), code.freevars(), code.cellvars()] {
        write_object(out, &Value::tuple(table.iter().map(|s| Value::str(s)).collect()), layout)?;
    }
    write_str(out, code.filename());
    write_str(out, code.name());
    out.extend_from_slice(&code.firstlineno().to_le_bytes());
    write_object(out, &Value::bytes(code.linetable()), layout)
}

fn write_items(out: &mut Vec<u8>, items: &[Value], layout: CodeLayout) -> Result<(), MarshalError> {
    items.iter().try_for_each(|item| write_object(out, item, layout))
}

fn write_str(out: &mut Vec<u8>, s: &str) {
    if s.is_ascii() {
        if let Ok(len) = u8::try_from(s.len()) {
            out.push(TYPE_SHORT_ASCII);
            out.push(len);
        } else {
            out.push(TYPE_ASCII);
            write_len(out, s.len());
        }
    } else {
        out.push(TYPE_UNICODE);
        write_len(out, s.len());
    }
    out.extend_from_slice(s.as_bytes());
}

fn write_long(out: &mut Vec<u8>, n: &BigInt) {
    let mut digits = Vec::new();
    let mut magnitude = n.abs();
    let mask = BigInt::from((1u32 << LONG_DIGIT_BITS) - 1);
    while !magnitude.is_zero() {
        digits.push((&magnitude & &mask).to_u16().unwrap_or_default());
        magnitude >>= LONG_DIGIT_BITS;
    }
    let count = digits.len() as i32;
    out.push(TYPE_LONG);
    let signed = if n.sign() == Sign::Minus { -count } else { count };
    out.extend_from_slice(&signed.to_le_bytes());
    for digit in digits {
        out.extend_from_slice(&digit.to_le_bytes());
    }
}

fn write_len(out: &mut Vec<u8>, len: usize) {
    out.extend_from_slice(&(len as u32).to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{bytecode::Opcode, version::NATIVE_VERSION};

    fn read(data: &[u8]) -> Result<Value, MarshalError> {
        loads(data, NATIVE_VERSION)
    }

    #[test]
    fn test_scalars() {
        assert_eq!(read(b"N").unwrap(), Value::None);
        assert_eq!(read(b"T").unwrap(), Value::Bool(true));
        assert_eq!(read(b"i\xfe\xff\xff\xff").unwrap(), Value::Int(-2));
        assert_eq!(read(b"z\x02hi").unwrap(), Value::str("hi"));
        assert_eq!(read(b"f\x031.5").unwrap(), Value::Float(1.5));
        assert!(matches!(read(b"S").unwrap(), Value::StopIteration));
    }

    #[test]
    fn test_long_digits_are_fifteen_bits() {
        // 2**15 + 1 is digits [1, 1]
        assert_eq!(read(b"l\x02\x00\x00\x00\x01\x00\x01\x00").unwrap(), Value::Int(32769));
        assert_eq!(read(b"l\xfe\xff\xff\xff\x01\x00\x01\x00").unwrap(), Value::Int(-32769));

        let big = BigInt::from(1) << 100u32;
        let bytes = dumps(&Value::LongInt(big.clone()), CodeLayout::Current).unwrap();
        assert_eq!(bytes[0], TYPE_LONG);
        // 101 bits need 7 digits
        assert_eq!(&bytes[1..5], &7i32.to_le_bytes());
        assert_eq!(read(&bytes).unwrap(), Value::LongInt(big));
    }

    #[test]
    fn test_references() {
        // a tuple whose second item refers back to the flagged first item
        let data = b")\x02\xfa\x03abcr\x00\x00\x00\x00";
        let value = read(data).unwrap();
        assert_eq!(value, Value::tuple(vec![Value::str("abc"), Value::str("abc")]));

        let err = read(b"r\x05\x00\x00\x00").unwrap_err();
        assert_eq!(err.kind, MarshalErrorKind::BadReference(5));
    }

    #[test]
    fn test_errors_report_offsets() {
        let err = read(b")\x02N\x01").unwrap_err();
        assert_eq!(err, MarshalError { offset: 3, kind: MarshalErrorKind::UnknownTag(1) });
        let err = read(b"z\x05ab").unwrap_err();
        assert_eq!(err.kind, MarshalErrorKind::Truncated);
        let err = read(b"{0").unwrap_err();
        assert_eq!(err.kind, MarshalErrorKind::Unsupported(TYPE_DICT));
    }

    #[test]
    fn test_code_object_survives_a_round_trip() {
        let code = CodeParts {
            argcount: 1,
            nlocals: 1,
            stacksize: 2,
            flags: CodeFlags(0x43),
            bytecode: vec![Opcode::LoadFast as u8, 0, Opcode::ReturnValue as u8, 0],
            constants: vec![Value::None, Value::str("é")],
            varnames: vec!["x".to_owned()],
            filename: "t.py".to_owned(),
            name: "f".to_owned(),
            firstlineno: 3,
            linetable: vec![2, 1],
            ..CodeParts::default()
        }
        .build(NATIVE_VERSION)
        .unwrap();
        let bytes = dumps(&Value::Code(Rc::new(code.clone())), CodeLayout::Current).unwrap();
        assert_eq!(bytes[0], TYPE_CODE | FLAG_REF);
        let Value::Code(decoded) = read(&bytes).unwrap() else {
            panic!("expected a code object");
        };
        assert_eq!(*decoded, code);
    }

    #[test]
    fn test_legacy_layout_omits_posonly() {
        let code = CodeParts {
            name: "m".to_owned(),
            ..CodeParts::default()
        }
        .build(NATIVE_VERSION)
        .unwrap();
        let current = dumps(&Value::Code(Rc::new(code.clone())), CodeLayout::Current).unwrap();
        let legacy = dumps(&Value::Code(Rc::new(code)), CodeLayout::Legacy).unwrap();
        assert_eq!(current.len(), legacy.len() + 4);
    }

    #[test]
    fn test_functions_cannot_be_written() {
        let err = dumps(&Value::Builtin(crate::builtins::Builtin::Len), CodeLayout::Current).unwrap_err();
        assert_eq!(err.kind, MarshalErrorKind::Unmarshalable("builtin_function_or_method"));
    }
}
