//! Runtime values of the emulated interpreter.
//!
//! Immutable aggregates are reference counted so cloning a value off the stack
//! is cheap; lists are shared and mutable, as they are in the host language.

use std::{
    cell::RefCell,
    cmp::Ordering,
    fmt::{self, Write},
    rc::Rc,
};

use num_bigint::BigInt;
use num_traits::{ToPrimitive, Zero};
use serde::{Deserialize, Serialize};

use crate::{builtins::Builtin, bytecode::CodeObject};

/// A value held on an operand stack, in a scope or in a constant pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    None,
    Ellipsis,
    /// The `StopIteration` class, which module files can store as a constant.
    StopIteration,
    Bool(bool),
    Int(i64),
    /// Integers outside the `i64` range. Always normalized: a `LongInt` never
    /// holds a value that fits in `Int`.
    LongInt(BigInt),
    Float(f64),
    Complex { re: f64, im: f64 },
    Str(Rc<str>),
    Bytes(Rc<[u8]>),
    Tuple(Rc<[Value]>),
    List(Rc<RefCell<Vec<Value>>>),
    FrozenSet(Rc<[Value]>),
    Code(Rc<CodeObject>),
    Function(Rc<Function>),
    Builtin(Builtin),
}

/// A function object built by `MAKE_FUNCTION`.
#[derive(Debug, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub code: Rc<CodeObject>,
    /// Positional defaults, aligned to the last parameters.
    pub defaults: Vec<Value>,
    /// Keyword-only defaults, kept opaque.
    pub kwdefaults: Option<Value>,
    /// Annotations as a flat tuple of name/value pairs, when present.
    pub annotations: Option<Value>,
    /// Closure cells, when present. Cells are kept opaque.
    pub closure: Option<Value>,
}

impl Value {
    /// Builds an integer value, narrowing to `Int` when it fits.
    #[must_use]
    pub fn from_bigint(value: BigInt) -> Self {
        match value.to_i64() {
            Some(small) => Self::Int(small),
            None => Self::LongInt(value),
        }
    }

    #[must_use]
    pub fn str(s: &str) -> Self {
        Self::Str(Rc::from(s))
    }

    #[must_use]
    pub fn bytes(b: &[u8]) -> Self {
        Self::Bytes(Rc::from(b))
    }

    #[must_use]
    pub fn tuple(items: Vec<Self>) -> Self {
        Self::Tuple(Rc::from(items))
    }

    #[must_use]
    pub fn list(items: Vec<Self>) -> Self {
        Self::List(Rc::new(RefCell::new(items)))
    }

    /// Name of the value's type, as the host language reports it.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::None => "NoneType",
            Self::Ellipsis => "ellipsis",
            Self::StopIteration => "type",
            Self::Bool(_) => "bool",
            Self::Int(_) | Self::LongInt(_) => "int",
            Self::Float(_) => "float",
            Self::Complex { .. } => "complex",
            Self::Str(_) => "str",
            Self::Bytes(_) => "bytes",
            Self::Tuple(_) => "tuple",
            Self::List(_) => "list",
            Self::FrozenSet(_) => "frozenset",
            Self::Code(_) => "code",
            Self::Function(_) => "function",
            Self::Builtin(_) => "builtin_function_or_method",
        }
    }

    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::None => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::LongInt(i) => !i.is_zero(),
            Self::Float(f) => *f != 0.0,
            Self::Complex { re, im } => *re != 0.0 || *im != 0.0,
            Self::Str(s) => !s.is_empty(),
            Self::Bytes(b) => !b.is_empty(),
            Self::Tuple(items) | Self::FrozenSet(items) => !items.is_empty(),
            Self::List(items) => !items.borrow().is_empty(),
            Self::Ellipsis | Self::StopIteration | Self::Code(_) | Self::Function(_) | Self::Builtin(_) => true,
        }
    }

    /// Integer view of `bool`, `int` and long integers.
    #[must_use]
    pub fn as_bigint(&self) -> Option<BigInt> {
        match self {
            Self::Bool(b) => Some(BigInt::from(i64::from(*b))),
            Self::Int(i) => Some(BigInt::from(*i)),
            Self::LongInt(i) => Some(i.clone()),
            _ => None,
        }
    }

    /// Small-integer view of `bool` and `int`.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Bool(b) => Some(i64::from(*b)),
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Float view of any real number.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Bool(b) => Some(f64::from(u8::from(*b))),
            Self::Int(i) => Some(*i as f64),
            Self::LongInt(i) => i.to_f64(),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Items of a tuple, list or frozenset as an owned vector.
    #[must_use]
    pub fn sequence_items(&self) -> Option<Vec<Self>> {
        match self {
            Self::Tuple(items) | Self::FrozenSet(items) => Some(items.to_vec()),
            Self::List(items) => Some(items.borrow().clone()),
            _ => None,
        }
    }

    /// Identity comparison (`is`).
    ///
    /// Singletons and immutable scalars of the same type compare by value,
    /// since a copied scalar still denotes the same object in the host.
    /// Heap values compare by pointer.
    #[must_use]
    pub fn is_same(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::None, Self::None)
            | (Self::Ellipsis, Self::Ellipsis)
            | (Self::StopIteration, Self::StopIteration) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::LongInt(a), Self::LongInt(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Complex { re: a, im: b }, Self::Complex { re: c, im: d }) => {
                a.to_bits() == c.to_bits() && b.to_bits() == d.to_bits()
            }
            (Self::Str(a), Self::Str(b)) => Rc::ptr_eq(a, b),
            (Self::Bytes(a), Self::Bytes(b)) => Rc::ptr_eq(a, b),
            (Self::Tuple(a), Self::Tuple(b)) | (Self::FrozenSet(a), Self::FrozenSet(b)) => Rc::ptr_eq(a, b),
            (Self::List(a), Self::List(b)) => Rc::ptr_eq(a, b),
            (Self::Code(a), Self::Code(b)) => Rc::ptr_eq(a, b),
            (Self::Function(a), Self::Function(b)) => Rc::ptr_eq(a, b),
            (Self::Builtin(a), Self::Builtin(b)) => a == b,
            _ => false,
        }
    }

    /// Equality as `==` computes it, including cross-type numeric equality.
    #[must_use]
    pub fn py_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            (Self::Tuple(a), Self::Tuple(b)) => seq_eq(a, b),
            (Self::List(a), Self::List(b)) => Rc::ptr_eq(a, b) || seq_eq(&a.borrow(), &b.borrow()),
            (Self::FrozenSet(a), Self::FrozenSet(b)) => {
                a.len() == b.len() && a.iter().all(|item| b.iter().any(|other| item.py_eq(other)))
            }
            (Self::Code(a), Self::Code(b)) => Rc::ptr_eq(a, b) || a == b,
            (Self::Complex { re, im }, other) | (other, Self::Complex { re, im }) => match other {
                Self::Complex { re: re2, im: im2 } => re == re2 && im == im2,
                _ => *im == 0.0 && other.as_f64().is_some_and(|f| f == *re),
            },
            (Self::Float(a), other) | (other, Self::Float(a)) => match other {
                Self::Float(b) => a == b,
                Self::LongInt(i) => i.to_f64().is_some_and(|f| f == *a) && a.fract() == 0.0,
                _ => other.as_i64().is_some_and(|i| (i as f64) == *a && (*a as i64) == i),
            },
            (a, b) if a.is_integer() && b.is_integer() => a.as_bigint() == b.as_bigint(),
            _ => self.is_same(other),
        }
    }

    pub(crate) fn is_integer(&self) -> bool {
        matches!(self, Self::Bool(_) | Self::Int(_) | Self::LongInt(_))
    }

    /// Ordering as `<`/`>` compute it; `None` when the types are unorderable.
    #[must_use]
    pub fn py_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (a, b) if a.is_integer() && b.is_integer() => Some(a.as_bigint()?.cmp(&b.as_bigint()?)),
            (Self::Str(a), Self::Str(b)) => Some(a.cmp(b)),
            (Self::Bytes(a), Self::Bytes(b)) => Some(a.cmp(b)),
            (Self::Tuple(a), Self::Tuple(b)) => seq_cmp(a, b),
            (Self::List(a), Self::List(b)) => seq_cmp(&a.borrow(), &b.borrow()),
            _ => self.as_f64()?.partial_cmp(&other.as_f64()?),
        }
    }

    /// Whether `self` occurs in `container`, as `in` computes it.
    ///
    /// Returns `None` when the container does not support membership tests.
    #[must_use]
    pub fn contained_in(&self, container: &Self) -> Option<bool> {
        match container {
            Self::Tuple(items) | Self::FrozenSet(items) => Some(items.iter().any(|item| item.py_eq(self))),
            Self::List(items) => Some(items.borrow().iter().any(|item| item.py_eq(self))),
            Self::Str(haystack) => match self {
                Self::Str(needle) => Some(haystack.contains(&**needle)),
                _ => None,
            },
            Self::Bytes(haystack) => match self {
                Self::Bytes(needle) => Some(needle.is_empty() || haystack.windows(needle.len()).any(|w| w == &**needle)),
                Self::Int(byte) => Some(u8::try_from(*byte).is_ok_and(|b| haystack.contains(&b))),
                _ => None,
            },
            _ => None,
        }
    }

    /// The host language's `repr()`.
    #[must_use]
    pub fn repr(&self) -> String {
        let mut out = String::new();
        // writing into a String never fails
        let _ = self.repr_fmt(&mut out);
        out
    }

    /// The host language's `str()`.
    #[must_use]
    pub fn py_str(&self) -> String {
        match self {
            Self::Str(s) => s.to_string(),
            _ => self.repr(),
        }
    }

    fn repr_fmt(&self, f: &mut impl Write) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Ellipsis => f.write_str("Ellipsis"),
            Self::StopIteration => f.write_str("<class 'StopIteration'>"),
            Self::Bool(true) => f.write_str("True"),
            Self::Bool(false) => f.write_str("False"),
            Self::Int(i) => write!(f, "{i}"),
            Self::LongInt(i) => write!(f, "{i}"),
            Self::Float(x) => f.write_str(&float_repr(*x)),
            Self::Complex { re, im } => {
                if *re == 0.0 && re.is_sign_positive() {
                    write!(f, "{}j", complex_part_repr(*im))
                } else {
                    let sign = if *im < 0.0 || (*im == 0.0 && im.is_sign_negative()) { "-" } else { "+" };
                    write!(f, "({}{sign}{}j)", complex_part_repr(*re), complex_part_repr(im.abs()))
                }
            }
            Self::Str(s) => string_repr_fmt(s, f),
            Self::Bytes(b) => bytes_repr_fmt(b, f),
            Self::Tuple(items) => {
                f.write_char('(')?;
                write_items(items, f)?;
                if items.len() == 1 {
                    f.write_char(',')?;
                }
                f.write_char(')')
            }
            Self::List(items) => {
                f.write_char('[')?;
                write_items(&items.borrow(), f)?;
                f.write_char(']')
            }
            Self::FrozenSet(items) => {
                if items.is_empty() {
                    return f.write_str("frozenset()");
                }
                f.write_str("frozenset({")?;
                write_items(items, f)?;
                f.write_str("})")
            }
            Self::Code(code) => write!(
                f,
                "<code object {} at {:#x}, file \"{}\", line {}>",
                code.name(),
                Rc::as_ptr(code) as usize,
                code.filename(),
                code.firstlineno()
            ),
            Self::Function(func) => write!(f, "<function {} at {:#x}>", func.name, Rc::as_ptr(func) as usize),
            Self::Builtin(builtin) => write!(f, "<built-in function {builtin}>"),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.py_eq(other)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.repr_fmt(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::str(s)
    }
}

fn seq_eq(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.py_eq(y))
}

fn seq_cmp(a: &[Value], b: &[Value]) -> Option<Ordering> {
    for (x, y) in a.iter().zip(b) {
        if !x.py_eq(y) {
            return x.py_cmp(y);
        }
    }
    Some(a.len().cmp(&b.len()))
}

fn write_items(items: &[Value], f: &mut impl Write) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        item.repr_fmt(f)?;
    }
    Ok(())
}

/// Formats a float the way the host's `repr()` does.
#[must_use]
pub fn float_repr(f: f64) -> String {
    // Handle special values first
    if f.is_nan() {
        return "nan".to_string();
    }
    if f.is_infinite() {
        return if f.is_sign_negative() {
            "-inf".to_string()
        } else {
            "inf".to_string()
        };
    }

    // Use ryu for the shortest round-tripping representation
    let mut buffer = ryu::Buffer::new();
    let s = buffer.format(f);
    fix_ryu_exponent(s)
}

/// Fixes ryu's exponent format to match the host.
///
/// ryu produces "1e20" and "1e-7" but the host uses "1e+20" and "1e-07".
/// Also ensures ".0" suffix for numbers like "3" -> "3.0".
fn fix_ryu_exponent(s: &str) -> String {
    if let Some(e_pos) = s.find('e') {
        let (mantissa, exp_part) = s.split_at(e_pos);
        let exp = &exp_part[1..];
        // the host always writes a sign and at least two exponent digits
        let (sign, digits) = match exp.strip_prefix('-') {
            Some(digits) => ('-', digits),
            None => ('+', exp),
        };
        return format!("{mantissa}e{sign}{digits:0>2}");
    }
    if !s.contains('.') {
        return format!("{s}.0");
    }
    s.to_string()
}

/// Complex components drop the `.0` of integral values: `(1+2j)`.
fn complex_part_repr(f: f64) -> String {
    let repr = float_repr(f);
    repr.strip_suffix(".0").map_or_else(|| repr.clone(), str::to_owned)
}

/// Writes a string literal using the host's quote selection and escapes.
pub(crate) fn string_repr_fmt(s: &str, f: &mut impl Write) -> fmt::Result {
    let quote = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
    f.write_char(quote)?;
    for c in s.chars() {
        match c {
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\r' => f.write_str("\\r")?,
            '\t' => f.write_str("\\t")?,
            c if c == quote => {
                f.write_char('\\')?;
                f.write_char(c)?;
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => write!(f, "\\x{:02x}", c as u32)?,
            c => f.write_char(c)?,
        }
    }
    f.write_char(quote)
}

fn bytes_repr_fmt(b: &[u8], f: &mut impl Write) -> fmt::Result {
    let quote = if b.contains(&b'\'') && !b.contains(&b'"') { b'"' } else { b'\'' };
    f.write_char('b')?;
    f.write_char(char::from(quote))?;
    for &byte in b {
        match byte {
            b'\\' => f.write_str("\\\\")?,
            b'\n' => f.write_str("\\n")?,
            b'\r' => f.write_str("\\r")?,
            b'\t' => f.write_str("\\t")?,
            byte if byte == quote => {
                f.write_char('\\')?;
                f.write_char(char::from(byte))?;
            }
            0x20..0x7f => f.write_char(char::from(byte))?,
            byte => write!(f, "\\x{byte:02x}")?,
        }
    }
    f.write_char(char::from(quote))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_repr() {
        assert_eq!(float_repr(3.0), "3.0");
        assert_eq!(float_repr(0.1), "0.1");
        assert_eq!(float_repr(1e20), "1e+20");
        assert_eq!(float_repr(1.5e-7), "1.5e-07");
        assert_eq!(float_repr(1e300), "1e+300");
        assert_eq!(float_repr(f64::NEG_INFINITY), "-inf");
    }

    #[test]
    fn test_container_repr() {
        assert_eq!(Value::tuple(vec![Value::Int(1)]).repr(), "(1,)");
        assert_eq!(Value::tuple(vec![]).repr(), "()");
        assert_eq!(Value::list(vec![Value::Int(1), Value::str("a")]).repr(), "[1, 'a']");
        assert_eq!(Value::FrozenSet(Rc::from(vec![])).repr(), "frozenset()");
    }

    #[test]
    fn test_string_and_bytes_repr() {
        assert_eq!(Value::str("it's").repr(), "\"it's\"");
        assert_eq!(Value::str("a\nb").repr(), "'a\\nb'");
        assert_eq!(Value::bytes(b"\x00ab'").repr(), "b\"\\x00ab'\"");
    }

    #[test]
    fn test_complex_repr() {
        assert_eq!(Value::Complex { re: 0.0, im: 2.0 }.repr(), "2j");
        assert_eq!(Value::Complex { re: 1.0, im: -2.5 }.repr(), "(1-2.5j)");
    }

    #[test]
    fn test_numeric_equality_crosses_types() {
        assert!(Value::Int(1).py_eq(&Value::Float(1.0)));
        assert!(Value::Bool(true).py_eq(&Value::Int(1)));
        assert!(Value::Complex { re: 2.0, im: 0.0 }.py_eq(&Value::Int(2)));
        assert!(!Value::Int(1).py_eq(&Value::str("1")));
        assert!(!Value::Float(f64::NAN).py_eq(&Value::Float(f64::NAN)));
    }

    #[test]
    fn test_identity() {
        let s = Value::str("x");
        assert!(s.is_same(&s.clone()));
        assert!(!s.is_same(&Value::str("x")));
        assert!(Value::None.is_same(&Value::None));
    }
}
