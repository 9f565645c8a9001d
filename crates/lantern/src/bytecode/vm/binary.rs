//! Unary, binary and in-place arithmetic.
//!
//! Operations follow the host language's numeric tower: `bool` < `int` <
//! `float` < `complex`. Integers take an `i64` fast path and promote to
//! `LongInt` on overflow. Sequences support concatenation and repetition.

use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{One, Signed, ToPrimitive, Zero};

use crate::{
    builtins::iterate,
    bytecode::op::Opcode,
    exception::{ExcType, RunResult, SimpleException},
    value::Value,
};

/// Longest sequence repetition is allowed to produce, in items.
const MAX_REPEAT_LEN: usize = 1 << 26;

/// Widest integer multiplication, power and left shift may produce, in bits.
/// Checked before the result is computed.
const MAX_INT_BITS: u64 = 1 << 24;

/// A binary arithmetic or bitwise operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    MatMul,
    TrueDiv,
    FloorDiv,
    Mod,
    Pow,
    LShift,
    RShift,
    And,
    Or,
    Xor,
}

impl BinaryOp {
    /// The operator an opcode applies, and whether it is the in-place form.
    #[must_use]
    pub fn from_opcode(opcode: Opcode) -> Option<(Self, bool)> {
        let pair = match opcode {
            Opcode::BinaryAdd => (Self::Add, false),
            Opcode::BinarySubtract => (Self::Sub, false),
            Opcode::BinaryMultiply => (Self::Mul, false),
            Opcode::BinaryMatrixMultiply => (Self::MatMul, false),
            Opcode::BinaryTrueDivide => (Self::TrueDiv, false),
            Opcode::BinaryFloorDivide => (Self::FloorDiv, false),
            Opcode::BinaryModulo => (Self::Mod, false),
            Opcode::BinaryPower => (Self::Pow, false),
            Opcode::BinaryLshift => (Self::LShift, false),
            Opcode::BinaryRshift => (Self::RShift, false),
            Opcode::BinaryAnd => (Self::And, false),
            Opcode::BinaryOr => (Self::Or, false),
            Opcode::BinaryXor => (Self::Xor, false),
            Opcode::InplaceAdd => (Self::Add, true),
            Opcode::InplaceSubtract => (Self::Sub, true),
            Opcode::InplaceMultiply => (Self::Mul, true),
            Opcode::InplaceMatrixMultiply => (Self::MatMul, true),
            Opcode::InplaceTrueDivide => (Self::TrueDiv, true),
            Opcode::InplaceFloorDivide => (Self::FloorDiv, true),
            Opcode::InplaceModulo => (Self::Mod, true),
            Opcode::InplacePower => (Self::Pow, true),
            Opcode::InplaceLshift => (Self::LShift, true),
            Opcode::InplaceRshift => (Self::RShift, true),
            Opcode::InplaceAnd => (Self::And, true),
            Opcode::InplaceOr => (Self::Or, true),
            Opcode::InplaceXor => (Self::Xor, true),
            _ => return None,
        };
        Some(pair)
    }

    /// Operator symbol, as used in error messages.
    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::MatMul => "@",
            Self::TrueDiv => "/",
            Self::FloorDiv => "//",
            Self::Mod => "%",
            Self::Pow => "** or pow()",
            Self::LShift => "<<",
            Self::RShift => ">>",
            Self::And => "&",
            Self::Or => "|",
            Self::Xor => "^",
        }
    }
}

/// A unary operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Positive,
    Negative,
    Invert,
    Not,
}

impl UnaryOp {
    #[must_use]
    pub fn from_opcode(opcode: Opcode) -> Option<Self> {
        match opcode {
            Opcode::UnaryPositive => Some(Self::Positive),
            Opcode::UnaryNegative => Some(Self::Negative),
            Opcode::UnaryInvert => Some(Self::Invert),
            Opcode::UnaryNot => Some(Self::Not),
            _ => None,
        }
    }

    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Positive => "+",
            Self::Negative => "-",
            Self::Invert => "~",
            Self::Not => "not",
        }
    }
}

pub fn unary_op(op: UnaryOp, value: &Value) -> RunResult<Value> {
    match (op, value) {
        (UnaryOp::Not, v) => Ok(Value::Bool(!v.is_truthy())),
        (UnaryOp::Positive, Value::Bool(b)) => Ok(Value::Int(i64::from(*b))),
        (UnaryOp::Positive, v @ (Value::Int(_) | Value::LongInt(_) | Value::Float(_) | Value::Complex { .. })) => {
            Ok(v.clone())
        }
        (UnaryOp::Negative, Value::Bool(b)) => Ok(Value::Int(-i64::from(*b))),
        (UnaryOp::Negative, Value::Int(i)) => Ok(i
            .checked_neg()
            .map_or_else(|| Value::from_bigint(-BigInt::from(*i)), Value::Int)),
        (UnaryOp::Negative, Value::LongInt(i)) => Ok(Value::from_bigint(-i)),
        (UnaryOp::Negative, Value::Float(f)) => Ok(Value::Float(-f)),
        (UnaryOp::Negative, Value::Complex { re, im }) => Ok(Value::Complex { re: -re, im: -im }),
        (UnaryOp::Invert, Value::Bool(b)) => Ok(Value::Int(!i64::from(*b))),
        (UnaryOp::Invert, Value::Int(i)) => Ok(Value::Int(!i)),
        (UnaryOp::Invert, Value::LongInt(i)) => Ok(Value::from_bigint(!i)),
        (op, v) => Err(ExcType::unary_type_error(op.symbol(), v.type_name())),
    }
}

/// Applies a binary operator, producing a new value.
pub fn binary_op(op: BinaryOp, lhs: &Value, rhs: &Value) -> RunResult<Value> {
    if let (Value::Bool(a), Value::Bool(b)) = (lhs, rhs) {
        match op {
            BinaryOp::And => return Ok(Value::Bool(a & b)),
            BinaryOp::Or => return Ok(Value::Bool(a | b)),
            BinaryOp::Xor => return Ok(Value::Bool(a ^ b)),
            _ => {}
        }
    }
    if lhs.is_integer() && rhs.is_integer() {
        if let (Some(x), Some(y)) = (lhs.as_i64(), rhs.as_i64())
            && let Some(result) = small_int_op(op, x, y)?
        {
            return Ok(result);
        }
        if let (Some(x), Some(y)) = (lhs.as_bigint(), rhs.as_bigint()) {
            return big_int_op(op, &x, &y, lhs, rhs);
        }
    }
    if matches!(lhs, Value::Complex { .. }) || matches!(rhs, Value::Complex { .. }) {
        if let (Some(a), Some(b)) = (as_complex(lhs), as_complex(rhs)) {
            return complex_op(op, a, b, lhs, rhs);
        }
    } else if let (Some(a), Some(b)) = (lhs.as_f64(), rhs.as_f64()) {
        return float_op(op, a, b, lhs, rhs);
    }
    sequence_op(op, lhs, rhs)
}

/// Applies the in-place form of an operator.
///
/// Lists are mutated and returned as the same object for `+=` and `*=`;
/// everything else behaves like [`binary_op`].
pub fn inplace_op(op: BinaryOp, lhs: &Value, rhs: &Value) -> RunResult<Value> {
    if let Value::List(items) = lhs {
        match op {
            BinaryOp::Add => {
                let extra = iterate(rhs)?;
                items.borrow_mut().extend(extra);
                return Ok(lhs.clone());
            }
            BinaryOp::Mul if rhs.is_integer() => {
                let count = repeat_count(rhs, items.borrow().len())?;
                let mut items = items.borrow_mut();
                let original = std::mem::take(&mut *items);
                for _ in 0..count {
                    items.extend(original.iter().cloned());
                }
                return Ok(lhs.clone());
            }
            _ => {}
        }
    }
    binary_op(op, lhs, rhs)
}

fn integer_zero_division() -> SimpleException {
    ExcType::zero_division("integer division or modulo by zero")
}

fn negative_shift() -> SimpleException {
    ExcType::value_error("negative shift count")
}

fn check_int_bits(bits: u64) -> RunResult<()> {
    if bits > MAX_INT_BITS {
        return Err(ExcType::overflow(format!(
            "integer result would need {bits} bits, more than {MAX_INT_BITS}"
        )));
    }
    Ok(())
}

/// `i64` arithmetic; `Ok(None)` means the result needs the big-integer path.
fn small_int_op(op: BinaryOp, x: i64, y: i64) -> RunResult<Option<Value>> {
    let result = match op {
        BinaryOp::Add => x.checked_add(y),
        BinaryOp::Sub => x.checked_sub(y),
        BinaryOp::Mul => x.checked_mul(y),
        BinaryOp::FloorDiv => {
            if y == 0 {
                return Err(integer_zero_division());
            }
            if x == i64::MIN && y == -1 { None } else { Some(Integer::div_floor(&x, &y)) }
        }
        BinaryOp::Mod => {
            if y == 0 {
                return Err(integer_zero_division());
            }
            if y == -1 { Some(0) } else { Some(Integer::mod_floor(&x, &y)) }
        }
        BinaryOp::And => Some(x & y),
        BinaryOp::Or => Some(x | y),
        BinaryOp::Xor => Some(x ^ y),
        BinaryOp::LShift => {
            if y < 0 {
                return Err(negative_shift());
            }
            if x == 0 {
                Some(0)
            } else if y < 63 {
                let shifted = x << y;
                (shifted >> y == x).then_some(shifted)
            } else {
                None
            }
        }
        BinaryOp::RShift => {
            if y < 0 {
                return Err(negative_shift());
            }
            Some(if y >= 64 { if x < 0 { -1 } else { 0 } } else { x >> y })
        }
        BinaryOp::Pow if y >= 0 => u32::try_from(y).ok().and_then(|exp| x.checked_pow(exp)),
        BinaryOp::Pow | BinaryOp::TrueDiv | BinaryOp::MatMul => None,
    };
    Ok(result.map(Value::Int))
}

fn big_int_op(op: BinaryOp, x: &BigInt, y: &BigInt, lhs: &Value, rhs: &Value) -> RunResult<Value> {
    let value = match op {
        BinaryOp::Add => x + y,
        BinaryOp::Sub => x - y,
        BinaryOp::Mul => {
            check_int_bits(x.bits() + y.bits())?;
            x * y
        }
        BinaryOp::FloorDiv => {
            if y.is_zero() {
                return Err(integer_zero_division());
            }
            x.div_floor(y)
        }
        BinaryOp::Mod => {
            if y.is_zero() {
                return Err(integer_zero_division());
            }
            x.mod_floor(y)
        }
        BinaryOp::And => x & y,
        BinaryOp::Or => x | y,
        BinaryOp::Xor => x ^ y,
        BinaryOp::LShift => {
            if y.is_negative() {
                return Err(negative_shift());
            }
            if x.is_zero() {
                return Ok(Value::Int(0));
            }
            let shift = y.to_u64().ok_or_else(|| ExcType::overflow("too many digits in integer"))?;
            check_int_bits(x.bits().saturating_add(shift))?;
            x << shift
        }
        BinaryOp::RShift => {
            if y.is_negative() {
                return Err(negative_shift());
            }
            match y.to_u64() {
                Some(shift) if shift <= x.bits() => x >> shift,
                _ if x.is_negative() => BigInt::from(-1),
                _ => BigInt::zero(),
            }
        }
        BinaryOp::TrueDiv => {
            if y.is_zero() {
                return Err(ExcType::zero_division("division by zero"));
            }
            let quotient = x.to_f64().unwrap_or(f64::NAN) / y.to_f64().unwrap_or(f64::NAN);
            if !quotient.is_finite() {
                return Err(ExcType::overflow("integer division result too large for a float"));
            }
            return Ok(Value::Float(quotient));
        }
        BinaryOp::Pow => {
            if y.is_negative() {
                let base = x.to_f64().unwrap_or(f64::NAN);
                return float_op(op, base, y.to_f64().unwrap_or(f64::NAN), lhs, rhs);
            }
            let unit = x.is_zero() || x.magnitude().is_one();
            match y.to_u32() {
                Some(exp) if unit => x.pow(exp),
                Some(exp) => {
                    check_int_bits(x.bits().saturating_mul(u64::from(exp)))?;
                    x.pow(exp)
                }
                None if x.is_zero() || *x == BigInt::from(1) => x.clone(),
                None if *x == BigInt::from(-1) => {
                    if y.is_even() {
                        BigInt::from(1)
                    } else {
                        x.clone()
                    }
                }
                None => return Err(ExcType::overflow("exponent too large")),
            }
        }
        BinaryOp::MatMul => {
            return Err(ExcType::binary_type_error(op.symbol(), lhs.type_name(), rhs.type_name()));
        }
    };
    Ok(Value::from_bigint(value))
}

fn float_op(op: BinaryOp, a: f64, b: f64, lhs: &Value, rhs: &Value) -> RunResult<Value> {
    let value = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::TrueDiv => {
            if b == 0.0 {
                return Err(ExcType::zero_division("float division by zero"));
            }
            a / b
        }
        BinaryOp::FloorDiv => {
            if b == 0.0 {
                return Err(ExcType::zero_division("float floor division by zero"));
            }
            float_divmod(a, b).0
        }
        BinaryOp::Mod => {
            if b == 0.0 {
                return Err(ExcType::zero_division("float modulo"));
            }
            float_divmod(a, b).1
        }
        BinaryOp::Pow => {
            if a == 0.0 && b < 0.0 {
                return Err(ExcType::zero_division("0.0 cannot be raised to a negative power"));
            }
            if a < 0.0 && b.fract() != 0.0 {
                return complex_op(op, (a, 0.0), (b, 0.0), lhs, rhs);
            }
            a.powf(b)
        }
        BinaryOp::MatMul
        | BinaryOp::LShift
        | BinaryOp::RShift
        | BinaryOp::And
        | BinaryOp::Or
        | BinaryOp::Xor => {
            return Err(ExcType::binary_type_error(op.symbol(), lhs.type_name(), rhs.type_name()));
        }
    };
    Ok(Value::Float(value))
}

/// Floor division and modulo with the sign of the divisor.
fn float_divmod(a: f64, b: f64) -> (f64, f64) {
    let mut modulo = a % b;
    let mut div = (a - modulo) / b;
    if modulo == 0.0 {
        modulo = 0.0_f64.copysign(b);
    } else if (b < 0.0) != (modulo < 0.0) {
        modulo += b;
        div -= 1.0;
    }
    let floordiv = if div == 0.0 {
        0.0_f64.copysign(a / b)
    } else {
        let floor = div.floor();
        if div - floor > 0.5 { floor + 1.0 } else { floor }
    };
    (floordiv, modulo)
}

fn as_complex(value: &Value) -> Option<(f64, f64)> {
    match value {
        Value::Complex { re, im } => Some((*re, *im)),
        other => other.as_f64().map(|re| (re, 0.0)),
    }
}

fn complex_op(op: BinaryOp, (a, b): (f64, f64), (c, d): (f64, f64), lhs: &Value, rhs: &Value) -> RunResult<Value> {
    let (re, im) = match op {
        BinaryOp::Add => (a + c, b + d),
        BinaryOp::Sub => (a - c, b - d),
        BinaryOp::Mul => (a * c - b * d, a * d + b * c),
        BinaryOp::TrueDiv => {
            let denominator = c * c + d * d;
            if denominator == 0.0 {
                return Err(ExcType::zero_division("complex division by zero"));
            }
            ((a * c + b * d) / denominator, (b * c - a * d) / denominator)
        }
        BinaryOp::Pow => {
            if c == 0.0 && d == 0.0 {
                (1.0, 0.0)
            } else if a == 0.0 && b == 0.0 {
                if d != 0.0 || c < 0.0 {
                    return Err(ExcType::zero_division("0.0 to a negative or complex power"));
                }
                (0.0, 0.0)
            } else {
                let modulus = a.hypot(b).ln();
                let angle = b.atan2(a);
                let real = c * modulus - d * angle;
                let imag = d * modulus + c * angle;
                let scale = real.exp();
                (scale * imag.cos(), scale * imag.sin())
            }
        }
        _ => return Err(ExcType::binary_type_error(op.symbol(), lhs.type_name(), rhs.type_name())),
    };
    Ok(Value::Complex { re, im })
}

/// Number of repetitions for `seq * count`, clamped at zero.
fn repeat_count(count: &Value, len: usize) -> RunResult<usize> {
    let count = count
        .as_i64()
        .ok_or_else(|| ExcType::overflow("cannot fit 'int' into an index-sized integer"))?;
    let count = usize::try_from(count).unwrap_or(0);
    if len.saturating_mul(count) > MAX_REPEAT_LEN {
        return Err(ExcType::overflow("repeated sequence is too long"));
    }
    Ok(count)
}

fn repeat(sequence: &Value, count: &Value) -> RunResult<Value> {
    match sequence {
        Value::Str(s) => Ok(Value::str(&s.repeat(repeat_count(count, s.len())?))),
        Value::Bytes(b) => Ok(Value::bytes(&b.repeat(repeat_count(count, b.len())?))),
        Value::Tuple(items) => {
            let count = repeat_count(count, items.len())?;
            Ok(Value::tuple(items.iter().cycle().take(items.len() * count).cloned().collect()))
        }
        Value::List(items) => {
            let items = items.borrow();
            let count = repeat_count(count, items.len())?;
            Ok(Value::list(items.iter().cycle().take(items.len() * count).cloned().collect()))
        }
        other => Err(ExcType::type_error(format!(
            "can't multiply sequence by non-int of type '{}'",
            other.type_name()
        ))),
    }
}

fn is_sequence(value: &Value) -> bool {
    matches!(value, Value::Str(_) | Value::Bytes(_) | Value::Tuple(_) | Value::List(_))
}

fn sequence_op(op: BinaryOp, lhs: &Value, rhs: &Value) -> RunResult<Value> {
    match (op, lhs, rhs) {
        (BinaryOp::Add, Value::Str(a), Value::Str(b)) => Ok(Value::str(&format!("{a}{b}"))),
        (BinaryOp::Add, Value::Bytes(a), Value::Bytes(b)) => Ok(Value::bytes(&[&a[..], &b[..]].concat())),
        (BinaryOp::Add, Value::Tuple(a), Value::Tuple(b)) => Ok(Value::tuple(a.iter().chain(b.iter()).cloned().collect())),
        (BinaryOp::Add, Value::List(a), Value::List(b)) => {
            let mut items = a.borrow().clone();
            items.extend(b.borrow().iter().cloned());
            Ok(Value::list(items))
        }
        (BinaryOp::Add, Value::Str(_) | Value::Tuple(_) | Value::List(_), other) => Err(ExcType::type_error(format!(
            "can only concatenate {} (not \"{}\") to {}",
            lhs.type_name(),
            other.type_name(),
            lhs.type_name()
        ))),
        (BinaryOp::Mul, seq, count) if is_sequence(seq) && count.is_integer() => repeat(seq, count),
        (BinaryOp::Mul, count, seq) if is_sequence(seq) && count.is_integer() => repeat(seq, count),
        (BinaryOp::Mul, seq, other) | (BinaryOp::Mul, other, seq) if is_sequence(seq) => Err(ExcType::type_error(
            format!("can't multiply sequence by non-int of type '{}'", other.type_name()),
        )),
        (BinaryOp::Mod, Value::Str(_), _) => Err(ExcType::type_error("printf-style formatting is not supported")),
        _ => Err(ExcType::binary_type_error(op.symbol(), lhs.type_name(), rhs.type_name())),
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    fn int(i: i64) -> Value {
        Value::Int(i)
    }

    #[test]
    fn test_int_overflow_promotes() {
        let result = binary_op(BinaryOp::Add, &int(i64::MAX), &int(1)).unwrap();
        assert_eq!(result, Value::from_bigint(BigInt::from(i64::MAX) + 1));
        let back = binary_op(BinaryOp::Sub, &result, &int(1)).unwrap();
        assert!(matches!(back, Value::Int(i64::MAX)));
        let big = binary_op(BinaryOp::Pow, &int(2), &int(100)).unwrap();
        assert_eq!(
            big,
            Value::from_bigint(BigInt::from_str("1267650600228229401496703205376").unwrap())
        );
    }

    #[test]
    fn test_floor_semantics() {
        assert_eq!(binary_op(BinaryOp::FloorDiv, &int(-7), &int(2)).unwrap(), int(-4));
        assert_eq!(binary_op(BinaryOp::Mod, &int(-7), &int(2)).unwrap(), int(1));
        assert_eq!(binary_op(BinaryOp::Mod, &int(7), &int(-2)).unwrap(), int(-1));
        assert_eq!(
            binary_op(BinaryOp::Mod, &Value::Float(-7.5), &int(2)).unwrap(),
            Value::Float(0.5)
        );
        assert_eq!(
            binary_op(BinaryOp::FloorDiv, &Value::Float(7.0), &Value::Float(-2.0)).unwrap(),
            Value::Float(-4.0)
        );
    }

    #[test]
    fn test_division() {
        assert_eq!(binary_op(BinaryOp::TrueDiv, &int(7), &int(2)).unwrap(), Value::Float(3.5));
        let err = binary_op(BinaryOp::TrueDiv, &int(1), &int(0)).unwrap_err();
        assert_eq!(err.exc_type(), ExcType::ZeroDivisionError);
        let err = binary_op(BinaryOp::FloorDiv, &int(1), &Value::Bool(false)).unwrap_err();
        assert_eq!(err.exc_type(), ExcType::ZeroDivisionError);
    }

    #[test]
    fn test_negative_power_gives_float() {
        assert_eq!(binary_op(BinaryOp::Pow, &int(2), &int(-1)).unwrap(), Value::Float(0.5));
    }

    #[test]
    fn test_shifts() {
        assert_eq!(binary_op(BinaryOp::LShift, &int(1), &int(3)).unwrap(), int(8));
        assert_eq!(binary_op(BinaryOp::RShift, &int(-9), &int(1)).unwrap(), int(-5));
        assert_eq!(binary_op(BinaryOp::RShift, &int(-9), &int(100)).unwrap(), int(-1));
        let err = binary_op(BinaryOp::LShift, &int(1), &int(-1)).unwrap_err();
        assert_eq!(err.exc_type(), ExcType::ValueError);
        let wide = binary_op(BinaryOp::LShift, &int(1), &int(64)).unwrap();
        assert!(matches!(wide, Value::LongInt(_)));
    }

    #[test]
    fn test_huge_int_results_overflow_before_computing() {
        let err = binary_op(BinaryOp::LShift, &int(1), &int(1 << 40)).unwrap_err();
        assert_eq!(err.exc_type(), ExcType::OverflowError);
        let wide = binary_op(BinaryOp::LShift, &int(1), &int(1 << 20)).unwrap();
        assert!(matches!(wide, Value::LongInt(_)));
        let err = inplace_op(BinaryOp::LShift, &wide, &int(1 << 24)).unwrap_err();
        assert_eq!(err.exc_type(), ExcType::OverflowError);

        let err = binary_op(BinaryOp::Pow, &int(10), &int(4_000_000_000)).unwrap_err();
        assert_eq!(err.exc_type(), ExcType::OverflowError);
        let err = binary_op(BinaryOp::Pow, &int(3), &int(1 << 24)).unwrap_err();
        assert_eq!(err.exc_type(), ExcType::OverflowError);
        assert!(matches!(binary_op(BinaryOp::Pow, &int(10), &int(1000)).unwrap(), Value::LongInt(_)));
        assert_eq!(binary_op(BinaryOp::Pow, &int(-1), &int(4_000_000_001)).unwrap(), int(-1));
        assert_eq!(binary_op(BinaryOp::Pow, &int(1), &int(1 << 40)).unwrap(), int(1));

        let wider = binary_op(BinaryOp::LShift, &int(1), &int(1 << 23)).unwrap();
        assert!(binary_op(BinaryOp::Mul, &wide, &wide).is_ok());
        let err = binary_op(BinaryOp::Mul, &wider, &wider).unwrap_err();
        assert_eq!(err.exc_type(), ExcType::OverflowError);
    }

    #[test]
    fn test_bool_bitwise_stays_bool() {
        assert!(matches!(
            binary_op(BinaryOp::And, &Value::Bool(true), &Value::Bool(false)).unwrap(),
            Value::Bool(false)
        ));
        assert!(matches!(
            binary_op(BinaryOp::Add, &Value::Bool(true), &Value::Bool(true)).unwrap(),
            Value::Int(2)
        ));
    }

    #[test]
    fn test_complex() {
        let i = Value::Complex { re: 0.0, im: 1.0 };
        assert_eq!(binary_op(BinaryOp::Mul, &i, &i).unwrap(), Value::Complex { re: -1.0, im: 0.0 });
        assert_eq!(
            binary_op(BinaryOp::Add, &int(1), &i).unwrap(),
            Value::Complex { re: 1.0, im: 1.0 }
        );
    }

    #[test]
    fn test_sequences() {
        assert_eq!(binary_op(BinaryOp::Add, &Value::str("ab"), &Value::str("c")).unwrap(), Value::str("abc"));
        assert_eq!(binary_op(BinaryOp::Mul, &int(2), &Value::str("ab")).unwrap(), Value::str("abab"));
        assert_eq!(
            binary_op(BinaryOp::Mul, &Value::tuple(vec![int(1)]), &int(-3)).unwrap(),
            Value::tuple(vec![])
        );
        let err = binary_op(BinaryOp::Add, &Value::str("a"), &int(1)).unwrap_err();
        assert_eq!(
            err.arg(),
            Some("can only concatenate str (not \"int\") to str")
        );
        let err = binary_op(BinaryOp::Sub, &int(1), &Value::str("a")).unwrap_err();
        assert_eq!(err.arg(), Some("unsupported operand type(s) for -: 'int' and 'str'"));
    }

    #[test]
    fn test_inplace_list_mutates() {
        let list = Value::list(vec![int(1)]);
        let result = inplace_op(BinaryOp::Add, &list, &Value::tuple(vec![int(2)])).unwrap();
        assert!(result.is_same(&list));
        assert_eq!(list, Value::list(vec![int(1), int(2)]));

        let fresh = binary_op(BinaryOp::Add, &list, &Value::list(vec![])).unwrap();
        assert!(!fresh.is_same(&list));
    }

    #[test]
    fn test_unary() {
        assert_eq!(unary_op(UnaryOp::Negative, &int(i64::MIN)).unwrap().repr(), "9223372036854775808");
        assert_eq!(unary_op(UnaryOp::Invert, &int(5)).unwrap(), int(-6));
        assert_eq!(unary_op(UnaryOp::Not, &Value::str("")).unwrap(), Value::Bool(true));
        let err = unary_op(UnaryOp::Invert, &Value::Float(1.0)).unwrap_err();
        assert_eq!(err.arg(), Some("bad operand type for unary ~: 'float'"));
    }
}
