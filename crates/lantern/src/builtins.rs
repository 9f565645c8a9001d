//! Native builtin functions available to debugged programs and to expressions.

use std::str::FromStr;

use num_bigint::BigInt;
use num_traits::{Signed, ToPrimitive};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::{
    bytecode::vm::binary::{BinaryOp, binary_op},
    exception::{ExcType, RunResult},
    value::Value,
};

/// A native builtin function.
///
/// The string form is the name the function is bound to in the builtins scope.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, EnumIter, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
pub enum Builtin {
    Abs,
    Bool,
    Int,
    Float,
    Str,
    Repr,
    Len,
    Min,
    Max,
    Sum,
    Tuple,
    List,
    Print,
}

impl Builtin {
    /// Whether the builtin only computes a result from its arguments.
    ///
    /// Only pure builtins may be called from guard expressions.
    #[must_use]
    pub fn is_pure(self) -> bool {
        !matches!(self, Self::Print)
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        self.into()
    }

    /// Calls the builtin with positional arguments.
    pub fn call(self, args: &[Value]) -> RunResult<Value> {
        match self {
            Self::Abs => abs(exactly_one(self, args)?),
            Self::Bool => Ok(Value::Bool(optional_one(self, args)?.is_some_and(Value::is_truthy))),
            Self::Int => int(optional_one(self, args)?),
            Self::Float => float(optional_one(self, args)?),
            Self::Str => Ok(Value::str(&optional_one(self, args)?.map_or_else(String::new, Value::py_str))),
            Self::Repr => Ok(Value::str(&exactly_one(self, args)?.repr())),
            Self::Len => len(exactly_one(self, args)?),
            Self::Min => extreme(self, args, std::cmp::Ordering::Less),
            Self::Max => extreme(self, args, std::cmp::Ordering::Greater),
            Self::Sum => sum(args),
            Self::Tuple => Ok(Value::tuple(optional_one(self, args)?.map_or_else(|| Ok(Vec::new()), iterate)?)),
            Self::List => Ok(Value::list(optional_one(self, args)?.map_or_else(|| Ok(Vec::new()), iterate)?)),
            Self::Print => {
                let line = args.iter().map(Value::py_str).collect::<Vec<_>>().join(" ");
                println!("{line}");
                Ok(Value::None)
            }
        }
    }
}

fn exactly_one(builtin: Builtin, args: &[Value]) -> RunResult<&Value> {
    match args {
        [arg] => Ok(arg),
        _ => Err(ExcType::type_error_arg_count(builtin.name(), 1, args.len())),
    }
}

fn optional_one(builtin: Builtin, args: &[Value]) -> RunResult<Option<&Value>> {
    match args {
        [] => Ok(None),
        [arg] => Ok(Some(arg)),
        _ => Err(ExcType::type_error_at_most(builtin.name(), 1, args.len())),
    }
}

/// Items produced by iterating a value.
pub(crate) fn iterate(value: &Value) -> RunResult<Vec<Value>> {
    match value {
        Value::Str(s) => Ok(s.chars().map(|c| Value::str(c.encode_utf8(&mut [0; 4]))).collect()),
        Value::Bytes(b) => Ok(b.iter().map(|byte| Value::Int(i64::from(*byte))).collect()),
        other => other
            .sequence_items()
            .ok_or_else(|| ExcType::type_error(format!("'{}' object is not iterable", other.type_name()))),
    }
}

fn abs(value: &Value) -> RunResult<Value> {
    match value {
        Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
        Value::Int(i) => Ok(i.checked_abs().map_or_else(|| Value::from_bigint(BigInt::from(*i).abs()), Value::Int)),
        Value::LongInt(i) => Ok(Value::from_bigint(i.abs())),
        Value::Float(f) => Ok(Value::Float(f.abs())),
        Value::Complex { re, im } => Ok(Value::Float(re.hypot(*im))),
        other => Err(ExcType::type_error(format!("bad operand type for abs(): '{}'", other.type_name()))),
    }
}

fn int(value: Option<&Value>) -> RunResult<Value> {
    match value {
        None => Ok(Value::Int(0)),
        Some(Value::Bool(b)) => Ok(Value::Int(i64::from(*b))),
        Some(v @ (Value::Int(_) | Value::LongInt(_))) => Ok(v.clone()),
        Some(Value::Float(f)) => {
            if f.is_nan() {
                return Err(ExcType::value_error("cannot convert float NaN to integer"));
            }
            if f.is_infinite() {
                return Err(ExcType::overflow("cannot convert float infinity to integer"));
            }
            let truncated = f.trunc();
            Ok(truncated
                .to_i64()
                .map_or_else(|| Value::from_bigint(float_to_bigint(truncated)), Value::Int))
        }
        Some(Value::Str(s)) => {
            let cleaned: String = s.trim().chars().filter(|c| *c != '_').collect();
            BigInt::from_str(&cleaned)
                .map(Value::from_bigint)
                .map_err(|_| ExcType::value_error(format!("invalid literal for int() with base 10: {}", Value::Str(s.clone()).repr())))
        }
        Some(other) => Err(ExcType::type_error(format!(
            "int() argument must be a string, a bytes-like object or a real number, not '{}'",
            other.type_name()
        ))),
    }
}

/// Converts an integral float outside the `i64` range to a big integer.
fn float_to_bigint(f: f64) -> BigInt {
    // integral floats print exactly with `{:.0}`
    BigInt::from_str(&format!("{f:.0}")).unwrap_or_default()
}

fn float(value: Option<&Value>) -> RunResult<Value> {
    match value {
        None => Ok(Value::Float(0.0)),
        Some(Value::Str(s)) => {
            let text = s.trim().to_ascii_lowercase();
            let parsed = match text.trim_start_matches(['+', '-']) {
                "inf" | "infinity" => Some(f64::INFINITY),
                "nan" => Some(f64::NAN),
                _ => None,
            };
            let parsed = match parsed {
                Some(special) if text.starts_with('-') => Some(-special),
                Some(special) => Some(special),
                None => text.parse::<f64>().ok(),
            };
            parsed
                .map(Value::Float)
                .ok_or_else(|| ExcType::value_error(format!("could not convert string to float: {}", Value::Str(s.clone()).repr())))
        }
        Some(other) => other.as_f64().map(Value::Float).ok_or_else(|| {
            if matches!(other, Value::LongInt(_)) {
                ExcType::overflow("int too large to convert to float")
            } else {
                ExcType::type_error(format!(
                    "float() argument must be a string or a real number, not '{}'",
                    other.type_name()
                ))
            }
        }),
    }
}

fn len(value: &Value) -> RunResult<Value> {
    let n = match value {
        Value::Str(s) => s.chars().count(),
        Value::Bytes(b) => b.len(),
        Value::Tuple(items) | Value::FrozenSet(items) => items.len(),
        Value::List(items) => items.borrow().len(),
        other => {
            return Err(ExcType::type_error(format!(
                "object of type '{}' has no len()",
                other.type_name()
            )));
        }
    };
    Ok(Value::Int(i64::try_from(n).unwrap_or(i64::MAX)))
}

fn extreme(builtin: Builtin, args: &[Value], keep: std::cmp::Ordering) -> RunResult<Value> {
    let items = match args {
        [] => return Err(ExcType::type_error_at_least(builtin.name(), 1, 0)),
        [single] => iterate(single)?,
        many => many.to_vec(),
    };
    let mut items = items.into_iter();
    let Some(mut best) = items.next() else {
        return Err(ExcType::value_error(format!("{}() arg is an empty sequence", builtin.name())));
    };
    for item in items {
        match item.py_cmp(&best) {
            Some(ordering) if ordering == keep => best = item,
            Some(_) => {}
            None => {
                return Err(ExcType::type_error(format!(
                    "'{}' not supported between instances of '{}' and '{}'",
                    if keep == std::cmp::Ordering::Less { "<" } else { ">" },
                    item.type_name(),
                    best.type_name()
                )));
            }
        }
    }
    Ok(best)
}

fn sum(args: &[Value]) -> RunResult<Value> {
    let (iterable, start) = match args {
        [iterable] => (iterable, Value::Int(0)),
        [iterable, start] => (iterable, start.clone()),
        _ => return Err(ExcType::type_error_at_most("sum", 2, args.len())),
    };
    if matches!(start, Value::Str(_)) {
        return Err(ExcType::type_error("sum() can't sum strings [use ''.join(seq) instead]"));
    }
    iterate(iterable)?
        .iter()
        .try_fold(start, |total, item| binary_op(BinaryOp::Add, &total, item))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_len_and_abs() {
        assert_eq!(Builtin::Len.call(&[Value::str("héllo")]).unwrap(), Value::Int(5));
        assert_eq!(Builtin::Abs.call(&[Value::Int(-3)]).unwrap(), Value::Int(3));
        assert!(Builtin::Len.call(&[Value::Int(3)]).is_err());
    }

    #[test]
    fn test_min_max() {
        let args = [Value::Int(3), Value::Float(1.5), Value::Int(2)];
        assert_eq!(Builtin::Min.call(&args).unwrap(), Value::Float(1.5));
        assert_eq!(Builtin::Max.call(&args).unwrap(), Value::Int(3));
        let err = Builtin::Max.call(&[Value::tuple(vec![])]).unwrap_err();
        assert_eq!(err.exc_type(), ExcType::ValueError);
    }

    #[test]
    fn test_int_conversions() {
        assert_eq!(Builtin::Int.call(&[Value::str(" 1_000 ")]).unwrap(), Value::Int(1000));
        assert_eq!(Builtin::Int.call(&[Value::Float(-2.7)]).unwrap(), Value::Int(-2));
        assert_eq!(
            Builtin::Int.call(&[Value::str("abc")]).unwrap_err().exc_type(),
            ExcType::ValueError
        );
    }

    #[test]
    fn test_sum_uses_numeric_tower() {
        let items = Value::tuple(vec![Value::Int(1), Value::Float(0.5)]);
        assert_eq!(Builtin::Sum.call(&[items]).unwrap(), Value::Float(1.5));
    }

    #[test]
    fn test_names() {
        assert_eq!(Builtin::Len.name(), "len");
        assert_eq!("repr".parse::<Builtin>().unwrap(), Builtin::Repr);
        assert!(!Builtin::Print.is_pure());
    }
}
