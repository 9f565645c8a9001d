//! Comparison, identity and membership operators.

use crate::{
    bytecode::op::CompareOp,
    exception::{ExcType, RunResult},
    value::Value,
};

/// Evaluates `lhs <op> rhs`.
pub fn compare(op: CompareOp, lhs: &Value, rhs: &Value) -> RunResult<Value> {
    let result = match op {
        CompareOp::Eq => lhs.py_eq(rhs),
        CompareOp::Ne => !lhs.py_eq(rhs),
        CompareOp::Lt | CompareOp::Le | CompareOp::Gt | CompareOp::Ge => ordered(op, lhs, rhs)?,
        CompareOp::In => contains(lhs, rhs)?,
        CompareOp::NotIn => !contains(lhs, rhs)?,
        CompareOp::Is => lhs.is_same(rhs),
        CompareOp::IsNot => !lhs.is_same(rhs),
    };
    Ok(Value::Bool(result))
}

/// `IS_OP`: identity, negated when `invert` is set.
#[must_use]
pub fn identity(lhs: &Value, rhs: &Value, invert: bool) -> Value {
    Value::Bool(lhs.is_same(rhs) != invert)
}

/// `CONTAINS_OP`: membership, negated when `invert` is set.
pub fn membership(item: &Value, container: &Value, invert: bool) -> RunResult<Value> {
    Ok(Value::Bool(contains(item, container)? != invert))
}

fn ordered(op: CompareOp, lhs: &Value, rhs: &Value) -> RunResult<bool> {
    match lhs.py_cmp(rhs) {
        Some(ordering) => Ok(match op {
            CompareOp::Lt => ordering.is_lt(),
            CompareOp::Le => ordering.is_le(),
            CompareOp::Gt => ordering.is_gt(),
            _ => ordering.is_ge(),
        }),
        // NaN is unordered with everything but still comparable
        None if lhs.as_f64().is_some() && rhs.as_f64().is_some() => Ok(false),
        None => Err(ExcType::type_error(format!(
            "'{}' not supported between instances of '{}' and '{}'",
            op.symbol(),
            lhs.type_name(),
            rhs.type_name()
        ))),
    }
}

fn contains(item: &Value, container: &Value) -> RunResult<bool> {
    item.contained_in(container).ok_or_else(|| match container {
        Value::Str(_) => ExcType::type_error(format!(
            "'in <string>' requires string as left operand, not {}",
            item.type_name()
        )),
        Value::Bytes(_) => ExcType::type_error(format!(
            "a bytes-like object is required, not '{}'",
            item.type_name()
        )),
        other => ExcType::type_error(format!("argument of type '{}' is not iterable", other.type_name())),
    })
}
