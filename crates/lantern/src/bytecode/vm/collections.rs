//! Subscripting and sequence unpacking.

use crate::{
    builtins::iterate,
    exception::{ExcType, RunResult, SimpleException},
    value::Value,
};

/// Resolves a possibly negative index against `len`.
fn normalize_index(index: &Value, len: usize) -> RunResult<Option<usize>> {
    let Some(index) = index.as_i64() else {
        return Err(ExcType::index_error("cannot fit 'int' into an index-sized integer"));
    };
    let len = i64::try_from(len).unwrap_or(i64::MAX);
    let resolved = if index < 0 { index + len } else { index };
    Ok((0..len).contains(&resolved).then(|| resolved as usize))
}

fn out_of_range(type_name: &str) -> SimpleException {
    ExcType::index_error(format!("{type_name} index out of range"))
}

/// `container[index]` for integer indices.
pub fn subscript(container: &Value, index: &Value) -> RunResult<Value> {
    if !index.is_integer() {
        return Err(match container {
            Value::Str(_) => ExcType::type_error("string indices must be integers"),
            Value::Tuple(_) | Value::List(_) | Value::Bytes(_) => ExcType::type_error(format!(
                "{} indices must be integers or slices, not {}",
                if matches!(container, Value::Bytes(_)) { "byte" } else { container.type_name() },
                index.type_name()
            )),
            other => not_subscriptable(other),
        });
    }
    match container {
        Value::Tuple(items) => normalize_index(index, items.len())?
            .map(|i| items[i].clone())
            .ok_or_else(|| out_of_range("tuple")),
        Value::List(items) => {
            let items = items.borrow();
            normalize_index(index, items.len())?
                .map(|i| items[i].clone())
                .ok_or_else(|| out_of_range("list"))
        }
        Value::Str(s) => {
            let len = s.chars().count();
            normalize_index(index, len)?
                .and_then(|i| s.chars().nth(i))
                .map(|c| Value::str(c.encode_utf8(&mut [0; 4])))
                .ok_or_else(|| out_of_range("string"))
        }
        Value::Bytes(b) => normalize_index(index, b.len())?
            .map(|i| Value::Int(i64::from(b[i])))
            .ok_or_else(|| ExcType::index_error("index out of range")),
        other => Err(not_subscriptable(other)),
    }
}

fn not_subscriptable(value: &Value) -> SimpleException {
    ExcType::type_error(format!("'{}' object is not subscriptable", value.type_name()))
}

/// Unpacks exactly `count` items from an iterable value.
pub fn unpack(value: &Value, count: usize) -> RunResult<Vec<Value>> {
    let items = iterate(value)
        .map_err(|_| ExcType::type_error(format!("cannot unpack non-iterable {} object", value.type_name())))?;
    match items.len().cmp(&count) {
        std::cmp::Ordering::Equal => Ok(items),
        std::cmp::Ordering::Greater => Err(ExcType::value_error(format!(
            "too many values to unpack (expected {count})"
        ))),
        std::cmp::Ordering::Less => Err(ExcType::value_error(format!(
            "not enough values to unpack (expected {count}, got {})",
            items.len()
        ))),
    }
}
