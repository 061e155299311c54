//! Operators on builtin values.

use std::cmp::Ordering;
use std::rc::Rc;

use super::error::RuntimeError;
use super::methods;
use super::value::{format_float, Value};
use crate::host::ast::{BinOp, CmpOp, UnaryOp};

/// Method name suffix of a binary operator, as in `__add__`.
pub fn dunder_name(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "add",
        BinOp::Sub => "sub",
        BinOp::Mul => "mul",
        BinOp::Div => "truediv",
        BinOp::FloorDiv => "floordiv",
        BinOp::Mod => "mod",
        BinOp::Pow => "pow",
        BinOp::MatMul => "matmul",
        BinOp::LShift => "lshift",
        BinOp::RShift => "rshift",
        BinOp::BitOr => "or",
        BinOp::BitXor => "xor",
        BinOp::BitAnd => "and",
    }
}

fn unsupported(op: BinOp, left: &Value, right: &Value) -> RuntimeError {
    RuntimeError::type_error(format!(
        "unsupported operand type(s) for {}: '{}' and '{}'",
        op.symbol(),
        left.type_name(),
        right.type_name()
    ))
}

fn overflow() -> RuntimeError {
    RuntimeError::value_error("integer overflow")
}

fn zero_division(what: &str) -> RuntimeError {
    RuntimeError::ZeroDivision(format!("{what} by zero"))
}

pub fn binary(op: BinOp, left: &Value, right: &Value) -> Result<Value, RuntimeError> {
    match (left, right) {
        (Value::Int(_) | Value::Bool(_), Value::Int(_) | Value::Bool(_)) => {
            let (a, b) = (left.as_int().unwrap_or(0), right.as_int().unwrap_or(0));
            int_binary(op, a, b)
        }
        (Value::Int(_) | Value::Bool(_) | Value::Float(_), Value::Int(_) | Value::Bool(_) | Value::Float(_)) => {
            let (a, b) = (left.as_float().unwrap_or(0.0), right.as_float().unwrap_or(0.0));
            float_binary(op, a, b).ok_or_else(|| unsupported(op, left, right))?
        }
        (Value::Str(a), Value::Str(b)) if op == BinOp::Add => Ok(Value::from(format!("{a}{b}"))),
        (Value::Str(s), _) if op == BinOp::Mod => methods::percent_format(s, right).map(Value::from),
        (Value::Str(s), Value::Int(n)) | (Value::Int(n), Value::Str(s)) if op == BinOp::Mul => {
            Ok(Value::from(s.repeat(repeat_count(*n))))
        }
        (Value::List(a), Value::List(b)) if op == BinOp::Add => {
            let mut items = a.borrow().clone();
            items.extend(b.borrow().iter().cloned());
            Ok(Value::list(items))
        }
        (Value::List(items), Value::Int(n)) | (Value::Int(n), Value::List(items)) if op == BinOp::Mul => {
            Ok(Value::list(repeat(&items.borrow(), *n)))
        }
        (Value::Tuple(a), Value::Tuple(b)) if op == BinOp::Add => {
            Ok(Value::Tuple(a.iter().chain(b.iter()).cloned().collect()))
        }
        (Value::Tuple(items), Value::Int(n)) | (Value::Int(n), Value::Tuple(items)) if op == BinOp::Mul => {
            Ok(Value::Tuple(repeat(items, *n).into()))
        }
        (Value::Dict(a), Value::Dict(b)) if op == BinOp::BitOr => {
            let mut merged = a.borrow().clone();
            merged.extend(b.borrow().iter().map(|(k, v)| (k.clone(), v.clone())));
            Ok(Value::dict(merged))
        }
        _ => Err(unsupported(op, left, right)),
    }
}

fn repeat_count(n: i64) -> usize {
    usize::try_from(n).unwrap_or(0)
}

fn repeat(items: &[Value], n: i64) -> Vec<Value> {
    let mut out = Vec::with_capacity(items.len() * repeat_count(n));
    for _ in 0..repeat_count(n) {
        out.extend(items.iter().cloned());
    }
    out
}

#[allow(clippy::cast_precision_loss)]
fn int_binary(op: BinOp, a: i64, b: i64) -> Result<Value, RuntimeError> {
    let value = match op {
        BinOp::Add => a.checked_add(b).ok_or_else(overflow)?,
        BinOp::Sub => a.checked_sub(b).ok_or_else(overflow)?,
        BinOp::Mul => a.checked_mul(b).ok_or_else(overflow)?,
        BinOp::Div => {
            if b == 0 {
                return Err(zero_division("division"));
            }
            return Ok(Value::Float(a as f64 / b as f64));
        }
        BinOp::FloorDiv => {
            if b == 0 {
                return Err(zero_division("integer division"));
            }
            floor_div(a, b).ok_or_else(overflow)?
        }
        BinOp::Mod => {
            if b == 0 {
                return Err(zero_division("integer modulo"));
            }
            floor_mod(a, b)
        }
        BinOp::Pow => {
            if b < 0 {
                return Ok(Value::Float((a as f64).powf(b as f64)));
            }
            let exp = u32::try_from(b).map_err(|_| overflow())?;
            a.checked_pow(exp).ok_or_else(overflow)?
        }
        BinOp::LShift | BinOp::RShift => {
            let shift = u32::try_from(b).map_err(|_| RuntimeError::value_error("negative shift count"))?;
            if op == BinOp::LShift {
                a.checked_shl(shift).filter(|v| v >> shift == a).ok_or_else(overflow)?
            } else {
                a.checked_shr(shift).unwrap_or(if a < 0 { -1 } else { 0 })
            }
        }
        BinOp::BitOr => a | b,
        BinOp::BitXor => a ^ b,
        BinOp::BitAnd => a & b,
        BinOp::MatMul => return Err(unsupported(op, &Value::Int(a), &Value::Int(b))),
    };
    Ok(Value::Int(value))
}

fn floor_div(a: i64, b: i64) -> Option<i64> {
    let q = a.checked_div(b)?;
    if a.wrapping_rem(b) != 0 && ((a < 0) != (b < 0)) {
        Some(q - 1)
    } else {
        Some(q)
    }
}

/// Truncate a float to an int, rejecting values outside the int range.
pub fn float_to_int(f: f64) -> Result<i64, RuntimeError> {
    let low = i64::MIN as f64;
    let t = f.trunc();
    if t.is_nan() || t.is_infinite() {
        return Err(RuntimeError::value_error(format!("cannot convert float {} to integer", format_float(f))));
    }
    if t < low || t >= -low {
        return Err(overflow());
    }
    Ok(t as i64)
}

fn floor_mod(a: i64, b: i64) -> i64 {
    let r = a.wrapping_rem(b);
    if r != 0 && ((r < 0) != (b < 0)) {
        r + b
    } else {
        r
    }
}

fn float_binary(op: BinOp, a: f64, b: f64) -> Option<Result<Value, RuntimeError>> {
    let value = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => {
            if b == 0.0 {
                return Some(Err(zero_division("float division")));
            }
            a / b
        }
        BinOp::FloorDiv => {
            if b == 0.0 {
                return Some(Err(zero_division("float floor division")));
            }
            (a / b).floor()
        }
        BinOp::Mod => {
            if b == 0.0 {
                return Some(Err(zero_division("float modulo")));
            }
            let r = a % b;
            if r != 0.0 && ((r < 0.0) != (b < 0.0)) {
                r + b
            } else {
                r
            }
        }
        BinOp::Pow => a.powf(b),
        _ => return None,
    };
    Some(Ok(Value::Float(value)))
}

pub fn unary(op: UnaryOp, value: &Value) -> Result<Value, RuntimeError> {
    match (op, value) {
        (UnaryOp::Not, v) => Ok(Value::Bool(!v.truthy())),
        (UnaryOp::Neg, Value::Int(_) | Value::Bool(_)) => {
            let i = value.as_int().unwrap_or(0);
            i.checked_neg().map(Value::Int).ok_or_else(overflow)
        }
        (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
        (UnaryOp::Pos, Value::Int(_) | Value::Bool(_)) => Ok(Value::Int(value.as_int().unwrap_or(0))),
        (UnaryOp::Pos, Value::Float(f)) => Ok(Value::Float(*f)),
        (UnaryOp::Invert, Value::Int(_) | Value::Bool(_)) => Ok(Value::Int(!value.as_int().unwrap_or(0))),
        (op, v) => {
            let symbol = match op {
                UnaryOp::Neg => "unary -",
                UnaryOp::Pos => "unary +",
                UnaryOp::Invert => "unary ~",
                UnaryOp::Not => "not",
            };
            Err(RuntimeError::type_error(format!("bad operand type for {symbol}: '{}'", v.type_name())))
        }
    }
}

/// Ordering of two values. `None` for unordered floats (NaN).
pub fn order(left: &Value, right: &Value) -> Result<Option<Ordering>, RuntimeError> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => Ok(Some(a.cmp(b))),
        (Value::Int(_) | Value::Bool(_) | Value::Float(_), Value::Int(_) | Value::Bool(_) | Value::Float(_)) => {
            Ok(left.as_float().unwrap_or(0.0).partial_cmp(&right.as_float().unwrap_or(0.0)))
        }
        (Value::Str(a), Value::Str(b)) => Ok(Some(a.cmp(b))),
        (Value::List(a), Value::List(b)) => order_seq(&a.borrow(), &b.borrow()),
        (Value::Tuple(a), Value::Tuple(b)) => order_seq(a, b),
        _ => Err(RuntimeError::type_error(format!(
            "'<' not supported between instances of '{}' and '{}'",
            left.type_name(),
            right.type_name()
        ))),
    }
}

fn order_seq(a: &[Value], b: &[Value]) -> Result<Option<Ordering>, RuntimeError> {
    for (x, y) in a.iter().zip(b) {
        if x.equals(y) {
            continue;
        }
        return order(x, y);
    }
    Ok(Some(a.len().cmp(&b.len())))
}

pub fn compare(op: CmpOp, left: &Value, right: &Value) -> Result<bool, RuntimeError> {
    let Some(ordering) = order(left, right)? else {
        return Ok(false);
    };
    Ok(match op {
        CmpOp::Lt => ordering == Ordering::Less,
        CmpOp::LtE => ordering != Ordering::Greater,
        CmpOp::Gt => ordering == Ordering::Greater,
        CmpOp::GtE => ordering != Ordering::Less,
        _ => false,
    })
}

/// Normalize a (possibly negative) index into a sequence of `len` items.
pub fn index(len: usize, index: &Value, what: &str) -> Result<usize, RuntimeError> {
    let Some(i) = index.as_int() else {
        return Err(RuntimeError::type_error(format!(
            "{what} indices must be integers, not '{}'",
            index.type_name()
        )));
    };
    let len = i64::try_from(len).unwrap_or(i64::MAX);
    let normalized = if i < 0 { i + len } else { i };
    if normalized < 0 || normalized >= len {
        return Err(RuntimeError::Index(format!("{what} index out of range")));
    }
    usize::try_from(normalized).map_err(|_| RuntimeError::Index(format!("{what} index out of range")))
}

/// Positions selected by a slice, following the usual clamping rules.
pub fn slice_indices(len: usize, lower: Option<i64>, upper: Option<i64>, step: Option<i64>) -> Result<Vec<usize>, RuntimeError> {
    let step = step.unwrap_or(1);
    if step == 0 {
        return Err(RuntimeError::value_error("slice step cannot be zero"));
    }
    let len = i64::try_from(len).unwrap_or(i64::MAX);
    let normalize = |i: i64| if i < 0 { i + len } else { i };
    let mut out = Vec::new();
    if step > 0 {
        let start = lower.map_or(0, |i| normalize(i).clamp(0, len));
        let stop = upper.map_or(len, |i| normalize(i).clamp(0, len));
        let mut i = start;
        while i < stop {
            out.extend(usize::try_from(i).ok());
            i += step;
        }
    } else {
        let start = lower.map_or(len - 1, |i| normalize(i).clamp(-1, len - 1));
        let stop = upper.map_or(-1, |i| normalize(i).clamp(-1, len - 1));
        let mut i = start;
        while i > stop {
            out.extend(usize::try_from(i).ok());
            i += step;
        }
    }
    Ok(out)
}

pub fn slice(value: &Value, lower: Option<i64>, upper: Option<i64>, step: Option<i64>) -> Result<Value, RuntimeError> {
    match value {
        Value::List(items) => {
            let items = items.borrow();
            let picked = slice_indices(items.len(), lower, upper, step)?;
            Ok(Value::list(picked.into_iter().filter_map(|i| items.get(i).cloned()).collect()))
        }
        Value::Tuple(items) => {
            let picked = slice_indices(items.len(), lower, upper, step)?;
            Ok(Value::Tuple(picked.into_iter().filter_map(|i| items.get(i).cloned()).collect::<Vec<_>>().into()))
        }
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let picked = slice_indices(chars.len(), lower, upper, step)?;
            Ok(Value::from(picked.into_iter().filter_map(|i| chars.get(i)).collect::<String>()))
        }
        other => Err(RuntimeError::type_error(format!("'{}' object is not subscriptable", other.type_name()))),
    }
}

/// Sort values in place, propagating the first comparison failure.
pub fn sort(items: &mut [(Value, Value)], reverse: bool) -> Result<(), RuntimeError> {
    let mut failure = None;
    items.sort_by(|(a, _), (b, _)| match order(a, b) {
        Ok(ordering) => {
            let ordering = ordering.unwrap_or(Ordering::Equal);
            if reverse { ordering.reverse() } else { ordering }
        }
        Err(err) => {
            if failure.is_none() {
                failure = Some(err);
            }
            Ordering::Equal
        }
    });
    failure.map_or(Ok(()), Err)
}

pub fn tuple(items: Vec<Value>) -> Value {
    Value::Tuple(Rc::from(items))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn floor_semantics_follow_the_divisor_sign() {
        assert_eq!(binary(BinOp::FloorDiv, &Value::Int(-7), &Value::Int(2)).unwrap(), Value::Int(-4));
        assert_eq!(binary(BinOp::Mod, &Value::Int(-7), &Value::Int(2)).unwrap(), Value::Int(1));
        assert_eq!(binary(BinOp::Mod, &Value::Int(7), &Value::Int(-2)).unwrap(), Value::Int(-1));
    }

    #[test]
    fn division_by_zero() {
        let err = binary(BinOp::Div, &Value::Int(1), &Value::Int(0)).unwrap_err();
        assert_eq!(err.report(), "ZeroDivisionError: division by zero");
    }

    #[test]
    fn mixed_operands() {
        assert_eq!(binary(BinOp::Add, &Value::Int(1), &Value::Float(0.5)).unwrap(), Value::Float(1.5));
        assert_eq!(binary(BinOp::Mul, &Value::str("ab"), &Value::Int(2)).unwrap(), Value::str("abab"));
        let err = binary(BinOp::Add, &Value::str("a"), &Value::Int(1)).unwrap_err();
        assert_eq!(err.to_string(), "unsupported operand type(s) for +: 'str' and 'int'");
    }

    #[test]
    fn overflow_is_an_error() {
        assert!(binary(BinOp::Mul, &Value::Int(i64::MAX), &Value::Int(2)).is_err());
        let err = binary(BinOp::FloorDiv, &Value::Int(i64::MIN), &Value::Int(-1)).unwrap_err();
        assert_eq!(err.to_string(), "integer overflow");
        assert_eq!(binary(BinOp::Mod, &Value::Int(i64::MIN), &Value::Int(-1)).unwrap(), Value::Int(0));
        assert_eq!(binary(BinOp::Pow, &Value::Int(2), &Value::Int(10)).unwrap(), Value::Int(1024));
    }

    #[test]
    fn float_truncation_checks_the_range() {
        assert_eq!(float_to_int(-2.7).unwrap(), -2);
        assert_eq!(float_to_int(-9_223_372_036_854_775_808.0).unwrap(), i64::MIN);
        assert_eq!(float_to_int(1e300).unwrap_err().to_string(), "integer overflow");
        assert_eq!(float_to_int(9_223_372_036_854_775_808.0).unwrap_err().to_string(), "integer overflow");
        assert_eq!(float_to_int(f64::NAN).unwrap_err().to_string(), "cannot convert float nan to integer");
    }

    #[test]
    fn slices() {
        assert_eq!(slice_indices(5, None, None, Some(-2)).unwrap(), vec![4, 2, 0]);
        assert_eq!(slice_indices(5, Some(-2), None, None).unwrap(), vec![3, 4]);
        assert_eq!(slice_indices(5, Some(10), Some(20), None).unwrap(), Vec::<usize>::new());
        assert!(slice_indices(5, None, None, Some(0)).is_err());
    }

    #[test]
    fn ordering() {
        assert!(compare(CmpOp::Lt, &Value::Int(1), &Value::Float(1.5)).unwrap());
        assert!(!compare(CmpOp::Lt, &Value::Float(f64::NAN), &Value::Int(1)).unwrap());
        let a = tuple(vec![Value::Int(1), Value::str("b")]);
        let b = tuple(vec![Value::Int(1), Value::str("c")]);
        assert!(compare(CmpOp::Lt, &a, &b).unwrap());
        assert!(compare(CmpOp::Lt, &Value::str("a"), &Value::Int(1)).is_err());
    }
}
