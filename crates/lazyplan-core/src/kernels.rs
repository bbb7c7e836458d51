//! Scalar kernels: the value-level semantics of `Expr` operations.
//!
//! The evaluator applies these per row; the simplifier applies them to
//! literal operands. Result types always agree with `expr::binary_type`.

use std::cmp::Ordering;

use crate::error::{Error, Result};
use crate::expr::{BinaryOp, Function, UnaryOp};
use crate::schema::DataType;
use crate::types::Scalar;

fn compute_err(msg: impl Into<String>) -> Error {
    Error::Compute(msg.into())
}

/// Apply a binary operator. Null operands propagate, except for Kleene logic.
pub fn binary(op: BinaryOp, l: &Scalar, r: &Scalar) -> Result<Scalar> {
    match op {
        BinaryOp::And => return Ok(kleene_and(l, r)),
        BinaryOp::Or => return Ok(kleene_or(l, r)),
        _ => {}
    }
    if l.is_null() || r.is_null() {
        return Ok(Scalar::Null);
    }
    if op.is_comparison() {
        return compare(op, l, r);
    }
    if let (BinaryOp::Add, Scalar::Str(a), Scalar::Str(b)) = (op, l, r) {
        return Ok(Scalar::Str(format!("{a}{b}")));
    }
    arithmetic(op, l, r)
}

fn kleene_and(l: &Scalar, r: &Scalar) -> Scalar {
    match (l.as_bool(), r.as_bool()) {
        (Some(false), _) | (_, Some(false)) => Scalar::Bool(false),
        (Some(true), Some(true)) => Scalar::Bool(true),
        _ => Scalar::Null,
    }
}

fn kleene_or(l: &Scalar, r: &Scalar) -> Scalar {
    match (l.as_bool(), r.as_bool()) {
        (Some(true), _) | (_, Some(true)) => Scalar::Bool(true),
        (Some(false), Some(false)) => Scalar::Bool(false),
        _ => Scalar::Null,
    }
}

fn compare(op: BinaryOp, l: &Scalar, r: &Scalar) -> Result<Scalar> {
    let ord = match (l, r) {
        (Scalar::Bool(a), Scalar::Bool(b)) => Some(a.cmp(b)),
        (Scalar::Str(a), Scalar::Str(b)) => Some(a.cmp(b)),
        (Scalar::Bin(a), Scalar::Bin(b)) => Some(a.cmp(b)),
        (a, b) => match (a.as_i64(), b.as_i64()) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => match (a.as_f64(), b.as_f64()) {
                // NaN compares unordered: every comparison but `!=` is false.
                (Some(x), Some(y)) => x.partial_cmp(&y),
                _ => {
                    return Err(compute_err(format!(
                        "cannot compare {} with {}",
                        a.data_type(),
                        b.data_type()
                    )))
                }
            },
        },
    };
    let result = match ord {
        None => matches!(op, BinaryOp::NotEq),
        Some(ord) => match op {
            BinaryOp::Eq => ord == Ordering::Equal,
            BinaryOp::NotEq => ord != Ordering::Equal,
            BinaryOp::Lt => ord == Ordering::Less,
            BinaryOp::LtEq => ord != Ordering::Greater,
            BinaryOp::Gt => ord == Ordering::Greater,
            BinaryOp::GtEq => ord != Ordering::Less,
            _ => return Err(compute_err(format!("{op:?} is not a comparison"))),
        },
    };
    Ok(Scalar::Bool(result))
}

fn arithmetic(op: BinaryOp, l: &Scalar, r: &Scalar) -> Result<Scalar> {
    let (lt, rt) = (l.data_type(), r.data_type());
    let target = DataType::promote_numeric(lt, rt).ok_or_else(|| {
        compute_err(format!("cannot apply '{}' to {lt} and {rt}", op.symbol()))
    })?;

    if op == BinaryOp::Div && lt.is_integer() && rt.is_integer() {
        let (a, b) = (int_operand(l)?, int_operand(r)?);
        if b == 0 {
            return Ok(Scalar::Null);
        }
        return Ok(Scalar::F64(a as f64 / b as f64));
    }

    match target {
        DataType::Int32 => {
            let (a, b) = (int_operand(l)?, int_operand(r)?);
            Ok(checked_i64(op, a, b)?
                .map(|v| i32::try_from(v).map(Scalar::I32))
                .transpose()
                .map_err(|_| compute_err(format!("Int32 overflow in '{}'", op.symbol())))?
                .unwrap_or(Scalar::Null))
        }
        DataType::Int64 => {
            let (a, b) = (int_operand(l)?, int_operand(r)?);
            Ok(checked_i64(op, a, b)?
                .map(Scalar::I64)
                .unwrap_or(Scalar::Null))
        }
        DataType::Float32 => {
            let (a, b) = (float_operand(l)? as f32, float_operand(r)? as f32);
            Ok(Scalar::F32(float_op(op, a as f64, b as f64) as f32))
        }
        _ => {
            let (a, b) = (float_operand(l)?, float_operand(r)?);
            Ok(Scalar::F64(float_op(op, a, b)))
        }
    }
}

fn int_operand(v: &Scalar) -> Result<i64> {
    v.as_i64()
        .ok_or_else(|| compute_err(format!("expected integer, got {}", v.data_type())))
}

fn float_operand(v: &Scalar) -> Result<f64> {
    v.as_f64()
        .ok_or_else(|| compute_err(format!("expected number, got {}", v.data_type())))
}

/// `Ok(None)` is a null result (remainder by zero).
fn checked_i64(op: BinaryOp, a: i64, b: i64) -> Result<Option<i64>> {
    let v = match op {
        BinaryOp::Add => a.checked_add(b),
        BinaryOp::Sub => a.checked_sub(b),
        BinaryOp::Mul => a.checked_mul(b),
        BinaryOp::Rem => {
            if b == 0 {
                return Ok(None);
            }
            a.checked_rem(b)
        }
        _ => return Err(compute_err(format!("{op:?} is not integer arithmetic"))),
    };
    v.map(Some)
        .ok_or_else(|| compute_err(format!("integer overflow in '{}'", op.symbol())))
}

fn float_op(op: BinaryOp, a: f64, b: f64) -> f64 {
    match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
        _ => a % b,
    }
}

pub fn unary(op: UnaryOp, v: &Scalar) -> Result<Scalar> {
    match op {
        UnaryOp::IsNull => Ok(Scalar::Bool(v.is_null())),
        UnaryOp::IsNotNull => Ok(Scalar::Bool(!v.is_null())),
        UnaryOp::Not => match v {
            Scalar::Null => Ok(Scalar::Null),
            Scalar::Bool(b) => Ok(Scalar::Bool(!b)),
            other => Err(compute_err(format!("cannot negate {}", other.data_type()))),
        },
        UnaryOp::Neg => match v {
            Scalar::Null => Ok(Scalar::Null),
            Scalar::I32(x) => x
                .checked_neg()
                .map(Scalar::I32)
                .ok_or_else(|| compute_err("Int32 overflow in negation")),
            Scalar::I64(x) => x
                .checked_neg()
                .map(Scalar::I64)
                .ok_or_else(|| compute_err("Int64 overflow in negation")),
            Scalar::F32(x) => Ok(Scalar::F32(-x)),
            Scalar::F64(x) => Ok(Scalar::F64(-x)),
            other => Err(compute_err(format!("cannot negate {}", other.data_type()))),
        },
    }
}

pub fn function(func: Function, args: &[Scalar]) -> Result<Scalar> {
    if func == Function::Coalesce {
        return Ok(args
            .iter()
            .find(|a| !a.is_null())
            .cloned()
            .unwrap_or(Scalar::Null));
    }
    if args.iter().any(Scalar::is_null) {
        return Ok(Scalar::Null);
    }
    let text = |i: usize| text_arg(func, args, i);
    match func {
        Function::Contains => Ok(Scalar::Bool(text(0)?.contains(text(1)?))),
        Function::StartsWith => Ok(Scalar::Bool(text(0)?.starts_with(text(1)?))),
        Function::EndsWith => Ok(Scalar::Bool(text(0)?.ends_with(text(1)?))),
        Function::Lowercase => Ok(Scalar::Str(text(0)?.to_lowercase())),
        Function::Uppercase => Ok(Scalar::Str(text(0)?.to_uppercase())),
        Function::StrLen => Ok(Scalar::I64(text(0)?.chars().count() as i64)),
        Function::Abs => match args.first() {
            Some(Scalar::I32(x)) => x
                .checked_abs()
                .map(Scalar::I32)
                .ok_or_else(|| compute_err("Int32 overflow in abs")),
            Some(Scalar::I64(x)) => x
                .checked_abs()
                .map(Scalar::I64)
                .ok_or_else(|| compute_err("Int64 overflow in abs")),
            Some(Scalar::F32(x)) => Ok(Scalar::F32(x.abs())),
            Some(Scalar::F64(x)) => Ok(Scalar::F64(x.abs())),
            _ => Err(compute_err("abs expects a numeric argument")),
        },
        Function::Coalesce => Ok(Scalar::Null),
    }
}

fn text_arg(func: Function, args: &[Scalar], i: usize) -> Result<&str> {
    args.get(i)
        .and_then(Scalar::as_str)
        .ok_or_else(|| compute_err(format!("{} expects a string argument at {i}", func.name())))
}

/// Convert `v` to `to`. Out-of-range numbers and unparsable strings are errors.
pub fn cast(v: &Scalar, to: DataType) -> Result<Scalar> {
    if v.is_null() || v.data_type() == to {
        return Ok(v.clone());
    }
    let fail = || compute_err(format!("cannot cast {v} ({}) to {to}", v.data_type()));
    match to {
        DataType::Null => Ok(Scalar::Null),
        DataType::Utf8 => Ok(Scalar::Str(render_plain(v))),
        DataType::Binary => match v {
            Scalar::Str(s) => Ok(Scalar::Bin(s.as_bytes().to_vec())),
            _ => Err(fail()),
        },
        DataType::Boolean => match v {
            Scalar::Str(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Ok(Scalar::Bool(true)),
                "false" => Ok(Scalar::Bool(false)),
                _ => Err(fail()),
            },
            _ => Err(fail()),
        },
        DataType::Int32 | DataType::Int64 => {
            let wide: i64 = match v {
                Scalar::Bool(b) => *b as i64,
                Scalar::I32(x) => *x as i64,
                Scalar::I64(x) => *x,
                Scalar::F32(_) | Scalar::F64(_) => {
                    let f = v.as_f64().ok_or_else(fail)?;
                    if !f.is_finite() || f < i64::MIN as f64 || f > i64::MAX as f64 {
                        return Err(fail());
                    }
                    f.trunc() as i64
                }
                Scalar::Str(s) => s.trim().parse::<i64>().map_err(|_| fail())?,
                _ => return Err(fail()),
            };
            if to == DataType::Int32 {
                i32::try_from(wide).map(Scalar::I32).map_err(|_| fail())
            } else {
                Ok(Scalar::I64(wide))
            }
        }
        DataType::Float32 | DataType::Float64 => {
            let f: f64 = match v {
                Scalar::Bool(b) => *b as i64 as f64,
                Scalar::Str(s) => s.trim().parse::<f64>().map_err(|_| fail())?,
                other => other.as_f64().ok_or_else(fail)?,
            };
            if to == DataType::Float32 {
                Ok(Scalar::F32(f as f32))
            } else {
                Ok(Scalar::F64(f))
            }
        }
    }
}

fn render_plain(v: &Scalar) -> String {
    match v {
        Scalar::Str(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Truthiness of a predicate result: only `true` keeps a row.
pub fn is_true(v: &Scalar) -> bool {
    matches!(v, Scalar::Bool(true))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_division_is_float_and_null_on_zero() {
        assert_eq!(
            binary(BinaryOp::Div, &Scalar::I64(7), &Scalar::I64(2)).unwrap(),
            Scalar::F64(3.5)
        );
        assert_eq!(
            binary(BinaryOp::Div, &Scalar::I64(7), &Scalar::I64(0)).unwrap(),
            Scalar::Null
        );
        assert_eq!(
            binary(BinaryOp::Rem, &Scalar::I32(7), &Scalar::I32(0)).unwrap(),
            Scalar::Null
        );
    }

    #[test]
    fn overflow_is_an_error() {
        let err = binary(BinaryOp::Add, &Scalar::I32(i32::MAX), &Scalar::I32(1)).unwrap_err();
        assert!(matches!(err, Error::Compute(_)));
        assert!(binary(BinaryOp::Mul, &Scalar::I64(i64::MAX), &Scalar::I64(2)).is_err());
    }

    #[test]
    fn kleene_logic() {
        let t = Scalar::Bool(true);
        let f = Scalar::Bool(false);
        let n = Scalar::Null;
        assert_eq!(binary(BinaryOp::And, &n, &f).unwrap(), f);
        assert_eq!(binary(BinaryOp::And, &n, &t).unwrap(), n);
        assert_eq!(binary(BinaryOp::Or, &n, &t).unwrap(), t);
        assert_eq!(binary(BinaryOp::Or, &n, &f).unwrap(), n);
    }

    #[test]
    fn comparisons_cross_numeric_widths() {
        assert_eq!(
            binary(BinaryOp::Lt, &Scalar::I32(1), &Scalar::F64(1.5)).unwrap(),
            Scalar::Bool(true)
        );
        assert_eq!(
            binary(BinaryOp::Eq, &Scalar::I32(3), &Scalar::I64(3)).unwrap(),
            Scalar::Bool(true)
        );
        assert_eq!(
            binary(BinaryOp::Eq, &Scalar::Null, &Scalar::I64(3)).unwrap(),
            Scalar::Null
        );
        assert!(binary(BinaryOp::Lt, &Scalar::Str("a".into()), &Scalar::I64(3)).is_err());
    }

    #[test]
    fn casts() {
        assert_eq!(
            cast(&Scalar::Str(" 42 ".into()), DataType::Int32).unwrap(),
            Scalar::I32(42)
        );
        assert!(cast(&Scalar::Str("x".into()), DataType::Int64).is_err());
        assert!(cast(&Scalar::I64(1 << 40), DataType::Int32).is_err());
        assert_eq!(
            cast(&Scalar::F64(2.9), DataType::Int64).unwrap(),
            Scalar::I64(2)
        );
        assert_eq!(
            cast(&Scalar::I64(5), DataType::Utf8).unwrap(),
            Scalar::Str("5".into())
        );
    }

    #[test]
    fn string_functions() {
        let s = Scalar::Str("Hello".into());
        assert_eq!(
            function(Function::StartsWith, &[s.clone(), Scalar::Str("He".into())]).unwrap(),
            Scalar::Bool(true)
        );
        assert_eq!(
            function(Function::Lowercase, &[s.clone()]).unwrap(),
            Scalar::Str("hello".into())
        );
        assert_eq!(function(Function::StrLen, &[s]).unwrap(), Scalar::I64(5));
        assert_eq!(
            function(Function::Coalesce, &[Scalar::Null, Scalar::I64(1)]).unwrap(),
            Scalar::I64(1)
        );
    }
}
