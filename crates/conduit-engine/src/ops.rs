use std::{cmp::Ordering, rc::Rc};

use crate::{
    ast::BinOp,
    value::{Number, Value},
};

/// Error raised by an operator, later turned into an exception object of
/// `class`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpError {
    pub class: &'static str,
    pub message: String,
}

impl OpError {
    pub fn new(class: &'static str, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new("Error", message)
    }
}

const fn symbol(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "+",
        BinOp::Sub => "-",
        BinOp::Mul => "*",
        BinOp::Div => "/",
        BinOp::Mod => "%",
        BinOp::Pow => "**",
        BinOp::Concat => ".",
        BinOp::Eq => "==",
        BinOp::NotEq => "!=",
        BinOp::Identical => "===",
        BinOp::NotIdentical => "!==",
        BinOp::Lt => "<",
        BinOp::Le => "<=",
        BinOp::Gt => ">",
        BinOp::Ge => ">=",
        BinOp::Spaceship => "<=>",
        BinOp::BitAnd => "&",
        BinOp::BitOr => "|",
        BinOp::BitXor => "^",
    }
}

fn operands(op: BinOp, a: &Value, b: &Value) -> Result<(Number, Number), OpError> {
    match (a.to_number(), b.to_number()) {
        (Some(x), Some(y)) => Ok((x, y)),
        _ => Err(OpError::new(
            "TypeError",
            format!(
                "Unsupported operand types: {} {} {}",
                a.type_name(),
                symbol(op),
                b.type_name()
            ),
        )),
    }
}

/// Evaluates every binary operator except `.` (which needs `__toString`).
///
/// # Errors
///
/// `TypeError` for unsupported operand types, `DivisionByZeroError` for
/// division or modulo by zero.
pub fn binary(op: BinOp, a: &Value, b: &Value) -> Result<Value, OpError> {
    match op {
        BinOp::Eq => Ok(Value::Bool(a.loose_eq(b))),
        BinOp::NotEq => Ok(Value::Bool(!a.loose_eq(b))),
        BinOp::Identical => Ok(Value::Bool(a.strict_eq(b))),
        BinOp::NotIdentical => Ok(Value::Bool(!a.strict_eq(b))),
        BinOp::Lt => Ok(Value::Bool(a.loose_cmp(b) == Some(Ordering::Less))),
        BinOp::Le => Ok(Value::Bool(matches!(
            a.loose_cmp(b),
            Some(Ordering::Less | Ordering::Equal)
        ))),
        BinOp::Gt => Ok(Value::Bool(a.loose_cmp(b) == Some(Ordering::Greater))),
        BinOp::Ge => Ok(Value::Bool(matches!(
            a.loose_cmp(b),
            Some(Ordering::Greater | Ordering::Equal)
        ))),
        BinOp::Spaceship => Ok(Value::Int(match a.loose_cmp(b) {
            Some(Ordering::Less) => -1,
            Some(Ordering::Greater) => 1,
            _ => 0,
        })),
        BinOp::Add => {
            if let (Value::Array(x), Value::Array(y)) = (a, b) {
                let mut out = (**x).clone();
                for (k, v) in y.iter() {
                    if !out.contains_key(k) {
                        out.insert(k.clone(), v.clone());
                    }
                }
                return Ok(Value::Array(Rc::new(out)));
            }
            let (x, y) = operands(op, a, b)?;
            Ok(arith(x, y, i64::checked_add, |p, q| p + q))
        }
        BinOp::Sub => {
            let (x, y) = operands(op, a, b)?;
            Ok(arith(x, y, i64::checked_sub, |p, q| p - q))
        }
        BinOp::Mul => {
            let (x, y) = operands(op, a, b)?;
            Ok(arith(x, y, i64::checked_mul, |p, q| p * q))
        }
        BinOp::Div => {
            let (x, y) = operands(op, a, b)?;
            if y.as_f64() == 0.0 {
                return Err(OpError::new("DivisionByZeroError", "Division by zero"));
            }
            if let (Number::Int(p), Number::Int(q)) = (x, y)
                && p.checked_rem(q) == Some(0)
                && let Some(r) = p.checked_div(q)
            {
                return Ok(Value::Int(r));
            }
            Ok(Value::Float(x.as_f64() / y.as_f64()))
        }
        BinOp::Mod => {
            let (x, y) = operands(op, a, b)?;
            let (p, q) = (Number::into_value(x).to_int(), Number::into_value(y).to_int());
            if q == 0 {
                return Err(OpError::new("DivisionByZeroError", "Modulo by zero"));
            }
            Ok(Value::Int(p.checked_rem(q).unwrap_or(0)))
        }
        BinOp::Pow => {
            let (x, y) = operands(op, a, b)?;
            if let (Number::Int(p), Number::Int(q)) = (x, y)
                && let Ok(exp) = u32::try_from(q)
                && let Some(r) = p.checked_pow(exp)
            {
                return Ok(Value::Int(r));
            }
            Ok(Value::Float(x.as_f64().powf(y.as_f64())))
        }
        BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor => {
            let (x, y) = operands(op, a, b)?;
            let (p, q) = (Number::into_value(x).to_int(), Number::into_value(y).to_int());
            Ok(Value::Int(match op {
                BinOp::BitAnd => p & q,
                BinOp::BitOr => p | q,
                _ => p ^ q,
            }))
        }
        BinOp::Concat => {
            let mut out = a.to_bytes_lossy().to_vec();
            out.extend_from_slice(&b.to_bytes_lossy());
            Ok(Value::string(out))
        }
    }
}

fn arith(
    x: Number,
    y: Number,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Value {
    if let (Number::Int(p), Number::Int(q)) = (x, y)
        && let Some(r) = int_op(p, q)
    {
        return Value::Int(r);
    }
    Value::Float(float_op(x.as_f64(), y.as_f64()))
}

/// `-$x`
///
/// # Errors
///
/// `TypeError` for arrays and objects.
pub fn negate(v: &Value) -> Result<Value, OpError> {
    binary(BinOp::Mul, v, &Value::Int(-1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_division_stays_integral_when_exact() {
        assert_eq!(binary(BinOp::Div, &Value::Int(4), &Value::Int(2)), Ok(Value::Int(2)));
        assert_eq!(binary(BinOp::Div, &Value::Int(1), &Value::Int(2)), Ok(Value::Float(0.5)));
    }

    #[test]
    fn overflow_promotes_to_float() {
        let r = binary(BinOp::Add, &Value::Int(i64::MAX), &Value::Int(1)).unwrap();
        assert!(matches!(r, Value::Float(_)));
    }

    #[test]
    fn division_by_zero_is_an_error() {
        let err = binary(BinOp::Div, &Value::Int(1), &Value::Int(0)).unwrap_err();
        assert_eq!(err.class, "DivisionByZeroError");
    }

    #[test]
    fn non_numeric_strings_are_rejected() {
        let err = binary(BinOp::Add, &Value::from("abc"), &Value::Int(1)).unwrap_err();
        assert_eq!(err.message, "Unsupported operand types: string + int");
        assert_eq!(
            binary(BinOp::Add, &Value::from("2"), &Value::Int(1)),
            Ok(Value::Int(3))
        );
    }
}
