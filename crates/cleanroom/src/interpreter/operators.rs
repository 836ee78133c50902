use crate::parser::{BinaryOperator, UnaryOperator};
use crate::value::Value;
use std::cmp::Ordering;

pub(super) fn unary(operator: UnaryOperator, operand: Value) -> Result<Value, String> {
    match (operator, operand) {
        (UnaryOperator::Not, operand) => Ok(Value::Bool(!operand.is_truthy())),
        (UnaryOperator::Negate, Value::Integer(integer)) => integer
            .checked_neg()
            .map(Value::Integer)
            .ok_or_else(|| overflow("-@")),
        (UnaryOperator::Negate, Value::Float(float)) => Ok(Value::Float(-float)),
        (UnaryOperator::Negate, operand) => Err(format!(
            "undefined method '-@' for an instance of {}",
            operand.type_name()
        )),
    }
}

/// `&&` and `||` arrive here only with both operands evaluated, the interpreter
/// short-circuits them before.
pub(super) fn binary(operator: BinaryOperator, a: Value, b: Value) -> Result<Value, String> {
    use BinaryOperator::*;
    match operator {
        And => Ok(if a.is_truthy() { b } else { a }),
        Or => Ok(if a.is_truthy() { a } else { b }),
        Equal => Ok(Value::Bool(equals(&a, &b))),
        NotEqual => Ok(Value::Bool(!equals(&a, &b))),
        Less | LessOrEqual | Greater | GreaterOrEqual => {
            let ordering = compare(&a, &b).ok_or_else(|| {
                format!("comparison of {} with {} failed", a.type_name(), b.inspect())
            })?;
            Ok(Value::Bool(match operator {
                Less => ordering.is_lt(),
                LessOrEqual => ordering.is_le(),
                Greater => ordering.is_gt(),
                _ => ordering.is_ge(),
            }))
        }
        Add => add(a, b),
        Subtract => subtract(a, b),
        Multiply => multiply(a, b),
        Divide => divide(a, b),
        Remainder => remainder(a, b),
        Power => power(a, b),
    }
}

/// `1 == 1.0` holds, otherwise structural equality.
pub(super) fn equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Integer(a), Value::Float(b)) | (Value::Float(b), Value::Integer(a)) => {
            *a as f64 == *b
        }
        (a, b) => a == b,
    }
}

pub(super) fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
        (Value::Integer(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
        (Value::Float(a), Value::Integer(b)) => a.partial_cmp(&(*b as f64)),
        (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Symbol(a), Value::Symbol(b)) => Some(a.cmp(b)),
        (Value::Array(a), Value::Array(b)) => {
            for (a, b) in a.iter().zip(b) {
                match compare(a, b)? {
                    Ordering::Equal => continue,
                    ordering => return Some(ordering),
                }
            }
            Some(a.len().cmp(&b.len()))
        }
        _ => None,
    }
}

fn add(a: Value, b: Value) -> Result<Value, String> {
    match (a, b) {
        (Value::Integer(a), Value::Integer(b)) => {
            a.checked_add(b).map(Value::Integer).ok_or_else(|| overflow("+"))
        }
        (Value::String(a), Value::String(b)) => Ok(Value::String(a + &b)),
        (Value::Array(mut a), Value::Array(b)) => {
            a.extend(b);
            Ok(Value::Array(a))
        }
        (a, b) => float_operation(&a, &b, "+", |a, b| a + b),
    }
}

fn subtract(a: Value, b: Value) -> Result<Value, String> {
    match (a, b) {
        (Value::Integer(a), Value::Integer(b)) => {
            a.checked_sub(b).map(Value::Integer).ok_or_else(|| overflow("-"))
        }
        (Value::Array(a), Value::Array(b)) => Ok(Value::Array(
            a.into_iter().filter(|item| !b.contains(item)).collect(),
        )),
        (a, b) => float_operation(&a, &b, "-", |a, b| a - b),
    }
}

fn multiply(a: Value, b: Value) -> Result<Value, String> {
    match (a, b) {
        (Value::Integer(a), Value::Integer(b)) => {
            a.checked_mul(b).map(Value::Integer).ok_or_else(|| overflow("*"))
        }
        (Value::String(text), Value::Integer(times)) => {
            let times = usize::try_from(times).map_err(|_| "negative argument".to_string())?;
            Ok(Value::String(text.repeat(times)))
        }
        (Value::Array(items), Value::Integer(times)) => {
            let times = usize::try_from(times).map_err(|_| "negative argument".to_string())?;
            Ok(Value::Array(
                std::iter::repeat_n(items, times).flatten().collect(),
            ))
        }
        (a, b) => float_operation(&a, &b, "*", |a, b| a * b),
    }
}

fn divide(a: Value, b: Value) -> Result<Value, String> {
    match (a, b) {
        (Value::Integer(_), Value::Integer(0)) => Err("divided by 0".to_string()),
        (Value::Integer(a), Value::Integer(b)) => a
            .checked_div_euclid(b)
            .map(|quotient| {
                // Integer division floors towards negative infinity
                if b < 0 && a.rem_euclid(b) != 0 {
                    quotient - 1
                } else {
                    quotient
                }
            })
            .map(Value::Integer)
            .ok_or_else(|| overflow("/")),
        (a, b) => float_operation(&a, &b, "/", |a, b| a / b),
    }
}

fn remainder(a: Value, b: Value) -> Result<Value, String> {
    match (a, b) {
        (Value::Integer(_), Value::Integer(0)) => Err("divided by 0".to_string()),
        (Value::Integer(a), Value::Integer(b)) => {
            let remainder = a.checked_rem(b).ok_or_else(|| overflow("%"))?;
            // The result takes the sign of the divisor
            Ok(Value::Integer(if remainder != 0 && (remainder < 0) != (b < 0) {
                remainder + b
            } else {
                remainder
            }))
        }
        (a, b) => float_operation(&a, &b, "%", |a, b| {
            let remainder = a % b;
            if remainder != 0.0 && (remainder < 0.0) != (b < 0.0) {
                remainder + b
            } else {
                remainder
            }
        }),
    }
}

fn power(a: Value, b: Value) -> Result<Value, String> {
    match (a, b) {
        (Value::Integer(a), Value::Integer(b)) if b >= 0 => {
            let exponent = u32::try_from(b).map_err(|_| overflow("**"))?;
            a.checked_pow(exponent).map(Value::Integer).ok_or_else(|| overflow("**"))
        }
        (a, b) => float_operation(&a, &b, "**", f64::powf),
    }
}

fn float_operation(
    a: &Value,
    b: &Value,
    operator: &str,
    operation: impl Fn(f64, f64) -> f64,
) -> Result<Value, String> {
    let operand = |value: &Value| match value {
        Value::Integer(integer) => Some(*integer as f64),
        Value::Float(float) => Some(*float),
        _ => None,
    };
    match (operand(a), operand(b)) {
        (Some(x), Some(y)) => Ok(Value::Float(operation(x, y))),
        (None, _) => Err(format!(
            "undefined method '{operator}' for an instance of {}",
            a.type_name()
        )),
        (Some(_), None) => Err(format!(
            "{} can't be coerced into {}",
            b.type_name(),
            a.type_name()
        )),
    }
}

fn overflow(operator: &str) -> String {
    format!("integer overflow in '{operator}'")
}

#[cfg(test)]
mod tests {
    use super::*;
    use BinaryOperator::*;

    fn int(integer: i64) -> Value {
        Value::Integer(integer)
    }

    #[test]
    fn test_integer_division_floors() {
        assert_eq!(binary(Divide, int(7), int(2)), Ok(int(3)));
        assert_eq!(binary(Divide, int(-7), int(2)), Ok(int(-4)));
        assert_eq!(binary(Divide, int(7), int(-2)), Ok(int(-4)));
        assert_eq!(binary(Divide, int(-7), int(-2)), Ok(int(3)));
        assert_eq!(binary(Divide, int(1), int(0)), Err("divided by 0".to_string()));
    }

    #[test]
    fn test_remainder_follows_divisor_sign() {
        assert_eq!(binary(Remainder, int(-7), int(3)), Ok(int(2)));
        assert_eq!(binary(Remainder, int(7), int(-3)), Ok(int(-2)));
        assert_eq!(binary(Remainder, int(6), int(3)), Ok(int(0)));
    }

    #[test]
    fn test_overflow_is_an_error() {
        assert!(binary(Add, int(i64::MAX), int(1)).is_err());
        assert!(binary(Power, int(2), int(64)).is_err());
        assert_eq!(binary(Power, int(2), int(10)), Ok(int(1024)));
    }

    #[test]
    fn test_mixed_numbers_and_strings() {
        assert_eq!(binary(Add, int(1), Value::Float(0.5)), Ok(Value::Float(1.5)));
        assert_eq!(binary(Equal, int(1), Value::Float(1.0)), Ok(Value::Bool(true)));
        assert_eq!(
            binary(Multiply, Value::from("ab"), int(2)),
            Ok(Value::from("abab"))
        );
        assert_eq!(
            binary(Add, int(1), Value::from("x")),
            Err("String can't be coerced into Integer".to_string())
        );
        assert!(binary(Less, Value::from("a"), int(1)).is_err());
    }

    #[test]
    fn test_logical_operators_return_operands() {
        assert_eq!(binary(Or, Value::Nil, int(2)), Ok(int(2)));
        assert_eq!(binary(And, int(1), Value::Bool(false)), Ok(Value::Bool(false)));
        assert_eq!(unary(UnaryOperator::Not, Value::Nil), Ok(Value::Bool(true)));
    }
}
