//! The dynamically-typed value that lives on the operand stack, in
//! registers, and in the heap.
//!
//! LogoVM bytecode intermixes integers, floats and strings on a single
//! stack, so every slot has to carry its own type tag at runtime. Each
//! opcode enforces whatever tag discipline it needs and reports a
//! [`RuntimeError::TypeMismatch`] otherwise.

use std::cmp::Ordering;
use std::fmt;

use crate::error::RuntimeError;

/// A stack/register/heap cell.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Str(String),
}

impl Value {
    /// Name of this value's tag, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_))
    }

    /// Widen to `f64`. Panics are not possible: callers must check
    /// [`Value::is_numeric`] (or use [`Value::as_numbers`]) first.
    fn as_f64(&self) -> f64 {
        match self {
            Value::Int(i) => *i as f64,
            Value::Float(f) => *f,
            Value::Str(_) => unreachable!("as_f64 called on a string Value"),
        }
    }

    /// Widen a known-numeric `Value` (e.g. the result of
    /// [`Value::to_float`]) to `f64` without a `Result` round-trip.
    pub fn as_f64_unchecked(&self) -> f64 {
        self.as_f64()
    }

    pub fn as_int(&self) -> Result<i64, RuntimeError> {
        match self {
            Value::Int(i) => Ok(*i),
            Value::Float(f) => Ok(*f as i64),
            Value::Str(s) => Err(RuntimeError::TypeMismatch(format!(
                "expected a number, found string {s:?}"
            ))),
        }
    }

    pub fn as_str(&self) -> Result<&str, RuntimeError> {
        match self {
            Value::Str(s) => Ok(s),
            other => Err(RuntimeError::TypeMismatch(format!(
                "expected a string, found {}",
                other.type_name()
            ))),
        }
    }

    /// Coerce `self` to an `int`: floats truncate, strings parse (or
    /// fall back to `0` for an unparseable string, matching Python's
    /// permissive `int(str)` only when the string is itself numeric;
    /// non-numeric strings are a type error).
    pub fn to_int(&self) -> Result<Value, RuntimeError> {
        match self {
            Value::Int(i) => Ok(Value::Int(*i)),
            Value::Float(f) => Ok(Value::Int(*f as i64)),
            Value::Str(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|_| RuntimeError::TypeMismatch(format!("cannot convert {s:?} to int"))),
        }
    }

    pub fn to_float(&self) -> Result<Value, RuntimeError> {
        match self {
            Value::Int(i) => Ok(Value::Float(*i as f64)),
            Value::Float(f) => Ok(Value::Float(*f)),
            Value::Str(s) => s
                .trim()
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| RuntimeError::TypeMismatch(format!("cannot convert {s:?} to float"))),
        }
    }

    pub fn to_str_value(&self) -> Value {
        Value::Str(self.to_string())
    }

    /// Pop-pair helper: given `(lhs, rhs)`, widen both to a common
    /// numeric representation, promoting to float if either operand is
    /// one.
    pub fn as_numbers(lhs: &Value, rhs: &Value) -> Result<(Numbers, Numbers), RuntimeError> {
        if !lhs.is_numeric() || !rhs.is_numeric() {
            return Err(RuntimeError::TypeMismatch(format!(
                "expected two numbers, found {} and {}",
                lhs.type_name(),
                rhs.type_name()
            )));
        }
        let promote_float = matches!(lhs, Value::Float(_)) || matches!(rhs, Value::Float(_));
        if promote_float {
            Ok((Numbers::Float(lhs.as_f64()), Numbers::Float(rhs.as_f64())))
        } else {
            Ok((
                Numbers::Int(lhs.as_int().expect("checked numeric")),
                Numbers::Int(rhs.as_int().expect("checked numeric")),
            ))
        }
    }

    pub fn as_int_strict(&self) -> Result<i64, RuntimeError> {
        match self {
            Value::Int(i) => Ok(*i),
            other => Err(RuntimeError::TypeMismatch(format!(
                "expected an integer, found {}",
                other.type_name()
            ))),
        }
    }

    /// Natural order comparison used by `CMP`. Numerics compare by
    /// value (after widening), strings compare lexicographically by
    /// code point; mixing the two families is a type error.
    pub fn compare(&self, other: &Value) -> Result<Ordering, RuntimeError> {
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
            (a, b) if a.is_numeric() && b.is_numeric() => {
                let (a, b) = Value::as_numbers(a, b)?;
                Ok(a.partial_cmp(&b).expect("non-NaN comparison"))
            }
            _ => Err(RuntimeError::TypeMismatch(format!(
                "cannot compare {} with {}",
                self.type_name(),
                other.type_name()
            ))),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{}", format_float(*v)),
            Value::Str(s) => write!(f, "{s}"),
        }
    }
}

/// Rust's `Display` for `f64` omits the trailing `.0` on whole numbers
/// (`1.0.to_string() == "1"`), but the bytecode's textual output
/// contract always shows a decimal point, matching the Python-derived
/// `str(float)` behavior the original programs' expected output
/// assumes. Append `.0` when the default rendering didn't include a
/// decimal point itself (covers whole numbers; `NaN`/`inf` are left
/// alone).
fn format_float(v: f64) -> String {
    let s = v.to_string();
    if s.contains('.') || s.contains("inf") || s.contains("NaN") {
        s
    } else {
        format!("{s}.0")
    }
}

/// A pair of operands already widened to a common numeric representation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Numbers {
    Int(i64),
    Float(f64),
}

impl Numbers {
    fn as_f64(self) -> f64 {
        match self {
            Numbers::Int(i) => i as f64,
            Numbers::Float(f) => f,
        }
    }

    fn partial_cmp(&self, other: &Numbers) -> Option<Ordering> {
        match (self, other) {
            (Numbers::Int(a), Numbers::Int(b)) => Some(a.cmp(b)),
            _ => self.as_f64().partial_cmp(&other.as_f64()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_textual_form() {
        assert_eq!(Value::Int(42).to_string(), "42");
        assert_eq!(Value::Float(1.5).to_string(), "1.5");
        assert_eq!(Value::Str("hi".into()).to_string(), "hi");
    }

    #[test]
    fn compare_numeric_promotes_to_float() {
        assert_eq!(
            Value::Int(2).compare(&Value::Float(2.0)).unwrap(),
            Ordering::Equal
        );
        assert_eq!(
            Value::Int(1).compare(&Value::Int(2)).unwrap(),
            Ordering::Less
        );
    }

    #[test]
    fn compare_mixed_numeric_and_string_is_type_mismatch() {
        assert!(Value::Int(1).compare(&Value::Str("x".into())).is_err());
    }

    #[test]
    fn to_int_truncates_float() {
        assert_eq!(Value::Float(3.9).to_int().unwrap(), Value::Int(3));
    }
}
