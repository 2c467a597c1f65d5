use std::{cell::RefCell, cmp::Ordering, rc::Rc};

use bytes::Bytes;

use crate::{
    array::ArrayData,
    object::ObjRef,
};

/// Shared storage cell. Variables, properties and by-reference bindings all
/// point at one of these; binding by reference means sharing the `Rc`.
pub type Slot = Rc<RefCell<Value>>;

#[must_use]
pub fn new_slot(value: Value) -> Slot {
    Rc::new(RefCell::new(value))
}

#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Bytes),
    Array(Rc<ArrayData>),
    Object(ObjRef),
}

/// Result of numeric coercion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    #[must_use]
    pub const fn into_value(self) -> Value {
        match self {
            Self::Int(i) => Value::Int(i),
            Self::Float(f) => Value::Float(f),
        }
    }

    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub const fn as_f64(self) -> f64 {
        match self {
            Self::Int(i) => i as f64,
            Self::Float(f) => f,
        }
    }
}

impl Value {
    pub fn string(s: impl Into<Bytes>) -> Self {
        Self::Str(s.into())
    }

    #[must_use]
    pub fn array(data: ArrayData) -> Self {
        Self::Array(Rc::new(data))
    }

    #[must_use]
    pub fn empty_array() -> Self {
        Self::array(ArrayData::new())
    }

    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Name used in diagnostics (`int`, `string`, class names for objects).
    #[must_use]
    pub fn type_name(&self) -> String {
        match self {
            Self::Null => "null".into(),
            Self::Bool(_) => "bool".into(),
            Self::Int(_) => "int".into(),
            Self::Float(_) => "float".into(),
            Self::Str(_) => "string".into(),
            Self::Array(_) => "array".into(),
            Self::Object(o) => o.class().name().to_string(),
        }
    }

    /// Name returned by `gettype()`.
    #[must_use]
    pub const fn gettype(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Bool(_) => "boolean",
            Self::Int(_) => "integer",
            Self::Float(_) => "double",
            Self::Str(_) => "string",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
        }
    }

    #[must_use]
    pub fn to_bool(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Float(f) => *f != 0.0,
            Self::Str(s) => !(s.is_empty() || s.as_ref() == b"0"),
            Self::Array(a) => !a.is_empty(),
            Self::Object(_) => true,
        }
    }

    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn to_int(&self) -> i64 {
        match self {
            Self::Null => 0,
            Self::Bool(b) => i64::from(*b),
            Self::Int(i) => *i,
            Self::Float(f) if f.is_finite() => *f as i64,
            Self::Float(_) => 0,
            Self::Str(s) => match leading_number(s).0 {
                Number::Int(i) => i,
                Number::Float(f) if f.is_finite() => f as i64,
                Number::Float(_) => 0,
            },
            Self::Array(a) => i64::from(!a.is_empty()),
            Self::Object(_) => 1,
        }
    }

    #[must_use]
    pub fn to_float(&self) -> f64 {
        match self {
            Self::Float(f) => *f,
            Self::Str(s) => leading_number(s).0.as_f64(),
            #[allow(clippy::cast_precision_loss)]
            other => other.to_int() as f64,
        }
    }

    /// Numeric view used by arithmetic. `None` for values that are not
    /// numbers and do not start with one.
    #[must_use]
    pub fn to_number(&self) -> Option<Number> {
        match self {
            Self::Null => Some(Number::Int(0)),
            Self::Bool(b) => Some(Number::Int(i64::from(*b))),
            Self::Int(i) => Some(Number::Int(*i)),
            Self::Float(f) => Some(Number::Float(*f)),
            Self::Str(s) => {
                let (n, consumed) = leading_number(s);
                (consumed > 0).then_some(n)
            }
            Self::Array(_) | Self::Object(_) => None,
        }
    }

    /// String conversion for everything but objects (which need the
    /// interpreter for `__toString`).
    #[must_use]
    pub fn to_bytes_lossy(&self) -> Bytes {
        match self {
            Self::Null | Self::Bool(false) => Bytes::new(),
            Self::Bool(true) => Bytes::from_static(b"1"),
            Self::Int(i) => Bytes::from(i.to_string()),
            Self::Float(f) => Bytes::from(format_float(*f, FloatStyle::Echo)),
            Self::Str(s) => s.clone(),
            Self::Array(_) => Bytes::from_static(b"Array"),
            Self::Object(o) => Bytes::from(format!("Object({})", o.class().name())),
        }
    }

    #[must_use]
    pub fn as_array(&self) -> Option<&Rc<ArrayData>> {
        match self {
            Self::Array(a) => Some(a),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_object(&self) -> Option<&ObjRef> {
        match self {
            Self::Object(o) => Some(o),
            _ => None,
        }
    }

    /// `===`
    #[must_use]
    pub fn strict_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            #[allow(clippy::float_cmp)]
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => {
                Rc::ptr_eq(a, b)
                    || (a.len() == b.len()
                        && a.iter()
                            .zip(b.iter())
                            .all(|((ka, va), (kb, vb))| ka == kb && va.strict_eq(vb)))
            }
            (Self::Object(a), Self::Object(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// `==`
    #[must_use]
    pub fn loose_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Array(a), Self::Array(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .all(|(k, va)| b.get(k).is_some_and(|vb| va.loose_eq(vb)))
            }
            (Self::Object(a), Self::Object(b)) => Rc::ptr_eq(a, b),
            (Self::Object(_), Self::Null) | (Self::Null, Self::Object(_)) => false,
            (Self::Object(_), Self::Bool(b)) | (Self::Bool(b), Self::Object(_)) => *b,
            (Self::Object(_), _) | (_, Self::Object(_)) => false,
            _ => self.loose_cmp(other) == Some(Ordering::Equal),
        }
    }

    /// Ordering used by `<`, `<=`, `>`, `>=` and `==` on scalars.
    #[must_use]
    pub fn loose_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Str(a), Self::Str(b)) => match (numeric_string(a), numeric_string(b)) {
                (Some(x), Some(y)) => cmp_numbers(x, y),
                _ => Some(a.as_ref().cmp(b.as_ref())),
            },
            (Self::Null, Self::Str(s)) => Some(b"".as_slice().cmp(s.as_ref())),
            (Self::Str(s), Self::Null) => Some(s.as_ref().cmp(b"".as_slice())),
            (Self::Bool(_) | Self::Null, _) | (_, Self::Bool(_) | Self::Null) => {
                Some(self.to_bool().cmp(&other.to_bool()))
            }
            (Self::Str(s), n @ (Self::Int(_) | Self::Float(_))) => match numeric_string(s) {
                Some(x) => cmp_numbers(x, n.to_number()?),
                None => Some(s.as_ref().cmp(n.to_bytes_lossy().as_ref())),
            },
            (n @ (Self::Int(_) | Self::Float(_)), Self::Str(s)) => match numeric_string(s) {
                Some(y) => cmp_numbers(n.to_number()?, y),
                None => Some(n.to_bytes_lossy().as_ref().cmp(s.as_ref())),
            },
            (Self::Array(a), Self::Array(b)) => Some(a.len().cmp(&b.len())),
            (Self::Array(_), _) => Some(Ordering::Greater),
            (_, Self::Array(_)) => Some(Ordering::Less),
            _ => cmp_numbers(self.to_number()?, other.to_number()?),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.strict_eq(other)
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "Null"),
            Self::Bool(b) => write!(f, "Bool({b})"),
            Self::Int(i) => write!(f, "Int({i})"),
            Self::Float(x) => write!(f, "Float({x})"),
            Self::Str(s) => write!(f, "Str({:?})", String::from_utf8_lossy(s)),
            Self::Array(a) => f.debug_map().entries(a.iter()).finish(),
            Self::Object(o) => write!(f, "Object({}#{})", o.class().name(), o.id()),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Str(Bytes::copy_from_slice(value.as_bytes()))
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Str(Bytes::from(value))
    }
}

impl From<ArrayData> for Value {
    fn from(value: ArrayData) -> Self {
        Self::array(value)
    }
}

fn cmp_numbers(a: Number, b: Number) -> Option<Ordering> {
    match (a, b) {
        (Number::Int(x), Number::Int(y)) => Some(x.cmp(&y)),
        _ => a.as_f64().partial_cmp(&b.as_f64()),
    }
}

/// Parses a fully numeric string (surrounding whitespace allowed).
#[must_use]
pub fn numeric_string(s: &[u8]) -> Option<Number> {
    let trimmed = trim_ascii(s);
    let (n, consumed) = leading_number(trimmed);
    (consumed > 0 && consumed == trimmed.len()).then_some(n)
}

fn trim_ascii(s: &[u8]) -> &[u8] {
    let start = s.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(s.len());
    let end = s
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |p| p + 1);
    &s[start..end.max(start)]
}

/// Parses the longest numeric prefix, returning it and the bytes consumed
/// (0 when there is none, in which case the number is `Int(0)`).
#[must_use]
pub fn leading_number(s: &[u8]) -> (Number, usize) {
    let start = s.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(s.len());
    let mut i = start;
    if i < s.len() && (s[i] == b'+' || s[i] == b'-') {
        i += 1;
    }
    let int_start = i;
    while i < s.len() && s[i].is_ascii_digit() {
        i += 1;
    }
    let mut is_float = false;
    let mut digits = i - int_start;
    if i < s.len() && s[i] == b'.' {
        let mut j = i + 1;
        while j < s.len() && s[j].is_ascii_digit() {
            j += 1;
        }
        if j - i - 1 > 0 || digits > 0 {
            digits += j - i - 1;
            is_float = true;
            i = j;
        }
    }
    if digits == 0 {
        return (Number::Int(0), 0);
    }
    if i < s.len() && (s[i] == b'e' || s[i] == b'E') {
        let mut j = i + 1;
        if j < s.len() && (s[j] == b'+' || s[j] == b'-') {
            j += 1;
        }
        let exp_start = j;
        while j < s.len() && s[j].is_ascii_digit() {
            j += 1;
        }
        if j > exp_start {
            is_float = true;
            i = j;
        }
    }
    let text = std::str::from_utf8(&s[start..i]).unwrap_or("0");
    if !is_float && let Ok(n) = text.parse::<i64>() {
        return (Number::Int(n), i);
    }
    (Number::Float(text.parse().unwrap_or(0.0)), i)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloatStyle {
    /// `echo`/string conversion: 14 significant digits.
    Echo,
    /// `var_dump`/`json_encode`: shortest round-trip representation.
    Repr,
}

#[must_use]
pub fn format_float(f: f64, style: FloatStyle) -> String {
    if f.is_nan() {
        return "NAN".into();
    }
    if f.is_infinite() {
        return if f > 0.0 { "INF".into() } else { "-INF".into() };
    }
    if f == 0.0 {
        return if f.is_sign_negative() { "-0".into() } else { "0".into() };
    }
    let (sci, threshold) = match style {
        FloatStyle::Echo => (format!("{f:.13e}"), 14),
        FloatStyle::Repr => (format!("{f:e}"), 15),
    };
    let (mantissa, exp) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
    let exp: i32 = exp.parse().unwrap_or(0);
    let negative = mantissa.starts_with('-');
    let mut digits: String = mantissa.chars().filter(char::is_ascii_digit).collect();
    while digits.len() > 1 && digits.ends_with('0') {
        digits.pop();
    }
    let sign = if negative { "-" } else { "" };
    if exp < -4 || exp >= threshold {
        let (head, tail) = digits.split_at(1);
        let tail = if tail.is_empty() { "0" } else { tail };
        let exp_sign = if exp < 0 { '-' } else { '+' };
        return format!("{sign}{head}.{tail}E{exp_sign}{}", exp.abs());
    }
    if exp >= 0 {
        #[allow(clippy::cast_sign_loss)]
        let int_len = exp as usize + 1;
        if digits.len() <= int_len {
            format!("{sign}{digits}{}", "0".repeat(int_len - digits.len()))
        } else {
            let (int_part, frac) = digits.split_at(int_len);
            format!("{sign}{int_part}.{frac}")
        }
    } else {
        #[allow(clippy::cast_sign_loss)]
        let zeros = (-exp - 1) as usize;
        format!("{sign}0.{}{digits}", "0".repeat(zeros))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floats_format_like_the_engine() {
        assert_eq!(format_float(0.5, FloatStyle::Repr), "0.5");
        assert_eq!(format_float(1.0, FloatStyle::Repr), "1");
        assert_eq!(format_float(0.1 + 0.2, FloatStyle::Repr), "0.30000000000000004");
        assert_eq!(format_float(0.1 + 0.2, FloatStyle::Echo), "0.3");
        assert_eq!(format_float(1e25, FloatStyle::Repr), "1.0E+25");
        assert_eq!(format_float(-1.5e-7, FloatStyle::Echo), "-1.5E-7");
        assert_eq!(format_float(4_294_967_292.0, FloatStyle::Repr), "4294967292");
        assert_eq!(format_float(0.001, FloatStyle::Echo), "0.001");
    }

    #[test]
    fn numeric_prefixes() {
        assert_eq!(leading_number(b"12abc"), (Number::Int(12), 2));
        assert_eq!(leading_number(b" 1.5e3"), (Number::Float(1500.0), 6));
        assert_eq!(leading_number(b"abc").1, 0);
        assert_eq!(numeric_string(b" 42 "), Some(Number::Int(42)));
        assert_eq!(numeric_string(b"42x"), None);
    }

    #[test]
    fn loose_comparisons() {
        assert!(Value::from("1").loose_eq(&Value::Int(1)));
        assert!(Value::from("abc").loose_eq(&Value::from("abc")));
        assert!(!Value::from("abc").loose_eq(&Value::Int(0)));
        assert!(Value::Null.loose_eq(&Value::Bool(false)));
        assert!(Value::Null.loose_eq(&Value::from("")));
        assert!(!Value::Int(1).loose_eq(&Value::Int(2)));
    }
}
