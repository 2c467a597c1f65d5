use std::{collections::HashMap, fmt::Write as _};

use super::{Builtin, arg, bool_arg, by_value, int_arg, require, str_arg};
use crate::{
    Interpreter, dump,
    array::{ArrayData, ArrayKey},
    error::Result,
    value::{FloatStyle, Value, format_float, numeric_string},
};

pub(crate) const JSON_FORCE_OBJECT: i64 = 16;
pub(crate) const JSON_UNESCAPED_SLASHES: i64 = 64;
pub(crate) const JSON_PRETTY_PRINT: i64 = 128;
pub(crate) const JSON_UNESCAPED_UNICODE: i64 = 256;
pub(crate) const JSON_THROW_ON_ERROR: i64 = 4_194_304;

const MAX_JSON_DEPTH: usize = 512;

pub(crate) fn register(table: &mut HashMap<&'static str, Builtin>) {
    table.extend([
        ("is_null", by_value(is_null)),
        ("is_bool", by_value(is_bool)),
        ("is_int", by_value(is_int)),
        ("is_integer", by_value(is_int)),
        ("is_long", by_value(is_int)),
        ("is_float", by_value(is_float)),
        ("is_double", by_value(is_float)),
        ("is_string", by_value(is_string)),
        ("is_array", by_value(is_array)),
        ("is_object", by_value(is_object)),
        ("is_numeric", by_value(is_numeric)),
        ("is_scalar", by_value(is_scalar)),
        ("is_iterable", by_value(is_iterable)),
        ("intval", by_value(intval)),
        ("floatval", by_value(floatval)),
        ("doubleval", by_value(floatval)),
        ("strval", by_value(strval)),
        ("boolval", by_value(boolval)),
        ("gettype", by_value(gettype)),
        ("get_debug_type", by_value(get_debug_type)),
        ("var_dump", by_value(var_dump)),
        ("print_r", by_value(print_r)),
        ("var_export", by_value(var_export)),
        ("json_encode", by_value(json_encode)),
        ("json_decode", by_value(json_decode)),
    ]);
}

fn check(args: &[Value], f: impl FnOnce(&Value) -> bool) -> Value {
    Value::Bool(args.first().is_some_and(f))
}

fn is_null(_: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    Ok(check(args, Value::is_null))
}

fn is_bool(_: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    Ok(check(args, |v| matches!(v, Value::Bool(_))))
}

fn is_int(_: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    Ok(check(args, |v| matches!(v, Value::Int(_))))
}

fn is_float(_: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    Ok(check(args, |v| matches!(v, Value::Float(_))))
}

fn is_string(_: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    Ok(check(args, |v| matches!(v, Value::Str(_))))
}

fn is_array(_: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    Ok(check(args, |v| matches!(v, Value::Array(_))))
}

fn is_object(_: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    Ok(check(args, |v| matches!(v, Value::Object(_))))
}

fn is_numeric(_: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    Ok(check(args, |v| match v {
        Value::Int(_) | Value::Float(_) => true,
        Value::Str(s) => numeric_string(s).is_some(),
        _ => false,
    }))
}

fn is_scalar(_: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    Ok(check(args, |v| matches!(v, Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::Str(_))))
}

fn is_iterable(_: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    Ok(check(args, |v| match v {
        Value::Array(_) => true,
        Value::Object(obj) => obj.class().is_a("Traversable"),
        _ => false,
    }))
}

fn intval(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    require(interp, args, 1, "intval")?;
    let base = int_arg(args, 1, 10);
    if base != 10
        && let Value::Str(s) = &args[0]
    {
        let text = String::from_utf8_lossy(s);
        let text = text.trim();
        let (negative, digits) = text.strip_prefix('-').map_or((false, text), |rest| (true, rest));
        let digits = match base {
            16 => digits.trim_start_matches("0x").trim_start_matches("0X"),
            8 => digits.trim_start_matches("0o"),
            2 => digits.trim_start_matches("0b"),
            _ => digits,
        };
        let radix = u32::try_from(base).unwrap_or(10);
        let end = digits
            .find(|c: char| !c.is_digit(radix))
            .unwrap_or(digits.len());
        let n = i64::from_str_radix(&digits[..end], radix).unwrap_or(0);
        return Ok(Value::Int(if negative { -n } else { n }));
    }
    Ok(Value::Int(args[0].to_int()))
}

fn floatval(_: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    Ok(Value::Float(arg(args, 0).to_float()))
}

fn strval(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    require(interp, args, 1, "strval")?;
    str_arg(interp, args, 0).map(Value::Str)
}

fn boolval(_: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    Ok(Value::Bool(arg(args, 0).to_bool()))
}

fn gettype(_: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    Ok(Value::from(arg(args, 0).gettype()))
}

fn get_debug_type(_: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    Ok(Value::from(arg(args, 0).type_name()))
}

fn var_dump(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    for value in args.iter() {
        interp.echo(&dump::var_dump(value))?;
    }
    Ok(Value::Null)
}

fn print_r(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    let text = match args.first() {
        Some(Value::Array(_) | Value::Object(_)) => dump::print_r(&args[0]),
        Some(_) => str_arg(interp, args, 0)?.to_vec(),
        None => Vec::new(),
    };
    if bool_arg(args, 1, false) {
        return Ok(Value::string(text));
    }
    interp.echo(&text)?;
    Ok(Value::Bool(true))
}

fn var_export(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    let text = dump::var_export(&arg(args, 0));
    if bool_arg(args, 1, false) {
        return Ok(Value::string(text));
    }
    interp.echo(&text)?;
    Ok(Value::Null)
}

struct JsonEncoder {
    flags: i64,
    out: String,
    depth: usize,
}

impl JsonEncoder {
    const fn has(&self, flag: i64) -> bool {
        self.flags & flag != 0
    }

    fn newline(&mut self) {
        if self.has(JSON_PRETTY_PRINT) {
            self.out.push('\n');
            for _ in 0..self.depth {
                self.out.push_str("    ");
            }
        }
    }

    fn string(&mut self, s: &[u8]) -> std::result::Result<(), &'static str> {
        let Ok(s) = std::str::from_utf8(s) else {
            return Err("Malformed UTF-8 characters, possibly incorrectly encoded");
        };
        self.out.push('"');
        for c in s.chars() {
            match c {
                '"' => self.out.push_str("\\\""),
                '\\' => self.out.push_str("\\\\"),
                '/' if !self.has(JSON_UNESCAPED_SLASHES) => self.out.push_str("\\/"),
                '\n' => self.out.push_str("\\n"),
                '\r' => self.out.push_str("\\r"),
                '\t' => self.out.push_str("\\t"),
                '\u{08}' => self.out.push_str("\\b"),
                '\u{0c}' => self.out.push_str("\\f"),
                c if u32::from(c) < 0x20 => {
                    let _ = write!(self.out, "\\u{:04x}", u32::from(c));
                }
                c if !c.is_ascii() && !self.has(JSON_UNESCAPED_UNICODE) => {
                    let mut units = [0; 2];
                    for unit in c.encode_utf16(&mut units) {
                        let _ = write!(self.out, "\\u{unit:04x}");
                    }
                }
                c => self.out.push(c),
            }
        }
        self.out.push('"');
        Ok(())
    }

    fn members(
        &mut self,
        interp: &mut Interpreter,
        entries: Vec<(ArrayKey, Value)>,
        as_object: bool,
    ) -> Result<std::result::Result<(), &'static str>> {
        let (open, close) = if as_object { ('{', '}') } else { ('[', ']') };
        self.out.push(open);
        if entries.is_empty() {
            self.out.push(close);
            return Ok(Ok(()));
        }
        self.depth += 1;
        for (i, (key, value)) in entries.into_iter().enumerate() {
            if i > 0 {
                self.out.push(',');
            }
            self.newline();
            if as_object {
                if let Err(e) = self.string(&key.to_bytes()) {
                    return Ok(Err(e));
                }
                self.out.push_str(if self.has(JSON_PRETTY_PRINT) { ": " } else { ":" });
            }
            if let Err(e) = self.value(interp, &value)? {
                return Ok(Err(e));
            }
        }
        self.depth -= 1;
        self.newline();
        self.out.push(close);
        Ok(Ok(()))
    }

    /// Outer `Result` carries script exceptions from `jsonSerialize`,
    /// the inner one encoding failures.
    fn value(&mut self, interp: &mut Interpreter, value: &Value) -> Result<std::result::Result<(), &'static str>> {
        if self.depth > MAX_JSON_DEPTH {
            return Ok(Err("Maximum stack depth exceeded"));
        }
        match value {
            Value::Null => self.out.push_str("null"),
            Value::Bool(b) => self.out.push_str(if *b { "true" } else { "false" }),
            Value::Int(i) => {
                let _ = write!(self.out, "{i}");
            }
            Value::Float(f) => {
                if !f.is_finite() {
                    return Ok(Err("Inf and NaN cannot be JSON encoded"));
                }
                let text = format_float(*f, FloatStyle::Repr);
                self.out.push_str(&text);
                if f.fract() == 0.0 && !text.contains(['.', 'E']) {
                    self.out.push_str(".0");
                }
            }
            Value::Str(s) => return Ok(self.string(s)),
            Value::Array(data) => {
                let as_object = self.has(JSON_FORCE_OBJECT) || !super::array::is_list(data);
                let entries = data.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
                return self.members(interp, entries, as_object);
            }
            Value::Object(obj) => {
                if obj.class().is_a("JsonSerializable") {
                    let serialized = interp.call_method(obj, "jsonSerialize", Vec::new(), None)?;
                    return self.value(interp, &serialized);
                }
                if let Some(foreign) = obj.foreign() {
                    let text = foreign.call(interp, Some("toJSON"), Vec::new());
                    if let Ok(Value::Str(json)) = text {
                        self.out.push_str(&String::from_utf8_lossy(&json));
                        return Ok(Ok(()));
                    }
                    self.out.push_str("{}");
                    return Ok(Ok(()));
                }
                let entries = obj
                    .properties()
                    .iter()
                    .filter(|p| p.visibility == crate::ast::Visibility::Public)
                    .map(|p| (ArrayKey::Str(p.name.as_bytes().to_vec().into()), p.slot.borrow().clone()))
                    .collect();
                return self.members(interp, entries, true);
            }
        }
        Ok(Ok(()))
    }
}

/// Encodes `value` as JSON text.
///
/// # Errors
///
/// Exceptions raised by `jsonSerialize()` propagate; encoding failures are
/// reported in the inner result.
pub fn encode_json(
    interp: &mut Interpreter,
    value: &Value,
    flags: i64,
) -> Result<std::result::Result<String, &'static str>> {
    let mut encoder = JsonEncoder { flags, out: String::new(), depth: 0 };
    Ok(encoder.value(interp, value)?.map(|()| encoder.out))
}

fn json_encode(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    require(interp, args, 1, "json_encode")?;
    let flags = int_arg(args, 1, 0);
    match encode_json(interp, &args[0], flags)? {
        Ok(text) => Ok(Value::from(text)),
        Err(message) if flags & JSON_THROW_ON_ERROR != 0 => Err(interp.throw_error("JsonException", message)),
        Err(message) => {
            tracing::debug!(message, "json_encode failed");
            Ok(Value::Bool(false))
        }
    }
}

fn from_json(interp: &mut Interpreter, value: serde_json::Value, assoc: bool) -> Value {
    match value {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => n
            .as_i64()
            .map_or_else(|| Value::Float(n.as_f64().unwrap_or(0.0)), Value::Int),
        serde_json::Value::String(s) => Value::from(s),
        serde_json::Value::Array(items) => {
            let values: Vec<Value> = items.into_iter().map(|v| from_json(interp, v, assoc)).collect();
            Value::array(ArrayData::from_values(values))
        }
        serde_json::Value::Object(map) => {
            if assoc {
                let data = map
                    .into_iter()
                    .map(|(k, v)| (ArrayKey::from_str_key(&k), from_json(interp, v, assoc)))
                    .collect::<ArrayData>();
                return Value::array(data);
            }
            let obj = interp.std_object();
            for (k, v) in map {
                let v = from_json(interp, v, assoc);
                obj.raw_set(&k, v);
            }
            Value::Object(obj)
        }
    }
}

fn json_decode(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    require(interp, args, 1, "json_decode")?;
    let text = str_arg(interp, args, 0)?;
    let assoc = bool_arg(args, 1, false);
    let flags = int_arg(args, 3, 0);
    match serde_json::from_slice::<serde_json::Value>(&text) {
        Ok(parsed) => Ok(from_json(interp, parsed, assoc)),
        Err(err) if flags & JSON_THROW_ON_ERROR != 0 => {
            tracing::debug!(%err, "json_decode failed");
            Err(interp.throw_error("JsonException", "Syntax error"))
        }
        Err(err) => {
            tracing::debug!(%err, len = text.len(), "json_decode failed");
            Ok(Value::Null)
        }
    }
}
