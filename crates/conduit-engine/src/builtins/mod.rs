//! Native function library.

mod array;
pub(crate) mod classes;
mod func;
mod io;
mod string;
pub(crate) mod types;

use std::{collections::HashMap, sync::LazyLock};

use bytes::Bytes;

use crate::{Interpreter, error::Result, value::Value};

pub(crate) type BuiltinFn = fn(&mut Interpreter, &mut [Value]) -> Result<Value>;

/// A native function. Arguments at `by_ref` positions are written back to
/// the caller's variables after the call.
#[derive(Clone, Copy)]
pub(crate) struct Builtin {
    pub(crate) f: BuiltinFn,
    pub(crate) by_ref: &'static [usize],
}

const fn by_value(f: BuiltinFn) -> Builtin {
    Builtin { f, by_ref: &[] }
}

const fn by_ref(f: BuiltinFn, by_ref: &'static [usize]) -> Builtin {
    Builtin { f, by_ref }
}

static BUILTINS: LazyLock<HashMap<&'static str, Builtin>> = LazyLock::new(|| {
    let mut table = HashMap::new();
    array::register(&mut table);
    func::register(&mut table);
    io::register(&mut table);
    string::register(&mut table);
    types::register(&mut table);
    table
});

pub(crate) fn lookup(lowercase_name: &str) -> Option<Builtin> {
    BUILTINS.get(lowercase_name).copied()
}

pub(crate) fn register_constants(interp: &mut Interpreter) {
    let constants: [(&str, Value); 23] = [
        ("PHP_EOL", Value::from("\n")),
        ("PHP_INT_MAX", Value::Int(i64::MAX)),
        ("PHP_INT_MIN", Value::Int(i64::MIN)),
        ("PHP_INT_SIZE", Value::Int(8)),
        ("PHP_FLOAT_EPSILON", Value::Float(f64::EPSILON)),
        ("PHP_VERSION", Value::from(PHP_VERSION)),
        ("PHP_OS", Value::from(std::env::consts::OS)),
        ("PHP_SAPI", Value::from(SAPI_NAME)),
        ("NAN", Value::Float(f64::NAN)),
        ("INF", Value::Float(f64::INFINITY)),
        ("E_ALL", Value::Int(32767)),
        ("E_ERROR", Value::Int(1)),
        ("E_WARNING", Value::Int(2)),
        ("E_NOTICE", Value::Int(8)),
        ("E_USER_ERROR", Value::Int(256)),
        ("E_USER_WARNING", Value::Int(512)),
        ("E_USER_NOTICE", Value::Int(1024)),
        ("JSON_PRETTY_PRINT", Value::Int(types::JSON_PRETTY_PRINT)),
        ("JSON_UNESCAPED_SLASHES", Value::Int(types::JSON_UNESCAPED_SLASHES)),
        ("JSON_UNESCAPED_UNICODE", Value::Int(types::JSON_UNESCAPED_UNICODE)),
        ("JSON_FORCE_OBJECT", Value::Int(types::JSON_FORCE_OBJECT)),
        ("JSON_THROW_ON_ERROR", Value::Int(types::JSON_THROW_ON_ERROR)),
        ("COUNT_RECURSIVE", Value::Int(1)),
    ];
    for (name, value) in constants {
        interp.constants.insert(name.to_string(), value);
    }
    for (name, value) in [("SORT_REGULAR", 0), ("SORT_NUMERIC", 1), ("SORT_STRING", 2), ("ARRAY_FILTER_USE_KEY", 2), ("ARRAY_FILTER_USE_BOTH", 1)] {
        interp.constants.insert(name.to_string(), Value::Int(value));
    }
}

pub(crate) const PHP_VERSION: &str = "8.3.0";
pub(crate) const SAPI_NAME: &str = "embed";

// Argument helpers. Missing arguments read as null.

fn arg(args: &[Value], i: usize) -> Value {
    args.get(i).cloned().unwrap_or_default()
}

fn opt(args: &[Value], i: usize) -> Option<&Value> {
    args.get(i).filter(|v| !v.is_null())
}

fn int_arg(args: &[Value], i: usize, default: i64) -> i64 {
    opt(args, i).map_or(default, Value::to_int)
}

fn bool_arg(args: &[Value], i: usize, default: bool) -> bool {
    opt(args, i).map_or(default, Value::to_bool)
}

fn str_arg(interp: &mut Interpreter, args: &[Value], i: usize) -> Result<Bytes> {
    match args.get(i) {
        Some(v) => interp.to_bytes(v),
        None => Ok(Bytes::new()),
    }
}

fn string_arg(interp: &mut Interpreter, args: &[Value], i: usize) -> Result<String> {
    Ok(String::from_utf8_lossy(&str_arg(interp, args, i)?).into_owned())
}

/// Raises `ArgumentCountError` unless at least `n` arguments were passed.
fn require(interp: &mut Interpreter, args: &[Value], n: usize, name: &str) -> Result<()> {
    if args.len() >= n {
        return Ok(());
    }
    let message = format!(
        "{name}() expects at least {n} argument{}, {} given",
        if n == 1 { "" } else { "s" },
        args.len()
    );
    Err(interp.throw_error("ArgumentCountError", &message))
}

fn type_error(interp: &mut Interpreter, name: &str, position: usize, expected: &str, given: &Value) -> crate::Throw {
    let message = format!(
        "{name}(): Argument #{position} must be of type {expected}, {} given",
        given.type_name()
    );
    interp.throw_error("TypeError", &message)
}

fn usize_to_int(n: usize) -> Value {
    Value::Int(i64::try_from(n).unwrap_or(i64::MAX))
}
