use std::{
    collections::HashMap,
    time::{SystemTime, UNIX_EPOCH},
};

use super::{Builtin, PHP_VERSION, SAPI_NAME, arg, bool_arg, by_value, int_arg, opt, require, str_arg, string_arg};
use crate::{
    Interpreter,
    array::ArrayData,
    error::{Result, Throw},
    value::Value,
};

pub(crate) fn register(table: &mut HashMap<&'static str, Builtin>) {
    table.extend([
        ("flush", by_value(flush)),
        ("header", by_value(header)),
        ("header_remove", by_value(header_remove)),
        ("headers_sent", by_value(headers_sent)),
        ("headers_list", by_value(headers_list)),
        ("http_response_code", by_value(http_response_code)),
        ("setcookie", by_value(setcookie)),
        ("setrawcookie", by_value(setrawcookie)),
        ("error_log", by_value(error_log)),
        ("trigger_error", by_value(trigger_error)),
        ("user_error", by_value(trigger_error)),
        ("error_reporting", by_value(error_reporting)),
        ("ini_get", by_value(ini_get)),
        ("ini_set", by_value(ini_set)),
        ("file_get_contents", by_value(file_get_contents)),
        ("file_put_contents", by_value(file_put_contents)),
        ("file_exists", by_value(file_exists)),
        ("define", by_value(define)),
        ("defined", by_value(defined)),
        ("constant", by_value(constant)),
        ("time", by_value(time)),
        ("microtime", by_value(microtime)),
        ("hrtime", by_value(hrtime)),
        ("php_sapi_name", by_value(php_sapi_name)),
        ("phpversion", by_value(phpversion)),
    ]);
}

fn flush(interp: &mut Interpreter, _: &mut [Value]) -> Result<Value> {
    interp.flush_output()?;
    Ok(Value::Null)
}

fn header(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    require(interp, args, 1, "header")?;
    let line = str_arg(interp, args, 0)?;
    let replace = bool_arg(args, 1, true);
    let code = u16::try_from(int_arg(args, 2, 0)).ok().filter(|c| *c > 0);
    interp.header(&line, replace, code);
    Ok(Value::Null)
}

fn header_remove(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    let name = match opt(args, 0) {
        Some(_) => Some(string_arg(interp, args, 0)?),
        None => None,
    };
    interp.remove_header(name.as_deref());
    Ok(Value::Null)
}

fn headers_sent(interp: &mut Interpreter, _: &mut [Value]) -> Result<Value> {
    Ok(Value::Bool(interp.headers_sent()))
}

fn headers_list(interp: &mut Interpreter, _: &mut [Value]) -> Result<Value> {
    Ok(Value::array(ArrayData::from_values(interp.header_lines())))
}

fn http_response_code(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    let code = opt(args, 0).map(Value::to_int);
    let code = match code {
        Some(code) => match u16::try_from(code) {
            Ok(code) if (100..=999).contains(&code) => Some(code),
            _ => {
                let message = format!("http_response_code(): Invalid response code {code}");
                return Err(interp.throw_error("ValueError", &message));
            }
        },
        None => None,
    };
    Ok(interp.response_code(code))
}

const DAYS: [&str; 7] = ["Thu", "Fri", "Sat", "Sun", "Mon", "Tue", "Wed"];
const MONTHS: [&str; 12] = ["Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec"];

/// Cookie expiry date, e.g. `Thu, 01 Jan 1970 00:00:00 GMT`.
fn cookie_date(timestamp: i64) -> String {
    let days = timestamp.div_euclid(86_400);
    let secs = timestamp.rem_euclid(86_400);
    // Civil-from-days, proleptic Gregorian.
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe + era * 400 + i64::from(month <= 2);
    let weekday = DAYS[usize::try_from(days.rem_euclid(7)).unwrap_or(0)];
    let month_name = MONTHS[usize::try_from(month - 1).unwrap_or(0)];
    format!(
        "{weekday}, {day:02} {month_name} {year:04} {:02}:{:02}:{:02} GMT",
        secs / 3600,
        secs % 3600 / 60,
        secs % 60
    )
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
}

fn cookie(interp: &mut Interpreter, args: &[Value], encode: bool) -> Result<Value> {
    require(interp, args, 1, "setcookie")?;
    let name = string_arg(interp, args, 0)?;
    if name.is_empty() || name.contains(['=', ',', ';', ' ', '\t', '\r', '\n']) {
        return Err(interp.throw_error(
            "ValueError",
            "setcookie(): Argument #1 ($name) cannot be empty or contain \"=\", \",\", \";\", \" \", \"\\t\", \"\\r\", \"\\n\", \"\\013\", or \"\\014\"",
        ));
    }
    let value = str_arg(interp, args, 1)?;
    let mut line = format!("Set-Cookie: {name}=");
    if value.is_empty() {
        line.push_str("deleted; expires=Thu, 01 Jan 1970 00:00:01 GMT; Max-Age=0");
    } else {
        if encode {
            line.push_str(&super::string::raw_encode(&value));
        } else {
            line.push_str(&String::from_utf8_lossy(&value));
        }
        let expires = int_arg(args, 2, 0);
        if expires > 0 {
            let max_age = (expires - now()).max(0);
            line.push_str(&format!("; expires={}; Max-Age={max_age}", cookie_date(expires)));
        }
    }
    for (i, attribute) in [(3, "path"), (4, "domain")] {
        if opt(args, i).is_some() {
            let text = string_arg(interp, args, i)?;
            if !text.is_empty() {
                line.push_str(&format!("; {attribute}={text}"));
            }
        }
    }
    if bool_arg(args, 5, false) {
        line.push_str("; secure");
    }
    if bool_arg(args, 6, false) {
        line.push_str("; HttpOnly");
    }
    Ok(Value::Bool(interp.header(line.as_bytes(), false, None)))
}

fn setcookie(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    cookie(interp, args, true)
}

fn setrawcookie(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    cookie(interp, args, false)
}

fn error_log(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    let message = string_arg(interp, args, 0)?;
    interp.sapi.log(&message);
    Ok(Value::Bool(true))
}

const E_USER_ERROR: i64 = 256;
const E_USER_WARNING: i64 = 512;
const E_USER_DEPRECATED: i64 = 16_384;

fn trigger_error(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    let message = string_arg(interp, args, 0)?;
    let level = int_arg(args, 1, 1024);
    let label = match level {
        E_USER_ERROR => "Fatal error",
        E_USER_WARNING => "Warning",
        E_USER_DEPRECATED => "Deprecated",
        1024 => "Notice",
        _ => {
            return Err(interp.throw_error(
                "ValueError",
                "trigger_error(): Argument #2 ($error_level) must be one of E_USER_ERROR, E_USER_WARNING, E_USER_NOTICE, or E_USER_DEPRECATED",
            ));
        }
    };
    tracing::warn!(target: crate::TRACE_TARGET_SCRIPT, level = label, "{message}");
    if level == E_USER_ERROR {
        let display = interp.ini.get("display_errors").is_some_and(|v| v != "0");
        if display {
            interp.echo(format!("\n{label}: {message}\n").as_bytes())?;
        }
        return Err(Throw::Exit(255));
    }
    Ok(Value::Bool(true))
}

fn error_reporting(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    let previous = interp
        .ini
        .get("error_reporting")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0_i64);
    if let Some(level) = opt(args, 0) {
        interp.ini.insert("error_reporting".into(), level.to_int().to_string());
    }
    Ok(Value::Int(previous))
}

fn ini_get(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    let name = string_arg(interp, args, 0)?;
    Ok(interp.ini.get(&name).map_or(Value::Bool(false), |v| Value::from(v.as_str())))
}

fn ini_set(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    require(interp, args, 2, "ini_set")?;
    let name = string_arg(interp, args, 0)?;
    let value = string_arg(interp, args, 1)?;
    match name.as_str() {
        "default_mimetype" => interp.config.default_mimetype.clone_from(&value),
        "default_charset" => interp.config.default_charset.clone_from(&value),
        _ => {}
    }
    Ok(interp
        .ini
        .insert(name, value)
        .map_or(Value::Bool(false), Value::from))
}

fn file_get_contents(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    require(interp, args, 1, "file_get_contents")?;
    let path = string_arg(interp, args, 0)?;
    if path == "php://input" {
        return interp.request_body().map(Value::Str);
    }
    match std::fs::read(&path) {
        Ok(data) => Ok(Value::string(data)),
        Err(err) => {
            tracing::debug!(path, %err, "file_get_contents failed");
            Ok(Value::Bool(false))
        }
    }
}

fn file_put_contents(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    require(interp, args, 2, "file_put_contents")?;
    let path = string_arg(interp, args, 0)?;
    let data = match &args[1] {
        Value::Array(items) => {
            let mut out = Vec::new();
            for item in items.values() {
                out.extend_from_slice(&interp.to_bytes(item)?);
            }
            out
        }
        _ => str_arg(interp, args, 1)?.to_vec(),
    };
    let append = int_arg(args, 2, 0) & 8 != 0;
    let written = if append {
        use std::io::Write;
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .and_then(|mut f| f.write_all(&data))
    } else {
        std::fs::write(&path, &data)
    };
    match written {
        Ok(()) => Ok(super::usize_to_int(data.len())),
        Err(err) => {
            tracing::debug!(path, %err, "file_put_contents failed");
            Ok(Value::Bool(false))
        }
    }
}

fn file_exists(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    let path = string_arg(interp, args, 0)?;
    Ok(Value::Bool(std::path::Path::new(&path).exists()))
}

fn define(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    require(interp, args, 2, "define")?;
    let name = string_arg(interp, args, 0)?;
    if name.contains("::") {
        return Err(interp.throw_error("ValueError", "define(): Argument #1 ($constant_name) cannot be a class constant"));
    }
    let value = args[1].clone();
    interp.define_constant(&name, value).map(Value::Bool)
}

fn defined(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    let name = string_arg(interp, args, 0)?;
    Ok(Value::Bool(interp.constants.contains_key(name.trim_start_matches('\\'))))
}

fn constant(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    let name = string_arg(interp, args, 0)?;
    let name = name.trim_start_matches('\\');
    if let Some((class, constant)) = name.split_once("::") {
        let Some(class) = interp.class(class) else {
            let message = format!("Class \"{class}\" not found");
            return Err(interp.throw_error("Error", &message));
        };
        return interp.class_constant(&class, constant);
    }
    match interp.constants.get(name) {
        Some(value) => Ok(value.clone()),
        None => {
            let message = format!("Undefined constant \"{name}\"");
            Err(interp.throw_error("Error", &message))
        }
    }
}

fn time(_: &mut Interpreter, _: &mut [Value]) -> Result<Value> {
    Ok(Value::Int(now()))
}

fn microtime(_: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    let elapsed = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    if arg(args, 0).to_bool() {
        return Ok(Value::Float(elapsed.as_secs_f64()));
    }
    let micros = f64::from(elapsed.subsec_micros()) / 1e6;
    Ok(Value::from(format!("{micros:.8} {}", elapsed.as_secs())))
}

fn hrtime(_: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    let elapsed = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    if arg(args, 0).to_bool() {
        return Ok(Value::Int(i64::try_from(elapsed.as_nanos()).unwrap_or(i64::MAX)));
    }
    let secs = i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX);
    Ok(Value::array(ArrayData::from_values([
        Value::Int(secs),
        Value::Int(i64::from(elapsed.subsec_nanos())),
    ])))
}

fn php_sapi_name(_: &mut Interpreter, _: &mut [Value]) -> Result<Value> {
    Ok(Value::from(SAPI_NAME))
}

fn phpversion(_: &mut Interpreter, _: &mut [Value]) -> Result<Value> {
    Ok(Value::from(PHP_VERSION))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_dates() {
        assert_eq!(cookie_date(0), "Thu, 01 Jan 1970 00:00:00 GMT");
        assert_eq!(cookie_date(951_782_400), "Tue, 29 Feb 2000 00:00:00 GMT");
        assert_eq!(cookie_date(1_700_000_000), "Tue, 14 Nov 2023 22:13:20 GMT");
    }
}
