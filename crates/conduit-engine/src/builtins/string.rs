use std::collections::HashMap;

use bytes::Bytes;

use super::{Builtin, arg, by_value, int_arg, opt, require, str_arg, string_arg, usize_to_int};
use crate::{
    Interpreter,
    array::ArrayData,
    error::Result,
    value::{FloatStyle, Value, format_float},
};

pub(crate) fn register(table: &mut HashMap<&'static str, Builtin>) {
    table.extend([
        ("strlen", by_value(strlen)),
        ("strtoupper", by_value(strtoupper)),
        ("strtolower", by_value(strtolower)),
        ("ucfirst", by_value(ucfirst)),
        ("lcfirst", by_value(lcfirst)),
        ("ucwords", by_value(ucwords)),
        ("trim", by_value(trim)),
        ("ltrim", by_value(ltrim)),
        ("rtrim", by_value(rtrim)),
        ("chop", by_value(rtrim)),
        ("str_repeat", by_value(str_repeat)),
        ("str_replace", by_value(str_replace)),
        ("substr", by_value(substr)),
        ("strpos", by_value(strpos)),
        ("stripos", by_value(stripos)),
        ("strrpos", by_value(strrpos)),
        ("str_contains", by_value(str_contains)),
        ("str_starts_with", by_value(str_starts_with)),
        ("str_ends_with", by_value(str_ends_with)),
        ("implode", by_value(implode)),
        ("join", by_value(implode)),
        ("explode", by_value(explode)),
        ("addslashes", by_value(addslashes)),
        ("stripslashes", by_value(stripslashes)),
        ("urlencode", by_value(urlencode)),
        ("rawurlencode", by_value(rawurlencode)),
        ("urldecode", by_value(urldecode)),
        ("rawurldecode", by_value(rawurldecode)),
        ("htmlspecialchars", by_value(htmlspecialchars)),
        ("nl2br", by_value(nl2br)),
        ("sprintf", by_value(sprintf)),
        ("printf", by_value(printf)),
        ("number_format", by_value(number_format)),
        ("str_pad", by_value(str_pad)),
        ("strrev", by_value(strrev)),
        ("strcmp", by_value(strcmp)),
        ("ord", by_value(ord)),
        ("chr", by_value(chr)),
        ("dechex", by_value(dechex)),
        ("hexdec", by_value(hexdec)),
        ("bin2hex", by_value(bin2hex)),
        ("str_split", by_value(str_split)),
    ]);
}

fn map_bytes(interp: &mut Interpreter, args: &[Value], f: impl FnOnce(&mut Vec<u8>)) -> Result<Value> {
    let mut s = str_arg(interp, args, 0)?.to_vec();
    f(&mut s);
    Ok(Value::string(s))
}

fn strlen(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    require(interp, args, 1, "strlen")?;
    Ok(usize_to_int(str_arg(interp, args, 0)?.len()))
}

fn strtoupper(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    map_bytes(interp, args, |s| s.make_ascii_uppercase())
}

fn strtolower(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    map_bytes(interp, args, |s| s.make_ascii_lowercase())
}

fn ucfirst(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    map_bytes(interp, args, |s| {
        if let Some(b) = s.first_mut() {
            b.make_ascii_uppercase();
        }
    })
}

fn lcfirst(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    map_bytes(interp, args, |s| {
        if let Some(b) = s.first_mut() {
            b.make_ascii_lowercase();
        }
    })
}

fn ucwords(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    map_bytes(interp, args, |s| {
        let mut start = true;
        for b in s.iter_mut() {
            if start {
                b.make_ascii_uppercase();
            }
            start = matches!(*b, b' ' | b'\t' | b'\r' | b'\n' | 0x0b | 0x0c);
        }
    })
}

const DEFAULT_TRIM: &[u8] = b" \t\n\r\0\x0B";

/// Expands `a..z` ranges in a trim character list.
fn trim_set(list: &[u8]) -> Vec<u8> {
    let mut set = Vec::new();
    let mut i = 0;
    while i < list.len() {
        if i + 3 < list.len() && &list[i + 1..i + 3] == b".." {
            set.extend(list[i]..=list[i + 3]);
            i += 4;
        } else {
            set.push(list[i]);
            i += 1;
        }
    }
    set
}

fn trim_with(interp: &mut Interpreter, args: &[Value], left: bool, right: bool) -> Result<Value> {
    let s = str_arg(interp, args, 0)?;
    let set = match opt(args, 1) {
        Some(_) => trim_set(&str_arg(interp, args, 1)?),
        None => DEFAULT_TRIM.to_vec(),
    };
    let mut start = 0;
    let mut end = s.len();
    if left {
        while start < end && set.contains(&s[start]) {
            start += 1;
        }
    }
    if right {
        while end > start && set.contains(&s[end - 1]) {
            end -= 1;
        }
    }
    Ok(Value::Str(s.slice(start..end)))
}

fn trim(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    trim_with(interp, args, true, true)
}

fn ltrim(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    trim_with(interp, args, true, false)
}

fn rtrim(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    trim_with(interp, args, false, true)
}

fn str_repeat(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    require(interp, args, 2, "str_repeat")?;
    let s = str_arg(interp, args, 0)?;
    let times = args[1].to_int();
    let Ok(times) = usize::try_from(times) else {
        return Err(interp.throw_error(
            "ValueError",
            "str_repeat(): Argument #2 ($times) must be greater than or equal to 0",
        ));
    };
    Ok(Value::string(s.repeat(times)))
}

fn replace_all(haystack: &[u8], needle: &[u8], with: &[u8]) -> Vec<u8> {
    if needle.is_empty() {
        return haystack.to_vec();
    }
    let mut out = Vec::with_capacity(haystack.len());
    let mut i = 0;
    while i < haystack.len() {
        if haystack[i..].starts_with(needle) {
            out.extend_from_slice(with);
            i += needle.len();
        } else {
            out.push(haystack[i]);
            i += 1;
        }
    }
    out
}

fn str_replace(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    require(interp, args, 3, "str_replace")?;
    let pairs: Vec<(Bytes, Bytes)> = match (&args[0], &args[1]) {
        (Value::Array(search), Value::Array(replace)) => {
            let mut replacements = replace.values();
            search
                .values()
                .map(|s| (s.to_bytes_lossy(), replacements.next().map(Value::to_bytes_lossy).unwrap_or_default()))
                .collect()
        }
        (Value::Array(search), replace) => {
            let replace = replace.to_bytes_lossy();
            search.values().map(|s| (s.to_bytes_lossy(), replace.clone())).collect()
        }
        (search, replace) => vec![(search.to_bytes_lossy(), replace.to_bytes_lossy())],
    };
    let apply = |subject: &Value| {
        let mut s = subject.to_bytes_lossy().to_vec();
        for (search, with) in &pairs {
            s = replace_all(&s, search, with);
        }
        Value::string(s)
    };
    match &args[2] {
        Value::Array(subjects) => {
            let out = subjects.iter().map(|(k, v)| (k.clone(), apply(v))).collect::<ArrayData>();
            Ok(Value::array(out))
        }
        subject => Ok(apply(subject)),
    }
}

/// Resolves a possibly negative offset against `len`.
fn clamp_offset(offset: i64, len: usize) -> usize {
    let len_i = i64::try_from(len).unwrap_or(i64::MAX);
    let resolved = if offset < 0 { (len_i + offset).max(0) } else { offset.min(len_i) };
    usize::try_from(resolved).unwrap_or(0)
}

fn substr(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    require(interp, args, 2, "substr")?;
    let s = str_arg(interp, args, 0)?;
    let start = clamp_offset(args[1].to_int(), s.len());
    let end = match opt(args, 2).map(Value::to_int) {
        None => s.len(),
        Some(n) if n < 0 => clamp_offset(n, s.len()).max(start),
        Some(n) => start.saturating_add(usize::try_from(n).unwrap_or(0)).min(s.len()),
    };
    Ok(Value::Str(s.slice(start..end)))
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from > haystack.len() {
        return None;
    }
    if needle.is_empty() {
        return Some(from);
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

fn position(interp: &mut Interpreter, args: &[Value], name: &str, fold: bool, reverse: bool) -> Result<Value> {
    require(interp, args, 2, name)?;
    let mut haystack = str_arg(interp, args, 0)?.to_vec();
    let mut needle = str_arg(interp, args, 1)?.to_vec();
    if fold {
        haystack.make_ascii_lowercase();
        needle.make_ascii_lowercase();
    }
    let offset = int_arg(args, 2, 0);
    if offset.unsigned_abs() > haystack.len() as u64 {
        let message = format!("{name}(): Argument #3 ($offset) must be contained in argument #1 ($haystack)");
        return Err(interp.throw_error("ValueError", &message));
    }
    let from = clamp_offset(offset, haystack.len());
    let found = if reverse {
        (from..=haystack.len().saturating_sub(needle.len()))
            .rev()
            .find(|&i| haystack[i..].starts_with(&needle))
    } else {
        find(&haystack, &needle, from)
    };
    Ok(found.map_or(Value::Bool(false), usize_to_int))
}

fn strpos(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    position(interp, args, "strpos", false, false)
}

fn stripos(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    position(interp, args, "stripos", true, false)
}

fn strrpos(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    position(interp, args, "strrpos", false, true)
}

fn str_contains(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    let haystack = str_arg(interp, args, 0)?;
    let needle = str_arg(interp, args, 1)?;
    Ok(Value::Bool(find(&haystack, &needle, 0).is_some()))
}

fn str_starts_with(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    let haystack = str_arg(interp, args, 0)?;
    let needle = str_arg(interp, args, 1)?;
    Ok(Value::Bool(haystack.starts_with(&needle)))
}

fn str_ends_with(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    let haystack = str_arg(interp, args, 0)?;
    let needle = str_arg(interp, args, 1)?;
    Ok(Value::Bool(haystack.ends_with(&needle)))
}

fn implode(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    require(interp, args, 1, "implode")?;
    let (glue, pieces) = match (&args[0], args.get(1)) {
        (Value::Array(pieces), None) => (Bytes::new(), pieces.clone()),
        (Value::Array(pieces), Some(glue)) | (glue, Some(Value::Array(pieces))) => {
            let glue = glue.clone();
            (interp.to_bytes(&glue)?, pieces.clone())
        }
        (_, other) => {
            let given = other.cloned().unwrap_or_default();
            return Err(super::type_error(interp, "implode", 2, "?array", &given));
        }
    };
    let mut out = Vec::new();
    for (i, piece) in pieces.values().enumerate() {
        if i > 0 {
            out.extend_from_slice(&glue);
        }
        out.extend_from_slice(&interp.to_bytes(piece)?);
    }
    Ok(Value::string(out))
}

fn explode(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    require(interp, args, 2, "explode")?;
    let separator = str_arg(interp, args, 0)?;
    if separator.is_empty() {
        return Err(interp.throw_error("ValueError", "explode(): Argument #1 ($separator) cannot be empty"));
    }
    let s = str_arg(interp, args, 1)?;
    let mut parts = Vec::new();
    let mut start = 0;
    while let Some(at) = find(&s, &separator, start) {
        parts.push(s.slice(start..at));
        start = at + separator.len();
    }
    parts.push(s.slice(start..));
    let limit = int_arg(args, 2, i64::MAX);
    let limit_len = usize::try_from(limit.unsigned_abs()).unwrap_or(usize::MAX);
    if limit > 0 && parts.len() > limit_len {
        let cut = parts[..limit_len - 1].iter().map(|p| p.len() + separator.len()).sum::<usize>();
        parts.truncate(limit_len - 1);
        parts.push(s.slice(cut..));
    } else if limit < 0 {
        parts.truncate(parts.len().saturating_sub(limit_len));
    } else if limit == 0 && parts.len() > 1 {
        parts = vec![s];
    }
    Ok(Value::array(ArrayData::from_values(parts.into_iter().map(Value::Str))))
}

fn addslashes(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    let s = str_arg(interp, args, 0)?;
    let mut out = Vec::with_capacity(s.len());
    for &b in s.iter() {
        match b {
            0 => out.extend_from_slice(b"\\0"),
            b'\'' | b'"' | b'\\' => out.extend_from_slice(&[b'\\', b]),
            _ => out.push(b),
        }
    }
    Ok(Value::string(out))
}

fn stripslashes(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    let s = str_arg(interp, args, 0)?;
    let mut out = Vec::with_capacity(s.len());
    let mut bytes = s.iter().copied();
    while let Some(b) = bytes.next() {
        if b == b'\\' {
            match bytes.next() {
                Some(b'0') => out.push(0),
                Some(next) => out.push(next),
                None => {}
            }
        } else {
            out.push(b);
        }
    }
    Ok(Value::string(out))
}

/// `application/x-www-form-urlencoded` encoding, `*` included.
pub(crate) fn form_encode(s: &[u8]) -> String {
    url::form_urlencoded::byte_serialize(s).collect::<String>().replace('*', "%2A")
}

fn urlencode(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    let s = str_arg(interp, args, 0)?;
    Ok(Value::from(form_encode(&s)))
}

/// RFC 3986 percent-encoding, as used by `rawurlencode` and cookies.
pub(crate) fn raw_encode(s: &[u8]) -> String {
    let mut out = String::with_capacity(s.len());
    for &b in s {
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~') {
            out.push(char::from(b));
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}

fn rawurlencode(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    let s = str_arg(interp, args, 0)?;
    Ok(Value::from(raw_encode(&s)))
}

fn percent_decode(s: &[u8], plus_is_space: bool) -> Vec<u8> {
    let hex = |b: u8| char::from(b).to_digit(16).and_then(|d| u8::try_from(d).ok());
    let mut out = Vec::with_capacity(s.len());
    let mut i = 0;
    while i < s.len() {
        match s[i] {
            b'+' if plus_is_space => out.push(b' '),
            b'%' if i + 2 < s.len() => {
                if let (Some(hi), Some(lo)) = (hex(s[i + 1]), hex(s[i + 2])) {
                    out.push((hi << 4) | lo);
                    i += 3;
                    continue;
                }
                out.push(b'%');
            }
            b => out.push(b),
        }
        i += 1;
    }
    out
}

fn urldecode(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    let s = str_arg(interp, args, 0)?;
    Ok(Value::string(percent_decode(&s, true)))
}

fn rawurldecode(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    let s = str_arg(interp, args, 0)?;
    Ok(Value::string(percent_decode(&s, false)))
}

fn htmlspecialchars(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    let s = str_arg(interp, args, 0)?;
    let mut out = Vec::with_capacity(s.len());
    for &b in s.iter() {
        match b {
            b'&' => out.extend_from_slice(b"&amp;"),
            b'<' => out.extend_from_slice(b"&lt;"),
            b'>' => out.extend_from_slice(b"&gt;"),
            b'"' => out.extend_from_slice(b"&quot;"),
            b'\'' => out.extend_from_slice(b"&#039;"),
            _ => out.push(b),
        }
    }
    Ok(Value::string(out))
}

fn nl2br(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    let s = str_arg(interp, args, 0)?;
    let mut out = Vec::with_capacity(s.len());
    let mut i = 0;
    while i < s.len() {
        match (s[i], s.get(i + 1)) {
            (b'\r', Some(b'\n')) | (b'\n', Some(b'\r')) => {
                out.extend_from_slice(b"<br />");
                out.extend_from_slice(&s[i..i + 2]);
                i += 2;
                continue;
            }
            (b'\r' | b'\n', _) => out.extend_from_slice(b"<br />"),
            _ => {}
        }
        out.push(s[i]);
        i += 1;
    }
    Ok(Value::string(out))
}

struct Spec {
    left: bool,
    pad: u8,
    plus: bool,
    width: usize,
    precision: Option<usize>,
}

fn pad(out: &mut Vec<u8>, body: &[u8], spec: &Spec) {
    let fill = spec.width.saturating_sub(body.len());
    if spec.left {
        out.extend_from_slice(body);
        out.extend(std::iter::repeat_n(if spec.pad == b'0' { b' ' } else { spec.pad }, fill));
    } else if spec.pad == b'0' && matches!(body.first(), Some(b'-' | b'+')) {
        out.push(body[0]);
        out.extend(std::iter::repeat_n(b'0', fill));
        out.extend_from_slice(&body[1..]);
    } else {
        out.extend(std::iter::repeat_n(spec.pad, fill));
        out.extend_from_slice(body);
    }
}

/// `sprintf`-style formatting.
pub(crate) fn format(interp: &mut Interpreter, fmt: &[u8], args: &[Value]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(fmt.len());
    let mut next = 0;
    let mut i = 0;
    while i < fmt.len() {
        if fmt[i] != b'%' {
            out.push(fmt[i]);
            i += 1;
            continue;
        }
        i += 1;
        if fmt.get(i) == Some(&b'%') {
            out.push(b'%');
            i += 1;
            continue;
        }
        // Optional `n$` argument index.
        let digits_end = fmt[i..].iter().position(|b| !b.is_ascii_digit()).map_or(fmt.len(), |p| p + i);
        let mut index = None;
        if digits_end > i && fmt.get(digits_end) == Some(&b'$') {
            let n: usize = std::str::from_utf8(&fmt[i..digits_end]).ok().and_then(|s| s.parse().ok()).unwrap_or(1);
            index = Some(n.saturating_sub(1));
            i = digits_end + 1;
        }
        let mut spec = Spec { left: false, pad: b' ', plus: false, width: 0, precision: None };
        loop {
            match fmt.get(i) {
                Some(b'-') => spec.left = true,
                Some(b'+') => spec.plus = true,
                Some(b'0') => spec.pad = b'0',
                Some(b' ') => spec.pad = b' ',
                Some(b'\'') => {
                    i += 1;
                    spec.pad = fmt.get(i).copied().unwrap_or(b' ');
                }
                _ => break,
            }
            i += 1;
        }
        while let Some(d) = fmt.get(i).filter(|b| b.is_ascii_digit()) {
            spec.width = spec.width * 10 + usize::from(d - b'0');
            i += 1;
        }
        if fmt.get(i) == Some(&b'.') {
            i += 1;
            let mut precision = 0;
            while let Some(d) = fmt.get(i).filter(|b| b.is_ascii_digit()) {
                precision = precision * 10 + usize::from(d - b'0');
                i += 1;
            }
            spec.precision = Some(precision);
        }
        let Some(&conversion) = fmt.get(i) else {
            return Err(interp.throw_error("ValueError", "Missing format specifier at end of string"));
        };
        i += 1;
        let position = index.unwrap_or_else(|| {
            next += 1;
            next - 1
        });
        let Some(value) = args.get(position) else {
            let message = format!("{} arguments are required, {} given", position + 2, args.len() + 1);
            return Err(interp.throw_error("ArgumentCountError", &message));
        };
        let body: Vec<u8> = match conversion {
            b's' => {
                let s = interp.to_bytes(value)?;
                match spec.precision {
                    Some(p) => s[..p.min(s.len())].to_vec(),
                    None => s.to_vec(),
                }
            }
            b'd' | b'i' => {
                let n = value.to_int();
                (if spec.plus && n >= 0 { format!("+{n}") } else { n.to_string() }).into_bytes()
            }
            b'u' => value.to_int().cast_unsigned().to_string().into_bytes(),
            b'f' | b'F' => {
                let f = value.to_float();
                let text = format!("{f:.*}", spec.precision.unwrap_or(6));
                (if spec.plus && f >= 0.0 { format!("+{text}") } else { text }).into_bytes()
            }
            b'e' | b'E' => {
                let text = format!("{:.*e}", spec.precision.unwrap_or(6), value.to_float());
                let (mantissa, exp) = text.split_once('e').unwrap_or((&text, "0"));
                let exp = if exp.starts_with('-') { exp.to_string() } else { format!("+{exp}") };
                let sep = if conversion == b'E' { 'E' } else { 'e' };
                format!("{mantissa}{sep}{exp}").into_bytes()
            }
            b'g' | b'G' => format_float(value.to_float(), FloatStyle::Echo).into_bytes(),
            b'x' => format!("{:x}", value.to_int()).into_bytes(),
            b'X' => format!("{:X}", value.to_int()).into_bytes(),
            b'o' => format!("{:o}", value.to_int()).into_bytes(),
            b'b' => format!("{:b}", value.to_int()).into_bytes(),
            b'c' => vec![value.to_int().to_le_bytes()[0]],
            other => {
                let message = format!("Unknown format specifier \"{}\"", char::from(other));
                return Err(interp.throw_error("ValueError", &message));
            }
        };
        pad(&mut out, &body, &spec);
    }
    Ok(out)
}

fn sprintf(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    require(interp, args, 1, "sprintf")?;
    let fmt = str_arg(interp, args, 0)?;
    Ok(Value::string(format(interp, &fmt, &args[1..])?))
}

fn printf(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    require(interp, args, 1, "printf")?;
    let fmt = str_arg(interp, args, 0)?;
    let text = format(interp, &fmt, &args[1..])?;
    interp.echo(&text)?;
    Ok(usize_to_int(text.len()))
}

fn number_format(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    require(interp, args, 1, "number_format")?;
    let number = args[0].to_float();
    let decimals = usize::try_from(int_arg(args, 1, 0)).unwrap_or(0);
    let point = if args.len() > 2 { string_arg(interp, args, 2)? } else { ".".into() };
    let thousands = if args.len() > 3 { string_arg(interp, args, 3)? } else { ",".into() };
    let text = format!("{:.*}", decimals, number.abs());
    let (int_part, frac) = text.split_once('.').unwrap_or((&text, ""));
    let mut grouped = String::new();
    for (i, c) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push_str(&thousands);
        }
        grouped.push(c);
    }
    let negative = number < 0.0 && text.chars().any(|c| c.is_ascii_digit() && c != '0');
    let mut out = if negative { format!("-{grouped}") } else { grouped };
    if decimals > 0 {
        out.push_str(&point);
        out.push_str(frac);
    }
    Ok(Value::from(out))
}

fn str_pad(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    require(interp, args, 2, "str_pad")?;
    let s = str_arg(interp, args, 0)?;
    let length = usize::try_from(args[1].to_int()).unwrap_or(0);
    let fill = if args.len() > 2 { str_arg(interp, args, 2)? } else { Bytes::from_static(b" ") };
    if fill.is_empty() {
        return Err(interp.throw_error("ValueError", "str_pad(): Argument #3 ($pad_string) must be a non-empty string"));
    }
    let missing = length.saturating_sub(s.len());
    if missing == 0 {
        return Ok(Value::Str(s));
    }
    let padding = |n: usize| fill.iter().copied().cycle().take(n).collect::<Vec<u8>>();
    let (left, right) = match int_arg(args, 3, 1) {
        0 => (missing, 0),
        2 => (missing / 2, missing - missing / 2),
        _ => (0, missing),
    };
    let mut out = padding(left);
    out.extend_from_slice(&s);
    out.extend(padding(right));
    Ok(Value::string(out))
}

fn strrev(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    map_bytes(interp, args, |s| s.reverse())
}

fn strcmp(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    let a = str_arg(interp, args, 0)?;
    let b = str_arg(interp, args, 1)?;
    Ok(Value::Int(match a.cmp(&b) {
        std::cmp::Ordering::Less => -1,
        std::cmp::Ordering::Equal => 0,
        std::cmp::Ordering::Greater => 1,
    }))
}

fn ord(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    let s = str_arg(interp, args, 0)?;
    Ok(Value::Int(s.first().map_or(0, |&b| i64::from(b))))
}

fn chr(_: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    let code = arg(args, 0).to_int().rem_euclid(256);
    Ok(Value::string(vec![u8::try_from(code).unwrap_or(0)]))
}

fn dechex(_: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    Ok(Value::from(format!("{:x}", arg(args, 0).to_int())))
}

fn hexdec(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    let s = string_arg(interp, args, 0)?;
    let digits: String = s.chars().filter(char::is_ascii_hexdigit).collect();
    Ok(i64::from_str_radix(&digits, 16).map_or_else(
        |_| {
            let f = digits.chars().fold(0.0, |acc, c| acc * 16.0 + f64::from(c.to_digit(16).unwrap_or(0)));
            Value::Float(f)
        },
        Value::Int,
    ))
}

fn bin2hex(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    let s = str_arg(interp, args, 0)?;
    Ok(Value::from(s.iter().map(|b| format!("{b:02x}")).collect::<String>()))
}

fn str_split(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    let s = str_arg(interp, args, 0)?;
    let Ok(size) = usize::try_from(int_arg(args, 1, 1)) else {
        return Err(interp.throw_error("ValueError", "str_split(): Argument #2 ($length) must be greater than 0"));
    };
    if size == 0 {
        return Err(interp.throw_error("ValueError", "str_split(): Argument #2 ($length) must be greater than 0"));
    }
    if s.is_empty() {
        return Ok(Value::array(ArrayData::from_values([Value::from("")])));
    }
    let chunks = s.chunks(size).map(|c| Value::string(c.to_vec()));
    Ok(Value::array(ArrayData::from_values(chunks)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trim_ranges() {
        assert_eq!(trim_set(b"a..d"), b"abcd");
        assert_eq!(trim_set(b"x."), b"x.");
    }

    #[test]
    fn percent_decoding() {
        assert_eq!(percent_decode(b"a+b%20c%2", true), b"a b c%2");
        assert_eq!(percent_decode(b"a+b", false), b"a+b");
    }

    #[test]
    fn form_encoding_escapes_star() {
        assert_eq!(form_encode(b"a b*c&"), "a+b%2Ac%26");
    }
}
