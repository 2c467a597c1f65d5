use std::{cmp::Ordering, collections::HashMap, rc::Rc};

use super::{Builtin, arg, bool_arg, by_ref, by_value, int_arg, opt, require, type_error, usize_to_int};
use crate::{
    Interpreter,
    array::{ArrayData, ArrayKey},
    error::Result,
    sapi::HasMode,
    value::Value,
};

pub(crate) fn register(table: &mut HashMap<&'static str, Builtin>) {
    table.extend([
        ("count", by_value(count)),
        ("sizeof", by_value(count)),
        ("array_keys", by_value(array_keys)),
        ("array_values", by_value(array_values)),
        ("array_key_exists", by_value(array_key_exists)),
        ("key_exists", by_value(array_key_exists)),
        ("in_array", by_value(in_array)),
        ("array_search", by_value(array_search)),
        ("array_merge", by_value(array_merge)),
        ("array_push", by_ref(array_push, &[0])),
        ("array_pop", by_ref(array_pop, &[0])),
        ("array_shift", by_ref(array_shift, &[0])),
        ("array_unshift", by_ref(array_unshift, &[0])),
        ("array_slice", by_value(array_slice)),
        ("array_map", by_value(array_map)),
        ("array_filter", by_value(array_filter)),
        ("array_reduce", by_value(array_reduce)),
        ("array_reverse", by_value(array_reverse)),
        ("array_sum", by_value(array_sum)),
        ("array_product", by_value(array_product)),
        ("array_flip", by_value(array_flip)),
        ("array_combine", by_value(array_combine)),
        ("array_fill", by_value(array_fill)),
        ("array_fill_keys", by_value(array_fill_keys)),
        ("array_key_first", by_value(array_key_first)),
        ("array_key_last", by_value(array_key_last)),
        ("array_unique", by_value(array_unique)),
        ("array_column", by_value(array_column)),
        ("array_is_list", by_value(array_is_list)),
        ("range", by_value(range)),
        ("min", by_value(min)),
        ("max", by_value(max)),
        ("sort", by_ref(sort, &[0])),
        ("rsort", by_ref(rsort, &[0])),
        ("usort", by_ref(usort, &[0])),
        ("uasort", by_ref(uasort, &[0])),
        ("ksort", by_ref(ksort, &[0])),
        ("krsort", by_ref(krsort, &[0])),
        ("asort", by_ref(asort, &[0])),
        ("arsort", by_ref(arsort, &[0])),
    ]);
}

/// The array argument at `i`, raising `TypeError` for anything else.
fn array_arg(interp: &mut Interpreter, args: &[Value], i: usize, name: &str) -> Result<Rc<ArrayData>> {
    match args.get(i) {
        Some(Value::Array(data)) => Ok(data.clone()),
        Some(other) => Err(type_error(interp, name, i + 1, "array", other)),
        None => {
            require(interp, args, i + 1, name)?;
            Ok(Rc::default())
        }
    }
}

fn count(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    require(interp, args, 1, "count")?;
    match &args[0] {
        Value::Array(data) => {
            if int_arg(args, 1, 0) == 1 {
                return Ok(usize_to_int(count_recursive(data)));
            }
            Ok(usize_to_int(data.len()))
        }
        Value::Object(obj) => {
            if let Some(foreign) = obj.foreign() {
                return foreign.get(interp, "length").map(|v| Value::Int(v.to_int()));
            }
            if obj.class().is_a("Countable") {
                let obj = obj.clone();
                let n = interp.call_method(&obj, "count", Vec::new(), None)?;
                return Ok(Value::Int(n.to_int()));
            }
            let given = args[0].clone();
            Err(type_error(interp, "count", 1, "Countable|array", &given))
        }
        other => {
            let given = other.clone();
            Err(type_error(interp, "count", 1, "Countable|array", &given))
        }
    }
}

fn count_recursive(data: &ArrayData) -> usize {
    data.values()
        .map(|v| match v {
            Value::Array(inner) => 1 + count_recursive(inner),
            _ => 1,
        })
        .sum()
}

fn array_keys(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    let data = array_arg(interp, args, 0, "array_keys")?;
    let filter = args.get(1).cloned();
    let strict = bool_arg(args, 2, false);
    let keys = data
        .iter()
        .filter(|(_, v)| {
            filter
                .as_ref()
                .is_none_or(|f| if strict { v.strict_eq(f) } else { v.loose_eq(f) })
        })
        .map(|(k, _)| k.to_value());
    Ok(Value::array(ArrayData::from_values(keys)))
}

fn array_values(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    let data = array_arg(interp, args, 0, "array_values")?;
    Ok(Value::array(ArrayData::from_values(data.values().cloned())))
}

fn array_key_exists(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    require(interp, args, 2, "array_key_exists")?;
    match &args[1] {
        Value::Array(data) => {
            let key = interp.key_of(&args[0])?;
            Ok(Value::Bool(data.contains_key(&key)))
        }
        Value::Object(obj) if obj.foreign().is_some() => {
            let name = String::from_utf8_lossy(&args[0].to_bytes_lossy()).into_owned();
            let obj = obj.clone();
            let key = Value::from(name);
            interp.offset_exists(&obj, &key, HasMode::Exists).map(Value::Bool)
        }
        other => {
            let given = other.clone();
            Err(type_error(interp, "array_key_exists", 2, "array", &given))
        }
    }
}

fn search(data: &ArrayData, needle: &Value, strict: bool) -> Option<ArrayKey> {
    data.iter()
        .find(|(_, v)| if strict { v.strict_eq(needle) } else { v.loose_eq(needle) })
        .map(|(k, _)| k.clone())
}

fn in_array(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    let data = array_arg(interp, args, 1, "in_array")?;
    Ok(Value::Bool(search(&data, &args[0], bool_arg(args, 2, false)).is_some()))
}

fn array_search(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    let data = array_arg(interp, args, 1, "array_search")?;
    Ok(search(&data, &args[0], bool_arg(args, 2, false)).map_or(Value::Bool(false), |k| k.to_value()))
}

fn array_merge(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    let mut out = ArrayData::new();
    for i in 0..args.len() {
        let data = array_arg(interp, args, i, "array_merge")?;
        append(&mut out, &data);
    }
    Ok(Value::array(out))
}

/// Mutable access to the by-reference array argument.
fn array_mut<'a>(interp: &mut Interpreter, args: &'a mut [Value], name: &str) -> Result<&'a mut ArrayData> {
    require(interp, args, 1, name)?;
    if !matches!(args[0], Value::Array(_)) {
        let given = args[0].clone();
        return Err(type_error(interp, name, 1, "array", &given));
    }
    let Value::Array(data) = &mut args[0] else {
        return Err(interp.throw_error("TypeError", name));
    };
    Ok(Rc::make_mut(data))
}

fn array_push(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    let (target, rest) = args.split_at_mut(1.min(args.len()));
    let data = array_mut(interp, target, "array_push")?;
    for value in rest.iter() {
        data.push(value.clone());
    }
    Ok(usize_to_int(data.len()))
}

fn array_pop(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    let data = array_mut(interp, args, "array_pop")?;
    let Some(key) = data.keys().last().cloned() else {
        return Ok(Value::Null);
    };
    Ok(data.remove(&key).unwrap_or_default())
}

fn array_shift(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    let data = array_mut(interp, args, "array_shift")?;
    let Some(key) = data.keys().next().cloned() else {
        return Ok(Value::Null);
    };
    let value = data.remove(&key).unwrap_or_default();
    *data = renumber(data);
    Ok(value)
}

fn array_unshift(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    let (target, rest) = args.split_at_mut(1.min(args.len()));
    let data = array_mut(interp, target, "array_unshift")?;
    let mut out = ArrayData::from_values(rest.iter().cloned());
    append(&mut out, data);
    *data = out;
    Ok(usize_to_int(data.len()))
}

/// Appends `data`, renumbering its integer keys.
fn append(out: &mut ArrayData, data: &ArrayData) {
    for (key, value) in data.iter() {
        match key {
            ArrayKey::Int(_) => {
                out.push(value.clone());
            }
            ArrayKey::Str(_) => out.insert(key.clone(), value.clone()),
        }
    }
}

fn renumber(data: &ArrayData) -> ArrayData {
    let mut out = ArrayData::new();
    append(&mut out, data);
    out
}

fn array_slice(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    let data = array_arg(interp, args, 0, "array_slice")?;
    let len = i64::try_from(data.len()).unwrap_or(i64::MAX);
    let mut start = int_arg(args, 1, 0);
    if start < 0 {
        start = (len + start).max(0);
    }
    let start = start.min(len);
    let end = match opt(args, 2).map(Value::to_int) {
        None => len,
        Some(n) if n < 0 => (len + n).max(start),
        Some(n) => (start + n).min(len),
    };
    let preserve = bool_arg(args, 3, false);
    let mut out = ArrayData::new();
    let skip = usize::try_from(start).unwrap_or(0);
    let take = usize::try_from(end - start).unwrap_or(0);
    for (key, value) in data.iter().skip(skip).take(take) {
        match key {
            ArrayKey::Int(_) if !preserve => {
                out.push(value.clone());
            }
            _ => out.insert(key.clone(), value.clone()),
        }
    }
    Ok(Value::array(out))
}

fn array_map(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    require(interp, args, 2, "array_map")?;
    let callback = args[0].clone();
    if args.len() > 2 {
        let arrays = (1..args.len())
            .map(|i| array_arg(interp, args, i, "array_map"))
            .collect::<Result<Vec<_>>>()?;
        let longest = arrays.iter().map(|a| a.len()).max().unwrap_or(0);
        let columns: Vec<Vec<Value>> = arrays.iter().map(|a| a.values().cloned().collect()).collect();
        let mut out = ArrayData::new();
        for row in 0..longest {
            let items: Vec<Value> = columns.iter().map(|c| c.get(row).cloned().unwrap_or_default()).collect();
            let value = if callback.is_null() {
                Value::array(ArrayData::from_values(items))
            } else {
                interp.call(&callback, items)?
            };
            out.push(value);
        }
        return Ok(Value::array(out));
    }
    let data = array_arg(interp, args, 1, "array_map")?;
    if callback.is_null() {
        return Ok(Value::Array(data));
    }
    let mut out = ArrayData::new();
    for (key, value) in data.iter() {
        let mapped = interp.call(&callback, vec![value.clone()])?;
        out.insert(key.clone(), mapped);
    }
    Ok(Value::array(out))
}

fn array_filter(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    let data = array_arg(interp, args, 0, "array_filter")?;
    let callback = opt(args, 1).cloned();
    let mode = int_arg(args, 2, 0);
    let mut out = ArrayData::new();
    for (key, value) in data.iter() {
        let keep = match &callback {
            None => value.to_bool(),
            Some(f) => {
                let call_args = match mode {
                    2 => vec![key.to_value()],
                    1 => vec![value.clone(), key.to_value()],
                    _ => vec![value.clone()],
                };
                interp.call(f, call_args)?.to_bool()
            }
        };
        if keep {
            out.insert(key.clone(), value.clone());
        }
    }
    Ok(Value::array(out))
}

fn array_reduce(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    let data = array_arg(interp, args, 0, "array_reduce")?;
    require(interp, args, 2, "array_reduce")?;
    let callback = args[1].clone();
    let mut carry = arg(args, 2);
    for value in data.values() {
        carry = interp.call(&callback, vec![carry, value.clone()])?;
    }
    Ok(carry)
}

fn array_reverse(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    let data = array_arg(interp, args, 0, "array_reverse")?;
    let preserve = bool_arg(args, 1, false);
    let entries: Vec<_> = data.iter().collect();
    let mut out = ArrayData::new();
    for (key, value) in entries.into_iter().rev() {
        match key {
            ArrayKey::Int(_) if !preserve => {
                out.push(value.clone());
            }
            _ => out.insert(key.clone(), value.clone()),
        }
    }
    Ok(Value::array(out))
}

fn fold_numbers(interp: &mut Interpreter, data: &ArrayData, init: i64, op: crate::ast::BinOp) -> Result<Value> {
    let mut acc = Value::Int(init);
    for value in data.values() {
        let number = value.to_number().map_or(Value::Int(0), crate::value::Number::into_value);
        acc = interp.binary(op, acc, number)?;
    }
    Ok(acc)
}

fn array_sum(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    let data = array_arg(interp, args, 0, "array_sum")?;
    fold_numbers(interp, &data, 0, crate::ast::BinOp::Add)
}

fn array_product(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    let data = array_arg(interp, args, 0, "array_product")?;
    fold_numbers(interp, &data, 1, crate::ast::BinOp::Mul)
}

fn array_flip(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    let data = array_arg(interp, args, 0, "array_flip")?;
    let mut out = ArrayData::new();
    for (key, value) in data.iter() {
        if let Some(new_key) = ArrayKey::from_value(value)
            && matches!(value, Value::Int(_) | Value::Str(_))
        {
            out.insert(new_key, key.to_value());
        }
    }
    Ok(Value::array(out))
}

fn array_combine(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    let keys = array_arg(interp, args, 0, "array_combine")?;
    let values = array_arg(interp, args, 1, "array_combine")?;
    if keys.len() != values.len() {
        return Err(interp.throw_error(
            "ValueError",
            "array_combine(): Argument #1 ($keys) and argument #2 ($values) must have the same number of elements",
        ));
    }
    let mut out = ArrayData::new();
    for (key, value) in keys.values().zip(values.values()) {
        let key = interp.key_of(key)?;
        out.insert(key, value.clone());
    }
    Ok(Value::array(out))
}

fn array_fill(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    require(interp, args, 3, "array_fill")?;
    let start = args[0].to_int();
    let count = args[1].to_int();
    if count < 0 {
        return Err(interp.throw_error(
            "ValueError",
            "array_fill(): Argument #2 ($count) must be greater than or equal to 0",
        ));
    }
    let mut out = ArrayData::new();
    for i in 0..count {
        out.insert(ArrayKey::Int(start + i), args[2].clone());
    }
    Ok(Value::array(out))
}

fn array_fill_keys(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    let keys = array_arg(interp, args, 0, "array_fill_keys")?;
    let value = arg(args, 1);
    let mut out = ArrayData::new();
    for key in keys.values() {
        let key = interp.key_of(key)?;
        out.insert(key, value.clone());
    }
    Ok(Value::array(out))
}

fn array_key_first(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    let data = array_arg(interp, args, 0, "array_key_first")?;
    Ok(data.keys().next().map_or(Value::Null, ArrayKey::to_value))
}

fn array_key_last(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    let data = array_arg(interp, args, 0, "array_key_last")?;
    Ok(data.keys().last().map_or(Value::Null, ArrayKey::to_value))
}

fn array_unique(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    let data = array_arg(interp, args, 0, "array_unique")?;
    let mut seen: Vec<Value> = Vec::new();
    let mut out = ArrayData::new();
    for (key, value) in data.iter() {
        if seen.iter().any(|s| s.loose_eq(value)) {
            continue;
        }
        seen.push(value.clone());
        out.insert(key.clone(), value.clone());
    }
    Ok(Value::array(out))
}

fn array_column(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    let data = array_arg(interp, args, 0, "array_column")?;
    let column = opt(args, 1).map(|c| interp.key_of(c)).transpose()?;
    let index = opt(args, 2).map(|c| interp.key_of(c)).transpose()?;
    let mut out = ArrayData::new();
    for row in data.values() {
        let Value::Array(row) = row else { continue };
        let value = match &column {
            Some(column) => match row.get(column) {
                Some(v) => v.clone(),
                None => continue,
            },
            None => Value::Array(row.clone()),
        };
        match index.as_ref().and_then(|i| row.get(i)).and_then(ArrayKey::from_value) {
            Some(key) => out.insert(key, value),
            None => {
                out.push(value);
            }
        }
    }
    Ok(Value::array(out))
}

fn array_is_list(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    let data = array_arg(interp, args, 0, "array_is_list")?;
    Ok(Value::Bool(is_list(&data)))
}

/// Keys are exactly `0..len` in order.
pub(crate) fn is_list(data: &ArrayData) -> bool {
    data.keys()
        .zip(0_i64..)
        .all(|(key, i)| *key == ArrayKey::Int(i))
}

fn range(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    require(interp, args, 2, "range")?;
    let (start, end) = (&args[0], &args[1]);
    if let (Value::Str(a), Value::Str(b)) = (start, end)
        && a.len() == 1
        && b.len() == 1
        && !a[0].is_ascii_digit()
    {
        let (a, b) = (a[0], b[0]);
        let chars: Vec<u8> = if a <= b { (a..=b).collect() } else { (b..=a).rev().collect() };
        return Ok(Value::array(ArrayData::from_values(
            chars.into_iter().map(|c| Value::string(vec![c])),
        )));
    }
    let step = opt(args, 2).map_or(Value::Int(1), Clone::clone);
    let floats = [start, end, &step].iter().any(|v| matches!(v, Value::Float(_)));
    if floats {
        let (a, b) = (start.to_float(), end.to_float());
        let step = step.to_float().abs();
        if step == 0.0 {
            return Err(interp.throw_error("ValueError", "range(): Argument #3 ($step) cannot be 0"));
        }
        let mut out = ArrayData::new();
        let mut i = 0.0;
        loop {
            let v = if a <= b { a + i * step } else { a - i * step };
            if (a <= b && v > b) || (a > b && v < b) {
                break;
            }
            out.push(Value::Float(v));
            i += 1.0;
        }
        return Ok(Value::array(out));
    }
    let (a, b) = (start.to_int(), end.to_int());
    let step = step.to_int().unsigned_abs();
    if step == 0 {
        return Err(interp.throw_error("ValueError", "range(): Argument #3 ($step) cannot be 0"));
    }
    let step = usize::try_from(step).unwrap_or(usize::MAX);
    let values: Vec<Value> = if a <= b {
        (a..=b).step_by(step).map(Value::Int).collect()
    } else {
        (b..=a).rev().step_by(step).map(Value::Int).collect()
    };
    Ok(Value::array(ArrayData::from_values(values)))
}

fn extreme(interp: &mut Interpreter, args: &[Value], name: &str, want: Ordering) -> Result<Value> {
    require(interp, args, 1, name)?;
    let values: Vec<Value> = match args {
        [Value::Array(data)] => data.values().cloned().collect(),
        [other] => {
            let given = other.clone();
            return Err(type_error(interp, name, 1, "array", &given));
        }
        many => many.to_vec(),
    };
    let mut best: Option<Value> = None;
    for value in values {
        best = Some(match best {
            Some(current) if value.loose_cmp(&current) != Some(want) => current,
            _ => value,
        });
    }
    match best {
        Some(best) => Ok(best),
        None => {
            let message = format!("{name}(): Argument #1 ($value) must contain at least one element");
            Err(interp.throw_error("ValueError", &message))
        }
    }
}

fn min(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    extreme(interp, args, "min", Ordering::Less)
}

fn max(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    extreme(interp, args, "max", Ordering::Greater)
}

/// Sorts entries with a comparator that may call back into scripts.
/// Merge sort keeps the result stable and stops at the first error.
fn sort_entries<F>(
    interp: &mut Interpreter,
    entries: Vec<(ArrayKey, Value)>,
    cmp: &mut F,
) -> Result<Vec<(ArrayKey, Value)>>
where
    F: FnMut(&mut Interpreter, &(ArrayKey, Value), &(ArrayKey, Value)) -> Result<Ordering>,
{
    if entries.len() <= 1 {
        return Ok(entries);
    }
    let mut left = entries;
    let right = left.split_off(left.len() / 2);
    let left = sort_entries(interp, left, cmp)?;
    let right = sort_entries(interp, right, cmp)?;
    let mut out = Vec::with_capacity(left.len() + right.len());
    let mut left = left.into_iter().peekable();
    let mut right = right.into_iter().peekable();
    while let (Some(l), Some(r)) = (left.peek(), right.peek()) {
        if cmp(interp, l, r)? == Ordering::Greater {
            out.extend(right.next());
        } else {
            out.extend(left.next());
        }
    }
    out.extend(left);
    out.extend(right);
    Ok(out)
}

fn cmp_values(a: &Value, b: &Value) -> Ordering {
    a.loose_cmp(b).unwrap_or(Ordering::Equal)
}

fn sort_by<F>(interp: &mut Interpreter, args: &mut [Value], name: &str, keep_keys: bool, mut cmp: F) -> Result<Value>
where
    F: FnMut(&mut Interpreter, &(ArrayKey, Value), &(ArrayKey, Value)) -> Result<Ordering>,
{
    let entries: Vec<(ArrayKey, Value)> = {
        let data = array_mut(interp, args, name)?;
        data.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    };
    let sorted = sort_entries(interp, entries, &mut cmp)?;
    let out = if keep_keys {
        sorted.into_iter().collect()
    } else {
        ArrayData::from_values(sorted.into_iter().map(|(_, v)| v))
    };
    args[0] = Value::array(out);
    Ok(Value::Bool(true))
}

fn sort(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    sort_by(interp, args, "sort", false, |_, a, b| Ok(cmp_values(&a.1, &b.1)))
}

fn rsort(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    sort_by(interp, args, "rsort", false, |_, a, b| Ok(cmp_values(&b.1, &a.1)))
}

fn asort(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    sort_by(interp, args, "asort", true, |_, a, b| Ok(cmp_values(&a.1, &b.1)))
}

fn arsort(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    sort_by(interp, args, "arsort", true, |_, a, b| Ok(cmp_values(&b.1, &a.1)))
}

fn ksort(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    sort_by(interp, args, "ksort", true, |_, a, b| Ok(cmp_values(&a.0.to_value(), &b.0.to_value())))
}

fn krsort(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    sort_by(interp, args, "krsort", true, |_, a, b| Ok(cmp_values(&b.0.to_value(), &a.0.to_value())))
}

fn user_cmp(interp: &mut Interpreter, callback: &Value, a: &Value, b: &Value) -> Result<Ordering> {
    let result = interp.call(callback, vec![a.clone(), b.clone()])?;
    Ok(result.loose_cmp(&Value::Int(0)).unwrap_or(Ordering::Equal))
}

fn usort(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    require(interp, args, 2, "usort")?;
    let callback = args[1].clone();
    sort_by(interp, args, "usort", false, |interp, a, b| user_cmp(interp, &callback, &a.1, &b.1))
}

fn uasort(interp: &mut Interpreter, args: &mut [Value]) -> Result<Value> {
    require(interp, args, 2, "uasort")?;
    let callback = args[1].clone();
    sort_by(interp, args, "uasort", true, |interp, a, b| user_cmp(interp, &callback, &a.1, &b.1))
}
