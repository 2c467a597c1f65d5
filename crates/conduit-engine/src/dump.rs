//! `var_dump`, `print_r` and `var_export` renderings.

use std::{collections::HashSet, io::Write};

use crate::{
    array::{ArrayData, ArrayKey},
    ast::Visibility,
    object::ObjRef,
    value::{FloatStyle, Value, format_float},
};

fn indent(out: &mut Vec<u8>, n: usize) {
    out.extend(std::iter::repeat_n(b' ', n));
}

/// Renders `var_dump($value)`.
#[must_use]
pub fn var_dump(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    Dumper::default().dump(&mut out, value, 0);
    out
}

#[derive(Default)]
struct Dumper {
    active: HashSet<u32>,
}

impl Dumper {
    fn dump(&mut self, out: &mut Vec<u8>, value: &Value, depth: usize) {
        indent(out, depth);
        match value {
            Value::Null => out.extend_from_slice(b"NULL\n"),
            Value::Bool(b) => {
                let _ = writeln!(out, "bool({b})");
            }
            Value::Int(i) => {
                let _ = writeln!(out, "int({i})");
            }
            Value::Float(f) => {
                let _ = writeln!(out, "float({})", format_float(*f, FloatStyle::Repr));
            }
            Value::Str(s) => {
                let _ = write!(out, "string({}) \"", s.len());
                out.extend_from_slice(s);
                out.extend_from_slice(b"\"\n");
            }
            Value::Array(data) => {
                let _ = writeln!(out, "array({}) {{", data.len());
                self.entries(out, data, depth);
                indent(out, depth);
                out.extend_from_slice(b"}\n");
            }
            Value::Object(obj) => self.object(out, obj, depth),
        }
    }

    fn entries(&mut self, out: &mut Vec<u8>, data: &ArrayData, depth: usize) {
        for (key, value) in data.iter() {
            indent(out, depth + 2);
            match key {
                ArrayKey::Int(i) => {
                    let _ = writeln!(out, "[{i}]=>");
                }
                ArrayKey::Str(s) => {
                    out.extend_from_slice(b"[\"");
                    out.extend_from_slice(s);
                    out.extend_from_slice(b"\"]=>\n");
                }
            }
            self.dump(out, value, depth + 2);
        }
    }

    fn object(&mut self, out: &mut Vec<u8>, obj: &ObjRef, depth: usize) {
        if !self.active.insert(obj.id()) {
            out.extend_from_slice(b"*RECURSION*\n");
            return;
        }
        let props = obj.properties();
        let _ = writeln!(
            out,
            "object({})#{} ({}) {{",
            obj.class().name(),
            obj.id(),
            props.len()
        );
        for prop in props.iter() {
            indent(out, depth + 2);
            out.extend_from_slice(b"[\"");
            out.extend_from_slice(prop.name.as_bytes());
            out.push(b'"');
            match prop.visibility {
                Visibility::Public => {}
                Visibility::Protected => out.extend_from_slice(b":protected"),
                Visibility::Private => {
                    let _ = write!(out, ":\"{}\":private", prop.declaring);
                }
            }
            out.extend_from_slice(b"]=>\n");
            let value = prop.slot.borrow().clone();
            self.dump(out, &value, depth + 2);
        }
        drop(props);
        indent(out, depth);
        out.extend_from_slice(b"}\n");
        self.active.remove(&obj.id());
    }
}

/// Renders `print_r($value, true)`.
#[must_use]
pub fn print_r(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    print_r_into(&mut out, value, 0, &mut HashSet::new());
    out
}

fn print_r_into(out: &mut Vec<u8>, value: &Value, depth: usize, active: &mut HashSet<u32>) {
    match value {
        Value::Array(data) => {
            out.extend_from_slice(b"Array\n");
            let entries = data.iter().map(|(k, v)| (k.to_bytes().to_vec(), v.clone()));
            print_hash(out, entries, depth, active);
        }
        Value::Object(obj) => {
            let _ = writeln!(out, "{} Object", obj.class().name());
            if !active.insert(obj.id()) {
                out.extend_from_slice(b" *RECURSION*");
                return;
            }
            let entries: Vec<_> = obj
                .properties()
                .iter()
                .map(|p| {
                    let key = match p.visibility {
                        Visibility::Public => p.name.to_string(),
                        Visibility::Protected => format!("{}:protected", p.name),
                        Visibility::Private => format!("{}:{}:private", p.name, p.declaring),
                    };
                    (key.into_bytes(), p.slot.borrow().clone())
                })
                .collect();
            print_hash(out, entries.into_iter(), depth, active);
            active.remove(&obj.id());
        }
        other => out.extend_from_slice(&other.to_bytes_lossy()),
    }
}

fn print_hash(
    out: &mut Vec<u8>,
    entries: impl Iterator<Item = (Vec<u8>, Value)>,
    depth: usize,
    active: &mut HashSet<u32>,
) {
    indent(out, depth);
    out.extend_from_slice(b"(\n");
    for (key, value) in entries {
        indent(out, depth + 4);
        out.push(b'[');
        out.extend_from_slice(&key);
        out.extend_from_slice(b"] => ");
        print_r_into(out, &value, depth + 8, active);
        out.push(b'\n');
    }
    indent(out, depth);
    out.extend_from_slice(b")\n");
}

/// Renders `var_export($value, true)`.
#[must_use]
pub fn var_export(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    export_into(&mut out, value, 0);
    out
}

fn export_string(out: &mut Vec<u8>, s: &[u8]) {
    out.push(b'\'');
    for &b in s {
        if b == b'\'' || b == b'\\' {
            out.push(b'\\');
        }
        out.push(b);
    }
    out.push(b'\'');
}

fn export_into(out: &mut Vec<u8>, value: &Value, depth: usize) {
    match value {
        Value::Null => out.extend_from_slice(b"NULL"),
        Value::Bool(b) => {
            let _ = write!(out, "{b}");
        }
        Value::Int(i) => {
            let _ = write!(out, "{i}");
        }
        Value::Float(f) => {
            let text = format_float(*f, FloatStyle::Repr);
            out.extend_from_slice(text.as_bytes());
            if f.is_finite() && !text.contains(['.', 'E', 'N', 'I']) {
                out.extend_from_slice(b".0");
            }
        }
        Value::Str(s) => export_string(out, s),
        Value::Array(data) => {
            out.extend_from_slice(b"array (\n");
            for (key, value) in data.iter() {
                indent(out, depth + 2);
                match key {
                    ArrayKey::Int(i) => {
                        let _ = write!(out, "{i}");
                    }
                    ArrayKey::Str(s) => export_string(out, s),
                }
                out.extend_from_slice(b" => ");
                if matches!(value, Value::Array(_) | Value::Object(_)) {
                    out.push(b'\n');
                    indent(out, depth + 2);
                }
                export_into(out, value, depth + 2);
                out.extend_from_slice(b",\n");
            }
            indent(out, depth);
            out.push(b')');
        }
        Value::Object(obj) => {
            let _ = writeln!(out, "\\{}::__set_state(array(", obj.class().name());
            for prop in obj.properties().iter() {
                indent(out, depth + 3);
                export_string(out, prop.name.as_bytes());
                out.extend_from_slice(b" => ");
                let value = prop.slot.borrow().clone();
                export_into(out, &value, depth + 2);
                out.extend_from_slice(b",\n");
            }
            indent(out, depth);
            out.extend_from_slice(b"))");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(bytes: Vec<u8>) -> String {
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn var_dump_nested_array() {
        let inner = ArrayData::from_values([Value::Int(1)]);
        let mut outer = ArrayData::new();
        outer.insert(ArrayKey::from("a"), Value::array(inner));
        outer.insert(ArrayKey::from("b"), Value::from("xy"));
        outer.insert(ArrayKey::from("c"), Value::Float(1.5));
        assert_eq!(
            text(var_dump(&Value::array(outer))),
            "array(3) {\n  [\"a\"]=>\n  array(1) {\n    [0]=>\n    int(1)\n  }\n  [\"b\"]=>\n  string(2) \"xy\"\n  [\"c\"]=>\n  float(1.5)\n}\n"
        );
    }

    #[test]
    fn print_r_nested_array() {
        let inner = ArrayData::from_values([Value::Int(1)]);
        let mut outer = ArrayData::new();
        outer.insert(ArrayKey::from("x"), Value::array(inner));
        outer.insert(ArrayKey::from("y"), Value::Bool(true));
        assert_eq!(
            text(print_r(&Value::array(outer))),
            "Array\n(\n    [x] => Array\n        (\n            [0] => 1\n        )\n\n    [y] => 1\n)\n"
        );
    }

    #[test]
    fn var_export_scalars_and_arrays() {
        assert_eq!(text(var_export(&Value::Float(2.0))), "2.0");
        assert_eq!(text(var_export(&Value::from("it's"))), "'it\\'s'");
        let data = ArrayData::from_values([Value::Int(1), Value::Null]);
        assert_eq!(text(var_export(&Value::array(data))), "array (\n  0 => 1,\n  1 => NULL,\n)");
    }
}
