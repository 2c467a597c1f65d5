use std::path::PathBuf;

use bytes::Bytes;

use super::{Arg, Frame, Interpreter, PropertyLookup};
use crate::{
    array::{ArrayData, ArrayKey},
    ast::{ArrayItem, BinOp, CastKind, ClassRef, Expr, InterpPart, Literal, LogicalOp, MatchArm, Name, UnaryOp},
    error::{Result, Throw},
    object::{MethodBody, Native, ObjRef},
    ops::{self, OpError},
    sapi::HasMode,
    value::{Number, Value, new_slot, numeric_string},
};

fn literal(lit: &Literal) -> Value {
    match lit {
        Literal::Null => Value::Null,
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Int(i) => Value::Int(*i),
        Literal::Float(f) => Value::Float(*f),
        Literal::Str(s) => Value::Str(s.clone()),
    }
}

fn check(value: &Value, mode: HasMode) -> bool {
    match mode {
        HasMode::Isset => !value.is_null(),
        HasMode::NotEmpty => value.to_bool(),
        HasMode::Exists => true,
    }
}

/// Offset in a string for `$s[$i]`, counting negative offsets from the end.
fn string_offset(s: &[u8], offset: i64) -> Option<usize> {
    let len = i64::try_from(s.len()).ok()?;
    let at = if offset < 0 { len + offset } else { offset };
    if (0..len).contains(&at) {
        usize::try_from(at).ok()
    } else {
        None
    }
}

/// `"a"++` is `"b"`, `"Az"++` is `"Ba"`, `"zz"++` is `"aaa"`.
fn increment_string(s: &[u8]) -> Vec<u8> {
    let mut out = s.to_vec();
    let mut i = out.len();
    while i > 0 {
        i -= 1;
        match out[i] {
            b'z' => out[i] = b'a',
            b'Z' => out[i] = b'A',
            b'9' => out[i] = b'0',
            c if c.is_ascii_alphanumeric() => {
                out[i] = c + 1;
                return out;
            }
            _ => return out,
        }
    }
    let first = match s.first() {
        Some(b'z') => b'a',
        Some(b'Z') => b'A',
        _ => b'1',
    };
    out.insert(0, first);
    out
}

fn step_float(f: f64, increment: bool) -> f64 {
    if increment { f + 1.0 } else { f - 1.0 }
}

fn step(value: &Value, increment: bool) -> Result<Value, OpError> {
    let bump = |n: Number| match n {
        Number::Int(i) => {
            let next = if increment { i.checked_add(1) } else { i.checked_sub(1) };
            next.map_or_else(|| Value::Float(step_float(n.as_f64(), increment)), Value::Int)
        }
        Number::Float(f) => Value::Float(step_float(f, increment)),
    };
    match value {
        Value::Null if increment => Ok(Value::Int(1)),
        Value::Null | Value::Bool(_) => Ok(value.clone()),
        Value::Int(i) => Ok(bump(Number::Int(*i))),
        Value::Float(f) => Ok(bump(Number::Float(*f))),
        Value::Str(s) => {
            if let Some(n) = numeric_string(s) {
                return Ok(bump(n));
            }
            if s.is_empty() {
                return Ok(if increment { Value::from("1") } else { Value::Int(-1) });
            }
            Ok(if increment {
                Value::string(increment_string(s))
            } else {
                value.clone()
            })
        }
        Value::Array(_) => Err(OpError::new(
            "TypeError",
            format!("Cannot {} array", if increment { "increment" } else { "decrement" }),
        )),
        Value::Object(o) => Err(OpError::new(
            "TypeError",
            format!(
                "Cannot {} {}",
                if increment { "increment" } else { "decrement" },
                o.class().name()
            ),
        )),
    }
}

fn describe_match_subject(value: &Value) -> String {
    match value {
        Value::Str(s) => format!("'{}'", String::from_utf8_lossy(s).replace('\\', "\\\\").replace('\'', "\\'")),
        Value::Int(_) | Value::Float(_) => String::from_utf8_lossy(&value.to_bytes_lossy()).into_owned(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "NULL".to_string(),
        other => format!("of type {}", other.type_name()),
    }
}

impl Interpreter {
    pub(crate) fn eval(&mut self, frame: &mut Frame, expr: &Expr) -> Result<Value> {
        match expr {
            Expr::Lit(lit) => Ok(literal(lit)),
            Expr::Interp(parts) => {
                let mut out = Vec::new();
                for part in parts {
                    match part {
                        InterpPart::Literal(bytes) => out.extend_from_slice(bytes),
                        InterpPart::Expr(e) => {
                            let value = self.eval(frame, e)?;
                            out.extend_from_slice(&self.to_bytes(&value)?);
                        }
                    }
                }
                Ok(Value::string(out))
            }
            Expr::Var(name) => match self.lookup_var(frame, name) {
                Some(slot) => Ok(slot.borrow().clone()),
                None => {
                    tracing::trace!(variable = %name, "undefined variable");
                    Ok(Value::Null)
                }
            },
            Expr::Array(items) => self.array_literal(frame, items),
            Expr::Index { index: None, .. } => Err(self.throw_error("Error", "Cannot use [] for reading")),
            Expr::Index { base, index: Some(index) } => {
                let base = self.eval(frame, base)?;
                let key = self.eval(frame, index)?;
                self.index_read(&base, &key)
            }
            Expr::Prop { base, name, nullsafe } => {
                let base = self.eval(frame, base)?;
                if *nullsafe && base.is_null() {
                    return Ok(Value::Null);
                }
                let name = self.prop_name(frame, name)?;
                match base {
                    Value::Object(obj) => {
                        let scope = frame.scope.clone();
                        self.read_property(&obj, &name, scope.as_ref())
                    }
                    other => {
                        tracing::trace!(property = %name, on = %other.type_name(), "property read on non-object");
                        Ok(Value::Null)
                    }
                }
            }
            Expr::ClassConst { class, name } => {
                if name.eq_ignore_ascii_case("class") {
                    if let ClassRef::Named(n) = class {
                        return Ok(Value::from(&*n.primary));
                    }
                    let class = self.resolve_class_ref(frame, class)?;
                    return Ok(Value::from(class.name()));
                }
                let class = self.resolve_class_ref(frame, class)?;
                self.class_constant(&class, name)
            }
            Expr::Const(name) => self.constant(frame, name),
            Expr::Call { name, args } => self.eval_call(frame, name, args),
            Expr::CallValue { callee, args } => {
                let callee = self.eval(frame, callee)?;
                let decl = self.callable_decl(&callee);
                let args = self.eval_args(frame, args, decl.as_ref().map(|d| d.params.as_slice()))?;
                self.call_value(&callee, args)
            }
            Expr::MethodCall { object, name, args, nullsafe } => {
                let target = self.eval(frame, object)?;
                if *nullsafe && target.is_null() {
                    return Ok(Value::Null);
                }
                let name = self.prop_name(frame, name)?;
                let Value::Object(obj) = target else {
                    let message = format!("Call to a member function {name}() on {}", target.type_name());
                    return Err(self.throw_error("Error", &message));
                };
                let decl = Self::method_params(&obj, &name);
                let args = self.eval_args(frame, args, decl.as_ref().map(|d| d.params.as_slice()))?;
                let scope = frame.scope.clone();
                self.call_method(&obj, &name, args, scope.as_ref())
            }
            Expr::StaticCall { class, method, args } => {
                let class = self.resolve_class_ref(frame, class)?;
                self.call_static(frame, &class, method, args)
            }
            Expr::New { class, args } => {
                let class = self.resolve_class_ref(frame, class)?;
                let decl = class.find_method("__construct").and_then(|m| match &m.body {
                    MethodBody::User(func) => Some(func.clone()),
                    MethodBody::Native(_) => None,
                });
                let args = self.eval_args(frame, args, decl.as_ref().map(|d| d.params.as_slice()))?;
                let scope = frame.scope.clone();
                self.instantiate(&class, args, scope.as_ref()).map(Value::Object)
            }
            Expr::Closure { func, uses, is_static } => {
                let mut bound = Vec::with_capacity(uses.len());
                for (name, by_ref) in uses {
                    let slot = if *by_ref {
                        self.var_slot(frame, name)
                    } else {
                        let value = self
                            .lookup_var(frame, name)
                            .map(|s| s.borrow().clone())
                            .unwrap_or_default();
                        new_slot(value)
                    };
                    bound.push((name.clone(), slot));
                }
                Ok(self.make_closure(frame, func, bound, *is_static))
            }
            Expr::ArrowFn(func) => {
                let vars = if frame.global { &self.globals } else { &frame.vars };
                let bound = vars
                    .iter()
                    .map(|(k, v)| (k.clone(), new_slot(v.borrow().clone())))
                    .collect();
                Ok(self.make_closure(frame, func, bound, false))
            }
            Expr::Unary(op, operand) => {
                let value = self.eval(frame, operand)?;
                self.unary(*op, &value)
            }
            Expr::Binary(op, a, b) => {
                let a = self.eval(frame, a)?;
                let b = self.eval(frame, b)?;
                self.binary(*op, a, b)
            }
            Expr::Logical(op, a, b) => {
                let a = self.eval(frame, a)?.to_bool();
                let result = match op {
                    LogicalOp::And => a && self.eval(frame, b)?.to_bool(),
                    LogicalOp::Or => a || self.eval(frame, b)?.to_bool(),
                    LogicalOp::Xor => a ^ self.eval(frame, b)?.to_bool(),
                };
                Ok(Value::Bool(result))
            }
            Expr::Coalesce(a, b) => match self.eval_quiet(frame, a)? {
                Some(v) if !v.is_null() => Ok(v),
                _ => self.eval(frame, b),
            },
            Expr::Ternary { cond, then, otherwise } => {
                let c = self.eval(frame, cond)?;
                if c.to_bool() {
                    match then {
                        Some(then) => self.eval(frame, then),
                        None => Ok(c),
                    }
                } else {
                    self.eval(frame, otherwise)
                }
            }
            Expr::Assign(target, value) => {
                let value = self.eval(frame, value)?;
                self.assign(frame, target, value.clone())?;
                Ok(value)
            }
            Expr::AssignRef(target, source) => self.assign_ref(frame, target, source),
            Expr::CompoundAssign(op, target, value) => {
                let rhs = self.eval(frame, value)?;
                let rhs = if *op == BinOp::Concat {
                    Value::Str(self.to_bytes(&rhs)?)
                } else {
                    rhs
                };
                let op = *op;
                let (_, new) = self.update(frame, target, |old| ops::binary(op, old, &rhs))?;
                Ok(new)
            }
            Expr::CoalesceAssign(target, value) => {
                if let Some(current) = self.eval_quiet(frame, target)?
                    && !current.is_null()
                {
                    return Ok(current);
                }
                let value = self.eval(frame, value)?;
                self.assign(frame, target, value.clone())?;
                Ok(value)
            }
            Expr::IncDec { prefix, increment, target } => {
                let increment = *increment;
                let (old, new) = self.update(frame, target, |v| step(v, increment))?;
                Ok(if *prefix { new } else { old })
            }
            Expr::Isset(items) => {
                for item in items {
                    if !self.isset(frame, item, HasMode::Isset)? {
                        return Ok(Value::Bool(false));
                    }
                }
                Ok(Value::Bool(true))
            }
            Expr::Empty(item) => Ok(Value::Bool(!self.isset(frame, item, HasMode::NotEmpty)?)),
            Expr::Cast(kind, operand) => {
                let value = self.eval(frame, operand)?;
                self.cast(*kind, value)
            }
            Expr::InstanceOf(operand, class) => {
                let value = self.eval(frame, operand)?;
                let Value::Object(obj) = value else {
                    return Ok(Value::Bool(false));
                };
                let result = match class {
                    ClassRef::Named(name) => name.candidates().any(|c| obj.class().is_a(c)),
                    other => {
                        let class = self.resolve_class_ref(frame, other)?;
                        obj.class().is_a(class.name())
                    }
                };
                Ok(Value::Bool(result))
            }
            Expr::Include(kind, path) => {
                let path = self.eval(frame, path)?;
                let path = PathBuf::from(String::from_utf8_lossy(&self.to_bytes(&path)?).into_owned());
                self.include(frame, &path, *kind)
            }
            Expr::Print(operand) => {
                let value = self.eval(frame, operand)?;
                let bytes = self.to_bytes(&value)?;
                self.echo(&bytes)?;
                Ok(Value::Int(1))
            }
            Expr::Exit(status) => {
                let code = match status {
                    None => 0,
                    Some(status) => match self.eval(frame, status)? {
                        Value::Str(message) => {
                            self.echo(&message)?;
                            0
                        }
                        other => other.to_int(),
                    },
                };
                Err(Throw::Exit(code))
            }
            Expr::Match { subject, arms } => self.eval_match(frame, subject, arms),
        }
    }

    fn array_literal(&mut self, frame: &mut Frame, items: &[ArrayItem]) -> Result<Value> {
        let mut data = ArrayData::new();
        for item in items {
            let value = self.eval(frame, &item.value)?;
            match &item.key {
                Some(key) => {
                    let key = self.eval_key(frame, key)?;
                    data.insert(key, value);
                }
                None => {
                    if data.next_free() == i64::MAX {
                        return Err(self.throw_error(
                            "Error",
                            "Cannot add element to the array as the next element is already occupied",
                        ));
                    }
                    data.push(value);
                }
            }
        }
        Ok(Value::array(data))
    }

    fn eval_match(&mut self, frame: &mut Frame, subject: &Expr, arms: &[MatchArm]) -> Result<Value> {
        let subject = self.eval(frame, subject)?;
        let mut default = None;
        for arm in arms {
            match &arm.conditions {
                Some(conditions) => {
                    for condition in conditions {
                        if self.eval(frame, condition)?.strict_eq(&subject) {
                            return self.eval(frame, &arm.body);
                        }
                    }
                }
                None => default = Some(&arm.body),
            }
        }
        match default {
            Some(body) => self.eval(frame, body),
            None => {
                let message = format!("Unhandled match case {}", describe_match_subject(&subject));
                Err(self.throw_error("UnhandledMatchError", &message))
            }
        }
    }

    fn constant(&mut self, frame: &Frame, name: &Name) -> Result<Value> {
        for candidate in name.candidates() {
            if let Some(value) = self.constants.get(candidate) {
                return Ok(value.clone());
            }
            let magic = match candidate {
                "__CLASS__" => Some(frame.scope.as_ref().map_or_else(String::new, |c| c.name().to_string())),
                "__FUNCTION__" => Some(frame.function.rsplit("::").next().unwrap_or_default().to_string()),
                "__METHOD__" => Some(frame.function.to_string()),
                "__FILE__" => Some(
                    self.current_file()
                        .map(|p| p.display().to_string())
                        .unwrap_or_default(),
                ),
                "__DIR__" => Some(
                    self.current_file()
                        .and_then(|p| p.parent())
                        .map(|p| p.display().to_string())
                        .unwrap_or_default(),
                ),
                "__NAMESPACE__" => Some(
                    name.primary
                        .rsplit_once('\\')
                        .map(|(ns, _)| ns.to_string())
                        .unwrap_or_default(),
                ),
                "__LINE__" => return Ok(Value::Int(0)),
                _ => None,
            };
            if let Some(magic) = magic {
                return Ok(Value::from(magic));
            }
        }
        let message = format!("Undefined constant \"{}\"", name.primary);
        Err(self.throw_error("Error", &message))
    }

    /// String conversion, calling `__toString` for objects.
    ///
    /// # Errors
    ///
    /// Objects without a string form, and whatever `__toString` throws.
    pub fn to_bytes(&mut self, value: &Value) -> Result<Bytes> {
        let Value::Object(obj) = value else {
            return Ok(value.to_bytes_lossy());
        };
        if let Some(foreign) = obj.foreign() {
            let result = foreign.call(self, Some("toString"), Vec::new())?;
            return Ok(result.to_bytes_lossy());
        }
        if let Some(hook) = obj.class().hooks.to_string.clone() {
            return match self.invoke_method(obj, &hook, Vec::new())? {
                Value::Str(s) => Ok(s),
                other => {
                    let message = format!(
                        "{}::__toString(): Return value must be of type string, {} returned",
                        obj.class().name(),
                        other.type_name()
                    );
                    Err(self.throw_error("Error", &message))
                }
            };
        }
        let message = format!("Object of class {} could not be converted to string", obj.class().name());
        Err(self.throw_error("Error", &message))
    }

    fn unary(&mut self, op: UnaryOp, value: &Value) -> Result<Value> {
        let result = match op {
            UnaryOp::Not => Ok(Value::Bool(!value.to_bool())),
            UnaryOp::Silence => Ok(value.clone()),
            UnaryOp::Neg => ops::negate(value),
            UnaryOp::Plus => ops::binary(BinOp::Mul, value, &Value::Int(1)),
            UnaryOp::BitNot => match value {
                Value::Int(i) => Ok(Value::Int(!i)),
                Value::Float(_) => Ok(Value::Int(!value.to_int())),
                Value::Str(s) => Ok(Value::string(s.iter().map(|b| !b).collect::<Vec<u8>>())),
                other => Err(OpError::new(
                    "TypeError",
                    format!("Cannot perform bitwise not on {}", other.type_name()),
                )),
            },
        };
        result.map_err(|e| self.op_error(e))
    }

    pub(crate) fn binary(&mut self, op: BinOp, a: Value, b: Value) -> Result<Value> {
        let (a, b) = if op == BinOp::Concat {
            (Value::Str(self.to_bytes(&a)?), Value::Str(self.to_bytes(&b)?))
        } else {
            (a, b)
        };
        ops::binary(op, &a, &b).map_err(|e| self.op_error(e))
    }

    pub(crate) fn index_read(&mut self, base: &Value, key: &Value) -> Result<Value> {
        match base {
            Value::Array(data) => {
                let key = self.key_of(key)?;
                Ok(data.get(&key).cloned().unwrap_or_else(|| {
                    tracing::trace!(key = ?key, "undefined array key");
                    Value::Null
                }))
            }
            Value::Str(s) => match key {
                Value::Int(_) | Value::Float(_) | Value::Bool(_) => Ok(string_offset(s, key.to_int())
                    .map_or_else(|| Value::from(""), |at| Value::string(s.slice(at..=at)))),
                Value::Str(k) if numeric_string(k).is_some() => Ok(string_offset(s, key.to_int())
                    .map_or_else(|| Value::from(""), |at| Value::string(s.slice(at..=at)))),
                other => {
                    let message = format!("Cannot access offset of type {} on string", other.type_name());
                    Err(self.throw_error("TypeError", &message))
                }
            },
            Value::Object(obj) => self.offset_get(obj, key),
            _ => Ok(Value::Null),
        }
    }

    /// Evaluates without notices or autovivification: `None` when a
    /// variable, key or property along the way is missing.
    pub(crate) fn eval_quiet(&mut self, frame: &mut Frame, expr: &Expr) -> Result<Option<Value>> {
        match expr {
            Expr::Var(name) => Ok(self.lookup_var(frame, name).map(|s| s.borrow().clone())),
            Expr::Index { base, index: Some(index) } => {
                let Some(base) = self.eval_quiet(frame, base)? else {
                    return Ok(None);
                };
                let key = self.eval(frame, index)?;
                match base {
                    Value::Array(data) => Ok(ArrayKey::from_value(&key).and_then(|k| data.get(&k).cloned())),
                    Value::Str(s) => {
                        if matches!(key, Value::Array(_) | Value::Object(_)) {
                            return Ok(None);
                        }
                        Ok(string_offset(&s, key.to_int()).map(|at| Value::string(s.slice(at..=at))))
                    }
                    Value::Object(obj) => {
                        if obj.foreign().is_some() {
                            return self.offset_get(&obj, &key).map(Some);
                        }
                        if self.offset_exists(&obj, &key, HasMode::Isset)? {
                            self.offset_get(&obj, &key).map(Some)
                        } else {
                            Ok(None)
                        }
                    }
                    _ => Ok(None),
                }
            }
            Expr::Prop { base, name, .. } => {
                let Some(Value::Object(obj)) = self.eval_quiet(frame, base)? else {
                    return Ok(None);
                };
                let name = self.prop_name(frame, name)?;
                let scope = frame.scope.clone();
                if obj.foreign().is_some() {
                    return self.read_property(&obj, &name, scope.as_ref()).map(Some);
                }
                if let PropertyLookup::Visible(slot) = self.lookup_property(&obj, &name, scope.as_ref()) {
                    return Ok(Some(slot.borrow().clone()));
                }
                if self.property_isset(&obj, &name, HasMode::Isset, scope.as_ref())? {
                    self.read_property(&obj, &name, scope.as_ref()).map(Some)
                } else {
                    Ok(None)
                }
            }
            other => self.eval(frame, other).map(Some),
        }
    }

    /// `isset()` (and `!empty()` with [`HasMode::NotEmpty`]) of one expression.
    fn isset(&mut self, frame: &mut Frame, expr: &Expr, mode: HasMode) -> Result<bool> {
        match expr {
            Expr::Index { base, index: Some(index) } => {
                let Some(base) = self.eval_quiet(frame, base)? else {
                    return Ok(false);
                };
                let key = self.eval(frame, index)?;
                match base {
                    Value::Object(obj) => self.offset_exists(&obj, &key, mode),
                    Value::Array(data) => Ok(ArrayKey::from_value(&key)
                        .and_then(|k| data.get(&k).map(|v| check(v, mode)))
                        .unwrap_or(false)),
                    Value::Str(s) => {
                        if matches!(key, Value::Array(_) | Value::Object(_)) {
                            return Ok(false);
                        }
                        Ok(string_offset(&s, key.to_int())
                            .is_some_and(|at| check(&Value::string(s.slice(at..=at)), mode)))
                    }
                    _ => Ok(false),
                }
            }
            Expr::Prop { base, name, .. } => {
                let Some(Value::Object(obj)) = self.eval_quiet(frame, base)? else {
                    return Ok(false);
                };
                let name = self.prop_name(frame, name)?;
                let scope = frame.scope.clone();
                self.property_isset(&obj, &name, mode, scope.as_ref())
            }
            other => Ok(self.eval_quiet(frame, other)?.is_some_and(|v| check(&v, mode))),
        }
    }

    fn cast(&mut self, kind: CastKind, value: Value) -> Result<Value> {
        Ok(match kind {
            CastKind::Int => Value::Int(value.to_int()),
            CastKind::Float => Value::Float(value.to_float()),
            CastKind::Bool => Value::Bool(value.to_bool()),
            CastKind::Unset => Value::Null,
            CastKind::String => Value::Str(self.to_bytes(&value)?),
            CastKind::Array => match value {
                Value::Array(_) => value,
                Value::Null => Value::empty_array(),
                Value::Object(ref obj) if obj.closure().is_none() && obj.foreign().is_none() => {
                    let data = obj
                        .properties()
                        .iter()
                        .map(|p| (ArrayKey::from_str_key(&p.name), p.slot.borrow().clone()))
                        .collect::<ArrayData>();
                    Value::array(data)
                }
                other => Value::array(ArrayData::from_values([other])),
            },
            CastKind::Object => match value {
                Value::Object(_) => value,
                Value::Array(data) => {
                    let obj = self.std_object();
                    for (k, v) in data.iter() {
                        obj.raw_set(&String::from_utf8_lossy(&k.to_bytes()), v.clone());
                    }
                    Value::Object(obj)
                }
                Value::Null => Value::Object(self.std_object()),
                other => {
                    let obj = self.std_object();
                    obj.raw_set("scalar", other);
                    Value::Object(obj)
                }
            },
        })
    }

    pub(crate) fn std_object(&mut self) -> ObjRef {
        let class = self
            .class("stdClass")
            .unwrap_or_else(crate::builtins::classes::foreign_class);
        self.alloc_object(class, Vec::new(), Native::None)
    }

    /// Calls `$callable(...$args)` from native code.
    ///
    /// # Errors
    ///
    /// As [`Interpreter::call_value`].
    pub fn call(&mut self, callable: &Value, args: Vec<Value>) -> Result<Value> {
        self.call_value(callable, args.into_iter().map(Arg::Val).collect())
    }
}
