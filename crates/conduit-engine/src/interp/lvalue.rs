use std::{collections::HashMap, rc::Rc};

use super::{Arg, Frame, Interpreter, PropertyLookup};
use crate::{
    array::{ArrayData, ArrayKey},
    ast::{ArrayItem, Expr, PropName},
    error::{Result, Throw},
    object::ObjRef,
    ops::OpError,
    sapi::HasMode,
    value::{Slot, Value, new_slot},
};

/// Where an assignment path starts and the array keys below it
/// (`None` is `[]`, append).
struct Path {
    root: Slot,
    keys: Vec<Option<ArrayKey>>,
}

impl Interpreter {
    fn vars_mut<'a>(&'a mut self, frame: &'a mut Frame) -> &'a mut HashMap<Rc<str>, Slot> {
        if frame.global {
            &mut self.globals
        } else {
            &mut frame.vars
        }
    }

    /// Existing variable slot; never creates one.
    pub(crate) fn lookup_var(&self, frame: &Frame, name: &str) -> Option<Slot> {
        if name == "this" {
            return frame.this.clone().map(|this| new_slot(Value::Object(this)));
        }
        if let Some(slot) = self.superglobals.get(name) {
            return Some(slot.clone());
        }
        if name == "GLOBALS" {
            let globals = self
                .globals
                .iter()
                .map(|(k, v)| (ArrayKey::from_str_key(k), v.borrow().clone()))
                .collect::<ArrayData>();
            return Some(new_slot(Value::array(globals)));
        }
        if frame.global {
            self.globals.get(name).cloned()
        } else {
            frame.vars.get(name).cloned()
        }
    }

    pub(crate) fn var_slot(&mut self, frame: &mut Frame, name: &Rc<str>) -> Slot {
        if let Some(slot) = self.superglobals.get(name) {
            return slot.clone();
        }
        self.vars_mut(frame)
            .entry(name.clone())
            .or_insert_with(|| new_slot(Value::Null))
            .clone()
    }

    pub(crate) fn bind_var(&mut self, frame: &mut Frame, name: Rc<str>, slot: Slot) {
        self.vars_mut(frame).insert(name, slot);
    }

    pub(crate) fn op_error(&mut self, err: OpError) -> Throw {
        self.throw_error(err.class, &err.message)
    }

    pub(crate) fn prop_name(&mut self, frame: &mut Frame, name: &PropName) -> Result<Rc<str>> {
        match name {
            PropName::Ident(name) => Ok(name.clone()),
            PropName::Dynamic(expr) => {
                let value = self.eval(frame, expr)?;
                Ok(String::from_utf8_lossy(&self.to_bytes(&value)?).into())
            }
        }
    }

    pub(crate) fn eval_key(&mut self, frame: &mut Frame, expr: &Expr) -> Result<ArrayKey> {
        let value = self.eval(frame, expr)?;
        self.key_of(&value)
    }

    pub(crate) fn key_of(&mut self, value: &Value) -> Result<ArrayKey> {
        ArrayKey::from_value(value).ok_or_else(|| {
            let message = format!("Cannot access offset of type {} on array", value.type_name());
            self.throw_error("TypeError", &message)
        })
    }

    /// The object an assignment to `base->prop` targets.
    fn object_of(&mut self, frame: &mut Frame, base: &Expr) -> Result<ObjRef> {
        match self.eval(frame, base)? {
            Value::Object(obj) => Ok(obj),
            other => {
                let message = format!("Attempt to assign property on {}", other.type_name());
                Err(self.throw_error("Error", &message))
            }
        }
    }

    /// Whether re-evaluating `expr` has no side effects.
    fn is_pure(expr: &Expr) -> bool {
        match expr {
            Expr::Var(_) | Expr::Lit(_) | Expr::Const(_) | Expr::ClassConst { .. } => true,
            Expr::Prop { base, name: PropName::Ident(_), .. } => Self::is_pure(base),
            Expr::Index { base, index } => {
                Self::is_pure(base) && index.as_deref().is_none_or(Self::is_pure)
            }
            _ => false,
        }
    }

    /// The object held at `expr`, if any, without creating anything.
    fn peek_object(&mut self, frame: &mut Frame, expr: &Expr) -> Result<Option<ObjRef>> {
        if !Self::is_pure(expr) {
            return Ok(None);
        }
        let value = match expr {
            Expr::Var(name) => self.lookup_var(frame, name).map(|s| s.borrow().clone()),
            _ => self.eval_quiet(frame, expr)?,
        };
        Ok(match value {
            Some(Value::Object(obj)) => Some(obj),
            _ => None,
        })
    }

    fn path(&mut self, frame: &mut Frame, target: &Expr, create: bool) -> Result<Option<Path>> {
        match target {
            Expr::Var(name) => {
                if name.as_ref() == "this" {
                    return Err(self.throw_error("Error", "Cannot re-assign $this"));
                }
                let root = if create {
                    Some(self.var_slot(frame, name))
                } else {
                    self.lookup_var(frame, name)
                };
                Ok(root.map(|root| Path { root, keys: Vec::new() }))
            }
            Expr::Prop { base, name, .. } => {
                let obj = self.object_of(frame, base)?;
                let name = self.prop_name(frame, name)?;
                if obj.foreign().is_none() {
                    match self.lookup_property(&obj, &name, frame.scope.as_ref()) {
                        PropertyLookup::Visible(root) => return Ok(Some(Path { root, keys: Vec::new() })),
                        PropertyLookup::Missing if create && obj.class().hooks.get.is_none() => {
                            let root = new_slot(Value::Null);
                            let declaring = obj.class().name.clone();
                            obj.add_property(name, crate::ast::Visibility::Public, declaring, root.clone());
                            return Ok(Some(Path { root, keys: Vec::new() }));
                        }
                        _ => {}
                    }
                }
                // Overloaded: work on a copy, the change does not stick.
                let value = self.read_property(&obj, &name, frame.scope.as_ref())?;
                Ok(Some(Path {
                    root: new_slot(value),
                    keys: Vec::new(),
                }))
            }
            Expr::Index { base, index } => {
                let key = match index {
                    Some(index) => Some(self.eval_key(frame, index)?),
                    None => None,
                };
                let Some(mut path) = self.path(frame, base, create)? else {
                    return Ok(None);
                };
                path.keys.push(key);
                Ok(Some(path))
            }
            other => {
                let value = self.eval(frame, other)?;
                Ok(Some(Path {
                    root: new_slot(value),
                    keys: Vec::new(),
                }))
            }
        }
    }

    /// Applies `f` to the storage `target` names, creating intermediate
    /// arrays as needed.
    pub(crate) fn modify<R>(
        &mut self,
        frame: &mut Frame,
        target: &Expr,
        f: impl FnOnce(&mut Value) -> Result<R, OpError>,
    ) -> Result<R> {
        let Some(path) = self.path(frame, target, true)? else {
            return Err(self.throw_error("Error", "Cannot assign to this expression"));
        };
        let result = walk(&mut path.root.borrow_mut(), &path.keys, true, f);
        match result {
            Ok(Some(r)) => Ok(r),
            Ok(None) => Err(self.throw_error("Error", "Cannot assign to this expression")),
            Err(err) => Err(self.op_error(err)),
        }
    }

    /// `target = value`.
    pub(crate) fn assign(&mut self, frame: &mut Frame, target: &Expr, value: Value) -> Result<()> {
        match target {
            Expr::Prop { base, name, .. } => {
                let obj = self.object_of(frame, base)?;
                let name = self.prop_name(frame, name)?;
                let scope = frame.scope.clone();
                self.write_property(&obj, &name, value, scope.as_ref())
            }
            Expr::Index { base, index } => {
                if let Some(obj) = self.peek_object(frame, base)? {
                    let key = match index {
                        Some(index) => Some(self.eval(frame, index)?),
                        None => None,
                    };
                    return self.offset_set(&obj, key, value);
                }
                self.modify(frame, target, |slot| {
                    *slot = value;
                    Ok(())
                })
            }
            Expr::Array(items) => self.destructure(frame, items, &value),
            _ => self.modify(frame, target, |slot| {
                *slot = value;
                Ok(())
            }),
        }
    }

    fn destructure(&mut self, frame: &mut Frame, items: &[ArrayItem], value: &Value) -> Result<()> {
        let Value::Array(source) = value else {
            return Ok(());
        };
        let mut position = 0;
        for item in items {
            let key = match &item.key {
                Some(key) => self.eval_key(frame, key)?,
                None => {
                    position += 1;
                    ArrayKey::Int(position - 1)
                }
            };
            let element = source.get(&key).cloned().unwrap_or_default();
            self.assign(frame, &item.value, element)?;
        }
        Ok(())
    }

    /// Read, transform, write back; used by compound assignment and `++`.
    /// Returns `(old, new)`.
    pub(crate) fn update(
        &mut self,
        frame: &mut Frame,
        target: &Expr,
        f: impl FnOnce(&Value) -> Result<Value, OpError>,
    ) -> Result<(Value, Value)> {
        let overloaded = match target {
            Expr::Prop { .. } => true,
            Expr::Index { base, .. } => self.peek_object(frame, base)?.is_some(),
            _ => false,
        };
        if overloaded {
            let old = self.eval(frame, target)?;
            let new = f(&old).map_err(|e| self.op_error(e))?;
            self.assign(frame, target, new.clone())?;
            return Ok((old, new));
        }
        self.modify(frame, target, |slot| {
            let old = std::mem::take(slot);
            match f(&old) {
                Ok(new) => {
                    *slot = new.clone();
                    Ok((old, new))
                }
                Err(err) => {
                    *slot = old;
                    Err(err)
                }
            }
        })
    }

    /// Storage slot for a by-reference binding. Array elements cannot be
    /// aliased, so they bind to a copy.
    pub(crate) fn slot_of(&mut self, frame: &mut Frame, expr: &Expr) -> Result<Slot> {
        match expr {
            Expr::Var(name) if name.as_ref() != "this" => Ok(self.var_slot(frame, name)),
            Expr::Prop { .. } => match self.path(frame, expr, true)? {
                Some(path) => Ok(path.root),
                None => Ok(new_slot(Value::Null)),
            },
            other => Ok(new_slot(self.eval(frame, other)?)),
        }
    }

    /// `target =& source`.
    pub(crate) fn assign_ref(&mut self, frame: &mut Frame, target: &Expr, source: &Expr) -> Result<Value> {
        let slot = self.slot_of(frame, source)?;
        let value = slot.borrow().clone();
        match target {
            Expr::Var(name) => self.bind_var(frame, name.clone(), slot),
            Expr::Prop { base, name, .. } => {
                let obj = self.object_of(frame, base)?;
                let name = self.prop_name(frame, name)?;
                if !obj.bind_property(&name, slot.clone()) {
                    let declaring = obj.class().name.clone();
                    obj.add_property(name, crate::ast::Visibility::Public, declaring, slot);
                }
            }
            other => self.assign(frame, other, value.clone())?,
        }
        Ok(value)
    }

    pub(crate) fn unset(&mut self, frame: &mut Frame, target: &Expr) -> Result<()> {
        match target {
            Expr::Var(name) => {
                self.vars_mut(frame).remove(name);
                Ok(())
            }
            Expr::Prop { base, name, .. } => {
                let Some(Value::Object(obj)) = self.eval_quiet(frame, base)? else {
                    return Ok(());
                };
                let name = self.prop_name(frame, name)?;
                let scope = frame.scope.clone();
                self.unset_property(&obj, &name, scope.as_ref())
            }
            Expr::Index { base, index: Some(index) } => {
                if let Some(obj) = self.peek_object(frame, base)? {
                    let key = self.eval(frame, index)?;
                    return self.offset_unset(&obj, &key);
                }
                let key = self.eval_key(frame, index)?;
                let Some(path) = self.path(frame, base, false)? else {
                    return Ok(());
                };
                let result = walk(&mut path.root.borrow_mut(), &path.keys, false, |container| {
                    if let Value::Array(data) = container {
                        Rc::make_mut(data).remove(&key);
                    }
                    Ok(())
                });
                result.map(drop).map_err(|e| self.op_error(e))
            }
            _ => Ok(()),
        }
    }

    pub(crate) fn offset_get(&mut self, obj: &ObjRef, key: &Value) -> Result<Value> {
        if let Some(foreign) = obj.foreign() {
            let name = String::from_utf8_lossy(&key.to_bytes_lossy()).into_owned();
            return foreign.get(self, &name);
        }
        if obj.class().find_method("offsetGet").is_some() {
            return self.call_method(obj, "offsetGet", vec![Arg::Val(key.clone())], None);
        }
        Err(self.not_an_array(obj))
    }

    pub(crate) fn offset_set(&mut self, obj: &ObjRef, key: Option<Value>, value: Value) -> Result<()> {
        if let Some(foreign) = obj.foreign() {
            return match key {
                Some(key) => {
                    let name = String::from_utf8_lossy(&key.to_bytes_lossy()).into_owned();
                    foreign.set(self, &name, value)
                }
                None => foreign.call(self, Some("push"), vec![value]).map(drop),
            };
        }
        if obj.class().find_method("offsetSet").is_some() {
            let args = vec![Arg::Val(key.unwrap_or_default()), Arg::Val(value)];
            return self.call_method(obj, "offsetSet", args, None).map(drop);
        }
        Err(self.not_an_array(obj))
    }

    pub(crate) fn offset_exists(&mut self, obj: &ObjRef, key: &Value, mode: HasMode) -> Result<bool> {
        if let Some(foreign) = obj.foreign() {
            let name = String::from_utf8_lossy(&key.to_bytes_lossy()).into_owned();
            return foreign.has(self, &name, mode);
        }
        if obj.class().find_method("offsetExists").is_some() {
            let exists = self
                .call_method(obj, "offsetExists", vec![Arg::Val(key.clone())], None)?
                .to_bool();
            if !exists || mode == HasMode::Exists {
                return Ok(exists);
            }
            let value = self.offset_get(obj, key)?;
            return Ok(match mode {
                HasMode::NotEmpty => value.to_bool(),
                _ => !value.is_null(),
            });
        }
        Err(self.not_an_array(obj))
    }

    pub(crate) fn offset_unset(&mut self, obj: &ObjRef, key: &Value) -> Result<()> {
        if let Some(foreign) = obj.foreign() {
            let name = String::from_utf8_lossy(&key.to_bytes_lossy()).into_owned();
            return foreign.unset(self, &name);
        }
        if obj.class().find_method("offsetUnset").is_some() {
            return self
                .call_method(obj, "offsetUnset", vec![Arg::Val(key.clone())], None)
                .map(drop);
        }
        Err(self.not_an_array(obj))
    }

    fn not_an_array(&mut self, obj: &ObjRef) -> Throw {
        let message = format!("Cannot use object of type {} as array", obj.class().name());
        self.throw_error("Error", &message)
    }
}

/// Descends `keys` below `value` and applies `f` at the end. With
/// `create`, missing levels become arrays; without, a missing level
/// yields `Ok(None)`.
fn walk<R>(
    value: &mut Value,
    keys: &[Option<ArrayKey>],
    create: bool,
    f: impl FnOnce(&mut Value) -> Result<R, OpError>,
) -> Result<Option<R>, OpError> {
    let Some((key, rest)) = keys.split_first() else {
        return f(value).map(Some);
    };
    if create && matches!(value, Value::Null | Value::Bool(false)) {
        *value = Value::empty_array();
    }
    match value {
        Value::Array(data) => {
            let data = Rc::make_mut(data);
            match key {
                Some(key) if create => walk(data.entry(key.clone()), rest, create, f),
                Some(key) => match data.get_mut(key) {
                    Some(inner) => walk(inner, rest, create, f),
                    None => Ok(None),
                },
                None if create => {
                    if data.next_free() == i64::MAX {
                        return Err(OpError::error(
                            "Cannot add element to the array as the next element is already occupied",
                        ));
                    }
                    walk(data.push_slot(), rest, create, f)
                }
                None => Ok(None),
            }
        }
        Value::Str(s) if rest.is_empty() => {
            let Some(ArrayKey::Int(offset)) = key else {
                return Err(OpError::error("[] operator not supported for strings"));
            };
            let len = i64::try_from(s.len()).unwrap_or(i64::MAX);
            let at = if *offset < 0 { len + offset } else { *offset };
            if at < 0 {
                return Err(OpError::error(format!("Illegal string offset {offset}")));
            }
            let at = usize::try_from(at).unwrap_or(usize::MAX);
            let mut current = Value::string(s.get(at..=at).map(<[u8]>::to_vec).unwrap_or_default());
            let result = f(&mut current)?;
            let replacement = current.to_bytes_lossy();
            let mut bytes = s.to_vec();
            if bytes.len() <= at {
                bytes.resize(at + 1, b' ');
            }
            bytes[at] = replacement.first().copied().unwrap_or(b' ');
            *value = Value::string(bytes);
            Ok(Some(result))
        }
        Value::Str(_) => Err(OpError::error("Cannot use string offset as an array")),
        Value::Object(obj) => Err(OpError::error(format!(
            "Cannot use object of type {} as array",
            obj.class().name()
        ))),
        Value::Null | Value::Bool(false) => Ok(None),
        _ => Err(OpError::error("Cannot use a scalar value as an array")),
    }
}
