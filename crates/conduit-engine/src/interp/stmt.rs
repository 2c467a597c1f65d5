use std::rc::Rc;

use super::{Flow, Frame, Interpreter, PropertyLookup};
use crate::{
    array::ArrayKey,
    ast::{Catch, Expr, Literal, Stmt},
    error::{Result, Throw},
    object::ObjRef,
    value::{Value, new_slot},
};

/// What a loop body asked for.
enum LoopControl {
    Next,
    Exit,
    Propagate(Flow),
}

fn loop_control(flow: Flow) -> LoopControl {
    match flow {
        Flow::Normal | Flow::Continue(1) => LoopControl::Next,
        Flow::Break(1) => LoopControl::Exit,
        Flow::Break(n) => LoopControl::Propagate(Flow::Break(n - 1)),
        Flow::Continue(n) => LoopControl::Propagate(Flow::Continue(n - 1)),
        Flow::Return(v) => LoopControl::Propagate(Flow::Return(v)),
    }
}

impl Interpreter {
    pub(crate) fn exec_block(&mut self, frame: &mut Frame, stmts: &[Stmt]) -> Result<Flow> {
        for stmt in stmts {
            match self.exec(frame, stmt)? {
                Flow::Normal => {}
                other => return Ok(other),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&mut self, frame: &mut Frame, stmt: &Stmt) -> Result<Flow> {
        match stmt {
            Stmt::Expr(expr) => {
                self.eval(frame, expr)?;
            }
            Stmt::Echo(items) => {
                for item in items {
                    let value = self.eval(frame, item)?;
                    let bytes = self.to_bytes(&value)?;
                    self.echo(&bytes)?;
                }
            }
            Stmt::InlineHtml(html) => self.echo(html)?,
            Stmt::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(frame, expr)?,
                    None => Value::Null,
                };
                return Ok(Flow::Return(value));
            }
            Stmt::If { cond, then, otherwise } => {
                if self.eval(frame, cond)?.to_bool() {
                    return self.exec_block(frame, then);
                }
                if let Some(otherwise) = otherwise {
                    return self.exec_block(frame, otherwise);
                }
            }
            Stmt::While { cond, body } => {
                while self.eval(frame, cond)?.to_bool() {
                    match loop_control(self.exec_block(frame, body)?) {
                        LoopControl::Next => {}
                        LoopControl::Exit => break,
                        LoopControl::Propagate(flow) => return Ok(flow),
                    }
                }
            }
            Stmt::DoWhile { body, cond } => loop {
                match loop_control(self.exec_block(frame, body)?) {
                    LoopControl::Next => {}
                    LoopControl::Exit => break,
                    LoopControl::Propagate(flow) => return Ok(flow),
                }
                if !self.eval(frame, cond)?.to_bool() {
                    break;
                }
            },
            Stmt::For { init, cond, step, body } => {
                for expr in init {
                    self.eval(frame, expr)?;
                }
                loop {
                    let mut proceed = true;
                    for expr in cond {
                        proceed = self.eval(frame, expr)?.to_bool();
                    }
                    if !proceed {
                        break;
                    }
                    match loop_control(self.exec_block(frame, body)?) {
                        LoopControl::Next => {}
                        LoopControl::Exit => break,
                        LoopControl::Propagate(flow) => return Ok(flow),
                    }
                    for expr in step {
                        self.eval(frame, expr)?;
                    }
                }
            }
            Stmt::Foreach { subject, key, value, by_ref, body } => {
                return self.foreach(frame, subject, key.as_ref(), value, *by_ref, body);
            }
            Stmt::Switch { subject, cases } => {
                let subject = self.eval(frame, subject)?;
                let mut matched = None;
                for (i, (test, _)) in cases.iter().enumerate() {
                    if let Some(test) = test
                        && self.eval(frame, test)?.loose_eq(&subject)
                    {
                        matched = Some(i);
                        break;
                    }
                }
                let start = matched.or_else(|| cases.iter().position(|(test, _)| test.is_none()));
                if let Some(start) = start {
                    for (_, body) in &cases[start..] {
                        match self.exec_block(frame, body)? {
                            Flow::Normal => {}
                            Flow::Break(1) | Flow::Continue(1) => break,
                            Flow::Break(n) => return Ok(Flow::Break(n - 1)),
                            Flow::Continue(n) => return Ok(Flow::Continue(n - 1)),
                            flow @ Flow::Return(_) => return Ok(flow),
                        }
                    }
                }
            }
            Stmt::Break(n) => return Ok(Flow::Break((*n).max(1))),
            Stmt::Continue(n) => return Ok(Flow::Continue((*n).max(1))),
            Stmt::Try { body, catches, finally } => return self.exec_try(frame, body, catches, finally.as_deref()),
            Stmt::Throw(expr) => {
                let value = self.eval(frame, expr)?;
                return match value {
                    Value::Object(obj) if obj.class().is_a("Throwable") => Err(Throw::Exception(obj)),
                    _ => Err(self.throw_error("Error", "Can only throw objects")),
                };
            }
            Stmt::Function(func) => {
                if !self.already_declared(func) {
                    let key = func.name.to_ascii_lowercase();
                    if self.functions.contains_key(&key) {
                        let message = format!("Cannot redeclare {}()", func.name);
                        return Err(self.throw_error("Error", &message));
                    }
                    self.functions.insert(key, func.clone());
                    self.mark_declared(func.clone());
                }
            }
            Stmt::Class(decl) => {
                if !self.already_declared(decl) {
                    self.declare_class(decl)?;
                    self.mark_declared(decl.clone());
                }
            }
            Stmt::Unset(targets) => {
                for target in targets {
                    self.unset(frame, target)?;
                }
            }
            Stmt::Global(names) => {
                for name in names {
                    let slot = self.global_slot(name);
                    self.bind_var(frame, name.clone(), slot);
                }
            }
            Stmt::Const(items) => {
                for (name, expr) in items {
                    let value = self.eval(frame, expr)?;
                    self.define_constant(name, value)?;
                }
            }
            Stmt::Block(stmts) => return self.exec_block(frame, stmts),
            Stmt::Nop => {}
        }
        Ok(Flow::Normal)
    }

    pub(crate) fn define_constant(&mut self, name: &str, value: Value) -> Result<bool> {
        if self.constants.contains_key(name) {
            tracing::debug!(constant = name, "constant already defined");
            return Ok(false);
        }
        self.constants.insert(name.to_string(), value);
        Ok(true)
    }

    fn exec_try(
        &mut self,
        frame: &mut Frame,
        body: &[Stmt],
        catches: &[Catch],
        finally: Option<&[Stmt]>,
    ) -> Result<Flow> {
        let result = match self.exec_block(frame, body) {
            Err(Throw::Exception(obj)) => match Self::find_catch(catches, &obj) {
                Some(catch) => {
                    if let Some(var) = &catch.var {
                        self.bind_var(frame, var.clone(), new_slot(Value::Object(obj)));
                    }
                    self.exec_block(frame, &catch.body)
                }
                None => Err(Throw::Exception(obj)),
            },
            other => other,
        };
        let Some(finally) = finally else {
            return result;
        };
        match self.exec_block(frame, finally)? {
            Flow::Normal => result,
            overriding => Ok(overriding),
        }
    }

    fn find_catch<'a>(catches: &'a [Catch], obj: &ObjRef) -> Option<&'a Catch> {
        catches.iter().find(|c| {
            c.types
                .iter()
                .any(|name| name.candidates().any(|n| obj.class().is_a(n)))
        })
    }

    fn foreach(
        &mut self,
        frame: &mut Frame,
        subject: &Expr,
        key_target: Option<&Expr>,
        value_target: &Expr,
        by_ref: bool,
        body: &[Stmt],
    ) -> Result<Flow> {
        let entries: Vec<(Value, Value)> = match self.eval(frame, subject)? {
            Value::Array(data) => data.iter().map(|(k, v)| (k.to_value(), v.clone())).collect(),
            Value::Object(obj) => self.object_entries(frame, &obj)?,
            other => {
                tracing::trace!(on = %other.type_name(), "foreach over non-iterable");
                return Ok(Flow::Normal);
            }
        };

        for (key, value) in entries {
            if let Some(target) = key_target {
                self.assign(frame, target, key.clone())?;
            }
            let slot = if by_ref {
                let slot = new_slot(value);
                if let Expr::Var(name) = value_target {
                    self.bind_var(frame, name.clone(), slot.clone());
                }
                Some(slot)
            } else {
                self.assign(frame, value_target, value)?;
                None
            };
            let flow = self.exec_block(frame, body)?;
            if let Some(slot) = slot
                && subject.is_lvalue()
            {
                let updated = slot.borrow().clone();
                let element = Expr::Index {
                    base: Box::new(subject.clone()),
                    index: Some(Box::new(Expr::Lit(match key {
                        Value::Int(i) => Literal::Int(i),
                        other => Literal::Str(other.to_bytes_lossy()),
                    }))),
                };
                self.assign(frame, &element, updated)?;
            }
            match loop_control(flow) {
                LoopControl::Next => {}
                LoopControl::Exit => break,
                LoopControl::Propagate(flow) => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    /// Iteration entries of an object: `IteratorAggregate`, foreign
    /// values (by their keys), or accessible properties.
    fn object_entries(&mut self, frame: &mut Frame, obj: &ObjRef) -> Result<Vec<(Value, Value)>> {
        if obj.class().is_a("IteratorAggregate") {
            let scope = frame.scope.clone();
            let inner = self.call_method(obj, "getIterator", Vec::new(), scope.as_ref())?;
            return match inner {
                Value::Array(data) => Ok(data.iter().map(|(k, v)| (k.to_value(), v.clone())).collect()),
                Value::Object(inner) if !Rc::ptr_eq(&inner, obj) => self.object_entries(frame, &inner),
                _ => Ok(Vec::new()),
            };
        }
        if let Some(foreign) = obj.foreign() {
            let keys = foreign.call(self, Some("keys"), Vec::new())?;
            let mut entries = Vec::new();
            if let Value::Array(keys) = keys {
                for key in keys.values() {
                    let name = String::from_utf8_lossy(&key.to_bytes_lossy()).into_owned();
                    let value = foreign.get(self, &name)?;
                    entries.push((ArrayKey::from_str_key(&name).to_value(), value));
                }
            }
            return Ok(entries);
        }
        let names: Vec<Rc<str>> = obj.properties().iter().map(|p| p.name.clone()).collect();
        let mut entries = Vec::with_capacity(names.len());
        for name in names {
            if let PropertyLookup::Visible(slot) = self.lookup_property(obj, &name, frame.scope.as_ref()) {
                entries.push((Value::from(&*name), slot.borrow().clone()));
            }
        }
        Ok(entries)
    }
}
