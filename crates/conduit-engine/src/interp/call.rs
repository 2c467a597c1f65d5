use std::rc::Rc;

use super::{Flow, Frame, Interpreter, class::{scope_name, visibility_name}};
use crate::{
    array::ArrayData,
    ast::{Expr, FuncDecl, Name, Param},
    builtins,
    error::Result,
    object::{Class, Closure, Method, MethodBody, Native, ObjRef},
    value::{Slot, Value, new_slot},
};

/// An evaluated call argument.
#[derive(Debug, Clone)]
pub enum Arg {
    Val(Value),
    /// Bound to a by-reference parameter.
    Ref(Slot),
}

impl Arg {
    #[must_use]
    pub fn value(&self) -> Value {
        match self {
            Self::Val(v) => v.clone(),
            Self::Ref(slot) => slot.borrow().clone(),
        }
    }

    fn into_slot(self) -> Slot {
        match self {
            Self::Val(v) => new_slot(v),
            Self::Ref(slot) => slot,
        }
    }
}

#[derive(Default)]
pub(crate) struct CallContext {
    pub(crate) this: Option<ObjRef>,
    pub(crate) scope: Option<Rc<Class>>,
    pub(crate) static_scope: Option<Rc<Class>>,
    pub(crate) bound: Vec<(Rc<str>, Slot)>,
    /// Name used in diagnostics, e.g. `Foo::bar`.
    pub(crate) display: Option<Rc<str>>,
}

fn param_at(params: &[Param], i: usize) -> Option<&Param> {
    params.get(i).or_else(|| params.last().filter(|p| p.variadic))
}

impl Interpreter {
    pub(crate) fn eval_args(
        &mut self,
        frame: &mut Frame,
        args: &[Expr],
        params: Option<&[Param]>,
    ) -> Result<Vec<Arg>> {
        let mut out = Vec::with_capacity(args.len());
        for (i, arg) in args.iter().enumerate() {
            let by_ref = params.and_then(|ps| param_at(ps, i)).is_some_and(|p| p.by_ref);
            if by_ref && arg.is_lvalue() {
                out.push(Arg::Ref(self.slot_of(frame, arg)?));
            } else {
                out.push(Arg::Val(self.eval(frame, arg)?));
            }
        }
        Ok(out)
    }

    pub(crate) fn call_user_function(
        &mut self,
        func: &Rc<FuncDecl>,
        args: Vec<Arg>,
        ctx: CallContext,
    ) -> Result<Value> {
        let display = ctx.display.clone().unwrap_or_else(|| func.name.clone());
        let mut frame = Frame::function(display.clone(), &ctx);
        frame.args = args.iter().map(Arg::value).collect();
        for (name, slot) in ctx.bound {
            frame.vars.insert(name, slot);
        }

        let required = func
            .params
            .iter()
            .filter(|p| p.default.is_none() && !p.variadic)
            .count();
        if args.len() < required {
            let exact = required == func.params.len();
            let message = format!(
                "Too few arguments to function {display}(), {} passed and {} {required} expected",
                args.len(),
                if exact { "exactly" } else { "at least" }
            );
            return Err(self.throw_error("ArgumentCountError", &message));
        }

        let mut args = args.into_iter();
        for param in &func.params {
            if param.variadic {
                let rest = ArrayData::from_values(args.by_ref().map(|a| a.value()));
                frame.vars.insert(param.name.clone(), new_slot(Value::array(rest)));
                break;
            }
            let slot = match args.next() {
                Some(arg) if param.by_ref => arg.into_slot(),
                Some(arg) => new_slot(arg.value()),
                None => {
                    let default = match &param.default {
                        Some(expr) => self.eval(&mut frame, expr)?,
                        None => Value::Null,
                    };
                    new_slot(default)
                }
            };
            if param.promote.is_some()
                && let Some(this) = &frame.this
            {
                this.raw_set(&param.name, slot.borrow().clone());
            }
            frame.vars.insert(param.name.clone(), slot);
        }

        self.enter_call()?;
        let flow = self.exec_block(&mut frame, &func.body);
        self.leave_call();
        match flow? {
            Flow::Return(v) => Ok(v),
            _ => Ok(Value::Null),
        }
    }

    /// Runs a method with `obj` as `$this` (ignored for static methods).
    ///
    /// # Errors
    ///
    /// Abstract methods and whatever the body throws.
    pub fn invoke_method(&mut self, obj: &ObjRef, method: &Rc<Method>, args: Vec<Arg>) -> Result<Value> {
        match &method.body {
            MethodBody::Native(f) => f(self, obj, args.iter().map(Arg::value).collect()),
            MethodBody::User(_) if method.is_abstract => {
                let message = format!("Cannot call abstract method {}::{}()", method.declaring, method.name);
                Err(self.throw_error("Error", &message))
            }
            MethodBody::User(func) => {
                let ctx = CallContext {
                    this: (!method.is_static).then(|| obj.clone()),
                    scope: self.class(&method.declaring),
                    static_scope: Some(obj.class().clone()),
                    bound: Vec::new(),
                    display: Some(format!("{}::{}", method.declaring, method.name).into()),
                };
                self.call_user_function(func, args, ctx)
            }
        }
    }

    fn invoke_static(
        &mut self,
        class: &Rc<Class>,
        method: &Rc<Method>,
        args: Vec<Arg>,
        this: Option<ObjRef>,
    ) -> Result<Value> {
        match &method.body {
            MethodBody::Native(f) => {
                let target = match this {
                    Some(this) => this,
                    None => self.new_instance(class)?,
                };
                f(self, &target, args.iter().map(Arg::value).collect())
            }
            MethodBody::User(func) => {
                let ctx = CallContext {
                    this: if method.is_static { None } else { this },
                    scope: self.class(&method.declaring),
                    static_scope: Some(class.clone()),
                    bound: Vec::new(),
                    display: Some(format!("{}::{}", method.declaring, method.name).into()),
                };
                self.call_user_function(func, args, ctx)
            }
        }
    }

    /// `Class::method(...)` from the given frame; `parent::`/`self::` calls
    /// keep `$this`.
    pub(crate) fn call_static(
        &mut self,
        frame: &mut Frame,
        class: &Rc<Class>,
        name: &str,
        args: &[Expr],
    ) -> Result<Value> {
        let this = frame
            .this
            .clone()
            .filter(|t| t.class().is_a(class.name()));
        let Some(method) = class.find_method(name).cloned() else {
            if let Some(this) = &this
                && let Some(hook) = class.hooks.call.clone()
            {
                let values = self.eval_args(frame, args, None)?;
                return self.call_magic(this, &hook, name, values);
            }
            let message = format!("Call to undefined method {}::{name}()", class.name());
            return Err(self.throw_error("Error", &message));
        };
        if !self.can_access(method.visibility, &method.declaring, frame.scope.as_ref()) {
            return Err(self.method_access_error(class, &method, frame.scope.as_ref()));
        }
        if !method.is_static && this.is_none() {
            let message = format!(
                "Non-static method {}::{}() cannot be called statically",
                method.declaring, method.name
            );
            return Err(self.throw_error("Error", &message));
        }
        let args = self.eval_args(frame, args, method.params())?;
        self.invoke_static(class, &method, args, this)
    }

    fn call_magic(&mut self, obj: &ObjRef, hook: &Rc<Method>, name: &str, args: Vec<Arg>) -> Result<Value> {
        let list = ArrayData::from_values(args.iter().map(Arg::value));
        self.invoke_method(
            obj,
            hook,
            vec![Arg::Val(Value::from(name)), Arg::Val(Value::array(list))],
        )
    }

    fn method_access_error(&mut self, class: &Rc<Class>, method: &Method, scope: Option<&Rc<Class>>) -> crate::Throw {
        let message = format!(
            "Call to {} method {}::{}() from {}",
            visibility_name(method.visibility),
            class.name(),
            method.name,
            scope_name(scope)
        );
        self.throw_error("Error", &message)
    }

    /// Parameters of the method `$obj->name()` would run, if known statically.
    pub(crate) fn method_params(obj: &ObjRef, name: &str) -> Option<Rc<FuncDecl>> {
        if let Some(closure) = obj.closure()
            && (name.eq_ignore_ascii_case("__invoke") || name.eq_ignore_ascii_case("call"))
        {
            return Some(closure.func.clone());
        }
        match &obj.class().find_method(name)?.body {
            MethodBody::User(func) => Some(func.clone()),
            MethodBody::Native(_) => None,
        }
    }

    /// `$obj->name(...)` as code in `scope` would call it.
    ///
    /// # Errors
    ///
    /// Undefined or inaccessible methods, and whatever the method throws.
    pub fn call_method(
        &mut self,
        obj: &ObjRef,
        name: &str,
        args: Vec<Arg>,
        scope: Option<&Rc<Class>>,
    ) -> Result<Value> {
        if let Some(foreign) = obj.foreign() {
            return foreign.call(self, Some(name), args.iter().map(Arg::value).collect());
        }
        if let Some(closure) = obj.closure()
            && (name.eq_ignore_ascii_case("__invoke") || name.eq_ignore_ascii_case("call"))
        {
            return self.call_closure(&closure, args);
        }
        let class = obj.class().clone();
        match class.find_method(name).cloned() {
            Some(method) if self.can_access(method.visibility, &method.declaring, scope) => {
                self.invoke_method(obj, &method, args)
            }
            found => {
                if let Some(hook) = class.hooks.call.clone() {
                    return self.call_magic(obj, &hook, name, args);
                }
                match found {
                    Some(method) => Err(self.method_access_error(&class, &method, scope)),
                    None => {
                        let message = format!("Call to undefined method {}::{name}()", class.name());
                        Err(self.throw_error("Error", &message))
                    }
                }
            }
        }
    }

    pub(crate) fn call_closure(&mut self, closure: &Rc<Closure>, args: Vec<Arg>) -> Result<Value> {
        let ctx = CallContext {
            this: closure.this.clone(),
            scope: closure.scope.clone(),
            static_scope: closure
                .this
                .as_ref()
                .map(|t| t.class().clone())
                .or_else(|| closure.scope.clone()),
            bound: closure.bound.clone(),
            display: None,
        };
        self.call_user_function(&closure.func, args, ctx)
    }

    pub(crate) fn make_closure(
        &mut self,
        frame: &Frame,
        func: &Rc<FuncDecl>,
        bound: Vec<(Rc<str>, Slot)>,
        is_static: bool,
    ) -> Value {
        let closure = Closure {
            func: func.clone(),
            bound,
            this: if is_static { None } else { frame.this.clone() },
            scope: frame.scope.clone(),
        };
        let class = self
            .class("Closure")
            .unwrap_or_else(builtins::classes::foreign_class);
        Value::Object(self.alloc_object(class, Vec::new(), Native::Closure(Rc::new(closure))))
    }

    /// Declaration a callable value would run, used to bind by-ref arguments.
    pub(crate) fn callable_decl(&self, callee: &Value) -> Option<Rc<FuncDecl>> {
        match callee {
            Value::Object(obj) => {
                if let Some(closure) = obj.closure() {
                    return Some(closure.func.clone());
                }
                match &obj.class().hooks.invoke.as_ref()?.body {
                    MethodBody::User(func) => Some(func.clone()),
                    MethodBody::Native(_) => None,
                }
            }
            Value::Str(name) => {
                let name = String::from_utf8_lossy(name);
                self.functions
                    .get(&name.trim_start_matches('\\').to_ascii_lowercase())
                    .cloned()
            }
            _ => None,
        }
    }

    /// Calls anything callable: closures, invokable objects, function names,
    /// `"Class::method"` strings and `[$objOrClass, 'method']` pairs.
    ///
    /// # Errors
    ///
    /// Non-callable values and whatever the callee throws.
    pub fn call_value(&mut self, callee: &Value, args: Vec<Arg>) -> Result<Value> {
        match callee {
            Value::Object(obj) => {
                if let Some(closure) = obj.closure() {
                    return self.call_closure(&closure, args);
                }
                if let Some(foreign) = obj.foreign() {
                    return foreign.call(self, None, args.iter().map(Arg::value).collect());
                }
                if let Some(hook) = obj.class().hooks.invoke.clone() {
                    return self.invoke_method(obj, &hook, args);
                }
                let message = format!("Object of type {} is not callable", obj.class().name());
                Err(self.throw_error("Error", &message))
            }
            Value::Str(name) => {
                let name = String::from_utf8_lossy(name).into_owned();
                if let Some((class, method)) = name.split_once("::") {
                    let Some(class) = self.class(class) else {
                        return Err(self.throw_error("Error", &format!("Class \"{class}\" not found")));
                    };
                    return self.call_static_value(&class, method, args);
                }
                self.call_function(&Name::global(name.trim_start_matches('\\')), args)
            }
            Value::Array(pair) if pair.len() == 2 => {
                let mut values = pair.values();
                let (Some(target), Some(method)) = (values.next(), values.next()) else {
                    return Err(self.throw_error("Error", "Array callback must have exactly two elements"));
                };
                let method = String::from_utf8_lossy(&method.to_bytes_lossy()).into_owned();
                match target {
                    Value::Object(obj) => {
                        let scope = obj.class().clone();
                        self.call_method(obj, &method, args, Some(&scope))
                    }
                    other => {
                        let name = String::from_utf8_lossy(&other.to_bytes_lossy()).into_owned();
                        let Some(class) = self.class(&name) else {
                            return Err(self.throw_error("Error", &format!("Class \"{name}\" not found")));
                        };
                        self.call_static_value(&class, &method, args)
                    }
                }
            }
            other => {
                let message = format!("Value of type {} is not callable", other.type_name());
                Err(self.throw_error("Error", &message))
            }
        }
    }

    fn call_static_value(&mut self, class: &Rc<Class>, name: &str, args: Vec<Arg>) -> Result<Value> {
        let Some(method) = class.find_method(name).cloned() else {
            let message = format!("Call to undefined method {}::{name}()", class.name());
            return Err(self.throw_error("Error", &message));
        };
        self.invoke_static(class, &method, args, None)
    }

    /// Whether `value` can be passed to [`Interpreter::call_value`].
    #[must_use]
    pub fn is_callable(&self, value: &Value) -> bool {
        match value {
            Value::Object(obj) => {
                obj.closure().is_some() || obj.foreign().is_some() || obj.class().hooks.invoke.is_some()
            }
            Value::Str(name) => {
                let name = String::from_utf8_lossy(name);
                let name = name.trim_start_matches('\\');
                match name.split_once("::") {
                    Some((class, method)) => self
                        .class(class)
                        .is_some_and(|c| c.find_method(method).is_some()),
                    None => self.function_exists(name),
                }
            }
            Value::Array(pair) if pair.len() == 2 => {
                let mut values = pair.values();
                match (values.next(), values.next()) {
                    (Some(Value::Object(obj)), Some(Value::Str(m))) => {
                        let m = String::from_utf8_lossy(m);
                        obj.class().find_method(&m).is_some() || obj.class().hooks.call.is_some()
                    }
                    (Some(Value::Str(c)), Some(Value::Str(m))) => self
                        .class(&String::from_utf8_lossy(c))
                        .is_some_and(|c| c.find_method(&String::from_utf8_lossy(m)).is_some()),
                    _ => false,
                }
            }
            _ => false,
        }
    }

    #[must_use]
    pub fn function_exists(&self, name: &str) -> bool {
        let lower = name.trim_start_matches('\\').to_ascii_lowercase();
        self.functions.contains_key(&lower) || builtins::lookup(&lower).is_some()
    }

    /// Calls a function by name with already-evaluated arguments.
    pub(crate) fn call_function(&mut self, name: &Name, args: Vec<Arg>) -> Result<Value> {
        for candidate in name.candidates() {
            let lower = candidate.to_ascii_lowercase();
            if let Some(func) = self.functions.get(&lower).cloned() {
                return self.call_user_function(&func, args, CallContext::default());
            }
            if let Some(builtin) = builtins::lookup(&lower) {
                let mut values: Vec<Value> = args.iter().map(Arg::value).collect();
                let result = (builtin.f)(self, &mut values)?;
                for &i in builtin.by_ref {
                    if let (Some(Arg::Ref(slot)), Some(v)) = (args.get(i), values.get(i)) {
                        *slot.borrow_mut() = v.clone();
                    }
                }
                return Ok(result);
            }
        }
        let message = format!("Call to undefined function {}()", name.primary);
        Err(self.throw_error("Error", &message))
    }

    /// A call expression `name(args)`.
    pub(crate) fn eval_call(&mut self, frame: &mut Frame, name: &Name, args: &[Expr]) -> Result<Value> {
        for candidate in name.candidates() {
            let lower = candidate.to_ascii_lowercase();
            match lower.as_str() {
                "func_get_args" => return Ok(Value::array(ArrayData::from_values(frame.args.clone()))),
                "func_num_args" => return Ok(Value::Int(i64::try_from(frame.args.len()).unwrap_or(i64::MAX))),
                "get_class" | "get_called_class" if args.is_empty() => {
                    let class = if lower == "get_class" {
                        frame.scope.clone()
                    } else {
                        frame.static_scope.clone().or_else(|| frame.scope.clone())
                    };
                    return Ok(class.map_or(Value::Bool(false), |c| Value::from(c.name())));
                }
                "compact" => return self.compact(frame, args),
                "get_object_vars" if args.len() == 1 => {
                    let target = self.eval(frame, &args[0])?;
                    return Ok(self.object_vars(&target, frame.scope.as_ref()));
                }
                _ => {}
            }
            if let Some(func) = self.functions.get(&lower).cloned() {
                let args = self.eval_args(frame, args, Some(&func.params))?;
                return self.call_user_function(&func, args, CallContext::default());
            }
            if let Some(builtin) = builtins::lookup(&lower) {
                let mut targets = Vec::new();
                let mut values = Vec::with_capacity(args.len());
                for (i, arg) in args.iter().enumerate() {
                    if builtin.by_ref.contains(&i) && arg.is_lvalue() {
                        targets.push(i);
                    }
                    values.push(self.eval(frame, arg)?);
                }
                let result = (builtin.f)(self, &mut values)?;
                for i in targets {
                    if let Some(v) = values.get(i) {
                        self.assign(frame, &args[i], v.clone())?;
                    }
                }
                return Ok(result);
            }
        }
        let message = format!("Call to undefined function {}()", name.primary);
        Err(self.throw_error("Error", &message))
    }

    fn compact(&mut self, frame: &mut Frame, args: &[Expr]) -> Result<Value> {
        fn collect(interp: &Interpreter, frame: &Frame, name: &Value, out: &mut ArrayData) {
            match name {
                Value::Array(names) => names.values().for_each(|n| collect(interp, frame, n, out)),
                other => {
                    let key = String::from_utf8_lossy(&other.to_bytes_lossy()).into_owned();
                    if let Some(slot) = interp.lookup_var(frame, &key) {
                        out.insert(crate::ArrayKey::from_str_key(&key), slot.borrow().clone());
                    }
                }
            }
        }
        let mut out = ArrayData::new();
        for arg in args {
            let name = self.eval(frame, arg)?;
            collect(self, frame, &name, &mut out);
        }
        Ok(Value::array(out))
    }

    /// Accessible properties of an object as an array.
    pub(crate) fn object_vars(&self, target: &Value, scope: Option<&Rc<Class>>) -> Value {
        let Value::Object(obj) = target else {
            return Value::Null;
        };
        let mut out = ArrayData::new();
        for prop in obj.properties().iter() {
            if self.can_access(prop.visibility, &prop.declaring, scope) {
                out.insert(crate::ArrayKey::from_str_key(&prop.name), prop.slot.borrow().clone());
            }
        }
        Value::array(out)
    }
}
