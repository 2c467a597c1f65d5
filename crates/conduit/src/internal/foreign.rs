use std::{any::Any, rc::Rc};

use conduit_engine::{Foreign, HasMode, Interpreter, Result as EngineResult, SapiError, Throw, Value};

use crate::{
    internal::{
        bridge::Bridge,
        link::{Reply, ToHost},
        marshal,
    },
    value::{HostFunction, HostValue},
};

/// A host object or function living inside the script as a `Js\Object`.
///
/// Property access works on the shared host object directly; calls are
/// handed to the host loop and block the script until they settle.
pub(crate) struct HostRef {
    bridge: Rc<Bridge>,
    value: HostValue,
}

impl HostRef {
    pub(crate) const fn new(bridge: Rc<Bridge>, value: HostValue) -> Self {
        Self { bridge, value }
    }

    pub(crate) const fn value(&self) -> &HostValue {
        &self.value
    }

    fn member(&self, name: &str) -> Option<HostValue> {
        match &self.value {
            HostValue::Object(obj) => obj.get(name),
            HostValue::Function(func) if name == "name" => {
                Some(HostValue::from(func.name().unwrap_or_default()))
            }
            _ => None,
        }
    }

    fn call_host(&self, interp: &mut Interpreter, function: &HostFunction, args: Vec<Value>) -> EngineResult<Value> {
        let mut wait = false;
        let mut host_args = Vec::with_capacity(args.len());
        for arg in &args {
            if marshal::is_wait_marker(arg) {
                wait = true;
            } else {
                host_args.push(marshal::to_host(&self.bridge, arg));
            }
        }
        let reply = Bridge::roundtrip(&self.bridge, Some(interp), |seq| ToHost::Call {
            seq,
            function: function.clone(),
            args: host_args,
            wait,
        })?;
        match reply {
            Reply::Call(Ok(value)) => marshal::to_script(&self.bridge, interp, value),
            Reply::Call(Err(err)) => Err(marshal::host_exception(interp, err)),
            other => Err(Throw::Fatal(SapiError::new(format!(
                "unexpected reply to a host call: {other:?}"
            )))),
        }
    }

    /// Members every host value answers to even when it does not define
    /// them.
    fn builtin(&self, interp: &mut Interpreter, method: &str) -> EngineResult<Option<Value>> {
        Ok(match (method, &self.value) {
            ("keys", HostValue::Object(obj)) => {
                let keys = obj.keys().into_iter().map(HostValue::from).collect();
                Some(marshal::to_script(&self.bridge, interp, HostValue::Array(keys))?)
            }
            ("keys", _) => Some(Value::empty_array()),
            ("toString", HostValue::Function(func)) => Some(Value::from(format!(
                "function {}() {{ [native code] }}",
                func.name().unwrap_or_default()
            ))),
            ("toString", _) => Some(Value::from("[object Object]")),
            ("toJSON", value) => Some(Value::from(value.to_json().to_string())),
            _ => None,
        })
    }
}

impl Foreign for HostRef {
    fn get(&self, interp: &mut Interpreter, name: &str) -> EngineResult<Value> {
        match self.member(name) {
            Some(value) => marshal::to_script(&self.bridge, interp, value),
            None => Ok(Value::Null),
        }
    }

    fn set(&self, _interp: &mut Interpreter, name: &str, value: Value) -> EngineResult<()> {
        if let HostValue::Object(obj) = &self.value {
            obj.set(name, marshal::to_host(&self.bridge, &value));
        }
        Ok(())
    }

    fn has(&self, _interp: &mut Interpreter, name: &str, mode: HasMode) -> EngineResult<bool> {
        let member = self.member(name);
        Ok(match mode {
            HasMode::Exists => member.is_some(),
            HasMode::Isset => member.is_some_and(|v| !v.is_nullish()),
            HasMode::NotEmpty => member.is_some_and(|v| v.truthy()),
        })
    }

    fn unset(&self, _interp: &mut Interpreter, name: &str) -> EngineResult<()> {
        if let HostValue::Object(obj) = &self.value {
            obj.remove(name);
        }
        Ok(())
    }

    fn call(&self, interp: &mut Interpreter, method: Option<&str>, args: Vec<Value>) -> EngineResult<Value> {
        let Some(method) = method else {
            return match &self.value {
                HostValue::Function(func) => self.call_host(interp, func, args),
                _ => Err(interp.throw_error("Error", "Object of type Js\\Object is not callable")),
            };
        };
        match (&self.value, self.member(method)) {
            (_, Some(HostValue::Function(func))) => return self.call_host(interp, &func, args),
            (HostValue::Function(func), _) if method.eq_ignore_ascii_case("__invoke") => {
                return self.call_host(interp, func, args);
            }
            _ => {}
        }
        if let Some(value) = self.builtin(interp, method)? {
            return Ok(value);
        }
        let message = format!("Call to undefined method Js\\Object::{method}()");
        Err(interp.throw_error("Error", &message))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
