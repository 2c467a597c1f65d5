use std::{
    rc::Rc,
    sync::{Arc, OnceLock},
};

use conduit_engine::{Arg, HasMode, Interpreter, ObjRef, PropertyLookup, Result as EngineResult, Value};

use super::{expect_bool, settle_wait};
use crate::{
    error::{Error, HostError, Result},
    internal::{bridge::Bridge, handles::Handle, link::EngineLink, link::ProxyOp, marshal},
    value::{CallArgs, HostFunction, HostValue},
};

/// Identity marker returned for `constructor`.
const CONSTRUCTOR: &str = "constructor";
/// Call forwarder: `call("__call", [name, ...args])` is `call(name, args)`.
const CALL: &str = "__call";

/// Operation on a script object, run on the engine thread.
#[derive(Debug)]
pub(crate) enum ObjectOp {
    Get {
        name: String,
        property_only: bool,
    },
    Set {
        name: String,
        property_only: bool,
        value: HostValue,
    },
    Has {
        name: String,
        property_only: bool,
        mode: HasMode,
    },
    Delete {
        name: String,
        property_only: bool,
    },
    Call {
        name: String,
        property_only: bool,
        args: Vec<HostValue>,
    },
    Invoke {
        args: Vec<HostValue>,
    },
}

/// A script object as seen by host code.
///
/// Member names prefixed with `$` address properties only; bare names
/// address properties first and public methods second. Names neither
/// resolves go to the class's magic hooks, when it has them.
#[derive(Clone, Debug)]
pub struct ObjectProxy {
    link: EngineLink,
    handle: Handle,
    class: Arc<str>,
}

/// Splits the `$` prefix off a member name.
fn member(name: &str) -> (String, bool) {
    match name.strip_prefix('$') {
        Some(property) => (property.to_string(), true),
        None => (name.to_string(), false),
    }
}

fn reserved(name: &str) -> bool {
    name == CONSTRUCTOR || name == CALL
}

impl ObjectProxy {
    pub(crate) const fn new(link: EngineLink, handle: Handle, class: Arc<str>) -> Self {
        Self { link, handle, class }
    }

    pub(crate) const fn link(&self) -> &EngineLink {
        &self.link
    }

    pub(crate) const fn handle(&self) -> Handle {
        self.handle
    }

    #[must_use]
    pub fn same_handle(&self, other: &Self) -> bool {
        self.handle == other.handle && self.link.same_engine(&other.link)
    }

    /// Class of the object when it crossed over.
    #[must_use]
    pub fn class_name(&self) -> &str {
        &self.class
    }

    /// The value every proxy reports as its `constructor`.
    #[must_use]
    pub fn constructor() -> HostFunction {
        static CONSTRUCTOR_FN: OnceLock<HostFunction> = OnceLock::new();
        CONSTRUCTOR_FN
            .get_or_init(|| {
                HostFunction::new(|_| Err(HostError::new("script objects cannot be constructed from the host")))
                    .named("ScriptObject")
            })
            .clone()
    }

    async fn op(&self, op: ObjectOp) -> Result<HostValue> {
        self.link
            .op(ProxyOp::Object {
                handle: self.handle,
                op,
            })
            .await
    }

    /// Reads a member. Missing members are `Undefined`; public methods come
    /// back as functions bound to this object.
    ///
    /// # Errors
    ///
    /// [`Error::Detached`] once the request has settled, and whatever a
    /// `__get` hook throws.
    pub async fn get(&self, name: &str) -> Result<HostValue> {
        match name {
            CONSTRUCTOR => return Ok(HostValue::Function(Self::constructor())),
            CALL => return Ok(HostValue::Function(self.call_forwarder())),
            _ => {}
        }
        let (name, property_only) = member(name);
        self.op(ObjectOp::Get { name, property_only }).await
    }

    /// Writes a property. Returns `false` when the write was discarded:
    /// reserved names, methods, and inaccessible properties without `__set`.
    pub async fn set(&self, name: &str, value: impl Into<HostValue>) -> Result<bool> {
        if reserved(name) {
            return Ok(false);
        }
        let (name, property_only) = member(name);
        let value = value.into();
        expect_bool(
            self.op(ObjectOp::Set {
                name,
                property_only,
                value,
            })
            .await?,
        )
    }

    /// `isset()`: present and not null.
    pub async fn has(&self, name: &str) -> Result<bool> {
        self.query(name, HasMode::Isset).await
    }

    /// Present at all, even when null.
    pub async fn exists(&self, name: &str) -> Result<bool> {
        self.query(name, HasMode::Exists).await
    }

    /// `empty()`: missing or falsy.
    pub async fn is_empty(&self, name: &str) -> Result<bool> {
        Ok(!self.query(name, HasMode::NotEmpty).await?)
    }

    async fn query(&self, name: &str, mode: HasMode) -> Result<bool> {
        if reserved(name) {
            return Ok(true);
        }
        let (name, property_only) = member(name);
        expect_bool(
            self.op(ObjectOp::Has {
                name,
                property_only,
                mode,
            })
            .await?,
        )
    }

    /// Unsets a property. Returns `false` when nothing handled the delete.
    pub async fn delete(&self, name: &str) -> Result<bool> {
        if reserved(name) {
            return Ok(false);
        }
        let (name, property_only) = member(name);
        expect_bool(self.op(ObjectOp::Delete { name, property_only }).await?)
    }

    /// Calls a method, falling back to `__call`. A `$name` calls the
    /// callable stored in that property instead.
    ///
    /// # Errors
    ///
    /// [`Error::Script`] for undefined methods and script exceptions,
    /// [`Error::Host`] when the script rethrows a host error.
    pub async fn call(&self, name: &str, args: Vec<HostValue>) -> Result<HostValue> {
        let mut name = name.to_string();
        let mut args = args;
        while name == CALL {
            if args.is_empty() {
                return Err(Error::Host(HostError::new("__call expects a method name")));
            }
            let target = args.remove(0);
            name = match target.as_str() {
                Some(target) => target.to_string(),
                None => return Err(Error::Host(HostError::new("__call expects a method name"))),
            };
        }
        if name == CONSTRUCTOR {
            return Self::constructor()
                .call(CallArgs::new(args))
                .await
                .map_err(Error::Host);
        }
        let (name, property_only) = member(&name);
        self.op(ObjectOp::Call {
            name,
            property_only,
            args,
        })
        .await
    }

    /// Calls the object itself through `__invoke` (closures included).
    pub async fn invoke(&self, args: Vec<HostValue>) -> Result<HostValue> {
        self.op(ObjectOp::Invoke { args }).await
    }

    fn call_forwarder(&self) -> HostFunction {
        self.bound(CALL)
    }

    /// `name` as a host function calling back into this object.
    fn bound(&self, name: &str) -> HostFunction {
        let proxy = self.clone();
        let method = name.to_string();
        HostFunction::from_async(move |mut args: CallArgs| {
            let proxy = proxy.clone();
            let method = method.clone();
            async move {
                let wait = args.take_wait();
                let result = proxy.call(&method, args.args).await;
                settle_wait(wait, result)
            }
        })
        .named(name)
    }
}

fn is_method(obj: &ObjRef, name: &str) -> bool {
    obj.class()
        .find_method(name)
        .is_some_and(|m| m.is_public() && !m.is_static)
}

/// Engine side of an object operation.
pub(crate) fn apply(bridge: &Rc<Bridge>, interp: &mut Interpreter, obj: &ObjRef, op: ObjectOp) -> Result<HostValue> {
    let result = match op {
        ObjectOp::Get { name, property_only } => get(bridge, interp, obj, &name, property_only),
        ObjectOp::Set {
            name,
            property_only,
            value,
        } => set(bridge, interp, obj, &name, property_only, value).map(HostValue::Bool),
        ObjectOp::Has {
            name,
            property_only,
            mode,
        } => has(interp, obj, &name, property_only, mode).map(HostValue::Bool),
        ObjectOp::Delete { name, property_only } => delete(interp, obj, &name, property_only).map(HostValue::Bool),
        ObjectOp::Call {
            name,
            property_only,
            args,
        } => call(bridge, interp, obj, &name, property_only, args),
        ObjectOp::Invoke { args } => {
            let args = script_args(bridge, interp, args);
            args.and_then(|args| interp.call_value(&Value::Object(obj.clone()), args))
                .map(|value| marshal::to_host(bridge, &value))
        }
    };
    result.map_err(marshal::throw_to_error)
}

fn get(
    bridge: &Rc<Bridge>,
    interp: &mut Interpreter,
    obj: &ObjRef,
    name: &str,
    property_only: bool,
) -> EngineResult<HostValue> {
    if let PropertyLookup::Visible(slot) = interp.lookup_property(obj, name, None) {
        let value = slot.borrow().clone();
        return Ok(marshal::to_host(bridge, &value));
    }
    if !property_only && is_method(obj, name) {
        let handle = bridge.handles().object(obj);
        let proxy = ObjectProxy::new(bridge.link().clone(), handle, Arc::from(obj.class().name()));
        return Ok(HostValue::Function(proxy.bound(name)));
    }
    if obj.class().hooks().get.is_some() {
        let value = interp.read_property(obj, name, None)?;
        return Ok(marshal::to_host(bridge, &value));
    }
    Ok(HostValue::Undefined)
}

fn set(
    bridge: &Rc<Bridge>,
    interp: &mut Interpreter,
    obj: &ObjRef,
    name: &str,
    property_only: bool,
    value: HostValue,
) -> EngineResult<bool> {
    let lookup = interp.lookup_property(obj, name, None);
    if let PropertyLookup::Visible(slot) = &lookup {
        let value = marshal::to_script(bridge, interp, value)?;
        *slot.borrow_mut() = value;
        return Ok(true);
    }
    if !property_only && is_method(obj, name) {
        return Ok(false);
    }
    if obj.class().hooks().set.is_none() && matches!(lookup, PropertyLookup::Hidden) {
        return Ok(false);
    }
    let value = marshal::to_script(bridge, interp, value)?;
    interp.write_property(obj, name, value, None)?;
    Ok(true)
}

fn has(interp: &mut Interpreter, obj: &ObjRef, name: &str, property_only: bool, mode: HasMode) -> EngineResult<bool> {
    if let PropertyLookup::Visible(slot) = interp.lookup_property(obj, name, None) {
        let value = slot.borrow();
        return Ok(match mode {
            HasMode::Isset => !value.is_null(),
            HasMode::NotEmpty => value.to_bool(),
            HasMode::Exists => true,
        });
    }
    if !property_only && is_method(obj, name) {
        return Ok(true);
    }
    if obj.class().hooks().isset.is_some() {
        return interp.property_isset(obj, name, mode, None);
    }
    Ok(false)
}

fn delete(interp: &mut Interpreter, obj: &ObjRef, name: &str, property_only: bool) -> EngineResult<bool> {
    match interp.lookup_property(obj, name, None) {
        PropertyLookup::Visible(_) => {
            interp.unset_property(obj, name, None)?;
            Ok(true)
        }
        _ if !property_only && is_method(obj, name) => Ok(false),
        _ if obj.class().hooks().unset.is_some() => {
            interp.unset_property(obj, name, None)?;
            Ok(true)
        }
        _ => Ok(false),
    }
}

fn call(
    bridge: &Rc<Bridge>,
    interp: &mut Interpreter,
    obj: &ObjRef,
    name: &str,
    property_only: bool,
    args: Vec<HostValue>,
) -> EngineResult<HostValue> {
    let args = script_args(bridge, interp, args)?;
    let result = if property_only {
        let callee = interp.read_property(obj, name, None)?;
        interp.call_value(&callee, args)?
    } else {
        interp.call_method(obj, name, args, None)?
    };
    Ok(marshal::to_host(bridge, &result))
}

fn script_args(bridge: &Rc<Bridge>, interp: &mut Interpreter, args: Vec<HostValue>) -> EngineResult<Vec<Arg>> {
    args.into_iter()
        .map(|arg| marshal::to_script(bridge, interp, arg).map(Arg::Val))
        .collect()
}
