//! Value conversion across the engine boundary.

use std::{rc::Rc, sync::Arc};

use conduit_engine::{
    ArrayData, Interpreter, Native, ObjRef, Result as EngineResult, SapiError, Throw, Value, new_slot,
};

use crate::{
    error::{Error, HostError},
    internal::{bridge::Bridge, foreign::HostRef},
    proxy::{ContainerProxy, ObjectProxy},
    stream::StreamError,
    value::HostValue,
};

pub(crate) const BYREF_CLASS: &str = "Js\\ByRef";
pub(crate) const WAIT_CLASS: &str = "Js\\Wait";
pub(crate) const EXCEPTION_CLASS: &str = "Js\\Exception";

/// Declarations every request starts with.
pub(crate) const PRELUDE: &str = r#"
namespace Js;

class ByRef {
    public $value;

    public function __construct(&$value) {
        $this->value =& $value;
    }

    public function &getValue() {
        return $this->value;
    }
}

final class Wait {}

class Exception extends \Exception {}
"#;

pub(crate) fn is_wait_marker(value: &Value) -> bool {
    matches!(value, Value::Object(obj) if obj.class().is_a(WAIT_CLASS))
}

/// Script value as seen by host code. Arrays cross as private copies.
pub(crate) fn to_host(bridge: &Bridge, value: &Value) -> HostValue {
    match value {
        Value::Null => HostValue::Null,
        Value::Bool(b) => HostValue::Bool(*b),
        Value::Int(i) => HostValue::Int(*i),
        Value::Float(f) => HostValue::Float(*f),
        Value::Str(bytes) => match std::str::from_utf8(bytes) {
            Ok(s) => HostValue::String(s.to_string()),
            Err(_) => HostValue::Bytes(bytes.clone()),
        },
        Value::Array(_) => {
            let handle = bridge.handles().detached_container(new_slot(value.clone()));
            HostValue::Container(ContainerProxy::new(bridge.link().clone(), handle, false))
        }
        Value::Object(obj) => object_to_host(bridge, obj),
    }
}

fn object_to_host(bridge: &Bridge, obj: &ObjRef) -> HostValue {
    if let Some(foreign) = obj.foreign()
        && let Some(host) = foreign.as_any().downcast_ref::<HostRef>()
    {
        return host.value().clone();
    }
    if obj.class().is_a(BYREF_CLASS)
        && let Some((_, _, slot)) = obj.property("value")
    {
        let target = slot.borrow().clone();
        return match target {
            Value::Array(_) => {
                let handle = bridge.handles().aliased_container(&slot);
                HostValue::Container(ContainerProxy::new(bridge.link().clone(), handle, true))
            }
            other => to_host(bridge, &other),
        };
    }
    let handle = bridge.handles().object(obj);
    HostValue::ScriptObject(ObjectProxy::new(
        bridge.link().clone(),
        handle,
        Arc::from(obj.class().name()),
    ))
}

/// Host value as seen by the script. Host objects and functions keep their
/// identity across crossings.
pub(crate) fn to_script(bridge: &Rc<Bridge>, interp: &mut Interpreter, value: HostValue) -> EngineResult<Value> {
    Ok(match value {
        HostValue::Undefined | HostValue::Null => Value::Null,
        HostValue::Bool(b) => Value::Bool(b),
        HostValue::Int(i) => Value::Int(i),
        HostValue::Float(f) => Value::Float(f),
        HostValue::String(s) => Value::from(s),
        HostValue::Bytes(b) => Value::string(b),
        HostValue::Array(items) => {
            let mut array = ArrayData::new();
            for item in items {
                array.push(to_script(bridge, interp, item)?);
            }
            Value::array(array)
        }
        HostValue::Object(ref obj) => wrap(bridge, interp, obj.identity(), value.clone()),
        HostValue::Function(ref func) => wrap(bridge, interp, func.identity(), value.clone()),
        HostValue::Container(proxy) => {
            if !proxy.link().same_engine(bridge.link()) {
                return Err(foreign_request(interp, proxy.link().request()));
            }
            let slot = bridge.handles().container_slot(proxy.handle());
            match slot {
                Some(slot) => slot.borrow().clone(),
                None => return Err(interp.throw_error("Error", "Unknown container handle")),
            }
        }
        HostValue::ScriptObject(proxy) => {
            if !proxy.link().same_engine(bridge.link()) {
                return Err(foreign_request(interp, proxy.link().request()));
            }
            let obj = bridge.handles().object_ref(proxy.handle());
            match obj {
                Some(obj) => Value::Object(obj),
                None => return Err(interp.throw_error("Error", "Unknown object handle")),
            }
        }
    })
}

fn wrap(bridge: &Rc<Bridge>, interp: &mut Interpreter, identity: usize, value: HostValue) -> Value {
    if let Some(obj) = bridge.wrapper(identity) {
        return Value::Object(obj);
    }
    let wrapped = interp.wrap_foreign(Rc::new(HostRef::new(bridge.clone(), value)));
    if let Value::Object(obj) = &wrapped {
        bridge.remember_wrapper(identity, obj.clone());
    }
    wrapped
}

fn foreign_request(interp: &mut Interpreter, request: u64) -> Throw {
    let message = format!("Cannot use a value that belongs to request #{request}");
    interp.throw_error("Error", &message)
}

/// Raises a host error inside the script as a catchable `Js\Exception`
/// carrying the original error.
pub(crate) fn host_exception(interp: &mut Interpreter, err: HostError) -> Throw {
    let obj = interp.create_exception(EXCEPTION_CLASS, err.message());
    obj.set_native(Native::Payload(Rc::new(err)));
    Throw::Exception(obj)
}

/// Converts a throw that escaped the script. `exit` is handled by callers.
pub(crate) fn throw_to_error(throw: Throw) -> Error {
    match throw {
        Throw::Exception(obj) => {
            if let Some(payload) = obj.payload()
                && let Some(err) = payload.downcast_ref::<HostError>()
            {
                return Error::Host(err.clone());
            }
            Error::Script {
                class: obj.class().name().to_string(),
                message: Interpreter::exception_message(&obj),
            }
        }
        Throw::Exit(code) => Error::Engine(format!("exit({code}) outside of the script body")),
        Throw::Parse(err) => Error::Parse(err),
        Throw::Fatal(err) => fatal_to_error(err),
    }
}

fn fatal_to_error(err: SapiError) -> Error {
    match err.into_inner().downcast::<StreamError>() {
        Ok(stream) => Error::Stream(*stream),
        Err(other) => Error::Engine(other.to_string()),
    }
}
