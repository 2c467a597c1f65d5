//! Host-side value model.
//!
//! Values the script hands to the host are either plain data or proxies
//! into the request's engine ([`ContainerProxy`], [`ObjectProxy`]). Values
//! the host hands to the script keep their identity: a [`HostObject`] or
//! [`HostFunction`] shows up inside the script as a `Js\Object` whose
//! property access and calls reach back into host code.

use std::{fmt, future::Future, sync::Arc};

use bytes::Bytes;
use futures::{FutureExt, future::BoxFuture};
use parking_lot::Mutex;

use crate::{
    error::HostError,
    proxy::{ContainerProxy, Key, ObjectProxy},
    wait::WaitCallback,
};

#[derive(Clone, Default)]
pub enum HostValue {
    /// Absent member; crosses into the script as `null`.
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    /// Script string that is not valid UTF-8.
    Bytes(Bytes),
    Array(Vec<HostValue>),
    Object(HostObject),
    Function(HostFunction),
    Container(ContainerProxy),
    ScriptObject(ObjectProxy),
}

impl HostValue {
    #[must_use]
    pub const fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    /// `null` or undefined.
    #[must_use]
    pub const fn is_nullish(&self) -> bool {
        matches!(self, Self::Undefined | Self::Null)
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Integer view: integers, integral floats and canonical numeric
    /// strings.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Float(f) if f.fract() == 0.0 && f.is_finite() => Some(*f as i64),
            Self::String(s) => match Key::from(s.as_str()) {
                Key::Index(i) => Some(i),
                Key::Name(_) => None,
            },
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_object(&self) -> Option<&HostObject> {
        match self {
            Self::Object(o) => Some(o),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_container(&self) -> Option<&ContainerProxy> {
        match self {
            Self::Container(c) => Some(c),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_script_object(&self) -> Option<&ObjectProxy> {
        match self {
            Self::ScriptObject(o) => Some(o),
            _ => None,
        }
    }

    /// Truthiness as the script sees it (`empty()` is the negation).
    #[must_use]
    pub fn truthy(&self) -> bool {
        match self {
            Self::Undefined | Self::Null => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Float(f) => *f != 0.0,
            Self::String(s) => !(s.is_empty() || s == "0"),
            Self::Bytes(b) => !(b.is_empty() || b.as_ref() == b"0"),
            Self::Array(items) => !items.is_empty(),
            Self::Object(_) | Self::Function(_) | Self::Container(_) | Self::ScriptObject(_) => true,
        }
    }

    /// JSON rendering of plain data; proxies render as `null`.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            Self::Undefined | Self::Null | Self::Function(_) | Self::Container(_) | Self::ScriptObject(_) => {
                Json::Null
            }
            Self::Bool(b) => Json::Bool(*b),
            Self::Int(i) => Json::from(*i),
            Self::Float(f) => Json::from(*f),
            Self::String(s) => Json::String(s.clone()),
            Self::Bytes(b) => Json::String(String::from_utf8_lossy(b).into_owned()),
            Self::Array(items) => Json::Array(items.iter().map(Self::to_json).collect()),
            Self::Object(obj) => Json::Object(
                obj.entries()
                    .into_iter()
                    .filter(|(_, v)| !v.is_undefined())
                    .map(|(k, v)| (k, v.to_json()))
                    .collect(),
            ),
        }
    }
}

impl fmt::Debug for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => f.write_str("Undefined"),
            Self::Null => f.write_str("Null"),
            Self::Bool(b) => f.debug_tuple("Bool").field(b).finish(),
            Self::Int(i) => f.debug_tuple("Int").field(i).finish(),
            Self::Float(x) => f.debug_tuple("Float").field(x).finish(),
            Self::String(s) => f.debug_tuple("String").field(s).finish(),
            Self::Bytes(b) => f.debug_tuple("Bytes").field(b).finish(),
            Self::Array(items) => f.debug_tuple("Array").field(items).finish(),
            Self::Object(o) => o.fmt(f),
            Self::Function(func) => func.fmt(f),
            Self::Container(c) => c.fmt(f),
            Self::ScriptObject(o) => o.fmt(f),
        }
    }
}

/// Plain-data equality; proxies and host objects compare by identity.
impl PartialEq for HostValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a.ptr_eq(b),
            (Self::Function(a), Self::Function(b)) => a.ptr_eq(b),
            (Self::Container(a), Self::Container(b)) => a.same_handle(b),
            (Self::ScriptObject(a), Self::ScriptObject(b)) => a.same_handle(b),
            _ => false,
        }
    }
}

impl From<bool> for HostValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for HostValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for HostValue {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for HostValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for HostValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for HostValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<Vec<Self>> for HostValue {
    fn from(value: Vec<Self>) -> Self {
        Self::Array(value)
    }
}

impl From<HostObject> for HostValue {
    fn from(value: HostObject) -> Self {
        Self::Object(value)
    }
}

impl From<HostFunction> for HostValue {
    fn from(value: HostFunction) -> Self {
        Self::Function(value)
    }
}

impl From<serde_json::Value> for HostValue {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value as Json;
        match value {
            Json::Null => Self::Null,
            Json::Bool(b) => Self::Bool(b),
            Json::Number(n) => n
                .as_i64()
                .map_or_else(|| Self::Float(n.as_f64().unwrap_or(f64::NAN)), Self::Int),
            Json::String(s) => Self::String(s),
            Json::Array(items) => Self::Array(items.into_iter().map(Self::from).collect()),
            Json::Object(map) => Self::Object(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect()),
        }
    }
}

/// Shared, insertion-ordered property bag owned by the host.
#[derive(Clone, Default)]
pub struct HostObject(Arc<Mutex<Vec<(String, HostValue)>>>);

impl HostObject {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(self, name: impl Into<String>, value: impl Into<HostValue>) -> Self {
        self.set(name, value);
        self
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<HostValue> {
        self.0
            .lock()
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.clone())
    }

    pub fn set(&self, name: impl Into<String>, value: impl Into<HostValue>) {
        let name = name.into();
        let value = value.into();
        let mut entries = self.0.lock();
        match entries.iter_mut().find(|(k, _)| *k == name) {
            Some((_, slot)) => *slot = value,
            None => entries.push((name, value)),
        }
    }

    pub fn remove(&self, name: &str) -> Option<HostValue> {
        let mut entries = self.0.lock();
        let pos = entries.iter().position(|(k, _)| k == name)?;
        Some(entries.remove(pos).1)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.0.lock().iter().any(|(k, _)| k == name)
    }

    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.0.lock().iter().map(|(k, _)| k.clone()).collect()
    }

    #[must_use]
    pub fn entries(&self) -> Vec<(String, HostValue)> {
        self.0.lock().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn identity(&self) -> usize {
        Arc::as_ptr(&self.0).cast::<()>() as usize
    }
}

impl<K: Into<String>> FromIterator<(K, HostValue)> for HostObject {
    fn from_iter<T: IntoIterator<Item = (K, HostValue)>>(iter: T) -> Self {
        let object = Self::new();
        for (k, v) in iter {
            object.set(k, v);
        }
        object
    }
}

impl fmt::Debug for HostObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostObject")
            .field("keys", &self.keys())
            .finish()
    }
}

/// Arguments of a host function call made by the script.
pub struct CallArgs {
    pub args: Vec<HostValue>,
    /// Present when the script passed `new Js\Wait()`; the call's result is
    /// whatever the callback delivers.
    pub wait: Option<WaitCallback>,
}

impl CallArgs {
    #[must_use]
    pub const fn new(args: Vec<HostValue>) -> Self {
        Self { args, wait: None }
    }

    /// Positional argument, `Undefined` when missing.
    #[must_use]
    pub fn arg(&self, index: usize) -> HostValue {
        self.args.get(index).cloned().unwrap_or_default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.args.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    pub const fn take_wait(&mut self) -> Option<WaitCallback> {
        self.wait.take()
    }
}

pub type HostResult = core::result::Result<HostValue, HostError>;

type Body = dyn Fn(CallArgs) -> BoxFuture<'static, HostResult> + Send + Sync;

/// Host function callable from the script.
#[derive(Clone)]
pub struct HostFunction {
    name: Option<Arc<str>>,
    body: Arc<Body>,
}

impl HostFunction {
    /// Function whose body runs to completion when called.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(CallArgs) -> HostResult + Send + Sync + 'static,
    {
        Self {
            name: None,
            body: Arc::new(move |args| futures::future::ready(f(args)).boxed()),
        }
    }

    /// Function whose body is polled on the host loop; the script stays
    /// blocked until the future completes.
    pub fn from_async<F, Fut>(f: F) -> Self
    where
        F: Fn(CallArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HostResult> + Send + 'static,
    {
        Self {
            name: None,
            body: Arc::new(move |args| f(args).boxed()),
        }
    }

    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into().into());
        self
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Starts the call. Synchronous bodies have already run when this
    /// returns.
    pub fn call(&self, args: CallArgs) -> BoxFuture<'static, HostResult> {
        (self.body)(args)
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.body, &other.body)
    }

    pub(crate) fn identity(&self) -> usize {
        Arc::as_ptr(&self.body).cast::<()>() as usize
    }
}

impl fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostFunction")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_object_keeps_insertion_order() {
        let obj = HostObject::new().with("b", 1).with("a", 2);
        obj.set("b", 3);
        obj.set("c", false);
        assert_eq!(obj.keys(), ["b", "a", "c"]);
        assert_eq!(obj.get("b"), Some(HostValue::Int(3)));
        assert_eq!(obj.remove("a"), Some(HostValue::Int(2)));
        assert!(!obj.contains("a"));
    }

    #[test]
    fn json_objects_become_host_objects() {
        let value = HostValue::from(serde_json::json!({"n": 1, "f": 1.5, "list": [true, null]}));
        let obj = value.as_object().cloned().unwrap();
        assert_eq!(obj.get("n"), Some(HostValue::Int(1)));
        assert_eq!(obj.get("f"), Some(HostValue::Float(1.5)));
        assert_eq!(
            obj.get("list"),
            Some(HostValue::Array(vec![HostValue::Bool(true), HostValue::Null]))
        );
        assert_eq!(value.to_json(), serde_json::json!({"n": 1, "f": 1.5, "list": [true, null]}));
    }

    #[test]
    fn truthiness_follows_script_rules() {
        assert!(!HostValue::from("0").truthy());
        assert!(!HostValue::from("").truthy());
        assert!(HostValue::from("0.0").truthy());
        assert!(!HostValue::Array(Vec::new()).truthy());
        assert!(!HostValue::Undefined.truthy());
        assert!(HostValue::Object(HostObject::new()).truthy());
    }

    #[test]
    fn numeric_strings_are_integers() {
        assert_eq!(HostValue::from("12").as_int(), Some(12));
        assert_eq!(HostValue::from("012").as_int(), None);
        assert_eq!(HostValue::Float(3.0).as_int(), Some(3));
        assert_eq!(HostValue::Float(3.5).as_int(), None);
    }

    #[tokio::test]
    async fn sync_bodies_run_when_called() {
        let calls = Arc::new(Mutex::new(0));
        let counter = calls.clone();
        let f = HostFunction::new(move |args| {
            *counter.lock() += 1;
            Ok(args.arg(0))
        })
        .named("echo");
        let pending = f.call(CallArgs::new(vec![HostValue::from(5)]));
        assert_eq!(*calls.lock(), 1);
        assert_eq!(pending.await.unwrap(), HostValue::Int(5));
        assert_eq!(f.name(), Some("echo"));
        assert!(f.ptr_eq(&f.clone()));
    }
}
