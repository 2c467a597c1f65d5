use std::rc::Rc;

use conduit_engine::{ArrayData, Interpreter, Slot, Value};

use super::{Key, expect_bool, expect_int, settle_wait, unexpected};
use crate::{
    error::Result,
    internal::{bridge::Bridge, handles::Handle, link::EngineLink, link::ProxyOp, marshal},
    value::{CallArgs, HostFunction, HostValue},
};

/// Names of the built-in methods; never shadowed by elements.
const METHODS: [&str; 6] = ["get", "has", "set", "keys", "size", "delete"];
const LENGTH: &str = "length";

/// Operation on a container, run on the engine thread.
#[derive(Debug)]
pub(crate) enum ContainerOp {
    Size,
    Has(Key),
    Get(Key),
    Set(Key, HostValue),
    Delete(Key),
    Keys,
    Length,
    SetLength(i64),
}

/// A script array as seen by host code.
///
/// Behaves like an ordered map whose integer keys also form an array: the
/// [`length`](Self::length) is the next implicit index, not the number of
/// entries. A proxy made from a plain array works on a private copy; one
/// made from a `Js\ByRef` aliases the script variable.
#[derive(Clone, Debug)]
pub struct ContainerProxy {
    link: EngineLink,
    handle: Handle,
    by_ref: bool,
}

impl ContainerProxy {
    pub(crate) const fn new(link: EngineLink, handle: Handle, by_ref: bool) -> Self {
        Self { link, handle, by_ref }
    }

    pub(crate) const fn link(&self) -> &EngineLink {
        &self.link
    }

    pub(crate) const fn handle(&self) -> Handle {
        self.handle
    }

    /// Whether both proxies address the same container of the same request.
    #[must_use]
    pub fn same_handle(&self, other: &Self) -> bool {
        self.handle == other.handle && self.link.same_engine(&other.link)
    }

    /// Whether mutations reach the script's own variable.
    #[must_use]
    pub const fn is_by_ref(&self) -> bool {
        self.by_ref
    }

    async fn op(&self, op: ContainerOp) -> Result<HostValue> {
        self.link
            .op(ProxyOp::Container {
                handle: self.handle,
                op,
            })
            .await
    }

    /// Number of entries of every key kind.
    ///
    /// # Errors
    ///
    /// [`Error::Detached`](crate::Error::Detached) once the request has
    /// settled; the same holds for every other operation.
    pub async fn size(&self) -> Result<usize> {
        let size = expect_int(self.op(ContainerOp::Size).await?)?;
        Ok(usize::try_from(size).unwrap_or_default())
    }

    pub async fn has(&self, key: impl Into<Key>) -> Result<bool> {
        expect_bool(self.op(ContainerOp::Has(key.into())).await?)
    }

    /// Element at `key`, or `Undefined`. Nested arrays come back as copies.
    pub async fn get(&self, key: impl Into<Key>) -> Result<HostValue> {
        self.op(ContainerOp::Get(key.into())).await
    }

    pub async fn set(&self, key: impl Into<Key>, value: impl Into<HostValue>) -> Result<()> {
        self.op(ContainerOp::Set(key.into(), value.into())).await?;
        Ok(())
    }

    /// Removes an element without renumbering the others. Returns whether
    /// it was present.
    pub async fn delete(&self, key: impl Into<Key>) -> Result<bool> {
        expect_bool(self.op(ContainerOp::Delete(key.into())).await?)
    }

    /// Keys in insertion order.
    pub async fn keys(&self) -> Result<Vec<Key>> {
        match self.op(ContainerOp::Keys).await? {
            HostValue::Array(keys) => Ok(keys.iter().filter_map(Key::from_value).collect()),
            other => Err(unexpected(&other)),
        }
    }

    /// Next implicit integer index.
    pub async fn length(&self) -> Result<i64> {
        expect_int(self.op(ContainerOp::Length).await?)
    }

    /// Drops integer keys `>= len` and makes `len` the next implicit index.
    /// Named keys are kept.
    pub async fn set_length(&self, len: usize) -> Result<()> {
        let len = i64::try_from(len).unwrap_or(i64::MAX);
        self.op(ContainerOp::SetLength(len)).await?;
        Ok(())
    }

    /// Property read: built-in methods, `length`, and numeric names.
    /// Other names are not properties and read as `Undefined`.
    pub async fn get_property(&self, name: &str) -> Result<HostValue> {
        if METHODS.contains(&name) {
            return Ok(HostValue::Function(self.method(name)));
        }
        if name == LENGTH {
            return Ok(HostValue::Int(self.length().await?));
        }
        match Key::from(name) {
            key @ Key::Index(_) => self.get(key).await,
            Key::Name(_) => Ok(HostValue::Undefined),
        }
    }

    /// Property write. Returns `false` when the write was dropped: built-in
    /// methods, non-numeric names and invalid lengths.
    pub async fn set_property(&self, name: &str, value: impl Into<HostValue>) -> Result<bool> {
        let value = value.into();
        if METHODS.contains(&name) {
            return Ok(false);
        }
        if name == LENGTH {
            let Some(len) = value.as_int().and_then(|n| usize::try_from(n).ok()) else {
                return Ok(false);
            };
            self.set_length(len).await?;
            return Ok(true);
        }
        match Key::from(name) {
            key @ Key::Index(_) => {
                self.set(key, value).await?;
                Ok(true)
            }
            Key::Name(_) => Ok(false),
        }
    }

    /// Property delete; built-ins and `length` stay.
    pub async fn delete_property(&self, name: &str) -> Result<bool> {
        if METHODS.contains(&name) || name == LENGTH {
            return Ok(false);
        }
        match Key::from(name) {
            key @ Key::Index(_) => self.delete(key).await,
            Key::Name(_) => Ok(false),
        }
    }

    pub async fn has_property(&self, name: &str) -> Result<bool> {
        if METHODS.contains(&name) || name == LENGTH {
            return Ok(true);
        }
        match Key::from(name) {
            key @ Key::Index(_) => self.has(key).await,
            Key::Name(_) => Ok(false),
        }
    }

    /// A built-in method as a callable host function bound to this proxy.
    fn method(&self, name: &str) -> HostFunction {
        let proxy = self.clone();
        let method = name.to_string();
        HostFunction::from_async(move |mut args: CallArgs| {
            let proxy = proxy.clone();
            let method = method.clone();
            async move {
                let wait = args.take_wait();
                let result = proxy.call_method(&method, &args).await;
                settle_wait(wait, result)
            }
        })
        .named(name)
    }

    async fn call_method(&self, method: &str, args: &CallArgs) -> Result<HostValue> {
        let key = Key::from_value(&args.arg(0));
        Ok(match (method, key) {
            ("size", _) => HostValue::Int(i64::try_from(self.size().await?).unwrap_or(i64::MAX)),
            ("keys", _) => HostValue::Array(self.keys().await?.into_iter().map(HostValue::from).collect()),
            ("get", Some(key)) => self.get(key).await?,
            ("has", Some(key)) => HostValue::Bool(self.has(key).await?),
            ("delete", Some(key)) => HostValue::Bool(self.delete(key).await?),
            ("set", Some(key)) => {
                self.set(key, args.arg(1)).await?;
                HostValue::Container(self.clone())
            }
            ("has" | "delete", None) => HostValue::Bool(false),
            _ => HostValue::Undefined,
        })
    }
}

fn read<R>(slot: &Slot, f: impl FnOnce(&ArrayData) -> R) -> R {
    match &*slot.borrow() {
        Value::Array(array) => f(array),
        _ => f(&ArrayData::new()),
    }
}

/// Mutates the array in `slot`, turning any other value into an empty
/// array first.
fn update<R>(slot: &Slot, f: impl FnOnce(&mut ArrayData) -> R) -> R {
    let mut value = slot.borrow_mut();
    let mut array = match std::mem::take(&mut *value) {
        Value::Array(array) => array,
        _ => Rc::new(ArrayData::new()),
    };
    let result = f(Rc::make_mut(&mut array));
    *value = Value::Array(array);
    result
}

/// Engine side of a container operation.
pub(crate) fn apply(bridge: &Rc<Bridge>, interp: &mut Interpreter, slot: &Slot, op: ContainerOp) -> Result<HostValue> {
    Ok(match op {
        ContainerOp::Size => HostValue::Int(read(slot, |a| i64::try_from(a.len()).unwrap_or(i64::MAX))),
        ContainerOp::Has(key) => HostValue::Bool(read(slot, |a| a.contains_key(&key.to_array_key()))),
        ContainerOp::Get(key) => match read(slot, |a| a.get(&key.to_array_key()).cloned()) {
            Some(value) => marshal::to_host(bridge, &value),
            None => HostValue::Undefined,
        },
        ContainerOp::Set(key, value) => {
            let value = marshal::to_script(bridge, interp, value).map_err(marshal::throw_to_error)?;
            update(slot, |a| a.insert(key.to_array_key(), value));
            HostValue::Bool(true)
        }
        ContainerOp::Delete(key) => {
            let key = key.to_array_key();
            let present = read(slot, |a| a.contains_key(&key));
            if present {
                update(slot, |a| a.remove(&key));
            }
            HostValue::Bool(present)
        }
        ContainerOp::Keys => HostValue::Array(read(slot, |a| {
            a.keys().map(|k| HostValue::from(Key::from_array_key(k))).collect()
        })),
        ContainerOp::Length => HostValue::Int(read(slot, ArrayData::next_free)),
        ContainerOp::SetLength(len) => {
            update(slot, |a| a.truncate_int_keys(len));
            HostValue::Bool(true)
        }
    })
}
