//! Host-side views of script containers and objects.
//!
//! A proxy holds a link to its request's engine thread and a handle into
//! that request's table of exported values. Every operation is a message to
//! the engine; once the request has settled the engine is gone and the
//! operation fails with [`Error::Detached`](crate::Error::Detached).

use std::fmt;

use bytes::Bytes;
use conduit_engine::ArrayKey;

use crate::{
    error::{Error, HostError, Result},
    value::{HostResult, HostValue},
    wait::WaitCallback,
};

pub(crate) mod container;
pub(crate) mod object;

pub use container::ContainerProxy;
pub(crate) use container::ContainerOp;
pub use object::ObjectProxy;
pub(crate) use object::ObjectOp;

/// Container key.
///
/// Canonical integer strings (`"5"`, `"-3"`, but not `"05"`) are the same
/// key as the integer itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    Index(i64),
    Name(String),
}

impl Key {
    /// Key a host value addresses, if any.
    #[must_use]
    pub fn from_value(value: &HostValue) -> Option<Self> {
        match value {
            HostValue::String(s) => Some(Self::from(s.as_str())),
            HostValue::Bytes(b) => Some(Self::from(String::from_utf8_lossy(b).as_ref())),
            other => other.as_int().map(Self::Index),
        }
    }

    pub(crate) fn to_array_key(&self) -> ArrayKey {
        match self {
            Self::Index(i) => ArrayKey::Int(*i),
            Self::Name(s) => ArrayKey::Str(Bytes::copy_from_slice(s.as_bytes())),
        }
    }

    pub(crate) fn from_array_key(key: &ArrayKey) -> Self {
        match key {
            ArrayKey::Int(i) => Self::Index(*i),
            ArrayKey::Str(s) => Self::Name(String::from_utf8_lossy(s).into_owned()),
        }
    }
}

impl From<i64> for Key {
    fn from(value: i64) -> Self {
        Self::Index(value)
    }
}

impl From<i32> for Key {
    fn from(value: i32) -> Self {
        Self::Index(i64::from(value))
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        match ArrayKey::from_str_key(value) {
            ArrayKey::Int(i) => Self::Index(i),
            ArrayKey::Str(_) => Self::Name(value.to_string()),
        }
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        match ArrayKey::from_str_key(&value) {
            ArrayKey::Int(i) => Self::Index(i),
            ArrayKey::Str(_) => Self::Name(value),
        }
    }
}

impl From<Key> for HostValue {
    fn from(key: Key) -> Self {
        match key {
            Key::Index(i) => Self::Int(i),
            Key::Name(s) => Self::String(s),
        }
    }
}

fn unexpected(reply: &HostValue) -> Error {
    Error::Engine(format!("unexpected proxy reply: {reply:?}"))
}

fn expect_bool(reply: HostValue) -> Result<bool> {
    reply.as_bool().ok_or_else(|| unexpected(&reply))
}

fn expect_int(reply: HostValue) -> Result<i64> {
    match reply {
        HostValue::Int(i) => Ok(i),
        other => Err(unexpected(&other)),
    }
}

/// Completes a bound method call, answering the script's `Js\Wait` if it
/// passed one.
fn settle_wait(wait: Option<WaitCallback>, result: Result<HostValue>) -> HostResult {
    let result = result.map_err(HostError::from);
    match wait {
        Some(wait) => {
            wait.settle(result.clone());
            result
        }
        None => result,
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(i) => write!(f, "{i}"),
            Self::Name(s) => f.write_str(s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_strings_share_the_integer_key() {
        assert_eq!(Key::from("5"), Key::Index(5));
        assert_eq!(Key::from("-3"), Key::Index(-3));
        assert_eq!(Key::from("05"), Key::Name("05".into()));
        assert_eq!(Key::from("+1"), Key::Name("+1".into()));
        assert_eq!(Key::from_value(&HostValue::Float(2.0)), Some(Key::Index(2)));
        assert_eq!(Key::from_value(&HostValue::Float(2.5)), None);
        assert_eq!(Key::from_value(&HostValue::Null), None);
    }
}
