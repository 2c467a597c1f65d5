use std::any::Any;

use bytes::Bytes;

use crate::{Interpreter, error::{Result, SapiError}, value::Value};

/// The engine's view of the outside world for one request.
///
/// Every call blocks the script until the embedding has handled it.
pub trait Sapi {
    /// Writes body bytes. Headers have already been sent.
    fn write(&mut self, data: &[u8]) -> Result<(), SapiError>;

    /// Emits one raw header line; `None` terminates the header block.
    fn send_header(&mut self, line: Option<&[u8]>) -> Result<(), SapiError>;

    /// Reads up to `max` bytes of request body. An empty result means the
    /// body is exhausted.
    fn read_input(&mut self, max: usize) -> Result<Bytes, SapiError>;

    /// Waits until previously written output has been handed off.
    fn flush(&mut self) -> Result<(), SapiError> {
        Ok(())
    }

    /// Receives `error_log()` messages.
    fn log(&mut self, message: &str) {
        tracing::info!(target: crate::TRACE_TARGET_LOG, "{message}");
    }
}

/// How `isset`/`empty`/existence checks ask a foreign value about a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HasMode {
    /// `isset()`: present and not null.
    Isset,
    /// `!empty()`: present and truthy.
    NotEmpty,
    /// Present at all, even when null.
    Exists,
}

/// A value owned by the embedding, visible to scripts as a `Js\Object`.
pub trait Foreign {
    fn get(&self, interp: &mut Interpreter, name: &str) -> Result<Value>;

    fn set(&self, interp: &mut Interpreter, name: &str, value: Value) -> Result<()>;

    fn has(&self, interp: &mut Interpreter, name: &str, mode: HasMode) -> Result<bool>;

    fn unset(&self, interp: &mut Interpreter, name: &str) -> Result<()>;

    /// Calls a method (`Some(name)`) or the value itself (`None`).
    fn call(&self, interp: &mut Interpreter, method: Option<&str>, args: Vec<Value>)
        -> Result<Value>;

    fn as_any(&self) -> &dyn Any;
}
