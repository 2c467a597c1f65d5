//! A single-threaded interpreter for a PHP-dialect scripting language.
//!
//! The engine is synchronous: everything it needs from the outside world
//! (output, request body, host objects) goes through the [`Sapi`] and
//! [`Foreign`] traits, whose calls block until the embedder answers.

mod array;
mod ast;
mod builtins;
pub mod dump;
mod error;
mod interp;
mod lexer;
mod object;
mod ops;
mod parser;
mod sapi;
mod value;

pub const TRACE_TARGET_SCRIPT: &str = "conduit::script";
pub const TRACE_TARGET_LOG: &str = "conduit::error_log";

pub use array::{ArrayData, ArrayKey};
pub use builtins::classes::FOREIGN_CLASS;
pub use builtins::types::encode_json;
pub use error::{BoxError, ParseError, Result, SapiError, Throw};
pub use interp::{Arg, EngineConfig, Interpreter, PropertyLookup};
pub use object::{Class, Closure, Native, ObjRef, Object};
pub use sapi::{Foreign, HasMode, Sapi};
pub use value::{Number, Slot, Value, new_slot};
