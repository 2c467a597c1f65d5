//! Runs scripts of the embedded engine from async host code.
//!
//! Each request gets its own engine thread. The script's output, header
//! lines and body reads travel to the host loop, which applies flow control
//! ([`StreamWrapper`]); host values handed to the script and script values
//! handed back are proxied in both directions.

mod error;
mod internal;
mod proxy;
mod request;
mod runtime;
pub mod stream;
mod value;
mod wait;

pub use conduit_engine::TRACE_TARGET_SCRIPT;

pub use crate::{
    error::{Error, HostError, Result},
    proxy::{ContainerProxy, Key, ObjectProxy},
    request::{HttpRequestInfo, Request, ServerInit, ServerVars},
    runtime::{Runtime, RuntimeBuilder, RuntimeConfig},
    stream::{BufferSink, OutputSink, ResponseHead, StdoutSink, StreamError, StreamWrapper},
    value::{CallArgs, HostFunction, HostObject, HostResult, HostValue},
    wait::WaitCallback,
};
