use std::sync::Arc;

use anyhow::{Context, Result};
use conduit::{BufferSink, HostValue, Request, Runtime};
use parking_lot::Mutex;

pub(crate) fn runtime() -> Result<Runtime> {
    Runtime::builder().build().context("failed to build runtime")
}

/// Runs `code` with `context` as `$_SERVER['CONTEXT']`, capturing output.
pub(crate) async fn run(code: &str, context: impl Into<HostValue>) -> Result<(HostValue, String)> {
    let out = BufferSink::new();
    let request = Request::source(code).context(context).output(out.clone());
    let value = runtime()?
        .execute(request)
        .await
        .with_context(|| format!("request failed: {code}"))?;
    Ok((value, out.body_string()))
}

/// Request source that runs every statement of `body` inside a closure;
/// its `return` is the request's result.
pub(crate) fn block(body: &str) -> String {
    format!("call_user_func(function () {{ {body} }})")
}

/// Host-side notes taken while a request runs.
#[derive(Clone, Default)]
pub(crate) struct Log(Arc<Mutex<Vec<HostValue>>>);

impl Log {
    pub(crate) fn push(&self, value: impl Into<HostValue>) {
        self.0.lock().push(value.into());
    }

    pub(crate) fn take(&self) -> Vec<HostValue> {
        std::mem::take(&mut *self.0.lock())
    }
}
