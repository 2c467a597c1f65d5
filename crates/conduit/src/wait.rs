//! Host calls that finish through a callback.
//!
//! When the script passes `new Js\Wait()` to a host function, the function
//! receives a [`WaitCallback`] and the script stays suspended until the
//! callback is consumed. The host loop keeps running in the meantime.

use tokio::sync::oneshot;
use tracing::debug;

use crate::{
    error::HostError,
    value::{HostResult, HostValue},
};

const DROPPED: &str = "callback dropped";

/// One-shot completion handle for a suspended script call.
///
/// Consumed by [`resolve`](Self::resolve) or [`reject`](Self::reject);
/// dropping it unresolved rejects the call.
#[derive(Debug)]
pub struct WaitCallback {
    tx: Option<oneshot::Sender<HostResult>>,
}

impl WaitCallback {
    pub fn resolve(mut self, value: impl Into<HostValue>) {
        self.complete(Ok(value.into()));
    }

    pub fn reject(mut self, err: impl Into<HostError>) {
        self.complete(Err(err.into()));
    }

    /// Completes with a result, as [`resolve`](Self::resolve) or
    /// [`reject`](Self::reject) would.
    pub fn settle(mut self, result: HostResult) {
        self.complete(result);
    }

    fn complete(&mut self, result: HostResult) {
        let Some(tx) = self.tx.take() else {
            return;
        };
        if tx.send(result).is_err() {
            debug!("wait callback fired after its call settled");
        }
    }
}

impl Drop for WaitCallback {
    fn drop(&mut self) {
        self.complete(Err(HostError::new(DROPPED)));
    }
}

/// Per-call state on the host loop.
///
/// The call moves from calling to waiting once the function has returned
/// without error; an error returned by the function itself settles the call
/// regardless of what the callback does.
#[derive(Debug)]
pub(crate) struct WaitSlot {
    rx: oneshot::Receiver<HostResult>,
}

impl WaitSlot {
    pub(crate) fn new() -> (Self, WaitCallback) {
        let (tx, rx) = oneshot::channel();
        (Self { rx }, WaitCallback { tx: Some(tx) })
    }

    /// Settles the call given the function's own result.
    pub(crate) async fn settle(self, returned: HostResult) -> HostResult {
        if let Err(err) = returned {
            debug!(%err, "host function failed before its callback");
            return Err(err);
        }
        debug!("waiting for host callback");
        self.rx
            .await
            .unwrap_or_else(|_| Err(HostError::new(DROPPED)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn callback_value_is_the_result() {
        let (slot, callback) = WaitSlot::new();
        callback.resolve(24);
        assert_eq!(slot.settle(Ok(HostValue::Undefined)).await.unwrap(), HostValue::Int(24));
    }

    #[tokio::test]
    async fn returned_error_wins_over_an_early_callback() {
        let (slot, callback) = WaitSlot::new();
        callback.resolve("late");
        let err = slot.settle(Err(HostError::new("sync"))).await.unwrap_err();
        assert_eq!(err.message(), "sync");
    }

    #[tokio::test]
    async fn callback_after_a_returned_error_is_ignored() {
        let (slot, callback) = WaitSlot::new();
        let err = slot.settle(Err(HostError::new("sync"))).await.unwrap_err();
        assert_eq!(err.message(), "sync");
        callback.reject(HostError::new("late"));
    }

    #[tokio::test]
    async fn dropped_callback_rejects() {
        let (slot, callback) = WaitSlot::new();
        let pending = tokio::spawn(slot.settle(Ok(HostValue::Null)));
        drop(callback);
        let err = pending.await.unwrap().unwrap_err();
        assert_eq!(err.message(), DROPPED);
    }
}
