//! Messages between the host loop and the engine thread.

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use crate::{
    error::{Error, HostError, Result},
    internal::handles::Handle,
    proxy::{ContainerOp, ObjectOp},
    stream::StreamError,
    value::{HostFunction, HostValue},
};

/// Engine → host.
pub(crate) enum ToHost {
    /// Body bytes; answered once the sink has flushed them.
    Write { seq: u64, data: Bytes },
    /// Header line or end of the header block. Not answered.
    Header(Option<Bytes>),
    Read { seq: u64, max: usize },
    Flush { seq: u64 },
    Call {
        seq: u64,
        function: HostFunction,
        args: Vec<HostValue>,
        wait: bool,
    },
    /// The script is done; the engine keeps serving proxy operations until
    /// it is shut down.
    Finished(Result<HostValue>),
}

/// Host → engine.
pub(crate) enum ToEngine {
    Reply { seq: u64, reply: Reply },
    Op {
        op: ProxyOp,
        reply: oneshot::Sender<Result<HostValue>>,
    },
    Shutdown,
}

#[derive(Debug)]
pub(crate) enum Reply {
    Unit(core::result::Result<(), StreamError>),
    Data(core::result::Result<Bytes, StreamError>),
    Call(core::result::Result<HostValue, HostError>),
}

pub(crate) enum ProxyOp {
    Container { handle: Handle, op: ContainerOp },
    Object { handle: Handle, op: ObjectOp },
}

/// Host-side handle on a running request's engine thread.
#[derive(Clone, Debug)]
pub(crate) struct EngineLink {
    tx: mpsc::UnboundedSender<ToEngine>,
    request: u64,
}

impl EngineLink {
    pub(crate) const fn new(tx: mpsc::UnboundedSender<ToEngine>, request: u64) -> Self {
        Self { tx, request }
    }

    pub(crate) const fn request(&self) -> u64 {
        self.request
    }

    pub(crate) fn same_engine(&self, other: &Self) -> bool {
        self.tx.same_channel(&other.tx)
    }

    /// Runs a proxy operation on the engine thread.
    pub(crate) async fn op(&self, op: ProxyOp) -> Result<HostValue> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ToEngine::Op { op, reply })
            .map_err(|_| Error::Detached)?;
        rx.await.map_err(|_| Error::Detached)?
    }

    pub(crate) fn reply(&self, seq: u64, reply: Reply) {
        if self.tx.send(ToEngine::Reply { seq, reply }).is_err() {
            tracing::debug!(seq, "engine gone before reply");
        }
    }

    pub(crate) fn shutdown(&self) {
        let _ = self.tx.send(ToEngine::Shutdown);
    }
}
