use std::{
    cell::{Cell, RefCell, RefMut},
    collections::{HashMap, HashSet, VecDeque},
    rc::Rc,
};

use bytes::Bytes;
use conduit_engine::{Interpreter, ObjRef, Sapi, SapiError};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::{
    TRACE_TARGET_SCRIPT,
    error::{Error, Result},
    internal::{
        handles::HandleTable,
        link::{EngineLink, ProxyOp, Reply, ToEngine, ToHost},
    },
    proxy,
    value::HostValue,
};

const HOST_GONE: &str = "host side of the request went away";

type PendingOp = (ProxyOp, oneshot::Sender<Result<HostValue>>);

/// Engine-thread end of a request.
///
/// Every blocking exchange with the host loop goes through [`Bridge::wait`],
/// which keeps proxy operations flowing while the script is suspended.
pub(crate) struct Bridge {
    to_host: mpsc::UnboundedSender<ToHost>,
    inbox: RefCell<mpsc::UnboundedReceiver<ToEngine>>,
    link: EngineLink,
    handles: RefCell<HandleTable>,
    /// `Js\Object` wrappers of host values, by host identity.
    wrappers: RefCell<HashMap<usize, ObjRef>>,
    /// Replies that arrived while a nested exchange was waiting.
    stash: RefCell<HashMap<u64, Reply>>,
    outstanding: RefCell<HashSet<u64>>,
    /// Proxy operations received while no interpreter was at hand.
    deferred: RefCell<VecDeque<PendingOp>>,
    next_seq: Cell<u64>,
    shut_down: Cell<bool>,
}

impl Bridge {
    pub(crate) fn new(
        to_host: mpsc::UnboundedSender<ToHost>,
        inbox: mpsc::UnboundedReceiver<ToEngine>,
        link: EngineLink,
    ) -> Self {
        Self {
            to_host,
            inbox: RefCell::new(inbox),
            link,
            handles: RefCell::default(),
            wrappers: RefCell::default(),
            stash: RefCell::default(),
            outstanding: RefCell::default(),
            deferred: RefCell::default(),
            next_seq: Cell::new(1),
            shut_down: Cell::new(false),
        }
    }

    pub(crate) const fn link(&self) -> &EngineLink {
        &self.link
    }

    pub(crate) fn handles(&self) -> RefMut<'_, HandleTable> {
        self.handles.borrow_mut()
    }

    pub(crate) fn wrapper(&self, identity: usize) -> Option<ObjRef> {
        self.wrappers.borrow().get(&identity).cloned()
    }

    pub(crate) fn remember_wrapper(&self, identity: usize, obj: ObjRef) {
        self.wrappers.borrow_mut().insert(identity, obj);
    }

    pub(crate) fn send(&self, message: ToHost) -> Result<(), SapiError> {
        self.to_host
            .send(message)
            .map_err(|_| SapiError::new(HOST_GONE))
    }

    /// Sends a request built from a fresh sequence number and blocks until
    /// its reply arrives.
    ///
    /// With an interpreter at hand, proxy operations are served while
    /// waiting; without one they are queued for the next chance.
    pub(crate) fn roundtrip(
        this: &Rc<Self>,
        interp: Option<&mut Interpreter>,
        message: impl FnOnce(u64) -> ToHost,
    ) -> Result<Reply, SapiError> {
        let seq = this.next_seq.get();
        this.next_seq.set(seq + 1);
        this.outstanding.borrow_mut().insert(seq);
        let result = this
            .send(message(seq))
            .and_then(|()| Self::wait(this, seq, interp));
        this.outstanding.borrow_mut().remove(&seq);
        result
    }

    fn wait(this: &Rc<Self>, seq: u64, mut interp: Option<&mut Interpreter>) -> Result<Reply, SapiError> {
        loop {
            if let Some(interp) = interp.as_deref_mut() {
                Self::serve_deferred(this, interp);
            }
            let stashed = this.stash.borrow_mut().remove(&seq);
            if let Some(reply) = stashed {
                return Ok(reply);
            }
            if this.shut_down.get() {
                return Err(SapiError::new(HOST_GONE));
            }
            let message = this.inbox.borrow_mut().blocking_recv();
            match message {
                Some(ToEngine::Reply { seq: got, reply }) if got == seq => return Ok(reply),
                Some(ToEngine::Reply { seq: got, reply }) => {
                    if this.outstanding.borrow().contains(&got) {
                        this.stash.borrow_mut().insert(got, reply);
                    } else {
                        debug!(seq = got, "discarding reply for a settled exchange");
                    }
                }
                Some(ToEngine::Op { op, reply }) => match interp.as_deref_mut() {
                    Some(interp) => Self::serve(this, interp, op, reply),
                    None => this.deferred.borrow_mut().push_back((op, reply)),
                },
                Some(ToEngine::Shutdown) | None => {
                    this.shut_down.set(true);
                    return Err(SapiError::new(HOST_GONE));
                }
            }
        }
    }

    /// Serves proxy operations after the script has finished, until the
    /// host loop shuts the engine down.
    pub(crate) fn idle(this: &Rc<Self>, interp: &mut Interpreter) {
        loop {
            Self::serve_deferred(this, interp);
            if this.shut_down.get() {
                break;
            }
            let message = this.inbox.borrow_mut().blocking_recv();
            match message {
                Some(ToEngine::Op { op, reply }) => Self::serve(this, interp, op, reply),
                Some(ToEngine::Reply { seq, .. }) => {
                    debug!(seq, "discarding reply after the script finished");
                }
                Some(ToEngine::Shutdown) | None => this.shut_down.set(true),
            }
        }
        let abandoned = this.deferred.borrow_mut().len();
        if abandoned > 0 {
            debug!(abandoned, "proxy operations left unserved at shutdown");
        }
    }

    /// Drops every script value held for the host. Wrappers point back at
    /// the bridge, so this breaks the cycle before the thread exits.
    pub(crate) fn release(&self) {
        self.wrappers.borrow_mut().clear();
        *self.handles.borrow_mut() = HandleTable::default();
        self.stash.borrow_mut().clear();
        self.deferred.borrow_mut().clear();
    }

    fn serve_deferred(this: &Rc<Self>, interp: &mut Interpreter) {
        loop {
            let next = this.deferred.borrow_mut().pop_front();
            let Some((op, reply)) = next else {
                break;
            };
            Self::serve(this, interp, op, reply);
        }
    }

    fn serve(this: &Rc<Self>, interp: &mut Interpreter, op: ProxyOp, reply: oneshot::Sender<Result<HostValue>>) {
        let result = Self::apply(this, interp, op);
        if reply.send(result).is_err() {
            debug!("proxy caller went away before its reply");
        }
    }

    fn apply(this: &Rc<Self>, interp: &mut Interpreter, op: ProxyOp) -> Result<HostValue> {
        match op {
            ProxyOp::Container { handle, op } => {
                let slot = this.handles.borrow().container_slot(handle);
                let slot = slot.ok_or_else(|| Error::Engine("unknown container handle".into()))?;
                proxy::container::apply(this, interp, &slot, op)
            }
            ProxyOp::Object { handle, op } => {
                let obj = this.handles.borrow().object_ref(handle);
                let obj = obj.ok_or_else(|| Error::Engine("unknown object handle".into()))?;
                proxy::object::apply(this, interp, &obj, op)
            }
        }
    }
}

/// The engine's I/O, carried over to the host loop.
pub(crate) struct EngineSapi {
    bridge: Rc<Bridge>,
}

impl EngineSapi {
    pub(crate) const fn new(bridge: Rc<Bridge>) -> Self {
        Self { bridge }
    }
}

fn unexpected(reply: &Reply) -> SapiError {
    SapiError::new(format!("unexpected reply from host: {reply:?}"))
}

impl Sapi for EngineSapi {
    fn write(&mut self, data: &[u8]) -> Result<(), SapiError> {
        let data = Bytes::copy_from_slice(data);
        match Bridge::roundtrip(&self.bridge, None, |seq| ToHost::Write { seq, data })? {
            Reply::Unit(result) => result.map_err(SapiError::new),
            other => Err(unexpected(&other)),
        }
    }

    fn send_header(&mut self, line: Option<&[u8]>) -> Result<(), SapiError> {
        self.bridge.send(ToHost::Header(line.map(Bytes::copy_from_slice)))
    }

    fn read_input(&mut self, max: usize) -> Result<Bytes, SapiError> {
        read_input(&self.bridge, max)
    }

    fn flush(&mut self) -> Result<(), SapiError> {
        match Bridge::roundtrip(&self.bridge, None, |seq| ToHost::Flush { seq })? {
            Reply::Unit(result) => result.map_err(SapiError::new),
            other => Err(unexpected(&other)),
        }
    }

    fn log(&mut self, message: &str) {
        tracing::info!(target: TRACE_TARGET_SCRIPT, "{message}");
    }
}

pub(crate) fn read_input(bridge: &Rc<Bridge>, max: usize) -> Result<Bytes, SapiError> {
    match Bridge::roundtrip(bridge, None, |seq| ToHost::Read { seq, max })? {
        Reply::Data(result) => result.map_err(SapiError::new),
        other => Err(unexpected(&other)),
    }
}
