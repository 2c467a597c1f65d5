//! Host loop of a request: answers the engine thread until the script
//! settles.

use std::sync::Arc;

use futures::{
    FutureExt as _, StreamExt as _,
    future::BoxFuture,
    stream::FuturesUnordered,
};
use tokio::sync::{mpsc, oneshot};
use tracing::{Instrument as _, Span, debug, info_span, trace};

use super::{Request, env};
use crate::{
    error::{Error, Result},
    internal::{
        engine::{self, EngineJob},
        link::{EngineLink, Reply, ToHost},
    },
    runtime::Runtime,
    stream::{StreamError, StreamWrapper},
    value::{CallArgs, HostValue},
    wait::WaitSlot,
};

/// Stops the engine thread however the host loop exits, including when the
/// request future is dropped.
struct ShutdownGuard(EngineLink);

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        self.0.shutdown();
    }
}

type Pending = FuturesUnordered<BoxFuture<'static, ()>>;

pub(crate) async fn run(runtime: &Runtime, request: Request, id: u64) -> Result<HostValue> {
    let span = info_span!("request", id);
    drive(runtime, request, id, span.clone()).instrument(span).await
}

async fn drive(runtime: &Runtime, request: Request, id: u64, span: Span) -> Result<HostValue> {
    let Request {
        script,
        args,
        context,
        output,
        input,
        http,
        server_init,
    } = request;
    debug!(state = "created");

    let mut vars = env::server_vars(runtime.config(), &script, context, http.as_ref());
    if let Some(init) = server_init {
        init(&mut vars);
    }
    debug!(state = "environment_built", vars = vars.len());

    let stream = Arc::new(StreamWrapper::new(output, input));
    let (to_engine, inbox) = mpsc::unbounded_channel();
    let (to_host, mut rx) = mpsc::unbounded_channel();
    let link = EngineLink::new(to_engine, id);
    let _guard = ShutdownGuard(link.clone());

    engine::spawn(EngineJob {
        span,
        config: runtime.config().engine_config(),
        startup: runtime.startup(),
        script,
        vars,
        args,
        to_host,
        inbox,
        link: link.clone(),
    })?;
    debug!(state = "executing");

    let mut pending = Pending::new();
    let result = loop {
        tokio::select! {
            message = rx.recv() => match message {
                Some(ToHost::Finished(result)) => break result,
                Some(message) => dispatch(&stream, &link, &pending, message),
                None => break Err(Error::Engine("engine thread exited without a result".into())),
            },
            Some(()) = pending.next(), if !pending.is_empty() => {}
        }
    };

    debug!(state = "flushing");
    let flushed = stream.flush().await;
    debug!(state = "settled", ok = result.is_ok() && flushed.is_ok());
    match (result, flushed) {
        (Ok(_), Err(err)) => Err(err.into()),
        (result, _) => result,
    }
}

fn dispatch(stream: &Arc<StreamWrapper>, link: &EngineLink, pending: &Pending, message: ToHost) {
    match message {
        ToHost::Write { seq, data } => {
            let (tx, rx) = oneshot::channel();
            if let Err(err) = stream.write(data, Some(tx)) {
                trace!(%err, "write rejected");
            }
            let link = link.clone();
            pending.push(
                async move {
                    let outcome = rx.await.unwrap_or(Err(StreamError::Closed));
                    link.reply(seq, Reply::Unit(outcome));
                }
                .boxed(),
            );
        }
        ToHost::Header(line) => stream.send_header(line.as_deref()),
        ToHost::Read { seq, max } => {
            let stream = stream.clone();
            let link = link.clone();
            pending.push(
                async move {
                    let data = stream.read(max).await;
                    link.reply(seq, Reply::Data(data));
                }
                .boxed(),
            );
        }
        ToHost::Flush { seq } => {
            let stream = stream.clone();
            let link = link.clone();
            pending.push(
                async move {
                    let outcome = stream.flush().await;
                    link.reply(seq, Reply::Unit(outcome));
                }
                .boxed(),
            );
        }
        ToHost::Call {
            seq,
            function,
            args,
            wait,
        } => {
            trace!(function = function.name().unwrap_or("<anonymous>"), wait, "host call");
            let mut call = CallArgs::new(args);
            let slot = wait.then(|| {
                let (slot, callback) = WaitSlot::new();
                call.wait = Some(callback);
                slot
            });
            // Synchronous bodies run here, before anything else is polled.
            let returned = function.call(call);
            let link = link.clone();
            pending.push(
                async move {
                    let returned = returned.await;
                    let result = match slot {
                        Some(slot) => slot.settle(returned).await,
                        None => returned,
                    };
                    link.reply(seq, Reply::Call(result));
                }
                .boxed(),
            );
        }
        ToHost::Finished(_) => {}
    }
}
