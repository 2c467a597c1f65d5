//! The engine thread of one request.

use std::{rc::Rc, sync::Arc, thread};

use conduit_engine::{EngineConfig, Interpreter, Result as EngineResult, Throw, Value};
use tokio::sync::mpsc;
use tracing::{Span, debug};

use crate::{
    error::{Error, Result},
    internal::{
        bridge::{Bridge, EngineSapi},
        link::{EngineLink, ToEngine, ToHost},
        marshal::{self, PRELUDE},
    },
    request::{Script, ServerVars, env},
};

const THREAD_NAME: &str = "conduit-engine";
/// Stack reserved for the engine itself, on top of what script calls use.
const BASE_STACK: usize = 16 << 20;
/// Stack for one level of script function nesting.
const CALL_STACK: usize = 256 << 10;
const MAX_STACK: usize = 1 << 30;

/// Stack size that lets a script nest calls up to `max_depth` without
/// overflowing.
fn stack_size(max_depth: usize) -> usize {
    max_depth
        .saturating_mul(CALL_STACK)
        .saturating_add(BASE_STACK)
        .min(MAX_STACK)
}

pub(crate) struct EngineJob {
    pub(crate) span: Span,
    pub(crate) config: EngineConfig,
    pub(crate) startup: Option<Arc<str>>,
    pub(crate) script: Script,
    pub(crate) vars: ServerVars,
    pub(crate) args: Vec<String>,
    pub(crate) to_host: mpsc::UnboundedSender<ToHost>,
    pub(crate) inbox: mpsc::UnboundedReceiver<ToEngine>,
    pub(crate) link: EngineLink,
}

/// Starts the engine thread. It reports the script's outcome with
/// [`ToHost::Finished`] and exits once shut down.
pub(crate) fn spawn(job: EngineJob) -> Result<()> {
    thread::Builder::new()
        .name(THREAD_NAME.to_string())
        .stack_size(stack_size(job.config.max_depth))
        .spawn(move || run(job))
        .map(drop)
        .map_err(Error::Io)
}

fn run(job: EngineJob) {
    let EngineJob {
        span,
        config,
        startup,
        script,
        vars,
        args,
        to_host,
        inbox,
        link,
    } = job;
    let _entered = span.enter();

    let bridge = Rc::new(Bridge::new(to_host, inbox, link));
    let mut interp = Interpreter::new(Box::new(EngineSapi::new(bridge.clone())), config);

    let outcome = execute(&bridge, &mut interp, startup.as_deref(), &script, vars, &args);
    let finished = interp.finish();
    let result = outcome
        .and_then(|value| finished.map(|()| value))
        .map(|value| marshal::to_host(&bridge, &value))
        .map_err(marshal::throw_to_error);

    if bridge.send(ToHost::Finished(result)).is_ok() {
        Bridge::idle(&bridge, &mut interp);
    } else {
        debug!("host went away before the script finished");
    }
    bridge.release();
    debug!("engine thread done");
}

fn execute(
    bridge: &Rc<Bridge>,
    interp: &mut Interpreter,
    startup: Option<&str>,
    script: &Script,
    vars: ServerVars,
    args: &[String],
) -> EngineResult<Value> {
    interp.load_prelude(PRELUDE)?;
    if let Some(startup) = startup {
        interp.load_prelude(startup)?;
    }
    env::install(bridge, interp, vars, args)?;
    let outcome = match script {
        Script::Source(code) => interp.eval_source(code),
        Script::File(path) => interp.run_file(path),
    };
    match outcome {
        Err(Throw::Exit(code)) => {
            debug!(code, "script exited");
            Ok(Value::Null)
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::HostValue;

    #[test]
    fn stack_grows_with_call_depth() {
        assert_eq!(stack_size(0), BASE_STACK);
        assert!(stack_size(256) >= 256 * CALL_STACK);
        assert_eq!(stack_size(usize::MAX), MAX_STACK);
    }

    #[test]
    fn spawned_engine_reports_and_idles_until_shutdown() {
        let (to_engine, inbox) = mpsc::unbounded_channel();
        let (to_host, mut rx) = mpsc::unbounded_channel();
        let link = EngineLink::new(to_engine, 1);
        spawn(EngineJob {
            span: Span::none(),
            config: EngineConfig::default(),
            startup: Some(Arc::from("function answer() { return 42; }")),
            script: Script::Source("answer()".to_string()),
            vars: ServerVars::new(),
            args: Vec::new(),
            to_host,
            inbox,
            link: link.clone(),
        })
        .unwrap();

        let mut result = None;
        while let Some(message) = rx.blocking_recv() {
            match message {
                ToHost::Finished(outcome) => {
                    result = Some(outcome);
                    break;
                }
                ToHost::Write { seq, .. } | ToHost::Flush { seq } => {
                    link.reply(seq, crate::internal::link::Reply::Unit(Ok(())));
                }
                _ => {}
            }
        }
        assert_eq!(result.unwrap().unwrap(), HostValue::Int(42));
        link.shutdown();
        assert!(rx.blocking_recv().is_none());
    }
}
