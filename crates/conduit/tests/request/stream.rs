use std::sync::Arc;

use anyhow::{Result, bail};
use bytes::Bytes;
use conduit::{
    Error, Request, StreamError,
    stream::{OutputSink, SinkEvent, SinkEvents},
};
use parking_lot::Mutex;

use super::common::runtime;

/// Buffers every write and drains from a background task.
#[derive(Clone, Default)]
struct SlowSink {
    events: Arc<Mutex<Option<SinkEvents>>>,
    written: Arc<Mutex<Vec<u8>>>,
}

impl OutputSink for SlowSink {
    fn write(&mut self, data: Bytes) -> bool {
        self.written.lock().extend_from_slice(&data);
        let events = self.events.clone();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            if let Some(events) = &*events.lock() {
                events.emit(SinkEvent::Drain);
            }
        });
        false
    }

    fn subscribe(&mut self, events: SinkEvents) {
        *self.events.lock() = Some(events);
    }
}

/// Fails on the first write.
#[derive(Default)]
struct BrokenSink {
    events: Option<SinkEvents>,
}

impl OutputSink for BrokenSink {
    fn write(&mut self, _data: Bytes) -> bool {
        if let Some(events) = &self.events {
            events.emit(SinkEvent::Error("disk full".into()));
        }
        false
    }

    fn subscribe(&mut self, events: SinkEvents) {
        self.events = Some(events);
    }
}

#[tokio::test]
async fn buffered_output_is_complete_at_settlement() -> Result<()> {
    let sink = SlowSink::default();
    let request = Request::source("for ($i = 0; $i < 5; $i++) { echo $i; flush(); } echo 'end';").output(sink.clone());
    runtime()?.execute(request).await?;
    let written = sink.written.lock().clone();
    assert_eq!(written, b"01234end");
    Ok(())
}

#[tokio::test]
async fn sink_failure_rejects_the_request() -> Result<()> {
    let request = Request::source("echo 'a'; echo 'b';").output(BrokenSink::default());
    match runtime()?.execute(request).await {
        Err(Error::Stream(StreamError::Sink(err))) => {
            assert_eq!(err.to_string(), "disk full");
            Ok(())
        }
        other => bail!("expected a sink error, got {other:?}"),
    }
}

#[tokio::test]
async fn concurrent_requests_are_independent() -> Result<()> {
    let runtime = runtime()?;
    let a = conduit::BufferSink::new();
    let b = conduit::BufferSink::new();
    let (first, second) = tokio::join!(
        runtime.execute(Request::source("echo 'first'; return 1;").output(a.clone())),
        runtime.execute(Request::source("echo 'second'; return 2;").output(b.clone())),
    );
    assert_eq!(first?.as_int(), Some(1));
    assert_eq!(second?.as_int(), Some(2));
    assert_eq!(a.body_string(), "first");
    assert_eq!(b.body_string(), "second");
    Ok(())
}
