//! Flow-controlled output and input for one request.
//!
//! The engine's writes, reads and header lines all go through a
//! [`StreamWrapper`]. Writes are acknowledged through a [`FlushCallback`]
//! once the sink has taken the bytes; a sink that buffers reports progress
//! through [`SinkEvents`].

mod header;
mod sink;

use std::{collections::VecDeque, sync::Arc};

use bytes::{Bytes, BytesMut};
use conduit_engine::BoxError;
use futures::{StreamExt as _, stream::BoxStream};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{trace, warn};

pub use self::sink::{BufferSink, OutputSink, ResponseHead, StdoutSink};
use self::header::{HeaderLine, Malformed};

/// Request body chunks.
pub type InputSource = BoxStream<'static, Result<Bytes, BoxError>>;

/// Fires exactly once with the outcome of a write.
pub type FlushCallback = oneshot::Sender<Result<(), StreamError>>;

#[derive(Error, Debug, Clone)]
pub enum StreamError {
    #[error("stream closed")]
    Closed,
    #[error("stream finished")]
    Finished,
    #[error("output error: {0}")]
    Sink(Arc<BoxError>),
    #[error("input error: {0}")]
    Source(Arc<BoxError>),
}

/// Sink lifecycle notifications.
#[derive(Debug)]
pub enum SinkEvent {
    /// Everything buffered so far has been flushed.
    Drain,
    Error(BoxError),
    Close,
    Finish,
}

#[derive(Default)]
struct WriteState {
    flushed: bool,
    callbacks: VecDeque<FlushCallback>,
    error: Option<StreamError>,
    drains: u64,
}

impl WriteState {
    fn drain(&mut self) {
        self.flushed = true;
        self.drains += 1;
        for callback in self.callbacks.drain(..) {
            let _ = callback.send(Ok(()));
        }
    }

    fn fail(&mut self, err: StreamError) {
        if self.error.is_some() {
            return;
        }
        for callback in self.callbacks.drain(..) {
            let _ = callback.send(Err(err.clone()));
        }
        self.error = Some(err);
    }
}

/// Handle a sink uses to report [`SinkEvent`]s to its wrapper.
#[derive(Clone)]
pub struct SinkEvents(Arc<Mutex<WriteState>>);

impl SinkEvents {
    pub fn emit(&self, event: SinkEvent) {
        let mut state = self.0.lock();
        match event {
            SinkEvent::Drain => state.drain(),
            SinkEvent::Error(err) => state.fail(StreamError::Sink(Arc::new(err))),
            SinkEvent::Close => state.fail(StreamError::Closed),
            SinkEvent::Finish => state.fail(StreamError::Finished),
        }
    }
}

struct InputState {
    source: Option<InputSource>,
    leftover: Bytes,
    error: Option<StreamError>,
}

pub struct StreamWrapper {
    sink: Mutex<Box<dyn OutputSink>>,
    state: Arc<Mutex<WriteState>>,
    /// Fair lock: reads are served in the order they were issued.
    input: tokio::sync::Mutex<InputState>,
}

impl StreamWrapper {
    #[must_use]
    pub fn new(mut output: Box<dyn OutputSink>, input: Option<InputSource>) -> Self {
        let state = Arc::new(Mutex::new(WriteState {
            flushed: true,
            ..WriteState::default()
        }));
        output.subscribe(SinkEvents(state.clone()));
        Self {
            sink: Mutex::new(output),
            state,
            input: tokio::sync::Mutex::new(InputState {
                source: input,
                leftover: Bytes::new(),
                error: None,
            }),
        }
    }

    /// Writes `data`, returning whether the sink accepted it without
    /// buffering. `on_flushed` fires once the bytes have been flushed, in
    /// write order.
    ///
    /// A zero-length write only waits for earlier writes to flush.
    ///
    /// # Errors
    ///
    /// The recorded terminal error, once the sink has failed, closed or
    /// finished. `on_flushed` receives the same error.
    pub fn write(&self, data: Bytes, on_flushed: Option<FlushCallback>) -> Result<bool, StreamError> {
        let epoch = {
            let mut state = self.state.lock();
            if let Some(err) = state.error.clone() {
                if let Some(callback) = on_flushed {
                    let _ = callback.send(Err(err.clone()));
                }
                return Err(err);
            }
            if data.is_empty() {
                let flushed = state.flushed && state.callbacks.is_empty();
                match on_flushed {
                    Some(callback) if flushed => {
                        let _ = callback.send(Ok(()));
                    }
                    Some(callback) => state.callbacks.push_back(callback),
                    None => {}
                }
                return Ok(flushed);
            }
            state.drains
        };

        trace!(len = data.len(), "write");
        let accepted = self.sink.lock().write(data);

        let mut state = self.state.lock();
        if let Some(err) = state.error.clone() {
            if let Some(callback) = on_flushed {
                let _ = callback.send(Err(err.clone()));
            }
            return Err(err);
        }
        // A drain emitted while the sink was writing covers this write too.
        let accepted = accepted || state.drains != epoch;
        if accepted && state.callbacks.is_empty() {
            state.flushed = true;
            if let Some(callback) = on_flushed {
                let _ = callback.send(Ok(()));
            }
        } else {
            state.flushed = false;
            if let Some(callback) = on_flushed {
                state.callbacks.push_back(callback);
            }
        }
        Ok(accepted)
    }

    /// Waits until everything written so far has been flushed.
    ///
    /// # Errors
    ///
    /// The terminal error if the sink fails before or while flushing.
    pub async fn flush(&self) -> Result<(), StreamError> {
        let (tx, rx) = oneshot::channel();
        self.write(Bytes::new(), Some(tx))?;
        rx.await.unwrap_or(Err(StreamError::Closed))
    }

    /// Reads up to `size` bytes. Short results only happen at the end of the
    /// input; after the end every read is empty.
    ///
    /// # Errors
    ///
    /// A source failure, reported once any bytes read before it have been
    /// returned; it is reported again by every later read.
    pub async fn read(&self, size: usize) -> Result<Bytes, StreamError> {
        let mut input = self.input.lock().await;
        if size == 0 {
            return Ok(Bytes::new());
        }
        let mut out = BytesMut::with_capacity(size);
        take_into(&mut out, &mut input.leftover, size);
        while out.len() < size && input.error.is_none() {
            let Some(source) = input.source.as_mut() else {
                break;
            };
            match source.next().await {
                Some(Ok(mut chunk)) => {
                    if take_into(&mut out, &mut chunk, size) {
                        input.leftover = chunk;
                    }
                }
                Some(Err(err)) => {
                    input.source = None;
                    input.error = Some(StreamError::Source(Arc::new(err)));
                }
                None => input.source = None,
            }
        }
        if out.is_empty()
            && let Some(err) = &input.error
        {
            return Err(err.clone());
        }
        Ok(out.freeze())
    }

    /// Applies one raw header line from the engine. `None` ends the header
    /// block.
    pub fn send_header(&self, line: Option<&[u8]>) {
        let Some(line) = line else {
            trace!("end of headers");
            return;
        };
        let mut sink = self.sink.lock();
        let Some(head) = sink.response_head() else {
            trace!("sink has no response head, header ignored");
            return;
        };
        match header::parse(line) {
            Ok(HeaderLine::Status { code, reason }) => head.set_status(code, reason.as_deref()),
            Ok(HeaderLine::Field { name, value }) => head.append_header(name, value),
            Err(kind) => {
                let line = String::from_utf8_lossy(line);
                match kind {
                    Malformed::Status => warn!(%line, "malformed status line dropped"),
                    Malformed::Field => warn!(%line, "invalid header dropped"),
                    Malformed::Unrecognized => warn!(%line, "unrecognized header line dropped"),
                }
            }
        }
    }
}

/// Moves up to `size - out.len()` bytes from `chunk` into `out`; returns
/// whether `chunk` still holds bytes.
fn take_into(out: &mut BytesMut, chunk: &mut Bytes, size: usize) -> bool {
    let n = chunk.len().min(size - out.len());
    out.extend_from_slice(&chunk.split_to(n));
    !chunk.is_empty()
}

#[cfg(test)]
mod tests {
    use futures::stream;

    use super::*;

    /// Buffers every write until the test drains it.
    #[derive(Clone, Default)]
    struct ThrottledSink {
        events: Arc<Mutex<Option<SinkEvents>>>,
        written: Arc<Mutex<Vec<u8>>>,
    }

    impl ThrottledSink {
        fn emit(&self, event: SinkEvent) {
            if let Some(events) = &*self.events.lock() {
                events.emit(event);
            }
        }
    }

    impl OutputSink for ThrottledSink {
        fn write(&mut self, data: Bytes) -> bool {
            self.written.lock().extend_from_slice(&data);
            false
        }

        fn subscribe(&mut self, events: SinkEvents) {
            *self.events.lock() = Some(events);
        }
    }

    fn chunks(parts: &[&'static str]) -> InputSource {
        stream::iter(
            parts
                .iter()
                .map(|p| Ok(Bytes::from_static(p.as_bytes())))
                .collect::<Vec<_>>(),
        )
        .boxed()
    }

    #[tokio::test]
    async fn accepted_writes_flush_immediately() {
        let sink = BufferSink::new();
        let wrapper = StreamWrapper::new(Box::new(sink.clone()), None);
        let (tx, mut rx) = oneshot::channel();
        assert!(wrapper.write(Bytes::from_static(b"hi"), Some(tx)).unwrap());
        assert!(matches!(rx.try_recv(), Ok(Ok(()))));
        wrapper.flush().await.unwrap();
        assert_eq!(sink.body_string(), "hi");
    }

    #[tokio::test]
    async fn buffered_writes_wait_for_drain_in_order() {
        let sink = ThrottledSink::default();
        let wrapper = StreamWrapper::new(Box::new(sink.clone()), None);
        let (first, mut first_rx) = oneshot::channel();
        let (second, mut second_rx) = oneshot::channel();
        let (empty, mut empty_rx) = oneshot::channel();
        assert!(!wrapper.write(Bytes::from_static(b"a"), Some(first)).unwrap());
        assert!(!wrapper.write(Bytes::from_static(b"b"), Some(second)).unwrap());
        assert!(!wrapper.write(Bytes::new(), Some(empty)).unwrap());
        assert!(first_rx.try_recv().is_err());
        assert!(empty_rx.try_recv().is_err());

        sink.emit(SinkEvent::Drain);
        assert!(matches!(first_rx.try_recv(), Ok(Ok(()))));
        assert!(matches!(second_rx.try_recv(), Ok(Ok(()))));
        assert!(matches!(empty_rx.try_recv(), Ok(Ok(()))));
        assert_eq!(*sink.written.lock(), b"ab");
        wrapper.flush().await.unwrap();
    }

    #[tokio::test]
    async fn terminal_events_fail_pending_and_later_writes() {
        let sink = ThrottledSink::default();
        let wrapper = StreamWrapper::new(Box::new(sink.clone()), None);
        let (pending, mut pending_rx) = oneshot::channel();
        wrapper.write(Bytes::from_static(b"a"), Some(pending)).unwrap();

        sink.emit(SinkEvent::Close);
        assert!(matches!(pending_rx.try_recv(), Ok(Err(StreamError::Closed))));

        let (late, mut late_rx) = oneshot::channel();
        let err = wrapper.write(Bytes::from_static(b"b"), Some(late)).unwrap_err();
        assert!(matches!(err, StreamError::Closed));
        assert!(matches!(late_rx.try_recv(), Ok(Err(StreamError::Closed))));
        assert!(matches!(wrapper.flush().await, Err(StreamError::Closed)));
        // Later events do not replace the first error.
        sink.emit(SinkEvent::Finish);
        assert!(matches!(wrapper.flush().await, Err(StreamError::Closed)));
        assert_eq!(*sink.written.lock(), b"a");
    }

    #[tokio::test]
    async fn sink_errors_are_recorded() {
        let sink = ThrottledSink::default();
        let wrapper = StreamWrapper::new(Box::new(sink.clone()), None);
        sink.emit(SinkEvent::Error("disk full".into()));
        let err = wrapper.write(Bytes::from_static(b"x"), None).unwrap_err();
        assert_eq!(err.to_string(), "output error: disk full");
    }

    #[tokio::test]
    async fn reads_keep_leftovers_and_end_cleanly() {
        let wrapper = StreamWrapper::new(Box::new(BufferSink::new()), Some(chunks(&["abc", "defgh", "ij"])));
        assert_eq!(wrapper.read(4).await.unwrap(), "abcd");
        assert_eq!(wrapper.read(2).await.unwrap(), "ef");
        assert_eq!(wrapper.read(0).await.unwrap(), "");
        assert_eq!(wrapper.read(10).await.unwrap(), "ghij");
        assert_eq!(wrapper.read(10).await.unwrap(), "");
        assert_eq!(wrapper.read(1).await.unwrap(), "");
    }

    #[tokio::test]
    async fn missing_input_reads_empty() {
        let wrapper = StreamWrapper::new(Box::new(BufferSink::new()), None);
        assert_eq!(wrapper.read(8).await.unwrap(), "");
    }

    #[tokio::test]
    async fn source_errors_follow_partial_data() {
        let source = stream::iter(vec![
            Ok(Bytes::from_static(b"ok")),
            Err::<Bytes, BoxError>("reset".into()),
        ])
        .boxed();
        let wrapper = StreamWrapper::new(Box::new(BufferSink::new()), Some(source));
        assert_eq!(wrapper.read(8).await.unwrap(), "ok");
        let err = wrapper.read(8).await.unwrap_err();
        assert_eq!(err.to_string(), "input error: reset");
        assert!(wrapper.read(8).await.is_err());
    }

    #[tokio::test]
    async fn concurrent_reads_are_served_in_order() {
        let wrapper = StreamWrapper::new(Box::new(BufferSink::new()), Some(chunks(&["12", "34", "56"])));
        let (first, second) = tokio::join!(wrapper.read(3), wrapper.read(3));
        assert_eq!(first.unwrap(), "123");
        assert_eq!(second.unwrap(), "456");
    }

    #[test]
    fn headers_reach_the_response_head() {
        let sink = BufferSink::new();
        let wrapper = StreamWrapper::new(Box::new(sink.clone()), None);
        wrapper.send_header(Some(b"HTTP/1.1 201 Made"));
        wrapper.send_header(Some(b"Set-Cookie: a=b"));
        wrapper.send_header(Some(b"Set-Cookie: c=d; path=/"));
        wrapper.send_header(Some(b"garbage"));
        wrapper.send_header(None);
        assert_eq!(sink.status(), http::StatusCode::CREATED);
        assert_eq!(sink.reason().as_deref(), Some("Made"));
        assert_eq!(sink.header_values("set-cookie"), ["a=b", "c=d; path=/"]);
        assert_eq!(sink.headers().len(), 2);
    }

    #[test]
    fn sinks_without_a_head_ignore_headers() {
        let sink = ThrottledSink::default();
        let wrapper = StreamWrapper::new(Box::new(sink), None);
        wrapper.send_header(Some(b"X-A: 1"));
    }
}
