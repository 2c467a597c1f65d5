use std::{io::Write as _, sync::Arc};

use bytes::{Bytes, BytesMut};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use parking_lot::Mutex;
use tokio::{io::AsyncWriteExt as _, sync::mpsc};

use super::{SinkEvent, SinkEvents};

/// Where a request's output goes.
///
/// `write` returns `false` when the data was buffered; the sink must then
/// emit [`SinkEvent::Drain`] once it has been flushed, or a terminal event.
/// A sink that never buffers can ignore `subscribe`.
pub trait OutputSink: Send + 'static {
    fn write(&mut self, data: Bytes) -> bool;

    /// Registers the event handle of the wrapper that owns this sink.
    fn subscribe(&mut self, events: SinkEvents) {
        let _ = events;
    }

    /// Status and header storage, for sinks that have one.
    fn response_head(&mut self) -> Option<&mut dyn ResponseHead> {
        None
    }
}

pub trait ResponseHead {
    fn set_status(&mut self, status: StatusCode, reason: Option<&str>);

    /// Adds a header value, keeping earlier values of the same name.
    fn append_header(&mut self, name: HeaderName, value: HeaderValue);
}

#[derive(Default)]
struct Buffer {
    body: BytesMut,
    status: Option<StatusCode>,
    reason: Option<String>,
    headers: HeaderMap,
}

/// In-memory sink. Clones share the same buffer, so a caller can keep one
/// and hand the other to a request.
#[derive(Clone, Default)]
pub struct BufferSink(Arc<Mutex<Buffer>>);

impl BufferSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn body(&self) -> Bytes {
        self.0.lock().body.clone().freeze()
    }

    /// Body decoded lossily as UTF-8.
    #[must_use]
    pub fn body_string(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().body).into_owned()
    }

    /// Status set by the script, `200` when it never set one.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.0.lock().status.unwrap_or(StatusCode::OK)
    }

    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.0.lock().reason.clone()
    }

    #[must_use]
    pub fn headers(&self) -> HeaderMap {
        self.0.lock().headers.clone()
    }

    /// Every value of a header, in the order they were sent.
    #[must_use]
    pub fn header_values(&self, name: &str) -> Vec<String> {
        self.0
            .lock()
            .headers
            .get_all(name)
            .iter()
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
            .collect()
    }
}

impl OutputSink for BufferSink {
    fn write(&mut self, data: Bytes) -> bool {
        self.0.lock().body.extend_from_slice(&data);
        true
    }

    fn response_head(&mut self) -> Option<&mut dyn ResponseHead> {
        Some(self)
    }
}

impl ResponseHead for BufferSink {
    fn set_status(&mut self, status: StatusCode, reason: Option<&str>) {
        let mut buffer = self.0.lock();
        buffer.status = Some(status);
        buffer.reason = reason.map(str::to_string);
    }

    fn append_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.0.lock().headers.append(name, value);
    }
}

/// Process standard output.
///
/// Once subscribed inside a tokio runtime, chunks are written by a
/// background task and every write is acknowledged through a drain event;
/// otherwise writes go straight to `std::io::stdout`.
#[derive(Default)]
pub struct StdoutSink {
    tx: Option<mpsc::UnboundedSender<Bytes>>,
    events: Option<SinkEvents>,
}

impl StdoutSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn write_blocking(&self, data: &[u8]) -> bool {
        let mut stdout = std::io::stdout().lock();
        match stdout.write_all(data).and_then(|()| stdout.flush()) {
            Ok(()) => true,
            Err(err) => {
                if let Some(events) = &self.events {
                    events.emit(SinkEvent::Error(err.into()));
                }
                false
            }
        }
    }
}

impl OutputSink for StdoutSink {
    fn write(&mut self, data: Bytes) -> bool {
        let Some(tx) = &self.tx else {
            return self.write_blocking(&data);
        };
        match tx.send(data) {
            Ok(()) => false,
            Err(mpsc::error::SendError(data)) => {
                self.tx = None;
                self.write_blocking(&data)
            }
        }
    }

    fn subscribe(&mut self, events: SinkEvents) {
        self.events = Some(events.clone());
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();
        handle.spawn(async move {
            let mut stdout = tokio::io::stdout();
            while let Some(chunk) = rx.recv().await {
                let written = match stdout.write_all(&chunk).await {
                    Ok(()) => stdout.flush().await,
                    Err(err) => Err(err),
                };
                if let Err(err) = written {
                    events.emit(SinkEvent::Error(err.into()));
                    return;
                }
                if rx.is_empty() {
                    events.emit(SinkEvent::Drain);
                }
            }
        });
        self.tx = Some(tx);
    }
}
