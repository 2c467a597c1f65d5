//! One script execution: what to run, what it sees, where it writes.

use std::{fmt, net::SocketAddr, path::PathBuf};

use bytes::Bytes;
use conduit_engine::BoxError;
use futures::Stream;
use http::{HeaderMap, HeaderName, HeaderValue, Method, Uri, Version};

use crate::{
    stream::{InputSource, OutputSink, StdoutSink},
    value::HostValue,
};

pub(crate) mod driver;
pub(crate) mod env;

pub use env::ServerVars;

/// Hook run on the finished environment before the script starts. Its
/// changes win over everything derived.
pub type ServerInit = Box<dyn FnOnce(&mut ServerVars) + Send>;

pub(crate) enum Script {
    Source(String),
    File(PathBuf),
}

/// A script invocation, built up and handed to
/// [`Runtime::execute`](crate::Runtime::execute).
///
/// ```no_run
/// # async fn demo(runtime: &conduit::Runtime) -> conduit::Result<()> {
/// use conduit::{BufferSink, HostObject, Request};
///
/// let out = BufferSink::new();
/// let context = HostObject::new().with("name", "world");
/// let request = Request::source(r#"call_user_func(function () {
///     echo "hello ", $_SERVER['CONTEXT']->name;
///     return 42;
/// })"#)
/// .context(context)
/// .output(out.clone());
/// let value = runtime.execute(request).await?;
/// assert_eq!(value.as_int(), Some(42));
/// assert_eq!(out.body_string(), "hello world");
/// # Ok(())
/// # }
/// ```
pub struct Request {
    pub(crate) script: Script,
    pub(crate) args: Vec<String>,
    pub(crate) context: HostValue,
    pub(crate) output: Box<dyn OutputSink>,
    pub(crate) input: Option<InputSource>,
    pub(crate) http: Option<HttpRequestInfo>,
    pub(crate) server_init: Option<ServerInit>,
}

impl Request {
    fn new(script: Script) -> Self {
        Self {
            script,
            args: Vec::new(),
            context: HostValue::Undefined,
            output: Box::new(StdoutSink::new()),
            input: None,
            http: None,
            server_init: None,
        }
    }

    /// Evaluates `code`. The value of its first expression statement is the
    /// request's result.
    #[must_use]
    pub fn source(code: impl Into<String>) -> Self {
        Self::new(Script::Source(code.into()))
    }

    /// Runs a script file, whose `return` value is the request's result.
    #[must_use]
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::new(Script::File(path.into()))
    }

    /// Positional arguments, exposed as `$argv`/`$argc`. Without any, the
    /// two variables are not defined.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Value exposed as `$_SERVER['CONTEXT']`.
    #[must_use]
    pub fn context(mut self, context: impl Into<HostValue>) -> Self {
        self.context = context.into();
        self
    }

    /// Where output and headers go. Defaults to standard output.
    #[must_use]
    pub fn output(mut self, sink: impl OutputSink) -> Self {
        self.output = Box::new(sink);
        self
    }

    /// Request body, read by `$_POST` population and `php://input`.
    #[must_use]
    pub fn input<S>(mut self, source: S) -> Self
    where
        S: Stream<Item = Result<Bytes, BoxError>> + Send + 'static,
    {
        self.input = Some(Box::pin(source));
        self
    }

    /// Incoming HTTP request the script answers.
    #[must_use]
    pub fn http(mut self, info: HttpRequestInfo) -> Self {
        self.http = Some(info);
        self
    }

    #[must_use]
    pub fn server_init(mut self, init: impl FnOnce(&mut ServerVars) + Send + 'static) -> Self {
        self.server_init = Some(Box::new(init));
        self
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let script = match &self.script {
            Script::Source(_) => "source".to_string(),
            Script::File(path) => path.display().to_string(),
        };
        f.debug_struct("Request")
            .field("script", &script)
            .field("args", &self.args)
            .field("context", &self.context)
            .field("http", &self.http)
            .finish_non_exhaustive()
    }
}

/// Metadata of an incoming HTTP request, used to derive `$_SERVER`,
/// `$_GET` and `$_COOKIE`.
#[derive(Debug, Clone)]
pub struct HttpRequestInfo {
    pub method: Method,
    pub uri: Uri,
    pub version: Version,
    pub headers: HeaderMap,
    pub remote_addr: Option<SocketAddr>,
    pub local_addr: Option<SocketAddr>,
}

impl HttpRequestInfo {
    #[must_use]
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
            remote_addr: None,
            local_addr: None,
        }
    }

    #[must_use]
    pub fn from_parts(parts: &http::request::Parts) -> Self {
        Self {
            method: parts.method.clone(),
            uri: parts.uri.clone(),
            version: parts.version,
            headers: parts.headers.clone(),
            remote_addr: None,
            local_addr: None,
        }
    }

    #[must_use]
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    #[must_use]
    pub fn version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    #[must_use]
    pub fn remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    #[must_use]
    pub fn local_addr(mut self, addr: SocketAddr) -> Self {
        self.local_addr = Some(addr);
        self
    }
}
