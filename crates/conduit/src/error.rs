use std::sync::Arc;

use conduit_engine::{BoxError, ParseError};
use thiserror::Error;

use crate::stream::StreamError;

pub type Result<T, E = Error> = core::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    /// Uncaught script exception.
    #[error("{class}: {message}")]
    Script { class: String, message: String },

    /// Host error that crossed into the script and was not caught there.
    #[error(transparent)]
    Host(#[from] HostError),

    /// Output sink or input source failure; terminal for the request.
    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    /// A proxy was used after the request that created it settled.
    #[error("request has already settled")]
    Detached,

    /// The engine thread failed outside of script control.
    #[error("engine error: {0}")]
    Engine(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Error raised by host code.
///
/// Cheap to clone so the same value can be rethrown inside the script and
/// surface unchanged as the request's [`Error::Host`].
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct HostError {
    message: Arc<str>,
    #[source]
    source: Option<Arc<dyn std::error::Error + Send + Sync + 'static>>,
}

impl HostError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into().into(),
            source: None,
        }
    }

    /// Wraps an arbitrary error, keeping it reachable through `source()`.
    pub fn from_error(err: impl Into<BoxError>) -> Self {
        let err: BoxError = err.into();
        Self {
            message: err.to_string().into(),
            source: Some(Arc::from(err)),
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether both errors originate from the same raise.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.message, &other.message)
    }
}

impl From<Error> for HostError {
    fn from(value: Error) -> Self {
        match value {
            Error::Host(err) => err,
            other => Self::from_error(other),
        }
    }
}
