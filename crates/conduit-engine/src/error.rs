use std::fmt;

use thiserror::Error;

use crate::object::ObjRef;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Source text could not be parsed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("syntax error, {message} on line {line}")]
pub struct ParseError {
    pub message: String,
    pub line: u32,
}

impl ParseError {
    pub(crate) fn new(message: impl Into<String>, line: u32) -> Self {
        Self {
            message: message.into(),
            line,
        }
    }
}

/// Failure reported by the embedding through [`crate::Sapi`].
#[derive(Debug, Error)]
#[error(transparent)]
pub struct SapiError(pub BoxError);

impl SapiError {
    pub fn new(err: impl Into<BoxError>) -> Self {
        Self(err.into())
    }

    #[must_use]
    pub fn into_inner(self) -> BoxError {
        self.0
    }
}

/// Non-local exit out of script code.
///
/// Only `Exception` can be caught by `try`/`catch`; the other variants unwind
/// all the way to the embedder (running `finally` blocks on the way).
pub enum Throw {
    Exception(ObjRef),
    Exit(i64),
    Parse(ParseError),
    Fatal(SapiError),
}

impl fmt::Debug for Throw {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exception(obj) => write!(f, "Exception({})", obj.class().name()),
            Self::Exit(code) => write!(f, "Exit({code})"),
            Self::Parse(err) => write!(f, "Parse({err})"),
            Self::Fatal(err) => write!(f, "Fatal({err})"),
        }
    }
}

impl From<SapiError> for Throw {
    fn from(value: SapiError) -> Self {
        Self::Fatal(value)
    }
}

impl From<ParseError> for Throw {
    fn from(value: ParseError) -> Self {
        Self::Parse(value)
    }
}

pub type Result<T, E = Throw> = core::result::Result<T, E>;
