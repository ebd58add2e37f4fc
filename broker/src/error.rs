//! Error types for the `broker` crate.

use std::error::Error as StdError;
use std::fmt;

/// Top-level error type for broker operations.
/// Holds error kind and optional source for error chaining.
#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: ErrorKind,
}

#[derive(Debug, PartialEq)]
pub enum ErrorKind {
    /// The broker could not be reached.
    Connection,
    /// The broker refused the pattern subscription.
    Subscribe,
    /// A publish was not accepted.
    Publish,
}

impl Error {
    pub(crate) fn new(
        error_kind: ErrorKind,
        source: impl Into<Box<dyn StdError + Send + Sync>>,
    ) -> Self {
        Error {
            source: Some(source.into()),
            error_kind,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let kind = match self.error_kind {
            ErrorKind::Connection => "connection",
            ErrorKind::Subscribe => "subscribe",
            ErrorKind::Publish => "publish",
        };
        match &self.source {
            Some(source) => write!(f, "Broker {kind} error: {source}"),
            None => write!(f, "Broker {kind} error"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}
