//! Error types.

use std::{
    fmt::{self, Display, Formatter},
    io::Error as IoError,
};

use serde_json::Value;

macro_rules! define_simple_errors {
    ($($(#[$docs:meta])* ($name:ident, $err_msg:literal);)*) => {
        $(
        $(#[$docs])*
        #[derive(Debug, Copy, Clone, Eq, PartialEq)]
        pub struct $name;

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
                write!(f, "{}", $err_msg)
            }
        }

        impl std::error::Error for $name {}
        )*
    };
}

define_simple_errors!(
    /// Returned to hyper when a handler declines to respond.
    (ErrorHandlerDeclined, "handler declined to respond");
);

/// An expectation that did not hold.
///
/// `expected` and `actual` are small JSON objects describing the compared
/// values, e.g. `{"status": "200"}` and `{"status": "400", "body": "..."}`.
#[derive(Debug, Clone, PartialEq)]
pub struct AssertionError {
    message: String,
    expected: Value,
    actual: Value,
}

impl AssertionError {
    pub(crate) fn new(message: impl Into<String>, expected: Value, actual: Value) -> Self {
        Self {
            message: message.into(),
            expected,
            actual,
        }
    }

    /// Returns the failure message.
    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the expected values.
    #[inline]
    pub fn expected(&self) -> &Value {
        &self.expected
    }

    /// Returns the actual values.
    #[inline]
    pub fn actual(&self) -> &Value {
        &self.actual
    }
}

impl Display for AssertionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for AssertionError {}

/// Errors raised while serving a request or checking its response.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// No port could be bound.
    #[error("port {port} is unavailable after {attempts} attempt(s): {source}")]
    PortUnavailable {
        /// The last port tried.
        port: u16,
        /// How many binds were attempted.
        attempts: usize,
        /// The error of the last bind.
        #[source]
        source: IoError,
    },

    /// A pre-bound listener does not report a usable port.
    #[error("port cannot be found")]
    PortNotFound,

    /// A pre-bound listener has already served its single exchange.
    #[error("listener has already been used and closed")]
    ListenerClosed,

    /// An expectation did not hold.
    #[error(transparent)]
    AssertionFailed(#[from] AssertionError),

    /// The body was declared or expected to be JSON but could not be parsed.
    #[error("Request \"{request}\" should have JSON body but body could not be parsed: {source}")]
    BodyDecodeFailed {
        /// `METHOD path` of the request.
        request: String,
        /// The parse error.
        #[source]
        source: serde_json::Error,
    },

    /// The request could not be built.
    #[error("invalid request: {0}")]
    InvalidRequest(#[from] http::Error),

    /// A header name or value could not be parsed.
    #[error("invalid header: {0}")]
    InvalidHeader(String),

    /// The query parameters could not be serialized.
    #[error("invalid query: {0}")]
    InvalidQuery(#[from] serde_urlencoded::ser::Error),

    /// A body could not be serialized to or parsed from JSON.
    #[error("invalid JSON body: {0}")]
    InvalidBody(#[source] serde_json::Error),

    /// The exchange failed at the HTTP layer.
    #[error("http error: {0}")]
    Http(#[from] hyper::Error),

    /// The exchange failed at the socket layer.
    #[error("io error: {0}")]
    Io(#[from] IoError),
}

impl FetchError {
    /// Returns the assertion error if this is an expectation failure.
    pub fn as_assertion(&self) -> Option<&AssertionError> {
        match self {
            FetchError::AssertionFailed(err) => Some(err),
            _ => None,
        }
    }

    /// Returns `true` if this is an expectation failure.
    #[inline]
    pub fn is_assertion(&self) -> bool {
        self.as_assertion().is_some()
    }
}

/// Represents a result with [`FetchError`] as the default error type.
pub type Result<T, E = FetchError> = ::std::result::Result<T, E>;
