//! Error types.
//!
//! Two families live here:
//!
//! - [`Error`] surfaces infrastructure and API-misuse failures: binding a
//!   port, an oversized request body, a redirect with a non-3xx code.
//! - [`HandlerError`] is what application handlers and middleware return.
//!   Any `std::error::Error` converts into it with `?`, and it remembers the
//!   source location where it was created so server-error events can point
//!   at the offending line.

use std::error::Error as StdError;
use std::fmt;
use std::panic::Location;

/// Boxed, thread-safe error used for wrapped sources.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// The error type returned by waypoint's fallible operations.
#[derive(Debug)]
pub enum Error {
    /// Socket or filesystem failure.
    Io(std::io::Error),
    /// An argument was outside the range the operation accepts.
    InvalidArgument(String),
    /// The request body could not be buffered (too large, or the connection
    /// failed while reading).
    Body(BoxError),
}

impl Error {
    pub(crate) fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io: {e}"),
            Self::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Self::Body(e) => write!(f, "body: {e}"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::InvalidArgument(_) => None,
            Self::Body(e) => Some(e.as_ref()),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

// ── HandlerError ──────────────────────────────────────────────────────────────

/// Error returned by a handler or middleware.
///
/// Returning `Err(_)` from any step of a chain stops the chain and routes the
/// error to the server-error failure path.
///
/// `HandlerError` intentionally does not implement `std::error::Error`; that
/// is what lets every error type convert into it through `?`.
pub struct HandlerError {
    inner: Inner,
    location: &'static Location<'static>,
}

enum Inner {
    Message(String),
    Source(BoxError),
}

impl HandlerError {
    /// Creates an error from a plain message.
    #[track_caller]
    pub fn msg(message: impl Into<String>) -> Self {
        Self { inner: Inner::Message(message.into()), location: Location::caller() }
    }

    /// Wraps an already boxed error.
    #[track_caller]
    pub fn boxed(source: BoxError) -> Self {
        Self { inner: Inner::Source(source), location: Location::caller() }
    }

    /// Where this error was created (or converted with `?`).
    pub fn location(&self) -> &'static Location<'static> {
        self.location
    }

    /// The wrapped error, if this was built from one.
    pub fn source(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        match &self.inner {
            Inner::Message(_) => None,
            Inner::Source(e) => Some(e.as_ref()),
        }
    }

    /// Attempts to downcast the wrapped error to a concrete type.
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        match &self.inner {
            Inner::Message(_) => None,
            Inner::Source(e) => e.downcast_ref::<E>(),
        }
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            Inner::Message(msg) => f.write_str(msg),
            Inner::Source(e) => fmt::Display::fmt(e, f),
        }
    }
}

impl fmt::Debug for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerError")
            .field("message", &self.to_string())
            .field("location", &format_args!("{}:{}", self.location.file(), self.location.line()))
            .finish()
    }
}

impl<E> From<E> for HandlerError
where
    E: StdError + Send + Sync + 'static,
{
    #[track_caller]
    fn from(e: E) -> Self {
        Self { inner: Inner::Source(Box::new(e)), location: Location::caller() }
    }
}
