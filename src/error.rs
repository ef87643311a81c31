//! Unified error type.

use std::fmt;

/// The error type returned by strand's fallible operations.
///
/// Policy outcomes (401, 429, ...) are not errors: they are written to the
/// response by the handler that decides them. This type covers missing
/// context state, serialization failures, I/O and startup configuration.
#[derive(Debug)]
pub enum Error {
    /// A store entry is absent or holds a value of another type.
    NotFound(&'static str),
    /// JSON encoding or decoding failed.
    Json(serde_json::Error),
    Io(std::io::Error),
    /// The application was built without something it requires.
    Config(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(what) => write!(f, "{what} not found in context"),
            Self::Json(e) => write!(f, "json: {e}"),
            Self::Io(e) => write!(f, "io: {e}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Json(e) => Some(e),
            Self::Io(e) => Some(e),
            Self::NotFound(_) | Self::Config(_) => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}
