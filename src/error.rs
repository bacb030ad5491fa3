use std::fmt;

use thiserror::Error;

/// The closed set of failure kinds a request can end in.
///
/// Each variant carries an optional human-readable detail. Details must
/// never contain secret bytes, and must never contain key names when the
/// error is authorization-related. `Display` is hand-written rather than
/// derived: the wire format (`token` then an optional ` detail` suffix)
/// has a conditional that doesn't map cleanly onto a single `#[error]`
/// format string per variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    BadRequest(Option<String>),
    NotFound(Option<String>),
    Exists(Option<String>),
    TooLarge(Option<String>),
    Capacity(Option<String>),
    Forbidden(Option<String>),
    TtlInvalid(Option<String>),
    Internal(Option<String>),
}

impl ErrorKind {
    /// The wire token for this kind, e.g. `bad_request`.
    pub fn token(&self) -> &'static str {
        match self {
            ErrorKind::BadRequest(_) => "bad_request",
            ErrorKind::NotFound(_) => "not_found",
            ErrorKind::Exists(_) => "exists",
            ErrorKind::TooLarge(_) => "too_large",
            ErrorKind::Capacity(_) => "capacity",
            ErrorKind::Forbidden(_) => "forbidden",
            ErrorKind::TtlInvalid(_) => "ttl_invalid",
            ErrorKind::Internal(_) => "internal",
        }
    }

    pub fn detail(&self) -> Option<&str> {
        match self {
            ErrorKind::BadRequest(d)
            | ErrorKind::NotFound(d)
            | ErrorKind::Exists(d)
            | ErrorKind::TooLarge(d)
            | ErrorKind::Capacity(d)
            | ErrorKind::Forbidden(d)
            | ErrorKind::TtlInvalid(d)
            | ErrorKind::Internal(d) => d.as_deref(),
        }
    }

    pub fn bad_request(detail: impl Into<String>) -> Self {
        ErrorKind::BadRequest(Some(detail.into()))
    }

    pub fn not_found() -> Self {
        ErrorKind::NotFound(None)
    }

    pub fn too_large() -> Self {
        ErrorKind::TooLarge(None)
    }

    pub fn capacity() -> Self {
        ErrorKind::Capacity(None)
    }

    pub fn forbidden() -> Self {
        ErrorKind::Forbidden(None)
    }

    pub fn ttl_invalid(detail: impl Into<String>) -> Self {
        ErrorKind::TtlInvalid(Some(detail.into()))
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        ErrorKind::Internal(Some(detail.into()))
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.detail() {
            Some(detail) => write!(f, "{} {detail}", self.token()),
            None => write!(f, "{}", self.token()),
        }
    }
}

impl std::error::Error for ErrorKind {}

/// Configuration load/validation failure, reported at startup and mapped
/// to exit code 1.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for --{flag}: {reason}")]
    InvalidValue { flag: &'static str, reason: String },
}
