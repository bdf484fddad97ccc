//! The error kind taxonomy shared by the hub protocol and the REST surface.
//!
//! Every fallible operation in the sequence/event engine, channel layer, and
//! backplane returns [`HubError`]. Both transports (WebSocket `error` frames and
//! REST responses) derive their wire representation from the same `ErrorKind`
//! so the two never drift.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Authentication,
    Authorization,
    Validation,
    Conflict,
    NotFound,
    Internal,
}

impl ErrorKind {
    /// The tag sent inside a hub `error` frame's payload (`{"t":"error","d":{"kind":...}}`).
    pub fn frame_kind(self) -> &'static str {
        match self {
            ErrorKind::Authentication => "authentication_failed",
            ErrorKind::Authorization => "authorization_failed",
            ErrorKind::Validation => "invalid_data",
            ErrorKind::Conflict => "conflict",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Internal => "500",
        }
    }

    /// Whether this error kind closes the socket (only authentication failures do).
    pub fn closes_socket(self) -> bool {
        matches!(self, ErrorKind::Authentication)
    }

    pub fn http_status(self) -> u16 {
        match self {
            ErrorKind::Authentication => 401,
            ErrorKind::Authorization => 401,
            ErrorKind::Validation => 422,
            ErrorKind::Conflict => 409,
            ErrorKind::NotFound => 404,
            ErrorKind::Internal => 500,
        }
    }
}

#[derive(Debug, Error)]
#[error("{kind:?}: {message}")]
pub struct HubError {
    pub kind: ErrorKind,
    pub message: String,
}

impl HubError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Authentication, message)
    }

    pub fn authorization(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Authorization, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn http_status(&self) -> u16 {
        self.kind.http_status()
    }
}

/// Blanket conversion so `?` works from Store/rusqlite errors inside engine code
/// without every call site writing its own `.map_err`.
impl From<rusqlite::Error> for HubError {
    fn from(err: rusqlite::Error) -> Self {
        HubError::internal(err.to_string())
    }
}

pub type HubResult<T> = Result<T, HubError>;
