//! Error taxonomy of the client core.
//!
//! `BackendError` is what the backend seam reports; each component converts
//! it into its own user-facing error.  None of these are retried by the core.

use thiserror::Error;

/// Transport-level failure reported by a [`crate::backend::Backend`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("network error: {0}")]
    Network(String),

    /// HTTP 401.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("invalid response: {0}")]
    Decode(String),

    #[error("I/O error: {0}")]
    Io(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("login failed: {0}")]
    Network(String),

    /// The server refused the request and said why (e.g. a taken username).
    #[error("{0}")]
    Rejected(String),

    /// The session changed (logout or another login) while this login was in flight.
    #[error("login superseded")]
    Superseded,
}

impl From<BackendError> for AuthError {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::Unauthorized(_) => AuthError::InvalidCredentials,
            BackendError::Status { message, .. } => AuthError::Rejected(message),
            other => AuthError::Network(other.to_string()),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("not logged in")]
    Unauthenticated,

    #[error("catalog fetch failed: {0}")]
    Network(String),

    #[error("catalog fetch rejected ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("catalog response unreadable: {0}")]
    InvalidResponse(String),
}

impl From<BackendError> for SyncError {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::Network(m) | BackendError::Io(m) => SyncError::Network(m),
            BackendError::Unauthorized(message) => SyncError::Server {
                status: 401,
                message,
            },
            BackendError::Status { status, message } => SyncError::Server { status, message },
            BackendError::Decode(m) => SyncError::InvalidResponse(m),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FavoriteError {
    #[error("favorite toggle failed: {0}")]
    Network(String),

    #[error("favorite toggle rejected ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("favorite toggle dropped: session ended")]
    Cancelled,

    #[error("not logged in")]
    Unauthenticated,
}

impl From<BackendError> for FavoriteError {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::Unauthorized(message) => FavoriteError::Server {
                status: 401,
                message,
            },
            BackendError::Status { status, message } => FavoriteError::Server { status, message },
            other => FavoriteError::Network(other.to_string()),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UploadError {
    /// No file selected, or submit without a successful upload.
    #[error("no file uploaded")]
    NoFile,

    #[error("title and creator are required")]
    MissingDetails,

    #[error("an upload step is already running")]
    Busy,

    #[error("upload failed: {0}")]
    Transport(String),

    #[error("registration failed: {0}")]
    Registration(String),

    #[error("admin form closed")]
    TornDown,

    #[error("upload dropped: session ended")]
    Cancelled,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlaybackError {
    #[error("stream unreachable: {0}")]
    Unreachable(String),

    #[error("invalid stream source: {0}")]
    InvalidSource(String),
}
