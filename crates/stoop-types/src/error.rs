use thiserror::Error;

/// Error taxonomy for the messaging core. Validation errors abort an
/// operation before any durable write and surface synchronously; storage
/// errors wrap the underlying driver failure. Delivery-stage failures after
/// a commit are logged at the call site and never appear here.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("not a participant of this surface")]
    Forbidden,

    #[error("reply target is missing or on a different surface")]
    InvalidReply,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0} is not supported on this surface")]
    UnsupportedOperation(&'static str),

    #[error("storage error: {0}")]
    Storage(String),
}

impl ChatError {
    pub fn storage(err: impl std::fmt::Display) -> Self {
        Self::Storage(err.to_string())
    }

    /// Stable machine-readable code for wire frames and logs.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Forbidden => "FORBIDDEN",
            Self::InvalidReply => "INVALID_REPLY",
            Self::NotFound(_) => "NOT_FOUND",
            Self::UnsupportedOperation(_) => "UNSUPPORTED_OPERATION",
            Self::Storage(_) => "STORAGE",
        }
    }
}
