pub mod messages;
pub mod middleware;
pub mod state;
pub mod unread;

use axum::http::StatusCode;

use stoop_types::ChatError;

/// Map the core taxonomy onto HTTP statuses. Validation errors surface
/// synchronously; storage failures are opaque 500s.
pub fn error_status(err: &ChatError) -> StatusCode {
    match err {
        ChatError::Forbidden => StatusCode::FORBIDDEN,
        ChatError::InvalidReply => StatusCode::UNPROCESSABLE_ENTITY,
        ChatError::NotFound(_) => StatusCode::NOT_FOUND,
        ChatError::UnsupportedOperation(_) => StatusCode::METHOD_NOT_ALLOWED,
        ChatError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
