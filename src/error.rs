//! Error handler for mailgate.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::mail::DispatchError;

pub type Result<T> = std::result::Result<T, ServerError>;

/// Enum representing server-side errors.
///
/// [`IntoResponse`] is the single place response bodies are produced, so
/// every rejection branch yields exactly one response.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Request reached the relay without an email document.
    #[error("no body found")]
    NoBody,

    /// Token missing, account unknown or session refused.
    /// One shared message for all three.
    #[error("sending email failed: unauthenticated")]
    Unauthenticated,

    /// A verification round-trip failed before any credential was checked.
    /// Surfaced raw, never collapsed into the unauthenticated message.
    #[error(transparent)]
    Transport(#[from] reqwest::Error),

    /// Delivery collaborator reported a failure.
    #[error("sending email failed: \"{0}\"")]
    Dispatch(#[from] DispatchError),

    /// Document store address cannot be used as a base URL.
    #[error("invalid document store address")]
    StoreUrl,

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("address scheme must be `amqp` or `amqps`")]
    InvalidScheme,

    #[error(transparent)]
    Amqp(#[from] lapin::Error),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServerError::NoBody => StatusCode::BAD_REQUEST,
            ServerError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ServerError::Transport(_) | ServerError::Dispatch(_) => {
                StatusCode::BAD_GATEWAY
            },
            ServerError::StoreUrl
            | ServerError::Url(_)
            | ServerError::InvalidScheme
            | ServerError::Amqp(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, self.to_string()).into_response()
    }
}
