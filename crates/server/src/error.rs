use axum::http::header::WWW_AUTHENTICATE;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use hymie_engine::{EngineError, StorageError};
use thiserror::Error;
use tracing::error;

use crate::auth::REALM;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("could not render {name}: {source}")]
    Render {
        name: String,
        #[source]
        source: minijinja::Error,
    },
    #[error("could not read {what}: {source}")]
    Io {
        what: String,
        #[source]
        source: std::io::Error,
    },
    #[error("authentication required")]
    Unauthorized,
    #[error("The form token is invalid or missing. Please reload the page and try again.")]
    Csrf,
    #[error("not found")]
    NotFound,
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::Engine(EngineError::Storage(
                StorageError::UnknownUser { .. }
                | StorageError::NotFound { .. }
                | StorageError::UnknownUpload(_)
                | StorageError::InvalidName(_),
            ))
            | ServerError::Engine(EngineError::UnknownEndpoint(_))
            | ServerError::NotFound => StatusCode::NOT_FOUND,
            ServerError::Unauthorized => StatusCode::UNAUTHORIZED,
            ServerError::Csrf => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            ServerError::Unauthorized => (
                status,
                [(WWW_AUTHENTICATE, format!("Basic realm=\"{REALM}\""))],
                "Authentication required",
            )
                .into_response(),
            error if status.is_server_error() => {
                error!(%error, "request failed");
                (status, error.to_string()).into_response()
            }
            error => (status, error.to_string()).into_response(),
        }
    }
}
