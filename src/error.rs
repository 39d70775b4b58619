use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::types::ErrorBody;

pub const GENERIC_FAILURE_MESSAGE: &str = "Failed to process chat message.";

/// Failure talking to the completion service
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("upstream request timed out")]
    Timeout,
    #[error("upstream transport error: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("upstream returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("upstream returned no completion")]
    EmptyResponse,
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            UpstreamError::Timeout
        } else {
            UpstreamError::Transport(err)
        }
    }
}

/// Every way a chat turn can end without a reply
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("rate limited")]
    RateLimited { message: String },
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("upstream timed out")]
    UpstreamTimeout { message: String },
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ChatError {
    pub fn status(&self) -> StatusCode {
        match self {
            ChatError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ChatError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ChatError::Configuration(_)
            | ChatError::UpstreamTimeout { .. }
            | ChatError::Upstream(_)
            | ChatError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Client-facing body; upstream and internal detail never leaves the process.
    pub fn body(&self) -> ErrorBody {
        match self {
            ChatError::InvalidRequest(message) | ChatError::Configuration(message) => ErrorBody {
                error: message.clone(),
                is_rate_limited: None,
            },
            ChatError::RateLimited { message } => ErrorBody {
                error: message.clone(),
                is_rate_limited: Some(true),
            },
            ChatError::UpstreamTimeout { message } => ErrorBody {
                error: message.clone(),
                is_rate_limited: None,
            },
            ChatError::Upstream(_) | ChatError::Internal(_) => ErrorBody {
                error: GENERIC_FAILURE_MESSAGE.to_string(),
                is_rate_limited: None,
            },
        }
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.body())).into_response()
    }
}
