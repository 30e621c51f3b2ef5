use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use lmrl_core::rollout::NoRollout;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
    #[error("Invalid request body: {0}")]
    InvalidBody(String),
    #[error(transparent)]
    NoRollout(#[from] NoRollout),
    #[error("internal failure: {}", summary(.0))]
    Internal(#[from] anyhow::Error),
}

/// First line of the error chain. Candle errors append a captured backtrace on the following
/// lines, which only belongs in the logs.
fn summary(err: &anyhow::Error) -> String {
    format!("{err:#}")
        .lines()
        .next()
        .unwrap_or_default()
        .trim_end()
        .to_string()
}

impl ProtocolError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingField(_) | Self::InvalidBody(_) | Self::NoRollout(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl IntoResponse for ProtocolError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if let Self::Internal(err) = &self {
            tracing::error!(error = ?err, "request failed");
        } else {
            tracing::debug!(error = %self, "request rejected");
        }
        let body = ErrorResponse {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
