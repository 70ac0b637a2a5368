use reqwest::StatusCode;
use shared::error::{ApiErrorBody, ValidationError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    /// Nothing usable came back: connect refused, reset, timed out.
    #[error("server unreachable: {0}")]
    Transport(#[from] reqwest::Error),
    /// 4xx. The message is the server's own when it sent one.
    #[error("{message}")]
    Request { status: u16, message: String },
    /// 5xx, or a success status with a body we could not decode.
    #[error("{message}")]
    Server {
        status: Option<u16>,
        message: String,
    },
    #[error("invalid server url '{0}'")]
    InvalidUrl(String),
    /// Rejected locally; nothing was sent.
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl ClientError {
    pub(crate) fn from_status(status: StatusCode, body: &str) -> Self {
        if status.is_client_error() {
            let message = serde_json::from_str::<ApiErrorBody>(body)
                .ok()
                .map(|b| b.error)
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| format!("request failed with status {}", status.as_u16()));
            ClientError::Request {
                status: status.as_u16(),
                message,
            }
        } else {
            ClientError::Server {
                status: Some(status.as_u16()),
                message: format!("server error ({})", status.as_u16()),
            }
        }
    }

    pub(crate) fn malformed(status: StatusCode) -> Self {
        ClientError::Server {
            status: Some(status.as_u16()),
            message: "malformed response from server".to_string(),
        }
    }

    /// Whether the failure belongs in the store's error slot.
    pub fn is_user_visible(&self) -> bool {
        matches!(
            self,
            ClientError::Request { .. } | ClientError::Server { .. }
        )
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Request { status, .. } => Some(*status),
            ClientError::Server { status, .. } => *status,
            ClientError::Transport(err) => err.status().map(|s| s.as_u16()),
            ClientError::InvalidUrl(_) | ClientError::Validation(_) => None,
        }
    }
}
