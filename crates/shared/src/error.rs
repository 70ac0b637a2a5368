use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error body returned by the control server on non-2xx responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorBody {
    pub error: String,
}

impl ApiErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("cue text must not be empty")]
    EmptyText,
    #[error("cue needs at least one trigger token")]
    NoTriggerTokens,
    #[error("cue audio path must not be empty")]
    EmptyAudioPath,
    #[error("cue id must be positive, got {0}")]
    NonPositiveId(i64),
    #[error("unknown control action '{0}'")]
    UnknownControlAction(String),
}

/// A push frame that could not be turned into a recognized event.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed packet: {0}")]
    MalformedPacket(String),
    #[error("malformed '{event}' payload: {source}")]
    MalformedPayload {
        event: String,
        source: serde_json::Error,
    },
}
