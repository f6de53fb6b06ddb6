use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error body returned by the collaborator API. FastAPI routes answer `detail`, ad hoc ones `error`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ApiError {
    /// Best human-readable message, falling back to the raw body.
    pub fn message_or(&self, raw_body: &str) -> String {
        self.detail
            .clone()
            .or_else(|| self.error.clone())
            .unwrap_or_else(|| raw_body.trim().to_string())
    }

    pub fn from_body(raw_body: &str) -> String {
        serde_json::from_str::<ApiError>(raw_body)
            .map(|body| body.message_or(raw_body))
            .unwrap_or_else(|_| raw_body.trim().to_string())
    }
}

#[derive(Debug, Error)]
pub enum WireError {
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("journey step must be a json object, got {0}")]
    NotAnObject(&'static str),
}
