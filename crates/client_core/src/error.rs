use std::time::Duration;

use shared::{
    domain::{InvoiceId, TaskId},
    error::WireError,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("server rejected request with status {status}: {message}")]
    ServerRejection { status: u16, message: String },
    #[error("event stream line exceeded {0} bytes without a newline")]
    StreamLineTooLong(usize),
    #[error("malformed event: {0}")]
    MalformedEvent(#[from] WireError),
    #[error("request timed out after {}s", .0.as_secs())]
    Timeout(Duration),
    #[error("an action for task {0} is already in flight")]
    ActionInFlight(TaskId),
    #[error("task {0} is not in the pending task list")]
    UnknownTask(TaskId),
    #[error("a journey channel for invoice {0} is already open; close it first")]
    ChannelAlreadyOpen(InvoiceId),
    #[error("invalid api base url: {0}")]
    InvalidBaseUrl(String),
}

impl From<reqwest::Error> for ClientError {
    fn from(value: reqwest::Error) -> Self {
        if let Some(status) = value.status() {
            return Self::ServerRejection {
                status: status.as_u16(),
                message: value.to_string(),
            };
        }
        Self::Transport(value.to_string())
    }
}
