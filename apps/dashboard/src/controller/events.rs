//! Events flowing from the backend worker to the UI thread, and error modeling for display.

use client_core::{ClientError, JourneySnapshot};
use shared::{
    domain::TaskId,
    protocol::{ExplainResponse, PendingTask},
};

#[derive(Debug, Clone)]
pub enum UiEvent {
    Info(String),
    Error(UiError),
    Journey(JourneySnapshot),
    /// The view's invoice was closed; nothing to render.
    JourneyClosed,
    Tasks {
        tasks: Vec<PendingTask>,
        busy: Vec<TaskId>,
    },
    ActionFinished {
        task_id: TaskId,
        status: Option<String>,
    },
    Explanation(ExplainResponse),
    FeedbackRecorded {
        inserted_id: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiErrorCategory {
    Auth,
    Transport,
    Validation,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiErrorContext {
    BackendStartup,
    Stream,
    Action,
    Tasks,
    Feedback,
    Explain,
}

#[derive(Debug, Clone)]
pub struct UiError {
    category: UiErrorCategory,
    context: UiErrorContext,
    message: String,
}

impl UiError {
    pub fn from_message(context: UiErrorContext, message: impl Into<String>) -> Self {
        let message = message.into();
        let message_lower = message.to_ascii_lowercase();
        let category = if message_lower.contains("401")
            || message_lower.contains("403")
            || message_lower.contains("unauthorized")
            || message_lower.contains("forbidden")
        {
            UiErrorCategory::Auth
        } else if message_lower.contains("invalid")
            || message_lower.contains("missing")
            || message_lower.contains("malformed")
            || message_lower.contains("not found")
        {
            UiErrorCategory::Validation
        } else if message_lower.contains("timed out")
            || message_lower.contains("timeout")
            || message_lower.contains("connection")
            || message_lower.contains("network")
            || message_lower.contains("transport")
            || message_lower.contains("unavailable")
            || message_lower.contains("disconnect")
        {
            UiErrorCategory::Transport
        } else {
            UiErrorCategory::Unknown
        };

        Self {
            category,
            context,
            message,
        }
    }

    /// Classifies by error kind first; server rejections fall back to their status code.
    pub fn from_client(context: UiErrorContext, err: &ClientError) -> Self {
        let category = match err {
            ClientError::Transport(_)
            | ClientError::Timeout(_)
            | ClientError::StreamLineTooLong(_) => UiErrorCategory::Transport,
            ClientError::ServerRejection { status: 401 | 403, .. } => UiErrorCategory::Auth,
            ClientError::ServerRejection { status, .. } if *status >= 500 => {
                UiErrorCategory::Transport
            }
            ClientError::ServerRejection { .. }
            | ClientError::MalformedEvent(_)
            | ClientError::ActionInFlight(_)
            | ClientError::UnknownTask(_)
            | ClientError::InvalidBaseUrl(_) => UiErrorCategory::Validation,
            ClientError::ChannelAlreadyOpen(_) => UiErrorCategory::Unknown,
        };
        Self {
            category,
            context,
            message: err.to_string(),
        }
    }

    pub fn category(&self) -> UiErrorCategory {
        self.category
    }

    pub fn context(&self) -> UiErrorContext {
        self.context
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn label(&self) -> &'static str {
        match self.category {
            UiErrorCategory::Auth => "Authorization",
            UiErrorCategory::Transport => "Connection",
            UiErrorCategory::Validation => "Rejected",
            UiErrorCategory::Unknown => "Error",
        }
    }
}
