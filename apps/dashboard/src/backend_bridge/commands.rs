//! Backend commands queued from the UI thread to the backend worker.

use shared::domain::{ActionType, InvoiceId, TaskId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCommand {
    Open {
        invoice_id: InvoiceId,
    },
    Close,
    Refresh,
    Act {
        task_id: TaskId,
        action: ActionType,
        notes: Option<String>,
    },
    SuggestEdit {
        step_id: Option<String>,
        notes: String,
    },
    Explain {
        regenerate: bool,
    },
    Shutdown,
}

impl BackendCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Open { .. } => "open",
            Self::Close => "close",
            Self::Refresh => "refresh",
            Self::Act {
                action: ActionType::Approve,
                ..
            } => "approve",
            Self::Act {
                action: ActionType::Reject,
                ..
            } => "reject",
            Self::SuggestEdit { .. } => "suggest_edit",
            Self::Explain { .. } => "explain",
            Self::Shutdown => "shutdown",
        }
    }
}
