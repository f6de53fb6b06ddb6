use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

id_newtype!(InvoiceId);
id_newtype!(TaskId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    AgentResult,
    StatusChange,
    SystemNote,
}

impl StepKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "agent_result" => Some(Self::AgentResult),
            "status_change" => Some(Self::StatusChange),
            "system_note" => Some(Self::SystemNote),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::AgentResult => "agent_result",
            Self::StatusChange => "status_change",
            Self::SystemNote => "system_note",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Approve,
    Reject,
}

impl ActionType {
    /// Status shown while an action of this type is in flight.
    pub fn optimistic_status(self) -> &'static str {
        match self {
            Self::Approve => "approved",
            Self::Reject => "rejected",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
        }
    }

    pub fn is_destructive(self) -> bool {
        matches!(self, Self::Reject)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Accept,
    Reject,
    SuggestEdit,
}

impl Verdict {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "accept" => Some(Self::Accept),
            "reject" => Some(Self::Reject),
            "suggest_edit" => Some(Self::SuggestEdit),
            _ => None,
        }
    }
}

/// Workflow statuses the dashboard knows how to badge. Anything else is shown verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkflowStatus {
    Received,
    Validated,
    Matched,
    Exception,
    NeedsHuman,
    ApprovalPending,
    Approved,
    Rejected,
    ReadyForPosting,
    Posted,
    Deleted,
}

impl WorkflowStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "RECEIVED" => Some(Self::Received),
            "VALIDATED" => Some(Self::Validated),
            "MATCHED" => Some(Self::Matched),
            "EXCEPTION" => Some(Self::Exception),
            "NEEDS_HUMAN" => Some(Self::NeedsHuman),
            "APPROVAL_PENDING" | "PENDING_APPROVAL" => Some(Self::ApprovalPending),
            "APPROVED" => Some(Self::Approved),
            "REJECTED" => Some(Self::Rejected),
            "READY_FOR_POSTING" => Some(Self::ReadyForPosting),
            "POSTED" => Some(Self::Posted),
            "DELETED" => Some(Self::Deleted),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Received => "RECEIVED",
            Self::Validated => "VALIDATED",
            Self::Matched => "MATCHED",
            Self::Exception => "EXCEPTION",
            Self::NeedsHuman => "NEEDS HUMAN",
            Self::ApprovalPending => "APPROVAL PENDING",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
            Self::ReadyForPosting => "READY FOR POSTING",
            Self::Posted => "POSTED",
            Self::Deleted => "DELETED",
        }
    }

    /// Statuses that close out a human approval task for the invoice.
    pub fn is_decision(self) -> bool {
        matches!(
            self,
            Self::Approved | Self::Rejected | Self::ReadyForPosting
        )
    }

    pub fn needs_attention(self) -> bool {
        matches!(
            self,
            Self::Exception | Self::NeedsHuman | Self::ApprovalPending
        )
    }
}
