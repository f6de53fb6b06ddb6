use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    domain::{ActionType, InvoiceId, StepKind, TaskId, Verdict},
    error::WireError,
};

/// Placeholder shown when no step carries a status.
pub const NO_STATUS: &str = "N/A";

/// One entry of an invoice's processing history, normalized from the loose wire object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JourneyStep {
    pub sequence: u64,
    pub kind: StepKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_hint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub payload: Value,
}

impl JourneyStep {
    /// Normalizes a wire step. `fallback_sequence` is used when the server sent no position hint.
    pub fn from_wire(value: Value, fallback_sequence: u64) -> Result<Self, WireError> {
        let Value::Object(object) = value else {
            return Err(WireError::NotAnObject(json_type_name(&value)));
        };

        let kind = object
            .get("type")
            .and_then(Value::as_str)
            .and_then(StepKind::parse)
            .unwrap_or(if object.contains_key("agent") {
                StepKind::AgentResult
            } else {
                StepKind::SystemNote
            });

        let actor = non_empty_str(&object, "agent").or_else(|| non_empty_str(&object, "actor"));
        let status_hint = match kind {
            StepKind::StatusChange => non_empty_str(&object, "to"),
            _ => non_empty_str(&object, "status"),
        };
        let timestamp = match object.get("timestamp") {
            Some(Value::String(raw)) if !raw.is_empty() => Some(raw.clone()),
            Some(Value::Number(raw)) => Some(raw.to_string()),
            _ => None,
        };
        let sequence = object
            .get("sequence")
            .or_else(|| object.get("seq"))
            .and_then(Value::as_u64)
            .unwrap_or(fallback_sequence);

        Ok(Self {
            sequence,
            kind,
            actor,
            status_hint,
            timestamp,
            payload: Value::Object(object),
        })
    }

    /// A synthetic terminal note appended when the invoice disappears upstream.
    pub fn deleted_marker(sequence: u64, timestamp: impl Into<String>) -> Self {
        Self {
            sequence,
            kind: StepKind::SystemNote,
            actor: Some("system".to_string()),
            status_hint: Some("deleted".to_string()),
            timestamp: Some(timestamp.into()),
            payload: serde_json::json!({ "note": "invoice removed upstream" }),
        }
    }

    /// Structural equality used for redelivery suppression. `sequence` is a hint and is ignored.
    pub fn same_content(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.actor == other.actor
            && self.status_hint == other.status_hint
            && self.timestamp == other.timestamp
            && self.payload == other.payload
    }

    /// The HITL task this step closes, when the producer recorded one.
    pub fn task_id(&self) -> Option<TaskId> {
        self.payload
            .get("task_id")
            .and_then(Value::as_str)
            .filter(|raw| !raw.is_empty())
            .map(TaskId::new)
    }
}

fn non_empty_str(object: &Map<String, Value>, key: &str) -> Option<String> {
    object
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|raw| !raw.is_empty())
        .map(str::to_string)
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowSnapshot {
    #[serde(default)]
    pub steps: Vec<Value>,
}

/// Payload of the `init` stream event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InitPayload {
    #[serde(default)]
    pub workflow: WorkflowSnapshot,
}

/// Payload of the `step` stream event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepPayload {
    pub step: Value,
}

/// Decoded, typed stream event.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Hydrate(Vec<JourneyStep>),
    Step(JourneyStep),
    Deleted,
}

pub const STREAM_EVENT_INIT: &str = "init";
pub const STREAM_EVENT_STEP: &str = "step";
pub const STREAM_EVENT_DELETED: &str = "deleted";

impl StreamEvent {
    /// Decodes a named stream event. Returns `Ok(None)` for event names the dashboard does not use.
    /// `next_sequence` seeds the arrival index for steps without a server position hint.
    pub fn decode(name: &str, data: &str, next_sequence: u64) -> Result<Option<Self>, WireError> {
        match name {
            STREAM_EVENT_INIT => {
                let payload: InitPayload = serde_json::from_str(data)?;
                let steps = payload
                    .workflow
                    .steps
                    .into_iter()
                    .enumerate()
                    .map(|(index, step)| JourneyStep::from_wire(step, index as u64))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Some(Self::Hydrate(steps)))
            }
            STREAM_EVENT_STEP => {
                let payload: StepPayload = serde_json::from_str(data)?;
                Ok(Some(Self::Step(JourneyStep::from_wire(
                    payload.step,
                    next_sequence,
                )?)))
            }
            STREAM_EVENT_DELETED => Ok(Some(Self::Deleted)),
            _ => Ok(None),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRequest {
    pub action: ActionType,
    pub user: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// Response of the task action endpoint. Older routes answer `status`, newer ones `invoice_status`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoice_id: Option<InvoiceId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoice_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl ActionResponse {
    pub fn authoritative_status(&self) -> Option<&str> {
        self.invoice_status
            .as_deref()
            .or(self.status.as_deref())
            .filter(|status| !status.trim().is_empty())
    }
}

/// A human-in-the-loop task as listed by the task endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingTask {
    #[serde(alias = "_id")]
    pub id: TaskId,
    pub invoice_id: InvoiceId,
    #[serde(default, rename = "type")]
    pub task_type: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackRequest {
    pub invoice_id: InvoiceId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    pub verdict: Verdict,
    #[serde(default)]
    pub notes: String,
    pub user: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackAck {
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub inserted_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackEntry {
    pub invoice_id: InvoiceId,
    #[serde(default)]
    pub step_id: Option<String>,
    pub verdict: Verdict,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackList {
    #[serde(default)]
    pub ok: bool,
    pub invoice_id: InvoiceId,
    #[serde(default)]
    pub feedback: Vec<FeedbackEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExplainResponse {
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub explain: Option<Value>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExplainRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triggering_step: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateInvoiceQuery {
    pub po_number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoice_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buyer_companycode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(default)]
    pub split_first_line: bool,
    #[serde(default)]
    pub post_to_incoming: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedInvoice {
    pub generated_invoice: Value,
    #[serde(default)]
    pub posted_to_incoming: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingInvoiceAck {
    pub invoice_id: InvoiceId,
    pub status: Value,
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
