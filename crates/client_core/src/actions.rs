//! Human task decisions with optimistic feedback.
//!
//! `begin` records the in-flight action and installs the overlay, the request future performs the
//! HTTP call under a client-side deadline, and `complete` reconciles. Hosts running an event loop
//! spawn the request future and feed its [`ActionCompletion`] back; `submit` runs all three inline.

use std::{collections::HashMap, future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::{
    domain::{ActionType, InvoiceId, TaskId},
    protocol::{ActionRequest, ActionResponse, PendingTask},
};
use tracing::{info, warn};

use crate::{error::ClientError, store::JourneyStateStore, tasks::PendingTaskList};

pub const DEFAULT_ACTION_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAction {
    pub task_id: TaskId,
    pub invoice_id: InvoiceId,
    pub action_type: ActionType,
    pub submitted_at: DateTime<Utc>,
    pub optimistic_status: String,
}

#[async_trait]
pub trait ActionTransport: Send + Sync {
    async fn post_task_action(
        &self,
        task_id: &TaskId,
        request: &ActionRequest,
    ) -> Result<ActionResponse, ClientError>;
}

/// What `begin` hands back: the request still to be sent.
#[derive(Debug, Clone)]
pub struct ActionTicket {
    pub task_id: TaskId,
    pub request: ActionRequest,
}

#[derive(Debug)]
pub struct ActionCompletion {
    pub task_id: TaskId,
    pub result: Result<ActionResponse, ClientError>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionOutcome {
    pub task_id: TaskId,
    pub action_type: Option<ActionType>,
    /// Status reported by the response, when it carried one.
    pub status: Option<String>,
    pub removed_from_list: bool,
}

#[derive(Debug)]
pub struct TaskActionController {
    in_flight: HashMap<TaskId, PendingAction>,
    timeout: Duration,
}

impl Default for TaskActionController {
    fn default() -> Self {
        Self::new(DEFAULT_ACTION_TIMEOUT)
    }
}

impl TaskActionController {
    pub fn new(timeout: Duration) -> Self {
        Self {
            in_flight: HashMap::new(),
            timeout,
        }
    }

    /// Loading flag for a task; submissions are disabled while it is set.
    pub fn is_pending(&self, task_id: &TaskId) -> bool {
        self.in_flight.contains_key(task_id)
    }

    pub fn pending(&self, task_id: &TaskId) -> Option<&PendingAction> {
        self.in_flight.get(task_id)
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn begin(
        &mut self,
        task: &PendingTask,
        action_type: ActionType,
        actor: &str,
        notes: Option<String>,
        store: Option<&mut JourneyStateStore>,
    ) -> Result<ActionTicket, ClientError> {
        if self.in_flight.contains_key(&task.id) {
            warn!(task_id = %task.id, "action: duplicate submission rejected");
            return Err(ClientError::ActionInFlight(task.id.clone()));
        }

        let pending = PendingAction {
            task_id: task.id.clone(),
            invoice_id: task.invoice_id.clone(),
            action_type,
            submitted_at: Utc::now(),
            optimistic_status: action_type.optimistic_status().to_string(),
        };
        let overlaid = store.is_some_and(|store| store.apply_optimistic(&pending));
        info!(
            task_id = %task.id,
            invoice_id = %task.invoice_id,
            action = action_type.as_str(),
            overlaid,
            "action: submitting"
        );
        self.in_flight.insert(task.id.clone(), pending);

        Ok(ActionTicket {
            task_id: task.id.clone(),
            request: ActionRequest {
                action: action_type,
                user: actor.to_string(),
                comment: notes.filter(|notes| !notes.trim().is_empty()),
            },
        })
    }

    /// The request for `ticket`, bounded by the controller's deadline. Owns everything it needs so
    /// hosts can spawn it.
    pub fn request(
        &self,
        transport: Arc<dyn ActionTransport>,
        ticket: ActionTicket,
    ) -> impl Future<Output = ActionCompletion> + Send + 'static {
        let timeout = self.timeout;
        async move {
            let result = send_with_deadline(transport.as_ref(), &ticket, timeout).await;
            ActionCompletion {
                task_id: ticket.task_id,
                result,
            }
        }
    }

    pub fn complete(
        &mut self,
        completion: ActionCompletion,
        mut store: Option<&mut JourneyStateStore>,
        tasks: &mut PendingTaskList,
    ) -> Result<ActionOutcome, ClientError> {
        let pending = self.in_flight.remove(&completion.task_id);
        if pending.is_none() {
            warn!(task_id = %completion.task_id, "action: completion without a recorded submission");
        }

        match completion.result {
            Ok(response) => {
                let status = response.authoritative_status().map(str::to_string);
                if let (Some(status), Some(store)) = (&status, store.as_deref_mut()) {
                    store.confirm_optimistic(&completion.task_id, status);
                }
                let removed_from_list = tasks.remove(&completion.task_id);
                info!(
                    task_id = %completion.task_id,
                    status = status.as_deref().unwrap_or("-"),
                    removed_from_list,
                    "action: completed"
                );
                Ok(ActionOutcome {
                    task_id: completion.task_id,
                    action_type: pending.map(|pending| pending.action_type),
                    status,
                    removed_from_list,
                })
            }
            Err(err) => {
                let reverted = match (pending.as_ref(), store) {
                    (Some(pending), Some(store)) => store.revert_optimistic(pending),
                    _ => false,
                };
                warn!(
                    task_id = %completion.task_id,
                    reverted,
                    "action: failed, optimistic status reverted: {err}"
                );
                Err(err)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn submit(
        &mut self,
        transport: &dyn ActionTransport,
        task: &PendingTask,
        action_type: ActionType,
        actor: &str,
        notes: Option<String>,
        mut store: Option<&mut JourneyStateStore>,
        tasks: &mut PendingTaskList,
    ) -> Result<ActionOutcome, ClientError> {
        let ticket = self.begin(task, action_type, actor, notes, store.as_deref_mut())?;
        let result = send_with_deadline(transport, &ticket, self.timeout).await;
        self.complete(
            ActionCompletion {
                task_id: ticket.task_id,
                result,
            },
            store,
            tasks,
        )
    }
}

async fn send_with_deadline(
    transport: &dyn ActionTransport,
    ticket: &ActionTicket,
    timeout: Duration,
) -> Result<ActionResponse, ClientError> {
    match tokio::time::timeout(
        timeout,
        transport.post_task_action(&ticket.task_id, &ticket.request),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => Err(ClientError::Timeout(timeout)),
    }
}

#[cfg(test)]
#[path = "tests/actions_tests.rs"]
mod tests;
