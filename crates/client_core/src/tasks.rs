//! Pending human-task list shared by the dashboard's task view and the action controller.

use shared::{
    domain::{InvoiceId, TaskId, WorkflowStatus},
    protocol::{JourneyStep, PendingTask},
};
use tokio::sync::broadcast;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskListEvent {
    Replaced { count: usize },
    Removed { task_id: TaskId, invoice_id: InvoiceId },
}

#[derive(Debug)]
pub struct PendingTaskList {
    tasks: Vec<PendingTask>,
    events: broadcast::Sender<TaskListEvent>,
}

impl Default for PendingTaskList {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingTaskList {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            tasks: Vec::new(),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskListEvent> {
        self.events.subscribe()
    }

    pub fn tasks(&self) -> &[PendingTask] {
        &self.tasks
    }

    pub fn get(&self, task_id: &TaskId) -> Option<&PendingTask> {
        self.tasks.iter().find(|task| &task.id == task_id)
    }

    pub fn for_invoice<'a>(
        &'a self,
        invoice_id: &'a InvoiceId,
    ) -> impl Iterator<Item = &'a PendingTask> + 'a {
        self.tasks
            .iter()
            .filter(move |task| &task.invoice_id == invoice_id)
    }

    pub fn replace(&mut self, tasks: Vec<PendingTask>) {
        self.tasks = tasks;
        let _ = self.events.send(TaskListEvent::Replaced {
            count: self.tasks.len(),
        });
    }

    /// Removes a task. Removing an unknown or already-removed task is a no-op returning false.
    pub fn remove(&mut self, task_id: &TaskId) -> bool {
        let Some(index) = self.tasks.iter().position(|task| &task.id == task_id) else {
            return false;
        };
        let task = self.tasks.remove(index);
        info!(task_id = %task.id, invoice_id = %task.invoice_id, "tasks: removed pending task");
        let _ = self.events.send(TaskListEvent::Removed {
            task_id: task.id,
            invoice_id: task.invoice_id,
        });
        true
    }

    /// Drops tasks a stream step shows as decided: the step names the task, or it reports a
    /// decision status for the task's invoice.
    pub fn observe_step(&mut self, invoice_id: &InvoiceId, step: &JourneyStep) -> Vec<TaskId> {
        let named_task = step.task_id();
        let decided = step
            .status_hint
            .as_deref()
            .and_then(WorkflowStatus::parse)
            .is_some_and(WorkflowStatus::is_decision);

        let closed: Vec<TaskId> = self
            .tasks
            .iter()
            .filter(|task| {
                named_task.as_ref() == Some(&task.id) || (decided && &task.invoice_id == invoice_id)
            })
            .map(|task| task.id.clone())
            .collect();

        closed
            .into_iter()
            .filter(|task_id| self.remove(task_id))
            .collect()
    }

    /// Drops tasks a rehydrated history shows as decided: any step naming the task, or a
    /// decision as the latest status of the task's invoice. Older decisions are history.
    pub fn observe_hydrate(&mut self, invoice_id: &InvoiceId, steps: &[JourneyStep]) -> Vec<TaskId> {
        let decided = steps
            .iter()
            .rev()
            .find_map(|step| step.status_hint.as_deref())
            .and_then(WorkflowStatus::parse)
            .is_some_and(WorkflowStatus::is_decision);
        let named: Vec<TaskId> = steps.iter().filter_map(JourneyStep::task_id).collect();

        let closed: Vec<TaskId> = self
            .tasks
            .iter()
            .filter(|task| {
                named.contains(&task.id) || (decided && &task.invoice_id == invoice_id)
            })
            .map(|task| task.id.clone())
            .collect();

        closed
            .into_iter()
            .filter(|task_id| self.remove(task_id))
            .collect()
    }
}

#[cfg(test)]
#[path = "tests/tasks_tests.rs"]
mod tests;
