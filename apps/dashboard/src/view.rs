//! Terminal rendering of the journey. Everything shown here comes from snapshots pushed by the
//! backend worker; the view never derives a status on its own.

use std::fmt::Write as _;

use client_core::JourneySnapshot;
use shared::{
    domain::{InvoiceId, TaskId, WorkflowStatus},
    protocol::{JourneyStep, PendingTask, NO_STATUS},
};

use crate::controller::events::UiEvent;

pub fn status_badge(status: &str) -> String {
    if status == NO_STATUS {
        return format!("[ {NO_STATUS} ]");
    }
    match WorkflowStatus::parse(status) {
        Some(known) if known.needs_attention() => format!("[! {} ]", known.label()),
        Some(known) => format!("[ {} ]", known.label()),
        None => format!("[? {status} ]"),
    }
}

pub fn connection_indicator(snapshot: &JourneySnapshot) -> &'static str {
    if snapshot.frozen {
        "closed (invoice deleted)"
    } else if snapshot.connected {
        "live"
    } else {
        "reconnecting"
    }
}

pub fn timeline_line(step: &JourneyStep) -> String {
    let mut line = format!(
        "{:>4}  {:<20}  {:<13}  {}",
        step.sequence,
        step.timestamp.as_deref().unwrap_or("-"),
        step.kind.as_str(),
        step.actor.as_deref().unwrap_or("-"),
    );
    if let Some(hint) = &step.status_hint {
        let _ = write!(line, "  -> {hint}");
    }
    line
}

#[derive(Debug, Default)]
pub struct PresentationBinding {
    journey: Option<JourneySnapshot>,
    tasks: Vec<PendingTask>,
    busy: Vec<TaskId>,
    explanation: Option<String>,
    status: String,
}

impl PresentationBinding {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tasks(&self) -> &[PendingTask] {
        &self.tasks
    }

    pub fn invoice_id(&self) -> Option<&InvoiceId> {
        self.journey.as_ref().map(|journey| &journey.invoice_id)
    }

    pub fn status_mut(&mut self) -> &mut String {
        &mut self.status
    }

    pub fn set_status(&mut self, status: impl Into<String>) {
        self.status = status.into();
    }

    pub fn apply(&mut self, event: UiEvent) {
        match event {
            UiEvent::Info(message) => self.status = message,
            UiEvent::Error(err) => {
                self.status = format!("{}: {}", err.label(), err.message());
            }
            UiEvent::Journey(snapshot) => {
                if self.invoice_id() != Some(&snapshot.invoice_id) {
                    self.explanation = None;
                }
                self.journey = Some(snapshot);
            }
            UiEvent::JourneyClosed => {
                self.journey = None;
                self.explanation = None;
            }
            UiEvent::Tasks { tasks, busy } => {
                self.tasks = tasks;
                self.busy = busy;
            }
            UiEvent::ActionFinished { task_id, status } => {
                self.status = match status {
                    Some(status) => format!("task {task_id} done; server reports {status}"),
                    None => format!("task {task_id} done"),
                };
            }
            UiEvent::Explanation(response) => {
                self.explanation = Some(match (response.explain, response.message) {
                    (Some(explain), _) => serde_json::to_string_pretty(&explain)
                        .unwrap_or_else(|_| explain.to_string()),
                    (None, Some(message)) => message,
                    (None, None) => "no explanation available".to_string(),
                });
            }
            UiEvent::FeedbackRecorded { inserted_id } => {
                self.status = format!(
                    "feedback recorded ({})",
                    inserted_id.as_deref().unwrap_or("no id")
                );
            }
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        match &self.journey {
            Some(journey) => {
                let _ = writeln!(
                    out,
                    "Invoice {}  {}  stream: {}",
                    journey.invoice_id,
                    status_badge(&journey.current_status),
                    connection_indicator(journey),
                );
                if let Some(overlay) = &journey.overlay {
                    let _ = writeln!(
                        out,
                        "  awaiting server for task {}{}",
                        overlay.task_id,
                        if overlay.confirmed { " (acknowledged)" } else { "" }
                    );
                }
                let _ = writeln!(out, "Timeline:");
                if journey.steps.is_empty() {
                    let _ = writeln!(out, "  (no steps yet)");
                }
                for step in &journey.steps {
                    let _ = writeln!(out, "  {}", timeline_line(step));
                }
            }
            None => {
                let _ = writeln!(out, "No invoice open");
            }
        }

        let _ = writeln!(out, "Pending tasks:");
        if self.tasks.is_empty() {
            let _ = writeln!(out, "  (none)");
        }
        for (index, task) in self.tasks.iter().enumerate() {
            let _ = writeln!(
                out,
                "  {}. {}  invoice {}  {}{}",
                index + 1,
                task.id,
                task.invoice_id,
                task.task_type.as_deref().unwrap_or("task"),
                if self.busy.contains(&task.id) { "  (submitting...)" } else { "" }
            );
        }

        if let Some(explanation) = &self.explanation {
            let _ = writeln!(out, "Explanation:\n{explanation}");
        }
        if !self.status.is_empty() {
            let _ = writeln!(out, "> {}", self.status);
        }
        out
    }
}

#[cfg(test)]
#[path = "tests/view_tests.rs"]
mod tests;
