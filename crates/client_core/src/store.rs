//! Journey state reduction for one invoice. No I/O: every method is a synchronous transition.

use chrono::{SecondsFormat, Utc};
use shared::{
    domain::{InvoiceId, TaskId},
    protocol::{JourneyStep, StreamEvent, NO_STATUS},
};
use tracing::debug;

use crate::actions::PendingAction;

pub const DEFAULT_DEDUP_WINDOW: usize = 5;

/// Locally assumed status shown while a task action is unconfirmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptimisticOverlay {
    pub task_id: TaskId,
    pub status: String,
    /// Set once the action response reported the server's status.
    pub confirmed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Appended,
    Duplicate,
    Frozen,
}

/// Owned projection of the store used for rendering.
#[derive(Debug, Clone)]
pub struct JourneySnapshot {
    pub invoice_id: InvoiceId,
    pub steps: Vec<JourneyStep>,
    pub current_status: String,
    pub authoritative_status: String,
    pub connected: bool,
    pub frozen: bool,
    /// The overlay currently displayed, the most recent one still pending.
    pub overlay: Option<OptimisticOverlay>,
}

#[derive(Debug)]
pub struct JourneyStateStore {
    invoice_id: InvoiceId,
    steps: Vec<JourneyStep>,
    authoritative_status: Option<String>,
    /// One entry per task, oldest first; the last one is displayed.
    overlays: Vec<OptimisticOverlay>,
    connected: bool,
    frozen: bool,
    dedup_window: usize,
}

impl JourneyStateStore {
    pub fn new(invoice_id: InvoiceId) -> Self {
        Self::with_dedup_window(invoice_id, DEFAULT_DEDUP_WINDOW)
    }

    pub fn with_dedup_window(invoice_id: InvoiceId, dedup_window: usize) -> Self {
        Self {
            invoice_id,
            steps: Vec::new(),
            authoritative_status: None,
            overlays: Vec::new(),
            connected: false,
            frozen: false,
            dedup_window: dedup_window.max(1),
        }
    }

    pub fn invoice_id(&self) -> &InvoiceId {
        &self.invoice_id
    }

    pub fn steps(&self) -> &[JourneyStep] {
        &self.steps
    }

    /// Status to display: the optimistic overlay while one is active, else the authoritative one.
    pub fn current_status(&self) -> &str {
        self.overlay()
            .map(|overlay| overlay.status.as_str())
            .unwrap_or_else(|| self.authoritative_status())
    }

    /// Status hint of the most recently appended step carrying one.
    pub fn authoritative_status(&self) -> &str {
        self.authoritative_status.as_deref().unwrap_or(NO_STATUS)
    }

    pub fn overlay(&self) -> Option<&OptimisticOverlay> {
        self.overlays.last()
    }

    pub fn overlays(&self) -> &[OptimisticOverlay] {
        &self.overlays
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn apply(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Hydrate(steps) => {
                self.apply_hydrate(steps);
            }
            StreamEvent::Step(step) => {
                self.apply_step(step);
            }
            StreamEvent::Deleted => {
                self.apply_deleted();
            }
        }
    }

    /// Replaces the history wholesale. Hydration is authoritative; prior local steps are dropped.
    pub fn apply_hydrate(&mut self, steps: Vec<JourneyStep>) -> bool {
        if self.frozen {
            debug!(invoice_id = %self.invoice_id, "journey: hydrate ignored on deleted invoice");
            return false;
        }
        self.steps = steps;
        self.authoritative_status = self
            .steps
            .iter()
            .rev()
            .find_map(|step| step.status_hint.clone());
        self.clear_overlay("hydrate");
        true
    }

    pub fn apply_step(&mut self, step: JourneyStep) -> StepOutcome {
        if self.frozen {
            debug!(invoice_id = %self.invoice_id, "journey: step ignored on deleted invoice");
            return StepOutcome::Frozen;
        }

        let window_start = self.steps.len().saturating_sub(self.dedup_window);
        if self.steps[window_start..]
            .iter()
            .any(|recent| recent.same_content(&step))
        {
            debug!(
                invoice_id = %self.invoice_id,
                sequence = step.sequence,
                "journey: dropping redelivered step"
            );
            return StepOutcome::Duplicate;
        }

        if let Some(status) = &step.status_hint {
            self.authoritative_status = Some(status.clone());
        }
        self.steps.push(step);
        self.clear_overlay("step");
        StepOutcome::Appended
    }

    /// Appends the terminal marker and freezes the journey. Repeated calls are no-ops.
    pub fn apply_deleted(&mut self) -> bool {
        if self.frozen {
            return false;
        }
        let sequence = self
            .steps
            .last()
            .map(|step| step.sequence.saturating_add(1))
            .unwrap_or(0);
        let marker = JourneyStep::deleted_marker(
            sequence,
            Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        );
        self.authoritative_status = marker.status_hint.clone();
        self.steps.push(marker);
        self.clear_overlay("deleted");
        self.frozen = true;
        true
    }

    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    /// Shows the pending action's status until authoritative data arrives.
    /// Returns false when the action targets another invoice or the journey is frozen.
    pub fn apply_optimistic(&mut self, pending: &PendingAction) -> bool {
        if self.frozen || pending.invoice_id != self.invoice_id {
            return false;
        }
        self.overlays
            .retain(|overlay| overlay.task_id != pending.task_id);
        self.overlays.push(OptimisticOverlay {
            task_id: pending.task_id.clone(),
            status: pending.optimistic_status.clone(),
            confirmed: false,
        });
        true
    }

    /// Drops the overlay installed for `pending`, leaving other tasks' overlays in place.
    /// A no-op once authoritative data already cleared it.
    pub fn revert_optimistic(&mut self, pending: &PendingAction) -> bool {
        let before = self.overlays.len();
        self.overlays
            .retain(|overlay| overlay.task_id != pending.task_id);
        self.overlays.len() != before
    }

    /// Adopts the status reported by the action response into the overlay owned by `task_id`.
    pub fn confirm_optimistic(&mut self, task_id: &TaskId, status: &str) -> bool {
        let Some(overlay) = self
            .overlays
            .iter_mut()
            .find(|overlay| &overlay.task_id == task_id)
        else {
            return false;
        };
        overlay.status = status.to_string();
        overlay.confirmed = true;
        true
    }

    pub fn snapshot(&self) -> JourneySnapshot {
        JourneySnapshot {
            invoice_id: self.invoice_id.clone(),
            steps: self.steps.clone(),
            current_status: self.current_status().to_string(),
            authoritative_status: self.authoritative_status().to_string(),
            connected: self.connected,
            frozen: self.frozen,
            overlay: self.overlay().cloned(),
        }
    }

    fn clear_overlay(&mut self, reason: &'static str) {
        for overlay in std::mem::take(&mut self.overlays) {
            if overlay.status != self.authoritative_status() {
                debug!(
                    invoice_id = %self.invoice_id,
                    task_id = %overlay.task_id,
                    optimistic = %overlay.status,
                    authoritative = %self.authoritative_status(),
                    reason,
                    "journey: optimistic status superseded by authoritative state"
                );
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;
