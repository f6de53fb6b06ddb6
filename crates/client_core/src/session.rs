//! One journey view instance: store, channel, action controller and pending-task list, owned by a
//! single event loop.

use std::{future::Future, sync::Arc, time::Duration};

use shared::{
    domain::{ActionType, InvoiceId, TaskId},
    protocol::JourneyStep,
};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info};

use crate::{
    actions::{
        ActionCompletion, ActionOutcome, ActionTransport, TaskActionController,
        DEFAULT_ACTION_TIMEOUT,
    },
    api::DashboardClient,
    channel::{ChannelEvent, ChannelObserver, EventChannel, LinkState, ReconnectPolicy},
    error::ClientError,
    store::{JourneySnapshot, JourneyStateStore, StepOutcome, DEFAULT_DEDUP_WINDOW},
    tasks::{PendingTaskList, TaskListEvent},
};

pub const DEFAULT_ACTOR: &str = "ui:anonymous";

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub user: String,
    pub action_timeout: Duration,
    pub reconnect: ReconnectPolicy,
    pub dedup_window: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            user: DEFAULT_ACTOR.to_string(),
            action_timeout: DEFAULT_ACTION_TIMEOUT,
            reconnect: ReconnectPolicy::default(),
            dedup_window: DEFAULT_DEDUP_WINDOW,
        }
    }
}

pub struct JourneySession {
    client: DashboardClient,
    transport: Arc<dyn ActionTransport>,
    channel: EventChannel,
    store: Option<JourneyStateStore>,
    controller: TaskActionController,
    tasks: PendingTaskList,
    user: String,
    dedup_window: usize,
}

impl JourneySession {
    /// Returns the session and the queue its channel events arrive on; the owner drains the queue
    /// into [`JourneySession::handle_channel_event`].
    pub fn new(
        client: DashboardClient,
        options: SessionOptions,
    ) -> (Self, mpsc::UnboundedReceiver<ChannelEvent>) {
        let (channel, events) = EventChannel::new(
            client.http().clone(),
            client.base().clone(),
            options.reconnect,
        );
        let session = Self {
            transport: Arc::new(client.clone()),
            client,
            channel,
            store: None,
            controller: TaskActionController::new(options.action_timeout),
            tasks: PendingTaskList::new(),
            user: options.user,
            dedup_window: options.dedup_window,
        };
        (session, events)
    }

    pub fn client(&self) -> &DashboardClient {
        &self.client
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn invoice_id(&self) -> Option<&InvoiceId> {
        self.store.as_ref().map(JourneyStateStore::invoice_id)
    }

    pub fn store(&self) -> Option<&JourneyStateStore> {
        self.store.as_ref()
    }

    pub fn channel(&self) -> &EventChannel {
        &self.channel
    }

    pub fn controller(&self) -> &TaskActionController {
        &self.controller
    }

    pub fn tasks(&self) -> &PendingTaskList {
        &self.tasks
    }

    pub fn subscribe_tasks(&self) -> broadcast::Receiver<TaskListEvent> {
        self.tasks.subscribe()
    }

    pub fn snapshot(&self) -> Option<JourneySnapshot> {
        self.store.as_ref().map(JourneyStateStore::snapshot)
    }

    /// Opens the journey for `invoice_id`. Fails with `ChannelAlreadyOpen` while another is open.
    pub fn open(&mut self, invoice_id: InvoiceId) -> Result<u64, ClientError> {
        let generation = self.channel.open(invoice_id.clone())?;
        self.store = Some(JourneyStateStore::with_dedup_window(
            invoice_id,
            self.dedup_window,
        ));
        Ok(generation)
    }

    /// Closes the current journey, discarding its state. Idempotent.
    pub fn close(&mut self) -> bool {
        let closed = self.channel.close();
        if let Some(store) = self.store.take() {
            debug!(invoice_id = %store.invoice_id(), "journey: view closed");
        }
        closed
    }

    /// Closes the previous journey before opening the next one.
    pub fn switch_invoice(&mut self, invoice_id: InvoiceId) -> Result<u64, ClientError> {
        self.close();
        self.open(invoice_id)
    }

    /// Reopens a channel whose stream is down, skipping any pending backoff. A stream still
    /// connecting or live is left alone. The store is kept; the next hydration replaces it.
    /// Returns the new generation, or `None` when nothing needed reopening.
    pub fn reconnect(&mut self) -> Result<Option<u64>, ClientError> {
        let Some(store) = &self.store else {
            return Ok(None);
        };
        if store.is_frozen()
            || matches!(
                self.channel.link_state(),
                Some(LinkState::Connecting | LinkState::Live)
            )
        {
            return Ok(None);
        }
        let invoice_id = store.invoice_id().clone();
        self.channel.close();
        let generation = self.channel.open(invoice_id.clone())?;
        info!(invoice_id = %invoice_id, generation, "journey: channel reopened");
        Ok(Some(generation))
    }

    pub async fn refresh_tasks(&mut self) -> Result<usize, ClientError> {
        let tasks = self.client.list_pending_tasks().await?;
        let count = tasks.len();
        self.tasks.replace(tasks);
        Ok(count)
    }

    /// Reloads the pending-task list and reopens a disconnected channel.
    pub async fn refresh(&mut self) -> Result<usize, ClientError> {
        let count = self.refresh_tasks().await?;
        self.reconnect()?;
        Ok(count)
    }

    /// Applies a queued channel event. Returns false when it was stale.
    pub fn handle_channel_event(&mut self, event: ChannelEvent) -> bool {
        let Some(store) = self.store.as_mut() else {
            debug!(invoice_id = %event.invoice_id, "journey: event with no open view");
            return false;
        };
        let mut observer = SessionObserver {
            store,
            tasks: &mut self.tasks,
        };
        self.channel.deliver(event, &mut observer)
    }

    /// Starts an action on a listed task: installs the overlay and returns the request for the
    /// host to spawn. Its completion goes to [`JourneySession::handle_action_completion`].
    pub fn start_action(
        &mut self,
        task_id: &TaskId,
        action_type: ActionType,
        notes: Option<String>,
    ) -> Result<impl Future<Output = ActionCompletion> + Send + 'static, ClientError> {
        let task = self
            .tasks
            .get(task_id)
            .cloned()
            .ok_or_else(|| ClientError::UnknownTask(task_id.clone()))?;
        let ticket = self.controller.begin(
            &task,
            action_type,
            &self.user,
            notes,
            self.store.as_mut(),
        )?;
        Ok(self.controller.request(Arc::clone(&self.transport), ticket))
    }

    pub fn handle_action_completion(
        &mut self,
        completion: ActionCompletion,
    ) -> Result<ActionOutcome, ClientError> {
        self.controller
            .complete(completion, self.store.as_mut(), &mut self.tasks)
    }

    /// Runs an action to completion inline.
    pub async fn submit_action(
        &mut self,
        task_id: &TaskId,
        action_type: ActionType,
        notes: Option<String>,
    ) -> Result<ActionOutcome, ClientError> {
        let request = self.start_action(task_id, action_type, notes)?;
        let completion = request.await;
        self.handle_action_completion(completion)
    }
}

/// Feeds channel events to the store and lets appended steps close pending tasks.
struct SessionObserver<'a> {
    store: &'a mut JourneyStateStore,
    tasks: &'a mut PendingTaskList,
}

impl ChannelObserver for SessionObserver<'_> {
    fn on_hydrate(&mut self, steps: Vec<JourneyStep>) {
        let invoice_id = self.store.invoice_id().clone();
        let observed = steps.clone();
        if self.store.apply_hydrate(steps) {
            self.tasks.observe_hydrate(&invoice_id, &observed);
        }
    }

    fn on_step(&mut self, step: JourneyStep) {
        let invoice_id = self.store.invoice_id().clone();
        let observed = step.clone();
        if self.store.apply_step(step) != StepOutcome::Frozen {
            self.tasks.observe_step(&invoice_id, &observed);
        }
    }

    fn on_deleted(&mut self) {
        self.store.on_deleted();
    }

    fn on_connection_change(&mut self, connected: bool) {
        self.store.on_connection_change(connected);
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
