//! Runtime bridge between the UI command queue and the journey session.
//!
//! The worker owns the [`JourneySession`]; channel events, commands and action completions are
//! all handled on its single task, so the session needs no locking.

use std::thread;

use client_core::{
    ActionCompletion, ChannelEvent, DashboardClient, JourneySession, SessionOptions, TaskListEvent,
};
use crossbeam_channel::{Receiver, Sender};
use shared::{domain::Verdict, protocol::FeedbackRequest};
use tokio::sync::{
    broadcast::{self, error::TryRecvError},
    mpsc,
};
use tracing::{debug, info};

use crate::backend_bridge::commands::BackendCommand;
use crate::controller::events::{UiError, UiErrorContext, UiEvent};

/// Spawns the backend thread with its own runtime. The thread exits after `Shutdown` or once
/// every command sender is dropped.
pub fn launch(
    client: DashboardClient,
    options: SessionOptions,
    cmd_rx: Receiver<BackendCommand>,
    ui_tx: Sender<UiEvent>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let _ = ui_tx.try_send(UiEvent::Info("Backend worker starting...".to_string()));
        let runtime = match tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(err) => {
                let _ = ui_tx.try_send(UiEvent::Error(UiError::from_message(
                    UiErrorContext::BackendStartup,
                    format!("backend worker startup failure: failed to build runtime: {err}"),
                )));
                tracing::error!("failed to build backend runtime: {err}");
                return;
            }
        };

        runtime.block_on(async move {
            let (forward_tx, forward_rx) = mpsc::channel(256);
            tokio::task::spawn_blocking(move || {
                while let Ok(cmd) = cmd_rx.recv() {
                    if forward_tx.blocking_send(cmd).is_err() {
                        break;
                    }
                }
            });

            let (session, events) = JourneySession::new(client, options);
            let _ = ui_tx.try_send(UiEvent::Info("Backend worker ready".to_string()));
            BackendWorker::new(session, ui_tx).run(events, forward_rx).await;
        });
        runtime.shutdown_background();
    })
}

pub struct BackendWorker {
    session: JourneySession,
    ui_tx: Sender<UiEvent>,
    task_events: broadcast::Receiver<TaskListEvent>,
    completions_tx: mpsc::UnboundedSender<ActionCompletion>,
    completions_rx: Option<mpsc::UnboundedReceiver<ActionCompletion>>,
}

impl BackendWorker {
    pub fn new(session: JourneySession, ui_tx: Sender<UiEvent>) -> Self {
        let task_events = session.subscribe_tasks();
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        Self {
            session,
            ui_tx,
            task_events,
            completions_tx,
            completions_rx: Some(completions_rx),
        }
    }

    pub async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<ChannelEvent>,
        mut commands: mpsc::Receiver<BackendCommand>,
    ) {
        let Some(mut completions) = self.completions_rx.take() else {
            return;
        };

        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(BackendCommand::Shutdown) | None => break,
                    Some(cmd) => self.handle_command(cmd).await,
                },
                Some(event) = events.recv() => self.handle_channel_event(event),
                Some(completion) = completions.recv() => self.handle_completion(completion),
            }
        }

        self.session.close();
        info!("backend: worker stopped");
    }

    async fn handle_command(&mut self, cmd: BackendCommand) {
        debug!(command = cmd.name(), "backend: handling ui command");
        match cmd {
            BackendCommand::Open { invoice_id } => {
                match self.session.switch_invoice(invoice_id) {
                    Ok(_) => self.publish_journey(),
                    Err(err) => self.publish_error(UiErrorContext::Stream, &err),
                }
            }
            BackendCommand::Close => {
                self.session.close();
                self.send(UiEvent::JourneyClosed);
            }
            BackendCommand::Refresh => match self.session.refresh().await {
                Ok(count) => {
                    self.drain_task_events();
                    self.publish_tasks();
                    self.send(UiEvent::Info(format!("{count} pending task(s)")));
                }
                Err(err) => self.publish_error(UiErrorContext::Tasks, &err),
            },
            BackendCommand::Act {
                task_id,
                action,
                notes,
            } => match self.session.start_action(&task_id, action, notes) {
                Ok(request) => {
                    let completions = self.completions_tx.clone();
                    tokio::spawn(async move {
                        let _ = completions.send(request.await);
                    });
                    self.publish_journey();
                    self.publish_tasks();
                }
                Err(err) => self.publish_error(UiErrorContext::Action, &err),
            },
            BackendCommand::SuggestEdit { step_id, notes } => {
                let Some(invoice_id) = self.session.invoice_id().cloned() else {
                    self.send_error(UiErrorContext::Feedback, "no invoice open for feedback");
                    return;
                };
                let feedback = FeedbackRequest {
                    invoice_id,
                    step_id,
                    verdict: Verdict::SuggestEdit,
                    notes,
                    user: self.session.user().to_string(),
                };
                match self.session.client().post_feedback(&feedback).await {
                    Ok(ack) => self.send(UiEvent::FeedbackRecorded {
                        inserted_id: ack.inserted_id,
                    }),
                    Err(err) => self.publish_error(UiErrorContext::Feedback, &err),
                }
            }
            BackendCommand::Explain { regenerate } => {
                let Some(invoice_id) = self.session.invoice_id().cloned() else {
                    self.send_error(UiErrorContext::Explain, "no invoice open to explain");
                    return;
                };
                let response = if regenerate {
                    let triggering_step = self
                        .session
                        .store()
                        .and_then(|store| store.steps().last())
                        .map(|step| step.payload.clone());
                    self.session
                        .client()
                        .request_explanation(&invoice_id, triggering_step)
                        .await
                } else {
                    self.session.client().fetch_explanation(&invoice_id).await
                };
                match response {
                    Ok(response) => self.send(UiEvent::Explanation(response)),
                    Err(err) => self.publish_error(UiErrorContext::Explain, &err),
                }
            }
            BackendCommand::Shutdown => {}
        }
    }

    fn handle_channel_event(&mut self, event: ChannelEvent) {
        if !self.session.handle_channel_event(event) {
            return;
        }
        self.publish_journey();
        if self.drain_task_events() {
            self.publish_tasks();
        }
    }

    fn handle_completion(&mut self, completion: ActionCompletion) {
        match self.session.handle_action_completion(completion) {
            Ok(outcome) => self.send(UiEvent::ActionFinished {
                task_id: outcome.task_id,
                status: outcome.status,
            }),
            Err(err) => self.publish_error(UiErrorContext::Action, &err),
        }
        self.drain_task_events();
        self.publish_journey();
        self.publish_tasks();
    }

    /// Consumes queued task-list notifications; true when the list changed.
    fn drain_task_events(&mut self) -> bool {
        let mut changed = false;
        loop {
            match self.task_events.try_recv() {
                Ok(_) | Err(TryRecvError::Lagged(_)) => changed = true,
                Err(TryRecvError::Empty | TryRecvError::Closed) => return changed,
            }
        }
    }

    fn publish_journey(&self) {
        if let Some(snapshot) = self.session.snapshot() {
            self.send(UiEvent::Journey(snapshot));
        }
    }

    fn publish_tasks(&self) {
        let tasks = self.session.tasks().tasks().to_vec();
        let busy = tasks
            .iter()
            .filter(|task| self.session.controller().is_pending(&task.id))
            .map(|task| task.id.clone())
            .collect();
        self.send(UiEvent::Tasks { tasks, busy });
    }

    fn publish_error(&self, context: UiErrorContext, err: &client_core::ClientError) {
        self.send(UiEvent::Error(UiError::from_client(context, err)));
    }

    fn send_error(&self, context: UiErrorContext, message: &str) {
        self.send(UiEvent::Error(UiError::from_message(context, message)));
    }

    fn send(&self, event: UiEvent) {
        if self.ui_tx.try_send(event).is_err() {
            debug!("backend: ui queue full or closed; event dropped");
        }
    }
}

#[cfg(test)]
#[path = "../tests/runtime_tests.rs"]
mod tests;
