//! Server-push channel for one invoice's journey.
//!
//! The stream runs on a spawned task that decodes SSE frames and forwards typed events, tagged with
//! the channel generation, over an unbounded queue. The owner drains the queue and hands each event
//! to [`EventChannel::deliver`], which drops anything from a closed or replaced generation.

use std::time::Duration;

use futures::StreamExt;
use reqwest::{header::ACCEPT, Client};
use shared::{
    domain::InvoiceId,
    protocol::{JourneyStep, StreamEvent},
};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    api::{ensure_success, ApiBase},
    error::ClientError,
    sse::SseDecoder,
    store::JourneyStateStore,
};

pub const DEFAULT_RECONNECT_INITIAL: Duration = Duration::from_millis(500);
pub const DEFAULT_RECONNECT_MAX: Duration = Duration::from_secs(30);

const MAX_BACKOFF_EXPONENT: u32 = 16;
const LAST_EVENT_ID: &str = "Last-Event-ID";

/// What the stream task is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Request sent, response not yet accepted.
    Connecting,
    Live,
    /// Between attempts, sleeping out the backoff.
    Waiting,
    /// The task has exited and will not reconnect on its own.
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial: DEFAULT_RECONNECT_INITIAL,
            max: DEFAULT_RECONNECT_MAX,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt` (0-based). A server `retry:` hint replaces the
    /// initial delay as the base.
    pub fn delay(&self, attempt: u32, server_retry: Option<Duration>) -> Duration {
        let base = server_retry.unwrap_or(self.initial);
        base.saturating_mul(1u32 << attempt.min(MAX_BACKOFF_EXPONENT))
            .min(self.max)
    }
}

#[derive(Debug, Clone)]
pub enum ChannelEventKind {
    Hydrate(Vec<JourneyStep>),
    Step(JourneyStep),
    Deleted,
    ConnectionChange(bool),
}

impl From<StreamEvent> for ChannelEventKind {
    fn from(value: StreamEvent) -> Self {
        match value {
            StreamEvent::Hydrate(steps) => Self::Hydrate(steps),
            StreamEvent::Step(step) => Self::Step(step),
            StreamEvent::Deleted => Self::Deleted,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChannelEvent {
    pub generation: u64,
    pub invoice_id: InvoiceId,
    pub kind: ChannelEventKind,
}

/// Typed callback surface for channel events.
pub trait ChannelObserver {
    fn on_hydrate(&mut self, steps: Vec<JourneyStep>);
    fn on_step(&mut self, step: JourneyStep);
    fn on_deleted(&mut self);
    fn on_connection_change(&mut self, connected: bool);
}

impl ChannelObserver for JourneyStateStore {
    fn on_hydrate(&mut self, steps: Vec<JourneyStep>) {
        self.apply_hydrate(steps);
    }

    fn on_step(&mut self, step: JourneyStep) {
        self.apply_step(step);
    }

    fn on_deleted(&mut self) {
        self.apply_deleted();
    }

    fn on_connection_change(&mut self, connected: bool) {
        self.set_connected(connected);
    }
}

#[derive(Debug)]
struct ChannelHandle {
    invoice_id: InvoiceId,
    generation: u64,
    link: watch::Receiver<LinkState>,
    task: Option<JoinHandle<()>>,
}

impl ChannelHandle {
    fn link_state(&self) -> LinkState {
        match &self.task {
            Some(task) if !task.is_finished() => *self.link.borrow(),
            _ => LinkState::Stopped,
        }
    }

    /// Releases the connection. Safe to call more than once.
    fn close(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        self.close();
    }
}

#[derive(Debug)]
pub struct EventChannel {
    http: Client,
    base: ApiBase,
    policy: ReconnectPolicy,
    generation: u64,
    active: Option<ChannelHandle>,
    events: mpsc::UnboundedSender<ChannelEvent>,
}

impl EventChannel {
    pub fn new(
        http: Client,
        base: ApiBase,
        policy: ReconnectPolicy,
    ) -> (Self, mpsc::UnboundedReceiver<ChannelEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        (
            Self {
                http,
                base,
                policy,
                generation: 0,
                active: None,
                events,
            },
            receiver,
        )
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_open(&self) -> bool {
        self.active.is_some()
    }

    /// State of the open channel's stream task; `None` when no channel is open.
    pub fn link_state(&self) -> Option<LinkState> {
        self.active.as_ref().map(ChannelHandle::link_state)
    }

    /// Starts streaming `invoice_id` under a new generation. Must run inside a tokio runtime.
    pub fn open(&mut self, invoice_id: InvoiceId) -> Result<u64, ClientError> {
        if let Some(active) = &self.active {
            return Err(ClientError::ChannelAlreadyOpen(active.invoice_id.clone()));
        }

        self.generation += 1;
        let (link_tx, link) = watch::channel(LinkState::Connecting);
        let worker = StreamWorker {
            http: self.http.clone(),
            url: self
                .base
                .join(&["invoices", invoice_id.as_str(), "stream"]),
            invoice_id: invoice_id.clone(),
            generation: self.generation,
            policy: self.policy,
            events: self.events.clone(),
            link: link_tx,
            connected: false,
            attempt: 0,
            server_retry: None,
            last_event_id: None,
        };
        info!(invoice_id = %invoice_id, generation = self.generation, "channel: opening");
        let task = tokio::spawn(worker.run());
        self.active = Some(ChannelHandle {
            invoice_id,
            generation: self.generation,
            link,
            task: Some(task),
        });
        Ok(self.generation)
    }

    /// Closes the active channel, if any. Events already queued for it become stale.
    pub fn close(&mut self) -> bool {
        let Some(mut active) = self.active.take() else {
            return false;
        };
        active.close();
        self.generation += 1;
        info!(
            invoice_id = %active.invoice_id,
            generation = active.generation,
            "channel: closed"
        );
        true
    }

    pub fn is_current(&self, event: &ChannelEvent) -> bool {
        self.active.as_ref().is_some_and(|active| {
            active.generation == event.generation && active.invoice_id == event.invoice_id
        })
    }

    /// Routes a queued event to `observer`. Returns false when the event was stale and discarded.
    pub fn deliver(&mut self, event: ChannelEvent, observer: &mut impl ChannelObserver) -> bool {
        if !self.is_current(&event) {
            debug!(
                invoice_id = %event.invoice_id,
                generation = event.generation,
                current = self.generation,
                "channel: discarding stale event"
            );
            return false;
        }

        match event.kind {
            ChannelEventKind::Hydrate(steps) => observer.on_hydrate(steps),
            ChannelEventKind::Step(step) => observer.on_step(step),
            ChannelEventKind::ConnectionChange(connected) => {
                observer.on_connection_change(connected)
            }
            ChannelEventKind::Deleted => {
                observer.on_deleted();
                observer.on_connection_change(false);
                self.close();
            }
        }
        true
    }
}

enum StreamEnd {
    Deleted,
    Eof,
}

struct StreamWorker {
    http: Client,
    url: Url,
    invoice_id: InvoiceId,
    generation: u64,
    policy: ReconnectPolicy,
    events: mpsc::UnboundedSender<ChannelEvent>,
    link: watch::Sender<LinkState>,
    connected: bool,
    attempt: u32,
    server_retry: Option<Duration>,
    last_event_id: Option<String>,
}

impl StreamWorker {
    async fn run(mut self) {
        loop {
            self.link.send_replace(LinkState::Connecting);
            match self.stream_once().await {
                Ok(StreamEnd::Deleted) => {
                    self.set_connected(false);
                    self.link.send_replace(LinkState::Stopped);
                    info!(invoice_id = %self.invoice_id, "channel: invoice deleted upstream, not reconnecting");
                    return;
                }
                Ok(StreamEnd::Eof) => {
                    info!(invoice_id = %self.invoice_id, "channel: stream ended by server");
                }
                Err(err) => {
                    warn!(invoice_id = %self.invoice_id, attempt = self.attempt, "channel: stream failed: {err}");
                }
            }
            self.set_connected(false);
            if self.events.is_closed() {
                self.link.send_replace(LinkState::Stopped);
                return;
            }
            self.link.send_replace(LinkState::Waiting);

            let delay = self.policy.delay(self.attempt, self.server_retry);
            self.attempt = self.attempt.saturating_add(1);
            debug!(
                invoice_id = %self.invoice_id,
                attempt = self.attempt,
                delay_ms = delay.as_millis() as u64,
                "channel: reconnecting"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn stream_once(&mut self) -> Result<StreamEnd, ClientError> {
        let mut request = self
            .http
            .get(self.url.clone())
            .header(ACCEPT, "text/event-stream");
        if let Some(id) = &self.last_event_id {
            request = request.header(LAST_EVENT_ID, id.as_str());
        }
        let response = ensure_success(request.send().await?).await?;
        self.attempt = 0;
        self.link.send_replace(LinkState::Live);
        self.set_connected(true);

        let mut decoder = SseDecoder::new();
        let mut next_sequence = 0u64;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            for frame in decoder.push(&chunk)? {
                if frame.id.is_some() {
                    self.last_event_id.clone_from(&frame.id);
                }
                let event = match StreamEvent::decode(&frame.event, &frame.data, next_sequence) {
                    Ok(Some(event)) => event,
                    Ok(None) => {
                        debug!(event = %frame.event, "channel: ignoring unknown event");
                        continue;
                    }
                    Err(err) => {
                        let err = ClientError::from(err);
                        warn!(
                            invoice_id = %self.invoice_id,
                            event = %frame.event,
                            "channel: dropping event: {err}"
                        );
                        continue;
                    }
                };

                match &event {
                    StreamEvent::Hydrate(steps) => {
                        next_sequence = steps
                            .iter()
                            .map(|step| step.sequence.saturating_add(1))
                            .max()
                            .unwrap_or(0);
                    }
                    StreamEvent::Step(step) => {
                        next_sequence = next_sequence.max(step.sequence.saturating_add(1));
                    }
                    StreamEvent::Deleted => {
                        self.emit(ChannelEventKind::Deleted);
                        return Ok(StreamEnd::Deleted);
                    }
                }
                self.emit(event.into());
            }
            if decoder.retry().is_some() {
                self.server_retry = decoder.retry();
            }
        }
        Ok(StreamEnd::Eof)
    }

    fn set_connected(&mut self, connected: bool) {
        if self.connected == connected {
            return;
        }
        self.connected = connected;
        self.emit(ChannelEventKind::ConnectionChange(connected));
    }

    fn emit(&self, kind: ChannelEventKind) {
        let _ = self.events.send(ChannelEvent {
            generation: self.generation,
            invoice_id: self.invoice_id.clone(),
            kind,
        });
    }
}

#[cfg(test)]
#[path = "tests/channel_tests.rs"]
mod tests;
