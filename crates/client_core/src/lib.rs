//! Real-time invoice journey client: SSE channel, journey state reduction, and task actions with
//! optimistic feedback.

pub mod actions;
pub mod api;
pub mod channel;
pub mod error;
pub mod session;
pub mod sse;
pub mod store;
pub mod tasks;

pub use actions::{
    ActionCompletion, ActionOutcome, ActionTicket, ActionTransport, PendingAction,
    TaskActionController, DEFAULT_ACTION_TIMEOUT,
};
pub use api::{ApiBase, DashboardClient};
pub use channel::{
    ChannelEvent, ChannelEventKind, ChannelObserver, EventChannel, LinkState, ReconnectPolicy,
};
pub use error::ClientError;
pub use session::{JourneySession, SessionOptions, DEFAULT_ACTOR};
pub use store::{JourneySnapshot, JourneyStateStore, OptimisticOverlay, StepOutcome};
pub use tasks::{PendingTaskList, TaskListEvent};
