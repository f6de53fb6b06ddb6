use super::*;
use futures::StreamExt;
use axum::{
    body::Body,
    extract::Path,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::convert::Infallible;
use tokio::{net::TcpListener, time::timeout};

use crate::{
    api::ApiBase,
    channel::{ChannelEventKind, LinkState},
};

async fn serve_stream(Path(invoice_id): Path<String>) -> Response {
    let init = json!({
        "workflow": {
            "steps": [
                { "agent": "StatusManager", "type": "status_change", "to": "RECEIVED", "invoice_id": invoice_id },
                { "agent": "StatusManager", "type": "status_change", "from": "RECEIVED", "to": "PENDING_APPROVAL" }
            ]
        }
    });
    let frames: Vec<Result<String, Infallible>> =
        vec![Ok(format!("retry: 20\nevent: init\ndata: {init}\n\n"))];
    let body = Body::from_stream(tokio_stream::iter(frames).chain(tokio_stream::pending()));
    ([(header::CONTENT_TYPE, "text/event-stream")], body).into_response()
}

async fn spawn_backend() -> DashboardClient {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let app = Router::new()
        .route("/invoices/:invoice_id/stream", get(serve_stream))
        .route(
            "/tasks",
            get(|| async {
                Json(json!([
                    { "_id": "task-1", "invoice_id": "inv-1", "type": "approval", "status": "pending" },
                    { "_id": "task-2", "invoice_id": "inv-2", "type": "approval", "status": "pending" }
                ]))
            }),
        )
        .route(
            "/tasks/:task_id/action",
            post(|Path(task_id): Path<String>| async move {
                Json(json!({ "task_id": task_id, "invoice_status": "READY_FOR_POSTING" }))
            }),
        );
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    DashboardClient::new(ApiBase::parse(&format!("http://{addr}")).expect("api base"))
}

fn options() -> SessionOptions {
    SessionOptions {
        user: "ui:alice".to_string(),
        reconnect: ReconnectPolicy {
            initial: Duration::from_millis(10),
            max: Duration::from_millis(50),
        },
        ..SessionOptions::default()
    }
}

async fn pump_until(
    session: &mut JourneySession,
    events: &mut mpsc::UnboundedReceiver<ChannelEvent>,
    done: impl Fn(&JourneySession) -> bool,
) {
    timeout(Duration::from_secs(5), async {
        while !done(session) {
            let event = events.recv().await.expect("event queue open");
            session.handle_channel_event(event);
        }
    })
    .await
    .expect("condition reached before timeout");
}

fn hydrated(session: &JourneySession) -> bool {
    session
        .store()
        .is_some_and(|store| store.is_connected() && store.steps().len() == 2)
}

#[tokio::test]
async fn approving_from_an_open_journey_converges_and_closes_the_task() {
    let client = spawn_backend().await;
    let (mut session, mut events) = JourneySession::new(client, options());
    let mut task_events = session.subscribe_tasks();

    session.open(InvoiceId::new("inv-1")).expect("open");
    pump_until(&mut session, &mut events, hydrated).await;
    assert_eq!(
        session.snapshot().expect("snapshot").current_status,
        "PENDING_APPROVAL"
    );

    assert_eq!(session.refresh_tasks().await.expect("tasks"), 2);
    assert!(matches!(
        task_events.try_recv(),
        Ok(TaskListEvent::Replaced { count: 2 })
    ));

    let request = session
        .start_action(&TaskId::new("task-1"), ActionType::Approve, None)
        .expect("started");
    assert_eq!(session.snapshot().expect("snapshot").current_status, "approved");
    assert!(session.controller().is_pending(&TaskId::new("task-1")));
    assert!(matches!(
        session.start_action(&TaskId::new("task-1"), ActionType::Approve, None),
        Err(ClientError::ActionInFlight(_))
    ));

    let completion = tokio::spawn(request).await.expect("request task");
    let outcome = session
        .handle_action_completion(completion)
        .expect("completed");

    assert_eq!(outcome.status.as_deref(), Some("READY_FOR_POSTING"));
    assert_eq!(
        session.snapshot().expect("snapshot").current_status,
        "READY_FOR_POSTING"
    );
    assert!(session.tasks().get(&TaskId::new("task-1")).is_none());
    assert!(matches!(
        task_events.try_recv(),
        Ok(TaskListEvent::Removed { .. })
    ));

    let generation = session.channel().generation();
    let late = ChannelEvent {
        generation,
        invoice_id: InvoiceId::new("inv-1"),
        kind: ChannelEventKind::Step(
            JourneyStep::from_wire(
                json!({ "agent": "HITL", "status": "completed", "task_id": "task-1" }),
                2,
            )
            .expect("valid step"),
        ),
    };
    assert!(session.handle_channel_event(late));
    assert!(task_events.try_recv().is_err());
}

#[tokio::test]
async fn decision_step_on_the_stream_closes_listed_tasks() {
    let client = spawn_backend().await;
    let (mut session, mut events) = JourneySession::new(client, options());
    session.refresh_tasks().await.expect("tasks");
    session.open(InvoiceId::new("inv-2")).expect("open");
    pump_until(&mut session, &mut events, hydrated).await;

    let decided = ChannelEvent {
        generation: session.channel().generation(),
        invoice_id: InvoiceId::new("inv-2"),
        kind: ChannelEventKind::Step(
            JourneyStep::from_wire(
                json!({ "agent": "StatusManager", "type": "status_change", "to": "REJECTED" }),
                2,
            )
            .expect("valid step"),
        ),
    };
    assert!(session.handle_channel_event(decided));

    assert!(session.tasks().get(&TaskId::new("task-2")).is_none());
    assert!(session.tasks().get(&TaskId::new("task-1")).is_some());
    assert_eq!(
        session.snapshot().expect("snapshot").current_status,
        "REJECTED"
    );
}

#[tokio::test]
async fn rehydrate_after_reconnect_closes_tasks_decided_meanwhile() {
    let client = spawn_backend().await;
    let (mut session, mut events) = JourneySession::new(client, options());
    session.open(InvoiceId::new("inv-1")).expect("open");
    pump_until(&mut session, &mut events, hydrated).await;
    assert_eq!(session.refresh_tasks().await.expect("tasks"), 2);

    let rehydrate = ChannelEvent {
        generation: session.channel().generation(),
        invoice_id: InvoiceId::new("inv-1"),
        kind: ChannelEventKind::Hydrate(vec![
            JourneyStep::from_wire(
                json!({ "agent": "StatusManager", "type": "status_change", "to": "PENDING_APPROVAL" }),
                0,
            )
            .expect("valid step"),
            JourneyStep::from_wire(
                json!({ "agent": "HITL", "type": "status_change", "to": "APPROVED", "task_id": "task-1" }),
                1,
            )
            .expect("valid step"),
        ]),
    };
    assert!(session.handle_channel_event(rehydrate));

    assert!(session.tasks().get(&TaskId::new("task-1")).is_none());
    assert!(session.tasks().get(&TaskId::new("task-2")).is_some());
    assert_eq!(
        session.snapshot().expect("snapshot").current_status,
        "APPROVED"
    );
}

#[tokio::test]
async fn switching_invoices_discards_the_previous_generation() {
    let client = spawn_backend().await;
    let (mut session, mut events) = JourneySession::new(client, options());

    let first = session.open(InvoiceId::new("inv-1")).expect("open");
    assert!(matches!(
        session.open(InvoiceId::new("inv-2")),
        Err(ClientError::ChannelAlreadyOpen(_))
    ));

    let second = session
        .switch_invoice(InvoiceId::new("inv-2"))
        .expect("switch");
    assert!(second > first);
    assert_eq!(session.invoice_id(), Some(&InvoiceId::new("inv-2")));

    let stale = ChannelEvent {
        generation: first,
        invoice_id: InvoiceId::new("inv-1"),
        kind: ChannelEventKind::Deleted,
    };
    assert!(!session.handle_channel_event(stale));

    pump_until(&mut session, &mut events, hydrated).await;
    let snapshot = session.snapshot().expect("snapshot");
    assert_eq!(snapshot.invoice_id, InvoiceId::new("inv-2"));
    assert!(!snapshot.frozen);
}

#[tokio::test]
async fn unknown_tasks_cannot_be_acted_on() {
    let client = spawn_backend().await;
    let (mut session, _events) = JourneySession::new(client, options());

    let result = session.start_action(&TaskId::new("nope"), ActionType::Reject, None);

    assert!(matches!(result, Err(ClientError::UnknownTask(_))));
}

#[tokio::test]
async fn reconnect_leaves_a_connecting_or_live_channel_alone() {
    let client = spawn_backend().await;
    let (mut session, mut events) = JourneySession::new(client, options());
    assert_eq!(session.reconnect().expect("no journey"), None);

    let first = session.open(InvoiceId::new("inv-1")).expect("open");
    assert_eq!(session.refresh().await.expect("refresh"), 2);
    assert_eq!(session.channel().generation(), first);

    pump_until(&mut session, &mut events, hydrated).await;
    assert_eq!(session.channel().link_state(), Some(LinkState::Live));
    assert_eq!(session.reconnect().expect("live"), None);

    let reported_down = ChannelEvent {
        generation: first,
        invoice_id: InvoiceId::new("inv-1"),
        kind: ChannelEventKind::ConnectionChange(false),
    };
    assert!(session.handle_channel_event(reported_down));
    assert_eq!(session.reconnect().expect("stream still live"), None);
    assert_eq!(session.channel().generation(), first);

    let deleted = ChannelEvent {
        generation: first,
        invoice_id: InvoiceId::new("inv-1"),
        kind: ChannelEventKind::Deleted,
    };
    assert!(session.handle_channel_event(deleted));
    assert_eq!(session.reconnect().expect("frozen"), None);
    assert!(!session.close());
    assert!(session.snapshot().is_none());
}

#[tokio::test]
async fn reconnect_skips_the_backoff_of_a_failed_stream() {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let app = Router::new().route(
        "/invoices/:invoice_id/stream",
        get(|| async { StatusCode::SERVICE_UNAVAILABLE }),
    );
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    let client = DashboardClient::new(ApiBase::parse(&format!("http://{addr}")).expect("base"));
    let slow = SessionOptions {
        reconnect: ReconnectPolicy {
            initial: Duration::from_secs(30),
            max: Duration::from_secs(30),
        },
        ..options()
    };
    let (mut session, _events) = JourneySession::new(client, slow);

    let first = session.open(InvoiceId::new("inv-1")).expect("open");
    timeout(Duration::from_secs(5), async {
        while session.channel().link_state() != Some(LinkState::Waiting) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("stream failed and is backing off");

    let reopened = session
        .reconnect()
        .expect("reopen")
        .expect("new generation");
    assert!(reopened > first);
    assert_eq!(session.channel().link_state(), Some(LinkState::Connecting));
    assert_eq!(session.invoice_id(), Some(&InvoiceId::new("inv-1")));
}
