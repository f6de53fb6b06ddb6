use std::{
    convert::Infallible,
    time::{Duration, Instant},
};

use axum::{
    body::Body,
    extract::Path,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use client_core::{ApiBase, ReconnectPolicy};
use crossbeam_channel::bounded;
use serde_json::json;
use shared::domain::{ActionType, InvoiceId, TaskId};
use tokio::net::TcpListener;
use tokio_stream::StreamExt;

use super::*;
use crate::controller::events::UiErrorCategory;

async fn serve_stream() -> Response {
    let init = json!({
        "workflow": {
            "steps": [
                { "agent": "StatusManager", "type": "status_change", "to": "RECEIVED" },
                { "agent": "StatusManager", "type": "status_change", "from": "RECEIVED", "to": "PENDING_APPROVAL" }
            ]
        }
    });
    let frames: Vec<Result<String, Infallible>> =
        vec![Ok(format!("event: init\ndata: {init}\n\n"))];
    let body = Body::from_stream(tokio_stream::iter(frames).chain(tokio_stream::pending()));
    ([(header::CONTENT_TYPE, "text/event-stream")], body).into_response()
}

async fn serve_action(Path(task_id): Path<String>) -> Response {
    if task_id == "task-2" {
        return (
            StatusCode::CONFLICT,
            Json(json!({ "detail": "task already decided" })),
        )
            .into_response();
    }
    Json(json!({ "task_id": task_id, "invoice_status": "READY_FOR_POSTING" })).into_response()
}

async fn spawn_backend() -> DashboardClient {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let app = Router::new()
        .route("/invoices/:invoice_id/stream", get(serve_stream))
        .route(
            "/invoices/:invoice_id/explain",
            get(|| async { Json(json!({ "ok": true, "explain": { "summary": "matched to PO" } })) }),
        )
        .route(
            "/tasks",
            get(|| async {
                Json(json!([
                    { "_id": "task-1", "invoice_id": "inv-1", "type": "approval", "status": "pending" },
                    { "_id": "task-2", "invoice_id": "inv-1", "type": "approval", "status": "pending" }
                ]))
            }),
        )
        .route("/tasks/:task_id/action", post(serve_action))
        .route(
            "/feedback",
            post(|| async { Json(json!({ "ok": true, "inserted_id": "fb-1" })) }),
        );
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    DashboardClient::new(ApiBase::parse(&format!("http://{addr}")).expect("api base"))
}

struct Harness {
    commands: mpsc::Sender<BackendCommand>,
    ui_rx: Receiver<UiEvent>,
    worker: tokio::task::JoinHandle<()>,
}

async fn start_worker() -> Harness {
    let client = spawn_backend().await;
    let options = SessionOptions {
        user: "ui:alice".to_string(),
        reconnect: ReconnectPolicy {
            initial: Duration::from_millis(10),
            max: Duration::from_millis(50),
        },
        ..SessionOptions::default()
    };
    let (session, events) = JourneySession::new(client, options);
    let (ui_tx, ui_rx) = bounded(2048);
    let (commands, commands_rx) = mpsc::channel(16);
    let worker = tokio::spawn(BackendWorker::new(session, ui_tx).run(events, commands_rx));
    Harness {
        commands,
        ui_rx,
        worker,
    }
}

impl Harness {
    async fn send(&self, cmd: BackendCommand) {
        self.commands.send(cmd).await.expect("worker running");
    }

    async fn wait_for(&self, mut matches: impl FnMut(&UiEvent) -> bool) -> UiEvent {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            while let Ok(event) = self.ui_rx.try_recv() {
                if matches(&event) {
                    return event;
                }
            }
            assert!(Instant::now() < deadline, "timed out waiting for ui event");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn open_hydrated(&self) {
        self.send(BackendCommand::Open {
            invoice_id: InvoiceId::new("inv-1"),
        })
        .await;
        self.wait_for(|event| {
            matches!(event, UiEvent::Journey(snapshot) if snapshot.connected && snapshot.steps.len() == 2)
        })
        .await;
        self.send(BackendCommand::Refresh).await;
        self.wait_for(|event| matches!(event, UiEvent::Tasks { tasks, .. } if tasks.len() == 2))
            .await;
    }
}

#[tokio::test]
async fn approve_publishes_overlay_then_authoritative_status() {
    let harness = start_worker().await;
    harness.open_hydrated().await;

    harness
        .send(BackendCommand::Act {
            task_id: TaskId::new("task-1"),
            action: ActionType::Approve,
            notes: Some("matches PO".to_string()),
        })
        .await;

    let finished = harness
        .wait_for(|event| matches!(event, UiEvent::ActionFinished { .. }))
        .await;
    let UiEvent::ActionFinished { task_id, status } = finished else {
        unreachable!("filtered above");
    };
    assert_eq!(task_id, TaskId::new("task-1"));
    assert_eq!(status.as_deref(), Some("READY_FOR_POSTING"));

    let journey = harness
        .wait_for(|event| matches!(event, UiEvent::Journey(_)))
        .await;
    let UiEvent::Journey(snapshot) = journey else {
        unreachable!("filtered above");
    };
    assert_eq!(snapshot.current_status, "READY_FOR_POSTING");

    let tasks = harness
        .wait_for(|event| matches!(event, UiEvent::Tasks { .. }))
        .await;
    let UiEvent::Tasks { tasks, busy } = tasks else {
        unreachable!("filtered above");
    };
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].id, TaskId::new("task-2"));
    assert!(busy.is_empty());
}

#[tokio::test]
async fn rejected_action_reports_error_and_reverts_status() {
    let harness = start_worker().await;
    harness.open_hydrated().await;

    harness
        .send(BackendCommand::Act {
            task_id: TaskId::new("task-2"),
            action: ActionType::Reject,
            notes: None,
        })
        .await;

    let busy = harness
        .wait_for(|event| matches!(event, UiEvent::Tasks { busy, .. } if !busy.is_empty()))
        .await;
    assert!(matches!(busy, UiEvent::Tasks { busy, .. } if busy == vec![TaskId::new("task-2")]));

    let error = harness
        .wait_for(|event| matches!(event, UiEvent::Error(_)))
        .await;
    let UiEvent::Error(error) = error else {
        unreachable!("filtered above");
    };
    assert_eq!(error.category(), UiErrorCategory::Validation);
    assert_eq!(error.context(), UiErrorContext::Action);
    assert!(error.message().contains("task already decided"));

    let journey = harness
        .wait_for(|event| matches!(event, UiEvent::Journey(_)))
        .await;
    let UiEvent::Journey(snapshot) = journey else {
        unreachable!("filtered above");
    };
    assert_eq!(snapshot.current_status, "PENDING_APPROVAL");
    assert!(snapshot.overlay.is_none());
}

#[tokio::test]
async fn feedback_and_explanations_need_an_open_invoice() {
    let harness = start_worker().await;

    harness
        .send(BackendCommand::SuggestEdit {
            step_id: None,
            notes: "vat rate".to_string(),
        })
        .await;
    let error = harness
        .wait_for(|event| matches!(event, UiEvent::Error(_)))
        .await;
    assert!(matches!(error, UiEvent::Error(err) if err.context() == UiErrorContext::Feedback));

    harness.open_hydrated().await;
    harness
        .send(BackendCommand::SuggestEdit {
            step_id: Some("s-1".to_string()),
            notes: "vat rate".to_string(),
        })
        .await;
    let recorded = harness
        .wait_for(|event| matches!(event, UiEvent::FeedbackRecorded { .. }))
        .await;
    assert!(matches!(
        recorded,
        UiEvent::FeedbackRecorded { inserted_id: Some(id) } if id == "fb-1"
    ));

    harness
        .send(BackendCommand::Explain { regenerate: false })
        .await;
    let explanation = harness
        .wait_for(|event| matches!(event, UiEvent::Explanation(_)))
        .await;
    let UiEvent::Explanation(response) = explanation else {
        unreachable!("filtered above");
    };
    assert_eq!(
        response.explain,
        Some(json!({ "summary": "matched to PO" }))
    );
}

#[tokio::test]
async fn shutdown_stops_the_worker() {
    let harness = start_worker().await;
    harness.open_hydrated().await;

    harness.send(BackendCommand::Close).await;
    harness
        .wait_for(|event| matches!(event, UiEvent::JourneyClosed))
        .await;
    harness.send(BackendCommand::Shutdown).await;

    tokio::time::timeout(Duration::from_secs(5), harness.worker)
        .await
        .expect("worker stopped")
        .expect("worker did not panic");
}
