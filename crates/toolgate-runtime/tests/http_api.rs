//! End-to-end tests over the HTTP gateway using in-process requests.

use axum::Router;
use axum::body::Body;
use axum::extract::connect_info::ConnectInfo;
use axum::http::{Request, StatusCode, header};
use serde_json::{Value, json};
use std::net::SocketAddr;
use toolgate_broker::broker::{BrokerConfig, BrokerEvent};
use tower::ServiceExt;

use toolgate_core::types::NotificationStatus;
use toolgate_runtime::server::{AppState, ServerConfig, build_router, run_sweep};

const LOOPBACK: &str = "127.0.0.1:50000";
const REMOTE: &str = "192.168.1.50:50000";

fn local_config() -> ServerConfig {
    ServerConfig {
        remote_enabled: false,
        token: None,
        broker: BrokerConfig::default(),
        rate_limit: 60,
        rate_window_ms: 60_000,
    }
}

fn remote_config(token: &str, rate_limit: u32) -> ServerConfig {
    ServerConfig {
        remote_enabled: true,
        token: Some(token.to_owned()),
        broker: BrokerConfig::default(),
        rate_limit,
        rate_window_ms: 60_000,
    }
}

fn test_app(config: ServerConfig) -> Router {
    build_router(AppState::new(config))
}

async fn send(
    app: &Router,
    method: &str,
    path: &str,
    body: Option<Value>,
    peer: &str,
    bearer: Option<&str>,
) -> (StatusCode, Value) {
    let addr: SocketAddr = peer.parse().unwrap();
    let mut builder = Request::builder().method(method).uri(path);
    if let Some(token) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let req = match body {
        Some(value) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(value.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let mut req = req;
    req.extensions_mut().insert(ConnectInfo(addr));

    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn create_body(id: &str, title: &str, body: &str) -> Value {
    json!({
        "correlation_id": id,
        "title": title,
        "body": body,
        "type": "confirmation",
        "source": "claude-watch",
        "session_id": "sess-1",
        "tool": title.rsplit(" - ").next(),
    })
}

// ── 1. health and root respond without auth ──
#[tokio::test]
async fn health_and_root_are_open() {
    let app = test_app(local_config());

    let (status, body) = send(&app, "GET", "/health", None, LOOPBACK, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = send(&app, "GET", "/", None, LOOPBACK, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["service"], "toolgate");
}

// ── 2. create, list, accept lifecycle ──
#[tokio::test]
async fn create_list_accept_lifecycle() {
    let app = test_app(local_config());

    let (status, body) = send(
        &app,
        "POST",
        "/api/notification",
        Some(create_body("toolu_1", "Claude Code - Write", "Create: /tmp/a.rs")),
        LOOPBACK,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["duplicate"], false);
    assert_eq!(body["message"], "created");

    let (status, body) = send(&app, "GET", "/api/notifications", None, LOOPBACK, None).await;
    assert_eq!(status, StatusCode::OK);
    let list = body["notifications"].as_array().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["correlation_id"], "toolu_1");
    assert_eq!(list[0]["status"], "delivered");

    let (status, body) = send(
        &app,
        "POST",
        "/api/intent",
        Some(json!({ "correlation_id": "toolu_1", "intent": "accept" })),
        LOOPBACK,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["intent"], "accept");
    assert_eq!(body["status"], "completed");

    // Second resolve loses the race; final status is reported.
    let (status, body) = send(
        &app,
        "POST",
        "/api/intent",
        Some(json!({ "correlation_id": "toolu_1", "intent": "reject" })),
        LOOPBACK,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    assert_eq!(body["status"], "completed");

    // Terminal notifications leave the list.
    let (_, body) = send(&app, "GET", "/api/notifications", None, LOOPBACK, None).await;
    assert!(body["notifications"].as_array().unwrap().is_empty());
}

// ── 3. dismiss completes a notification; unknown ids are 404 ──
#[tokio::test]
async fn dismiss_and_unknown() {
    let app = test_app(local_config());

    send(
        &app,
        "POST",
        "/api/notification",
        Some(create_body("toolu_2", "Claude Code - Bash", "$ rm -rf build")),
        LOOPBACK,
        None,
    )
    .await;

    let (status, body) = send(
        &app,
        "DELETE",
        "/api/notification/toolu_2",
        None,
        LOOPBACK,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["status"], "completed");

    // Dismiss after terminal is idempotent.
    let (status, body) = send(
        &app,
        "DELETE",
        "/api/notification/toolu_2?is_error=true",
        None,
        LOOPBACK,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let (status, _) = send(
        &app,
        "DELETE",
        "/api/notification/toolu_missing",
        None,
        LOOPBACK,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ── 4. errored dismiss lands on failed ──
#[tokio::test]
async fn errored_dismiss_fails_notification() {
    let app = test_app(local_config());

    send(
        &app,
        "POST",
        "/api/notification",
        Some(create_body("toolu_3", "Claude Code - Bash", "$ make")),
        LOOPBACK,
        None,
    )
    .await;

    let (status, body) = send(
        &app,
        "DELETE",
        "/api/notification/toolu_3?is_error=true",
        None,
        LOOPBACK,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "failed");
}

// ── 5. identical content inside the dedup window is coalesced ──
#[tokio::test]
async fn duplicate_content_is_coalesced() {
    let app = test_app(local_config());

    send(
        &app,
        "POST",
        "/api/notification",
        Some(create_body("toolu_4a", "Claude Code - Write", "Create: /tmp/x.rs")),
        LOOPBACK,
        None,
    )
    .await;

    let (status, body) = send(
        &app,
        "POST",
        "/api/notification",
        Some(create_body("toolu_4b", "Claude Code - Write", "Create: /tmp/x.rs")),
        LOOPBACK,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["duplicate"], true);
    assert_eq!(body["message"], "duplicate");
    // The live id is the original's.
    assert_eq!(body["correlation_id"], "toolu_4a");

    let (_, body) = send(&app, "GET", "/api/notifications", None, LOOPBACK, None).await;
    assert_eq!(body["notifications"].as_array().unwrap().len(), 1);
}

// ── 6. same-session distinct requests join a burst group ──
#[tokio::test]
async fn same_session_requests_join_burst() {
    let app = test_app(local_config());

    send(
        &app,
        "POST",
        "/api/notification",
        Some(create_body("toolu_5a", "Claude Code - Write", "Create: /tmp/a.rs")),
        LOOPBACK,
        None,
    )
    .await;
    send(
        &app,
        "POST",
        "/api/notification",
        Some(create_body("toolu_5b", "Claude Code - Edit", "Edit: /tmp/b.rs")),
        LOOPBACK,
        None,
    )
    .await;

    let (_, body) = send(&app, "GET", "/api/notifications", None, LOOPBACK, None).await;
    let list = body["notifications"].as_array().unwrap();
    assert_eq!(list.len(), 2);
    assert!(list[0]["burst_group"].is_null());
    assert_eq!(list[1]["burst_group"], "toolu_5a");
}

// ── 7. accept and reject shortcuts force the intent ──
#[tokio::test]
async fn accept_and_reject_shortcuts() {
    let app = test_app(local_config());

    send(
        &app,
        "POST",
        "/api/notification",
        Some(create_body("toolu_6", "Claude Code - Write", "Create: /tmp/c.rs")),
        LOOPBACK,
        None,
    )
    .await;
    let (status, body) = send(
        &app,
        "POST",
        "/api/accept",
        Some(json!({ "correlation_id": "toolu_6" })),
        LOOPBACK,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["intent"], "accept");

    send(
        &app,
        "POST",
        "/api/notification",
        Some(create_body("toolu_7", "Claude Code - Bash", "$ npm install")),
        LOOPBACK,
        None,
    )
    .await;
    let (status, body) = send(
        &app,
        "POST",
        "/api/reject",
        Some(json!({ "correlation_id": "toolu_7", "intent": "ignored" })),
        LOOPBACK,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["intent"], "reject");
}

// ── 8. remote peers need remote mode and the right token ──
#[tokio::test]
async fn remote_auth_gating() {
    let app = test_app(local_config());
    let (status, _) = send(
        &app,
        "POST",
        "/api/notification",
        Some(create_body("toolu_8", "t", "b")),
        REMOTE,
        Some("whatever"),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let app = test_app(remote_config("secret", 60));
    let (status, _) = send(
        &app,
        "POST",
        "/api/notification",
        Some(create_body("toolu_8", "t", "b")),
        REMOTE,
        Some("wrong"),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(
        &app,
        "POST",
        "/api/notification",
        Some(create_body("toolu_8", "t", "b")),
        REMOTE,
        Some("secret"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    // Loopback never needs the token.
    let (status, _) = send(
        &app,
        "POST",
        "/api/notification",
        Some(create_body("toolu_9", "t2", "b2")),
        LOOPBACK,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

// ── 9. remote peers are rate limited, loopback is exempt ──
#[tokio::test]
async fn remote_rate_limiting() {
    let app = test_app(remote_config("secret", 2));

    for _ in 0..2 {
        let (status, _) = send(&app, "GET", "/api/status", None, REMOTE, None).await;
        assert_eq!(status, StatusCode::OK);
    }
    let (status, body) = send(&app, "GET", "/api/status", None, REMOTE, None).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert!(body["retry_after_ms"].as_u64().is_some());

    // Loopback keeps flowing past the remote client's limit.
    for _ in 0..5 {
        let (status, _) = send(&app, "GET", "/api/status", None, LOOPBACK, None).await;
        assert_eq!(status, StatusCode::OK);
    }
}

// ── 10. status reflects broker and session counters ──
#[tokio::test]
async fn status_counts() {
    let app = test_app(local_config());

    send(
        &app,
        "POST",
        "/api/notification",
        Some(create_body("toolu_10", "Claude Code - Write", "Create: /tmp/s.rs")),
        LOOPBACK,
        None,
    )
    .await;

    let (status, body) = send(&app, "GET", "/api/status", None, LOOPBACK, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["notifications_count"], 1);
    assert_eq!(body["pending_count"], 1);

    send(
        &app,
        "POST",
        "/api/intent",
        Some(json!({ "correlation_id": "toolu_10", "intent": "accept" })),
        LOOPBACK,
        None,
    )
    .await;

    let (_, body) = send(&app, "GET", "/api/status", None, LOOPBACK, None).await;
    assert_eq!(body["notifications_count"], 0);
    assert_eq!(body["pending_count"], 0);
}

// ── 11. deep health exposes internal table sizes ──
#[tokio::test]
async fn deep_health_counters() {
    let app = test_app(local_config());

    send(
        &app,
        "POST",
        "/api/notification",
        Some(create_body("toolu_11", "Claude Code - Edit", "Edit: /tmp/d.rs")),
        LOOPBACK,
        None,
    )
    .await;

    let (status, body) = send(&app, "GET", "/health/deep", None, LOOPBACK, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["live_notifications"], 1);
    assert_eq!(body["dedup_entries"], 1);
    assert_eq!(body["sessions"], 1);
}

// ── 12. metrics start empty and require auth remotely ──
#[tokio::test]
async fn metrics_empty_and_gated() {
    let app = test_app(local_config());

    let (status, body) = send(&app, "GET", "/api/metrics", None, LOOPBACK, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["request_count"], 0);
    assert!(body["median_ms"].is_null());
    assert!(body["p95_ms"].is_null());

    let (status, _) = send(&app, "GET", "/api/metrics", None, REMOTE, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

// ── 13. session end is acknowledged ──
#[tokio::test]
async fn session_end_acknowledged() {
    let state = AppState::new(local_config());
    let app = build_router(state.clone());

    send(
        &app,
        "POST",
        "/api/notification",
        Some(create_body("toolu_12", "Claude Code - Write", "Create: /tmp/e.rs")),
        LOOPBACK,
        None,
    )
    .await;

    // The session records the tool name from the wire, not the title.
    {
        let shared = state.shared.lock().await;
        let session = shared.sessions.get("sess-1").unwrap();
        assert_eq!(session.pending_invocations["toolu_12"].name, "Write");
    }

    let (status, body) = send(
        &app,
        "POST",
        "/api/session/end",
        Some(json!({ "session_id": "sess-1" })),
        LOOPBACK,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    // Ended sessions no longer contribute pending counts.
    let (_, body) = send(&app, "GET", "/api/status", None, LOOPBACK, None).await;
    assert_eq!(body["pending_count"], 0);
}

// ── 14. broker events flow through the broadcast channel ──
#[tokio::test]
async fn broker_events_reach_subscribers() {
    let state = AppState::new(local_config());
    let mut events = state.events.subscribe();
    let app = build_router(state.clone());

    // An accepted create emits Created, then StatusChanged(delivered).
    send(
        &app,
        "POST",
        "/api/notification",
        Some(create_body("toolu_14", "Claude Code - Write", "Create: /tmp/ev.rs")),
        LOOPBACK,
        None,
    )
    .await;

    match events.recv().await.unwrap() {
        BrokerEvent::Created { state } => {
            assert_eq!(state.correlation_id, "toolu_14");
            assert!(state.burst_group.is_none());
        }
        other => panic!("expected created event, got {other:?}"),
    }
    assert_eq!(
        events.recv().await.unwrap(),
        BrokerEvent::StatusChanged {
            correlation_id: "toolu_14".to_owned(),
            status: NotificationStatus::Delivered,
        }
    );

    // A duplicate create stays invisible to subscribers.
    send(
        &app,
        "POST",
        "/api/notification",
        Some(create_body("toolu_14b", "Claude Code - Write", "Create: /tmp/ev.rs")),
        LOOPBACK,
        None,
    )
    .await;
    assert!(matches!(
        events.try_recv(),
        Err(tokio::sync::broadcast::error::TryRecvError::Empty)
    ));

    // A burst member's created event carries its group.
    send(
        &app,
        "POST",
        "/api/notification",
        Some(create_body("toolu_15", "Claude Code - Edit", "Edit: /tmp/ev2.rs")),
        LOOPBACK,
        None,
    )
    .await;
    match events.recv().await.unwrap() {
        BrokerEvent::Created { state } => {
            assert_eq!(state.correlation_id, "toolu_15");
            assert_eq!(state.burst_group.as_deref(), Some("toolu_14"));
        }
        other => panic!("expected created event, got {other:?}"),
    }
    events.recv().await.unwrap(); // toolu_15 delivered

    // The sweep reports TTL expiry as a status change.
    send(
        &app,
        "POST",
        "/api/notification",
        Some(json!({
            "correlation_id": "toolu_16",
            "title": "Claude Code - Bash",
            "body": "$ sleep 1",
            "type": "confirmation",
            "source": "claude-watch",
            "session_id": "sess-2",
            "timeout_seconds": 0,
        })),
        LOOPBACK,
        None,
    )
    .await;
    events.recv().await.unwrap(); // toolu_16 created
    events.recv().await.unwrap(); // toolu_16 delivered

    let sweeper = tokio::spawn(run_sweep(state.clone(), 1));
    let expired = tokio::time::timeout(std::time::Duration::from_secs(5), async {
        loop {
            if let BrokerEvent::StatusChanged {
                correlation_id,
                status: NotificationStatus::Expired,
            } = events.recv().await.unwrap()
            {
                break correlation_id;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(expired, "toolu_16");
    sweeper.abort();
}
