//! HTTP gateway over the notification broker.
//!
//! Loopback requests bypass auth and rate limiting; other peers need the
//! bearer token (when remote access is enabled) and are rate limited per
//! client address. All broker state sits behind one mutex so create,
//! resolve, and dismiss are serialized.

use axum::{
    Json, Router,
    extract::{ConnectInfo, Extension, Path, Query, Request},
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use chrono::{TimeDelta, Utc};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, broadcast};
use toolgate_broker::broker::{
    BrokerConfig, BrokerEvent, DismissOutcome, NotificationBroker, ResolveOutcome,
};
use toolgate_broker::sessions::SessionRegistry;
use toolgate_core::wire::{
    CreateNotificationRequest, CreateNotificationResponse, DeepHealthResponse, IntentRequest,
    IntentResponse, MetricsResponse, NotificationListResponse, StatusResponse,
};
use toolgate_gateway::auth::{AuthGuard, is_loopback};
use toolgate_gateway::latency_window::LatencyWindow;
use toolgate_gateway::rate_limit::{RateDecision, RateLimiter};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::cli::ServeOpts;

/// Grace period before ended sessions are dropped by the sweep.
const SESSION_CLEANUP_GRACE: TimeDelta = TimeDelta::minutes(5);

// ─── State ──────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub remote_enabled: bool,
    pub token: Option<String>,
    pub broker: BrokerConfig,
    pub rate_limit: u32,
    pub rate_window_ms: u64,
}

impl ServerConfig {
    fn from_opts(opts: &ServeOpts) -> Self {
        Self {
            remote_enabled: opts.remote,
            token: opts.token.clone(),
            broker: BrokerConfig {
                dedup_window: TimeDelta::seconds(opts.dedup_window_secs as i64),
                burst_window: TimeDelta::seconds(opts.burst_window_secs as i64),
                max_entries: opts.max_entries,
            },
            rate_limit: opts.rate_limit,
            rate_window_ms: opts.rate_window_secs * 1000,
        }
    }
}

/// Mutable broker-process state behind the single mutex.
pub struct SharedState {
    pub broker: NotificationBroker,
    pub sessions: SessionRegistry,
    pub limiter: RateLimiter,
    pub latency: LatencyWindow,
}

#[derive(Clone)]
pub struct AppState {
    pub shared: Arc<Mutex<SharedState>>,
    pub auth: Arc<AuthGuard>,
    /// Queued hand-off to the display layer; the broker's maps are never
    /// exposed directly.
    pub events: broadcast::Sender<BrokerEvent>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            shared: Arc::new(Mutex::new(SharedState {
                broker: NotificationBroker::new(config.broker.clone()),
                sessions: SessionRegistry::new(),
                limiter: RateLimiter::new(config.rate_limit, config.rate_window_ms),
                latency: LatencyWindow::new(),
            })),
            auth: Arc::new(AuthGuard::new(config.token.clone(), config.remote_enabled)),
            events,
            started_at: Instant::now(),
        }
    }

    fn authorize(&self, peer: SocketAddr, headers: &HeaderMap) -> Result<(), ApiError> {
        let bearer = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
        self.auth
            .authorize(peer, bearer)
            .map_err(|e| ApiError::Unauthorized(e.to_string()))
    }

    /// Rate-limit admission for non-loopback peers. Loopback is exempt so
    /// a busy local watcher is never throttled.
    async fn admit(&self, peer: SocketAddr) -> Result<(), ApiError> {
        if is_loopback(peer.ip()) {
            return Ok(());
        }
        let decision = {
            let mut shared = self.shared.lock().await;
            shared.limiter.check(peer.ip(), now_unix_ms())
        };
        match decision {
            RateDecision::Allowed { .. } => Ok(()),
            RateDecision::Limited { retry_after_ms } => {
                Err(ApiError::RateLimited { retry_after_ms })
            }
        }
    }

    fn broadcast(&self, event: BrokerEvent) {
        // No subscriber attached is a normal condition.
        let _ = self.events.send(event);
    }
}

fn now_unix_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ─── Errors ─────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    Unauthorized(String),
    RateLimited { retry_after_ms: u64 },
    NotFound,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unauthorized(reason) => (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "unauthorized", "reason": reason })),
            )
                .into_response(),
            ApiError::RateLimited { retry_after_ms } => (
                StatusCode::TOO_MANY_REQUESTS,
                Json(json!({ "error": "rate limited", "retry_after_ms": retry_after_ms })),
            )
                .into_response(),
            ApiError::NotFound => (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": "not found" })),
            )
                .into_response(),
        }
    }
}

// ─── Router ─────────────────────────────────────────────────────────

pub fn build_router(app: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/health/deep", get(deep_health))
        .route("/api/status", get(api_status))
        .route("/api/notifications", get(list_notifications))
        .route("/api/notification", post(create_notification))
        .route("/api/notification/:id", delete(dismiss_notification))
        .route("/api/intent", post(submit_intent))
        .route("/api/accept", post(submit_accept))
        .route("/api/reject", post(submit_reject))
        .route("/api/session/end", post(end_session))
        .route("/api/metrics", get(metrics))
        .layer(middleware::from_fn(track_latency))
        .layer(Extension(app))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Record request latency for non-loopback callers of `/api` routes.
async fn track_latency(
    Extension(app): Extension<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    req: Request,
    next: Next,
) -> Response {
    let is_api = req.uri().path().starts_with("/api");
    let start = Instant::now();
    let resp = next.run(req).await;
    if is_api && !is_loopback(peer.ip()) {
        let elapsed_ms = start.elapsed().as_millis() as u64;
        app.shared.lock().await.latency.record(elapsed_ms, now_unix_ms());
    }
    resp
}

// ─── Handlers ───────────────────────────────────────────────────────

async fn root() -> impl IntoResponse {
    Json(json!({
        "service": "toolgate",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": [
            "POST /api/notification",
            "DELETE /api/notification/{id}",
            "POST /api/intent",
            "POST /api/accept",
            "POST /api/reject",
            "GET /api/status",
            "GET /api/notifications",
            "GET /api/metrics",
            "GET /health",
            "GET /health/deep",
        ],
    }))
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn deep_health(
    Extension(app): Extension<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Result<Json<DeepHealthResponse>, ApiError> {
    app.admit(peer).await?;
    app.authorize(peer, &headers)?;

    let shared = app.shared.lock().await;
    Ok(Json(DeepHealthResponse {
        status: "ok".to_owned(),
        live_notifications: shared.broker.live_count(),
        dedup_entries: shared.broker.dedup_count(),
        burst_groups: shared.broker.burst_count(),
        sessions: shared.sessions.len(),
        rate_limited_clients: shared.limiter.client_count(),
    }))
}

async fn api_status(
    Extension(app): Extension<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> Result<Json<StatusResponse>, ApiError> {
    app.admit(peer).await?;
    let shared = app.shared.lock().await;
    Ok(Json(StatusResponse {
        status: "ok".to_owned(),
        notifications_count: shared.broker.active_count(),
        pending_count: shared.sessions.pending_count(),
        uptime_seconds: app.started_at.elapsed().as_secs(),
    }))
}

async fn list_notifications(
    Extension(app): Extension<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> Result<Json<NotificationListResponse>, ApiError> {
    app.admit(peer).await?;
    let shared = app.shared.lock().await;
    Ok(Json(NotificationListResponse {
        notifications: shared.broker.list(),
    }))
}

async fn create_notification(
    Extension(app): Extension<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(req): Json<CreateNotificationRequest>,
) -> Result<Json<CreateNotificationResponse>, ApiError> {
    app.admit(peer).await?;
    app.authorize(peer, &headers)?;

    let now = Utc::now();
    let outcome = {
        let mut shared = app.shared.lock().await;
        let outcome = shared.broker.create(&req, now);
        if let (false, Some(session_id)) = (outcome.duplicate, req.session_id.as_deref()) {
            let tool = req.tool.as_deref().unwrap_or(&req.title);
            shared
                .sessions
                .record_invocation(session_id, &req.correlation_id, tool, now);
        }
        if outcome.state.is_some() {
            shared.broker.mark_delivered(&req.correlation_id);
        }
        outcome
    };

    // Duplicates stay invisible to the display layer.
    if let Some(state) = outcome.state {
        app.broadcast(BrokerEvent::Created { state });
        app.broadcast(BrokerEvent::StatusChanged {
            correlation_id: outcome.correlation_id.clone(),
            status: toolgate_core::types::NotificationStatus::Delivered,
        });
    }

    let duplicate = outcome.duplicate;
    Ok(Json(CreateNotificationResponse {
        success: true,
        correlation_id: outcome.correlation_id,
        message: if duplicate { "duplicate" } else { "created" }.to_owned(),
        duplicate,
    }))
}

#[derive(Debug, Deserialize)]
struct DismissQuery {
    #[serde(default)]
    is_error: bool,
}

async fn dismiss_notification(
    Extension(app): Extension<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(query): Query<DismissQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    app.admit(peer).await?;
    app.authorize(peer, &headers)?;

    let now = Utc::now();
    let outcome = {
        let mut shared = app.shared.lock().await;
        let outcome = shared.broker.dismiss(&id, query.is_error, now);
        shared.sessions.record_completion(&id);
        outcome
    };

    match outcome {
        DismissOutcome::Dismissed { status } => {
            app.broadcast(BrokerEvent::StatusChanged {
                correlation_id: id.clone(),
                status,
            });
            Ok(Json(json!({ "success": true, "correlation_id": id, "status": status })))
        }
        DismissOutcome::AlreadyTerminal { status } => {
            Ok(Json(json!({ "success": true, "correlation_id": id, "status": status })))
        }
        DismissOutcome::Unknown => Err(ApiError::NotFound),
    }
}

async fn submit_intent(
    Extension(app): Extension<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(req): Json<IntentRequest>,
) -> Result<Json<IntentResponse>, ApiError> {
    resolve_intent(&app, peer, &headers, req, None).await
}

async fn submit_accept(
    Extension(app): Extension<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(req): Json<IntentRequest>,
) -> Result<Json<IntentResponse>, ApiError> {
    resolve_intent(&app, peer, &headers, req, Some("accept")).await
}

async fn submit_reject(
    Extension(app): Extension<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(req): Json<IntentRequest>,
) -> Result<Json<IntentResponse>, ApiError> {
    resolve_intent(&app, peer, &headers, req, Some("reject")).await
}

async fn resolve_intent(
    app: &AppState,
    peer: SocketAddr,
    headers: &HeaderMap,
    req: IntentRequest,
    intent_override: Option<&str>,
) -> Result<Json<IntentResponse>, ApiError> {
    app.admit(peer).await?;
    app.authorize(peer, headers)?;

    let intent = intent_override.unwrap_or(req.intent.as_str()).to_owned();
    let now = Utc::now();
    let outcome = {
        let mut shared = app.shared.lock().await;
        let outcome = shared.broker.resolve(&req.correlation_id, &intent, now);
        if matches!(outcome, ResolveOutcome::Resolved { .. }) {
            shared.sessions.record_completion(&req.correlation_id);
        }
        outcome
    };

    match outcome {
        ResolveOutcome::Resolved { status } => {
            app.broadcast(BrokerEvent::StatusChanged {
                correlation_id: req.correlation_id.clone(),
                status,
            });
            Ok(Json(IntentResponse {
                success: true,
                correlation_id: req.correlation_id,
                intent,
                status: Some(status),
            }))
        }
        // First observer won the race; report the final status so the
        // caller can treat this as done without another round trip.
        ResolveOutcome::AlreadyTerminal { status } => Ok(Json(IntentResponse {
            success: false,
            correlation_id: req.correlation_id,
            intent,
            status: Some(status),
        })),
        ResolveOutcome::NotFound => Err(ApiError::NotFound),
    }
}

#[derive(Debug, Deserialize)]
struct EndSessionRequest {
    session_id: String,
}

async fn end_session(
    Extension(app): Extension<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(req): Json<EndSessionRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    app.admit(peer).await?;
    app.authorize(peer, &headers)?;

    let mut shared = app.shared.lock().await;
    shared.sessions.end(&req.session_id, Utc::now());
    Ok(Json(json!({ "success": true, "session_id": req.session_id })))
}

async fn metrics(
    Extension(app): Extension<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Result<Json<MetricsResponse>, ApiError> {
    app.admit(peer).await?;
    app.authorize(peer, &headers)?;

    let mut shared = app.shared.lock().await;
    let stats = shared.latency.stats(now_unix_ms());
    Ok(Json(MetricsResponse {
        request_count: stats.map(|s| s.count).unwrap_or(0),
        median_ms: stats.map(|s| s.median_ms),
        p95_ms: stats.map(|s| s.p95_ms),
        min_ms: stats.map(|s| s.min_ms),
        max_ms: stats.map(|s| s.max_ms),
    }))
}

// ─── Sweep & Serve ──────────────────────────────────────────────────

/// TTL-expiry and session-cleanup sweep.
pub async fn run_sweep(app: AppState, interval_secs: u64) {
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval_secs.max(1)));
    loop {
        ticker.tick().await;
        let now = Utc::now();
        let expired = {
            let mut shared = app.shared.lock().await;
            let expired = shared.broker.expire(now);
            shared.sessions.cleanup(SESSION_CLEANUP_GRACE, now);
            expired
        };
        for id in expired {
            tracing::info!(correlation_id = %id, "notification expired");
            app.broadcast(BrokerEvent::StatusChanged {
                correlation_id: id,
                status: toolgate_core::types::NotificationStatus::Expired,
            });
        }
    }
}

/// Run the broker process: HTTP gateway plus expiry sweep, until ctrl-c
/// or SIGTERM.
pub async fn run_serve(opts: ServeOpts) -> anyhow::Result<()> {
    let config = ServerConfig::from_opts(&opts);
    if config.remote_enabled && config.token.as_deref().is_none_or(|t| t.trim().is_empty()) {
        tracing::warn!("remote access enabled without a token; remote clients will be rejected");
    }

    let app = AppState::new(config);
    let router = build_router(app.clone());

    let sweep_app = app.clone();
    let sweep_handle = tokio::spawn(run_sweep(sweep_app, opts.sweep_interval_secs));

    let listener = TcpListener::bind(&opts.bind).await?;
    tracing::info!(bind = %opts.bind, remote = opts.remote, "toolgate gateway listening");

    let serve =
        axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>());

    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to register SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => tracing::info!("received ctrl-c, shutting down"),
                _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
            }
        }

        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
            tracing::info!("received ctrl-c, shutting down");
        }
    };

    tokio::select! {
        () = shutdown => {}
        result = serve => {
            result?;
            tracing::warn!("HTTP server exited unexpectedly");
        }
    }

    sweep_handle.abort();
    tracing::info!("broker stopped");
    Ok(())
}
