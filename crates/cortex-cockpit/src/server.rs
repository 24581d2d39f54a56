//! [`CockpitServer`] – HTTP + WebSocket debug interface.
//!
//! An axum [`Router`] serves the page, the JSON API and the `/ws` event
//! bridge from one listener.  Request bodies are capped and every request is
//! bounded by a timeout.

use std::collections::VecDeque;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use cortex_middleware::{EventBus, Topic};
use cortex_types::{ActionCommand, ActionResult, CortexError, Event, EventPayload, RuntimeStatus};
use axum::Router;
use axum::extract::rejection::JsonRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Json, Response};
use axum::routing::{get, post};
use futures_util::{SinkExt, StreamExt};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

/// Default TCP port.
pub const DEFAULT_PORT: u16 = 8080;

/// Manual commands accepted per second before `429 Too Many Requests`.
pub const DEFAULT_COMMANDS_PER_SECOND: u32 = 5;

/// Action results kept for `GET /api/history`.
const HISTORY_CAPACITY: usize = 100;

const MAX_REQUEST_BYTES: usize = 64 * 1024;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const SOURCE: &str = "cortex-cockpit";

const COCKPIT_HTML: &str = include_str!("cockpit.html");

// ─────────────────────────────────────────────────────────────────────────────
// Shared state
// ─────────────────────────────────────────────────────────────────────────────

/// Why a manual command was not queued.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Rejected {
    RateLimited,
    NotListening(String),
}

/// Caches fed from the bus plus the command rate limiter.
pub(crate) struct CockpitState {
    bus: EventBus,
    status: RwLock<Option<RuntimeStatus>>,
    history: Mutex<VecDeque<ActionResult>>,
    limiter: DefaultDirectRateLimiter,
}

impl CockpitState {
    fn new(bus: EventBus, commands_per_second: u32) -> Self {
        let rate = NonZeroU32::new(commands_per_second).unwrap_or(NonZeroU32::MIN);
        Self {
            bus,
            status: RwLock::new(None),
            history: Mutex::new(VecDeque::with_capacity(HISTORY_CAPACITY)),
            limiter: RateLimiter::direct(Quota::per_second(rate)),
        }
    }

    fn observe(&self, event: &Event) {
        match &event.payload {
            EventPayload::Status(status) => {
                *self.status.write().unwrap_or_else(|p| p.into_inner()) = Some(status.as_ref().clone());
            }
            EventPayload::ActionCompleted(result) => {
                let mut history = self.history.lock().unwrap_or_else(|p| p.into_inner());
                if history.len() == HISTORY_CAPACITY {
                    history.pop_front();
                }
                history.push_back(result.clone());
            }
            _ => {}
        }
    }

    fn status(&self) -> Option<RuntimeStatus> {
        self.status.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    fn history(&self) -> Vec<ActionResult> {
        self.history.lock().unwrap_or_else(|p| p.into_inner()).iter().cloned().collect()
    }

    fn queue_command(&self, command: ActionCommand) -> Result<(), Rejected> {
        if self.limiter.check().is_err() {
            warn!(action = %command.action_name, "manual command rate limited");
            return Err(Rejected::RateLimited);
        }
        info!(action = %command.action_name, "queueing manual command");
        self.bus
            .publish_to(Topic::OperatorCommands, Event::new(SOURCE, EventPayload::ManualCommand(command)))
            .map(|_| ())
            .map_err(|e| Rejected::NotListening(e.to_string()))
    }

    fn request_emergency(&self, reason: String) -> Result<(), CortexError> {
        warn!(%reason, "emergency stop requested from cockpit");
        self.bus
            .publish_to(Topic::OperatorCommands, Event::new(SOURCE, EventPayload::EmergencyStop { reason }))
            .map(|_| ())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// CockpitServer
// ─────────────────────────────────────────────────────────────────────────────

/// Builder for the debug interface.
pub struct CockpitServer {
    bus: EventBus,
    host: IpAddr,
    port: u16,
    commands_per_second: u32,
}

impl CockpitServer {
    /// A server on `127.0.0.1:`[`DEFAULT_PORT`].
    pub fn new(bus: EventBus) -> Self {
        Self {
            bus,
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: DEFAULT_PORT,
            commands_per_second: DEFAULT_COMMANDS_PER_SECOND,
        }
    }

    pub fn with_host(mut self, host: IpAddr) -> Self {
        self.host = host;
        self
    }

    /// Port `0` picks a free port; see [`BoundCockpit::local_addr`].
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_command_rate(mut self, per_second: u32) -> Self {
        self.commands_per_second = per_second;
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Bind the listener and start caching bus traffic.
    ///
    /// # Errors
    ///
    /// [`CortexError::Initialization`] when the address cannot be bound.
    pub async fn bind(self) -> Result<BoundCockpit, CortexError> {
        let addr = SocketAddr::new(self.host, self.port);
        let listener = TcpListener::bind(addr).await.map_err(|e| CortexError::Initialization {
            component: "cockpit".to_string(),
            details: format!("bind error on {addr}: {e}"),
        })?;
        let cache_rx = self.bus.subscribe();
        Ok(BoundCockpit {
            listener,
            state: Arc::new(CockpitState::new(self.bus, self.commands_per_second)),
            cache_rx,
        })
    }

    /// Bind and serve until the task is aborted.
    pub async fn run(self) -> Result<(), CortexError> {
        self.bind().await?.serve().await
    }
}

/// A cockpit whose listener is bound.
pub struct BoundCockpit {
    listener: TcpListener,
    state: Arc<CockpitState>,
    cache_rx: broadcast::Receiver<Event>,
}

impl BoundCockpit {
    pub fn local_addr(&self) -> Result<SocketAddr, CortexError> {
        self.listener
            .local_addr()
            .map_err(|e| CortexError::Channel(format!("cockpit listener: {e}")))
    }

    /// Serve until the task is aborted.
    pub async fn serve(self) -> Result<(), CortexError> {
        let BoundCockpit { listener, state, mut cache_rx } = self;
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "cockpit listening on http://{addr}");
        }

        let cache_state = Arc::clone(&state);
        let cache = tokio::spawn(async move {
            loop {
                match cache_rx.recv().await {
                    Ok(event) => cache_state.observe(&event),
                    Err(broadcast::error::RecvError::Lagged(n)) => debug!(skipped = n, "cockpit cache lagged"),
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        // Abort the cache task when this future is dropped.
        struct AbortOnDrop(tokio::task::JoinHandle<()>);
        impl Drop for AbortOnDrop {
            fn drop(&mut self) {
                self.0.abort();
            }
        }
        let _cache = AbortOnDrop(cache);

        axum::serve(listener, router(state))
            .await
            .map_err(|e| CortexError::Channel(format!("cockpit server: {e}")))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Routes
// ─────────────────────────────────────────────────────────────────────────────

type SharedState = Arc<CockpitState>;

/// Every route of the interface; see the crate docs for the table.
pub(crate) fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/index.html", get(index))
        .route("/api/status", get(get_status))
        .route("/api/history", get(get_history))
        .route("/api/command", post(post_command))
        .route("/api/emergency", post(post_emergency))
        .route("/ws", get(ws_upgrade))
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BYTES))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

async fn index() -> Html<&'static str> {
    Html(COCKPIT_HTML)
}

async fn get_status(State(state): State<SharedState>) -> Response {
    match state.status() {
        Some(status) => Json(status).into_response(),
        None => error(StatusCode::SERVICE_UNAVAILABLE, "no status published yet"),
    }
}

async fn get_history(State(state): State<SharedState>) -> Json<Vec<ActionResult>> {
    Json(state.history())
}

async fn post_command(
    State(state): State<SharedState>,
    body: Result<Json<ActionCommand>, JsonRejection>,
) -> Response {
    let Json(command) = match body {
        Ok(body) => body,
        Err(rejection) => {
            return error(
                StatusCode::BAD_REQUEST,
                format!("expected {{\"action\", \"params\"}}: {}", rejection.body_text()),
            );
        }
    };
    match state.queue_command(command) {
        Ok(()) => (StatusCode::ACCEPTED, Json(json!({ "queued": true }))).into_response(),
        Err(Rejected::RateLimited) => error(StatusCode::TOO_MANY_REQUESTS, "too many manual commands"),
        Err(Rejected::NotListening(e)) => error(StatusCode::SERVICE_UNAVAILABLE, e),
    }
}

#[derive(Deserialize)]
struct EmergencyBody {
    #[serde(default)]
    reason: Option<String>,
}

/// The body is optional; an empty or unreadable one uses a default reason.
async fn post_emergency(State(state): State<SharedState>, body: Option<Json<EmergencyBody>>) -> Response {
    let reason = body
        .and_then(|Json(b)| b.reason)
        .unwrap_or_else(|| "cockpit emergency button".to_string());
    match state.request_emergency(reason) {
        Ok(()) => (StatusCode::ACCEPTED, Json(json!({ "emergency_stop": true }))).into_response(),
        Err(e) => error(StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
    }
}

async fn not_found() -> Response {
    error(StatusCode::NOT_FOUND, "not found")
}

// ─────────────────────────────────────────────────────────────────────────────
// WebSocket bridge
// ─────────────────────────────────────────────────────────────────────────────

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<SharedState>) -> Response {
    ws.on_upgrade(move |socket| bridge(socket, state))
}

async fn bridge(socket: WebSocket, state: SharedState) {
    debug!("cockpit websocket connected");
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut bus_rx = state.bus.subscribe();

    loop {
        tokio::select! {
            // Downstream: bus → browser.
            result = bus_rx.recv() => match result {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(text) => {
                        if ws_tx.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "event serialization failed"),
                },
                Err(broadcast::error::RecvError::Lagged(n)) => debug!(skipped = n, "websocket client lagged"),
                Err(broadcast::error::RecvError::Closed) => break,
            },
            // Upstream: browser → bus.
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if let Some(reply) = handle_upstream_message(&text, &state) {
                        if ws_tx.send(Message::Text(reply)).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                _ => {}
            },
        }
    }
    debug!("cockpit websocket closed");
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Upstream {
    Command {
        action: String,
        #[serde(default)]
        params: Value,
    },
    EmergencyStop {
        #[serde(default)]
        reason: Option<String>,
    },
    Ping,
}

/// Apply one browser message and return the reply to send back, if any.
///
/// | `type` | Effect |
/// |---|---|
/// | `command` | Queue `{"action", "params"}` (rate limited) |
/// | `emergency_stop` | Publish an emergency stop request |
/// | `ping` | Reply `{"type": "pong"}` |
///
/// Anything else is ignored.
pub(crate) fn handle_upstream_message(text: &str, state: &CockpitState) -> Option<String> {
    let message = match serde_json::from_str::<Upstream>(text) {
        Ok(message) => message,
        Err(e) => {
            debug!(error = %e, "ignoring unrecognised websocket message");
            return None;
        }
    };
    let reply = match message {
        Upstream::Ping => json!({ "type": "pong" }),
        Upstream::Command { action, params } => {
            let params = if params.is_null() { json!({}) } else { params };
            match state.queue_command(ActionCommand::new(action, params)) {
                Ok(()) => json!({ "type": "ack", "ok": true }),
                Err(Rejected::RateLimited) => json!({ "type": "error", "message": "rate limited" }),
                Err(Rejected::NotListening(e)) => json!({ "type": "error", "message": e }),
            }
        }
        Upstream::EmergencyStop { reason } => {
            match state.request_emergency(reason.unwrap_or_else(|| "cockpit websocket".to_string())) {
                Ok(()) => json!({ "type": "ack", "ok": true }),
                Err(e) => json!({ "type": "error", "message": e.to_string() }),
            }
        }
    };
    Some(reply.to_string())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
