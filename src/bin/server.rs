use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use team_wars_server::clock::SystemClock;
use team_wars_server::constants::normalize_duration_ms;
use team_wars_server::engine::{GameEngine, GameEngineOptions};
use team_wars_server::protocol::{parse_client_message, ParsedClientMessage};
use team_wars_server::store::JsonFileStore;
use team_wars_server::types::MatchPhase;
use tokio::sync::broadcast;
use tokio::sync::mpsc;
use tower_http::services::{ServeDir, ServeFile};
use tracing::{debug, info, warn};

type SharedEngine = Arc<GameEngine>;

const SNAPSHOT_SAVE_INTERVAL_SECS: u64 = 60;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "team_wars_server=debug,tower_http=info".to_string()),
        )
        .init();

    let port = parse_port(std::env::var("PORT").ok().as_deref());
    let data_dir = std::env::var("DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(".data/team-wars"));
    let duration_override = normalize_duration_ms(
        std::env::var("MATCH_MINUTES")
            .ok()
            .and_then(|value| value.parse::<i64>().ok()),
    );

    let store = Arc::new(JsonFileStore::new(data_dir));
    let engine = GameEngine::new(
        Arc::new(SystemClock),
        store,
        GameEngineOptions {
            start_ms_override: None,
            duration_ms_override: duration_override,
        },
    )
    .expect("failed to open the match store");
    let engine = Arc::new(engine);
    start_match_watch(engine.clone());

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/api/snapshot", get(snapshot_handler))
        .route("/ws", get(ws_handler))
        .with_state(engine);

    let app = if let Some(static_dir) = resolve_static_dir() {
        let index_file = static_dir.join("index.html");
        info!(root = %static_dir.display(), "serving static client files");
        app.fallback_service(
            ServeDir::new(static_dir).not_found_service(ServeFile::new(index_file)),
        )
    } else {
        warn!("static client root not found; serving API only");
        app
    };

    let bind_addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("failed to bind server socket");

    info!(port, "listening");
    axum::serve(listener, app)
        .await
        .expect("server runtime failed");
}

fn parse_port(raw: Option<&str>) -> u16 {
    raw.and_then(|value| value.parse::<u16>().ok()).unwrap_or(8080)
}

fn resolve_static_dir() -> Option<PathBuf> {
    if let Ok(raw) = std::env::var("STATIC_DIR") {
        let path = PathBuf::from(raw);
        if path.join("index.html").is_file() {
            return Some(path);
        }
    }

    let candidates = [PathBuf::from("dist/client"), PathBuf::from("web/dist")];
    candidates
        .into_iter()
        .find(|path| path.join("index.html").is_file())
}

/// Drives the match end transition and the periodic snapshot save.
fn start_match_watch(engine: SharedEngine) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        let mut tick = 0u64;
        loop {
            interval.tick().await;
            tick += 1;

            if let Some((scores, winner)) = engine.poll_end() {
                info!(
                    blue = scores.blue,
                    pink = scores.pink,
                    ?winner,
                    "match finalized"
                );
            }

            if engine.phase() == MatchPhase::Active && tick % SNAPSHOT_SAVE_INTERVAL_SECS == 0 {
                if let Err(error) = engine.persist_snapshot() {
                    warn!(%error, "periodic snapshot save failed");
                }
            }
        }
    });
}

async fn healthz() -> impl IntoResponse {
    Json(json!({ "ok": true }))
}

async fn snapshot_handler(State(engine): State<SharedEngine>) -> impl IntoResponse {
    Json(engine.snapshot())
}

async fn ws_handler(ws: WebSocketUpgrade, State(engine): State<SharedEngine>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(engine, socket))
}

async fn handle_socket(engine: SharedEngine, socket: WebSocket) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<String>(256);

    let writer = tokio::spawn(async move {
        while let Some(payload) = rx.recv().await {
            if ws_sender.send(Message::Text(payload.into())).await.is_err() {
                break;
            }
        }
    });

    let mut session = ClientSession {
        engine: engine.clone(),
        tx: tx.clone(),
        player_id: None,
        forwarder: None,
    };

    while let Some(received) = ws_receiver.next().await {
        let Ok(message) = received else {
            break;
        };

        match message {
            Message::Text(raw) => session.handle_message(raw.to_string()).await,
            Message::Binary(raw) => match String::from_utf8(raw.to_vec()) {
                Ok(text) => session.handle_message(text).await,
                Err(_) => session.send_error("invalid", "invalid utf8 message"),
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    if let Some(forwarder) = session.forwarder.take() {
        forwarder.abort();
    }
    drop(tx);
    drop(session);
    let _ = writer.await;
}

struct ClientSession {
    engine: SharedEngine,
    tx: mpsc::Sender<String>,
    player_id: Option<String>,
    forwarder: Option<tokio::task::JoinHandle<()>>,
}

impl ClientSession {
    async fn handle_message(&mut self, raw: String) {
        let Some(message) = parse_client_message(&raw) else {
            self.send_error("invalid", "invalid message");
            return;
        };

        match message {
            ParsedClientMessage::Join { name, team } => match self.engine.join(&name, team) {
                Ok(player) => {
                    self.player_id = Some(player.id.clone());
                    self.ensure_forwarder();
                    self.send_json(&json!({
                        "type": "welcome",
                        "player": player,
                    }));
                    self.send_json(&json!({
                        "type": "snapshot",
                        "snapshot": self.engine.snapshot(),
                    }));
                }
                Err(error) => self.send_error(error.code(), &error.to_string()),
            },
            ParsedClientMessage::Claim { x, y } => {
                let Some(player_id) = self.player_id.clone() else {
                    self.send_error("not_joined", "send join first");
                    return;
                };
                match self.engine.claim_tile(&player_id, x, y) {
                    Ok(result) => self.send_json(&json!({
                        "type": "claim_ok",
                        "tile": result.tile,
                        "scores": result.scores,
                        "actionsRemaining": result.actions_remaining,
                    })),
                    Err(error) => self.send_json(&json!({
                        "type": "claim_rejected",
                        "code": error.code(),
                        "message": error.to_string(),
                        "x": x,
                        "y": y,
                    })),
                }
            }
            ParsedClientMessage::Chat { text } => {
                let Some(player_id) = self.player_id.clone() else {
                    self.send_error("not_joined", "send join first");
                    return;
                };
                if let Err(error) = self.engine.send_chat(&player_id, &text) {
                    self.send_error(error.code(), &error.to_string());
                }
            }
            ParsedClientMessage::Heartbeat => {
                if let Some(player_id) = &self.player_id {
                    self.engine.heartbeat(player_id);
                }
            }
            ParsedClientMessage::Ping { t } => {
                self.send_json(&json!({ "type": "pong", "t": t }));
            }
        }
    }

    /// Forwards broadcast events to this connection. A receiver that lags
    /// behind gets a fresh snapshot instead of the missed events.
    fn ensure_forwarder(&mut self) {
        if self.forwarder.is_some() {
            return;
        }
        let mut events = self.engine.subscribe();
        let engine = self.engine.clone();
        let tx = self.tx.clone();
        self.forwarder = Some(tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        let payload = match serde_json::to_string(&json!({
                            "type": "event",
                            "event": event,
                        })) {
                            Ok(payload) => payload,
                            Err(error) => {
                                warn!(%error, "failed to serialize event");
                                continue;
                            }
                        };
                        if tx.send(payload).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        debug!(missed, "subscriber lagged; resyncing with snapshot");
                        let payload = json!({
                            "type": "snapshot",
                            "snapshot": engine.snapshot(),
                        })
                        .to_string();
                        if tx.send(payload).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }));
    }

    fn send_json(&self, value: &serde_json::Value) {
        if self.tx.try_send(value.to_string()).is_err() {
            debug!("dropping message for slow client");
        }
    }

    fn send_error(&self, code: &str, message: &str) {
        self.send_json(&json!({
            "type": "error",
            "code": code,
            "message": message,
        }));
    }
}
