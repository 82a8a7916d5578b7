mod hub;
mod rest;

use axum::{
    extract::{ws::Message, ws::WebSocket, ws::WebSocketUpgrade, State},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use std::{sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use hub::HubState;

#[derive(Clone, Debug)]
pub struct Config {
    pub addr: String,
    pub stale_after: Duration,
    pub sweep_interval: Duration,
    pub write_timeout: Duration,
}

#[derive(Parser, Debug)]
#[command(name = "turno-hub", about = "Presence hub for the attendance marker")]
struct Args {
    /// Listen address; falls back to TURNO_HUB_ADDR, then 0.0.0.0:3001
    #[arg(long, default_value = "")]
    addr: String,
    /// Evict workers silent for longer than this many minutes
    #[arg(long, default_value_t = 30)]
    stale_minutes: u64,
    /// Interval between stale sweeps, in seconds
    #[arg(long, default_value_t = 60)]
    sweep_seconds: u64,
    /// Per-connection write timeout, in seconds
    #[arg(long, default_value_t = 2)]
    write_timeout: u64,
}

#[tokio::main]
async fn main() {
    let config = load_config(Args::parse());
    init_logging();

    let hub = Arc::new(HubState::new(config.clone()));
    hub.clone().start_sweeper();

    let app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/api/connected-users", get(rest::connected_users))
        .route("/api/user-status/:user_id", get(rest::user_status))
        .route("/api/force-estado", post(rest::force_estado))
        .route("/api/statistics", get(rest::statistics))
        .route("/health", get(rest::health))
        .with_state(hub.clone());

    let listener = match tokio::net::TcpListener::bind(&config.addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(event = "bind_error", addr = %config.addr, error = %err);
            return;
        }
    };

    info!(event = "hub_start", addr = %config.addr);

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        info!(event = "hub_shutdown");
    };

    if let Err(err) = axum::serve(listener, app).with_graceful_shutdown(shutdown).await {
        error!(event = "hub_error", error = %err);
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(hub): State<Arc<HubState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(hub, socket))
}

/// One task per socket: a writer draining an mpsc channel (so broadcasts
/// never block on a slow peer) and this read loop feeding the hub.
async fn handle_socket(hub: Arc<HubState>, socket: WebSocket) {
    let conn_id = hub.next_conn_id();
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Message>(256);
    let write_timeout = hub.config.write_timeout;
    let write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            let send = ws_sender.send(msg);
            if tokio::time::timeout(write_timeout, send).await.is_err() {
                return;
            }
            if closing {
                return;
            }
        }
    });

    info!(event = "socket_open", conn_id);

    while let Some(result) = ws_receiver.next().await {
        let msg = match result {
            Ok(msg) => msg,
            Err(err) => {
                warn!(event = "read_error", conn_id, error = %err);
                break;
            }
        };
        match msg {
            Message::Text(text) => hub.handle_frame(conn_id, &tx, &text).await,
            Message::Binary(bytes) => {
                if let Ok(text) = String::from_utf8(bytes) {
                    hub.handle_frame(conn_id, &tx, &text).await;
                }
            }
            Message::Close(frame) => {
                info!(event = "socket_close", conn_id, frame = ?frame);
                break;
            }
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    hub.remove_connection(conn_id).await;
    drop(tx);
    let _ = write_task.await;
}

fn load_config(args: Args) -> Config {
    Config {
        addr: resolve_addr(&args.addr),
        stale_after: Duration::from_secs(args.stale_minutes * 60),
        sweep_interval: Duration::from_secs(args.sweep_seconds.max(1)),
        write_timeout: Duration::from_secs(args.write_timeout),
    }
}

fn resolve_addr(flag: &str) -> String {
    if !flag.trim().is_empty() {
        return flag.to_string();
    }
    if let Ok(value) = std::env::var("TURNO_HUB_ADDR") {
        if !value.trim().is_empty() {
            return value;
        }
    }
    "0.0.0.0:3001".to_string()
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
