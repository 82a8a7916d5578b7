//! Leader-side hub connection lifecycle.
//!
//! Same shape as the marker's loop with the leader protocol on open:
//! `identify_leader` followed by `request_all_status`, so every reconnect
//! rebuilds the roster from a fresh snapshot instead of trusting stale state.

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, warn};
use turno_core::protocol::{IdentifyLeader, Ping, WireMessage};
use turno_core::reconnect::{should_reconnect, ConnState, ReconnectPolicy};
use url::Url;

#[derive(Debug, Clone)]
pub struct ConnConfig {
    pub hub_url: Url,
    pub leader_id: String,
    pub nombre: String,
    pub cargo: String,
    pub policy: ReconnectPolicy,
    pub connect_timeout: Duration,
    pub heartbeat: Duration,
}

#[derive(Debug)]
pub enum ConnEvent {
    State(ConnState),
    Inbound(WireMessage),
}

pub async fn hub_loop(
    cfg: ConnConfig,
    mut shutdown_rx: mpsc::Receiver<()>,
    event_tx: mpsc::Sender<ConnEvent>,
) {
    let mut attempt: u32 = 0;
    'outer: loop {
        let state = if attempt == 0 {
            ConnState::Connecting
        } else {
            ConnState::Reconnecting
        };
        if event_tx.send(ConnEvent::State(state)).await.is_err() {
            return;
        }

        let connect = tokio::time::timeout(cfg.connect_timeout, connect_async(cfg.hub_url.clone()));
        let mut ws = match connect.await {
            Ok(Ok((ws, _))) => ws,
            Ok(Err(err)) => {
                warn!("hub_connect_error: {err}");
                if !backoff(&cfg.policy, &mut attempt, &mut shutdown_rx).await {
                    return;
                }
                continue 'outer;
            }
            Err(_) => {
                warn!("hub_connect_timeout ({}s)", cfg.connect_timeout.as_secs());
                if !backoff(&cfg.policy, &mut attempt, &mut shutdown_rx).await {
                    return;
                }
                continue 'outer;
            }
        };
        attempt = 0;

        let identify = WireMessage::IdentifyLeader(IdentifyLeader {
            user_id: cfg.leader_id.clone(),
            nombre: cfg.nombre.clone(),
            cargo: cfg.cargo.clone(),
        });
        let snapshot = WireMessage::RequestAllStatus;
        if ws.send(WsMessage::Text(identify.to_json())).await.is_err()
            || ws.send(WsMessage::Text(snapshot.to_json())).await.is_err()
        {
            warn!("hub_identify_error");
            let _ = ws.close(None).await;
            if !backoff(&cfg.policy, &mut attempt, &mut shutdown_rx).await {
                return;
            }
            continue 'outer;
        }

        if event_tx
            .send(ConnEvent::State(ConnState::Connected))
            .await
            .is_err()
        {
            let _ = ws.close(None).await;
            return;
        }

        let mut ping = interval_at(Instant::now() + cfg.heartbeat, cfg.heartbeat);
        let mut close_code: Option<u16> = None;

        loop {
            tokio::select! {
                msg = ws.next() => match msg {
                    Some(Ok(WsMessage::Text(text))) => match WireMessage::from_json(&text) {
                        Ok(inbound) => {
                            if event_tx.send(ConnEvent::Inbound(inbound)).await.is_err() {
                                let _ = ws.close(None).await;
                                return;
                            }
                        }
                        Err(err) => debug!("hub_frame_invalid: {err}"),
                    },
                    Some(Ok(WsMessage::Close(frame))) => {
                        close_code = frame.map(|f| u16::from(f.code));
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!("hub_read_error: {err}");
                        break;
                    }
                    None => break,
                },
                _ = ping.tick() => {
                    let ping_msg = WireMessage::Ping(Ping {
                        user_id: Some(cfg.leader_id.clone()),
                        timestamp: Some(Utc::now()),
                    });
                    if ws.send(WsMessage::Text(ping_msg.to_json())).await.is_err() {
                        break;
                    }
                }
                _ = shutdown_rx.recv() => {
                    let _ = ws.close(None).await;
                    return;
                }
            }
        }

        if !should_reconnect(close_code, false) {
            let _ = event_tx
                .send(ConnEvent::State(ConnState::InactiveDisconnected))
                .await;
            return;
        }
        if !backoff(&cfg.policy, &mut attempt, &mut shutdown_rx).await {
            return;
        }
    }
}

/// Returns false when teardown arrived during the wait.
async fn backoff(
    policy: &ReconnectPolicy,
    attempt: &mut u32,
    shutdown_rx: &mut mpsc::Receiver<()>,
) -> bool {
    let delay = policy.delay(*attempt);
    *attempt += 1;
    debug!("hub_reconnect in {}s (intento {attempt})", delay.as_secs());
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = shutdown_rx.recv() => false,
    }
}
