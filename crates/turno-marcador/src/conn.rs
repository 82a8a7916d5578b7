//! Worker-side hub connection lifecycle.
//!
//! One task owns the socket: connect with a timeout, identify, heartbeat and
//! periodic status resend, reconnect with doubling backoff on abnormal close.
//! A close carrying the reserved inactivity code parks the loop until the
//! user explicitly asks to reconnect; command-channel teardown acts as the
//! destroyed flag and never schedules a reconnect.

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, Instant};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, warn};
use turno_core::protocol::{Identify, Ping, WireMessage, CIERRE_INACTIVIDAD};
use turno_core::reconnect::{should_reconnect, ConnState, ReconnectPolicy};
use url::Url;

#[derive(Debug, Clone)]
pub struct Identidad {
    pub user_id: String,
    pub nombre: String,
    pub cargo: String,
    pub area: String,
}

#[derive(Debug, Clone)]
pub struct ConnConfig {
    pub hub_url: Url,
    pub identidad: Identidad,
    pub policy: ReconnectPolicy,
    pub connect_timeout: Duration,
    pub heartbeat: Duration,
    pub sync: Duration,
}

#[derive(Debug)]
pub enum ConnCommand {
    /// Transmit one message now.
    Send(WireMessage),
    /// Close with the reserved inactivity code and wait for `Reconnect`.
    CloseInactivity,
    /// Manual reconnect after an inactivity close.
    Reconnect,
    /// Teardown; the loop exits without reconnecting.
    Shutdown,
}

#[derive(Debug)]
pub enum ConnEvent {
    State(ConnState),
    Inbound(WireMessage),
}

enum Espera {
    Cumplida,
    Reconectar,
    Terminar,
}

pub async fn hub_loop(
    cfg: ConnConfig,
    mut cmd_rx: mpsc::Receiver<ConnCommand>,
    sync_rx: watch::Receiver<Option<WireMessage>>,
    event_tx: mpsc::Sender<ConnEvent>,
) {
    let mut attempt: u32 = 0;
    'outer: loop {
        if emit(&event_tx, ConnEvent::State(conn_state(attempt))).await.is_err() {
            return;
        }

        let connect = tokio::time::timeout(cfg.connect_timeout, connect_async(cfg.hub_url.clone()));
        let mut ws = match connect.await {
            Ok(Ok((ws, _))) => ws,
            Ok(Err(err)) => {
                warn!("hub_connect_error: {err}");
                match backoff(&cfg.policy, &mut attempt, &mut cmd_rx).await {
                    Espera::Cumplida => continue 'outer,
                    Espera::Reconectar => {
                        attempt = 0;
                        continue 'outer;
                    }
                    Espera::Terminar => return,
                }
            }
            Err(_) => {
                warn!("hub_connect_timeout ({}s)", cfg.connect_timeout.as_secs());
                match backoff(&cfg.policy, &mut attempt, &mut cmd_rx).await {
                    Espera::Cumplida => continue 'outer,
                    Espera::Reconectar => {
                        attempt = 0;
                        continue 'outer;
                    }
                    Espera::Terminar => return,
                }
            }
        };
        attempt = 0;

        let identify = WireMessage::Identify(Identify {
            user_id: cfg.identidad.user_id.clone(),
            nombre: cfg.identidad.nombre.clone(),
            cargo: cfg.identidad.cargo.clone(),
            area: cfg.identidad.area.clone(),
            timestamp: Some(Utc::now()),
        });
        if ws.send(WsMessage::Text(identify.to_json())).await.is_err() {
            warn!("hub_identify_error");
            let _ = ws.close(None).await;
            match backoff(&cfg.policy, &mut attempt, &mut cmd_rx).await {
                Espera::Cumplida => continue 'outer,
                Espera::Reconectar => {
                    attempt = 0;
                    continue 'outer;
                }
                Espera::Terminar => return,
            }
        }

        if emit(&event_tx, ConnEvent::State(ConnState::Connected)).await.is_err() {
            let _ = ws.close(None).await;
            return;
        }

        let mut ping = interval_at(Instant::now() + cfg.heartbeat, cfg.heartbeat);
        let mut sync = interval_at(Instant::now() + cfg.sync, cfg.sync);
        let mut close_code: Option<u16> = None;
        let mut inactivity_close = false;

        loop {
            tokio::select! {
                msg = ws.next() => match msg {
                    Some(Ok(WsMessage::Text(text))) => match WireMessage::from_json(&text) {
                        Ok(inbound) => {
                            if emit(&event_tx, ConnEvent::Inbound(inbound)).await.is_err() {
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
                cmd = cmd_rx.recv() => match cmd {
                    Some(ConnCommand::Send(msg)) => {
                        if ws.send(WsMessage::Text(msg.to_json())).await.is_err() {
                            break;
                        }
                    }
                    Some(ConnCommand::CloseInactivity) => {
                        let _ = ws
                            .close(Some(CloseFrame {
                                code: CloseCode::from(CIERRE_INACTIVIDAD),
                                reason: "inactividad del usuario".into(),
                            }))
                            .await;
                        inactivity_close = true;
                        break;
                    }
                    Some(ConnCommand::Reconnect) => {}
                    Some(ConnCommand::Shutdown) | None => {
                        let _ = ws.close(None).await;
                        return;
                    }
                },
                _ = ping.tick() => {
                    let ping_msg = WireMessage::Ping(Ping {
                        user_id: Some(cfg.identidad.user_id.clone()),
                        timestamp: Some(Utc::now()),
                    });
                    if ws.send(WsMessage::Text(ping_msg.to_json())).await.is_err() {
                        break;
                    }
                }
                _ = sync.tick() => {
                    let pending = sync_rx.borrow().clone();
                    if let Some(msg) = pending {
                        if ws.send(WsMessage::Text(msg.to_json())).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }

        if !should_reconnect(close_code, false) || inactivity_close {
            if emit(&event_tx, ConnEvent::State(ConnState::InactiveDisconnected))
                .await
                .is_err()
            {
                return;
            }
            // parked: only an explicit user action restarts the connection
            loop {
                match cmd_rx.recv().await {
                    Some(ConnCommand::Reconnect) => {
                        attempt = 0;
                        continue 'outer;
                    }
                    Some(ConnCommand::Shutdown) | None => return,
                    Some(other) => debug!("command ignored while parked: {other:?}"),
                }
            }
        }

        match backoff(&cfg.policy, &mut attempt, &mut cmd_rx).await {
            Espera::Cumplida => {}
            Espera::Reconectar => attempt = 0,
            Espera::Terminar => return,
        }
    }
}

fn conn_state(attempt: u32) -> ConnState {
    if attempt == 0 {
        ConnState::Connecting
    } else {
        ConnState::Reconnecting
    }
}

/// Sleep out the backoff delay while staying responsive to teardown and to a
/// manual reconnect. Messages queued while offline are dropped, never
/// buffered.
async fn backoff(
    policy: &ReconnectPolicy,
    attempt: &mut u32,
    cmd_rx: &mut mpsc::Receiver<ConnCommand>,
) -> Espera {
    let delay = policy.delay(*attempt);
    *attempt += 1;
    debug!("hub_reconnect in {}s (intento {attempt})", delay.as_secs());
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return Espera::Cumplida,
            cmd = cmd_rx.recv() => match cmd {
                Some(ConnCommand::Reconnect) => return Espera::Reconectar,
                Some(ConnCommand::Shutdown) | None => return Espera::Terminar,
                Some(other) => debug!("command dropped while offline: {other:?}"),
            },
        }
    }
}

async fn emit(event_tx: &mpsc::Sender<ConnEvent>, event: ConnEvent) -> Result<(), ()> {
    event_tx.send(event).await.map_err(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn backoff_waits_the_policy_delay() {
        let policy = ReconnectPolicy::new(Duration::from_secs(3), Duration::from_secs(30));
        let (_tx, mut rx) = mpsc::channel::<ConnCommand>(4);
        let mut attempt = 0;
        let started = Instant::now();
        let outcome = backoff(&policy, &mut attempt, &mut rx).await;
        assert!(matches!(outcome, Espera::Cumplida));
        assert!(started.elapsed() >= Duration::from_secs(3));
        assert_eq!(attempt, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_interrupts_the_backoff_sleep() {
        let policy = ReconnectPolicy::new(Duration::from_secs(30), Duration::from_secs(30));
        let (tx, mut rx) = mpsc::channel::<ConnCommand>(4);
        tx.send(ConnCommand::Shutdown).await.unwrap();
        let mut attempt = 0;
        assert!(matches!(
            backoff(&policy, &mut attempt, &mut rx).await,
            Espera::Terminar
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn manual_reconnect_interrupts_the_backoff_sleep() {
        let policy = ReconnectPolicy::new(Duration::from_secs(30), Duration::from_secs(30));
        let (tx, mut rx) = mpsc::channel::<ConnCommand>(4);
        tx.send(ConnCommand::Send(WireMessage::RequestAllStatus))
            .await
            .unwrap();
        tx.send(ConnCommand::Reconnect).await.unwrap();
        let mut attempt = 0;
        // the stale Send is dropped, the Reconnect wins
        assert!(matches!(
            backoff(&policy, &mut attempt, &mut rx).await,
            Espera::Reconectar
        ));
    }
}
