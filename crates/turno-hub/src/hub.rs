//! In-memory presence registry and message handling.
//!
//! The registries are owned by [`HubState`] and mutated only from socket
//! callbacks and the stale sweeper, so registration and broadcast stay
//! serialized per connection. Leaders are a distribution list; workers carry
//! the last known status. Client input is never trusted for shape: malformed
//! frames are logged and dropped, never echoed back.

use axum::extract::ws::{CloseFrame, Message};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use turno_core::protocol::{
    Ack, AllStatus, EstadoCambio, ForcedEstadoChange, Identify, IdentifyLeader, Ping, Pong,
    UserConnected, UserDisconnected, WireMessage, WorkerSnapshot,
};
use turno_core::ESTADO_DESCONECTADO;

use crate::Config;

pub struct WorkerEntry {
    pub conn_id: u64,
    pub nombre: String,
    pub cargo: String,
    pub area: String,
    pub estado: String,
    pub last_update: DateTime<Utc>,
    sender: mpsc::Sender<Message>,
}

pub struct LeaderEntry {
    pub conn_id: u64,
    pub nombre: String,
    sender: mpsc::Sender<Message>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct Estadisticas {
    pub total: usize,
    pub estados: HashMap<String, usize>,
    pub lideres: usize,
}

pub struct HubState {
    pub config: Config,
    conn_seq: AtomicU64,
    workers: RwLock<HashMap<String, WorkerEntry>>,
    leaders: RwLock<HashMap<String, LeaderEntry>>,
}

impl HubState {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            conn_seq: AtomicU64::new(0),
            workers: RwLock::new(HashMap::new()),
            leaders: RwLock::new(HashMap::new()),
        }
    }

    pub fn next_conn_id(&self) -> u64 {
        self.conn_seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Parse and dispatch one inbound text frame.
    pub async fn handle_frame(&self, conn_id: u64, sender: &mpsc::Sender<Message>, raw: &str) {
        let msg = match WireMessage::from_json(raw) {
            Ok(msg) => msg,
            Err(err) => {
                warn!(event = "message_invalid", conn_id, error = %err);
                return;
            }
        };
        self.handle_message(conn_id, sender, msg).await;
    }

    pub async fn handle_message(
        &self,
        conn_id: u64,
        sender: &mpsc::Sender<Message>,
        msg: WireMessage,
    ) {
        match msg {
            WireMessage::Identify(identify) => self.identify_worker(conn_id, sender, identify).await,
            WireMessage::IdentifyLeader(identify) => {
                self.identify_leader(conn_id, sender, identify).await
            }
            WireMessage::EstadoCambio(cambio) => self.estado_cambio(cambio).await,
            WireMessage::RequestAllStatus => {
                let users = self.snapshot().await;
                info!(event = "snapshot_sent", conn_id, count = users.len());
                send_to(sender, &WireMessage::AllStatus(AllStatus { users })).await;
            }
            WireMessage::Ping(ping) => self.ping(conn_id, sender, ping).await,
            other => {
                debug!(event = "message_ignored", conn_id, msg = ?other);
            }
        }
    }

    async fn identify_worker(
        &self,
        conn_id: u64,
        sender: &mpsc::Sender<Message>,
        identify: Identify,
    ) {
        let user_id = identify.user_id.clone();
        let entry = WorkerEntry {
            conn_id,
            nombre: identify.nombre.clone(),
            cargo: identify.cargo.clone(),
            area: identify.area.clone(),
            estado: ESTADO_DESCONECTADO.to_string(),
            last_update: Utc::now(),
            sender: sender.clone(),
        };
        self.workers.write().await.insert(user_id.clone(), entry);
        info!(event = "user_connected", user_id = %user_id, nombre = %identify.nombre);

        self.broadcast_to_leaders(&WireMessage::UserConnected(UserConnected {
            user_id: user_id.clone(),
            nombre: identify.nombre,
            cargo: identify.cargo,
            area: identify.area,
        }))
        .await;

        send_to(
            sender,
            &WireMessage::Connected(Ack {
                message: "Conexión establecida correctamente".to_string(),
            }),
        )
        .await;
    }

    async fn identify_leader(
        &self,
        conn_id: u64,
        sender: &mpsc::Sender<Message>,
        identify: IdentifyLeader,
    ) {
        let entry = LeaderEntry {
            conn_id,
            nombre: identify.nombre.clone(),
            sender: sender.clone(),
        };
        self.leaders.write().await.insert(identify.user_id.clone(), entry);
        info!(event = "leader_connected", leader_id = %identify.user_id, nombre = %identify.nombre);

        send_to(
            sender,
            &WireMessage::LeaderConnected(Ack {
                message: "Conexión como líder establecida".to_string(),
            }),
        )
        .await;
    }

    /// Update the worker's status in place and fan the full record out to
    /// every leader. The slug is relayed verbatim, without catalog validation.
    async fn estado_cambio(&self, cambio: EstadoCambio) {
        let timestamp = cambio.timestamp.unwrap_or_else(Utc::now);
        let broadcast = {
            let mut workers = self.workers.write().await;
            let Some(entry) = workers.get_mut(&cambio.user_id) else {
                warn!(event = "estado_unknown_user", user_id = %cambio.user_id);
                return;
            };
            entry.estado = cambio.estado.as_str().to_string();
            entry.last_update = timestamp;
            WireMessage::EstadoCambio(EstadoCambio {
                nombre: entry.nombre.clone(),
                cargo: entry.cargo.clone(),
                area: entry.area.clone(),
                timestamp: Some(timestamp),
                ..cambio
            })
        };
        info!(event = "estado_cambio", msg = ?broadcast);
        self.broadcast_to_leaders(&broadcast).await;
    }

    async fn ping(&self, conn_id: u64, sender: &mpsc::Sender<Message>, ping: Ping) {
        let now = Utc::now();
        let mut workers = self.workers.write().await;
        // Prefer the payload's user id, else fall back to whichever worker
        // owns this connection.
        let entry = match ping.user_id {
            Some(user_id) => workers.get_mut(&user_id),
            None => workers.values_mut().find(|w| w.conn_id == conn_id),
        };
        if let Some(entry) = entry {
            entry.last_update = now;
        }
        drop(workers);
        send_to(sender, &WireMessage::Pong(Pong { server_time: now })).await;
    }

    /// Connection closed: drop whichever registry entry owns it. Workers get
    /// announced to leaders; leaders just disappear.
    pub async fn remove_connection(&self, conn_id: u64) {
        let removed = {
            let mut workers = self.workers.write().await;
            let user_id = workers
                .iter()
                .find(|(_, w)| w.conn_id == conn_id)
                .map(|(id, _)| id.clone());
            user_id.and_then(|id| workers.remove(&id).map(|w| (id, w)))
        };

        if let Some((user_id, entry)) = removed {
            info!(event = "user_disconnected", user_id = %user_id, nombre = %entry.nombre);
            self.broadcast_to_leaders(&WireMessage::UserDisconnected(UserDisconnected {
                user_id,
                nombre: Some(entry.nombre),
            }))
            .await;
            return;
        }

        let mut leaders = self.leaders.write().await;
        let leader_id = leaders
            .iter()
            .find(|(_, l)| l.conn_id == conn_id)
            .map(|(id, _)| id.clone());
        if let Some(id) = leader_id {
            leaders.remove(&id);
            info!(event = "leader_disconnected", leader_id = %id);
        }
    }

    pub async fn snapshot(&self) -> Vec<WorkerSnapshot> {
        let workers = self.workers.read().await;
        let mut users: Vec<WorkerSnapshot> = workers
            .iter()
            .map(|(user_id, w)| WorkerSnapshot {
                user_id: user_id.clone(),
                nombre: w.nombre.clone(),
                cargo: w.cargo.clone(),
                area: w.area.clone(),
                estado: w.estado.clone(),
                last_update: w.last_update,
            })
            .collect();
        users.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        users
    }

    pub async fn user_status(&self, user_id: &str) -> Option<WorkerSnapshot> {
        let workers = self.workers.read().await;
        workers.get(user_id).map(|w| WorkerSnapshot {
            user_id: user_id.to_string(),
            nombre: w.nombre.clone(),
            cargo: w.cargo.clone(),
            area: w.area.clone(),
            estado: w.estado.clone(),
            last_update: w.last_update,
        })
    }

    /// REST-driven status override: update the registry, tell the worker,
    /// broadcast to leaders. Returns false for unknown workers.
    pub async fn force_estado(&self, user_id: &str, estado: &str) -> bool {
        let now = Utc::now();
        let (worker_sender, broadcast) = {
            let mut workers = self.workers.write().await;
            let Some(entry) = workers.get_mut(user_id) else {
                return false;
            };
            entry.estado = estado.to_string();
            entry.last_update = now;
            (
                entry.sender.clone(),
                WireMessage::EstadoCambio(EstadoCambio {
                    user_id: user_id.to_string(),
                    nombre: entry.nombre.clone(),
                    cargo: entry.cargo.clone(),
                    area: entry.area.clone(),
                    estado: turno_core::protocol::EstadoAlias::new(estado),
                    timestamp: Some(now),
                    origen: Some("force_estado".to_string()),
                    limite_segundos: None,
                }),
            )
        };

        send_to(
            &worker_sender,
            &WireMessage::ForcedEstadoChange(ForcedEstadoChange {
                estado: estado.to_string(),
            }),
        )
        .await;
        self.broadcast_to_leaders(&broadcast).await;
        true
    }

    pub async fn statistics(&self) -> Estadisticas {
        let workers = self.workers.read().await;
        let mut estados: HashMap<String, usize> = HashMap::new();
        for slug in ["disponible", "break", "almuerzo", ESTADO_DESCONECTADO] {
            estados.insert(slug.to_string(), 0);
        }
        for worker in workers.values() {
            *estados.entry(worker.estado.clone()).or_insert(0) += 1;
        }
        Estadisticas {
            total: workers.len(),
            estados,
            lideres: self.leaders.read().await.len(),
        }
    }

    pub async fn counts(&self) -> (usize, usize) {
        (
            self.workers.read().await.len(),
            self.leaders.read().await.len(),
        )
    }

    /// A leader whose channel is gone is dropped on the spot; a full channel
    /// is skipped, never queued.
    pub async fn broadcast_to_leaders(&self, msg: &WireMessage) {
        let targets: Vec<(String, mpsc::Sender<Message>)> = {
            let leaders = self.leaders.read().await;
            leaders
                .iter()
                .map(|(id, l)| (id.clone(), l.sender.clone()))
                .collect()
        };
        let raw = msg.to_json();
        for (leader_id, sender) in targets {
            if sender.try_send(Message::Text(raw.clone())).is_err() {
                if sender.is_closed() {
                    warn!(event = "send_error", leader_id = %leader_id);
                    self.leaders.write().await.remove(&leader_id);
                } else {
                    warn!(event = "send_skipped", leader_id = %leader_id);
                }
            }
        }
    }

    /// Evict workers whose `last_update` is older than the stale threshold
    /// and force-close their sockets. Guards against half-closed sockets
    /// that never delivered a close event.
    pub async fn sweep_stale(&self, now: DateTime<Utc>) -> Vec<String> {
        let stale_after = ChronoDuration::from_std(self.config.stale_after)
            .unwrap_or_else(|_| ChronoDuration::minutes(30));
        let mut evicted = Vec::new();
        let mut workers = self.workers.write().await;
        workers.retain(|user_id, entry| {
            if now - entry.last_update > stale_after {
                warn!(event = "stale_evicted", user_id = %user_id, nombre = %entry.nombre);
                let _ = entry.sender.try_send(Message::Close(Some(CloseFrame {
                    code: 1000,
                    reason: "inactivo".into(),
                })));
                evicted.push(user_id.clone());
                false
            } else {
                true
            }
        });
        evicted
    }

    pub fn start_sweeper(self: Arc<Self>) {
        let interval = self.config.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.sweep_stale(Utc::now()).await;
            }
        });
    }
}

async fn send_to(sender: &mpsc::Sender<Message>, msg: &WireMessage) {
    if sender.send(Message::Text(msg.to_json())).await.is_err() {
        warn!(event = "send_error", msg = ?msg);
    }
}
