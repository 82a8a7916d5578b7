mod attendance;
mod backend;
mod conn;
mod inactivity;
mod schedule;

use attendance::{Marcaje, MarcajeEvento};
use backend::{BackendClient, Transicion};
use chrono::{Duration as ChronoDuration, Local, Utc};
use clap::Parser;
use conn::{ConnCommand, ConnConfig, ConnEvent, Identidad};
use crossterm::event::{Event, EventStream, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use futures_util::StreamExt;
use inactivity::{Inactividad, InactivityMonitor};
use std::io::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use turno_core::catalog::{Estado, EstadoCatalogo};
use turno_core::protocol::{EstadoAlias, EstadoCambio, WireMessage};
use turno_core::reconnect::{ConnState, ReconnectPolicy};
use turno_core::ESTADO_DESCONECTADO;
use url::Url;

#[derive(Parser, Debug)]
#[command(name = "turno-marcador", about = "Marcador de asistencia en tiempo real")]
struct Args {
    /// Advisor id; falls back to TURNO_USER_ID
    #[arg(long, default_value = "")]
    user_id: String,
    #[arg(long, default_value = "")]
    nombre: String,
    #[arg(long, default_value = "Asesor")]
    cargo: String,
    #[arg(long, default_value = "")]
    area: String,
    /// Hub URL; falls back to TURNO_HUB_URL, then ws://127.0.0.1:3001/ws
    #[arg(long, default_value = "")]
    hub_url: String,
    /// Backend base URL; falls back to TURNO_BACKEND_URL
    #[arg(long, default_value = "")]
    backend_url: String,
    #[arg(long, default_value_t = 25)]
    heartbeat_seconds: u64,
    #[arg(long, default_value_t = 30)]
    sync_seconds: u64,
    #[arg(long, default_value_t = 3000)]
    reconnect_base_ms: u64,
    #[arg(long, default_value_t = 30000)]
    reconnect_max_ms: u64,
    #[arg(long, default_value_t = 55)]
    inactivity_warn_min: i64,
    #[arg(long, default_value_t = 60)]
    inactivity_max_min: i64,
}

struct App {
    identidad: Identidad,
    marcaje: Marcaje,
    inactividad: InactivityMonitor,
    horario: Option<schedule::HorarioHoy>,
    conn_state: ConnState,
    backend: Arc<BackendClient>,
    cmd_tx: mpsc::Sender<ConnCommand>,
    sync_tx: watch::Sender<Option<WireMessage>>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging();

    let identidad = Identidad {
        user_id: resolve(&args.user_id, "TURNO_USER_ID", ""),
        nombre: resolve(&args.nombre, "TURNO_NOMBRE", "Asesor"),
        cargo: args.cargo.clone(),
        area: resolve(&args.area, "TURNO_AREA", ""),
    };
    if identidad.user_id.is_empty() {
        eprintln!("falta --user-id (o TURNO_USER_ID)");
        std::process::exit(1);
    }

    let hub_url = resolve(&args.hub_url, "TURNO_HUB_URL", "ws://127.0.0.1:3001/ws");
    let hub_url = match Url::parse(&hub_url) {
        Ok(url) => url,
        Err(err) => {
            eprintln!("hub URL inválida {hub_url}: {err}");
            std::process::exit(1);
        }
    };
    let backend_url = resolve(&args.backend_url, "TURNO_BACKEND_URL", "http://127.0.0.1:8000");
    let backend = Arc::new(BackendClient::new(&backend_url));

    // bootstrap reads; a dead backend degrades to an empty catalog
    let catalogo = match backend.estados_asesor(&identidad.user_id).await {
        Ok(catalogo) => catalogo,
        Err(err) => {
            warn!("no se pudo cargar el catálogo de estados: {err}");
            EstadoCatalogo::default()
        }
    };
    let horario = match backend.horario_actual(&identidad.user_id).await {
        Ok(horario) => horario,
        Err(err) => {
            warn!("no se pudo cargar el horario de hoy: {err}");
            None
        }
    };

    let mut marcaje = Marcaje::new(Local::now().date_naive(), catalogo);
    restaurar_estado(&backend, &identidad.user_id, &mut marcaje).await;

    let (cmd_tx, cmd_rx) = mpsc::channel::<ConnCommand>(64);
    let (event_tx, mut event_rx) = mpsc::channel::<ConnEvent>(64);
    let (sync_tx, sync_rx) = watch::channel::<Option<WireMessage>>(None);

    let conn_cfg = ConnConfig {
        hub_url,
        identidad: identidad.clone(),
        policy: ReconnectPolicy::new(
            Duration::from_millis(args.reconnect_base_ms),
            Duration::from_millis(args.reconnect_max_ms),
        ),
        connect_timeout: Duration::from_secs(10),
        heartbeat: Duration::from_secs(args.heartbeat_seconds),
        sync: Duration::from_secs(args.sync_seconds),
    };
    let conn_task = tokio::spawn(conn::hub_loop(conn_cfg, cmd_rx, sync_rx, event_tx));

    let mut app = App {
        identidad,
        marcaje,
        inactividad: InactivityMonitor::new(
            Utc::now(),
            ChronoDuration::minutes(args.inactivity_warn_min),
            ChronoDuration::minutes(args.inactivity_max_min),
        ),
        horario,
        conn_state: ConnState::Connecting,
        backend,
        cmd_tx,
        sync_tx,
    };
    app.publicar_estado(None, None).await;

    if let Err(err) = enable_raw_mode() {
        eprintln!("no se pudo preparar la terminal: {err}");
        std::process::exit(1);
    }
    app.pantalla_ayuda();

    let mut input = EventStream::new();
    let mut cronometro = tokio::time::interval(Duration::from_secs(1));
    let mut chequeo_inactividad = tokio::time::interval(Duration::from_secs(60));

    loop {
        tokio::select! {
            evento = input.next() => match evento {
                Some(Ok(Event::Key(key))) => {
                    app.inactividad.record_activity(Utc::now());
                    if key.kind == KeyEventKind::Press && app.manejar_tecla(key).await {
                        break;
                    }
                }
                Some(Ok(Event::Mouse(_))) => {
                    app.inactividad.record_activity(Utc::now());
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    warn!("error de terminal: {err}");
                    break;
                }
                None => break,
            },
            _ = cronometro.tick() => app.tick().await,
            _ = chequeo_inactividad.tick() => app.chequear_inactividad().await,
            evento = event_rx.recv() => match evento {
                Some(evento) => app.manejar_conexion(evento).await,
                None => break,
            },
        }
    }

    let _ = app.cmd_tx.send(ConnCommand::Shutdown).await;
    let _ = conn_task.await;
    let _ = disable_raw_mode();
}

impl App {
    /// Push the current status to the hub and refresh the payload the sync
    /// tick re-sends every interval.
    async fn publicar_estado(&mut self, origen: Option<&str>, limite_segundos: Option<u64>) {
        let msg = WireMessage::EstadoCambio(EstadoCambio {
            user_id: self.identidad.user_id.clone(),
            nombre: self.identidad.nombre.clone(),
            cargo: self.identidad.cargo.clone(),
            area: self.identidad.area.clone(),
            estado: EstadoAlias::new(self.marcaje.estado_slug()),
            timestamp: Some(Utc::now()),
            origen: origen.map(str::to_string),
            limite_segundos,
        });
        let _ = self.sync_tx.send(Some(msg.clone()));
        let _ = self.cmd_tx.send(ConnCommand::Send(msg)).await;
    }

    async fn manejar_tecla(&mut self, key: KeyEvent) -> bool {
        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => return true,
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => return true,
            KeyCode::Char('r') => self.reconectar().await,
            KeyCode::Char('i') => self.marcar_entrada().await,
            KeyCode::Char('f') => self.marcar_salida().await,
            KeyCode::Char(c) if c.is_ascii_digit() => {
                let idx = c.to_digit(10).unwrap_or(0) as usize;
                if idx >= 1 {
                    self.cambiar_estado(idx - 1).await;
                }
            }
            _ => {}
        }
        false
    }

    async fn reconectar(&mut self) {
        if !self.inactividad.disconnected() && self.conn_state != ConnState::InactiveDisconnected {
            return;
        }
        self.inactividad.reset(Utc::now());
        let _ = self.cmd_tx.send(ConnCommand::Reconnect).await;
        linea("Reconectando…");
    }

    async fn marcar_entrada(&mut self) {
        if self.inactividad.disconnected() || self.marcaje.jornada_activa() {
            return;
        }
        let now = Local::now().naive_local();
        if let Some(horario) = &self.horario {
            if !horario.puede_iniciar(now) {
                if let Some(msg) = horario.mensaje(now) {
                    linea(&msg);
                }
                return;
            }
        } else {
            linea("No hay horario asignado para hoy");
            return;
        }

        if let Err(err) = self.backend.marcar_entrada(&self.identidad.user_id).await {
            warn!("error al marcar entrada: {err}");
            linea("No se pudo marcar la entrada, intenta nuevamente");
            return;
        }
        if self.marcaje.iniciar_jornada(Utc::now()).is_ok() {
            linea("Jornada iniciada. Selecciona un estado para comenzar.");
            self.publicar_estado(Some("start_shift"), None).await;
        }
    }

    async fn marcar_salida(&mut self) {
        if self.inactividad.disconnected() || !self.marcaje.jornada_activa() {
            return;
        }
        let now = Local::now().naive_local();
        if let Some(horario) = &self.horario {
            if !horario.puede_finalizar(now) {
                linea("Aún no es hora de finalizar tu jornada");
                return;
            }
        }

        let fin = Utc::now();
        if self.marcaje.finalizar_jornada(fin).is_err() {
            return;
        }

        // local state is settled; backend calls surface errors without
        // rolling it back
        let backend = self.backend.clone();
        let user_id = self.identidad.user_id.clone();
        tokio::spawn(async move {
            let cierre = Transicion {
                estado: ESTADO_DESCONECTADO,
                fin: Some(fin),
                finalizando: Some(true),
            };
            if let Err(err) = backend.transicionar(&user_id, &cierre).await {
                warn!("error al cerrar el estado en el backend: {err}");
            }
            match backend.marcar_salida(&user_id).await {
                Ok(resp) => info!(
                    "salida registrada: {}",
                    resp.mensaje.unwrap_or_else(|| "ok".to_string())
                ),
                Err(err) => warn!("error al marcar salida: {err}"),
            }
        });

        linea(&format!(
            "Jornada finalizada. Tiempo por reponer: {}",
            formatear(self.marcaje.registro().tiempo_reponer_seg)
        ));
        self.publicar_estado(Some("end_shift"), None).await;
    }

    async fn cambiar_estado(&mut self, idx: usize) {
        if self.inactividad.disconnected() {
            return;
        }
        if self.marcaje.jornada_cerrada() {
            linea("Tu jornada ya fue finalizada, no puedes cambiar estados");
            return;
        }
        if !self.marcaje.jornada_activa() {
            linea("Debes iniciar jornada primero");
            return;
        }
        let Some(slug) = self
            .marcaje
            .catalogo()
            .seleccionables()
            .get(idx)
            .map(|t| t.slug.clone())
        else {
            return;
        };
        let estado: Estado = slug.parse().unwrap_or(Estado::Custom(slug.clone()));
        if self.marcaje.transicion(estado, Utc::now()).is_err() {
            return;
        }

        let backend = self.backend.clone();
        let user_id = self.identidad.user_id.clone();
        let slug_bg = slug.clone();
        tokio::spawn(async move {
            let transicion = Transicion {
                estado: &slug_bg,
                fin: None,
                finalizando: None,
            };
            if let Err(err) = backend.transicionar(&user_id, &transicion).await {
                // eventual consistency: keep the local state, let the sync
                // resend reconcile observers
                warn!("no se pudo registrar la transición a {slug_bg}: {err}");
            }
        });

        linea(&format!("Estado: {slug}"));
        self.publicar_estado(None, None).await;
    }

    async fn tick(&mut self) {
        if let Some(MarcajeEvento::LimiteSuperado { estado, limite_seg }) =
            self.marcaje.tick(Utc::now())
        {
            beep();
            linea(&format!(
                "Límite superado en {estado} ({})",
                formatear(limite_seg)
            ));
            self.publicar_estado(None, Some(limite_seg)).await;
        }
    }

    async fn chequear_inactividad(&mut self) {
        match self.inactividad.check(Utc::now()) {
            Some(Inactividad::Aviso) => {
                beep();
                linea("Llevas un buen tiempo sin actividad. Si sigues inactivo te desconectaremos.");
            }
            Some(Inactividad::Desconexion) => {
                beep();
                self.marcaje.desconexion_forzada(Utc::now());
                self.publicar_estado(Some("auto_disconnect"), None).await;
                let _ = self.cmd_tx.send(ConnCommand::CloseInactivity).await;
                linea("Te hemos desconectado por inactividad. Pulsa [r] para reconectar.");
            }
            None => {}
        }
    }

    async fn manejar_conexion(&mut self, evento: ConnEvent) {
        match evento {
            ConnEvent::State(state) => {
                self.conn_state = state;
                linea(&format!("Conexión: {}", state.label()));
                if state == ConnState::Connected
                    && self.marcaje.estado_slug() != ESTADO_DESCONECTADO
                {
                    self.publicar_estado(Some("reconnect"), None).await;
                }
            }
            ConnEvent::Inbound(WireMessage::ForcedEstadoChange(forzado)) => {
                linea(&format!(
                    "Tu estado fue actualizado automáticamente a {}",
                    forzado.estado
                ));
                if let Ok(estado) = forzado.estado.parse::<Estado>() {
                    let _ = self.marcaje.transicion(estado, Utc::now());
                }
            }
            ConnEvent::Inbound(WireMessage::Connected(ack)) => info!("{}", ack.message),
            ConnEvent::Inbound(_) => {}
        }
    }

    fn pantalla_ayuda(&self) {
        linea(&format!(
            "Marcador de {} | [i] iniciar jornada, [f] finalizar, [r] reconectar, [q] salir",
            self.identidad.nombre
        ));
        for (n, tipo) in self.marcaje.catalogo().seleccionables().iter().enumerate() {
            linea(&format!("  [{}] {}", n + 1, tipo.nombre));
        }
        if let Some(horario) = &self.horario {
            linea(&format!(
                "Horario de hoy: {} - {}",
                horario.hora_entrada, horario.hora_salida
            ));
        } else {
            linea("No hay horario asignado para hoy");
        }
    }
}

/// Restore an open backend-side status from today, so a restarted marker does
/// not silently desynchronize from the backend's view.
async fn restaurar_estado(backend: &BackendClient, user_id: &str, marcaje: &mut Marcaje) {
    let abierto = match backend.estado_actual(user_id).await {
        Ok(Some(abierto)) => abierto,
        Ok(None) => return,
        Err(err) => {
            warn!("no se pudo consultar el estado actual: {err}");
            return;
        }
    };
    if abierto.estado == ESTADO_DESCONECTADO {
        return;
    }
    let inicio = abierto.inicio.unwrap_or_else(Utc::now);
    if inicio.date_naive() != Local::now().date_naive() {
        info!("estado abierto de otro día, ignorado");
        return;
    }
    if marcaje.iniciar_jornada(inicio).is_ok() {
        if let Ok(estado) = abierto.estado.parse::<Estado>() {
            let _ = marcaje.transicion(estado, inicio);
            info!("estado restaurado del backend: {}", abierto.estado);
        }
    }
}

fn resolve(flag: &str, env_key: &str, default: &str) -> String {
    if !flag.trim().is_empty() {
        return flag.to_string();
    }
    if let Ok(value) = std::env::var(env_key) {
        if !value.trim().is_empty() {
            return value;
        }
    }
    default.to_string()
}

fn formatear(segundos: u64) -> String {
    format!(
        "{:02}:{:02}:{:02}",
        segundos / 3600,
        (segundos % 3600) / 60,
        segundos % 60
    )
}

fn linea(msg: &str) {
    let mut out = std::io::stdout();
    let _ = write!(out, "{msg}\r\n");
    let _ = out.flush();
}

fn beep() {
    let mut out = std::io::stdout();
    let _ = write!(out, "\x07");
    let _ = out.flush();
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
