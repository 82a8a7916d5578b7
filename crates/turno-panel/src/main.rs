mod conn;
mod roster;
mod ui;

use chrono::NaiveTime;
use clap::Parser;
use conn::{ConnConfig, ConnEvent};
use crossterm::event::{Event, EventStream, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use futures_util::StreamExt;
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;
use roster::Roster;
use std::io::stdout;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::warn;
use tracing_subscriber::EnvFilter;
use turno_core::reconnect::{ConnState, ReconnectPolicy};
use url::Url;

#[derive(Parser, Debug)]
#[command(name = "turno-panel", about = "Panel de monitoreo de asistencia en tiempo real")]
struct Args {
    /// Leader id; falls back to TURNO_USER_ID
    #[arg(long, default_value = "")]
    user_id: String,
    #[arg(long, default_value = "")]
    nombre: String,
    #[arg(long, default_value = "Líder")]
    cargo: String,
    /// Hub URL; falls back to TURNO_HUB_URL, then ws://127.0.0.1:3001/ws
    #[arg(long, default_value = "")]
    hub_url: String,
    #[arg(long, default_value_t = 30)]
    heartbeat_seconds: u64,
    #[arg(long, default_value_t = 1000)]
    reconnect_base_ms: u64,
    #[arg(long, default_value_t = 30000)]
    reconnect_max_ms: u64,
    /// Scheduled entry time (HH:MM) used for the punctuality column
    #[arg(long, default_value = "")]
    hora_entrada: String,
}

pub struct App {
    pub roster: Roster,
    pub conn_state: ConnState,
    pub filtro: String,
    pub hora_entrada_programada: Option<NaiveTime>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging();

    let leader_id = resolve(&args.user_id, "TURNO_USER_ID", "");
    if leader_id.is_empty() {
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

    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
    let (event_tx, mut event_rx) = mpsc::channel::<ConnEvent>(256);
    let conn_cfg = ConnConfig {
        hub_url,
        leader_id,
        nombre: resolve(&args.nombre, "TURNO_NOMBRE", "Líder"),
        cargo: args.cargo.clone(),
        policy: ReconnectPolicy::new(
            Duration::from_millis(args.reconnect_base_ms),
            Duration::from_millis(args.reconnect_max_ms),
        ),
        connect_timeout: Duration::from_secs(10),
        heartbeat: Duration::from_secs(args.heartbeat_seconds),
    };
    let conn_task = tokio::spawn(conn::hub_loop(conn_cfg, shutdown_rx, event_tx));

    let mut app = App {
        roster: Roster::new(),
        conn_state: ConnState::Connecting,
        filtro: String::new(),
        hora_entrada_programada: ui::hora_programada(&args.hora_entrada),
    };

    if enable_raw_mode().is_err() || execute!(stdout(), EnterAlternateScreen).is_err() {
        eprintln!("no se pudo preparar la terminal");
        std::process::exit(1);
    }
    let mut terminal = match Terminal::new(CrosstermBackend::new(stdout())) {
        Ok(terminal) => terminal,
        Err(err) => {
            let _ = disable_raw_mode();
            eprintln!("no se pudo preparar la terminal: {err}");
            std::process::exit(1);
        }
    };

    let mut input = EventStream::new();
    let mut refresco = tokio::time::interval(Duration::from_millis(500));

    loop {
        if let Err(err) = terminal.draw(|frame| ui::draw(frame, &app)) {
            warn!("error dibujando: {err}");
            break;
        }

        tokio::select! {
            evento = input.next() => match evento {
                Some(Ok(Event::Key(key))) if key.kind == KeyEventKind::Press => {
                    match key.code {
                        KeyCode::Esc => {
                            if app.filtro.is_empty() {
                                break;
                            }
                            app.filtro.clear();
                        }
                        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => break,
                        KeyCode::Char('q') if app.filtro.is_empty() => break,
                        KeyCode::Char(c) => app.filtro.push(c),
                        KeyCode::Backspace => {
                            app.filtro.pop();
                        }
                        _ => {}
                    }
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    warn!("error de terminal: {err}");
                    break;
                }
                None => break,
            },
            evento = event_rx.recv() => match evento {
                Some(ConnEvent::State(state)) => app.conn_state = state,
                Some(ConnEvent::Inbound(msg)) => {
                    app.roster.apply(&msg);
                }
                None => break,
            },
            _ = refresco.tick() => {}
        }
    }

    let _ = shutdown_tx.send(()).await;
    let _ = conn_task.await;
    let _ = execute!(stdout(), LeaveAlternateScreen);
    let _ = disable_raw_mode();
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

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
