//! Roster table rendering.

use chrono::{NaiveTime, Utc};
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph, Row, Table};
use ratatui::Frame;
use turno_core::punctuality::Puntualidad;
use turno_core::reconnect::ConnState;
use turno_core::ESTADO_DESCONECTADO;

use crate::App;

pub fn draw(frame: &mut Frame, app: &App) {
    let areas = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(1)])
        .split(frame.size());

    draw_header(frame, app, areas[0]);
    draw_roster(frame, app, areas[1]);
}

fn draw_header(frame: &mut Frame, app: &App, area: Rect) {
    let estado_conexion = match app.conn_state {
        ConnState::Connected => Span::styled("conectado", Style::default().fg(Color::Green)),
        ConnState::Connecting | ConnState::Reconnecting => {
            Span::styled("reconectando", Style::default().fg(Color::Yellow))
        }
        ConnState::InactiveDisconnected => {
            Span::styled("desconectado", Style::default().fg(Color::Red))
        }
    };

    let mut spans = vec![
        Span::raw("Hub: "),
        estado_conexion,
        Span::raw(format!("  Asesores: {}", app.roster.len())),
    ];
    for (estado, conteo) in app.roster.conteos() {
        spans.push(Span::raw(format!("  {estado}: {conteo}")));
    }
    if !app.filtro.is_empty() {
        spans.push(Span::styled(
            format!("  filtro: {}", app.filtro),
            Style::default().add_modifier(Modifier::ITALIC),
        ));
    }

    let header = Paragraph::new(Line::from(spans)).block(
        Block::default()
            .borders(Borders::ALL)
            .title("Panel de asistencia"),
    );
    frame.render_widget(header, area);
}

fn draw_roster(frame: &mut Frame, app: &App, area: Rect) {
    let now = Utc::now();
    let rows: Vec<Row> = app
        .roster
        .filtrar(&app.filtro)
        .into_iter()
        .map(|asesor| {
            let hace = asesor
                .last_update
                .map(|t| {
                    let seg = (now - t).num_seconds().max(0);
                    if seg < 60 {
                        format!("hace {seg}s")
                    } else {
                        format!("hace {}m", seg / 60)
                    }
                })
                .unwrap_or_else(|| "-".to_string());

            let puntualidad = app
                .hora_entrada_programada
                .and_then(|hora| app.roster.puntualidad(&asesor.user_id, hora))
                .map(etiqueta_puntualidad)
                .unwrap_or_else(|| "-".to_string());

            Row::new(vec![
                asesor.user_id.clone(),
                asesor.nombre.clone(),
                asesor.area.clone(),
                asesor.estado.clone(),
                hace,
                puntualidad,
            ])
            .style(estilo_estado(&asesor.estado))
        })
        .collect();

    let table = Table::new(
        rows,
        [
            Constraint::Length(8),
            Constraint::Min(20),
            Constraint::Length(14),
            Constraint::Length(16),
            Constraint::Length(10),
            Constraint::Length(14),
        ],
    )
    .header(
        Row::new(vec!["Id", "Nombre", "Área", "Estado", "Visto", "Entrada"])
            .style(Style::default().add_modifier(Modifier::BOLD)),
    )
    .block(Block::default().borders(Borders::ALL).title("Asesores"));

    frame.render_widget(table, area);
}

fn estilo_estado(estado: &str) -> Style {
    match estado {
        "disponible" => Style::default().fg(Color::Green),
        "break" => Style::default().fg(Color::Yellow),
        "almuerzo" => Style::default().fg(Color::Blue),
        ESTADO_DESCONECTADO => Style::default().fg(Color::DarkGray),
        _ => Style::default(),
    }
}

fn etiqueta_puntualidad(p: Puntualidad) -> String {
    match p {
        Puntualidad::ATiempo => "A tiempo".to_string(),
        Puntualidad::Tarde(m) => format!("Tarde +{m}m"),
        Puntualidad::Temprano(m) => format!("Temprano -{m}m"),
    }
}

pub fn hora_programada(texto: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(texto, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(texto, "%H:%M:%S"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hora_programada_accepts_both_formats() {
        assert_eq!(
            hora_programada("08:30"),
            NaiveTime::from_hms_opt(8, 30, 0)
        );
        assert_eq!(
            hora_programada("08:30:00"),
            NaiveTime::from_hms_opt(8, 30, 0)
        );
        assert_eq!(hora_programada("mediodía"), None);
    }

    #[test]
    fn punctuality_labels_carry_the_signed_minutes() {
        assert_eq!(etiqueta_puntualidad(Puntualidad::ATiempo), "A tiempo");
        assert_eq!(etiqueta_puntualidad(Puntualidad::Tarde(7)), "Tarde +7m");
        assert_eq!(
            etiqueta_puntualidad(Puntualidad::Temprano(10)),
            "Temprano -10m"
        );
    }
}
