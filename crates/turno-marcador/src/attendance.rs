//! Local attendance state machine.
//!
//! Authoritative for what the marker displays and transmits; the backend is
//! reconciled through discrete transition calls and the periodic resend, so a
//! failed call never rolls the local state back.

use chrono::{DateTime, NaiveDate, Utc};
use turno_core::catalog::{Estado, EstadoCatalogo};
use turno_core::{ESTADO_DESCONECTADO, ESTADO_JORNADA_ACTIVA};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EstadoActual {
    /// No open status. Before shift start, after shift end, and after a
    /// forced inactivity disconnect.
    Desconectado,
    /// Shift opened, no status chosen yet.
    JornadaActiva,
    En(Estado),
}

/// One closed-or-open stretch in a single status. The last segment's
/// `fin == None` marks "currently in this status"; at most one segment is
/// open at any time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segmento {
    pub estado: String,
    pub inicio: DateTime<Utc>,
    pub fin: Option<DateTime<Utc>>,
}

/// Client-local projection of the day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistroDia {
    pub fecha: NaiveDate,
    pub hora_entrada: Option<DateTime<Utc>>,
    pub hora_salida: Option<DateTime<Utc>>,
    pub segmentos: Vec<Segmento>,
    /// Accumulated overage the worker still owes, in seconds.
    pub tiempo_reponer_seg: u64,
}

impl RegistroDia {
    fn new(fecha: NaiveDate) -> Self {
        Self {
            fecha,
            hora_entrada: None,
            hora_salida: None,
            segmentos: Vec::new(),
            tiempo_reponer_seg: 0,
        }
    }

    pub fn segmento_abierto(&self) -> Option<&Segmento> {
        self.segmentos.last().filter(|s| s.fin.is_none())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarcajeEvento {
    /// Fired once per limited-state occupancy, the first second over.
    LimiteSuperado { estado: String, limite_seg: u64 },
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MarcajeError {
    #[error("la jornada no ha sido iniciada")]
    JornadaNoIniciada,
    #[error("la jornada ya fue iniciada")]
    JornadaYaIniciada,
    #[error("la jornada ya fue finalizada")]
    JornadaCerrada,
}

pub struct Marcaje {
    estado: EstadoActual,
    jornada_cerrada: bool,
    hora_inicio: Option<DateTime<Utc>>,
    limite_seg: Option<u64>,
    alertado: bool,
    registro: RegistroDia,
    catalogo: EstadoCatalogo,
}

impl Marcaje {
    pub fn new(fecha: NaiveDate, catalogo: EstadoCatalogo) -> Self {
        Self {
            estado: EstadoActual::Desconectado,
            jornada_cerrada: false,
            hora_inicio: None,
            limite_seg: None,
            alertado: false,
            registro: RegistroDia::new(fecha),
            catalogo,
        }
    }

    pub fn estado(&self) -> &EstadoActual {
        &self.estado
    }

    pub fn registro(&self) -> &RegistroDia {
        &self.registro
    }

    pub fn catalogo(&self) -> &EstadoCatalogo {
        &self.catalogo
    }

    pub fn jornada_cerrada(&self) -> bool {
        self.jornada_cerrada
    }

    pub fn jornada_activa(&self) -> bool {
        self.registro.hora_entrada.is_some() && !self.jornada_cerrada
    }

    /// Slug transmitted over the hub for the current state.
    pub fn estado_slug(&self) -> &str {
        match &self.estado {
            EstadoActual::Desconectado => ESTADO_DESCONECTADO,
            EstadoActual::JornadaActiva => ESTADO_JORNADA_ACTIVA,
            EstadoActual::En(estado) => estado.as_slug(),
        }
    }

    pub fn limite_seg(&self) -> Option<u64> {
        self.limite_seg
    }

    /// Seconds elapsed in the current status.
    pub fn tiempo_actual_seg(&self, now: DateTime<Utc>) -> u64 {
        match self.hora_inicio {
            Some(inicio) => (now - inicio).num_seconds().max(0) as u64,
            None => 0,
        }
    }

    pub fn excedente_seg(&self, now: DateTime<Utc>) -> u64 {
        match self.limite_seg {
            Some(limite) => self.tiempo_actual_seg(now).saturating_sub(limite),
            None => 0,
        }
    }

    /// Shift entry. Eligibility against the assigned schedule window is the
    /// caller's job; this only records the timestamp.
    pub fn iniciar_jornada(&mut self, now: DateTime<Utc>) -> Result<(), MarcajeError> {
        if self.jornada_cerrada {
            return Err(MarcajeError::JornadaCerrada);
        }
        if self.registro.hora_entrada.is_some() {
            return Err(MarcajeError::JornadaYaIniciada);
        }
        self.registro.hora_entrada = Some(now);
        self.estado = EstadoActual::JornadaActiva;
        Ok(())
    }

    /// Enter a status. Closes the open segment at `now` (no gap, no overlap),
    /// accumulates any overage from the segment being left, and resets the
    /// elapsed counter and alert latch for the new occupancy.
    pub fn transicion(&mut self, estado: Estado, now: DateTime<Utc>) -> Result<(), MarcajeError> {
        if self.jornada_cerrada {
            return Err(MarcajeError::JornadaCerrada);
        }
        if self.registro.hora_entrada.is_none() {
            return Err(MarcajeError::JornadaNoIniciada);
        }
        if self.estado == EstadoActual::En(estado.clone()) {
            return Ok(());
        }

        self.cerrar_segmento(now);
        self.registro.segmentos.push(Segmento {
            estado: estado.as_slug().to_string(),
            inicio: now,
            fin: None,
        });
        self.limite_seg = self.catalogo.limite_efectivo_seg(estado.as_slug());
        self.hora_inicio = Some(now);
        self.alertado = false;
        self.estado = EstadoActual::En(estado);
        Ok(())
    }

    /// Shift exit: closes whatever is open, settles overage, and makes the
    /// day terminal.
    pub fn finalizar_jornada(&mut self, now: DateTime<Utc>) -> Result<(), MarcajeError> {
        if self.jornada_cerrada {
            return Err(MarcajeError::JornadaCerrada);
        }
        if self.registro.hora_entrada.is_none() {
            return Err(MarcajeError::JornadaNoIniciada);
        }
        self.cerrar_segmento(now);
        self.registro.hora_salida = Some(now);
        self.jornada_cerrada = true;
        self.estado = EstadoActual::Desconectado;
        Ok(())
    }

    /// Inactivity-forced disconnect: the shift stays open so the worker can
    /// resume after a manual reconnect, but no status remains active.
    pub fn desconexion_forzada(&mut self, now: DateTime<Utc>) {
        self.cerrar_segmento(now);
        self.estado = EstadoActual::Desconectado;
    }

    /// Per-second recomputation of the overage edge. Returns the alert event
    /// exactly once per limited-state occupancy.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Option<MarcajeEvento> {
        let limite = self.limite_seg?;
        if self.alertado || self.excedente_seg(now) == 0 {
            return None;
        }
        self.alertado = true;
        Some(MarcajeEvento::LimiteSuperado {
            estado: self.estado_slug().to_string(),
            limite_seg: limite,
        })
    }

    fn cerrar_segmento(&mut self, now: DateTime<Utc>) {
        self.registro.tiempo_reponer_seg += self.excedente_seg(now);
        if let Some(segmento) = self.registro.segmentos.last_mut() {
            if segmento.fin.is_none() {
                segmento.fin = Some(now);
            }
        }
        self.hora_inicio = None;
        self.limite_seg = None;
        self.alertado = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use turno_core::catalog::{EstadoConfigAsesor, EstadoTipo};

    fn catalogo() -> EstadoCatalogo {
        EstadoCatalogo {
            tipos: vec![
                EstadoTipo {
                    id: Some(1),
                    slug: "disponible".into(),
                    nombre: "Disponible".into(),
                    color_hex: "#10b981".into(),
                    orden: 1,
                    activo: true,
                    limite_minutos_default: None,
                },
                EstadoTipo {
                    id: Some(2),
                    slug: "break".into(),
                    nombre: "Break".into(),
                    color_hex: "#f59e0b".into(),
                    orden: 2,
                    activo: true,
                    limite_minutos_default: Some(10),
                },
            ],
            configs: Vec::new(),
        }
    }

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, m, s).unwrap()
    }

    fn dia() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
    }

    #[test]
    fn statuses_require_an_open_shift() {
        let mut m = Marcaje::new(dia(), catalogo());
        assert_eq!(
            m.transicion(Estado::Disponible, at(9, 0, 0)),
            Err(MarcajeError::JornadaNoIniciada)
        );
        m.iniciar_jornada(at(9, 0, 0)).unwrap();
        assert_eq!(m.estado_slug(), "jornada_activa");
        assert_eq!(
            m.iniciar_jornada(at(9, 1, 0)),
            Err(MarcajeError::JornadaYaIniciada)
        );
    }

    #[test]
    fn first_status_from_shift_active_opens_a_segment() {
        let mut m = Marcaje::new(dia(), catalogo());
        m.iniciar_jornada(at(9, 0, 0)).unwrap();
        m.transicion(Estado::Disponible, at(9, 0, 30)).unwrap();
        assert_eq!(m.estado_slug(), "disponible");
        assert_eq!(m.registro().segmentos.len(), 1);
        assert!(m.registro().segmento_abierto().is_some());
        assert_eq!(m.tiempo_actual_seg(at(9, 1, 30)), 60);
    }

    #[test]
    fn transitions_close_the_previous_segment_without_gap() {
        let mut m = Marcaje::new(dia(), catalogo());
        m.iniciar_jornada(at(9, 0, 0)).unwrap();
        m.transicion(Estado::Disponible, at(9, 0, 0)).unwrap();
        m.transicion(Estado::Break, at(9, 5, 0)).unwrap();
        m.transicion(Estado::Disponible, at(9, 20, 0)).unwrap();

        let segmentos = &m.registro().segmentos;
        assert_eq!(segmentos.len(), 3);
        assert_eq!(segmentos[0].fin, Some(segmentos[1].inicio));
        assert_eq!(segmentos[1].fin, Some(segmentos[2].inicio));
        assert!(segmentos[2].fin.is_none());
    }

    #[test]
    fn same_status_transition_is_a_no_op() {
        let mut m = Marcaje::new(dia(), catalogo());
        m.iniciar_jornada(at(9, 0, 0)).unwrap();
        m.transicion(Estado::Break, at(9, 0, 0)).unwrap();
        m.transicion(Estado::Break, at(9, 3, 0)).unwrap();
        assert_eq!(m.registro().segmentos.len(), 1);
        // elapsed keeps counting from the original entry
        assert_eq!(m.tiempo_actual_seg(at(9, 4, 0)), 240);
    }

    #[test]
    fn overage_formula_and_single_alert_per_occupancy() {
        let mut m = Marcaje::new(dia(), catalogo());
        m.iniciar_jornada(at(9, 0, 0)).unwrap();
        m.transicion(Estado::Break, at(9, 0, 0)).unwrap();
        assert_eq!(m.limite_seg(), Some(600));

        // under the limit: no overage, no alert
        assert_eq!(m.excedente_seg(at(9, 9, 59)), 0);
        assert!(m.tick(at(9, 9, 59)).is_none());

        // first second over: one alert
        assert_eq!(m.excedente_seg(at(9, 10, 1)), 1);
        assert_eq!(
            m.tick(at(9, 10, 1)),
            Some(MarcajeEvento::LimiteSuperado {
                estado: "break".into(),
                limite_seg: 600,
            })
        );
        // subsequent ticks stay quiet
        assert!(m.tick(at(9, 10, 2)).is_none());
        assert!(m.tick(at(9, 30, 0)).is_none());

        // a fresh occupancy re-arms the latch
        m.transicion(Estado::Disponible, at(9, 30, 0)).unwrap();
        m.transicion(Estado::Break, at(10, 0, 0)).unwrap();
        assert!(m.tick(at(10, 10, 1)).is_some());
    }

    #[test]
    fn leaving_an_over_limit_state_accumulates_make_up_time() {
        // break limited to 10 min, occupied 09:05 -> 09:20 = 5 min over
        let mut m = Marcaje::new(dia(), catalogo());
        m.iniciar_jornada(at(9, 0, 0)).unwrap();
        m.transicion(Estado::Disponible, at(9, 0, 0)).unwrap();
        m.transicion(Estado::Break, at(9, 5, 0)).unwrap();
        m.transicion(Estado::Disponible, at(9, 20, 0)).unwrap();
        assert_eq!(m.registro().tiempo_reponer_seg, 300);
    }

    #[test]
    fn ending_the_shift_while_over_limit_settles_the_overage() {
        let mut m = Marcaje::new(dia(), catalogo());
        m.iniciar_jornada(at(9, 0, 0)).unwrap();
        m.transicion(Estado::Break, at(9, 0, 0)).unwrap();
        m.finalizar_jornada(at(9, 12, 0)).unwrap();
        assert_eq!(m.registro().tiempo_reponer_seg, 120);
        assert!(m.jornada_cerrada());
        assert_eq!(m.estado_slug(), "desconectado");
        assert_eq!(
            m.transicion(Estado::Disponible, at(9, 13, 0)),
            Err(MarcajeError::JornadaCerrada)
        );
    }

    #[test]
    fn under_limit_occupancy_owes_nothing() {
        let mut m = Marcaje::new(dia(), catalogo());
        m.iniciar_jornada(at(9, 0, 0)).unwrap();
        m.transicion(Estado::Break, at(9, 0, 0)).unwrap();
        m.transicion(Estado::Disponible, at(9, 8, 0)).unwrap();
        assert_eq!(m.registro().tiempo_reponer_seg, 0);
    }

    #[test]
    fn completed_day_has_no_open_segments_and_contiguous_interior() {
        let mut m = Marcaje::new(dia(), catalogo());
        m.iniciar_jornada(at(9, 0, 0)).unwrap();
        m.transicion(Estado::Disponible, at(9, 0, 10)).unwrap();
        m.transicion(Estado::Break, at(10, 0, 0)).unwrap();
        m.transicion(Estado::Disponible, at(10, 9, 0)).unwrap();
        m.finalizar_jornada(at(17, 0, 0)).unwrap();

        let registro = m.registro();
        assert!(registro.segmento_abierto().is_none());
        for pair in registro.segmentos.windows(2) {
            assert_eq!(pair[0].fin, Some(pair[1].inicio));
        }
        assert_eq!(
            registro.segmentos.last().unwrap().fin,
            registro.hora_salida
        );
    }

    #[test]
    fn forced_disconnect_keeps_the_shift_open() {
        let mut m = Marcaje::new(dia(), catalogo());
        m.iniciar_jornada(at(9, 0, 0)).unwrap();
        m.transicion(Estado::Disponible, at(9, 0, 0)).unwrap();
        m.desconexion_forzada(at(10, 0, 0));

        assert_eq!(m.estado_slug(), "desconectado");
        assert!(!m.jornada_cerrada());
        assert!(m.registro().segmento_abierto().is_none());
        // after a manual reconnect the worker can resume statuses
        m.transicion(Estado::Disponible, at(10, 5, 0)).unwrap();
        assert_eq!(m.estado_slug(), "disponible");
    }

    #[test]
    fn overage_uses_the_advisor_override_limit() {
        let mut cat = catalogo();
        cat.configs.push(EstadoConfigAsesor {
            estado_slug: "break".into(),
            activo: true,
            limite_minutos: Some(5),
            color_hex_override: None,
        });
        let mut m = Marcaje::new(dia(), cat);
        m.iniciar_jornada(at(9, 0, 0)).unwrap();
        m.transicion(Estado::Break, at(9, 0, 0)).unwrap();
        assert_eq!(m.limite_seg(), Some(300));
    }
}
