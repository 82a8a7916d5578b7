//! Assigned-schedule window checks for the shift boundary buttons.
//!
//! The state machine records timestamps only; whether "iniciar" / "finalizar"
//! are allowed right now is decided here, against the schedule the backend
//! assigned for today plus the grace margins.

use chrono::{Duration, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

/// Entry may be marked this long before the scheduled time.
pub fn margen_entrada() -> Duration {
    Duration::minutes(30)
}

/// The marking window stays open this long after the scheduled exit.
pub fn margen_salida() -> Duration {
    Duration::hours(2)
}

/// Today's assigned schedule, as served by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HorarioHoy {
    pub hora_entrada: NaiveTime,
    pub hora_salida: NaiveTime,
}

impl HorarioHoy {
    fn ventana(&self, now: NaiveDateTime) -> (NaiveDateTime, NaiveDateTime) {
        let entrada = now.date().and_time(self.hora_entrada);
        let salida = now.date().and_time(self.hora_salida);
        (entrada - margen_entrada(), salida + margen_salida())
    }

    /// Shift entry is allowed inside the window.
    pub fn puede_iniciar(&self, now: NaiveDateTime) -> bool {
        let (inicio, fin) = self.ventana(now);
        now >= inicio && now <= fin
    }

    /// Shift exit is allowed once the scheduled end has passed.
    pub fn puede_finalizar(&self, now: NaiveDateTime) -> bool {
        now >= now.date().and_time(self.hora_salida)
    }

    /// Human message for the waiting states; `None` when marking is open.
    pub fn mensaje(&self, now: NaiveDateTime) -> Option<String> {
        let (inicio, fin) = self.ventana(now);
        if now < inicio {
            let minutos = ((inicio - now).num_seconds() + 59) / 60;
            return Some(format!("Podrás iniciar en {minutos} minutos"));
        }
        if now > fin {
            return Some("Fuera de la ventana de marcación para hoy".to_string());
        }
        if self.puede_finalizar(now) {
            return Some("Ya es hora de finalizar tu jornada".to_string());
        }
        None
    }
}
