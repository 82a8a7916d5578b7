//! Punctuality classification against the assigned schedule.

use chrono::{DateTime, Utc};

/// Minutes of slack on either side still counted as on time.
pub const TOLERANCIA_MIN: i64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Puntualidad {
    ATiempo,
    /// Minutes late (positive).
    Tarde(i64),
    /// Minutes early (positive).
    Temprano(i64),
}

impl Puntualidad {
    /// Signed difference in minutes: positive = late, negative = early.
    pub fn minutos(&self) -> i64 {
        match self {
            Puntualidad::ATiempo => 0,
            Puntualidad::Tarde(m) => *m,
            Puntualidad::Temprano(m) => -m,
        }
    }

    pub fn etiqueta(&self) -> &'static str {
        match self {
            Puntualidad::ATiempo => "A tiempo",
            Puntualidad::Tarde(_) => "Tarde",
            Puntualidad::Temprano(_) => "Temprano",
        }
    }
}

/// Classify an actual mark against its scheduled time.
pub fn clasificar(real: DateTime<Utc>, programado: DateTime<Utc>) -> Puntualidad {
    let diff_min = (real - programado).num_seconds() / 60;
    if diff_min.abs() <= TOLERANCIA_MIN {
        Puntualidad::ATiempo
    } else if diff_min > 0 {
        Puntualidad::Tarde(diff_min)
    } else {
        Puntualidad::Temprano(-diff_min)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, m, s).unwrap()
    }

    #[test]
    fn within_tolerance_is_on_time() {
        let scheduled = at(9, 0, 0);
        assert_eq!(clasificar(at(9, 2, 0), scheduled), Puntualidad::ATiempo);
        assert_eq!(clasificar(at(8, 58, 0), scheduled), Puntualidad::ATiempo);
        assert_eq!(clasificar(at(9, 0, 0), scheduled), Puntualidad::ATiempo);
    }

    #[test]
    fn outside_tolerance_is_signed_minutes() {
        let scheduled = at(9, 0, 0);
        assert_eq!(clasificar(at(9, 7, 0), scheduled), Puntualidad::Tarde(7));
        assert_eq!(clasificar(at(8, 50, 0), scheduled), Puntualidad::Temprano(10));
        assert_eq!(clasificar(at(9, 7, 0), scheduled).minutos(), 7);
        assert_eq!(clasificar(at(8, 50, 0), scheduled).minutos(), -10);
    }

    #[test]
    fn sub_minute_lateness_rounds_down() {
        let scheduled = at(9, 0, 0);
        // 2m59s late is still within the 2-minute window once truncated
        assert_eq!(clasificar(at(9, 2, 59), scheduled), Puntualidad::ATiempo);
        assert_eq!(clasificar(at(9, 3, 0), scheduled), Puntualidad::Tarde(3));
    }
}
