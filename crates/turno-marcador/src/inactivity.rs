//! User-inactivity watchdog.
//!
//! Tracks real input only; network traffic never counts, so a healthy
//! socket under an idle user still times out. Checked once a minute against
//! a warning threshold and a hard threshold; past the hard threshold the
//! connection is closed with the reserved code and only an explicit user
//! action re-arms the monitor.

use chrono::{DateTime, Duration, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inactividad {
    /// Non-blocking heads-up, fired once per idle stretch.
    Aviso,
    /// Hard timeout: force the logical disconnect.
    Desconexion,
}

#[derive(Debug)]
pub struct InactivityMonitor {
    last_activity: DateTime<Utc>,
    warn_after: Duration,
    hard_after: Duration,
    warned: bool,
    disconnected: bool,
}

impl InactivityMonitor {
    pub fn new(now: DateTime<Utc>, warn_after: Duration, hard_after: Duration) -> Self {
        Self {
            last_activity: now,
            warn_after,
            hard_after,
            warned: false,
            disconnected: false,
        }
    }

    /// Real input happened (key press, pointer, touch).
    pub fn record_activity(&mut self, now: DateTime<Utc>) {
        self.last_activity = now;
        // activity clears a pending warning, but never a disconnect; that
        // requires the explicit reconnect action
        if !self.disconnected {
            self.warned = false;
        }
    }

    /// Explicit user reconnect: restart the clock from scratch.
    pub fn reset(&mut self, now: DateTime<Utc>) {
        self.last_activity = now;
        self.warned = false;
        self.disconnected = false;
    }

    pub fn idle(&self, now: DateTime<Utc>) -> Duration {
        now - self.last_activity
    }

    pub fn disconnected(&self) -> bool {
        self.disconnected
    }

    /// Periodic check. At most one event per call; each fires once per idle
    /// stretch, not once per tick.
    pub fn check(&mut self, now: DateTime<Utc>) -> Option<Inactividad> {
        if self.disconnected {
            return None;
        }
        let idle = self.idle(now);
        if idle >= self.hard_after {
            self.disconnected = true;
            return Some(Inactividad::Desconexion);
        }
        if idle >= self.warn_after && !self.warned {
            self.warned = true;
            return Some(Inactividad::Aviso);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, m, 0).unwrap()
    }

    fn monitor() -> InactivityMonitor {
        InactivityMonitor::new(at(9, 0), Duration::minutes(55), Duration::minutes(60))
    }

    #[test]
    fn quiet_until_warning_threshold() {
        let mut mon = monitor();
        for minutos in [1u32, 30, 54] {
            assert_eq!(mon.check(at(9, minutos)), None);
        }
    }

    #[test]
    fn warning_fires_once_per_idle_stretch() {
        let mut mon = monitor();
        assert_eq!(mon.check(at(9, 55)), Some(Inactividad::Aviso));
        assert_eq!(mon.check(at(9, 56)), None);
        assert_eq!(mon.check(at(9, 57)), None);

        // activity re-arms the warning
        mon.record_activity(at(9, 58));
        assert_eq!(mon.check(at(9, 59)), None);
        assert_eq!(mon.check(at(10, 53)), Some(Inactividad::Aviso));
    }

    #[test]
    fn sixty_one_idle_minutes_forces_the_disconnect_once() {
        let mut mon = monitor();
        assert_eq!(mon.check(at(9, 55)), Some(Inactividad::Aviso));
        assert_eq!(mon.check(at(10, 1)), Some(Inactividad::Desconexion));
        assert!(mon.disconnected());
        // later ticks stay silent, and plain activity does not clear it
        mon.record_activity(at(10, 2));
        assert_eq!(mon.check(at(11, 30)), None);
        assert!(mon.disconnected());
    }

    #[test]
    fn reset_clears_the_disconnect() {
        let mut mon = monitor();
        assert_eq!(mon.check(at(10, 0)), Some(Inactividad::Desconexion));
        mon.reset(at(10, 5));
        assert!(!mon.disconnected());
        assert_eq!(mon.check(at(10, 6)), None);
        assert_eq!(mon.check(at(11, 0)), Some(Inactividad::Aviso));
    }

    #[test]
    fn activity_keeps_the_monitor_quiet() {
        let mut mon = monitor();
        let mut reloj = at(9, 0);
        for _ in 0..10 {
            reloj += Duration::minutes(50);
            mon.record_activity(reloj);
            assert_eq!(mon.check(reloj + Duration::minutes(1)), None);
        }
    }
}
