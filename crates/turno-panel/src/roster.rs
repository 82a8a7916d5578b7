//! Live roster maintained from hub broadcasts.
//!
//! `all_status` replaces the whole map; `estado_cambio` / `user_connected`
//! upsert and `user_disconnected` deletes. Derived views (counts, filters,
//! punctuality) are recomputed from the map on demand rather than maintained
//! incrementally, so they cannot drift from it.

use chrono::{DateTime, NaiveTime, TimeZone, Utc};
use std::collections::BTreeMap;
use turno_core::protocol::{WireMessage, WorkerSnapshot};
use turno_core::punctuality::{clasificar, Puntualidad};
use turno_core::ESTADO_DESCONECTADO;

#[derive(Debug, Clone, PartialEq)]
pub struct RegistroAsesor {
    pub user_id: String,
    pub nombre: String,
    pub cargo: String,
    pub area: String,
    pub estado: String,
    pub last_update: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
pub struct Roster {
    asesores: BTreeMap<String, RegistroAsesor>,
    /// Earliest moment each advisor was seen outside `desconectado` today;
    /// stands in as the observed shift start for punctuality.
    entradas: BTreeMap<String, DateTime<Utc>>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn asesores(&self) -> impl Iterator<Item = &RegistroAsesor> {
        self.asesores.values()
    }

    pub fn len(&self) -> usize {
        self.asesores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.asesores.is_empty()
    }

    pub fn get(&self, user_id: &str) -> Option<&RegistroAsesor> {
        self.asesores.get(user_id)
    }

    pub fn entrada_observada(&self, user_id: &str) -> Option<DateTime<Utc>> {
        self.entradas.get(user_id).copied()
    }

    /// Feed one hub broadcast into the map. Returns true when the roster
    /// changed and the derived views should be re-rendered.
    pub fn apply(&mut self, msg: &WireMessage) -> bool {
        match msg {
            WireMessage::AllStatus(all) => {
                self.asesores = all
                    .users
                    .iter()
                    .map(|u| (u.user_id.clone(), registro_de(u)))
                    .collect();
                for user in &all.users {
                    self.observar_entrada(&user.user_id, &user.estado, Some(user.last_update));
                }
                true
            }
            WireMessage::EstadoCambio(cambio) => {
                let entry = self
                    .asesores
                    .entry(cambio.user_id.clone())
                    .or_insert_with(|| RegistroAsesor {
                        user_id: cambio.user_id.clone(),
                        nombre: cambio.nombre.clone(),
                        cargo: cambio.cargo.clone(),
                        area: cambio.area.clone(),
                        estado: ESTADO_DESCONECTADO.to_string(),
                        last_update: None,
                    });
                if !cambio.nombre.is_empty() {
                    entry.nombre = cambio.nombre.clone();
                }
                entry.estado = cambio.estado.as_str().to_string();
                entry.last_update = cambio.timestamp;
                let estado = cambio.estado.as_str().to_string();
                let user_id = cambio.user_id.clone();
                self.observar_entrada(&user_id, &estado, cambio.timestamp);
                true
            }
            WireMessage::UserConnected(user) => {
                self.asesores.insert(
                    user.user_id.clone(),
                    RegistroAsesor {
                        user_id: user.user_id.clone(),
                        nombre: user.nombre.clone(),
                        cargo: user.cargo.clone(),
                        area: user.area.clone(),
                        estado: ESTADO_DESCONECTADO.to_string(),
                        last_update: Some(Utc::now()),
                    },
                );
                true
            }
            WireMessage::UserDisconnected(user) => self.asesores.remove(&user.user_id).is_some(),
            _ => false,
        }
    }

    fn observar_entrada(&mut self, user_id: &str, estado: &str, at: Option<DateTime<Utc>>) {
        if estado == ESTADO_DESCONECTADO {
            return;
        }
        let at = at.unwrap_or_else(Utc::now);
        self.entradas
            .entry(user_id.to_string())
            .and_modify(|primero| {
                if at < *primero {
                    *primero = at;
                }
            })
            .or_insert(at);
    }

    /// Per-status totals, recomputed from scratch on every call.
    pub fn conteos(&self) -> BTreeMap<String, usize> {
        let mut conteos = BTreeMap::new();
        for asesor in self.asesores.values() {
            *conteos.entry(asesor.estado.clone()).or_insert(0) += 1;
        }
        conteos
    }

    /// Case-insensitive filter over name, area and status.
    pub fn filtrar(&self, texto: &str) -> Vec<&RegistroAsesor> {
        let needle = texto.trim().to_lowercase();
        self.asesores
            .values()
            .filter(|a| {
                needle.is_empty()
                    || a.nombre.to_lowercase().contains(&needle)
                    || a.area.to_lowercase().contains(&needle)
                    || a.estado.to_lowercase().contains(&needle)
            })
            .collect()
    }

    /// Observed shift start against the scheduled entry time, ±2 min counted
    /// as on time.
    pub fn puntualidad(&self, user_id: &str, programado: NaiveTime) -> Option<Puntualidad> {
        let entrada = self.entrada_observada(user_id)?;
        let programado = Utc
            .from_local_datetime(&entrada.date_naive().and_time(programado))
            .single()?;
        Some(clasificar(entrada, programado))
    }
}

fn registro_de(user: &WorkerSnapshot) -> RegistroAsesor {
    RegistroAsesor {
        user_id: user.user_id.clone(),
        nombre: user.nombre.clone(),
        cargo: user.cargo.clone(),
        area: user.area.clone(),
        estado: user.estado.clone(),
        last_update: Some(user.last_update),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use turno_core::protocol::{AllStatus, EstadoAlias, EstadoCambio, UserConnected, UserDisconnected};

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, m, 0).unwrap()
    }

    fn snapshot(user_id: &str, estado: &str) -> WorkerSnapshot {
        WorkerSnapshot {
            user_id: user_id.to_string(),
            nombre: format!("Asesor {user_id}"),
            cargo: "Asesor".to_string(),
            area: "Ventas".to_string(),
            estado: estado.to_string(),
            last_update: at(9, 0),
        }
    }

    fn cambio(user_id: &str, estado: &str, ts: DateTime<Utc>) -> WireMessage {
        WireMessage::EstadoCambio(EstadoCambio {
            user_id: user_id.to_string(),
            nombre: format!("Asesor {user_id}"),
            cargo: "Asesor".to_string(),
            area: "Ventas".to_string(),
            estado: EstadoAlias::new(estado),
            timestamp: Some(ts),
            origen: None,
            limite_segundos: None,
        })
    }

    #[test]
    fn all_status_replaces_the_whole_map() {
        let mut roster = Roster::new();
        roster.apply(&cambio("1", "break", at(9, 0)));
        roster.apply(&cambio("2", "disponible", at(9, 0)));

        let replace = WireMessage::AllStatus(AllStatus {
            users: vec![snapshot("42", "disponible")],
        });
        assert!(roster.apply(&replace));
        assert_eq!(roster.len(), 1);
        assert_eq!(roster.get("42").unwrap().estado, "disponible");
        assert!(roster.get("1").is_none());
    }

    #[test]
    fn estado_cambio_upserts_unknown_workers() {
        let mut roster = Roster::new();
        assert!(roster.apply(&cambio("7", "prueba", at(10, 0))));
        let asesor = roster.get("7").unwrap();
        assert_eq!(asesor.estado, "prueba");
        assert_eq!(asesor.last_update, Some(at(10, 0)));
    }

    #[test]
    fn connect_and_disconnect_round_trip() {
        let mut roster = Roster::new();
        roster.apply(&WireMessage::UserConnected(UserConnected {
            user_id: "5".into(),
            nombre: "Eva".into(),
            cargo: "Asesor".into(),
            area: "Soporte".into(),
        }));
        assert_eq!(roster.get("5").unwrap().estado, ESTADO_DESCONECTADO);

        assert!(roster.apply(&WireMessage::UserDisconnected(UserDisconnected {
            user_id: "5".into(),
            nombre: None,
        })));
        assert!(roster.is_empty());
        // deleting again reports no change
        assert!(!roster.apply(&WireMessage::UserDisconnected(UserDisconnected {
            user_id: "5".into(),
            nombre: None,
        })));
    }

    #[test]
    fn counts_are_recomputed_per_mutation() {
        let mut roster = Roster::new();
        roster.apply(&cambio("1", "disponible", at(9, 0)));
        roster.apply(&cambio("2", "disponible", at(9, 0)));
        roster.apply(&cambio("3", "break", at(9, 0)));
        assert_eq!(roster.conteos().get("disponible"), Some(&2));
        assert_eq!(roster.conteos().get("break"), Some(&1));

        roster.apply(&cambio("2", "break", at(9, 30)));
        assert_eq!(roster.conteos().get("disponible"), Some(&1));
        assert_eq!(roster.conteos().get("break"), Some(&2));
    }

    #[test]
    fn rebuilt_roster_matches_a_fresh_snapshot() {
        // leader disconnects and reconnects: the fresh all_status must leave
        // the roster equal to the hub registry
        let mut roster = Roster::new();
        roster.apply(&cambio("42", "disponible", at(9, 0)));
        roster.apply(&cambio("42", "break", at(10, 0)));

        let mut rebuilt = Roster::new();
        rebuilt.apply(&WireMessage::AllStatus(AllStatus {
            users: vec![snapshot("42", "break")],
        }));
        assert_eq!(roster.get("42").unwrap().estado, rebuilt.get("42").unwrap().estado);
        assert_eq!(rebuilt.len(), 1);
    }

    #[test]
    fn filter_matches_name_area_and_status() {
        let mut roster = Roster::new();
        roster.apply(&cambio("1", "break", at(9, 0)));
        roster.apply(&cambio("2", "disponible", at(9, 0)));
        assert_eq!(roster.filtrar("break").len(), 1);
        assert_eq!(roster.filtrar("ventas").len(), 2);
        assert_eq!(roster.filtrar("asesor 2").len(), 1);
        assert_eq!(roster.filtrar("").len(), 2);
    }

    #[test]
    fn punctuality_uses_the_first_active_sighting() {
        let mut roster = Roster::new();
        roster.apply(&cambio("1", "jornada_activa", at(9, 7)));
        roster.apply(&cambio("1", "disponible", at(9, 20)));

        let programado = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
        assert_eq!(
            roster.puntualidad("1", programado),
            Some(Puntualidad::Tarde(7))
        );

        let temprano = NaiveTime::from_hms_opt(9, 8, 0).unwrap();
        assert_eq!(roster.puntualidad("1", temprano), Some(Puntualidad::ATiempo));
        assert!(roster.puntualidad("desconocido", programado).is_none());
    }
}
