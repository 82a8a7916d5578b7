//! Wire protocol for the presence hub.
//!
//! Every frame is a JSON object over a text WebSocket frame, discriminated by
//! its `type` field. Worker and leader clients share the same envelope; the
//! hub relays status slugs verbatim without validating them against the
//! catalog, so `estado` stays an opaque string at this boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Close code reserved for "disconnected due to user inactivity". A client
/// that sees this code on close must not auto-reconnect.
pub const CIERRE_INACTIVIDAD: u16 = 4001;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid frame: {0}")]
    Invalid(#[from] serde_json::Error),
}

/// All message types that travel over the hub socket, either direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireMessage {
    Identify(Identify),
    IdentifyLeader(IdentifyLeader),
    EstadoCambio(EstadoCambio),
    RequestAllStatus,
    Ping(Ping),
    Pong(Pong),
    Connected(Ack),
    LeaderConnected(Ack),
    AllStatus(AllStatus),
    UserConnected(UserConnected),
    UserDisconnected(UserDisconnected),
    ForcedEstadoChange(ForcedEstadoChange),
}

impl WireMessage {
    pub fn from_json(raw: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("wire message serializes")
    }
}

/// Worker registration. The hub answers with `connected` and seeds the
/// worker's status as `desconectado` until the first `estado_cambio`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identify {
    #[serde(rename = "userId", deserialize_with = "de_id")]
    pub user_id: String,
    #[serde(default)]
    pub nombre: String,
    #[serde(default)]
    pub cargo: String,
    #[serde(default)]
    pub area: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentifyLeader {
    #[serde(rename = "userId", deserialize_with = "de_id")]
    pub user_id: String,
    #[serde(default)]
    pub nombre: String,
    #[serde(default)]
    pub cargo: String,
}

/// Status transition, sent by workers and relayed verbatim to leaders.
///
/// `limite_segundos` rides along when the transition reports a limit overage;
/// `origen` tags automatic sends (`sync_interval`, `reconnect`,
/// `auto_disconnect`) apart from user-driven ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstadoCambio {
    #[serde(rename = "userId", deserialize_with = "de_id")]
    pub user_id: String,
    #[serde(default)]
    pub nombre: String,
    #[serde(default)]
    pub cargo: String,
    #[serde(default)]
    pub area: String,
    #[serde(flatten)]
    pub estado: EstadoAlias,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origen: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limite_segundos: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ping {
    #[serde(
        rename = "userId",
        default,
        deserialize_with = "de_opt_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pong {
    #[serde(rename = "serverTime")]
    pub server_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ack {
    pub message: String,
}

/// Full registry snapshot, sent only to the leader that requested it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllStatus {
    pub users: Vec<WorkerSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerSnapshot {
    #[serde(rename = "userId", deserialize_with = "de_id")]
    pub user_id: String,
    pub nombre: String,
    pub cargo: String,
    pub area: String,
    pub estado: String,
    #[serde(rename = "lastUpdate")]
    pub last_update: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserConnected {
    #[serde(rename = "userId", deserialize_with = "de_id")]
    pub user_id: String,
    #[serde(default)]
    pub nombre: String,
    #[serde(default)]
    pub cargo: String,
    #[serde(default)]
    pub area: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserDisconnected {
    #[serde(rename = "userId", deserialize_with = "de_id")]
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nombre: Option<String>,
}

/// Pushed to a worker when a status is set on its behalf over the REST API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForcedEstadoChange {
    pub estado: String,
}

/// Canonical status slug plus its legacy aliased keys.
///
/// Older consumers read the slug from any of `estado`, `nuevo_estado`,
/// `estado_slug`, `estado_actual` or `estado_actual_slug`, so we emit all five
/// and accept whichever is present (first in that order wins). Everything
/// above the wire sees a single `String`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EstadoAlias(pub String);

impl EstadoAlias {
    pub fn new(slug: impl Into<String>) -> Self {
        Self(slug.into().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Serialize, Deserialize, Default)]
struct EstadoAliasShadow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    estado: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    nuevo_estado: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    estado_slug: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    estado_actual: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    estado_actual_slug: Option<String>,
}

impl Serialize for EstadoAlias {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let slug = Some(self.0.clone());
        EstadoAliasShadow {
            estado: slug.clone(),
            nuevo_estado: slug.clone(),
            estado_slug: slug.clone(),
            estado_actual: slug.clone(),
            estado_actual_slug: slug,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for EstadoAlias {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let shadow = EstadoAliasShadow::deserialize(deserializer)?;
        let slug = shadow
            .estado
            .or(shadow.nuevo_estado)
            .or(shadow.estado_slug)
            .or(shadow.estado_actual)
            .or(shadow.estado_actual_slug)
            .ok_or_else(|| serde::de::Error::missing_field("estado"))?;
        Ok(EstadoAlias(slug.to_lowercase()))
    }
}

/// Accept an id sent as either a JSON string or a number.
fn de_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        _ => Err(serde::de::Error::custom("expected string or number for id")),
    }
}

fn de_opt_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        _ => Err(serde::de::Error::custom("expected string or number for id")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identify_round_trip() {
        let raw = r#"{"type":"identify","userId":42,"nombre":"Ana","cargo":"Asesor","area":"Ventas","timestamp":"2024-03-01T09:00:00Z"}"#;
        let msg = WireMessage::from_json(raw).unwrap();
        match &msg {
            WireMessage::Identify(id) => {
                assert_eq!(id.user_id, "42");
                assert_eq!(id.nombre, "Ana");
            }
            other => panic!("unexpected message: {other:?}"),
        }
        let again = WireMessage::from_json(&msg.to_json()).unwrap();
        assert_eq!(msg, again);
    }

    #[test]
    fn estado_cambio_reads_any_alias() {
        for key in [
            "estado",
            "nuevo_estado",
            "estado_slug",
            "estado_actual",
            "estado_actual_slug",
        ] {
            let raw = format!(r#"{{"type":"estado_cambio","userId":"7","{key}":"break"}}"#);
            let msg = WireMessage::from_json(&raw).unwrap();
            match msg {
                WireMessage::EstadoCambio(ec) => assert_eq!(ec.estado.as_str(), "break"),
                other => panic!("unexpected message: {other:?}"),
            }
        }
    }

    #[test]
    fn estado_cambio_canonical_wins_over_aliases() {
        let raw = r#"{"type":"estado_cambio","userId":"7","estado":"almuerzo","estado_slug":"break"}"#;
        match WireMessage::from_json(raw).unwrap() {
            WireMessage::EstadoCambio(ec) => assert_eq!(ec.estado.as_str(), "almuerzo"),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn estado_cambio_emits_all_aliases() {
        let msg = WireMessage::EstadoCambio(EstadoCambio {
            user_id: "7".into(),
            nombre: "Ana".into(),
            cargo: String::new(),
            area: String::new(),
            estado: EstadoAlias::new("Disponible"),
            timestamp: None,
            origen: None,
            limite_segundos: None,
        });
        let value: Value = serde_json::from_str(&msg.to_json()).unwrap();
        for key in [
            "estado",
            "nuevo_estado",
            "estado_slug",
            "estado_actual",
            "estado_actual_slug",
        ] {
            assert_eq!(value[key], "disponible", "missing alias {key}");
        }
    }

    #[test]
    fn estado_cambio_without_any_status_key_is_rejected() {
        let raw = r#"{"type":"estado_cambio","userId":"7"}"#;
        assert!(WireMessage::from_json(raw).is_err());
    }

    #[test]
    fn request_all_status_is_bare() {
        let msg = WireMessage::from_json(r#"{"type":"request_all_status"}"#).unwrap();
        assert_eq!(msg, WireMessage::RequestAllStatus);
    }

    #[test]
    fn ping_without_user_id_is_accepted() {
        match WireMessage::from_json(r#"{"type":"ping"}"#).unwrap() {
            WireMessage::Ping(p) => assert!(p.user_id.is_none()),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn unknown_type_is_an_error_not_a_panic() {
        assert!(WireMessage::from_json(r#"{"type":"mystery"}"#).is_err());
        assert!(WireMessage::from_json("not json at all").is_err());
    }
}
