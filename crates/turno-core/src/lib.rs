pub mod catalog;
pub mod protocol;
pub mod punctuality;
pub mod reconnect;

/// Status every worker starts (and ends) the day in.
pub const ESTADO_DESCONECTADO: &str = "desconectado";

/// Transient state between marking shift entry and picking a first status.
pub const ESTADO_JORNADA_ACTIVA: &str = "jornada_activa";
