//! Status catalog and per-advisor configuration.
//!
//! The backend owns the catalog (`EstadoTipo`) and the per-advisor overrides
//! (`EstadoConfigAsesor`); the client merges both into effective limit, color
//! and enablement lookups. The hub never consults any of this; it relays
//! slugs verbatim.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Catalog entry for one status type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EstadoTipo {
    #[serde(default)]
    pub id: Option<i64>,
    pub slug: String,
    pub nombre: String,
    #[serde(default = "default_color")]
    pub color_hex: String,
    #[serde(default)]
    pub orden: u32,
    #[serde(default = "default_true")]
    pub activo: bool,
    /// Daily limit in minutes. `None` means unmetered.
    #[serde(default)]
    pub limite_minutos_default: Option<u32>,
}

fn default_color() -> String {
    "#6b7280".to_string()
}

fn default_true() -> bool {
    true
}

/// Per-advisor override of a catalog entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EstadoConfigAsesor {
    pub estado_slug: String,
    #[serde(default = "default_true")]
    pub activo: bool,
    #[serde(default)]
    pub limite_minutos: Option<u32>,
    #[serde(default)]
    pub color_hex_override: Option<String>,
}

/// Catalog plus overrides for a single advisor, as fetched on mount.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EstadoCatalogo {
    #[serde(default)]
    pub tipos: Vec<EstadoTipo>,
    #[serde(default)]
    pub configs: Vec<EstadoConfigAsesor>,
}

impl EstadoCatalogo {
    pub fn tipo(&self, slug: &str) -> Option<&EstadoTipo> {
        self.tipos.iter().find(|t| t.slug == slug)
    }

    fn config(&self, slug: &str) -> Option<&EstadoConfigAsesor> {
        self.configs.iter().find(|c| c.estado_slug == slug)
    }

    /// Effective limit in seconds: active override limit, else catalog
    /// default, else unmetered.
    pub fn limite_efectivo_seg(&self, slug: &str) -> Option<u64> {
        let catalogo = self.tipo(slug).and_then(|t| t.limite_minutos_default);
        let minutos = match self.config(slug) {
            Some(cfg) if cfg.activo => cfg.limite_minutos.or(catalogo),
            _ => catalogo,
        };
        minutos.map(|m| u64::from(m) * 60)
    }

    pub fn color_efectivo(&self, slug: &str) -> Option<&str> {
        if let Some(cfg) = self.config(slug) {
            if let Some(color) = cfg.color_hex_override.as_deref() {
                return Some(color);
            }
        }
        self.tipo(slug).map(|t| t.color_hex.as_str())
    }

    /// A status is usable when the catalog entry is active and no override
    /// disables it for this advisor.
    pub fn esta_activo(&self, slug: &str) -> bool {
        let catalogo = self.tipo(slug).map(|t| t.activo).unwrap_or(false);
        let config = self.config(slug).map(|c| c.activo).unwrap_or(true);
        catalogo && config
    }

    /// Selectable statuses in UI order, boundary pseudo-statuses excluded.
    pub fn seleccionables(&self) -> Vec<&EstadoTipo> {
        let mut tipos: Vec<&EstadoTipo> = self
            .tipos
            .iter()
            .filter(|t| t.slug != "ingreso" && t.slug != "salida")
            .filter(|t| self.esta_activo(&t.slug))
            .collect();
        tipos.sort_by_key(|t| t.orden);
        tipos
    }
}

/// Known status variants on the worker side. The hub treats slugs as opaque
/// strings; the client keeps a closed set for its own transitions and folds
/// anything else into `Custom`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Estado {
    Disponible,
    Break,
    Almuerzo,
    Reunion,
    Formacion,
    Custom(String),
}

impl Estado {
    pub fn as_slug(&self) -> &str {
        match self {
            Estado::Disponible => "disponible",
            Estado::Break => "break",
            Estado::Almuerzo => "almuerzo",
            Estado::Reunion => "reunion",
            Estado::Formacion => "formacion",
            Estado::Custom(slug) => slug,
        }
    }
}

impl fmt::Display for Estado {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_slug())
    }
}

impl FromStr for Estado {
    type Err = std::convert::Infallible;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let slug = input.trim().to_lowercase();
        Ok(match slug.as_str() {
            "disponible" => Estado::Disponible,
            "break" => Estado::Break,
            "almuerzo" => Estado::Almuerzo,
            "reunion" => Estado::Reunion,
            "formacion" => Estado::Formacion,
            _ => Estado::Custom(slug),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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
                EstadoTipo {
                    id: Some(3),
                    slug: "almuerzo".into(),
                    nombre: "Almuerzo".into(),
                    color_hex: "#3b82f6".into(),
                    orden: 3,
                    activo: true,
                    limite_minutos_default: Some(60),
                },
            ],
            configs: vec![EstadoConfigAsesor {
                estado_slug: "break".into(),
                activo: true,
                limite_minutos: Some(15),
                color_hex_override: Some("#ff0000".into()),
            }],
        }
    }

    #[test]
    fn override_limit_beats_catalog_default() {
        assert_eq!(catalogo().limite_efectivo_seg("break"), Some(15 * 60));
    }

    #[test]
    fn catalog_default_applies_without_override() {
        assert_eq!(catalogo().limite_efectivo_seg("almuerzo"), Some(3600));
    }

    #[test]
    fn missing_limit_means_unmetered() {
        assert_eq!(catalogo().limite_efectivo_seg("disponible"), None);
        assert_eq!(catalogo().limite_efectivo_seg("nunca_visto"), None);
    }

    #[test]
    fn inactive_override_falls_back_to_catalog() {
        let mut cat = catalogo();
        cat.configs[0].activo = false;
        assert_eq!(cat.limite_efectivo_seg("break"), Some(10 * 60));
        // but the status itself is disabled for this advisor
        assert!(!cat.esta_activo("break"));
    }

    #[test]
    fn color_override_wins() {
        let cat = catalogo();
        assert_eq!(cat.color_efectivo("break"), Some("#ff0000"));
        assert_eq!(cat.color_efectivo("disponible"), Some("#10b981"));
    }

    #[test]
    fn unknown_slug_folds_into_custom() {
        assert_eq!(
            "Prueba".parse::<Estado>().unwrap(),
            Estado::Custom("prueba".into())
        );
        assert_eq!("BREAK".parse::<Estado>().unwrap(), Estado::Break);
    }
}
