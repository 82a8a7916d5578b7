//! REST client for the backend that owns the catalog, horario and jornada
//! records. Called on mount, reconnect and discrete transitions, never on
//! the realtime broadcast path. Failures surface to the user; local state is
//! not rolled back (the periodic resend reconciles observers).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use turno_core::catalog::EstadoCatalogo;

use crate::schedule::HorarioHoy;

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("error de red: {0}")]
    Http(#[from] reqwest::Error),
    #[error("backend respondió {status}: {detail}")]
    Rechazado { status: u16, detail: String },
}

/// Backend-side view of the currently open status, used to restore state on
/// mount/reconnect.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EstadoAbierto {
    pub estado: String,
    #[serde(default)]
    pub inicio: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RespuestaSalida {
    #[serde(default)]
    pub mensaje: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct Transicion<'a> {
    pub estado: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fin: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finalizando: Option<bool>,
}

pub struct BackendClient {
    base: String,
    http: reqwest::Client,
}

impl BackendClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    /// Catalog entries plus this advisor's overrides, already merged by the
    /// backend into one payload.
    pub async fn estados_asesor(&self, asesor_id: &str) -> Result<EstadoCatalogo, BackendError> {
        let url = format!("{}/api/asesores/{asesor_id}/estados", self.base);
        let resp = self.http.get(url).send().await?;
        Ok(ok(resp).await?.json().await?)
    }

    pub async fn estado_actual(
        &self,
        asesor_id: &str,
    ) -> Result<Option<EstadoAbierto>, BackendError> {
        let url = format!("{}/api/asesores/{asesor_id}/status", self.base);
        let resp = self.http.get(url).send().await?;
        if resp.status().as_u16() == 404 {
            return Ok(None);
        }
        Ok(Some(ok(resp).await?.json().await?))
    }

    pub async fn horario_actual(&self, asesor_id: &str) -> Result<Option<HorarioHoy>, BackendError> {
        let url = format!("{}/api/asesores/{asesor_id}/horario-actual", self.base);
        let resp = self.http.get(url).send().await?;
        if resp.status().as_u16() == 404 {
            return Ok(None);
        }
        Ok(Some(ok(resp).await?.json().await?))
    }

    pub async fn transicionar(
        &self,
        asesor_id: &str,
        transicion: &Transicion<'_>,
    ) -> Result<(), BackendError> {
        let url = format!("{}/api/asesores/{asesor_id}/transiciones", self.base);
        let resp = self.http.post(url).json(transicion).send().await?;
        ok(resp).await?;
        Ok(())
    }

    pub async fn marcar_entrada(&self, asesor_id: &str) -> Result<(), BackendError> {
        let url = format!("{}/api/asesores/{asesor_id}/entrada", self.base);
        let resp = self.http.post(url).json(&json!({})).send().await?;
        ok(resp).await?;
        Ok(())
    }

    pub async fn marcar_salida(&self, asesor_id: &str) -> Result<RespuestaSalida, BackendError> {
        let url = format!("{}/api/asesores/{asesor_id}/salida", self.base);
        let resp = self.http.post(url).json(&json!({})).send().await?;
        Ok(ok(resp).await?.json().await?)
    }
}

async fn ok(resp: reqwest::Response) -> Result<reqwest::Response, BackendError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let detail = resp.text().await.unwrap_or_default();
    Err(BackendError::Rechazado {
        status: status.as_u16(),
        detail,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn estados_asesor_deserializes_catalog_and_overrides() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/asesores/42/estados"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "tipos": [
                    {"slug": "break", "nombre": "Break", "limite_minutos_default": 10}
                ],
                "configs": [
                    {"estado_slug": "break", "activo": true, "limite_minutos": 15}
                ]
            })))
            .mount(&server)
            .await;

        let client = BackendClient::new(&server.uri());
        let catalogo = client.estados_asesor("42").await.unwrap();
        assert_eq!(catalogo.limite_efectivo_seg("break"), Some(15 * 60));
    }

    #[tokio::test]
    async fn transicion_posts_the_slug() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/asesores/42/transiciones"))
            .and(body_partial_json(json!({"estado": "break"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let client = BackendClient::new(&server.uri());
        client
            .transicionar(
                "42",
                &Transicion {
                    estado: "break",
                    fin: None,
                    finalizando: None,
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn backend_rejection_surfaces_status_and_detail() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/asesores/42/transiciones"))
            .respond_with(ResponseTemplate::new(400).set_body_string("estado inactivo"))
            .mount(&server)
            .await;

        let client = BackendClient::new(&server.uri());
        let err = client
            .transicionar(
                "42",
                &Transicion {
                    estado: "prueba",
                    fin: None,
                    finalizando: None,
                },
            )
            .await
            .unwrap_err();
        match err {
            BackendError::Rechazado { status, detail } => {
                assert_eq!(status, 400);
                assert_eq!(detail, "estado inactivo");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_horario_is_none_not_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/asesores/42/horario-actual"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = BackendClient::new(&server.uri());
        assert_eq!(client.horario_actual("42").await.unwrap(), None);
    }
}
