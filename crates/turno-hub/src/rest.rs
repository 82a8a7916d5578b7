//! REST companion endpoints: bootstrap/reconciliation reads plus the forced
//! status override. None of these sit on the broadcast hot path.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::hub::HubState;

pub async fn connected_users(State(hub): State<Arc<HubState>>) -> impl IntoResponse {
    Json(hub.snapshot().await)
}

pub async fn user_status(
    State(hub): State<Arc<HubState>>,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    match hub.user_status(&user_id).await {
        Some(snapshot) => Json(snapshot).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Usuario no encontrado o no conectado" })),
        )
            .into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct ForceEstadoBody {
    #[serde(rename = "userId")]
    pub user_id: String,
    pub estado: String,
}

pub async fn force_estado(
    State(hub): State<Arc<HubState>>,
    Json(body): Json<ForceEstadoBody>,
) -> impl IntoResponse {
    if hub.force_estado(&body.user_id, &body.estado).await {
        Json(json!({ "success": true, "message": "Estado actualizado" })).into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Usuario no encontrado" })),
        )
            .into_response()
    }
}

pub async fn statistics(State(hub): State<Arc<HubState>>) -> impl IntoResponse {
    Json(hub.statistics().await)
}

pub async fn health(State(hub): State<Arc<HubState>>) -> impl IntoResponse {
    let (users, leaders) = hub.counts().await;
    Json(json!({ "status": "ok", "users": users, "leaders": leaders }))
}
