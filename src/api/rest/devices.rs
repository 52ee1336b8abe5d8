use std::sync::Arc;

use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::notification::{NotificationDevice, NotificationLog};
use crate::notify::devices::RegisterDevice;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/devices", post(register_device).get(list_devices))
        .route("/notifications/logs", get(list_logs))
}

#[derive(Deserialize)]
pub struct LogsQuery {
    pub order_id: Option<Uuid>,
}

async fn register_device(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RegisterDevice>,
) -> Result<Json<NotificationDevice>, AppError> {
    let device = state.devices.register(payload).await?;
    Ok(Json(device))
}

async fn list_devices(State(state): State<Arc<AppState>>) -> Json<Vec<NotificationDevice>> {
    Json(state.devices.list().await)
}

async fn list_logs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LogsQuery>,
) -> Json<Vec<NotificationLog>> {
    let mut logs: Vec<NotificationLog> = state
        .notification_logs
        .iter()
        .filter(|entry| query.order_id.is_none_or(|id| entry.order_id == Some(id)))
        .map(|entry| entry.value().clone())
        .collect();
    logs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    Json(logs)
}
