use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, patch, post};
use axum::Json;
use axum::Router;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::dispatch::{
    self, AutoAssignOutcome, DeclineOutcome, ManualAssignOutcome, StatusUpdate,
};
use crate::engine::orders::{self, CreateOrderInput};
use crate::error::AppError;
use crate::models::alarm::AssignmentAlarm;
use crate::models::driver::GeoPoint;
use crate::models::order::{OrderStatus, OrderView};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders", post(create_order).get(list_orders))
        .route("/orders/:id", get(get_order).delete(archive_order))
        .route("/orders/:id/status", patch(update_status))
        .route("/orders/:id/auto-assign", post(auto_assign))
        .route("/orders/:id/assign", post(manual_assign))
        .route("/orders/:id/accept", post(accept))
        .route("/orders/:id/decline", post(decline))
        .route("/orders/:id/pickup", post(pickup))
        .route("/orders/:id/start", post(start))
        .route("/orders/:id/complete", post(complete))
        .route("/orders/:id/acknowledge", post(acknowledge))
        .route("/orders/:id/alarm", get(get_alarm))
        .route("/alarms", get(list_alarms))
}

#[derive(Deserialize)]
pub struct ListOrdersQuery {
    pub status: Option<OrderStatus>,
}

#[derive(Deserialize)]
pub struct AutoAssignRequest {
    pub location: Option<GeoPoint>,
}

#[derive(Deserialize)]
pub struct ManualAssignRequest {
    pub driver_id: Uuid,
    pub admin_id: Uuid,
}

#[derive(Deserialize)]
pub struct DriverActionRequest {
    pub driver_id: Uuid,
}

#[derive(Deserialize)]
pub struct DeclineRequest {
    pub driver_id: Uuid,
    pub reason: Option<String>,
}

#[derive(Serialize)]
pub struct AcknowledgeResponse {
    pub acknowledged: bool,
    pub alarm: Option<AssignmentAlarm>,
}

async fn create_order(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateOrderInput>,
) -> Result<Json<OrderView>, AppError> {
    let order = orders::create_order(&state, payload).await?;
    Ok(Json(orders::order_view(&state, order)))
}

async fn list_orders(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListOrdersQuery>,
) -> Json<Vec<OrderView>> {
    Json(orders::list_orders(&state, query.status))
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<OrderView>, AppError> {
    let order = orders::load_order(&state, id)?;
    Ok(Json(orders::order_view(&state, order)))
}

async fn archive_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<OrderView>, AppError> {
    let order = orders::archive_order(&state, id).await?;
    Ok(Json(orders::order_view(&state, order)))
}

async fn update_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<StatusUpdate>,
) -> Result<Json<OrderView>, AppError> {
    let order = dispatch::update_order_status(&state, id, payload).await?;
    Ok(Json(orders::order_view(&state, order)))
}

async fn auto_assign(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<AutoAssignRequest>,
) -> Result<Json<AutoAssignOutcome>, AppError> {
    let target = match payload.location {
        Some(location) => location,
        None => orders::load_order(&state, id)?
            .delivery_location
            .ok_or_else(|| AppError::BadRequest("order has no delivery coordinates".to_string()))?,
    };

    let outcome = dispatch::auto_assign_driver(&state, id, target).await?;
    Ok(Json(outcome))
}

async fn manual_assign(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ManualAssignRequest>,
) -> Result<Json<ManualAssignOutcome>, AppError> {
    let outcome =
        dispatch::manual_assign_driver(&state, id, payload.driver_id, payload.admin_id).await?;
    Ok(Json(outcome))
}

async fn accept(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<DriverActionRequest>,
) -> Result<Json<OrderView>, AppError> {
    let order = dispatch::accept_order(&state, id, payload.driver_id).await?;
    Ok(Json(orders::order_view(&state, order)))
}

async fn decline(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<DeclineRequest>,
) -> Result<Json<DeclineOutcome>, AppError> {
    let outcome = dispatch::decline_order(&state, id, payload.driver_id, payload.reason).await?;
    Ok(Json(outcome))
}

async fn pickup(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<DriverActionRequest>,
) -> Result<Json<OrderView>, AppError> {
    let order = dispatch::mark_picked_up(&state, id, payload.driver_id).await?;
    Ok(Json(orders::order_view(&state, order)))
}

async fn start(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<DriverActionRequest>,
) -> Result<Json<OrderView>, AppError> {
    let order = dispatch::start_delivery(&state, id, payload.driver_id).await?;
    Ok(Json(orders::order_view(&state, order)))
}

async fn complete(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<DriverActionRequest>,
) -> Result<Json<OrderView>, AppError> {
    let order = dispatch::complete_delivery(&state, id, payload.driver_id).await?;
    Ok(Json(orders::order_view(&state, order)))
}

async fn acknowledge(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<DriverActionRequest>,
) -> Result<Json<AcknowledgeResponse>, AppError> {
    let alarm = dispatch::acknowledge_driver_reassignment(&state, id, payload.driver_id).await?;
    Ok(Json(AcknowledgeResponse {
        acknowledged: alarm.is_some(),
        alarm,
    }))
}

async fn get_alarm(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<AssignmentAlarm>, AppError> {
    let alarm = state
        .alarms
        .for_order(id)
        .ok_or_else(|| AppError::NotFound(format!("no alarm for order {id}")))?;
    Ok(Json(alarm))
}

async fn list_alarms(State(state): State<Arc<AppState>>) -> Json<Vec<AssignmentAlarm>> {
    Json(state.alarms.all())
}
