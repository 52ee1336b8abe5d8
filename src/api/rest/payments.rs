use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::Json;
use axum::Router;
use serde::Deserialize;

use crate::engine::orders;
use crate::error::AppError;
use crate::models::order::Order;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/payments/confirm", post(confirm_payment))
        .route("/payments/fail", post(fail_payment))
}

#[derive(Deserialize)]
pub struct ConfirmPaymentRequest {
    pub reference: String,
    pub amount: f64,
    pub gateway_reference: Option<String>,
}

#[derive(Deserialize)]
pub struct FailPaymentRequest {
    pub reference: String,
}

/// 404 means the order is not visible yet; gateways retry.
async fn confirm_payment(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ConfirmPaymentRequest>,
) -> Result<Json<Order>, AppError> {
    if payload.reference.trim().is_empty() {
        return Err(AppError::BadRequest("reference cannot be empty".to_string()));
    }

    let order = orders::confirm_payment_and_assign(
        &state,
        &payload.reference,
        payload.amount,
        payload.gateway_reference.as_deref(),
    )
    .await?;
    Ok(Json(order))
}

async fn fail_payment(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<FailPaymentRequest>,
) -> Result<Json<Order>, AppError> {
    let order = orders::fail_payment(&state, &payload.reference).await?;
    Ok(Json(order))
}
