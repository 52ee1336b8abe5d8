use chrono::{Duration, Utc};
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::dispatch::assign_nearest;
use crate::engine::notices;
use crate::error::AppError;
use crate::models::driver::GeoPoint;
use crate::models::order::{
    format_history, Order, OrderStatus, OrderView, PaymentMethod, PaymentStatus, StatusChange,
};
use crate::state::AppState;

/// Amounts above this are taken to be in minor units (kobo, cents).
const MINOR_UNIT_THRESHOLD: f64 = 1000.0;

#[derive(Debug, Clone, Deserialize)]
pub struct CreateOrderInput {
    pub user_id: Uuid,
    pub delivery_address: String,
    pub delivery_location: Option<GeoPoint>,
    pub tank_size: String,
    pub notes: Option<String>,
    pub payment_method: PaymentMethod,
    pub payment_reference: Option<String>,
    pub subtotal: f64,
    #[serde(default)]
    pub delivery_fee: f64,
}

pub fn load_order(state: &AppState, order_id: Uuid) -> Result<Order, AppError> {
    state
        .orders
        .get(&order_id)
        .map(|entry| entry.value().clone())
        .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))
}

pub fn save_order(state: &AppState, order: &Order) {
    state.orders.insert(order.id, order.clone());
}

/// Persists a PENDING order and tries to assign a driver straight away.
/// Not finding a driver leaves the order PENDING and is not an error.
pub async fn create_order(state: &AppState, input: CreateOrderInput) -> Result<Order, AppError> {
    validate_input(&input)?;

    let user = state
        .directory
        .user(input.user_id)
        .ok_or_else(|| AppError::NotFound(format!("user {} not found", input.user_id)))?;
    if !user.is_active || user.is_blocked {
        return Err(AppError::Forbidden("user account is not active".to_string()));
    }

    // One active order per user, enforced here rather than by storage, so
    // creation is serialised per user.
    let _user_guard = state.lock(user.id).await;

    let has_active = state
        .orders
        .iter()
        .any(|entry| entry.user_id == user.id && entry.status.is_active());
    if has_active {
        return Err(AppError::Conflict(
            "user already has an active order".to_string(),
        ));
    }

    if input.payment_method == PaymentMethod::Pos && has_recent_pos_failure(state, user.id) {
        return Err(AppError::BadRequest(
            "POS payment is unavailable after a recent failed POS payment".to_string(),
        ));
    }

    if let Some(reference) = &input.payment_reference {
        if find_by_reference(state, reference).is_some() {
            return Err(AppError::Conflict(format!(
                "payment reference {reference} is already in use"
            )));
        }
    }

    let now = Utc::now();
    let id = Uuid::new_v4();
    let order = Order {
        id,
        order_code: order_code(id),
        tracking_id: tracking_id(),
        user_id: user.id,
        status: OrderStatus::Pending,
        driver_id: None,
        delivery_location: input.delivery_location,
        delivery_address: input.delivery_address,
        tank_size: input.tank_size,
        notes: input.notes,
        payment_method: input.payment_method,
        payment_status: PaymentStatus::Pending,
        payment_reference: input.payment_reference,
        amount_paid: None,
        payment_failed_at: None,
        subtotal: input.subtotal,
        delivery_fee: input.delivery_fee,
        total: input.subtotal + input.delivery_fee,
        cancellation_reason: None,
        status_history: vec![StatusChange {
            status: OrderStatus::Pending,
            at: now,
            note: None,
        }],
        created_at: now,
        updated_at: now,
        assigned_at: None,
        accepted_at: None,
        picked_up_at: None,
        in_transit_at: None,
        delivered_at: None,
        cancelled_at: None,
        deleted_at: None,
    };

    save_order(state, &order);
    notices::publish_order_update(state, &order);
    info!(order_id = %order.id, order_code = %order.order_code, user_id = %user.id, "order created");

    if let Some(target) = order.delivery_location {
        let _order_guard = state.lock(order.id).await;
        match assign_nearest(state, order.id, target, Vec::new()).await {
            Ok(outcome) if !outcome.assigned => {
                info!(order_id = %order.id, reason = %outcome.reason, "order left pending");
            }
            Ok(_) => {}
            Err(err) => {
                warn!(order_id = %order.id, error = %err, "auto-assignment after creation failed");
            }
        }
    }

    load_order(state, order.id)
}

fn validate_input(input: &CreateOrderInput) -> Result<(), AppError> {
    if input.delivery_address.trim().is_empty() {
        return Err(AppError::BadRequest(
            "delivery address cannot be empty".to_string(),
        ));
    }
    if input.tank_size.trim().is_empty() {
        return Err(AppError::BadRequest("tank size cannot be empty".to_string()));
    }
    if !input.subtotal.is_finite() || input.subtotal < 0.0 {
        return Err(AppError::BadRequest("subtotal must be >= 0".to_string()));
    }
    if !input.delivery_fee.is_finite() || input.delivery_fee < 0.0 {
        return Err(AppError::BadRequest("delivery fee must be >= 0".to_string()));
    }
    if let Some(location) = input.delivery_location {
        if !(-90.0..=90.0).contains(&location.lat) || !(-180.0..=180.0).contains(&location.lng) {
            return Err(AppError::BadRequest(
                "delivery coordinates out of range".to_string(),
            ));
        }
    }
    Ok(())
}

fn has_recent_pos_failure(state: &AppState, user_id: Uuid) -> bool {
    let since = Utc::now() - Duration::days(state.config.pos_failure_lookback_days);
    state.orders.iter().any(|entry| {
        entry.user_id == user_id
            && entry.payment_method == PaymentMethod::Pos
            && entry.payment_status == PaymentStatus::Failed
            && entry.payment_failed_at.is_some_and(|failed_at| failed_at >= since)
    })
}

fn order_code(id: Uuid) -> String {
    let simple = id.simple().to_string().to_uppercase();
    format!("ORD-{}", &simple[..8])
}

fn tracking_id() -> String {
    let simple = Uuid::new_v4().simple().to_string().to_uppercase();
    format!("TRK-{}", &simple[..12])
}

fn find_by_reference(state: &AppState, reference: &str) -> Option<Uuid> {
    state
        .orders
        .iter()
        .find(|entry| entry.payment_reference.as_deref() == Some(reference))
        .map(|entry| *entry.key())
}

pub fn normalize_amount(amount: f64) -> f64 {
    if amount > MINOR_UNIT_THRESHOLD {
        amount / 100.0
    } else {
        amount
    }
}

/// Payment-gateway callback. Idempotent: an order that is already PAID is
/// returned unchanged. `NotFound` means the callback may have raced order
/// creation and should be retried.
pub async fn confirm_payment_and_assign(
    state: &AppState,
    reference: &str,
    amount: f64,
    gateway_reference: Option<&str>,
) -> Result<Order, AppError> {
    let order_id = find_by_reference(state, reference)
        .or_else(|| gateway_reference.and_then(|gateway| find_by_reference(state, gateway)))
        .ok_or_else(|| AppError::NotFound("order not found".to_string()))?;

    let _guard = state.lock(order_id).await;
    let mut order = load_order(state, order_id)?;

    if order.payment_status == PaymentStatus::Paid {
        info!(order_id = %order_id, reference = %reference, "payment already confirmed");
        return Ok(order);
    }

    order.payment_status = PaymentStatus::Paid;
    order.amount_paid = Some(normalize_amount(amount));
    order.updated_at = Utc::now();
    save_order(state, &order);
    info!(order_id = %order_id, reference = %reference, amount = ?order.amount_paid, "payment confirmed");

    if order.driver_id.is_none() && order.status == OrderStatus::Pending {
        if let Some(target) = order.delivery_location {
            match assign_nearest(state, order_id, target, Vec::new()).await {
                Ok(outcome) if !outcome.assigned => {
                    info!(order_id = %order_id, reason = %outcome.reason, "paid order left pending");
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(order_id = %order_id, error = %err, "auto-assignment after payment failed");
                }
            }
        }
    }

    load_order(state, order_id)
}

/// Payment-gateway callback for a declined or reversed payment. A PAID
/// order is never downgraded.
pub async fn fail_payment(state: &AppState, reference: &str) -> Result<Order, AppError> {
    let order_id = find_by_reference(state, reference)
        .ok_or_else(|| AppError::NotFound("order not found".to_string()))?;

    let _guard = state.lock(order_id).await;
    let mut order = load_order(state, order_id)?;

    match order.payment_status {
        PaymentStatus::Paid => Err(AppError::Conflict(format!(
            "payment {reference} is already confirmed"
        ))),
        PaymentStatus::Failed => Ok(order),
        PaymentStatus::Pending => {
            let now = Utc::now();
            order.payment_status = PaymentStatus::Failed;
            order.payment_failed_at = Some(now);
            order.updated_at = now;
            save_order(state, &order);
            warn!(order_id = %order_id, reference = %reference, "payment failed");
            Ok(order)
        }
    }
}

/// Soft delete; only cancelled orders can be archived.
pub async fn archive_order(state: &AppState, order_id: Uuid) -> Result<Order, AppError> {
    let _guard = state.lock(order_id).await;
    let mut order = load_order(state, order_id)?;

    if order.status != OrderStatus::Cancelled {
        return Err(AppError::BadRequest(format!(
            "Cannot archive order when order is {}",
            order.status
        )));
    }

    if order.deleted_at.is_none() {
        let now = Utc::now();
        order.deleted_at = Some(now);
        order.updated_at = now;
        save_order(state, &order);
    }

    Ok(order)
}

pub fn order_view(state: &AppState, order: Order) -> OrderView {
    let customer_name = state.directory.user(order.user_id).map(|user| user.name);
    let driver_name = order
        .driver_id
        .and_then(|driver_id| state.directory.driver_name(driver_id));
    let formatted_history = format_history(&order.status_history);

    OrderView {
        order,
        customer_name,
        driver_name,
        formatted_history,
    }
}

/// Non-archived orders, newest first.
pub fn list_orders(state: &AppState, status: Option<OrderStatus>) -> Vec<OrderView> {
    let mut orders: Vec<Order> = state
        .orders
        .iter()
        .filter(|entry| entry.deleted_at.is_none())
        .filter(|entry| status.is_none_or(|status| entry.status == status))
        .map(|entry| entry.value().clone())
        .collect();
    orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    orders
        .into_iter()
        .map(|order| order_view(state, order))
        .collect()
}
