//! Order state machine and driver assignment.
//!
//! Every public operation holds the order's lock for its whole duration, so
//! transitions on one order never interleave. The state change is committed
//! first; alarms, notifications and realtime events follow as best-effort
//! side effects that are logged on failure and never roll the order back.

use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::notices;
use crate::engine::orders::{load_order, save_order};
use crate::error::AppError;
use crate::geo::nearest_driver;
use crate::models::alarm::{AlarmStatus, AssignmentAlarm};
use crate::models::driver::GeoPoint;
use crate::models::order::{Order, OrderStatus, PaymentMethod, PaymentStatus};
use crate::notify::queue::notify;
use crate::state::AppState;

#[derive(Debug, Clone, Deserialize)]
pub struct StatusUpdate {
    pub status: OrderStatus,
    pub driver_id: Option<Uuid>,
    pub cancellation_reason: Option<String>,
}

impl StatusUpdate {
    pub fn to(status: OrderStatus) -> Self {
        Self {
            status,
            driver_id: None,
            cancellation_reason: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AutoAssignOutcome {
    pub assigned: bool,
    pub driver_id: Option<Uuid>,
    pub distance_km: Option<f64>,
    pub reason: String,
}

impl AutoAssignOutcome {
    fn unassigned(reason: impl Into<String>) -> Self {
        Self {
            assigned: false,
            driver_id: None,
            distance_km: None,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ManualAssignOutcome {
    pub order: Order,
    pub previous_driver_id: Option<Uuid>,
    pub previous_driver_notified: bool,
    pub requires_acknowledgement: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeclineOutcome {
    pub order: Order,
    pub reassigned_to: Option<Uuid>,
}

/// Assigns the nearest dispatchable driver to `order_id`.
pub async fn auto_assign_driver(
    state: &AppState,
    order_id: Uuid,
    target: GeoPoint,
) -> Result<AutoAssignOutcome, AppError> {
    let _guard = state.lock(order_id).await;
    assign_nearest(state, order_id, target, Vec::new()).await
}

/// Matching and assignment with the order lock already held.
pub(crate) async fn assign_nearest(
    state: &AppState,
    order_id: Uuid,
    target: GeoPoint,
    mut exclude: Vec<Uuid>,
) -> Result<AutoAssignOutcome, AppError> {
    let started = Instant::now();
    let order = load_order(state, order_id)?;

    let reassigning = match (order.status, order.driver_id) {
        (OrderStatus::Pending, _) => false,
        // Decline path: the declining driver is already excluded.
        (OrderStatus::Assigned, Some(current)) if exclude.contains(&current) => true,
        (status, _) => {
            return Ok(AutoAssignOutcome::unassigned(format!(
                "order is {status} and cannot be auto-assigned"
            )));
        }
    };

    let found = loop {
        let candidates = state.directory.dispatchable_drivers(&exclude);
        let Some(found) = nearest_driver(&target, &candidates) else {
            record_assignment(state, "no_driver", started);
            info!(order_id = %order_id, "no available driver found");
            return Ok(AutoAssignOutcome::unassigned("no available driver found"));
        };

        if state.directory.claim_driver(found.driver_id) {
            break found;
        }
        // Claimed by a concurrent assignment between listing and claiming.
        exclude.push(found.driver_id);
    };

    let order = match attach_driver(
        state,
        order_id,
        found.driver_id,
        Some(found.distance_km),
        reassigning,
    )
    .await
    {
        Ok(order) => order,
        Err(err) => {
            record_assignment(state, "error", started);
            return Err(err);
        }
    };

    record_assignment(state, "assigned", started);
    info!(
        order_id = %order.id,
        driver_id = %found.driver_id,
        distance_km = found.distance_km,
        "order assigned"
    );

    Ok(AutoAssignOutcome {
        assigned: true,
        driver_id: Some(found.driver_id),
        distance_km: Some(found.distance_km),
        reason: format!("assigned driver {:.2} km away", found.distance_km),
    })
}

fn record_assignment(state: &AppState, outcome: &str, started: Instant) {
    state
        .metrics
        .assignment_latency_seconds
        .with_label_values(&[outcome])
        .observe(started.elapsed().as_secs_f64());
    state
        .metrics
        .assignments_total
        .with_label_values(&[outcome])
        .inc();
}

/// Moves the order to ASSIGNED for an already-claimed driver, resets the
/// alarm and notifies the driver. Releases the claim if the move fails.
async fn attach_driver(
    state: &AppState,
    order_id: Uuid,
    driver_id: Uuid,
    distance_km: Option<f64>,
    reassigned: bool,
) -> Result<Order, AppError> {
    let update = StatusUpdate {
        status: OrderStatus::Assigned,
        driver_id: Some(driver_id),
        cancellation_reason: None,
    };

    let order = match transition(state, order_id, update).await {
        Ok(order) => order,
        Err(err) => {
            state.directory.release_driver(driver_id);
            return Err(err);
        }
    };

    let now = Utc::now();
    let alarm = state.alarms.reset(order_id, driver_id, now);

    notify(state, notices::assignment_job(&order, driver_id, &alarm)).await;
    // The assignment push doubles as the first reminder.
    state.alarms.mark_reminded(order_id, alarm.id, now);
    notices::publish_new_order(state, driver_id, order_id, distance_km, reassigned);

    Ok(order)
}

pub async fn manual_assign_driver(
    state: &AppState,
    order_id: Uuid,
    driver_id: Uuid,
    admin_id: Uuid,
) -> Result<ManualAssignOutcome, AppError> {
    let _guard = state.lock(order_id).await;
    let order = load_order(state, order_id)?;

    if !matches!(
        order.status,
        OrderStatus::Pending | OrderStatus::Assigned | OrderStatus::Accepted
    ) {
        return Err(AppError::BadRequest(format!(
            "Cannot manually assign driver when order is {}",
            order.status
        )));
    }

    let previous = order.driver_id.filter(|previous| *previous != driver_id);
    let same_driver = order.driver_id == Some(driver_id);

    // Re-assigning the current driver restarts their acknowledgement cycle
    // without requiring them to be free.
    let target_ok = if same_driver {
        let eligible = state
            .directory
            .driver(driver_id)
            .is_some_and(|driver| driver.is_active && !driver.is_blocked);
        eligible && state.directory.set_availability(driver_id, false).is_ok()
    } else {
        state.directory.claim_driver(driver_id)
    };
    if !target_ok {
        return Err(AppError::BadRequest(
            "driver not found or unavailable".to_string(),
        ));
    }

    if let Some(previous) = previous {
        state.directory.release_driver(previous);
    }

    let order = attach_driver(state, order_id, driver_id, None, previous.is_some()).await?;
    state
        .alarms
        .cancel_other_drivers(order_id, driver_id, Utc::now());

    let mut previous_driver_notified = false;
    if let Some(previous) = previous {
        previous_driver_notified = notify(state, notices::reassigned_away_job(&order, previous))
            .await
            .is_some_and(|report| report.delivered());
        notices::publish_reassignment(state, previous, order_id, driver_id, true);
    }

    info!(
        order_id = %order_id,
        driver_id = %driver_id,
        admin_id = %admin_id,
        previous_driver_id = ?previous,
        "driver manually assigned"
    );

    Ok(ManualAssignOutcome {
        order,
        previous_driver_id: previous,
        previous_driver_notified,
        requires_acknowledgement: previous.is_some(),
    })
}

fn ensure_assigned_driver(order: &Order, driver_id: Uuid) -> Result<(), AppError> {
    if order.driver_id != Some(driver_id) {
        return Err(AppError::Forbidden(
            "driver is not assigned to this order".to_string(),
        ));
    }
    Ok(())
}

fn ensure_status(order: &Order, allowed: &[OrderStatus], action: &str) -> Result<(), AppError> {
    if !allowed.contains(&order.status) {
        return Err(AppError::BadRequest(format!(
            "Cannot {action} when order is {}",
            order.status
        )));
    }
    Ok(())
}

pub async fn accept_order(
    state: &AppState,
    order_id: Uuid,
    driver_id: Uuid,
) -> Result<Order, AppError> {
    let _guard = state.lock(order_id).await;
    let order = load_order(state, order_id)?;
    ensure_status(&order, &[OrderStatus::Assigned], "accept order")?;
    ensure_assigned_driver(&order, driver_id)?;

    let order = transition(state, order_id, StatusUpdate::to(OrderStatus::Accepted)).await?;

    info!(order_id = %order_id, driver_id = %driver_id, "order accepted");
    Ok(order)
}

pub async fn decline_order(
    state: &AppState,
    order_id: Uuid,
    driver_id: Uuid,
    reason: Option<String>,
) -> Result<DeclineOutcome, AppError> {
    let _guard = state.lock(order_id).await;
    let order = load_order(state, order_id)?;
    ensure_status(&order, &[OrderStatus::Assigned], "decline order")?;
    ensure_assigned_driver(&order, driver_id)?;

    state.directory.release_driver(driver_id);
    info!(order_id = %order_id, driver_id = %driver_id, reason = ?reason, "order declined");

    let replacement = match order.delivery_location {
        Some(target) => match assign_nearest(state, order_id, target, vec![driver_id]).await {
            Ok(outcome) => outcome.driver_id,
            Err(err) => {
                warn!(order_id = %order_id, error = %err, "reassignment after decline failed");
                None
            }
        },
        None => None,
    };

    let order = match replacement {
        Some(_) => load_order(state, order_id)?,
        None => {
            let update = StatusUpdate {
                status: OrderStatus::Pending,
                driver_id: None,
                cancellation_reason: reason,
            };
            transition(state, order_id, update).await?
        }
    };

    Ok(DeclineOutcome {
        order,
        reassigned_to: replacement,
    })
}

pub async fn mark_picked_up(
    state: &AppState,
    order_id: Uuid,
    driver_id: Uuid,
) -> Result<Order, AppError> {
    driver_transition(
        state,
        order_id,
        driver_id,
        &[OrderStatus::Accepted],
        OrderStatus::PickedUp,
        "mark order picked up",
    )
    .await
}

pub async fn start_delivery(
    state: &AppState,
    order_id: Uuid,
    driver_id: Uuid,
) -> Result<Order, AppError> {
    driver_transition(
        state,
        order_id,
        driver_id,
        &[OrderStatus::Accepted, OrderStatus::PickedUp],
        OrderStatus::InTransit,
        "start delivery",
    )
    .await
}

pub async fn complete_delivery(
    state: &AppState,
    order_id: Uuid,
    driver_id: Uuid,
) -> Result<Order, AppError> {
    driver_transition(
        state,
        order_id,
        driver_id,
        &[OrderStatus::InTransit],
        OrderStatus::Delivered,
        "complete delivery",
    )
    .await
}

async fn driver_transition(
    state: &AppState,
    order_id: Uuid,
    driver_id: Uuid,
    allowed: &[OrderStatus],
    target: OrderStatus,
    action: &str,
) -> Result<Order, AppError> {
    let _guard = state.lock(order_id).await;
    let order = load_order(state, order_id)?;
    ensure_status(&order, allowed, action)?;
    ensure_assigned_driver(&order, driver_id)?;

    let order = transition(state, order_id, StatusUpdate::to(target)).await?;
    info!(order_id = %order_id, driver_id = %driver_id, status = %target, "order status advanced");
    Ok(order)
}

/// Generic transition entry point for callers outside the engine.
pub async fn update_order_status(
    state: &AppState,
    order_id: Uuid,
    update: StatusUpdate,
) -> Result<Order, AppError> {
    let _guard = state.lock(order_id).await;

    if update.status == OrderStatus::Assigned {
        return Err(AppError::BadRequest(
            "use driver assignment to move an order to assigned".to_string(),
        ));
    }

    let order = load_order(state, order_id)?;
    if let Some(driver_id) = update.driver_id {
        ensure_assigned_driver(&order, driver_id)?;
    }

    transition(state, order_id, update).await
}

/// Applies a status change with the order lock held.
///
/// Stamps the status timestamp, keeps `driver_id` consistent with the
/// status, frees the driver when the order leaves them, resolves the alarm
/// on terminal statuses and notifies the owning user.
pub(crate) async fn transition(
    state: &AppState,
    order_id: Uuid,
    update: StatusUpdate,
) -> Result<Order, AppError> {
    let mut order = load_order(state, order_id)?;
    let from = order.status;
    let target = update.status;

    if !from.can_transition_to(target) {
        return Err(AppError::BadRequest(format!(
            "Cannot move order from {from} to {target}"
        )));
    }

    let previous_driver = order.driver_id;
    if target.holds_driver() {
        let driver_id = update.driver_id.or(order.driver_id).ok_or_else(|| {
            AppError::BadRequest(format!("an order that is {target} needs a driver"))
        })?;
        order.driver_id = Some(driver_id);
    } else {
        order.driver_id = None;
    }

    if target == OrderStatus::Cancelled {
        order.cancellation_reason = update.cancellation_reason.clone();
    }

    if target == OrderStatus::Delivered
        && order.payment_method == PaymentMethod::Pos
        && order.payment_status != PaymentStatus::Paid
    {
        order.payment_status = PaymentStatus::Paid;
        order.amount_paid = Some(order.total);
    }

    let now = Utc::now();
    order.apply_status(target, now, update.cancellation_reason);
    save_order(state, &order);

    debug!(order_id = %order_id, from = %from, to = %target, "order transitioned");

    // Side effects; the transition above is already committed.
    let leaves_driver = !target.holds_driver() || target == OrderStatus::Delivered;
    if leaves_driver {
        if let Some(driver_id) = previous_driver {
            state.directory.release_driver(driver_id);
        }
    }

    match target {
        OrderStatus::Accepted => {
            // Availability tracks capacity to accept, not occupancy.
            if let Some(driver_id) = order.driver_id {
                state.directory.release_driver(driver_id);
            }
            resolve_alarm(state, order_id, AlarmStatus::Acknowledged);
        }
        OrderStatus::Delivered => {
            resolve_alarm(state, order_id, AlarmStatus::Acknowledged);
        }
        OrderStatus::Cancelled | OrderStatus::Pending => {
            resolve_alarm(state, order_id, AlarmStatus::Cancelled);
        }
        _ => {}
    }

    notices::publish_order_update(state, &order);
    notify(state, notices::status_job(&order)).await;
    if target == OrderStatus::Delivered {
        notify(state, notices::delivery_confirmed_job(&order)).await;
    }

    Ok(order)
}

fn resolve_alarm(state: &AppState, order_id: Uuid, status: AlarmStatus) {
    if let Some(alarm) = state.alarms.resolve_pending(order_id, status, Utc::now()) {
        debug!(order_id = %order_id, alarm_id = %alarm.id, status = ?status, "alarm resolved");
    }
}

/// Driver confirms the (re)assignment. A missing alarm is a no-op; an alarm
/// that targets another driver is forbidden.
pub async fn acknowledge_driver_reassignment(
    state: &AppState,
    order_id: Uuid,
    driver_id: Uuid,
) -> Result<Option<AssignmentAlarm>, AppError> {
    let _guard = state.lock(order_id).await;
    load_order(state, order_id)?;

    let Some(alarm) = state.alarms.for_order(order_id) else {
        return Ok(None);
    };

    if alarm.driver_id != driver_id {
        return Err(AppError::Forbidden(
            "driver is not the recipient of this assignment alarm".to_string(),
        ));
    }

    if !alarm.is_pending() {
        return Ok(Some(alarm));
    }

    let acknowledged = state.alarms.acknowledge(order_id, Utc::now());
    info!(order_id = %order_id, driver_id = %driver_id, "assignment acknowledged by driver");
    Ok(acknowledged.or(Some(alarm)))
}
