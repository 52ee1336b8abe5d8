//! Messages sent to drivers, users and realtime subscribers on transitions.

use serde_json::json;
use uuid::Uuid;

use crate::models::alarm::AssignmentAlarm;
use crate::models::notification::{Audience, NotificationJob, NotificationKind, PushPriority};
use crate::models::order::{Order, OrderStatus};
use crate::realtime::{driver_room, order_room, user_room, ORDER_NEW, ORDER_REASSIGNED, ORDER_UPDATE};
use crate::state::AppState;

/// Fixed user-facing title and body for each status.
pub fn status_message(status: OrderStatus) -> (&'static str, &'static str) {
    match status {
        OrderStatus::Pending => (
            "Finding a driver",
            "We are looking for a driver for your order.",
        ),
        OrderStatus::Assigned => (
            "Driver assigned",
            "A driver has been assigned to your order.",
        ),
        OrderStatus::Accepted => (
            "Order accepted",
            "Your driver has accepted the order and is on the way.",
        ),
        OrderStatus::PickedUp => (
            "Order picked up",
            "Your driver has picked up your order.",
        ),
        OrderStatus::InTransit => (
            "Order in transit",
            "Your order is on its way to you.",
        ),
        OrderStatus::Delivered => (
            "Order delivered",
            "Your order has been delivered. Thank you!",
        ),
        OrderStatus::Cancelled => (
            "Order cancelled",
            "Your order has been cancelled.",
        ),
    }
}

pub fn assignment_job(order: &Order, driver_id: Uuid, alarm: &AssignmentAlarm) -> NotificationJob {
    NotificationJob::new(
        NotificationKind::OrderAssignment,
        Audience::Driver(driver_id),
        "New delivery assigned",
        &format!(
            "Order {} to {} is waiting for you.",
            order.order_code, order.delivery_address
        ),
    )
    .with_priority(PushPriority::High)
    .with_data("orderCode", &order.order_code)
    .for_order(order.id)
    .for_alarm(alarm.id)
}

pub fn reminder_job(alarm: &AssignmentAlarm, driver_id: Uuid, order_code: &str) -> NotificationJob {
    NotificationJob::new(
        NotificationKind::AlarmReminder,
        Audience::Driver(driver_id),
        "Delivery awaiting your response",
        &format!("Order {order_code} is still waiting for you to acknowledge it."),
    )
    .with_priority(PushPriority::High)
    .with_data("orderCode", order_code)
    .with_data("reminder", alarm.reminder_count.saturating_add(1))
    .for_order(alarm.order_id)
    .for_alarm(alarm.id)
}

pub fn reassigned_away_job(order: &Order, previous_driver: Uuid) -> NotificationJob {
    NotificationJob::new(
        NotificationKind::DriverReassigned,
        Audience::Driver(previous_driver),
        "Order reassigned",
        &format!(
            "Order {} has been reassigned to another driver.",
            order.order_code
        ),
    )
    .with_data("orderCode", &order.order_code)
    .with_data("requiresAcknowledgement", true)
    .for_order(order.id)
}

pub fn status_job(order: &Order) -> NotificationJob {
    let (title, body) = status_message(order.status);
    NotificationJob::new(
        NotificationKind::OrderStatus,
        Audience::User(order.user_id),
        title,
        body,
    )
    .with_data("status", order.status.label())
    .with_data("orderCode", &order.order_code)
    .for_order(order.id)
}

pub fn delivery_confirmed_job(order: &Order) -> NotificationJob {
    NotificationJob::new(
        NotificationKind::DeliveryConfirmed,
        Audience::User(order.user_id),
        "Delivery confirmed",
        &format!(
            "Delivery of order {} is confirmed. Tracking id: {}.",
            order.order_code, order.tracking_id
        ),
    )
    .with_data("trackingId", &order.tracking_id)
    .for_order(order.id)
}

pub fn publish_order_update(state: &AppState, order: &Order) {
    let driver = order.driver_id.and_then(|id| state.directory.driver(id));
    let payload = json!({
        "orderId": order.id,
        "status": order.status,
        "driverId": order.driver_id,
        "driverName": driver.as_ref().map(|d| d.name.clone()),
        "driverLocation": driver.as_ref().and_then(|d| d.location),
    });

    state
        .realtime
        .publish(&order_room(order.id), ORDER_UPDATE, payload.clone());
    state
        .realtime
        .publish(&user_room(order.user_id), ORDER_UPDATE, payload);
}

pub fn publish_new_order(
    state: &AppState,
    driver_id: Uuid,
    order_id: Uuid,
    distance_km: Option<f64>,
    reassigned: bool,
) {
    state.realtime.publish(
        &driver_room(driver_id),
        ORDER_NEW,
        json!({
            "orderId": order_id,
            "estimatedDistanceKm": distance_km,
            "reassigned": reassigned,
        }),
    );
}

pub fn publish_reassignment(
    state: &AppState,
    previous_driver: Uuid,
    order_id: Uuid,
    new_driver: Uuid,
    requires_acknowledgement: bool,
) {
    state.realtime.publish(
        &driver_room(previous_driver),
        ORDER_REASSIGNED,
        json!({
            "orderId": order_id,
            "newDriverId": new_driver,
            "newDriverName": state.directory.driver_name(new_driver),
            "requiresAcknowledgement": requires_acknowledgement,
        }),
    );
}
