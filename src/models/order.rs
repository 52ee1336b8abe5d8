use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::driver::GeoPoint;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Assigned,
    Accepted,
    PickedUp,
    InTransit,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    /// Statuses that count as the user's one active order.
    pub const ACTIVE: [OrderStatus; 5] = [
        OrderStatus::Pending,
        OrderStatus::Assigned,
        OrderStatus::Accepted,
        OrderStatus::PickedUp,
        OrderStatus::InTransit,
    ];

    pub fn is_active(self) -> bool {
        Self::ACTIVE.contains(&self)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }

    /// Whether an order in this status must carry a driver reference.
    pub fn holds_driver(self) -> bool {
        matches!(
            self,
            OrderStatus::Assigned
                | OrderStatus::Accepted
                | OrderStatus::PickedUp
                | OrderStatus::InTransit
                | OrderStatus::Delivered
        )
    }

    /// Edges of the order state machine.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;

        if next == Cancelled {
            return !self.is_terminal();
        }

        matches!(
            (self, next),
            (Pending, Assigned)
                | (Assigned, Assigned)
                | (Assigned, Pending)
                | (Assigned, Accepted)
                | (Accepted, Assigned)
                | (Accepted, PickedUp)
                | (Accepted, InTransit)
                | (PickedUp, InTransit)
                | (InTransit, Delivered)
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Assigned => "assigned",
            OrderStatus::Accepted => "accepted",
            OrderStatus::PickedUp => "picked up",
            OrderStatus::InTransit => "in transit",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Card,
    BankTransfer,
    PaymentService,
    /// Point-of-sale terminal, paid on delivery.
    Pos,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusChange {
    pub status: OrderStatus,
    pub at: DateTime<Utc>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub order_code: String,
    pub tracking_id: String,
    pub user_id: Uuid,
    pub status: OrderStatus,
    pub driver_id: Option<Uuid>,
    pub delivery_location: Option<GeoPoint>,
    pub delivery_address: String,
    pub tank_size: String,
    pub notes: Option<String>,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub payment_reference: Option<String>,
    pub amount_paid: Option<f64>,
    /// When the gateway reported the payment as failed.
    pub payment_failed_at: Option<DateTime<Utc>>,
    pub subtotal: f64,
    pub delivery_fee: f64,
    pub total: f64,
    pub cancellation_reason: Option<String>,
    pub status_history: Vec<StatusChange>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub picked_up_at: Option<DateTime<Utc>>,
    pub in_transit_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Order {
    /// Moves the order to `status`, stamping the matching timestamp and
    /// appending to the history. Edge validation is the caller's job.
    pub fn apply_status(&mut self, status: OrderStatus, at: DateTime<Utc>, note: Option<String>) {
        self.status = status;
        self.updated_at = at;

        match status {
            OrderStatus::Pending => {
                self.assigned_at = None;
                self.accepted_at = None;
            }
            OrderStatus::Assigned => {
                self.assigned_at = Some(at);
                self.accepted_at = None;
            }
            OrderStatus::Accepted => self.accepted_at = Some(at),
            OrderStatus::PickedUp => self.picked_up_at = Some(at),
            OrderStatus::InTransit => self.in_transit_at = Some(at),
            OrderStatus::Delivered => self.delivered_at = Some(at),
            OrderStatus::Cancelled => self.cancelled_at = Some(at),
        }

        self.status_history.push(StatusChange { status, at, note });
    }

    /// `driver_id` is set exactly when the status holds a driver.
    pub fn driver_invariant_holds(&self) -> bool {
        self.driver_id.is_some() == self.status.holds_driver()
    }
}

/// Read projection used by the admin surface.
#[derive(Debug, Clone, Serialize)]
pub struct OrderView {
    #[serde(flatten)]
    pub order: Order,
    pub customer_name: Option<String>,
    pub driver_name: Option<String>,
    pub formatted_history: Vec<String>,
}

pub fn format_history(history: &[StatusChange]) -> Vec<String> {
    history
        .iter()
        .map(|change| {
            let stamp = change.at.format("%Y-%m-%d %H:%M:%S UTC");
            match &change.note {
                Some(note) => format!("{stamp}: {} ({note})", change.status),
                None => format!("{stamp}: {}", change.status),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::OrderStatus::*;

    #[test]
    fn cancelled_is_reachable_only_from_non_terminal_states() {
        for status in [Pending, Assigned, Accepted, PickedUp, InTransit] {
            assert!(status.can_transition_to(Cancelled), "{status:?}");
        }
        assert!(!Delivered.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Cancelled));
    }

    #[test]
    fn happy_path_edges_are_allowed() {
        assert!(Pending.can_transition_to(Assigned));
        assert!(Assigned.can_transition_to(Accepted));
        assert!(Accepted.can_transition_to(InTransit));
        assert!(Accepted.can_transition_to(PickedUp));
        assert!(PickedUp.can_transition_to(InTransit));
        assert!(InTransit.can_transition_to(Delivered));
        assert!(Assigned.can_transition_to(Pending));
    }

    #[test]
    fn skipping_states_is_rejected() {
        assert!(!Pending.can_transition_to(Delivered));
        assert!(!Assigned.can_transition_to(InTransit));
        assert!(!Delivered.can_transition_to(Pending));
        assert!(!Pending.can_transition_to(Accepted));
    }

    #[test]
    fn only_driver_holding_states_require_a_driver() {
        assert!(!Pending.holds_driver());
        assert!(!Cancelled.holds_driver());
        assert!(Delivered.holds_driver());
        assert!(InTransit.holds_driver());
    }
}
