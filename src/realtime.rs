use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

pub const ORDER_UPDATE: &str = "order:update";
pub const ORDER_NEW: &str = "order:new";
pub const ORDER_REASSIGNED: &str = "order:reassigned";

#[derive(Debug, Clone, Serialize)]
pub struct RealtimeEvent {
    pub room: String,
    pub event: String,
    pub payload: Value,
}

/// Room-based pub/sub sink, built once at startup and shared for the
/// lifetime of the process.
pub trait RealtimePublisher: Send + Sync {
    fn publish(&self, room: &str, event: &str, payload: Value);
}

pub struct BroadcastPublisher {
    tx: broadcast::Sender<RealtimeEvent>,
}

impl BroadcastPublisher {
    pub fn new(tx: broadcast::Sender<RealtimeEvent>) -> Self {
        Self { tx }
    }
}

impl RealtimePublisher for BroadcastPublisher {
    fn publish(&self, room: &str, event: &str, payload: Value) {
        // No subscribers is not an error.
        let _ = self.tx.send(RealtimeEvent {
            room: room.to_string(),
            event: event.to_string(),
            payload,
        });
    }
}

pub fn order_room(order_id: Uuid) -> String {
    format!("order:{order_id}")
}

pub fn user_room(user_id: Uuid) -> String {
    format!("user:{user_id}")
}

pub fn driver_room(driver_id: Uuid) -> String {
    format!("driver:{driver_id}")
}
