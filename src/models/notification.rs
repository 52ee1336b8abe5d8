use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    OrderAssignment,
    AlarmReminder,
    DriverReassigned,
    OrderStatus,
    DeliveryConfirmed,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationKind::OrderAssignment => "ORDER_ASSIGNMENT",
            NotificationKind::AlarmReminder => "ALARM_REMINDER",
            NotificationKind::DriverReassigned => "DRIVER_REASSIGNED",
            NotificationKind::OrderStatus => "ORDER_STATUS",
            NotificationKind::DeliveryConfirmed => "DELIVERY_CONFIRMED",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Platform {
    Android,
    Ios,
    Web,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PushPriority {
    #[default]
    Normal,
    High,
}

/// Who a notification is for.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Audience {
    Devices(Vec<Uuid>),
    Driver(Uuid),
    User(Uuid),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
    #[serde(default)]
    pub priority: PushPriority,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobMetadata {
    pub order_id: Option<Uuid>,
    pub alarm_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationJob {
    pub kind: NotificationKind,
    pub audience: Audience,
    pub payload: NotificationPayload,
    #[serde(default)]
    pub metadata: JobMetadata,
}

impl NotificationJob {
    pub fn new(kind: NotificationKind, audience: Audience, title: &str, body: &str) -> Self {
        let mut data = BTreeMap::new();
        data.insert("type".to_string(), kind.as_str().to_string());

        Self {
            kind,
            audience,
            payload: NotificationPayload {
                title: title.to_string(),
                body: body.to_string(),
                data,
                priority: PushPriority::Normal,
            },
            metadata: JobMetadata::default(),
        }
    }

    pub fn with_data(mut self, key: &str, value: impl ToString) -> Self {
        self.payload.data.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_priority(mut self, priority: PushPriority) -> Self {
        self.payload.priority = priority;
        self
    }

    pub fn for_order(mut self, order_id: Uuid) -> Self {
        self.metadata.order_id = Some(order_id);
        self.payload
            .data
            .insert("orderId".to_string(), order_id.to_string());
        self
    }

    pub fn for_alarm(mut self, alarm_id: Uuid) -> Self {
        self.metadata.alarm_id = Some(alarm_id);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationDevice {
    pub id: Uuid,
    pub token: String,
    pub user_id: Option<Uuid>,
    pub driver_id: Option<Uuid>,
    pub platform: Platform,
    pub enabled: bool,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// A concrete push recipient resolved from an audience.
#[derive(Debug, Clone, PartialEq)]
pub struct PushTarget {
    /// `None` for fallback targets, which have no device row.
    pub device_id: Option<Uuid>,
    pub token: String,
    pub platform: Option<Platform>,
    pub user_id: Option<Uuid>,
    pub driver_id: Option<Uuid>,
    /// Resolved from the account's legacy token field. Never disabled or touched.
    pub fallback: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryStatus {
    Sent,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationLog {
    pub id: Uuid,
    pub device_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub driver_id: Option<Uuid>,
    pub kind: NotificationKind,
    pub status: DeliveryStatus,
    pub provider_response: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub data_keys: Vec<String>,
    pub order_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}
