use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Driver {
    pub id: Uuid,
    pub name: String,
    pub phone: Option<String>,
    pub is_available: bool,
    /// Last reported position; `None` until the driver first reports one.
    pub location: Option<GeoPoint>,
    pub is_active: bool,
    pub is_blocked: bool,
    /// Legacy single push token stored on the account.
    pub push_token: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Driver {
    /// Eligible for matching: available, active and not blocked.
    pub fn is_dispatchable(&self) -> bool {
        self.is_available && self.is_active && !self.is_blocked
    }
}
