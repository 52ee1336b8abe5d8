use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlarmStatus {
    Pending,
    Acknowledged,
    Cancelled,
}

/// Tracks whether the driver currently on an order has acknowledged it.
/// Stored one per order; a reassignment resets the record in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentAlarm {
    pub id: Uuid,
    pub order_id: Uuid,
    pub driver_id: Uuid,
    pub status: AlarmStatus,
    pub requested_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub last_reminder_at: Option<DateTime<Utc>>,
    pub reminder_count: u32,
}

impl AssignmentAlarm {
    pub fn is_pending(&self) -> bool {
        self.status == AlarmStatus::Pending
    }

    /// A reminder is due when none was ever sent or the interval has elapsed.
    pub fn reminder_due(&self, now: DateTime<Utc>, interval: chrono::Duration) -> bool {
        match self.last_reminder_at {
            Some(last) => now - last >= interval,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    use super::{AlarmStatus, AssignmentAlarm};

    fn alarm(last_reminder_at: Option<chrono::DateTime<Utc>>) -> AssignmentAlarm {
        let now = Utc::now();
        AssignmentAlarm {
            id: Uuid::new_v4(),
            order_id: Uuid::new_v4(),
            driver_id: Uuid::new_v4(),
            status: AlarmStatus::Pending,
            requested_at: now,
            acknowledged_at: None,
            resolved_at: None,
            last_reminder_at,
            reminder_count: 0,
        }
    }

    #[test]
    fn missing_marker_is_due() {
        assert!(alarm(None).reminder_due(Utc::now(), Duration::seconds(120)));
    }

    #[test]
    fn marker_older_than_interval_is_due() {
        let now = Utc::now();
        let stale = alarm(Some(now - Duration::seconds(121)));
        let fresh = alarm(Some(now - Duration::seconds(10)));

        assert!(stale.reminder_due(now, Duration::seconds(120)));
        assert!(!fresh.reminder_due(now, Duration::seconds(120)));
    }
}
