//! Assignment alarm store.
//!
//! At most one live alarm exists per order. Resetting an order's alarm
//! retires the previous record (cancelling it if it was still pending) and
//! starts a new one with a fresh id, so reminders built for the old alarm
//! are recognisably stale.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::models::alarm::{AlarmStatus, AssignmentAlarm};

#[derive(Default)]
pub struct AlarmBook {
    current: DashMap<Uuid, AssignmentAlarm>,
    retired: DashMap<Uuid, AssignmentAlarm>,
}

impl AlarmBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates or resets the alarm for `order_id`, expecting `driver_id` to
    /// acknowledge it.
    pub fn reset(&self, order_id: Uuid, driver_id: Uuid, now: DateTime<Utc>) -> AssignmentAlarm {
        let alarm = AssignmentAlarm {
            id: Uuid::new_v4(),
            order_id,
            driver_id,
            status: AlarmStatus::Pending,
            requested_at: now,
            acknowledged_at: None,
            resolved_at: None,
            last_reminder_at: None,
            reminder_count: 0,
        };

        if let Some(mut previous) = self.current.insert(order_id, alarm.clone()) {
            if previous.is_pending() {
                resolve(&mut previous, AlarmStatus::Cancelled, now);
            }
            self.retired.insert(previous.id, previous);
        }

        alarm
    }

    pub fn acknowledge(&self, order_id: Uuid, now: DateTime<Utc>) -> Option<AssignmentAlarm> {
        self.resolve_pending(order_id, AlarmStatus::Acknowledged, now)
    }

    pub fn cancel(&self, order_id: Uuid, now: DateTime<Utc>) -> Option<AssignmentAlarm> {
        self.resolve_pending(order_id, AlarmStatus::Cancelled, now)
    }

    /// Resolves the order's alarm if it is still pending; terminal alarms
    /// are left untouched. Returns the alarm that was resolved.
    pub fn resolve_pending(
        &self,
        order_id: Uuid,
        status: AlarmStatus,
        now: DateTime<Utc>,
    ) -> Option<AssignmentAlarm> {
        let mut alarm = self.current.get_mut(&order_id)?;
        if !alarm.is_pending() {
            return None;
        }
        resolve(&mut alarm, status, now);
        Some(alarm.clone())
    }

    /// Cancels the order's pending alarm unless it targets `keep_driver`.
    pub fn cancel_other_drivers(&self, order_id: Uuid, keep_driver: Uuid, now: DateTime<Utc>) {
        if let Some(mut alarm) = self.current.get_mut(&order_id) {
            if alarm.driver_id != keep_driver && alarm.is_pending() {
                resolve(&mut alarm, AlarmStatus::Cancelled, now);
            }
        }
    }

    pub fn for_order(&self, order_id: Uuid) -> Option<AssignmentAlarm> {
        self.current.get(&order_id).map(|entry| entry.value().clone())
    }

    /// Looks up current and retired alarms.
    pub fn by_id(&self, alarm_id: Uuid) -> Option<AssignmentAlarm> {
        self.retired
            .get(&alarm_id)
            .map(|entry| entry.value().clone())
            .or_else(|| {
                self.current
                    .iter()
                    .find(|entry| entry.id == alarm_id)
                    .map(|entry| entry.value().clone())
            })
    }

    /// True while `alarm_id` is the order's current alarm and still pending.
    pub fn is_live(&self, alarm_id: Uuid, order_id: Option<Uuid>) -> bool {
        match order_id {
            Some(order_id) => self
                .current
                .get(&order_id)
                .is_some_and(|alarm| alarm.id == alarm_id && alarm.is_pending()),
            None => self
                .current
                .iter()
                .any(|entry| entry.id == alarm_id && entry.is_pending()),
        }
    }

    pub fn pending(&self) -> Vec<AssignmentAlarm> {
        self.current
            .iter()
            .filter(|entry| entry.is_pending())
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Stamps the reminder marker. Returns false when the alarm was resolved
    /// or replaced in the meantime.
    pub fn mark_reminded(&self, order_id: Uuid, alarm_id: Uuid, at: DateTime<Utc>) -> bool {
        match self.current.get_mut(&order_id) {
            Some(mut alarm) if alarm.id == alarm_id && alarm.is_pending() => {
                alarm.last_reminder_at = Some(at);
                alarm.reminder_count = alarm.reminder_count.saturating_add(1);
                true
            }
            _ => false,
        }
    }

    pub fn all(&self) -> Vec<AssignmentAlarm> {
        self.current
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.current.len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_empty()
    }
}

fn resolve(alarm: &mut AssignmentAlarm, status: AlarmStatus, now: DateTime<Utc>) {
    alarm.status = status;
    alarm.resolved_at = Some(now);
    if status == AlarmStatus::Acknowledged {
        alarm.acknowledged_at = Some(now);
    }
    // Drops the scheduled reminder along with the marker.
    alarm.last_reminder_at = None;
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::AlarmBook;
    use crate::models::alarm::AlarmStatus;

    #[test]
    fn reset_replaces_instead_of_duplicating() {
        let book = AlarmBook::new();
        let order_id = Uuid::new_v4();
        let first_driver = Uuid::new_v4();
        let second_driver = Uuid::new_v4();

        let first = book.reset(order_id, first_driver, Utc::now());
        let second = book.reset(order_id, second_driver, Utc::now());

        assert_eq!(book.len(), 1);
        assert_ne!(first.id, second.id);
        assert_eq!(book.for_order(order_id).unwrap().driver_id, second_driver);
        assert_eq!(book.by_id(first.id).unwrap().status, AlarmStatus::Cancelled);
        assert!(!book.is_live(first.id, Some(order_id)));
        assert!(book.is_live(second.id, Some(order_id)));
    }

    #[test]
    fn acknowledged_alarm_is_terminal_until_reset() {
        let book = AlarmBook::new();
        let order_id = Uuid::new_v4();
        let driver_id = Uuid::new_v4();
        book.reset(order_id, driver_id, Utc::now());

        let acked = book.acknowledge(order_id, Utc::now()).unwrap();
        assert_eq!(acked.status, AlarmStatus::Acknowledged);
        assert!(acked.acknowledged_at.is_some());
        assert!(acked.resolved_at.is_some());

        assert!(book.cancel(order_id, Utc::now()).is_none());
        assert_eq!(
            book.for_order(order_id).unwrap().status,
            AlarmStatus::Acknowledged
        );

        book.reset(order_id, driver_id, Utc::now());
        assert_eq!(book.for_order(order_id).unwrap().status, AlarmStatus::Pending);
    }

    #[test]
    fn resolving_clears_the_reminder_marker() {
        let book = AlarmBook::new();
        let order_id = Uuid::new_v4();
        let alarm = book.reset(order_id, Uuid::new_v4(), Utc::now());
        assert!(book.mark_reminded(order_id, alarm.id, Utc::now()));

        let cancelled = book.cancel(order_id, Utc::now()).unwrap();
        assert!(cancelled.last_reminder_at.is_none());
        assert!(!book.mark_reminded(order_id, alarm.id, Utc::now()));
    }

    #[test]
    fn cancel_other_drivers_keeps_the_matching_alarm() {
        let book = AlarmBook::new();
        let order_id = Uuid::new_v4();
        let driver_id = Uuid::new_v4();
        book.reset(order_id, driver_id, Utc::now());

        book.cancel_other_drivers(order_id, driver_id, Utc::now());
        assert!(book.for_order(order_id).unwrap().is_pending());

        book.cancel_other_drivers(order_id, Uuid::new_v4(), Utc::now());
        assert_eq!(book.for_order(order_id).unwrap().status, AlarmStatus::Cancelled);
    }
}
