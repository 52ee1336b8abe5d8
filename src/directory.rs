//! In-process user and driver directory.
//!
//! Account management proper lives elsewhere; dispatch only needs to read
//! accounts, flip driver availability and record driver positions.

use chrono::Utc;
use dashmap::DashMap;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::driver::{Driver, GeoPoint};
use crate::models::user::User;

#[derive(Debug, Deserialize)]
pub struct NewUser {
    pub name: String,
    pub email: Option<String>,
    pub push_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct NewDriver {
    pub name: String,
    pub phone: Option<String>,
    pub location: Option<GeoPoint>,
    pub push_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DriverFlags {
    pub is_active: Option<bool>,
    pub is_blocked: Option<bool>,
}

#[derive(Default)]
pub struct Directory {
    users: DashMap<Uuid, User>,
    drivers: DashMap<Uuid, Driver>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_user(&self, input: NewUser) -> Result<User, AppError> {
        if input.name.trim().is_empty() {
            return Err(AppError::BadRequest("name cannot be empty".to_string()));
        }

        let user = User {
            id: Uuid::new_v4(),
            name: input.name,
            email: input.email,
            is_active: true,
            is_blocked: false,
            push_token: input.push_token,
            created_at: Utc::now(),
        };

        self.users.insert(user.id, user.clone());
        Ok(user)
    }

    pub fn register_driver(&self, input: NewDriver) -> Result<Driver, AppError> {
        if input.name.trim().is_empty() {
            return Err(AppError::BadRequest("name cannot be empty".to_string()));
        }

        let driver = Driver {
            id: Uuid::new_v4(),
            name: input.name,
            phone: input.phone,
            is_available: true,
            location: input.location,
            is_active: true,
            is_blocked: false,
            push_token: input.push_token,
            updated_at: Utc::now(),
        };

        self.drivers.insert(driver.id, driver.clone());
        Ok(driver)
    }

    pub fn user(&self, id: Uuid) -> Option<User> {
        self.users.get(&id).map(|entry| entry.value().clone())
    }

    pub fn driver(&self, id: Uuid) -> Option<Driver> {
        self.drivers.get(&id).map(|entry| entry.value().clone())
    }

    pub fn driver_name(&self, id: Uuid) -> Option<String> {
        self.drivers.get(&id).map(|entry| entry.name.clone())
    }

    pub fn drivers(&self) -> Vec<Driver> {
        self.drivers
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Available, active, unblocked drivers, minus the excluded ids.
    pub fn dispatchable_drivers(&self, exclude: &[Uuid]) -> Vec<Driver> {
        self.drivers
            .iter()
            .filter(|entry| entry.is_dispatchable() && !exclude.contains(entry.key()))
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Marks the driver busy if, and only if, it is still dispatchable.
    /// Returns whether the claim succeeded.
    pub fn claim_driver(&self, id: Uuid) -> bool {
        match self.drivers.get_mut(&id) {
            Some(mut driver) if driver.is_dispatchable() => {
                driver.is_available = false;
                driver.updated_at = Utc::now();
                true
            }
            _ => false,
        }
    }

    pub fn release_driver(&self, id: Uuid) {
        if let Some(mut driver) = self.drivers.get_mut(&id) {
            driver.is_available = true;
            driver.updated_at = Utc::now();
        }
    }

    pub fn set_availability(&self, id: Uuid, is_available: bool) -> Result<Driver, AppError> {
        let mut driver = self
            .drivers
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("driver {id} not found")))?;

        driver.is_available = is_available;
        driver.updated_at = Utc::now();
        Ok(driver.clone())
    }

    pub fn update_location(&self, id: Uuid, location: GeoPoint) -> Result<Driver, AppError> {
        if !(-90.0..=90.0).contains(&location.lat) || !(-180.0..=180.0).contains(&location.lng) {
            return Err(AppError::BadRequest("coordinates out of range".to_string()));
        }

        let mut driver = self
            .drivers
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("driver {id} not found")))?;

        driver.location = Some(location);
        driver.updated_at = Utc::now();
        Ok(driver.clone())
    }

    pub fn set_driver_flags(&self, id: Uuid, flags: DriverFlags) -> Result<Driver, AppError> {
        let mut driver = self
            .drivers
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("driver {id} not found")))?;

        if let Some(is_active) = flags.is_active {
            driver.is_active = is_active;
        }
        if let Some(is_blocked) = flags.is_blocked {
            driver.is_blocked = is_blocked;
        }
        driver.updated_at = Utc::now();
        Ok(driver.clone())
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn driver_count(&self) -> usize {
        self.drivers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::{Directory, DriverFlags, NewDriver};
    use crate::models::driver::GeoPoint;

    fn new_driver(name: &str) -> NewDriver {
        NewDriver {
            name: name.to_string(),
            phone: None,
            location: Some(GeoPoint { lat: 6.5, lng: 3.3 }),
            push_token: None,
        }
    }

    #[test]
    fn claim_succeeds_once_then_fails_until_released() {
        let directory = Directory::new();
        let driver = directory.register_driver(new_driver("Ada")).unwrap();

        assert!(directory.claim_driver(driver.id));
        assert!(!directory.claim_driver(driver.id));
        assert!(directory.dispatchable_drivers(&[]).is_empty());

        directory.release_driver(driver.id);
        assert!(directory.claim_driver(driver.id));
    }

    #[test]
    fn blocked_driver_is_not_dispatchable() {
        let directory = Directory::new();
        let driver = directory.register_driver(new_driver("Bola")).unwrap();
        directory
            .set_driver_flags(
                driver.id,
                DriverFlags {
                    is_active: None,
                    is_blocked: Some(true),
                },
            )
            .unwrap();

        assert!(directory.dispatchable_drivers(&[]).is_empty());
        assert!(!directory.claim_driver(driver.id));
    }

    #[test]
    fn excluded_driver_is_filtered_out() {
        let directory = Directory::new();
        let a = directory.register_driver(new_driver("A")).unwrap();
        let b = directory.register_driver(new_driver("B")).unwrap();

        let candidates = directory.dispatchable_drivers(&[a.id]);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].id, b.id);
    }

    #[test]
    fn out_of_range_location_is_rejected() {
        let directory = Directory::new();
        let driver = directory.register_driver(new_driver("C")).unwrap();
        let result = directory.update_location(driver.id, GeoPoint { lat: 95.0, lng: 0.0 });
        assert!(result.is_err());
    }
}
