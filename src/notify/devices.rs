//! Resolution of audiences to push targets.
//!
//! Two stores exist and one is picked at startup: the device table (with a
//! fallback to the account's legacy token when no device is enabled) and the
//! legacy store, which only knows the single token kept on each account.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Deserialize;
use uuid::Uuid;

use crate::config::DeviceStoreKind;
use crate::directory::Directory;
use crate::error::AppError;
use crate::models::notification::{Audience, NotificationDevice, Platform, PushTarget};

#[derive(Debug, Deserialize)]
pub struct RegisterDevice {
    pub token: String,
    pub user_id: Option<Uuid>,
    pub driver_id: Option<Uuid>,
    pub platform: Platform,
}

#[async_trait]
pub trait DeviceStore: Send + Sync {
    async fn resolve(&self, audience: &Audience) -> Result<Vec<PushTarget>, AppError>;

    async fn register(&self, input: RegisterDevice) -> Result<NotificationDevice, AppError>;

    async fn disable(&self, device_id: Uuid) -> Result<(), AppError>;

    async fn touch(&self, device_id: Uuid, at: DateTime<Utc>) -> Result<(), AppError>;

    async fn list(&self) -> Vec<NotificationDevice>;
}

pub fn build_device_store(kind: DeviceStoreKind, directory: Arc<Directory>) -> Arc<dyn DeviceStore> {
    match kind {
        DeviceStoreKind::Table => Arc::new(DeviceTableStore::new(directory)),
        DeviceStoreKind::Legacy => Arc::new(LegacyTokenStore::new(directory)),
    }
}

/// Target built from the token stored on the user or driver account.
fn legacy_target(directory: &Directory, audience: &Audience) -> Option<PushTarget> {
    match audience {
        Audience::Driver(driver_id) => directory
            .driver(*driver_id)
            .and_then(|driver| driver.push_token)
            .filter(|token| !token.trim().is_empty())
            .map(|token| PushTarget {
                device_id: None,
                token,
                platform: None,
                user_id: None,
                driver_id: Some(*driver_id),
                fallback: true,
            }),
        Audience::User(user_id) => directory
            .user(*user_id)
            .and_then(|user| user.push_token)
            .filter(|token| !token.trim().is_empty())
            .map(|token| PushTarget {
                device_id: None,
                token,
                platform: None,
                user_id: Some(*user_id),
                driver_id: None,
                fallback: true,
            }),
        Audience::Devices(_) => None,
    }
}

pub struct DeviceTableStore {
    devices: DashMap<Uuid, NotificationDevice>,
    directory: Arc<Directory>,
}

impl DeviceTableStore {
    pub fn new(directory: Arc<Directory>) -> Self {
        Self {
            devices: DashMap::new(),
            directory,
        }
    }

    fn to_target(device: &NotificationDevice) -> PushTarget {
        PushTarget {
            device_id: Some(device.id),
            token: device.token.clone(),
            platform: Some(device.platform),
            user_id: device.user_id,
            driver_id: device.driver_id,
            fallback: false,
        }
    }

    fn matches(device: &NotificationDevice, audience: &Audience) -> bool {
        match audience {
            Audience::Devices(ids) => ids.contains(&device.id),
            Audience::Driver(driver_id) => device.driver_id == Some(*driver_id),
            Audience::User(user_id) => device.user_id == Some(*user_id),
        }
    }
}

#[async_trait]
impl DeviceStore for DeviceTableStore {
    async fn resolve(&self, audience: &Audience) -> Result<Vec<PushTarget>, AppError> {
        let mut targets: Vec<PushTarget> = self
            .devices
            .iter()
            .filter(|entry| entry.enabled && Self::matches(entry.value(), audience))
            .map(|entry| Self::to_target(entry.value()))
            .collect();

        if targets.is_empty() {
            targets.extend(legacy_target(&self.directory, audience));
        }

        Ok(targets)
    }

    async fn register(&self, input: RegisterDevice) -> Result<NotificationDevice, AppError> {
        let token = input.token.trim().to_string();
        if token.is_empty() {
            return Err(AppError::BadRequest("token cannot be empty".to_string()));
        }

        match (input.user_id, input.driver_id) {
            (Some(user_id), None) => {
                self.directory
                    .user(user_id)
                    .ok_or_else(|| AppError::NotFound(format!("user {user_id} not found")))?;
            }
            (None, Some(driver_id)) => {
                self.directory
                    .driver(driver_id)
                    .ok_or_else(|| AppError::NotFound(format!("driver {driver_id} not found")))?;
            }
            _ => {
                return Err(AppError::BadRequest(
                    "exactly one of user_id or driver_id is required".to_string(),
                ))
            }
        }

        let now = Utc::now();

        // A token moves with the physical device; re-registering rebinds it.
        let existing = self
            .devices
            .iter()
            .find(|entry| entry.token == token)
            .map(|entry| *entry.key());

        let device = match existing.and_then(|id| self.devices.get_mut(&id)) {
            Some(mut device) => {
                device.user_id = input.user_id;
                device.driver_id = input.driver_id;
                device.platform = input.platform;
                device.enabled = true;
                device.last_seen_at = Some(now);
                device.clone()
            }
            None => {
                let device = NotificationDevice {
                    id: Uuid::new_v4(),
                    token,
                    user_id: input.user_id,
                    driver_id: input.driver_id,
                    platform: input.platform,
                    enabled: true,
                    last_seen_at: Some(now),
                    created_at: now,
                };
                self.devices.insert(device.id, device.clone());
                device
            }
        };

        Ok(device)
    }

    async fn disable(&self, device_id: Uuid) -> Result<(), AppError> {
        let mut device = self
            .devices
            .get_mut(&device_id)
            .ok_or_else(|| AppError::NotFound(format!("device {device_id} not found")))?;
        device.enabled = false;
        Ok(())
    }

    async fn touch(&self, device_id: Uuid, at: DateTime<Utc>) -> Result<(), AppError> {
        let mut device = self
            .devices
            .get_mut(&device_id)
            .ok_or_else(|| AppError::NotFound(format!("device {device_id} not found")))?;
        device.last_seen_at = Some(at);
        Ok(())
    }

    async fn list(&self) -> Vec<NotificationDevice> {
        self.devices
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }
}

pub struct LegacyTokenStore {
    directory: Arc<Directory>,
}

impl LegacyTokenStore {
    pub fn new(directory: Arc<Directory>) -> Self {
        Self { directory }
    }
}

#[async_trait]
impl DeviceStore for LegacyTokenStore {
    async fn resolve(&self, audience: &Audience) -> Result<Vec<PushTarget>, AppError> {
        Ok(legacy_target(&self.directory, audience).into_iter().collect())
    }

    async fn register(&self, _input: RegisterDevice) -> Result<NotificationDevice, AppError> {
        Err(AppError::BadRequest(
            "device registration requires the device table store".to_string(),
        ))
    }

    // Legacy targets carry no device id, so there is never anything to update.
    async fn disable(&self, _device_id: Uuid) -> Result<(), AppError> {
        Ok(())
    }

    async fn touch(&self, _device_id: Uuid, _at: DateTime<Utc>) -> Result<(), AppError> {
        Ok(())
    }

    async fn list(&self) -> Vec<NotificationDevice> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{DeviceStore, DeviceTableStore, LegacyTokenStore, RegisterDevice};
    use crate::directory::{Directory, NewDriver};
    use crate::models::notification::{Audience, Platform};

    const TOKEN: &str = "fcm-token-0000000000000000000000000000001";

    fn directory_with_driver(push_token: Option<&str>) -> (Arc<Directory>, uuid::Uuid) {
        let directory = Arc::new(Directory::new());
        let driver = directory
            .register_driver(NewDriver {
                name: "Tunde".to_string(),
                phone: None,
                location: None,
                push_token: push_token.map(str::to_string),
            })
            .unwrap();
        (directory, driver.id)
    }

    #[tokio::test]
    async fn enabled_devices_win_over_legacy_token() {
        let (directory, driver_id) = directory_with_driver(Some("legacy-token-aaaaaaaaaaaaaaaaaaaaaaaa"));
        let store = DeviceTableStore::new(directory);
        store
            .register(RegisterDevice {
                token: TOKEN.to_string(),
                user_id: None,
                driver_id: Some(driver_id),
                platform: Platform::Android,
            })
            .await
            .unwrap();

        let targets = store.resolve(&Audience::Driver(driver_id)).await.unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].token, TOKEN);
        assert!(!targets[0].fallback);
    }

    #[tokio::test]
    async fn disabled_device_falls_back_to_legacy_token() {
        let (directory, driver_id) = directory_with_driver(Some("legacy-token-aaaaaaaaaaaaaaaaaaaaaaaa"));
        let store = DeviceTableStore::new(directory);
        let device = store
            .register(RegisterDevice {
                token: TOKEN.to_string(),
                user_id: None,
                driver_id: Some(driver_id),
                platform: Platform::Ios,
            })
            .await
            .unwrap();
        store.disable(device.id).await.unwrap();

        let targets = store.resolve(&Audience::Driver(driver_id)).await.unwrap();
        assert_eq!(targets.len(), 1);
        assert!(targets[0].fallback);
        assert!(targets[0].device_id.is_none());
    }

    #[tokio::test]
    async fn re_registering_a_token_rebinds_instead_of_duplicating() {
        let (directory, driver_id) = directory_with_driver(None);
        let store = DeviceTableStore::new(directory);
        let request = || RegisterDevice {
            token: TOKEN.to_string(),
            user_id: None,
            driver_id: Some(driver_id),
            platform: Platform::Android,
        };

        let first = store.register(request()).await.unwrap();
        store.disable(first.id).await.unwrap();
        let second = store.register(request()).await.unwrap();

        assert_eq!(first.id, second.id);
        assert!(second.enabled);
        assert_eq!(store.list().await.len(), 1);
    }

    #[tokio::test]
    async fn registration_requires_exactly_one_owner() {
        let (directory, _) = directory_with_driver(None);
        let store = DeviceTableStore::new(directory);

        let result = store
            .register(RegisterDevice {
                token: TOKEN.to_string(),
                user_id: None,
                driver_id: None,
                platform: Platform::Web,
            })
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn legacy_store_only_returns_account_token() {
        let (directory, driver_id) = directory_with_driver(Some("legacy-token-aaaaaaaaaaaaaaaaaaaaaaaa"));
        let store = LegacyTokenStore::new(directory);

        let targets = store.resolve(&Audience::Driver(driver_id)).await.unwrap();
        assert_eq!(targets.len(), 1);
        assert!(targets[0].fallback);

        let none = store
            .resolve(&Audience::Devices(vec![uuid::Uuid::new_v4()]))
            .await
            .unwrap();
        assert!(none.is_empty());
    }
}
