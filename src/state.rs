use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{broadcast, Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::config::Config;
use crate::directory::Directory;
use crate::engine::alarms::AlarmBook;
use crate::models::notification::NotificationLog;
use crate::models::order::Order;
use crate::notify::devices::{build_device_store, DeviceStore};
use crate::notify::push::PushProvider;
use crate::observability::metrics::Metrics;
use crate::realtime::{BroadcastPublisher, RealtimeEvent, RealtimePublisher};

pub struct AppState {
    pub config: Config,
    pub directory: Arc<Directory>,
    pub orders: DashMap<Uuid, Order>,
    pub alarms: AlarmBook,
    pub notification_logs: DashMap<Uuid, NotificationLog>,
    pub devices: Arc<dyn DeviceStore>,
    pub push: Arc<dyn PushProvider>,
    pub realtime: Arc<dyn RealtimePublisher>,
    pub events_tx: broadcast::Sender<RealtimeEvent>,
    /// Per-order (and per-user, for creation) serialisation of transitions.
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
    /// Process-local; does not coordinate schedulers across instances.
    pub sweep_running: AtomicBool,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(config: Config, push: Arc<dyn PushProvider>) -> Self {
        let (events_tx, _unused_rx) = broadcast::channel(config.event_buffer_size.max(1));
        let directory = Arc::new(Directory::new());
        let devices = build_device_store(config.device_store, directory.clone());
        let realtime = Arc::new(BroadcastPublisher::new(events_tx.clone()));

        Self {
            config,
            directory,
            orders: DashMap::new(),
            alarms: AlarmBook::new(),
            notification_logs: DashMap::new(),
            devices,
            push,
            realtime,
            events_tx,
            locks: DashMap::new(),
            sweep_running: AtomicBool::new(false),
            metrics: Metrics::new(),
        }
    }

    /// Waits for exclusive access to the entity with `id`.
    pub async fn lock(&self, id: Uuid) -> EntityGuard<'_> {
        let lock = self
            .locks
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        EntityGuard {
            locks: &self.locks,
            id,
            guard: Some(lock.lock_owned().await),
        }
    }
}

/// Held access to one order or user. The lock table entry is dropped with
/// the last holder, so the table only grows with in-flight operations.
pub struct EntityGuard<'a> {
    locks: &'a DashMap<Uuid, Arc<Mutex<()>>>,
    id: Uuid,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for EntityGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Waiters hold their own clone; only the table's reference may remain.
        self.locks
            .remove_if(&self.id, |_, lock| Arc::strong_count(lock) == 1);
    }
}
