use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::notification::{
    DeliveryStatus, NotificationJob, NotificationKind, NotificationLog, PushTarget,
};
use crate::notify::push::{looks_like_provider_token, PushOutcome};
use crate::state::AppState;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub targets: usize,
    pub sent: usize,
    pub failed: usize,
    pub filtered: usize,
    /// Dropped before resolution because the reminder's alarm is resolved.
    pub stale: bool,
}

impl DispatchReport {
    pub fn delivered(&self) -> bool {
        self.sent > 0
    }
}

/// Resolves the job's audience and delivers it batch by batch.
///
/// Per-token failures and whole-batch provider errors are recorded and
/// counted, never returned; only a failure to resolve the audience is an
/// `Err`. Nothing is retried here.
pub async fn dispatch(state: &AppState, job: &NotificationJob) -> Result<DispatchReport, AppError> {
    let mut report = DispatchReport::default();

    if is_stale_reminder(state, job) {
        debug!(
            alarm_id = ?job.metadata.alarm_id,
            order_id = ?job.metadata.order_id,
            "dropping reminder for resolved alarm"
        );
        state
            .metrics
            .notifications_total
            .with_label_values(&["stale"])
            .inc();
        report.stale = true;
        return Ok(report);
    }

    let targets = state.devices.resolve(&job.audience).await?;
    report.targets = targets.len();

    if targets.is_empty() {
        debug!(kind = job.kind.as_str(), audience = ?job.audience, "no push targets for audience");
        return Ok(report);
    }

    for batch in targets.chunks(state.config.push_batch_size.max(1)) {
        let (sendable, rejected): (Vec<&PushTarget>, Vec<&PushTarget>) = batch
            .iter()
            .partition(|target| looks_like_provider_token(&target.token));

        for target in &rejected {
            info!(
                device_id = ?target.device_id,
                driver_id = ?target.driver_id,
                user_id = ?target.user_id,
                "skipping token that does not look like a provider token"
            );
        }
        report.filtered += rejected.len();

        if sendable.is_empty() {
            continue;
        }

        let tokens: Vec<String> = sendable.iter().map(|target| target.token.clone()).collect();

        match state.push.send_multicast(&job.payload, &tokens).await {
            Ok(outcomes) if outcomes.len() == sendable.len() => {
                for (target, outcome) in sendable.iter().zip(outcomes) {
                    handle_outcome(state, job, target, outcome, &mut report).await;
                }
            }
            Ok(outcomes) => {
                let message = format!(
                    "provider returned {} outcomes for {} tokens",
                    outcomes.len(),
                    sendable.len()
                );
                error!(kind = job.kind.as_str(), "{message}");
                fail_batch(state, job, &sendable, &message, &mut report);
            }
            Err(err) => {
                error!(
                    kind = job.kind.as_str(),
                    batch_size = sendable.len(),
                    error = %err,
                    "push batch failed"
                );
                fail_batch(state, job, &sendable, &err.to_string(), &mut report);
            }
        }
    }

    state
        .metrics
        .notifications_total
        .with_label_values(&["sent"])
        .inc_by(report.sent as u64);
    state
        .metrics
        .notifications_total
        .with_label_values(&["failed"])
        .inc_by(report.failed as u64);
    state
        .metrics
        .notifications_total
        .with_label_values(&["filtered"])
        .inc_by(report.filtered as u64);

    Ok(report)
}

fn is_stale_reminder(state: &AppState, job: &NotificationJob) -> bool {
    if job.kind != NotificationKind::AlarmReminder {
        return false;
    }

    match job.metadata.alarm_id {
        Some(alarm_id) => !state.alarms.is_live(alarm_id, job.metadata.order_id),
        None => false,
    }
}

async fn handle_outcome(
    state: &AppState,
    job: &NotificationJob,
    target: &PushTarget,
    outcome: PushOutcome,
    report: &mut DispatchReport,
) {
    match outcome {
        PushOutcome::Delivered { message_id } => {
            report.sent += 1;
            record_log(state, job, target, DeliveryStatus::Sent, message_id, None, None);

            if let (Some(device_id), false) = (target.device_id, target.fallback) {
                if let Err(err) = state.devices.touch(device_id, Utc::now()).await {
                    warn!(device_id = %device_id, error = %err, "failed to bump device last seen");
                }
            }
        }
        PushOutcome::Failed {
            code,
            message,
            dead_token,
        } => {
            report.failed += 1;
            warn!(
                device_id = ?target.device_id,
                code = %code,
                fallback = target.fallback,
                "push delivery failed"
            );
            record_log(
                state,
                job,
                target,
                DeliveryStatus::Failed,
                None,
                Some(code),
                Some(message),
            );

            if let (Some(device_id), true, false) = (target.device_id, dead_token, target.fallback)
            {
                match state.devices.disable(device_id).await {
                    Ok(()) => info!(device_id = %device_id, "disabled unregistered device"),
                    Err(err) => {
                        warn!(device_id = %device_id, error = %err, "failed to disable device")
                    }
                }
            }
        }
    }
}

fn fail_batch(
    state: &AppState,
    job: &NotificationJob,
    targets: &[&PushTarget],
    message: &str,
    report: &mut DispatchReport,
) {
    for target in targets {
        report.failed += 1;
        record_log(
            state,
            job,
            target,
            DeliveryStatus::Failed,
            None,
            Some("batch_error".to_string()),
            Some(message.to_string()),
        );
    }
}

fn record_log(
    state: &AppState,
    job: &NotificationJob,
    target: &PushTarget,
    status: DeliveryStatus,
    provider_response: Option<String>,
    error_code: Option<String>,
    error_message: Option<String>,
) {
    let log = NotificationLog {
        id: Uuid::new_v4(),
        device_id: target.device_id,
        user_id: target.user_id,
        driver_id: target.driver_id,
        kind: job.kind,
        status,
        provider_response,
        error_code,
        error_message,
        data_keys: job.payload.data.keys().cloned().collect(),
        order_id: job.metadata.order_id,
        created_at: Utc::now(),
    };

    state.notification_logs.insert(log.id, log);
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use uuid::Uuid;

    use super::dispatch;
    use crate::config::Config;
    use crate::directory::NewDriver;
    use crate::models::notification::{
        Audience, DeliveryStatus, NotificationJob, NotificationKind, NotificationPayload, Platform,
    };
    use crate::notify::devices::RegisterDevice;
    use crate::notify::push::{PushError, PushOutcome, PushProvider};
    use crate::state::AppState;

    /// Replays scripted outcomes keyed by token; unknown tokens succeed.
    #[derive(Default)]
    struct ScriptedPush {
        dead_tokens: Vec<String>,
        fail_batches: bool,
        calls: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl PushProvider for ScriptedPush {
        async fn send_multicast(
            &self,
            _payload: &NotificationPayload,
            tokens: &[String],
        ) -> Result<Vec<PushOutcome>, PushError> {
            self.calls.lock().unwrap().push(tokens.len());
            if self.fail_batches {
                return Err(PushError::Protocol("connection reset".to_string()));
            }
            Ok(tokens
                .iter()
                .map(|token| {
                    if self.dead_tokens.contains(token) {
                        PushOutcome::Failed {
                            code: "NotRegistered".to_string(),
                            message: "gone".to_string(),
                            dead_token: true,
                        }
                    } else {
                        PushOutcome::Delivered {
                            message_id: Some("msg-1".to_string()),
                        }
                    }
                })
                .collect())
        }
    }

    fn token(n: usize) -> String {
        format!("fcm-token-{n:032}")
    }

    fn state_with(push: Arc<ScriptedPush>, batch_size: usize) -> AppState {
        let config = Config {
            push_batch_size: batch_size,
            ..Config::default()
        };
        AppState::new(config, push)
    }

    fn driver(state: &AppState, legacy: Option<String>) -> Uuid {
        state
            .directory
            .register_driver(NewDriver {
                name: "Kemi".to_string(),
                phone: None,
                location: None,
                push_token: legacy,
            })
            .unwrap()
            .id
    }

    async fn device(state: &AppState, driver_id: Uuid, token: String) -> Uuid {
        state
            .devices
            .register(RegisterDevice {
                token,
                user_id: None,
                driver_id: Some(driver_id),
                platform: Platform::Android,
            })
            .await
            .unwrap()
            .id
    }

    fn job(driver_id: Uuid) -> NotificationJob {
        NotificationJob::new(
            NotificationKind::OrderAssignment,
            Audience::Driver(driver_id),
            "New delivery",
            "You have a new order",
        )
    }

    #[tokio::test]
    async fn targets_are_split_into_provider_sized_batches() {
        let push = Arc::new(ScriptedPush::default());
        let state = state_with(push.clone(), 2);
        let driver_id = driver(&state, None);
        for n in 0..5 {
            device(&state, driver_id, token(n)).await;
        }

        let report = dispatch(&state, &job(driver_id)).await.unwrap();

        assert_eq!(report.sent, 5);
        let mut calls = push.calls.lock().unwrap().clone();
        calls.sort_unstable();
        assert_eq!(calls, vec![1, 2, 2]);
        assert_eq!(state.notification_logs.len(), 5);
    }

    #[tokio::test]
    async fn dead_device_token_is_disabled_and_logged() {
        let dead = token(1);
        let push = Arc::new(ScriptedPush {
            dead_tokens: vec![dead.clone()],
            ..ScriptedPush::default()
        });
        let state = state_with(push, 500);
        let driver_id = driver(&state, None);
        let dead_id = device(&state, driver_id, dead).await;
        let live_id = device(&state, driver_id, token(2)).await;

        let report = dispatch(&state, &job(driver_id)).await.unwrap();
        assert_eq!((report.sent, report.failed), (1, 1));

        let devices = state.devices.list().await;
        let dead_device = devices.iter().find(|d| d.id == dead_id).unwrap();
        let live_device = devices.iter().find(|d| d.id == live_id).unwrap();
        assert!(!dead_device.enabled);
        assert!(live_device.enabled);

        let failed_logs = state
            .notification_logs
            .iter()
            .filter(|log| log.status == DeliveryStatus::Failed)
            .count();
        assert_eq!(failed_logs, 1);
    }

    #[tokio::test]
    async fn fallback_target_is_never_disabled() {
        let legacy = token(9);
        let push = Arc::new(ScriptedPush {
            dead_tokens: vec![legacy.clone()],
            ..ScriptedPush::default()
        });
        let state = state_with(push, 500);
        let driver_id = driver(&state, Some(legacy.clone()));

        let report = dispatch(&state, &job(driver_id)).await.unwrap();
        assert_eq!(report.failed, 1);

        let again = dispatch(&state, &job(driver_id)).await.unwrap();
        assert_eq!(again.targets, 1, "legacy token stays resolvable");
        assert_eq!(
            state.directory.driver(driver_id).unwrap().push_token,
            Some(legacy)
        );
    }

    #[tokio::test]
    async fn foreign_sdk_tokens_are_filtered_before_the_provider() {
        let push = Arc::new(ScriptedPush::default());
        let state = state_with(push.clone(), 500);
        let driver_id = driver(&state, None);
        device(&state, driver_id, "ExponentPushToken[xxxxxxxxxxxxxxxxxxxxxxxx]".to_string()).await;

        let report = dispatch(&state, &job(driver_id)).await.unwrap();
        assert_eq!(report.filtered, 1);
        assert_eq!(report.sent, 0);
        assert!(push.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn batch_failure_is_recorded_but_not_returned() {
        let push = Arc::new(ScriptedPush {
            fail_batches: true,
            ..ScriptedPush::default()
        });
        let state = state_with(push, 1);
        let driver_id = driver(&state, None);
        device(&state, driver_id, token(1)).await;
        device(&state, driver_id, token(2)).await;

        let report = dispatch(&state, &job(driver_id)).await.unwrap();
        assert_eq!(report.failed, 2);
        assert_eq!(state.notification_logs.len(), 2);
    }

    #[tokio::test]
    async fn reminder_for_resolved_alarm_is_dropped_but_other_kinds_are_sent() {
        let push = Arc::new(ScriptedPush::default());
        let state = state_with(push, 500);
        let driver_id = driver(&state, None);
        device(&state, driver_id, token(1)).await;

        let order_id = Uuid::new_v4();
        let alarm = state.alarms.reset(order_id, driver_id, chrono::Utc::now());
        state.alarms.acknowledge(order_id, chrono::Utc::now());

        let reminder = NotificationJob::new(
            NotificationKind::AlarmReminder,
            Audience::Driver(driver_id),
            "Reminder",
            "Please acknowledge",
        )
        .for_order(order_id)
        .for_alarm(alarm.id);
        let report = dispatch(&state, &reminder).await.unwrap();
        assert!(report.stale);
        assert_eq!(report.sent, 0);

        let assignment = job(driver_id).for_order(order_id).for_alarm(alarm.id);
        let report = dispatch(&state, &assignment).await.unwrap();
        assert!(!report.stale);
        assert_eq!(report.sent, 1);
    }
}
