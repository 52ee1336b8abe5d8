use tracing::warn;

use crate::error::AppError;
use crate::models::notification::NotificationJob;
use crate::notify::dispatcher::{dispatch, DispatchReport};
use crate::state::AppState;

/// Entry point for requesting delivery. There is no durable queue behind
/// it: the job is dispatched inline and the caller awaits provider latency.
pub async fn enqueue_notification(
    state: &AppState,
    job: NotificationJob,
) -> Result<DispatchReport, AppError> {
    dispatch(state, &job).await
}

/// Best-effort variant for side effects of state transitions: errors are
/// logged and reported as `None`.
pub async fn notify(state: &AppState, job: NotificationJob) -> Option<DispatchReport> {
    let kind = job.kind;
    match enqueue_notification(state, job).await {
        Ok(report) => Some(report),
        Err(err) => {
            warn!(kind = kind.as_str(), error = %err, "notification dispatch failed");
            None
        }
    }
}
