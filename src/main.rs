use std::sync::Arc;

use order_dispatch::api;
use order_dispatch::config::{Config, LogFormat};
use order_dispatch::engine::reminder::run_reminder_scheduler;
use order_dispatch::error::AppError;
use order_dispatch::notify::push::{FcmPushProvider, LogPushProvider, PushProvider};
use order_dispatch::state::AppState;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = Config::from_env()?;

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .with_target(false);
    match config.log_format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Compact => subscriber.compact().init(),
    }

    let push = push_provider(&config)?;
    let shared_state = Arc::new(AppState::new(config.clone(), push));

    tokio::spawn(run_reminder_scheduler(shared_state.clone()));

    let app = api::rest::router(shared_state);

    let bind_addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| AppError::Internal(format!("failed to bind {bind_addr}: {err}")))?;

    tracing::info!(http_port = config.http_port, "http server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::Internal(format!("server error: {err}")))?;

    Ok(())
}

fn push_provider(config: &Config) -> Result<Arc<dyn PushProvider>, AppError> {
    match &config.fcm_server_key {
        Some(key) => {
            let provider =
                FcmPushProvider::new(config.fcm_endpoint.clone(), key.clone(), config.push_timeout)
                    .map_err(|err| AppError::Internal(format!("push provider: {err}")))?;
            tracing::info!(endpoint = %config.fcm_endpoint, "fcm push provider enabled");
            Ok(Arc::new(provider))
        }
        None => {
            tracing::warn!("FCM_SERVER_KEY not set, push notifications are only logged");
            Ok(Arc::new(LogPushProvider))
        }
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
