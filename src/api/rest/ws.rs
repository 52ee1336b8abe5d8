use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures::SinkExt;
use futures::StreamExt;
use serde::Deserialize;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, warn};

use crate::realtime::RealtimeEvent;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct Subscription {
    /// Room to follow, e.g. `order:<id>` or `driver:<id>`. Absent means all rooms.
    pub room: Option<String>,
}

impl Subscription {
    fn wants(&self, event: &RealtimeEvent) -> bool {
        self.room.as_deref().is_none_or(|room| room == event.room)
    }
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(subscription): Query<Subscription>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state, subscription))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, subscription: Subscription) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = BroadcastStream::new(state.events_tx.subscribe());
    let room = subscription.room.clone();

    info!(room = ?room, "websocket client connected");

    let send_task = tokio::spawn(async move {
        while let Some(item) = events.next().await {
            let event = match item {
                Ok(event) => event,
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(skipped, "websocket subscriber lagged, events dropped");
                    continue;
                }
            };

            if !subscription.wants(&event) {
                continue;
            }

            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(err) => {
                    warn!(error = %err, "failed to serialize realtime event for ws");
                    continue;
                }
            };

            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    let recv_task = tokio::spawn(async move {
        while let Some(Ok(_msg)) = receiver.next().await {}
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    info!(room = ?room, "websocket client disconnected");
}
