//! Event stream WebSocket

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
    Extension,
};
use chrono::Utc;
use futures::{
    sink::SinkExt,
    stream::{SplitSink, StreamExt},
};
use pmw_core::Principal;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

use crate::events::StreamEvent;
use crate::middleware::ClientIp;
use crate::state::AppState;

/// GET /ws/events - upgrade to a stream of plugin events
pub async fn events_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Extension(ClientIp(client_ip)): Extension<ClientIp>,
) -> Response {
    // Subscribe before the upgrade so nothing emitted in between is lost
    let events = state.events.subscribe();
    ws.on_upgrade(move |socket| stream_events(socket, events, principal.name, client_ip))
}

async fn stream_events(
    socket: WebSocket,
    mut events: broadcast::Receiver<StreamEvent>,
    user: String,
    client_ip: String,
) {
    let (mut sender, mut receiver) = socket.split();
    info!("Event stream opened for {} from {}", user, client_ip);

    let welcome = StreamEvent::Connected {
        message: "Connected to pluginmanager-web events".to_string(),
        timestamp: Utc::now(),
    };
    if let Err(e) = send_event(&mut sender, &welcome).await {
        warn!("Failed to send welcome to {}: {}", client_ip, e);
        return;
    }

    let mut send_task = tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => StreamEvent::Lagged { skipped },
                Err(RecvError::Closed) => break,
            };
            if send_event(&mut sender, &event).await.is_err() {
                break;
            }
        }
    });

    // Clients only listen; anything they send is ignored until they close
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            match message {
                Message::Close(_) => break,
                Message::Text(text) => debug!("Ignoring client message: {}", text),
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    }

    info!("Event stream closed for {} from {}", user, client_ip);
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &StreamEvent,
) -> Result<(), axum::Error> {
    match serde_json::to_string(event) {
        Ok(text) => sender.send(Message::Text(text)).await,
        Err(e) => {
            warn!("Failed to serialize stream event: {}", e);
            Ok(())
        }
    }
}
