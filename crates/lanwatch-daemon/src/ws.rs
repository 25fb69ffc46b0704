//! WebSocket handler for real-time updates

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use lanwatch_core::DeviceView;
use lanwatch_discovery::DiscoveryEvent;
use serde::Serialize;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::state::AppState;

/// WebSocket message types
#[derive(Debug, Serialize)]
#[serde(tag = "type", content = "data")]
enum WsMessage {
    #[serde(rename = "devices")]
    Devices(BTreeMap<Ipv4Addr, DeviceView>),
    #[serde(rename = "device_online")]
    DeviceOnline { ip: Ipv4Addr, device: Option<DeviceView> },
    #[serde(rename = "device_offline")]
    DeviceOffline { ip: Ipv4Addr },
    #[serde(rename = "device_refreshed")]
    DeviceRefreshed { ip: Ipv4Addr, device: Option<DeviceView> },
    #[serde(rename = "scan_started")]
    ScanStarted,
    #[serde(rename = "scan_completed")]
    ScanCompleted { found: usize, total: usize },
    #[serde(rename = "pong")]
    Pong,
}

/// WebSocket upgrade handler
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Translate a scanner event, attaching the published device where one exists
async fn to_message(state: &AppState, event: DiscoveryEvent) -> WsMessage {
    match event {
        DiscoveryEvent::ScanStarted => WsMessage::ScanStarted,
        DiscoveryEvent::ScanCompleted { found, total } => WsMessage::ScanCompleted { found, total },
        DiscoveryEvent::DeviceOnline(ip) => WsMessage::DeviceOnline {
            ip,
            device: state.scanner.registry().device(ip).await,
        },
        DiscoveryEvent::DeviceOffline(ip) => WsMessage::DeviceOffline { ip },
        DiscoveryEvent::DeviceRefreshed(ip) => WsMessage::DeviceRefreshed {
            ip,
            device: state.scanner.registry().device(ip).await,
        },
    }
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut discovery_events = state.subscribe();

    info!("WebSocket client connected");

    // Send current device list on connect
    let msg = WsMessage::Devices(state.devices().await);
    if let Ok(json) = serde_json::to_string(&msg) {
        if sender.send(Message::Text(json.into())).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            event = discovery_events.recv() => {
                match event {
                    Ok(event) => {
                        let msg = to_message(&state, event).await;
                        if let Ok(json) = serde_json::to_string(&msg) {
                            if sender.send(Message::Text(json.into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        debug!(skipped = n, "Discovery event channel lagged");
                    }
                    Err(e) => {
                        debug!(error = %e, "Discovery event channel error");
                        break;
                    }
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Text(text))) => {
                        if text.as_str() == "ping" {
                            if let Ok(pong) = serde_json::to_string(&WsMessage::Pong) {
                                if sender.send(Message::Text(pong.into())).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    info!("WebSocket client disconnected");
}
