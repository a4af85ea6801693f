//! Per-connection WebSocket loop. One lightweight task per socket half:
//! the send task drains the registry frame channel and runs the heartbeat,
//! the recv task parses commands and hands them to the surface adapters.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn};

use stoop_types::events::{GatewayCommand, GatewayEvent};

use crate::dispatch::DispatchEngine;
use crate::surfaces;
use crate::unread::UnreadAggregator;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Handle a pre-authenticated WebSocket connection. The JWT was already
/// validated at the HTTP upgrade layer, so the connection goes straight to
/// Ready and the event loop.
pub async fn handle_connection(
    socket: WebSocket,
    engine: DispatchEngine,
    aggregator: UnreadAggregator,
    user_id: i64,
) {
    let (mut sender, mut receiver) = socket.split();
    let registry = engine.registry().clone();

    let mut session = registry.authenticate(user_id).await;
    let conn_id = session.conn_id;

    info!("user {user_id} connected (conn {conn_id})");

    let ready = GatewayEvent::Ready { user_id };
    if sender
        .send(Message::Text(serde_json::to_string(&ready).unwrap().into()))
        .await
        .is_err()
    {
        registry.disconnect(conn_id).await;
        return;
    }

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward registry frames to the client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                frame = session.frames.recv() => {
                    let Some(frame) = frame else { break };
                    let text = serde_json::to_string(&frame).unwrap();
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("heartbeat timeout (missed {missed_heartbeats} pongs), dropping connection");
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from the client
    let engine_recv = engine.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => {
                        surfaces::handle_command(&engine_recv, &aggregator, user_id, conn_id, cmd)
                            .await;
                    }
                    Err(e) => {
                        let raw: String = text.chars().take(200).collect();
                        warn!("user {user_id} bad command: {e} -- raw: {raw}");
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    registry.disconnect(conn_id).await;
    info!("user {user_id} disconnected (conn {conn_id})");
}
