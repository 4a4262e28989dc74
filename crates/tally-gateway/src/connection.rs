use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::registry::ChannelHandle;
use crate::sync::SyncEngine;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Drives one authenticated, push-only channel for `user_id`.
///
/// The connection registers itself (superseding any earlier channel for the
/// same user), receives a full `all_timers` snapshot straight away, then
/// relays whatever the sync engine queues until either side closes.
pub async fn handle_connection(socket: WebSocket, sync: SyncEngine, user_id: Uuid) {
    let (mut sender, mut receiver) = socket.split();

    let (handle, mut push_rx) = ChannelHandle::open();
    let conn_id = handle.conn_id();
    if let Some(previous) = sync.registry().register(user_id, handle) {
        info!("{} reconnected; channel {} superseded by {}", user_id, previous.conn_id(), conn_id);
    }
    info!("{} connected on channel {}", user_id, conn_id);

    sync.push_all(user_id).await;

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received;

    // Forward pushed snapshots -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = push_rx.recv() => {
                    // None: the registry dropped this channel (superseded or unregistered).
                    let Some(event) = event else { break };

                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("Failed to encode {} snapshot: {}", event.kind(), e);
                            continue;
                        }
                    };
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
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }

        let _ = sender.close().await;
    });

    // The channel is push-only: client frames other than Pong/Close are ignored.
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                Message::Text(text) => {
                    trace!("{} sent {} bytes on a push-only channel, ignoring", user_id, text.as_str().len());
                }
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    if sync.registry().unregister_conn(user_id, conn_id) {
        info!("{} disconnected from channel {}", user_id, conn_id);
    } else {
        debug!("Superseded channel {} for {} closed", conn_id, user_id);
    }
}
