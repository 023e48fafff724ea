use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use pawlink_types::events::{GatewayCommand, GatewayEvent};

use crate::rooms::{ConnectionId, RoomRouter};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Handle one live socket until it closes.
///
/// Room memberships live only as long as the socket; a reconnecting client
/// starts with none and must send `JoinAll` again.
pub async fn handle_connection(socket: WebSocket, router: RoomRouter) {
    let (mut sender, mut receiver) = socket.split();
    let (conn_id, mut events_rx) = router.register();

    info!("Connection {} opened ({} live)", conn_id, router.connection_count());
    router.send_to(conn_id, GatewayEvent::Ready { connection_id: conn_id });

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward queued events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = events_rx.recv() => {
                    let Some(event) = event else { break };
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("Failed to encode event for {}: {}", conn_id, e);
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
                            warn!("Heartbeat timeout on {} (missed {} pongs), dropping connection", conn_id, missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let recv_router = router.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => {
                        if let Some(ack) = apply_command(&recv_router, conn_id, cmd) {
                            recv_router.send_to(conn_id, ack);
                        }
                    }
                    Err(e) => {
                        warn!(
                            "{} bad command: {} -- raw: {}",
                            conn_id,
                            e,
                            text.chars().take(200).collect::<String>()
                        );
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

    let dropped = router.disconnect(conn_id);
    info!("Connection {} closed, left {} rooms", conn_id, dropped);
}

/// Apply one client command to the router. Returns the acknowledgement to
/// send back, if any.
pub(crate) fn apply_command(
    router: &RoomRouter,
    conn_id: ConnectionId,
    cmd: GatewayCommand,
) -> Option<GatewayEvent> {
    match cmd {
        GatewayCommand::Join { conversation_id } => {
            let added = router.join(conn_id, conversation_id);
            debug!("{} join {} (new: {})", conn_id, conversation_id, added);
            Some(GatewayEvent::Joined {
                conversation_ids: router.subscriptions(conn_id),
            })
        }

        GatewayCommand::JoinAll { conversation_ids } => {
            let added = router.join_all(conn_id, &conversation_ids);
            info!(
                "{} joining {} conversations ({} new)",
                conn_id,
                conversation_ids.len(),
                added
            );
            Some(GatewayEvent::Joined {
                conversation_ids: router.subscriptions(conn_id),
            })
        }

        GatewayCommand::Leave { conversation_id } => {
            let removed = router.leave(conn_id, conversation_id);
            debug!("{} leave {} (was member: {})", conn_id, conversation_id, removed);
            None
        }
    }
}
