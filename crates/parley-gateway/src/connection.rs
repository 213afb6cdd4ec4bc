use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{error, info, warn};

use parley_types::errors::ChannelError;
use parley_types::events::{ClientCommand, ServerEvent};

use crate::hub::BroadcastHub;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

fn encode(event: &ServerEvent) -> Message {
    match serde_json::to_string(event) {
        Ok(text) => Message::Text(text.into()),
        Err(e) => {
            // Only reachable if a model stops being serializable.
            error!("Failed to encode {:?}: {}", event, e);
            Message::Close(None)
        }
    }
}

/// Drive one upgraded channel.
///
/// `username` is the identity the upgrade handler resolved from the session.
/// `None` gets a single `no-session` notice and the socket is closed without
/// ever touching the hub. A failed history read at join sends one `error`
/// event and closes.
pub async fn handle_connection(mut socket: WebSocket, hub: BroadcastHub, username: Option<String>) {
    let Some(username) = username else {
        warn!("Channel opened without a valid session, rejecting");
        let _ = socket.send(encode(&ServerEvent::NoSession)).await;
        let _ = socket.send(Message::Close(None)).await;
        return;
    };

    let (conn, mut events) = match hub.on_connect(username.clone()).await {
        Ok(registered) => registered,
        Err(e) => {
            error!("{} could not join: {}", username, e);
            let error = ChannelError::from(e).kind();
            let _ = socket.send(encode(&ServerEvent::Error { error })).await;
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };

    let (mut sender, mut receiver) = socket.split();

    // Shared flag for heartbeat
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward hub events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else { break };
                    if sender.send(encode(&event)).await.is_err() {
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
    });

    // Read commands from client
    let recv_hub = hub.clone();
    let recv_conn = conn.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ClientCommand>(&text) {
                    Ok(ClientCommand::Message(body)) => {
                        // An abort of this task must not split an append from its
                        // fan-out, so the call runs detached; awaiting it keeps
                        // per-sender order. The hub queues any refusal itself.
                        let hub = recv_hub.clone();
                        let conn = recv_conn.clone();
                        let _ = tokio::spawn(async move { hub.on_message(&conn, body).await }).await;
                    }
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            recv_conn.username,
                            recv_conn.id,
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

    hub.on_disconnect(&conn).await;
    info!("{} ({}) disconnected from channel", conn.username, conn.id);
}
