use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::Flow;
use crate::gateway::Gateway;
use crate::session::Session;

/// How long the send task may keep flushing after the read side ends.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Drives one WebSocket from upgrade to close.
///
/// `refresh_cookie` is the `refreshToken` cookie from the upgrade request. When
/// present the connection is admitted (or rejected) before any frame is read;
/// otherwise the client must send an `auth` frame within the handshake
/// timeout.
pub async fn handle_connection(socket: WebSocket, gateway: Gateway, refresh_cookie: Option<String>) {
    let (mut sender, mut receiver) = socket.split();
    let (mut session, mut outbound_rx) = Session::new();
    info!("Session {} opened", session.id());

    // Heartbeat: ping every interval, drop after two unanswered pings
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let heartbeat_interval = gateway.config().heartbeat_interval;

    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(heartbeat_interval);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                frame = outbound_rx.recv() => {
                    let Some(frame) = frame else {
                        // Every sender is gone: the session has ended
                        let _ = sender.send(Message::Close(None)).await;
                        break;
                    };

                    let text = match serde_json::to_string(&frame) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("Failed to serialize {} frame: {}", frame.kind(), e);
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
                    if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let send_finished = tokio::select! {
        _ = &mut send_task => true,
        _ = read_frames(&gateway, &mut session, &mut receiver, refresh_cookie, &pong_received) => false,
    };

    gateway.disconnect(&session).await;
    let session_id = session.id();

    // Dropping the last sender lets the send task flush queued frames (an
    // `auth_error`, say) and close the socket.
    drop(session);
    if !send_finished && tokio::time::timeout(DRAIN_TIMEOUT, &mut send_task).await.is_err() {
        send_task.abort();
    }

    info!("Session {} closed", session_id);
}

async fn read_frames(
    gateway: &Gateway,
    session: &mut Session,
    receiver: &mut SplitStream<WebSocket>,
    refresh_cookie: Option<String>,
    pong_received: &AtomicBool,
) {
    if let Some(token) = refresh_cookie {
        if gateway.authenticate_with_cookie(session, &token).await == Flow::Close {
            return;
        }
    }

    let deadline = Instant::now() + gateway.config().handshake_timeout;

    loop {
        let next = if session.is_authenticated() {
            receiver.next().await
        } else {
            match tokio::time::timeout_at(deadline, receiver.next()).await {
                Ok(next) => next,
                Err(_) => {
                    warn!("Session {} did not authenticate in time, closing", session.id());
                    return;
                }
            }
        };

        let msg = match next {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => {
                debug!("Session {} read error: {}", session.id(), e);
                return;
            }
            None => return,
        };

        match msg {
            Message::Text(text) => {
                if gateway.handle_text(session, text.as_str()).await == Flow::Close {
                    return;
                }
            }
            Message::Pong(_) => {
                pong_received.store(true, Ordering::Release);
            }
            Message::Close(_) => return,
            _ => {}
        }
    }
}
