use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn};
use uuid::Uuid;

use unimart_db::Database;
use unimart_types::events::{GatewayCommand, GatewayEvent};

use crate::dispatcher::Dispatcher;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Handle a single WebSocket connection: Identify handshake, Ready, then
/// the event loop until either side hangs up.
pub async fn handle_connection(
    socket: WebSocket,
    dispatcher: Dispatcher,
    db: Arc<Database>,
    jwt_secret: String,
) {
    let (mut sender, mut receiver) = socket.split();

    // Step 1: Wait for Identify command with JWT
    let (member_id, handle) = match wait_for_identify(&mut receiver, &jwt_secret).await {
        Some(id) => id,
        None => {
            warn!("WebSocket client failed to identify, closing");
            return;
        }
    };

    info!("{} ({}) connected to gateway", handle, member_id);

    // Step 2: Send Ready event
    let ready = GatewayEvent::Ready {
        member_id,
        handle: handle.clone(),
    };
    if sender
        .send(Message::Text(serde_json::to_string(&ready).unwrap().into()))
        .await
        .is_err()
    {
        return;
    }

    let (conn_id, mut member_rx) = dispatcher.register(member_id).await;

    // The negotiation this connection is watching. Replaced on every Watch,
    // so events for the previously watched negotiation stop being forwarded
    // the moment the client switches.
    let watched: Arc<RwLock<Option<Uuid>>> = Arc::new(RwLock::new(None));
    let send_watch = watched.clone();

    // Shared flag for heartbeat
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward targeted events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = member_rx.recv() => {
                    let event = match result {
                        Some(event) => event,
                        None => break,
                    };

                    if let Some(negotiation_id) = event.watch_scope() {
                        let skip = {
                            let watch = send_watch.read().expect("watch lock poisoned");
                            *watch != Some(negotiation_id)
                        };
                        if skip {
                            continue;
                        }
                    }

                    let text = serde_json::to_string(&event).unwrap();
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
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let handle_recv = handle.clone();
    let recv_watch = watched.clone();
    let recv_db = db.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => {
                        handle_command(&recv_db, member_id, &handle_recv, cmd, &recv_watch).await;
                    }
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            handle_recv,
                            member_id,
                            e,
                            &text[..text.len().min(200)]
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

    dispatcher.unregister(member_id, conn_id).await;
    info!("{} ({}) disconnected from gateway", handle, member_id);
}

async fn wait_for_identify(
    receiver: &mut futures_util::stream::SplitStream<WebSocket>,
    jwt_secret: &str,
) -> Option<(Uuid, String)> {
    use jsonwebtoken::{DecodingKey, Validation, decode};
    use unimart_types::api::Claims;

    let timeout = tokio::time::timeout(Duration::from_secs(10), async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(GatewayCommand::Identify { token }) =
                    serde_json::from_str::<GatewayCommand>(&text)
                {
                    let token_data = decode::<Claims>(
                        &token,
                        &DecodingKey::from_secret(jwt_secret.as_bytes()),
                        &Validation::default(),
                    )
                    .ok()?;

                    return Some((token_data.claims.sub, token_data.claims.handle));
                }
            }
        }
        None
    });

    timeout.await.ok().flatten()
}

async fn handle_command(
    db: &Arc<Database>,
    member_id: Uuid,
    handle: &str,
    cmd: GatewayCommand,
    watched: &Arc<RwLock<Option<Uuid>>>,
) {
    match cmd {
        GatewayCommand::Identify { .. } => {} // Already handled

        GatewayCommand::Watch { negotiation_id } => {
            // Participants only. The check hits the DB, so run it off the
            // async runtime; on any failure the watch stays unchanged.
            let check_db = db.clone();
            let allowed = tokio::task::spawn_blocking(move || {
                check_db.get_negotiation(&negotiation_id.to_string())
            })
            .await;

            let member = member_id.to_string();
            let allowed = match allowed {
                Ok(Ok(Some(row))) => row.buyer_id == member || row.seller_id == member,
                Ok(Ok(None)) => false,
                Ok(Err(e)) => {
                    warn!("Watch check failed: {}", e);
                    false
                }
                Err(e) => {
                    warn!("spawn_blocking join error: {}", e);
                    false
                }
            };

            if allowed {
                info!("{} ({}) watching negotiation {}", handle, member_id, negotiation_id);
                *watched.write().expect("watch lock poisoned") = Some(negotiation_id);
            } else {
                warn!(
                    "{} ({}) denied watch on negotiation {}",
                    handle, member_id, negotiation_id
                );
            }
        }

        GatewayCommand::Unwatch => {
            *watched.write().expect("watch lock poisoned") = None;
        }
    }
}
