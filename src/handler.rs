//! WebSocket connection handler and event dispatcher.
//!
//! The transport boundary: parses inbound frames into `ClientEvent`, routes
//! them to the presence/delivery/call modules, and drains the connection's
//! outbound channel back to the socket. No business logic lives here.

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::delivery;
use crate::error::CallError;
use crate::presence::ClientSender;
use crate::protocol::{ClientEvent, ServerEvent};
use crate::state::AppState;

/// Handle a single WebSocket connection.
///
/// Runs for the lifetime of the connection:
/// 1. Waits for a `register` event to bind the connection to a user id
/// 2. Spawns a sender task that drains the outbound channel to the socket
/// 3. Dispatches incoming events until the connection closes
/// 4. On close: ends the user's active calls and clears their presence
pub async fn handle_websocket(socket: WebSocket, state: AppState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();

    // ── Step 1: Wait for Registration ─────────────────────────────────────

    let user_id = loop {
        match ws_receiver.next().await {
            Some(Ok(Message::Text(text))) => {
                match serde_json::from_str::<ClientEvent>(&text) {
                    Ok(ClientEvent::Register { user_id }) => {
                        if user_id.trim().is_empty() {
                            let err = ServerEvent::Error {
                                message: "userId is required to register".to_string(),
                            };
                            if send_json(&mut ws_sender, &err).await.is_err() {
                                return;
                            }
                            continue;
                        }

                        let ack = ServerEvent::Registered {
                            user_id: user_id.clone(),
                        };
                        if send_json(&mut ws_sender, &ack).await.is_err() {
                            return; // Connection closed
                        }

                        break user_id;
                    }
                    Ok(ClientEvent::Ping) => {
                        if send_json(&mut ws_sender, &ServerEvent::Pong).await.is_err() {
                            return;
                        }
                    }
                    Ok(_) => {
                        let err = ServerEvent::Error {
                            message: "Must register before sending other events".to_string(),
                        };
                        if send_json(&mut ws_sender, &err).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to parse client event");
                        let err = ServerEvent::Error {
                            message: format!("Invalid event format: {}", e),
                        };
                        if send_json(&mut ws_sender, &err).await.is_err() {
                            return;
                        }
                    }
                }
            }
            Some(Ok(Message::Ping(data))) => {
                let _ = ws_sender.send(Message::Pong(data)).await;
            }
            Some(Ok(Message::Close(_))) | None => {
                return; // Closed before registration: nothing to clean up
            }
            _ => continue,
        }
    };

    // ── Step 2: Bind Presence ──────────────────────────────────────────────
    // Presence replay lands in the channel before the drain task starts;
    // nothing is lost.

    state.registry.register(&user_id, tx.clone());

    // ── Step 3: Spawn Sender Task ──────────────────────────────────────────

    let sender_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => {
                    if ws_sender.send(Message::Text(json)).await.is_err() {
                        break; // Connection closed
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize server event");
                }
            }
        }
    });

    // ── Step 4: Dispatch Events ────────────────────────────────────────────

    while let Some(frame) = ws_receiver.next().await {
        match frame {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => {
                    if !state.registry.is_current(&user_id, &tx) {
                        // A newer connection took over this identity
                        send_error(&tx, "Connection superseded by a newer registration");
                        continue;
                    }
                    dispatch(&state, &user_id, &tx, event).await;
                }
                Err(e) => {
                    tracing::warn!(user_id = user_id.as_str(), error = %e, "Malformed event");
                    send_error(&tx, &format!("Invalid event format: {}", e));
                }
            },
            Ok(Message::Close(_)) => {
                tracing::info!(user_id = user_id.as_str(), "Client sent close frame");
                break;
            }
            Err(e) => {
                tracing::warn!(user_id = user_id.as_str(), error = %e, "WebSocket error");
                break;
            }
            _ => {} // Binary, Ping, Pong: ignore
        }
    }

    // ── Step 5: Cleanup ────────────────────────────────────────────────────

    disconnect_cleanup(&state, &user_id, &tx);
    sender_task.abort();
    tracing::info!(user_id = user_id.as_str(), "WebSocket disconnected");
}

/// End a disconnecting user's active calls (notifying each counterpart)
/// and clear their presence binding.
///
/// A connection that was superseded by a newer registration must not tear
/// down the live connection's calls or presence, so both steps are keyed
/// to this handle still being the current binding.
pub fn disconnect_cleanup(state: &AppState, user_id: &str, conn: &ClientSender) {
    if !state.registry.is_current(user_id, conn) {
        return;
    }

    for (call_id, peer) in state.calls.end_all_for(user_id) {
        state.registry.send_to(
            &peer,
            ServerEvent::CallEnded {
                call_id,
                from: user_id.to_string(),
                reason: Some("disconnected".to_string()),
            },
        );
    }

    state.registry.unregister(user_id, conn);
}

/// One pass of periodic call maintenance: auto-end calls still ringing
/// past the timeout, send `call-ended {reason: "timeout"}` to both
/// parties, and sweep ended sessions past their retention window.
pub fn cleanup_tick(state: &AppState) {
    for session in state.calls.expire_ringing() {
        for (party, peer) in [
            (&session.caller_id, &session.callee_id),
            (&session.callee_id, &session.caller_id),
        ] {
            state.registry.send_to(
                party,
                ServerEvent::CallEnded {
                    call_id: session.call_id.clone(),
                    from: peer.clone(),
                    reason: Some("timeout".to_string()),
                },
            );
        }
    }
    state.calls.sweep_ended();
}

/// Route one parsed client event to the owning module.
///
/// `conn` is the originating connection's own channel: error acks go there
/// directly so a superseded binding can never swallow them.
pub async fn dispatch(state: &AppState, user_id: &str, conn: &ClientSender, event: ClientEvent) {
    match event {
        ClientEvent::Register { .. } => {
            send_error(conn, "Already registered");
        }

        ClientEvent::SendMessage {
            receiver_id,
            content,
            message_type,
        } => {
            if let Err(e) =
                delivery::send_message(state, user_id, &receiver_id, &content, message_type).await
            {
                tracing::debug!(sender = user_id, error = %e, "Send rejected");
                send_error(conn, &e.to_string());
            }
        }

        ClientEvent::TypingStart { receiver_id } => {
            delivery::relay_typing(state, user_id, &receiver_id, true);
        }

        ClientEvent::TypingStop { receiver_id } => {
            delivery::relay_typing(state, user_id, &receiver_id, false);
        }

        ClientEvent::MessageRead { to, message_id } => {
            delivery::relay_read_receipt(state, user_id, &to, &message_id);
        }

        ClientEvent::CallRequest { to, call_id, is_video } => {
            handle_call_request(state, user_id, conn, &to, &call_id, is_video);
        }

        ClientEvent::CallAccept { to: _, call_id } => {
            // The session knows its own counterpart; the wire `to` field is
            // advisory only.
            match state.calls.accept(&call_id, user_id) {
                Ok(caller) => {
                    state.registry.send_to(
                        &caller,
                        ServerEvent::CallAccepted {
                            call_id,
                            from: user_id.to_string(),
                        },
                    );
                }
                Err(e) => report_call_error(conn, user_id, &call_id, e),
            }
        }

        ClientEvent::CallReject { to: _, call_id } => {
            match state.calls.reject(&call_id, user_id) {
                Ok(caller) => {
                    state.registry.send_to(
                        &caller,
                        ServerEvent::CallRejected {
                            call_id,
                            from: user_id.to_string(),
                            reason: None,
                        },
                    );
                }
                Err(e) => report_call_error(conn, user_id, &call_id, e),
            }
        }

        ClientEvent::CallOffer { to: _, call_id, offer } => {
            match state.calls.offer(&call_id, user_id) {
                Ok(callee) => {
                    state.registry.send_to(
                        &callee,
                        ServerEvent::CallOffer {
                            call_id,
                            from: user_id.to_string(),
                            offer,
                        },
                    );
                }
                Err(e) => report_call_error(conn, user_id, &call_id, e),
            }
        }

        ClientEvent::CallAnswer { to: _, call_id, answer } => {
            match state.calls.answer(&call_id, user_id) {
                Ok(caller) => {
                    state.registry.send_to(
                        &caller,
                        ServerEvent::CallAnswer {
                            call_id,
                            from: user_id.to_string(),
                            answer,
                        },
                    );
                }
                Err(e) => report_call_error(conn, user_id, &call_id, e),
            }
        }

        ClientEvent::IceCandidate { to: _, call_id, candidate } => {
            match state.calls.ice_target(&call_id, user_id) {
                Ok(peer) => {
                    state.registry.send_to(
                        &peer,
                        ServerEvent::IceCandidate {
                            call_id,
                            from: user_id.to_string(),
                            candidate,
                        },
                    );
                }
                Err(e) => report_call_error(conn, user_id, &call_id, e),
            }
        }

        ClientEvent::CallEnd { to: _, call_id } => {
            match state.calls.end(&call_id, user_id) {
                Ok(peer) => {
                    state.registry.send_to(
                        &peer,
                        ServerEvent::CallEnded {
                            call_id,
                            from: user_id.to_string(),
                            reason: None,
                        },
                    );
                }
                Err(e) => report_call_error(conn, user_id, &call_id, e),
            }
        }

        ClientEvent::Ping => {
            let _ = conn.send(ServerEvent::Pong);
        }
    }
}

/// Ring a callee. An offline callee is a routing miss, dropped without a
/// session. A busy callee gets refused on the caller's behalf.
fn handle_call_request(
    state: &AppState,
    caller_id: &str,
    conn: &ClientSender,
    callee_id: &str,
    call_id: &str,
    is_video: bool,
) {
    if !state.registry.is_online(callee_id) {
        tracing::debug!(
            caller = caller_id,
            callee = callee_id,
            call_id = call_id,
            "Call request to offline callee dropped"
        );
        return;
    }

    match state.calls.begin(call_id, caller_id, callee_id, is_video) {
        Ok(()) => {
            state.registry.send_to(
                callee_id,
                ServerEvent::IncomingCall {
                    from: caller_id.to_string(),
                    call_id: call_id.to_string(),
                    is_video,
                },
            );
        }
        Err(CallError::Busy) => {
            let _ = conn.send(ServerEvent::CallRejected {
                call_id: call_id.to_string(),
                from: callee_id.to_string(),
                reason: Some("busy".to_string()),
            });
        }
        Err(e) => report_call_error(conn, caller_id, call_id, e),
    }
}

/// Stale signals are dropped quietly; everything else goes back to the
/// originator as an error event. Never fatal to the connection.
fn report_call_error(conn: &ClientSender, user_id: &str, call_id: &str, err: CallError) {
    match err {
        CallError::Stale(_) => {
            tracing::debug!(user_id = user_id, call_id = call_id, "Stale call signal dropped");
        }
        other => {
            tracing::debug!(user_id = user_id, call_id = call_id, error = %other, "Call signal rejected");
            send_error(conn, &other.to_string());
        }
    }
}

fn send_error(conn: &ClientSender, message: &str) {
    let _ = conn.send(ServerEvent::Error {
        message: message.to_string(),
    });
}

async fn send_json<S>(ws_sender: &mut S, event: &ServerEvent) -> Result<(), ()>
where
    S: SinkExt<Message> + Unpin,
{
    let json = serde_json::to_string(event).map_err(|e| {
        tracing::error!(error = %e, "Failed to serialize server event");
    })?;
    ws_sender.send(Message::Text(json)).await.map_err(|_| ())
}
