use super::frame::{InFrame, OutFrame};
use super::{tag_for_group_payload, HubContext};
use crate::channel::GroupMessage;
use crate::error::{HubError, HubResult};
use crate::model::{AppLog, ApplicationClientInfo, ConnectionInfo, Severity};
use axum::extract::ws::{Message, WebSocket};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

/// Runs one agent connection's full lifecycle (§4.4): authenticate has
/// already happened by the time this is called (the gateway verified the
/// ticket during the WS upgrade and resolved `app_id` from its `sub` claim).
pub async fn run_agent_hub(ctx: Arc<HubContext>, mut socket: WebSocket, app_id: String, peer_ip: String) {
    let connection_uuid = crate::model::new_id();
    let (conn, mut group_rx) = ctx.channel_layer.register(connection_uuid.clone());

    if send(&mut socket, OutFrame::reply("introduction", serde_json::json!({"connection_uuid": connection_uuid}))).await.is_err() {
        ctx.channel_layer.unregister(&connection_uuid);
        return;
    }

    let info = match await_hello(&mut socket).await {
        Some(info) => info,
        None => {
            ctx.channel_layer.unregister(&connection_uuid);
            return;
        }
    };

    let now = ctx.clock.now();
    let existing = ctx.store.get_connection(&info.connection_uuid).ok().flatten();
    let connection_info = ConnectionInfo::upsert_from_hello(existing, &info, &app_id, &peer_ip, now);
    if let Err(err) = ctx.store.upsert_connection(&connection_info) {
        let _ = send(&mut socket, OutFrame::error(&err)).await;
        ctx.channel_layer.unregister(&connection_uuid);
        return;
    }
    let _ = ctx.store.upsert_server(&crate::model::ServerRecord {
        host_ip: peer_ip.clone(),
        last_seen: now,
    });

    if let Err(err) = conn.add_to_group(&format!("a/{app_id}")).await {
        warn!(error = %err, "failed to join app group");
    }
    for key in &info.subscriptions {
        if let Err(err) = conn.add_event(key).await {
            warn!(error = %err, event_key = %key, "failed to join event subscription group");
        }
    }

    ctx.observer.record_event(&crate::observability::HubEvent::ConnectionEstablished {
        app_id: app_id.clone(),
        connection_uuid: connection_uuid.clone(),
    });
    info!(app_id, connection_uuid, "agent hello completed");

    let connections_total = ctx
        .store
        .list_connected()
        .map(|conns| conns.iter().filter(|c| c.app_id == app_id).count())
        .unwrap_or(0);
    if send(&mut socket, OutFrame::reply("greetings", serde_json::json!({"connections_total": connections_total}))).await.is_err() {
        finalize_disconnect(&ctx, &connection_uuid, &conn).await;
        return;
    }

    if send_tasks(&ctx, &mut socket, &app_id).await.is_err() {
        finalize_disconnect(&ctx, &connection_uuid, &conn).await;
        return;
    }
    if send_orphans(&ctx, &mut socket, &connection_uuid).await.is_err() {
        finalize_disconnect(&ctx, &connection_uuid, &conn).await;
        return;
    }

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if handle_frame(&ctx, &mut socket, &app_id, &connection_uuid, &text).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
            group_message = group_rx.recv() => {
                match group_message {
                    Some(message) => {
                        if forward(&mut socket, message).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            _ = conn.closed() => break,
        }
    }

    finalize_disconnect(&ctx, &connection_uuid, &conn).await;
}

async fn await_hello(socket: &mut WebSocket) -> Option<ApplicationClientInfo> {
    loop {
        match socket.recv().await {
            Some(Ok(Message::Text(text))) => {
                let frame: InFrame = match serde_json::from_str(&text) {
                    Ok(f) => f,
                    Err(_) => {
                        let _ = send(socket, OutFrame::error(&HubError::validation("malformed frame"))).await;
                        continue;
                    }
                };
                if frame.t != "hello" {
                    let _ = send(socket, OutFrame::error(&HubError::validation("expected hello before any other frame"))).await;
                    continue;
                }
                match serde_json::from_value::<ApplicationClientInfo>(frame.d) {
                    Ok(info) => return Some(info),
                    Err(err) => {
                        let _ = send(socket, OutFrame::error(&HubError::validation(format!("malformed hello: {err}")))).await;
                    }
                }
            }
            Some(Ok(Message::Close(_))) | None => return None,
            Some(Ok(_)) => {}
            Some(Err(_)) => return None,
        }
    }
}

async fn send_tasks(ctx: &HubContext, socket: &mut WebSocket, app_id: &str) -> Result<(), ()> {
    let tasks = ctx.store.list_tasks_for_app(app_id, false).unwrap_or_default();
    send(socket, OutFrame::reply("tasks", serde_json::to_value(tasks).unwrap_or(Value::Null))).await
}

async fn send_orphans(ctx: &HubContext, socket: &mut WebSocket, connection_uuid: &str) -> Result<(), ()> {
    let frozen = ctx.store.list_frozen_for_connection(connection_uuid).unwrap_or_default();
    if frozen.is_empty() {
        return Ok(());
    }
    let ids: Vec<&str> = frozen.iter().map(|s| s.id.as_str()).collect();
    send(socket, OutFrame::reply("detected_orphans", serde_json::json!({"sequence_ids": ids}))).await
}

async fn handle_frame(
    ctx: &HubContext,
    socket: &mut WebSocket,
    app_id: &str,
    connection_uuid: &str,
    text: &str,
) -> Result<(), ()> {
    let frame: InFrame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(_) => return send(socket, OutFrame::error(&HubError::validation("malformed frame"))).await,
    };

    let result = dispatch(ctx, socket, app_id, connection_uuid, &frame).await;
    match result {
        Ok(()) => Ok(()),
        Err(err) => {
            let closes = err.kind.closes_socket();
            let _ = send(socket, OutFrame::error(&err)).await;
            if closes {
                Err(())
            } else {
                Ok(())
            }
        }
    }
}

async fn dispatch(
    ctx: &HubContext,
    socket: &mut WebSocket,
    app_id: &str,
    connection_uuid: &str,
    frame: &InFrame,
) -> HubResult<()> {
    match frame.t.as_str() {
        "set_subscriptions" => {
            let keys: Vec<String> = serde_json::from_value(frame.d.clone()).map_err(|e| HubError::validation(e.to_string()))?;
            let mut connection_info = ctx
                .store
                .get_connection(connection_uuid)?
                .ok_or_else(|| HubError::not_found("connection not registered"))?;
            if let Some(conn) = ctx.channel_layer.local_connection(connection_uuid) {
                for old in &connection_info.event_subscriptions {
                    conn.remove_event(old);
                }
                for key in &keys {
                    conn.add_event(key).await?;
                }
            }
            connection_info.event_subscriptions = keys;
            connection_info.revision += 1;
            ctx.store.upsert_connection(&connection_info)?;
            Ok(())
        }
        "subscribe" => {
            let key: String = serde_json::from_value(frame.d.clone()).map_err(|e| HubError::validation(e.to_string()))?;
            let mut connection_info = ctx
                .store
                .get_connection(connection_uuid)?
                .ok_or_else(|| HubError::not_found("connection not registered"))?;
            if let Some(conn) = ctx.channel_layer.local_connection(connection_uuid) {
                conn.add_event(&key).await?;
            }
            if !connection_info.event_subscriptions.contains(&key) {
                connection_info.event_subscriptions.push(key);
                connection_info.revision += 1;
                ctx.store.upsert_connection(&connection_info)?;
            }
            Ok(())
        }
        "unsubscribe" => {
            let key: String = serde_json::from_value(frame.d.clone()).map_err(|e| HubError::validation(e.to_string()))?;
            let mut connection_info = ctx
                .store
                .get_connection(connection_uuid)?
                .ok_or_else(|| HubError::not_found("connection not registered"))?;
            if let Some(conn) = ctx.channel_layer.local_connection(connection_uuid) {
                conn.remove_event(&key);
            }
            connection_info.event_subscriptions.retain(|k| k != &key);
            connection_info.revision += 1;
            ctx.store.upsert_connection(&connection_info)?;
            Ok(())
        }
        "abandon" => {
            let ids: Vec<String> = serde_json::from_value(frame.d.clone()).map_err(|e| HubError::validation(e.to_string()))?;
            let now = ctx.clock.now();
            for id in ids {
                let mut seq = match ctx.store.get_sequence(&id)? {
                    Some(seq) => seq,
                    None => continue,
                };
                if seq.connection_id.as_deref() != Some(connection_uuid) {
                    continue;
                }
                let expected = seq.state_updated_at;
                if seq.abandon(now).is_ok() {
                    ctx.store.update_sequence_if_unchanged(&seq, expected)?;
                }
            }
            Ok(())
        }
        "check_orphans" => {
            let _ = send_orphans(ctx, socket, connection_uuid).await;
            Ok(())
        }
        "synchronize" => {
            let _ = send_tasks(ctx, socket, app_id).await;
            Ok(())
        }
        "send_log" => {
            #[derive(serde::Deserialize)]
            struct SendLogBody {
                #[serde(default)]
                sequence_id: Option<String>,
                logs: Vec<LogLine>,
            }
            #[derive(serde::Deserialize)]
            struct LogLine {
                #[serde(default)]
                severity: Option<Severity>,
                body: String,
            }
            let body: SendLogBody = serde_json::from_value(frame.d.clone()).map_err(|e| HubError::validation(e.to_string()))?;
            let now = ctx.clock.now();
            let count = body.logs.len();
            for line in body.logs {
                let log = AppLog::new(
                    app_id,
                    body.sequence_id.clone(),
                    line.severity.unwrap_or(Severity::Info),
                    line.body,
                    now.timestamp_micros(),
                );
                ctx.store.insert_log(&log)?;
            }
            let _ = send(
                socket,
                OutFrame::reply("logs_sent", serde_json::json!({"count": count, "last": now.to_rfc3339()})),
            )
            .await;
            Ok(())
        }
        other => Err(HubError::validation(format!("unrecognized frame tag: {other}"))),
    }
}

async fn forward(socket: &mut WebSocket, message: GroupMessage) -> Result<(), ()> {
    let tag = tag_for_group_payload(&message.payload);
    send(socket, OutFrame::topical(tag, message.payload, message.topic)).await
}

async fn send(socket: &mut WebSocket, frame: OutFrame) -> Result<(), ()> {
    socket.send(Message::Text(frame.to_json_text().into())).await.map_err(|_| ())
}

/// Disconnect handling (§4.4): re-reads `ConnectionInfo` since another
/// connection may have raced an update, marks it disconnected, and freezes
/// every sequence the dropped connection still owned in-progress.
async fn finalize_disconnect(ctx: &HubContext, connection_uuid: &str, conn: &crate::channel::Connection) {
    let _ = conn;
    ctx.channel_layer.unregister(connection_uuid);
    let now = ctx.clock.now();
    if let Ok(Some(mut connection_info)) = ctx.store.get_connection(connection_uuid) {
        connection_info.mark_disconnected(now);
        let _ = ctx.store.upsert_connection(&connection_info);
    }
    if let Ok(active) = ctx.store.list_in_progress_for_connection(connection_uuid) {
        for mut seq in active {
            let expected = seq.state_updated_at;
            if seq.freeze(now) {
                let _ = ctx.store.update_sequence_if_unchanged(&seq, expected);
                let _ = ctx
                    .channel_layer
                    .groups_send(
                        &[format!("m/sequence/{}", seq.id), format!("m/app/{}", seq.app_id)],
                        serde_json::json!({"type": "sequence", "event": "updated", "sequence_id": seq.id}),
                    )
                    .await;
            }
        }
    }
    ctx.observer.record_event(&crate::observability::HubEvent::ConnectionClosed {
        connection_uuid: connection_uuid.to_string(),
        reason: "socket closed".to_string(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backplane::InMemoryBackplane;
    use crate::channel::ChannelLayer;
    use crate::clock::FixedClock;
    use crate::engine::{SequenceEventHandlers, SequenceService};
    use crate::model::Application;
    use crate::observability::NoopObserver;
    use crate::store::SqliteStore;
    use crate::ticket::TicketSigner;
    use crate::transit::{BatchConfig, TransitEndpoint};
    use std::time::Duration;

    async fn context() -> (Arc<HubContext>, Arc<dyn crate::store::Store>) {
        let store: Arc<dyn crate::store::Store> = Arc::new(SqliteStore::open_in_memory().unwrap());
        let clock = Arc::new(FixedClock::new(chrono::Utc::now()));
        let backplane = Arc::new(InMemoryBackplane::new());
        let channel_layer = ChannelLayer::spawn(backplane).await.unwrap();
        let handlers = Arc::new(SequenceEventHandlers::new(store.clone(), channel_layer.clone()));
        let transit = Arc::new(TransitEndpoint::spawn(BatchConfig::new(100, Duration::from_millis(10)), handlers));
        let sequence_service = Arc::new(SequenceService::new(store.clone(), clock.clone(), transit));
        let ctx = Arc::new(HubContext {
            store: store.clone(),
            clock,
            channel_layer,
            sequence_service,
            ticket_signer: Arc::new(TicketSigner::new(b"test-secret".to_vec())),
            observer: Arc::new(NoopObserver),
        });
        (ctx, store)
    }

    #[tokio::test]
    async fn finalize_disconnect_freezes_in_progress_sequences() {
        let (ctx, store) = context().await;
        let app = Application::new("billing", "Billing");
        store.create_application(&app).unwrap();
        let now = ctx.clock.now();
        let seq = crate::model::EventSequence::new(&app.id, None, None, "run [1]".into(), Some("C1".into()), now);
        store.create_sequence(&seq).unwrap();
        let info = ApplicationClientInfo {
            connection_uuid: "C1".into(),
            name: "agent".into(),
            version: "1.0".into(),
            compatibility_key: "k1".into(),
            os_info: "linux".into(),
            machine_id: "m1".into(),
            instance_id: None,
            subscriptions: vec![],
        };
        let connection_info = ConnectionInfo::upsert_from_hello(None, &info, &app.id, "1.1.1.1", now);
        store.upsert_connection(&connection_info).unwrap();

        let (conn, _rx) = ctx.channel_layer.register("C1".into());
        finalize_disconnect(&ctx, "C1", &conn).await;

        let reread = store.get_sequence(&seq.id).unwrap().unwrap();
        assert_eq!(reread.state, crate::model::EventSequenceState::Frozen);
        let reread_conn = store.get_connection("C1").unwrap().unwrap();
        assert!(!reread_conn.is_connected);
    }
}
