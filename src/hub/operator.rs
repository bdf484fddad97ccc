use super::frame::{InFrame, OutFrame};
use super::{tag_for_group_payload, HubContext};
use crate::channel::GroupMessage;
use crate::error::{HubError, HubResult};
use axum::extract::ws::{Message, WebSocket};
use serde::Deserialize;
use std::sync::Arc;

const MONITORING_PREFIX: &str = "m/";

/// Runs one operator connection (§4.4 "Operator messages"). Operators only
/// ever join monitoring-namespace groups — there's no hello handshake, no
/// `ConnectionInfo`, no orphan check; this is a read-only view onto fleet
/// activity.
pub async fn run_operator_hub(ctx: Arc<HubContext>, mut socket: WebSocket, user_id: String) {
    let connection_uuid = format!("operator:{}", crate::model::new_id());
    let (conn, mut group_rx) = ctx.channel_layer.register(connection_uuid.clone());

    if send(&mut socket, OutFrame::reply("introduction", serde_json::json!({"connection_uuid": connection_uuid}))).await.is_err() {
        ctx.channel_layer.unregister(&connection_uuid);
        return;
    }

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if handle_frame(&ctx, &mut socket, &conn, &text).await.is_err() {
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

    ctx.channel_layer.unregister(&connection_uuid);
    ctx.observer.record_event(&crate::observability::HubEvent::ConnectionClosed {
        connection_uuid,
        reason: "operator socket closed".to_string(),
    });
    let _ = user_id;
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TopicList {
    One(String),
    Many(Vec<String>),
}

impl TopicList {
    fn into_vec(self) -> Vec<String> {
        match self {
            TopicList::One(t) => vec![t],
            TopicList::Many(ts) => ts,
        }
    }
}

async fn handle_frame(ctx: &HubContext, socket: &mut WebSocket, conn: &crate::channel::Connection, text: &str) -> Result<(), ()> {
    let frame: InFrame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(_) => return send(socket, OutFrame::error(&HubError::validation("malformed frame"))).await,
    };
    if let Err(err) = dispatch(ctx, socket, conn, &frame).await {
        let _ = send(socket, OutFrame::error(&err)).await;
    }
    Ok(())
}

async fn dispatch(ctx: &HubContext, socket: &mut WebSocket, conn: &crate::channel::Connection, frame: &InFrame) -> HubResult<()> {
    match frame.t.as_str() {
        "set_topics" => {
            let topics = decode_topics(&frame.d)?;
            for joined in conn.groups() {
                conn.remove_from_group(&joined);
            }
            for topic in topics {
                conn.add_to_group(&topic).await?;
            }
            Ok(())
        }
        "sub" => {
            for topic in decode_topics(&frame.d)? {
                conn.add_to_group(&topic).await?;
            }
            Ok(())
        }
        "unsub" => {
            for topic in decode_topics(&frame.d)? {
                conn.remove_from_group(&topic);
            }
            Ok(())
        }
        "unsuball" => {
            for joined in conn.groups() {
                conn.remove_from_group(&joined);
            }
            Ok(())
        }
        "sync" => {
            let _ = send(socket, OutFrame::reply("sync", serde_json::json!({"topics": conn.groups()}))).await;
            Ok(())
        }
        other => Err(HubError::validation(format!("unrecognized frame tag: {other}"))),
    }
}

fn decode_topics(d: &serde_json::Value) -> HubResult<Vec<String>> {
    let topics: TopicList = serde_json::from_value(d.clone()).map_err(|e| HubError::validation(e.to_string()))?;
    let topics = topics.into_vec();
    for topic in &topics {
        if !topic.starts_with(MONITORING_PREFIX) {
            return Err(HubError::authorization(format!(
                "operators may only subscribe to monitoring topics, got {topic}"
            )));
        }
    }
    Ok(topics)
}

async fn forward(socket: &mut WebSocket, message: GroupMessage) -> Result<(), ()> {
    let tag = tag_for_group_payload(&message.payload);
    send(socket, OutFrame::topical(tag, message.payload, message.topic)).await
}

async fn send(socket: &mut WebSocket, frame: OutFrame) -> Result<(), ()> {
    socket.send(Message::Text(frame.to_json_text().into())).await.map_err(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_topics_rejects_non_monitoring_prefix() {
        let err = decode_topics(&serde_json::json!("a/app1")).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Authorization);
    }

    #[test]
    fn decode_topics_accepts_single_and_list_forms() {
        assert_eq!(decode_topics(&serde_json::json!("m/seq")).unwrap(), vec!["m/seq"]);
        assert_eq!(
            decode_topics(&serde_json::json!(["m/seq", "m/app"])).unwrap(),
            vec!["m/seq", "m/app"]
        );
    }
}
