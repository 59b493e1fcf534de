// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event streams for UI sessions.
//!
//! One WebSocket per UI session: the client subscribes to topics and
//! receives `{topic, seq, kind, payload}` frames in per-topic order.
//! A parallel one-way SSE endpoint serves debug-playground sessions
//! with `event:<kind>` / `data:<json>` frames.

use super::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::stream::Stream;
use futures::{SinkExt, StreamExt};
use laf_bus::Frame;
use laf_core::{Event, Topic};
use serde::Deserialize;
use std::collections::HashMap;
use std::convert::Infallible;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamMap;
use tracing::debug;

/// Control frames a UI session sends over the WebSocket.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Control {
    Subscribe {
        topic: String,
        #[serde(default)]
        since_seq: Option<u64>,
    },
    Unsubscribe {
        topic: String,
    },
}

pub async fn ws_events(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| ws_session(socket, state))
}

async fn ws_session(socket: WebSocket, state: AppState) {
    let (mut tx, mut rx) = socket.split();
    let mut streams: StreamMap<String, ReceiverStream<Frame>> = StreamMap::new();
    let mut subscription_ids: HashMap<String, (Topic, u64)> = HashMap::new();

    loop {
        tokio::select! {
            control = rx.next() => {
                let Some(Ok(msg)) = control else { break };
                let text = match msg {
                    Message::Text(text) => text,
                    Message::Close(_) => break,
                    _ => continue,
                };
                let Ok(control) = serde_json::from_str::<Control>(&text) else {
                    debug!(%text, "unparseable control frame");
                    continue;
                };
                match control {
                    Control::Subscribe { topic, since_seq } => {
                        let Some(parsed) = Topic::parse(&topic) else {
                            continue;
                        };
                        if subscription_ids.contains_key(&topic) {
                            continue;
                        }
                        let sub = state.engine.bus().subscribe(parsed.clone(), since_seq);
                        subscription_ids.insert(topic.clone(), (parsed, sub.id));
                        streams.insert(topic, ReceiverStream::new(sub.rx));
                    }
                    Control::Unsubscribe { topic } => {
                        if let Some((parsed, id)) = subscription_ids.remove(&topic) {
                            state.engine.bus().unsubscribe(&parsed, id);
                        }
                        streams.remove(&topic);
                    }
                }
            }
            frame = streams.next(), if !streams.is_empty() => {
                let Some((_, frame)) = frame else { continue };
                let json = frame_json(&frame);
                if tx.send(Message::Text(json.to_string().into())).await.is_err() {
                    break;
                }
            }
        }
    }

    for (parsed, id) in subscription_ids.into_values() {
        state.engine.bus().unsubscribe(&parsed, id);
    }
}

/// Wire shape of one stream frame.
fn frame_json(frame: &Frame) -> serde_json::Value {
    match frame {
        Frame::Event(stamped) => {
            let (kind, payload) = split_event(&stamped.event);
            serde_json::json!({
                "topic": stamped.topic.to_string(),
                "seq": stamped.seq,
                "kind": kind,
                "payload": payload,
            })
        }
        Frame::Dropped {
            topic,
            step_id,
            count,
        } => {
            let (kind, payload) = split_event(&Event::LinesDropped {
                step_id: step_id.clone(),
                count: *count,
            });
            serde_json::json!({
                "topic": topic.to_string(),
                "kind": kind,
                "payload": payload,
            })
        }
        Frame::Resync { topic, latest_seq } => serde_json::json!({
            "topic": topic.to_string(),
            "kind": "resync",
            "latest_seq": latest_seq,
        }),
    }
}

/// Split a serialized event into its type tag and payload fields.
fn split_event(event: &Event) -> (String, serde_json::Value) {
    let mut value = serde_json::to_value(event).unwrap_or_default();
    let kind = event.name().to_string();
    if let Some(obj) = value.as_object_mut() {
        obj.remove("type");
    }
    (kind, value)
}

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub topic: String,
    #[serde(default)]
    pub since_seq: Option<u64>,
}

/// One-way SSE stream of a single topic.
pub async fn sse_stream(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, super::ApiError> {
    let topic = Topic::parse(&query.topic)
        .ok_or_else(|| super::ApiError::BadRequest(format!("bad topic: {}", query.topic)))?;

    let sub = state.engine.bus().subscribe(topic, query.since_seq);
    let stream = ReceiverStream::new(sub.rx).map(|frame| {
        let json = frame_json(&frame);
        let kind = json
            .get("kind")
            .and_then(|k| k.as_str())
            .unwrap_or("event")
            .to_string();
        Ok(SseEvent::default().event(kind).data(json.to_string()))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

#[cfg(test)]
#[path = "events_tests.rs"]
mod tests;
