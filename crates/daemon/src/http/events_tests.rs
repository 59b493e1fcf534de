// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use laf_bus::StampedEvent;
use laf_core::{RunId, RunState, StepId};

fn stamped(seq: u64) -> StampedEvent {
    let event = Event::RunStatus {
        id: RunId::new("run-1"),
        state: RunState::Running,
        steps_completed: 1,
        steps_total: 3,
        error: None,
    };
    StampedEvent {
        topic: event.topic(),
        seq,
        event,
    }
}

#[test]
fn event_frames_carry_topic_seq_kind_payload() {
    let json = frame_json(&Frame::Event(stamped(7)));
    assert_eq!(json["topic"], "run:run-1");
    assert_eq!(json["seq"], 7);
    assert_eq!(json["kind"], "run:status");
    assert_eq!(json["payload"]["steps_completed"], 1);
    assert_eq!(json["payload"]["steps_total"], 3);
    // The tag lives in "kind", not in the payload
    assert!(json["payload"].get("type").is_none());
}

#[test]
fn dropped_frames_become_lines_dropped_events() {
    let json = frame_json(&Frame::Dropped {
        topic: Topic::parse("step:s-1").unwrap(),
        step_id: StepId::new("s-1"),
        count: 42,
    });
    assert_eq!(json["topic"], "step:s-1");
    assert_eq!(json["kind"], "step:lines_dropped");
    assert_eq!(json["payload"]["count"], 42);
    assert!(json.get("seq").is_none());
}

#[test]
fn resync_frames_carry_latest_seq() {
    let json = frame_json(&Frame::Resync {
        topic: Topic::parse("run:run-1").unwrap(),
        latest_seq: 30,
    });
    assert_eq!(json["kind"], "resync");
    assert_eq!(json["latest_seq"], 30);
}

#[test]
fn control_frames_parse() {
    let sub: Control =
        serde_json::from_str(r#"{"op":"subscribe","topic":"run:x","since_seq":10}"#).unwrap();
    assert!(matches!(
        sub,
        Control::Subscribe { ref topic, since_seq: Some(10) } if topic == "run:x"
    ));

    let unsub: Control = serde_json::from_str(r#"{"op":"unsubscribe","topic":"run:x"}"#).unwrap();
    assert!(matches!(unsub, Control::Unsubscribe { .. }));
}
