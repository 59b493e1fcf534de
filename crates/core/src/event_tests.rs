// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn events_map_to_their_entity_topic() {
    let ev = Event::RunStatus {
        id: RunId::new("run-7"),
        state: RunState::Passed,
        steps_completed: 3,
        steps_total: 3,
        error: None,
    };
    assert_eq!(ev.topic().to_string(), "run:run-7");

    let ev = Event::StepLogs {
        step_id: StepId::new("step-2"),
        lines: vec!["hello".to_string()],
    };
    assert_eq!(ev.topic().to_string(), "step:step-2");

    // Step transitions ride the run topic for in-order observation
    let ev = Event::StepStatus {
        run_id: RunId::new("run-7"),
        step_id: StepId::new("step-2"),
        index: 1,
        state: StepState::Ready,
        exit_code: None,
        error: None,
    };
    assert_eq!(ev.topic().to_string(), "run:run-7");

    let ev = Event::RunnerEvicted {
        id: RunnerId::new("r-1"),
    };
    assert_eq!(ev.topic().to_string(), "runner:r-1");
}

#[test]
fn log_class_covers_logs_and_drop_markers() {
    let logs = Event::StepLogs {
        step_id: StepId::new("s"),
        lines: vec![],
    };
    assert_eq!(logs.class(), EventClass::Log);

    let dropped = Event::LinesDropped {
        step_id: StepId::new("s"),
        count: 12,
    };
    assert_eq!(dropped.class(), EventClass::Log);

    let status = Event::RunnerStatus {
        id: RunnerId::new("r"),
        state: RunnerState::Idle,
        step_id: None,
    };
    assert_eq!(status.class(), EventClass::State);
}

#[test]
fn serializes_with_type_tag() {
    let ev = Event::StepStatus {
        run_id: RunId::new("run-1"),
        step_id: StepId::new("step-1"),
        index: 0,
        state: StepState::Completed,
        exit_code: Some(0),
        error: None,
    };
    let json = serde_json::to_value(&ev).unwrap();
    assert_eq!(json["type"], "step:status");
    assert_eq!(json["state"], "completed");

    let back: Event = serde_json::from_value(json).unwrap();
    assert_eq!(back, ev);
}

#[test]
fn unknown_type_tags_deserialize_to_custom() {
    let ev: Event = serde_json::from_str(r#"{"type":"flux:capacitor","x":1}"#).unwrap();
    assert_eq!(ev, Event::Custom);
}

#[test]
fn topic_parse_roundtrips() {
    let topic = Topic::parse("run:abc").unwrap();
    assert_eq!(topic.kind, TopicKind::Run);
    assert_eq!(topic.id, "abc");
    assert_eq!(topic.to_string(), "run:abc");

    assert!(Topic::parse("nope").is_none());
    assert!(Topic::parse("widget:1").is_none());
    assert!(Topic::parse("run:").is_none());
}

#[test]
fn log_summary_names_the_entity() {
    let ev = Event::RunnerStatus {
        id: RunnerId::new("r-1"),
        state: RunnerState::Busy,
        step_id: Some(StepId::new("s-9")),
    };
    assert_eq!(ev.log_summary(), "runner:status id=r-1 state=busy step=s-9");
}
