//! Scenario: late subscribers replay from the ring when their cursor
//! is retained, and resync with a snapshot when it is not.

use laf_bus::{EventBus, Frame};
use laf_core::{Event, RunId, RunState, Topic};

fn status(completed: u32) -> Event {
    Event::RunStatus {
        id: RunId::new("X"),
        state: RunState::Running,
        steps_completed: completed,
        steps_total: 30,
        error: None,
    }
}

#[tokio::test]
async fn retained_cursor_replays_missed_events() {
    let bus = EventBus::new(256, 4096);
    for i in 0..30 {
        bus.publish(status(i));
    }

    // Ring retains 1..=30; joining at since_seq=10 replays 11..=30.
    let mut sub = bus.subscribe(Topic::parse("run:X").unwrap(), Some(10));
    let mut seqs = Vec::new();
    while let Ok(Frame::Event(e)) = sub.rx.try_recv() {
        seqs.push(e.seq);
    }
    assert_eq!(seqs, (11..=30).collect::<Vec<u64>>());

    // Live tail continues seamlessly.
    bus.publish(status(30));
    match sub.rx.try_recv() {
        Ok(Frame::Event(e)) => assert_eq!(e.seq, 31),
        other => panic!("expected live event, got {other:?}"),
    }
}

#[tokio::test]
async fn rotated_cursor_gets_resync_and_snapshot() {
    // Ring of 11: after 30 events it retains only 20..=30.
    let bus = EventBus::new(11, 4096);
    for i in 0..30 {
        bus.publish(status(i));
    }

    let mut sub = bus.subscribe(Topic::parse("run:X").unwrap(), Some(10));
    match sub.rx.try_recv() {
        Ok(Frame::Resync { latest_seq, .. }) => assert_eq!(latest_seq, 30),
        other => panic!("expected resync, got {other:?}"),
    }
    // Snapshot: the latest retained event of each kind.
    match sub.rx.try_recv() {
        Ok(Frame::Event(e)) => assert_eq!(e.seq, 30),
        other => panic!("expected snapshot event, got {other:?}"),
    }
}
