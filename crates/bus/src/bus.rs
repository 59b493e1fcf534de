// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event fan-out bus.
//!
//! Each topic carries a monotonic sequence counter, a bounded ring of
//! recent events for late-joiner replay, and a set of subscriber sinks.
//! Publishing never blocks on a subscriber: a state subscriber whose
//! queue fills is disconnected (it must resubscribe); a log subscriber
//! degrades to lossy delivery with a synthetic `lines_dropped` marker.

use laf_core::{Event, EventClass, StepId, Topic, TopicKind};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use tokio::sync::mpsc;
use tracing::debug;

/// Per-subscriber queue depth.
const SUBSCRIBER_QUEUE: usize = 256;

/// An event stamped with its topic-local sequence number.
#[derive(Debug, Clone, PartialEq)]
pub struct StampedEvent {
    pub topic: Topic,
    pub seq: u64,
    pub event: Event,
}

/// What a subscriber receives.
///
/// Within one topic the `seq` values of `Event` frames are strictly
/// increasing and contiguous, except across an interposed `Dropped`
/// marker on log topics.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// An in-order event from the topic.
    Event(StampedEvent),
    /// Log lines were dropped for this subscriber; delivery resumes
    /// with the next frame. Run correctness is unaffected: durable
    /// logs are persisted independently of the bus.
    Dropped {
        topic: Topic,
        step_id: StepId,
        count: u64,
    },
    /// The requested `since_seq` fell out of the replay ring. What
    /// follows is a compact current-state snapshot (the latest retained
    /// event of each kind), then the live tail.
    Resync { topic: Topic, latest_seq: u64 },
}

/// A live subscription to one topic.
pub struct Subscription {
    pub topic: Topic,
    pub id: u64,
    pub rx: mpsc::Receiver<Frame>,
}

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<Frame>,
    /// Log lines dropped since the last successful delivery.
    dropped: u64,
    /// Step the dropped lines belonged to (for the synthetic marker).
    dropped_step: Option<StepId>,
}

struct TopicState {
    next_seq: u64,
    ring: VecDeque<StampedEvent>,
    ring_cap: usize,
    subscribers: Vec<Subscriber>,
}

impl TopicState {
    fn new(ring_cap: usize) -> Self {
        Self {
            next_seq: 0,
            ring: VecDeque::with_capacity(ring_cap.min(64)),
            ring_cap,
            subscribers: Vec::new(),
        }
    }

    /// Oldest seq still replayable. When the ring is empty this is one
    /// past the latest assigned seq.
    fn oldest_retained_seq(&self) -> u64 {
        self.ring.front().map(|e| e.seq).unwrap_or(self.next_seq + 1)
    }
}

/// Process-singleton fan-out bus.
pub struct EventBus {
    topics: Mutex<HashMap<Topic, TopicState>>,
    state_ring_size: usize,
    log_ring_size: usize,
    next_subscriber_id: Mutex<u64>,
}

impl EventBus {
    /// Ring sizes come from configuration (`event_state_ring_size`,
    /// `event_log_ring_size`).
    pub fn new(state_ring_size: usize, log_ring_size: usize) -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            state_ring_size,
            log_ring_size,
            next_subscriber_id: Mutex::new(1),
        }
    }

    fn ring_cap(&self, kind: TopicKind) -> usize {
        // Step topics interleave state transitions with log batches;
        // they get the larger log ring.
        match kind {
            TopicKind::Step => self.log_ring_size,
            _ => self.state_ring_size,
        }
    }

    /// Publish an event to its topic. Returns the assigned sequence.
    ///
    /// Never blocks on a slow subscriber: state-class overflow
    /// disconnects the subscriber, log-class overflow counts dropped
    /// lines for a later `Dropped` marker.
    pub fn publish(&self, event: Event) -> u64 {
        let topic = event.topic();
        let class = event.class();
        let mut topics = self.topics.lock();
        let state = topics
            .entry(topic.clone())
            .or_insert_with(|| TopicState::new(self.ring_cap(topic.kind)));

        state.next_seq += 1;
        let seq = state.next_seq;
        let stamped = StampedEvent {
            topic: topic.clone(),
            seq,
            event,
        };

        if state.ring.len() == state.ring_cap {
            state.ring.pop_front();
        }
        state.ring.push_back(stamped.clone());

        state
            .subscribers
            .retain_mut(|sub| deliver(sub, &stamped, class, &topic));

        seq
    }

    /// Open a stream on a topic.
    ///
    /// With `since_seq` still inside the replay ring, missed events are
    /// replayed first. Outside the ring, the stream starts with a
    /// resync marker and a compact snapshot.
    pub fn subscribe(&self, topic: Topic, since_seq: Option<u64>) -> Subscription {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE);
        let id = {
            let mut next = self.next_subscriber_id.lock();
            let id = *next;
            *next += 1;
            id
        };

        let mut topics = self.topics.lock();
        let state = topics
            .entry(topic.clone())
            .or_insert_with(|| TopicState::new(self.ring_cap(topic.kind)));

        if let Some(since) = since_seq {
            let replayable = since <= state.next_seq && since + 1 >= state.oldest_retained_seq();
            if replayable {
                for stamped in state.ring.iter().filter(|e| e.seq > since) {
                    // A fresh queue cannot be full here.
                    let _ = tx.try_send(Frame::Event(stamped.clone()));
                }
            } else {
                let _ = tx.try_send(Frame::Resync {
                    topic: topic.clone(),
                    latest_seq: state.next_seq,
                });
                for stamped in snapshot_of(&state.ring) {
                    let _ = tx.try_send(Frame::Event(stamped));
                }
            }
        }

        state.subscribers.push(Subscriber {
            id,
            tx,
            dropped: 0,
            dropped_step: None,
        });

        Subscription { topic, id, rx }
    }

    /// Drop a subscriber's sink. Harmless if already disconnected.
    pub fn unsubscribe(&self, topic: &Topic, subscriber_id: u64) {
        let mut topics = self.topics.lock();
        if let Some(state) = topics.get_mut(topic) {
            state.subscribers.retain(|s| s.id != subscriber_id);
        }
    }

    /// Latest assigned sequence for a topic (0 if never published).
    pub fn latest_seq(&self, topic: &Topic) -> u64 {
        let topics = self.topics.lock();
        topics.get(topic).map(|s| s.next_seq).unwrap_or(0)
    }

    /// Number of live subscribers on a topic.
    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        let topics = self.topics.lock();
        topics.get(topic).map(|s| s.subscribers.len()).unwrap_or(0)
    }
}

/// Deliver one event to one subscriber. Returns false to disconnect.
fn deliver(sub: &mut Subscriber, stamped: &StampedEvent, class: EventClass, topic: &Topic) -> bool {
    // Flush a pending drop marker before resuming delivery.
    if sub.dropped > 0 {
        let marker = Frame::Dropped {
            topic: stamped.topic.clone(),
            step_id: sub
                .dropped_step
                .clone()
                .unwrap_or_else(|| StepId::new(topic.id.clone())),
            count: sub.dropped,
        };
        match sub.tx.try_send(marker) {
            Ok(()) => {
                sub.dropped = 0;
                sub.dropped_step = None;
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                return count_or_disconnect(sub, stamped, class, topic);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => return false,
        }
    }

    match sub.tx.try_send(Frame::Event(stamped.clone())) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => count_or_disconnect(sub, stamped, class, topic),
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}

/// Overflow policy: log events are counted as dropped, state events
/// end the subscription.
fn count_or_disconnect(
    sub: &mut Subscriber,
    stamped: &StampedEvent,
    class: EventClass,
    topic: &Topic,
) -> bool {
    match class {
        EventClass::Log => {
            if let Event::StepLogs { step_id, lines } = &stamped.event {
                sub.dropped += lines.len() as u64;
                sub.dropped_step = Some(step_id.clone());
            } else {
                sub.dropped += 1;
            }
            true
        }
        EventClass::State => {
            debug!(topic = %topic, subscriber = sub.id, "state queue full, disconnecting");
            false
        }
    }
}

/// Latest retained event of each distinct kind, in seq order. This is
/// the "current-state snapshot" delivered after a resync marker.
fn snapshot_of(ring: &VecDeque<StampedEvent>) -> Vec<StampedEvent> {
    let mut latest: HashMap<&str, &StampedEvent> = HashMap::new();
    for stamped in ring {
        latest.insert(stamped.event.name(), stamped);
    }
    let mut events: Vec<StampedEvent> = latest.into_values().cloned().collect();
    events.sort_by_key(|e| e.seq);
    events
}

#[cfg(test)]
#[path = "bus_tests.rs"]
mod tests;
