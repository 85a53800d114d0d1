//! Tests for the observer hub: interest filtering, fan-out isolation,
//! heartbeats, and stale eviction.

use std::sync::Arc;
use std::time::Duration;

use draftsmith::event::{
    Event, EventKind, EventPayload, NotificationLevel, TaskProgressPayload,
};
use draftsmith::model::{ObserverId, TaskId};
use draftsmith::realtime::Hub;
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn progress_event(step_index: u32) -> Event {
    Event::new(EventPayload::TaskProgress(TaskProgressPayload {
        task_id: TaskId::new(),
        step_index,
        total_steps: Some(4),
        step_name: format!("step_{step_index}"),
        step_description: None,
        completed_items: Vec::new(),
    }))
}

fn drain(rx: &mut mpsc::Receiver<Arc<Event>>) -> Vec<Arc<Event>> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn kinds_of(events: &[Arc<Event>]) -> Vec<EventKind> {
    events.iter().map(|e| e.kind()).collect()
}

// ---------------------------------------------------------------------------
// Connect / disconnect
// ---------------------------------------------------------------------------

#[tokio::test]
async fn connect_delivers_connection_established_to_that_observer_only() {
    let hub = Hub::new(16);
    let (id_a, mut rx_a) = hub.connect(None);
    let (_id_b, mut rx_b) = hub.connect(None);

    let events = drain(&mut rx_a);
    assert_eq!(events.len(), 1);
    match &events[0].payload {
        EventPayload::ConnectionEstablished(payload) => assert_eq!(payload.observer_id, id_a),
        other => panic!("expected ConnectionEstablished, got {other:?}"),
    }

    // B got its own hello, not A's
    let events_b = drain(&mut rx_b);
    assert_eq!(events_b.len(), 1);
}

#[tokio::test]
async fn connect_honors_a_requested_id() {
    let hub = Hub::new(16);
    let wanted = ObserverId::new();
    let (id, _rx) = hub.connect(Some(wanted));
    assert_eq!(id, wanted);
}

#[tokio::test]
async fn reconnect_with_the_same_id_replaces_the_old_entry() {
    let hub = Hub::new(16);
    let wanted = ObserverId::new();
    let (_, mut old_rx) = hub.connect(Some(wanted));
    drain(&mut old_rx);

    let (_, _new_rx) = hub.connect(Some(wanted));
    assert_eq!(hub.observer_count(), 1);

    // Old receiver's sender was dropped with the replaced entry.
    assert!(old_rx.recv().await.is_none());
}

#[tokio::test]
async fn disconnect_is_idempotent() {
    let hub = Hub::new(16);
    let (id, _rx) = hub.connect(None);
    hub.disconnect(id);
    hub.disconnect(id);
    assert_eq!(hub.observer_count(), 0);
    assert!(!hub.subscribe(id, &[EventKind::TaskProgress]));
}

// ---------------------------------------------------------------------------
// Interest filtering
// ---------------------------------------------------------------------------

#[tokio::test]
async fn observer_only_receives_subscribed_kinds() {
    let hub = Hub::new(16);
    let (id_a, mut rx_a) = hub.connect(None);
    let (id_b, mut rx_b) = hub.connect(None);
    drain(&mut rx_a);
    drain(&mut rx_b);

    hub.subscribe(id_a, &[EventKind::TaskProgress]);
    hub.subscribe(id_b, &[EventKind::CostUpdate]);

    hub.publish(progress_event(1));

    assert_eq!(kinds_of(&drain(&mut rx_a)), vec![EventKind::TaskProgress]);
    assert!(drain(&mut rx_b).is_empty());
}

#[tokio::test]
async fn one_progress_event_two_subscribers_exactly_two_deliveries() {
    let hub = Hub::new(16);
    let (id_a, mut rx_a) = hub.connect(None);
    let (id_b, mut rx_b) = hub.connect(None);
    let (_id_c, mut rx_c) = hub.connect(None);
    drain(&mut rx_a);
    drain(&mut rx_b);
    drain(&mut rx_c);

    hub.subscribe(id_a, &[EventKind::TaskProgress]);
    hub.subscribe(id_b, &[EventKind::TaskProgress]);
    // C subscribes to nothing

    hub.publish(progress_event(1));

    assert_eq!(drain(&mut rx_a).len(), 1);
    assert_eq!(drain(&mut rx_b).len(), 1);
    assert!(drain(&mut rx_c).is_empty());
}

#[tokio::test]
async fn events_arrive_in_emission_order() {
    let hub = Hub::new(16);
    let (id, mut rx) = hub.connect(None);
    drain(&mut rx);
    hub.subscribe(id, &[EventKind::TaskProgress]);

    for step in 1..=3 {
        hub.publish(progress_event(step));
    }

    let steps: Vec<u32> = drain(&mut rx)
        .iter()
        .map(|event| match &event.payload {
            EventPayload::TaskProgress(payload) => payload.step_index,
            other => panic!("unexpected payload {other:?}"),
        })
        .collect();
    assert_eq!(steps, vec![1, 2, 3]);
}

#[tokio::test]
async fn always_broadcast_kinds_reach_unsubscribed_observers() {
    let hub = Hub::new(16);
    let (_id, mut rx) = hub.connect(None);
    drain(&mut rx);

    hub.publish(Event::notification(
        NotificationLevel::Info,
        "Deploy",
        "maintenance at noon",
    ));

    assert_eq!(kinds_of(&drain(&mut rx)), vec![EventKind::UserNotification]);
}

#[tokio::test]
async fn unsubscribe_stops_delivery() {
    let hub = Hub::new(16);
    let (id, mut rx) = hub.connect(None);
    drain(&mut rx);

    hub.subscribe(id, &[EventKind::TaskProgress]);
    hub.publish(progress_event(1));
    hub.unsubscribe(id, &[EventKind::TaskProgress]);
    hub.publish(progress_event(2));

    assert_eq!(drain(&mut rx).len(), 1);
}

// ---------------------------------------------------------------------------
// Slow-observer isolation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn a_stalled_observer_is_evicted_without_blocking_the_healthy_ones() {
    // Tiny queues so the stalled observer overflows quickly.
    let hub = Hub::new(2);

    let (stalled, _stalled_rx) = hub.connect(None); // never drains, hello occupies a slot
    let mut healthy = Vec::new();
    for _ in 0..5 {
        let (id, mut rx) = hub.connect(None);
        drain(&mut rx);
        hub.subscribe(id, &[EventKind::TaskProgress]);
        healthy.push(rx);
    }
    hub.subscribe(stalled, &[EventKind::TaskProgress]);

    hub.publish(progress_event(1)); // fills the stalled queue
    hub.publish(progress_event(2)); // overflows it: implicit disconnect

    assert_eq!(hub.observer_count(), 5);
    assert!(!hub.observer_ids().contains(&stalled));
    for rx in &mut healthy {
        assert_eq!(drain(rx).len(), 2);
    }
}

// ---------------------------------------------------------------------------
// Heartbeats and stale eviction
// ---------------------------------------------------------------------------

#[tokio::test]
async fn heartbeat_acks_and_reports_unknown_observers() {
    let hub = Hub::new(16);
    let (id, mut rx) = hub.connect(None);
    drain(&mut rx);

    assert!(hub.heartbeat(id));
    assert_eq!(kinds_of(&drain(&mut rx)), vec![EventKind::HeartbeatAck]);

    hub.disconnect(id);
    assert!(!hub.heartbeat(id));
}

#[tokio::test]
async fn evict_stale_removes_exactly_the_idle_observers() {
    let hub = Hub::new(16);
    let (idle, _idle_rx) = hub.connect(None);
    let (fresh, mut fresh_rx) = hub.connect(None);

    tokio::time::sleep(Duration::from_millis(120)).await;
    drain(&mut fresh_rx);
    assert!(hub.heartbeat(fresh));

    let evicted = hub.evict_stale(Duration::from_millis(60));

    assert_eq!(evicted, vec![idle]);
    let remaining = hub.observer_ids();
    assert!(remaining.contains(&fresh));
    assert!(!remaining.contains(&idle));
}

#[tokio::test]
async fn evict_stale_with_generous_threshold_removes_nobody() {
    let hub = Hub::new(16);
    let (_a, _rx_a) = hub.connect(None);
    let (_b, _rx_b) = hub.connect(None);

    let evicted = hub.evict_stale(Duration::from_secs(3600));
    assert!(evicted.is_empty());
    assert_eq!(hub.observer_count(), 2);
}

// ---------------------------------------------------------------------------
// Targeted notification
// ---------------------------------------------------------------------------

#[tokio::test]
async fn notify_observer_targets_a_single_connection() {
    let hub = Hub::new(16);
    let (id_a, mut rx_a) = hub.connect(None);
    let (_id_b, mut rx_b) = hub.connect(None);
    drain(&mut rx_a);
    drain(&mut rx_b);

    assert!(hub.notify_observer(id_a, NotificationLevel::Error, "Invalid message", "bad JSON"));

    assert_eq!(kinds_of(&drain(&mut rx_a)), vec![EventKind::UserNotification]);
    assert!(drain(&mut rx_b).is_empty());
    assert!(!hub.notify_observer(ObserverId::new(), NotificationLevel::Info, "x", "y"));
}
