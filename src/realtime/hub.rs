//! Observer registry and event distributor.
//!
//! One mutex guards the observer map; it is held for map operations only.
//! `publish` snapshots the matching senders under the lock, then performs
//! the sends outside it, so lock hold time is O(map), never O(I/O). Sends
//! are non-blocking `try_send` into per-observer bounded queues: an
//! observer whose queue is full or closed is treated as an implicit
//! disconnect and removed without interrupting delivery to the rest.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::event::{Event, EventKind, NotificationLevel};
use crate::model::ObserverId;
use crate::telemetry::metrics;

struct ObserverEntry {
    sender: mpsc::Sender<Arc<Event>>,
    interests: HashSet<EventKind>,
    last_heartbeat: Instant,
}

/// Shared registry of connected observers with interest-filtered fan-out.
pub struct Hub {
    observers: Mutex<HashMap<ObserverId, ObserverEntry>>,
    queue_capacity: usize,
}

impl Hub {
    /// Create a hub whose observers each get a bounded outbound queue of
    /// `queue_capacity` events.
    pub fn new(queue_capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            observers: Mutex::new(HashMap::new()),
            queue_capacity: queue_capacity.max(1),
        })
    }

    /// Register an observer, generating an id when none is supplied.
    ///
    /// Returns the assigned id and the receiving end of the observer's
    /// queue. A `connection_established` event carrying the id is already
    /// enqueued for this observer only. Reconnecting with an id that is
    /// still registered replaces the old entry; the orphaned receiver's
    /// queue closes and its drain loop ends.
    pub fn connect(&self, requested: Option<ObserverId>) -> (ObserverId, mpsc::Receiver<Arc<Event>>) {
        let id = requested.unwrap_or_default();
        let (tx, rx) = mpsc::channel(self.queue_capacity);

        let hello = Arc::new(Event::connection_established(id));
        // Capacity is at least 1 and the queue is fresh, so this cannot fail.
        let _ = tx.try_send(hello);

        let mut observers = self.observers.lock();
        observers.insert(
            id,
            ObserverEntry {
                sender: tx,
                interests: HashSet::new(),
                last_heartbeat: Instant::now(),
            },
        );
        drop(observers);

        debug!(observer = %id, "observer connected");
        metrics::observer_connections().add(1, &[opentelemetry::KeyValue::new("op", "connect")]);
        (id, rx)
    }

    /// Remove an observer and all its interest-set memberships.
    /// Idempotent: disconnecting an unknown id is a no-op.
    pub fn disconnect(&self, id: ObserverId) {
        let removed = self.observers.lock().remove(&id).is_some();
        if removed {
            debug!(observer = %id, "observer disconnected");
            metrics::observer_connections()
                .add(1, &[opentelemetry::KeyValue::new("op", "disconnect")]);
        }
    }

    /// Add kinds to an observer's interest set. Returns false if the
    /// observer is no longer connected.
    pub fn subscribe(&self, id: ObserverId, kinds: &[EventKind]) -> bool {
        let mut observers = self.observers.lock();
        match observers.get_mut(&id) {
            Some(entry) => {
                entry.interests.extend(kinds.iter().copied());
                true
            }
            None => false,
        }
    }

    /// Remove kinds from an observer's interest set.
    pub fn unsubscribe(&self, id: ObserverId, kinds: &[EventKind]) -> bool {
        let mut observers = self.observers.lock();
        match observers.get_mut(&id) {
            Some(entry) => {
                for kind in kinds {
                    entry.interests.remove(kind);
                }
                true
            }
            None => false,
        }
    }

    /// Refresh an observer's liveness and enqueue a heartbeat ack for it.
    /// Returns false if the observer is no longer connected.
    pub fn heartbeat(&self, id: ObserverId) -> bool {
        let sender = {
            let mut observers = self.observers.lock();
            match observers.get_mut(&id) {
                Some(entry) => {
                    entry.last_heartbeat = Instant::now();
                    entry.sender.clone()
                }
                None => return false,
            }
        };

        if sender.try_send(Arc::new(Event::heartbeat_ack())).is_err() {
            self.disconnect(id);
            return false;
        }
        true
    }

    /// Deliver an event to every observer whose interest set contains its
    /// kind, or to all observers for always-broadcast kinds.
    ///
    /// Never blocks the producer and never fails: a send error for one
    /// observer evicts that observer and the loop continues.
    pub fn publish(&self, event: Event) {
        let kind = event.kind();
        let event = Arc::new(event);

        let targets: Vec<(ObserverId, mpsc::Sender<Arc<Event>>)> = {
            let observers = self.observers.lock();
            observers
                .iter()
                .filter(|(_, entry)| kind.always_broadcast() || entry.interests.contains(&kind))
                .map(|(id, entry)| (*id, entry.sender.clone()))
                .collect()
        };

        metrics::events_published().add(1, &[opentelemetry::KeyValue::new("kind", kind.as_str())]);

        for (id, sender) in targets {
            match sender.try_send(Arc::clone(&event)) {
                Ok(()) => {}
                Err(_) => {
                    warn!(observer = %id, kind = %kind, "send failed, evicting observer");
                    metrics::observer_connections()
                        .add(1, &[opentelemetry::KeyValue::new("op", "evicted")]);
                    self.disconnect(id);
                }
            }
        }
    }

    /// Enqueue a user notification for one observer only (used for
    /// protocol errors on that observer's own connection).
    pub fn notify_observer(
        &self,
        id: ObserverId,
        level: NotificationLevel,
        title: &str,
        message: &str,
    ) -> bool {
        let sender = {
            let observers = self.observers.lock();
            match observers.get(&id) {
                Some(entry) => entry.sender.clone(),
                None => return false,
            }
        };

        if sender
            .try_send(Arc::new(Event::notification(level, title, message)))
            .is_err()
        {
            self.disconnect(id);
            return false;
        }
        true
    }

    /// Disconnect every observer whose last heartbeat is older than
    /// `max_idle`. Returns the evicted ids. Intended to run periodically,
    /// decoupled from publish/connect traffic.
    pub fn evict_stale(&self, max_idle: Duration) -> Vec<ObserverId> {
        let stale: Vec<ObserverId> = {
            let observers = self.observers.lock();
            observers
                .iter()
                .filter(|(_, entry)| entry.last_heartbeat.elapsed() > max_idle)
                .map(|(id, _)| *id)
                .collect()
        };

        for id in &stale {
            warn!(observer = %id, "evicting stale observer");
            metrics::observer_connections()
                .add(1, &[opentelemetry::KeyValue::new("op", "evicted")]);
            self.disconnect(*id);
        }
        stale
    }

    pub fn observer_count(&self) -> usize {
        self.observers.lock().len()
    }

    pub fn observer_ids(&self) -> Vec<ObserverId> {
        self.observers.lock().keys().copied().collect()
    }
}
