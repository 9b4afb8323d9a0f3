use crate::routing::SeverityRoute;
use costmon_common::types::{MonitoringEvent, Severity};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};

/// Queue depth per subscriber when none is configured.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

struct Subscriber {
    sender: mpsc::Sender<MonitoringEvent>,
    route: SeverityRoute,
}

/// Receiving end handed to a subscriber. Dropping it closes the queue; the
/// broadcaster forgets it on its next delivery.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    receiver: mpsc::Receiver<MonitoringEvent>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Waits for the next event. `None` once unsubscribed and drained.
    pub async fn recv(&mut self) -> Option<MonitoringEvent> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<MonitoringEvent> {
        match self.receiver.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Drains everything currently queued.
    pub fn drain(&mut self) -> Vec<MonitoringEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Outcome of one [`NotificationBroadcaster::broadcast`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    /// Subscribers whose queue was full. They miss this event only.
    pub dropped: usize,
    /// Subscribers whose severity filter rejected the event.
    pub filtered: usize,
    /// Closed subscribers removed during this broadcast.
    pub pruned: usize,
}

pub struct NotificationBroadcaster {
    subscribers: Mutex<HashMap<u64, Subscriber>>,
    next_id: AtomicU64,
    queue_capacity: usize,
}

impl Default for NotificationBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl NotificationBroadcaster {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            queue_capacity: queue_capacity.max(1),
        }
    }

    pub fn subscribe(&self) -> Subscription {
        self.register(SeverityRoute::default(), None)
    }

    /// Subscribes to summaries plus alert events of at least `min_severity`.
    pub fn subscribe_filtered(&self, min_severity: Severity) -> Subscription {
        self.register(SeverityRoute::new(min_severity), None)
    }

    /// Subscribes with `initial` queued as the first event, ahead of
    /// anything broadcast afterwards.
    pub fn subscribe_with(&self, initial: MonitoringEvent, min_severity: Severity) -> Subscription {
        self.register(SeverityRoute::new(min_severity), Some(initial))
    }

    fn register(&self, route: SeverityRoute, initial: Option<MonitoringEvent>) -> Subscription {
        let (sender, receiver) = mpsc::channel(self.queue_capacity);
        if let Some(event) = initial {
            // A fresh queue always has room.
            if let Err(e) = sender.try_send(event) {
                tracing::warn!(error = %e, "Failed to queue initial event");
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        subscribers.insert(id, Subscriber { sender, route });
        tracing::debug!(subscriber_id = id, min_severity = %route.min_severity, "Subscriber added");

        Subscription { id, receiver }
    }

    /// Removes the subscription. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        let removed = self
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&subscription.id)
            .is_some();
        if removed {
            tracing::debug!(subscriber_id = subscription.id, "Subscriber removed");
        }
        removed
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Delivers `event` to every matching subscriber without waiting.
    pub fn broadcast(&self, event: &MonitoringEvent) -> DeliveryReport {
        let snapshot: Vec<(u64, mpsc::Sender<MonitoringEvent>, SeverityRoute)> = {
            let subscribers = self
                .subscribers
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            subscribers
                .iter()
                .map(|(id, sub)| (*id, sub.sender.clone(), sub.route))
                .collect()
        };

        let mut report = DeliveryReport::default();
        let mut closed = Vec::new();
        for (id, sender, route) in snapshot {
            if !route.should_send(event) {
                report.filtered += 1;
                continue;
            }
            match sender.try_send(event.clone()) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(
                        subscriber_id = id,
                        event = event.kind(),
                        "Subscriber queue full, dropping event"
                    );
                    report.dropped += 1;
                }
                Err(TrySendError::Closed(_)) => closed.push(id),
            }
        }

        if !closed.is_empty() {
            let mut subscribers = self
                .subscribers
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            for id in &closed {
                if subscribers.remove(id).is_some() {
                    report.pruned += 1;
                }
            }
            tracing::debug!(pruned = report.pruned, "Closed subscribers pruned");
        }

        report
    }
}
