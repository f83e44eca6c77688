//! Append-only event log with synchronous pub/sub.
//!
//! The single source of truth for everything that happened during a run.
//! `send` completes all subscriber notifications before returning, so
//! observers never see events reordered relative to each other.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use axon_types::{Event, EventKind};

/// Subscriber callback. A returned error is logged and swallowed; it never
/// blocks delivery to the other subscribers.
pub type Subscriber = Arc<dyn Fn(&Event) -> anyhow::Result<()> + Send + Sync>;

/// Opaque handle returned by [`EventStream::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

/// Default capacity for bridged event channels.
///
/// Set higher (128) to accommodate best-effort delta sends without blocking.
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 128;

#[derive(Default)]
struct Registry {
    subscribers: Vec<(u64, Subscriber)>,
    channels: Vec<mpsc::Sender<Arc<Event>>>,
}

/// Append-only, strongly-typed event log scoped to one session.
pub struct EventStream {
    session_id: String,
    events: Mutex<Vec<Event>>,
    registry: Mutex<Registry>,
    next_subscription: AtomicU64,
    last_timestamp: AtomicU64,
}

impl EventStream {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            events: Mutex::new(Vec::new()),
            registry: Mutex::new(Registry::default()),
            next_subscription: AtomicU64::new(1),
            last_timestamp: AtomicU64::new(0),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Stamps id + timestamp without publishing.
    ///
    /// Timestamps are a monotonic logical clock: wall-clock milliseconds,
    /// clamped so they never decrease across events of this stream.
    pub fn create_event(&self, kind: EventKind) -> Event {
        let now = now_ms();
        let timestamp_ms = self
            .last_timestamp
            .fetch_max(now, Ordering::SeqCst)
            .max(now);
        Event {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp_ms,
            kind,
        }
    }

    /// Appends to the log and synchronously notifies all current
    /// subscribers in subscription order.
    pub fn send(&self, event: Event) {
        {
            let mut events = self.events.lock().expect("event log poisoned");
            events.push(event.clone());
        }

        let (subscribers, mut channels) = {
            let registry = self.registry.lock().expect("registry poisoned");
            (registry.subscribers.clone(), registry.channels.clone())
        };

        for (id, subscriber) in &subscribers {
            if let Err(err) = subscriber(&event) {
                tracing::warn!(subscription = id, %err, "Event subscriber failed");
            }
        }

        if !channels.is_empty() {
            let shared = Arc::new(event);
            let mut closed = false;
            channels.retain(|tx| match tx.try_send(Arc::clone(&shared)) {
                Ok(()) => true,
                // Slow consumer: drop this event for it, keep the channel.
                Err(TrySendError::Full(_)) => {
                    if !shared.is_streaming() {
                        tracing::warn!("Dropping non-streaming event for slow channel consumer");
                    }
                    true
                }
                Err(TrySendError::Closed(_)) => {
                    closed = true;
                    false
                }
            });
            if closed {
                let mut registry = self.registry.lock().expect("registry poisoned");
                registry.channels.retain(|tx| !tx.is_closed());
            }
        }
    }

    /// Creates and publishes an event in one step.
    pub fn emit(&self, kind: EventKind) -> Event {
        let event = self.create_event(kind);
        self.send(event.clone());
        event
    }

    /// Registers a callback invoked once per future event. Subscribing does
    /// not replay past events; fetch history via [`EventStream::events`].
    pub fn subscribe(&self, subscriber: Subscriber) -> SubscriptionId {
        let id = self.next_subscription.fetch_add(1, Ordering::SeqCst);
        let mut registry = self.registry.lock().expect("registry poisoned");
        registry.subscribers.push((id, subscriber));
        SubscriptionId(id)
    }

    /// Removes a subscription. Idempotent.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut registry = self.registry.lock().expect("registry poisoned");
        registry.subscribers.retain(|(sub_id, _)| *sub_id != id.0);
    }

    /// Bridges future events into a bounded channel for async consumers.
    /// Closed receivers are pruned on the next send.
    pub fn subscribe_channel(&self) -> mpsc::Receiver<Arc<Event>> {
        let (tx, rx) = mpsc::channel(DEFAULT_EVENT_CHANNEL_CAPACITY);
        let mut registry = self.registry.lock().expect("registry poisoned");
        registry.channels.push(tx);
        rx
    }

    /// Snapshot of the full log.
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().expect("event log poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().expect("event log poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Most recent finalized assistant event, used to chain provider-side
    /// response-continuation ids.
    pub fn latest_assistant_response(&self) -> Option<Event> {
        let events = self.events.lock().expect("event log poisoned");
        events
            .iter()
            .rev()
            .find(|e| matches!(e.kind, EventKind::AssistantMessage { .. }))
            .cloned()
    }
}

impl std::fmt::Debug for EventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream")
            .field("session_id", &self.session_id)
            .field("events", &self.len())
            .finish()
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
