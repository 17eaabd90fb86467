use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

use log::warn;

use crate::event::types::{EventRecord, PluginEvent};

/// Identifier of a registered listener.
pub type ListenerId = u64;

type Listener = Arc<dyn Fn(&EventRecord) + Send + Sync>;

/// In-process publish/subscribe bus for lifecycle, security, performance and
/// error events.
///
/// Delivery is synchronous in the publisher's calling path. A panicking
/// listener never prevents delivery to the remaining listeners; its panic is
/// captured and republished as an `error` event (never recursively for an
/// `error` event). The bus keeps no state past delivery.
pub struct EventBus {
    listeners: RwLock<Vec<(ListenerId, Listener)>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a listener; returns an id usable with [`EventBus::unsubscribe`].
    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&EventRecord) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .write()
            .expect("event bus lock poisoned")
            .push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener. Returns whether it was registered.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write().expect("event bus lock poisoned");
        let before = listeners.len();
        listeners.retain(|(l_id, _)| *l_id != id);
        listeners.len() < before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().expect("event bus lock poisoned").len()
    }

    /// Publish an event to every listener, synchronously.
    pub fn publish(&self, event: PluginEvent) {
        let record = EventRecord {
            event,
            timestamp: SystemTime::now(),
        };
        // Deliver against a snapshot so listeners may (un)subscribe freely.
        let snapshot: Vec<Listener> = self
            .listeners
            .read()
            .expect("event bus lock poisoned")
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();

        let mut panics = Vec::new();
        for listener in &snapshot {
            let result = panic::catch_unwind(AssertUnwindSafe(|| listener(&record)));
            if let Err(payload) = result {
                let message = panic_message(payload);
                warn!(
                    "event listener panicked during '{}': {}",
                    record.kind(),
                    message
                );
                panics.push(message);
            }
        }

        // Listener failures surface as error events, but an error event that
        // itself trips a listener must not recurse.
        if !panics.is_empty() && !matches!(record.event, PluginEvent::Error { .. }) {
            for message in panics {
                self.publish(PluginEvent::Error {
                    plugin: record.event.plugin_name().map(str::to_string),
                    kind: "listener-panic".to_string(),
                    message,
                });
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic reason".to_string()
    }
}
