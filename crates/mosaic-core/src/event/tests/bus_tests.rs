#![cfg(test)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::event::{EventBus, PluginEvent};

fn loaded(plugin: &str) -> PluginEvent {
    PluginEvent::Loaded {
        plugin: plugin.to_string(),
        duration_ms: 5,
    }
}

#[test]
fn delivery_is_synchronous_and_in_order() {
    let bus = EventBus::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    bus.subscribe(move |record| {
        sink.lock().unwrap().push(record.kind().to_string());
    });

    bus.publish(loaded("auth"));
    bus.publish(PluginEvent::Unloaded {
        plugin: "auth".to_string(),
    });

    // Synchronous: both events visible immediately after publish returns.
    assert_eq!(
        *seen.lock().unwrap(),
        vec!["loaded".to_string(), "unloaded".to_string()]
    );
}

#[test]
fn all_listeners_receive_each_event() {
    let bus = EventBus::new();
    let count = Arc::new(AtomicUsize::new(0));
    for _ in 0..3 {
        let counter = Arc::clone(&count);
        bus.subscribe(move |_record| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
    }
    bus.publish(loaded("auth"));
    assert_eq!(count.load(Ordering::SeqCst), 3);
}

#[test]
fn unsubscribe_stops_delivery() {
    let bus = EventBus::new();
    let count = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&count);
    let id = bus.subscribe(move |_record| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    bus.publish(loaded("auth"));
    assert!(bus.unsubscribe(id));
    bus.publish(loaded("auth"));
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert!(!bus.unsubscribe(id));
}

#[test]
fn panicking_listener_does_not_block_others() {
    let bus = EventBus::new();
    let count = Arc::new(AtomicUsize::new(0));

    bus.subscribe(|_record| panic!("first listener exploded"));
    let counter = Arc::clone(&count);
    bus.subscribe(move |record| {
        if matches!(record.event, PluginEvent::Loaded { .. }) {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    bus.publish(loaded("auth"));
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn listener_panic_is_republished_as_error_event() {
    let bus = EventBus::new();
    let errors = Arc::new(Mutex::new(Vec::new()));

    bus.subscribe(|record| {
        if matches!(record.event, PluginEvent::Loaded { .. }) {
            panic!("boom");
        }
    });
    let sink = Arc::clone(&errors);
    bus.subscribe(move |record| {
        if let PluginEvent::Error { kind, message, .. } = &record.event {
            sink.lock().unwrap().push((kind.clone(), message.clone()));
        }
    });

    bus.publish(loaded("auth"));

    let errors = errors.lock().unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0, "listener-panic");
    assert!(errors[0].1.contains("boom"));
}

#[test]
fn error_events_never_recurse() {
    let bus = EventBus::new();
    let error_count = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&error_count);
    bus.subscribe(move |record| {
        if matches!(record.event, PluginEvent::Error { .. }) {
            counter.fetch_add(1, Ordering::SeqCst);
            // A listener that panics on the error event itself must not
            // trigger another error event.
            panic!("panic on error event");
        }
    });

    bus.publish(PluginEvent::Error {
        plugin: None,
        kind: "test".to_string(),
        message: "direct error".to_string(),
    });

    assert_eq!(error_count.load(Ordering::SeqCst), 1);
}

#[test]
fn event_kinds_are_stable() {
    assert_eq!(loaded("x").kind(), "loaded");
    assert_eq!(
        PluginEvent::SecurityScanCompleted {
            plugin: "x".to_string(),
            findings: 0
        }
        .kind(),
        "security.scan.completed"
    );
    assert_eq!(
        PluginEvent::Cache { hits: 1, misses: 2 }.kind(),
        "cache"
    );
}

#[test]
fn plugin_name_accessor() {
    assert_eq!(loaded("auth").plugin_name(), Some("auth"));
    assert_eq!(
        PluginEvent::Performance {
            total_load_time_ms: 1,
            plugins_attempted: 1,
            plugins_loaded: 1,
            concurrency_level: 1,
            failure_rate: 0.0
        }
        .plugin_name(),
        None
    );
}
