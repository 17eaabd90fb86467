#![cfg(test)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::event::{EventBus, PluginEvent};
use crate::plugin_system::state::{PluginState, PluginStateMachine, StateTransition};

fn machine() -> (Arc<EventBus>, PluginStateMachine) {
    let bus = Arc::new(EventBus::new());
    let machine = PluginStateMachine::new(Arc::clone(&bus));
    (bus, machine)
}

#[test]
fn rediscover_creates_unknown_plugins() {
    let (_bus, machine) = machine();
    assert_eq!(machine.current("auth"), None);
    assert!(machine.transition("auth", StateTransition::Rediscover, None));
    assert_eq!(machine.current("auth"), Some(PluginState::Discovered));
}

#[test]
fn other_transitions_reject_unknown_plugins() {
    let (_bus, machine) = machine();
    for transition in [
        StateTransition::StartLoading,
        StateTransition::Complete,
        StateTransition::Fail,
        StateTransition::Unload,
        StateTransition::Retry,
        StateTransition::DirectLoad,
    ] {
        assert!(!machine.transition("ghost", transition, None));
    }
    assert_eq!(machine.current("ghost"), None);
}

#[test]
fn full_lifecycle_walk() {
    let (_bus, machine) = machine();
    machine.transition("auth", StateTransition::Rediscover, None);
    assert!(machine.transition("auth", StateTransition::StartLoading, None));
    assert_eq!(machine.current("auth"), Some(PluginState::Loading));
    assert!(machine.transition("auth", StateTransition::Complete, None));
    assert_eq!(machine.current("auth"), Some(PluginState::Loaded));
    assert!(machine.transition("auth", StateTransition::Unload, None));
    assert_eq!(machine.current("auth"), Some(PluginState::Unloaded));
    assert!(machine.transition("auth", StateTransition::DirectLoad, None));
    assert_eq!(machine.current("auth"), Some(PluginState::Loading));
    assert!(machine.transition("auth", StateTransition::Fail, None));
    assert_eq!(machine.current("auth"), Some(PluginState::Failed));
    assert!(machine.transition("auth", StateTransition::Retry, None));
    assert_eq!(machine.current("auth"), Some(PluginState::Loading));
}

#[test]
fn illegal_edges_are_rejected() {
    let (_bus, machine) = machine();
    machine.transition("auth", StateTransition::Rediscover, None);

    // Discovered only accepts start-loading.
    assert!(!machine.transition("auth", StateTransition::Complete, None));
    assert!(!machine.transition("auth", StateTransition::Unload, None));
    assert!(!machine.transition("auth", StateTransition::Retry, None));
    assert_eq!(machine.current("auth"), Some(PluginState::Discovered));
}

#[test]
fn can_transition_agrees_with_transition() {
    let (_bus, machine) = machine();
    machine.transition("auth", StateTransition::Rediscover, None);

    let all = [
        StateTransition::StartLoading,
        StateTransition::Complete,
        StateTransition::Fail,
        StateTransition::Unload,
        StateTransition::Retry,
        StateTransition::Rediscover,
        StateTransition::DirectLoad,
    ];
    // Probe on a copy of the state by checking before each attempt.
    for transition in all {
        let predicted = machine.can_transition("auth", transition);
        let actual = machine.transition("auth", transition, None);
        assert_eq!(predicted, actual, "{:?} prediction mismatch", transition);
        if actual {
            break;
        }
    }
}

#[test]
fn every_transition_emits_exactly_one_event() {
    let (bus, machine) = machine();
    let count = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&count);
    bus.subscribe(move |record| {
        if matches!(record.event, PluginEvent::StateChanged { .. }) {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    machine.transition("auth", StateTransition::Rediscover, None);
    machine.transition("auth", StateTransition::StartLoading, None);
    machine.transition("auth", StateTransition::Complete, None);
    // Rejected transition must not emit.
    machine.transition("auth", StateTransition::StartLoading, None);

    assert_eq!(count.load(Ordering::SeqCst), 3);
}

#[test]
fn state_changed_events_carry_the_edge() {
    let (bus, machine) = machine();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    bus.subscribe(move |record| {
        if let PluginEvent::StateChanged {
            plugin, from, to, ..
        } = &record.event
        {
            sink.lock().unwrap().push((plugin.clone(), *from, *to));
        }
    });

    machine.transition("auth", StateTransition::Rediscover, None);
    machine.transition("auth", StateTransition::StartLoading, None);

    let events = seen.lock().unwrap();
    assert_eq!(
        events.as_slice(),
        &[
            (
                "auth".to_string(),
                PluginState::Unloaded,
                PluginState::Discovered
            ),
            (
                "auth".to_string(),
                PluginState::Discovered,
                PluginState::Loading
            ),
        ]
    );
}

#[test]
fn valid_transitions_lists_legal_edges() {
    let (_bus, machine) = machine();
    assert_eq!(
        machine.valid_transitions("ghost"),
        vec![StateTransition::Rediscover]
    );

    machine.transition("auth", StateTransition::Rediscover, None);
    assert_eq!(
        machine.valid_transitions("auth"),
        vec![StateTransition::StartLoading]
    );

    machine.transition("auth", StateTransition::StartLoading, None);
    let from_loading = machine.valid_transitions("auth");
    assert!(from_loading.contains(&StateTransition::Complete));
    assert!(from_loading.contains(&StateTransition::Fail));
    assert_eq!(from_loading.len(), 2);
}

#[test]
fn reset_forgets_the_plugin() {
    let (_bus, machine) = machine();
    machine.transition("auth", StateTransition::Rediscover, None);
    assert!(machine.reset("auth"));
    assert_eq!(machine.current("auth"), None);
    assert!(!machine.reset("auth"));
}

#[test]
fn listener_panic_does_not_break_transitions() {
    let (bus, machine) = machine();
    bus.subscribe(|_record| panic!("listener exploded"));

    assert!(machine.transition("auth", StateTransition::Rediscover, None));
    assert_eq!(machine.current("auth"), Some(PluginState::Discovered));
}
