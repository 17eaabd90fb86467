use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::event::{EventBus, PluginEvent};

/// Lifecycle states of a plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PluginState {
    Discovered,
    Loading,
    Loaded,
    Failed,
    Unloaded,
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PluginState::Discovered => "discovered",
            PluginState::Loading => "loading",
            PluginState::Loaded => "loaded",
            PluginState::Failed => "failed",
            PluginState::Unloaded => "unloaded",
        };
        write!(f, "{}", label)
    }
}

/// Named edges of the lifecycle graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateTransition {
    StartLoading,
    Complete,
    Fail,
    Unload,
    Retry,
    Rediscover,
    DirectLoad,
}

impl StateTransition {
    const ALL: [StateTransition; 7] = [
        StateTransition::StartLoading,
        StateTransition::Complete,
        StateTransition::Fail,
        StateTransition::Unload,
        StateTransition::Retry,
        StateTransition::Rediscover,
        StateTransition::DirectLoad,
    ];
}

impl fmt::Display for StateTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StateTransition::StartLoading => "start-loading",
            StateTransition::Complete => "complete",
            StateTransition::Fail => "fail",
            StateTransition::Unload => "unload",
            StateTransition::Retry => "retry",
            StateTransition::Rediscover => "rediscover",
            StateTransition::DirectLoad => "direct-load",
        };
        write!(f, "{}", label)
    }
}

/// The legal edge table. Everything not listed is rejected.
fn target(from: PluginState, transition: StateTransition) -> Option<PluginState> {
    use PluginState::*;
    use StateTransition::*;
    match (from, transition) {
        (Discovered, StartLoading) => Some(Loading),
        (Loading, Complete) => Some(Loaded),
        (Loading, Fail) => Some(Failed),
        (Loaded, Unload) => Some(Unloaded),
        (Failed, Retry) => Some(Loading),
        (Unloaded, Rediscover) => Some(Discovered),
        (Unloaded, DirectLoad) => Some(Loading),
        _ => None,
    }
}

/// Per-plugin finite-state lifecycle tracker.
///
/// Every successful transition emits exactly one `state.changed` event.
/// `Rediscover` on an unknown plugin creates it at `Discovered`; any other
/// transition on an unknown plugin is rejected.
pub struct PluginStateMachine {
    states: Mutex<HashMap<String, PluginState>>,
    bus: Arc<EventBus>,
}

impl PluginStateMachine {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
            bus,
        }
    }

    /// Current state of a plugin, if tracked.
    pub fn current(&self, name: &str) -> Option<PluginState> {
        self.states
            .lock()
            .expect("state machine lock poisoned")
            .get(name)
            .copied()
    }

    /// Whether `transition` would succeed for `name` right now.
    pub fn can_transition(&self, name: &str, transition: StateTransition) -> bool {
        let states = self.states.lock().expect("state machine lock poisoned");
        match states.get(name) {
            Some(state) => target(*state, transition).is_some(),
            None => transition == StateTransition::Rediscover,
        }
    }

    /// Apply a transition, emitting a `state.changed` event on success.
    pub fn transition(
        &self,
        name: &str,
        transition: StateTransition,
        context: Option<String>,
    ) -> bool {
        let outcome = {
            let mut states = self.states.lock().expect("state machine lock poisoned");
            match states.get(name).copied() {
                Some(from) => match target(from, transition) {
                    Some(to) => {
                        states.insert(name.to_string(), to);
                        Some((from, to))
                    }
                    None => None,
                },
                // Unknown plugins only come into existence via rediscovery.
                None if transition == StateTransition::Rediscover => {
                    states.insert(name.to_string(), PluginState::Discovered);
                    Some((PluginState::Unloaded, PluginState::Discovered))
                }
                None => None,
            }
        };

        match outcome {
            Some((from, to)) => {
                self.bus.publish(PluginEvent::StateChanged {
                    plugin: name.to_string(),
                    from,
                    to,
                    transition,
                    context,
                });
                true
            }
            None => {
                debug!(
                    "rejected transition {} for plugin '{}' (current: {:?})",
                    transition,
                    name,
                    self.current(name)
                );
                false
            }
        }
    }

    /// Transitions currently legal for `name`.
    pub fn valid_transitions(&self, name: &str) -> Vec<StateTransition> {
        let states = self.states.lock().expect("state machine lock poisoned");
        match states.get(name) {
            Some(state) => StateTransition::ALL
                .into_iter()
                .filter(|t| target(*state, *t).is_some())
                .collect(),
            None => vec![StateTransition::Rediscover],
        }
    }

    /// Forget a plugin entirely.
    pub fn reset(&self, name: &str) -> bool {
        self.states
            .lock()
            .expect("state machine lock poisoned")
            .remove(name)
            .is_some()
    }

    /// Names of all tracked plugins in the given state.
    pub fn plugins_in(&self, state: PluginState) -> Vec<String> {
        self.states
            .lock()
            .expect("state machine lock poisoned")
            .iter()
            .filter(|(_, s)| **s == state)
            .map(|(n, _)| n.clone())
            .collect()
    }
}
