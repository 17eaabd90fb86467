use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{info, warn};

use crate::event::{EventBus, PluginEvent};
use crate::plugin_system::error::PluginSystemError;

/// Failure-isolation states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation.
    Closed,
    /// Too many consecutive failures; operations rejected.
    Open,
    /// Reset timer elapsed; one trial operation allowed.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        };
        write!(f, "{}", label)
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    opened_at: Option<Instant>,
    /// Whether the single half-open trial has been handed out.
    trial_taken: bool,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            opened_at: None,
            trial_taken: false,
        }
    }
}

/// Per-plugin breaker metrics.
#[derive(Debug, Clone)]
pub struct BreakerSnapshot {
    pub plugin: String,
    pub state: CircuitState,
    pub failure_count: u32,
}

/// Per-plugin circuit breakers guarding plugin loads.
///
/// `Closed` trips to `Open` after `failure_threshold` consecutive failures;
/// `Open` admits a single `HalfOpen` trial once `reset_timeout` elapses.
/// Success closes the circuit, failure re-opens it and restarts the timer.
pub struct CircuitBreakerRegistry {
    breakers: Mutex<HashMap<String, BreakerState>>,
    failure_threshold: u32,
    reset_timeout: Duration,
    bus: Arc<EventBus>,
}

pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
pub const DEFAULT_RESET_TIMEOUT: Duration = Duration::from_secs(60);

impl CircuitBreakerRegistry {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self::with_settings(bus, DEFAULT_FAILURE_THRESHOLD, DEFAULT_RESET_TIMEOUT)
    }

    pub fn with_settings(
        bus: Arc<EventBus>,
        failure_threshold: u32,
        reset_timeout: Duration,
    ) -> Self {
        Self {
            breakers: Mutex::new(HashMap::new()),
            failure_threshold,
            reset_timeout,
            bus,
        }
    }

    /// Ask permission to run an operation for `plugin`. While the circuit is
    /// open this fails immediately with `CircuitOpen`.
    pub fn try_acquire(&self, plugin: &str) -> Result<(), PluginSystemError> {
        let transitioned = {
            let mut breakers = self.breakers.lock().expect("breaker lock poisoned");
            let entry = breakers
                .entry(plugin.to_string())
                .or_insert_with(BreakerState::new);

            match entry.state {
                CircuitState::Closed => return Ok(()),
                CircuitState::Open => {
                    let elapsed = entry
                        .opened_at
                        .map(|at| at.elapsed())
                        .unwrap_or(Duration::ZERO);
                    if elapsed < self.reset_timeout {
                        return Err(PluginSystemError::CircuitOpen {
                            plugin: plugin.to_string(),
                        });
                    }
                    entry.state = CircuitState::HalfOpen;
                    entry.trial_taken = true;
                    true
                }
                CircuitState::HalfOpen => {
                    if entry.trial_taken {
                        return Err(PluginSystemError::CircuitOpen {
                            plugin: plugin.to_string(),
                        });
                    }
                    entry.trial_taken = true;
                    false
                }
            }
        };

        if transitioned {
            info!("circuit for '{}' transitioning to half-open", plugin);
            self.publish_state(plugin, CircuitState::HalfOpen);
        }
        Ok(())
    }

    /// Record a successful operation.
    pub fn record_success(&self, plugin: &str) {
        let closed = {
            let mut breakers = self.breakers.lock().expect("breaker lock poisoned");
            let entry = breakers
                .entry(plugin.to_string())
                .or_insert_with(BreakerState::new);
            match entry.state {
                CircuitState::HalfOpen => {
                    *entry = BreakerState::new();
                    true
                }
                CircuitState::Closed => {
                    entry.failure_count = 0;
                    false
                }
                CircuitState::Open => false,
            }
        };
        if closed {
            info!("circuit for '{}' closed after successful trial", plugin);
            self.publish_state(plugin, CircuitState::Closed);
        }
    }

    /// Record a failed operation.
    pub fn record_failure(&self, plugin: &str) {
        let opened = {
            let mut breakers = self.breakers.lock().expect("breaker lock poisoned");
            let entry = breakers
                .entry(plugin.to_string())
                .or_insert_with(BreakerState::new);
            match entry.state {
                CircuitState::HalfOpen => {
                    entry.state = CircuitState::Open;
                    entry.opened_at = Some(Instant::now());
                    entry.trial_taken = false;
                    true
                }
                CircuitState::Closed => {
                    entry.failure_count += 1;
                    if entry.failure_count >= self.failure_threshold {
                        entry.state = CircuitState::Open;
                        entry.opened_at = Some(Instant::now());
                        true
                    } else {
                        false
                    }
                }
                CircuitState::Open => false,
            }
        };
        if opened {
            warn!("circuit for '{}' opened", plugin);
            self.publish_state(plugin, CircuitState::Open);
        }
    }

    /// Current state, `Closed` for unknown plugins.
    pub fn state(&self, plugin: &str) -> CircuitState {
        self.breakers
            .lock()
            .expect("breaker lock poisoned")
            .get(plugin)
            .map(|b| b.state)
            .unwrap_or(CircuitState::Closed)
    }

    /// Force a breaker back to closed.
    pub fn reset(&self, plugin: &str) {
        self.breakers
            .lock()
            .expect("breaker lock poisoned")
            .insert(plugin.to_string(), BreakerState::new());
    }

    pub fn snapshot(&self) -> Vec<BreakerSnapshot> {
        let mut all: Vec<BreakerSnapshot> = self
            .breakers
            .lock()
            .expect("breaker lock poisoned")
            .iter()
            .map(|(plugin, b)| BreakerSnapshot {
                plugin: plugin.clone(),
                state: b.state,
                failure_count: b.failure_count,
            })
            .collect();
        all.sort_by(|a, b| a.plugin.cmp(&b.plugin));
        all
    }

    fn publish_state(&self, plugin: &str, state: CircuitState) {
        self.bus.publish(PluginEvent::CircuitBreaker {
            plugin: plugin.to_string(),
            state: state.to_string(),
        });
    }
}
