use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{info, warn};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::event::{EventBus, PluginEvent};
use crate::plugin_system::breaker::CircuitBreakerRegistry;
use crate::plugin_system::error::PluginSystemError;

/// How plugins within a batch are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStrategy {
    /// Bounded-parallel with N = min(8, batch size).
    Auto,
    /// One plugin at a time, in declaration order.
    Sequential,
    /// Every plugin of a batch concurrently.
    Parallel,
    /// Up to N concurrent loads per batch.
    BoundedParallel(usize),
}

/// Concurrency ceiling applied by the `Auto` strategy.
pub const AUTO_CONCURRENCY_CAP: usize = 8;

impl LoadStrategy {
    fn concurrency_for(&self, batch_len: usize) -> usize {
        match self {
            LoadStrategy::Sequential => 1,
            LoadStrategy::Parallel => batch_len.max(1),
            LoadStrategy::BoundedParallel(n) => (*n).max(1),
            LoadStrategy::Auto => AUTO_CONCURRENCY_CAP.min(batch_len.max(1)),
        }
    }
}

impl fmt::Display for LoadStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadStrategy::Auto => write!(f, "auto"),
            LoadStrategy::Sequential => write!(f, "sequential"),
            LoadStrategy::Parallel => write!(f, "parallel"),
            LoadStrategy::BoundedParallel(n) => write!(f, "bounded-parallel({})", n),
        }
    }
}

impl FromStr for LoadStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(LoadStrategy::Auto),
            "sequential" => Ok(LoadStrategy::Sequential),
            "parallel" => Ok(LoadStrategy::Parallel),
            "bounded-parallel" => Ok(LoadStrategy::BoundedParallel(AUTO_CONCURRENCY_CAP)),
            other => Err(format!("unknown loading strategy '{}'", other)),
        }
    }
}

/// One performance sample per orchestrator run.
#[derive(Debug, Clone, Default)]
pub struct PerformanceSample {
    pub total_load_time_ms: u64,
    pub plugins_attempted: usize,
    pub plugins_loaded: usize,
    pub concurrency_level: usize,
    pub failure_rate: f64,
}

/// Orchestrator settings.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub strategy: LoadStrategy,
    /// Per-plugin wall-clock budget; overruns become `LoadTimeout`.
    pub plugin_timeout: Duration,
    /// Plugins whose failure aborts the rest of the run.
    pub critical: HashSet<String>,
}

pub const DEFAULT_PLUGIN_TIMEOUT: Duration = Duration::from_secs(30);

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            strategy: LoadStrategy::Auto,
            plugin_timeout: DEFAULT_PLUGIN_TIMEOUT,
            critical: HashSet::new(),
        }
    }
}

/// Result of an orchestrator run: one terminal outcome per dispatched
/// plugin, plus the plugins never dispatched because the run aborted.
#[derive(Debug)]
pub struct OrchestrationOutcome {
    pub results: HashMap<String, Result<(), PluginSystemError>>,
    /// Plugins skipped after a critical failure or cancellation.
    pub not_dispatched: Vec<String>,
    pub sample: PerformanceSample,
}

/// Executes a batched load plan under one of the scheduling strategies.
///
/// Batch k does not begin until every plugin of batches 0..k has reached a
/// terminal outcome. Each plugin load is wrapped by its circuit breaker and
/// the per-plugin timeout; all strategies emit identical events and differ
/// only in scheduling.
pub struct LoadOrchestrator {
    breakers: Arc<CircuitBreakerRegistry>,
    bus: Arc<EventBus>,
}

impl LoadOrchestrator {
    pub fn new(breakers: Arc<CircuitBreakerRegistry>, bus: Arc<EventBus>) -> Self {
        Self { breakers, bus }
    }

    /// Run `load_one` for every plugin of every batch.
    ///
    /// Cancellation stops dispatching new plugins; in-flight loads observe
    /// the token themselves and terminate on their own. `on_settled` fires
    /// for each plugin as its batch completes, before the next batch starts;
    /// the batch barrier makes it safe for dependency bookkeeping.
    pub async fn run<F, Fut, S>(
        &self,
        batches: &[Vec<String>],
        config: &OrchestratorConfig,
        cancel: &CancellationToken,
        load_one: F,
        on_settled: S,
    ) -> OrchestrationOutcome
    where
        F: Fn(String) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = Result<(), PluginSystemError>> + Send + 'static,
        S: Fn(&str, &Result<(), PluginSystemError>) + Send + Sync,
    {
        let started = Instant::now();
        let total: usize = batches.iter().map(Vec::len).sum();
        let mut results: HashMap<String, Result<(), PluginSystemError>> = HashMap::new();
        let mut not_dispatched: Vec<String> = Vec::new();
        let mut aborted = false;
        let mut max_concurrency = 0usize;
        let mut completed = 0usize;

        for batch in batches {
            if aborted || cancel.is_cancelled() {
                not_dispatched.extend(batch.iter().cloned());
                continue;
            }
            let concurrency = config.strategy.concurrency_for(batch.len());
            max_concurrency = max_concurrency.max(concurrency);

            let batch_results = match config.strategy {
                LoadStrategy::Sequential => {
                    self.run_sequential(batch, config, cancel, &load_one).await
                }
                _ => {
                    self.run_concurrent(batch, concurrency, config, cancel, &load_one)
                        .await
                }
            };

            for (name, result) in batch_results {
                completed += 1;
                self.bus.publish(PluginEvent::LoadingProgress {
                    plugin: name.clone(),
                    completed,
                    total,
                });
                on_settled(&name, &result);
                if result.is_err() && config.critical.contains(&name) {
                    warn!("critical plugin '{}' failed; aborting load", name);
                    aborted = true;
                }
                results.insert(name, result);
            }
        }

        let loaded = results.values().filter(|r| r.is_ok()).count();
        let attempted = results.len();
        let sample = PerformanceSample {
            total_load_time_ms: started.elapsed().as_millis() as u64,
            plugins_attempted: attempted,
            plugins_loaded: loaded,
            concurrency_level: max_concurrency,
            failure_rate: if attempted == 0 {
                0.0
            } else {
                (attempted - loaded) as f64 / attempted as f64
            },
        };
        self.bus.publish(PluginEvent::Performance {
            total_load_time_ms: sample.total_load_time_ms,
            plugins_attempted: sample.plugins_attempted,
            plugins_loaded: sample.plugins_loaded,
            concurrency_level: sample.concurrency_level,
            failure_rate: sample.failure_rate,
        });
        info!(
            "load run finished: {}/{} loaded in {} ms (concurrency {})",
            sample.plugins_loaded,
            sample.plugins_attempted,
            sample.total_load_time_ms,
            sample.concurrency_level
        );

        OrchestrationOutcome {
            results,
            not_dispatched,
            sample,
        }
    }

    async fn run_sequential<F, Fut>(
        &self,
        batch: &[String],
        config: &OrchestratorConfig,
        cancel: &CancellationToken,
        load_one: &F,
    ) -> Vec<(String, Result<(), PluginSystemError>)>
    where
        F: Fn(String) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = Result<(), PluginSystemError>> + Send + 'static,
    {
        let mut results = Vec::with_capacity(batch.len());
        for name in batch {
            if cancel.is_cancelled() {
                results.push((
                    name.clone(),
                    Err(PluginSystemError::Cancelled {
                        plugin: name.clone(),
                    }),
                ));
                continue;
            }
            let result = self
                .dispatch_one(name.clone(), config.plugin_timeout, load_one.clone())
                .await;
            results.push((name.clone(), result));
        }
        results
    }

    async fn run_concurrent<F, Fut>(
        &self,
        batch: &[String],
        concurrency: usize,
        config: &OrchestratorConfig,
        cancel: &CancellationToken,
        load_one: &F,
    ) -> Vec<(String, Result<(), PluginSystemError>)>
    where
        F: Fn(String) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = Result<(), PluginSystemError>> + Send + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut join_set: JoinSet<(String, Result<(), PluginSystemError>)> = JoinSet::new();

        for name in batch {
            if cancel.is_cancelled() {
                join_set.spawn({
                    let name = name.clone();
                    async move {
                        let err = PluginSystemError::Cancelled {
                            plugin: name.clone(),
                        };
                        (name, Err(err))
                    }
                });
                continue;
            }
            let permit_source = Arc::clone(&semaphore);
            let timeout = config.plugin_timeout;
            let loader = load_one.clone();
            let breakers = Arc::clone(&self.breakers);
            let name = name.clone();
            join_set.spawn(async move {
                let _permit = permit_source
                    .acquire()
                    .await
                    .expect("orchestrator semaphore closed");
                let result = Self::guarded_load(&breakers, name.clone(), timeout, loader).await;
                (name, result)
            });
        }

        let mut results = Vec::with_capacity(batch.len());
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(entry) => results.push(entry),
                Err(e) => warn!("load task panicked or was aborted: {}", e),
            }
        }
        // Deterministic reporting order regardless of completion order.
        results.sort_by(|a, b| a.0.cmp(&b.0));
        results
    }

    async fn dispatch_one<F, Fut>(
        &self,
        name: String,
        timeout: Duration,
        load_one: F,
    ) -> Result<(), PluginSystemError>
    where
        F: Fn(String) -> Fut + Send,
        Fut: Future<Output = Result<(), PluginSystemError>> + Send,
    {
        Self::guarded_load(&self.breakers, name, timeout, load_one).await
    }

    /// Wrap one plugin load with its circuit breaker and timeout.
    async fn guarded_load<F, Fut>(
        breakers: &CircuitBreakerRegistry,
        name: String,
        timeout: Duration,
        load_one: F,
    ) -> Result<(), PluginSystemError>
    where
        F: Fn(String) -> Fut + Send,
        Fut: Future<Output = Result<(), PluginSystemError>> + Send,
    {
        breakers.try_acquire(&name)?;

        let result = match tokio::time::timeout(timeout, load_one(name.clone())).await {
            Ok(result) => result,
            Err(_) => Err(PluginSystemError::LoadTimeout {
                plugin: name.clone(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        };

        match &result {
            Ok(()) => breakers.record_success(&name),
            Err(_) => breakers.record_failure(&name),
        }
        result
    }
}
