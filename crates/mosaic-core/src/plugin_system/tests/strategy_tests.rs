#![cfg(test)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::event::EventBus;
use crate::plugin_system::breaker::CircuitBreakerRegistry;
use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::strategy::{
    LoadOrchestrator, LoadStrategy, OrchestratorConfig, DEFAULT_PLUGIN_TIMEOUT,
};

fn orchestrator() -> (LoadOrchestrator, Arc<CircuitBreakerRegistry>) {
    let bus = Arc::new(EventBus::new());
    let breakers = Arc::new(CircuitBreakerRegistry::new(Arc::clone(&bus)));
    (
        LoadOrchestrator::new(Arc::clone(&breakers), bus),
        breakers,
    )
}

fn batches(layout: &[&[&str]]) -> Vec<Vec<String>> {
    layout
        .iter()
        .map(|batch| batch.iter().map(|s| s.to_string()).collect())
        .collect()
}

fn config(strategy: LoadStrategy) -> OrchestratorConfig {
    OrchestratorConfig {
        strategy,
        plugin_timeout: DEFAULT_PLUGIN_TIMEOUT,
        critical: HashSet::new(),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn all_strategies_load_everything() {
    for strategy in [
        LoadStrategy::Sequential,
        LoadStrategy::Parallel,
        LoadStrategy::BoundedParallel(2),
        LoadStrategy::Auto,
    ] {
        let (orchestrator, _breakers) = orchestrator();
        let outcome = orchestrator
            .run(
                &batches(&[&["a", "b", "c"], &["d"]]),
                &config(strategy),
                &CancellationToken::new(),
                |_name| async { Ok(()) },
                |_name, _result| {},
            )
            .await;
        assert_eq!(outcome.results.len(), 4, "strategy {}", strategy);
        assert!(outcome.results.values().all(Result::is_ok));
        assert_eq!(outcome.sample.plugins_loaded, 4);
        assert!((outcome.sample.failure_rate - 0.0).abs() < f64::EPSILON);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn batch_barrier_is_observed() {
    let (orchestrator, _breakers) = orchestrator();
    let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);

    orchestrator
        .run(
            &batches(&[&["a1", "a2"], &["b1"]]),
            &config(LoadStrategy::Parallel),
            &CancellationToken::new(),
            move |name| {
                let log = Arc::clone(&sink);
                async move {
                    log.lock().unwrap().push(format!("start:{}", name));
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    log.lock().unwrap().push(format!("end:{}", name));
                    Ok(())
                }
            },
            |_name, _result| {},
        )
        .await;

    let entries = log.lock().unwrap().clone();
    let index = |needle: &str| entries.iter().position(|e| e == needle).unwrap();
    // Nothing from batch 1 starts before all of batch 0 ended.
    assert!(index("end:a1") < index("start:b1"));
    assert!(index("end:a2") < index("start:b1"));
}

#[tokio::test(flavor = "multi_thread")]
async fn timeout_becomes_load_timeout_failure() {
    let (orchestrator, _breakers) = orchestrator();
    let mut cfg = config(LoadStrategy::Sequential);
    cfg.plugin_timeout = Duration::from_millis(20);

    let outcome = orchestrator
        .run(
            &batches(&[&["slow"]]),
            &cfg,
            &CancellationToken::new(),
            |_name| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            },
            |_name, _result| {},
        )
        .await;

    assert!(matches!(
        outcome.results["slow"],
        Err(PluginSystemError::LoadTimeout { timeout_ms: 20, .. })
    ));
    assert_eq!(outcome.sample.plugins_loaded, 0);
    assert!((outcome.sample.failure_rate - 1.0).abs() < f64::EPSILON);
}

#[tokio::test(flavor = "multi_thread")]
async fn open_circuit_rejects_immediately() {
    let (orchestrator, breakers) = orchestrator();
    for _ in 0..5 {
        breakers.record_failure("flaky");
    }

    let outcome = orchestrator
        .run(
            &batches(&[&["flaky", "fine"]]),
            &config(LoadStrategy::Sequential),
            &CancellationToken::new(),
            |_name| async { Ok(()) },
            |_name, _result| {},
        )
        .await;

    assert!(matches!(
        outcome.results["flaky"],
        Err(PluginSystemError::CircuitOpen { .. })
    ));
    assert!(outcome.results["fine"].is_ok());
}

#[tokio::test(flavor = "multi_thread")]
async fn failures_feed_the_breaker() {
    let (orchestrator, breakers) = orchestrator();

    for _ in 0..5 {
        let outcome = orchestrator
            .run(
                &batches(&[&["always-bad"]]),
                &config(LoadStrategy::Sequential),
                &CancellationToken::new(),
                |name| async move {
                    Err(PluginSystemError::InstantiationFailed {
                        plugin: name,
                        message: "boom".to_string(),
                    })
                },
                |_name, _result| {},
            )
            .await;
        assert!(outcome.results["always-bad"].is_err());
    }

    // The sixth attempt never reaches the loader.
    let outcome = orchestrator
        .run(
            &batches(&[&["always-bad"]]),
            &config(LoadStrategy::Sequential),
            &CancellationToken::new(),
            |_name| async { panic!("must not be called while the circuit is open") },
            |_name, _result| {},
        )
        .await;
    assert!(matches!(
        outcome.results["always-bad"],
        Err(PluginSystemError::CircuitOpen { .. })
    ));
    let _ = breakers;
}

#[tokio::test(flavor = "multi_thread")]
async fn critical_failure_stops_later_batches() {
    let (orchestrator, _breakers) = orchestrator();
    let mut cfg = config(LoadStrategy::Sequential);
    cfg.critical.insert("core".to_string());

    let outcome = orchestrator
        .run(
            &batches(&[&["core"], &["api"]]),
            &cfg,
            &CancellationToken::new(),
            |name| async move {
                if name == "core" {
                    Err(PluginSystemError::InstantiationFailed {
                        plugin: name,
                        message: "boom".to_string(),
                    })
                } else {
                    Ok(())
                }
            },
            |_name, _result| {},
        )
        .await;

    assert!(outcome.results["core"].is_err());
    assert!(!outcome.results.contains_key("api"));
    assert_eq!(outcome.not_dispatched, vec!["api".to_string()]);
}

#[tokio::test(flavor = "multi_thread")]
async fn cancellation_stops_dispatching() {
    let (orchestrator, _breakers) = orchestrator();
    let cancel = CancellationToken::new();
    let cancel_after_first = cancel.clone();

    let outcome = orchestrator
        .run(
            &batches(&[&["first"], &["second"]]),
            &config(LoadStrategy::Sequential),
            &cancel,
            move |_name| {
                let cancel = cancel_after_first.clone();
                async move {
                    cancel.cancel();
                    Ok(())
                }
            },
            |_name, _result| {},
        )
        .await;

    assert!(outcome.results["first"].is_ok());
    assert_eq!(outcome.not_dispatched, vec!["second".to_string()]);
}

#[tokio::test(flavor = "multi_thread")]
async fn on_settled_fires_before_the_next_batch() {
    let (orchestrator, _breakers) = orchestrator();
    let settled: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&settled);
    let observed_at_b: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let observer = Arc::clone(&observed_at_b);
    let probe = Arc::clone(&settled);

    orchestrator
        .run(
            &batches(&[&["a"], &["b"]]),
            &config(LoadStrategy::Sequential),
            &CancellationToken::new(),
            move |name| {
                let probe = Arc::clone(&probe);
                let observer = Arc::clone(&observer);
                async move {
                    if name == "b" {
                        *observer.lock().unwrap() = probe.lock().unwrap().clone();
                    }
                    Ok(())
                }
            },
            move |name, _result| {
                sink.lock().unwrap().push(name.to_string());
            },
        )
        .await;

    // When b ran, a had already been reported settled.
    assert_eq!(*observed_at_b.lock().unwrap(), vec!["a".to_string()]);
}

#[test]
fn strategy_parsing() {
    assert_eq!("auto".parse::<LoadStrategy>().unwrap(), LoadStrategy::Auto);
    assert_eq!(
        "sequential".parse::<LoadStrategy>().unwrap(),
        LoadStrategy::Sequential
    );
    assert_eq!(
        "parallel".parse::<LoadStrategy>().unwrap(),
        LoadStrategy::Parallel
    );
    assert!(matches!(
        "bounded-parallel".parse::<LoadStrategy>().unwrap(),
        LoadStrategy::BoundedParallel(_)
    ));
    assert!("warp-speed".parse::<LoadStrategy>().is_err());
}
