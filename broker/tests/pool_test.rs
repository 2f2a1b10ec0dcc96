//! Pool capacity behavior observed through the broker façade.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::{config_with, def, position, Script, ScriptedFactory};
use engine_broker::engine::AdapterFactory;
use engine_broker::{AnalysisRequest, Broker, EngineSelector};

fn request(depth: u32) -> AnalysisRequest {
    AnalysisRequest::new(
        position(),
        depth,
        Duration::from_millis(500),
        3200,
        EngineSelector::Engine("stockfish".to_string()),
    )
}

#[tokio::test]
async fn concurrency_never_exceeds_configured_slots() {
    let factory = ScriptedFactory::new(
        "stockfish",
        Script::Move {
            best_move: "e2e4",
            cp: 30,
            latency: Duration::from_millis(20),
        },
    );
    let factories: Vec<Arc<dyn AdapterFactory>> = vec![factory.clone()];
    let broker = Broker::with_factories(config_with(vec![def("stockfish", 0.8, 2)]), factories);

    // Distinct depths defeat deduplication so every request reaches the pool.
    let mut tasks = tokio::task::JoinSet::new();
    for depth in 1..=12 {
        let broker = broker.clone();
        tasks.spawn(async move { broker.best_move(request(depth)).await.unwrap() });
    }
    while let Some(joined) = tasks.join_next().await {
        joined.unwrap();
    }

    assert_eq!(factory.analyzed.load(Ordering::SeqCst), 12);
    assert!(factory.peak_in_flight.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn saturated_pool_rejects_with_pool_exhausted() {
    let factory = ScriptedFactory::new(
        "stockfish",
        Script::Move {
            best_move: "e2e4",
            cp: 30,
            latency: Duration::from_millis(400),
        },
    );
    let factories: Vec<Arc<dyn AdapterFactory>> = vec![factory];
    let mut config = config_with(vec![def("stockfish", 0.8, 1)]);
    config.pool.acquire_timeout_ms = 50;
    let broker = Broker::with_factories(config, factories);

    let holder = {
        let broker = broker.clone();
        tokio::spawn(async move { broker.best_move(request(1)).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = broker.best_move(request(2)).await.unwrap_err();
    assert_eq!(err.code(), "pool_exhausted");

    // The in-flight analysis is unaffected by the rejection.
    assert!(holder.await.unwrap().is_ok());
}

#[tokio::test]
async fn status_reflects_slots_and_idle_handles() {
    let factory = ScriptedFactory::instant("stockfish", "e2e4", 30);
    let factories: Vec<Arc<dyn AdapterFactory>> = vec![factory];
    let broker = Broker::with_factories(config_with(vec![def("stockfish", 0.8, 2)]), factories);

    broker.best_move(request(10)).await.unwrap();

    let status = broker.engine_status();
    assert_eq!(status.len(), 1);
    let stockfish = &status[0];
    assert_eq!(stockfish.engine, "stockfish");
    assert!(stockfish.available);
    assert!(!stockfish.degraded);
    assert_eq!(stockfish.slots, 2);
    assert_eq!(stockfish.idle, 1);
    assert_eq!(stockfish.busy, 0);
}
