//! Deduplication behavior through the broker façade.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::{config_with, def, position, Script, ScriptedFactory};
use engine_broker::engine::AdapterFactory;
use engine_broker::{AnalysisRequest, Broker, EngineSelector};

fn request(depth: u32, selector: EngineSelector) -> AnalysisRequest {
    AnalysisRequest::new(position(), depth, Duration::from_millis(500), 3200, selector)
}

#[tokio::test]
async fn identical_concurrent_requests_share_one_engine_run() {
    let factory = ScriptedFactory::new(
        "stockfish",
        Script::Move {
            best_move: "e2e4",
            cp: 30,
            latency: Duration::from_millis(40),
        },
    );
    let factories: Vec<Arc<dyn AdapterFactory>> = vec![factory.clone()];
    let broker = Broker::with_factories(config_with(vec![def("stockfish", 0.8, 2)]), factories);

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..8 {
        let broker = broker.clone();
        tasks.spawn(async move {
            broker
                .best_move(request(15, EngineSelector::Engine("stockfish".to_string())))
                .await
                .unwrap()
        });
    }
    let mut outcomes = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        outcomes.push(joined.unwrap());
    }

    assert_eq!(factory.analyzed.load(Ordering::SeqCst), 1);
    assert!(outcomes.iter().all(|o| o.result.best_move == "e2e4"));
    // Every waiter got the same shared allocation, not a copy.
    assert!(outcomes.iter().all(|o| Arc::ptr_eq(o, &outcomes[0])));
}

#[tokio::test]
async fn different_parameters_compute_separately() {
    let factory = ScriptedFactory::instant("stockfish", "e2e4", 30);
    let factories: Vec<Arc<dyn AdapterFactory>> = vec![factory.clone()];
    let broker = Broker::with_factories(config_with(vec![def("stockfish", 0.8, 2)]), factories);

    for depth in [10, 15, 20] {
        broker
            .best_move(request(depth, EngineSelector::Engine("stockfish".to_string())))
            .await
            .unwrap();
    }
    assert_eq!(factory.analyzed.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn completed_results_come_from_cache() {
    let factory = ScriptedFactory::instant("stockfish", "e2e4", 30);
    let factories: Vec<Arc<dyn AdapterFactory>> = vec![factory.clone()];
    let broker = Broker::with_factories(config_with(vec![def("stockfish", 0.8, 2)]), factories);

    let selector = EngineSelector::Engine("stockfish".to_string());
    let first = broker.best_move(request(15, selector.clone())).await.unwrap();
    let second = broker.best_move(request(15, selector)).await.unwrap();

    assert_eq!(factory.analyzed.load(Ordering::SeqCst), 1);
    assert!(Arc::ptr_eq(&first, &second));
}

#[tokio::test]
async fn any_selector_routes_to_a_live_engine() {
    let factory = ScriptedFactory::instant("stockfish", "e2e4", 30);
    let factories: Vec<Arc<dyn AdapterFactory>> = vec![factory.clone()];
    let broker = Broker::with_factories(config_with(vec![def("stockfish", 0.8, 2)]), factories);

    let outcome = broker
        .best_move(request(15, EngineSelector::Any))
        .await
        .unwrap();
    assert_eq!(outcome.result.engine_id, "stockfish");
}

#[tokio::test]
async fn unknown_engine_is_rejected_before_any_work() {
    let factory = ScriptedFactory::instant("stockfish", "e2e4", 30);
    let factories: Vec<Arc<dyn AdapterFactory>> = vec![factory.clone()];
    let broker = Broker::with_factories(config_with(vec![def("stockfish", 0.8, 2)]), factories);

    let err = broker
        .best_move(request(15, EngineSelector::Engine("ghost".to_string())))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "engine_unavailable");
    assert_eq!(factory.analyzed.load(Ordering::SeqCst), 0);
}
