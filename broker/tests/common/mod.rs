//! Scripted engine backends shared by the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use engine_broker::config::{BrokerConfig, EngineBackend, EngineDef};
use engine_broker::engine::{AdapterFactory, AnalysisSnapshot, EngineAdapter};
use engine_broker::{AnalysisResult, BrokerError, BrokerResult, Evaluation, Position};

pub const STARTING_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// What a scripted engine does when asked to analyze.
#[derive(Clone)]
pub enum Script {
    /// Answer with a fixed move and centipawn score after `latency`.
    Move {
        best_move: &'static str,
        cp: i32,
        latency: Duration,
    },
    /// Crash on every analysis.
    Crash,
}

pub struct ScriptedFactory {
    id: String,
    script: Script,
    /// Total completed `analyze` calls across all instances.
    pub analyzed: Arc<AtomicUsize>,
    /// Concurrent `analyze` calls, with the high-water mark.
    in_flight: Arc<AtomicUsize>,
    pub peak_in_flight: Arc<AtomicUsize>,
}

impl ScriptedFactory {
    pub fn new(id: &str, script: Script) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            script,
            analyzed: Arc::new(AtomicUsize::new(0)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak_in_flight: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn instant(id: &str, best_move: &'static str, cp: i32) -> Arc<Self> {
        Self::new(
            id,
            Script::Move {
                best_move,
                cp,
                latency: Duration::from_millis(5),
            },
        )
    }
}

#[async_trait]
impl AdapterFactory for ScriptedFactory {
    fn engine_id(&self) -> &String {
        &self.id
    }

    async fn spawn(&self) -> BrokerResult<Box<dyn EngineAdapter>> {
        let (snapshot_tx, _) = watch::channel(None);
        Ok(Box::new(ScriptedAdapter {
            id: self.id.clone(),
            script: self.script.clone(),
            analyzed: Arc::clone(&self.analyzed),
            in_flight: Arc::clone(&self.in_flight),
            peak_in_flight: Arc::clone(&self.peak_in_flight),
            snapshot_tx,
        }))
    }
}

struct ScriptedAdapter {
    id: String,
    script: Script,
    analyzed: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: Arc<AtomicUsize>,
    snapshot_tx: watch::Sender<Option<AnalysisSnapshot>>,
}

#[async_trait]
impl EngineAdapter for ScriptedAdapter {
    fn engine_id(&self) -> &String {
        &self.id
    }

    async fn start(&mut self) -> BrokerResult<()> {
        Ok(())
    }

    async fn analyze(
        &mut self,
        _position: &Position,
        depth: u32,
        _elo_limit: u32,
        _time_budget: Duration,
    ) -> BrokerResult<AnalysisResult> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let outcome = match &self.script {
            Script::Move {
                best_move,
                cp,
                latency,
            } => {
                tokio::time::sleep(*latency).await;
                Ok(AnalysisResult {
                    best_move: best_move.to_string(),
                    evaluation: Evaluation::Centipawns(*cp),
                    principal_variation: vec![best_move.to_string()],
                    engine_id: self.id.clone(),
                    depth_reached: depth,
                    elapsed: *latency,
                })
            }
            Script::Crash => Err(BrokerError::EngineCrashed {
                engine: self.id.clone(),
                detail: "scripted crash".to_string(),
            }),
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.analyzed.fetch_add(1, Ordering::SeqCst);
        outcome
    }

    async fn probe(&mut self) -> BrokerResult<()> {
        Ok(())
    }

    fn snapshots(&self) -> watch::Receiver<Option<AnalysisSnapshot>> {
        self.snapshot_tx.subscribe()
    }

    async fn stop(&mut self) {}
}

/// An engine definition whose backend is never actually launched; the
/// scripted factory stands in for it.
pub fn def(id: &str, weight: f64, slots: usize) -> EngineDef {
    EngineDef {
        id: id.to_string(),
        backend: EngineBackend::Uci {
            command: "scripted".to_string(),
            args: Vec::new(),
        },
        weight,
        slots,
        strength: Some("scripted".to_string()),
    }
}

pub fn config_with(engines: Vec<EngineDef>) -> BrokerConfig {
    BrokerConfig {
        engines,
        ..BrokerConfig::default()
    }
}

pub fn position() -> Position {
    Position::parse(STARTING_FEN).unwrap()
}
