//! Engine adapters: the uniform seam between the broker and whatever
//! actually computes chess analysis.
//!
//! An adapter owns exactly one underlying engine instance (a UCI
//! subprocess, a cloud endpoint client). The pool holds adapters behind
//! `Box<dyn EngineAdapter>`; nothing else may touch the underlying engine.

pub mod cloud;
pub mod process;
pub mod uci;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::config::{EngineBackend, EngineDef};
use crate::error::BrokerResult;
use crate::types::{AnalysisResult, EngineId, Evaluation, Position};

/// Incremental best-guess state published while an analysis runs, parsed
/// from engine progress output. Lets a caller cut an analysis short with
/// the latest line still in hand.
#[derive(Debug, Clone)]
pub struct AnalysisSnapshot {
    pub depth: u32,
    pub evaluation: Evaluation,
    pub principal_variation: Vec<String>,
}

impl AnalysisSnapshot {
    pub fn new() -> Self {
        Self {
            depth: 0,
            evaluation: Evaluation::Centipawns(0),
            principal_variation: Vec::new(),
        }
    }
}

impl Default for AnalysisSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

/// Uniform interface to one underlying analysis engine instance.
///
/// Centipawn scores are reported from the side to move; perspective
/// normalization is the broker's job.
#[async_trait]
pub trait EngineAdapter: Send + Sync {
    /// The engine kind this instance belongs to.
    fn engine_id(&self) -> &EngineId;

    /// Launch and handshake. Fails with `EngineUnavailable`.
    async fn start(&mut self) -> BrokerResult<()>;

    /// Run one analysis. Fails with `EngineTimeout` if no final result
    /// lands within `time_budget`, `EngineCrashed` on process exit or
    /// malformed output.
    async fn analyze(
        &mut self,
        position: &Position,
        depth: u32,
        elo_limit: u32,
        time_budget: Duration,
    ) -> BrokerResult<AnalysisResult>;

    /// Cheap liveness check for a handle that has sat idle. Fails with
    /// `EngineCrashed` if the underlying instance silently died.
    async fn probe(&mut self) -> BrokerResult<()>;

    /// Receiver for incremental snapshots published during `analyze`.
    fn snapshots(&self) -> watch::Receiver<Option<AnalysisSnapshot>>;

    /// Release resources. Idempotent.
    async fn stop(&mut self);
}

/// Creates fresh, started adapter instances: one per pool slot, plus
/// replacements after a fault.
#[async_trait]
pub trait AdapterFactory: Send + Sync {
    fn engine_id(&self) -> &EngineId;

    async fn spawn(&self) -> BrokerResult<Box<dyn EngineAdapter>>;
}

/// Build the factory matching an engine definition's backend.
pub fn factory_for(def: &EngineDef) -> Arc<dyn AdapterFactory> {
    match &def.backend {
        EngineBackend::Uci { command, args } => Arc::new(process::UciFactory::new(
            def.id.clone(),
            command.clone(),
            args.clone(),
        )),
        EngineBackend::Cloud { url } => {
            Arc::new(cloud::CloudFactory::new(def.id.clone(), url.clone()))
        }
    }
}
