//! The broker façade: the one entry point request handlers talk to.
//!
//! Routes a request by its selector (single engine, least-loaded, or
//! ensemble), with every path funneled through the deduplicator so
//! identical concurrent requests cost one engine run. Holds the pool, the
//! aggregator, and the evaluation policy; owns startup and shutdown.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::BrokerConfig;
use crate::dedup::{Deduplicator, SharedOutcome};
use crate::engine::{factory_for, AdapterFactory};
use crate::ensemble::Aggregator;
use crate::error::{BrokerError, BrokerResult};
use crate::policy::EvalPolicy;
use crate::pool::{EnginePool, EngineStatus};
use crate::types::{
    AnalysisOutcome, AnalysisRequest, Color, EngineId, EngineSelector, Evaluation, Position,
};

/// Broker shared across request handlers.
pub type SharedBroker = Arc<Broker>;

/// Everything the `evaluate` operation reports about a position, already
/// normalized to the requested perspective.
#[derive(Debug, Clone)]
pub struct PositionAssessment {
    pub evaluation: Evaluation,
    pub winning_chances: f64,
    pub position_type: &'static str,
    pub best_move: String,
    pub classification: &'static str,
    pub accuracy: f64,
    pub engine_id: EngineId,
}

pub struct Broker {
    config: BrokerConfig,
    pool: Arc<EnginePool>,
    dedup: Deduplicator,
    aggregator: Aggregator,
    policy: EvalPolicy,
}

impl Broker {
    /// Build and start a broker from configuration, wiring the backend
    /// adapter factory for each configured engine kind.
    pub fn start(config: BrokerConfig) -> SharedBroker {
        let factories: Vec<Arc<dyn AdapterFactory>> =
            config.engines.iter().map(factory_for).collect();
        Self::with_factories(config, factories)
    }

    /// Start with caller-supplied factories. This is the seam tests use to
    /// substitute scripted engines.
    pub fn with_factories(
        config: BrokerConfig,
        factories: Vec<Arc<dyn AdapterFactory>>,
    ) -> SharedBroker {
        let pool = EnginePool::new(config.pool.clone(), &config.engines, factories);
        let weights: HashMap<EngineId, f64> = config
            .engine_ids()
            .into_iter()
            .map(|id| {
                let weight = config.weight_for(&id);
                (id, weight)
            })
            .collect();
        let aggregator = Aggregator::new(Arc::clone(&pool), weights, config.ensemble.clone());
        let dedup = Deduplicator::new(config.dedup.clone());
        let policy = EvalPolicy::new(config.policy.clone());
        info!(engines = ?config.engine_ids(), "broker started");
        Arc::new(Self {
            config,
            pool,
            dedup,
            aggregator,
            policy,
        })
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn policy(&self) -> &EvalPolicy {
        &self.policy
    }

    /// Resolve the best move for a request, collapsing duplicates.
    pub async fn best_move(&self, request: AnalysisRequest) -> BrokerResult<SharedOutcome> {
        let key = request.key();
        match request.selector.clone() {
            EngineSelector::Engine(id) => {
                if self.config.engine(&id).is_none() {
                    return Err(BrokerError::EngineUnavailable {
                        engine: id,
                        reason: "not a configured engine".to_string(),
                    });
                }
                let pool = Arc::clone(&self.pool);
                self.dedup
                    .submit(key, move || single_engine(pool, id, request))
                    .await
            }
            EngineSelector::Any => {
                let pool = Arc::clone(&self.pool);
                self.dedup
                    .submit(key, move || async move {
                        let id = pool.least_loaded().ok_or_else(|| {
                            BrokerError::EngineUnavailable {
                                engine: "any".to_string(),
                                reason: "no engine kind is available".to_string(),
                            }
                        })?;
                        single_engine(pool, id, request).await
                    })
                    .await
            }
            EngineSelector::Ensemble(engines) => {
                let aggregator = self.aggregator.clone();
                let pool = Arc::clone(&self.pool);
                let fallback = self.config.ensemble.default_engine.clone();
                self.dedup
                    .submit(key, move || async move {
                        match aggregator.aggregate(&request, &engines).await {
                            Err(BrokerError::NoConsensus) => {
                                let Some(id) = fallback else {
                                    return Err(BrokerError::NoConsensus);
                                };
                                warn!(engine = %id, "zero ensemble votes; falling back to default engine");
                                single_engine(pool, id, request).await
                            }
                            other => other,
                        }
                    })
                    .await
            }
        }
    }

    /// Assess a position from the given perspective: evaluation, winning
    /// chances, game phase, and a coarse quality read on the best line.
    pub async fn evaluate(
        &self,
        position: Position,
        perspective: Color,
    ) -> BrokerResult<PositionAssessment> {
        let side_to_move = position.side_to_move();
        let fullmove = position.fullmove_number();
        let request = AnalysisRequest::new(
            position,
            self.policy.config().eval_depth,
            Duration::from_millis(self.policy.config().eval_budget_ms),
            crate::config::FULL_STRENGTH_ELO,
            EngineSelector::Any,
        );
        let outcome = self.best_move(request).await?;

        let evaluation = outcome
            .result
            .evaluation
            .from_perspective(side_to_move, perspective);
        Ok(PositionAssessment {
            evaluation,
            winning_chances: self.policy.winning_chances(evaluation),
            position_type: EvalPolicy::position_type(fullmove),
            best_move: outcome.result.best_move.clone(),
            classification: self.policy.classify(evaluation),
            accuracy: self.policy.accuracy(evaluation),
            engine_id: outcome.result.engine_id.clone(),
        })
    }

    pub fn engine_status(&self) -> Vec<EngineStatus> {
        self.pool.status()
    }

    /// Engine kinds currently accepting work.
    pub fn engines_available(&self) -> Vec<EngineId> {
        self.pool
            .status()
            .into_iter()
            .filter(|s| s.available)
            .map(|s| s.engine)
            .collect()
    }

    pub fn inflight_count(&self) -> usize {
        self.dedup.inflight_count()
    }

    pub async fn shutdown(&self) {
        info!("broker shutting down");
        self.pool.shutdown().await;
    }
}

/// One engine, one lease, one analysis.
async fn single_engine(
    pool: Arc<EnginePool>,
    id: EngineId,
    request: AnalysisRequest,
) -> BrokerResult<AnalysisOutcome> {
    let wait = pool.acquire_timeout().min(request.time_budget.max(Duration::from_millis(100)));
    let mut lease = pool.acquire(&id, wait).await?;
    let result = lease
        .analyze(
            &request.position,
            request.depth,
            request.elo_limit,
            request.time_budget,
        )
        .await?;
    Ok(AnalysisOutcome::single(result))
}
