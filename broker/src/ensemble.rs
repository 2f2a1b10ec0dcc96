//! Ensemble aggregation: fan out one request to several engine kinds,
//! collect weighted votes, pick a consensus move.
//!
//! Fan-out runs on a [`JoinSet`] with a hard wall-clock deadline. Votes
//! that land before the deadline count; tasks still running at the
//! deadline are detached rather than aborted, so a leased engine always
//! finishes its call and returns to the pool cleanly. One engine's crash
//! or timeout costs the ensemble that vote, nothing more.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

use crate::config::EnsembleConfig;
use crate::error::{BrokerError, BrokerResult};
use crate::pool::EnginePool;
use crate::types::{
    AnalysisOutcome, AnalysisRequest, AnalysisResult, EngineId, EnsembleVote,
};

struct Consensus {
    best_move: String,
    confidence: f64,
}

/// Weighted-vote aggregator over the engine pool.
#[derive(Clone)]
pub struct Aggregator {
    pool: Arc<EnginePool>,
    weights: Arc<HashMap<EngineId, f64>>,
    cfg: EnsembleConfig,
}

impl Aggregator {
    pub fn new(
        pool: Arc<EnginePool>,
        weights: HashMap<EngineId, f64>,
        cfg: EnsembleConfig,
    ) -> Self {
        Self {
            pool,
            weights: Arc::new(weights),
            cfg,
        }
    }

    fn weight_for(&self, engine: &str) -> f64 {
        self.weights.get(engine).copied().unwrap_or(0.5)
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.cfg.deadline_ms)
    }

    /// Run the ensemble for `request` over `engines` (empty set means
    /// every configured kind). Fails with `NoConsensus` when zero votes
    /// survive the deadline.
    pub async fn aggregate(
        &self,
        request: &AnalysisRequest,
        engines: &[EngineId],
    ) -> BrokerResult<AnalysisOutcome> {
        let candidates: Vec<EngineId> = if engines.is_empty() {
            self.pool.engine_ids()
        } else {
            engines.to_vec()
        };
        let live: Vec<EngineId> = candidates
            .into_iter()
            .filter(|id| {
                let degraded = self.pool.is_degraded(id);
                if degraded {
                    debug!(engine = %id, "skipping degraded engine for ensemble");
                }
                !degraded
            })
            .collect();
        if live.is_empty() {
            return Err(BrokerError::NoConsensus);
        }

        let deadline = Instant::now() + self.deadline();
        let mut tasks: JoinSet<Result<AnalysisResult, (EngineId, BrokerError)>> = JoinSet::new();
        for id in live {
            let pool = Arc::clone(&self.pool);
            let position = request.position.clone();
            let depth = request.depth;
            let elo_limit = request.elo_limit;
            let budget = request.time_budget;
            let wait = self
                .deadline()
                .min(pool.acquire_timeout());
            tasks.spawn(async move {
                let mut lease = pool
                    .acquire(&id, wait)
                    .await
                    .map_err(|e| (id.clone(), e))?;
                lease
                    .analyze(&position, depth, elo_limit, budget)
                    .await
                    .map_err(|e| (id, e))
            });
        }

        let mut collected: Vec<(EnsembleVote, AnalysisResult)> = Vec::new();
        while !tasks.is_empty() {
            match timeout_at(deadline, tasks.join_next()).await {
                Err(_) => {
                    // Deadline: let stragglers finish off to the side so
                    // their leases drain back into the pool.
                    warn!(
                        pending = tasks.len(),
                        "ensemble deadline reached; detaching slow engines"
                    );
                    tasks.detach_all();
                    break;
                }
                Ok(None) => break,
                Ok(Some(Ok(Ok(result)))) => {
                    let vote = EnsembleVote {
                        engine_id: result.engine_id.clone(),
                        best_move: result.best_move.clone(),
                        evaluation: result.evaluation,
                        weight: self.weight_for(&result.engine_id),
                    };
                    collected.push((vote, result));
                }
                Ok(Some(Ok(Err((engine, e))))) => {
                    warn!(engine = %engine, error = %e, "ensemble vote lost");
                }
                Ok(Some(Err(join_err))) => {
                    warn!(error = %join_err, "ensemble task panicked");
                }
            }
        }

        let votes: Vec<EnsembleVote> = collected.iter().map(|(v, _)| v.clone()).collect();
        let consensus = consensus(&votes).ok_or(BrokerError::NoConsensus)?;

        // The winning move's strongest backer speaks for the ensemble.
        let result = collected
            .iter()
            .filter(|(v, _)| v.best_move == consensus.best_move)
            .max_by(|(a, _), (b, _)| a.weight.total_cmp(&b.weight))
            .map(|(_, r)| r.clone())
            .ok_or(BrokerError::NoConsensus)?;

        debug!(
            best_move = %consensus.best_move,
            confidence = consensus.confidence,
            votes = votes.len(),
            "ensemble consensus"
        );
        Ok(AnalysisOutcome {
            result,
            votes,
            confidence: Some(consensus.confidence),
        })
    }
}

/// Weighted plurality over the votes. Ties break toward the move whose
/// own backers disagree least about the score, then alphabetically so the
/// outcome is deterministic.
fn consensus(votes: &[EnsembleVote]) -> Option<Consensus> {
    if votes.is_empty() {
        return None;
    }

    // move, weight sum, backer scores
    let mut tallies: Vec<(String, f64, Vec<f64>)> = Vec::new();
    for vote in votes {
        match tallies.iter_mut().find(|(m, ..)| m == &vote.best_move) {
            Some(tally) => {
                tally.1 += vote.weight;
                tally.2.push(vote.evaluation.as_score());
            }
            None => tallies.push((
                vote.best_move.clone(),
                vote.weight,
                vec![vote.evaluation.as_score()],
            )),
        }
    }
    tallies.sort_by(|a, b| {
        b.1.total_cmp(&a.1)
            .then_with(|| mean_abs_disagreement(&a.2).total_cmp(&mean_abs_disagreement(&b.2)))
            .then_with(|| a.0.cmp(&b.0))
    });

    let (best_move, winning_weight, _) = tallies.swap_remove(0);
    let raw = 100.0 * winning_weight / votes.len() as f64;
    let confidence = (raw.min(100.0) * 10.0).round() / 10.0;
    Some(Consensus {
        best_move,
        confidence,
    })
}

/// Mean absolute deviation of one move's backer scores around their mean.
/// Zero for a single backer.
fn mean_abs_disagreement(scores: &[f64]) -> f64 {
    let mean = scores.iter().sum::<f64>() / scores.len() as f64;
    scores.iter().map(|s| (s - mean).abs()).sum::<f64>() / scores.len() as f64
}
