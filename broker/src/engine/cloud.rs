//! Cloud evaluation adapter.
//!
//! Speaks the Lichess cloud-eval wire shape: one GET per analysis with the
//! FEN as a query parameter, a JSON body carrying depth and principal
//! variations back. Stateless per call, so `slots` for a cloud kind just
//! bounds concurrent outbound requests.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::debug;

use crate::error::{BrokerError, BrokerResult};
use crate::types::{AnalysisResult, EngineId, Evaluation, Position};

use super::{uci, AdapterFactory, AnalysisSnapshot, EngineAdapter};

#[derive(Debug, Deserialize)]
struct CloudEval {
    depth: u32,
    pvs: Vec<CloudPv>,
}

#[derive(Debug, Deserialize)]
struct CloudPv {
    moves: String,
    cp: Option<i32>,
    mate: Option<i32>,
}

/// Adapter over a cloud evaluation HTTP endpoint.
pub struct CloudAdapter {
    engine_id: EngineId,
    base_url: String,
    client: reqwest::Client,
    snapshot_tx: watch::Sender<Option<AnalysisSnapshot>>,
}

impl CloudAdapter {
    pub fn new(engine_id: EngineId, base_url: String) -> Self {
        let (snapshot_tx, _) = watch::channel(None);
        Self {
            engine_id,
            base_url,
            client: reqwest::Client::new(),
            snapshot_tx,
        }
    }

    fn crashed(&self, detail: String) -> BrokerError {
        BrokerError::EngineCrashed {
            engine: self.engine_id.clone(),
            detail,
        }
    }

    async fn fetch(&self, fen: &str) -> BrokerResult<CloudEval> {
        let response = self
            .client
            .get(&self.base_url)
            .query(&[("fen", fen), ("multiPv", "1")])
            .send()
            .await
            .map_err(|e| self.crashed(format!("request: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(self.crashed(format!("endpoint returned {status}")));
        }
        response
            .json::<CloudEval>()
            .await
            .map_err(|e| self.crashed(format!("malformed body: {e}")))
    }
}

#[async_trait]
impl EngineAdapter for CloudAdapter {
    fn engine_id(&self) -> &EngineId {
        &self.engine_id
    }

    async fn start(&mut self) -> BrokerResult<()> {
        // No handshake; the first analysis surfaces endpoint trouble.
        debug!(engine = %self.engine_id, url = %self.base_url, "cloud adapter ready");
        Ok(())
    }

    async fn analyze(
        &mut self,
        position: &Position,
        _depth: u32,
        _elo_limit: u32,
        time_budget: Duration,
    ) -> BrokerResult<AnalysisResult> {
        let started = std::time::Instant::now();
        let _ = self.snapshot_tx.send_replace(None);

        let eval = timeout(time_budget, self.fetch(position.fen()))
            .await
            .map_err(|_| BrokerError::EngineTimeout {
                engine: self.engine_id.clone(),
                budget_ms: time_budget.as_millis() as u64,
            })??;

        let pv = eval
            .pvs
            .first()
            .ok_or_else(|| self.crashed("no principal variation in response".to_string()))?;
        let moves: Vec<String> = pv.moves.split_whitespace().map(str::to_string).collect();
        let best_move = moves
            .first()
            .map(String::as_str)
            .and_then(uci::clean_move)
            .ok_or_else(|| self.crashed(format!("unusable move in '{}'", pv.moves)))?;
        let evaluation = match (pv.cp, pv.mate) {
            (_, Some(m)) => Evaluation::MateIn(m),
            (Some(cp), None) => Evaluation::Centipawns(cp),
            (None, None) => {
                return Err(self.crashed("pv carries neither cp nor mate".to_string()))
            }
        };

        let _ = self.snapshot_tx.send_replace(Some(AnalysisSnapshot {
            depth: eval.depth,
            evaluation,
            principal_variation: moves.clone(),
        }));

        Ok(AnalysisResult {
            best_move,
            evaluation,
            principal_variation: moves,
            engine_id: self.engine_id.clone(),
            depth_reached: eval.depth,
            elapsed: started.elapsed(),
        })
    }

    async fn probe(&mut self) -> BrokerResult<()> {
        // The client holds no connection state worth checking.
        Ok(())
    }

    fn snapshots(&self) -> watch::Receiver<Option<AnalysisSnapshot>> {
        self.snapshot_tx.subscribe()
    }

    async fn stop(&mut self) {}
}

/// Spawns [`CloudAdapter`]s sharing one endpoint URL.
pub struct CloudFactory {
    engine_id: EngineId,
    base_url: String,
}

impl CloudFactory {
    pub fn new(engine_id: EngineId, base_url: String) -> Self {
        Self {
            engine_id,
            base_url,
        }
    }
}

#[async_trait]
impl AdapterFactory for CloudFactory {
    fn engine_id(&self) -> &EngineId {
        &self.engine_id
    }

    async fn spawn(&self) -> BrokerResult<Box<dyn EngineAdapter>> {
        let mut adapter = CloudAdapter::new(self.engine_id.clone(), self.base_url.clone());
        adapter.start().await?;
        Ok(Box::new(adapter))
    }
}
