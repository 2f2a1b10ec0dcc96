//! UCI subprocess adapter.
//!
//! Owns one engine process end to end: spawn, handshake, per-analysis
//! command stream, and teardown. Progress (`info`) lines are folded into a
//! watch channel of [`AnalysisSnapshot`]s while a search runs; when the
//! time budget expires the adapter sends `stop` and accepts the engine's
//! final `bestmove` within a short grace window before declaring a
//! timeout.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::watch;
use tokio::time::timeout_at;
use tracing::{debug, warn};

use crate::config::FULL_STRENGTH_ELO;
use crate::error::{BrokerError, BrokerResult};
use crate::types::{AnalysisResult, EngineId, Position};

use super::{uci, AdapterFactory, AnalysisSnapshot, EngineAdapter};

/// Budget for the `uci`/`isready` handshake at startup.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
/// Extra time the engine gets past `movetime` before we send `stop`.
const SEARCH_SLACK: Duration = Duration::from_millis(150);
/// How long after `stop` we still accept a `bestmove`.
const STOP_GRACE: Duration = Duration::from_millis(500);
/// Budget for an idle-handle liveness probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

enum LineEvent {
    Line(String),
    Deadline,
}

/// Adapter over a UCI-speaking subprocess.
pub struct UciAdapter {
    engine_id: EngineId,
    command: String,
    args: Vec<String>,
    child: Option<Child>,
    stdin: Option<BufWriter<ChildStdin>>,
    lines: Option<Lines<BufReader<ChildStdout>>>,
    snapshot_tx: watch::Sender<Option<AnalysisSnapshot>>,
}

impl UciAdapter {
    pub fn new(engine_id: EngineId, command: String, args: Vec<String>) -> Self {
        let (snapshot_tx, _) = watch::channel(None);
        Self {
            engine_id,
            command,
            args,
            child: None,
            stdin: None,
            lines: None,
            snapshot_tx,
        }
    }

    async fn send(&mut self, command: &str) -> BrokerResult<()> {
        let engine = self.engine_id.clone();
        let stdin = self.stdin.as_mut().ok_or_else(|| BrokerError::EngineCrashed {
            engine: engine.clone(),
            detail: "stdin closed".to_string(),
        })?;
        let write = async {
            stdin.write_all(command.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
            stdin.flush().await
        };
        write.await.map_err(|e| BrokerError::EngineCrashed {
            engine,
            detail: format!("write '{command}': {e}"),
        })
    }

    async fn next_line(&mut self, deadline: tokio::time::Instant) -> BrokerResult<LineEvent> {
        let engine = self.engine_id.clone();
        let lines = self.lines.as_mut().ok_or_else(|| BrokerError::EngineCrashed {
            engine: engine.clone(),
            detail: "stdout closed".to_string(),
        })?;
        match timeout_at(deadline, lines.next_line()).await {
            Err(_) => Ok(LineEvent::Deadline),
            Ok(Ok(Some(line))) => Ok(LineEvent::Line(line)),
            Ok(Ok(None)) => Err(BrokerError::EngineCrashed {
                engine,
                detail: "process closed stdout".to_string(),
            }),
            Ok(Err(e)) => Err(BrokerError::EngineCrashed {
                engine,
                detail: format!("read: {e}"),
            }),
        }
    }

    /// Read lines until `marker`, bounded by `within`.
    async fn expect_line(&mut self, marker: &str, within: Duration) -> BrokerResult<()> {
        let deadline = tokio::time::Instant::now() + within;
        loop {
            match self.next_line(deadline).await? {
                LineEvent::Line(line) if line.trim() == marker => return Ok(()),
                LineEvent::Line(_) => continue,
                LineEvent::Deadline => {
                    return Err(BrokerError::EngineCrashed {
                        engine: self.engine_id.clone(),
                        detail: format!("no '{marker}' within {}ms", within.as_millis()),
                    })
                }
            }
        }
    }

    fn publish(&self, info: uci::InfoLine) {
        let mut snapshot = self
            .snapshot_tx
            .borrow()
            .clone()
            .unwrap_or_default();
        if let Some(depth) = info.depth {
            snapshot.depth = depth;
        }
        if let Some(eval) = info.evaluation {
            snapshot.evaluation = eval;
        }
        if !info.pv.is_empty() {
            snapshot.principal_variation = info.pv;
        }
        let _ = self.snapshot_tx.send_replace(Some(snapshot));
    }

    fn final_result(&self, best_move: String, started: std::time::Instant) -> AnalysisResult {
        let snapshot = self
            .snapshot_tx
            .borrow()
            .clone()
            .unwrap_or_default();
        let principal_variation = if snapshot.principal_variation.is_empty() {
            vec![best_move.clone()]
        } else {
            snapshot.principal_variation
        };
        AnalysisResult {
            best_move,
            evaluation: snapshot.evaluation,
            principal_variation,
            engine_id: self.engine_id.clone(),
            depth_reached: snapshot.depth,
            elapsed: started.elapsed(),
        }
    }
}

#[async_trait]
impl EngineAdapter for UciAdapter {
    fn engine_id(&self) -> &EngineId {
        &self.engine_id
    }

    async fn start(&mut self) -> BrokerResult<()> {
        let engine = self.engine_id.clone();
        let unavailable = |reason: String| BrokerError::EngineUnavailable {
            engine: engine.clone(),
            reason,
        };

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| unavailable(format!("spawn '{}': {e}", self.command)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| unavailable("no stdin pipe".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| unavailable("no stdout pipe".to_string()))?;
        self.stdin = Some(BufWriter::new(stdin));
        self.lines = Some(BufReader::new(stdout).lines());
        self.child = Some(child);

        let handshake = async {
            self.send("uci").await?;
            self.expect_line("uciok", HANDSHAKE_TIMEOUT).await?;
            self.send("isready").await?;
            self.expect_line("readyok", HANDSHAKE_TIMEOUT).await
        };
        if let Err(e) = handshake.await {
            self.stop().await;
            return Err(BrokerError::EngineUnavailable {
                engine: self.engine_id.clone(),
                reason: format!("handshake failed: {e}"),
            });
        }

        debug!(engine = %self.engine_id, command = %self.command, "UCI engine started");
        Ok(())
    }

    async fn analyze(
        &mut self,
        position: &Position,
        depth: u32,
        elo_limit: u32,
        time_budget: Duration,
    ) -> BrokerResult<AnalysisResult> {
        let started = std::time::Instant::now();
        let engine = self.engine_id.clone();
        let _ = self.snapshot_tx.send_replace(None);

        for command in uci::elo_limit_commands(elo_limit, FULL_STRENGTH_ELO) {
            self.send(&command).await?;
        }
        self.send(&format!("position fen {}", position.fen())).await?;
        self.send(&format!(
            "go depth {} movetime {}",
            depth,
            time_budget.as_millis()
        ))
        .await?;

        let mut stopped = false;
        let mut deadline = tokio::time::Instant::now() + time_budget + SEARCH_SLACK;
        loop {
            match self.next_line(deadline).await? {
                LineEvent::Line(line) => {
                    if let Some(best_move) = uci::parse_bestmove(&line) {
                        return Ok(self.final_result(best_move, started));
                    }
                    if line.starts_with("bestmove") {
                        return Err(BrokerError::EngineCrashed {
                            engine,
                            detail: format!("unusable bestmove line '{line}'"),
                        });
                    }
                    if let Some(info) = uci::parse_info_line(&line) {
                        self.publish(info);
                    }
                }
                LineEvent::Deadline if !stopped => {
                    // Engine overran movetime; ask it to wrap up.
                    stopped = true;
                    self.send("stop").await?;
                    deadline = tokio::time::Instant::now() + STOP_GRACE;
                }
                LineEvent::Deadline => {
                    warn!(engine = %engine, "engine ignored stop; declaring timeout");
                    return Err(BrokerError::EngineTimeout {
                        engine,
                        budget_ms: time_budget.as_millis() as u64,
                    });
                }
            }
        }
    }

    async fn probe(&mut self) -> BrokerResult<()> {
        let engine = self.engine_id.clone();
        if let Some(child) = self.child.as_mut() {
            if let Ok(Some(status)) = child.try_wait() {
                return Err(BrokerError::EngineCrashed {
                    engine,
                    detail: format!("process exited with {status}"),
                });
            }
        }
        self.send("isready").await?;
        self.expect_line("readyok", PROBE_TIMEOUT).await
    }

    fn snapshots(&self) -> watch::Receiver<Option<AnalysisSnapshot>> {
        self.snapshot_tx.subscribe()
    }

    async fn stop(&mut self) {
        if let Some(mut stdin) = self.stdin.take() {
            let _ = stdin.write_all(b"quit\n").await;
            let _ = stdin.flush().await;
        }
        self.lines = None;
        if let Some(mut child) = self.child.take() {
            if tokio::time::timeout(Duration::from_secs(1), child.wait())
                .await
                .is_err()
            {
                let _ = child.kill().await;
            }
            debug!(engine = %self.engine_id, "UCI engine stopped");
        }
    }
}

/// Spawns [`UciAdapter`]s for pool slots and respawns.
pub struct UciFactory {
    engine_id: EngineId,
    command: String,
    args: Vec<String>,
}

impl UciFactory {
    pub fn new(engine_id: EngineId, command: String, args: Vec<String>) -> Self {
        Self {
            engine_id,
            command,
            args,
        }
    }
}

#[async_trait]
impl AdapterFactory for UciFactory {
    fn engine_id(&self) -> &EngineId {
        &self.engine_id
    }

    async fn spawn(&self) -> BrokerResult<Box<dyn EngineAdapter>> {
        let mut adapter = UciAdapter::new(
            self.engine_id.clone(),
            self.command.clone(),
            self.args.clone(),
        );
        adapter.start().await?;
        Ok(Box::new(adapter))
    }
}
