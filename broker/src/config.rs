//! Broker configuration.
//!
//! Deserializable from TOML; every section has an env-aware `Default` so
//! the binary runs against a local Stockfish with no config file at all.

use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use crate::types::EngineId;

/// Elo at or above which an engine runs uncapped.
pub const FULL_STRENGTH_ELO: u32 = 3200;

fn default_weight() -> f64 {
    0.5
}

fn default_slots() -> usize {
    2
}

/// What actually answers analysis requests for an engine kind.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineBackend {
    /// A UCI-speaking subprocess.
    Uci {
        command: String,
        #[serde(default)]
        args: Vec<String>,
    },
    /// A Lichess-style cloud-eval HTTP endpoint.
    Cloud { url: String },
}

/// One configured engine kind.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineDef {
    pub id: EngineId,
    pub backend: EngineBackend,
    /// Ensemble trust weight in [0, 1].
    #[serde(default = "default_weight")]
    pub weight: f64,
    /// Pool capacity for this kind.
    #[serde(default = "default_slots")]
    pub slots: usize,
    /// Human-readable strength label for status reports.
    #[serde(default)]
    pub strength: Option<String>,
}

/// Engine pool tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Default cap on how long an acquire may block; a caller's own time
    /// budget lowers this further.
    pub acquire_timeout_ms: u64,
    /// Idle handles older than this are probed before reuse.
    pub probe_after_secs: u64,
    /// Respawn attempts after a fault before the kind is marked degraded.
    pub max_respawns: u32,
    /// First respawn delay; doubles per attempt.
    pub respawn_backoff_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            acquire_timeout_ms: 5_000,
            probe_after_secs: 60,
            max_respawns: 3,
            respawn_backoff_ms: 250,
        }
    }
}

/// Deduplicator and result-cache tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// How long a completed in-flight entry lingers to catch
    /// near-simultaneous duplicate arrivals.
    pub inflight_grace_ms: u64,
    /// Bounded LRU capacity for completed results.
    pub cache_capacity: usize,
    /// Result cache time-to-live.
    pub cache_ttl_secs: u64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            inflight_grace_ms: 250,
            cache_capacity: 256,
            cache_ttl_secs: 300,
        }
    }
}

/// Ensemble aggregation tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EnsembleConfig {
    /// Hard cutoff for collecting votes.
    pub deadline_ms: u64,
    /// Fallback engine consulted when aggregation yields zero votes.
    pub default_engine: Option<EngineId>,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            deadline_ms: 8_000,
            default_engine: Some("stockfish".to_string()),
        }
    }
}

/// Evaluation policy knobs. The winning-chances mapping and the
/// classification thresholds are policy, not law.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Winning-percentage points per centipawn around the 50% midpoint.
    pub win_slope: f64,
    /// |cp| below this is a balanced position.
    pub balanced_below_cp: i32,
    /// |cp| below this is a slight edge.
    pub edge_below_cp: i32,
    /// |cp| below this is winning; above is decisive.
    pub winning_below_cp: i32,
    /// Search depth used by the `evaluate` operation.
    pub eval_depth: u32,
    /// Time budget used by the `evaluate` operation.
    pub eval_budget_ms: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            win_slope: 0.1,
            balanced_below_cp: 50,
            edge_below_cp: 150,
            winning_below_cp: 400,
            eval_depth: 12,
            eval_budget_ms: 3_000,
        }
    }
}

/// Top-level broker configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub engines: Vec<EngineDef>,
    pub pool: PoolConfig,
    pub dedup: DedupConfig,
    pub ensemble: EnsembleConfig,
    pub policy: PolicyConfig,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            engines: default_engines(),
            pool: PoolConfig::default(),
            dedup: DedupConfig::default(),
            ensemble: EnsembleConfig::default(),
            policy: PolicyConfig::default(),
        }
    }
}

fn default_engines() -> Vec<EngineDef> {
    vec![
        EngineDef {
            id: "stockfish".to_string(),
            backend: EngineBackend::Uci {
                command: std::env::var("STOCKFISH_PATH")
                    .unwrap_or_else(|_| "/usr/bin/stockfish".to_string()),
                args: Vec::new(),
            },
            weight: 0.8,
            slots: 2,
            strength: Some("~3200 ELO".to_string()),
        },
        EngineDef {
            id: "lichess_cloud".to_string(),
            backend: EngineBackend::Cloud {
                url: std::env::var("CLOUD_EVAL_URL")
                    .unwrap_or_else(|_| "https://lichess.org/api/cloud-eval".to_string()),
            },
            weight: 0.5,
            slots: 4,
            strength: Some("cloud".to_string()),
        },
    ]
}

impl BrokerConfig {
    /// Load from a TOML file.
    pub fn from_toml_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: Self = toml::from_str(&raw)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(!self.engines.is_empty(), "at least one engine is required");
        for def in &self.engines {
            anyhow::ensure!(!def.id.is_empty(), "engine id must not be empty");
            anyhow::ensure!(def.slots >= 1, "engine '{}' needs slots >= 1", def.id);
            anyhow::ensure!(
                (0.0..=1.0).contains(&def.weight),
                "engine '{}' weight must be in [0, 1]",
                def.id
            );
        }
        if let Some(fallback) = &self.ensemble.default_engine {
            anyhow::ensure!(
                self.engines.iter().any(|e| &e.id == fallback),
                "ensemble default_engine '{fallback}' is not a configured engine"
            );
        }
        Ok(())
    }

    pub fn engine(&self, id: &str) -> Option<&EngineDef> {
        self.engines.iter().find(|e| e.id == id)
    }

    /// Ensemble trust weight for an engine; unknown kinds get the neutral
    /// default.
    pub fn weight_for(&self, id: &str) -> f64 {
        self.engine(id).map(|e| e.weight).unwrap_or_else(default_weight)
    }

    pub fn engine_ids(&self) -> Vec<EngineId> {
        self.engines.iter().map(|e| e.id.clone()).collect()
    }
}
