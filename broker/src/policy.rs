//! Evaluation policy: winning chances, move classification, game phase.
//!
//! The centipawn-to-winning-chances mapping is a heuristic, not a law, so
//! its slope and the classification thresholds live behind configuration.

use crate::config::PolicyConfig;
use crate::types::Evaluation;

/// Policy-driven interpretation of raw engine evaluations.
#[derive(Debug, Clone)]
pub struct EvalPolicy {
    cfg: PolicyConfig,
}

impl EvalPolicy {
    pub fn new(cfg: PolicyConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.cfg
    }

    /// Winning chances in [0, 100] for the side the evaluation favors.
    /// Linear around the 50% midpoint, saturating; forced mates are
    /// certain one way or the other.
    pub fn winning_chances(&self, eval: Evaluation) -> f64 {
        let pct = match eval {
            Evaluation::MateIn(m) if m > 0 => 100.0,
            Evaluation::MateIn(_) => 0.0,
            Evaluation::Centipawns(cp) => 50.0 + cp as f64 * self.cfg.win_slope,
        };
        (pct.clamp(0.0, 100.0) * 10.0).round() / 10.0
    }

    /// Coarse label for the evaluation magnitude. Thresholds come from
    /// configuration.
    pub fn classify(&self, eval: Evaluation) -> &'static str {
        match eval {
            Evaluation::MateIn(_) => "mate",
            Evaluation::Centipawns(cp) => {
                let mag = cp.abs();
                if mag < self.cfg.balanced_below_cp {
                    "balanced"
                } else if mag < self.cfg.edge_below_cp {
                    "edge"
                } else if mag < self.cfg.winning_below_cp {
                    "winning"
                } else {
                    "decisive"
                }
            }
        }
    }

    /// Rough play-accuracy hint per classification bucket. Coarse by
    /// design; the broker has no move history to do better.
    pub fn accuracy(&self, eval: Evaluation) -> f64 {
        match self.classify(eval) {
            "balanced" => 95.0,
            "edge" => 88.0,
            "winning" => 75.0,
            "decisive" => 60.0,
            _ => 50.0,
        }
    }

    /// Game phase derived from the fullmove counter.
    pub fn position_type(fullmove_number: u32) -> &'static str {
        if fullmove_number <= 10 {
            "opening"
        } else if fullmove_number <= 40 {
            "middlegame"
        } else {
            "endgame"
        }
    }
}

impl Default for EvalPolicy {
    fn default() -> Self {
        Self::new(PolicyConfig::default())
    }
}
