//! Broker error taxonomy.
//!
//! Every failure surfaced to a caller carries a stable machine-readable
//! code (for the HTTP boundary) plus a human-readable message. The broker
//! never retries on its own beyond the pool's bounded respawn; retry policy
//! belongs to the caller.

use thiserror::Error;

/// Failure modes surfaced by the broker and its components.
///
/// Clone is required because a single failure may be broadcast to every
/// waiter collapsed onto the same in-flight computation.
#[derive(Debug, Clone, Error)]
pub enum BrokerError {
    /// Malformed or missing input (bad FEN, unknown perspective). Rejected
    /// before any engine work is attempted.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The engine kind is unknown, failed to launch, or is degraded past
    /// its respawn budget.
    #[error("engine '{engine}' unavailable: {reason}")]
    EngineUnavailable { engine: String, reason: String },

    /// All pool slots for the kind stayed busy for the caller's whole wait
    /// budget. The underlying computations continue unaffected.
    #[error("pool for engine '{engine}' exhausted after {waited_ms}ms")]
    PoolExhausted { engine: String, waited_ms: u64 },

    /// The engine produced no final result within the time budget, even
    /// after being asked to stop.
    #[error("engine '{engine}' produced no result within {budget_ms}ms")]
    EngineTimeout { engine: String, budget_ms: u64 },

    /// The engine process exited or produced a malformed response.
    #[error("engine '{engine}' crashed: {detail}")]
    EngineCrashed { engine: String, detail: String },

    /// Ensemble aggregation finished the deadline with zero surviving votes.
    #[error("no consensus: zero surviving ensemble votes")]
    NoConsensus,

    /// Broker-internal plumbing failure (dropped channel, poisoned task).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for broker operations.
pub type BrokerResult<T> = Result<T, BrokerError>;

impl BrokerError {
    /// Stable error code for wire responses. Never renamed once shipped.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::EngineUnavailable { .. } => "engine_unavailable",
            Self::PoolExhausted { .. } => "pool_exhausted",
            Self::EngineTimeout { .. } => "engine_timeout",
            Self::EngineCrashed { .. } => "engine_crashed",
            Self::NoConsensus => "no_consensus",
            Self::Internal(_) => "internal",
        }
    }

    /// Whether an identical retry by the caller may succeed without any
    /// operator intervention.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            Self::EngineUnavailable { .. } | Self::PoolExhausted { .. } | Self::EngineTimeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(BrokerError::InvalidInput("x".into()).code(), "invalid_input");
        assert_eq!(BrokerError::NoConsensus.code(), "no_consensus");
        assert_eq!(
            BrokerError::PoolExhausted {
                engine: "stockfish".into(),
                waited_ms: 500
            }
            .code(),
            "pool_exhausted"
        );
    }

    #[test]
    fn retryability() {
        assert!(BrokerError::PoolExhausted {
            engine: "stockfish".into(),
            waited_ms: 1
        }
        .retryable());
        assert!(!BrokerError::InvalidInput("bad fen".into()).retryable());
        assert!(!BrokerError::NoConsensus.retryable());
    }
}
