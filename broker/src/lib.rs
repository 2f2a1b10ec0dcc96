//! Chess analysis request broker.
//!
//! Sits between board clients and a set of analysis engines (UCI
//! subprocesses, cloud evaluation endpoints) and brokers best-move and
//! evaluation requests across them:
//!
//! - [`engine`] — uniform adapter seam over each backend kind.
//! - [`pool`] — bounded leases per engine kind, with fault retirement,
//!   bounded respawn, and degradation.
//! - [`dedup`] — collapses identical concurrent requests onto one
//!   computation and caches completed results.
//! - [`ensemble`] — deadline-bounded fan-out with weighted consensus
//!   voting.
//! - [`broker`] — the façade routing requests through all of the above.
//! - [`http`] — the axum API surface.

pub mod broker;
pub mod config;
pub mod dedup;
pub mod engine;
pub mod ensemble;
pub mod error;
pub mod http;
pub mod policy;
pub mod pool;
pub mod types;

pub use broker::{Broker, PositionAssessment, SharedBroker};
pub use config::BrokerConfig;
pub use error::{BrokerError, BrokerResult};
pub use types::{
    AnalysisOutcome, AnalysisRequest, AnalysisResult, Color, EngineSelector, Evaluation, Position,
};
