//! Collection pipeline
//!
//! Each configured adapter gets its own [`CollectionWorker`]. A cycle executes
//! the adapter's script, streams the result rows through a [`ResultDispatcher`]
//! into a [`RecordSink`], and flushes the sink through the shared exporter.

mod sink;
mod worker;

pub use sink::{RecordSink, ResultDispatcher, SendReport};
pub use worker::{CollectionWorker, CycleFault, WorkerSettings, CYCLE_TIMEOUT, RECOVERY_DELAY};

use std::time::Duration;

use crate::adapter::AdaptError;
use crate::engine::EngineError;

/// Why a cycle ended without exporting
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CycleError {
    #[error("Query failed: {0}")]
    Engine(#[from] EngineError),

    #[error("Row adaptation failed: {0}")]
    Adapt(#[from] AdaptError),

    #[error("Streaming did not finish within {0:?}")]
    Timeout(Duration),
}
