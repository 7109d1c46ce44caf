//! Remote tabular query engine
//!
//! A script is submitted once per collection cycle and its result table is
//! streamed back row by row. Dropping the [`RowStream`] releases the remote
//! request, which is how a timed-out cycle cancels its query.

mod client;

pub use client::{decode_ndjson, HttpQueryEngine, EXECUTE_PATH};

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::data::Row;

/// Rows of one script execution, in result order
pub type RowStream = BoxStream<'static, Result<Row, EngineError>>;

#[async_trait]
pub trait QueryEngine: Send + Sync {
    /// Submit a script and start streaming its result rows
    async fn execute(&self, script: &str) -> Result<RowStream, EngineError>;
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Remote error ({status}): {message}")]
    Remote { status: u16, message: String },

    #[error("Decode error: {0}")]
    Decode(String),
}
