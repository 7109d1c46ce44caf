//! Batched OTLP export
//!
//! A cycle's records are split into chunks of at most [`CHUNK_SIZE`] and every
//! chunk is submitted concurrently over the shared transport. Every chunk is
//! bounded by [`EXPORT_TIMEOUT`]; failed or timed-out chunks are logged and do
//! not count towards the delivered total.

mod grpc;

pub use grpc::{ApiKeyInterceptor, GrpcTransport};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use opentelemetry_proto::tonic::metrics::v1::ResourceMetrics;
use opentelemetry_proto::tonic::trace::v1::ResourceSpans;
use tokio::time::Instant;

/// Maximum number of records per export call
pub const CHUNK_SIZE: usize = 1000;

/// Upper bound on a single chunk submission
pub const EXPORT_TIMEOUT: Duration = Duration::from_secs(5);

/// Network collector accepting OTLP records
#[async_trait]
pub trait OtlpTransport: Send + Sync {
    async fn export_metrics(&self, metrics: Vec<ResourceMetrics>) -> Result<(), ExportError>;

    async fn export_spans(&self, spans: Vec<ResourceSpans>) -> Result<(), ExportError>;
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExportError {
    #[error("Collector rejected export: {0}")]
    Rejected(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid api key: {0}")]
    InvalidApiKey(String),

    #[error("Export timed out after {0:?}")]
    Timeout(Duration),
}

/// Chunking front-end shared by every collection worker
#[derive(Clone)]
pub struct Exporter {
    transport: Arc<dyn OtlpTransport>,
    timeout: Duration,
}

impl Exporter {
    pub fn new(transport: Arc<dyn OtlpTransport>) -> Self {
        Self {
            transport,
            timeout: EXPORT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the number of metrics the collector acknowledged
    pub async fn send_metrics(&self, batch: Vec<ResourceMetrics>) -> usize {
        self.send_chunked("metrics", batch, |chunk| self.transport.export_metrics(chunk))
            .await
    }

    /// Returns the number of spans the collector acknowledged
    pub async fn send_spans(&self, batch: Vec<ResourceSpans>) -> usize {
        self.send_chunked("spans", batch, |chunk| self.transport.export_spans(chunk))
            .await
    }

    async fn send_chunked<T, F, Fut>(&self, signal: &'static str, batch: Vec<T>, export: F) -> usize
    where
        F: Fn(Vec<T>) -> Fut,
        Fut: Future<Output = Result<(), ExportError>>,
    {
        if batch.is_empty() {
            return 0;
        }

        let started = Instant::now();
        let records = batch.len();
        let timeout = self.timeout;
        let submissions = split_chunks(batch, CHUNK_SIZE).into_iter().map(|chunk| {
            let chunk_size = chunk.len();
            let submission = export(chunk);
            async move {
                let result = tokio::time::timeout(timeout, submission)
                    .await
                    .unwrap_or(Err(ExportError::Timeout(timeout)));
                match result {
                    Ok(()) => chunk_size,
                    Err(e) => {
                        tracing::error!(
                            signal,
                            chunk_size,
                            error = %e,
                            "Failed to export chunk"
                        );
                        0
                    }
                }
            }
        });

        let delivered: usize = futures::future::join_all(submissions).await.into_iter().sum();
        tracing::debug!(
            signal,
            records,
            delivered,
            elapsed = ?started.elapsed(),
            "Export finished"
        );
        delivered
    }
}

/// Split without cloning; every chunk but the last holds exactly `size` items
fn split_chunks<T>(mut batch: Vec<T>, size: usize) -> Vec<Vec<T>> {
    let mut chunks = Vec::with_capacity(batch.len().div_ceil(size));
    while batch.len() > size {
        let rest = batch.split_off(size);
        chunks.push(batch);
        batch = rest;
    }
    if !batch.is_empty() {
        chunks.push(batch);
    }
    chunks
}
