//! pxotel: eBPF telemetry to OpenTelemetry
//!
//! Periodically runs scripts against a remote eBPF query engine and re-emits
//! the result rows as OTLP metrics and spans.
//!
//! # Features
//!
//! - **HTTP spans**: server spans with propagated B3 trace context
//! - **HTTP metrics**: per-status latency summaries
//! - **JVM metrics**: GC time and heap gauges
//! - **Database spans**: normalized MySQL and PostgreSQL queries as client spans
//! - **Resource fan-out**: one resource per service backed by a pod
//! - **Exclusions**: namespace and pod regex filters
//! - **Chunked export**: concurrent OTLP/gRPC submissions of at most 1000 records
//! - **Supervised workers**: per-cycle timeout, crash recovery and drain on shutdown
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use pxotel::adapter::{Adapter, ResourceHelper};
//! use pxotel::engine::HttpQueryEngine;
//! use pxotel::exporter::{Exporter, GrpcTransport};
//! use pxotel::pipeline::CollectionWorker;
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = Arc::new(HttpQueryEngine::new("work.withpixie.ai:443", "cluster-id", "api-key")?);
//! let exporter = Exporter::new(Arc::new(GrpcTransport::new("otlp.nr-data.net:443", "license")?));
//! let resources = Arc::new(ResourceHelper::new("prod", "cluster-id", None, Some("^kube-"))?);
//!
//! let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! let worker = CollectionWorker::new(Adapter::jvm(Duration::from_secs(10)), engine, resources, exporter)
//!     .start(shutdown_rx);
//!
//! shutdown_tx.send(true)?;
//! worker.await?;
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod config;
pub mod data;
pub mod engine;
pub mod exporter;
pub mod pipeline;

// Re-export commonly used types
pub use adapter::{Adapter, ResourceHelper};
pub use config::{Config, ConfigError};
pub use data::{Row, Value};
pub use engine::{EngineError, QueryEngine};
pub use exporter::{Exporter, ExportError};
pub use pipeline::{CollectionWorker, CycleError};
