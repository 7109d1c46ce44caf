//! Row-to-OTLP adapters
//!
//! Each adapter owns the script it runs against the query engine and turns
//! every row of the result into zero or more OTLP records. The set of signals
//! is closed:
//!
//! | id             | signal  | source table   |
//! |----------------|---------|----------------|
//! | `http_spans`   | spans   | `http_events`  |
//! | `http_metrics` | metrics | `http_events`  |
//! | `jvm`          | metrics | `jvm_stats`    |
//! | `db_mysql`     | spans   | `mysql_events` |
//! | `db_postgres`  | spans   | `pgsql_events` |

mod database;
mod http_metric;
mod http_span;
pub mod ids;
mod jvm;
pub mod path;
pub mod resource;

use std::sync::Arc;
use std::time::Duration;

use opentelemetry_proto::tonic::common::v1::{any_value, AnyValue, InstrumentationScope, KeyValue};
use opentelemetry_proto::tonic::metrics::v1::{Metric, ResourceMetrics, ScopeMetrics};
use opentelemetry_proto::tonic::resource::v1::Resource;
use opentelemetry_proto::tonic::trace::v1::{ResourceSpans, ScopeSpans, Span};

pub use database::{DatabaseSpans, DbSystem};
pub use http_metric::HttpMetrics;
pub use http_span::HttpSpans;
pub use ids::{IdError, IdGenerator, RandomIdGenerator, SpanId, TraceId};
pub use jvm::JvmMetrics;
pub use path::normalize_path;
pub use resource::{Identity, ResourceHelper, ServiceCell};

use crate::data::{CellError, Row};

/// Instrumentation scope and provider name stamped on every record
pub const INSTRUMENTATION_NAME: &str = "pixie";
pub const INSTRUMENTATION_VERSION: &str = "1.0.0";

const NANOS_PER_MILLI: f64 = 1_000_000.0;

/// Kind of telemetry an adapter produces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Metrics,
    Spans,
}

impl Signal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Metrics => "metrics",
            Signal::Spans => "spans",
        }
    }
}

/// Records produced from a single row
#[derive(Debug, Clone, PartialEq)]
pub enum Adapted {
    Metrics(Vec<ResourceMetrics>),
    Spans(Vec<ResourceSpans>),
}

impl Adapted {
    pub fn len(&self) -> usize {
        match self {
            Adapted::Metrics(m) => m.len(),
            Adapted::Spans(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A configured signal adapter
#[derive(Clone)]
pub enum Adapter {
    HttpSpans(HttpSpans),
    HttpMetrics(HttpMetrics),
    Jvm(JvmMetrics),
    Database(DatabaseSpans),
}

impl Adapter {
    pub fn http_spans(ids: Arc<dyn IdGenerator>, interval: Duration, span_limit: u64) -> Self {
        Adapter::HttpSpans(HttpSpans::new(ids, interval, span_limit))
    }

    pub fn http_metrics(interval: Duration) -> Self {
        Adapter::HttpMetrics(HttpMetrics::new(interval))
    }

    pub fn jvm(interval: Duration) -> Self {
        Adapter::Jvm(JvmMetrics::new(interval))
    }

    pub fn mysql(ids: Arc<dyn IdGenerator>, interval: Duration, span_limit: u64) -> Self {
        Adapter::Database(DatabaseSpans::new(DbSystem::MySql, ids, interval, span_limit))
    }

    pub fn postgres(ids: Arc<dyn IdGenerator>, interval: Duration, span_limit: u64) -> Self {
        Adapter::Database(DatabaseSpans::new(DbSystem::Postgres, ids, interval, span_limit))
    }

    pub fn id(&self) -> &'static str {
        match self {
            Adapter::HttpSpans(_) => "http_spans",
            Adapter::HttpMetrics(_) => "http_metrics",
            Adapter::Jvm(_) => "jvm",
            Adapter::Database(db) => db.system().adapter_id(),
        }
    }

    /// Script text with interval and limit already substituted
    pub fn script(&self) -> &str {
        match self {
            Adapter::HttpSpans(a) => a.script(),
            Adapter::HttpMetrics(a) => a.script(),
            Adapter::Jvm(a) => a.script(),
            Adapter::Database(a) => a.script(),
        }
    }

    pub fn interval(&self) -> Duration {
        match self {
            Adapter::HttpSpans(a) => a.interval(),
            Adapter::HttpMetrics(a) => a.interval(),
            Adapter::Jvm(a) => a.interval(),
            Adapter::Database(a) => a.interval(),
        }
    }

    /// Row/span limit baked into the script, if the signal has one
    pub fn limit(&self) -> Option<u64> {
        match self {
            Adapter::HttpSpans(a) => Some(a.span_limit()),
            Adapter::Database(a) => Some(a.span_limit()),
            Adapter::HttpMetrics(_) | Adapter::Jvm(_) => None,
        }
    }

    pub fn signal(&self) -> Signal {
        match self {
            Adapter::HttpSpans(_) | Adapter::Database(_) => Signal::Spans,
            Adapter::HttpMetrics(_) | Adapter::Jvm(_) => Signal::Metrics,
        }
    }

    /// Convert one row into OTLP records
    pub fn adapt(&self, resources: &ResourceHelper, row: &Row) -> Result<Adapted, AdaptError> {
        match self {
            Adapter::HttpSpans(a) => a.adapt(resources, row).map(Adapted::Spans),
            Adapter::HttpMetrics(a) => a.adapt(resources, row).map(Adapted::Metrics),
            Adapter::Jvm(a) => a.adapt(resources, row).map(Adapted::Metrics),
            Adapter::Database(a) => a.adapt(resources, row).map(Adapted::Spans),
        }
    }
}

impl std::fmt::Debug for Adapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Adapter")
            .field("id", &self.id())
            .field("interval", &self.interval())
            .field("limit", &self.limit())
            .finish_non_exhaustive()
    }
}

/// Adaptation errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AdaptError {
    #[error(transparent)]
    Cell(#[from] CellError),

    #[error("Invalid id {value:?} in column {column}: {source}")]
    InvalidId {
        column: &'static str,
        value: String,
        source: IdError,
    },
}

pub(crate) fn instrumentation_scope() -> InstrumentationScope {
    InstrumentationScope {
        name: INSTRUMENTATION_NAME.to_string(),
        version: INSTRUMENTATION_VERSION.to_string(),
        ..Default::default()
    }
}

pub(crate) fn string_attr(key: &str, value: impl Into<String>) -> KeyValue {
    KeyValue {
        key: key.to_string(),
        value: Some(AnyValue {
            value: Some(any_value::Value::StringValue(value.into())),
        }),
    }
}

pub(crate) fn int_attr(key: &str, value: i64) -> KeyValue {
    KeyValue {
        key: key.to_string(),
        value: Some(AnyValue {
            value: Some(any_value::Value::IntValue(value)),
        }),
    }
}

/// Nanosecond timestamps from the engine are never negative in practice
pub(crate) fn unix_nanos(ns: i64) -> u64 {
    u64::try_from(ns).unwrap_or(0)
}

pub(crate) fn nanos_to_millis(ns: f64) -> f64 {
    ns / NANOS_PER_MILLI
}

/// Duplicate one span under every resource
pub(crate) fn spans_per_resource(resources: Vec<Resource>, span: Span) -> Vec<ResourceSpans> {
    resources
        .into_iter()
        .map(|resource| ResourceSpans {
            resource: Some(resource),
            scope_spans: vec![ScopeSpans {
                scope: Some(instrumentation_scope()),
                spans: vec![span.clone()],
                ..Default::default()
            }],
            ..Default::default()
        })
        .collect()
}

/// Duplicate a set of metrics under every resource
pub(crate) fn metrics_per_resource(
    resources: Vec<Resource>,
    metrics: Vec<Metric>,
) -> Vec<ResourceMetrics> {
    resources
        .into_iter()
        .map(|resource| ResourceMetrics {
            resource: Some(resource),
            scope_metrics: vec![ScopeMetrics {
                scope: Some(instrumentation_scope()),
                metrics: metrics.clone(),
                ..Default::default()
            }],
            ..Default::default()
        })
        .collect()
}

/// Look up a string attribute by key
#[cfg(test)]
pub(crate) fn attr_str<'a>(attributes: &'a [KeyValue], key: &str) -> Option<&'a str> {
    attributes
        .iter()
        .find(|kv| kv.key == key)
        .and_then(|kv| kv.value.as_ref())
        .and_then(|v| match &v.value {
            Some(any_value::Value::StringValue(s)) => Some(s.as_str()),
            _ => None,
        })
}

/// Look up an int attribute by key
#[cfg(test)]
pub(crate) fn attr_int(attributes: &[KeyValue], key: &str) -> Option<i64> {
    attributes
        .iter()
        .find(|kv| kv.key == key)
        .and_then(|kv| kv.value.as_ref())
        .and_then(|v| match &v.value {
            Some(any_value::Value::IntValue(i)) => Some(*i),
            _ => None,
        })
}

/// Deterministic generator for adapter tests
#[cfg(test)]
pub(crate) struct SequenceIds(std::sync::atomic::AtomicU8);

#[cfg(test)]
impl SequenceIds {
    pub(crate) fn shared() -> Arc<dyn IdGenerator> {
        Arc::new(SequenceIds(std::sync::atomic::AtomicU8::new(1)))
    }

    fn next(&self) -> u8 {
        self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
impl IdGenerator for SequenceIds {
    fn new_trace_id(&self) -> TraceId {
        TraceId([self.next(); 16])
    }

    fn new_span_id(&self) -> SpanId {
        SpanId([self.next(); 8])
    }
}
