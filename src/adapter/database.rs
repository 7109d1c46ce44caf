use std::sync::Arc;
use std::time::Duration;

use opentelemetry_proto::tonic::trace::v1::{span::SpanKind, status::StatusCode, ResourceSpans, Span, Status};

use super::ids::IdGenerator;
use super::resource::ResourceHelper;
use super::{spans_per_resource, string_attr, unix_nanos, AdaptError};
use crate::data::Row;

/// Database protocol traced by a [`DatabaseSpans`] adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbSystem {
    MySql,
    Postgres,
}

impl DbSystem {
    pub fn adapter_id(&self) -> &'static str {
        match self {
            DbSystem::MySql => "db_mysql",
            DbSystem::Postgres => "db_postgres",
        }
    }

    /// Value of the `db.system` span attribute
    pub fn as_str(&self) -> &'static str {
        match self {
            DbSystem::MySql => "mysql",
            DbSystem::Postgres => "postgres",
        }
    }

    fn script(&self, interval: Duration, span_limit: u64) -> String {
        let secs = interval.as_secs().max(1);
        let (table, normalize, display) = match self {
            DbSystem::MySql => ("mysql_events", "px.normalize_mysql(df.req_body, df.req_cmd)", "mysql"),
            DbSystem::Postgres => ("pgsql_events", "px.normalize_pgsql(df.req, df.req_cmd)", "pgsql"),
        };
        // Postgres events are recorded on both ends; keep the client side only
        let role_filter = match self {
            DbSystem::MySql => "",
            DbSystem::Postgres => "df = df[df.trace_role == 1]\n",
        };

        format!(
            r#"#px:set max_output_rows_per_table={span_limit}

import px
df = px.DataFrame('{table}', start_time='-{secs}s')
df.pod = df.ctx['pod']
df.service = df.ctx['service']
df.namespace = df.ctx['namespace']
df.container = df.ctx['container_name']

df.normed_query_struct = {normalize}
df.query = px.pluck(df.normed_query_struct, 'query')
df = df[df.query != ""]
{role_filter}
df = df[['time_', 'container', 'service', 'pod', 'namespace', 'query', 'latency']]
px.display(df, '{display}')
"#
        )
    }
}

impl std::fmt::Display for DbSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client spans for normalized database queries
#[derive(Clone)]
pub struct DatabaseSpans {
    system: DbSystem,
    ids: Arc<dyn IdGenerator>,
    interval: Duration,
    span_limit: u64,
    script: String,
}

impl DatabaseSpans {
    pub fn new(system: DbSystem, ids: Arc<dyn IdGenerator>, interval: Duration, span_limit: u64) -> Self {
        Self {
            system,
            ids,
            interval,
            span_limit,
            script: system.script(interval, span_limit),
        }
    }

    pub fn system(&self) -> DbSystem {
        self.system
    }

    pub fn script(&self) -> &str {
        &self.script
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn span_limit(&self) -> u64 {
        self.span_limit
    }

    pub fn adapt(&self, resources: &ResourceHelper, row: &Row) -> Result<Vec<ResourceSpans>, AdaptError> {
        let start = row.timestamp("time_")?;
        let latency = row.int64("latency")?;

        let span = Span {
            trace_id: self.ids.new_trace_id().to_vec(),
            span_id: self.ids.new_span_id().to_vec(),
            name: row.string("query"),
            kind: SpanKind::Client as i32,
            start_time_unix_nano: unix_nanos(start),
            end_time_unix_nano: unix_nanos(start.saturating_add(latency)),
            status: Some(Status {
                code: StatusCode::Unset as i32,
                ..Default::default()
            }),
            attributes: vec![string_attr("db.system", self.system.as_str())],
            ..Default::default()
        };

        Ok(spans_per_resource(resources.build_resources(row), span))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{attr_str, SequenceIds};
    use crate::data::{CellError, Value};

    fn helper() -> ResourceHelper {
        ResourceHelper::new("demo", "cluster-1", None, None).unwrap()
    }

    fn query_row() -> Row {
        Row::new()
            .with("time_", Value::Timestamp(3_000_000_000))
            .with("latency", Value::Int64(750_000))
            .with("query", Value::String("SELECT * FROM orders WHERE id = ?".into()))
            .with("namespace", Value::String("shop".into()))
            .with("service", Value::String("shop/orders".into()))
            .with("pod", Value::String("shop/orders-2".into()))
            .with("container", Value::String("api".into()))
    }

    #[test]
    fn test_mysql_client_span() {
        let adapter = DatabaseSpans::new(DbSystem::MySql, SequenceIds::shared(), Duration::from_secs(10), 500);
        let out = adapter.adapt(&helper(), &query_row()).unwrap();
        assert_eq!(out.len(), 1);

        let span = &out[0].scope_spans[0].spans[0];
        assert_eq!(span.name, "SELECT * FROM orders WHERE id = ?");
        assert_eq!(span.kind, SpanKind::Client as i32);
        assert!(span.parent_span_id.is_empty());
        assert_eq!(span.trace_id.len(), 16);
        assert_eq!(span.span_id.len(), 8);
        assert_eq!(span.start_time_unix_nano, 3_000_000_000);
        assert_eq!(span.end_time_unix_nano, 3_000_750_000);
        assert_eq!(attr_str(&span.attributes, "db.system"), Some("mysql"));
    }

    #[test]
    fn test_postgres_attribute_and_script() {
        let adapter = DatabaseSpans::new(DbSystem::Postgres, SequenceIds::shared(), Duration::from_secs(15), 250);
        let out = adapter.adapt(&helper(), &query_row()).unwrap();
        let span = &out[0].scope_spans[0].spans[0];
        assert_eq!(attr_str(&span.attributes, "db.system"), Some("postgres"));

        let script = adapter.script();
        assert!(script.contains("pgsql_events"));
        assert!(script.contains("df.trace_role == 1"));
        assert!(script.contains("max_output_rows_per_table=250"));
        assert!(script.contains("start_time='-15s'"));
    }

    #[test]
    fn test_mysql_script_has_no_role_filter() {
        let adapter = DatabaseSpans::new(DbSystem::MySql, SequenceIds::shared(), Duration::from_secs(10), 500);
        assert!(adapter.script().contains("mysql_events"));
        assert!(!adapter.script().contains("trace_role"));
    }

    #[test]
    fn test_ids_are_fresh_per_row() {
        let adapter = DatabaseSpans::new(DbSystem::MySql, SequenceIds::shared(), Duration::from_secs(10), 500);
        let first = adapter.adapt(&helper(), &query_row()).unwrap();
        let second = adapter.adapt(&helper(), &query_row()).unwrap();
        assert_ne!(
            first[0].scope_spans[0].spans[0].span_id,
            second[0].scope_spans[0].spans[0].span_id
        );
    }

    #[test]
    fn test_missing_latency_is_an_error() {
        let mut row = Row::new();
        row.insert("time_", Value::Timestamp(1));
        let adapter = DatabaseSpans::new(DbSystem::MySql, SequenceIds::shared(), Duration::from_secs(10), 500);
        assert_eq!(
            adapter.adapt(&helper(), &row).unwrap_err(),
            AdaptError::Cell(CellError::Missing("latency".into()))
        );
    }
}
