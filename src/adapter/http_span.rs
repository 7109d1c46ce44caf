use std::sync::Arc;
use std::time::Duration;

use opentelemetry_proto::tonic::trace::v1::{span::SpanKind, status::StatusCode, ResourceSpans, Span, Status};

use super::ids::{IdGenerator, SpanId, TraceId};
use super::path::normalize_path;
use super::resource::ResourceHelper;
use super::{int_attr, spans_per_resource, string_attr, unix_nanos, AdaptError};
use crate::data::Row;

/// Left padding that widens a 64-bit B3 trace id to 128 bits
const B3_TRACE_ID_PADDING: &str = "0000000000000000";

fn script(interval: Duration, span_limit: u64) -> String {
    let secs = interval.as_secs().max(1);
    format!(
        r#"#px:set max_output_rows_per_table={span_limit}

import px
df = px.DataFrame('http_events', start_time='-{secs}s')
df.container = df.ctx['container_name']
df.pod = df.ctx['pod']
df.service = df.ctx['service']
df.namespace = df.ctx['namespace']
df.parent_service = px.service_id_to_service_name(px.ip_to_service_id(df.remote_addr))
df.parent_pod = px.pod_id_to_pod_name(px.ip_to_pod_id(df.remote_addr))

df.host = px.pluck(df.req_headers, 'Host')
df.user_agent = px.pluck(df.req_headers, 'User-Agent')
df.trace_id = px.pluck(df.req_headers, 'X-B3-TraceId')
df.span_id = px.pluck(df.req_headers, 'X-B3-SpanId')
df.parent_id = px.pluck(df.req_headers, 'X-B3-ParentSpanId')

df = df[['time_', 'container', 'req_method', 'req_path', 'resp_status', 'latency', 'service', 'pod', 'namespace', 'parent_service', 'parent_pod', 'host', 'trace_id', 'span_id', 'parent_id', 'user_agent']]
px.display(df, 'http')
"#
    )
}

/// Server spans for inbound HTTP requests
#[derive(Clone)]
pub struct HttpSpans {
    ids: Arc<dyn IdGenerator>,
    interval: Duration,
    span_limit: u64,
    script: String,
}

impl HttpSpans {
    pub fn new(ids: Arc<dyn IdGenerator>, interval: Duration, span_limit: u64) -> Self {
        Self {
            ids,
            interval,
            span_limit,
            script: script(interval, span_limit),
        }
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
        let span_id = self.span_id(row, "span_id")?;
        let trace_id = self.trace_id(row, "trace_id")?;
        let parent_span_id = header_span_id(row, "parent_id")?;

        let start = row.timestamp("time_")?;
        let latency = row.int64("latency")?;
        let status_code = row.int64("resp_status")?;
        let path = row.string("req_path");
        let host = row.string("host");

        let span = Span {
            trace_id: trace_id.to_vec(),
            span_id: span_id.to_vec(),
            parent_span_id: parent_span_id.map(|id| id.to_vec()).unwrap_or_default(),
            name: normalize_path(&path),
            kind: SpanKind::Server as i32,
            start_time_unix_nano: unix_nanos(start),
            end_time_unix_nano: unix_nanos(start.saturating_add(latency)),
            status: Some(Status {
                code: StatusCode::Unset as i32,
                ..Default::default()
            }),
            attributes: vec![
                string_attr(
                    "parent.service.name",
                    ResourceHelper::strip_namespace(row, "parent_service"),
                ),
                string_attr(
                    "parent.k8s.pod.name",
                    ResourceHelper::strip_namespace(row, "parent_pod"),
                ),
                string_attr("http.method", row.string("req_method")),
                string_attr("http.url", format!("{}{}", host, path)),
                string_attr("http.target", path),
                string_attr("http.host", host),
                int_attr("http.status_code", status_code),
                string_attr("http.user_agent", row.string("user_agent")),
            ],
            ..Default::default()
        };

        Ok(spans_per_resource(resources.build_resources(row), span))
    }

    /// Trace id from a B3 header, or a fresh one when the header is absent
    fn trace_id(&self, row: &Row, column: &'static str) -> Result<TraceId, AdaptError> {
        let value = row.string(column);
        if value.is_empty() {
            return Ok(self.ids.new_trace_id());
        }
        let value = if value.len() == 16 {
            format!("{}{}", B3_TRACE_ID_PADDING, value)
        } else {
            value
        };
        TraceId::from_hex(&value).map_err(|source| AdaptError::InvalidId {
            column,
            value,
            source,
        })
    }

    fn span_id(&self, row: &Row, column: &'static str) -> Result<SpanId, AdaptError> {
        match header_span_id(row, column)? {
            Some(id) => Ok(id),
            None => Ok(self.ids.new_span_id()),
        }
    }
}

/// Span id from a header, `None` when the header is absent
fn header_span_id(row: &Row, column: &'static str) -> Result<Option<SpanId>, AdaptError> {
    let value = row.string(column);
    if value.is_empty() {
        return Ok(None);
    }
    SpanId::from_hex(&value)
        .map(Some)
        .map_err(|source| AdaptError::InvalidId {
            column,
            value,
            source,
        })
}
