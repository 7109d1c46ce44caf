use std::time::Duration;

use opentelemetry_proto::tonic::metrics::v1::{
    metric, summary_data_point::ValueAtQuantile, Metric, ResourceMetrics, Summary, SummaryDataPoint,
};

use super::resource::ResourceHelper;
use super::{int_attr, metrics_per_resource, nanos_to_millis, unix_nanos, AdaptError};
use crate::data::Row;

pub const HTTP_SERVER_DURATION: &str = "http.server.duration";

fn script(interval: Duration) -> String {
    let secs = interval.as_secs().max(1);
    format!(
        r#"#px:set max_output_rows_per_table=10000

import px
df = px.DataFrame(table='http_events', start_time='-{secs}s')

df.container = df.ctx['container_name']
df.pod = df.ctx['pod']
df.service = df.ctx['service']
df.namespace = df.ctx['namespace']

df.status_code = df.resp_status

df = df.groupby(['status_code', 'pod', 'container', 'service', 'namespace']).agg(
    latency_min=('latency', px.min),
    latency_max=('latency', px.max),
    latency_sum=('latency', px.sum),
    latency_count=('latency', px.count),
    timestamp=('time_', px.max),
)

px.display(df, 'http')
"#
    )
}

/// Inbound HTTP latency summaries, pre-aggregated per status code
#[derive(Debug, Clone)]
pub struct HttpMetrics {
    interval: Duration,
    script: String,
}

impl HttpMetrics {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            script: script(interval),
        }
    }

    pub fn script(&self) -> &str {
        &self.script
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn adapt(&self, resources: &ResourceHelper, row: &Row) -> Result<Vec<ResourceMetrics>, AdaptError> {
        let timestamp = row.timestamp("timestamp")?;
        let status_code = row.int64("status_code")?;
        let min = nanos_to_millis(row.int64("latency_min")? as f64);
        let max = nanos_to_millis(row.int64("latency_max")? as f64);
        let sum = nanos_to_millis(row.int64("latency_sum")? as f64);
        let count = row.int64("latency_count")?;

        let window = i64::try_from(self.interval.as_nanos()).unwrap_or(i64::MAX);

        let metric = Metric {
            name: HTTP_SERVER_DURATION.to_string(),
            description: "measures the duration of the inbound HTTP request".to_string(),
            unit: "ms".to_string(),
            data: Some(metric::Data::Summary(Summary {
                data_points: vec![SummaryDataPoint {
                    attributes: vec![int_attr("http.status_code", status_code)],
                    start_time_unix_nano: unix_nanos(timestamp),
                    time_unix_nano: unix_nanos(timestamp.saturating_add(window)),
                    count: u64::try_from(count).unwrap_or(0),
                    sum,
                    quantile_values: vec![
                        ValueAtQuantile {
                            quantile: 0.0,
                            value: min,
                        },
                        ValueAtQuantile {
                            quantile: 1.0,
                            value: max,
                        },
                    ],
                    ..Default::default()
                }],
            })),
            ..Default::default()
        };

        Ok(metrics_per_resource(resources.build_resources(row), vec![metric]))
    }
}
