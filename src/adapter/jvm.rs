use std::time::Duration;

use opentelemetry_proto::tonic::metrics::v1::{
    metric, number_data_point, Gauge, Metric, NumberDataPoint, ResourceMetrics,
};

use super::resource::ResourceHelper;
use super::{metrics_per_resource, string_attr, unix_nanos, AdaptError};
use crate::data::Row;

/// Mapping from a result column to the gauge it feeds
struct GaugeDef {
    column: &'static str,
    name: &'static str,
    unit: &'static str,
    attributes: &'static [(&'static str, &'static str)],
}

const GAUGES: [GaugeDef; 5] = [
    GaugeDef {
        column: "young_gc_time",
        name: "runtime.jvm.gc.collection",
        unit: "ns",
        attributes: &[("gc", "young")],
    },
    GaugeDef {
        column: "full_gc_time",
        name: "runtime.jvm.gc.collection",
        unit: "ns",
        attributes: &[("gc", "full")],
    },
    GaugeDef {
        column: "used_heap_size",
        name: "runtime.jvm.memory.area",
        unit: "bytes",
        attributes: &[("type", "used"), ("area", "heap")],
    },
    GaugeDef {
        column: "total_heap_size",
        name: "runtime.jvm.memory.area",
        unit: "bytes",
        attributes: &[("type", "total"), ("area", "heap")],
    },
    GaugeDef {
        column: "max_heap_size",
        name: "runtime.jvm.memory.area",
        unit: "bytes",
        attributes: &[("type", "max"), ("area", "heap")],
    },
];

fn script(interval: Duration) -> String {
    let secs = interval.as_secs().max(1);
    format!(
        r#"
import px

ns_per_ms = 1000 * 1000
ns_per_s = 1000 * ns_per_ms
window_ns = px.DurationNanos({secs} * ns_per_s)

df = px.DataFrame(table='jvm_stats', start_time='-{secs}s')
df.timestamp = px.bin(df.time_, window_ns)

df.container = df.ctx['container_name']
df.pod = df.ctx['pod']
df.service = df.ctx['service']
df.namespace = df.ctx['namespace']

df.used_heap_size = px.Bytes(df.used_heap_size)
df.total_heap_size = px.Bytes(df.total_heap_size)
df.max_heap_size = px.Bytes(df.max_heap_size)

by_upid = df.groupby(['upid', 'container', 'pod', 'service', 'namespace', 'timestamp']).agg(
    young_gc_time_max=('young_gc_time', px.max),
    young_gc_time_min=('young_gc_time', px.min),
    full_gc_time_max=('full_gc_time', px.max),
    full_gc_time_min=('full_gc_time', px.min),
    used_heap_size=('used_heap_size', px.mean),
    total_heap_size=('total_heap_size', px.mean),
    max_heap_size=('max_heap_size', px.mean),
)

by_upid.young_gc_time = by_upid.young_gc_time_max - by_upid.young_gc_time_min
by_upid.full_gc_time = by_upid.full_gc_time_max - by_upid.full_gc_time_min

by_k8s = by_upid.groupby(['container', 'pod', 'service', 'namespace', 'timestamp']).agg(
    young_gc_time=('young_gc_time', px.sum),
    full_gc_time=('full_gc_time', px.sum),
    used_heap_size=('used_heap_size', px.sum),
    max_heap_size=('max_heap_size', px.sum),
    total_heap_size=('total_heap_size', px.sum),
)
by_k8s.young_gc_time = px.DurationNanos(by_k8s.young_gc_time)
by_k8s.full_gc_time = px.DurationNanos(by_k8s.full_gc_time)
by_k8s['time_'] = by_k8s['timestamp']

px.display(by_k8s, 'jvm')
"#
    )
}

/// GC time and heap gauges per JVM workload
#[derive(Debug, Clone)]
pub struct JvmMetrics {
    interval: Duration,
    script: String,
}

impl JvmMetrics {
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
        let timestamp = unix_nanos(row.timestamp("time_")?);

        let metrics = GAUGES
            .iter()
            .map(|def| {
                let value = row.number(def.column)?;
                Ok(Metric {
                    name: def.name.to_string(),
                    unit: def.unit.to_string(),
                    data: Some(metric::Data::Gauge(Gauge {
                        data_points: vec![NumberDataPoint {
                            attributes: def
                                .attributes
                                .iter()
                                .map(|(key, value)| string_attr(key, *value))
                                .collect(),
                            time_unix_nano: timestamp,
                            value: Some(number_data_point::Value::AsDouble(value)),
                            ..Default::default()
                        }],
                    })),
                    ..Default::default()
                })
            })
            .collect::<Result<Vec<_>, AdaptError>>()?;

        Ok(metrics_per_resource(resources.build_resources(row), metrics))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::attr_str;
    use crate::data::{CellError, Value};

    fn helper() -> ResourceHelper {
        ResourceHelper::new("demo", "cluster-1", None, None).unwrap()
    }

    fn jvm_row() -> Row {
        Row::new()
            .with("time_", Value::Timestamp(7_000_000_000))
            .with("young_gc_time", Value::Int64(1_500))
            .with("full_gc_time", Value::Int64(0))
            .with("used_heap_size", Value::Float64(1024.5))
            .with("total_heap_size", Value::Int64(4096))
            .with("max_heap_size", Value::Int64(8192))
            .with("namespace", Value::String("billing".into()))
            .with("service", Value::String("billing/ledger".into()))
            .with("pod", Value::String("billing/ledger-0".into()))
            .with("container", Value::String("jvm".into()))
    }

    fn gauge_value(metric: &Metric) -> (f64, u64) {
        let Some(metric::Data::Gauge(gauge)) = &metric.data else {
            panic!("expected a gauge, got {:?}", metric.data);
        };
        let point = &gauge.data_points[0];
        match point.value {
            Some(number_data_point::Value::AsDouble(v)) => (v, point.time_unix_nano),
            ref other => panic!("expected a double, got {:?}", other),
        }
    }

    #[test]
    fn test_five_gauges_in_table_order() {
        let out = JvmMetrics::new(Duration::from_secs(10))
            .adapt(&helper(), &jvm_row())
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].scope_metrics.len(), 1);

        let metrics = &out[0].scope_metrics[0].metrics;
        let summary: Vec<_> = metrics
            .iter()
            .map(|m| (m.name.as_str(), m.unit.as_str(), gauge_value(m).0))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("runtime.jvm.gc.collection", "ns", 1500.0),
                ("runtime.jvm.gc.collection", "ns", 0.0),
                ("runtime.jvm.memory.area", "bytes", 1024.5),
                ("runtime.jvm.memory.area", "bytes", 4096.0),
                ("runtime.jvm.memory.area", "bytes", 8192.0),
            ]
        );

        for metric in metrics {
            assert_eq!(gauge_value(metric).1, 7_000_000_000);
        }
    }

    #[test]
    fn test_gauge_attributes() {
        let out = JvmMetrics::new(Duration::from_secs(10))
            .adapt(&helper(), &jvm_row())
            .unwrap();
        let metrics = &out[0].scope_metrics[0].metrics;

        let Some(metric::Data::Gauge(young)) = &metrics[0].data else {
            unreachable!()
        };
        assert_eq!(attr_str(&young.data_points[0].attributes, "gc"), Some("young"));

        let Some(metric::Data::Gauge(max)) = &metrics[4].data else {
            unreachable!()
        };
        let attributes = &max.data_points[0].attributes;
        assert_eq!(attr_str(attributes, "type"), Some("max"));
        assert_eq!(attr_str(attributes, "area"), Some("heap"));
    }

    #[test]
    fn test_non_numeric_cell_is_an_error() {
        let row = jvm_row().with("total_heap_size", Value::String("4k".into()));
        let err = JvmMetrics::new(Duration::from_secs(10))
            .adapt(&helper(), &row)
            .unwrap_err();
        assert_eq!(
            err,
            AdaptError::Cell(CellError::UnexpectedType {
                column: "total_heap_size".into(),
                expected: "int64 or float64",
                found: "string",
            })
        );
    }

    #[test]
    fn test_excluded_namespace_yields_nothing() {
        let helper = ResourceHelper::new("demo", "cluster-1", None, Some("^billing$")).unwrap();
        let out = JvmMetrics::new(Duration::from_secs(10))
            .adapt(&helper, &jvm_row())
            .unwrap();
        assert!(out.is_empty());
    }
}
