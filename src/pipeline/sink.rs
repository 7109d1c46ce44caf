use futures::StreamExt;
use opentelemetry_proto::tonic::metrics::v1::ResourceMetrics;
use opentelemetry_proto::tonic::trace::v1::ResourceSpans;

use super::CycleError;
use crate::adapter::{AdaptError, Adapted, Adapter, ResourceHelper};
use crate::data::Row;
use crate::engine::RowStream;
use crate::exporter::Exporter;

/// Outcome of flushing a sink
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendReport {
    /// Rows handled since the previous flush
    pub rows: usize,
    /// Records produced from those rows
    pub records: usize,
    /// Records the collector acknowledged
    pub delivered: usize,
}

/// Per-cycle accumulator of adapted records
#[derive(Debug, Default)]
pub struct RecordSink {
    metrics: Vec<ResourceMetrics>,
    spans: Vec<ResourceSpans>,
    rows: usize,
}

impl RecordSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the records of one row
    pub fn push(&mut self, adapted: Adapted) {
        self.rows += 1;
        match adapted {
            Adapted::Metrics(metrics) => self.metrics.extend(metrics),
            Adapted::Spans(spans) => self.spans.extend(spans),
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn records(&self) -> usize {
        self.metrics.len() + self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0 && self.records() == 0
    }

    /// Drop everything accumulated so far
    pub fn clear(&mut self) {
        self.metrics.clear();
        self.spans.clear();
        self.rows = 0;
    }

    /// Export the accumulated records and reset the sink
    ///
    /// The sink is empty afterwards whether or not the export succeeded.
    pub async fn send(&mut self, exporter: &Exporter) -> SendReport {
        let rows = std::mem::take(&mut self.rows);
        let metrics = std::mem::take(&mut self.metrics);
        let spans = std::mem::take(&mut self.spans);
        let records = metrics.len() + spans.len();

        let mut delivered = 0;
        if !metrics.is_empty() {
            delivered += exporter.send_metrics(metrics).await;
        }
        if !spans.is_empty() {
            delivered += exporter.send_spans(spans).await;
        }

        SendReport {
            rows,
            records,
            delivered,
        }
    }
}

/// Routes streamed rows through an adapter into a sink
pub struct ResultDispatcher<'a> {
    adapter: &'a Adapter,
    resources: &'a ResourceHelper,
    sink: &'a mut RecordSink,
}

impl<'a> ResultDispatcher<'a> {
    pub fn new(adapter: &'a Adapter, resources: &'a ResourceHelper, sink: &'a mut RecordSink) -> Self {
        Self {
            adapter,
            resources,
            sink,
        }
    }

    pub fn handle_row(&mut self, row: &Row) -> Result<(), AdaptError> {
        let adapted = self.adapter.adapt(self.resources, row)?;
        self.sink.push(adapted);
        Ok(())
    }

    /// Consume the whole stream, stopping at the first engine or adapter error
    pub async fn drain(&mut self, mut rows: RowStream) -> Result<usize, CycleError> {
        let mut handled = 0;
        while let Some(row) = rows.next().await {
            self.handle_row(&row?)?;
            handled += 1;
        }
        Ok(handled)
    }
}
