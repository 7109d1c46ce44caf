use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;

use super::sink::{RecordSink, ResultDispatcher, SendReport};
use super::CycleError;
use crate::adapter::{Adapter, ResourceHelper};
use crate::engine::QueryEngine;
use crate::exporter::Exporter;

/// Wall-clock budget for executing a script and streaming its rows
pub const CYCLE_TIMEOUT: Duration = Duration::from_secs(9);

/// Pause before restarting a worker whose cycle crashed
pub const RECOVERY_DELAY: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSettings {
    pub cycle_timeout: Duration,
    pub recovery_delay: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            cycle_timeout: CYCLE_TIMEOUT,
            recovery_delay: RECOVERY_DELAY,
        }
    }
}

/// A cycle task that did not return normally
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CycleFault {
    #[error("Cycle panicked: {0}")]
    Panicked(String),

    #[error("Cycle task was cancelled")]
    Cancelled,
}

impl From<JoinError> for CycleFault {
    fn from(err: JoinError) -> Self {
        if !err.is_panic() {
            return CycleFault::Cancelled;
        }
        let payload = err.into_panic();
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        CycleFault::Panicked(message)
    }
}

/// Runs one adapter's collect-export loop
///
/// Cycles are strictly sequential. Each one runs as its own task so that a
/// panic takes down only that cycle; the loop then waits out the recovery
/// delay and starts over with an empty sink.
pub struct CollectionWorker {
    adapter: Adapter,
    engine: Arc<dyn QueryEngine>,
    resources: Arc<ResourceHelper>,
    exporter: Exporter,
    settings: WorkerSettings,
}

impl CollectionWorker {
    pub fn new(
        adapter: Adapter,
        engine: Arc<dyn QueryEngine>,
        resources: Arc<ResourceHelper>,
        exporter: Exporter,
    ) -> Self {
        Self {
            adapter,
            engine,
            resources,
            exporter,
            settings: WorkerSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: WorkerSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Spawn the loop. It exits once `shutdown` turns true, after finishing
    /// any cycle already in flight.
    pub fn start(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(Arc::new(self).run(shutdown))
    }

    async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let id = self.adapter.id();
        tracing::info!(
            adapter = id,
            interval = ?self.adapter.interval(),
            "Collection worker started"
        );

        let mut sink = RecordSink::new();

        while !*shutdown.borrow() {
            let started = Instant::now();

            let worker = Arc::clone(&self);
            let cycle = tokio::spawn(async move {
                let outcome = worker.run_cycle(&mut sink).await;
                (sink, outcome)
            });

            match cycle.await {
                Ok((returned, outcome)) => {
                    sink = returned;
                    self.log_outcome(outcome, started.elapsed());
                }
                Err(e) => {
                    let fault = CycleFault::from(e);
                    tracing::error!(
                        adapter = id,
                        error = %fault,
                        delay = ?self.settings.recovery_delay,
                        "Collection cycle crashed, restarting"
                    );
                    sink = RecordSink::new();
                    if wait_for_shutdown(&mut shutdown, self.settings.recovery_delay).await {
                        break;
                    }
                    continue;
                }
            }

            if *shutdown.borrow() {
                break;
            }

            let elapsed = started.elapsed();
            let pause = remaining(self.adapter.interval(), elapsed);
            if pause.is_zero() {
                tracing::warn!(
                    adapter = id,
                    elapsed = ?elapsed,
                    interval = ?self.adapter.interval(),
                    "Cycle overran its interval, skipping sleep"
                );
            }
            if wait_for_shutdown(&mut shutdown, pause).await {
                break;
            }
        }

        tracing::info!(adapter = id, "Collection worker stopped");
    }

    /// Collect under the cycle budget, then flush. Partial results of a
    /// failed or timed-out collection are discarded.
    async fn run_cycle(&self, sink: &mut RecordSink) -> Result<SendReport, CycleError> {
        let budget = self.settings.cycle_timeout;

        let collected = tokio::time::timeout(budget, self.collect(sink)).await;
        match collected {
            Ok(Ok(_)) => Ok(sink.send(&self.exporter).await),
            Ok(Err(e)) => {
                sink.clear();
                Err(e)
            }
            Err(_) => {
                sink.clear();
                Err(CycleError::Timeout(budget))
            }
        }
    }

    async fn collect(&self, sink: &mut RecordSink) -> Result<usize, CycleError> {
        let rows = self.engine.execute(self.adapter.script()).await?;
        ResultDispatcher::new(&self.adapter, &self.resources, sink)
            .drain(rows)
            .await
    }

    fn log_outcome(&self, outcome: Result<SendReport, CycleError>, elapsed: Duration) {
        let id = self.adapter.id();
        match outcome {
            Ok(report) if report.rows == 0 => {
                tracing::debug!(adapter = id, elapsed = ?elapsed, "No rows this cycle");
            }
            Ok(report) => {
                if report.delivered < report.records {
                    tracing::warn!(
                        adapter = id,
                        signal = self.adapter.signal().as_str(),
                        records = report.records,
                        delivered = report.delivered,
                        "Some records were not delivered"
                    );
                }
                tracing::info!(
                    adapter = id,
                    rows = report.rows,
                    records = report.records,
                    delivered = report.delivered,
                    elapsed = ?elapsed,
                    "Cycle exported"
                );
            }
            Err(CycleError::Timeout(budget)) => {
                tracing::warn!(
                    adapter = id,
                    budget = ?budget,
                    "Streaming timed out, dropping this cycle's records"
                );
            }
            Err(e) => {
                tracing::error!(adapter = id, error = %e, "Collection cycle failed");
            }
        }
    }
}

fn remaining(interval: Duration, elapsed: Duration) -> Duration {
    interval.saturating_sub(elapsed)
}

/// Sleep unless shutdown arrives first. Returns true on shutdown; a dropped
/// sender counts as shutdown.
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>, duration: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        _ = shutdown.wait_for(|stop| *stop) => true,
    }
}
