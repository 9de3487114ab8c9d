use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;

use crate::metrics::Metrics;
use crate::models::OrderAccrual;
use crate::storage::AgentStore;

// ============================================================================
// Aggregator - batches forwarded results into storage writes
// ============================================================================
//
// Single-writer buffer: only this loop ever touches it, so no locking. A full
// buffer flushes immediately; a periodic timer flushes whatever is pending so
// low throughput never leaves results stranded. Persistence runs off-loop,
// and a successful write pokes the scheduler to re-poll right away.
//
// ============================================================================

pub(super) struct Aggregator {
    pub(super) store: Arc<dyn AgentStore>,
    pub(super) results_rx: mpsc::Receiver<OrderAccrual>,
    pub(super) repoll_tx: mpsc::Sender<()>,
    pub(super) batch_size: usize,
    pub(super) flush_interval: Duration,
    pub(super) cancel: CancellationToken,
    pub(super) metrics: Arc<Metrics>,
}

impl Aggregator {
    pub(super) async fn run(mut self) {
        tracing::info!(
            batch_size = self.batch_size,
            flush_secs = self.flush_interval.as_secs(),
            "Aggregator started"
        );

        let mut buffer: Vec<OrderAccrual> = Vec::with_capacity(self.batch_size);
        let mut ticker = interval_at(
            Instant::now() + self.flush_interval,
            self.flush_interval,
        );

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                received = self.results_rx.recv() => {
                    let Some(update) = received else { break };

                    buffer.push(update);
                    if buffer.len() >= self.batch_size {
                        self.flush(&mut buffer);
                        ticker.reset();
                    }
                }
                _ = ticker.tick() => {
                    if !buffer.is_empty() {
                        self.flush(&mut buffer);
                    }
                }
            }
        }

        // Whatever is still buffered already cost an oracle round-trip; make
        // one last synchronous attempt to land it before going away.
        if !buffer.is_empty() {
            persist(
                self.store.clone(),
                std::mem::take(&mut buffer),
                self.repoll_tx.clone(),
                self.metrics.clone(),
            )
            .await;
        }

        tracing::info!("Aggregator stopped");
    }

    /// Snapshot and clear the buffer, persisting the snapshot off-loop so a
    /// slow write never stalls result intake.
    fn flush(&self, buffer: &mut Vec<OrderAccrual>) {
        let batch = std::mem::replace(buffer, Vec::with_capacity(self.batch_size));

        tokio::spawn(persist(
            self.store.clone(),
            batch,
            self.repoll_tx.clone(),
            self.metrics.clone(),
        ));
    }
}

async fn persist(
    store: Arc<dyn AgentStore>,
    batch: Vec<OrderAccrual>,
    repoll_tx: mpsc::Sender<()>,
    metrics: Arc<Metrics>,
) {
    let count = batch.len();

    match store.update_order_accruals(&batch).await {
        Ok(()) => {
            metrics.record_flush(count, true);
            tracing::debug!(count, "Flushed accrual batch");

            // Non-blocking: a signal already sitting in the queue guarantees
            // a prompt re-poll, so dropping this one loses nothing.
            let _ = repoll_tx.try_send(());
        }
        Err(e) => {
            // The source-of-truth status never advanced, so these orders are
            // re-fetched and re-queried on the next poll cycle.
            metrics.record_flush(count, false);
            tracing::error!(error = %e, count, "Accrual batch write failed, discarding");
        }
    }
}
