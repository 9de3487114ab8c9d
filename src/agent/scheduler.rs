use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::metrics::Metrics;
use crate::models::Order;
use crate::storage::AgentStore;

// ============================================================================
// Scheduler - feeds pending orders into the dispatch queue
// ============================================================================
//
// Polls storage every `poll_interval`, or immediately when the aggregator
// signals that a flush just landed. Each fetched order is pushed into the
// dispatch queue one at a time; the push blocks while the dispatcher is
// saturated, which is the pipeline's only throttle.
//
// ============================================================================

pub(super) struct Scheduler {
    pub(super) store: Arc<dyn AgentStore>,
    pub(super) orders_tx: mpsc::Sender<Order>,
    pub(super) repoll_rx: mpsc::Receiver<()>,
    pub(super) poll_interval: Duration,
    pub(super) fetch_limit: i64,
    pub(super) cancel: CancellationToken,
    pub(super) metrics: Arc<Metrics>,
}

impl Scheduler {
    pub(super) async fn run(mut self) {
        tracing::info!(
            interval_secs = self.poll_interval.as_secs(),
            fetch_limit = self.fetch_limit,
            "Scheduler started"
        );

        let mut ticker = interval_at(
            Instant::now() + self.poll_interval,
            self.poll_interval,
        );
        // A cycle stalled on backpressure must not be replayed as a burst.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                Some(()) = self.repoll_rx.recv() => {
                    if !self.poll("signal").await {
                        break;
                    }
                    // The signal already produced a fresh cycle; push the
                    // next tick out a full interval.
                    ticker.reset();
                }
                _ = ticker.tick() => {
                    if !self.poll("interval").await {
                        break;
                    }
                }
            }
        }

        tracing::info!("Scheduler stopped");
    }

    /// One poll cycle. Returns false when the pipeline shut down mid-push.
    async fn poll(&mut self, trigger: &str) -> bool {
        self.metrics.record_poll_cycle(trigger);

        let orders = match self.store.pending_orders(self.fetch_limit).await {
            Ok(orders) => orders,
            Err(e) => {
                // No same-tick retry; the next tick polls again anyway.
                tracing::error!(error = %e, "Pending order fetch failed");
                return true;
            }
        };

        if orders.is_empty() {
            return true;
        }

        tracing::debug!(count = orders.len(), trigger, "Fetched pending orders");
        self.metrics.orders_fetched.inc_by(orders.len() as u64);

        for order in orders {
            tokio::select! {
                _ = self.cancel.cancelled() => return false,
                sent = self.orders_tx.send(order) => {
                    if sent.is_err() {
                        return false;
                    }
                }
            }
        }

        true
    }
}
