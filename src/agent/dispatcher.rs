use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::accrual::{AccrualClient, AccrualResponse};
use crate::metrics::Metrics;
use crate::models::{Order, OrderAccrual, OrderStatus};

// ============================================================================
// Dispatcher + Query Workers - bounded fan-out against the oracle
// ============================================================================
//
// The dispatcher takes one order at a time off the dispatch queue, acquires a
// concurrency slot, and spawns a worker that owns the slot for its whole
// lifetime. When every slot is taken the dispatcher blocks, the dispatch
// queue fills, and the scheduler's push stalls: backpressure all the way up.
//
// ============================================================================

pub(super) struct Dispatcher {
    pub(super) orders_rx: mpsc::Receiver<Order>,
    pub(super) results_tx: mpsc::Sender<OrderAccrual>,
    pub(super) client: AccrualClient,
    pub(super) slots: Arc<Semaphore>,
    pub(super) cancel: CancellationToken,
    pub(super) metrics: Arc<Metrics>,
}

impl Dispatcher {
    pub(super) async fn run(mut self) {
        tracing::info!(
            slots = self.slots.available_permits(),
            "Dispatcher started"
        );

        let mut workers = JoinSet::new();

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                received = self.orders_rx.recv() => {
                    let Some(order) = received else { break };

                    let permit = tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        acquired = self.slots.clone().acquire_owned() => {
                            match acquired {
                                Ok(permit) => permit,
                                Err(_) => break,
                            }
                        }
                    };

                    workers.spawn(query_worker(
                        order,
                        permit,
                        self.client.clone(),
                        self.results_tx.clone(),
                        self.metrics.clone(),
                    ));

                    // Reap whatever already finished so the set stays small.
                    while workers.try_join_next().is_some() {}
                }
            }
        }

        // Let the aggregator drain only after the last worker is done.
        drop(self.results_tx);

        // Workers are never force-killed; the oracle client timeout bounds
        // how long this drain can take.
        while workers.join_next().await.is_some() {}

        tracing::info!("Dispatcher stopped");
    }
}

/// Query the oracle for one order and forward the result if it changes
/// anything. The slot permit travels into this task and is released on drop,
/// exactly once, on every path out.
async fn query_worker(
    order: Order,
    _permit: OwnedSemaphorePermit,
    client: AccrualClient,
    results_tx: mpsc::Sender<OrderAccrual>,
    metrics: Arc<Metrics>,
) {
    metrics.queries_in_flight.inc();

    let started = Instant::now();
    let outcome = client.order_accrual(order.number).await;
    let elapsed = started.elapsed().as_secs_f64();

    match outcome {
        Ok(AccrualResponse::Ready(update)) => {
            metrics.record_oracle_request("ok", elapsed);

            if order.status != OrderStatus::Unknown && order.status != update.status {
                if results_tx.send(update).await.is_ok() {
                    metrics.results_forwarded.inc();
                }
            } else {
                tracing::debug!(order = order.number, "Oracle status unchanged, dropping result");
            }
        }
        Ok(AccrualResponse::NotReady) => {
            metrics.record_oracle_request("no_content", elapsed);
            tracing::debug!(order = order.number, "Oracle has no accrual yet");
        }
        Ok(AccrualResponse::RateLimited(wait)) => {
            metrics.record_oracle_request("rate_limited", elapsed);
            tracing::warn!(
                order = order.number,
                wait_secs = wait.as_secs(),
                "Oracle rate limit hit, worker backing off"
            );
            // The sleep happens here, inside the worker, so only this slot
            // is delayed; the rest of the pipeline keeps moving.
            tokio::time::sleep(wait).await;
        }
        Ok(AccrualResponse::Unavailable) => {
            metrics.record_oracle_request("server_error", elapsed);
            tracing::error!(order = order.number, "Oracle reported an internal error");
        }
        Err(e) => {
            metrics.record_oracle_request("error", elapsed);
            tracing::error!(error = %e, order = order.number, "Oracle query failed");
        }
    }

    metrics.queries_in_flight.dec();
}
