mod aggregator;
mod dispatcher;
mod scheduler;

use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::accrual::AccrualClient;
use crate::config::AgentConfig;
use crate::metrics::Metrics;
use crate::storage::AgentStore;

use aggregator::Aggregator;
use dispatcher::Dispatcher;
use scheduler::Scheduler;

// ============================================================================
// Accrual Synchronization Agent
// ============================================================================
//
// Three long-lived loops wired together by bounded channels:
//
//   storage -> Scheduler -> dispatch queue -> Dispatcher -> query workers
//           -> result queue -> Aggregator -> storage
//                                  |
//                                  +--> re-poll signal --> Scheduler
//
// The loops share nothing but the channels and one cancellation token.
// Dropping the dispatch sender ends the dispatcher, and the dispatcher
// dropping the result sender (after draining its workers) ends the
// aggregator, so shutdown cascades in pipeline order.
//
// ============================================================================

pub struct Agent {
    store: Arc<dyn AgentStore>,
    client: AccrualClient,
    config: AgentConfig,
    metrics: Arc<Metrics>,
}

impl Agent {
    pub fn new(
        store: Arc<dyn AgentStore>,
        client: AccrualClient,
        config: AgentConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            client,
            config,
            metrics,
        }
    }

    /// Spawn the pipeline loops. The returned handle joins them all; workers
    /// spawned by the dispatcher are drained before its loop reports done.
    pub fn start(self, cancel: CancellationToken) -> AgentHandle {
        // Capacity 1 keeps the dispatch queue close to a rendezvous: the
        // scheduler feels backpressure as soon as the dispatcher stalls.
        let (orders_tx, orders_rx) = mpsc::channel(1);
        let (results_tx, results_rx) = mpsc::channel(self.config.batch_size.max(1));
        let (repoll_tx, repoll_rx) = mpsc::channel(1);

        let scheduler = Scheduler {
            store: self.store.clone(),
            orders_tx,
            repoll_rx,
            poll_interval: self.config.poll_interval,
            fetch_limit: self.config.fetch_limit,
            cancel: cancel.clone(),
            metrics: self.metrics.clone(),
        };

        let dispatcher = Dispatcher {
            orders_rx,
            results_tx,
            client: self.client,
            slots: Arc::new(Semaphore::new(self.config.worker_limit)),
            cancel: cancel.clone(),
            metrics: self.metrics.clone(),
        };

        let aggregator = Aggregator {
            store: self.store,
            results_rx,
            repoll_tx,
            batch_size: self.config.batch_size,
            flush_interval: self.config.flush_interval,
            cancel,
            metrics: self.metrics,
        };

        AgentHandle {
            tasks: vec![
                tokio::spawn(scheduler.run()),
                tokio::spawn(dispatcher.run()),
                tokio::spawn(aggregator.run()),
            ],
        }
    }
}

pub struct AgentHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl AgentHandle {
    /// Wait for every pipeline loop (and transitively every query worker) to
    /// finish.
    pub async fn join(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Pipeline task panicked");
            }
        }
    }
}

// ============================================================================
// Integration Tests
// ============================================================================
