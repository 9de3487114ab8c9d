// Private module declaration
mod server;

use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
};

// Re-export for public API
pub use server::start_metrics_server;

// ============================================================================
// Metrics Module - Prometheus metrics for observability
// ============================================================================
//
// Provides metrics for every stage of the synchronization pipeline:
// - Scheduler poll cycles and fetched orders
// - Oracle queries (outcome, latency, in-flight count)
// - Forwarded results and aggregator flushes
//
// All metrics are registered with Prometheus and can be scraped via /metrics
// ============================================================================

/// Central metrics registry for the entire application
pub struct Metrics {
    registry: Registry,

    // Scheduler Metrics
    pub poll_cycles: IntCounterVec,
    pub orders_fetched: IntCounter,

    // Oracle Query Metrics
    pub oracle_requests: IntCounterVec,
    pub oracle_request_duration: Histogram,
    pub queries_in_flight: IntGauge,
    pub results_forwarded: IntCounter,

    // Aggregator Metrics
    pub flushes: IntCounterVec,
    pub orders_persisted: IntCounter,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        // Scheduler Metrics
        let poll_cycles = IntCounterVec::new(
            Opts::new("accrual_poll_cycles_total", "Poll cycles by trigger"),
            &["trigger"],
        )?;
        registry.register(Box::new(poll_cycles.clone()))?;

        let orders_fetched = IntCounter::new(
            "accrual_orders_fetched_total",
            "Pending orders handed to the dispatcher",
        )?;
        registry.register(Box::new(orders_fetched.clone()))?;

        // Oracle Query Metrics
        let oracle_requests = IntCounterVec::new(
            Opts::new("accrual_oracle_requests_total", "Oracle queries by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(oracle_requests.clone()))?;

        let oracle_request_duration = Histogram::with_opts(
            HistogramOpts::new(
                "accrual_oracle_request_duration_seconds",
                "Oracle query duration",
            )
            .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        )?;
        registry.register(Box::new(oracle_request_duration.clone()))?;

        let queries_in_flight = IntGauge::new(
            "accrual_queries_in_flight",
            "Oracle queries currently holding a concurrency slot",
        )?;
        registry.register(Box::new(queries_in_flight.clone()))?;

        let results_forwarded = IntCounter::new(
            "accrual_results_forwarded_total",
            "Status transitions forwarded to the aggregator",
        )?;
        registry.register(Box::new(results_forwarded.clone()))?;

        // Aggregator Metrics
        let flushes = IntCounterVec::new(
            Opts::new("accrual_flushes_total", "Aggregator flushes by result"),
            &["result"],
        )?;
        registry.register(Box::new(flushes.clone()))?;

        let orders_persisted = IntCounter::new(
            "accrual_orders_persisted_total",
            "Order status transitions written to storage",
        )?;
        registry.register(Box::new(orders_persisted.clone()))?;

        Ok(Self {
            registry,
            poll_cycles,
            orders_fetched,
            oracle_requests,
            oracle_request_duration,
            queries_in_flight,
            results_forwarded,
            flushes,
            orders_persisted,
        })
    }

    /// Get the Prometheus registry for exposing metrics via HTTP
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Helper to record one poll cycle
    pub fn record_poll_cycle(&self, trigger: &str) {
        self.poll_cycles.with_label_values(&[trigger]).inc();
    }

    /// Helper to record an oracle query outcome with its duration
    pub fn record_oracle_request(&self, outcome: &str, duration_secs: f64) {
        self.oracle_requests.with_label_values(&[outcome]).inc();
        self.oracle_request_duration.observe(duration_secs);
    }

    /// Helper to record a flush outcome
    pub fn record_flush(&self, batch_size: usize, success: bool) {
        if success {
            self.flushes.with_label_values(&["ok"]).inc();
            self.orders_persisted.inc_by(batch_size as u64);
        } else {
            self.flushes.with_label_values(&["error"]).inc();
        }
    }
}
