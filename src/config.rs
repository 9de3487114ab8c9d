use std::time::Duration;

use anyhow::{Context, Result};

// ============================================================================
// Configuration
// ============================================================================
//
// The service is configured entirely through the environment, matching how it
// is deployed. Every knob has a compiled default; only the database URI is
// mandatory. A malformed numeric override is a startup error rather than a
// silent fallback.
//
// ============================================================================

const DEFAULT_ACCRUAL_ADDRESS: &str = "http://localhost:8090";
const DEFAULT_METRICS_ADDRESS: &str = "0.0.0.0:9090";

/// Top-level service configuration.
#[derive(Clone, Debug)]
pub struct Config {
    /// Postgres connection string (`DATABASE_URI`).
    pub database_uri: String,
    /// Base URL of the accrual oracle (`ACCRUAL_SYSTEM_ADDRESS`).
    pub accrual_address: String,
    /// Listen address for the metrics/health endpoint (`METRICS_ADDRESS`).
    pub metrics_address: String,
    pub agent: AgentConfig,
}

/// Tunables of the synchronization pipeline.
#[derive(Clone, Debug)]
pub struct AgentConfig {
    /// How often the scheduler polls storage for pending orders.
    pub poll_interval: Duration,
    /// Upper bound on orders fetched per poll cycle.
    pub fetch_limit: i64,
    /// Concurrency slots for in-flight oracle queries.
    pub worker_limit: usize,
    /// Aggregator buffer size that triggers an immediate flush.
    pub batch_size: usize,
    /// Staleness bound: a non-empty buffer is flushed after this long.
    pub flush_interval: Duration,
    /// Per-request timeout on oracle calls.
    pub client_timeout: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3),
            fetch_limit: 10,
            worker_limit: 3,
            batch_size: 3,
            flush_interval: Duration::from_secs(3),
            client_timeout: Duration::from_secs(5),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let database_uri =
            std::env::var("DATABASE_URI").context("DATABASE_URI must be set")?;

        let accrual_address = std::env::var("ACCRUAL_SYSTEM_ADDRESS")
            .unwrap_or_else(|_| DEFAULT_ACCRUAL_ADDRESS.to_string());

        let metrics_address = std::env::var("METRICS_ADDRESS")
            .unwrap_or_else(|_| DEFAULT_METRICS_ADDRESS.to_string());

        let defaults = AgentConfig::default();
        let agent = AgentConfig {
            poll_interval: env_secs("AGENT_POLL_INTERVAL_SECS", defaults.poll_interval)?,
            fetch_limit: env_parse("AGENT_FETCH_LIMIT", defaults.fetch_limit)?,
            worker_limit: env_parse("AGENT_WORKER_LIMIT", defaults.worker_limit)?,
            batch_size: env_parse("AGENT_BATCH_SIZE", defaults.batch_size)?,
            flush_interval: env_secs("AGENT_FLUSH_INTERVAL_SECS", defaults.flush_interval)?,
            client_timeout: env_secs("AGENT_CLIENT_TIMEOUT_SECS", defaults.client_timeout)?,
        };

        Ok(Self {
            database_uri,
            accrual_address,
            metrics_address,
            agent,
        })
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("{name} has an invalid value: {raw:?}")),
        Err(_) => Ok(default),
    }
}

fn env_secs(name: &str, default: Duration) -> Result<Duration> {
    Ok(Duration::from_secs(env_parse(
        name,
        default.as_secs(),
    )?))
}
