//! Load harness for the agent bridge client.
//!
//! Measures what multiplexing buys: many invokes in flight over one
//! connection, each timed from send to terminal response. Live tests run
//! against a real bridge; the same harness is driven in-process through the
//! memory transport.

use std::time::{Duration, Instant};

use agentlink::{AgentClient, Args, ClientConfig, ClientError};
use futures_util::StreamExt;
use futures_util::stream;

/// Runtime configuration for perf tests, loaded from environment variables.
#[derive(Clone, Debug)]
pub struct PerfConfig {
    /// WebSocket URL of the bridge under test (e.g. `"ws://127.0.0.1:3333"`).
    pub url: String,
    /// Credential attached to every request.
    pub token: Option<String>,
    /// Command issued by every request. Should be cheap and side-effect free.
    pub command: String,
    /// Total number of requests per run.
    pub requests: usize,
    /// Maximum requests in flight at once.
    pub concurrency: usize,
}

impl Default for PerfConfig {
    fn default() -> Self {
        Self {
            url: agentlink::bridge_url(agentlink::DEFAULT_HOST, agentlink::DEFAULT_PORT),
            token: None,
            command: "get_app_version".to_owned(),
            requests: 200,
            concurrency: 16,
        }
    }
}

impl PerfConfig {
    /// Load perf config from environment with sane defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            url: env_string("PERF_URL").unwrap_or(defaults.url),
            token: env_string("PERF_TOKEN"),
            command: env_string("PERF_COMMAND").unwrap_or(defaults.command),
            requests: env_usize("PERF_REQUESTS", defaults.requests),
            concurrency: env_usize("PERF_CONCURRENCY", defaults.concurrency).max(1),
        }
    }

    /// Client configuration for the bridge under test.
    #[must_use]
    pub fn client_config(&self) -> ClientConfig {
        let config = ClientConfig::new(self.url.clone());
        match &self.token {
            Some(token) => config.with_token(token.clone()),
            None => config,
        }
    }
}

/// Error type for perf harness operations.
#[derive(Debug, thiserror::Error)]
pub enum PerfError {
    /// A client call failed during the run.
    #[error("request {index} failed: {source}")]
    Request {
        index: usize,
        #[source]
        source: ClientError,
    },
    /// Connecting or tearing down the client failed.
    #[error(transparent)]
    Client(#[from] ClientError),
}

/// Aggregated latency metrics in milliseconds.
#[derive(Clone, Debug)]
pub struct LatencyMetrics {
    /// Total number of operations measured.
    pub count: usize,
    /// Minimum observed latency in milliseconds.
    pub min_ms: f64,
    /// Maximum observed latency in milliseconds.
    pub max_ms: f64,
    /// Arithmetic mean latency in milliseconds.
    pub avg_ms: f64,
    /// Median (50th percentile) latency in milliseconds.
    pub p50_ms: f64,
    /// 95th percentile latency in milliseconds.
    pub p95_ms: f64,
    /// 99th percentile latency in milliseconds.
    pub p99_ms: f64,
    /// Throughput in operations per second.
    pub ops_per_sec: f64,
}

impl LatencyMetrics {
    /// Build latency metrics from operation durations measured back to back.
    #[must_use]
    pub fn from_durations(durations: &[Duration]) -> Self {
        let serial = durations.iter().sum::<Duration>();
        Self::from_run(durations, serial)
    }

    /// Build latency metrics for operations that overlapped in time.
    /// Throughput is taken against `wall`, not the summed latencies.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn from_run(durations: &[Duration], wall: Duration) -> Self {
        if durations.is_empty() {
            return Self {
                count: 0,
                min_ms: 0.0,
                max_ms: 0.0,
                avg_ms: 0.0,
                p50_ms: 0.0,
                p95_ms: 0.0,
                p99_ms: 0.0,
                ops_per_sec: 0.0,
            };
        }

        let mut ms = durations
            .iter()
            .map(|d| d.as_secs_f64() * 1_000.0)
            .collect::<Vec<_>>();
        ms.sort_by(f64::total_cmp);

        let count = ms.len();
        Self {
            count,
            min_ms: ms[0],
            max_ms: ms[count - 1],
            avg_ms: ms.iter().sum::<f64>() / count as f64,
            p50_ms: percentile(&ms, 0.50),
            p95_ms: percentile(&ms, 0.95),
            p99_ms: percentile(&ms, 0.99),
            ops_per_sec: count as f64 / wall.as_secs_f64().max(1e-9),
        }
    }
}

/// Issue `config.requests` invokes one after another.
///
/// # Errors
///
/// Returns the first failing request.
pub async fn run_sequential(
    client: &AgentClient,
    config: &PerfConfig,
) -> Result<LatencyMetrics, PerfError> {
    let mut latencies = Vec::with_capacity(config.requests);
    for index in 0..config.requests {
        latencies.push(timed_invoke(client, &config.command, index).await?);
    }
    Ok(LatencyMetrics::from_durations(&latencies))
}

/// Issue `config.requests` invokes with up to `config.concurrency` in flight
/// over the client's single connection.
///
/// # Errors
///
/// Returns the first failing request; the others still run to completion.
pub async fn run_concurrent(
    client: &AgentClient,
    config: &PerfConfig,
) -> Result<LatencyMetrics, PerfError> {
    let started = Instant::now();
    let outcomes = stream::iter(0..config.requests)
        .map(|index| timed_invoke(client, &config.command, index))
        .buffer_unordered(config.concurrency.max(1))
        .collect::<Vec<_>>()
        .await;
    let wall = started.elapsed();

    let latencies = outcomes.into_iter().collect::<Result<Vec<_>, _>>()?;
    Ok(LatencyMetrics::from_run(&latencies, wall))
}

async fn timed_invoke(
    client: &AgentClient,
    command: &str,
    index: usize,
) -> Result<Duration, PerfError> {
    let started = Instant::now();
    client
        .invoke(command, Args::new())
        .await
        .map_err(|source| PerfError::Request { index, source })?;
    Ok(started.elapsed())
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(default)
}

#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn percentile(sorted_values: &[f64], p: f64) -> f64 {
    if sorted_values.is_empty() {
        return 0.0;
    }

    let index = ((sorted_values.len() - 1) as f64 * p).round() as usize;
    sorted_values[index.min(sorted_values.len() - 1)]
}

#[cfg(test)]
#[path = "e2e_perf_test.rs"]
mod tests;
