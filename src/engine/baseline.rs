//! Baseline computation over windows of health samples.
//!
//! A baseline is an immutable statistical snapshot: mean and sample
//! standard deviation of latency, empirical p50/p95/p99 by linear
//! interpolation at rank `(n - 1) * p / 100`, the unhealthy fraction, and
//! the observed request rate. Baselines carry an expiry horizon; only the
//! most recently computed unexpired one is "active" for a service.

use super::error::{EngineError, Result};
use super::models::{Baseline, HealthSample};
use super::store::EngineStore;
use chrono::{Duration, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Defaults for baseline computation.
pub mod constants {
    /// Most recent samples considered per window.
    pub const DEFAULT_MAX_SAMPLES: usize = 500;

    /// Below this the window is not statistically usable.
    pub const DEFAULT_MIN_SAMPLES: usize = 30;

    /// Baseline validity horizon.
    pub const DEFAULT_TTL_SECONDS: i64 = 3600;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineConfig {
    /// Cap on samples pulled per computation (most recent first).
    pub max_samples: usize,

    /// Minimum samples required; must be > 0.
    pub min_samples: usize,

    /// Seconds until a computed baseline expires.
    pub ttl_seconds: i64,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            max_samples: constants::DEFAULT_MAX_SAMPLES,
            min_samples: constants::DEFAULT_MIN_SAMPLES,
            ttl_seconds: constants::DEFAULT_TTL_SECONDS,
        }
    }
}

/// Pure statistics over a sample window. Split out so the computation is
/// trivially deterministic given a fixed input.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowStats {
    pub sample_count: usize,
    pub mean_latency_ms: f64,
    pub stddev_latency_ms: f64,
    pub p50_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub p99_latency_ms: f64,
    pub error_rate: f64,
    pub request_rate: f64,
}

/// Empirical percentile with linear interpolation between closest ranks.
/// Expects `sorted` ascending.
fn percentile(sorted: &[f64], pct: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let rank = (n - 1) as f64 * pct / 100.0;
            let lo = rank.floor() as usize;
            let hi = rank.ceil() as usize;
            if lo == hi {
                sorted[lo]
            } else {
                sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
            }
        }
    }
}

/// Summarize a window. `span_fallback_secs` is used for the request rate
/// when the observed span collapses to zero.
pub fn summarize(samples: &[HealthSample], span_fallback_secs: f64) -> WindowStats {
    let count = samples.len();
    let mut latencies: Vec<f64> = samples.iter().map(|s| s.latency_ms).collect();
    latencies.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let mean = if count > 0 {
        latencies.iter().sum::<f64>() / count as f64
    } else {
        0.0
    };

    // Sample standard deviation (n - 1 denominator).
    let stddev = if count > 1 {
        let sum_sq: f64 = latencies.iter().map(|l| (l - mean).powi(2)).sum();
        (sum_sq / (count - 1) as f64).sqrt()
    } else {
        0.0
    };

    let unhealthy = samples.iter().filter(|s| !s.healthy).count();
    let error_rate = if count > 0 {
        unhealthy as f64 / count as f64
    } else {
        0.0
    };

    let span_secs = match (samples.first(), samples.last()) {
        (Some(first), Some(last)) => {
            let span = (last.checked_at - first.checked_at).num_milliseconds() as f64 / 1000.0;
            if span > 0.0 {
                span
            } else {
                span_fallback_secs
            }
        }
        _ => span_fallback_secs,
    };
    let request_rate = if span_secs > 0.0 {
        count as f64 / span_secs
    } else {
        0.0
    };

    WindowStats {
        sample_count: count,
        mean_latency_ms: mean,
        stddev_latency_ms: stddev,
        p50_latency_ms: percentile(&latencies, 50.0),
        p95_latency_ms: percentile(&latencies, 95.0),
        p99_latency_ms: percentile(&latencies, 99.0),
        error_rate,
        request_rate,
    }
}

/// Computes and stores baselines. Writes are append-only: concurrent
/// recomputation for the same service is last-writer-wins, which is safe
/// because baselines are immutable snapshots with independent expiry.
#[derive(Debug, Clone)]
pub struct BaselineCalculator {
    store: Arc<EngineStore>,
    config: BaselineConfig,
}

impl BaselineCalculator {
    pub fn new(store: Arc<EngineStore>, config: BaselineConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &BaselineConfig {
        &self.config
    }

    /// Compute a baseline from the most recent samples within `window`
    /// (a lookback from now). Fails with `InsufficientSamples` when fewer
    /// than the configured minimum exist.
    pub async fn compute_baseline(&self, service_id: Uuid, window: Duration) -> Result<Baseline> {
        if self.config.min_samples == 0 {
            return Err(EngineError::Configuration(
                "min_samples must be greater than zero".to_string(),
            ));
        }

        let now = Utc::now();
        let samples = self
            .store
            .samples_in_window(service_id, now - window, now, self.config.max_samples)
            .await;

        if samples.len() < self.config.min_samples {
            return Err(EngineError::InsufficientSamples {
                service_id,
                required: self.config.min_samples,
                actual: samples.len(),
            });
        }

        let stats = summarize(&samples, window.num_seconds() as f64);
        let baseline = Baseline {
            id: Uuid::new_v4(),
            service_id,
            computed_at: now,
            expires_at: now + Duration::seconds(self.config.ttl_seconds),
            sample_count: stats.sample_count,
            mean_latency_ms: stats.mean_latency_ms,
            stddev_latency_ms: stats.stddev_latency_ms,
            p50_latency_ms: stats.p50_latency_ms,
            p95_latency_ms: stats.p95_latency_ms,
            p99_latency_ms: stats.p99_latency_ms,
            error_rate: stats.error_rate,
            request_rate: stats.request_rate,
        };

        info!(
            %service_id,
            sample_count = baseline.sample_count,
            p95 = baseline.p95_latency_ms,
            error_rate = baseline.error_rate,
            "baseline computed"
        );
        self.store.insert_baseline(baseline.clone()).await;
        Ok(baseline)
    }

    /// Most recently computed baseline with `expires_at > now`. Callers
    /// must treat `NotFound` as "cannot yet evaluate anomalies".
    pub async fn get_active_baseline(&self, service_id: Uuid) -> Result<Baseline> {
        self.store
            .active_baseline(service_id, Utc::now())
            .await
            .ok_or(EngineError::NotFound {
                kind: "active baseline",
                id: service_id.to_string(),
            })
    }

    /// Refresh baselines for every registered service concurrently.
    /// Services without enough samples are skipped, not failed.
    pub async fn refresh_all(&self, window: Duration) -> Vec<Baseline> {
        let services = self.store.list_services().await;
        let computations = services
            .iter()
            .map(|service| self.compute_baseline(service.id, window));

        join_all(computations)
            .await
            .into_iter()
            .filter_map(|result| match result {
                Ok(baseline) => Some(baseline),
                Err(EngineError::InsufficientSamples {
                    service_id, actual, ..
                }) => {
                    debug!(%service_id, samples = actual, "skipping baseline, too few samples");
                    None
                }
                Err(err) => {
                    debug!(error = %err, "baseline refresh failed");
                    None
                }
            })
            .collect()
    }
}
