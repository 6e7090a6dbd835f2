use crate::engine::anomaly::AnomalyConfig;
use crate::engine::baseline::BaselineConfig;
use crate::engine::correlation::CorrelationConfig;
use crate::engine::similarity::SimilarityConfig;
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Baseline computation settings
    pub baseline: BaselineConfig,

    /// Anomaly scoring and severity mapping settings
    pub anomaly: AnomalyConfig,

    /// Blast-radius and deployment correlation settings
    pub correlation: CorrelationConfig,

    /// Incident memory index settings
    pub similarity: SimilarityConfig,

    /// Budget for the external outlier model before evaluation degrades
    /// to local statistics
    pub outlier_timeout_ms: u64,

    /// Log level (error, warn, info, debug, trace)
    pub log_level: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            baseline: BaselineConfig::default(),
            anomaly: AnomalyConfig::default(),
            correlation: CorrelationConfig::default(),
            similarity: SimilarityConfig::default(),
            outlier_timeout_ms: 500,
            log_level: "info".to_string(),
        }
    }
}

fn env_override<T: FromStr>(key: &str, target: &mut T) {
    if let Ok(raw) = env::var(key) {
        if let Ok(parsed) = raw.parse::<T>() {
            *target = parsed;
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables, starting from the
    /// defaults. Unset or unparseable variables keep their defaults.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok(); // Load .env file if present

        let mut config = Self::default();

        env_override("SENTINEL_BASELINE_MAX_SAMPLES", &mut config.baseline.max_samples);
        env_override("SENTINEL_BASELINE_MIN_SAMPLES", &mut config.baseline.min_samples);
        env_override("SENTINEL_BASELINE_TTL_SECONDS", &mut config.baseline.ttl_seconds);

        env_override(
            "SENTINEL_OUTLIER_CRITICAL_THRESHOLD",
            &mut config.anomaly.outlier_critical_threshold,
        );
        env_override(
            "SENTINEL_DEVIATION_CRITICAL_THRESHOLD",
            &mut config.anomaly.deviation_critical_threshold,
        );
        env_override(
            "SENTINEL_CRITICALITY_THRESHOLD",
            &mut config.anomaly.criticality_threshold,
        );
        env_override("SENTINEL_DEVIATION_CAP", &mut config.anomaly.deviation_cap);
        env_override("SENTINEL_SEVERITY_P0_CUTOFF", &mut config.anomaly.severity_p0_cutoff);
        env_override("SENTINEL_SEVERITY_P1_CUTOFF", &mut config.anomaly.severity_p1_cutoff);
        env_override("SENTINEL_SEVERITY_P2_CUTOFF", &mut config.anomaly.severity_p2_cutoff);

        env_override(
            "SENTINEL_DEPLOYMENT_WINDOW_SECS",
            &mut config.correlation.deployment_window_secs,
        );
        env_override(
            "SENTINEL_REGRESSION_RATIO",
            &mut config.correlation.regression_ratio,
        );

        env_override(
            "SENTINEL_SIMILARITY_DIMENSIONS",
            &mut config.similarity.dimensions,
        );
        env_override(
            "SENTINEL_SIMILARITY_THRESHOLD",
            &mut config.similarity.threshold,
        );
        env_override("SENTINEL_SIMILARITY_LIMIT", &mut config.similarity.limit);

        env_override("SENTINEL_OUTLIER_TIMEOUT_MS", &mut config.outlier_timeout_ms);
        env_override("SENTINEL_LOG_LEVEL", &mut config.log_level);

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.baseline.min_samples == 0 {
            bail!("baseline.min_samples must be greater than zero");
        }
        if self.baseline.max_samples < self.baseline.min_samples {
            bail!("baseline.max_samples must be at least baseline.min_samples");
        }
        if self.baseline.ttl_seconds <= 0 {
            bail!("baseline.ttl_seconds must be positive");
        }
        if !(-1.0..=0.0).contains(&self.anomaly.outlier_critical_threshold) {
            bail!("anomaly.outlier_critical_threshold must lie in [-1, 0]");
        }
        if self.anomaly.deviation_cap <= 0.0 {
            bail!("anomaly.deviation_cap must be positive");
        }
        if self.anomaly.severity_p0_cutoff <= self.anomaly.severity_p1_cutoff
            || self.anomaly.severity_p1_cutoff <= self.anomaly.severity_p2_cutoff
        {
            bail!("severity cutoffs must be strictly decreasing from P0 to P2");
        }
        if self.correlation.regression_ratio <= 1.0 {
            bail!("correlation.regression_ratio must exceed 1.0");
        }
        if self.similarity.dimensions == 0 {
            bail!("similarity.dimensions must be greater than zero");
        }
        if !(0.0..=1.0).contains(&self.similarity.threshold) {
            bail!("similarity.threshold must lie in [0, 1]");
        }
        Ok(())
    }
}
