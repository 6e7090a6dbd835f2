//! Anomaly scoring against active baselines.
//!
//! Each evaluation compares one live sample (plus an optional external
//! outlier score) to the service's active baseline. Deviation is measured
//! in standard deviations from the baseline mean; the anomaly type is
//! whichever of latency, error rate, or traffic shows the strongest
//! relative signal over a short trailing window. Critical anomalies open
//! an incident for the service, or enrich the one already open — the
//! check-then-create runs atomically per incident table, so concurrent
//! evaluations for the same service can never produce duplicate open
//! incidents.

use super::error::{EngineError, Result};
use super::models::{Anomaly, AnomalyType, Baseline, HealthSample, Incident, IncidentStatus, Severity};
use super::store::EngineStore;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyConfig {
    /// Outlier scores at or below this are critical on their own
    /// (isolation-style: lower is more anomalous).
    pub outlier_critical_threshold: f64,

    /// Deviation (in stddevs) beyond which a high-criticality service's
    /// anomaly is critical.
    pub deviation_critical_threshold: f64,

    /// Service criticality score above which the deviation rule applies.
    pub criticality_threshold: f64,

    /// Deviations at or beyond the cap saturate the severity mapping.
    pub deviation_cap: f64,

    /// Severity cut points over the composite score
    /// `criticality * min(deviation / deviation_cap, 1)`.
    pub severity_p0_cutoff: f64,
    pub severity_p1_cutoff: f64,
    pub severity_p2_cutoff: f64,

    /// Trailing window used to classify error-rate and traffic deviation.
    pub classification_window_secs: i64,

    /// Error-rate delta treated as one unit of anomaly signal.
    pub error_rate_margin: f64,

    /// Relative request-rate swing treated as one unit of anomaly signal.
    pub traffic_margin: f64,

    /// Two signals within this relative margin of each other classify as
    /// `mixed`.
    pub mixed_margin: f64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            outlier_critical_threshold: -0.5,
            deviation_critical_threshold: 3.0,
            criticality_threshold: 0.7,
            deviation_cap: 6.0,
            severity_p0_cutoff: 0.75,
            severity_p1_cutoff: 0.5,
            severity_p2_cutoff: 0.25,
            classification_window_secs: 300,
            error_rate_margin: 0.2,
            traffic_margin: 0.5,
            mixed_margin: 0.1,
        }
    }
}

/// Outcome of pushing a critical anomaly into the incident table.
#[derive(Debug, Clone)]
pub struct EscalationOutcome {
    pub incident: Incident,
    /// False when an already-open incident absorbed the anomaly.
    pub created: bool,
}

#[derive(Debug, Clone)]
pub struct AnomalyScorer {
    store: Arc<EngineStore>,
    config: AnomalyConfig,
}

impl AnomalyScorer {
    pub fn new(store: Arc<EngineStore>, config: AnomalyConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &AnomalyConfig {
        &self.config
    }

    /// Score one sample against a baseline. The anomaly record is stored
    /// and returned; whether it spawns an incident is `open_or_enrich`'s
    /// job.
    pub async fn evaluate(
        &self,
        sample: &HealthSample,
        baseline: &Baseline,
        outlier_score: Option<f64>,
    ) -> Result<Anomaly> {
        if sample.service_id != baseline.service_id {
            return Err(EngineError::Validation(format!(
                "sample for service {} evaluated against baseline for {}",
                sample.service_id, baseline.service_id
            )));
        }
        if let Some(score) = outlier_score {
            if !(-1.0..=1.0).contains(&score) {
                return Err(EngineError::Validation(format!(
                    "outlier score {score} outside [-1, 1]"
                )));
            }
        }

        let deviation_score = self.deviation_score(sample.latency_ms, baseline);
        let (anomaly_type, observed_value, baseline_value) =
            self.classify(sample, baseline, deviation_score).await;

        let service = self.store.get_service(sample.service_id).await?;
        let is_critical = outlier_score
            .map(|score| score <= self.config.outlier_critical_threshold)
            .unwrap_or(false)
            || (service.criticality > self.config.criticality_threshold
                && deviation_score > self.config.deviation_critical_threshold);

        let anomaly = Anomaly {
            id: Uuid::new_v4(),
            service_id: sample.service_id,
            anomaly_type,
            observed_value,
            baseline_value,
            deviation_score,
            outlier_score,
            is_critical,
            incident_id: None,
            detected_at: Utc::now(),
        };

        debug!(
            service_id = %anomaly.service_id,
            %anomaly_type,
            deviation = deviation_score,
            critical = is_critical,
            "sample evaluated"
        );
        self.store.insert_anomaly(anomaly.clone()).await;
        Ok(anomaly)
    }

    /// For a critical anomaly, open a new incident or enrich the open one.
    /// Non-critical anomalies escalate to nothing.
    pub async fn open_or_enrich(
        &self,
        anomaly: &Anomaly,
        sample: &HealthSample,
    ) -> Result<Option<EscalationOutcome>> {
        if !anomaly.is_critical {
            return Ok(None);
        }

        let service = self.store.get_service(anomaly.service_id).await?;
        let severity = self.map_severity(service.criticality, anomaly.deviation_score);
        let confidence = self.confidence(anomaly);

        let candidate = Incident {
            id: Uuid::new_v4(),
            service_id: anomaly.service_id,
            status: IncidentStatus::Detecting,
            severity,
            confidence,
            failure_type: Some(anomaly.anomaly_type),
            consecutive_failures: 1,
            blast_radius: 1,
            affected_services: HashSet::new(),
            similar_incidents: Vec::new(),
            deployment_id: None,
            suggested_rollback: false,
            assigned_to: None,
            failure_started_at: sample.checked_at,
            detected_at: anomaly.detected_at,
            acknowledged_at: None,
            resolved_at: None,
            embedding: None,
            root_cause: None,
            remediation: None,
        };

        let (incident, created) = self.store.open_or_increment_incident(candidate).await;
        self.store
            .attach_incident_to_anomaly(anomaly.id, incident.id)
            .await?;

        if created {
            info!(
                incident_id = %incident.id,
                service = %service.name,
                %severity,
                "critical anomaly opened incident"
            );
        }
        Ok(Some(EscalationOutcome { incident, created }))
    }

    /// Standard deviations from the baseline mean. A flat baseline
    /// (stddev ~ 0) makes any departure maximally surprising.
    fn deviation_score(&self, latency_ms: f64, baseline: &Baseline) -> f64 {
        let delta = (latency_ms - baseline.mean_latency_ms).abs();
        if baseline.stddev_latency_ms > f64::EPSILON {
            delta / baseline.stddev_latency_ms
        } else if delta > f64::EPSILON {
            self.config.deviation_cap
        } else {
            0.0
        }
    }

    /// Monotonic severity mapping over (service criticality, deviation).
    /// The cut points are configuration, not contract; only monotonicity
    /// is guaranteed.
    pub fn map_severity(&self, criticality: f64, deviation_score: f64) -> Severity {
        let composite =
            criticality.clamp(0.0, 1.0) * (deviation_score / self.config.deviation_cap).min(1.0);
        if composite >= self.config.severity_p0_cutoff {
            Severity::P0
        } else if composite >= self.config.severity_p1_cutoff {
            Severity::P1
        } else if composite >= self.config.severity_p2_cutoff {
            Severity::P2
        } else {
            Severity::P3
        }
    }

    fn confidence(&self, anomaly: &Anomaly) -> f64 {
        let deviation_part = (anomaly.deviation_score / self.config.deviation_cap).min(1.0);
        let outlier_part = anomaly
            .outlier_score
            .map(|score| (-score).clamp(0.0, 1.0))
            .unwrap_or(0.0);
        deviation_part.max(outlier_part)
    }

    /// Pick the dominant deviation dimension. Latency signal is the
    /// per-sample deviation; error-rate and traffic signals compare the
    /// trailing window against the baseline rates.
    async fn classify(
        &self,
        sample: &HealthSample,
        baseline: &Baseline,
        deviation_score: f64,
    ) -> (AnomalyType, f64, f64) {
        let window = Duration::seconds(self.config.classification_window_secs);
        let mut recent = self
            .store
            .samples_in_window(sample.service_id, sample.checked_at - window, sample.checked_at, 1000)
            .await;
        if recent.is_empty() {
            recent.push(sample.clone());
        }

        let stats = super::baseline::summarize(&recent, window.num_seconds() as f64);

        let latency_signal = deviation_score / self.config.deviation_critical_threshold;
        // Rate comparisons need a populated window; a handful of samples
        // says nothing about error rate or traffic.
        let window_usable = recent.len() >= 5;
        let error_signal = if window_usable {
            (stats.error_rate - baseline.error_rate).abs() / self.config.error_rate_margin
        } else {
            0.0
        };
        let traffic_signal = if window_usable && baseline.request_rate > f64::EPSILON {
            (stats.request_rate / baseline.request_rate - 1.0).abs() / self.config.traffic_margin
        } else {
            0.0
        };

        let mut ranked = [
            (AnomalyType::ResponseTime, latency_signal),
            (AnomalyType::ErrorRate, error_signal),
            (AnomalyType::Traffic, traffic_signal),
        ];
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let (winner, top) = ranked[0];
        let (_, runner_up) = ranked[1];

        let anomaly_type = if top >= 1.0 && runner_up >= 1.0 && runner_up >= top * (1.0 - self.config.mixed_margin)
        {
            AnomalyType::Mixed
        } else {
            winner
        };

        let (observed, expected) = match anomaly_type {
            AnomalyType::ErrorRate => (stats.error_rate, baseline.error_rate),
            AnomalyType::Traffic => (stats.request_rate, baseline.request_rate),
            AnomalyType::ResponseTime | AnomalyType::Mixed => {
                (sample.latency_ms, baseline.mean_latency_ms)
            }
        };
        (anomaly_type, observed, expected)
    }
}
