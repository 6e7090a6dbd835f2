//! Blast-radius derivation and deployment correlation.
//!
//! Both operations are read/derive-only: they walk the topology and the
//! deployment history and annotate the incident, never mutating the
//! dependency graph or deployment records.

use super::error::Result;
use super::models::{DependencyKind, Incident};
use super::store::EngineStore;
use super::topology::TopologyStore;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationConfig {
    /// Trailing window before detection in which a deployment is a
    /// causal suspect.
    pub deployment_window_secs: i64,

    /// Post/pre ratio of error rate or latency beyond which a correlated
    /// deployment earns a rollback suggestion.
    pub regression_ratio: f64,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            deployment_window_secs: 1800,
            regression_ratio: 1.5,
        }
    }
}

/// The affected downstream set for an incident's originating service.
#[derive(Debug, Clone)]
pub struct BlastRadius {
    pub affected: HashSet<Uuid>,
    /// `|affected| + 1` (the origin counts itself).
    pub radius: u32,
}

#[derive(Debug, Clone)]
pub struct CorrelationEngine {
    store: Arc<EngineStore>,
    topology: Arc<TopologyStore>,
    config: CorrelationConfig,
}

impl CorrelationEngine {
    pub fn new(
        store: Arc<EngineStore>,
        topology: Arc<TopologyStore>,
        config: CorrelationConfig,
    ) -> Self {
        Self {
            store,
            topology,
            config,
        }
    }

    pub fn config(&self) -> &CorrelationConfig {
        &self.config
    }

    /// Walk hard and soft edges downstream of the incident's service.
    /// Optional dependencies are excluded: an optional dependency failing
    /// should not inflate blast radius. Annotates the incident with the
    /// affected set and radius.
    pub async fn compute_blast_radius(&self, incident_id: Uuid) -> Result<BlastRadius> {
        let mut incident = self.store.get_incident(incident_id).await?;

        let affected = self
            .topology
            .descendants_filtered(
                incident.service_id,
                &[DependencyKind::Hard, DependencyKind::Soft],
            )
            .await;
        let radius = affected.len() as u32 + 1;

        incident.affected_services = affected.clone();
        incident.blast_radius = radius;
        self.store.update_incident(incident).await?;

        info!(
            %incident_id,
            radius,
            affected = affected.len(),
            "blast radius computed"
        );
        Ok(BlastRadius { affected, radius })
    }

    /// Look for a deployment of the incident's service started within the
    /// trailing window before detection. When found, link it and suggest a
    /// rollback if its post-metrics regressed past the configured ratio.
    /// Returns the updated incident.
    pub async fn correlate_deployment(&self, incident_id: Uuid) -> Result<Incident> {
        let mut incident = self.store.get_incident(incident_id).await?;

        let window = Duration::seconds(self.config.deployment_window_secs);
        let Some(deployment) = self
            .store
            .latest_deployment_in_window(incident.service_id, incident.detected_at, window)
            .await
        else {
            debug!(%incident_id, "no deployment in correlation window");
            return Ok(incident);
        };

        incident.deployment_id = Some(deployment.id);

        let error_regressed = match deployment.post_error_rate {
            Some(post) => post > deployment.pre_error_rate.max(f64::EPSILON) * self.config.regression_ratio,
            None => false,
        };
        let latency_regressed = match deployment.post_latency_ms {
            Some(post) => post > deployment.pre_latency_ms.max(f64::EPSILON) * self.config.regression_ratio,
            None => false,
        };
        incident.suggested_rollback = error_regressed || latency_regressed;

        info!(
            %incident_id,
            deployment_id = %deployment.id,
            suggested_rollback = incident.suggested_rollback,
            "deployment correlated"
        );
        self.store.update_incident(incident.clone()).await?;
        Ok(incident)
    }
}
