//! Incident-correlation and service-topology analysis engine.
//!
//! `SentinelEngine` wires the component stack into the monitoring data
//! flow: samples arrive, baselines refresh on a schedule or on demand,
//! each sample is scored against the active baseline, and a critical
//! anomaly opens (or enriches) the service's incident. A newly opened
//! incident fans out to blast-radius computation, deployment correlation,
//! on-call resolution, and runbook matching; resolution feeds the
//! incident's embedding back into the memory index and runbook outcomes
//! back into the matcher's statistics.

pub mod anomaly;
pub mod baseline;
pub mod correlation;
pub mod error;
pub mod models;
pub mod oncall;
pub mod outlier;
pub mod runbooks;
pub mod similarity;
pub mod store;
pub mod topology;

use crate::config::EngineConfig;
use anomaly::AnomalyScorer;
use baseline::BaselineCalculator;
use chrono::{Duration, Utc};
use correlation::CorrelationEngine;
use error::{EngineError, Result};
use models::{
    Anomaly, DependencyKind, Deployment, HealthSample, Incident, IncidentStatus, OnCallEntry,
    Runbook, Service, ServiceClass, TimelineEvent, TimelineEventKind,
};
use oncall::{OnCallResolver, Page};
use outlier::OutlierModel;
use runbooks::{RunbookMatch, RunbookMatcher};
use similarity::{IncidentMemoryIndex, SimilarIncident};
use std::sync::Arc;
use store::EngineStore;
use topology::TopologyStore;
use tracing::{info, warn};
use uuid::Uuid;

/// What one sample ingestion produced.
#[derive(Debug, Default)]
pub struct IngestReport {
    /// `None` when no active baseline existed yet ("cannot evaluate").
    pub anomaly: Option<Anomaly>,
    /// The open incident touched by this sample, if any.
    pub incident: Option<Incident>,
    /// True when this sample opened the incident (vs. enriching it).
    pub incident_created: bool,
    /// Escalation target, when one was resolvable.
    pub page: Option<Page>,
    /// Runbook candidates for a newly opened incident, ranked.
    pub runbook_suggestions: Vec<RunbookMatch>,
}

pub struct SentinelEngine {
    config: EngineConfig,
    store: Arc<EngineStore>,
    topology: Arc<TopologyStore>,
    baselines: BaselineCalculator,
    scorer: AnomalyScorer,
    correlation: CorrelationEngine,
    oncall: OnCallResolver,
    runbooks: Arc<RunbookMatcher>,
    memory: Arc<IncidentMemoryIndex>,
    outlier_model: Option<Arc<dyn OutlierModel>>,
}

impl SentinelEngine {
    pub fn new(config: EngineConfig) -> Self {
        let store = Arc::new(EngineStore::new());
        let topology = Arc::new(TopologyStore::new());

        let baselines = BaselineCalculator::new(store.clone(), config.baseline.clone());
        let scorer = AnomalyScorer::new(store.clone(), config.anomaly.clone());
        let correlation =
            CorrelationEngine::new(store.clone(), topology.clone(), config.correlation.clone());
        let oncall = OnCallResolver::new(store.clone());
        let runbooks = Arc::new(RunbookMatcher::new(store.clone()));
        let memory = Arc::new(IncidentMemoryIndex::new(
            store.clone(),
            config.similarity.clone(),
        ));

        Self {
            config,
            store,
            topology,
            baselines,
            scorer,
            correlation,
            oncall,
            runbooks,
            memory,
            outlier_model: None,
        }
    }

    /// Attach an external outlier model. Absent a model, evaluation runs
    /// on local statistics only.
    pub fn with_outlier_model(mut self, model: Arc<dyn OutlierModel>) -> Self {
        self.outlier_model = Some(model);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<EngineStore> {
        &self.store
    }

    pub fn topology(&self) -> &Arc<TopologyStore> {
        &self.topology
    }

    pub fn baselines(&self) -> &BaselineCalculator {
        &self.baselines
    }

    pub fn runbooks(&self) -> &Arc<RunbookMatcher> {
        &self.runbooks
    }

    pub fn memory_index(&self) -> &Arc<IncidentMemoryIndex> {
        &self.memory
    }

    // ===== Registry =====

    pub async fn register_service(
        &self,
        name: impl Into<String>,
        class: ServiceClass,
        criticality: f64,
    ) -> Result<Service> {
        self.store
            .create_service(Service::new(name, class, criticality))
            .await
    }

    pub async fn reclassify_service(
        &self,
        service_id: Uuid,
        class: ServiceClass,
        criticality: f64,
    ) -> Result<Service> {
        self.store
            .reclassify_service(service_id, class, criticality)
            .await
    }

    /// Cascade-delete a service. Refused while incidents reference it;
    /// otherwise samples, baselines, and every touching dependency edge
    /// go with it.
    pub async fn delete_service(&self, service_id: Uuid) -> Result<()> {
        self.store.delete_service(service_id).await?;
        self.topology.detach_service(service_id).await;
        Ok(())
    }

    pub async fn add_dependency(
        &self,
        parent: Uuid,
        child: Uuid,
        kind: DependencyKind,
    ) -> Result<()> {
        // Both endpoints must be registered services.
        self.store.get_service(parent).await?;
        self.store.get_service(child).await?;
        self.topology.add_edge(parent, child, kind).await?;
        Ok(())
    }

    pub async fn remove_dependency(&self, parent: Uuid, child: Uuid) -> Result<()> {
        self.topology.remove_edge(parent, child).await
    }

    pub async fn record_deployment(&self, deployment: Deployment) {
        self.store.record_deployment(deployment).await;
    }

    /// Register a runbook. The pattern must compile here; a pattern that
    /// later goes stale is skipped at match time instead.
    pub async fn add_runbook(&self, runbook: Runbook) -> Result<Runbook> {
        if let Err(err) = regex::Regex::new(&runbook.pattern) {
            return Err(EngineError::MalformedPattern {
                runbook_id: runbook.id,
                reason: err.to_string(),
            });
        }
        Ok(self.store.create_runbook(runbook).await)
    }

    pub async fn add_oncall_entry(&self, entry: OnCallEntry) -> OnCallEntry {
        self.store.add_oncall_entry(entry).await
    }

    // ===== Baselines =====

    pub async fn compute_baseline(
        &self,
        service_id: Uuid,
        window: Duration,
    ) -> Result<models::Baseline> {
        self.baselines.compute_baseline(service_id, window).await
    }

    pub async fn refresh_baselines(&self, window: Duration) -> Vec<models::Baseline> {
        self.baselines.refresh_all(window).await
    }

    // ===== Ingestion =====

    /// Record a sample and evaluate it. The raw sample is always recorded
    /// first: no downstream failure can lose it. When no active baseline
    /// exists the report carries no anomaly ("cannot evaluate yet").
    pub async fn ingest_sample(
        &self,
        sample: HealthSample,
        outlier_score: Option<f64>,
    ) -> Result<IngestReport> {
        self.store.record_sample(sample.clone()).await;

        let outlier_score = match outlier_score {
            Some(score) => Some(score),
            None => match &self.outlier_model {
                Some(model) => {
                    outlier::score_with_timeout(
                        model.as_ref(),
                        &sample,
                        std::time::Duration::from_millis(self.config.outlier_timeout_ms),
                    )
                    .await
                }
                None => None,
            },
        };

        let baseline = match self.baselines.get_active_baseline(sample.service_id).await {
            Ok(baseline) => baseline,
            Err(EngineError::NotFound { .. }) => {
                return Ok(IngestReport::default());
            }
            Err(err) => return Err(err),
        };

        let anomaly = self.scorer.evaluate(&sample, &baseline, outlier_score).await?;

        let mut report = IngestReport {
            anomaly: Some(anomaly.clone()),
            ..Default::default()
        };

        let Some(outcome) = self.scorer.open_or_enrich(&anomaly, &sample).await? else {
            return Ok(report);
        };

        if outcome.created {
            let (page, suggestions) = self.triage(&outcome.incident, &anomaly).await?;
            report.page = page;
            report.runbook_suggestions = suggestions;
        }

        report.incident = Some(self.store.get_incident(outcome.incident.id).await?);
        report.incident_created = outcome.created;
        Ok(report)
    }

    /// Fan-out for a newly opened incident: blast radius and deployment
    /// correlation annotate it, on-call resolution assigns it, runbook
    /// matching suggests remediation. Escalation failures degrade, they
    /// never abort the incident.
    async fn triage(
        &self,
        incident: &Incident,
        anomaly: &Anomaly,
    ) -> Result<(Option<Page>, Vec<RunbookMatch>)> {
        let service = self.store.get_service(incident.service_id).await?;

        self.append_event(
            incident.id,
            TimelineEventKind::StatusChange,
            "sentinel-engine",
            format!(
                "incident detected: {} anomaly on {} ({:.1} standard deviations)",
                anomaly.anomaly_type, service.name, anomaly.deviation_score
            ),
        )
        .await;

        // Both annotate the same incident record; run them in sequence so
        // neither read-modify-write clobbers the other's fields.
        let blast = self.correlation.compute_blast_radius(incident.id).await?;
        let correlated = self.correlation.correlate_deployment(incident.id).await?;
        if blast.radius > 1 {
            self.append_event(
                incident.id,
                TimelineEventKind::Comment,
                "sentinel-engine",
                format!("{} downstream services in blast radius", blast.radius - 1),
            )
            .await;
        }
        if let Some(deployment_id) = correlated.deployment_id {
            self.append_event(
                incident.id,
                TimelineEventKind::Deployment,
                "sentinel-engine",
                format!(
                    "correlated with deployment {deployment_id}{}",
                    if correlated.suggested_rollback {
                        "; rollback suggested"
                    } else {
                        ""
                    }
                ),
            )
            .await;
        }

        let page = match self.oncall.resolve(incident.severity, incident.service_id).await {
            Ok(page) => {
                let mut updated = self.store.get_incident(incident.id).await?;
                updated.assigned_to = Some(page.responder.clone());
                updated.status = IncidentStatus::Alerting;
                self.store.update_incident(updated).await?;
                self.append_event(
                    incident.id,
                    TimelineEventKind::Assignment,
                    "sentinel-engine",
                    format!("assigned to {} (priority {})", page.responder, page.priority),
                )
                .await;
                Some(page)
            }
            Err(EngineError::NoResponderAvailable { .. }) => {
                // Degraded escalation: the incident proceeds unassigned.
                warn!(incident_id = %incident.id, "escalation degraded, no responder available");
                let mut updated = self.store.get_incident(incident.id).await?;
                updated.status = IncidentStatus::Alerting;
                self.store.update_incident(updated).await?;
                self.append_event(
                    incident.id,
                    TimelineEventKind::Comment,
                    "sentinel-engine",
                    "no on-call responder available, falling back to default channel",
                )
                .await;
                None
            }
            Err(err) => return Err(err),
        };

        let error_text = format!(
            "{} anomaly on {}: observed {:.2} against baseline {:.2}",
            anomaly.anomaly_type, service.name, anomaly.observed_value, anomaly.baseline_value
        );
        let suggestions = self.runbooks.match_incident(&error_text, incident.service_id).await;

        Ok((page, suggestions))
    }

    // ===== Incident lifecycle =====

    pub async fn get_incident(&self, incident_id: Uuid) -> Result<Incident> {
        self.store.get_incident(incident_id).await
    }

    pub async fn list_incidents(&self) -> Vec<Incident> {
        self.store.list_incidents().await
    }

    pub async fn timeline(&self, incident_id: Uuid) -> Vec<TimelineEvent> {
        self.store.timeline_for(incident_id).await
    }

    /// A human takes the incident: stamps `acknowledged_at` (first ack
    /// wins), assigns, and moves to `investigating`.
    pub async fn acknowledge_incident(&self, incident_id: Uuid, who: &str) -> Result<Incident> {
        let mut incident = self.store.get_incident(incident_id).await?;
        if !incident.is_open() {
            return Err(EngineError::Validation(format!(
                "incident {incident_id} is already resolved"
            )));
        }

        if incident.acknowledged_at.is_none() {
            incident.acknowledged_at = Some(Utc::now());
        }
        incident.assigned_to = Some(who.to_string());
        incident.status = IncidentStatus::Investigating;
        let incident = self.store.update_incident(incident).await?;

        self.append_event(
            incident_id,
            TimelineEventKind::StatusChange,
            who,
            "acknowledged, investigating",
        )
        .await;
        Ok(incident)
    }

    /// Terminal transition. The embedding (from the external summarizer)
    /// is validated up front so a mismatch rejects the call before any
    /// state changes; on success the incident is committed to the memory
    /// index for future similarity queries.
    pub async fn resolve_incident(
        &self,
        incident_id: Uuid,
        root_cause: impl Into<String>,
        remediation: impl Into<String>,
        embedding: Option<Vec<f32>>,
    ) -> Result<Incident> {
        if let Some(ref vector) = embedding {
            if vector.len() != self.config.similarity.dimensions {
                return Err(EngineError::DimensionMismatch {
                    expected: self.config.similarity.dimensions,
                    actual: vector.len(),
                });
            }
        }

        let mut incident = self.store.get_incident(incident_id).await?;
        if !incident.is_open() {
            return Err(EngineError::Validation(format!(
                "incident {incident_id} is already resolved"
            )));
        }

        incident.status = IncidentStatus::Resolved;
        incident.resolved_at = Some(Utc::now());
        incident.root_cause = Some(root_cause.into());
        incident.remediation = Some(remediation.into());
        incident.embedding = embedding.clone();
        let incident = self.store.update_incident(incident).await?;

        self.append_event(
            incident_id,
            TimelineEventKind::StatusChange,
            "sentinel-engine",
            "resolved",
        )
        .await;

        if embedding.is_some() {
            self.memory.index(incident_id).await?;
        }

        info!(
            %incident_id,
            mttr_secs = incident.mttr().map(|d| d.num_seconds()).unwrap_or(0),
            "incident resolved"
        );
        Ok(incident)
    }

    /// Similar-past-incident lookup for an open incident, given a query
    /// embedding for its current symptoms. Annotates the incident with
    /// the matched ids.
    pub async fn suggest_similar(
        &self,
        incident_id: Uuid,
        query_embedding: &[f32],
    ) -> Result<Vec<SimilarIncident>> {
        let hits = self.memory.find_similar_default(query_embedding).await?;

        let mut incident = self.store.get_incident(incident_id).await?;
        incident.similar_incidents = hits.iter().map(|hit| hit.incident_id).collect();
        self.store.update_incident(incident).await?;
        Ok(hits)
    }

    /// Record a runbook execution against an incident: bumps the usage
    /// counters and appends a timeline event.
    pub async fn record_runbook_execution(
        &self,
        incident_id: Uuid,
        runbook_id: Uuid,
        was_successful: bool,
        author: &str,
    ) -> Result<Runbook> {
        let runbook = self.runbooks.record_usage(runbook_id, was_successful).await?;

        let mut event = TimelineEvent::new(
            incident_id,
            TimelineEventKind::RunbookExecuted,
            author,
            format!(
                "ran runbook \"{}\": {}",
                runbook.name,
                if was_successful { "success" } else { "no effect" }
            ),
        );
        event.metadata = serde_json::json!({
            "runbook_id": runbook.id,
            "was_successful": was_successful,
            "success_rate": runbook.success_rate(),
        });
        self.store.append_timeline(event).await;
        Ok(runbook)
    }

    async fn append_event(
        &self,
        incident_id: Uuid,
        kind: TimelineEventKind,
        author: &str,
        content: impl Into<String>,
    ) {
        self.store
            .append_timeline(TimelineEvent::new(incident_id, kind, author, content))
            .await;
    }
}
