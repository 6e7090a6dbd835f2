//! In-memory record store for the engine's entities.
//!
//! The engine is embedded: durable storage is an external collaborator,
//! so the tables live behind `tokio::sync::RwLock`s. Each lock scopes the
//! atomicity the component contracts require — notably the
//! open-incident-check-then-create used for anomaly dedup and the
//! runbook usage counters.

use super::error::{EngineError, Result};
use super::models::{
    Anomaly, Baseline, Deployment, HealthSample, Incident, OnCallEntry, Runbook, Service,
    ServiceClass, TimelineEvent,
};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct EngineStore {
    services: RwLock<HashMap<Uuid, Service>>,
    samples: RwLock<HashMap<Uuid, Vec<HealthSample>>>,
    baselines: RwLock<HashMap<Uuid, Vec<Baseline>>>,
    anomalies: RwLock<HashMap<Uuid, Anomaly>>,
    incidents: RwLock<HashMap<Uuid, Incident>>,
    deployments: RwLock<HashMap<Uuid, Deployment>>,
    runbooks: RwLock<HashMap<Uuid, Runbook>>,
    oncall: RwLock<HashMap<Uuid, OnCallEntry>>,
    timeline: RwLock<HashMap<Uuid, Vec<TimelineEvent>>>,
}

impl EngineStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ===== Services =====

    pub async fn create_service(&self, service: Service) -> Result<Service> {
        let mut services = self.services.write().await;
        if services.contains_key(&service.id) {
            return Err(EngineError::Validation(format!(
                "service {} already registered",
                service.id
            )));
        }
        info!(service_id = %service.id, name = %service.name, "service registered");
        services.insert(service.id, service.clone());
        Ok(service)
    }

    pub async fn get_service(&self, id: Uuid) -> Result<Service> {
        self.services
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(EngineError::NotFound {
                kind: "service",
                id: id.to_string(),
            })
    }

    pub async fn list_services(&self) -> Vec<Service> {
        self.services.read().await.values().cloned().collect()
    }

    pub async fn reclassify_service(
        &self,
        id: Uuid,
        class: ServiceClass,
        criticality: f64,
    ) -> Result<Service> {
        let mut services = self.services.write().await;
        let service = services.get_mut(&id).ok_or(EngineError::NotFound {
            kind: "service",
            id: id.to_string(),
        })?;
        service.class = class;
        service.criticality = criticality.clamp(0.0, 1.0);
        Ok(service.clone())
    }

    /// Hard-delete a service and cascade its samples and baselines.
    /// Refused while any incident still references the service.
    pub async fn delete_service(&self, id: Uuid) -> Result<()> {
        let referenced = self
            .incidents
            .read()
            .await
            .values()
            .any(|incident| incident.service_id == id);
        if referenced {
            return Err(EngineError::Validation(format!(
                "service {id} is referenced by incidents and cannot be deleted"
            )));
        }

        let mut services = self.services.write().await;
        if services.remove(&id).is_none() {
            return Err(EngineError::NotFound {
                kind: "service",
                id: id.to_string(),
            });
        }
        self.samples.write().await.remove(&id);
        self.baselines.write().await.remove(&id);
        info!(service_id = %id, "service deleted with cascaded samples and baselines");
        Ok(())
    }

    // ===== Health samples =====

    /// Append-only; recording a sample never fails and never blocks on
    /// anomaly evaluation.
    pub async fn record_sample(&self, sample: HealthSample) {
        self.samples
            .write()
            .await
            .entry(sample.service_id)
            .or_default()
            .push(sample);
    }

    /// Most recent `limit` samples with `checked_at` in `[since, until]`,
    /// returned in ascending timestamp order.
    pub async fn samples_in_window(
        &self,
        service_id: Uuid,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        limit: usize,
    ) -> Vec<HealthSample> {
        let samples = self.samples.read().await;
        let Some(all) = samples.get(&service_id) else {
            return Vec::new();
        };

        let mut window: Vec<HealthSample> = all
            .iter()
            .filter(|s| s.checked_at >= since && s.checked_at <= until)
            .cloned()
            .collect();
        window.sort_by_key(|s| s.checked_at);
        if window.len() > limit {
            window.drain(..window.len() - limit);
        }
        window
    }

    pub async fn sample_count(&self, service_id: Uuid) -> usize {
        self.samples
            .read()
            .await
            .get(&service_id)
            .map_or(0, Vec::len)
    }

    // ===== Baselines =====

    pub async fn insert_baseline(&self, baseline: Baseline) {
        self.baselines
            .write()
            .await
            .entry(baseline.service_id)
            .or_default()
            .push(baseline);
    }

    /// Most recently computed baseline with `expires_at > now`.
    pub async fn active_baseline(&self, service_id: Uuid, now: DateTime<Utc>) -> Option<Baseline> {
        self.baselines
            .read()
            .await
            .get(&service_id)?
            .iter()
            .filter(|b| b.expires_at > now)
            .max_by_key(|b| b.computed_at)
            .cloned()
    }

    // ===== Anomalies =====

    pub async fn insert_anomaly(&self, anomaly: Anomaly) {
        self.anomalies.write().await.insert(anomaly.id, anomaly);
    }

    /// The one permitted post-creation mutation: linking the incident the
    /// anomaly spawned.
    pub async fn attach_incident_to_anomaly(
        &self,
        anomaly_id: Uuid,
        incident_id: Uuid,
    ) -> Result<()> {
        let mut anomalies = self.anomalies.write().await;
        let anomaly = anomalies.get_mut(&anomaly_id).ok_or(EngineError::NotFound {
            kind: "anomaly",
            id: anomaly_id.to_string(),
        })?;
        anomaly.incident_id = Some(incident_id);
        Ok(())
    }

    pub async fn anomalies_for_service(&self, service_id: Uuid) -> Vec<Anomaly> {
        let mut list: Vec<Anomaly> = self
            .anomalies
            .read()
            .await
            .values()
            .filter(|a| a.service_id == service_id)
            .cloned()
            .collect();
        list.sort_by_key(|a| a.detected_at);
        list
    }

    // ===== Incidents =====

    /// Dedup-preserving incident creation: if the service already has an
    /// open incident, bump its failure counter instead of inserting the
    /// candidate. Check and write share one lock, so concurrent critical
    /// anomalies for the same service cannot both create.
    ///
    /// Returns the surviving incident and whether it was newly created.
    pub async fn open_or_increment_incident(&self, candidate: Incident) -> (Incident, bool) {
        let mut incidents = self.incidents.write().await;

        if let Some(existing) = incidents
            .values_mut()
            .find(|i| i.service_id == candidate.service_id && i.is_open())
        {
            existing.consecutive_failures += 1;
            debug!(
                incident_id = %existing.id,
                consecutive_failures = existing.consecutive_failures,
                "open incident enriched instead of duplicated"
            );
            return (existing.clone(), false);
        }

        info!(
            incident_id = %candidate.id,
            service_id = %candidate.service_id,
            severity = %candidate.severity,
            "incident opened"
        );
        incidents.insert(candidate.id, candidate.clone());
        (candidate, true)
    }

    pub async fn get_incident(&self, id: Uuid) -> Result<Incident> {
        self.incidents
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(EngineError::NotFound {
                kind: "incident",
                id: id.to_string(),
            })
    }

    pub async fn update_incident(&self, incident: Incident) -> Result<Incident> {
        let mut incidents = self.incidents.write().await;
        if !incidents.contains_key(&incident.id) {
            return Err(EngineError::NotFound {
                kind: "incident",
                id: incident.id.to_string(),
            });
        }
        incidents.insert(incident.id, incident.clone());
        Ok(incident)
    }

    pub async fn open_incident_for(&self, service_id: Uuid) -> Option<Incident> {
        self.incidents
            .read()
            .await
            .values()
            .find(|i| i.service_id == service_id && i.is_open())
            .cloned()
    }

    pub async fn list_incidents(&self) -> Vec<Incident> {
        let mut list: Vec<Incident> = self.incidents.read().await.values().cloned().collect();
        list.sort_by_key(|i| i.detected_at);
        list
    }

    // ===== Deployments =====

    pub async fn record_deployment(&self, deployment: Deployment) {
        self.deployments
            .write()
            .await
            .insert(deployment.id, deployment);
    }

    pub async fn get_deployment(&self, id: Uuid) -> Result<Deployment> {
        self.deployments
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(EngineError::NotFound {
                kind: "deployment",
                id: id.to_string(),
            })
    }

    /// Most recent deployment of `service_id` started within `window`
    /// before `until`.
    pub async fn latest_deployment_in_window(
        &self,
        service_id: Uuid,
        until: DateTime<Utc>,
        window: Duration,
    ) -> Option<Deployment> {
        let since = until - window;
        self.deployments
            .read()
            .await
            .values()
            .filter(|d| {
                d.service_id == service_id && d.started_at >= since && d.started_at <= until
            })
            .max_by_key(|d| d.started_at)
            .cloned()
    }

    // ===== Runbooks =====

    pub async fn create_runbook(&self, runbook: Runbook) -> Runbook {
        self.runbooks
            .write()
            .await
            .insert(runbook.id, runbook.clone());
        runbook
    }

    /// Explicit edit path: bumps `last_updated_at`, which also invalidates
    /// any cached compiled pattern.
    pub async fn update_runbook(&self, mut runbook: Runbook) -> Result<Runbook> {
        let mut runbooks = self.runbooks.write().await;
        if !runbooks.contains_key(&runbook.id) {
            return Err(EngineError::NotFound {
                kind: "runbook",
                id: runbook.id.to_string(),
            });
        }
        runbook.last_updated_at = Utc::now();
        runbooks.insert(runbook.id, runbook.clone());
        Ok(runbook)
    }

    pub async fn get_runbook(&self, id: Uuid) -> Result<Runbook> {
        self.runbooks
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(EngineError::NotFound {
                kind: "runbook",
                id: id.to_string(),
            })
    }

    /// Enabled runbooks visible to a service: global ones plus those
    /// scoped to it.
    pub async fn runbooks_in_scope(&self, service_id: Uuid) -> Vec<Runbook> {
        self.runbooks
            .read()
            .await
            .values()
            .filter(|r| r.enabled && (r.service_id.is_none() || r.service_id == Some(service_id)))
            .cloned()
            .collect()
    }

    /// Monotonic counter update under the table write lock; concurrent
    /// recordings on the same runbook cannot lose increments.
    pub async fn record_runbook_usage(&self, id: Uuid, was_successful: bool) -> Result<Runbook> {
        let mut runbooks = self.runbooks.write().await;
        let runbook = runbooks.get_mut(&id).ok_or(EngineError::NotFound {
            kind: "runbook",
            id: id.to_string(),
        })?;
        runbook.times_used += 1;
        if was_successful {
            runbook.success_count += 1;
        }
        debug!(
            runbook_id = %id,
            times_used = runbook.times_used,
            success_count = runbook.success_count,
            "runbook usage recorded"
        );
        Ok(runbook.clone())
    }

    // ===== On-call schedule =====

    pub async fn add_oncall_entry(&self, entry: OnCallEntry) -> OnCallEntry {
        self.oncall.write().await.insert(entry.id, entry.clone());
        entry
    }

    /// Snapshot of the full schedule; resolution is a pure read over it.
    pub async fn oncall_entries(&self) -> Vec<OnCallEntry> {
        self.oncall.read().await.values().cloned().collect()
    }

    // ===== Timeline =====

    pub async fn append_timeline(&self, event: TimelineEvent) {
        self.timeline
            .write()
            .await
            .entry(event.incident_id)
            .or_default()
            .push(event);
    }

    pub async fn timeline_for(&self, incident_id: Uuid) -> Vec<TimelineEvent> {
        let mut events = self
            .timeline
            .read()
            .await
            .get(&incident_id)
            .cloned()
            .unwrap_or_default();
        events.sort_by_key(|e| e.created_at);
        events
    }
}
