use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Service classification used when weighing anomaly criticality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceClass {
    Critical,
    Canary,
    Standard,
}

impl FromStr for ServiceClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "critical" => Ok(ServiceClass::Critical),
            "canary" => Ok(ServiceClass::Canary),
            "standard" => Ok(ServiceClass::Standard),
            _ => Err(format!("Invalid service class: {s}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub id: Uuid,
    pub name: String,
    pub class: ServiceClass,
    /// Criticality score in [0, 1]; feeds severity mapping.
    pub criticality: f64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Service {
    pub fn new(name: impl Into<String>, class: ServiceClass, criticality: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            class,
            criticality: criticality.clamp(0.0, 1.0),
            is_active: true,
            created_at: Utc::now(),
        }
    }
}

/// Dependency strength between two services. Optional edges are excluded
/// from blast-radius traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyKind {
    Hard,
    Soft,
    Optional,
}

impl FromStr for DependencyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hard" => Ok(DependencyKind::Hard),
            "soft" => Ok(DependencyKind::Soft),
            "optional" => Ok(DependencyKind::Optional),
            _ => Err(format!("Invalid dependency kind: {s}")),
        }
    }
}

/// Directed edge `parent -> child`: the child depends on the parent, so a
/// failure of the parent propagates downward to the child.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub parent: Uuid,
    pub child: Uuid,
    pub kind: DependencyKind,
    pub created_at: DateTime<Utc>,
}

/// A single health-check observation. Append-only; never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSample {
    pub service_id: Uuid,
    pub checked_at: DateTime<Utc>,
    pub status_code: Option<u16>,
    pub latency_ms: f64,
    pub healthy: bool,
}

impl HealthSample {
    pub fn new(service_id: Uuid, latency_ms: f64, healthy: bool) -> Self {
        Self {
            service_id,
            checked_at: Utc::now(),
            status_code: None,
            latency_ms,
            healthy,
        }
    }
}

/// Immutable statistical snapshot for a service over a sample window.
/// "Active" means the most recently computed baseline with
/// `expires_at > now`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub id: Uuid,
    pub service_id: Uuid,
    pub computed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub sample_count: usize,
    pub mean_latency_ms: f64,
    pub stddev_latency_ms: f64,
    pub p50_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub p99_latency_ms: f64,
    /// Fraction of unhealthy samples in the window.
    pub error_rate: f64,
    /// Samples per second over the observed span.
    pub request_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyType {
    ResponseTime,
    ErrorRate,
    Traffic,
    Mixed,
}

impl fmt::Display for AnomalyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AnomalyType::ResponseTime => "response_time",
            AnomalyType::ErrorRate => "error_rate",
            AnomalyType::Traffic => "traffic",
            AnomalyType::Mixed => "mixed",
        };
        write!(f, "{s}")
    }
}

/// A scored deviation from the active baseline. Immutable after creation
/// except for attaching the incident it spawned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Anomaly {
    pub id: Uuid,
    pub service_id: Uuid,
    pub anomaly_type: AnomalyType,
    pub observed_value: f64,
    pub baseline_value: f64,
    /// Standard deviations from the baseline mean.
    pub deviation_score: f64,
    /// Externally computed, in [-1, 1]; lower is more anomalous.
    /// `None` means the outlier model supplied no signal.
    pub outlier_score: Option<f64>,
    pub is_critical: bool,
    pub incident_id: Option<Uuid>,
    pub detected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentStatus {
    Detecting,
    Alerting,
    Investigating,
    Resolved,
}

impl fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IncidentStatus::Detecting => "detecting",
            IncidentStatus::Alerting => "alerting",
            IncidentStatus::Investigating => "investigating",
            IncidentStatus::Resolved => "resolved",
        };
        write!(f, "{s}")
    }
}

/// Incident severity. Ordering follows variant order, so `P0 < P1` in the
/// `Ord` sense while P0 is the most severe page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    P0,
    P1,
    P2,
    P3,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::P0 => "P0",
            Severity::P1 => "P1",
            Severity::P2 => "P2",
            Severity::P3 => "P3",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "P0" => Ok(Severity::P0),
            "P1" => Ok(Severity::P1),
            "P2" => Ok(Severity::P2),
            "P3" => Ok(Severity::P3),
            _ => Err(format!("Invalid severity: {s}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub id: Uuid,
    pub service_id: Uuid,
    pub status: IncidentStatus,
    pub severity: Severity,
    /// Detection confidence in [0, 1].
    pub confidence: f64,
    pub failure_type: Option<AnomalyType>,
    pub consecutive_failures: u32,
    pub blast_radius: u32,
    pub affected_services: HashSet<Uuid>,
    pub similar_incidents: Vec<Uuid>,
    pub deployment_id: Option<Uuid>,
    pub suggested_rollback: bool,
    pub assigned_to: Option<String>,
    /// Timestamp of the sample that started the failure streak.
    pub failure_started_at: DateTime<Utc>,
    pub detected_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub embedding: Option<Vec<f32>>,
    pub root_cause: Option<String>,
    pub remediation: Option<String>,
}

impl Incident {
    pub fn is_open(&self) -> bool {
        self.status != IncidentStatus::Resolved
    }

    /// Mean time to detect: failure start to detection.
    pub fn mttd(&self) -> Duration {
        self.detected_at - self.failure_started_at
    }

    /// Mean time to acknowledge: detection to acknowledgment.
    pub fn mtta(&self) -> Option<Duration> {
        self.acknowledged_at.map(|ack| ack - self.detected_at)
    }

    /// Mean time to resolve: detection to resolution.
    pub fn mttr(&self) -> Option<Duration> {
        self.resolved_at.map(|res| res - self.detected_at)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    InProgress,
    Succeeded,
    Failed,
    RolledBack,
}

/// Supplied read-only by the deployment reporter; correlated against
/// incidents by temporal proximity and service identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    pub id: Uuid,
    pub service_id: Uuid,
    pub version_from: String,
    pub version_to: String,
    pub status: DeploymentStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub pre_error_rate: f64,
    pub post_error_rate: Option<f64>,
    pub pre_latency_ms: f64,
    pub post_latency_ms: Option<f64>,
    pub caused_incident: bool,
    pub rollback_recommended: bool,
}

/// Remediation playbook matched by regex against incident error text.
/// `service_id = None` makes the runbook global.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Runbook {
    pub id: Uuid,
    pub service_id: Option<Uuid>,
    pub name: String,
    pub pattern: String,
    pub tags: Vec<String>,
    pub steps: Vec<String>,
    pub times_used: u64,
    pub success_count: u64,
    pub enabled: bool,
    pub last_updated_at: DateTime<Utc>,
}

impl Runbook {
    pub fn new(
        name: impl Into<String>,
        pattern: impl Into<String>,
        service_id: Option<Uuid>,
        steps: Vec<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            service_id,
            name: name.into(),
            pattern: pattern.into(),
            tags: Vec::new(),
            steps,
            times_used: 0,
            success_count: 0,
            enabled: true,
            last_updated_at: Utc::now(),
        }
    }

    /// Always derived, never stored: prevents counter/rate drift.
    pub fn success_rate(&self) -> f64 {
        if self.times_used == 0 {
            0.0
        } else {
            self.success_count as f64 / self.times_used as f64
        }
    }
}

/// One rotation slot. Multiple entries may overlap in time; resolution
/// picks the lowest priority number among matches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnCallEntry {
    pub id: Uuid,
    pub team: String,
    pub responder: String,
    pub contact_channels: Vec<String>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    /// 1 = primary.
    pub priority: u8,
    pub severities: HashSet<Severity>,
    /// Empty = all services.
    pub service_scope: HashSet<Uuid>,
    pub is_active: bool,
}

impl OnCallEntry {
    /// Whether this entry covers `severity` on `service_id` at `now`.
    pub fn covers(&self, severity: Severity, service_id: Uuid, now: DateTime<Utc>) -> bool {
        self.is_active
            && now >= self.starts_at
            && now < self.ends_at
            && self.severities.contains(&severity)
            && (self.service_scope.is_empty() || self.service_scope.contains(&service_id))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineEventKind {
    Comment,
    StatusChange,
    Assignment,
    RunbookExecuted,
    Deployment,
}

/// Append-only incident history, ordered by timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub id: Uuid,
    pub incident_id: Uuid,
    pub kind: TimelineEventKind,
    pub author: String,
    pub content: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl TimelineEvent {
    pub fn new(
        incident_id: Uuid,
        kind: TimelineEventKind,
        author: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            incident_id,
            kind,
            author: author.into(),
            content: content.into(),
            metadata: serde_json::Value::Null,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_class_from_str() {
        assert_eq!(
            ServiceClass::from_str("critical").unwrap(),
            ServiceClass::Critical
        );
        assert_eq!(
            ServiceClass::from_str("CANARY").unwrap(),
            ServiceClass::Canary
        );
        assert!(ServiceClass::from_str("unknown").is_err());
    }

    #[test]
    fn test_criticality_clamped_on_construction() {
        let service = Service::new("api", ServiceClass::Critical, 1.7);
        assert_eq!(service.criticality, 1.0);
        let service = Service::new("api", ServiceClass::Standard, -0.3);
        assert_eq!(service.criticality, 0.0);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::P0 < Severity::P1);
        assert!(Severity::P2 < Severity::P3);
        assert_eq!(Severity::from_str("p1").unwrap(), Severity::P1);
    }

    #[test]
    fn test_success_rate_derivation() {
        let mut runbook = Runbook::new("restart", "timeout", None, vec![]);
        assert_eq!(runbook.success_rate(), 0.0);
        runbook.times_used = 10;
        runbook.success_count = 8;
        assert_eq!(runbook.success_rate(), 0.8);
    }

    #[test]
    fn test_oncall_entry_coverage() {
        let now = Utc::now();
        let service = Uuid::new_v4();
        let entry = OnCallEntry {
            id: Uuid::new_v4(),
            team: "sre".to_string(),
            responder: "alex".to_string(),
            contact_channels: vec!["slack:#oncall".to_string()],
            starts_at: now - Duration::hours(1),
            ends_at: now + Duration::hours(1),
            priority: 1,
            severities: [Severity::P0, Severity::P1].into_iter().collect(),
            service_scope: HashSet::new(),
            is_active: true,
        };

        assert!(entry.covers(Severity::P0, service, now));
        assert!(!entry.covers(Severity::P3, service, now));
        // Window end is exclusive.
        assert!(!entry.covers(Severity::P0, service, entry.ends_at));
    }

    #[test]
    fn test_incident_durations() {
        let start = Utc::now();
        let incident = Incident {
            id: Uuid::new_v4(),
            service_id: Uuid::new_v4(),
            status: IncidentStatus::Resolved,
            severity: Severity::P1,
            confidence: 0.9,
            failure_type: Some(AnomalyType::ResponseTime),
            consecutive_failures: 3,
            blast_radius: 1,
            affected_services: HashSet::new(),
            similar_incidents: Vec::new(),
            deployment_id: None,
            suggested_rollback: false,
            assigned_to: None,
            failure_started_at: start,
            detected_at: start + Duration::seconds(30),
            acknowledged_at: Some(start + Duration::seconds(90)),
            resolved_at: Some(start + Duration::seconds(630)),
            embedding: None,
            root_cause: None,
            remediation: None,
        };

        assert_eq!(incident.mttd(), Duration::seconds(30));
        assert_eq!(incident.mtta(), Some(Duration::seconds(60)));
        assert_eq!(incident.mttr(), Some(Duration::seconds(600)));
        assert!(!incident.is_open());
    }
}
