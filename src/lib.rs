pub mod config;
pub mod engine;

pub use config::EngineConfig;

// Re-export engine types for convenience
pub use engine::{
    error::{EngineError, Result},
    models::{
        Anomaly, AnomalyType, Baseline, Deployment, DeploymentStatus, DependencyEdge,
        DependencyKind, HealthSample, Incident, IncidentStatus, OnCallEntry, Runbook, Service,
        ServiceClass, Severity, TimelineEvent, TimelineEventKind,
    },
    IngestReport, SentinelEngine,
};

// Re-export component types
pub use engine::{
    anomaly::AnomalyScorer,
    baseline::BaselineCalculator,
    correlation::{BlastRadius, CorrelationEngine},
    oncall::{OnCallResolver, Page},
    outlier::{FixedOutlierModel, OutlierModel},
    runbooks::{RunbookMatch, RunbookMatcher},
    similarity::{IncidentMemoryIndex, SimilarIncident},
    store::EngineStore,
    topology::TopologyStore,
};
