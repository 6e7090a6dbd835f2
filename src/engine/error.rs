use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid edge: service {service} cannot depend on itself")]
    InvalidEdge { service: Uuid },

    #[error("duplicate edge: {parent} -> {child} already exists")]
    DuplicateEdge { parent: Uuid, child: Uuid },

    #[error("cycle detected: inserting {parent} -> {child} would close a dependency cycle")]
    CycleDetected { parent: Uuid, child: Uuid },

    #[error("insufficient samples for service {service_id}: {actual} available, {required} required")]
    InsufficientSamples {
        service_id: Uuid,
        required: usize,
        actual: usize,
    },

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("no responder available for {severity} on service {service_id}")]
    NoResponderAvailable {
        severity: super::models::Severity,
        service_id: Uuid,
    },

    #[error("malformed pattern on runbook {runbook_id}: {reason}")]
    MalformedPattern { runbook_id: Uuid, reason: String },

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("validation error: {0}")]
    Validation(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
