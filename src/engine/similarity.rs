//! Nearest-neighbor index over resolved-incident embeddings.
//!
//! Embeddings are fixed-dimensionality dense vectors (384 in the current
//! design) produced by the external summarizer at resolution time.
//! Similarity is `1 - cosine_distance`. Retrieval is an exact linear
//! scan, which is fine up to a few thousand incidents; past that an
//! approximate nearest-neighbor structure can replace the scan behind the
//! same `find_similar` contract — the interface is the stable seam, the
//! scan is the swappable strategy.

use super::error::{EngineError, Result};
use super::models::IncidentStatus;
use super::store::EngineStore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

pub mod constants {
    /// Embedding width the index is configured for.
    pub const DEFAULT_DIMENSIONS: usize = 384;

    /// Minimum cosine similarity for a hit.
    pub const DEFAULT_THRESHOLD: f64 = 0.7;

    /// Hits returned per query.
    pub const DEFAULT_LIMIT: usize = 5;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarityConfig {
    pub dimensions: usize,
    pub threshold: f64,
    pub limit: usize,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            dimensions: constants::DEFAULT_DIMENSIONS,
            threshold: constants::DEFAULT_THRESHOLD,
            limit: constants::DEFAULT_LIMIT,
        }
    }
}

/// A remediation suggestion drawn from a similar resolved incident.
#[derive(Debug, Clone, Serialize)]
pub struct SimilarIncident {
    pub incident_id: Uuid,
    pub service_id: Uuid,
    pub service_name: String,
    pub similarity: f64,
    pub root_cause: Option<String>,
    pub remediation: Option<String>,
}

#[derive(Debug)]
pub struct IncidentMemoryIndex {
    store: Arc<EngineStore>,
    config: SimilarityConfig,
    entries: RwLock<HashMap<Uuid, Vec<f32>>>,
}

impl IncidentMemoryIndex {
    pub fn new(store: Arc<EngineStore>, config: SimilarityConfig) -> Self {
        Self {
            store,
            config,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &SimilarityConfig {
        &self.config
    }

    /// Commit a resolved incident's embedding into the index. Only
    /// resolved incidents carrying an embedding are indexable; the
    /// embedding must match the configured dimensionality.
    pub async fn index(&self, incident_id: Uuid) -> Result<()> {
        let incident = self.store.get_incident(incident_id).await?;

        if incident.status != IncidentStatus::Resolved {
            return Err(EngineError::Validation(format!(
                "incident {incident_id} is not resolved; only resolved incidents are indexed"
            )));
        }
        let Some(embedding) = incident.embedding else {
            return Err(EngineError::Validation(format!(
                "incident {incident_id} has no embedding to index"
            )));
        };
        if embedding.len() != self.config.dimensions {
            return Err(EngineError::DimensionMismatch {
                expected: self.config.dimensions,
                actual: embedding.len(),
            });
        }

        self.entries.write().await.insert(incident_id, embedding);
        info!(%incident_id, "resolved incident indexed");
        Ok(())
    }

    /// Nearest resolved incidents by cosine similarity: above `threshold`,
    /// descending, at most `limit`, each annotated with the matched
    /// incident's service name and resolution text.
    pub async fn find_similar(
        &self,
        query: &[f32],
        threshold: f64,
        limit: usize,
    ) -> Result<Vec<SimilarIncident>> {
        if query.len() != self.config.dimensions {
            return Err(EngineError::DimensionMismatch {
                expected: self.config.dimensions,
                actual: query.len(),
            });
        }

        let mut scored: Vec<(Uuid, f64)> = {
            let entries = self.entries.read().await;
            entries
                .iter()
                .map(|(&id, stored)| (id, cosine_similarity(query, stored)))
                .filter(|(_, similarity)| *similarity > threshold)
                .collect()
        };
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);

        let mut results = Vec::with_capacity(scored.len());
        for (incident_id, similarity) in scored {
            let incident = self.store.get_incident(incident_id).await?;
            let service_name = self
                .store
                .get_service(incident.service_id)
                .await
                .map(|s| s.name)
                .unwrap_or_else(|_| incident.service_id.to_string());
            results.push(SimilarIncident {
                incident_id,
                service_id: incident.service_id,
                service_name,
                similarity,
                root_cause: incident.root_cause,
                remediation: incident.remediation,
            });
        }

        debug!(hits = results.len(), "similarity query served");
        Ok(results)
    }

    /// Query with the configured default threshold and limit.
    pub async fn find_similar_default(&self, query: &[f32]) -> Result<Vec<SimilarIncident>> {
        self.find_similar(query, self.config.threshold, self.config.limit)
            .await
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

/// Cosine similarity with a zero-magnitude guard: a degenerate vector is
/// similar to nothing.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        dot += x as f64 * y as f64;
        norm_a += (x as f64).powi(2);
        norm_b += (y as f64).powi(2);
    }
    if norm_a <= f64::EPSILON || norm_b <= f64::EPSILON {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}
