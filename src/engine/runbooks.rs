//! Runbook matching over incident error text.
//!
//! Patterns are data-driven regular expressions, compiled lazily and
//! cached per runbook id. The cache entry carries the runbook's
//! `last_updated_at`, so an edit invalidates it on the next match. A
//! pattern that fails to compile is skipped with a warning and never
//! aborts the match pass — one bad runbook must not mask the rest.

use super::error::Result;
use super::models::Runbook;
use super::store::EngineStore;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

/// A runbook candidate for an incident, ranked by historical success.
#[derive(Debug, Clone)]
pub struct RunbookMatch {
    pub runbook_id: Uuid,
    pub name: String,
    pub steps: Vec<String>,
    pub success_rate: f64,
    pub times_used: u64,
    pub last_updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct CachedPattern {
    compiled: Regex,
    /// `last_updated_at` of the runbook at compile time; a newer value on
    /// the runbook means the cache entry is stale.
    compiled_for: DateTime<Utc>,
}

#[derive(Debug)]
pub struct RunbookMatcher {
    store: Arc<EngineStore>,
    cache: RwLock<HashMap<Uuid, CachedPattern>>,
}

impl RunbookMatcher {
    pub fn new(store: Arc<EngineStore>) -> Self {
        Self {
            store,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Match `error_text` against every enabled runbook in scope for the
    /// service (global runbooks plus ones scoped to it). Candidates come
    /// back ordered by descending success rate, ties broken by most
    /// recent `last_updated_at`.
    pub async fn match_incident(&self, error_text: &str, service_id: Uuid) -> Vec<RunbookMatch> {
        let candidates = self.store.runbooks_in_scope(service_id).await;

        let mut matches = Vec::new();
        for runbook in candidates {
            let Some(regex) = self.compiled_pattern(&runbook).await else {
                continue;
            };
            if regex.is_match(error_text) {
                matches.push(RunbookMatch {
                    runbook_id: runbook.id,
                    name: runbook.name.clone(),
                    steps: runbook.steps.clone(),
                    success_rate: runbook.success_rate(),
                    times_used: runbook.times_used,
                    last_updated_at: runbook.last_updated_at,
                });
            }
        }

        matches.sort_by(|a, b| {
            b.success_rate
                .partial_cmp(&a.success_rate)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.last_updated_at.cmp(&a.last_updated_at))
        });

        debug!(
            %service_id,
            candidates = matches.len(),
            "runbooks matched against error text"
        );
        matches
    }

    /// Record an execution outcome. Counters are monotonic and the rate
    /// stays derived; see `EngineStore::record_runbook_usage` for the
    /// lost-update guarantee.
    pub async fn record_usage(&self, runbook_id: Uuid, was_successful: bool) -> Result<Runbook> {
        self.store
            .record_runbook_usage(runbook_id, was_successful)
            .await
    }

    /// Fetch or lazily compile the runbook's pattern. Returns `None` on a
    /// malformed pattern, which is logged and skipped per the error
    /// policy.
    async fn compiled_pattern(&self, runbook: &Runbook) -> Option<Regex> {
        {
            let cache = self.cache.read().await;
            if let Some(entry) = cache.get(&runbook.id) {
                if entry.compiled_for == runbook.last_updated_at {
                    return Some(entry.compiled.clone());
                }
            }
        }

        match Regex::new(&runbook.pattern) {
            Ok(compiled) => {
                self.cache.write().await.insert(
                    runbook.id,
                    CachedPattern {
                        compiled: compiled.clone(),
                        compiled_for: runbook.last_updated_at,
                    },
                );
                Some(compiled)
            }
            Err(err) => {
                warn!(
                    runbook_id = %runbook.id,
                    error = %err,
                    "malformed runbook pattern skipped"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn matcher_with(runbooks: Vec<Runbook>) -> (RunbookMatcher, Arc<EngineStore>) {
        let store = Arc::new(EngineStore::new());
        for runbook in runbooks {
            store.create_runbook(runbook).await;
        }
        (RunbookMatcher::new(store.clone()), store)
    }

    fn runbook_with_stats(
        name: &str,
        pattern: &str,
        times_used: u64,
        success_count: u64,
    ) -> Runbook {
        let mut runbook = Runbook::new(name, pattern, None, vec!["step 1".to_string()]);
        runbook.times_used = times_used;
        runbook.success_count = success_count;
        runbook
    }

    #[tokio::test]
    async fn test_ranking_by_success_rate() {
        let (matcher, _) = matcher_with(vec![
            runbook_with_stats("restart pods", "connection timeout", 5, 3), // 0.6
            runbook_with_stats("scale up", "connection timeout", 10, 8),    // 0.8
        ])
        .await;

        let matches = matcher
            .match_incident("upstream connection timeout after 30s", Uuid::new_v4())
            .await;

        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].name, "scale up");
        assert!((matches[0].success_rate - 0.8).abs() < 1e-9);
        assert_eq!(matches[1].name, "restart pods");
    }

    #[tokio::test]
    async fn test_unused_runbook_rate_is_zero() {
        let (matcher, _) = matcher_with(vec![
            runbook_with_stats("never tried", "timeout", 0, 0),
            runbook_with_stats("proven", "timeout", 4, 1), // 0.25
        ])
        .await;

        let matches = matcher.match_incident("timeout", Uuid::new_v4()).await;
        assert_eq!(matches[0].name, "proven");
        assert_eq!(matches[1].success_rate, 0.0);
    }

    #[tokio::test]
    async fn test_scope_filtering() {
        let service_a = Uuid::new_v4();
        let service_b = Uuid::new_v4();

        let global = Runbook::new("global", "disk full", None, vec![]);
        let scoped = Runbook::new("scoped", "disk full", Some(service_a), vec![]);
        let (matcher, _) = matcher_with(vec![global, scoped]).await;

        let for_a = matcher.match_incident("disk full on /var", service_a).await;
        assert_eq!(for_a.len(), 2);

        let for_b = matcher.match_incident("disk full on /var", service_b).await;
        assert_eq!(for_b.len(), 1);
        assert_eq!(for_b[0].name, "global");
    }

    #[tokio::test]
    async fn test_disabled_runbook_excluded() {
        let mut disabled = Runbook::new("disabled", "oom", None, vec![]);
        disabled.enabled = false;
        let (matcher, _) = matcher_with(vec![disabled]).await;

        assert!(matcher
            .match_incident("oom killed", Uuid::new_v4())
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn test_malformed_pattern_skipped_not_fatal() {
        let (matcher, _) = matcher_with(vec![
            Runbook::new("broken", "unclosed [group", None, vec![]),
            Runbook::new("working", "timeout", None, vec![]),
        ])
        .await;

        let matches = matcher.match_incident("timeout", Uuid::new_v4()).await;
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].name, "working");
    }

    #[tokio::test]
    async fn test_cache_invalidated_on_edit() {
        let (matcher, store) = matcher_with(vec![Runbook::new("evolving", "timeout", None, vec![])])
            .await;
        let runbook = store
            .runbooks_in_scope(Uuid::new_v4())
            .await
            .pop()
            .unwrap();

        assert_eq!(matcher.match_incident("timeout", Uuid::new_v4()).await.len(), 1);

        // Edit the pattern; the stale cached regex must not keep matching.
        let mut edited = runbook.clone();
        edited.pattern = "segfault".to_string();
        store.update_runbook(edited).await.unwrap();

        assert!(matcher.match_incident("timeout", Uuid::new_v4()).await.is_empty());
        assert_eq!(matcher.match_incident("segfault", Uuid::new_v4()).await.len(), 1);
    }

    #[tokio::test]
    async fn test_record_usage_updates_rate() {
        let (matcher, store) = matcher_with(vec![Runbook::new("restart", "oom", None, vec![])])
            .await;
        let runbook = store.runbooks_in_scope(Uuid::new_v4()).await.pop().unwrap();

        matcher.record_usage(runbook.id, true).await.unwrap();
        matcher.record_usage(runbook.id, true).await.unwrap();
        matcher.record_usage(runbook.id, false).await.unwrap();

        let updated = store.get_runbook(runbook.id).await.unwrap();
        assert_eq!(updated.times_used, 3);
        assert_eq!(updated.success_count, 2);
        assert!((updated.success_rate() - 2.0 / 3.0).abs() < 1e-9);
    }
}
