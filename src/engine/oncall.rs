//! On-call resolution over time-bounded, priority-ordered rotation
//! entries.
//!
//! Resolution is a pure read over a schedule snapshot: no locking beyond
//! the snapshot itself, and no linearizability guarantee with concurrent
//! schedule edits — repeated calls may return different responders while
//! an edit propagates, which callers must tolerate.

use super::error::{EngineError, Result};
use super::models::{OnCallEntry, Severity};
use super::store::EngineStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// What the notification channel needs to page someone. Delivery is an
/// external concern; failures there never roll back incident state.
#[derive(Debug, Clone)]
pub struct Page {
    pub entry_id: Uuid,
    pub team: String,
    pub responder: String,
    pub contact_channels: Vec<String>,
    pub priority: u8,
}

impl From<OnCallEntry> for Page {
    fn from(entry: OnCallEntry) -> Self {
        Self {
            entry_id: entry.id,
            team: entry.team,
            responder: entry.responder,
            contact_channels: entry.contact_channels,
            priority: entry.priority,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OnCallResolver {
    store: Arc<EngineStore>,
}

impl OnCallResolver {
    pub fn new(store: Arc<EngineStore>) -> Self {
        Self { store }
    }

    /// Resolve the escalation target for `severity` on `service_id` right
    /// now. Fails with `NoResponderAvailable` when nothing matches; the
    /// caller's escalation fallback handles that, it is not fatal to the
    /// incident.
    pub async fn resolve(&self, severity: Severity, service_id: Uuid) -> Result<Page> {
        self.resolve_at(severity, service_id, Utc::now()).await
    }

    /// `resolve` with an explicit evaluation instant.
    pub async fn resolve_at(
        &self,
        severity: Severity,
        service_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Page> {
        let entries = self.store.oncall_entries().await;

        let winner = entries
            .into_iter()
            .filter(|entry| entry.covers(severity, service_id, now))
            .min_by_key(|entry| (entry.priority, entry.starts_at));

        match winner {
            Some(entry) => {
                debug!(
                    %severity,
                    %service_id,
                    responder = %entry.responder,
                    priority = entry.priority,
                    "on-call resolved"
                );
                Ok(Page::from(entry))
            }
            None => {
                warn!(%severity, %service_id, "no responder available");
                Err(EngineError::NoResponderAvailable {
                    severity,
                    service_id,
                })
            }
        }
    }
}
