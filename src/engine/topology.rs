//! Directed service-dependency graph with an acyclicity invariant.
//!
//! Every edge mutation runs its reachability check and the insert under a
//! single write lock, so two concurrent insertions can never both pass
//! their cycle checks and jointly close a cycle. Traversal queries walk
//! incrementally-maintained adjacency maps rather than re-scanning the
//! edge set, keeping `descendants_of`/`ancestors_of` interactive on graphs
//! with tens of thousands of edges.

use super::error::{EngineError, Result};
use super::models::{DependencyEdge, DependencyKind};
use chrono::Utc;
use std::collections::{HashMap, HashSet, VecDeque};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Default)]
struct GraphInner {
    edges: HashMap<(Uuid, Uuid), DependencyEdge>,
    /// parent -> (child -> kind)
    children: HashMap<Uuid, HashMap<Uuid, DependencyKind>>,
    /// child -> (parent -> kind)
    parents: HashMap<Uuid, HashMap<Uuid, DependencyKind>>,
}

impl GraphInner {
    /// Breadth-first reachability over forward edges.
    fn reachable_from(&self, start: Uuid, kinds: Option<&[DependencyKind]>) -> HashSet<Uuid> {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([start]);

        while let Some(node) = queue.pop_front() {
            if let Some(next) = self.children.get(&node) {
                for (&child, &kind) in next {
                    if let Some(allowed) = kinds {
                        if !allowed.contains(&kind) {
                            continue;
                        }
                    }
                    if visited.insert(child) {
                        queue.push_back(child);
                    }
                }
            }
        }

        visited
    }

    fn reachable_reverse(&self, start: Uuid) -> HashSet<Uuid> {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([start]);

        while let Some(node) = queue.pop_front() {
            if let Some(prev) = self.parents.get(&node) {
                for &parent in prev.keys() {
                    if visited.insert(parent) {
                        queue.push_back(parent);
                    }
                }
            }
        }

        visited
    }
}

/// Owner of dependency-edge consistency. All mutation goes through
/// `add_edge`/`remove_edge`; readers see either the pre- or post-mutation
/// graph, never a partially applied one.
#[derive(Debug, Default)]
pub struct TopologyStore {
    inner: RwLock<GraphInner>,
}

impl TopologyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `parent -> child` after validating the structural invariants.
    ///
    /// Fails with `InvalidEdge` on a self-loop, `DuplicateEdge` on an
    /// existing ordered pair, and `CycleDetected` when a directed path from
    /// `child` already reaches `parent`. The check and the insert happen
    /// under one write lock.
    pub async fn add_edge(
        &self,
        parent: Uuid,
        child: Uuid,
        kind: DependencyKind,
    ) -> Result<DependencyEdge> {
        if parent == child {
            return Err(EngineError::InvalidEdge { service: parent });
        }

        let mut graph = self.inner.write().await;

        if graph.edges.contains_key(&(parent, child)) {
            return Err(EngineError::DuplicateEdge { parent, child });
        }

        // Reachability from child over the existing graph; finding parent
        // there means the new edge would close a cycle.
        if graph.reachable_from(child, None).contains(&parent) {
            return Err(EngineError::CycleDetected { parent, child });
        }

        let edge = DependencyEdge {
            parent,
            child,
            kind,
            created_at: Utc::now(),
        };

        graph.edges.insert((parent, child), edge.clone());
        graph.children.entry(parent).or_default().insert(child, kind);
        graph.parents.entry(child).or_default().insert(parent, kind);

        debug!(%parent, %child, ?kind, "dependency edge added");
        Ok(edge)
    }

    pub async fn remove_edge(&self, parent: Uuid, child: Uuid) -> Result<()> {
        let mut graph = self.inner.write().await;

        if graph.edges.remove(&(parent, child)).is_none() {
            return Err(EngineError::NotFound {
                kind: "dependency edge",
                id: format!("{parent} -> {child}"),
            });
        }

        if let Some(next) = graph.children.get_mut(&parent) {
            next.remove(&child);
        }
        if let Some(prev) = graph.parents.get_mut(&child) {
            prev.remove(&parent);
        }

        debug!(%parent, %child, "dependency edge removed");
        Ok(())
    }

    /// Full transitive set of services downstream of `service`, over edges
    /// of any kind, with no depth limit.
    pub async fn descendants_of(&self, service: Uuid) -> HashSet<Uuid> {
        self.inner.read().await.reachable_from(service, None)
    }

    /// Downstream set restricted to the given edge kinds. The blast-radius
    /// path uses this with `hard` and `soft` only.
    pub async fn descendants_filtered(
        &self,
        service: Uuid,
        kinds: &[DependencyKind],
    ) -> HashSet<Uuid> {
        self.inner.read().await.reachable_from(service, Some(kinds))
    }

    /// Full transitive set of services upstream of `service`.
    pub async fn ancestors_of(&self, service: Uuid) -> HashSet<Uuid> {
        self.inner.read().await.reachable_reverse(service)
    }

    /// Remove every edge touching `service`. Used by service cascade
    /// deletion; cannot violate acyclicity.
    pub async fn detach_service(&self, service: Uuid) -> usize {
        let mut graph = self.inner.write().await;

        let doomed: Vec<(Uuid, Uuid)> = graph
            .edges
            .keys()
            .filter(|(p, c)| *p == service || *c == service)
            .copied()
            .collect();

        for (parent, child) in &doomed {
            graph.edges.remove(&(*parent, *child));
            if let Some(next) = graph.children.get_mut(parent) {
                next.remove(child);
            }
            if let Some(prev) = graph.parents.get_mut(child) {
                prev.remove(parent);
            }
        }

        graph.children.remove(&service);
        graph.parents.remove(&service);
        doomed.len()
    }

    pub async fn edge_count(&self) -> usize {
        self.inner.read().await.edges.len()
    }

    pub async fn edges(&self) -> Vec<DependencyEdge> {
        self.inner.read().await.edges.values().cloned().collect()
    }
}
