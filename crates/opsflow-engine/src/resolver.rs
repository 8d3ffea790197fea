//! Dependency resolver
//!
//! Satisfaction is a local check: each direct dependency must be present,
//! live and (for required edges) not failed. Cycles therefore never block an
//! operation; the graph walk used for export tracks visited nodes instead.

use crate::cache::{CacheLookup, ResourceCache};
use crate::effector::{Effector, LiveProbe, ProbeResult};
use crate::error::Result;
use opsflow_core::find_cycles;
use opsflow_state::{
    DependencyEdge, DependencyType, ResourceFilter, ResourceRecord, ResourceScope, ResourceStatus,
    StateStore,
};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::sync::Arc;

/// Why a dependency is not satisfied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnmetReason {
    /// Never stored and could not be verified
    Missing,
    Deleted,
    Failed,
    NotFoundLive,
}

impl fmt::Display for UnmetReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnmetReason::Missing => write!(f, "missing"),
            UnmetReason::Deleted => write!(f, "deleted"),
            UnmetReason::Failed => write!(f, "failed"),
            UnmetReason::NotFoundLive => write!(f, "not found live"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnmetDependency {
    pub dependency_id: String,
    pub dependency_type: DependencyType,
    pub reason: UnmetReason,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Satisfaction {
    pub unmet: Vec<UnmetDependency>,
}

impl Satisfaction {
    pub fn is_satisfied(&self) -> bool {
        self.unmet.is_empty()
    }
}

/// Where a resource was found
#[derive(Debug, Clone, PartialEq)]
pub enum Presence {
    Present(ResourceRecord),
    Absent(UnmetReason),
}

/// Resources reachable from a scope through dependency edges
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResourceGraph {
    pub scope: ResourceScope,
    pub nodes: BTreeMap<String, ResourceRecord>,
    pub edges: Vec<DependencyEdge>,
}

impl ResourceGraph {
    /// Dependency cycles, each closed with its first node
    pub fn cycles(&self) -> Vec<Vec<String>> {
        let mut adjacency: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for edge in &self.edges {
            adjacency
                .entry(edge.dependent_id.clone())
                .or_default()
                .push(edge.dependency_id.clone());
        }
        find_cycles(&adjacency)
    }

    pub fn counts_by_type(&self) -> BTreeMap<&str, usize> {
        let mut counts = BTreeMap::new();
        for node in self.nodes.values() {
            *counts.entry(node.resource_type.as_str()).or_default() += 1;
        }
        counts
    }
}

#[derive(Clone)]
pub struct DependencyResolver {
    cache: ResourceCache,
    effector: Arc<dyn Effector>,
    probe: LiveProbe,
}

impl DependencyResolver {
    pub fn new(cache: ResourceCache, effector: Arc<dyn Effector>, probe: LiveProbe) -> Self {
        Self {
            cache,
            effector,
            probe,
        }
    }

    fn store(&self) -> &StateStore {
        self.cache.store_handle()
    }

    pub async fn get_dependencies(&self, resource_id: &str) -> Result<Vec<DependencyEdge>> {
        Ok(self.store().dependencies_of(resource_id).await?)
    }

    /// Locate a resource: fresh cache, then live probe, then the stored row
    ///
    /// A successful probe refreshes the cache. When no probe is available a
    /// stale stored row is trusted.
    pub async fn locate(
        &self,
        resource_type: &str,
        name: &str,
        scope: &ResourceScope,
    ) -> Result<Presence> {
        let cached = match self.cache.lookup(resource_type, name, scope).await? {
            CacheLookup::Hit(record) => return Ok(Presence::Present(record)),
            CacheLookup::Stale(record) => Some(record),
            CacheLookup::Miss => None,
        };

        let probe = self
            .probe
            .probe(self.effector.as_ref(), resource_type, name, scope)
            .await?;
        match (probe, cached) {
            (ProbeResult::Found(live), _) => {
                let stored = self.cache.store(live).await?;
                Ok(Presence::Present(stored))
            }
            (ProbeResult::NotFound, _) => Ok(Presence::Absent(UnmetReason::NotFoundLive)),
            (ProbeResult::Unavailable, Some(record)) => Ok(Presence::Present(record)),
            (ProbeResult::Unavailable, None) => Ok(Presence::Absent(UnmetReason::Missing)),
        }
    }

    /// Check every direct dependency of a stored resource
    #[tracing::instrument(skip(self))]
    pub async fn check_satisfied(&self, resource_id: &str) -> Result<Satisfaction> {
        let mut satisfaction = Satisfaction::default();

        for edge in self.get_dependencies(resource_id).await? {
            let reason = match self.store().get_resource(&edge.dependency_id).await? {
                None => Some(UnmetReason::Missing),
                Some(record) if record.is_deleted() => Some(UnmetReason::Deleted),
                Some(record) => {
                    match self
                        .locate(&record.resource_type, &record.name, &record.scope())
                        .await?
                    {
                        Presence::Present(current) => (edge.dependency_type
                            == DependencyType::Required
                            && current.status == ResourceStatus::Failed)
                            .then_some(UnmetReason::Failed),
                        Presence::Absent(reason) => Some(reason),
                    }
                }
            };

            if let Some(reason) = reason {
                tracing::debug!(dependency = %edge.dependency_id, %reason, "Dependency not satisfied");
                satisfaction.unmet.push(UnmetDependency {
                    dependency_id: edge.dependency_id.clone(),
                    dependency_type: edge.dependency_type,
                    reason,
                });
            }
        }

        Ok(satisfaction)
    }

    /// Breadth-first closure of the live resources in `scope`
    ///
    /// Edges leaving the scope are followed as well. Each node is expanded once.
    #[tracing::instrument(skip(self))]
    pub async fn build_graph(&self, scope: &ResourceScope) -> Result<ResourceGraph> {
        let mut graph = ResourceGraph {
            scope: scope.clone(),
            ..Default::default()
        };
        let mut visited: BTreeSet<String> = BTreeSet::new();
        let mut queue: VecDeque<String> = VecDeque::new();

        for record in self.store().list_resources(&ResourceFilter::in_scope(scope)).await? {
            if visited.insert(record.id.clone()) {
                queue.push_back(record.id.clone());
                graph.nodes.insert(record.id.clone(), record);
            }
        }

        while let Some(id) = queue.pop_front() {
            for edge in self.store().dependencies_of(&id).await? {
                if visited.insert(edge.dependency_id.clone())
                    && let Some(record) = self.store().get_resource(&edge.dependency_id).await?
                {
                    queue.push_back(record.id.clone());
                    graph.nodes.insert(record.id.clone(), record);
                }
                graph.edges.push(edge);
            }
        }

        tracing::info!(
            nodes = graph.nodes.len(),
            edges = graph.edges.len(),
            "Built resource graph"
        );
        Ok(graph)
    }
}
