//! Resource discovery
//!
//! Lists a scope through the effector, refreshes the cache with what was
//! seen, infers reference edges from resource properties and exports the
//! resulting graph.

use crate::cache::ResourceCache;
use crate::effector::{Effector, LiveProbe};
use crate::error::Result;
use crate::export;
use crate::resolver::{DependencyResolver, ResourceGraph};
use opsflow_state::{DependencyEdge, DependencyType, ResourceRecord, ResourceScope};
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryReport {
    pub graph: ResourceGraph,
    /// Resources stored from the live listing (0 when offline)
    pub refreshed: usize,
    /// `false` when the graph was built from stored state only
    pub live: bool,
    pub inferred_edges: usize,
    pub files: Vec<PathBuf>,
}

pub struct Discovery<'a> {
    pub cache: &'a ResourceCache,
    pub resolver: &'a DependencyResolver,
    pub effector: &'a dyn Effector,
    pub probe: &'a LiveProbe,
}

impl Discovery<'_> {
    /// Discover `scope` and write the exports into `output`
    ///
    /// With `offline` (or without a list template) only stored state is used.
    #[tracing::instrument(skip(self))]
    pub async fn run(
        &self,
        scope: &ResourceScope,
        output: &Path,
        offline: bool,
    ) -> Result<DiscoveryReport> {
        let mut refreshed = 0;
        let mut inferred_edges = 0;
        let mut live = false;

        if !offline {
            match self.probe.list(self.effector, scope).await? {
                Some(records) => {
                    live = true;
                    let mut stored = Vec::with_capacity(records.len());
                    for record in records {
                        stored.push(self.cache.store(record).await?);
                    }
                    refreshed = stored.len();

                    for edge in infer_references(&stored) {
                        self.cache.store_handle().add_dependency(&edge).await?;
                        inferred_edges += 1;
                    }
                }
                None => {
                    tracing::warn!("Live listing unavailable, using stored state");
                }
            }
        }

        let graph = self.resolver.build_graph(scope).await?;
        let files = export::write_all(&graph, output)?;

        tracing::info!(
            refreshed,
            inferred_edges,
            nodes = graph.nodes.len(),
            "Discovery finished"
        );
        Ok(DiscoveryReport {
            graph,
            refreshed,
            live,
            inferred_edges,
            files,
        })
    }
}

/// Edges from resources whose property values point at another resource
///
/// A string property equal to another resource's reported `id`, or nested
/// under it (`{id}/...`), is taken as a reference. Comparison ignores case.
pub fn infer_references(resources: &[ResourceRecord]) -> Vec<DependencyEdge> {
    let targets: Vec<(String, &ResourceRecord)> = resources
        .iter()
        .filter_map(|r| {
            let id = r.properties.get("id")?.as_str()?;
            (!id.is_empty()).then(|| (id.to_ascii_lowercase(), r))
        })
        .collect();

    let mut edges: Vec<DependencyEdge> = Vec::new();
    for resource in resources {
        let own_id = resource
            .properties
            .get("id")
            .and_then(|v| v.as_str())
            .map(str::to_ascii_lowercase);

        let mut values = Vec::new();
        collect_strings(&resource.properties, &mut values);

        for value in values {
            let value = value.to_ascii_lowercase();
            if own_id.as_deref() == Some(value.as_str()) {
                continue;
            }
            for (target_id, target) in &targets {
                let refers = value == *target_id || value.starts_with(&format!("{target_id}/"));
                if refers
                    && target.id != resource.id
                    && !own_id.as_deref().is_some_and(|own| own.starts_with(&format!("{target_id}/")))
                    && !edges
                        .iter()
                        .any(|e| e.dependent_id == resource.id && e.dependency_id == target.id)
                {
                    edges.push(
                        DependencyEdge::new(&resource.id, &target.id, DependencyType::Optional)
                            .with_relationship("references"),
                    );
                }
            }
        }
    }
    edges
}

fn collect_strings<'v>(value: &'v serde_json::Value, out: &mut Vec<&'v str>) {
    match value {
        serde_json::Value::String(s) => out.push(s),
        serde_json::Value::Array(items) => items.iter().for_each(|v| collect_strings(v, out)),
        serde_json::Value::Object(map) => map.values().for_each(|v| collect_strings(v, out)),
        _ => {}
    }
}
