//! Graph export
//!
//! All three renderings are produced from the same [`ResourceGraph`] value.

use crate::resolver::ResourceGraph;
use serde_json::json;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

pub const SUMMARY_FILE: &str = "summary.md";
pub const JSON_FILE: &str = "graph.json";
pub const DOT_FILE: &str = "graph.dot";

/// Markdown discovery summary
pub fn summary_markdown(graph: &ResourceGraph) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Resource discovery summary");
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "- Subscription: {}",
        graph.scope.subscription.as_deref().unwrap_or("-")
    );
    let _ = writeln!(
        out,
        "- Resource group: {}",
        graph.scope.resource_group.as_deref().unwrap_or("-")
    );
    let _ = writeln!(out, "- Resources: {}", graph.nodes.len());
    let _ = writeln!(out, "- Dependencies: {}", graph.edges.len());
    let _ = writeln!(out);

    let _ = writeln!(out, "## Resources by type");
    let _ = writeln!(out);
    let _ = writeln!(out, "| Type | Count |");
    let _ = writeln!(out, "|------|-------|");
    for (resource_type, count) in graph.counts_by_type() {
        let _ = writeln!(out, "| {} | {} |", md_escape(resource_type), count);
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "## Resources");
    let _ = writeln!(out);
    let _ = writeln!(out, "| Name | Type | Resource group | Status | Managed |");
    let _ = writeln!(out, "|------|------|----------------|--------|---------|");
    for node in graph.nodes.values() {
        let _ = writeln!(
            out,
            "| {} | {} | {} | {} | {} |",
            md_escape(&node.name),
            md_escape(&node.resource_type),
            md_escape(node.resource_group.as_deref().unwrap_or("-")),
            node.status,
            if node.managed_by_toolkit { "yes" } else { "no" }
        );
    }

    if !graph.edges.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "## Dependencies");
        let _ = writeln!(out);
        for edge in &graph.edges {
            let _ = writeln!(
                out,
                "- {} → {} ({})",
                label(graph, &edge.dependent_id),
                label(graph, &edge.dependency_id),
                edge.dependency_type
            );
        }
    }

    let cycles = graph.cycles();
    if !cycles.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "## Dependency cycles");
        let _ = writeln!(out);
        for cycle in &cycles {
            let names: Vec<String> = cycle.iter().map(|id| label(graph, id)).collect();
            let _ = writeln!(out, "- {}", names.join(" → "));
        }
    }

    out
}

/// JSON document with nodes, edges and detected cycles
pub fn graph_json(graph: &ResourceGraph) -> serde_json::Value {
    let nodes: Vec<_> = graph
        .nodes
        .values()
        .map(|node| {
            json!({
                "id": node.id,
                "name": node.name,
                "type": node.resource_type,
                "subscription": node.subscription,
                "resource_group": node.resource_group,
                "location": node.location,
                "status": node.status,
                "managed": node.managed_by_toolkit,
                "deleted": node.is_deleted(),
            })
        })
        .collect();
    let edges: Vec<_> = graph
        .edges
        .iter()
        .map(|edge| {
            json!({
                "from": edge.dependent_id,
                "to": edge.dependency_id,
                "type": edge.dependency_type,
                "relationship": edge.relationship,
            })
        })
        .collect();

    json!({
        "scope": graph.scope,
        "nodes": nodes,
        "edges": edges,
        "cycles": graph.cycles(),
    })
}

/// Graphviz rendering
pub fn graph_dot(graph: &ResourceGraph) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "digraph resources {{");
    let _ = writeln!(out, "  rankdir=LR;");
    let _ = writeln!(out, "  node [shape=box];");
    for node in graph.nodes.values() {
        let style = if node.is_deleted() {
            ", style=dashed"
        } else if node.managed_by_toolkit {
            ", style=bold"
        } else {
            ""
        };
        let _ = writeln!(
            out,
            "  \"{}\" [label=\"{}\\n{}\"{}];",
            dot_escape(&node.id),
            dot_escape(&node.name),
            dot_escape(&node.resource_type),
            style
        );
    }
    for edge in &graph.edges {
        let style = match edge.dependency_type {
            opsflow_state::DependencyType::Required => "",
            opsflow_state::DependencyType::Optional => " [style=dashed]",
        };
        let _ = writeln!(
            out,
            "  \"{}\" -> \"{}\"{};",
            dot_escape(&edge.dependent_id),
            dot_escape(&edge.dependency_id),
            style
        );
    }
    let _ = writeln!(out, "}}");
    out
}

/// Write `summary.md`, `graph.json` and `graph.dot` into `dir`
pub fn write_all(graph: &ResourceGraph, dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)?;

    let json = serde_json::to_string_pretty(&graph_json(graph))
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    let files = [
        (SUMMARY_FILE, summary_markdown(graph)),
        (JSON_FILE, json),
        (DOT_FILE, graph_dot(graph)),
    ];

    let mut written = Vec::with_capacity(files.len());
    for (name, content) in files {
        let path = dir.join(name);
        std::fs::write(&path, content)?;
        written.push(path);
    }
    tracing::info!(dir = %dir.display(), "Exported resource graph");
    Ok(written)
}

fn label(graph: &ResourceGraph, id: &str) -> String {
    graph
        .nodes
        .get(id)
        .map(|node| format!("{} ({})", node.name, node.resource_type))
        .unwrap_or_else(|| id.to_string())
}

fn md_escape(text: &str) -> String {
    text.replace('|', "\\|").replace(['\n', '\r'], " ")
}

fn dot_escape(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace(['\n', '\r'], " ")
}
