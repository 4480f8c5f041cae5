//! Bomb detection: named structural degradation patterns.

// Counts here are small; f64 conversion is exact.
#![allow(clippy::cast_precision_loss)]

use serde::{Deserialize, Serialize};

use crate::graph::DependencyGraph;
use crate::intent::Intent;
use crate::scm::Simulation;

/// The named degradation patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BombKind {
    /// A high-centrality, high-fan-out change with a wide blast radius.
    Cascade,
    /// Circular dependency structure.
    Spiral,
    /// Several entropy indicators elevated at once.
    ThermalDeath,
}

impl BombKind {
    /// Returns the snake_case string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cascade => "cascade",
            Self::Spiral => "spiral",
            Self::ThermalDeath => "thermal_death",
        }
    }
}

/// A detected bomb.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bomb {
    /// Pattern kind.
    pub kind: BombKind,
    /// `high`, `medium`, or `critical`.
    pub severity: String,
    /// Human-readable detail.
    pub message: String,
    /// Nodes that triggered the pattern (cascade only, capped).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trigger_nodes: Vec<String>,
    /// Reachable-node count (cascade only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blast_radius: Option<usize>,
}

/// Detects cascade, spiral, and thermal-death patterns on the
/// per-intent graph.
#[must_use]
pub fn detect_bombs(
    intent: &Intent,
    simulation: &Simulation,
    graph: &DependencyGraph,
) -> Vec<Bomb> {
    let mut bombs = Vec::new();
    if graph.node_count() == 0 {
        return bombs;
    }

    detect_cascade(simulation, graph, &mut bombs);
    detect_spiral(graph, &mut bombs);
    detect_thermal_death(intent, simulation, graph, &mut bombs);
    bombs
}

/// Cascade: a changed file with `PageRank > 1.5/n`, out-degree ≥ 3, and
/// reachable descendants exceeding 1.5× the changed-file count.
fn detect_cascade(simulation: &Simulation, graph: &DependencyGraph, out: &mut Vec<Bomb>) {
    let rank = graph.pagerank();
    let n = graph.node_count().max(1) as f64;
    let threshold = 1.5 / n;

    let high_fanout: Vec<_> = graph
        .file_nodes()
        .into_iter()
        .filter(|idx| rank.get(idx).copied().unwrap_or(0.0) > threshold)
        .filter(|idx| graph.out_degree(*idx) >= 3)
        .collect();
    if high_fanout.is_empty() {
        return;
    }

    let mut affected = std::collections::HashSet::new();
    for idx in &high_fanout {
        affected.extend(graph.descendants(*idx));
    }
    if affected.len() as f64 > simulation.files_changed.len() as f64 * 1.5 {
        out.push(Bomb {
            kind: BombKind::Cascade,
            severity: "high".to_string(),
            message: format!(
                "Change touches {} high-centrality node(s) with potential cascade to {} nodes",
                high_fanout.len(),
                affected.len()
            ),
            trigger_nodes: high_fanout
                .iter()
                .take(5)
                .map(|idx| graph.node(*idx).label.clone())
                .collect(),
            blast_radius: Some(affected.len()),
        });
    }
}

/// Spiral: the graph is cyclic and at least two simple cycles of length
/// ≥ 2 exist (enumeration capped).
fn detect_spiral(graph: &DependencyGraph, out: &mut Vec<Bomb>) {
    if graph.is_dag() {
        return;
    }
    let cycles = graph.simple_cycles();
    if cycles.len() >= 2 {
        out.push(Bomb {
            kind: BombKind::Spiral,
            severity: "medium".to_string(),
            message: format!("{} circular dependency cycle(s) detected", cycles.len()),
            trigger_nodes: cycles
                .first()
                .map(|c| c.iter().take(5).cloned().collect())
                .unwrap_or_default(),
            blast_radius: None,
        });
    }
}

/// Thermal death: at least 3 of {files>10, conflicts>0, deps>3,
/// components>3, edges>2·nodes} hold simultaneously.
fn detect_thermal_death(
    intent: &Intent,
    simulation: &Simulation,
    graph: &DependencyGraph,
    out: &mut Vec<Bomb>,
) {
    let files = simulation.files_changed.len();
    let conflicts = simulation.conflicts.len();
    let deps = intent.dependencies.len();
    let components = graph.components();
    let edges = graph.edge_count();
    let nodes = graph.node_count();

    let mut hot = 0;
    if files > 10 {
        hot += 1;
    }
    if conflicts > 0 {
        hot += 1;
    }
    if deps > 3 {
        hot += 1;
    }
    if components > 3 {
        hot += 1;
    }
    if edges > nodes * 2 {
        hot += 1;
    }

    if hot >= 3 {
        out.push(Bomb {
            kind: BombKind::ThermalDeath,
            severity: "critical".to_string(),
            message: format!(
                "{hot}/5 entropy indicators elevated: files={files}, conflicts={conflicts}, \
                 deps={deps}, components={components}, edge_density={edges}/{nodes}"
            ),
            trigger_nodes: Vec::new(),
            blast_radius: None,
        });
    }
}
