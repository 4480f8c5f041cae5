//! The four independent risk signals and the propagation/containment
//! ratios.

// Counts here are small (files, edges, cycles); f64 conversion is exact.
#![allow(clippy::cast_precision_loss)]

use std::collections::HashSet;

use super::{CORE_PATHS, CORE_TARGETS, clamp_signal, risk_bonus};
use crate::graph::{DependencyGraph, ImpactEdge, NodeKind};
use crate::intent::Intent;
use crate::scm::Simulation;

/// Entropic load: disorder introduced by the change.
///
/// `2·files + 15·conflicts + 6·deps + 3·dir_spread + 5·(components−1)`,
/// clamped to `[0, 100]`.
#[must_use]
pub fn compute_entropic_load(
    intent: &Intent,
    simulation: &Simulation,
    graph: &DependencyGraph,
) -> f64 {
    let files = simulation.files_changed.len() as f64;
    let conflicts = simulation.conflicts.len() as f64;
    let deps = intent.dependencies.len() as f64;

    let dirs: HashSet<&str> = simulation
        .files_changed
        .iter()
        .filter_map(|f| f.rsplit_once('/').map(|(dir, _)| dir))
        .collect();
    let dir_spread = dirs.len() as f64;

    let components = if graph.node_count() > 0 {
        graph.components() as f64
    } else {
        1.0
    };

    clamp_signal(
        files * 2.0 + conflicts * 15.0 + deps * 6.0 + dir_spread * 3.0 + (components - 1.0) * 5.0,
    )
}

/// Contextual value: how important the touched files are.
///
/// PageRank mass of changed files against the uniform baseline, plus
/// core-path ratio, core-target bonus, and the declared-level bonus.
#[must_use]
pub fn compute_contextual_value(
    intent: &Intent,
    simulation: &Simulation,
    graph: &DependencyGraph,
) -> f64 {
    if graph.node_count() == 0 {
        return 0.0;
    }
    let rank = graph.pagerank();
    let file_rank_sum: f64 = simulation
        .files_changed
        .iter()
        .filter_map(|f| graph.node_index(f))
        .map(|idx| rank.get(&idx).copied().unwrap_or(0.0))
        .sum();

    let n = graph.node_count().max(1) as f64;
    let expected_per_file = 1.0 / n;
    let files = simulation.files_changed.len().max(1) as f64;
    let importance_ratio = file_rank_sum / (expected_per_file * files);

    let core_touches = simulation
        .files_changed
        .iter()
        .filter(|f| CORE_PATHS.iter().any(|prefix| f.starts_with(prefix)))
        .count() as f64;
    let core_ratio = core_touches / files;

    let target_bonus = if CORE_TARGETS.contains(&intent.target.as_str()) {
        10.0
    } else {
        0.0
    };

    clamp_signal(
        (importance_ratio * 30.0).min(60.0)
            + core_ratio * 20.0
            + target_bonus
            + risk_bonus(intent.risk_level),
    )
}

/// Complexity delta: net change in structural complexity.
///
/// `40·density + min(30, 10·edge_node_ratio) + 3·cross_dir_edges +
/// 5·scope_count`.
#[must_use]
pub fn compute_complexity_delta(
    intent: &Intent,
    _simulation: &Simulation,
    graph: &DependencyGraph,
) -> f64 {
    if graph.node_count() == 0 {
        return 0.0;
    }
    let density = graph.density();
    let edge_node_ratio = graph.edge_count() as f64 / graph.node_count().max(1) as f64;

    // File-to-file edges crossing directory boundaries signal
    // architectural spread.
    let inner = graph.inner();
    let cross_dir = inner
        .edge_indices()
        .filter(|edge| {
            let Some((a, b)) = inner.edge_endpoints(*edge) else {
                return false;
            };
            let (na, nb) = (&inner[a], &inner[b]);
            na.kind == NodeKind::File
                && nb.kind == NodeKind::File
                && parent_of(&na.label) != parent_of(&nb.label)
        })
        .count() as f64;

    let scope_count = intent.scope_hints().len() as f64;

    clamp_signal(
        density * 40.0 + (edge_node_ratio * 10.0).min(30.0) + cross_dir * 3.0 + scope_count * 5.0,
    )
}

/// Cycle-count ceiling for the path-dependence signal. Deliberately
/// higher than the bomb-detection enumeration cap: spiral detection
/// only needs to know cycles exist, while this signal counts them.
const PATH_DEP_CYCLE_CAP: usize = 20;

/// Path dependence: sensitivity to merge order.
///
/// `20·conflicts + 4·core_touches + 8·deps + 5·min(20, cycles) +
/// 2·longest_path`.
#[must_use]
pub fn compute_path_dependence(
    intent: &Intent,
    simulation: &Simulation,
    graph: &DependencyGraph,
) -> f64 {
    let conflicts = simulation.conflicts.len() as f64;
    let deps = intent.dependencies.len() as f64;
    let core_touches = simulation
        .files_changed
        .iter()
        .filter(|f| CORE_PATHS.iter().any(|prefix| f.starts_with(prefix)))
        .count() as f64;

    let cycles = if graph.is_dag() {
        0.0
    } else {
        graph.simple_cycles_capped(PATH_DEP_CYCLE_CAP).len() as f64
    };
    let longest = graph.longest_path_len() as f64;

    clamp_signal(conflicts * 20.0 + core_touches * 4.0 + deps * 8.0 + cycles * 5.0 + longest * 2.0)
}

/// Propagation: how far the change reaches.
///
/// Graph half: `min(50, 10·avg_out_degree_of_file_nodes)`. Edge half:
/// `min(50, 3·Σweights + 2·unique_targets)`. Sum capped at 100.
#[must_use]
pub fn propagation_score(graph: &DependencyGraph, edges: &[ImpactEdge]) -> f64 {
    if graph.node_count() == 0 && edges.is_empty() {
        return 0.0;
    }

    let file_nodes = graph.file_nodes();
    let graph_half = if file_nodes.is_empty() {
        0.0
    } else {
        let total_out: usize = file_nodes.iter().map(|idx| graph.out_degree(*idx)).sum();
        let avg_out = total_out as f64 / file_nodes.len() as f64;
        (avg_out * 10.0).min(50.0)
    };

    let total_weight: f64 = edges.iter().map(|e| e.weight).sum();
    let unique_targets: HashSet<&str> = edges.iter().map(|e| e.target.as_str()).collect();
    let edge_half = (total_weight * 3.0 + unique_targets.len() as f64 * 2.0).min(50.0);

    clamp_signal(graph_half + edge_half)
}

/// Containment: how isolated the change is. 1.0 = perfectly contained.
///
/// `max(0, 1 − 0.05·crossings − 0.03·(components−1))`, where crossings
/// counts the unique boundary tokens (impact targets, dependencies,
/// scopes), rounded to two decimals.
#[must_use]
pub fn containment_score(
    intent: &Intent,
    graph: &DependencyGraph,
    edges: &[ImpactEdge],
) -> f64 {
    if graph.node_count() == 0 && edges.is_empty() {
        return 1.0;
    }

    let mut boundary: HashSet<String> = edges.iter().map(|e| e.target.clone()).collect();
    boundary.extend(intent.dependencies.iter().cloned());
    boundary.extend(intent.scope_hints());

    let crossings = boundary.len();
    if crossings == 0 {
        return 1.0;
    }

    let components = if graph.node_count() > 0 {
        graph.components() as f64
    } else {
        1.0
    };
    let raw = 1.0 - crossings as f64 * 0.05 - (components - 1.0) * 0.03;
    (raw.max(0.0) * 100.0).round() / 100.0
}

fn parent_of(path: &str) -> &str {
    path.rsplit_once('/').map_or("", |(dir, _)| dir)
}
