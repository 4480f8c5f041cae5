//! Graph metrics: weighted PageRank, density, components, cycles,
//! longest path.

use std::collections::HashMap;

use petgraph::Direction;
use petgraph::algo::{connected_components, toposort};
use petgraph::graph::NodeIndex;
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};

use super::{CYCLE_CAP, DependencyGraph, NodeKind};

/// PageRank damping factor.
const DAMPING: f64 = 0.85;

/// PageRank iteration count (small graphs converge well before this).
const PAGERANK_ITERATIONS: usize = 50;

/// Step budget for bounded cycle enumeration.
const CYCLE_STEP_BUDGET: usize = 10_000;

/// A node with its PageRank.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedNode {
    /// Node label.
    pub node: String,
    /// PageRank value.
    pub rank: f64,
}

/// A high-centrality changed file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriticalFile {
    /// File path.
    pub file: String,
    /// PageRank value.
    pub pagerank: f64,
}

/// Aggregate metrics of a per-intent graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct GraphMetrics {
    /// Node count.
    pub nodes: usize,
    /// Edge count.
    pub edges: usize,
    /// Directed density `edges / (n·(n−1))`; 0 for singleton graphs.
    pub density: f64,
    /// Weakly connected component count.
    pub components: usize,
    /// Highest PageRank value.
    pub pagerank_max: f64,
    /// Top nodes by PageRank (at most 5).
    pub pagerank_top: Vec<RankedNode>,
    /// Top changed files by PageRank (at most 5).
    pub critical_files: Vec<CriticalFile>,
}

impl DependencyGraph {
    /// Weighted PageRank over the graph. Dangling mass is spread
    /// uniformly so ranks stay a distribution.
    #[must_use]
    pub fn pagerank(&self) -> HashMap<NodeIndex, f64> {
        let graph = self.inner();
        let n = graph.node_count();
        if n == 0 {
            return HashMap::new();
        }
        #[allow(clippy::cast_precision_loss)]
        let n_f = n as f64;
        let indices: Vec<NodeIndex> = graph.node_indices().collect();

        // Total outgoing weight per node.
        let mut out_weight: HashMap<NodeIndex, f64> = HashMap::new();
        for idx in &indices {
            let total: f64 = graph
                .edges_directed(*idx, Direction::Outgoing)
                .map(|e| e.weight().weight)
                .sum();
            out_weight.insert(*idx, total);
        }

        let mut rank: HashMap<NodeIndex, f64> =
            indices.iter().map(|idx| (*idx, 1.0 / n_f)).collect();

        for _ in 0..PAGERANK_ITERATIONS {
            let dangling: f64 = indices
                .iter()
                .filter(|idx| out_weight[*idx] <= f64::EPSILON)
                .map(|idx| rank[idx])
                .sum();

            let mut next: HashMap<NodeIndex, f64> = indices
                .iter()
                .map(|idx| (*idx, (1.0 - DAMPING) / n_f + DAMPING * dangling / n_f))
                .collect();

            for idx in &indices {
                let total = out_weight[idx];
                if total <= f64::EPSILON {
                    continue;
                }
                let share = DAMPING * rank[idx] / total;
                for edge in graph.edges_directed(*idx, Direction::Outgoing) {
                    *next.entry(edge.target()).or_insert(0.0) += share * edge.weight().weight;
                }
            }
            rank = next;
        }
        rank
    }

    /// Directed density; 0 when the graph has fewer than two nodes.
    #[must_use]
    pub fn density(&self) -> f64 {
        let n = self.node_count();
        if n < 2 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let n_f = n as f64;
        #[allow(clippy::cast_precision_loss)]
        let e_f = self.edge_count() as f64;
        e_f / (n_f * (n_f - 1.0))
    }

    /// Weakly connected component count (undirected view).
    #[must_use]
    pub fn components(&self) -> usize {
        connected_components(self.inner())
    }

    /// True when the directed graph has no cycle.
    #[must_use]
    pub fn is_dag(&self) -> bool {
        toposort(self.inner(), None).is_ok()
    }

    /// Enumerates simple cycles of length ≥ 2, capped at
    /// [`CYCLE_CAP`] and a fixed step budget.
    #[must_use]
    pub fn simple_cycles(&self) -> Vec<Vec<String>> {
        self.simple_cycles_capped(CYCLE_CAP)
    }

    /// Enumerates simple cycles of length ≥ 2 up to `cap`, under the
    /// same fixed step budget. Signals that count cycles with a
    /// different ceiling than the bomb-detection metric use this
    /// directly.
    #[must_use]
    pub fn simple_cycles_capped(&self, cap: usize) -> Vec<Vec<String>> {
        let graph = self.inner();
        let mut cycles: Vec<Vec<String>> = Vec::new();
        let mut steps = 0usize;

        // DFS restricted to nodes >= the start node, so each cycle is
        // found once, rooted at its smallest node.
        for start in graph.node_indices() {
            if cycles.len() >= cap || steps >= CYCLE_STEP_BUDGET {
                break;
            }
            let mut path: Vec<NodeIndex> = vec![start];
            let mut on_path: std::collections::HashSet<NodeIndex> =
                std::iter::once(start).collect();
            // Stack of (node, neighbor iterator position).
            let mut stack: Vec<(NodeIndex, Vec<NodeIndex>, usize)> = vec![(
                start,
                graph.neighbors_directed(start, Direction::Outgoing).collect(),
                0,
            )];

            while let Some((node, neighbors, mut cursor)) = stack.pop() {
                steps += 1;
                if cycles.len() >= cap || steps >= CYCLE_STEP_BUDGET {
                    break;
                }
                let mut descended = false;
                while cursor < neighbors.len() {
                    let next = neighbors[cursor];
                    cursor += 1;
                    if next == start && path.len() >= 2 {
                        cycles.push(
                            path.iter().map(|idx| graph[*idx].label.clone()).collect(),
                        );
                        if cycles.len() >= cap {
                            break;
                        }
                    } else if next > start && !on_path.contains(&next) {
                        stack.push((node, neighbors, cursor));
                        path.push(next);
                        on_path.insert(next);
                        stack.push((
                            next,
                            graph.neighbors_directed(next, Direction::Outgoing).collect(),
                            0,
                        ));
                        descended = true;
                        break;
                    }
                }
                if !descended {
                    on_path.remove(&node);
                    if path.last() == Some(&node) {
                        path.pop();
                    }
                }
            }
        }
        cycles
    }

    /// Longest path length (edge count) in the DAG view; 0 for cyclic
    /// graphs.
    #[must_use]
    pub fn longest_path_len(&self) -> usize {
        let graph = self.inner();
        let Ok(order) = toposort(graph, None) else {
            return 0;
        };
        let mut dist: HashMap<NodeIndex, usize> = HashMap::new();
        let mut longest = 0;
        for idx in order {
            let here = *dist.get(&idx).unwrap_or(&0);
            for edge in graph.edges_directed(idx, Direction::Outgoing) {
                let entry = dist.entry(edge.target()).or_insert(0);
                if here + 1 > *entry {
                    *entry = here + 1;
                    longest = longest.max(here + 1);
                }
            }
        }
        longest
    }

    /// Aggregate metrics for payloads and diagnostics.
    #[must_use]
    pub fn metrics(&self) -> GraphMetrics {
        if self.node_count() == 0 {
            return GraphMetrics::default();
        }
        let rank = self.pagerank();
        let mut ranked: Vec<(NodeIndex, f64)> = rank.iter().map(|(i, r)| (*i, *r)).collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let pagerank_top: Vec<RankedNode> = ranked
            .iter()
            .take(5)
            .map(|(idx, r)| RankedNode {
                node: self.node(*idx).label.clone(),
                rank: round4(*r),
            })
            .collect();
        let critical_files: Vec<CriticalFile> = ranked
            .iter()
            .filter(|(idx, _)| self.node(*idx).kind == NodeKind::File)
            .take(5)
            .map(|(idx, r)| CriticalFile {
                file: self.node(*idx).label.clone(),
                pagerank: round4(*r),
            })
            .collect();

        GraphMetrics {
            nodes: self.node_count(),
            edges: self.edge_count(),
            density: round4(self.density()),
            components: self.components(),
            pagerank_max: ranked.first().map_or(0.0, |(_, r)| round4(*r)),
            pagerank_top,
            critical_files,
        }
    }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}
