//! Per-intent dependency graph.
//!
//! Each validation builds a small directed, weighted, typed graph from
//! the intent and its merge simulation: changed files, their directory
//! ancestors, declared scopes, intent dependencies, the target branch,
//! and (when available) historical co-change pairs. The risk engine
//! reads everything from this graph (centrality, dispersion, density,
//! cycles), so the construction rules and edge weights are fixed:
//!
//! | edge | direction | weight |
//! |---|---|---|
//! | `contained_in` | file → dir | 0.3 |
//! | `co_located` | file ↔ file (same dir) | 0.2 each way |
//! | `scope_contains` | scope → file (name match) | 0.5 |
//! | `scope_touches` | scope → file (no match) | 0.2 |
//! | `depends_on` | intent → dep | 0.8 |
//! | `merge_target` | intent → branch | 1.0 |
//! | `co_change` | file ↔ file (history) | `min(1.0, 0.1·pairs)` |

mod metrics;


use std::collections::HashMap;

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};

pub use metrics::{CriticalFile, GraphMetrics, RankedNode};

use crate::intent::Intent;
use crate::scm::Simulation;

/// Cap on simple-cycle enumeration.
pub const CYCLE_CAP: usize = 10;

/// Cap on files contributing `modifies_file` impact edges.
const IMPACT_FILE_CAP: usize = 20;

/// Node kinds in the per-intent graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// A changed file.
    File,
    /// A directory ancestor of a changed file.
    Directory,
    /// A declared scope hint.
    Scope,
    /// Another intent this one depends on.
    Dependency,
    /// The intent itself.
    Intent,
    /// The merge target branch.
    Branch,
}

/// A graph node: stable label plus kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphNode {
    /// Node label (path, scope name, intent id, branch name).
    pub label: String,
    /// Node kind.
    pub kind: NodeKind,
}

/// Edge kinds with their fixed base weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// File is contained in a directory.
    ContainedIn,
    /// Files share a directory.
    CoLocated,
    /// Scope name occurs in the file path.
    ScopeContains,
    /// Scope declared but the name does not occur in the path.
    ScopeTouches,
    /// Intent depends on another intent.
    DependsOn,
    /// Intent merges into the target branch.
    MergeTarget,
    /// Files historically change together.
    CoChange,
}

impl EdgeKind {
    /// The fixed weight for this kind (`co_change` weights are computed
    /// from pair counts instead).
    #[must_use]
    pub const fn base_weight(self) -> f64 {
        match self {
            Self::ContainedIn => 0.3,
            Self::CoLocated | Self::ScopeTouches => 0.2,
            Self::ScopeContains => 0.5,
            Self::DependsOn => 0.8,
            Self::MergeTarget => 1.0,
            Self::CoChange => 0.1,
        }
    }
}

/// A weighted, typed edge.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphEdge {
    /// Edge kind.
    pub kind: EdgeKind,
    /// Edge weight.
    pub weight: f64,
}

/// One historical co-change observation between two files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoChangePair {
    /// First file.
    pub file_a: String,
    /// Second file.
    pub file_b: String,
    /// Number of commits touching both.
    pub co_changes: u32,
}

/// A flat impact edge (legacy projection consumed by policy payloads).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactEdge {
    /// Edge source label.
    pub source: String,
    /// Edge target label.
    pub target: String,
    /// Relation name.
    pub kind: String,
    /// Edge weight.
    pub weight: f64,
}

/// The per-intent dependency graph.
pub struct DependencyGraph {
    graph: DiGraph<GraphNode, GraphEdge>,
    index: HashMap<String, NodeIndex>,
}

impl DependencyGraph {
    /// Builds the graph from an intent, its simulation, and optional
    /// co-change history.
    #[must_use]
    pub fn build(intent: &Intent, simulation: &Simulation, coupling: &[CoChangePair]) -> Self {
        let mut g = Self {
            graph: DiGraph::new(),
            index: HashMap::new(),
        };

        // File nodes and directory containment.
        for file in &simulation.files_changed {
            let file_idx = g.intern(file, NodeKind::File);
            if let Some(parent) = parent_dir(file) {
                let dir_idx = g.intern(&parent, NodeKind::Directory);
                g.connect(file_idx, dir_idx, EdgeKind::ContainedIn, None);
            }
        }

        // Proximity coupling: files sharing a directory, both ways.
        let mut by_dir: HashMap<String, Vec<&String>> = HashMap::new();
        for file in &simulation.files_changed {
            let dir = parent_dir(file).unwrap_or_else(|| ".".to_string());
            by_dir.entry(dir).or_default().push(file);
        }
        for files in by_dir.values() {
            for (i, a) in files.iter().enumerate() {
                for b in &files[i + 1..] {
                    let ai = g.intern(a, NodeKind::File);
                    let bi = g.intern(b, NodeKind::File);
                    g.connect(ai, bi, EdgeKind::CoLocated, None);
                    g.connect(bi, ai, EdgeKind::CoLocated, None);
                }
            }
        }

        // Scope hints: contains on case-folded name match, touches
        // otherwise.
        for scope in intent.scope_hints() {
            let scope_idx = g.intern(&scope, NodeKind::Scope);
            let needle = scope.to_lowercase();
            for file in &simulation.files_changed {
                let file_idx = g.intern(file, NodeKind::File);
                let kind = if file.to_lowercase().contains(&needle) {
                    EdgeKind::ScopeContains
                } else {
                    EdgeKind::ScopeTouches
                };
                g.connect(scope_idx, file_idx, kind, None);
            }
        }

        // Intent, dependencies, and the merge target.
        let intent_idx = g.intern(&intent.id, NodeKind::Intent);
        for dep in &intent.dependencies {
            let dep_idx = g.intern(dep, NodeKind::Dependency);
            g.connect(intent_idx, dep_idx, EdgeKind::DependsOn, None);
        }
        let branch_idx = g.intern(&intent.target, NodeKind::Branch);
        g.connect(intent_idx, branch_idx, EdgeKind::MergeTarget, None);

        // Historical co-change, only where the pair touches this change.
        let changed: std::collections::HashSet<&str> =
            simulation.files_changed.iter().map(String::as_str).collect();
        for pair in coupling {
            if pair.file_a.is_empty() || pair.file_b.is_empty() {
                continue;
            }
            if changed.contains(pair.file_a.as_str()) || changed.contains(pair.file_b.as_str()) {
                let weight = (f64::from(pair.co_changes) * EdgeKind::CoChange.base_weight())
                    .min(1.0);
                let ai = g.intern(&pair.file_a, NodeKind::File);
                let bi = g.intern(&pair.file_b, NodeKind::File);
                g.connect(ai, bi, EdgeKind::CoChange, Some(weight));
                g.connect(bi, ai, EdgeKind::CoChange, Some(weight));
            }
        }

        g
    }

    fn intern(&mut self, label: &str, kind: NodeKind) -> NodeIndex {
        if let Some(idx) = self.index.get(label) {
            return *idx;
        }
        let idx = self.graph.add_node(GraphNode {
            label: label.to_string(),
            kind,
        });
        self.index.insert(label.to_string(), idx);
        idx
    }

    /// Adds an edge unless an equivalent one already exists.
    fn connect(&mut self, a: NodeIndex, b: NodeIndex, kind: EdgeKind, weight: Option<f64>) {
        let exists = self
            .graph
            .edges_connecting(a, b)
            .any(|e| e.weight().kind == kind);
        if !exists {
            self.graph.add_edge(
                a,
                b,
                GraphEdge {
                    kind,
                    weight: weight.unwrap_or_else(|| kind.base_weight()),
                },
            );
        }
    }

    /// Number of nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Number of edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Looks up a node by label.
    #[must_use]
    pub fn node_index(&self, label: &str) -> Option<NodeIndex> {
        self.index.get(label).copied()
    }

    /// The node payload at `idx`.
    #[must_use]
    pub fn node(&self, idx: NodeIndex) -> &GraphNode {
        &self.graph[idx]
    }

    /// Indices of all file nodes.
    #[must_use]
    pub fn file_nodes(&self) -> Vec<NodeIndex> {
        self.graph
            .node_indices()
            .filter(|idx| self.graph[*idx].kind == NodeKind::File)
            .collect()
    }

    /// Out-degree of a node.
    #[must_use]
    pub fn out_degree(&self, idx: NodeIndex) -> usize {
        self.graph.edges_directed(idx, Direction::Outgoing).count()
    }

    /// All nodes reachable from `start` (excluding `start` itself).
    #[must_use]
    pub fn descendants(&self, start: NodeIndex) -> std::collections::HashSet<NodeIndex> {
        let mut dfs = petgraph::visit::Dfs::new(&self.graph, start);
        let mut reached = std::collections::HashSet::new();
        while let Some(idx) = dfs.next(&self.graph) {
            if idx != start {
                reached.insert(idx);
            }
        }
        reached
    }

    pub(crate) fn inner(&self) -> &DiGraph<GraphNode, GraphEdge> {
        &self.graph
    }
}

/// Builds the flat impact-edge list used in risk payloads.
#[must_use]
pub fn build_impact_edges(intent: &Intent, simulation: &Simulation) -> Vec<ImpactEdge> {
    let mut edges = vec![ImpactEdge {
        source: intent.source.clone(),
        target: intent.target.clone(),
        kind: "merge_target".to_string(),
        weight: 1.0,
    }];
    for dep in &intent.dependencies {
        edges.push(ImpactEdge {
            source: intent.id.clone(),
            target: dep.clone(),
            kind: "depends_on".to_string(),
            weight: 0.8,
        });
    }
    for scope in intent.scope_hints() {
        edges.push(ImpactEdge {
            source: intent.id.clone(),
            target: scope,
            kind: "touches_scope".to_string(),
            weight: 0.5,
        });
    }
    for file in simulation.files_changed.iter().take(IMPACT_FILE_CAP) {
        edges.push(ImpactEdge {
            source: intent.id.clone(),
            target: file.clone(),
            kind: "modifies_file".to_string(),
            weight: 0.3,
        });
    }
    edges
}

/// Derives co-change pairs from a commit history (pairwise file
/// co-occurrence, commits with huge file lists skipped).
#[must_use]
pub fn coupling_from_log(commits: &[crate::scm::Commit]) -> Vec<CoChangePair> {
    const MAX_FILES_PER_COMMIT: usize = 30;
    let mut counts: HashMap<(String, String), u32> = HashMap::new();
    for commit in commits {
        if commit.files.len() > MAX_FILES_PER_COMMIT {
            continue;
        }
        for (i, a) in commit.files.iter().enumerate() {
            for b in &commit.files[i + 1..] {
                let key = if a <= b {
                    (a.clone(), b.clone())
                } else {
                    (b.clone(), a.clone())
                };
                *counts.entry(key).or_insert(0) += 1;
            }
        }
    }
    let mut pairs: Vec<CoChangePair> = counts
        .into_iter()
        .map(|((file_a, file_b), co_changes)| CoChangePair {
            file_a,
            file_b,
            co_changes,
        })
        .collect();
    pairs.sort_by(|a, b| b.co_changes.cmp(&a.co_changes).then(a.file_a.cmp(&b.file_a)));
    pairs
}

/// Parent directory of a slash path, when it has one.
fn parent_dir(path: &str) -> Option<String> {
    path.rsplit_once('/').map(|(dir, _)| dir.to_string())
}
