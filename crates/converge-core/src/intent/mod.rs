//! The Intent lifecycle state machine.
//!
//! An [`Intent`] is a structured proposal to merge a source ref into a
//! target ref: not a free-form pull request but a semantic contract
//! carrying risk, priority, dependencies, origin, and human context. The
//! lifecycle is a strict state machine enforced by
//! [`Status::can_transition_to`]; the dependency list is validated
//! self-free and duplicate-free at construction and acyclic (over the
//! stored closure) at create time.

mod error;
mod state;

#[cfg(test)]
mod tests;

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use error::IntentError;
pub use state::{OriginType, RiskLevel, Status};

use crate::event::{new_id, now_utc};

/// Default priority for new intents (1 = highest, 5 = lowest).
pub const DEFAULT_PRIORITY: u8 = 3;

/// A structured proposal to merge `source` into `target`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    /// Opaque unique id (short hex).
    pub id: String,
    /// Source branch ref.
    pub source: String,
    /// Target branch ref.
    pub target: String,
    /// Lifecycle status.
    pub status: Status,
    /// Declared or computed risk level.
    #[serde(default)]
    pub risk_level: RiskLevel,
    /// Priority 1 (highest) ..= 5 (lowest).
    pub priority: u8,
    /// Provenance of the intent.
    #[serde(default)]
    pub origin_type: OriginType,
    /// Creation instant (UTC).
    pub created_at: DateTime<Utc>,
    /// Opaque actor id that created the intent.
    pub created_by: String,
    /// Last mutation instant (UTC).
    pub updated_at: DateTime<Utc>,
    /// Free-form human context (problem, objective, rationale). Never
    /// used for automated decisions.
    #[serde(default)]
    pub semantic: Value,
    /// Technical context. Only `scope_hint` participates in automated
    /// decisions; everything else is informational.
    #[serde(default)]
    pub technical: Value,
    /// Explicit check names required in addition to the profile's set.
    #[serde(default)]
    pub checks_required: Vec<String>,
    /// Intent ids this intent depends on (ordered, unique, acyclic).
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Number of failed revalidation passes.
    #[serde(default)]
    pub retries: u32,
    /// Optional tenant partition key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    /// Optional plan grouping key. Plans are derived queries, not
    /// entities.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<String>,
}

impl Intent {
    /// Creates a new `READY` intent with a fresh id and default
    /// priority/risk.
    #[must_use]
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        let now = now_utc();
        Self {
            id: new_id(),
            source: source.into(),
            target: target.into(),
            status: Status::Ready,
            risk_level: RiskLevel::default(),
            priority: DEFAULT_PRIORITY,
            origin_type: OriginType::default(),
            created_at: now,
            created_by: "system".to_string(),
            updated_at: now,
            semantic: Value::Object(serde_json::Map::new()),
            technical: Value::Object(serde_json::Map::new()),
            checks_required: Vec::new(),
            dependencies: Vec::new(),
            retries: 0,
            tenant_id: None,
            plan_id: None,
        }
    }

    /// Returns the ordered scope hints declared under
    /// `technical.scope_hint`.
    #[must_use]
    pub fn scope_hints(&self) -> Vec<String> {
        self.technical
            .get("scope_hint")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Validates structural invariants that do not need store access:
    /// priority range, no self-dependency, no duplicate dependencies.
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant.
    pub fn validate(&self) -> Result<(), IntentError> {
        if !(1..=5).contains(&self.priority) {
            return Err(IntentError::PriorityOutOfRange {
                value: i64::from(self.priority),
            });
        }
        let mut seen = HashSet::new();
        for dep in &self.dependencies {
            if *dep == self.id {
                return Err(IntentError::SelfDependency {
                    id: self.id.clone(),
                });
            }
            if !seen.insert(dep.as_str()) {
                return Err(IntentError::DuplicateDependency {
                    id: self.id.clone(),
                    dependency: dep.clone(),
                });
            }
        }
        Ok(())
    }

    /// Transitions the intent to `target`, enforcing the state machine
    /// and bumping `updated_at`.
    ///
    /// # Errors
    ///
    /// Returns [`IntentError::IllegalTransition`] if the move is outside
    /// the lifecycle walk.
    pub fn transition(&mut self, target: Status) -> Result<(), IntentError> {
        if !self.status.can_transition_to(target) {
            return Err(IntentError::IllegalTransition {
                from: self.status.as_str().to_string(),
                to: target.as_str().to_string(),
            });
        }
        self.status = target;
        self.updated_at = now_utc();
        Ok(())
    }
}

/// Checks the dependency closure of `intent` for cycles.
///
/// `resolve` maps an intent id to its stored dependency list (empty for
/// unknown ids). Walks the closure iteratively; a path back to any node
/// already on the walk is a cycle.
///
/// # Errors
///
/// Returns [`IntentError::DependencyCycle`] naming the intent at which
/// the cycle closed.
pub fn ensure_acyclic<F>(intent: &Intent, mut resolve: F) -> Result<(), IntentError>
where
    F: FnMut(&str) -> Vec<String>,
{
    // Iterative DFS with an explicit on-path set.
    let mut on_path: HashSet<String> = HashSet::new();
    let mut visited: HashSet<String> = HashSet::new();
    // Stack entries: (id, deps, next child index). Entering pushes onto
    // the path; exhausting children pops.
    let mut stack: Vec<(String, Vec<String>, usize)> =
        vec![(intent.id.clone(), intent.dependencies.clone(), 0)];
    on_path.insert(intent.id.clone());

    while let Some((id, deps, next)) = stack.pop() {
        if next < deps.len() {
            let child = deps[next].clone();
            stack.push((id, deps, next + 1));
            if on_path.contains(&child) {
                return Err(IntentError::DependencyCycle { id: child });
            }
            if visited.insert(child.clone()) {
                let child_deps = resolve(&child);
                on_path.insert(child.clone());
                stack.push((child, child_deps, 0));
            }
        } else {
            on_path.remove(&id);
        }
    }
    Ok(())
}
