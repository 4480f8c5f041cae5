//! Queue processor: dependency-ordered merging under the advisory
//! lock.
//!
//! One processor runs at a time per store, enforced by a named lock
//! with a 300 s TTL (kill-safe: a crashed holder is force-released by
//! the next acquirer once the TTL lapses). Each pass selects
//! `VALIDATED` intents in priority order, skips anything with unmerged
//! dependencies or open reviews, revalidates every candidate against
//! the current target state, bounds retries, and (with auto-confirm)
//! executes the merge.
//!
//! Dependencies are skipped, not failed: an intent whose dependency is
//! `REJECTED` simply stays skipped until an operator intervenes.

#[cfg(test)]
mod tests;

use std::time::Duration;

use serde_json::json;
use thiserror::Error;

use crate::engine::{Engine, EngineError, Outcome};
use crate::event::{Event, EventType};
use crate::intake::IntakeMode;
use crate::intent::{Intent, RiskLevel, Status};
use crate::review;
use crate::store::{QueueLock, StoreError};

/// The advisory lock name.
pub const QUEUE_LOCK_NAME: &str = "queue";

/// Lock TTL.
pub const QUEUE_LOCK_TTL: Duration = Duration::from_secs(300);

/// Default batch size per pass.
pub const DEFAULT_BATCH_LIMIT: usize = 20;

/// What happened to one intent during a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueAction {
    /// Skipped: a dependency is not merged yet.
    DependencyBlocked,
    /// Rejected (terminal).
    Rejected,
    /// Skipped: a review is still open.
    ReviewPending,
    /// Blocked on revalidation, returned to `READY`.
    Requeued,
    /// Revalidated and queued (no auto-confirm).
    Queued,
    /// Merged.
    Merged,
    /// Merge execution failed; returned for another pass.
    MergeFailed,
    /// Skipped by intake mode or an infrastructure fault.
    Skipped,
}

/// Per-intent record of a queue pass.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ProcessedIntent {
    /// The intent.
    pub intent_id: String,
    /// What happened.
    pub action: QueueAction,
    /// Human-readable detail.
    pub detail: String,
}

/// Queue pass configuration.
#[derive(Debug, Clone)]
pub struct QueueOptions {
    /// Batch size per pass.
    pub limit: usize,
    /// Execute merges after queuing.
    pub auto_confirm: bool,
    /// Retry bound before rejection.
    pub max_retries: u32,
    /// Intake mode consulted for skipping non-critical intents.
    pub intake_mode: IntakeMode,
    /// Lock holder identity.
    pub holder: String,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            limit: DEFAULT_BATCH_LIMIT,
            auto_confirm: false,
            max_retries: 3,
            intake_mode: IntakeMode::Open,
            holder: format!("pid:{}", std::process::id()),
        }
    }
}

/// Queue processing errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum QueueError {
    /// Another processor holds the lock.
    #[error("queue lock held{}", holder_suffix(.holder))]
    LockHeld {
        /// The current lock token, when readable.
        holder: Option<QueueLock>,
    },

    /// Persistence fault.
    #[error(transparent)]
    Store(#[from] StoreError),
}

fn holder_suffix(holder: &Option<QueueLock>) -> String {
    holder
        .as_ref()
        .map(|lock| format!(" by {}", lock.holder))
        .unwrap_or_default()
}

/// The queue processor.
pub struct QueueProcessor<'a> {
    engine: &'a Engine,
    options: QueueOptions,
}

impl<'a> QueueProcessor<'a> {
    /// Creates a processor over an engine.
    #[must_use]
    pub fn new(engine: &'a Engine, options: QueueOptions) -> Self {
        Self { engine, options }
    }

    /// Runs one pass under the advisory lock.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::LockHeld`] when another processor is
    /// active, and [`QueueError::Store`] on persistence faults. The
    /// lock is released on every path.
    pub fn process(&self) -> Result<Vec<ProcessedIntent>, QueueError> {
        let store = self.engine.log().store();
        if !store.acquire_queue_lock(QUEUE_LOCK_NAME, &self.options.holder, QUEUE_LOCK_TTL)? {
            let holder = store.queue_lock_info(QUEUE_LOCK_NAME).unwrap_or(None);
            return Err(QueueError::LockHeld { holder });
        }

        let outcome = self.run_pass();
        let _ = store.release_queue_lock(QUEUE_LOCK_NAME, &self.options.holder);
        outcome
    }

    fn run_pass(&self) -> Result<Vec<ProcessedIntent>, QueueError> {
        let log = self.engine.log();
        let intents =
            log.store()
                .list_intents(Some(Status::Validated), None, self.options.limit)?;

        // Dependency statuses are snapshotted before any intent is
        // processed: a dependency merged during this pass unblocks its
        // dependents on the next pass, keeping per-pass behavior
        // independent of batch order.
        let mut dep_statuses: std::collections::HashMap<String, Option<Status>> =
            std::collections::HashMap::new();
        for intent in &intents {
            for dep in &intent.dependencies {
                if !dep_statuses.contains_key(dep) {
                    let status = log.store().get_intent(dep)?.map(|d| d.status);
                    dep_statuses.insert(dep.clone(), status);
                }
            }
        }

        let mut results = Vec::with_capacity(intents.len());
        for intent in intents {
            results.push(self.process_single(intent, &dep_statuses)?);
        }

        log.append(Event::new(
            EventType::QueueProcessed,
            json!({
                "processed": results.len(),
                "limit": self.options.limit,
                "auto_confirm": self.options.auto_confirm,
            }),
        ))?;
        tracing::info!(processed = results.len(), "queue pass complete");
        Ok(results)
    }

    fn process_single(
        &self,
        mut intent: Intent,
        dep_statuses: &std::collections::HashMap<String, Option<Status>>,
    ) -> Result<ProcessedIntent, QueueError> {
        let log = self.engine.log();
        let intent_id = intent.id.clone();

        // Intake pressure: under PAUSE only critical intents proceed.
        if self.options.intake_mode == IntakeMode::Pause
            && intent.risk_level != RiskLevel::Critical
        {
            return Ok(ProcessedIntent {
                intent_id,
                action: QueueAction::Skipped,
                detail: "intake paused: non-critical intent deferred".to_string(),
            });
        }

        // Dependency ordering: every dependency must be MERGED. A
        // missing or rejected dependency leaves the intent skipped.
        for dep in intent.dependencies.clone() {
            let dep_status = dep_statuses.get(&dep).copied().flatten();
            if dep_status != Some(Status::Merged) {
                log.append(
                    Event::new(
                        EventType::IntentDependencyBlocked,
                        json!({
                            "dependency": dep,
                            "dependency_status": dep_status.map(|s| s.as_str()),
                        }),
                    )
                    .with_intent(intent_id.clone())
                    .with_tenant(intent.tenant_id.clone()),
                )?;
                return Ok(ProcessedIntent {
                    intent_id,
                    action: QueueAction::DependencyBlocked,
                    detail: format!("dependency {dep} not merged"),
                });
            }
        }

        // Retry bound.
        if intent.retries >= self.options.max_retries {
            self.reject(&intent, "max_retries_exceeded", intent.retries)?;
            return Ok(ProcessedIntent {
                intent_id,
                action: QueueAction::Rejected,
                detail: format!("max retries ({}) exceeded", self.options.max_retries),
            });
        }

        // Open reviews defer; a rejected review is terminal.
        if review::has_pending_reviews(log.store(), &intent_id)? {
            return Ok(ProcessedIntent {
                intent_id,
                action: QueueAction::ReviewPending,
                detail: "review task still open".to_string(),
            });
        }
        if review::has_rejected_review(log.store(), &intent_id)? {
            self.reject(&intent, "review_rejected", intent.retries)?;
            return Ok(ProcessedIntent {
                intent_id,
                action: QueueAction::Rejected,
                detail: "review rejected the change".to_string(),
            });
        }

        // Revalidate against the current target state.
        let outcome = match self.engine.validate(&mut intent) {
            Ok(outcome) => outcome,
            Err(EngineError::Store(err)) => return Err(err.into()),
            Err(err) => {
                // SCM faults skip the intent; retries are untouched.
                tracing::warn!(intent_id = %intent_id, error = %err, "revalidation fault");
                return Ok(ProcessedIntent {
                    intent_id,
                    action: QueueAction::Skipped,
                    detail: format!("revalidation fault: {err}"),
                });
            }
        };

        // Queue-side events reuse the revalidation's trace so a merge
        // is always attributable to the validation that admitted it.
        let report_trace;
        match outcome {
            Outcome::Blocked(report) => {
                return self.handle_blocked(&intent, &report.reason.label(), &report.trace_id);
            }
            Outcome::Validated(report) => {
                report_trace = report.trace_id.clone();
            }
        }

        // Fresh validation held: QUEUED.
        log.append(
            Event::new(EventType::IntentStatusChanged, json!({"status": "QUEUED"}))
                .with_trace(report_trace.clone())
                .with_intent(intent_id.clone())
                .with_tenant(intent.tenant_id.clone()),
        )?;
        let _ = intent.transition(Status::Queued);

        if !self.options.auto_confirm {
            return Ok(ProcessedIntent {
                intent_id,
                action: QueueAction::Queued,
                detail: "awaiting external merge confirmation".to_string(),
            });
        }

        self.execute_merge(&mut intent, &report_trace)
    }

    fn execute_merge(
        &self,
        intent: &mut Intent,
        trace_id: &str,
    ) -> Result<ProcessedIntent, QueueError> {
        let log = self.engine.log();
        let intent_id = intent.id.clone();
        match self.engine.scm().execute_merge(&intent.source, &intent.target) {
            Ok(sha) => {
                log.append(
                    Event::new(
                        EventType::IntentMerged,
                        json!({
                            "merged_commit": sha,
                            "source": intent.source,
                            "target": intent.target,
                        }),
                    )
                    .with_trace(trace_id)
                    .with_intent(intent_id.clone())
                    .with_tenant(intent.tenant_id.clone())
                    .with_evidence(json!({"merged_commit": sha})),
                )?;
                let _ = intent.transition(Status::Merged);
                Ok(ProcessedIntent {
                    intent_id,
                    action: QueueAction::Merged,
                    detail: sha,
                })
            }
            Err(err) => {
                log.append(
                    Event::new(
                        EventType::IntentMergeFailed,
                        json!({"error": err.to_string()}),
                    )
                    .with_trace(trace_id)
                    .with_intent(intent_id.clone())
                    .with_tenant(intent.tenant_id.clone()),
                )?;
                // Merge failures follow the same retry discipline as
                // blocked revalidations.
                let result = self.handle_blocked(intent, "merge_failed", trace_id)?;
                Ok(ProcessedIntent {
                    intent_id,
                    action: if result.action == QueueAction::Rejected {
                        QueueAction::Rejected
                    } else {
                        QueueAction::MergeFailed
                    },
                    detail: err.to_string(),
                })
            }
        }
    }

    fn handle_blocked(
        &self,
        intent: &Intent,
        reason: &str,
        trace_id: &str,
    ) -> Result<ProcessedIntent, QueueError> {
        let log = self.engine.log();
        let new_retries = intent.retries + 1;

        if new_retries >= self.options.max_retries {
            self.reject(intent, reason, new_retries)?;
            return Ok(ProcessedIntent {
                intent_id: intent.id.clone(),
                action: QueueAction::Rejected,
                detail: format!("rejected after {new_retries} retries ({reason})"),
            });
        }

        log.append(
            Event::new(
                EventType::IntentRequeued,
                json!({"reason": reason, "retries": new_retries}),
            )
            .with_trace(trace_id)
            .with_intent(intent.id.clone())
            .with_tenant(intent.tenant_id.clone())
            .with_evidence(json!({"retries": new_retries})),
        )?;
        Ok(ProcessedIntent {
            intent_id: intent.id.clone(),
            action: QueueAction::Requeued,
            detail: format!("requeued ({reason}), retry {new_retries}"),
        })
    }

    fn reject(&self, intent: &Intent, reason: &str, retries: u32) -> Result<(), QueueError> {
        self.engine.log().append(
            Event::new(
                EventType::IntentRejected,
                json!({"reason": reason, "retries": retries}),
            )
            .with_intent(intent.id.clone())
            .with_tenant(intent.tenant_id.clone())
            .with_evidence(json!({"reason": reason, "retries": retries})),
        )?;
        Ok(())
    }
}

/// Administrative reset: clears retries, optionally forces a status
/// and/or clears the advisory lock.
///
/// # Errors
///
/// Returns [`QueueError::Store`] on persistence faults.
pub fn reset_queue(
    log: &crate::log::EventLog,
    intent_id: &str,
    set_status: Option<Status>,
    clear_lock: bool,
) -> Result<(), QueueError> {
    if clear_lock {
        log.store().force_release_queue_lock(QUEUE_LOCK_NAME)?;
    }
    let Some(intent) = log.store().get_intent(intent_id)? else {
        return Ok(());
    };
    let new_status = set_status.unwrap_or(intent.status);
    // Materialization applies the status and retry reset.
    log.append(
        Event::new(
            EventType::QueueReset,
            json!({"status": new_status.as_str(), "retries": 0}),
        )
        .with_intent(intent_id)
        .with_tenant(intent.tenant_id),
    )?;
    Ok(())
}
