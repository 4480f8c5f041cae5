//! Human review task workflow.
//!
//! Review tasks are created when the orchestrator needs human judgment,
//! most commonly when the coherence harness disagrees with the objective
//! risk metrics. Tasks track lifecycle from request through assignment,
//! completion, escalation, or cancellation, with an SLA deadline derived
//! from the intent's risk level. The queue processor consults pending and
//! rejected reviews before merging.

#[cfg(test)]
mod tests;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::event::{Event, EventType, new_id, now_utc};
use crate::intent::RiskLevel;
use crate::log::EventLog;
use crate::store::{Store, StoreError};

/// Review SLA hours per risk level.
#[must_use]
pub const fn sla_hours(level: RiskLevel) -> i64 {
    match level {
        RiskLevel::Low => 72,
        RiskLevel::Medium => 48,
        RiskLevel::High => 24,
        RiskLevel::Critical => 8,
    }
}

/// Lifecycle state of a review task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewStatus {
    /// Requested; no reviewer assigned.
    Pending,
    /// Assigned to a reviewer.
    Assigned,
    /// Completed with a decision.
    Completed,
    /// Escalated after an SLA breach.
    Escalated,
    /// Cancelled.
    Cancelled,
}

impl ReviewStatus {
    /// Returns the lowercase string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Assigned => "assigned",
            Self::Completed => "completed",
            Self::Escalated => "escalated",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parses from the lowercase string form.
    ///
    /// # Errors
    ///
    /// Returns [`ReviewError::InvalidStatus`] for unrecognized strings.
    pub fn parse(s: &str) -> Result<Self, ReviewError> {
        match s {
            "pending" => Ok(Self::Pending),
            "assigned" => Ok(Self::Assigned),
            "completed" => Ok(Self::Completed),
            "escalated" => Ok(Self::Escalated),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(ReviewError::InvalidStatus {
                value: s.to_string(),
            }),
        }
    }

    /// True while the task still blocks queue processing.
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Pending | Self::Assigned | Self::Escalated)
    }
}

/// Outcome of a completed review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewDecision {
    /// The reviewer approved the change.
    Approved,
    /// The reviewer rejected the change.
    Rejected,
}

impl ReviewDecision {
    /// Returns the lowercase string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    /// Parses from the lowercase string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// A human review task attached to an intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewTask {
    /// Task id (`rev-` prefixed).
    pub id: String,
    /// The intent under review.
    pub intent_id: String,
    /// Lifecycle state.
    pub status: ReviewStatus,
    /// Decision once completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<ReviewDecision>,
    /// Assigned reviewer, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewer: Option<String>,
    /// Why the review was requested.
    pub trigger: String,
    /// Risk level at request time.
    pub risk_level: RiskLevel,
    /// SLA deadline.
    pub sla_deadline: DateTime<Utc>,
    /// Creation instant.
    pub created_at: DateTime<Utc>,
    /// Last mutation instant.
    pub updated_at: DateTime<Utc>,
    /// Tenant partition key, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
}

/// Errors raised by review operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ReviewError {
    /// The status string is not recognized.
    #[error("invalid review status: {value}")]
    InvalidStatus {
        /// The unrecognized value.
        value: String,
    },

    /// The task does not exist.
    #[error("review task not found: {task_id}")]
    TaskNotFound {
        /// The missing task id.
        task_id: String,
    },

    /// The intent does not exist.
    #[error("intent not found: {intent_id}")]
    IntentNotFound {
        /// The missing intent id.
        intent_id: String,
    },

    /// Persistence fault.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Creates a review task for an intent, computing the SLA from its risk
/// level, and emits `review.requested` (plus `review.assigned` when a
/// reviewer is given).
///
/// # Errors
///
/// Returns [`ReviewError::IntentNotFound`] for unknown intents and
/// propagates store faults.
pub fn request_review(
    log: &EventLog,
    intent_id: &str,
    trigger: &str,
    reviewer: Option<&str>,
) -> Result<ReviewTask, ReviewError> {
    let intent = log
        .store()
        .get_intent(intent_id)?
        .ok_or_else(|| ReviewError::IntentNotFound {
            intent_id: intent_id.to_string(),
        })?;

    let now = now_utc();
    let task = ReviewTask {
        id: format!("rev-{}", new_id()),
        intent_id: intent_id.to_string(),
        status: if reviewer.is_some() {
            ReviewStatus::Assigned
        } else {
            ReviewStatus::Pending
        },
        decision: None,
        reviewer: reviewer.map(str::to_string),
        trigger: trigger.to_string(),
        risk_level: intent.risk_level,
        sla_deadline: now + Duration::hours(sla_hours(intent.risk_level)),
        created_at: now,
        updated_at: now,
        tenant_id: intent.tenant_id.clone(),
    };

    log.append(
        Event::new(EventType::ReviewRequested, json!({"task": task}))
            .with_intent(intent_id)
            .with_tenant(task.tenant_id.clone()),
    )?;
    if let Some(reviewer) = reviewer {
        log.append(
            Event::new(
                EventType::ReviewAssigned,
                json!({"task": task, "reviewer": reviewer}),
            )
            .with_intent(intent_id)
            .with_tenant(task.tenant_id.clone()),
        )?;
    }
    Ok(task)
}

/// Assigns (or reassigns) a task to a reviewer.
///
/// # Errors
///
/// Returns [`ReviewError::TaskNotFound`] for unknown tasks.
pub fn assign_review(
    log: &EventLog,
    task_id: &str,
    reviewer: &str,
) -> Result<ReviewTask, ReviewError> {
    let mut task = fetch_task(log.store(), task_id)?;
    task.reviewer = Some(reviewer.to_string());
    task.status = ReviewStatus::Assigned;
    task.updated_at = now_utc();
    log.append(
        Event::new(
            EventType::ReviewAssigned,
            json!({"task": task, "reviewer": reviewer}),
        )
        .with_intent(task.intent_id.clone())
        .with_tenant(task.tenant_id.clone()),
    )?;
    Ok(task)
}

/// Completes a task with a decision.
///
/// # Errors
///
/// Returns [`ReviewError::TaskNotFound`] for unknown tasks.
pub fn complete_review(
    log: &EventLog,
    task_id: &str,
    decision: ReviewDecision,
    notes: &str,
) -> Result<ReviewTask, ReviewError> {
    let mut task = fetch_task(log.store(), task_id)?;
    task.status = ReviewStatus::Completed;
    task.decision = Some(decision);
    task.updated_at = now_utc();
    log.append(
        Event::new(
            EventType::ReviewCompleted,
            json!({
                "task": task,
                "decision": decision.as_str(),
                "notes": notes,
            }),
        )
        .with_intent(task.intent_id.clone())
        .with_tenant(task.tenant_id.clone()),
    )?;
    Ok(task)
}

/// Cancels a task.
///
/// # Errors
///
/// Returns [`ReviewError::TaskNotFound`] for unknown tasks.
pub fn cancel_review(log: &EventLog, task_id: &str, reason: &str) -> Result<ReviewTask, ReviewError> {
    let mut task = fetch_task(log.store(), task_id)?;
    task.status = ReviewStatus::Cancelled;
    task.updated_at = now_utc();
    log.append(
        Event::new(
            EventType::ReviewCancelled,
            json!({"task": task, "reason": reason}),
        )
        .with_intent(task.intent_id.clone())
        .with_tenant(task.tenant_id.clone()),
    )?;
    Ok(task)
}

/// Escalates every open task past its SLA deadline, emitting
/// `review.escalated` per breach. Returns the escalated tasks.
///
/// # Errors
///
/// Propagates store faults.
pub fn escalate_sla_breaches(log: &EventLog) -> Result<Vec<ReviewTask>, ReviewError> {
    let now = now_utc();
    let mut escalated = Vec::new();
    for mut task in log.store().list_review_tasks(None, None, 10_000)? {
        if task.status.is_open() && task.status != ReviewStatus::Escalated && task.sla_deadline < now
        {
            task.status = ReviewStatus::Escalated;
            task.updated_at = now;
            log.append(
                Event::new(
                    EventType::ReviewEscalated,
                    json!({"task": task, "reason": "sla_breach"}),
                )
                .with_intent(task.intent_id.clone())
                .with_tenant(task.tenant_id.clone()),
            )?;
            escalated.push(task);
        }
    }
    Ok(escalated)
}

/// True when the intent has any open review task.
///
/// # Errors
///
/// Propagates store faults.
pub fn has_pending_reviews(store: &dyn Store, intent_id: &str) -> Result<bool, StoreError> {
    Ok(store
        .list_review_tasks(Some(intent_id), None, 100)?
        .iter()
        .any(|t| t.status.is_open()))
}

/// True when the intent has a completed review with a rejection.
///
/// # Errors
///
/// Propagates store faults.
pub fn has_rejected_review(store: &dyn Store, intent_id: &str) -> Result<bool, StoreError> {
    Ok(store
        .list_review_tasks(Some(intent_id), Some(ReviewStatus::Completed), 100)?
        .iter()
        .any(|t| t.decision == Some(ReviewDecision::Rejected)))
}

fn fetch_task(store: &dyn Store, task_id: &str) -> Result<ReviewTask, ReviewError> {
    store
        .get_review_task(task_id)?
        .ok_or_else(|| ReviewError::TaskNotFound {
            task_id: task_id.to_string(),
        })
}
