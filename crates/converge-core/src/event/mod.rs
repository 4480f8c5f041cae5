//! The universal event record and the closed event-type registry.
//!
//! Every decision Converge makes (simulations, check runs, risk
//! evaluations, policy verdicts, queue passes, merges) is recorded as an
//! immutable [`Event`]. Events are append-only: they are never mutated or
//! deleted (except through the explicit retention prune), and all
//! higher-order state is derived from them.
//!
//! The [`EventType`] vocabulary is closed. String forms are dotted
//! lowercase (`intent.validated`, `audit.chain.verified`) and round-trip
//! through [`EventType::as_str`] and [`EventType::parse`].

use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use uuid::Uuid;

#[cfg(test)]
mod tests;

/// Generates a short, opaque identifier (12 hex chars).
#[must_use]
pub fn new_id() -> String {
    Uuid::new_v4().simple().to_string()[..12].to_string()
}

/// Current UTC instant truncated to microseconds, the store's
/// timestamp precision, so values round-trip exactly.
#[must_use]
pub fn now_utc() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_micros(now.timestamp_micros()).unwrap_or(now)
}

/// Generates a fresh trace id for correlating events from one
/// orchestrator invocation.
#[must_use]
pub fn new_trace_id() -> String {
    format!("trace-{}", new_id())
}

/// The closed set of event types Converge emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum EventType {
    /// Merge simulation finished (mergeable or not).
    SimulationCompleted,
    /// One verification check finished.
    CheckCompleted,
    /// Risk engine produced a full evaluation.
    RiskEvaluated,
    /// Risk level was rewritten to match the computed score.
    RiskLevelReclassified,
    /// Tenant risk policy was updated.
    RiskPolicyUpdated,
    /// The five policy gates were evaluated.
    PolicyEvaluated,
    /// An intent was created and admitted.
    IntentCreated,
    /// An intent changed lifecycle status.
    IntentStatusChanged,
    /// Full validation pipeline passed.
    IntentValidated,
    /// Validation blocked the intent (normal outcome, not an error).
    IntentBlocked,
    /// A blocked intent was returned to READY for another pass.
    IntentRequeued,
    /// The intent was rejected (terminal).
    IntentRejected,
    /// The intent was merged (terminal).
    IntentMerged,
    /// Merge execution failed after validation.
    IntentMergeFailed,
    /// A queue pass skipped the intent because a dependency is not merged.
    IntentDependencyBlocked,
    /// A queue pass completed.
    QueueProcessed,
    /// An intent's retries/status were administratively reset.
    QueueReset,
    /// Validation aborted on an infrastructure fault (SCM/store).
    ValidationError,
    /// Agent policy was updated.
    AgentPolicyUpdated,
    /// Entropy-budget calibration completed.
    CalibrationCompleted,
    /// An external webhook delivery was received.
    WebhookReceived,
    /// Security scan started.
    SecurityScanStarted,
    /// Security scan completed with a summary.
    SecurityScanCompleted,
    /// A critical/high security finding was detected.
    SecurityFindingDetected,
    /// A human review was requested.
    ReviewRequested,
    /// A review task was assigned to a reviewer.
    ReviewAssigned,
    /// A review task was completed with a decision.
    ReviewCompleted,
    /// A review task breached its SLA and was escalated.
    ReviewEscalated,
    /// A review task was cancelled.
    ReviewCancelled,
    /// An intent was accepted by intake.
    IntakeAccepted,
    /// An intent was throttled by intake.
    IntakeThrottled,
    /// An intent was rejected by intake.
    IntakeRejected,
    /// The intake mode changed.
    IntakeModeChanged,
    /// The audit chain was (re-)initialized.
    ChainInitialized,
    /// The audit chain verified clean.
    ChainVerified,
    /// The audit chain detected tampering.
    ChainTamperDetected,
    /// Coherence harness produced an evaluation.
    CoherenceEvaluated,
    /// Coherence verdict disagreed with objective risk metrics.
    CoherenceInconsistency,
    /// Coherence baselines were administratively updated.
    CoherenceBaselineUpdated,
    /// A feature flag changed at runtime.
    FeatureFlagChanged,
    /// The queue worker started.
    WorkerStarted,
    /// The queue worker stopped.
    WorkerStopped,
    /// The queue worker heartbeat.
    WorkerHeartbeat,
}

impl EventType {
    /// Returns the canonical dotted string form of this event type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SimulationCompleted => "simulation.completed",
            Self::CheckCompleted => "check.completed",
            Self::RiskEvaluated => "risk.evaluated",
            Self::RiskLevelReclassified => "risk.level_reclassified",
            Self::RiskPolicyUpdated => "risk.policy_updated",
            Self::PolicyEvaluated => "policy.evaluated",
            Self::IntentCreated => "intent.created",
            Self::IntentStatusChanged => "intent.status_changed",
            Self::IntentValidated => "intent.validated",
            Self::IntentBlocked => "intent.blocked",
            Self::IntentRequeued => "intent.requeued",
            Self::IntentRejected => "intent.rejected",
            Self::IntentMerged => "intent.merged",
            Self::IntentMergeFailed => "intent.merge_failed",
            Self::IntentDependencyBlocked => "intent.dependency_blocked",
            Self::QueueProcessed => "queue.processed",
            Self::QueueReset => "queue.reset",
            Self::ValidationError => "validation.error",
            Self::AgentPolicyUpdated => "agent.policy_updated",
            Self::CalibrationCompleted => "calibration.completed",
            Self::WebhookReceived => "webhook.received",
            Self::SecurityScanStarted => "security.scan.started",
            Self::SecurityScanCompleted => "security.scan.completed",
            Self::SecurityFindingDetected => "security.finding.detected",
            Self::ReviewRequested => "review.requested",
            Self::ReviewAssigned => "review.assigned",
            Self::ReviewCompleted => "review.completed",
            Self::ReviewEscalated => "review.escalated",
            Self::ReviewCancelled => "review.cancelled",
            Self::IntakeAccepted => "intake.accepted",
            Self::IntakeThrottled => "intake.throttled",
            Self::IntakeRejected => "intake.rejected",
            Self::IntakeModeChanged => "intake.mode_changed",
            Self::ChainInitialized => "audit.chain.initialized",
            Self::ChainVerified => "audit.chain.verified",
            Self::ChainTamperDetected => "audit.chain.tamper_detected",
            Self::CoherenceEvaluated => "coherence.evaluated",
            Self::CoherenceInconsistency => "coherence.inconsistency",
            Self::CoherenceBaselineUpdated => "coherence.baseline_updated",
            Self::FeatureFlagChanged => "feature_flag.changed",
            Self::WorkerStarted => "worker.started",
            Self::WorkerStopped => "worker.stopped",
            Self::WorkerHeartbeat => "worker.heartbeat",
        }
    }

    /// Parses an event type from its dotted string form.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownEventType`] if the string is not in the registry.
    pub fn parse(s: &str) -> Result<Self, UnknownEventType> {
        Ok(match s {
            "simulation.completed" => Self::SimulationCompleted,
            "check.completed" => Self::CheckCompleted,
            "risk.evaluated" => Self::RiskEvaluated,
            "risk.level_reclassified" => Self::RiskLevelReclassified,
            "risk.policy_updated" => Self::RiskPolicyUpdated,
            "policy.evaluated" => Self::PolicyEvaluated,
            "intent.created" => Self::IntentCreated,
            "intent.status_changed" => Self::IntentStatusChanged,
            "intent.validated" => Self::IntentValidated,
            "intent.blocked" => Self::IntentBlocked,
            "intent.requeued" => Self::IntentRequeued,
            "intent.rejected" => Self::IntentRejected,
            "intent.merged" => Self::IntentMerged,
            "intent.merge_failed" => Self::IntentMergeFailed,
            "intent.dependency_blocked" => Self::IntentDependencyBlocked,
            "queue.processed" => Self::QueueProcessed,
            "queue.reset" => Self::QueueReset,
            "validation.error" => Self::ValidationError,
            "agent.policy_updated" => Self::AgentPolicyUpdated,
            "calibration.completed" => Self::CalibrationCompleted,
            "webhook.received" => Self::WebhookReceived,
            "security.scan.started" => Self::SecurityScanStarted,
            "security.scan.completed" => Self::SecurityScanCompleted,
            "security.finding.detected" => Self::SecurityFindingDetected,
            "review.requested" => Self::ReviewRequested,
            "review.assigned" => Self::ReviewAssigned,
            "review.completed" => Self::ReviewCompleted,
            "review.escalated" => Self::ReviewEscalated,
            "review.cancelled" => Self::ReviewCancelled,
            "intake.accepted" => Self::IntakeAccepted,
            "intake.throttled" => Self::IntakeThrottled,
            "intake.rejected" => Self::IntakeRejected,
            "intake.mode_changed" => Self::IntakeModeChanged,
            "audit.chain.initialized" => Self::ChainInitialized,
            "audit.chain.verified" => Self::ChainVerified,
            "audit.chain.tamper_detected" => Self::ChainTamperDetected,
            "coherence.evaluated" => Self::CoherenceEvaluated,
            "coherence.inconsistency" => Self::CoherenceInconsistency,
            "coherence.baseline_updated" => Self::CoherenceBaselineUpdated,
            "feature_flag.changed" => Self::FeatureFlagChanged,
            "worker.started" => Self::WorkerStarted,
            "worker.stopped" => Self::WorkerStopped,
            "worker.heartbeat" => Self::WorkerHeartbeat,
            other => {
                return Err(UnknownEventType {
                    value: other.to_string(),
                });
            }
        })
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EventType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(D::Error::custom)
    }
}

/// Error returned when parsing an event type outside the registry.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown event type: {value}")]
pub struct UnknownEventType {
    /// The unrecognized string.
    pub value: String,
}

/// The universal record: one decision, one measurement, one transition.
///
/// Events are immutable once appended. The `payload` carries the full
/// structured detail for the event type; `evidence` is a summarized view
/// consumed by downstream projections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique event id (short hex).
    pub id: String,
    /// Groups every event produced by one orchestrator invocation.
    pub trace_id: String,
    /// UTC instant the event was recorded.
    pub timestamp: DateTime<Utc>,
    /// The event type (closed vocabulary).
    pub event_type: EventType,
    /// The intent this event concerns, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent_id: Option<String>,
    /// The agent this event concerns, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    /// Tenant partition key, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    /// Full structured detail for this event type.
    pub payload: Value,
    /// Summarized view used by projections.
    #[serde(default)]
    pub evidence: Value,
}

impl Event {
    /// Creates a new event with a fresh id, fresh trace id, and the
    /// current UTC timestamp.
    #[must_use]
    pub fn new(event_type: EventType, payload: Value) -> Self {
        Self {
            id: new_id(),
            trace_id: new_trace_id(),
            timestamp: now_utc(),
            event_type,
            intent_id: None,
            agent_id: None,
            tenant_id: None,
            payload,
            evidence: Value::Object(serde_json::Map::new()),
        }
    }

    /// Sets the trace id, replacing the generated one.
    #[must_use]
    pub fn with_trace(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = trace_id.into();
        self
    }

    /// Attaches the intent this event concerns.
    #[must_use]
    pub fn with_intent(mut self, intent_id: impl Into<String>) -> Self {
        self.intent_id = Some(intent_id.into());
        self
    }

    /// Attaches the tenant partition key.
    #[must_use]
    pub fn with_tenant(mut self, tenant_id: Option<String>) -> Self {
        self.tenant_id = tenant_id;
        self
    }

    /// Attaches an intent id when one is present.
    #[must_use]
    pub fn maybe_intent(mut self, intent_id: Option<&str>) -> Self {
        self.intent_id = intent_id.map(str::to_string);
        self
    }

    /// Attaches the agent this event concerns.
    #[must_use]
    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    /// Attaches summarized evidence.
    #[must_use]
    pub fn with_evidence(mut self, evidence: Value) -> Self {
        self.evidence = evidence;
        self
    }
}
