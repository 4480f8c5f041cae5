//! Adaptive intake control: admission of new intents.
//!
//! Three modes:
//!
//! - **open**: accept everything (normal operation)
//! - **throttle**: deterministic rate limiting: accept the fraction of
//!   intents whose id-bucket falls under the throttle ratio
//! - **pause**: only critical-risk intents are accepted
//!
//! The mode is computed from the repository health score or set
//! manually; every admission decision emits an `intake.*` event, and an
//! accepted intent is persisted through `intent.created`.


use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::event::{Event, EventType};
use crate::intent::{Intent, IntentError, RiskLevel, ensure_acyclic};
use crate::log::EventLog;
use crate::policy::rollout_bucket;
use crate::store::StoreError;
use thiserror::Error;

/// Health score below which intake pauses.
pub const PAUSE_BELOW_HEALTH: f64 = 30.0;

/// Health score below which intake throttles.
pub const THROTTLE_BELOW_HEALTH: f64 = 60.0;

/// Fraction of intents accepted while throttling.
pub const THROTTLE_RATIO: f64 = 0.5;

/// Intake mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IntakeMode {
    /// Accept all intents.
    #[default]
    Open,
    /// Accept a deterministic fraction.
    Throttle,
    /// Accept only critical-risk intents.
    Pause,
}

impl IntakeMode {
    /// Returns the lowercase string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Throttle => "throttle",
            Self::Pause => "pause",
        }
    }

    /// Parses from the lowercase string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(Self::Open),
            "throttle" => Some(Self::Throttle),
            "pause" => Some(Self::Pause),
            _ => None,
        }
    }

    /// The mode appropriate for a repository health score.
    #[must_use]
    pub fn for_health(health_score: f64) -> Self {
        if health_score < PAUSE_BELOW_HEALTH {
            Self::Pause
        } else if health_score < THROTTLE_BELOW_HEALTH {
            Self::Throttle
        } else {
            Self::Open
        }
    }
}

/// One admission decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntakeDecision {
    /// Whether the intent was admitted.
    pub accepted: bool,
    /// Mode in effect.
    pub mode: IntakeMode,
    /// Human-readable reason.
    pub reason: String,
}

/// Errors raised during intent submission.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum IntakeError {
    /// Structural intent validation failed.
    #[error(transparent)]
    Intent(#[from] IntentError),

    /// Persistence fault.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Evaluates admission under `mode` without persisting anything.
#[must_use]
pub fn evaluate_intake(intent: &Intent, mode: IntakeMode, throttle_ratio: f64) -> IntakeDecision {
    match mode {
        IntakeMode::Open => IntakeDecision {
            accepted: true,
            mode,
            reason: "open mode: accepting all intents".to_string(),
        },
        IntakeMode::Pause => {
            if intent.risk_level == RiskLevel::Critical {
                IntakeDecision {
                    accepted: true,
                    mode,
                    reason: "pause mode: critical-risk intent accepted".to_string(),
                }
            } else {
                IntakeDecision {
                    accepted: false,
                    mode,
                    reason: format!(
                        "pause mode: only critical-risk intents accepted (got {})",
                        intent.risk_level
                    ),
                }
            }
        }
        IntakeMode::Throttle => {
            // Same deterministic bucketing as the risk gate rollout, so
            // a retried submission gets a stable answer.
            let bucket = rollout_bucket(&intent.id);
            if bucket < throttle_ratio {
                IntakeDecision {
                    accepted: true,
                    mode,
                    reason: format!(
                        "throttle mode: accepted (bucket={bucket:.4} < ratio={throttle_ratio})"
                    ),
                }
            } else {
                IntakeDecision {
                    accepted: false,
                    mode,
                    reason: format!(
                        "throttle mode: rejected (bucket={bucket:.4} >= ratio={throttle_ratio})"
                    ),
                }
            }
        }
    }
}

/// Submits an intent: validates structure and dependency acyclicity,
/// evaluates intake, and on acceptance persists the intent through an
/// `intent.created` event.
///
/// A throttled or rejected intent is never persisted; only the intake
/// event records the attempt.
///
/// # Errors
///
/// Returns [`IntakeError`] on invalid intents (self-dependency,
/// duplicate or cyclic dependencies, bad priority) or store faults.
pub fn submit_intent(
    log: &EventLog,
    intent: &Intent,
    mode: IntakeMode,
) -> Result<IntakeDecision, IntakeError> {
    intent.validate()?;
    let store = log.store();
    ensure_acyclic(intent, |id| {
        store
            .get_intent(id)
            .ok()
            .flatten()
            .map(|i| i.dependencies)
            .unwrap_or_default()
    })?;

    let decision = evaluate_intake(intent, mode, THROTTLE_RATIO);

    let event_type = if decision.accepted {
        EventType::IntakeAccepted
    } else if decision.mode == IntakeMode::Throttle {
        EventType::IntakeThrottled
    } else {
        EventType::IntakeRejected
    };
    log.append(
        Event::new(
            event_type,
            json!({
                "mode": decision.mode,
                "reason": decision.reason,
                "risk_level": intent.risk_level,
                "origin_type": intent.origin_type,
            }),
        )
        .with_intent(intent.id.clone())
        .with_tenant(intent.tenant_id.clone()),
    )?;

    if decision.accepted {
        log.append(
            Event::new(EventType::IntentCreated, json!({"intent": intent}))
                .with_intent(intent.id.clone())
                .with_tenant(intent.tenant_id.clone()),
        )?;
    }

    Ok(decision)
}

/// Records a manual intake mode change.
///
/// # Errors
///
/// Returns [`StoreError`] on backend faults.
pub fn change_mode(
    log: &EventLog,
    old: IntakeMode,
    new: IntakeMode,
    reason: &str,
) -> Result<(), StoreError> {
    log.append(Event::new(
        EventType::IntakeModeChanged,
        json!({"old": old, "new": new, "reason": reason}),
    ))?;
    Ok(())
}
