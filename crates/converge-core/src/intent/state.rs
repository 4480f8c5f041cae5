//! Intent lifecycle states, risk levels, and origin types.

use serde::{Deserialize, Serialize};

use super::error::IntentError;

/// The lifecycle state of an intent.
///
/// The walk is `DRAFT → READY → VALIDATED → QUEUED → MERGED`, with
/// `REJECTED` reachable from any non-terminal state. A blocked intent
/// returns from `VALIDATED` to `READY` for another pass. `MERGED` and
/// `REJECTED` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    /// Created but not yet submitted for validation.
    Draft,
    /// Eligible for validation.
    Ready,
    /// Passed the full validation pipeline.
    Validated,
    /// Selected by the queue processor after fresh revalidation.
    Queued,
    /// Merged into the target branch (terminal).
    Merged,
    /// Rejected (terminal).
    Rejected,
}

impl Status {
    /// Parses a status from its canonical upper-case string.
    ///
    /// # Errors
    ///
    /// Returns [`IntentError::InvalidStatus`] for unrecognized strings.
    pub fn parse(s: &str) -> Result<Self, IntentError> {
        match s {
            "DRAFT" => Ok(Self::Draft),
            "READY" => Ok(Self::Ready),
            "VALIDATED" => Ok(Self::Validated),
            "QUEUED" => Ok(Self::Queued),
            "MERGED" => Ok(Self::Merged),
            "REJECTED" => Ok(Self::Rejected),
            _ => Err(IntentError::InvalidStatus {
                value: s.to_string(),
            }),
        }
    }

    /// Returns the canonical string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::Ready => "READY",
            Self::Validated => "VALIDATED",
            Self::Queued => "QUEUED",
            Self::Merged => "MERGED",
            Self::Rejected => "REJECTED",
        }
    }

    /// Returns true for terminal states.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Merged | Self::Rejected)
    }

    /// Checks whether a transition from this state to `target` is legal.
    ///
    /// `QUEUED → MERGED` is the auto-confirm path; `VALIDATED → MERGED`
    /// is the explicit external confirmation path.
    #[must_use]
    pub const fn can_transition_to(self, target: Self) -> bool {
        match (self, target) {
            // Rejection is reachable from any non-terminal state.
            (from, Self::Rejected) => !from.is_terminal(),
            (Self::Draft, Self::Ready)
            | (Self::Ready, Self::Validated)
            | (Self::Validated, Self::Queued | Self::Merged)
            | (Self::Queued, Self::Merged)
            // Blocked revalidations and failed merge executions send
            // the intent back for another pass.
            | (Self::Validated | Self::Queued, Self::Ready) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The declared (or computed) risk level of an intent.
///
/// Ordering is semantic: `Low < Medium < High < Critical`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    /// Localized, easily reverted changes.
    Low,
    /// The default level for new intents.
    #[default]
    Medium,
    /// Changes touching high-centrality code or core targets.
    High,
    /// Changes requiring the strictest gate profile.
    Critical,
}

impl RiskLevel {
    /// Parses a risk level from its lowercase string form.
    ///
    /// # Errors
    ///
    /// Returns [`IntentError::InvalidRiskLevel`] for unrecognized strings.
    pub fn parse(s: &str) -> Result<Self, IntentError> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            _ => Err(IntentError::InvalidRiskLevel {
                value: s.to_string(),
            }),
        }
    }

    /// Returns the lowercase string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// All levels, lowest first.
    pub const ALL: [Self; 4] = [Self::Low, Self::Medium, Self::High, Self::Critical];
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provenance of an intent, used to select policy overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OriginType {
    /// Authored by a person.
    #[default]
    Human,
    /// Authored by an autonomous agent.
    Agent,
    /// Produced by an external integration.
    Integration,
}

impl OriginType {
    /// Parses an origin type from its lowercase string form.
    ///
    /// # Errors
    ///
    /// Returns [`IntentError::InvalidOriginType`] for unrecognized strings.
    pub fn parse(s: &str) -> Result<Self, IntentError> {
        match s {
            "human" => Ok(Self::Human),
            "agent" => Ok(Self::Agent),
            "integration" => Ok(Self::Integration),
            _ => Err(IntentError::InvalidOriginType {
                value: s.to_string(),
            }),
        }
    }

    /// Returns the lowercase string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Human => "human",
            Self::Agent => "agent",
            Self::Integration => "integration",
        }
    }
}

impl std::fmt::Display for OriginType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
