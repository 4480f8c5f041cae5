//! Intent validation errors.

use thiserror::Error;

/// Errors raised when constructing or transitioning an intent.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum IntentError {
    /// The status string is not a recognized lifecycle state.
    #[error("invalid intent status: {value}")]
    InvalidStatus {
        /// The unrecognized value.
        value: String,
    },

    /// The risk level string is not recognized.
    #[error("invalid risk level: {value}")]
    InvalidRiskLevel {
        /// The unrecognized value.
        value: String,
    },

    /// The origin type string is not recognized.
    #[error("invalid origin type: {value}")]
    InvalidOriginType {
        /// The unrecognized value.
        value: String,
    },

    /// A lifecycle transition outside the state machine was attempted.
    #[error("illegal status transition: {from} -> {to}")]
    IllegalTransition {
        /// Current status.
        from: String,
        /// Requested status.
        to: String,
    },

    /// Priority must be in `1..=5`.
    #[error("priority {value} out of range 1..=5")]
    PriorityOutOfRange {
        /// The rejected value.
        value: i64,
    },

    /// An intent may not depend on itself.
    #[error("intent {id} depends on itself")]
    SelfDependency {
        /// The intent id.
        id: String,
    },

    /// The dependency list contains duplicates.
    #[error("intent {id} has duplicate dependency {dependency}")]
    DuplicateDependency {
        /// The intent id.
        id: String,
        /// The duplicated dependency id.
        dependency: String,
    },

    /// The dependency closure contains a cycle.
    #[error("dependency cycle detected through intent {id}")]
    DependencyCycle {
        /// The intent at which the cycle was detected.
        id: String,
    },
}
