//! Policy engine: risk-level profiles, five gates, risk gate,
//! calibration.
//!
//! A [`Profile`] carries the thresholds one risk level must satisfy:
//! required checks, containment floor, entropy budget, security finding
//! maxima, and coherence thresholds. Profiles load from a JSON config
//! file with the precedence explicit path → `.converge/policy.json` →
//! `policy.json` → `policy.default.json`, and can be specialized per
//! origin type through `origin_overrides`.
//!
//! Gate evaluation is a pure function of the profile and the
//! accumulated evidence; the separate risk gate adds shadow/enforce
//! modes with a deterministic canary rollout.

mod calibrate;
mod gates;
mod risk_gate;

#[cfg(test)]
mod tests;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use calibrate::calibrate_profiles;
pub use gates::{GateEvidence, GateName, GateResult, PolicyEvaluation, PolicyVerdict, evaluate};
pub use risk_gate::{Breach, RiskGateConfig, RiskGateMode, RiskGateOutcome, evaluate_risk_gate, rollout_bucket};

use crate::intent::{OriginType, RiskLevel};

/// Config file candidates, tried in order after the explicit path.
const CONFIG_CANDIDATES: [&str; 3] = [
    ".converge/policy.json",
    "policy.json",
    "policy.default.json",
];

/// Security finding maxima for one profile. `max_critical` is 0 in
/// every default profile and stays 0 unless explicitly overridden.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityLimits {
    /// Maximum critical findings tolerated.
    pub max_critical: u64,
    /// Maximum high findings tolerated.
    pub max_high: u64,
}

/// The thresholds for one risk level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    /// Entropy budget the change must stay under.
    pub entropy_budget: f64,
    /// Containment floor the change must reach.
    pub containment_min: f64,
    /// Informational blast limit; not bound to a gate unless config
    /// says so.
    pub blast_limit: f64,
    /// Required check names.
    pub checks: Vec<String>,
    /// Coherence score for a PASS verdict.
    pub coherence_pass: f64,
    /// Coherence score for a WARN verdict (below is FAIL).
    pub coherence_warn: f64,
    /// Security finding maxima.
    pub security: SecurityLimits,
}

/// A partial profile used for origin overrides; unset fields fall
/// through to the base profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileOverride {
    /// Override for [`Profile::entropy_budget`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entropy_budget: Option<f64>,
    /// Override for [`Profile::containment_min`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub containment_min: Option<f64>,
    /// Override for [`Profile::blast_limit`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blast_limit: Option<f64>,
    /// Override for [`Profile::checks`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checks: Option<Vec<String>>,
    /// Override for [`Profile::coherence_pass`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coherence_pass: Option<f64>,
    /// Override for [`Profile::coherence_warn`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coherence_warn: Option<f64>,
    /// Override for [`Profile::security`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security: Option<SecurityLimits>,
}

impl Profile {
    /// Applies an override, field by field.
    #[must_use]
    pub fn merged(&self, overlay: &ProfileOverride) -> Self {
        Self {
            entropy_budget: overlay.entropy_budget.unwrap_or(self.entropy_budget),
            containment_min: overlay.containment_min.unwrap_or(self.containment_min),
            blast_limit: overlay.blast_limit.unwrap_or(self.blast_limit),
            checks: overlay.checks.clone().unwrap_or_else(|| self.checks.clone()),
            coherence_pass: overlay.coherence_pass.unwrap_or(self.coherence_pass),
            coherence_warn: overlay.coherence_warn.unwrap_or(self.coherence_warn),
            security: overlay.security.unwrap_or(self.security),
        }
    }
}

/// Queue processing settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Retry bound before rejection.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Default merge target branch.
    #[serde(default = "default_target")]
    pub default_target: String,
}

const fn default_max_retries() -> u32 {
    3
}

fn default_target() -> String {
    "main".to_string()
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            default_target: default_target(),
        }
    }
}

/// The complete policy configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Profiles keyed by risk level.
    pub profiles: BTreeMap<String, Profile>,
    /// Per-origin overrides keyed `origin → (level | "_default")`.
    #[serde(default)]
    pub origin_overrides: BTreeMap<String, BTreeMap<String, ProfileOverride>>,
    /// Queue settings.
    #[serde(default)]
    pub queue: QueueConfig,
    /// Risk gate settings.
    #[serde(default)]
    pub risk: RiskGateConfig,
}

/// Configuration errors. Fatal at load: the core refuses to start on a
/// bad policy file.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The config file exists but cannot be read.
    #[error("cannot read policy config {path}: {reason}")]
    Unreadable {
        /// Config path.
        path: String,
        /// Failure detail.
        reason: String,
    },

    /// The config file is not valid JSON for the schema.
    #[error("malformed policy config {path}: {reason}")]
    Malformed {
        /// Config path.
        path: String,
        /// Parse failure detail.
        reason: String,
    },

    /// A required profile is missing after merging.
    #[error("profile missing for risk level {level}")]
    MissingProfile {
        /// The uncovered level.
        level: String,
    },

    /// `enforce_ratio` must lie in `[0, 1]`.
    #[error("enforce_ratio {value} outside [0, 1]")]
    BadEnforceRatio {
        /// The rejected value.
        value: f64,
    },
}

impl Default for PolicyConfig {
    fn default() -> Self {
        let mut profiles = BTreeMap::new();
        profiles.insert(
            "low".to_string(),
            Profile {
                entropy_budget: 25.0,
                containment_min: 0.30,
                blast_limit: 50.0,
                checks: vec!["lint".to_string()],
                coherence_pass: 75.0,
                coherence_warn: 60.0,
                security: SecurityLimits {
                    max_critical: 0,
                    max_high: 5,
                },
            },
        );
        profiles.insert(
            "medium".to_string(),
            Profile {
                entropy_budget: 18.0,
                containment_min: 0.50,
                blast_limit: 35.0,
                checks: vec!["lint".to_string()],
                coherence_pass: 75.0,
                coherence_warn: 60.0,
                security: SecurityLimits {
                    max_critical: 0,
                    max_high: 2,
                },
            },
        );
        profiles.insert(
            "high".to_string(),
            Profile {
                entropy_budget: 12.0,
                containment_min: 0.70,
                blast_limit: 20.0,
                checks: vec!["lint".to_string(), "unit_tests".to_string()],
                coherence_pass: 80.0,
                coherence_warn: 65.0,
                security: SecurityLimits {
                    max_critical: 0,
                    max_high: 0,
                },
            },
        );
        profiles.insert(
            "critical".to_string(),
            Profile {
                entropy_budget: 6.0,
                containment_min: 0.85,
                blast_limit: 10.0,
                checks: vec!["lint".to_string(), "unit_tests".to_string()],
                coherence_pass: 85.0,
                coherence_warn: 70.0,
                security: SecurityLimits {
                    max_critical: 0,
                    max_high: 0,
                },
            },
        );
        Self {
            profiles,
            origin_overrides: BTreeMap::new(),
            queue: QueueConfig::default(),
            risk: RiskGateConfig::default(),
        }
    }
}

impl PolicyConfig {
    /// Loads configuration: embedded defaults, overlaid by the first
    /// existing candidate file (explicit path first).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] on unreadable/malformed config or
    /// invalid values; a missing file is not an error.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut candidates: Vec<PathBuf> = Vec::new();
        if let Some(path) = explicit {
            candidates.push(path.to_path_buf());
        }
        candidates.extend(CONFIG_CANDIDATES.iter().map(PathBuf::from));

        let mut config = Self::default();
        for path in candidates {
            if !path.exists() {
                continue;
            }
            let raw = std::fs::read_to_string(&path).map_err(|err| ConfigError::Unreadable {
                path: path.display().to_string(),
                reason: err.to_string(),
            })?;
            let overlay: ConfigOverlay =
                serde_json::from_str(&raw).map_err(|err| ConfigError::Malformed {
                    path: path.display().to_string(),
                    reason: err.to_string(),
                })?;
            config.apply(overlay);
            break;
        }

        config.validate()?;
        Ok(config)
    }

    fn apply(&mut self, overlay: ConfigOverlay) {
        if let Some(profiles) = overlay.profiles {
            for (level, profile) in profiles {
                match self.profiles.entry(level) {
                    std::collections::btree_map::Entry::Occupied(mut entry) => {
                        let merged = entry.get().merged(&profile);
                        entry.insert(merged);
                    }
                    std::collections::btree_map::Entry::Vacant(entry) => {
                        // Unknown profile keys pass through untouched so
                        // deployments can carry extra levels, but only
                        // when fully specified.
                        if let Some(full) = profile.into_full() {
                            entry.insert(full);
                        }
                    }
                }
            }
        }
        if let Some(origin_overrides) = overlay.origin_overrides {
            self.origin_overrides = origin_overrides;
        }
        if let Some(queue) = overlay.queue {
            self.queue = queue;
        }
        if let Some(risk) = overlay.risk {
            self.risk = risk;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for level in RiskLevel::ALL {
            if !self.profiles.contains_key(level.as_str()) {
                return Err(ConfigError::MissingProfile {
                    level: level.as_str().to_string(),
                });
            }
        }
        if !(0.0..=1.0).contains(&self.risk.enforce_ratio) {
            return Err(ConfigError::BadEnforceRatio {
                value: self.risk.enforce_ratio,
            });
        }
        Ok(())
    }

    /// The base profile for a risk level (`medium` as last resort).
    #[must_use]
    pub fn profile(&self, level: RiskLevel) -> &Profile {
        self.profiles
            .get(level.as_str())
            .or_else(|| self.profiles.get("medium"))
            .expect("default profiles always cover medium")
    }

    /// The profile for a risk level specialized by origin: base merged
    /// with `origin_overrides[origin][level]`, falling back to
    /// `origin_overrides[origin]["_default"]`.
    #[must_use]
    pub fn profile_for(&self, level: RiskLevel, origin: OriginType) -> Profile {
        let base = self.profile(level).clone();
        let Some(per_origin) = self.origin_overrides.get(origin.as_str()) else {
            return base;
        };
        let overlay = per_origin
            .get(level.as_str())
            .or_else(|| per_origin.get("_default"));
        match overlay {
            Some(overlay) => base.merged(overlay),
            None => base,
        }
    }
}

impl ProfileOverride {
    /// Promotes a fully-specified override to a profile; `None` when
    /// any field is missing.
    fn into_full(self) -> Option<Profile> {
        Some(Profile {
            entropy_budget: self.entropy_budget?,
            containment_min: self.containment_min?,
            blast_limit: self.blast_limit?,
            checks: self.checks?,
            coherence_pass: self.coherence_pass?,
            coherence_warn: self.coherence_warn?,
            security: self.security?,
        })
    }
}

/// The on-disk config shape: everything optional, overlaid on the
/// embedded defaults.
#[derive(Debug, Deserialize)]
struct ConfigOverlay {
    #[serde(default)]
    profiles: Option<BTreeMap<String, ProfileOverride>>,
    #[serde(default)]
    origin_overrides: Option<BTreeMap<String, BTreeMap<String, ProfileOverride>>>,
    #[serde(default)]
    queue: Option<QueueConfig>,
    #[serde(default)]
    risk: Option<RiskGateConfig>,
}
