//! Three-tier feature flag registry.
//!
//! Flags resolve defaults → config file (`.converge/flags.json`, then
//! `flags.json`) → environment (`CONVERGE_FF_<NAME>`,
//! `CONVERGE_FF_<NAME>_MODE`), with the environment winning. Each flag
//! is `{enabled, mode}` where mode is `off`, `shadow`, or `enforce`.
//! The registry is process-wide, initialized on first use, and
//! reloadable (tests, admin operations).


use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{OnceLock, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Flag config file candidates, tried in order.
const FLAG_FILES: [&str; 2] = [".converge/flags.json", "flags.json"];

/// Rollout mode of a flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FlagMode {
    /// Feature inert.
    #[default]
    Off,
    /// Feature computes and records, never acts.
    Shadow,
    /// Feature acts.
    Enforce,
}

impl FlagMode {
    /// Returns the lowercase string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Shadow => "shadow",
            Self::Enforce => "enforce",
        }
    }

    /// Parses leniently; unknown strings map to `Off`.
    #[must_use]
    pub fn parse_lenient(s: &str) -> Self {
        match s {
            "shadow" => Self::Shadow,
            "enforce" => Self::Enforce,
            _ => Self::Off,
        }
    }
}

/// One flag's resolved state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagState {
    /// Flag name.
    pub name: String,
    /// Whether the feature is on at all.
    pub enabled: bool,
    /// Rollout mode.
    pub mode: FlagMode,
    /// What the flag controls.
    pub description: String,
    /// Which tier supplied the final value (`default`, `config`,
    /// `env`, `api`).
    pub source: String,
}

/// Built-in flags and their safe defaults.
fn defaults() -> Vec<FlagState> {
    let flag = |name: &str, enabled: bool, mode: FlagMode, description: &str| FlagState {
        name: name.to_string(),
        enabled,
        mode,
        description: description.to_string(),
        source: "default".to_string(),
    };
    vec![
        flag(
            "auto_classify",
            true,
            FlagMode::Enforce,
            "Rewrite intent risk level from the computed score",
        ),
        flag(
            "audit_chain",
            true,
            FlagMode::Enforce,
            "Event tamper-evidence chain",
        ),
        flag(
            "review_tasks",
            true,
            FlagMode::Enforce,
            "Human review task workflow",
        ),
        flag(
            "intake_control",
            true,
            FlagMode::Enforce,
            "Adaptive intake throttling",
        ),
        flag(
            "security_adapters",
            true,
            FlagMode::Enforce,
            "Security scanner integration",
        ),
        flag(
            "plan_coordination",
            true,
            FlagMode::Enforce,
            "Dependency-ordered queue processing",
        ),
    ]
}

/// The flag registry.
#[derive(Debug, Clone)]
pub struct FlagRegistry {
    flags: BTreeMap<String, FlagState>,
}

impl FlagRegistry {
    /// Loads the registry from defaults, config file, and environment.
    #[must_use]
    pub fn load(config_dir: Option<&Path>) -> Self {
        let mut flags: BTreeMap<String, FlagState> = defaults()
            .into_iter()
            .map(|f| (f.name.clone(), f))
            .collect();

        Self::apply_config(&mut flags, config_dir);
        Self::apply_env(&mut flags);

        Self { flags }
    }

    fn apply_config(flags: &mut BTreeMap<String, FlagState>, config_dir: Option<&Path>) {
        let candidates: Vec<PathBuf> = FLAG_FILES
            .iter()
            .map(|name| config_dir.map_or_else(|| PathBuf::from(name), |dir| dir.join(name)))
            .collect();
        for path in candidates {
            if !path.exists() {
                continue;
            }
            let Ok(raw) = std::fs::read_to_string(&path) else {
                continue;
            };
            let Ok(data) = serde_json::from_str::<BTreeMap<String, Value>>(&raw) else {
                tracing::warn!(path = %path.display(), "unparseable flags file ignored");
                continue;
            };
            for (name, value) in data {
                let Some(state) = flags.get_mut(&name) else {
                    continue;
                };
                match value {
                    Value::Bool(enabled) => {
                        state.enabled = enabled;
                        state.source = "config".to_string();
                    }
                    Value::Object(map) => {
                        if let Some(enabled) = map.get("enabled").and_then(Value::as_bool) {
                            state.enabled = enabled;
                        }
                        if let Some(mode) = map.get("mode").and_then(Value::as_str) {
                            state.mode = FlagMode::parse_lenient(mode);
                        }
                        state.source = "config".to_string();
                    }
                    _ => {}
                }
            }
            break;
        }
    }

    fn apply_env(flags: &mut BTreeMap<String, FlagState>) {
        for state in flags.values_mut() {
            let key = format!("CONVERGE_FF_{}", state.name.to_uppercase());
            if let Ok(value) = std::env::var(&key) {
                state.enabled = matches!(value.as_str(), "1" | "true" | "yes" | "on");
                state.source = "env".to_string();
            }
            if let Ok(mode) = std::env::var(format!("{key}_MODE")) {
                state.mode = FlagMode::parse_lenient(&mode);
                state.source = "env".to_string();
            }
        }
    }

    /// Whether a flag is enabled. Unknown flags default to enabled.
    #[must_use]
    pub fn is_enabled(&self, name: &str) -> bool {
        self.flags.get(name).map_or(true, |f| f.enabled)
    }

    /// A flag's mode. Unknown flags report `Off`.
    #[must_use]
    pub fn mode(&self, name: &str) -> FlagMode {
        self.flags.get(name).map_or(FlagMode::Off, |f| f.mode)
    }

    /// True when a flag is enabled with `enforce` mode.
    #[must_use]
    pub fn is_enforced(&self, name: &str) -> bool {
        self.flags
            .get(name)
            .is_some_and(|f| f.enabled && f.mode == FlagMode::Enforce)
    }

    /// Full state of one flag.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FlagState> {
        self.flags.get(name)
    }

    /// All flags, sorted by name.
    #[must_use]
    pub fn list(&self) -> Vec<&FlagState> {
        self.flags.values().collect()
    }

    /// Sets a flag at runtime. Returns the new state, or `None` for
    /// unknown flags.
    pub fn set(
        &mut self,
        name: &str,
        enabled: Option<bool>,
        mode: Option<FlagMode>,
    ) -> Option<FlagState> {
        let state = self.flags.get_mut(name)?;
        if let Some(enabled) = enabled {
            state.enabled = enabled;
        }
        if let Some(mode) = mode {
            state.mode = mode;
        }
        state.source = "api".to_string();
        Some(state.clone())
    }
}

static REGISTRY: OnceLock<RwLock<FlagRegistry>> = OnceLock::new();

fn registry_lock() -> &'static RwLock<FlagRegistry> {
    REGISTRY.get_or_init(|| RwLock::new(FlagRegistry::load(None)))
}

/// A snapshot of the process-wide registry.
#[must_use]
pub fn registry() -> FlagRegistry {
    registry_lock()
        .read()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .clone()
}

/// Replaces the process-wide registry (admin reload, tests).
pub fn replace_registry(new: FlagRegistry) {
    *registry_lock()
        .write()
        .unwrap_or_else(std::sync::PoisonError::into_inner) = new;
}
