//! Shared command context: store, log, policy config, engine wiring.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use converge_core::check::CheckRunner;
use converge_core::coherence::HarnessConfig;
use converge_core::engine::Engine;
use converge_core::log::EventLog;
use converge_core::policy::PolicyConfig;
use converge_core::scm::GitScm;
use converge_core::store::SqliteStore;

/// Everything a command needs, built once from the global flags.
pub struct Context {
    pub log: Arc<EventLog>,
    pub config: PolicyConfig,
    pub repo: PathBuf,
}

impl Context {
    pub fn new(db: PathBuf, repo: PathBuf, config_path: Option<PathBuf>) -> Result<Self> {
        let store = Arc::new(
            SqliteStore::open(&db)
                .with_context(|| format!("opening store at {}", db.display()))?,
        );
        let log = Arc::new(EventLog::new(store));
        let config =
            PolicyConfig::load(config_path.as_deref()).context("loading policy config")?;
        Ok(Self { log, config, repo })
    }

    /// Builds a fully wired engine: git SCM, the default check
    /// registry, and the coherence harness from `.converge/`.
    pub fn engine(&self) -> Result<Engine> {
        let scm = Arc::new(GitScm::new(&self.repo));
        let harness = HarnessConfig::load(None).context("loading coherence harness")?;
        Ok(Engine::new(Arc::clone(&self.log), scm, self.config.clone())
            .with_checks(CheckRunner::with_default_commands().with_workdir(&self.repo))
            .with_harness(harness, Some(self.repo.clone())))
    }
}

/// Prints a value as pretty JSON on stdout.
pub fn emit<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
