//! Admin commands: events, audit chain, coherence baselines,
//! calibration, flags, retention.

use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use clap::Subcommand;
use converge_core::chain;
use converge_core::coherence::{HarnessConfig, evaluate, load_baselines, update_baselines};
use converge_core::event::{Event, EventType};
use converge_core::flags::{FlagMode, registry, replace_registry};
use converge_core::policy::calibrate_profiles;
use converge_core::store::EventFilter;
use serde_json::json;

use crate::context::{Context, emit};

/// Audit chain subcommands.
#[derive(Subcommand, Debug)]
pub enum ChainAction {
    /// Rebuild the chain from the current log contents
    Init,
    /// Verify every link and the stored head
    Verify,
}

/// Coherence subcommands.
#[derive(Subcommand, Debug)]
pub enum CoherenceAction {
    /// List configured questions with current baselines
    List,
    /// Run the harness and store the results as new baselines
    Baseline,
}

/// Flag subcommands.
#[derive(Subcommand, Debug)]
pub enum FlagsAction {
    /// List all flags
    List,
    /// Set one flag
    Set {
        /// Flag name
        name: String,
        /// New enabled state
        #[arg(long)]
        enabled: Option<bool>,
        /// New mode (off, shadow, enforce)
        #[arg(long)]
        mode: Option<String>,
    },
}

pub fn events(
    ctx: &Context,
    event_type: Option<&str>,
    intent: Option<&str>,
    limit: usize,
) -> Result<()> {
    let filter = EventFilter {
        event_type: event_type.map(EventType::parse).transpose()?,
        intent_id: intent.map(str::to_string),
        limit: Some(limit),
        ..EventFilter::default()
    };
    let events = ctx.log.query(&filter)?;
    emit(&events)
}

pub fn chain(ctx: &Context, action: ChainAction) -> Result<()> {
    match action {
        ChainAction::Init => {
            let state = chain::initialize(&ctx.log)?;
            emit(&json!({
                "initialized": true,
                "event_count": state.event_count,
                "chain_hash": state.last_hash,
            }))
        }
        ChainAction::Verify => {
            let result = chain::verify(&ctx.log)?;
            emit(&result)
        }
    }
}

pub fn coherence(ctx: &Context, action: CoherenceAction) -> Result<()> {
    let harness = HarnessConfig::load(None)?;
    match action {
        CoherenceAction::List => {
            let baselines = load_baselines(&ctx.log)?;
            let questions: Vec<_> = harness
                .questions
                .iter()
                .map(|q| {
                    json!({
                        "id": q.id,
                        "question": q.question,
                        "check": q.check,
                        "assertion": q.assertion,
                        "severity": q.severity,
                        "enabled": q.enabled,
                        "baseline": baselines.get(&q.id),
                    })
                })
                .collect();
            emit(&json!({"version": harness.version, "questions": questions}))
        }
        CoherenceAction::Baseline => {
            let questions = harness.enabled_questions();
            let baselines = load_baselines(&ctx.log)?;
            let evaluation = evaluate(
                &questions,
                Some(&ctx.repo),
                &baselines,
                75.0,
                60.0,
                &harness.version,
            );
            let stored = update_baselines(&ctx.log, &evaluation.results)?;
            emit(&json!({"baselines": stored, "score": evaluation.score}))
        }
    }
}

pub fn calibrate(ctx: &Context) -> Result<()> {
    // Historical entropy scores come from risk.evaluated evidence.
    let events = ctx.log.query(&EventFilter {
        event_type: Some(EventType::RiskEvaluated),
        limit: Some(10_000),
        ..EventFilter::default()
    })?;
    let history: Vec<f64> = events
        .iter()
        .filter_map(|e| {
            e.event
                .payload
                .get("risk")
                .and_then(|r| r.get("entropy_score"))
                .and_then(serde_json::Value::as_f64)
        })
        .collect();

    let calibrated = calibrate_profiles(&ctx.config.profiles, &history);
    ctx.log.append(Event::new(
        EventType::CalibrationCompleted,
        json!({
            "samples": history.len(),
            "budgets": calibrated
                .iter()
                .map(|(level, p)| (level.clone(), p.entropy_budget))
                .collect::<std::collections::BTreeMap<_, _>>(),
        }),
    ))?;
    emit(&calibrated)
}

pub fn flags(action: FlagsAction) -> Result<()> {
    match action {
        FlagsAction::List => {
            let registry = registry();
            emit(&registry.list())
        }
        FlagsAction::Set {
            name,
            enabled,
            mode,
        } => {
            let mode = mode.as_deref().map(FlagMode::parse_lenient);
            let mut current = registry();
            let Some(state) = current.set(&name, enabled, mode) else {
                bail!("unknown flag: {name}");
            };
            replace_registry(current);
            emit(&state)
        }
    }
}

pub fn prune(ctx: &Context, before: &str, dry_run: bool) -> Result<()> {
    let cutoff: DateTime<Utc> = before
        .parse()
        .map_err(|err| anyhow::anyhow!("bad cutoff {before}: {err}"))?;
    let affected = ctx.log.store().prune_events(cutoff, dry_run)?;
    emit(&json!({
        "pruned": affected,
        "dry_run": dry_run,
        "note": "run `converge chain init` after a real prune",
    }))
}
