//! Intent commands: create, list, show, validate.

use anyhow::{Result, bail};
use clap::Args;
use converge_core::intake::{IntakeMode, submit_intent};
use converge_core::intent::{Intent, OriginType, RiskLevel, Status};
use serde_json::json;

use crate::context::{Context, emit};

/// Arguments for `converge create`.
#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Source branch ref
    #[arg(long)]
    pub source: String,

    /// Target branch ref
    #[arg(long, default_value = "main")]
    pub target: String,

    /// Declared risk level (low, medium, high, critical)
    #[arg(long, default_value = "medium")]
    pub risk: String,

    /// Priority 1 (highest) ..= 5 (lowest)
    #[arg(long, default_value_t = 3)]
    pub priority: u8,

    /// Origin type (human, agent, integration)
    #[arg(long, default_value = "human")]
    pub origin: String,

    /// Scope hints, repeatable
    #[arg(long = "scope")]
    pub scopes: Vec<String>,

    /// Dependency intent ids, repeatable
    #[arg(long = "depends-on")]
    pub dependencies: Vec<String>,

    /// Extra required check names, repeatable
    #[arg(long = "require-check")]
    pub checks_required: Vec<String>,

    /// One-line problem statement stored under semantic.problem
    #[arg(long)]
    pub problem: Option<String>,

    /// Tenant partition key
    #[arg(long)]
    pub tenant: Option<String>,

    /// Plan grouping key
    #[arg(long)]
    pub plan: Option<String>,

    /// Intake mode override (open, throttle, pause)
    #[arg(long, default_value = "open")]
    pub intake_mode: String,
}

pub fn create(ctx: &Context, args: CreateArgs) -> Result<()> {
    let mut intent = Intent::new(args.source, args.target);
    intent.risk_level = RiskLevel::parse(&args.risk)?;
    intent.priority = args.priority;
    intent.origin_type = OriginType::parse(&args.origin)?;
    intent.dependencies = args.dependencies;
    intent.checks_required = args.checks_required;
    intent.tenant_id = args.tenant;
    intent.plan_id = args.plan;
    if !args.scopes.is_empty() {
        intent.technical = json!({"scope_hint": args.scopes});
    }
    if let Some(problem) = args.problem {
        intent.semantic = json!({"problem": problem});
    }

    let Some(mode) = IntakeMode::parse(&args.intake_mode) else {
        bail!("unknown intake mode: {}", args.intake_mode);
    };
    let decision = submit_intent(&ctx.log, &intent, mode)?;
    emit(&json!({
        "intent_id": intent.id,
        "accepted": decision.accepted,
        "mode": decision.mode,
        "reason": decision.reason,
    }))
}

pub fn list(ctx: &Context, status: Option<String>, limit: usize) -> Result<()> {
    let status = status.as_deref().map(Status::parse).transpose()?;
    let intents = ctx.log.store().list_intents(status, None, limit)?;
    let rows: Vec<_> = intents
        .iter()
        .map(|i| {
            json!({
                "id": i.id,
                "source": i.source,
                "target": i.target,
                "status": i.status.as_str(),
                "risk_level": i.risk_level.as_str(),
                "priority": i.priority,
                "retries": i.retries,
            })
        })
        .collect();
    emit(&rows)
}

pub fn show(ctx: &Context, id: &str) -> Result<()> {
    match ctx.log.store().get_intent(id)? {
        Some(intent) => emit(&intent),
        None => bail!("intent not found: {id}"),
    }
}

pub fn validate(ctx: &Context, id: &str) -> Result<()> {
    let Some(mut intent) = ctx.log.store().get_intent(id)? else {
        bail!("intent not found: {id}");
    };
    let engine = ctx.engine()?;
    let outcome = engine.validate(&mut intent)?;
    emit(&outcome)
}
