//! Queue commands: process, confirm, reset.

use anyhow::{Result, bail};
use clap::Args;
use converge_core::engine::confirm_merge;
use converge_core::intake::IntakeMode;
use converge_core::intent::Status;
use converge_core::queue::{QueueError, QueueOptions, QueueProcessor, reset_queue};
use serde_json::json;

use crate::context::{Context, emit};

/// Arguments for `converge queue`.
#[derive(Args, Debug)]
pub struct QueueArgs {
    /// Execute merges after queuing
    #[arg(long)]
    pub auto_confirm: bool,

    /// Batch size
    #[arg(long, default_value_t = 20)]
    pub limit: usize,

    /// Intake mode consulted during the pass (open, throttle, pause)
    #[arg(long, default_value = "open")]
    pub intake_mode: String,
}

pub fn process(ctx: &Context, args: QueueArgs) -> Result<()> {
    let Some(intake_mode) = IntakeMode::parse(&args.intake_mode) else {
        bail!("unknown intake mode: {}", args.intake_mode);
    };
    let engine = ctx.engine()?;
    let options = QueueOptions {
        limit: args.limit,
        auto_confirm: args.auto_confirm,
        max_retries: ctx.config.queue.max_retries,
        intake_mode,
        ..QueueOptions::default()
    };
    let processor = QueueProcessor::new(&engine, options);
    match processor.process() {
        Ok(results) => emit(&results),
        Err(QueueError::LockHeld { holder }) => {
            emit(&json!({"error": "queue lock held", "lock": holder}))
        }
        Err(err) => Err(err.into()),
    }
}

pub fn confirm(ctx: &Context, id: &str, commit: Option<&str>) -> Result<()> {
    let intent = confirm_merge(&ctx.log, id, commit)?;
    emit(&json!({
        "intent_id": intent.id,
        "status": intent.status.as_str(),
    }))
}

pub fn reset(ctx: &Context, id: &str, status: Option<&str>, clear_lock: bool) -> Result<()> {
    let status = status.map(Status::parse).transpose()?;
    reset_queue(&ctx.log, id, status, clear_lock)?;
    emit(&json!({"intent_id": id, "retries": 0, "lock_cleared": clear_lock}))
}
