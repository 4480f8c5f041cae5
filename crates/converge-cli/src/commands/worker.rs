//! The polling queue worker.
//!
//! Runs queue passes on an interval until interrupted. Each pass runs
//! on a blocking thread (the core is synchronous); ctrl-c drains the
//! in-flight pass before exiting, so external commands get to finish
//! within their own timeouts.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use clap::Args;
use converge_core::event::{Event, EventType};
use converge_core::intake::IntakeMode;
use converge_core::queue::{QueueError, QueueOptions, QueueProcessor};
use serde_json::json;

use crate::context::Context;

/// Arguments for `converge worker`.
#[derive(Args, Debug)]
pub struct WorkerArgs {
    /// Seconds between queue passes
    #[arg(long, default_value_t = 5)]
    pub poll_interval: u64,

    /// Batch size per pass
    #[arg(long, default_value_t = 20)]
    pub batch_size: usize,

    /// Execute merges after queuing
    #[arg(long)]
    pub auto_confirm: bool,

    /// Intake mode consulted during passes (open, throttle, pause)
    #[arg(long, default_value = "open")]
    pub intake_mode: String,

    /// Stop after N passes (0 = run until interrupted)
    #[arg(long, default_value_t = 0)]
    pub max_cycles: u64,
}

pub fn run(ctx: Context, args: WorkerArgs) -> Result<()> {
    let Some(intake_mode) = IntakeMode::parse(&args.intake_mode) else {
        bail!("unknown intake mode: {}", args.intake_mode);
    };

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run_loop(ctx, args, intake_mode))
}

async fn run_loop(ctx: Context, args: WorkerArgs, intake_mode: IntakeMode) -> Result<()> {
    ctx.log.append(Event::new(
        EventType::WorkerStarted,
        json!({
            "poll_interval": args.poll_interval,
            "batch_size": args.batch_size,
            "auto_confirm": args.auto_confirm,
            "pid": std::process::id(),
        }),
    ))?;
    tracing::info!(
        poll = args.poll_interval,
        batch = args.batch_size,
        auto_confirm = args.auto_confirm,
        "worker started"
    );

    let ctx = Arc::new(ctx);
    let mut cycles = 0u64;
    let mut total_processed = 0usize;

    loop {
        let pass_ctx = Arc::clone(&ctx);
        let options = QueueOptions {
            limit: args.batch_size,
            auto_confirm: args.auto_confirm,
            max_retries: ctx.config.queue.max_retries,
            intake_mode,
            ..QueueOptions::default()
        };

        // The pass is blocking (subprocesses, SQLite); ctrl-c between
        // passes interrupts the loop, not the pass.
        let pass = tokio::task::spawn_blocking(move || {
            let engine = pass_ctx.engine()?;
            let processor = QueueProcessor::new(&engine, options);
            match processor.process() {
                Ok(results) => Ok(results.len()),
                Err(QueueError::LockHeld { .. }) => {
                    tracing::debug!("queue lock held, skipping cycle");
                    Ok(0)
                }
                Err(err) => Err(anyhow::Error::from(err)),
            }
        });

        match pass.await? {
            Ok(processed) => total_processed += processed,
            Err(err) => tracing::error!(error = %err, "queue pass failed"),
        }

        cycles += 1;
        if args.max_cycles > 0 && cycles >= args.max_cycles {
            break;
        }

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(args.poll_interval)) => {}
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupt received, draining");
                break;
            }
        }
    }

    ctx.log.append(Event::new(
        EventType::WorkerStopped,
        json!({"cycles": cycles, "total_processed": total_processed}),
    ))?;
    tracing::info!(cycles, total_processed, "worker stopped");
    Ok(())
}
