//! converge - merge-coordination engine CLI
//!
//! Command-line surface over the Converge core: intent management,
//! validation, queue processing, the background worker, and admin
//! operations (audit chain, coherence baselines, calibration, flags).

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod context;

/// converge - policy-driven merge coordination
#[derive(Parser, Debug)]
#[command(name = "converge")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the state database
    #[arg(long, default_value = ".converge/state.db")]
    db: PathBuf,

    /// Path to the git repository
    #[arg(long, default_value = ".")]
    repo: PathBuf,

    /// Explicit policy config path (falls back to .converge/policy.json)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    // === Intents ===
    /// Create and submit an intent
    Create(commands::intents::CreateArgs),

    /// List intents
    List {
        /// Filter by status (READY, VALIDATED, ...)
        #[arg(long)]
        status: Option<String>,
        /// Result cap
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },

    /// Show one intent
    Show {
        /// Intent id
        id: String,
    },

    /// Run the full validation pipeline on an intent
    Validate {
        /// Intent id
        id: String,
    },

    // === Queue ===
    /// Process the merge queue once
    Queue(commands::queue::QueueArgs),

    /// Confirm a queued intent as merged
    Confirm {
        /// Intent id
        id: String,
        /// Merge commit sha recorded with the confirmation
        #[arg(long)]
        commit: Option<String>,
    },

    /// Reset retries (and optionally status / the queue lock)
    Reset {
        /// Intent id
        id: String,
        /// Force a status (READY, VALIDATED, ...)
        #[arg(long)]
        status: Option<String>,
        /// Force-release the queue lock
        #[arg(long)]
        clear_lock: bool,
    },

    /// Run the polling queue worker until interrupted
    Worker(commands::worker::WorkerArgs),

    // === Events ===
    /// Query the event log
    Events {
        /// Filter by event type (dotted form)
        #[arg(long = "type")]
        event_type: Option<String>,
        /// Filter by intent id
        #[arg(long)]
        intent: Option<String>,
        /// Result cap
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },

    // === Admin ===
    /// Audit chain operations
    Chain {
        #[command(subcommand)]
        action: commands::admin::ChainAction,
    },

    /// Coherence harness operations
    Coherence {
        #[command(subcommand)]
        action: commands::admin::CoherenceAction,
    },

    /// Recalibrate entropy budgets from historical scores
    Calibrate,

    /// Feature flag operations
    Flags {
        #[command(subcommand)]
        action: commands::admin::FlagsAction,
    },

    /// Prune events older than a cutoff
    Prune {
        /// RFC3339 cutoff; earlier events are removed
        #[arg(long)]
        before: String,
        /// Count without deleting
        #[arg(long)]
        dry_run: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.clone())),
        )
        .with_writer(std::io::stderr)
        .init();

    let ctx = context::Context::new(cli.db, cli.repo, cli.config)?;

    match cli.command {
        Commands::Create(args) => commands::intents::create(&ctx, args),
        Commands::List { status, limit } => commands::intents::list(&ctx, status, limit),
        Commands::Show { id } => commands::intents::show(&ctx, &id),
        Commands::Validate { id } => commands::intents::validate(&ctx, &id),
        Commands::Queue(args) => commands::queue::process(&ctx, args),
        Commands::Confirm { id, commit } => commands::queue::confirm(&ctx, &id, commit.as_deref()),
        Commands::Reset {
            id,
            status,
            clear_lock,
        } => commands::queue::reset(&ctx, &id, status.as_deref(), clear_lock),
        Commands::Worker(args) => commands::worker::run(ctx, args),
        Commands::Events {
            event_type,
            intent,
            limit,
        } => commands::admin::events(&ctx, event_type.as_deref(), intent.as_deref(), limit),
        Commands::Chain { action } => commands::admin::chain(&ctx, action),
        Commands::Coherence { action } => commands::admin::coherence(&ctx, action),
        Commands::Calibrate => commands::admin::calibrate(&ctx),
        Commands::Flags { action } => commands::admin::flags(action),
        Commands::Prune { before, dry_run } => commands::admin::prune(&ctx, &before, dry_run),
    }
}
