//! glm — entry point.
//!
//! Stdout carries command results only; diagnostics go to stderr. Every
//! abnormal exit maps to one of the five contractual codes (1, 3, 124, 127,
//! plus 0 for success), including clap usage errors.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use glm::commands;
use glm::config;
use glm::errors::{Category, GlmError};
use glm::jobstore;
use glm::reconcile;
use glm::slots::SlotCounter;

#[derive(Debug, Parser)]
#[command(name = "glm")]
#[command(about = "Claude Code subagent supervisor", long_about = None, version)]
struct Cli {
    /// Increase log verbosity (-v, -vv); logs go to stderr.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a subagent job and wait for its result.
    Run {
        /// Timeout in seconds (0 = configured default).
        #[arg(long)]
        timeout: Option<u64>,

        /// Permission mode passed to the child.
        #[arg(long)]
        permission_mode: Option<String>,

        /// Override all three model slots at once.
        #[arg(long)]
        model: Option<String>,

        /// Working directory for the job (default: current directory).
        #[arg(long)]
        dir: Option<String>,

        /// The task prompt.
        prompt: String,
    },

    /// Start a detached subagent job and print its id.
    Start {
        /// Timeout in seconds (0 = configured default).
        #[arg(long)]
        timeout: Option<u64>,

        /// Permission mode passed to the child.
        #[arg(long)]
        permission_mode: Option<String>,

        /// Override all three model slots at once.
        #[arg(long)]
        model: Option<String>,

        /// Working directory for the job (default: current directory).
        #[arg(long)]
        dir: Option<String>,

        /// The task prompt.
        prompt: String,
    },

    /// Print a job's status.
    Status {
        /// Job ID.
        job_id: String,
    },

    /// Print a finished job's result and remove it.
    Result {
        /// Job ID.
        job_id: String,
    },

    /// Print a job's file-change log.
    Log {
        /// Job ID.
        job_id: String,
    },

    /// List all jobs.
    List,

    /// Terminate a running job.
    Kill {
        /// Job ID.
        job_id: String,
    },

    /// Remove finished jobs.
    Clean {
        /// Remove any job directory older than N days (by mtime).
        #[arg(long, conflicts_with = "stale")]
        days: Option<u64>,

        /// Remove only auto-recovered jobs.
        #[arg(long)]
        stale: bool,
    },

    /// [Internal] Detached job pipeline — not for direct use.
    #[command(name = "_worker", hide = true)]
    Worker {
        #[arg(long)]
        job: String,

        #[arg(long)]
        project: String,

        #[arg(long)]
        dir: String,

        #[arg(long, default_value = "0")]
        timeout: u64,

        #[arg(long)]
        permission_mode: String,

        #[arg(long)]
        model: Option<String>,
    },
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // Keep the five-exit-code contract: usage errors are validation
            // failures, not clap's native exit 2.
            use clap::error::ErrorKind;
            let _ = e.print();
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => Category::Validation.exit_code(),
            };
            std::process::exit(code);
        }
    };

    if let Err(e) = run(cli) {
        match e.downcast_ref::<GlmError>() {
            Some(glm) => {
                eprintln!("{}", glm.render());
                std::process::exit(glm.category.exit_code());
            }
            None => {
                eprintln!("{} {e:#}", Category::Internal.prefix());
                std::process::exit(Category::Internal.exit_code());
            }
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let cfg = config::load()?;

    let default_level = if cfg.debug {
        "debug"
    } else {
        match cli.verbose {
            0 => "warn",
            1 => "info",
            _ => "debug",
        }
    };
    // Logs always go to stderr so stdout stays result-only.
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();

    let root = jobstore::resolve_root();
    std::fs::create_dir_all(&root)
        .with_context(|| format!("create jobs root {}", root.display()))?;
    let slots = SlotCounter::new(&root, cfg.max_parallel);
    slots.init()?;
    // One sweep per supervisor process, before any command touches a job.
    reconcile::reconcile(&root, &slots, Utc::now())?;

    match cli.command {
        Command::Run {
            timeout,
            permission_mode,
            model,
            dir,
            prompt,
        } => commands::run::execute(
            commands::run::RunOpts {
                prompt: &prompt,
                timeout,
                permission_mode: permission_mode.as_deref(),
                model: model.as_deref(),
                dir: dir.as_deref(),
            },
            &cfg,
            &root,
            &slots,
        ),

        Command::Start {
            timeout,
            permission_mode,
            model,
            dir,
            prompt,
        } => commands::start::execute(
            commands::start::StartOpts {
                prompt: &prompt,
                timeout,
                permission_mode: permission_mode.as_deref(),
                model: model.as_deref(),
                dir: dir.as_deref(),
            },
            &cfg,
            &root,
        ),

        Command::Status { job_id } => commands::status::execute(&job_id, &root, &slots),

        Command::Result { job_id } => commands::result::execute(&job_id, &root, &slots),

        Command::Log { job_id } => commands::logcmd::execute(&job_id, &root),

        Command::List => commands::list::execute(&root, &slots),

        Command::Kill { job_id } => commands::kill::execute(&job_id, &root, &slots),

        Command::Clean { days, stale } => {
            commands::clean::execute(commands::clean::CleanOpts { days, stale }, &root)
        }

        Command::Worker {
            job,
            project,
            dir,
            timeout,
            permission_mode,
            model,
        } => commands::worker::execute(
            commands::worker::WorkerOpts {
                job_id: &job,
                project: &project,
                dir: &dir,
                timeout,
                permission_mode: &permission_mode,
                model: model.as_deref(),
            },
            &cfg,
            &root,
            &slots,
        ),
    }
}
