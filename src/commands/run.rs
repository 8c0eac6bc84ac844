//! Implementation of the `run` sub-command: fire-and-wait.
//!
//! A `run` job is ephemeral: the directory exists only until the result has
//! been printed to the caller.

use anyhow::Result;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::driver::{self, JobRequest};
use crate::errors::GlmError;
use crate::jobstore::{self, Job, STDERR_FILE, STDOUT_FILE, Status};
use crate::slots::SlotCounter;

/// Options for the `run` sub-command.
#[derive(Debug, Default)]
pub struct RunOpts<'a> {
    pub prompt: &'a str,
    /// Seconds; None or 0 uses the configured default.
    pub timeout: Option<u64>,
    pub permission_mode: Option<&'a str>,
    /// Overrides all three model slots at once.
    pub model: Option<&'a str>,
    pub dir: Option<&'a str>,
}

/// Resolve the job's working directory: `--dir` when given, else the
/// caller's cwd. Shared with `start`.
pub(crate) fn resolve_workdir(dir: Option<&str>) -> Result<PathBuf> {
    match dir {
        Some(d) => {
            let path = PathBuf::from(d);
            std::fs::canonicalize(&path).map_err(|_| {
                GlmError::user(format!("working directory does not exist: {d}"))
                    .with_suggestion("Pass --dir with an existing path")
                    .into()
            })
        }
        None => std::env::current_dir()
            .map_err(|e| GlmError::internal(format!("cannot determine cwd: {e}")).into()),
    }
}

pub(crate) fn require_prompt(prompt: &str) -> Result<()> {
    if prompt.trim().is_empty() {
        return Err(GlmError::validation("prompt must not be empty").into());
    }
    Ok(())
}

fn emit(text: &str) {
    if text.is_empty() {
        return;
    }
    print!("{text}");
    if !text.ends_with('\n') {
        println!();
    }
}

/// Execute `run`: create a job, wait for a slot, drive the child, print the
/// extracted result, remove the job directory.
pub fn execute(opts: RunOpts, cfg: &Config, root: &Path, slots: &SlotCounter) -> Result<()> {
    require_prompt(opts.prompt)?;
    let workdir = resolve_workdir(opts.dir)?;
    let project = jobstore::project_id(&workdir);

    let job = Job::create(root, &project)?;
    job.write_pid(std::process::id())?;

    let req = JobRequest {
        prompt: opts.prompt,
        workdir,
        timeout_secs: opts.timeout.unwrap_or(0),
        permission_mode: opts.permission_mode.unwrap_or(&cfg.permission_mode),
        model_override: opts.model,
    };

    let status = match driver::execute(&job, &req, cfg, slots) {
        Ok(status) => status,
        Err(e) => {
            // The job never got off the ground; nothing worth keeping.
            let _ = job.delete();
            return Err(e);
        }
    };

    let stdout = job.read_file(STDOUT_FILE).unwrap_or_default();
    match status {
        Status::Done => {
            emit(&stdout);
            job.delete()?;
            Ok(())
        }
        Status::Timeout => {
            job.delete()?;
            Err(GlmError::timeout(format!(
                "job exceeded its {}s timeout",
                req.effective_timeout(cfg)
            ))
            .with_suggestion("Raise --timeout or split the task")
            .into())
        }
        _ => {
            // A child failure is a job outcome, not a supervisor error: show
            // the captured stderr, warn, and exit clean.
            if let Some(err_text) = job.read_file(STDERR_FILE) {
                let trimmed = err_text.trim_end();
                if !trimmed.is_empty() {
                    eprintln!("{trimmed}");
                }
            }
            eprintln!("warning: job finished with status {}", status.as_str());
            emit(&stdout);
            job.delete()?;
            Ok(())
        }
    }
}
