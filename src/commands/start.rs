//! Implementation of the `start` sub-command: fire-and-detach.
//!
//! `start` validates synchronously, creates the job, then detaches a worker
//! pipeline (this binary re-executed with the hidden `_worker` sub-command)
//! that waits for a slot and drives the child. The worker's PID is the
//! launcher PID recorded in `pid.txt`; liveness probes and `kill` address it.

use anyhow::{Context, Result};
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::debug;

use crate::config::Config;
use crate::driver::{self, JobRequest};
use crate::jobstore::{self, Job, PROMPT_FILE};

use super::run::{require_prompt, resolve_workdir};

/// Options for the `start` sub-command.
#[derive(Debug, Default)]
pub struct StartOpts<'a> {
    pub prompt: &'a str,
    pub timeout: Option<u64>,
    pub permission_mode: Option<&'a str>,
    pub model: Option<&'a str>,
    pub dir: Option<&'a str>,
}

/// Execute `start`: create the job, detach the worker, print the job id.
pub fn execute(opts: StartOpts, cfg: &Config, root: &Path) -> Result<()> {
    require_prompt(opts.prompt)?;
    let workdir = resolve_workdir(opts.dir)?;
    let permission_mode = opts.permission_mode.unwrap_or(&cfg.permission_mode);

    // Surface workdir/binary problems to the caller now; once detached the
    // only channel left is the job directory.
    let req = JobRequest {
        prompt: opts.prompt,
        workdir: workdir.clone(),
        timeout_secs: opts.timeout.unwrap_or(0),
        permission_mode,
        model_override: opts.model,
    };
    driver::preflight(&req)?;

    let project = jobstore::project_id(&workdir);
    let job = Job::create(root, &project)?;
    // The worker reads the prompt from the job directory; argv stays small.
    job.write_file(PROMPT_FILE, opts.prompt)?;

    let exe = std::env::current_exe().context("resolve current exe")?;
    let mut worker = Command::new(&exe);
    worker
        .arg("_worker")
        .arg("--job")
        .arg(&job.id)
        .arg("--project")
        .arg(&project)
        .arg("--dir")
        .arg(workdir.as_os_str())
        .arg("--timeout")
        .arg(opts.timeout.unwrap_or(0).to_string())
        .arg("--permission-mode")
        .arg(permission_mode);
    if let Some(model) = opts.model {
        worker.arg("--model").arg(model);
    }
    worker
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    // Detach from the controlling terminal so the worker outlives the shell.
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        // SAFETY: setsid is async-signal-safe and runs before exec.
        unsafe {
            worker.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }
    }

    let handle = worker.spawn().context("spawn worker")?;
    job.write_pid(handle.id())?;
    debug!(job = %job.id, worker_pid = handle.id(), "worker detached");

    println!("{}", job.id);
    Ok(())
}
