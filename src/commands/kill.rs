//! Implementation of the `kill` sub-command.
//!
//! Terminates the worker and the child's process group with the same
//! SIGTERM → grace → SIGKILL ladder the timeout path uses, then records the
//! `killed` status and returns the slot. Only `running` jobs can be killed;
//! abandoned queued jobs are reaped by the stale-queue rule instead.

use anyhow::Result;
use chrono::Local;
use std::path::Path;
use tracing::info;

use crate::errors::GlmError;
use crate::jobstore::{self, FINISHED_AT_FILE, Job, Status};
use crate::procs;
use crate::slots::SlotCounter;

pub fn execute(job_id: &str, root: &Path, slots: &SlotCounter) -> Result<()> {
    let cwd = std::env::current_dir()?;
    let project = jobstore::project_id(&cwd);
    let job = Job::find(root, &project, job_id)?;

    let status = job.status();
    if status != Status::Running {
        return Err(GlmError::validation(format!(
            "job {} is not running (status: {})",
            job.id,
            status.as_str()
        ))
        .into());
    }

    let launcher = job.pid();
    let child_group = job.child_pid();
    info!(job = %job.id, ?launcher, ?child_group, "terminating job");
    procs::terminate_job(launcher, child_group);

    job.write_file(FINISHED_AT_FILE, &Local::now().to_rfc3339())?;
    match job.transition(Status::Killed) {
        Ok(()) => {
            // The dead worker cannot return its claim; do it for it.
            slots.release()?;
        }
        Err(_) => {
            // The worker won the race and finished its own bookkeeping
            // (including the release) before the signals landed.
        }
    }

    println!("killed {}", job.id);
    Ok(())
}
