//! Startup reconciliation.
//!
//! Each supervisor process is short-lived, so there is no watchdog; instead,
//! every invocation sweeps the jobs root once before running its command.
//! The sweep repairs state abandoned by crashed or killed supervisors and
//! rewrites the slot counter to the observed number of live running jobs.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::path::Path;
use tracing::{debug, info};

use crate::jobstore::{self, FINISHED_AT_FILE, Job, Status};
use crate::procs;
use crate::slots::SlotCounter;

/// Sentinel appended to a job's `stderr.txt` when a terminal status was set
/// by recovery rather than by an explicit user action. `clean --stale`
/// removes only jobs carrying this marker.
pub const AUTO_RECOVERED_MARKER: &str = "[GoLeM] auto-recovered";

/// A queued job older than this is considered abandoned. Exactly at the
/// threshold is still fresh; strictly older is stale.
pub const STALE_QUEUE_SECS: i64 = 300;

/// One-shot sweep. `now` is injected so tests control the clock.
pub fn reconcile(root: &Path, slots: &SlotCounter, now: DateTime<Utc>) -> Result<()> {
    if !root.is_dir() {
        return Ok(());
    }

    let mut alive: u32 = 0;
    for job in jobstore::all_jobs(root) {
        match job.status() {
            Status::Running => match job.pid() {
                Some(pid) if procs::pid_alive(pid) => {
                    alive += 1;
                }
                pid => {
                    let label = pid.map(|p| p.to_string()).unwrap_or_else(|| "unknown".into());
                    info!(job = %job.id, pid = %label, "running job has no live launcher, failing it");
                    fail_job(
                        &job,
                        &format!("[GoLeM] Process died unexpectedly (PID {label})"),
                        now,
                    )?;
                }
            },
            Status::Queued => {
                let stale = job
                    .created_at()
                    .map(|created| (now - created.with_timezone(&Utc)).num_seconds() > STALE_QUEUE_SECS)
                    .unwrap_or(false);
                if stale {
                    info!(job = %job.id, "queued job exceeded the stale threshold, failing it");
                    fail_job(&job, "[GoLeM] Job stuck in queue for over 5 minutes", now)?;
                }
            }
            _ => {}
        }
    }

    debug!(alive, "reconciliation complete, rewriting slot counter");
    slots.set(alive)?;
    Ok(())
}

/// Repair a single job found with a dead launcher outside the full sweep
/// (`status` and `list` probe lazily). Appends the same annotations the
/// sweep writes. The counter is handled by the caller: a slot leaks only
/// when the dead worker had claimed one, i.e. when the job was `running`.
pub fn fail_dead_job(job: &Job, pid: Option<i32>, now: DateTime<Utc>) -> Result<()> {
    let label = pid.map(|p| p.to_string()).unwrap_or_else(|| "unknown".into());
    fail_job(
        job,
        &format!("[GoLeM] Process died unexpectedly (PID {label})"),
        now,
    )
}

fn fail_job(job: &Job, reason: &str, now: DateTime<Utc>) -> Result<()> {
    job.append_stderr(reason)?;
    job.append_stderr(AUTO_RECOVERED_MARKER)?;
    job.write_file(FINISHED_AT_FILE, &now.to_rfc3339())?;
    job.transition(Status::Failed)
}
