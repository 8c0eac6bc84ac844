//! Thin command adapters over the lifecycle core.

pub mod clean;
pub mod kill;
pub mod list;
pub mod logcmd;
pub mod result;
pub mod run;
pub mod start;
pub mod status;
pub mod worker;

use anyhow::Result;
use chrono::Utc;

use crate::jobstore::{Job, Status};
use crate::procs;
use crate::reconcile;
use crate::slots::SlotCounter;

/// Single-job variant of reconciliation, used by `status`, `result`, and
/// `list`: a live job whose launcher is gone is failed on the spot. Unlike
/// the full sweep this never applies the stale-queue rule, and it releases
/// the slot a dead `running` job leaked (the startup sweep counted that
/// launcher as alive, so its claim is still in the counter).
pub(crate) fn probe(job: &Job, slots: &SlotCounter) -> Result<Status> {
    let status = job.status();
    match status {
        Status::Running => {
            let pid = job.pid();
            if pid.map(procs::pid_alive).unwrap_or(false) {
                return Ok(status);
            }
            reconcile::fail_dead_job(job, pid, Utc::now())?;
            slots.release()?;
            Ok(Status::Failed)
        }
        Status::Queued => {
            // Queued jobs hold no slot; only a recorded-and-dead launcher
            // counts as abandonment here.
            if let Some(pid) = job.pid() {
                if !procs::pid_alive(pid) {
                    reconcile::fail_dead_job(job, Some(pid), Utc::now())?;
                    return Ok(Status::Failed);
                }
            }
            Ok(status)
        }
        _ => Ok(status),
    }
}
