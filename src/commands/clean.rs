//! Implementation of the `clean` sub-command.
//!
//! Three modes:
//!   * default      — remove every job in a terminal status
//!   * `--days N`   — remove any job directory older than N days by mtime
//!   * `--stale`    — remove only auto-recovered jobs (those carrying the
//!                    reconciler's marker in their stderr)

use anyhow::Result;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::jobstore::{self, Job, STDERR_FILE};
use crate::reconcile::AUTO_RECOVERED_MARKER;

/// Options for the `clean` sub-command.
#[derive(Debug, Default)]
pub struct CleanOpts {
    pub days: Option<u64>,
    pub stale: bool,
}

fn older_than(job: &Job, days: u64) -> bool {
    let Ok(meta) = std::fs::metadata(&job.dir) else {
        return false;
    };
    let Ok(modified) = meta.modified() else {
        return false;
    };
    match modified.elapsed() {
        Ok(age) => age > Duration::from_secs(days * 86_400),
        Err(_) => false,
    }
}

pub fn execute(opts: CleanOpts, root: &Path) -> Result<()> {
    let mut removed = 0usize;
    for job in jobstore::all_jobs(root) {
        let matches = if opts.stale {
            job.read_file(STDERR_FILE)
                .map(|s| s.contains(AUTO_RECOVERED_MARKER))
                .unwrap_or(false)
        } else if let Some(days) = opts.days {
            older_than(&job, days)
        } else {
            job.status().is_terminal()
        };
        if matches {
            debug!(job = %job.id, "removing job directory");
            job.delete()?;
            removed += 1;
        }
    }
    println!("removed {removed} job(s)");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobstore::Status;

    #[test]
    fn default_mode_removes_only_terminal_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let done = Job::create(dir.path(), "proj").unwrap();
        done.transition(Status::Running).unwrap();
        done.transition(Status::Done).unwrap();
        let queued = Job::create(dir.path(), "proj").unwrap();
        let running = Job::create(dir.path(), "proj").unwrap();
        running.transition(Status::Running).unwrap();

        execute(CleanOpts::default(), dir.path()).unwrap();

        assert!(!done.dir.exists());
        assert!(queued.dir.exists());
        assert!(running.dir.exists());
    }

    #[test]
    fn stale_mode_removes_only_auto_recovered_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let recovered = Job::create(dir.path(), "proj").unwrap();
        recovered.transition(Status::Failed).unwrap();
        recovered.append_stderr("[GoLeM] Process died unexpectedly (PID 4)").unwrap();
        recovered.append_stderr(AUTO_RECOVERED_MARKER).unwrap();
        let user_failed = Job::create(dir.path(), "proj").unwrap();
        user_failed.transition(Status::Failed).unwrap();
        user_failed.append_stderr("boom").unwrap();

        execute(
            CleanOpts {
                stale: true,
                ..Default::default()
            },
            dir.path(),
        )
        .unwrap();

        assert!(!recovered.dir.exists());
        assert!(user_failed.dir.exists());
    }

    #[test]
    fn days_mode_keeps_young_directories() {
        let dir = tempfile::tempdir().unwrap();
        let young = Job::create(dir.path(), "proj").unwrap();
        execute(
            CleanOpts {
                days: Some(1),
                ..Default::default()
            },
            dir.path(),
        )
        .unwrap();
        assert!(young.dir.exists());
    }
}
