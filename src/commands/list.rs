//! Implementation of the `list` sub-command.
//!
//! Enumerates every job under the root (all projects plus the legacy flat
//! layer), lazily repairing live entries whose launcher died. Unreadable
//! directories surface as `unknown`, never as a failure of the listing.

use anyhow::Result;
use std::path::Path;

use crate::jobstore::{self, STARTED_AT_FILE, STATUS_FILE};
use crate::slots::SlotCounter;

struct Row {
    id: String,
    status: String,
    started: String,
}

pub fn execute(root: &Path, slots: &SlotCounter) -> Result<()> {
    let mut rows = Vec::new();
    for job in jobstore::all_jobs(root) {
        // A directory without a readable status file still gets a row; the
        // probe path would log it as failed, so read the raw file first.
        let status = match job.read_file(STATUS_FILE) {
            Some(_) => super::probe(&job, slots)?.as_str().to_string(),
            None => "unknown".to_string(),
        };
        let started = job
            .read_file(STARTED_AT_FILE)
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|| "-".to_string());
        rows.push(Row {
            id: job.id.clone(),
            status,
            started,
        });
    }

    // Newest first; jobs that never started sort last.
    rows.sort_by(|a, b| {
        let key = |r: &Row| {
            if r.started == "-" {
                String::new()
            } else {
                r.started.clone()
            }
        };
        key(b).cmp(&key(a)).then_with(|| b.id.cmp(&a.id))
    });

    println!("{:<42} {:<18} {}", "JOB ID", "STATUS", "STARTED");
    for row in &rows {
        println!("{:<42} {:<18} {}", row.id, row.status, row.started);
    }
    Ok(())
}
