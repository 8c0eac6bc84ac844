//! Implementation of the `status` sub-command.

use anyhow::Result;
use std::path::Path;

use crate::jobstore::{self, Job};
use crate::slots::SlotCounter;

/// Execute `status`: locate the job, probe it if live, print its status.
pub fn execute(job_id: &str, root: &Path, slots: &SlotCounter) -> Result<()> {
    let cwd = std::env::current_dir()?;
    let project = jobstore::project_id(&cwd);
    let job = Job::find(root, &project, job_id)?;
    let status = super::probe(&job, slots)?;
    println!("{}", status.as_str());
    Ok(())
}
