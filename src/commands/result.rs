//! Implementation of the `result` sub-command.
//!
//! Prints a finished job's extracted result and removes the directory; the
//! job id is single-use. Still-live jobs are refused.

use anyhow::Result;
use std::path::Path;

use crate::errors::GlmError;
use crate::jobstore::{self, Job, STDERR_FILE, STDOUT_FILE, Status};
use crate::slots::SlotCounter;

pub fn execute(job_id: &str, root: &Path, slots: &SlotCounter) -> Result<()> {
    let cwd = std::env::current_dir()?;
    let project = jobstore::project_id(&cwd);
    let job = Job::find(root, &project, job_id)?;

    let status = super::probe(&job, slots)?;
    if !status.is_terminal() {
        return Err(GlmError::validation(format!(
            "job {} is still {}",
            job.id,
            status.as_str()
        ))
        .with_suggestion("Wait for it to finish, or stop it with 'glm kill'")
        .into());
    }

    // For failures the captured stderr is the interesting part; print it as
    // a prelude before whatever result text exists.
    if matches!(status, Status::Failed | Status::Timeout) {
        if let Some(err_text) = job.read_file(STDERR_FILE) {
            let trimmed = err_text.trim_end();
            if !trimmed.is_empty() {
                eprintln!("{trimmed}");
            }
        }
    }

    let stdout = job.read_file(STDOUT_FILE).unwrap_or_default();
    if !stdout.is_empty() {
        print!("{stdout}");
        if !stdout.ends_with('\n') {
            println!();
        }
    }

    job.delete()?;
    Ok(())
}
