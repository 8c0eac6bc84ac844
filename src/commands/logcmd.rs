//! Implementation of the `log` sub-command: print a job's change log.

use anyhow::Result;
use std::path::Path;

use crate::jobstore::{self, CHANGELOG_FILE, Job};

pub fn execute(job_id: &str, root: &Path) -> Result<()> {
    let cwd = std::env::current_dir()?;
    let project = jobstore::project_id(&cwd);
    let job = Job::find(root, &project, job_id)?;
    match job.read_file(CHANGELOG_FILE) {
        Some(changelog) => {
            let trimmed = changelog.trim_end();
            println!("{trimmed}");
        }
        None => println!("(no changelog)"),
    }
    Ok(())
}
