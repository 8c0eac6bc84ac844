//! The hidden `_worker` sub-command: the detached pipeline behind `start`.
//!
//! Runs wait-for-slot → execute → terminal transition for one job. Stdio is
//! closed by the time this runs; failures land in the job directory, and a
//! job that never reaches `running` is reaped by the stale-queue rule.

use anyhow::Result;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::driver::{self, JobRequest};
use crate::errors::GlmError;
use crate::jobstore::{Job, PROMPT_FILE};
use crate::slots::SlotCounter;

/// Options for the `_worker` sub-command.
#[derive(Debug)]
pub struct WorkerOpts<'a> {
    pub job_id: &'a str,
    pub project: &'a str,
    pub dir: &'a str,
    pub timeout: u64,
    pub permission_mode: &'a str,
    pub model: Option<&'a str>,
}

pub fn execute(opts: WorkerOpts, cfg: &Config, root: &Path, slots: &SlotCounter) -> Result<()> {
    let job = Job::find(root, opts.project, opts.job_id)?;
    let prompt = job
        .read_file(PROMPT_FILE)
        .ok_or_else(|| GlmError::internal(format!("job {} has no recorded prompt", job.id)))?;

    let req = JobRequest {
        prompt: &prompt,
        workdir: PathBuf::from(opts.dir),
        timeout_secs: opts.timeout,
        permission_mode: opts.permission_mode,
        model_override: opts.model,
    };

    match driver::execute(&job, &req, cfg, slots) {
        Ok(_) => Ok(()),
        Err(e) => {
            let _ = job.append_stderr(&format!("[GoLeM] {e:#}"));
            Err(e)
        }
    }
}
