//! Subprocess driver: turns one job request into one child execution and a
//! set of files in the job directory.
//!
//! The child runs in its own process group so that timeout or kill
//! termination fans out to its descendants. Its stdout/stderr are captured
//! in memory and published once after exit, so readers never observe
//! partial content.

use anyhow::{Context, Result};
use chrono::Local;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::atomicfile;
use crate::config::Config;
use crate::errors::GlmError;
use crate::extract::{self, NO_CHANGES};
use crate::jobstore::{
    CHANGELOG_FILE, CHILD_PID_FILE, EXIT_CODE_FILE, FINISHED_AT_FILE, Job, MODEL_FILE,
    PERMISSION_MODE_FILE, PROMPT_FILE, RAW_OUTPUT_FILE, STARTED_AT_FILE, STDERR_FILE, STDOUT_FILE,
    Status, WORKDIR_FILE,
};
use crate::procs;
use crate::slots::SlotCounter;

/// The external child binary, located on PATH.
pub const CHILD_BIN: &str = "claude";

/// Conventional exit code for a supervisor-enforced timeout.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Fixed system prompt appended to every invocation; shapes the child's
/// final response so the result field stays usable as plain text.
pub const SYSTEM_PROMPT: &str = "You are running unattended as a subagent. \
Complete the task without asking questions. Finish with a concise plain-text \
summary of what was done; do not wrap the summary in markdown fences.";

/// Stderr keywords that classify a non-zero exit as a permission failure.
const PERMISSION_KEYWORDS: [&str; 4] = ["permission", "not allowed", "denied", "unauthorized"];

/// How often the deadline loop polls the child.
const WAIT_POLL: Duration = Duration::from_millis(100);

/// One job's invocation parameters, bounded by parsed configuration.
#[derive(Debug)]
pub struct JobRequest<'a> {
    pub prompt: &'a str,
    pub workdir: PathBuf,
    /// Seconds; 0 falls back to the configured default.
    pub timeout_secs: u64,
    pub permission_mode: &'a str,
    pub model_override: Option<&'a str>,
}

impl<'a> JobRequest<'a> {
    pub fn effective_timeout(&self, cfg: &Config) -> u64 {
        if self.timeout_secs == 0 {
            cfg.timeout_seconds
        } else {
            self.timeout_secs
        }
    }
}

/// Validate the request without touching the job. Used by `start` to surface
/// errors synchronously before detaching, and by the driver itself.
pub fn preflight(req: &JobRequest) -> Result<()> {
    if !req.workdir.is_dir() {
        return Err(GlmError::user(format!(
            "working directory does not exist: {}",
            req.workdir.display()
        ))
        .with_suggestion("Pass --dir with an existing path")
        .into());
    }
    if which::which(CHILD_BIN).is_err() {
        return Err(GlmError::dependency(format!("{CHILD_BIN} not found on PATH"))
            .with_suggestion("Install Claude Code and make sure it is on PATH")
            .into());
    }
    Ok(())
}

/// Run one job to a terminal state.
///
/// Sequence: preflight → parameter files → wait for a slot → `running` →
/// spawn → deadline wait → publish outputs → terminal status → release the
/// slot. On a pre-slot failure the job is left `queued` for the caller (or
/// the stale-queue rule) to handle.
pub fn execute(job: &Job, req: &JobRequest, cfg: &Config, slots: &SlotCounter) -> Result<Status> {
    preflight(req)?;

    job.write_file(PROMPT_FILE, req.prompt)?;
    job.write_file(WORKDIR_FILE, &req.workdir.to_string_lossy())?;
    job.write_file(PERMISSION_MODE_FILE, req.permission_mode)?;
    job.write_file(MODEL_FILE, &cfg.model_line(req.model_override))?;

    slots.wait_for_slot()?;
    job.write_file(STARTED_AT_FILE, &Local::now().to_rfc3339())?;
    if let Err(e) = job.transition(Status::Running) {
        // The claim is ours but the job moved underneath us (e.g. a
        // concurrent kill); hand the slot back before bailing.
        slots.release()?;
        return Err(e);
    }

    let timeout = Duration::from_secs(req.effective_timeout(cfg));
    let outcome = match spawn_and_wait(job, req, cfg, timeout) {
        Ok(outcome) => outcome,
        Err(e) => {
            job.append_stderr(&format!("[GoLeM] Failed to launch child: {e:#}"))?;
            job.write_file(FINISHED_AT_FILE, &Local::now().to_rfc3339())?;
            job.transition(Status::Failed)?;
            slots.release()?;
            return Err(e);
        }
    };

    atomicfile::write(&job.path(RAW_OUTPUT_FILE), &outcome.stdout)?;
    atomicfile::write(&job.path(STDERR_FILE), &outcome.stderr)?;
    job.write_file(FINISHED_AT_FILE, &Local::now().to_rfc3339())?;

    let raw = String::from_utf8_lossy(&outcome.stdout);
    let stderr_text = String::from_utf8_lossy(&outcome.stderr);
    let extracted = extract::extract(&raw);
    job.write_file(STDOUT_FILE, &extracted.result)?;
    job.write_file(CHANGELOG_FILE, &extracted.changelog)?;

    if outcome.exit_code != 0 {
        job.write_file(EXIT_CODE_FILE, &outcome.exit_code.to_string())?;
    }

    let status = terminal_status_for_exit(outcome.exit_code, &stderr_text);
    job.transition(status)?;
    slots.release()?;

    info!(job = %job.id, exit_code = outcome.exit_code, status = status.as_str(), "child finished");
    if extracted.changelog != NO_CHANGES {
        eprintln!("{}", extracted.changelog);
    }
    Ok(status)
}

/// Map a child exit code plus its stderr to a terminal status. Stderr is the
/// only machine-consumable signal separating permission walls from general
/// faults.
pub fn terminal_status_for_exit(exit_code: i32, stderr: &str) -> Status {
    match exit_code {
        0 => Status::Done,
        TIMEOUT_EXIT_CODE => Status::Timeout,
        _ => {
            let lower = stderr.to_lowercase();
            if PERMISSION_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
                Status::PermissionError
            } else {
                Status::Failed
            }
        }
    }
}

struct ChildOutcome {
    exit_code: i32,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

fn spawn_and_wait(
    job: &Job,
    req: &JobRequest,
    cfg: &Config,
    timeout: Duration,
) -> Result<ChildOutcome> {
    let mut cmd = Command::new(CHILD_BIN);
    build_args(&mut cmd, req);
    build_env(&mut cmd, cfg, req.model_override);
    cmd.current_dir(&req.workdir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    // Put the child in its own process group so that termination fans out
    // to whatever it spawns.
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        // SAFETY: setsid is async-signal-safe and runs before exec.
        unsafe {
            cmd.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }
    }

    let mut child = cmd.spawn().context("spawn child")?;
    let child_pid = child.id() as i32;
    job.write_file(CHILD_PID_FILE, &child_pid.to_string())?;
    debug!(job = %job.id, pid = child_pid, "child spawned");

    let mut child_stdout = child.stdout.take().context("child stdout not piped")?;
    let mut child_stderr = child.stderr.take().context("child stderr not piped")?;
    let t_stdout = std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = child_stdout.read_to_end(&mut buf);
        buf
    });
    let t_stderr = std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = child_stderr.read_to_end(&mut buf);
        buf
    });

    let deadline = Instant::now() + timeout;
    let mut timed_out = false;
    let exit_status = loop {
        if let Some(status) = child.try_wait().context("poll child")? {
            break status;
        }
        if Instant::now() >= deadline {
            warn!(job = %job.id, pid = child_pid, "timeout reached, terminating process group");
            timed_out = true;
            procs::terminate_group(child_pid);
            break child.wait().context("wait for terminated child")?;
        }
        std::thread::sleep(WAIT_POLL);
    };

    let stdout = t_stdout.join().unwrap_or_default();
    let stderr = t_stderr.join().unwrap_or_default();

    let exit_code = if timed_out {
        // Whatever signal the OS reports, the caller sees the conventional
        // timeout code.
        TIMEOUT_EXIT_CODE
    } else {
        exit_status.code().unwrap_or_else(|| {
            #[cfg(unix)]
            {
                use std::os::unix::process::ExitStatusExt;
                exit_status.signal().map(|s| 128 + s).unwrap_or(1)
            }
            #[cfg(not(unix))]
            {
                1
            }
        })
    };

    Ok(ChildOutcome {
        exit_code,
        stdout,
        stderr,
    })
}

/// Child argument order is positional and fixed; the user prompt is last.
fn build_args(cmd: &mut Command, req: &JobRequest) {
    cmd.arg("-p")
        .arg("--no-session-persistence")
        .arg("--model")
        .arg("sonnet")
        .arg("--output-format")
        .arg("json")
        .arg("--append-system-prompt")
        .arg(SYSTEM_PROMPT);
    if req.permission_mode == "bypassPermissions" {
        cmd.arg("--dangerously-skip-permissions");
    } else {
        cmd.arg("--permission-mode").arg(req.permission_mode);
    }
    cmd.arg(req.prompt);
}

/// Scrub the nesting-detection variables (their presence makes the child
/// refuse to run) and inject the API-routing environment.
fn build_env(cmd: &mut Command, cfg: &Config, model_override: Option<&str>) {
    let (opus, sonnet, haiku) = cfg.models(model_override);
    cmd.env_remove("CLAUDECODE")
        .env_remove("CLAUDE_CODE_ENTRYPOINT")
        .env("ANTHROPIC_AUTH_TOKEN", &cfg.auth_token)
        .env("ANTHROPIC_BASE_URL", &cfg.base_url)
        .env("ANTHROPIC_DEFAULT_OPUS_MODEL", opus)
        .env("ANTHROPIC_DEFAULT_SONNET_MODEL", sonnet)
        .env("ANTHROPIC_DEFAULT_HAIKU_MODEL", haiku)
        .env("API_TIMEOUT_MS", cfg.api_timeout_ms.to_string());
}
