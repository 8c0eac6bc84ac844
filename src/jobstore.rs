//! Job directories, identifiers, and the status state machine.
//!
//! Layout under the jobs root:
//!
//! ```text
//! <root>/<project-id>/<job-id>/   current layout
//! <root>/<job-id>/                legacy flat layout (read-only)
//! ```
//!
//! A job's state is a directory of small files; the `status` file is the
//! only one with transition rules. Lookup order for `find`:
//!   1. the current project's directory
//!   2. the root itself (legacy flat layout)
//!   3. every sibling project directory

use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, Local};
use rand::Rng;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::atomicfile;
use crate::errors::GlmError;

pub const STATUS_FILE: &str = "status";
pub const PID_FILE: &str = "pid.txt";
pub const CHILD_PID_FILE: &str = "child_pid.txt";
pub const CREATED_AT_FILE: &str = "created_at.txt";
pub const STARTED_AT_FILE: &str = "started_at.txt";
pub const FINISHED_AT_FILE: &str = "finished_at.txt";
pub const PROMPT_FILE: &str = "prompt.txt";
pub const WORKDIR_FILE: &str = "workdir.txt";
pub const PERMISSION_MODE_FILE: &str = "permission_mode.txt";
pub const MODEL_FILE: &str = "model.txt";
pub const RAW_OUTPUT_FILE: &str = "raw.json";
pub const STDOUT_FILE: &str = "stdout.txt";
pub const CHANGELOG_FILE: &str = "changelog.txt";
pub const STDERR_FILE: &str = "stderr.txt";
pub const EXIT_CODE_FILE: &str = "exit_code.txt";

/// Job status. `Queued` and `Running` are live; everything else is terminal
/// and immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Queued,
    Running,
    Done,
    Failed,
    Timeout,
    Killed,
    PermissionError,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Queued => "queued",
            Status::Running => "running",
            Status::Done => "done",
            Status::Failed => "failed",
            Status::Timeout => "timeout",
            Status::Killed => "killed",
            Status::PermissionError => "permission_error",
        }
    }

    pub fn parse(s: &str) -> Option<Status> {
        match s {
            "queued" => Some(Status::Queued),
            "running" => Some(Status::Running),
            "done" => Some(Status::Done),
            "failed" => Some(Status::Failed),
            "timeout" => Some(Status::Timeout),
            "killed" => Some(Status::Killed),
            "permission_error" => Some(Status::PermissionError),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, Status::Queued | Status::Running)
    }

    /// The transition table. Transitions are data: `queued` advances to
    /// `running` (or is failed by recovery), `running` reaches any terminal
    /// state, terminal states never move again.
    pub fn can_transition(self, next: Status) -> bool {
        matches!(
            (self, next),
            (Status::Queued, Status::Running)
                | (Status::Queued, Status::Failed)
                | (Status::Running, Status::Done)
                | (Status::Running, Status::Failed)
                | (Status::Running, Status::Timeout)
                | (Status::Running, Status::Killed)
                | (Status::Running, Status::PermissionError)
        )
    }
}

/// Derive the project identifier for a working directory: its basename plus
/// a CRC-32 of the full path, in decimal, joined by `-`. Collision-resistant
/// without any central registry.
pub fn project_id(workdir: &Path) -> String {
    let base = workdir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "root".to_string());
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(workdir.to_string_lossy().as_bytes());
    format!("{base}-{}", hasher.finalize())
}

/// Mint a job identifier: `job-YYYYMMDD-HHMMSS-XXXXXXXX`. The suffix is
/// 8 lowercase hex chars from the thread-local CSPRNG; uniqueness within a
/// second comes from the suffix, not the clock.
pub fn generate_job_id(now: DateTime<Local>) -> String {
    let suffix: u32 = rand::rng().random();
    format!("job-{}-{suffix:08x}", now.format("%Y%m%d-%H%M%S"))
}

/// Resolve the jobs root directory.
///
/// Resolution order:
///   1. `GLM_ROOT` environment variable
///   2. `$XDG_DATA_HOME/glm/subagents`
///   3. `~/.local/share/glm/subagents`
pub fn resolve_root() -> PathBuf {
    if let Ok(root) = std::env::var("GLM_ROOT") {
        if !root.is_empty() {
            return PathBuf::from(root);
        }
    }

    if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        if !xdg.is_empty() {
            return PathBuf::from(xdg).join("glm").join("subagents");
        }
    }

    if let Some(base_dirs) = directories::BaseDirs::new() {
        return base_dirs
            .home_dir()
            .join(".local")
            .join("share")
            .join("glm")
            .join("subagents");
    }

    PathBuf::from("~/.local/share/glm/subagents")
}

/// Handle to one job's directory.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub dir: PathBuf,
}

impl Job {
    /// Create a fresh `queued` job under the given project.
    pub fn create(root: &Path, project: &str) -> Result<Job> {
        let now = Local::now();
        let id = generate_job_id(now);
        let dir = root.join(project).join(&id);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("create job dir {}", dir.display()))?;
        let job = Job { id, dir };
        job.write_file(CREATED_AT_FILE, &now.to_rfc3339())?;
        job.write_file(STATUS_FILE, Status::Queued.as_str())?;
        Ok(job)
    }

    /// Wrap an existing job directory. The directory name is the job id.
    pub fn attach(dir: PathBuf) -> Job {
        let id = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Job { id, dir }
    }

    /// Three-stage lookup: current project, legacy flat root, then every
    /// sibling project. New jobs are only ever written at stage one.
    pub fn find(root: &Path, project: &str, job_id: &str) -> Result<Job> {
        let in_project = root.join(project).join(job_id);
        if in_project.is_dir() {
            return Ok(Job::attach(in_project));
        }

        let flat = root.join(job_id);
        if flat.is_dir() {
            return Ok(Job::attach(flat));
        }

        if let Ok(entries) = std::fs::read_dir(root) {
            for entry in entries.flatten() {
                let path = entry.path();
                if !path.is_dir() {
                    continue;
                }
                let candidate = path.join(job_id);
                if candidate.is_dir() {
                    return Ok(Job::attach(candidate));
                }
            }
        }

        Err(GlmError::not_found(format!("no such job: {job_id}"))
            .with_suggestion("Run 'glm list' to see known jobs")
            .into())
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Current status. An absent or unrecognized status file reads as
    /// `failed` (and is logged), never as an error.
    pub fn status(&self) -> Status {
        match std::fs::read_to_string(self.path(STATUS_FILE)) {
            Ok(raw) => {
                let trimmed = raw.trim();
                Status::parse(trimmed).unwrap_or_else(|| {
                    warn!(job = %self.id, status = trimmed, "unrecognized status, treating as failed");
                    Status::Failed
                })
            }
            Err(_) => {
                warn!(job = %self.id, "missing status file, treating as failed");
                Status::Failed
            }
        }
    }

    /// Validate against the transition table and publish the new status
    /// atomically. Invalid transitions are rejected with a typed error.
    pub fn transition(&self, next: Status) -> Result<()> {
        let current = self.status();
        if !current.can_transition(next) {
            return Err(GlmError::validation(format!(
                "invalid status transition for {}: {} -> {}",
                self.id,
                current.as_str(),
                next.as_str()
            ))
            .into());
        }
        self.write_file(STATUS_FILE, next.as_str())
    }

    /// Recursively remove the job directory. The store never kills
    /// processes; callers must terminate a running job first.
    pub fn delete(&self) -> Result<()> {
        std::fs::remove_dir_all(&self.dir)
            .with_context(|| format!("remove job dir {}", self.dir.display()))
    }

    pub fn write_file(&self, name: &str, contents: &str) -> Result<()> {
        atomicfile::write_str(&self.path(name), contents)
    }

    pub fn read_file(&self, name: &str) -> Option<String> {
        std::fs::read_to_string(self.path(name)).ok()
    }

    /// Append a line to `stderr.txt`, publishing the whole file atomically.
    pub fn append_stderr(&self, line: &str) -> Result<()> {
        let mut contents = self.read_file(STDERR_FILE).unwrap_or_default();
        if !contents.is_empty() && !contents.ends_with('\n') {
            contents.push('\n');
        }
        contents.push_str(line);
        contents.push('\n');
        self.write_file(STDERR_FILE, &contents)
    }

    pub fn write_pid(&self, pid: u32) -> Result<()> {
        self.write_file(PID_FILE, &pid.to_string())
    }

    /// Launcher PID, when recorded.
    pub fn pid(&self) -> Option<i32> {
        self.read_file(PID_FILE)?.trim().parse().ok()
    }

    /// Child PID, when recorded (used for group termination).
    pub fn child_pid(&self) -> Option<i32> {
        self.read_file(CHILD_PID_FILE)?.trim().parse().ok()
    }

    pub fn created_at(&self) -> Option<DateTime<FixedOffset>> {
        let raw = self.read_file(CREATED_AT_FILE)?;
        DateTime::parse_from_rfc3339(raw.trim()).ok()
    }

    pub fn started_at(&self) -> Option<DateTime<FixedOffset>> {
        let raw = self.read_file(STARTED_AT_FILE)?;
        DateTime::parse_from_rfc3339(raw.trim()).ok()
    }
}

/// Enumerate every job directory under the root: jobs inside project
/// directories plus legacy flat jobs directly under the root. Hidden and
/// reserved names (the counter, the lock, temp files) are skipped.
pub fn all_jobs(root: &Path) -> Vec<Job> {
    let mut jobs = Vec::new();
    let Ok(entries) = std::fs::read_dir(root) else {
        return jobs;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') || !path.is_dir() {
            continue;
        }
        if path.join(STATUS_FILE).is_file() {
            // Legacy flat job directly under the root.
            jobs.push(Job::attach(path));
            continue;
        }
        // Project directory: its children are jobs.
        let Ok(children) = std::fs::read_dir(&path) else {
            continue;
        };
        for child in children.flatten() {
            let child_path = child.path();
            let child_name = child.file_name().to_string_lossy().into_owned();
            if child_name.starts_with('.') || !child_path.is_dir() {
                continue;
            }
            jobs.push(Job::attach(child_path));
        }
    }
    jobs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_id_is_basename_dash_crc32() {
        let path = Path::new("/home/user/myproject");
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(b"/home/user/myproject");
        let expected = format!("myproject-{}", hasher.finalize());
        assert_eq!(project_id(path), expected);
    }

    #[test]
    fn project_id_differs_for_same_basename_different_path() {
        let a = project_id(Path::new("/home/alice/app"));
        let b = project_id(Path::new("/home/bob/app"));
        assert_ne!(a, b);
        assert!(a.starts_with("app-"));
        assert!(b.starts_with("app-"));
    }

    #[test]
    fn job_id_has_expected_shape() {
        let id = generate_job_id(Local::now());
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0], "job");
        assert_eq!(parts[1].len(), 8);
        assert_eq!(parts[2].len(), 6);
        assert_eq!(parts[3].len(), 8);
        assert!(
            parts[3]
                .chars()
                .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
        );
    }

    #[test]
    fn job_ids_in_same_second_differ_only_in_suffix() {
        let now = Local::now();
        let a = generate_job_id(now);
        let b = generate_job_id(now);
        let head = |s: &str| s.rsplitn(2, '-').nth(1).map(str::to_string);
        assert_eq!(head(&a), head(&b));
        assert_ne!(a, b);
    }

    #[test]
    fn create_writes_queued_status_and_created_at() {
        let dir = tempfile::tempdir().unwrap();
        let job = Job::create(dir.path(), "proj-1").unwrap();
        assert_eq!(job.status(), Status::Queued);
        assert!(job.created_at().is_some());
        assert!(job.dir.starts_with(dir.path().join("proj-1")));
    }

    #[test]
    fn valid_transitions_are_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let job = Job::create(dir.path(), "proj-1").unwrap();
        job.transition(Status::Running).unwrap();
        job.transition(Status::Done).unwrap();
        assert_eq!(job.status(), Status::Done);
    }

    #[test]
    fn terminal_status_is_immutable() {
        let dir = tempfile::tempdir().unwrap();
        let job = Job::create(dir.path(), "proj-1").unwrap();
        job.transition(Status::Running).unwrap();
        job.transition(Status::Killed).unwrap();
        assert!(job.transition(Status::Running).is_err());
        assert!(job.transition(Status::Failed).is_err());
        assert_eq!(job.status(), Status::Killed);
    }

    #[test]
    fn queued_cannot_jump_to_done() {
        let dir = tempfile::tempdir().unwrap();
        let job = Job::create(dir.path(), "proj-1").unwrap();
        assert!(job.transition(Status::Done).is_err());
        assert_eq!(job.status(), Status::Queued);
    }

    #[test]
    fn queued_may_fail_via_recovery() {
        let dir = tempfile::tempdir().unwrap();
        let job = Job::create(dir.path(), "proj-1").unwrap();
        job.transition(Status::Failed).unwrap();
        assert_eq!(job.status(), Status::Failed);
    }

    #[test]
    fn missing_status_reads_as_failed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proj").join("job-x");
        std::fs::create_dir_all(&path).unwrap();
        let job = Job::attach(path);
        assert_eq!(job.status(), Status::Failed);
    }

    #[test]
    fn unrecognized_status_reads_as_failed() {
        let dir = tempfile::tempdir().unwrap();
        let job = Job::create(dir.path(), "proj").unwrap();
        std::fs::write(job.path(STATUS_FILE), "sparkling").unwrap();
        assert_eq!(job.status(), Status::Failed);
    }

    #[test]
    fn find_prefers_current_project() {
        let dir = tempfile::tempdir().unwrap();
        let job = Job::create(dir.path(), "proj-a").unwrap();
        let found = Job::find(dir.path(), "proj-a", &job.id).unwrap();
        assert_eq!(found.dir, job.dir);
    }

    #[test]
    fn find_falls_back_to_legacy_flat_layout() {
        let dir = tempfile::tempdir().unwrap();
        let flat = dir.path().join("job-20240101-000000-deadbeef");
        std::fs::create_dir_all(&flat).unwrap();
        std::fs::write(flat.join(STATUS_FILE), "done").unwrap();
        let found = Job::find(dir.path(), "proj-a", "job-20240101-000000-deadbeef").unwrap();
        assert_eq!(found.dir, flat);
    }

    #[test]
    fn find_searches_sibling_projects() {
        let dir = tempfile::tempdir().unwrap();
        let job = Job::create(dir.path(), "proj-b").unwrap();
        let found = Job::find(dir.path(), "proj-a", &job.id).unwrap();
        assert_eq!(found.dir, job.dir);
    }

    #[test]
    fn find_unknown_job_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = Job::find(dir.path(), "proj-a", "job-nope").unwrap_err();
        let glm = err.downcast_ref::<GlmError>().unwrap();
        assert_eq!(glm.category, crate::errors::Category::NotFound);
    }

    #[test]
    fn append_stderr_accumulates_lines() {
        let dir = tempfile::tempdir().unwrap();
        let job = Job::create(dir.path(), "proj").unwrap();
        job.append_stderr("first").unwrap();
        job.append_stderr("second").unwrap();
        assert_eq!(job.read_file(STDERR_FILE).unwrap(), "first\nsecond\n");
    }

    #[test]
    fn all_jobs_sees_both_layouts_and_skips_reserved_names() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(crate::slots::COUNTER_FILE), "0").unwrap();
        std::fs::write(dir.path().join(crate::slots::LOCK_FILE), "").unwrap();
        let nested = Job::create(dir.path(), "proj-a").unwrap();
        let flat = dir.path().join("job-20240101-000000-cafebabe");
        std::fs::create_dir_all(&flat).unwrap();
        std::fs::write(flat.join(STATUS_FILE), "done").unwrap();

        let mut ids: Vec<String> = all_jobs(dir.path()).into_iter().map(|j| j.id).collect();
        ids.sort();
        let mut expected = vec![nested.id.clone(), "job-20240101-000000-cafebabe".to_string()];
        expected.sort();
        assert_eq!(ids, expected);
    }

    #[test]
    fn delete_removes_directory_recursively() {
        let dir = tempfile::tempdir().unwrap();
        let job = Job::create(dir.path(), "proj").unwrap();
        job.write_file(PROMPT_FILE, "hello").unwrap();
        job.delete().unwrap();
        assert!(!job.dir.exists());
    }
}
