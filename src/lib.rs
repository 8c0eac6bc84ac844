//! glm — Claude Code subagent supervisor, core library.
//!
//! Provides the job lifecycle and concurrency core (slot counter, job
//! store, reconciler, subprocess driver, output extraction, error
//! taxonomy) plus the thin adapters behind the eight sub-commands:
//! run, start, status, result, log, list, kill, clean.

pub mod atomicfile;
pub mod commands;
pub mod config;
pub mod driver;
pub mod errors;
pub mod extract;
pub mod jobstore;
pub mod procs;
pub mod reconcile;
pub mod slots;
