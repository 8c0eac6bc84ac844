//! The cross-process slot counter bounding concurrent children.
//!
//! The counter is a single decimal integer in `.running_count` under the jobs
//! root. Every read-modify-write happens while holding an exclusive advisory
//! lock on the sibling `.counter.lock` file, so independent supervisor
//! processes launched from a shell loop contend correctly without any parent
//! coordinator. The lock is held only for the read-modify-write itself;
//! waiting for a free slot sleeps with the lock released.

use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::atomicfile;

pub const COUNTER_FILE: &str = ".running_count";
pub const LOCK_FILE: &str = ".counter.lock";

/// Interval between slot-availability polls in `wait_for_slot`.
const POLL_INTERVAL: Duration = Duration::from_secs(2);

pub struct SlotCounter {
    counter_path: PathBuf,
    lock_path: PathBuf,
    max_parallel: u32,
    poll_interval: Duration,
}

impl SlotCounter {
    pub fn new(root: &Path, max_parallel: u32) -> Self {
        SlotCounter {
            counter_path: root.join(COUNTER_FILE),
            lock_path: root.join(LOCK_FILE),
            max_parallel,
            poll_interval: POLL_INTERVAL,
        }
    }

    #[cfg(test)]
    fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Ensure the counter file exists and holds a non-negative integer.
    ///
    /// Missing file → created with `0`. Unparseable content → reset to `0`
    /// with a warning. An existing valid counter is left untouched.
    pub fn init(&self) -> Result<()> {
        let _guard = self.lock()?;
        match std::fs::read_to_string(&self.counter_path) {
            Ok(raw) => {
                if raw.trim().parse::<u32>().is_err() {
                    warn!(
                        counter = %self.counter_path.display(),
                        content = raw.trim(),
                        "counter file is not a non-negative integer, resetting to 0"
                    );
                    atomicfile::write_str(&self.counter_path, "0")?;
                }
            }
            Err(_) => {
                atomicfile::write_str(&self.counter_path, "0")?;
            }
        }
        Ok(())
    }

    /// Increment the counter by one. Returns the new value.
    pub fn claim(&self) -> Result<u32> {
        let _guard = self.lock()?;
        let n = self.read_unlocked().saturating_add(1);
        atomicfile::write_str(&self.counter_path, &n.to_string())?;
        Ok(n)
    }

    /// Decrement the counter by one, clamped at zero. Returns the new value.
    pub fn release(&self) -> Result<u32> {
        let _guard = self.lock()?;
        let n = self.read_unlocked().saturating_sub(1);
        atomicfile::write_str(&self.counter_path, &n.to_string())?;
        Ok(n)
    }

    /// Overwrite the counter with an absolute value (reconciler only).
    pub fn set(&self, value: u32) -> Result<()> {
        let _guard = self.lock()?;
        atomicfile::write_str(&self.counter_path, &value.to_string())
    }

    /// Current counter value. Takes the lock to avoid reading mid-rewrite
    /// on filesystems where rename is the only atomicity primitive.
    pub fn read(&self) -> Result<u32> {
        let _guard = self.lock()?;
        Ok(self.read_unlocked())
    }

    /// Block until a slot is free, then claim it.
    ///
    /// With `max_parallel == 0` the pool is unbounded and the claim is
    /// unconditional. Otherwise the counter is checked and incremented under
    /// the lock; when full, the lock is dropped and the caller sleeps before
    /// retrying. There is no fairness guarantee across waiters.
    pub fn wait_for_slot(&self) -> Result<()> {
        if self.max_parallel == 0 {
            self.claim()?;
            return Ok(());
        }
        loop {
            {
                let _guard = self.lock()?;
                let n = self.read_unlocked();
                if n < self.max_parallel {
                    atomicfile::write_str(&self.counter_path, &(n + 1).to_string())?;
                    return Ok(());
                }
            }
            std::thread::sleep(self.poll_interval);
        }
    }

    /// Acquire the exclusive advisory lock. Released when the handle drops.
    fn lock(&self) -> Result<File> {
        // Open without truncating: the lock file may be observed by other
        // processes between our open and lock.
        let file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&self.lock_path)
            .with_context(|| format!("open lock file {}", self.lock_path.display()))?;
        file.lock_exclusive()
            .with_context(|| format!("lock {}", self.lock_path.display()))?;
        Ok(file)
    }

    fn read_unlocked(&self) -> u32 {
        std::fs::read_to_string(&self.counter_path)
            .ok()
            .and_then(|raw| raw.trim().parse::<u32>().ok())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn counter_in(dir: &Path, max: u32) -> SlotCounter {
        SlotCounter::new(dir, max).with_poll_interval(Duration::from_millis(10))
    }

    fn read_raw(dir: &Path) -> String {
        std::fs::read_to_string(dir.join(COUNTER_FILE)).unwrap()
    }

    #[test]
    fn init_creates_zero_counter() {
        let dir = tempfile::tempdir().unwrap();
        counter_in(dir.path(), 3).init().unwrap();
        assert_eq!(read_raw(dir.path()), "0");
    }

    #[test]
    fn init_on_valid_counter_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(COUNTER_FILE), "7").unwrap();
        counter_in(dir.path(), 3).init().unwrap();
        assert_eq!(read_raw(dir.path()), "7");
    }

    #[test]
    fn init_resets_garbage_to_zero() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(COUNTER_FILE), "banana").unwrap();
        counter_in(dir.path(), 3).init().unwrap();
        assert_eq!(read_raw(dir.path()), "0");
    }

    #[test]
    fn init_resets_negative_to_zero() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(COUNTER_FILE), "-2").unwrap();
        counter_in(dir.path(), 3).init().unwrap();
        assert_eq!(read_raw(dir.path()), "0");
    }

    #[test]
    fn claim_release_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let slots = counter_in(dir.path(), 3);
        slots.init().unwrap();
        let before = slots.read().unwrap();
        slots.claim().unwrap();
        slots.release().unwrap();
        assert_eq!(slots.read().unwrap(), before);
    }

    #[test]
    fn release_at_zero_stays_at_zero() {
        let dir = tempfile::tempdir().unwrap();
        let slots = counter_in(dir.path(), 3);
        slots.init().unwrap();
        assert_eq!(slots.release().unwrap(), 0);
        assert_eq!(read_raw(dir.path()), "0");
    }

    #[test]
    fn ten_concurrent_claims_count_exactly_ten() {
        let dir = tempfile::tempdir().unwrap();
        let slots = Arc::new(counter_in(dir.path(), 100));
        slots.init().unwrap();
        let handles: Vec<_> = (0..10)
            .map(|_| {
                let slots = Arc::clone(&slots);
                std::thread::spawn(move || slots.claim().unwrap())
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(slots.read().unwrap(), 10);
    }

    #[test]
    fn wait_for_slot_unbounded_always_claims() {
        let dir = tempfile::tempdir().unwrap();
        let slots = counter_in(dir.path(), 0);
        slots.init().unwrap();
        for _ in 0..5 {
            slots.wait_for_slot().unwrap();
        }
        assert_eq!(slots.read().unwrap(), 5);
    }

    #[test]
    fn wait_for_slot_blocks_until_release() {
        let dir = tempfile::tempdir().unwrap();
        let slots = Arc::new(counter_in(dir.path(), 1));
        slots.init().unwrap();
        slots.wait_for_slot().unwrap();
        assert_eq!(slots.read().unwrap(), 1);

        let waiter_slots = Arc::clone(&slots);
        let waiter = std::thread::spawn(move || {
            waiter_slots.wait_for_slot().unwrap();
        });

        // Give the waiter time to enter its poll loop while the pool is full.
        std::thread::sleep(Duration::from_millis(50));
        assert!(!waiter.is_finished(), "waiter proceeded past a full pool");

        slots.release().unwrap();
        waiter.join().unwrap();
        assert_eq!(slots.read().unwrap(), 1);
    }

    #[test]
    fn wait_for_slot_claims_below_cap() {
        let dir = tempfile::tempdir().unwrap();
        let slots = counter_in(dir.path(), 2);
        slots.init().unwrap();
        slots.wait_for_slot().unwrap();
        slots.wait_for_slot().unwrap();
        assert_eq!(slots.read().unwrap(), 2);
    }
}
