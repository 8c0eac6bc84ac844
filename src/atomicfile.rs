//! Write-temp-then-rename file publication.
//!
//! Every persistent write in the supervisor goes through [`write`] so that a
//! reader racing a writer observes either the previous content or the final
//! content, never a partial file. The temp name embeds the writer's PID and a
//! process-local sequence number, which is enough to keep concurrent
//! supervisor invocations from colliding in the same directory.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

static SEQ: AtomicU64 = AtomicU64::new(0);

fn temp_sibling(path: &Path) -> PathBuf {
    let seq = SEQ.fetch_add(1, Ordering::Relaxed);
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    path.with_file_name(format!("{name}.tmp.{}.{seq}", std::process::id()))
}

/// Atomically replace `path` with `bytes`.
pub fn write(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = temp_sibling(path);
    std::fs::write(&tmp, bytes)
        .with_context(|| format!("write temp file {}", tmp.display()))?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e).with_context(|| format!("rename {} over {}", tmp.display(), path.display()));
    }
    Ok(())
}

/// UTF-8 convenience wrapper over [`write`].
pub fn write_str(path: &Path, contents: &str) -> Result<()> {
    write(path, contents.as_bytes())
}
