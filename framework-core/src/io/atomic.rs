//! Atomic file replacement (temp file + rename).

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use serde::Serialize;

/// Serialize `value` to pretty-printed JSON with trailing newline and atomically
/// replace `path`.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value).context("serialize json")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Sibling of `path` named `<file>.<pid>.<seq>.<suffix>`, distinct for every
/// call across processes and threads.
pub fn temp_sibling(path: &Path, suffix: &str) -> Result<PathBuf> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    let file_name = path
        .file_name()
        .with_context(|| format!("path missing file name {}", path.display()))?;
    let seq = TEMP_SEQ.fetch_add(1, Ordering::Relaxed);
    Ok(parent.join(format!(
        "{}.{}.{seq}.{suffix}",
        file_name.to_string_lossy(),
        std::process::id()
    )))
}

/// Write `contents` to a sibling temp file, then rename it over `path`.
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = temp_sibling(path, "tmp")?;
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_atomic_creates_parent_and_leaves_no_temp_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nested").join("state.json");
        write_json_atomic(&path, &serde_json::json!({"status": "clean"})).expect("write");

        let contents = fs::read_to_string(&path).expect("read");
        assert_eq!(contents, "{\n  \"status\": \"clean\"\n}\n");
        let entries: Vec<_> = fs::read_dir(path.parent().expect("parent"))
            .expect("read dir")
            .collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn concurrent_writers_never_share_a_temp_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("state.json");
        std::thread::scope(|scope| {
            for writer in 0..8 {
                let path = &path;
                scope.spawn(move || {
                    for round in 0..50 {
                        write_atomic(path, &format!("{writer}-{round}\n")).expect("write");
                    }
                });
            }
        });

        let contents = fs::read_to_string(&path).expect("read");
        assert!(contents.ends_with("-49\n"), "{contents}");
        let entries = fs::read_dir(temp.path()).expect("read dir").count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn temp_siblings_are_distinct() {
        let path = Path::new("/ws/.claude/.session-owner");
        let a = temp_sibling(path, "new").expect("temp");
        let b = temp_sibling(path, "new").expect("temp");
        assert_ne!(a, b);
        assert_eq!(a.parent(), path.parent());
    }
}
