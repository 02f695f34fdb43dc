//! Canonical workspace paths, threaded through every operation.

use std::path::{Path, PathBuf};

/// All canonical paths within `.claude/` for a workspace root.
#[derive(Debug, Clone)]
pub struct WorkspacePaths {
    pub root: PathBuf,
    pub claude_dir: PathBuf,
    pub lock_path: PathBuf,
    pub marker_path: PathBuf,
    pub config_path: PathBuf,
    pub log_dir: PathBuf,
    pub scripts_dir: PathBuf,
}

impl WorkspacePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let claude_dir = root.join(".claude");
        Self {
            root: root.clone(),
            claude_dir: claude_dir.clone(),
            lock_path: claude_dir.join(".session-owner"),
            marker_path: claude_dir.join(".last_session"),
            config_path: claude_dir.join("framework-core.toml"),
            log_dir: claude_dir.join("logs").join("framework-core"),
            scripts_dir: claude_dir.join("scripts"),
        }
    }

    /// Resolve a workspace-relative path; absolute paths are kept as-is.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_live_under_claude_dir() {
        let paths = WorkspacePaths::new("/work");
        assert_eq!(paths.lock_path, Path::new("/work/.claude/.session-owner"));
        assert_eq!(paths.marker_path, Path::new("/work/.claude/.last_session"));
        assert_eq!(
            paths.resolve(Path::new(".claude/scripts/x.sh")),
            Path::new("/work/.claude/scripts/x.sh")
        );
        assert_eq!(paths.resolve(Path::new("/abs")), Path::new("/abs"));
    }
}
