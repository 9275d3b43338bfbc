use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::error::{CirunError, Result};

/// Path cache for job workspaces.
///
/// Persists the cached paths of successful jobs under a per-project tree in
/// the platform cache directory:
/// - Linux: `~/.cache/cirun/{project-slug}/{key}/...`
/// - macOS: `~/Library/Caches/cirun/{project-slug}/{key}/...`
///
/// Entries are keyed by the interpolated cache key and written only after
/// the owning job succeeded, so a failed run never replaces a good entry.
pub struct PathCache {
    root: PathBuf,
    enabled: bool,
}

impl PathCache {
    /// Creates the cache for a project. `dir` overrides the platform cache
    /// root, which tests and the `[cache]` config section use.
    pub fn new(project: &str, enabled: bool, dir: Option<&Path>) -> Result<Self> {
        if !enabled {
            debug!("Path cache disabled");
            return Ok(Self {
                root: PathBuf::new(),
                enabled: false,
            });
        }

        let base = match dir {
            Some(dir) => dir.to_path_buf(),
            None => dirs::cache_dir()
                .ok_or_else(|| CirunError::Cache("No cache directory found".into()))?
                .join("cirun"),
        };

        let root = base.join(project.replace('/', "-"));
        fs::create_dir_all(&root)?;

        info!("Path cache enabled at: {}", root.display());

        Ok(Self {
            root,
            enabled: true,
        })
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Copies every cached path of `key` back into the workspace. A missing
    /// entry or path is a cache miss, not an error.
    pub fn restore(&self, key: &str, paths: &[String], workspace: &Path) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        let entry = self.root.join(key);
        if !entry.exists() {
            debug!("Cache miss for key '{key}'");
            return Ok(());
        }

        for path in paths {
            let Some(relative) = usable_path(path) else {
                continue;
            };
            let src = entry.join(relative);
            if !src.exists() {
                debug!("Cache entry '{key}' has no copy of '{path}'");
                continue;
            }
            copy_tree(&src, &workspace.join(relative))?;
            debug!("Restored '{path}' from cache key '{key}'");
        }

        Ok(())
    }

    /// Copies every listed path from the workspace into the entry for
    /// `key`. Paths the job did not produce are warned about and skipped.
    pub fn save(&self, key: &str, paths: &[String], workspace: &Path) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        let entry = self.root.join(key);

        for path in paths {
            let Some(relative) = usable_path(path) else {
                continue;
            };
            let src = workspace.join(relative);
            if !src.exists() {
                warn!("Cache path '{path}' was not produced, skipping");
                continue;
            }
            copy_tree(&src, &entry.join(relative))?;
            debug!("Saved '{path}' under cache key '{key}'");
        }

        Ok(())
    }

    /// Removes the whole cache tree of this project.
    pub fn clear(&self) -> Result<()> {
        if !self.enabled || !self.root.exists() {
            return Ok(());
        }

        fs::remove_dir_all(&self.root)?;
        fs::create_dir_all(&self.root)?;
        info!("Cache cleared: {}", self.root.display());

        Ok(())
    }
}

/// Cached paths must stay inside the workspace and the entry dir.
fn usable_path(path: &str) -> Option<&str> {
    let p = Path::new(path);
    if p.is_absolute() || p.components().any(|c| c == std::path::Component::ParentDir) {
        warn!("Cache path '{path}' leaves the workspace, skipping");
        return None;
    }
    Some(path)
}

fn copy_tree(src: &Path, dst: &Path) -> std::io::Result<()> {
    if src.is_dir() {
        fs::create_dir_all(dst)?;
        for item in fs::read_dir(src)? {
            let item = item?;
            copy_tree(&item.path(), &dst.join(item.file_name()))?;
        }
    } else {
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(src, dst)?;
    }
    Ok(())
}
