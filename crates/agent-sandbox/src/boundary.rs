//! Path boundary enforcement shared by every backend.
//!
//! The decision rule lives in [`BoundaryChecker::is_inside`] and nowhere else,
//! so file operations and command working directories can never drift apart:
//!
//! 1. a path under the working directory is always permitted;
//! 2. with enforcement disabled, any path is permitted;
//! 3. otherwise the path must be under one of the allow-roots.

use std::path::{Component, Path, PathBuf};

use tracing::debug;

use crate::error::{SandboxError, SandboxResult};
use crate::options::SandboxOptions;

/// Immutable boundary for one sandbox instance.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundaryChecker {
    root: PathBuf,
    allow_paths: Vec<PathBuf>,
    enforce: bool,
}

impl BoundaryChecker {
    /// Build a checker. A relative `root` is anchored at the current directory.
    pub fn new(root: impl AsRef<Path>, allow_paths: &[PathBuf], enforce: bool) -> Self {
        let root = absolutize(root.as_ref());
        Self {
            allow_paths: allow_paths.iter().map(|p| absolutize(p)).collect(),
            root,
            enforce,
        }
    }

    pub fn from_options(options: &SandboxOptions) -> Self {
        Self::new(
            &options.working_directory,
            &options.allow_paths,
            options.enforce_boundary,
        )
    }

    /// The sandbox root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn allow_paths(&self) -> &[PathBuf] {
        &self.allow_paths
    }

    pub fn enforces(&self) -> bool {
        self.enforce
    }

    /// Resolve `path` against the root and normalize it lexically.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path_clean::clean(path)
        } else {
            path_clean::clean(self.root.join(path))
        }
    }

    /// Decide whether an absolute, normalized path is inside the sandbox.
    pub fn is_inside(&self, path: &Path) -> bool {
        if is_under(path, &self.root) {
            return true;
        }
        if !self.enforce {
            return true;
        }
        self.allow_paths.iter().any(|allowed| is_under(path, allowed))
    }

    /// Resolve `path` and reject it if it falls outside the boundary.
    pub fn check(&self, path: &Path) -> SandboxResult<PathBuf> {
        let resolved = self.resolve(path);
        if self.is_inside(&resolved) {
            Ok(resolved)
        } else {
            debug!(path = %resolved.display(), "path rejected by boundary");
            Err(SandboxError::OutsideSandbox { path: resolved })
        }
    }
}

/// `path` relative to `base` has no leading `..`.
pub(crate) fn is_under(path: &Path, base: &Path) -> bool {
    match pathdiff::diff_paths(path, base) {
        Some(relative) => !matches!(relative.components().next(), Some(Component::ParentDir)),
        None => false,
    }
}

fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path_clean::clean(path)
    } else {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        path_clean::clean(cwd.join(path))
    }
}
