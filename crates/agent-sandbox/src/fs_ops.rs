//! Boundary-checked filesystem operations.
//!
//! Both backends act on the host side of the filesystem: the container
//! backend's bind mounts guarantee the container sees the same bytes, and
//! metadata and search are faster and more consistent from the host. Every
//! entry point resolves its path through the [`BoundaryChecker`] first and
//! fails with [`SandboxError::OutsideSandbox`] on violation.

use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use regex::RegexBuilder;
use tempfile::NamedTempFile;
use tracing::debug;
use walkdir::WalkDir;

use crate::boundary::BoundaryChecker;
use crate::error::{SandboxError, SandboxResult};
use crate::types::{DirectoryEntry, GrepOptions, GrepResult};

const GLOB_META: &[char] = &['*', '?', '[', '{'];

/// Filesystem view of one sandbox.
#[derive(Debug, Clone)]
pub struct SandboxFs {
    boundary: BoundaryChecker,
}

impl SandboxFs {
    pub fn new(boundary: BoundaryChecker) -> Self {
        Self { boundary }
    }

    pub fn boundary(&self) -> &BoundaryChecker {
        &self.boundary
    }

    pub fn read_file(&self, path: &Path) -> SandboxResult<String> {
        let path = self.boundary.check(path)?;
        fs::read_to_string(&path).map_err(|e| SandboxError::io_at(e, &path))
    }

    /// Write `content`, creating parent directories. The write is atomic:
    /// readers see either the old or the new file, never a prefix.
    pub fn write_file(&self, path: &Path, content: &str) -> SandboxResult<()> {
        let path = self.boundary.check(path)?;
        let parent = path
            .parent()
            .ok_or_else(|| SandboxError::InvalidConfig(format!("no parent: {}", path.display())))?;
        fs::create_dir_all(parent)?;

        let mut tmp = NamedTempFile::new_in(parent)?;
        tmp.write_all(content.as_bytes())?;
        tmp.persist(&path).map_err(|e| e.error)?;
        debug!(path = %path.display(), bytes = content.len(), "file written");
        Ok(())
    }

    pub fn exists(&self, path: &Path) -> SandboxResult<bool> {
        let path = self.boundary.check(path)?;
        Ok(path.exists())
    }

    pub fn create_directory(&self, path: &Path) -> SandboxResult<()> {
        let path = self.boundary.check(path)?;
        fs::create_dir_all(&path)?;
        Ok(())
    }

    /// Remove a file, or a directory and everything under it.
    pub fn delete(&self, path: &Path) -> SandboxResult<()> {
        let path = self.boundary.check(path)?;
        let meta = fs::symlink_metadata(&path).map_err(|e| SandboxError::io_at(e, &path))?;
        if meta.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
        debug!(path = %path.display(), "path deleted");
        Ok(())
    }

    /// Entries of a directory, sorted by name.
    pub fn list_directory(&self, path: &Path) -> SandboxResult<Vec<DirectoryEntry>> {
        let path = self.boundary.check(path)?;
        let mut entries = Vec::new();
        for entry in fs::read_dir(&path).map_err(|e| SandboxError::io_at(e, &path))? {
            let entry = entry?;
            let meta = entry.metadata()?;
            entries.push(DirectoryEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                path: entry.path(),
                is_directory: meta.is_dir(),
                is_file: meta.is_file(),
                size: meta.len(),
                modified: meta.modified().ok().map(DateTime::<Utc>::from),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// Expand a glob pattern relative to the sandbox root.
    ///
    /// The literal prefix of the pattern must lie inside the boundary, and
    /// every match is re-checked, so `../*` style patterns cannot leak paths.
    pub fn glob(&self, pattern: &str) -> SandboxResult<Vec<PathBuf>> {
        let full = self.boundary.resolve(Path::new(pattern));
        self.boundary.check(&literal_prefix(&full))?;

        let full = full.to_string_lossy().into_owned();
        let paths =
            glob::glob(&full).map_err(|e| SandboxError::InvalidPattern(e.to_string()))?;

        let mut matches: Vec<PathBuf> = paths
            .filter_map(Result::ok)
            .map(path_clean::clean)
            .filter(|p| self.boundary.is_inside(p))
            .collect();
        matches.sort();
        Ok(matches)
    }

    /// Regex search over text files under `options.path` (default: root).
    pub fn grep(&self, pattern: &str, options: &GrepOptions) -> SandboxResult<Vec<GrepResult>> {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(options.case_insensitive)
            .build()
            .map_err(|e| SandboxError::InvalidPattern(e.to_string()))?;
        let name_filter = options
            .glob
            .as_deref()
            .map(glob::Pattern::new)
            .transpose()
            .map_err(|e| SandboxError::InvalidPattern(e.to_string()))?;
        let base = match &options.path {
            Some(p) => self.boundary.check(p)?,
            None => self.boundary.root().to_path_buf(),
        };
        let limit = options.max_results.unwrap_or(usize::MAX);

        let mut results = Vec::new();
        let walker = WalkDir::new(&base)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| !(e.file_type().is_dir() && e.file_name() == ".git"));

        for entry in walker.filter_map(Result::ok) {
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(filter) = &name_filter {
                if !filter.matches(&entry.file_name().to_string_lossy()) {
                    continue;
                }
            }
            let Ok(bytes) = fs::read(entry.path()) else {
                continue;
            };
            // Binary files are skipped.
            let Ok(text) = String::from_utf8(bytes) else {
                continue;
            };
            for (index, line) in text.lines().enumerate() {
                if regex.is_match(line) {
                    results.push(GrepResult {
                        path: entry.path().to_path_buf(),
                        line_number: index + 1,
                        line: line.to_string(),
                    });
                    if results.len() >= limit {
                        return Ok(results);
                    }
                }
            }
        }
        Ok(results)
    }
}

/// Leading components of `pattern` that contain no glob metacharacters.
fn literal_prefix(pattern: &Path) -> PathBuf {
    let mut prefix = PathBuf::new();
    for component in pattern.components() {
        if let Component::Normal(part) = component {
            if part.to_string_lossy().contains(GLOB_META) {
                break;
            }
        }
        prefix.push(component);
    }
    prefix
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_fs() -> (tempfile::TempDir, SandboxFs) {
        let dir = tempfile::tempdir().unwrap();
        let boundary = BoundaryChecker::new(dir.path(), &[], true);
        (dir, SandboxFs::new(boundary))
    }

    #[test]
    fn test_write_read_roundtrip_creates_parents() {
        let (dir, sfs) = make_fs();
        sfs.write_file(Path::new("a/b/c.txt"), "hello").unwrap();
        assert!(dir.path().join("a/b/c.txt").is_file());
        assert_eq!(sfs.read_file(Path::new("a/b/c.txt")).unwrap(), "hello");
    }

    #[test]
    fn test_escape_is_hard_fault() {
        let (_dir, sfs) = make_fs();
        let escape = Path::new("../escape.txt");
        assert!(matches!(
            sfs.write_file(escape, "x"),
            Err(SandboxError::OutsideSandbox { .. })
        ));
        assert!(matches!(
            sfs.read_file(Path::new("/etc/hostname")),
            Err(SandboxError::OutsideSandbox { .. })
        ));
        assert!(matches!(
            sfs.exists(escape),
            Err(SandboxError::OutsideSandbox { .. })
        ));
        assert!(matches!(
            sfs.delete(escape),
            Err(SandboxError::OutsideSandbox { .. })
        ));
        assert!(matches!(
            sfs.list_directory(Path::new("..")),
            Err(SandboxError::OutsideSandbox { .. })
        ));
    }

    #[test]
    fn test_delete_file_and_directory() {
        let (dir, sfs) = make_fs();
        sfs.write_file(Path::new("d/one.txt"), "1").unwrap();
        sfs.write_file(Path::new("two.txt"), "2").unwrap();

        sfs.delete(Path::new("two.txt")).unwrap();
        assert!(!dir.path().join("two.txt").exists());
        sfs.delete(Path::new("d")).unwrap();
        assert!(!dir.path().join("d").exists());

        assert!(matches!(
            sfs.delete(Path::new("missing")),
            Err(SandboxError::NotFound { .. })
        ));
    }

    #[test]
    fn test_list_directory_sorted() {
        let (_dir, sfs) = make_fs();
        sfs.write_file(Path::new("b.txt"), "bb").unwrap();
        sfs.create_directory(Path::new("a")).unwrap();

        let entries = sfs.list_directory(Path::new(".")).unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b.txt"]);
        assert!(entries[0].is_directory);
        assert!(entries[1].is_file);
        assert_eq!(entries[1].size, 2);
    }

    #[test]
    fn test_glob_relative_to_root() {
        let (dir, sfs) = make_fs();
        sfs.write_file(Path::new("src/a.rs"), "").unwrap();
        sfs.write_file(Path::new("src/b.rs"), "").unwrap();
        sfs.write_file(Path::new("src/c.txt"), "").unwrap();

        let hits = sfs.glob("src/*.rs").unwrap();
        assert_eq!(
            hits,
            vec![dir.path().join("src/a.rs"), dir.path().join("src/b.rs")]
        );
    }

    #[test]
    fn test_glob_outside_prefix_rejected() {
        let (_dir, sfs) = make_fs();
        assert!(matches!(
            sfs.glob("../*"),
            Err(SandboxError::OutsideSandbox { .. })
        ));
        assert!(matches!(
            sfs.glob("/etc/*.conf"),
            Err(SandboxError::OutsideSandbox { .. })
        ));
    }

    #[test]
    fn test_grep_with_filters() {
        let (dir, sfs) = make_fs();
        sfs.write_file(Path::new("a.rs"), "fn main() {}\n// TODO fix\n")
            .unwrap();
        sfs.write_file(Path::new("b.md"), "todo: docs\n").unwrap();
        sfs.write_file(Path::new(".git/config"), "TODO hidden\n").unwrap();
        std::fs::write(dir.path().join("bin.dat"), [0xff, 0xfe, b'T', b'O']).unwrap();

        let hits = sfs
            .grep(
                "todo",
                &GrepOptions {
                    case_insensitive: true,
                    ..GrepOptions::default()
                },
            )
            .unwrap();
        let mut files: Vec<_> = hits
            .iter()
            .map(|h| h.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        files.sort();
        assert_eq!(files, vec!["a.rs", "b.md"]);

        let rs_only = sfs
            .grep(
                "TODO",
                &GrepOptions {
                    glob: Some("*.rs".into()),
                    ..GrepOptions::default()
                },
            )
            .unwrap();
        assert_eq!(rs_only.len(), 1);
        assert_eq!(rs_only[0].line_number, 2);
        assert_eq!(rs_only[0].line, "// TODO fix");
    }

    #[test]
    fn test_grep_invalid_regex() {
        let (_dir, sfs) = make_fs();
        assert!(matches!(
            sfs.grep("(", &GrepOptions::default()),
            Err(SandboxError::InvalidPattern(_))
        ));
    }

    #[test]
    fn test_literal_prefix_stops_at_metachar() {
        assert_eq!(
            literal_prefix(Path::new("/tmp/ws/src/**/*.rs")),
            PathBuf::from("/tmp/ws/src")
        );
        assert_eq!(literal_prefix(Path::new("/tmp/ws/a.txt")), PathBuf::from("/tmp/ws/a.txt"));
    }
}
