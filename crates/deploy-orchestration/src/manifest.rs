//! Exclusion manifest: which parts of the source tree are never deployed.

use crate::{Error, Result};
use ignore::WalkBuilder;
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

/// Patterns excluded when nothing else is configured
const DEFAULT_PATTERNS: &[&str] = &[
    ".git",
    "node_modules",
    "*.log",
    ".env",
    ".env.*",
    "logs/",
    "screenshots/",
    "target/",
    "*.pem",
    "deploy.yaml",
];

/// Ordered set of path globs evaluated relative to the source root
///
/// Patterns use gitignore syntax: `*.log` matches at any depth, `/dist`
/// only at the root, and a pattern matching a directory excludes everything
/// beneath it. Negated (`!`) patterns are rejected, so a path matched by any
/// pattern can never be re-included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExclusionManifest {
    patterns: Vec<String>,
}

impl ExclusionManifest {
    /// Build a manifest from patterns, preserving order and dropping blanks and comments
    pub fn new<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut manifest = Self {
            patterns: Vec::new(),
        };
        for pattern in patterns {
            manifest.push(pattern.as_ref())?;
        }
        Ok(manifest)
    }

    /// The built-in manifest: VCS metadata, dependencies, logs, secrets
    pub fn default_patterns() -> Self {
        Self {
            patterns: DEFAULT_PATTERNS.iter().map(|p| p.to_string()).collect(),
        }
    }

    /// Append a pattern
    pub fn push(&mut self, pattern: &str) -> Result<()> {
        let pattern = pattern.trim();
        if pattern.is_empty() || pattern.starts_with('#') {
            return Ok(());
        }
        if pattern.starts_with('!') {
            return Err(Error::Precondition(format!(
                "exclusion pattern '{}' re-includes paths; negated patterns are not supported",
                pattern
            )));
        }
        if !self.patterns.iter().any(|p| p == pattern) {
            self.patterns.push(pattern.to_string());
        }
        Ok(())
    }

    /// Manifest with extra patterns appended
    pub fn with_patterns<I, S>(mut self, patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for pattern in patterns {
            self.push(pattern.as_ref())?;
        }
        Ok(self)
    }

    /// Patterns in evaluation order
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Compile the patterns against `root`
    pub fn matcher(&self, root: &Path) -> Result<ExclusionMatcher> {
        let mut builder = GitignoreBuilder::new(root);
        for pattern in &self.patterns {
            builder.add_line(None, pattern).map_err(|e| {
                Error::Precondition(format!("invalid exclusion pattern '{}': {}", pattern, e))
            })?;
        }
        let inner = builder
            .build()
            .map_err(|e| Error::Precondition(format!("invalid exclusion manifest: {}", e)))?;
        Ok(ExclusionMatcher { inner })
    }

    /// Relative paths of every regular file under `root` not excluded by the manifest
    ///
    /// Excluded directories are pruned without being descended into. The
    /// result is sorted, so two calls over the same tree compare equal.
    pub fn collect(&self, root: &Path) -> Result<Vec<PathBuf>> {
        if !root.is_dir() {
            return Err(Error::transfer(
                "stage",
                format!("source root {} is not a readable directory", root.display()),
            ));
        }

        let matcher = Arc::new(self.matcher(root)?);
        let walk_root = root.to_path_buf();
        let filter = Arc::clone(&matcher);

        let walker = WalkBuilder::new(root)
            .standard_filters(false)
            .hidden(false)
            .follow_links(false)
            .filter_entry(move |entry| {
                let Ok(relative) = entry.path().strip_prefix(&walk_root) else {
                    return true;
                };
                if relative.as_os_str().is_empty() {
                    return true;
                }
                let is_dir = entry.file_type().is_some_and(|t| t.is_dir());
                !filter.is_excluded(relative, is_dir)
            })
            .build();

        let mut files = Vec::new();
        for entry in walker {
            let entry = entry.map_err(|e| Error::transfer("stage", e.to_string()))?;
            let Some(file_type) = entry.file_type() else {
                continue;
            };
            if file_type.is_dir() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(root)
                .map_err(|e| Error::transfer("stage", e.to_string()))?
                .to_path_buf();
            if file_type.is_symlink() {
                warn!("Skipping symlink {}", relative.display());
                continue;
            }
            files.push(relative);
        }
        files.sort();
        Ok(files)
    }
}

impl Default for ExclusionManifest {
    fn default() -> Self {
        Self::default_patterns()
    }
}

/// Compiled form of an [`ExclusionManifest`] bound to a source root
#[derive(Debug, Clone)]
pub struct ExclusionMatcher {
    inner: Gitignore,
}

impl ExclusionMatcher {
    /// Whether `relative` (or any of its parent directories) matches a pattern
    pub fn is_excluded(&self, relative: &Path, is_dir: bool) -> bool {
        self.inner
            .matched_path_or_any_parents(relative, is_dir)
            .is_ignore()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, rel).unwrap();
    }

    #[test]
    fn test_directory_pattern_excludes_descendants() {
        let manifest = ExclusionManifest::new([".git", "node_modules", "*.log"]).unwrap();
        let matcher = manifest.matcher(Path::new("/src")).unwrap();

        assert!(matcher.is_excluded(Path::new(".git/config"), false));
        assert!(matcher.is_excluded(Path::new("node_modules/puppeteer/index.js"), false));
        assert!(matcher.is_excluded(Path::new("lib/node_modules/x.js"), false));
        assert!(matcher.is_excluded(Path::new("logs/out.log"), false));
        assert!(!matcher.is_excluded(Path::new("src/server.js"), false));
        assert!(!matcher.is_excluded(Path::new("logger.js"), false));
    }

    #[test]
    fn test_negated_patterns_are_rejected() {
        let err = ExclusionManifest::new(["*.log", "!keep.log"]).unwrap_err();
        assert!(err.to_string().contains("negated patterns"));
    }

    #[test]
    fn test_collect_returns_sorted_unexcluded_files() {
        let dir = tempfile::tempdir().unwrap();
        for rel in [
            "server.js",
            "package.json",
            "src/bot.js",
            "src/debug.log",
            ".git/HEAD",
            "node_modules/a/index.js",
            ".env",
            "scripts/dev-reset.sh",
        ] {
            touch(dir.path(), rel);
        }
        let manifest = ExclusionManifest::default_patterns()
            .with_patterns(["/scripts"])
            .unwrap();

        let files = manifest.collect(dir.path()).unwrap();

        assert_eq!(
            files,
            vec![
                PathBuf::from("package.json"),
                PathBuf::from("server.js"),
                PathBuf::from("src/bot.js"),
            ]
        );
    }

    #[test]
    fn test_collect_rejects_missing_root() {
        let err = ExclusionManifest::default()
            .collect(Path::new("/definitely/not/a/dir"))
            .unwrap_err();
        assert!(matches!(err, Error::Transfer { .. }));
    }

    #[test]
    fn test_comments_blanks_and_duplicates_are_dropped() {
        let manifest = ExclusionManifest::new(["# secrets", "", "*.pem", "*.pem"]).unwrap();
        assert_eq!(manifest.patterns(), ["*.pem".to_string()]);
    }
}
