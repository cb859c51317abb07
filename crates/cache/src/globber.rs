//! Ordered include/exclude glob expansion
//!
//! Patterns are evaluated the way CI cache actions evaluate them:
//! - lines starting with `#` are comments
//! - a leading `!` negates the pattern
//! - a leading `~` expands to the home directory
//! - a trailing `/` only matches directories
//! - a pattern matching a directory implicitly matches everything below it
//! - for every candidate path the last matching pattern wins

use crate::{Error, Result};
use async_trait::async_trait;
use glob::{MatchOptions, Pattern};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Expands an ordered list of patterns into matching paths.
///
/// The order of the returned paths is unspecified.
#[async_trait]
pub trait Globber: Send + Sync {
    /// Expand `patterns`, honoring `!` negations in order
    async fn expand(&self, patterns: &[String]) -> Result<Vec<PathBuf>>;
}

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

#[derive(Debug, Clone)]
struct ParsedPattern {
    negate: bool,
    dir_only: bool,
    search: String,
    pattern: Pattern,
}

impl ParsedPattern {
    fn matches(&self, path: &Path) -> bool {
        path.ancestors().any(|candidate| {
            self.pattern.matches_path_with(candidate, MATCH_OPTIONS)
                && (!self.dir_only || candidate.is_dir())
        })
    }
}

/// Filesystem-backed [`Globber`]
#[derive(Debug, Clone)]
pub struct FsGlobber {
    cwd: PathBuf,
    home: Option<PathBuf>,
}

impl FsGlobber {
    /// Create a globber resolving relative patterns against `cwd` and `~` against `home`
    #[must_use]
    pub fn new(cwd: impl Into<PathBuf>, home: Option<PathBuf>) -> Self {
        Self {
            cwd: cwd.into(),
            home,
        }
    }

    fn parse(&self, raw: &str) -> Result<Option<ParsedPattern>> {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(None);
        }

        let (negate, line) = match line.strip_prefix('!') {
            Some(rest) => (true, rest.trim_start()),
            None => (false, line),
        };

        let expanded = if line == "~" || line.starts_with("~/") {
            let home = self
                .home
                .as_ref()
                .ok_or_else(|| Error::glob(raw, "home directory is not known"))?;
            format!("{}{}", home.display(), &line[1..])
        } else if Path::new(line).is_absolute() {
            line.to_string()
        } else {
            format!("{}/{line}", self.cwd.display())
        };

        let dir_only = expanded.len() > 1 && expanded.ends_with('/');
        let search = if dir_only {
            expanded.trim_end_matches('/').to_string()
        } else {
            expanded
        };
        let pattern = Pattern::new(&search).map_err(|e| Error::glob(raw, e.to_string()))?;

        Ok(Some(ParsedPattern {
            negate,
            dir_only,
            search,
            pattern,
        }))
    }

    fn expand_blocking(&self, patterns: &[String]) -> Result<Vec<PathBuf>> {
        let mut parsed = Vec::with_capacity(patterns.len());
        for raw in patterns {
            if let Some(p) = self.parse(raw)? {
                parsed.push(p);
            }
        }

        let mut candidates = BTreeSet::new();
        for include in parsed.iter().filter(|p| !p.negate) {
            let paths = glob::glob_with(&include.search, MATCH_OPTIONS)
                .map_err(|e| Error::glob(&include.search, e.to_string()))?;
            for entry in paths {
                let path = entry.map_err(|e| Error::glob(&include.search, e.to_string()))?;
                if path.is_dir() {
                    for child in walkdir::WalkDir::new(&path).follow_links(false) {
                        let child = child.map_err(|e| Error::glob(&include.search, e.to_string()))?;
                        candidates.insert(child.into_path());
                    }
                } else if !include.dir_only {
                    candidates.insert(path);
                }
            }
        }

        let matched: Vec<PathBuf> = candidates
            .into_iter()
            .filter(|path| {
                parsed.iter().fold(false, |included, p| {
                    if p.matches(path) { !p.negate } else { included }
                })
            })
            .collect();

        tracing::trace!(
            patterns = patterns.len(),
            matched = matched.len(),
            "Expanded glob patterns"
        );
        Ok(matched)
    }
}

#[async_trait]
impl Globber for FsGlobber {
    async fn expand(&self, patterns: &[String]) -> Result<Vec<PathBuf>> {
        let globber = self.clone();
        let patterns = patterns.to_vec();
        tokio::task::spawn_blocking(move || globber.expand_blocking(&patterns))
            .await
            .map_err(|e| Error::store(format!("glob task failed: {e}")))?
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, rel).unwrap();
    }

    fn rel_files(root: &Path, paths: Vec<PathBuf>) -> Vec<String> {
        let mut out: Vec<String> = paths
            .into_iter()
            .filter(|p| p.is_file())
            .map(|p| p.strip_prefix(root).unwrap().to_string_lossy().into_owned())
            .collect();
        out.sort();
        out
    }

    #[tokio::test]
    async fn test_negation_removes_earlier_matches() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "cache/1abc");
        touch(tmp.path(), "cache/1.lock");
        touch(tmp.path(), "cache/2def");

        let globber = FsGlobber::new(tmp.path(), None);
        let found = globber
            .expand(&["cache/1*".to_string(), "!cache/*.lock".to_string()])
            .await
            .unwrap();

        assert_eq!(rel_files(tmp.path(), found), vec!["cache/1abc"]);
    }

    #[tokio::test]
    async fn test_directory_match_includes_descendants() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "cache/a/b/c.bin");
        touch(tmp.path(), "cache/d.bin");

        let globber = FsGlobber::new(tmp.path(), None);
        let found = globber.expand(&["cache/".to_string()]).await.unwrap();

        assert_eq!(
            rel_files(tmp.path(), found),
            vec!["cache/a/b/c.bin", "cache/d.bin"]
        );
    }

    #[tokio::test]
    async fn test_trailing_slash_only_matches_directories() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "plain");

        let globber = FsGlobber::new(tmp.path(), None);
        let found = globber.expand(&["plain/".to_string()]).await.unwrap();

        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn test_later_include_wins_over_earlier_exclude() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "cache/keep.lock");
        touch(tmp.path(), "cache/drop.lock");

        let globber = FsGlobber::new(tmp.path(), None);
        let found = globber
            .expand(&[
                "cache/".to_string(),
                "!cache/*.lock".to_string(),
                "cache/keep*".to_string(),
            ])
            .await
            .unwrap();

        assert_eq!(rel_files(tmp.path(), found), vec!["cache/keep.lock"]);
    }

    #[tokio::test]
    async fn test_tilde_and_comments() {
        let home = TempDir::new().unwrap();
        touch(home.path(), ".gradle/caches/build-cache-1/abc");

        let globber = FsGlobber::new("/nonexistent", Some(home.path().to_path_buf()));
        let found = globber
            .expand(&[
                "# comment line".to_string(),
                "~/.gradle/caches/build-cache-*/a*".to_string(),
            ])
            .await
            .unwrap();

        assert_eq!(
            rel_files(home.path(), found),
            vec![".gradle/caches/build-cache-1/abc"]
        );
    }

    #[tokio::test]
    async fn test_tilde_without_home_is_an_error() {
        let globber = FsGlobber::new("/", None);
        let err = globber.expand(&["~/x".to_string()]).await.unwrap_err();
        assert!(matches!(err, Error::Glob { .. }));
    }

    #[tokio::test]
    async fn test_invalid_pattern_is_an_error() {
        let globber = FsGlobber::new("/", None);
        let err = globber.expand(&["/tmp/[".to_string()]).await.unwrap_err();
        assert!(matches!(err, Error::Glob { .. }));
    }
}
