//! Workspace and home relative path naming
//!
//! Cache contents are named relative to the workspace or the user home so
//! that hashes and archives do not depend on where a runner checks out the
//! repository.

use crate::{Error, Result};
use std::path::{Component, Path, PathBuf};

const WORKSPACE_HASH_MARKER: &str = "ws://";
const HOME_HASH_MARKER: &str = "~/";

const WORKSPACE_ARCHIVE_DIR: &str = "ws";
const HOME_ARCHIVE_DIR: &str = "home";
const ROOT_ARCHIVE_DIR: &str = "root";

/// The two roots paths are normalized against
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathRoots {
    workspace: PathBuf,
    home: Option<PathBuf>,
}

impl PathRoots {
    /// Create roots from an explicit workspace and home directory
    #[must_use]
    pub fn new(workspace: impl Into<PathBuf>, home: Option<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
            home,
        }
    }

    /// Workspace root
    #[must_use]
    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Home directory, if known
    #[must_use]
    pub fn home(&self) -> Option<&Path> {
        self.home.as_deref()
    }

    fn classify<'a>(&self, path: &'a Path) -> (Anchor, &'a Path) {
        if let Ok(rel) = path.strip_prefix(&self.workspace) {
            return (Anchor::Workspace, rel);
        }
        if let Some(home) = &self.home
            && let Ok(rel) = path.strip_prefix(home)
        {
            return (Anchor::Home, rel);
        }
        (Anchor::Absolute, path)
    }

    /// Key fed into the content hash for `path`.
    ///
    /// Workspace paths become `ws://<rel>`, home paths `~/<rel>`, anything
    /// else stays verbatim.
    #[must_use]
    pub fn hash_key(&self, path: &Path) -> String {
        match self.classify(path) {
            (Anchor::Workspace, rel) => format!("{WORKSPACE_HASH_MARKER}{}", slash_path(rel)),
            (Anchor::Home, rel) => format!("{HOME_HASH_MARKER}{}", slash_path(rel)),
            (Anchor::Absolute, p) => p.to_string_lossy().into_owned(),
        }
    }

    /// Member name used when storing `path` in an archive
    #[must_use]
    pub fn archive_name(&self, path: &Path) -> String {
        match self.classify(path) {
            (Anchor::Workspace, rel) => format!("{WORKSPACE_ARCHIVE_DIR}/{}", slash_path(rel)),
            (Anchor::Home, rel) => format!("{HOME_ARCHIVE_DIR}/{}", slash_path(rel)),
            (Anchor::Absolute, p) => format!("{ROOT_ARCHIVE_DIR}/{}", slash_path(p)),
        }
    }

    /// Map an archive member name back onto this machine
    pub fn resolve_archive_name(&self, name: &str) -> Result<PathBuf> {
        let (anchor, rest) = name
            .split_once('/')
            .ok_or_else(|| Error::store(format!("malformed archive member '{name}'")))?;

        let base = match anchor {
            WORKSPACE_ARCHIVE_DIR => self.workspace.clone(),
            HOME_ARCHIVE_DIR => self
                .home
                .clone()
                .ok_or_else(|| Error::store("archive contains home paths but home is unknown"))?,
            ROOT_ARCHIVE_DIR => PathBuf::from("/"),
            other => {
                return Err(Error::store(format!(
                    "unknown archive member anchor '{other}'"
                )));
            }
        };

        let rel = Path::new(rest);
        if rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(Error::store(format!(
                "archive member '{name}' escapes its root"
            )));
        }
        Ok(base.join(rel))
    }
}

#[derive(Debug, Clone, Copy)]
enum Anchor {
    Workspace,
    Home,
    Absolute,
}

fn slash_path(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn roots() -> PathRoots {
        PathRoots::new("/home/runner/work/repo", Some(PathBuf::from("/home/runner")))
    }

    #[test]
    fn test_workspace_wins_over_home() {
        let key = roots().hash_key(Path::new("/home/runner/work/repo/build/a.txt"));
        assert_eq!(key, "ws://build/a.txt");
    }

    #[test]
    fn test_home_relative_key() {
        let key = roots().hash_key(Path::new("/home/runner/.gradle/caches/x"));
        assert_eq!(key, "~/.gradle/caches/x");
    }

    #[test]
    fn test_other_paths_verbatim() {
        assert_eq!(roots().hash_key(Path::new("/opt/tool/bin")), "/opt/tool/bin");
    }

    #[test]
    fn test_prefix_is_component_wise() {
        let key = roots().hash_key(Path::new("/home/runner/work/repository/file"));
        assert_eq!(key, "~/work/repository/file");
    }

    #[test]
    fn test_archive_names_resolve_on_another_machine() {
        let here = roots();
        let there = PathRoots::new("/Users/ci/src", Some(PathBuf::from("/Users/ci")));

        let name = here.archive_name(Path::new("/home/runner/.gradle/caches/build-cache-1/abc"));
        assert_eq!(name, "home/.gradle/caches/build-cache-1/abc");
        assert_eq!(
            there.resolve_archive_name(&name).unwrap(),
            PathBuf::from("/Users/ci/.gradle/caches/build-cache-1/abc")
        );

        let name = here.archive_name(Path::new("/opt/data/x"));
        assert_eq!(name, "root/opt/data/x");
        assert_eq!(
            there.resolve_archive_name(&name).unwrap(),
            PathBuf::from("/opt/data/x")
        );
    }

    #[test]
    fn test_resolve_rejects_traversal() {
        assert!(roots().resolve_archive_name("ws/../../etc/passwd").is_err());
        assert!(roots().resolve_archive_name("bogus/file").is_err());
        assert!(roots().resolve_archive_name("noslash").is_err());
    }
}
