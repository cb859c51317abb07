//! Archive store abstraction and a local directory-backed implementation

use crate::globber::Globber;
use crate::roots::PathRoots;
use crate::{Error, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

/// Maximum accepted key length
pub const MAX_KEY_LENGTH: usize = 512;

/// Maximum number of restore keys per lookup
pub const MAX_RESTORE_KEYS: usize = 10;

const ARCHIVE_EXTENSION: &str = ".tar.zst";
const ZSTD_LEVEL: i32 = 3;

/// Remote (or local) store of cache archives.
///
/// Errors are reported as [`Error::Validation`] for malformed input,
/// [`Error::ReserveCache`] when a key is already being written and any
/// other variant for transient failures.
#[async_trait]
pub trait ArchiveStore: Send + Sync {
    /// Restore the archive for `primary_key`, falling back to the newest
    /// archive whose key starts with one of `restore_keys` (in order).
    /// Returns the key that matched.
    async fn restore(
        &self,
        paths: &[String],
        primary_key: &str,
        restore_keys: &[String],
    ) -> Result<Option<String>>;

    /// Upload the files matched by `paths` under `key`
    async fn save(&self, paths: &[String], key: &str) -> Result<()>;
}

/// Check a cache key for characters and lengths stores reject
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::validation("cache key must not be empty"));
    }
    if key.len() > MAX_KEY_LENGTH {
        return Err(Error::validation(format!(
            "key {key} is longer than {MAX_KEY_LENGTH} characters"
        )));
    }
    if key.contains(',') {
        return Err(Error::validation(format!(
            "key {key} must not contain commas"
        )));
    }
    Ok(())
}

fn validate_paths(paths: &[String]) -> Result<()> {
    if paths.iter().all(|p| p.trim().is_empty()) {
        return Err(Error::validation(
            "at least one path is required to restore or save a cache",
        ));
    }
    Ok(())
}

/// Archives written with a different path list never match; the version
/// directory is derived from the patterns.
fn paths_version(paths: &[String]) -> String {
    let mut hasher = Sha256::new();
    for path in paths {
        hasher.update(path.as_bytes());
        hasher.update([b'\n']);
    }
    hex::encode(&hasher.finalize()[..8])
}

fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for c in key.chars() {
        match c {
            '%' => out.push_str("%25"),
            '/' => out.push_str("%2F"),
            '\\' => out.push_str("%5C"),
            _ => out.push(c),
        }
    }
    out
}

fn decode_key(encoded: &str) -> String {
    let mut out = String::with_capacity(encoded.len());
    let mut rest = encoded;
    while let Some(idx) = rest.find('%') {
        out.push_str(&rest[..idx]);
        let escape = rest.get(idx..idx + 3);
        match escape {
            Some("%25") => out.push('%'),
            Some("%2F") => out.push('/'),
            Some("%5C") => out.push('\\'),
            _ => {
                out.push('%');
                rest = &rest[idx + 1..];
                continue;
            }
        }
        rest = &rest[idx + 3..];
    }
    out.push_str(rest);
    out
}

/// [`ArchiveStore`] keeping one `tar` + `zstd` archive per key in a directory.
///
/// Member names are relative to the workspace or home directory (see
/// [`PathRoots::archive_name`]) so archives restore on a different runner.
#[derive(Clone)]
pub struct LocalArchiveStore {
    root: PathBuf,
    globber: Arc<dyn Globber>,
    roots: PathRoots,
}

impl LocalArchiveStore {
    /// Create a store under `root`
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, globber: Arc<dyn Globber>, roots: PathRoots) -> Self {
        Self {
            root: root.into(),
            globber,
            roots,
        }
    }

    /// Default store location: `<os cache dir>/shardcache/archives`
    pub fn default_root() -> Result<PathBuf> {
        dirs::cache_dir()
            .or_else(|| dirs::home_dir().map(|h| h.join(".cache")))
            .map(|d| d.join("shardcache").join("archives"))
            .ok_or_else(|| Error::store("Failed to determine a cache directory"))
    }

    fn archive_path(&self, version_dir: &Path, key: &str) -> PathBuf {
        version_dir.join(format!("{}{ARCHIVE_EXTENSION}", encode_key(key)))
    }

    fn find_archive(
        &self,
        version_dir: &Path,
        primary_key: &str,
        restore_keys: &[String],
    ) -> Result<Option<(String, PathBuf)>> {
        let exact = self.archive_path(version_dir, primary_key);
        if exact.is_file() {
            return Ok(Some((primary_key.to_string(), exact)));
        }
        if restore_keys.is_empty() {
            return Ok(None);
        }

        let listing = match fs::read_dir(version_dir) {
            Ok(listing) => listing,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::io(e, version_dir, "read_dir")),
        };

        let mut archives: Vec<(String, PathBuf, SystemTime)> = Vec::new();
        for entry in listing {
            let entry = entry.map_err(|e| Error::io(e, version_dir, "read_dir"))?;
            let file_name = entry.file_name();
            let Some(encoded) = file_name
                .to_str()
                .and_then(|n| n.strip_suffix(ARCHIVE_EXTENSION))
            else {
                continue;
            };
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            archives.push((decode_key(encoded), entry.path(), modified));
        }

        for prefix in restore_keys {
            let newest = archives
                .iter()
                .filter(|(key, _, _)| key.starts_with(prefix.as_str()))
                .max_by(|a, b| a.2.cmp(&b.2).then_with(|| a.0.cmp(&b.0)));
            if let Some((key, path, _)) = newest {
                return Ok(Some((key.clone(), path.clone())));
            }
        }
        Ok(None)
    }

    fn unpack(&self, archive: &Path) -> Result<usize> {
        let file = fs::File::open(archive).map_err(|e| Error::io(e, archive, "open"))?;
        let dec = zstd::Decoder::new(file)
            .map_err(|e| Error::store(format!("zstd decoder error: {e}")))?;
        let mut tar = tar::Archive::new(dec);
        let entries = tar
            .entries()
            .map_err(|e| Error::store(format!("tar read failed: {e}")))?;

        let mut count = 0usize;
        for entry in entries {
            let mut entry = entry.map_err(|e| Error::store(format!("tar read failed: {e}")))?;
            let name = entry
                .path()
                .map_err(|e| Error::store(format!("tar entry path: {e}")))?
                .to_string_lossy()
                .into_owned();
            let dst = self.roots.resolve_archive_name(&name)?;
            if let Some(parent) = dst.parent() {
                fs::create_dir_all(parent).map_err(|e| Error::io(e, parent, "create_dir_all"))?;
            }
            entry
                .unpack(&dst)
                .map_err(|e| Error::io(e, &dst, "unpack"))?;
            count += 1;
        }
        Ok(count)
    }

    fn pack(&self, version_dir: &Path, target: &Path, files: &[PathBuf]) -> Result<()> {
        fs::create_dir_all(version_dir)
            .map_err(|e| Error::io(e, version_dir, "create_dir_all"))?;
        if target.exists() {
            return Err(Error::reserve_cache(target.display().to_string()));
        }

        let tmp = tempfile::NamedTempFile::new_in(version_dir)
            .map_err(|e| Error::io(e, version_dir, "create temp file"))?;
        let enc = zstd::Encoder::new(tmp.as_file(), ZSTD_LEVEL)
            .map_err(|e| Error::store(format!("zstd encoder error: {e}")))?;
        let mut builder = tar::Builder::new(enc);
        for file in files {
            builder
                .append_path_with_name(file, self.roots.archive_name(file))
                .map_err(|e| Error::io(e, file, "archive"))?;
        }
        let enc = builder
            .into_inner()
            .map_err(|e| Error::store(format!("tar finalize failed: {e}")))?;
        enc.finish()
            .map_err(|e| Error::store(format!("zstd finish failed: {e}")))?;

        tmp.persist_noclobber(target).map_err(|e| {
            if e.error.kind() == std::io::ErrorKind::AlreadyExists {
                Error::reserve_cache(target.display().to_string())
            } else {
                Error::io(e.error, target, "persist")
            }
        })?;
        Ok(())
    }
}

#[async_trait]
impl ArchiveStore for LocalArchiveStore {
    async fn restore(
        &self,
        paths: &[String],
        primary_key: &str,
        restore_keys: &[String],
    ) -> Result<Option<String>> {
        validate_paths(paths)?;
        validate_key(primary_key)?;
        if restore_keys.len() > MAX_RESTORE_KEYS {
            return Err(Error::validation(format!(
                "at most {MAX_RESTORE_KEYS} restore keys are allowed, got {}",
                restore_keys.len()
            )));
        }
        for key in restore_keys {
            validate_key(key)?;
        }

        let version_dir = self.root.join(paths_version(paths));
        let store = self.clone();
        let primary_key = primary_key.to_string();
        let restore_keys = restore_keys.to_vec();
        let restored = tokio::task::spawn_blocking(move || {
            let Some((matched, archive)) =
                store.find_archive(&version_dir, &primary_key, &restore_keys)?
            else {
                return Ok(None);
            };
            let count = store.unpack(&archive)?;
            Ok::<_, Error>(Some((matched, count)))
        })
        .await
        .map_err(|e| Error::store(format!("restore task failed: {e}")))??;

        Ok(restored.map(|(matched, count)| {
            tracing::debug!(key = %matched, files = count, "Unpacked cache archive");
            matched
        }))
    }

    async fn save(&self, paths: &[String], key: &str) -> Result<()> {
        validate_paths(paths)?;
        validate_key(key)?;

        let matched = self.globber.expand(paths).await?;

        let version_dir = self.root.join(paths_version(paths));
        let target = self.archive_path(&version_dir, key);
        let store = self.clone();
        let count = tokio::task::spawn_blocking(move || {
            let mut files: Vec<PathBuf> = matched.into_iter().filter(|p| p.is_file()).collect();
            files.sort();
            store.pack(&version_dir, &target, &files)?;
            Ok::<_, Error>(files.len())
        })
        .await
        .map_err(|e| Error::store(format!("save task failed: {e}")))??;
        tracing::debug!(key, files = count, "Stored cache archive");
        Ok(())
    }
}
