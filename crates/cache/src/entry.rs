//! Single cache entry restore/save state machine

use crate::hash::ContentHasher;
use crate::state::{JobState, StateVariable};
use crate::store::ArchiveStore;
use crate::{Error, Result};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// Outcome of a restore
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// Nothing was restored
    None,
    /// Restored from a fallback key
    Partial(String),
    /// Restored from the primary key
    Exact(String),
    /// Aggregate of several caches; individual outcomes are not tracked
    Unknown,
}

impl fmt::Display for RestoreOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Partial(key) => write!(f, "partial ({key})"),
            Self::Exact(key) => write!(f, "exact ({key})"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Something that can be restored before a build and saved after it
#[async_trait]
pub trait Cache: Send + Sync {
    /// Name used in logs and state keys
    fn name(&self) -> &str;

    /// Restore cached contents
    async fn restore(&self) -> Result<RestoreOutcome>;

    /// Save contents if they changed
    async fn save(&self) -> Result<()>;
}

/// Collaborators every cache entry of a job shares
#[derive(Clone)]
pub struct CacheContext {
    /// Archive store
    pub store: Arc<dyn ArchiveStore>,
    /// Content hasher
    pub hasher: Arc<ContentHasher>,
    /// Job-scoped state
    pub state: Arc<dyn JobState>,
}

impl CacheContext {
    /// Bundle the collaborators
    #[must_use]
    pub fn new(
        store: Arc<dyn ArchiveStore>,
        hasher: Arc<ContentHasher>,
        state: Arc<dyn JobState>,
    ) -> Self {
        Self {
            store,
            hasher,
            state,
        }
    }
}

/// One independently keyed cache.
///
/// Restore records whether the primary key matched and, for fallback
/// matches, the hash of what was restored. Save uses those records to skip
/// uploads that would not change anything.
pub struct CacheEntry {
    name: String,
    primary_key: String,
    restore_keys: Vec<String>,
    path_patterns: Vec<String>,
    ctx: CacheContext,
    is_exact_match: StateVariable,
    restored_hash: StateVariable,
    restored_bytes: StateVariable,
}

impl CacheEntry {
    /// Create an entry; state is stored under `<name>_exact`, `<name>_hash` and `<name>_bytes`
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        primary_key: impl Into<String>,
        restore_keys: Vec<String>,
        path_patterns: Vec<String>,
        ctx: CacheContext,
    ) -> Self {
        let name = name.into();
        let is_exact_match = StateVariable::new(format!("{name}_exact"), ctx.state.clone());
        let restored_hash = StateVariable::new(format!("{name}_hash"), ctx.state.clone());
        let restored_bytes = StateVariable::new(format!("{name}_bytes"), ctx.state.clone());
        Self {
            name,
            primary_key: primary_key.into(),
            restore_keys,
            path_patterns,
            ctx,
            is_exact_match,
            restored_hash,
            restored_bytes,
        }
    }

    /// Key the entry is saved under
    #[must_use]
    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    /// Fallback keys, most specific first
    #[must_use]
    pub fn restore_keys(&self) -> &[String] {
        &self.restore_keys
    }

    /// Patterns selecting the cached files
    #[must_use]
    pub fn path_patterns(&self) -> &[String] {
        &self.path_patterns
    }

    async fn restore_from_store(&self) -> Result<RestoreOutcome> {
        let result = self
            .ctx
            .store
            .restore(&self.path_patterns, &self.primary_key, &self.restore_keys)
            .await;
        match result {
            Ok(Some(matched)) => {
                info!(cache = %self.name, "Restored from {matched}");
                if matched == self.primary_key {
                    Ok(RestoreOutcome::Exact(matched))
                } else {
                    Ok(RestoreOutcome::Partial(matched))
                }
            }
            Ok(None) => {
                info!(
                    cache = %self.name,
                    "Cache was not found for {}, restore keys: {}",
                    self.primary_key,
                    self.restore_keys.join(", ")
                );
                Ok(RestoreOutcome::None)
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!(cache = %self.name, "Error while loading {}: {e}", self.primary_key);
                Ok(RestoreOutcome::None)
            }
        }
    }

    async fn upload(&self) -> Result<()> {
        match self
            .ctx
            .store
            .save(&self.path_patterns, &self.primary_key)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if e.is_fatal() => Err(e),
            Err(e @ Error::ReserveCache { .. }) => {
                info!(cache = %self.name, "{e}");
                Ok(())
            }
            Err(e) => {
                warn!(cache = %self.name, "Error while uploading {}: {e}", self.primary_key);
                Ok(())
            }
        }
    }
}

#[async_trait]
impl Cache for CacheEntry {
    fn name(&self) -> &str {
        &self.name
    }

    async fn restore(&self) -> Result<RestoreOutcome> {
        info!(cache = %self.name, "Restoring {}", self.name);
        let outcome = self.restore_from_store().await?;
        self.is_exact_match
            .set_bool(matches!(outcome, RestoreOutcome::Exact(_)))?;

        // Only fallback matches need a baseline; exact matches never upload.
        if matches!(outcome, RestoreOutcome::Partial(_)) {
            match self.ctx.hasher.hash(&self.path_patterns).await {
                Ok(restored) => {
                    self.restored_hash.set(&restored.hash)?;
                    self.restored_bytes.set_u64(restored.total_bytes)?;
                }
                Err(e) => {
                    warn!(cache = %self.name, "Failed to hash restored contents: {e}");
                }
            }
        }
        Ok(outcome)
    }

    async fn save(&self) -> Result<()> {
        if self.is_exact_match.get_bool()? {
            info!(
                cache = %self.name,
                "{} loaded from exact match, no need to update the cache entry", self.name
            );
            return Ok(());
        }

        let fresh = match self.ctx.hasher.hash(&self.path_patterns).await {
            Ok(fresh) => fresh,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(cache = %self.name, "Failed to hash cache contents, skipping upload: {e}");
                return Ok(());
            }
        };
        if fresh.file_count == 0 {
            info!(
                cache = %self.name,
                "{}: no files to cache => won't upload empty cache", self.name
            );
            return Ok(());
        }

        let restored_hash = self.restored_hash.get()?;
        if !restored_hash.trim().is_empty() {
            info!(cache = %self.name, "{}: comparing modifications of the cache contents", self.name);
            if fresh.hash == restored_hash {
                info!(
                    cache = %self.name,
                    "{}: contents did not change => no need to upload it", self.name
                );
                return Ok(());
            }
            if let Some(restored_bytes) = self.restored_bytes.get_u64()? {
                let (delta, direction) = if fresh.total_bytes >= restored_bytes {
                    (fresh.total_bytes - restored_bytes, "increase")
                } else {
                    (restored_bytes - fresh.total_bytes, "decrease")
                };
                info!(
                    cache = %self.name,
                    "{}: hash content differs ({delta} bytes {direction})", self.name
                );
            }
        }

        info!(
            cache = %self.name,
            "{}: uploading {}, {} files",
            self.name,
            format_bytes(fresh.total_bytes),
            fresh.file_count
        );
        self.upload().await
    }
}

/// Human readable byte count
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut unit = 0;
    let mut whole = bytes;
    let mut remainder = 0;
    while whole >= 1024 && unit < UNITS.len() - 1 {
        remainder = whole % 1024;
        whole /= 1024;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} {}", UNITS[0])
    } else {
        format!("{whole}.{} {}", remainder * 10 / 1024, UNITS[unit])
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1024), "1.0 KiB");
        assert_eq!(format_bytes(1536), "1.5 KiB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MiB");
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(RestoreOutcome::None.to_string(), "none");
        assert_eq!(
            RestoreOutcome::Partial("k".into()).to_string(),
            "partial (k)"
        );
        assert_eq!(RestoreOutcome::Unknown.to_string(), "unknown");
    }
}
