//! Splitting one build-cache directory into sixteen independently keyed entries
//!
//! Build cache files are named by content hash, so their first character is
//! (almost always) a lowercase hex digit. Keying each leading character
//! separately bounds archive sizes, lets unchanged shards keep their exact
//! match while others update, and lets the shards download and upload
//! concurrently.

use crate::composite::CompositeCache;
use crate::entry::{Cache, CacheContext, CacheEntry};
use crate::trigger::Trigger;
use crate::Result;

/// Leading characters, one shard each
pub const SHARD_PREFIXES: &str = "0123456789abcdef";

/// Default location of Gradle's local build cache
pub const DEFAULT_BUILD_CACHE_ROOT: &str = "~/.gradle/caches/build-cache-*";

/// Name of the composite grouping the shards
pub const BUILD_CACHE_NAME: &str = "build-cache";

/// Builds the shard entries covering a build-cache directory
#[derive(Debug, Clone)]
pub struct BuildCachePartitioner {
    root: String,
}

impl Default for BuildCachePartitioner {
    fn default() -> Self {
        Self::new(DEFAULT_BUILD_CACHE_ROOT)
    }
}

impl BuildCachePartitioner {
    /// Partition the directory (or glob of directories) `root`
    #[must_use]
    pub fn new(root: impl Into<String>) -> Self {
        let root = root.into();
        let root = root.trim_end_matches('/').to_string();
        Self { root }
    }

    /// Directory pattern being partitioned
    #[must_use]
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Path patterns of the shard for `prefix`.
    ///
    /// Shard `0` takes everything not claimed by `1`..`f`, including names
    /// starting with uppercase or non-hex characters.
    #[must_use]
    pub fn shard_patterns(&self, prefix: char) -> Vec<String> {
        let root = &self.root;
        let lock_files = format!("!{root}/*.lock");
        if prefix == '0' {
            let mut patterns = vec![format!("{root}/"), lock_files];
            patterns.extend(
                SHARD_PREFIXES
                    .chars()
                    .filter(|c| *c != '0')
                    .map(|c| format!("!{root}/{c}*")),
            );
            patterns
        } else {
            vec![format!("{root}/{prefix}*"), lock_files]
        }
    }

    /// The sixteen shard entries.
    ///
    /// Fails with [`crate::Error::UnknownTrigger`] before building anything
    /// when the trigger carries no branch identity.
    pub fn shards(
        &self,
        job_id: &str,
        tool_version: &str,
        trigger: &Trigger,
        tree_id: &str,
        ctx: &CacheContext,
    ) -> Result<Vec<CacheEntry>> {
        let identity = trigger.cache_identity()?;
        let fallbacks = trigger.restore_identities()?;

        let shards = SHARD_PREFIXES
            .chars()
            .map(|c| {
                let prefix = format!("shard-{job_id}-{tool_version}-{c}");
                CacheEntry::new(
                    format!("{BUILD_CACHE_NAME}-{c}"),
                    format!("{prefix}-{identity}-{tree_id}"),
                    fallbacks.iter().map(|f| format!("{prefix}-{f}")).collect(),
                    self.shard_patterns(c),
                    ctx.clone(),
                )
            })
            .collect();
        Ok(shards)
    }

    /// The shards grouped into one composite cache
    pub fn partition(
        &self,
        job_id: &str,
        tool_version: &str,
        trigger: &Trigger,
        tree_id: &str,
        ctx: &CacheContext,
    ) -> Result<CompositeCache> {
        let caches = self
            .shards(job_id, tool_version, trigger, tree_id, ctx)?
            .into_iter()
            .map(|entry| Box::new(entry) as Box<dyn Cache>)
            .collect();
        Ok(CompositeCache::new(BUILD_CACHE_NAME, caches))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_shard_patterns() {
        let partitioner = BuildCachePartitioner::new("/cache/");
        assert_eq!(
            partitioner.shard_patterns('a'),
            vec!["/cache/a*", "!/cache/*.lock"]
        );
    }

    #[test]
    fn test_catch_all_shard_excludes_other_prefixes() {
        let patterns = BuildCachePartitioner::new("/cache").shard_patterns('0');
        assert_eq!(patterns.len(), 17);
        assert_eq!(patterns[0], "/cache/");
        assert_eq!(patterns[1], "!/cache/*.lock");
        assert_eq!(patterns[2], "!/cache/1*");
        assert_eq!(patterns[16], "!/cache/f*");
        assert!(!patterns.contains(&"!/cache/0*".to_string()));
    }

    #[test]
    fn test_default_root() {
        assert_eq!(
            BuildCachePartitioner::default().root(),
            "~/.gradle/caches/build-cache-*"
        );
    }
}
