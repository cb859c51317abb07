//! Job orchestration: build the cache tree and run the phase for this invocation

use crate::composite::CompositeCache;
use crate::entry::{Cache, CacheContext};
use crate::exec::{CommandRunner, resolve_tree_id};
use crate::shards::{BuildCachePartitioner, DEFAULT_BUILD_CACHE_ROOT};
use crate::state::StateVariable;
use crate::trigger::Trigger;
use crate::Result;
use std::fmt;
use std::sync::Arc;

/// Default file whose contents identify the build tool version
pub const DEFAULT_TOOL_VERSION_FILE: &str = "gradle/wrapper/gradle-wrapper.properties";

const TOOL_VERSION_STATE: &str = "toolVersion";
const POST_STATE: &str = "POST";
const ALL_CACHES_NAME: &str = "all-caches";

/// Job phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Restore on the first invocation of the job, save on the next one
    Auto,
    /// Restore before the build
    Restore,
    /// Save after the build
    Save,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Restore => write!(f, "restore"),
            Self::Save => write!(f, "save"),
        }
    }
}

/// What the job caches and how entries are keyed
#[derive(Debug, Clone)]
pub struct ActionParams {
    /// Identifier of the job; part of every key
    pub job_id: String,
    /// Whether the local build cache is restored and saved
    pub local_build_cache: bool,
    /// Build cache directory (glob) to partition
    pub build_cache_root: String,
    /// File identifying the build tool version
    pub tool_version_file: String,
}

impl ActionParams {
    /// Defaults for `job_id`
    #[must_use]
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            local_build_cache: true,
            build_cache_root: DEFAULT_BUILD_CACHE_ROOT.to_string(),
            tool_version_file: DEFAULT_TOOL_VERSION_FILE.to_string(),
        }
    }
}

/// Restores or saves every configured cache of a job
pub struct CacheAction {
    trigger: Trigger,
    params: ActionParams,
    ctx: CacheContext,
    runner: Arc<dyn CommandRunner>,
}

impl CacheAction {
    /// Create the action for `trigger`
    #[must_use]
    pub fn new(
        trigger: Trigger,
        params: ActionParams,
        ctx: CacheContext,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            trigger,
            params,
            ctx,
            runner,
        }
    }

    /// Fingerprint of the build tool, computed once per job
    pub async fn tool_version(&self) -> Result<String> {
        let file = self.params.tool_version_file.clone();
        StateVariable::new(TOOL_VERSION_STATE, self.ctx.state.clone())
            .get_or_init(|| async move {
                let hash = self.ctx.hasher.hash(&[file]).await?;
                Ok(hash.hash)
            })
            .await
    }

    /// Assemble the cache tree for this job
    pub async fn build(&self) -> Result<CompositeCache> {
        let tool_version = self.tool_version().await?;
        let mut caches: Vec<Box<dyn Cache>> = Vec::new();

        if self.params.local_build_cache {
            self.trigger.ensure_supported()?;
            let tree_id = resolve_tree_id(&self.trigger, self.runner.as_ref()).await?;
            tracing::debug!(tree_id = %tree_id, "Using tree id of {tree_id}");

            let build_cache = BuildCachePartitioner::new(&self.params.build_cache_root).partition(
                &self.params.job_id,
                &tool_version,
                &self.trigger,
                &tree_id,
                &self.ctx,
            )?;
            caches.push(Box::new(build_cache));
        }

        Ok(CompositeCache::new(ALL_CACHES_NAME, caches))
    }

    /// Run `phase`, returning the phase that actually ran
    pub async fn run(&self, phase: Phase) -> Result<Phase> {
        let cache = self.build().await?;
        let post = StateVariable::new(POST_STATE, self.ctx.state.clone());

        let phase = match phase {
            Phase::Auto if post.get_bool()? => Phase::Save,
            Phase::Auto => Phase::Restore,
            explicit => explicit,
        };

        tracing::info!(
            trigger = self.trigger.name(),
            job = %self.params.job_id,
            caches = cache.len(),
            %phase,
            "Running cache phase"
        );
        match phase {
            Phase::Save => cache.save().await?,
            _ => {
                post.set_bool(true)?;
                cache.restore().await?;
            }
        }
        Ok(phase)
    }
}
