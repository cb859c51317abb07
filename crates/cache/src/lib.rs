//! Sharded, content-addressed build caching for CI jobs
//!
//! This crate decides what to restore before a build and what to upload
//! after it:
//! - Cache entries keyed by job, tool version, branch or pull request and tree id
//! - Fallback keys ordered from the current branch to the default branch
//! - Content hashes that skip uploads when nothing changed
//! - A build-cache directory split into sixteen shards keyed by leading hex digit
//!
//! # Phases
//!
//! A job invokes the binary twice. The first invocation restores every
//! cache and records per-entry decisions in job-scoped state; the second
//! one, after the build, reads them back to decide which entries to upload.
//!
//! # Failure handling
//!
//! A cache that is unavailable never fails the build. Store and I/O
//! failures degrade to a cache miss or a skipped upload; only malformed
//! keys and unsupported events abort the job.

// TODO(cache-docs): Add # Errors documentation to all fallible public functions
#![expect(
    clippy::missing_errors_doc,
    reason = "Error documentation to be added incrementally"
)]

pub mod action;
pub mod composite;
pub mod entry;
mod error;
pub mod exec;
pub mod globber;
pub mod hash;
pub mod roots;
pub mod shards;
pub mod state;
pub mod store;
pub mod trigger;

// Re-export error types at crate root
pub use error::{Error, Result};

// Re-export main types
pub use action::{ActionParams, CacheAction, DEFAULT_TOOL_VERSION_FILE, Phase};
pub use composite::CompositeCache;
pub use entry::{Cache, CacheContext, CacheEntry, RestoreOutcome, format_bytes};
pub use exec::{CommandRunner, ExecOutput, ProcessRunner, resolve_tree_id};
pub use globber::{FsGlobber, Globber};
pub use hash::{ContentHash, ContentHasher};
pub use roots::PathRoots;
pub use shards::{BuildCachePartitioner, DEFAULT_BUILD_CACHE_ROOT, SHARD_PREFIXES};
pub use state::{ActionsState, DirState, JobState, MemoryState, StateVariable};
pub use store::{ArchiveStore, LocalArchiveStore, validate_key};
pub use trigger::Trigger;
