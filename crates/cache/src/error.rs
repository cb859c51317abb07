//! Error types for the cache crate

// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]

use miette::Diagnostic;
use std::path::Path;
use thiserror::Error;

/// Error type for cache operations
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// Malformed key or path pattern. Always fatal.
    #[error("Validation error: {message}")]
    #[diagnostic(
        code(shardcache::cache::validation),
        help("Cache keys must be non-empty, at most 512 characters and must not contain commas")
    )]
    Validation {
        /// Error message describing the invalid input
        message: String,
    },

    /// Another writer already claimed the key
    #[error("Unable to reserve cache with key {key}, another job may be creating this cache")]
    #[diagnostic(code(shardcache::cache::reserve))]
    ReserveCache {
        /// The key that could not be reserved
        key: String,
    },

    /// Generic archive store failure
    #[error("Archive store error: {message}")]
    #[diagnostic(code(shardcache::cache::store))]
    Store {
        /// Error message describing the store failure
        message: String,
    },

    /// I/O error during cache operations
    #[error("I/O {operation} failed{}", path.as_ref().map_or(String::new(), |p| format!(": {}", p.display())))]
    #[diagnostic(
        code(shardcache::cache::io),
        help("Check file permissions and ensure the path exists")
    )]
    Io {
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
        /// Path that caused the error, if available
        path: Option<Box<Path>>,
        /// Operation that failed (e.g., "read", "write", "create")
        operation: String,
    },

    /// Invalid glob pattern or failed expansion
    #[error("Glob error in pattern '{pattern}': {message}")]
    #[diagnostic(code(shardcache::cache::glob))]
    Glob {
        /// The offending pattern
        pattern: String,
        /// Error message from the glob engine
        message: String,
    },

    /// Event kind no cache key can be derived from
    #[error("Unknown event {name}")]
    #[diagnostic(
        code(shardcache::cache::unknown_trigger),
        help("Build caches are keyed by branch or pull request; only push and pull_request events are supported")
    )]
    UnknownTrigger {
        /// The event name
        name: String,
    },

    /// Event payload could not be read or parsed
    #[error("Event payload error: {message}")]
    #[diagnostic(code(shardcache::cache::event))]
    Event {
        /// Error message describing the payload issue
        message: String,
    },

    /// External command failed
    #[error("Command `{command}` failed with exit code {exit_code}")]
    #[diagnostic(code(shardcache::cache::command))]
    Command {
        /// The command line that was run
        command: String,
        /// Exit code reported by the process
        exit_code: i32,
    },

    /// Job state could not be read or written
    #[error("Job state error: {message}")]
    #[diagnostic(code(shardcache::cache::state))]
    State {
        /// Error message describing the state issue
        message: String,
    },

    /// Serialization error
    #[error("Serialization error: {message}")]
    #[diagnostic(code(shardcache::cache::serialization))]
    Serialization {
        /// Error message describing the serialization issue
        message: String,
    },
}

impl Error {
    /// Create a validation error
    #[must_use]
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a reservation conflict error
    #[must_use]
    pub fn reserve_cache(key: impl Into<String>) -> Self {
        Self::ReserveCache { key: key.into() }
    }

    /// Create a generic store error
    #[must_use]
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store {
            message: msg.into(),
        }
    }

    /// Create an I/O error with path context
    #[must_use]
    pub fn io(
        source: std::io::Error,
        path: impl AsRef<Path>,
        operation: impl Into<String>,
    ) -> Self {
        Self::Io {
            source,
            path: Some(path.as_ref().into()),
            operation: operation.into(),
        }
    }

    /// Create an I/O error without path context
    #[must_use]
    pub fn io_no_path(source: std::io::Error, operation: impl Into<String>) -> Self {
        Self::Io {
            source,
            path: None,
            operation: operation.into(),
        }
    }

    /// Create a glob error
    #[must_use]
    pub fn glob(pattern: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Glob {
            pattern: pattern.into(),
            message: msg.into(),
        }
    }

    /// Create an unknown trigger error
    #[must_use]
    pub fn unknown_trigger(name: impl Into<String>) -> Self {
        Self::UnknownTrigger { name: name.into() }
    }

    /// Create an event payload error
    #[must_use]
    pub fn event(msg: impl Into<String>) -> Self {
        Self::Event {
            message: msg.into(),
        }
    }

    /// Create a job state error
    #[must_use]
    pub fn state(msg: impl Into<String>) -> Self {
        Self::State {
            message: msg.into(),
        }
    }

    /// Create a serialization error
    #[must_use]
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Returns true for errors that must abort the job instead of degrading
    /// to a cache miss or a skipped upload.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Validation { .. } | Self::UnknownTrigger { .. })
    }
}

/// Result type for cache operations
pub type Result<T> = std::result::Result<T, Error>;
