//! Shared fixtures for the integration tests

#![allow(dead_code, clippy::unwrap_used)]

use async_trait::async_trait;
use shardcache_cache::{
    ArchiveStore, CacheContext, CommandRunner, ContentHasher, Error, ExecOutput, FsGlobber,
    JobState, MemoryState, PathRoots, Result,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// How a [`RecordingStore`] answers restores
#[derive(Debug, Clone)]
pub enum RestoreScript {
    /// Nothing matches
    Miss,
    /// The primary key matches
    Exact,
    /// The restore key at this index matches
    Fallback(usize),
    /// The store is unreachable
    Unavailable,
    /// The store rejects the request
    Invalid,
}

/// How a [`RecordingStore`] answers saves
#[derive(Debug, Clone, Copy)]
pub enum SaveScript {
    Ok,
    Reserved,
    Unavailable,
    Invalid,
}

/// Archive store that records calls and answers from a script
pub struct RecordingStore {
    restore: RestoreScript,
    save: SaveScript,
    pub restores: Mutex<Vec<String>>,
    pub saves: Mutex<Vec<String>>,
}

impl RecordingStore {
    pub fn new(restore: RestoreScript, save: SaveScript) -> Self {
        Self {
            restore,
            save,
            restores: Mutex::new(Vec::new()),
            saves: Mutex::new(Vec::new()),
        }
    }

    pub fn save_attempts(&self) -> Vec<String> {
        self.saves.lock().unwrap().clone()
    }
}

#[async_trait]
impl ArchiveStore for RecordingStore {
    async fn restore(
        &self,
        _paths: &[String],
        primary_key: &str,
        restore_keys: &[String],
    ) -> Result<Option<String>> {
        self.restores.lock().unwrap().push(primary_key.to_string());
        match &self.restore {
            RestoreScript::Miss => Ok(None),
            RestoreScript::Exact => Ok(Some(primary_key.to_string())),
            RestoreScript::Fallback(i) => Ok(Some(format!("{}-older", restore_keys[*i]))),
            RestoreScript::Unavailable => Err(Error::store("connection reset")),
            RestoreScript::Invalid => Err(Error::validation("bad key")),
        }
    }

    async fn save(&self, _paths: &[String], key: &str) -> Result<()> {
        self.saves.lock().unwrap().push(key.to_string());
        match self.save {
            SaveScript::Ok => Ok(()),
            SaveScript::Reserved => Err(Error::reserve_cache(key)),
            SaveScript::Unavailable => Err(Error::store("upload failed")),
            SaveScript::Invalid => Err(Error::validation("bad key")),
        }
    }
}

/// A workspace with job state, a hasher and a store
pub struct Fixture {
    pub workspace: TempDir,
    pub state: Arc<MemoryState>,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            workspace: TempDir::new().unwrap(),
            state: Arc::new(MemoryState::new()),
        }
    }

    pub fn path(&self) -> &Path {
        self.workspace.path()
    }

    pub fn write(&self, rel: &str, body: &str) -> PathBuf {
        let path = self.workspace.path().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, body).unwrap();
        path
    }

    pub fn hasher(&self) -> Arc<ContentHasher> {
        Arc::new(ContentHasher::new(
            Arc::new(FsGlobber::new(self.path(), None)),
            PathRoots::new(self.path(), None),
        ))
    }

    pub fn ctx(&self, store: Arc<dyn ArchiveStore>) -> CacheContext {
        let state: Arc<dyn JobState> = self.state.clone();
        CacheContext::new(store, self.hasher(), state)
    }

    pub fn state_value(&self, name: &str) -> String {
        self.state.get(name).unwrap()
    }
}

/// Command runner answering every command with the same output
pub struct FixedRunner {
    pub stdout: String,
    pub calls: Mutex<Vec<String>>,
}

impl FixedRunner {
    pub fn new(stdout: &str) -> Self {
        Self {
            stdout: stdout.to_string(),
            calls: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl CommandRunner for FixedRunner {
    async fn exec(&self, command: &str, args: &[&str]) -> Result<ExecOutput> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("{command} {}", args.join(" ")));
        Ok(ExecOutput {
            exit_code: 0,
            stdout: self.stdout.clone(),
        })
    }
}
