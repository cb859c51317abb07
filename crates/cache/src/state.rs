//! Job-scoped state shared between the restore and save invocations
//!
//! Restore runs before the build and save runs after it, in separate
//! processes of the same job. Anything save needs to know about restore goes
//! through a [`JobState`] store.

use crate::{Error, Result};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Key/value store that survives between process invocations of one job
pub trait JobState: Send + Sync {
    /// Read `name`, returning an empty string when unset
    fn get(&self, name: &str) -> Result<String>;

    /// Persist `value` under `name`
    fn set(&self, name: &str, value: &str) -> Result<()>;
}

fn poisoned<T>(_: T) -> Error {
    Error::state("state lock poisoned")
}

/// In-process state, for tests and single-invocation runs
#[derive(Debug, Default)]
pub struct MemoryState {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryState {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobState for MemoryState {
    fn get(&self, name: &str) -> Result<String> {
        let values = self.values.lock().map_err(poisoned)?;
        Ok(values.get(name).cloned().unwrap_or_default())
    }

    fn set(&self, name: &str, value: &str) -> Result<()> {
        let mut values = self.values.lock().map_err(poisoned)?;
        values.insert(name.to_string(), value.to_string());
        Ok(())
    }
}

/// GitHub Actions state: values saved by an earlier step of the job are
/// exposed as `STATE_<name>` environment variables, new values are appended
/// to the file named by `GITHUB_STATE`.
#[derive(Debug)]
pub struct ActionsState {
    state_file: PathBuf,
    values: Mutex<HashMap<String, String>>,
}

impl ActionsState {
    /// Environment variable prefix for saved state
    pub const ENV_PREFIX: &'static str = "STATE_";

    /// Create a store writing to `state_file` with previously saved `values`
    #[must_use]
    pub fn new(state_file: impl Into<PathBuf>, values: HashMap<String, String>) -> Self {
        Self {
            state_file: state_file.into(),
            values: Mutex::new(values),
        }
    }

    /// Build from the current process environment
    pub fn from_env() -> Result<Self> {
        let state_file = std::env::var_os("GITHUB_STATE")
            .filter(|v| !v.is_empty())
            .ok_or_else(|| Error::state("GITHUB_STATE is not set"))?;
        let values = std::env::vars()
            .filter_map(|(k, v)| {
                k.strip_prefix(Self::ENV_PREFIX)
                    .map(|name| (name.to_string(), v))
            })
            .collect();
        Ok(Self::new(state_file, values))
    }
}

impl JobState for ActionsState {
    fn get(&self, name: &str) -> Result<String> {
        let values = self.values.lock().map_err(poisoned)?;
        Ok(values.get(name).cloned().unwrap_or_default())
    }

    fn set(&self, name: &str, value: &str) -> Result<()> {
        if name.contains(['=', '\n']) || value.contains('\n') {
            return Err(Error::state(format!(
                "state entry '{name}' must be a single line without '=' in its name"
            )));
        }
        let mut values = self.values.lock().map_err(poisoned)?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.state_file)
            .map_err(|e| Error::io(e, &self.state_file, "open"))?;
        writeln!(file, "{name}={value}").map_err(|e| Error::io(e, &self.state_file, "append"))?;
        values.insert(name.to_string(), value.to_string());
        Ok(())
    }
}

/// Directory-backed state for running outside of GitHub Actions.
///
/// The directory must be unique per job; one JSON document holds all values.
#[derive(Debug)]
pub struct DirState {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl DirState {
    const FILE_NAME: &'static str = "state.json";

    /// Open (or create) the state stored in `dir`
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir).map_err(|e| Error::io(e, dir, "create_dir_all"))?;
        let path = dir.join(Self::FILE_NAME);
        let values = match fs::read_to_string(&path) {
            Ok(json) => serde_json::from_str(&json).map_err(|e| {
                Error::serialization(format!("invalid state file {}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(Error::io(e, &path, "read")),
        };
        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }
}

impl JobState for DirState {
    fn get(&self, name: &str) -> Result<String> {
        let values = self.values.lock().map_err(poisoned)?;
        Ok(values.get(name).cloned().unwrap_or_default())
    }

    fn set(&self, name: &str, value: &str) -> Result<()> {
        let mut values = self.values.lock().map_err(poisoned)?;
        values.insert(name.to_string(), value.to_string());
        let json = serde_json::to_vec_pretty(&*values)
            .map_err(|e| Error::serialization(format!("Failed to serialize state: {e}")))?;
        off_runtime(|| fs::write(&self.path, json)).map_err(|e| Error::io(e, &self.path, "write"))
    }
}

/// Run blocking `f`, moving other tasks off this worker first when called
/// from a multi-threaded runtime
fn off_runtime<T>(f: impl FnOnce() -> T) -> T {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == tokio::runtime::RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}

/// Memoizing accessor for one named state value.
///
/// `get` returns the value cached in this process if there is one, then the
/// stored value, and finally a computed default which is written back unless
/// it is blank.
pub struct StateVariable {
    name: String,
    state: Arc<dyn JobState>,
    cached: Mutex<Option<String>>,
}

impl StateVariable {
    /// Accessor for `name` in `state`
    #[must_use]
    pub fn new(name: impl Into<String>, state: Arc<dyn JobState>) -> Self {
        Self {
            name: name.into(),
            state,
            cached: Mutex::new(None),
        }
    }

    /// State name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    fn cached(&self) -> Result<Option<String>> {
        Ok(self.cached.lock().map_err(poisoned)?.clone())
    }

    fn remember(&self, value: &str) -> Result<()> {
        *self.cached.lock().map_err(poisoned)? = Some(value.to_string());
        Ok(())
    }

    /// Current value, empty when unset
    pub fn get(&self) -> Result<String> {
        self.get_or_else(String::new)
    }

    /// Current value, computing and persisting `default` when unset
    pub fn get_or_else(&self, default: impl FnOnce() -> String) -> Result<String> {
        if let Some(value) = self.cached()? {
            return Ok(value);
        }
        let stored = self.state.get(&self.name)?;
        if !stored.trim().is_empty() {
            self.remember(&stored)?;
            return Ok(stored);
        }
        let value = default();
        self.store_default(&value)?;
        Ok(value)
    }

    /// Async variant of [`StateVariable::get_or_else`]
    pub async fn get_or_init<F, Fut>(&self, default: F) -> Result<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String>>,
    {
        if let Some(value) = self.cached()? {
            return Ok(value);
        }
        let stored = self.state.get(&self.name)?;
        if !stored.trim().is_empty() {
            self.remember(&stored)?;
            return Ok(stored);
        }
        let value = default().await?;
        self.store_default(&value)?;
        Ok(value)
    }

    fn store_default(&self, value: &str) -> Result<()> {
        if value.trim().is_empty() {
            self.remember(value)
        } else {
            self.set(value)
        }
    }

    /// Persist `value` and cache it for this process
    pub fn set(&self, value: &str) -> Result<()> {
        self.state.set(&self.name, value)?;
        self.remember(value)
    }

    /// Boolean view: `Y` is true, anything else false
    pub fn get_bool(&self) -> Result<bool> {
        Ok(self.get()? == "Y")
    }

    /// Persist a boolean as `Y`/`N`
    pub fn set_bool(&self, value: bool) -> Result<()> {
        self.set(if value { "Y" } else { "N" })
    }

    /// Integer view; `None` when unset
    pub fn get_u64(&self) -> Result<Option<u64>> {
        let raw = self.get()?;
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(None);
        }
        raw.parse().map(Some).map_err(|e| {
            Error::state(format!("state '{}' is not a number ({raw}): {e}", self.name))
        })
    }

    /// Persist an integer
    pub fn set_u64(&self, value: u64) -> Result<()> {
        self.set(&value.to_string())
    }
}
