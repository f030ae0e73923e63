//! Durable key-value persistence for learner progress.
//!
//! The core only needs "read a blob by key" and "write a blob by key". `FileStore` keeps
//! one JSON file per key under a data directory; `MemoryStore` backs tests and hosts that
//! persist elsewhere.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, instrument, warn};

pub const PREFS_KEY: &str = "pumpkin:prefs";
pub const ATTEMPTS_KEY: &str = "pumpkin:attempts";
pub const STATES_KEY: &str = "pumpkin:states";

#[derive(Error, Debug)]
pub enum StoreError {
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),

  #[error("JSON error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("store unavailable: {0}")]
  Unavailable(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

pub trait KeyValueStore {
  /// `Ok(None)` when nothing was ever written under `key`.
  fn read(&self, key: &str) -> Result<Option<String>>;
  fn write(&self, key: &str, value: &str) -> Result<()>;
  fn remove(&self, key: &str) -> Result<()>;
}

/// In-process store. Contents vanish with the value.
#[derive(Debug, Default)]
pub struct MemoryStore {
  entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>> {
    self.entries.lock().map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))
  }
}

impl KeyValueStore for MemoryStore {
  fn read(&self, key: &str) -> Result<Option<String>> {
    Ok(self.lock()?.get(key).cloned())
  }

  fn write(&self, key: &str, value: &str) -> Result<()> {
    self.lock()?.insert(key.to_string(), value.to_string());
    Ok(())
  }

  fn remove(&self, key: &str) -> Result<()> {
    self.lock()?.remove(key);
    Ok(())
  }
}

/// One `<key>.json` file per key. Writes go to a temp file that is then renamed over
/// the target, so a crash mid-write leaves the previous blob intact.
#[derive(Debug, Clone)]
pub struct FileStore {
  dir: PathBuf,
}

impl FileStore {
  pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
    let dir = dir.into();
    fs::create_dir_all(&dir)?;
    Ok(Self { dir })
  }

  pub fn dir(&self) -> &Path {
    &self.dir
  }

  fn path_for(&self, key: &str) -> PathBuf {
    let name: String = key
      .chars()
      .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
      .collect();
    self.dir.join(format!("{name}.json"))
  }
}

impl KeyValueStore for FileStore {
  fn read(&self, key: &str) -> Result<Option<String>> {
    match fs::read_to_string(self.path_for(key)) {
      Ok(s) => Ok(Some(s)),
      Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
      Err(e) => Err(e.into()),
    }
  }

  fn write(&self, key: &str, value: &str) -> Result<()> {
    let path = self.path_for(key);
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, value)?;
    fs::rename(&tmp, &path)?;
    Ok(())
  }

  fn remove(&self, key: &str) -> Result<()> {
    match fs::remove_file(self.path_for(key)) {
      Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
      _ => Ok(()),
    }
  }
}

/// Typed read. A missing key yields `fallback`; so does a blob that no longer decodes
/// (logged at warn). Only a failing backend is an error.
#[instrument(level = "debug", target = "store", skip(store, fallback))]
pub fn read_json<S, T>(store: &S, key: &str, fallback: T) -> Result<T>
where
  S: KeyValueStore + ?Sized,
  T: DeserializeOwned,
{
  let Some(raw) = store.read(key)? else {
    debug!(target: "store", key, "No stored value; using fallback");
    return Ok(fallback);
  };
  match serde_json::from_str(&raw) {
    Ok(v) => Ok(v),
    Err(e) => {
      warn!(target: "store", key, error = %e, snippet = %crate::util::trunc_for_log(&raw, 120), "Stored value is corrupt; using fallback");
      Ok(fallback)
    }
  }
}

pub fn write_json<S, T>(store: &S, key: &str, value: &T) -> Result<()>
where
  S: KeyValueStore + ?Sized,
  T: Serialize + ?Sized,
{
  let raw = serde_json::to_string(value)?;
  store.write(key, &raw)?;
  debug!(target: "store", key, bytes = raw.len(), "Stored value");
  Ok(())
}
