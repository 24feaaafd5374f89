//! Local key-value preference store.
//!
//! The store keeps a snapshot of all preferences in memory, serializes edits
//! through an async mutex and publishes every committed snapshot on a watch
//! channel, so subscribers always see the latest value first.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, instrument};

use crate::error::{FxError, FxResult};

/// A single stored value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PreferenceValue {
    String(String),
    StringSet(BTreeSet<String>),
}

/// Snapshot of every stored preference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    values: BTreeMap<String, PreferenceValue>,
}

impl Preferences {
    /// Get a string value. Fails if the key holds a different type.
    pub fn get_string(&self, key: &str) -> FxResult<Option<&str>> {
        match self.values.get(key) {
            None => Ok(None),
            Some(PreferenceValue::String(s)) => Ok(Some(s)),
            Some(_) => Err(FxError::Serialization(format!(
                "Preference {} is not a string",
                key
            ))),
        }
    }

    /// Get a string set value. Fails if the key holds a different type.
    pub fn get_string_set(&self, key: &str) -> FxResult<Option<&BTreeSet<String>>> {
        match self.values.get(key) {
            None => Ok(None),
            Some(PreferenceValue::StringSet(set)) => Ok(Some(set)),
            Some(_) => Err(FxError::Serialization(format!(
                "Preference {} is not a string set",
                key
            ))),
        }
    }

    pub fn set_string(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values
            .insert(key.into(), PreferenceValue::String(value.into()));
    }

    pub fn set_string_set(&mut self, key: impl Into<String>, value: BTreeSet<String>) {
        self.values
            .insert(key.into(), PreferenceValue::StringSet(value));
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Durable storage behind a [`PreferenceStore`].
#[async_trait]
pub trait PreferenceBackend: Send + Sync {
    /// Get the backend name.
    fn name(&self) -> &str;

    /// Load the persisted preferences. Missing storage yields empty preferences.
    async fn load(&self) -> FxResult<Preferences>;

    /// Persist a full snapshot.
    async fn save(&self, preferences: &Preferences) -> FxResult<()>;
}

/// Backend storing preferences as a JSON file.
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    /// Create a backend for the given file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Create a backend in the platform config directory.
    pub fn in_config_dir() -> FxResult<Self> {
        Ok(Self::new(Self::default_path()?))
    }

    /// Get the default store path, e.g. `~/.config/fxtracker/store.json`.
    pub fn default_path() -> FxResult<PathBuf> {
        let dirs = directories::ProjectDirs::from("com", "fxtracker", "fxtracker").ok_or_else(
            || FxError::Storage("Could not determine config directory".to_string()),
        )?;
        Ok(dirs.config_dir().join("store.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl PreferenceBackend for FileBackend {
    fn name(&self) -> &str {
        "file"
    }

    async fn load(&self) -> FxResult<Preferences> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No preference file, starting empty");
                return Ok(Preferences::default());
            }
            Err(e) => {
                return Err(FxError::Storage(format!(
                    "Failed to read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        if content.trim().is_empty() {
            return Ok(Preferences::default());
        }

        serde_json::from_str(&content).map_err(|e| {
            FxError::Serialization(format!("Failed to parse {}: {}", self.path.display(), e))
        })
    }

    async fn save(&self, preferences: &Preferences) -> FxResult<()> {
        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                FxError::Storage(format!("Failed to create {}: {}", dir.display(), e))
            })?;
        }

        let content = serde_json::to_string_pretty(preferences)?;

        // Write then rename so a crash never leaves a truncated file behind.
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content).await.map_err(|e| {
            FxError::Storage(format!("Failed to write {}: {}", tmp.display(), e))
        })?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(|e| {
            FxError::Storage(format!("Failed to replace {}: {}", self.path.display(), e))
        })?;

        Ok(())
    }
}

/// Backend keeping preferences in memory only.
#[derive(Default)]
pub struct MemoryBackend {
    preferences: parking_lot::Mutex<Preferences>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the last saved snapshot.
    pub fn saved(&self) -> Preferences {
        self.preferences.lock().clone()
    }
}

#[async_trait]
impl PreferenceBackend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    async fn load(&self) -> FxResult<Preferences> {
        Ok(self.preferences.lock().clone())
    }

    async fn save(&self, preferences: &Preferences) -> FxResult<()> {
        *self.preferences.lock() = preferences.clone();
        Ok(())
    }
}

/// Observable preference store with serialized edits.
pub struct PreferenceStore {
    backend: Arc<dyn PreferenceBackend>,
    edit_lock: Mutex<()>,
    snapshot_tx: watch::Sender<Arc<Preferences>>,
}

impl PreferenceStore {
    /// Open a store, loading the current snapshot from the backend.
    #[instrument(skip(backend), fields(backend = backend.name()))]
    pub async fn open(backend: Arc<dyn PreferenceBackend>) -> FxResult<Self> {
        let preferences = backend.load().await?;
        debug!(keys = preferences.len(), "Preference store opened");
        Ok(Self::with_snapshot(backend, preferences))
    }

    /// Create an empty store that is never persisted.
    pub fn in_memory() -> Self {
        Self::with_snapshot(Arc::new(MemoryBackend::new()), Preferences::default())
    }

    fn with_snapshot(backend: Arc<dyn PreferenceBackend>, preferences: Preferences) -> Self {
        let (snapshot_tx, _) = watch::channel(Arc::new(preferences));
        Self {
            backend,
            edit_lock: Mutex::new(()),
            snapshot_tx,
        }
    }

    /// Get the current snapshot.
    pub fn snapshot(&self) -> Arc<Preferences> {
        self.snapshot_tx.borrow().clone()
    }

    /// Subscribe to snapshots. The current snapshot is marked as seen.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Preferences>> {
        self.snapshot_tx.subscribe()
    }

    /// Stream of snapshots, starting with the current one.
    pub fn data(&self) -> impl Stream<Item = Arc<Preferences>> + Send + 'static {
        WatchStream::new(self.subscribe())
    }

    /// Apply an edit atomically with respect to other edits.
    ///
    /// The edited snapshot is persisted before it is published. If `edit` or
    /// the backend fails, nothing is published.
    pub async fn edit<F>(&self, edit: F) -> FxResult<()>
    where
        F: FnOnce(&mut Preferences) -> FxResult<()>,
    {
        let _guard = self.edit_lock.lock().await;

        let current = self.snapshot();
        let mut next = (*current).clone();
        edit(&mut next)?;

        if next == *current {
            return Ok(());
        }

        self.backend.save(&next).await?;
        self.snapshot_tx.send_replace(Arc::new(next));
        Ok(())
    }
}

/// Drop items equal to the previously emitted one.
///
/// Snapshots are published for every edit, so views derived from a single
/// key would otherwise repeat themselves when unrelated keys change.
pub fn distinct_until_changed<S, T>(stream: S) -> impl Stream<Item = T>
where
    S: Stream<Item = T>,
    T: Clone + PartialEq,
{
    let mut last: Option<T> = None;
    stream.filter_map(move |item| {
        let changed = last.as_ref() != Some(&item);
        if changed {
            last = Some(item.clone());
        }
        futures::future::ready(changed.then_some(item))
    })
}
