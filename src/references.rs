//! Durable name → id mappings that sit next to the record store.
//!
//! Each logical cache is one JSON file. Mutations only touch memory until
//! [`PersistentMap::flush`] atomically replaces the file, so a crash loses at
//! most the unflushed batch and never corrupts what was flushed before.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::PathBuf;

use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{CatalogError, Result};

/// A string → string mapping persisted as a JSON object.
#[derive(Debug)]
pub struct PersistentMap {
    path: PathBuf,
    entries: BTreeMap<String, String>,
    dirty: bool,
}

impl PersistentMap {
    /// Loads the mapping, starting empty when the file does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = match fs::read(&path) {
            Ok(raw) => serde_json::from_slice(&raw)
                .map_err(|err| CatalogError::corruption(path.display().to_string(), err))?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => return Err(err.into()),
        };
        Ok(Self {
            path,
            entries,
            dirty: false,
        })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        if self.entries.get(&key) != Some(&value) {
            self.entries.insert(key, value);
            self.dirty = true;
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let removed = self.entries.remove(key);
        self.dirty |= removed.is_some();
        removed
    }

    /// Keeps only the entries for which `keep(key, value)` holds and returns
    /// how many were dropped.
    pub fn retain(&mut self, mut keep: impl FnMut(&str, &str) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, value| keep(key, value));
        let removed = before - self.entries.len();
        self.dirty |= removed > 0;
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Writes the mapping to a sibling temp file, syncs it and renames it over
    /// the previous version. A no-op when nothing changed.
    pub fn flush(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)?;

        let mut tmp = NamedTempFile::new_in(&parent)?;
        serde_json::to_writer(&mut tmp, &self.entries)?;
        tmp.flush()?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|err| err.error)?;

        self.dirty = false;
        debug!("flushed {} entries to {}", self.entries.len(), self.path.display());
        Ok(())
    }
}

/// The two reference namespaces: category id → category name, and channel
/// display name or uploads-list id → canonical channel id.
///
/// Owned by the caller and handed to the coordinator, so the caller decides
/// when the files are opened and dropped.
#[derive(Debug)]
pub struct ReferenceCache {
    categories: PersistentMap,
    channels: PersistentMap,
}

impl ReferenceCache {
    pub fn open(category_path: impl Into<PathBuf>, channel_path: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            categories: PersistentMap::open(category_path)?,
            channels: PersistentMap::open(channel_path)?,
        })
    }

    pub fn category_name(&self, category_id: &str) -> Option<&str> {
        self.categories.get(category_id)
    }

    /// Records a batch of category names and flushes them.
    pub fn store_categories<I, K, V>(&mut self, categories: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (id, name) in categories {
            self.categories.insert(id, name);
        }
        self.categories.flush()
    }

    pub fn channel_for(&self, alias: &str) -> Option<&str> {
        self.channels.get(alias)
    }

    /// Maps a display name or uploads-list id to a channel id. Call
    /// [`ReferenceCache::flush_channels`] once the batch is complete.
    pub fn register_channel(&mut self, alias: impl Into<String>, channel_id: impl Into<String>) {
        self.channels.insert(alias, channel_id);
    }

    pub fn flush_channels(&mut self) -> Result<()> {
        self.channels.flush()
    }

    /// Drops every channel reference whose target is not in `live`, then
    /// flushes. Returns the number of dropped references.
    pub fn retain_channels(&mut self, live: &HashSet<String>) -> Result<usize> {
        let removed = self.channels.retain(|_, channel_id| live.contains(channel_id));
        self.channels.flush()?;
        Ok(removed)
    }
}
