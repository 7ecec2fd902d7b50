// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::{BTreeMap, HashSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::CacheError;
use crate::location::AssetLocation;

use super::atomic::write_atomic;
use super::entry::CacheEntry;

/// Map from asset location to cache entry, persisted as one JSON document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetCacheStore {
    entries: BTreeMap<AssetLocation, CacheEntry>,
}

impl AssetCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the store from `path`
    ///
    /// A missing document is not an error and yields an empty store.
    pub async fn load(path: &Path) -> Result<Self, CacheError> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(CacheError::ReadFailed {
                    path: path.to_path_buf(),
                    source: e,
                });
            }
        };

        serde_json::from_str(&content).map_err(|e| CacheError::JsonParseFailed {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Write the whole store to `path`, creating its directory if needed
    pub async fn persist(&self, path: &Path) -> Result<(), CacheError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CacheError::CreateDirectoryFailed {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }

        let json = serde_json::to_string_pretty(self)?;
        write_atomic(path, json.as_bytes())
            .await
            .map_err(|e| CacheError::WriteFailed {
                path: path.to_path_buf(),
                source: e,
            })
    }

    pub fn lookup(&self, location: &AssetLocation) -> Option<&CacheEntry> {
        self.entries.get(location)
    }

    /// Insert or replace the entry for `entry.location`
    pub fn put(&mut self, entry: CacheEntry) {
        self.entries.insert(entry.location.clone(), entry);
    }

    pub fn remove(&mut self, location: &AssetLocation) -> Option<CacheEntry> {
        self.entries.remove(location)
    }

    /// Drop every entry not in `keep`, deleting its file
    ///
    /// File deletion is best-effort: failures are logged and the entry is
    /// removed anyway. A file still referenced by a kept entry is left in
    /// place. Returns the removed entries.
    pub async fn prune(&mut self, keep: &HashSet<AssetLocation>) -> Vec<CacheEntry> {
        let stale: Vec<AssetLocation> = self
            .entries
            .keys()
            .filter(|location| !keep.contains(*location))
            .cloned()
            .collect();

        let removed: Vec<CacheEntry> = stale
            .iter()
            .filter_map(|location| self.entries.remove(location))
            .collect();

        let referenced: HashSet<PathBuf> = self
            .entries
            .values()
            .map(|entry| entry.local_path.clone())
            .collect();

        for entry in &removed {
            let location = &entry.location;
            if referenced.contains(&entry.local_path) {
                tracing::debug!(%location, path = %entry.local_path.display(), "stale asset file still in use");
                continue;
            }

            match tokio::fs::remove_file(&entry.local_path).await {
                Ok(()) => {
                    tracing::debug!(%location, path = %entry.local_path.display(), "deleted stale asset")
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => tracing::warn!(
                    %location,
                    path = %entry.local_path.display(),
                    "failed to delete stale asset: {e}"
                ),
            }
        }

        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in location order
    pub fn entries(&self) -> impl Iterator<Item = &CacheEntry> {
        self.entries.values()
    }

    pub fn contains(&self, location: &AssetLocation) -> bool {
        self.entries.contains_key(location)
    }
}
