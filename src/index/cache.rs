//! In-memory offset cache with an optional sidecar file per data file.
//!
//! The cache is an optimization only: a miss means "ask the catalog", never "the table is
//! empty". Entries are positional (entry `i` is the `i`-th active row in logical order).

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::io::sidecar::{self, SidecarIndex};
use crate::now_millis;
use crate::types::{RowLocation, StoreOptions};

/// Cached location of one row. A zero timestamp marks the row stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheEntry {
    pub location: RowLocation,
    pub timestamp: i64,
}

impl CacheEntry {
    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.timestamp == 0
    }
}

#[derive(Debug, Default)]
struct CacheState {
    files: HashMap<PathBuf, Vec<CacheEntry>>,
    // Insertion order, oldest first.
    order: VecDeque<PathBuf>,
}

impl CacheState {
    fn remove(&mut self, path: &Path) {
        self.files.remove(path);
        self.order.retain(|cached| cached != path);
    }

    fn insert(&mut self, path: &Path, entries: Vec<CacheEntry>, max_files: usize) {
        self.remove(path);
        while self.files.len() >= max_files.max(1) {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            tracing::debug!(cache.evicted = %oldest.display(), "offset cache full; evicting");
            self.files.remove(&oldest);
        }
        self.files.insert(path.to_path_buf(), entries);
        self.order.push_back(path.to_path_buf());
    }
}

/// Offset cache shared by every table handle of a process.
#[derive(Debug)]
pub struct OffsetCache {
    state: Mutex<CacheState>,
    max_files: usize,
    partial_limit: usize,
    write_sidecar: bool,
}

impl Default for OffsetCache {
    fn default() -> Self {
        Self::new(&StoreOptions::default())
    }
}

impl OffsetCache {
    #[must_use]
    pub fn new(options: &StoreOptions) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            max_files: options.max_cached_files,
            partial_limit: options.partial_invalidation_limit,
            write_sidecar: options.write_sidecar,
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cached entries for `path`, or an empty list when nothing trustworthy is cached.
    ///
    /// A memory entry is trusted only if some row carries a nonzero timestamp and the
    /// newest one is not older than `file_mtime`; otherwise it is discarded. Without a
    /// memory entry the sidecar is consulted under the same rule.
    pub fn get(&self, path: &Path, file_mtime: i64) -> Vec<CacheEntry> {
        let mut state = self.lock();
        if let Some(entries) = state.files.get(path) {
            let created = entries.iter().map(|entry| entry.timestamp).max().unwrap_or(0);
            if created != 0 && created >= file_mtime {
                return entries.clone();
            }
            tracing::debug!(
                cache.path = %path.display(),
                cache.created = created,
                cache.file_mtime = file_mtime,
                "offset cache outdated; discarding"
            );
            state.remove(path);
            return Vec::new();
        }

        let sidecar_path = sidecar::sidecar_path(path);
        match sidecar::read(&sidecar_path) {
            Ok(Some(index)) if index.source_mtime >= file_mtime && index.source_mtime != 0 => {
                let entries: Vec<CacheEntry> = index
                    .entries
                    .iter()
                    .map(|location| CacheEntry {
                        location: *location,
                        timestamp: index.source_mtime,
                    })
                    .collect();
                tracing::debug!(
                    cache.path = %path.display(),
                    cache.rows = entries.len(),
                    "offset cache loaded from sidecar"
                );
                state.insert(path, entries.clone(), self.max_files);
                entries
            }
            Ok(Some(_)) => {
                drop(state);
                self.discard_sidecar(path);
                Vec::new()
            }
            Ok(None) => Vec::new(),
            Err(err) => {
                tracing::warn!(
                    cache.path = %sidecar_path.display(),
                    error = %err,
                    "unreadable sidecar index; removing"
                );
                drop(state);
                self.discard_sidecar(path);
                Vec::new()
            }
        }
    }

    /// Cache `locations` for `path` and persist them to the sidecar.
    pub fn set(&self, path: &Path, locations: &[RowLocation], file_mtime: i64) {
        let stamp = now_millis().max(file_mtime).max(1);
        let entries = locations
            .iter()
            .map(|location| CacheEntry {
                location: *location,
                timestamp: stamp,
            })
            .collect();
        self.lock().insert(path, entries, self.max_files);

        if self.write_sidecar {
            let index = SidecarIndex {
                source_mtime: file_mtime,
                entries: locations.to_vec(),
            };
            if let Err(err) = sidecar::write(&sidecar::sidecar_path(path), &index) {
                tracing::warn!(
                    cache.path = %path.display(),
                    error = %err,
                    "failed to persist sidecar index"
                );
            }
        }
    }

    /// Drop everything cached for `path`, including its sidecar.
    pub fn invalidate(&self, path: &Path) {
        self.lock().remove(path);
        self.discard_sidecar(path);
    }

    /// Mark `rows` (positions) stale after an in-place or relocating update.
    ///
    /// `file_mtime` is the data file's mtime from before the update and `active_rows` the
    /// number of active rows in the catalog. An entry that was already outdated against
    /// either is dropped in full, as are batches above the configured limit. Otherwise
    /// untouched rows are re-stamped so the write that just happened does not expire them.
    pub fn partial_invalidate(
        &self,
        path: &Path,
        rows: &[u64],
        file_mtime: i64,
        active_rows: usize,
    ) {
        if rows.len() > self.partial_limit {
            tracing::debug!(
                cache.path = %path.display(),
                cache.rows = rows.len(),
                "update batch above partial limit; invalidating"
            );
            self.invalidate(path);
            return;
        }
        {
            let stale: HashSet<u64> = rows.iter().copied().collect();
            let stamp = now_millis().max(1);
            let mut state = self.lock();
            let outdated = state.files.get(path).is_some_and(|entries| {
                let created = entries.iter().map(|entry| entry.timestamp).max().unwrap_or(0);
                created == 0 || created < file_mtime || entries.len() != active_rows
            });
            if outdated {
                tracing::debug!(
                    cache.path = %path.display(),
                    cache.file_mtime = file_mtime,
                    cache.active_rows = active_rows,
                    "offset cache outdated before update; discarding"
                );
                state.remove(path);
            } else if let Some(entries) = state.files.get_mut(path) {
                for (position, entry) in entries.iter_mut().enumerate() {
                    entry.timestamp = if stale.contains(&(position as u64)) {
                        0
                    } else {
                        stamp
                    };
                }
            }
        }
        // The sidecar cannot express stale rows.
        self.discard_sidecar(path);
    }

    /// Number of data files currently cached in memory.
    #[must_use]
    pub fn cached_files(&self) -> usize {
        self.lock().files.len()
    }

    fn discard_sidecar(&self, path: &Path) {
        if let Err(err) = sidecar::remove(&sidecar::sidecar_path(path)) {
            tracing::warn!(
                cache.path = %path.display(),
                error = %err,
                "failed to remove sidecar index"
            );
        }
    }
}
