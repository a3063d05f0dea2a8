//! Tunables for a `BinaryTable` and its offset cache.

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_COMPACTION_THRESHOLD, DEFAULT_MAX_CACHED_FILES, DEFAULT_PARTIAL_INVALIDATION_LIMIT,
    DEFAULT_PROGRESS_INTERVAL, MAX_ROW_FRAME_BYTES,
};
use crate::error::Result;

fn default_true() -> bool {
    true
}

fn default_max_row_bytes() -> u32 {
    MAX_ROW_FRAME_BYTES
}

fn default_compaction_threshold() -> f64 {
    DEFAULT_COMPACTION_THRESHOLD
}

fn default_partial_invalidation_limit() -> usize {
    DEFAULT_PARTIAL_INVALIDATION_LIMIT
}

fn default_max_cached_files() -> usize {
    DEFAULT_MAX_CACHED_FILES
}

fn default_progress_interval() -> usize {
    DEFAULT_PROGRESS_INTERVAL
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreOptions {
    /// Largest row frame the reader trusts; longer length prefixes are treated as corrupt.
    #[serde(default = "default_max_row_bytes")]
    pub max_row_bytes: u32,
    /// Garbage fraction above which `compact(false)` rewrites the file.
    #[serde(default = "default_compaction_threshold")]
    pub compaction_threshold: f64,
    /// Update batches up to this many rows only mark the touched cache rows stale.
    #[serde(default = "default_partial_invalidation_limit")]
    pub partial_invalidation_limit: usize,
    /// Distinct data files kept in the in-memory offset cache.
    #[serde(default = "default_max_cached_files")]
    pub max_cached_files: usize,
    /// Rows between progress reports and cancellation checks.
    #[serde(default = "default_progress_interval")]
    pub progress_interval: usize,
    /// Persist the offset cache next to the data file.
    #[serde(default = "default_true")]
    pub write_sidecar: bool,
    /// Fall back to a sequential scan when the catalog holds no entries for the table.
    #[serde(default = "default_true")]
    pub allow_sequential_fallback: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            max_row_bytes: default_max_row_bytes(),
            compaction_threshold: default_compaction_threshold(),
            partial_invalidation_limit: default_partial_invalidation_limit(),
            max_cached_files: default_max_cached_files(),
            progress_interval: default_progress_interval(),
            write_sidecar: true,
            allow_sequential_fallback: true,
        }
    }
}

impl StoreOptions {
    /// Parse options from JSON; missing fields take their defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub(crate) fn progress_interval(&self) -> usize {
        self.progress_interval.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let options =
            StoreOptions::from_json(r#"{"compaction_threshold": 0.5, "write_sidecar": false}"#)
                .expect("parse");
        assert_eq!(options.compaction_threshold, 0.5);
        assert!(!options.write_sidecar);
        assert_eq!(options.max_row_bytes, MAX_ROW_FRAME_BYTES);
        assert_eq!(options.partial_invalidation_limit, 100);
    }
}
