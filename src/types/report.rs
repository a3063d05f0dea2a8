//! Outcome reports returned by row store operations.

use serde::{Deserialize, Serialize};

/// Physical location of a row payload inside the data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RowLocation {
    /// Byte offset of the payload, just past its length prefix.
    pub offset: u64,
    /// Payload length in bytes.
    pub size: u32,
}

impl RowLocation {
    #[must_use]
    pub fn end(&self) -> u64 {
        self.offset + u64::from(self.size)
    }

    /// Offset of the frame's length prefix.
    #[must_use]
    pub fn frame_start(&self) -> u64 {
        self.offset.saturating_sub(crate::constants::FRAME_PREFIX_SIZE)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WriteReport {
    pub rows_written: u64,
    pub bytes_written: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateReport {
    pub in_place: u64,
    pub relocated: u64,
    /// Bytes appended for relocated frames; they stay until compaction.
    pub bytes_appended: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeleteReport {
    pub deleted: u64,
    pub remaining: u64,
    /// Descriptions of requested rows that were not deleted.
    pub skipped: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GarbageStats {
    pub file_bytes: u64,
    pub live_bytes: u64,
    pub garbage_bytes: u64,
    pub active_rows: u64,
    pub inactive_rows: u64,
}

impl GarbageStats {
    #[must_use]
    pub fn garbage_ratio(&self) -> f64 {
        if self.file_bytes == 0 {
            return 0.0;
        }
        self.garbage_bytes as f64 / self.file_bytes as f64
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompactionReport {
    pub performed: bool,
    pub rows: u64,
    pub bytes_before: u64,
    pub bytes_after: u64,
    pub garbage_ratio: f64,
}

impl CompactionReport {
    #[must_use]
    pub fn bytes_reclaimed(&self) -> u64 {
        self.bytes_before.saturating_sub(self.bytes_after)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityFindingCode {
    HeaderRowCountMismatch,
    EntryPastEndOfFile,
    OverlappingEntries,
    FramePrefixMismatch,
    OversizedEntry,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrityFinding {
    pub code: IntegrityFindingCode,
    /// Position among active rows, when the finding concerns one row.
    pub row: Option<u64>,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub file_bytes: u64,
    pub header_rows: u64,
    pub active_rows: u64,
    pub findings: Vec<IntegrityFinding>,
}

impl IntegrityReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }

    #[must_use]
    pub fn has(&self, code: IntegrityFindingCode) -> bool {
        self.findings.iter().any(|finding| finding.code == code)
    }
}
