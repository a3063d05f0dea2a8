use serde::{Deserialize, Serialize};

use crate::constants::{COMPRESSION_NONE, FORMAT_VERSION, MAGIC};

/// Fixed-size record at the start of every data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHeader {
    pub magic: [u8; 8],
    pub format_version: u32,
    pub schema_version: u32,
    /// Live (non-tombstoned) logical rows.
    pub row_count: u64,
    pub column_count: u32,
    pub created_at: i64,
    pub updated_at: i64,
    pub compression: u8,
}

impl FileHeader {
    #[must_use]
    pub fn new(schema_version: u32, column_count: u32, now: i64) -> Self {
        Self {
            magic: MAGIC,
            format_version: FORMAT_VERSION,
            schema_version,
            row_count: 0,
            column_count,
            created_at: now,
            updated_at: now,
            compression: COMPRESSION_NONE,
        }
    }
}
