//! On-disk format constants and engine defaults.

/// Identity bytes at offset 0 of every data file.
pub const MAGIC: [u8; 8] = *b"VTABBIN\0";
/// Current data file format version.
pub const FORMAT_VERSION: u32 = 1;
/// Fixed size of the data file header; row frames start here.
pub const HEADER_SIZE: u64 = 64;
/// Only uncompressed payloads are written.
pub const COMPRESSION_NONE: u8 = 0;

/// Length prefix in front of every row frame.
pub const FRAME_PREFIX_SIZE: u64 = 4;
/// Largest row payload the reader will trust from a length prefix.
pub const MAX_ROW_FRAME_BYTES: u32 = 1024 * 1024;

/// Length prefix in front of text-like field contents.
pub const FIELD_LENGTH_PREFIX: usize = 4;
/// Content cap for a column named exactly `Label`.
pub const LABEL_FIELD_MAX_LENGTH: usize = 15;
/// Content cap for a column named exactly `Comment`.
pub const COMMENT_FIELD_MAX_LENGTH: usize = 30;
/// Content cap for a column named exactly `EXT`.
pub const EXT_FIELD_MAX_LENGTH: usize = 5;
/// Content cap for any other TEXT column.
pub const TEXT_FIELD_MAX_LENGTH: usize = 256;
/// Content cap for JSON_PROPERTIES columns.
pub const JSON_PROPERTIES_MAX_LENGTH: usize = 1024;
/// Absolute cap applied to stored text lengths regardless of the declared slot.
pub const TEXT_DECODE_SAFETY_CAP: usize = 1024 * 1024;
/// Largest slot an unsupported column may declare via `field_length`.
pub const MAX_DECLARED_FIELD_LENGTH: usize = 1024 * 1024;
/// `data_properties` key holding the slot width of an unsupported column.
pub const FIELD_LENGTH_PROPERTY: &str = "field_length";

/// Column names with their own text caps.
pub const LABEL_COLUMN: &str = "Label";
pub const COMMENT_COLUMN: &str = "Comment";
pub const EXT_COLUMN: &str = "EXT";

/// Sidecar offset index identity and version.
pub const SIDECAR_MAGIC: [u8; 4] = *b"VTIX";
pub const SIDECAR_VERSION: u32 = 1;
/// magic + version + source mtime + row count
pub const SIDECAR_HEADER_SIZE: usize = 20;
/// offset (u64) + size (u32)
pub const SIDECAR_ENTRY_SIZE: usize = 12;
/// Extension appended to the data file name for its sidecar index.
pub const SIDECAR_EXTENSION: &str = "vtidx";

pub const DEFAULT_MAX_CACHED_FILES: usize = 32;
pub const DEFAULT_PARTIAL_INVALIDATION_LIMIT: usize = 100;
pub const DEFAULT_COMPACTION_THRESHOLD: f64 = 0.25;
pub const DEFAULT_PROGRESS_INTERVAL: usize = 1000;
