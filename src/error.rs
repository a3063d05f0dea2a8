//! Error type shared by every layer of the row store.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, VtabError>;

#[derive(Debug, Error)]
pub enum VtabError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{op} failed for {} at offset {offset}: {source}", path.display())]
    FileAccess {
        path: PathBuf,
        offset: u64,
        op: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("row index catalog error: {0}")]
    Catalog(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid header: {reason}")]
    InvalidHeader { reason: String },

    #[error("schema version mismatch: table expects {expected}, file has {found}")]
    SchemaMismatch { expected: u32, found: u32 },

    #[error("column count mismatch: layout has {expected} columns, file has {found}")]
    ColumnCountMismatch { expected: u32, found: u32 },

    #[error("invalid column layout: {reason}")]
    InvalidLayout { reason: String },

    #[error("column '{column}' has unsupported type '{type_name}'")]
    UnsupportedColumnType { column: String, type_name: String },

    #[error("column '{column}' has no usable field width: {reason}")]
    FieldWidthUnknown { column: String, reason: String },

    #[error("row has {found} values but the layout has {expected} columns")]
    RowWidthMismatch { expected: usize, found: usize },

    #[error("unknown column '{column}'")]
    UnknownColumn { column: String },

    #[error("corrupted data at offset {offset}: {reason}")]
    Corruption { offset: u64, reason: String },

    #[error("invalid sidecar index: {reason}")]
    InvalidSidecar { reason: String },

    #[error("row {row} not found ({available} active rows)")]
    RowNotFound { row: u64, available: u64 },

    #[error("invalid row range {from}..={to}")]
    InvalidRange { from: u64, to: u64 },

    #[error("data file {} is locked by another operation", path.display())]
    Locked { path: PathBuf },

    #[error("operation cancelled after {processed} rows")]
    Cancelled { processed: u64 },

    #[error("bulk write stopped after {rows_written} rows: {source}")]
    WriteAborted {
        rows_written: u64,
        #[source]
        source: Box<VtabError>,
    },
}

/// Attach path and offset context to raw I/O failures.
pub(crate) trait IoContext<T> {
    fn at(self, path: &std::path::Path, offset: u64, op: &'static str) -> Result<T>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn at(self, path: &std::path::Path, offset: u64, op: &'static str) -> Result<T> {
        self.map_err(|source| VtabError::FileAccess {
            path: path.to_path_buf(),
            offset,
            op,
            source,
        })
    }
}
