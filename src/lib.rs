#![deny(clippy::all, clippy::pedantic)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
#![cfg_attr(
    test,
    allow(
        clippy::useless_vec,
        clippy::uninlined_format_args,
        clippy::cast_possible_truncation,
        clippy::float_cmp,
        clippy::cast_precision_loss
    )
)]
#![allow(clippy::module_name_repetitions)]
//
// Documentation lints: internal helpers are self-describing, public APIs carry docs.
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
//
// Casts are bounded by the on-disk format (u32 frame lengths, u64 offsets).
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::cast_possible_truncation)]
//
// Storage operations naturally run long.
#![allow(clippy::too_many_lines)]
#![allow(clippy::items_after_statements)]
#![allow(clippy::similar_names)]
#![allow(clippy::manual_let_else)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::unreadable_literal)] // Magic numbers in binary formats are clearer as hex
#![allow(clippy::len_without_is_empty)]
#![allow(clippy::unnecessary_wraps)]

//! `vtab-core`: the binary row-store behind vector-table editing.
//!
//! A vector table is a large grid of typed cells (labels, instructions, timesets, pin
//! states, JSON properties). Rows are stored in a single data file as length-prefixed
//! frames of fixed-width fields; a SQLite side-table maps each logical row to the byte
//! range holding it, and an in-memory/sidecar cache keeps that mapping warm.

/// The vtab-core crate version (matches `Cargo.toml`).
pub const VTAB_CORE_VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod codec;
pub mod constants;
pub mod error;
pub mod index;
pub mod io;
mod lock;
pub mod table;
pub mod types;

pub use codec::field::{FieldCodec, truncate_utf8};
pub use codec::row::{decode_row, encode_row};
pub use constants::*;
pub use error::{Result, VtabError};
pub use index::cache::{CacheEntry, OffsetCache};
pub use index::catalog::{RowIndexCatalog, RowIndexEntry, TableDefinition};
pub use io::frame::{FrameScanner, ScanState, ScannedRow};
pub use io::header::HeaderCodec;
pub use lock::FileLock;
pub use table::BinaryTable;
pub use types::{
    Cancellable, ColumnDataType, ColumnInfo, CompactionReport, DeleteReport, FileHeader,
    GarbageStats, IntegrityFinding, IntegrityFindingCode, IntegrityReport, NoProgress, PinState,
    ProgressObserver, RowData, RowLayout, RowLocation, StoreOptions, UpdateReport, Value,
    WriteReport,
};

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch for `time`, clamped to zero for pre-epoch clocks.
pub(crate) fn epoch_millis(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

pub(crate) fn now_millis() -> i64 {
    epoch_millis(SystemTime::now())
}
