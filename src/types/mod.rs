//! Public types exposed by the `vtab-core` crate.

pub mod column;
pub mod header;
pub mod options;
pub mod progress;
pub mod report;
pub mod value;

pub use column::{ColumnDataType, ColumnInfo, RowLayout};
pub use header::FileHeader;
pub use options::StoreOptions;
pub use progress::{Cancellable, NoProgress, ProgressObserver};
pub use report::{
    CompactionReport, DeleteReport, GarbageStats, IntegrityFinding, IntegrityFindingCode,
    IntegrityReport, RowLocation, UpdateReport, WriteReport,
};
pub use value::{PinState, RowData, Value};
