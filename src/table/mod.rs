//! `BinaryTable`: the per-table handle tying data file, catalog and cache together.
//!
//! - `read`: bulk and single-row reads through the offset index.
//! - `mutation`: bulk writes, updates, appends, inserts and deletes.
//! - `compaction`: garbage accounting and the rewrite that reclaims it.
//! - `doctor`: integrity inspection and index rebuild.

mod compaction;
mod doctor;
mod mutation;
mod read;

use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::codec::row::{encode_row, pad_row};
use crate::constants::HEADER_SIZE;
use crate::epoch_millis;
use crate::error::{IoContext, Result, VtabError};
use crate::index::cache::OffsetCache;
use crate::index::catalog::RowIndexCatalog;
use crate::io::header::HeaderCodec;
use crate::types::{ColumnInfo, FileHeader, RowLayout, RowLocation, StoreOptions, Value};

/// Handle on one vector table's data file.
///
/// The handle holds no open file; every operation opens, uses and closes its own
/// descriptor. Mutations take an exclusive advisory lock on the data file and fail with
/// [`VtabError::Locked`] rather than waiting.
#[derive(Debug, Clone)]
pub struct BinaryTable {
    path: PathBuf,
    table_id: i64,
    layout: RowLayout,
    schema_version: u32,
    catalog: RowIndexCatalog,
    cache: Arc<OffsetCache>,
    options: StoreOptions,
}

impl BinaryTable {
    pub fn new(
        path: impl Into<PathBuf>,
        table_id: i64,
        columns: Vec<ColumnInfo>,
        schema_version: u32,
        catalog: RowIndexCatalog,
        cache: Arc<OffsetCache>,
    ) -> Result<Self> {
        Self::with_options(
            path,
            table_id,
            columns,
            schema_version,
            catalog,
            cache,
            StoreOptions::default(),
        )
    }

    pub fn with_options(
        path: impl Into<PathBuf>,
        table_id: i64,
        columns: Vec<ColumnInfo>,
        schema_version: u32,
        catalog: RowIndexCatalog,
        cache: Arc<OffsetCache>,
        options: StoreOptions,
    ) -> Result<Self> {
        Ok(Self {
            path: path.into(),
            table_id,
            layout: RowLayout::new(columns)?,
            schema_version,
            catalog,
            cache,
            options,
        })
    }

    /// Build a handle from the table's master record and column configuration.
    ///
    /// The recorded data file name is resolved against `data_dir`.
    pub fn open_from_catalog(
        data_dir: &Path,
        table_id: i64,
        catalog: RowIndexCatalog,
        cache: Arc<OffsetCache>,
        options: StoreOptions,
    ) -> Result<Self> {
        let Some(definition) = catalog.table_definition(table_id)? else {
            return Err(VtabError::InvalidLayout {
                reason: format!("no master record for table {table_id}"),
            });
        };
        tracing::debug!(
            table.id = table_id,
            table.name = %definition.name,
            table.columns = definition.columns.len(),
            "opening table from catalog"
        );
        Self::with_options(
            data_dir.join(&definition.data_file),
            table_id,
            definition.columns,
            definition.schema_version,
            catalog,
            cache,
            options,
        )
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn table_id(&self) -> i64 {
        self.table_id
    }

    #[must_use]
    pub fn layout(&self) -> &RowLayout {
        &self.layout
    }

    #[must_use]
    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    #[must_use]
    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    #[must_use]
    pub fn catalog(&self) -> &RowIndexCatalog {
        &self.catalog
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<OffsetCache> {
        &self.cache
    }

    /// Validated header of the data file.
    pub fn header(&self) -> Result<FileHeader> {
        let mut file = self.open_read()?;
        self.read_header(&mut file)
    }

    /// Live rows according to the header.
    pub fn row_count(&self) -> Result<u64> {
        Ok(self.header()?.row_count)
    }

    fn open_read(&self) -> Result<File> {
        File::open(&self.path).at(&self.path, 0, "open")
    }

    /// Read the header and check it against this handle's schema version and layout.
    fn read_header<R: Read + Seek>(&self, reader: &mut R) -> Result<FileHeader> {
        let header = HeaderCodec::read(reader)?;
        if header.schema_version != self.schema_version {
            return Err(VtabError::SchemaMismatch {
                expected: self.schema_version,
                found: header.schema_version,
            });
        }
        if header.column_count != self.layout.column_count() {
            return Err(VtabError::ColumnCountMismatch {
                expected: self.layout.column_count(),
                found: header.column_count,
            });
        }
        Ok(header)
    }

    fn file_mtime(&self) -> Result<i64> {
        let modified = std::fs::metadata(&self.path)
            .and_then(|meta| meta.modified())
            .at(&self.path, 0, "stat")?;
        Ok(epoch_millis(modified))
    }

    fn data_file_exists(&self) -> bool {
        self.path.exists()
    }

    /// Active row locations in logical order: cache first, catalog on a miss or when
    /// any cached row is stale.
    fn active_locations(&self) -> Result<Vec<RowLocation>> {
        let mtime = self.file_mtime()?;
        let cached = self.cache.get(&self.path, mtime);
        if !cached.is_empty() && cached.iter().all(|entry| !entry.is_stale()) {
            return Ok(cached.into_iter().map(|entry| entry.location).collect());
        }
        let locations = self.catalog.active_locations(self.table_id)?;
        if !locations.is_empty() {
            self.cache.set(&self.path, &locations, mtime);
        }
        Ok(locations)
    }

    /// Location of one active row, from a fresh cache entry or the catalog.
    fn location_of(&self, row: u64) -> Result<Option<RowLocation>> {
        let mtime = self.file_mtime()?;
        let cached = self.cache.get(&self.path, mtime);
        if let Some(entry) = usize::try_from(row).ok().and_then(|i| cached.get(i)) {
            if !entry.is_stale() {
                return Ok(Some(entry.location));
            }
        }
        Ok(self
            .catalog
            .entry_at(self.table_id, row)?
            .map(|entry| entry.location))
    }

    /// Pad a short row with nulls and serialize it.
    fn encode(&self, row: &[Value]) -> Result<Vec<u8>> {
        encode_row(&self.layout, &pad_row(&self.layout, row))
    }

    /// Whether `location` is a plausible payload range for a file of `file_len` bytes.
    fn in_bounds(&self, location: &RowLocation, file_len: u64) -> bool {
        location.frame_start() >= HEADER_SIZE
            && location.size <= self.options.max_row_bytes
            && location.end() <= file_len
    }
}

/// Read the payload at `location`. `Ok(None)` when the file ends first.
fn read_payload<R: Read + Seek>(
    reader: &mut R,
    path: &Path,
    location: &RowLocation,
) -> Result<Option<Vec<u8>>> {
    reader
        .seek(SeekFrom::Start(location.offset))
        .at(path, location.offset, "seek")?;
    let mut payload = vec![0u8; location.size as usize];
    match reader.read_exact(&mut payload) {
        Ok(()) => Ok(Some(payload)),
        Err(err) if err.kind() == ErrorKind::UnexpectedEof => Ok(None),
        Err(err) => Err(VtabError::FileAccess {
            path: path.to_path_buf(),
            offset: location.offset,
            op: "read row",
            source: err,
        }),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::types::{ColumnDataType, PinState};
    use tempfile::TempDir;

    pub(crate) fn columns() -> Vec<ColumnInfo> {
        vec![
            ColumnInfo::new("Label", 0, ColumnDataType::Text),
            ColumnInfo::new("State", 1, ColumnDataType::PinStateId),
            ColumnInfo::new("Count", 2, ColumnDataType::Integer),
        ]
    }

    pub(crate) fn row(label: &str, pin: PinState, count: i64) -> Vec<Value> {
        vec![Value::from(label), Value::Pin(pin), Value::Integer(count)]
    }

    pub(crate) fn rows(n: i64) -> Vec<Vec<Value>> {
        (0..n).map(|i| row(&format!("R{i}"), PinState::H, i)).collect()
    }

    pub(crate) fn table(dir: &TempDir) -> BinaryTable {
        let catalog = RowIndexCatalog::open_in_memory().expect("catalog");
        BinaryTable::new(
            dir.path().join("pattern.vbin"),
            1,
            columns(),
            1,
            catalog,
            Arc::new(OffsetCache::default()),
        )
        .expect("table")
    }
}
