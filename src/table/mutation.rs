use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufWriter, ErrorKind, Seek, SeekFrom, Write};

use crate::codec::row::decode_row;
use crate::constants::{FRAME_PREFIX_SIZE, HEADER_SIZE};
use crate::error::{IoContext, Result, VtabError};
use crate::index::catalog::RowIndexEntry;
use crate::io::frame::write_frame;
use crate::io::header::HeaderCodec;
use crate::lock::FileLock;
use crate::{epoch_millis, now_millis};
use crate::types::progress::percent;
use crate::types::{
    DeleteReport, FileHeader, NoProgress, ProgressObserver, RowData, RowLocation, UpdateReport,
    Value, WriteReport,
};

use super::compaction::RowSource;
use super::{BinaryTable, read_payload};

/// A serialized row waiting to be written over (or relocated from) its current frame.
struct PendingWrite {
    row: u64,
    entry: RowIndexEntry,
    payload: Vec<u8>,
}

impl BinaryTable {
    /// Replace the whole data file with `rows` and rebuild the index from scratch.
    pub fn write_all(&self, rows: &[RowData]) -> Result<WriteReport> {
        self.write_all_with_progress(rows, &mut NoProgress)
    }

    /// Like [`BinaryTable::write_all`], reporting progress every `progress_interval` rows.
    ///
    /// When a row fails to encode or write, or the observer cancels, the rows already
    /// written stay: the header and index are set to the completed count and
    /// [`VtabError::WriteAborted`] reports it.
    pub fn write_all_with_progress<P>(&self, rows: &[RowData], progress: &mut P) -> Result<WriteReport>
    where
        P: ProgressObserver + ?Sized,
    {
        let lock = FileLock::try_exclusive_create(&self.path)?;
        let file = lock.file();
        file.set_len(0).at(&self.path, 0, "truncate")?;

        let mut header =
            FileHeader::new(self.schema_version, self.layout.column_count(), now_millis());
        let mut writer = BufWriter::new(file);
        HeaderCodec::write(&mut writer, &header)?;

        let interval = self.options.progress_interval();
        let mut cursor = HEADER_SIZE;
        let mut locations = Vec::with_capacity(rows.len());
        let mut failure = None;

        for (index, row) in rows.iter().enumerate() {
            if index % interval == 0 {
                if index > 0 {
                    progress.on_progress(percent(index, rows.len()));
                }
                if progress.is_cancelled() {
                    failure = Some(VtabError::Cancelled {
                        processed: index as u64,
                    });
                    break;
                }
            }
            let written = self
                .encode(row)
                .and_then(|payload| Ok((payload.len(), write_frame(&mut writer, &payload)?)));
            match written {
                Ok((len, frame_len)) => {
                    locations.push(RowLocation {
                        offset: cursor + FRAME_PREFIX_SIZE,
                        size: len as u32,
                    });
                    cursor += frame_len;
                }
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }

        header.row_count = locations.len() as u64;
        header.updated_at = now_millis();
        HeaderCodec::write(&mut writer, &header)?;
        writer.flush().at(&self.path, cursor, "flush")?;
        drop(writer);
        file.sync_all().at(&self.path, 0, "sync")?;

        self.catalog.replace_entries(self.table_id, &locations)?;
        self.cache.invalidate(&self.path);

        if let Some(err) = failure {
            tracing::warn!(
                table.id = self.table_id,
                write.rows_written = locations.len(),
                write.rows_requested = rows.len(),
                error = %err,
                "bulk write stopped early"
            );
            return Err(VtabError::WriteAborted {
                rows_written: locations.len() as u64,
                source: Box::new(err),
            });
        }

        progress.on_progress(100);
        tracing::info!(
            table.id = self.table_id,
            write.rows = locations.len(),
            write.bytes = cursor,
            "bulk write complete"
        );
        Ok(WriteReport {
            rows_written: locations.len() as u64,
            bytes_written: cursor,
        })
    }

    pub fn update_one(&self, row: u64, column: &str, value: Value) -> Result<UpdateReport> {
        self.update_many(column, &BTreeMap::from([(row, value)]))
    }

    /// Set `column` on several rows. All row ids are checked before anything is written.
    pub fn update_many(&self, column: &str, updates: &BTreeMap<u64, Value>) -> Result<UpdateReport> {
        let position = self.layout.require_position(column)?;
        if updates.is_empty() {
            return Ok(UpdateReport::default());
        }

        let lock = FileLock::try_exclusive(&self.path)?;
        let mut file = lock.file();
        let header = self.read_header(&mut file)?;
        let file_len = file.metadata().at(&self.path, 0, "stat")?.len();
        let entries = self.catalog.active_entries(self.table_id)?;

        let mut targets = Vec::with_capacity(updates.len());
        for (&row, value) in updates {
            targets.push((row, entry_for(&entries, row)?, value));
        }

        let mut pending = Vec::with_capacity(targets.len());
        for (row, entry, value) in targets {
            let mut data = self.load_row(&mut file, row, &entry.location, file_len)?;
            data[position] = value.clone();
            pending.push(PendingWrite {
                row,
                entry,
                payload: self.encode(&data)?,
            });
        }
        self.apply_writes(&lock, header, pending, entries.len())
    }

    /// Overwrite every cell of one row. Short rows are padded with nulls.
    pub fn replace_row(&self, row: u64, data: &[Value]) -> Result<UpdateReport> {
        let payload = self.encode(data)?;
        let lock = FileLock::try_exclusive(&self.path)?;
        let header = self.read_header(&mut lock.file())?;
        let active = self.catalog.active_count(self.table_id)?;
        let Some(entry) = self.catalog.entry_at(self.table_id, row)? else {
            return Err(VtabError::RowNotFound {
                row,
                available: active,
            });
        };
        self.apply_writes(
            &lock,
            header,
            vec![PendingWrite {
                row,
                entry,
                payload,
            }],
            usize::try_from(active).unwrap_or(usize::MAX),
        )
    }

    /// Add rows after the last one without touching existing frames.
    pub fn append_rows(&self, rows: &[RowData]) -> Result<WriteReport> {
        if !self.data_file_exists() {
            return self.write_all(rows);
        }
        if rows.is_empty() {
            return Ok(WriteReport::default());
        }
        let payloads = rows
            .iter()
            .map(|row| self.encode(row))
            .collect::<Result<Vec<_>>>()?;

        let lock = FileLock::try_exclusive(&self.path)?;
        let mut file = lock.file();
        let mut header = self.read_header(&mut file)?;
        let start = file.seek(SeekFrom::End(0)).at(&self.path, 0, "seek end")?;

        let mut writer = BufWriter::new(file);
        let mut cursor = start;
        let mut locations = Vec::with_capacity(payloads.len());
        for payload in &payloads {
            let written = write_frame(&mut writer, payload)?;
            locations.push(RowLocation {
                offset: cursor + FRAME_PREFIX_SIZE,
                size: payload.len() as u32,
            });
            cursor += written;
        }
        header.row_count += locations.len() as u64;
        header.updated_at = now_millis();
        HeaderCodec::write(&mut writer, &header)?;
        writer.flush().at(&self.path, start, "flush")?;
        drop(writer);
        file.sync_data().at(&self.path, 0, "sync")?;

        self.catalog.append_entries(self.table_id, &locations)?;
        self.cache.invalidate(&self.path);
        tracing::debug!(
            table.id = self.table_id,
            append.rows = locations.len(),
            append.offset = start,
            "rows appended"
        );
        Ok(WriteReport {
            rows_written: locations.len() as u64,
            bytes_written: cursor - start,
        })
    }

    /// Insert rows before `position`. Positions at or past the end append instead;
    /// anything else rewrites the file.
    pub fn insert_rows(&self, position: u64, rows: &[RowData]) -> Result<WriteReport> {
        self.insert_rows_with_progress(position, rows, &mut NoProgress)
    }

    pub fn insert_rows_with_progress<P>(
        &self,
        position: u64,
        rows: &[RowData],
        progress: &mut P,
    ) -> Result<WriteReport>
    where
        P: ProgressObserver + ?Sized,
    {
        if !self.data_file_exists() || position >= self.row_count()? {
            return self.append_rows(rows);
        }
        if rows.is_empty() {
            return Ok(WriteReport::default());
        }
        let payloads = rows
            .iter()
            .map(|row| self.encode(row))
            .collect::<Result<Vec<_>>>()?;

        let lock = FileLock::try_exclusive(&self.path)?;
        let header = self.read_header(&mut lock.file())?;
        self.require_index(&header)?;
        let entries = self.catalog.active_entries(self.table_id)?;
        let split = usize::try_from(position)
            .unwrap_or(usize::MAX)
            .min(entries.len());

        let existing = |slice: &[RowIndexEntry]| {
            slice
                .iter()
                .map(|entry| RowSource::Existing(entry.location))
                .collect::<Vec<_>>()
        };
        let sources = existing(&entries[..split])
            .into_iter()
            .chain(payloads.iter().map(|payload| RowSource::Fresh(payload.as_slice())))
            .chain(existing(&entries[split..]));
        let outcome = self.rewrite(
            &lock,
            &header,
            sources,
            entries.len() + payloads.len(),
            progress,
        )?;

        tracing::info!(
            table.id = self.table_id,
            insert.position = position,
            insert.rows = payloads.len(),
            table.rows = outcome.rows,
            "rows inserted"
        );
        Ok(WriteReport {
            rows_written: payloads.len() as u64,
            bytes_written: outcome.bytes,
        })
    }

    /// Tombstone rows by position. Ids that do not name an active row are skipped and
    /// listed in the report; the file itself is not rewritten.
    pub fn delete_rows(&self, rows: &[u64]) -> Result<DeleteReport> {
        let requested: BTreeSet<u64> = rows.iter().copied().collect();
        self.delete_positions(&requested, Vec::new())
    }

    /// Tombstone the inclusive range `from..=to`.
    pub fn delete_range(&self, from: u64, to: u64) -> Result<DeleteReport> {
        if from > to {
            return Err(VtabError::InvalidRange { from, to });
        }
        let available = self.catalog.active_count(self.table_id)?;
        let mut skipped = Vec::new();
        if to >= available {
            let first_missing = from.max(available);
            skipped.push(format!(
                "rows {first_missing}..={to} out of range ({available} active rows)"
            ));
        }
        let requested: BTreeSet<u64> = if from < available {
            (from..=to.min(available - 1)).collect()
        } else {
            BTreeSet::new()
        };
        self.delete_positions(&requested, skipped)
    }

    /// Remove the table's data file, index entries, cache and sidecar.
    pub fn drop_table(self) -> Result<()> {
        let lock = match FileLock::try_exclusive(&self.path) {
            Ok(lock) => Some(lock),
            Err(VtabError::Io(err)) if err.kind() == ErrorKind::NotFound => None,
            Err(err) => return Err(err),
        };
        self.catalog.drop_entries(self.table_id)?;
        self.cache.invalidate(&self.path);
        drop(lock);
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => {
                return Err(VtabError::FileAccess {
                    path: self.path.clone(),
                    offset: 0,
                    op: "remove",
                    source: err,
                });
            }
        }
        tracing::info!(table.id = self.table_id, table.path = %self.path.display(), "table dropped");
        Ok(())
    }

    fn delete_positions(
        &self,
        requested: &BTreeSet<u64>,
        mut skipped: Vec<String>,
    ) -> Result<DeleteReport> {
        let lock = FileLock::try_exclusive(&self.path)?;
        let mut file = lock.file();
        let mut header = self.read_header(&mut file)?;
        let entries = self.catalog.active_entries(self.table_id)?;

        let mut orders = Vec::with_capacity(requested.len());
        for &row in requested {
            match usize::try_from(row).ok().and_then(|i| entries.get(i)) {
                Some(entry) => orders.push(entry.logical_row_order),
                None => skipped.push(format!(
                    "row {row} out of range ({} active rows)",
                    entries.len()
                )),
            }
        }

        let deleted = if orders.is_empty() {
            0
        } else {
            self.catalog.deactivate(self.table_id, &orders)?
        };
        if deleted > 0 {
            header.row_count = header.row_count.saturating_sub(deleted);
            header.updated_at = now_millis();
            HeaderCodec::write(&mut file, &header)?;
            file.sync_data().at(&self.path, 0, "sync")?;
            self.cache.invalidate(&self.path);
        }
        if !skipped.is_empty() {
            tracing::debug!(
                table.id = self.table_id,
                delete.skipped = skipped.len(),
                "some requested rows were not deleted"
            );
        }
        Ok(DeleteReport {
            deleted,
            remaining: entries.len() as u64 - deleted,
            skipped,
        })
    }

    /// Current values of one row, read through the locked handle.
    fn load_row(
        &self,
        file: &mut &File,
        row: u64,
        location: &RowLocation,
        file_len: u64,
    ) -> Result<RowData> {
        if !self.in_bounds(location, file_len) {
            return Err(VtabError::Corruption {
                offset: location.offset,
                reason: format!("row {row} lies outside the data file"),
            });
        }
        match read_payload(file, &self.path, location)? {
            Some(payload) => decode_row(&self.layout, &payload),
            None => Err(VtabError::Corruption {
                offset: location.offset,
                reason: format!("row {row} payload truncated"),
            }),
        }
    }

    /// Write each payload over its old frame when it fits, else append a new frame and
    /// repoint the index. In-place writes keep the old length prefix and zero the rest of
    /// the old slot.
    fn apply_writes(
        &self,
        lock: &FileLock,
        mut header: FileHeader,
        pending: Vec<PendingWrite>,
        active_rows: usize,
    ) -> Result<UpdateReport> {
        let mut file = lock.file();
        let mtime_before = file
            .metadata()
            .and_then(|meta| meta.modified())
            .at(&self.path, 0, "stat")?;
        let mut end = file.seek(SeekFrom::End(0)).at(&self.path, 0, "seek end")?;
        let mut report = UpdateReport::default();
        let mut moves = Vec::new();
        let mut touched = Vec::with_capacity(pending.len());

        for write in pending {
            let location = write.entry.location;
            if write.payload.len() <= location.size as usize {
                let mut slot = write.payload;
                slot.resize(location.size as usize, 0);
                file.seek(SeekFrom::Start(location.offset))
                    .at(&self.path, location.offset, "seek row")?;
                file.write_all(&slot)
                    .at(&self.path, location.offset, "write row")?;
                report.in_place += 1;
            } else {
                file.seek(SeekFrom::Start(end)).at(&self.path, end, "seek end")?;
                let written = write_frame(&mut file, &write.payload)?;
                let moved = RowLocation {
                    offset: end + FRAME_PREFIX_SIZE,
                    size: write.payload.len() as u32,
                };
                tracing::debug!(
                    row.position = write.row,
                    row.old_offset = location.offset,
                    row.new_offset = moved.offset,
                    "row outgrew its frame; relocated"
                );
                moves.push((write.entry.logical_row_order, moved));
                end += written;
                report.relocated += 1;
                report.bytes_appended += written;
            }
            touched.push(write.row);
        }

        header.updated_at = now_millis();
        HeaderCodec::write(&mut file, &header)?;
        file.sync_data().at(&self.path, 0, "sync")?;

        self.catalog.relocate(self.table_id, &moves)?;
        self.cache.partial_invalidate(
            &self.path,
            &touched,
            epoch_millis(mtime_before),
            active_rows,
        );
        Ok(report)
    }
}

fn entry_for(entries: &[RowIndexEntry], row: u64) -> Result<RowIndexEntry> {
    usize::try_from(row)
        .ok()
        .and_then(|i| entries.get(i))
        .copied()
        .ok_or(VtabError::RowNotFound {
            row,
            available: entries.len() as u64,
        })
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{columns, row, rows, table};
    use super::*;
    use crate::index::cache::OffsetCache;
    use crate::index::catalog::RowIndexCatalog;
    use crate::types::{Cancellable, PinState, StoreOptions};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::TempDir;

    #[test]
    fn update_in_place_keeps_file_size_and_index() {
        let dir = TempDir::new().expect("tempdir");
        let table = table(&dir);
        table.write_all(&rows(3)).expect("write");
        let size = std::fs::metadata(table.path()).expect("meta").len();
        let before = table.catalog().active_locations(1).expect("index");

        let report = table
            .update_one(1, "Label", Value::from("renamed"))
            .expect("update");
        assert_eq!(report.in_place, 1);
        assert_eq!(report.relocated, 0);
        assert_eq!(std::fs::metadata(table.path()).expect("meta").len(), size);
        assert_eq!(table.catalog().active_locations(1).expect("index"), before);
        assert_eq!(table.read_one(1).expect("row")[0], Value::from("renamed"));
    }

    #[test]
    fn payload_larger_than_frame_is_relocated() {
        let dir = TempDir::new().expect("tempdir");
        let table = table(&dir);
        table.write_all(&rows(2)).expect("write");
        let size = std::fs::metadata(table.path()).expect("meta").len();

        // Shrink the recorded frame so the next full-width payload cannot fit.
        let entry = table.catalog().entry_at(1, 0).expect("entry").expect("row 0");
        table
            .catalog()
            .relocate(
                1,
                &[(
                    entry.logical_row_order,
                    RowLocation {
                        offset: entry.location.offset,
                        size: 8,
                    },
                )],
            )
            .expect("shrink");
        table.cache().invalidate(table.path());

        let report = table
            .replace_row(0, &row("moved", PinState::L, 42))
            .expect("replace");
        assert_eq!(report.relocated, 1);
        let width = table.layout().payload_len().expect("width") as u64;
        assert_eq!(report.bytes_appended, FRAME_PREFIX_SIZE + width);

        let moved = table.catalog().entry_at(1, 0).expect("entry").expect("row 0");
        assert_eq!(moved.location.offset, size + FRAME_PREFIX_SIZE);
        assert_eq!(table.read_one(0).expect("row"), row("moved", PinState::L, 42));
        assert_eq!(table.read_one(1).expect("row"), rows(2)[1]);
        assert_eq!(table.row_count().expect("count"), 2);
    }

    #[test]
    fn unknown_rows_and_columns_are_rejected_before_writing() {
        let dir = TempDir::new().expect("tempdir");
        let table = table(&dir);
        table.write_all(&rows(2)).expect("write");
        let before = std::fs::read(table.path()).expect("bytes");

        let updates = BTreeMap::from([(0, Value::Integer(5)), (9, Value::Integer(6))]);
        assert!(matches!(
            table.update_many("Count", &updates),
            Err(VtabError::RowNotFound { row: 9, .. })
        ));
        assert!(matches!(
            table.update_one(0, "Nope", Value::Null),
            Err(VtabError::UnknownColumn { .. })
        ));
        assert_eq!(std::fs::read(table.path()).expect("bytes"), before);
    }

    #[test]
    fn long_rows_are_rejected() {
        let dir = TempDir::new().expect("tempdir");
        let table = table(&dir);
        table.write_all(&rows(1)).expect("write");
        let mut wide = rows(1)[0].clone();
        wide.push(Value::Null);
        assert!(matches!(
            table.replace_row(0, &wide),
            Err(VtabError::RowWidthMismatch { .. })
        ));
        // Short rows are padded.
        table.replace_row(0, &[Value::from("x")]).expect("short row");
        assert_eq!(table.read_one(0).expect("row")[2], Value::Integer(0));
    }

    #[test]
    fn append_continues_logical_order() {
        let dir = TempDir::new().expect("tempdir");
        let table = table(&dir);
        table.append_rows(&rows(2)).expect("creates file");
        table.delete_rows(&[1]).expect("delete");
        table.append_rows(&rows(3)[2..]).expect("append");

        let orders: Vec<_> = table
            .catalog()
            .active_entries(1)
            .expect("entries")
            .iter()
            .map(|entry| entry.logical_row_order)
            .collect();
        assert_eq!(orders, [0, 2]);
        assert_eq!(table.row_count().expect("count"), 2);
        assert_eq!(table.read_all().expect("read"), vec![rows(3)[0].clone(), rows(3)[2].clone()]);
    }

    #[test]
    fn insert_in_the_middle_rewrites() {
        let dir = TempDir::new().expect("tempdir");
        let table = table(&dir);
        table.write_all(&rows(3)).expect("write");
        table.delete_rows(&[0]).expect("delete");

        let fresh = row("new", PinState::Zero, -1);
        table.insert_rows(1, &[fresh.clone()]).expect("insert");
        assert_eq!(
            table.read_all().expect("read"),
            vec![rows(3)[1].clone(), fresh, rows(3)[2].clone()]
        );
        assert_eq!(table.row_count().expect("count"), 3);
        assert_eq!(table.garbage_stats().expect("stats").garbage_bytes, 0);

        let tail = row("tail", PinState::One, 9);
        table.insert_rows(99, &[tail.clone()]).expect("append path");
        assert_eq!(table.read_one(3).expect("row"), tail);
    }

    #[test]
    fn delete_range_is_inclusive_and_reports_skips() {
        let dir = TempDir::new().expect("tempdir");
        let table = table(&dir);
        table.write_all(&rows(5)).expect("write");
        let size = std::fs::metadata(table.path()).expect("meta").len();

        let report = table.delete_range(1, 2).expect("delete");
        assert_eq!(report.deleted, 2);
        assert_eq!(report.remaining, 3);
        assert!(report.skipped.is_empty());
        assert_eq!(std::fs::metadata(table.path()).expect("meta").len(), size);

        let report = table.delete_range(2, 6).expect("delete");
        assert_eq!(report.deleted, 1);
        assert_eq!(report.skipped.len(), 1);
        let all = rows(5);
        assert_eq!(
            table.read_all().expect("read"),
            vec![all[0].clone(), all[3].clone()]
        );

        assert!(matches!(
            table.delete_range(3, 1),
            Err(VtabError::InvalidRange { from: 3, to: 1 })
        ));
    }

    #[test]
    fn write_failure_keeps_completed_rows() {
        use crate::types::{ColumnDataType, ColumnInfo};
        use std::sync::Arc;

        let dir = TempDir::new().expect("tempdir");
        let base = table(&dir);
        let mut columns = base.layout().columns().to_vec();
        columns.push(
            ColumnInfo::new("Legacy", 3, ColumnDataType::parse("WAVEFORM"))
                .with_property("field_length", serde_json::json!(2)),
        );
        let table = BinaryTable::new(
            base.path(),
            1,
            columns,
            1,
            base.catalog().clone(),
            Arc::clone(base.cache()),
        )
        .expect("table");

        let err = table.write_all(&[vec![Value::Null; 4]]).expect_err("unsupported");
        match err {
            VtabError::WriteAborted {
                rows_written,
                source,
            } => {
                assert_eq!(rows_written, 0);
                assert!(matches!(*source, VtabError::UnsupportedColumnType { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(table.row_count().expect("count"), 0);
    }

    #[test]
    fn concurrent_mutation_is_refused() {
        let dir = TempDir::new().expect("tempdir");
        let table = table(&dir);
        table.write_all(&rows(2)).expect("write");

        let held = FileLock::try_exclusive(table.path()).expect("lock");
        assert!(matches!(
            table.delete_rows(&[0]),
            Err(VtabError::Locked { .. })
        ));
        drop(held);
        assert_eq!(table.delete_rows(&[0]).expect("delete").deleted, 1);
    }

    #[test]
    fn drop_table_removes_everything() {
        let dir = TempDir::new().expect("tempdir");
        let table = table(&dir);
        table.write_all(&rows(2)).expect("write");
        table.read_all().expect("warm cache");
        let catalog = table.catalog().clone();
        let path = table.path().to_path_buf();

        table.drop_table().expect("drop");
        assert!(!path.exists());
        assert!(!crate::io::sidecar::sidecar_path(&path).exists());
        assert!(!catalog.has_entries(1).expect("query"));
    }

    fn batched_table(dir: &TempDir, progress_interval: usize) -> BinaryTable {
        BinaryTable::with_options(
            dir.path().join("pattern.vbin"),
            1,
            columns(),
            1,
            RowIndexCatalog::open_in_memory().expect("catalog"),
            Arc::new(OffsetCache::default()),
            StoreOptions {
                progress_interval,
                ..StoreOptions::default()
            },
        )
        .expect("table")
    }

    /// Observer that raises its own cancellation flag at the first progress report.
    fn cancel_at_first_report() -> Cancellable<impl FnMut(u8)> {
        let flag = Arc::new(AtomicBool::new(false));
        let raise = Arc::clone(&flag);
        Cancellable::with_flag(move |_| raise.store(true, Ordering::Relaxed), flag)
    }

    #[test]
    fn cancelled_bulk_write_keeps_completed_batches() {
        let dir = TempDir::new().expect("tempdir");
        let table = batched_table(&dir, 4);

        let err = table
            .write_all_with_progress(&rows(10), &mut cancel_at_first_report())
            .expect_err("cancelled");
        match err {
            VtabError::WriteAborted {
                rows_written,
                source,
            } => {
                assert_eq!(rows_written, 4);
                assert!(matches!(*source, VtabError::Cancelled { processed: 4 }));
            }
            other => panic!("expected WriteAborted, got {other:?}"),
        }

        assert_eq!(table.row_count().expect("count"), 4);
        assert_eq!(table.catalog().active_count(1).expect("index"), 4);
        assert_eq!(table.read_all().expect("read"), rows(10)[..4].to_vec());
    }

    #[test]
    fn bulk_write_reports_progress_to_completion() {
        let dir = TempDir::new().expect("tempdir");
        let table = batched_table(&dir, 3);
        let mut seen = Vec::new();
        table
            .write_all_with_progress(&rows(9), &mut |percent: u8| seen.push(percent))
            .expect("write");
        assert_eq!(seen, [33, 66, 100]);
    }

    #[test]
    fn cancelled_insert_leaves_file_untouched() {
        let dir = TempDir::new().expect("tempdir");
        let table = batched_table(&dir, 2);
        table.write_all(&rows(6)).expect("write");
        let before = std::fs::read(table.path()).expect("bytes");

        let err = table
            .insert_rows_with_progress(
                2,
                &[row("new", PinState::L, 99)],
                &mut cancel_at_first_report(),
            )
            .expect_err("cancelled");
        assert!(matches!(err, VtabError::Cancelled { processed: 2 }));
        assert_eq!(std::fs::read(table.path()).expect("bytes"), before);
        assert_eq!(table.catalog().active_count(1).expect("index"), 6);
        assert_eq!(table.read_all().expect("read"), rows(6));
    }
}
