//! Garbage accounting and full-file rewrites.
//!
//! Relocated updates and tombstones leave dead bytes behind. Nothing reclaims them
//! automatically; `compact` rewrites the live rows in logical order through a staged
//! temp file that replaces the data file atomically once the catalog accepted the new
//! offsets.

use std::fs::File;
use std::io::{BufWriter, Read, Seek, Write};
use std::path::Path;

use atomic_write_file::AtomicWriteFile;

use crate::codec::row::{encode_row, placeholder_row};
use crate::constants::{FRAME_PREFIX_SIZE, HEADER_SIZE};
use crate::error::{IoContext, Result, VtabError};
use crate::io::frame::write_frame;
use crate::io::header::HeaderCodec;
use crate::lock::FileLock;
use crate::now_millis;
use crate::types::progress::percent;
use crate::types::{
    CompactionReport, FileHeader, GarbageStats, NoProgress, ProgressObserver, RowLocation,
};

use super::{BinaryTable, read_payload};

/// Where a row of the rewritten file comes from.
pub(super) enum RowSource<'a> {
    Existing(RowLocation),
    Fresh(&'a [u8]),
}

pub(super) struct RewriteOutcome {
    pub rows: u64,
    pub bytes: u64,
}

/// Replacement data file being written next to the original.
///
/// Dropping it without `finish` + commit removes the temp file.
struct StagedRewrite {
    atomic: AtomicWriteFile,
    writer: BufWriter<File>,
    header: FileHeader,
    cursor: u64,
    locations: Vec<RowLocation>,
}

impl StagedRewrite {
    fn prepare(path: &Path, template: &FileHeader) -> Result<Self> {
        let mut options = AtomicWriteFile::options();
        options.read(true);
        let atomic = options.open(path).at(path, 0, "stage rewrite")?;
        let mut writer = BufWriter::new(atomic.as_file().try_clone()?);
        let mut header = *template;
        header.row_count = 0;
        HeaderCodec::write(&mut writer, &header)?;
        Ok(Self {
            atomic,
            writer,
            header,
            cursor: HEADER_SIZE,
            locations: Vec::new(),
        })
    }

    fn push(&mut self, payload: &[u8]) -> Result<()> {
        let written = write_frame(&mut self.writer, payload)?;
        self.locations.push(RowLocation {
            offset: self.cursor + FRAME_PREFIX_SIZE,
            size: payload.len() as u32,
        });
        self.cursor += written;
        Ok(())
    }

    fn finish(self) -> Result<(AtomicWriteFile, Vec<RowLocation>, u64)> {
        let Self {
            atomic,
            mut writer,
            mut header,
            cursor,
            locations,
        } = self;
        header.row_count = locations.len() as u64;
        header.updated_at = now_millis();
        HeaderCodec::write(&mut writer, &header)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        drop(writer);
        Ok((atomic, locations, cursor))
    }
}

impl BinaryTable {
    /// Live versus dead bytes in the data file.
    pub fn garbage_stats(&self) -> Result<GarbageStats> {
        let file_bytes = std::fs::metadata(&self.path)
            .at(&self.path, 0, "stat")?
            .len();
        let entries = self.catalog.all_entries(self.table_id)?;
        let active_rows = entries.iter().filter(|entry| entry.is_active).count() as u64;
        let inactive_rows = entries.len() as u64 - active_rows;

        // Without index entries nothing is known to be dead.
        let live_bytes = if entries.is_empty() {
            file_bytes
        } else {
            HEADER_SIZE
                + entries
                    .iter()
                    .filter(|entry| entry.is_active)
                    .map(|entry| FRAME_PREFIX_SIZE + u64::from(entry.location.size))
                    .sum::<u64>()
        };

        Ok(GarbageStats {
            file_bytes,
            live_bytes,
            garbage_bytes: file_bytes.saturating_sub(live_bytes),
            active_rows,
            inactive_rows,
        })
    }

    /// Rewrite the file without dead bytes when the garbage ratio exceeds the configured
    /// threshold, or unconditionally with `force`.
    pub fn compact(&self, force: bool) -> Result<CompactionReport> {
        self.compact_with_progress(force, &mut NoProgress)
    }

    pub fn compact_with_progress<P>(&self, force: bool, progress: &mut P) -> Result<CompactionReport>
    where
        P: ProgressObserver + ?Sized,
    {
        let stats = self.garbage_stats()?;
        let ratio = stats.garbage_ratio();
        if !force && ratio <= self.options.compaction_threshold {
            tracing::debug!(
                table.id = self.table_id,
                compaction.garbage_ratio = ratio,
                compaction.threshold = self.options.compaction_threshold,
                "garbage below threshold; skipping compaction"
            );
            return Ok(CompactionReport {
                performed: false,
                rows: stats.active_rows,
                bytes_before: stats.file_bytes,
                bytes_after: stats.file_bytes,
                garbage_ratio: ratio,
            });
        }

        let lock = FileLock::try_exclusive(&self.path)?;
        let header = self.read_header(&mut lock.file())?;
        self.require_index(&header)?;
        let entries = self.catalog.active_entries(self.table_id)?;
        let outcome = self.rewrite(
            &lock,
            &header,
            entries
                .iter()
                .map(|entry| RowSource::Existing(entry.location)),
            entries.len(),
            progress,
        )?;

        let report = CompactionReport {
            performed: true,
            rows: outcome.rows,
            bytes_before: stats.file_bytes,
            bytes_after: outcome.bytes,
            garbage_ratio: ratio,
        };
        log::info!(
            "compacted table {}: {} rows, {} -> {} bytes",
            self.table_id,
            report.rows,
            report.bytes_before,
            report.bytes_after
        );
        Ok(report)
    }

    /// Refuse a rewrite that would drop rows the index no longer knows about.
    pub(super) fn require_index(&self, header: &FileHeader) -> Result<()> {
        if header.row_count > 0 && !self.catalog.has_entries(self.table_id)? {
            return Err(VtabError::Corruption {
                offset: HEADER_SIZE,
                reason: format!(
                    "row index for table {} is missing; rebuild it first",
                    self.table_id
                ),
            });
        }
        Ok(())
    }

    /// Write `sources` into a fresh file, swap it in and renumber the index from zero.
    ///
    /// Progress and cancellation are checked every `progress_interval` rows. A cancelled
    /// or failed rewrite leaves the original file and index untouched.
    pub(super) fn rewrite<'a, P, I>(
        &self,
        lock: &FileLock,
        header: &FileHeader,
        sources: I,
        total: usize,
        progress: &mut P,
    ) -> Result<RewriteOutcome>
    where
        P: ProgressObserver + ?Sized,
        I: IntoIterator<Item = RowSource<'a>>,
    {
        let mut source = lock.file();
        let file_len = source.metadata().at(&self.path, 0, "stat")?.len();
        let mut staged = StagedRewrite::prepare(&self.path, header)?;
        let interval = self.options.progress_interval();

        for (index, row) in sources.into_iter().enumerate() {
            if index % interval == 0 {
                if index > 0 {
                    progress.on_progress(percent(index, total));
                }
                if progress.is_cancelled() {
                    tracing::info!(
                        table.id = self.table_id,
                        rewrite.processed = index,
                        "rewrite cancelled; original file kept"
                    );
                    return Err(VtabError::Cancelled {
                        processed: index as u64,
                    });
                }
            }
            match row {
                RowSource::Fresh(payload) => staged.push(payload)?,
                RowSource::Existing(location) => {
                    let payload = self.copy_payload(&mut source, &location, file_len, index)?;
                    staged.push(&payload)?;
                }
            }
        }

        let (atomic, locations, bytes) = staged.finish()?;
        self.catalog
            .replace_entries_then(self.table_id, &locations, || {
                atomic.commit().at(&self.path, 0, "commit rewrite")
            })?;
        self.cache.invalidate(&self.path);
        progress.on_progress(100);

        Ok(RewriteOutcome {
            rows: locations.len() as u64,
            bytes,
        })
    }

    /// Raw payload bytes of an existing row, or an encoded placeholder when unreadable.
    fn copy_payload<R: Read + Seek>(
        &self,
        reader: &mut R,
        location: &RowLocation,
        file_len: u64,
        index: usize,
    ) -> Result<Vec<u8>> {
        if self.in_bounds(location, file_len) {
            if let Some(payload) = read_payload(reader, &self.path, location)? {
                return Ok(payload);
            }
        }
        tracing::warn!(
            row.position = index,
            row.offset = location.offset,
            row.size = location.size,
            "row unreadable during rewrite; writing placeholder row"
        );
        encode_row(&self.layout, &placeholder_row(&self.layout))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{rows, table};
    use super::*;
    use crate::types::{Cancellable, Value};
    use std::collections::BTreeMap;
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;

    #[test]
    fn tombstones_count_as_garbage() {
        let dir = TempDir::new().expect("tempdir");
        let table = table(&dir);
        table.write_all(&rows(4)).expect("write");
        let clean = table.garbage_stats().expect("stats");
        assert_eq!(clean.garbage_bytes, 0);
        assert_eq!(clean.live_bytes, clean.file_bytes);

        table.delete_rows(&[1, 2]).expect("delete");
        let stats = table.garbage_stats().expect("stats");
        assert_eq!(stats.active_rows, 2);
        assert_eq!(stats.inactive_rows, 2);
        assert_eq!(stats.file_bytes, clean.file_bytes);
        assert!((stats.garbage_ratio() - (stats.garbage_bytes as f64 / stats.file_bytes as f64)).abs() < 1e-9);
        assert!(stats.garbage_bytes > 0);
    }

    #[test]
    fn threshold_gates_unforced_compaction() {
        let dir = TempDir::new().expect("tempdir");
        let table = table(&dir);
        table.write_all(&rows(10)).expect("write");
        table.delete_rows(&[0]).expect("delete");

        let skipped = table.compact(false).expect("compact");
        assert!(!skipped.performed);
        assert_eq!(skipped.bytes_reclaimed(), 0);

        let forced = table.compact(true).expect("compact");
        assert!(forced.performed);
        assert_eq!(forced.rows, 9);
        assert!(forced.bytes_after < forced.bytes_before);
        assert_eq!(table.garbage_stats().expect("stats").garbage_bytes, 0);
        assert_eq!(table.read_all().expect("read"), rows(10)[1..].to_vec());
    }

    #[test]
    fn compaction_renumbers_and_drops_relocated_frames() {
        let dir = TempDir::new().expect("tempdir");
        let table = table(&dir);
        table.write_all(&rows(3)).expect("write");
        let entry = table
            .catalog()
            .entry_at(table.table_id(), 1)
            .expect("entry")
            .expect("row 1");
        table
            .catalog()
            .relocate(
                table.table_id(),
                &[(
                    entry.logical_row_order,
                    RowLocation {
                        offset: entry.location.offset,
                        size: 1,
                    },
                )],
            )
            .expect("shrink");
        table.cache().invalidate(table.path());
        table
            .update_many("Count", &BTreeMap::from([(1, Value::Integer(77))]))
            .expect("relocate");
        table.delete_rows(&[0]).expect("delete");

        let report = table.compact(false).expect("compact");
        assert!(report.performed);
        let orders: Vec<_> = table
            .catalog()
            .all_entries(table.table_id())
            .expect("entries")
            .iter()
            .map(|entry| entry.logical_row_order)
            .collect();
        assert_eq!(orders, [0, 1]);
        let all = table.read_all().expect("read");
        assert_eq!(all[0][2], Value::Integer(77));
        assert_eq!(all[1], rows(3)[2]);
    }

    #[test]
    fn cancelled_compaction_keeps_original() {
        let dir = TempDir::new().expect("tempdir");
        let table = table(&dir);
        table.write_all(&rows(5)).expect("write");
        table.delete_rows(&[0, 1, 2]).expect("delete");
        let before = std::fs::read(table.path()).expect("bytes");

        let mut observer = Cancellable::new(|_| {});
        observer.flag().store(true, Ordering::Relaxed);
        let err = table
            .compact_with_progress(true, &mut observer)
            .expect_err("cancelled");
        assert!(matches!(err, VtabError::Cancelled { processed: 0 }));
        assert_eq!(std::fs::read(table.path()).expect("bytes"), before);
        assert_eq!(table.read_all().expect("read"), rows(5)[3..].to_vec());
    }

    #[test]
    fn progress_reaches_completion() {
        let dir = TempDir::new().expect("tempdir");
        let table = table(&dir);
        table.write_all(&rows(6)).expect("write");
        let mut seen = Vec::new();
        table
            .compact_with_progress(true, &mut |percent: u8| seen.push(percent))
            .expect("compact");
        assert_eq!(seen.last(), Some(&100));
    }
}
