//! Integrity inspection and index rebuild.

use std::io::{ErrorKind, Read, Seek, SeekFrom};

use crate::constants::{FRAME_PREFIX_SIZE, HEADER_SIZE};
use crate::error::{IoContext, Result};
use crate::io::frame::FrameScanner;
use crate::io::header::HeaderCodec;
use crate::lock::FileLock;
use crate::now_millis;
use crate::types::{IntegrityFinding, IntegrityFindingCode, IntegrityReport, RowLocation};

use super::BinaryTable;

impl BinaryTable {
    /// Check the header, index and frames against each other without changing anything.
    pub fn inspect(&self) -> Result<IntegrityReport> {
        let mut file = self.open_read()?;
        let header = self.read_header(&mut file)?;
        let file_len = file.metadata().at(&self.path, 0, "stat")?.len();
        let entries = self.catalog.active_entries(self.table_id)?;
        let mut findings = Vec::new();

        if header.row_count != entries.len() as u64 {
            findings.push(IntegrityFinding {
                code: IntegrityFindingCode::HeaderRowCountMismatch,
                row: None,
                message: format!(
                    "header records {} rows, index has {} active entries",
                    header.row_count,
                    entries.len()
                ),
            });
        }

        let mut spans: Vec<(u64, RowLocation)> = Vec::with_capacity(entries.len());
        for (position, entry) in entries.iter().enumerate() {
            let row = position as u64;
            let location = entry.location;
            if location.size > self.options.max_row_bytes {
                findings.push(IntegrityFinding {
                    code: IntegrityFindingCode::OversizedEntry,
                    row: Some(row),
                    message: format!(
                        "entry size {} exceeds limit {}",
                        location.size, self.options.max_row_bytes
                    ),
                });
                continue;
            }
            if location.frame_start() < HEADER_SIZE || location.end() > file_len {
                findings.push(IntegrityFinding {
                    code: IntegrityFindingCode::EntryPastEndOfFile,
                    row: Some(row),
                    message: format!(
                        "frame {}..{} outside data region {HEADER_SIZE}..{file_len}",
                        location.frame_start(),
                        location.end()
                    ),
                });
                continue;
            }
            let prefix = read_prefix(&mut file, &location).at(
                &self.path,
                location.frame_start(),
                "read frame prefix",
            )?;
            if prefix != Some(location.size) {
                findings.push(IntegrityFinding {
                    code: IntegrityFindingCode::FramePrefixMismatch,
                    row: Some(row),
                    message: format!(
                        "length prefix {} disagrees with index size {}",
                        prefix.map_or_else(|| "missing".to_string(), |len| len.to_string()),
                        location.size
                    ),
                });
            }
            spans.push((row, location));
        }

        spans.sort_by_key(|(_, location)| location.frame_start());
        for pair in spans.windows(2) {
            let (earlier_row, earlier) = pair[0];
            let (later_row, later) = pair[1];
            if earlier.end() > later.frame_start() {
                findings.push(IntegrityFinding {
                    code: IntegrityFindingCode::OverlappingEntries,
                    row: Some(later_row),
                    message: format!(
                        "row {later_row} at {} overlaps row {earlier_row} ending at {}",
                        later.frame_start(),
                        earlier.end()
                    ),
                });
            }
        }

        if !findings.is_empty() {
            tracing::warn!(
                table.id = self.table_id,
                inspect.findings = findings.len(),
                "data file integrity findings"
            );
        }
        Ok(IntegrityReport {
            file_bytes: file_len,
            header_rows: header.row_count,
            active_rows: entries.len() as u64,
            findings,
        })
    }

    /// Repopulate the catalog from a sequential scan of the data file.
    ///
    /// Frames are taken in physical order, so rows relocated by updates come back at
    /// the end and tombstoned or superseded frames are not recoverable as such. The
    /// header row count is reset to the number of rows indexed.
    pub fn rebuild_row_index(&self) -> Result<u64> {
        let lock = FileLock::try_exclusive(&self.path)?;
        let mut file = lock.file();
        let mut header = self.read_header(&mut file)?;
        let file_len = file.metadata().at(&self.path, 0, "stat")?.len();

        let scanned = FrameScanner::new(
            &mut file,
            &self.layout,
            file_len,
            header.row_count,
            self.options.max_row_bytes,
        )?
        .collect_rows()?;

        let mut locations = Vec::with_capacity(scanned.len());
        for row in &scanned {
            match row.location {
                Some(location) => locations.push(location),
                None => tracing::warn!(
                    row.ordinal = row.ordinal,
                    "frame missing from data file; not indexed"
                ),
            }
        }

        self.catalog.replace_entries(self.table_id, &locations)?;
        if header.row_count != locations.len() as u64 {
            header.row_count = locations.len() as u64;
            header.updated_at = now_millis();
            HeaderCodec::write(&mut file, &header)?;
            file.sync_data().at(&self.path, 0, "sync")?;
        }
        self.cache.invalidate(&self.path);

        tracing::info!(
            table.id = self.table_id,
            rebuild.rows = locations.len(),
            rebuild.recovered = scanned.iter().filter(|row| row.recovered).count(),
            "row index rebuilt"
        );
        Ok(locations.len() as u64)
    }
}

fn read_prefix<R: Read + Seek>(reader: &mut R, location: &RowLocation) -> std::io::Result<Option<u32>> {
    reader.seek(SeekFrom::Start(location.offset - FRAME_PREFIX_SIZE))?;
    let mut prefix = [0u8; FRAME_PREFIX_SIZE as usize];
    match reader.read_exact(&mut prefix) {
        Ok(()) => Ok(Some(u32::from_le_bytes(prefix))),
        Err(err) if err.kind() == ErrorKind::UnexpectedEof => Ok(None),
        Err(err) => Err(err),
    }
}
