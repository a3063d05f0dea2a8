//! Length-prefixed row frames and the resilient sequential scanner.
//!
//! A frame is `[u32 LE length][length bytes of row payload]`. The scanner never trusts a
//! length prefix blindly: implausible values are replaced by a clamped byte count so one
//! damaged frame cannot take the rest of the file down with it.

use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};

use crate::codec::row::{decode_row, placeholder_row};
use crate::constants::{FRAME_PREFIX_SIZE, HEADER_SIZE};
use crate::error::Result;
use crate::types::{RowData, RowLayout, RowLocation};

/// Write one frame as a single buffer and return the bytes written.
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> Result<u64> {
    let mut frame = Vec::with_capacity(FRAME_PREFIX_SIZE as usize + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(payload);
    writer.write_all(&frame)?;
    Ok(frame.len() as u64)
}

/// Where the scanner is within the current frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    ReadingLength,
    ReadingPayload { len: u32 },
    /// The current row could not be read as stored; a placeholder or clamped read stands in.
    Recovered,
    Done,
}

/// One row produced by the scanner.
#[derive(Debug, Clone, PartialEq)]
pub struct ScannedRow {
    pub ordinal: u64,
    /// Bytes that were actually consumed for this row, if any.
    pub location: Option<RowLocation>,
    pub row: RowData,
    pub recovered: bool,
}

/// Reads exactly `expected_rows` rows from the frames following the header.
pub struct FrameScanner<'a, R> {
    reader: R,
    layout: &'a RowLayout,
    file_len: u64,
    cursor: u64,
    ordinal: u64,
    expected_rows: u64,
    max_row_bytes: u32,
    state: ScanState,
}

impl<'a, R: Read + Seek> FrameScanner<'a, R> {
    pub fn new(
        mut reader: R,
        layout: &'a RowLayout,
        file_len: u64,
        expected_rows: u64,
        max_row_bytes: u32,
    ) -> Result<Self> {
        reader.seek(SeekFrom::Start(HEADER_SIZE))?;
        Ok(Self {
            reader,
            layout,
            file_len,
            cursor: HEADER_SIZE,
            ordinal: 0,
            expected_rows,
            max_row_bytes,
            state: if expected_rows == 0 {
                ScanState::Done
            } else {
                ScanState::ReadingLength
            },
        })
    }

    #[must_use]
    pub fn state(&self) -> ScanState {
        self.state
    }

    /// Read the next row. `Ok(None)` once `expected_rows` rows were produced; errors
    /// are reserved for I/O failures that are not end-of-file.
    pub fn next_row(&mut self) -> Result<Option<ScannedRow>> {
        if self.state == ScanState::Done {
            return Ok(None);
        }
        let ordinal = self.ordinal;
        self.state = ScanState::ReadingLength;

        let remaining = self.file_len.saturating_sub(self.cursor);
        if remaining < FRAME_PREFIX_SIZE {
            tracing::warn!(
                scan.ordinal = ordinal,
                scan.offset = self.cursor,
                "file ends before row frame; using placeholder row"
            );
            return Ok(Some(self.finish_row(None, None)));
        }

        let mut prefix = [0u8; FRAME_PREFIX_SIZE as usize];
        if eof_as_none(self.reader.read_exact(&mut prefix))?.is_none() {
            self.cursor = self.file_len;
            return Ok(Some(self.finish_row(None, None)));
        }
        self.cursor += FRAME_PREFIX_SIZE;

        let declared = u32::from_le_bytes(prefix);
        let available = remaining - FRAME_PREFIX_SIZE;
        let len = if declared > self.max_row_bytes || u64::from(declared) > available {
            let fallback = self
                .layout
                .payload_len()
                .map_or(u64::from(self.max_row_bytes), |len| len as u64);
            let substitute = available.min(fallback) as u32;
            tracing::warn!(
                scan.ordinal = ordinal,
                scan.offset = self.cursor - FRAME_PREFIX_SIZE,
                scan.declared_len = declared,
                scan.available = available,
                scan.substitute_len = substitute,
                "implausible row length; clamping"
            );
            self.state = ScanState::Recovered;
            substitute
        } else {
            declared
        };

        if self.state != ScanState::Recovered {
            self.state = ScanState::ReadingPayload { len };
        }
        let offset = self.cursor;
        let mut payload = vec![0u8; len as usize];
        if eof_as_none(self.reader.read_exact(&mut payload))?.is_none() {
            tracing::warn!(
                scan.ordinal = ordinal,
                scan.offset = offset,
                "row payload truncated; using placeholder row"
            );
            self.cursor = self.file_len;
            return Ok(Some(self.finish_row(None, None)));
        }
        self.cursor += u64::from(len);

        let location = RowLocation { offset, size: len };
        match decode_row(self.layout, &payload) {
            Ok(row) => Ok(Some(self.finish_row(Some(location), Some(row)))),
            Err(err) => {
                tracing::warn!(
                    scan.ordinal = ordinal,
                    scan.offset = offset,
                    error = %err,
                    "row payload undecodable; using placeholder row"
                );
                self.state = ScanState::Recovered;
                Ok(Some(self.finish_row(Some(location), None)))
            }
        }
    }

    /// Drain the scanner into a row list.
    pub fn collect_rows(mut self) -> Result<Vec<ScannedRow>> {
        let mut rows = Vec::with_capacity(usize::try_from(self.expected_rows).unwrap_or(0));
        while let Some(row) = self.next_row()? {
            rows.push(row);
        }
        Ok(rows)
    }

    fn finish_row(&mut self, location: Option<RowLocation>, row: Option<RowData>) -> ScannedRow {
        let recovered = row.is_none() || self.state == ScanState::Recovered;
        let scanned = ScannedRow {
            ordinal: self.ordinal,
            location,
            row: row.unwrap_or_else(|| placeholder_row(self.layout)),
            recovered,
        };
        self.ordinal += 1;
        self.state = if self.ordinal >= self.expected_rows {
            ScanState::Done
        } else {
            ScanState::ReadingLength
        };
        scanned
    }
}

fn eof_as_none(result: std::io::Result<()>) -> Result<Option<()>> {
    match result {
        Ok(()) => Ok(Some(())),
        Err(err) if err.kind() == ErrorKind::UnexpectedEof => Ok(None),
        Err(err) => Err(err.into()),
    }
}
