use crate::codec::row::{decode_row, placeholder_row};
use crate::constants::HEADER_SIZE;
use crate::error::{IoContext, Result, VtabError};
use crate::io::frame::FrameScanner;
use crate::types::RowData;

use super::{BinaryTable, read_payload};

impl BinaryTable {
    /// Every active row in logical order.
    ///
    /// Rows the index points at but the file cannot supply come back as rows of nulls, so
    /// the result length always matches the index. Without index entries the frames are
    /// scanned sequentially and the header's row count decides the result length.
    pub fn read_all(&self) -> Result<Vec<RowData>> {
        let mut file = self.open_read()?;
        let header = self.read_header(&mut file)?;
        let file_len = file.metadata().at(&self.path, 0, "stat")?.len();

        if !self.catalog.has_entries(self.table_id)? {
            if header.row_count == 0 {
                return Ok(Vec::new());
            }
            if !self.options.allow_sequential_fallback {
                return Err(VtabError::Corruption {
                    offset: HEADER_SIZE,
                    reason: format!(
                        "row index for table {} is missing; rebuild it first",
                        self.table_id
                    ),
                });
            }
            tracing::warn!(
                table.id = self.table_id,
                table.rows = header.row_count,
                "no row index entries; scanning data file sequentially"
            );
            let scanner = FrameScanner::new(
                &mut file,
                &self.layout,
                file_len,
                header.row_count,
                self.options.max_row_bytes,
            )?;
            return Ok(scanner
                .collect_rows()?
                .into_iter()
                .map(|scanned| scanned.row)
                .collect());
        }

        let locations = self.active_locations()?;
        if locations.len() as u64 != header.row_count {
            tracing::warn!(
                table.id = self.table_id,
                table.index_rows = locations.len(),
                table.header_rows = header.row_count,
                "row index and header disagree on row count"
            );
        }

        let mut rows = Vec::with_capacity(locations.len());
        let mut recovered = 0usize;
        for (position, location) in locations.iter().enumerate() {
            if !self.in_bounds(location, file_len) {
                tracing::warn!(
                    row.position = position,
                    row.offset = location.offset,
                    row.size = location.size,
                    row.file_len = file_len,
                    "index entry outside data file; using placeholder row"
                );
                rows.push(placeholder_row(&self.layout));
                recovered += 1;
                continue;
            }
            let decoded = read_payload(&mut file, &self.path, location)?
                .map(|payload| decode_row(&self.layout, &payload));
            match decoded {
                Some(Ok(row)) => rows.push(row),
                Some(Err(err)) => {
                    tracing::warn!(
                        row.position = position,
                        row.offset = location.offset,
                        error = %err,
                        "row payload undecodable; using placeholder row"
                    );
                    rows.push(placeholder_row(&self.layout));
                    recovered += 1;
                }
                None => {
                    tracing::warn!(
                        row.position = position,
                        row.offset = location.offset,
                        "row payload truncated; using placeholder row"
                    );
                    rows.push(placeholder_row(&self.layout));
                    recovered += 1;
                }
            }
        }
        tracing::debug!(
            table.id = self.table_id,
            table.rows = rows.len(),
            table.recovered = recovered,
            "read all rows"
        );
        Ok(rows)
    }

    /// One active row by 0-based position.
    pub fn read_one(&self, row: u64) -> Result<RowData> {
        let mut file = self.open_read()?;
        self.read_header(&mut file)?;
        let Some(location) = self.location_of(row)? else {
            return Err(VtabError::RowNotFound {
                row,
                available: self.catalog.active_count(self.table_id)?,
            });
        };

        let file_len = file.metadata().at(&self.path, 0, "stat")?.len();
        if !self.in_bounds(&location, file_len) {
            return Err(VtabError::Corruption {
                offset: location.offset,
                reason: format!(
                    "row {row} spans {}..{} beyond file length {file_len}",
                    location.offset,
                    location.end()
                ),
            });
        }
        match read_payload(&mut file, &self.path, &location)? {
            Some(payload) => decode_row(&self.layout, &payload),
            None => Err(VtabError::Corruption {
                offset: location.offset,
                reason: format!("row {row} payload truncated"),
            }),
        }
    }
}
