//! Whole-row serialization: field slots concatenated in layout order.

use crate::codec::field::FieldCodec;
use crate::error::{Result, VtabError};
use crate::types::{RowData, RowLayout, Value};

/// Serialize `row` into one payload. The row must hold exactly one value per column.
pub fn encode_row(layout: &RowLayout, row: &[Value]) -> Result<Vec<u8>> {
    if row.len() != layout.len() {
        return Err(VtabError::RowWidthMismatch {
            expected: layout.len(),
            found: row.len(),
        });
    }
    let mut out = Vec::with_capacity(layout.payload_len().unwrap_or_default());
    for (column, value) in layout.columns().iter().zip(row) {
        FieldCodec::encode(column, value, &mut out)?;
    }
    Ok(out)
}

/// Deserialize a payload into exactly `layout.len()` values.
///
/// A short payload null-fills the columns it cannot cover and trailing bytes are
/// ignored. Fails only when a column's slot width is unknown, since every later
/// field would be misaligned.
pub fn decode_row(layout: &RowLayout, payload: &[u8]) -> Result<RowData> {
    let mut values = Vec::with_capacity(layout.len());
    let mut cursor = 0usize;
    let mut truncated_at = None;

    for (index, column) in layout.columns().iter().enumerate() {
        let Some(slot_len) = layout.slot_len(index) else {
            return Err(VtabError::FieldWidthUnknown {
                column: column.name.clone(),
                reason: format!("type '{}' declares no field length", column.data_type),
            });
        };
        match payload.get(cursor..cursor + slot_len) {
            Some(slot) => values.push(FieldCodec::decode(column, slot)),
            None => {
                truncated_at.get_or_insert(index);
                values.push(Value::Null);
            }
        }
        cursor += slot_len;
    }

    if let Some(index) = truncated_at {
        tracing::warn!(
            row.payload_len = payload.len(),
            row.expected_len = cursor,
            row.first_missing_column = index,
            "row payload shorter than layout; missing fields null-filled"
        );
    }
    Ok(values)
}

/// Pad a short row with nulls so it matches the layout width. Long rows are left as-is
/// and rejected by `encode_row`.
pub(crate) fn pad_row(layout: &RowLayout, row: &[Value]) -> RowData {
    let mut padded = row.to_vec();
    if padded.len() < layout.len() {
        padded.resize(layout.len(), Value::Null);
    }
    padded
}

/// A row of nulls standing in for one that could not be read.
pub(crate) fn placeholder_row(layout: &RowLayout) -> RowData {
    vec![Value::Null; layout.len()]
}
