//! Fixed-width encoding of a single typed cell.
//!
//! Every column owns a slot whose width depends only on its type and, for TEXT, on its
//! name. Text-like slots are `[u32 LE length][UTF-8 bytes][zero padding]`; oversize text
//! is truncated on write rather than rejected, so existing files keep their layout.

use serde_json::{Map, Value as JsonValue};

use crate::constants::{
    COMMENT_COLUMN, COMMENT_FIELD_MAX_LENGTH, EXT_COLUMN, EXT_FIELD_MAX_LENGTH,
    FIELD_LENGTH_PREFIX, FIELD_LENGTH_PROPERTY, JSON_PROPERTIES_MAX_LENGTH, LABEL_COLUMN,
    LABEL_FIELD_MAX_LENGTH, MAX_DECLARED_FIELD_LENGTH, TEXT_DECODE_SAFETY_CAP,
    TEXT_FIELD_MAX_LENGTH,
};
use crate::error::{Result, VtabError};
use crate::types::{ColumnDataType, ColumnInfo, PinState, Value};

/// Longest prefix of `text` that fits in `max_bytes` without splitting a character.
#[must_use]
pub fn truncate_utf8(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

pub struct FieldCodec;

impl FieldCodec {
    /// Content capacity of a text-like column, excluding the length prefix.
    #[must_use]
    pub fn text_capacity(column: &ColumnInfo) -> Option<usize> {
        match column.data_type {
            ColumnDataType::Text => Some(match column.name.as_str() {
                LABEL_COLUMN => LABEL_FIELD_MAX_LENGTH,
                COMMENT_COLUMN => COMMENT_FIELD_MAX_LENGTH,
                EXT_COLUMN => EXT_FIELD_MAX_LENGTH,
                _ => TEXT_FIELD_MAX_LENGTH,
            }),
            ColumnDataType::JsonProperties => Some(JSON_PROPERTIES_MAX_LENGTH),
            _ => None,
        }
    }

    /// Total slot width of `column`, or `None` for an unsupported column without a
    /// usable declared width.
    #[must_use]
    pub fn slot_len(column: &ColumnInfo) -> Option<usize> {
        match &column.data_type {
            ColumnDataType::Text | ColumnDataType::JsonProperties => {
                Self::text_capacity(column).map(|cap| FIELD_LENGTH_PREFIX + cap)
            }
            ColumnDataType::Integer | ColumnDataType::InstructionId | ColumnDataType::TimesetId => {
                Some(4)
            }
            ColumnDataType::Real => Some(8),
            ColumnDataType::Boolean | ColumnDataType::PinStateId => Some(1),
            ColumnDataType::Unsupported(_) => column
                .data_properties
                .get(FIELD_LENGTH_PROPERTY)
                .and_then(JsonValue::as_u64)
                .and_then(|len| usize::try_from(len).ok())
                .filter(|len| *len > 0 && *len <= MAX_DECLARED_FIELD_LENGTH),
        }
    }

    /// Append the encoded slot for `value` to `out`.
    pub fn encode(column: &ColumnInfo, value: &Value, out: &mut Vec<u8>) -> Result<()> {
        match &column.data_type {
            ColumnDataType::Text => {
                let cap = Self::text_capacity(column).unwrap_or(TEXT_FIELD_MAX_LENGTH);
                let text = match value {
                    Value::Null => String::new(),
                    Value::Text(text) => text.clone(),
                    other => other.to_display_string(),
                };
                write_text_slot(out, &text, cap);
            }
            ColumnDataType::JsonProperties => {
                let compact = match value {
                    Value::Json(json) => serde_json::to_string(json)?,
                    Value::Text(text) => serde_json::from_str::<JsonValue>(text)
                        .map(|json| json.to_string())
                        .unwrap_or_else(|_| "{}".to_string()),
                    _ => "{}".to_string(),
                };
                write_text_slot(out, &compact, JSON_PROPERTIES_MAX_LENGTH);
            }
            ColumnDataType::PinStateId => {
                out.push(pin_for(value).symbol() as u8);
            }
            ColumnDataType::Integer | ColumnDataType::InstructionId | ColumnDataType::TimesetId => {
                // Low 32 bits; INTEGER reads them back signed, ids unsigned.
                let raw = integer_for(value) as u32;
                out.extend_from_slice(&raw.to_le_bytes());
            }
            ColumnDataType::Real => {
                out.extend_from_slice(&real_for(value).to_le_bytes());
            }
            ColumnDataType::Boolean => {
                out.push(u8::from(bool_for(value)));
            }
            ColumnDataType::Unsupported(type_name) => {
                return Err(VtabError::UnsupportedColumnType {
                    column: column.name.clone(),
                    type_name: type_name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Decode one slot. `slot` must be exactly `slot_len(column)` bytes; damaged
    /// contents degrade to `Null` or a clamped value instead of failing.
    #[must_use]
    pub fn decode(column: &ColumnInfo, slot: &[u8]) -> Value {
        match &column.data_type {
            ColumnDataType::Text => {
                let bytes = read_text_slot(column, slot);
                Value::Text(String::from_utf8_lossy(bytes).into_owned())
            }
            ColumnDataType::JsonProperties => {
                let bytes = read_text_slot(column, slot);
                if bytes.is_empty() {
                    return Value::Json(JsonValue::Object(Map::new()));
                }
                match serde_json::from_slice::<JsonValue>(bytes) {
                    Ok(json) => Value::Json(json),
                    Err(err) => {
                        tracing::warn!(
                            field.column = %column.name,
                            error = %err,
                            "malformed JSON properties; using empty object"
                        );
                        Value::Json(JsonValue::Object(Map::new()))
                    }
                }
            }
            ColumnDataType::PinStateId => match slot.first().copied().and_then(PinState::from_byte)
            {
                Some(pin) => Value::Pin(pin),
                None => {
                    tracing::warn!(
                        field.column = %column.name,
                        field.byte = slot.first().copied().unwrap_or_default(),
                        "invalid pin state byte"
                    );
                    Value::Null
                }
            },
            ColumnDataType::Integer => match slot_array::<4>(slot) {
                Some(raw) => Value::Integer(i64::from(i32::from_le_bytes(raw))),
                None => Value::Null,
            },
            ColumnDataType::InstructionId | ColumnDataType::TimesetId => {
                match slot_array::<4>(slot) {
                    Some(raw) => Value::Integer(i64::from(u32::from_le_bytes(raw))),
                    None => Value::Null,
                }
            }
            ColumnDataType::Real => match slot_array::<8>(slot) {
                Some(raw) => Value::Real(f64::from_le_bytes(raw)),
                None => Value::Null,
            },
            ColumnDataType::Boolean => match slot.first() {
                Some(byte) => Value::Bool(*byte != 0),
                None => Value::Null,
            },
            ColumnDataType::Unsupported(_) => Value::Null,
        }
    }

    /// The value a cell holds after a write/read cycle: text truncated to its slot,
    /// nulls replaced by type defaults, integers wrapped to 32 bits, unknown pin
    /// symbols turned into `X`, unparsable JSON turned into `{}`.
    pub fn normalize(column: &ColumnInfo, value: &Value) -> Result<Value> {
        let mut buf = Vec::new();
        Self::encode(column, value, &mut buf)?;
        Ok(Self::decode(column, &buf))
    }
}

fn write_text_slot(out: &mut Vec<u8>, text: &str, capacity: usize) {
    let kept = truncate_utf8(text, capacity);
    if kept.len() < text.len() {
        tracing::debug!(
            field.original_len = text.len(),
            field.kept_len = kept.len(),
            "text truncated to slot capacity"
        );
    }
    out.extend_from_slice(&(kept.len() as u32).to_le_bytes());
    out.extend_from_slice(kept.as_bytes());
    out.resize(out.len() + (capacity - kept.len()), 0);
}

fn read_text_slot<'a>(column: &ColumnInfo, slot: &'a [u8]) -> &'a [u8] {
    let Some(prefix) = slot_array::<4>(slot) else {
        return &[];
    };
    let declared = u32::from_le_bytes(prefix) as usize;
    let limit = (slot.len() - FIELD_LENGTH_PREFIX).min(TEXT_DECODE_SAFETY_CAP);
    let len = if declared > limit {
        tracing::warn!(
            field.column = %column.name,
            field.declared_len = declared,
            field.limit = limit,
            "text length exceeds slot; clamping"
        );
        limit
    } else {
        declared
    };
    &slot[FIELD_LENGTH_PREFIX..FIELD_LENGTH_PREFIX + len]
}

fn slot_array<const N: usize>(slot: &[u8]) -> Option<[u8; N]> {
    slot.get(..N).and_then(|bytes| <[u8; N]>::try_from(bytes).ok())
}

fn pin_for(value: &Value) -> PinState {
    match value {
        Value::Pin(pin) => *pin,
        Value::Text(text) => {
            let mut chars = text.trim().chars();
            match (chars.next(), chars.next()) {
                (Some(symbol), None) => PinState::from_symbol(symbol).unwrap_or(PinState::X),
                _ => PinState::X,
            }
        }
        Value::Integer(0) => PinState::Zero,
        Value::Integer(1) => PinState::One,
        _ => PinState::X,
    }
}

fn integer_for(value: &Value) -> i64 {
    match value {
        Value::Integer(v) => *v,
        Value::Real(v) => *v as i64,
        Value::Bool(v) => i64::from(*v),
        Value::Text(text) => text.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

fn real_for(value: &Value) -> f64 {
    match value {
        Value::Real(v) => *v,
        Value::Integer(v) => *v as f64,
        Value::Bool(v) => f64::from(u8::from(*v)),
        Value::Text(text) => text.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn bool_for(value: &Value) -> bool {
    match value {
        Value::Bool(v) => *v,
        Value::Integer(v) => *v != 0,
        Value::Real(v) => *v != 0.0,
        Value::Text(text) => matches!(text.trim().to_ascii_lowercase().as_str(), "1" | "true"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn column(name: &str, data_type: ColumnDataType) -> ColumnInfo {
        ColumnInfo::new(name, 0, data_type)
    }

    fn round_trip(column: &ColumnInfo, value: Value) -> Value {
        let mut buf = Vec::new();
        FieldCodec::encode(column, &value, &mut buf).expect("encode");
        assert_eq!(Some(buf.len()), FieldCodec::slot_len(column));
        FieldCodec::decode(column, &buf)
    }

    #[test]
    fn name_policy_sets_text_caps() {
        let slot = |name: &str| FieldCodec::slot_len(&column(name, ColumnDataType::Text));
        assert_eq!(slot("Label"), Some(4 + 15));
        assert_eq!(slot("Comment"), Some(4 + 30));
        assert_eq!(slot("EXT"), Some(4 + 5));
        assert_eq!(slot("label"), Some(4 + 256));
        assert_eq!(slot("Anything"), Some(4 + 256));
        assert_eq!(
            FieldCodec::slot_len(&column("Props", ColumnDataType::JsonProperties)),
            Some(4 + 1024)
        );
    }

    #[test]
    fn text_truncates_silently() {
        let label = column("Label", ColumnDataType::Text);
        let decoded = round_trip(&label, Value::from("ABCDEFGHIJKLMNOPQRSTUVWXYZ"));
        assert_eq!(decoded, Value::from("ABCDEFGHIJKLMNO"));

        assert_eq!(round_trip(&label, Value::from("")), Value::from(""));
        assert_eq!(round_trip(&label, Value::Null), Value::from(""));
    }

    #[test]
    fn truncation_keeps_char_boundaries() {
        assert_eq!(truncate_utf8("héllo", 2), "h");
        assert_eq!(truncate_utf8("héllo", 3), "hé");
        assert_eq!(truncate_utf8("abc", 10), "abc");
        let ext = column("EXT", ColumnDataType::Text);
        assert_eq!(round_trip(&ext, Value::from("ééé")), Value::from("éé"));
    }

    #[test]
    fn all_pin_states_survive() {
        let pin = column("P1", ColumnDataType::PinStateId);
        for state in PinState::ALL {
            assert_eq!(round_trip(&pin, Value::Pin(state)), Value::Pin(state));
            let lower = state.symbol().to_ascii_lowercase().to_string();
            assert_eq!(round_trip(&pin, Value::Text(lower)), Value::Pin(state));
        }
        for invalid in [Value::Null, Value::from(""), Value::from("Q"), Value::from("01")] {
            assert_eq!(round_trip(&pin, invalid), Value::Pin(PinState::X));
        }
    }

    #[test]
    fn integers_wrap_to_32_bits() {
        let count = column("Count", ColumnDataType::Integer);
        for v in [0i64, -3, i64::from(i32::MAX), i64::from(i32::MIN)] {
            assert_eq!(round_trip(&count, Value::Integer(v)), Value::Integer(v));
        }
        assert_eq!(
            round_trip(&count, Value::Integer(i64::from(u32::MAX))),
            Value::Integer(-1)
        );
        let timeset = column("TimeSet", ColumnDataType::TimesetId);
        assert_eq!(
            round_trip(&timeset, Value::Integer(i64::from(u32::MAX))),
            Value::Integer(i64::from(u32::MAX))
        );
        assert_eq!(round_trip(&count, Value::from("42")), Value::Integer(42));
    }

    #[test]
    fn reals_and_booleans() {
        let real = column("Voltage", ColumnDataType::Real);
        for v in [f64::MIN, f64::MAX, 0.0, -1.5] {
            assert_eq!(round_trip(&real, Value::Real(v)), Value::Real(v));
        }
        let flag = column("Capture", ColumnDataType::Boolean);
        assert_eq!(round_trip(&flag, Value::Bool(true)), Value::Bool(true));
        assert_eq!(round_trip(&flag, Value::Bool(false)), Value::Bool(false));
        assert_eq!(round_trip(&flag, Value::Null), Value::Bool(false));
    }

    #[test]
    fn json_properties_default_to_empty_object() {
        let props = column("Props", ColumnDataType::JsonProperties);
        let valid = json!({"channels": 2, "name": "pin"});
        assert_eq!(round_trip(&props, Value::Json(valid.clone())), Value::Json(valid));
        assert_eq!(round_trip(&props, Value::Null), Value::Json(json!({})));
        assert_eq!(round_trip(&props, Value::from("{not json")), Value::Json(json!({})));
        assert_eq!(
            round_trip(&props, Value::from(r#"{"a": 1}"#)),
            Value::Json(json!({"a": 1}))
        );
    }

    #[test]
    fn oversized_json_truncates_then_decodes_empty() {
        let props = column("Props", ColumnDataType::JsonProperties);
        let big = json!({ "blob": "x".repeat(2000) });
        assert_eq!(round_trip(&props, Value::Json(big)), Value::Json(json!({})));
    }

    #[test]
    fn corrupt_text_length_is_clamped() {
        let label = column("Label", ColumnDataType::Text);
        let mut buf = Vec::new();
        FieldCodec::encode(&label, &Value::from("ABC"), &mut buf).expect("encode");
        buf[..4].copy_from_slice(&u32::MAX.to_le_bytes());
        let Value::Text(text) = FieldCodec::decode(&label, &buf) else {
            panic!("expected text");
        };
        assert_eq!(text.len(), 15);
        assert!(text.starts_with("ABC"));
    }

    #[test]
    fn unsupported_columns_refuse_encoding() {
        let blob = column("Blob", ColumnDataType::Unsupported("BLOB".into()));
        assert_eq!(FieldCodec::slot_len(&blob), None);
        let err = FieldCodec::encode(&blob, &Value::Null, &mut Vec::new()).expect_err("encode");
        assert!(matches!(err, VtabError::UnsupportedColumnType { .. }));

        let sized = blob.with_property(FIELD_LENGTH_PROPERTY, json!(12));
        assert_eq!(FieldCodec::slot_len(&sized), Some(12));
        assert_eq!(FieldCodec::decode(&sized, &[7u8; 12]), Value::Null);
    }
}
