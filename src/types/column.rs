//! Column descriptions and the physical row layout derived from them.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::codec::field::FieldCodec;
use crate::error::{Result, VtabError};

/// Declared type of a column.
///
/// `Unsupported` keeps the raw type string of columns this engine cannot encode; such
/// columns can still be skipped on read when their slot width is declared.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ColumnDataType {
    Text,
    Integer,
    Real,
    Boolean,
    InstructionId,
    TimesetId,
    PinStateId,
    JsonProperties,
    Unsupported(String),
}

impl ColumnDataType {
    /// Parse the type string stored in the column configuration table.
    #[must_use]
    pub fn parse(type_name: &str) -> Self {
        match type_name.trim().to_ascii_uppercase().as_str() {
            "TEXT" => Self::Text,
            "INTEGER" => Self::Integer,
            "REAL" => Self::Real,
            "BOOLEAN" => Self::Boolean,
            "INSTRUCTION_ID" => Self::InstructionId,
            "TIMESET_ID" => Self::TimesetId,
            "PIN_STATE_ID" => Self::PinStateId,
            "JSON_PROPERTIES" => Self::JsonProperties,
            _ => Self::Unsupported(type_name.to_string()),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Text => "TEXT",
            Self::Integer => "INTEGER",
            Self::Real => "REAL",
            Self::Boolean => "BOOLEAN",
            Self::InstructionId => "INSTRUCTION_ID",
            Self::TimesetId => "TIMESET_ID",
            Self::PinStateId => "PIN_STATE_ID",
            Self::JsonProperties => "JSON_PROPERTIES",
            Self::Unsupported(name) => name,
        }
    }
}

impl fmt::Display for ColumnDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One column of a vector table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    /// Position of the field within the physical row.
    pub order: i32,
    pub data_type: ColumnDataType,
    /// Hidden columns still occupy their slot.
    #[serde(default = "default_visible")]
    pub is_visible: bool,
    #[serde(default)]
    pub data_properties: Map<String, JsonValue>,
}

fn default_visible() -> bool {
    true
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, order: i32, data_type: ColumnDataType) -> Self {
        Self {
            name: name.into(),
            order,
            data_type,
            is_visible: true,
            data_properties: Map::new(),
        }
    }

    pub fn hidden(mut self) -> Self {
        self.is_visible = false;
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.data_properties.insert(key.into(), value);
        self
    }
}

/// Validated, order-sorted column list describing the physical row layout.
///
/// The layout is immutable once rows are written; changing it means rewriting every row.
#[derive(Debug, Clone, PartialEq)]
pub struct RowLayout {
    columns: Vec<ColumnInfo>,
    slots: Vec<Option<usize>>,
}

impl RowLayout {
    pub fn new(mut columns: Vec<ColumnInfo>) -> Result<Self> {
        if columns.is_empty() {
            return Err(VtabError::InvalidLayout {
                reason: "a table needs at least one column".into(),
            });
        }
        columns.sort_by_key(|column| column.order);

        let mut seen = HashSet::with_capacity(columns.len());
        for column in &columns {
            if !seen.insert(column.name.as_str()) {
                return Err(VtabError::InvalidLayout {
                    reason: format!("duplicate column name '{}'", column.name),
                });
            }
        }

        let slots = columns.iter().map(FieldCodec::slot_len).collect();
        Ok(Self { columns, slots })
    }

    #[must_use]
    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn column_count(&self) -> u32 {
        u32::try_from(self.columns.len()).unwrap_or(u32::MAX)
    }

    /// Slot width of the column at `index`, `None` when it cannot be determined.
    #[must_use]
    pub fn slot_len(&self, index: usize) -> Option<usize> {
        self.slots.get(index).copied().flatten()
    }

    #[must_use]
    pub fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column.name == name)
    }

    pub fn require_position(&self, name: &str) -> Result<usize> {
        self.position(name).ok_or_else(|| VtabError::UnknownColumn {
            column: name.to_string(),
        })
    }

    /// Total payload width of a serialized row, `None` if any slot is undeterminable.
    #[must_use]
    pub fn payload_len(&self) -> Option<usize> {
        self.slots.iter().try_fold(0usize, |acc, slot| slot.map(|len| acc + len))
    }
}
