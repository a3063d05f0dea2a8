//! Cell values and pin states.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// One serialized row: a value per layout column, in layout order.
pub type RowData = Vec<Value>;

/// Logic state of a pin for one vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PinState {
    #[serde(rename = "0")]
    Zero,
    #[serde(rename = "1")]
    One,
    X,
    L,
    H,
    S,
    V,
    M,
}

impl PinState {
    pub const ALL: [PinState; 8] = [
        PinState::Zero,
        PinState::One,
        PinState::X,
        PinState::L,
        PinState::H,
        PinState::S,
        PinState::V,
        PinState::M,
    ];

    /// Parse a stored or typed symbol; lowercase letters are accepted.
    #[must_use]
    pub fn from_symbol(symbol: char) -> Option<Self> {
        match symbol.to_ascii_uppercase() {
            '0' => Some(Self::Zero),
            '1' => Some(Self::One),
            'X' => Some(Self::X),
            'L' => Some(Self::L),
            'H' => Some(Self::H),
            'S' => Some(Self::S),
            'V' => Some(Self::V),
            'M' => Some(Self::M),
            _ => None,
        }
    }

    #[must_use]
    pub fn from_byte(byte: u8) -> Option<Self> {
        if byte.is_ascii() {
            Self::from_symbol(byte as char)
        } else {
            None
        }
    }

    #[must_use]
    pub fn symbol(self) -> char {
        match self {
            Self::Zero => '0',
            Self::One => '1',
            Self::X => 'X',
            Self::L => 'L',
            Self::H => 'H',
            Self::S => 'S',
            Self::V => 'V',
            Self::M => 'M',
        }
    }
}

impl fmt::Display for PinState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

/// A single cell.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Value {
    #[default]
    Null,
    Text(String),
    Integer(i64),
    Real(f64),
    Bool(bool),
    Pin(PinState),
    Json(JsonValue),
}

impl Value {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// Render the value the way a text cell would display it.
    #[must_use]
    pub fn to_display_string(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Text(text) => text.clone(),
            Self::Integer(v) => v.to_string(),
            Self::Real(v) => v.to_string(),
            Self::Bool(v) => v.to_string(),
            Self::Pin(pin) => pin.symbol().to_string(),
            Self::Json(json) => json.to_string(),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<PinState> for Value {
    fn from(value: PinState) -> Self {
        Self::Pin(value)
    }
}

impl From<JsonValue> for Value {
    fn from(value: JsonValue) -> Self {
        Self::Json(value)
    }
}
