//! Binary encoding of cells and rows.

pub mod field;
pub mod row;

pub use field::{FieldCodec, truncate_utf8};
pub use row::{decode_row, encode_row};
