//! Physical file formats: data file header, row frames and the sidecar index.

pub mod frame;
pub mod header;
pub mod sidecar;
