//! Row offset index: the SQLite catalog is authoritative, the cache keeps it warm.

pub mod cache;
pub mod catalog;
