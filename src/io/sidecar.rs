//! Sidecar offset index persisted next to a data file.
//!
//! Layout: `[magic: 4][version: u32][source mtime ms: i64][row count: u32]` followed by
//! `row count` pairs of `[offset: u64][size: u32]`. Rows carry no timestamp; the whole
//! file is valid only while the data file's mtime does not exceed the recorded one.

use std::ffi::OsString;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use atomic_write_file::AtomicWriteFile;

use crate::constants::{
    SIDECAR_ENTRY_SIZE, SIDECAR_EXTENSION, SIDECAR_HEADER_SIZE, SIDECAR_MAGIC, SIDECAR_VERSION,
};
use crate::error::{Result, VtabError};
use crate::types::RowLocation;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SidecarIndex {
    pub source_mtime: i64,
    pub entries: Vec<RowLocation>,
}

/// `table.vbin` → `table.vbin.vtidx`
#[must_use]
pub fn sidecar_path(data_path: &Path) -> PathBuf {
    let mut name = data_path
        .file_name()
        .map(OsString::from)
        .unwrap_or_default();
    name.push(".");
    name.push(SIDECAR_EXTENSION);
    data_path.with_file_name(name)
}

pub fn encode(index: &SidecarIndex) -> Result<Vec<u8>> {
    let count = u32::try_from(index.entries.len()).map_err(|_| VtabError::InvalidSidecar {
        reason: "too many rows for sidecar".into(),
    })?;
    let mut buf = Vec::with_capacity(SIDECAR_HEADER_SIZE + index.entries.len() * SIDECAR_ENTRY_SIZE);
    buf.extend_from_slice(&SIDECAR_MAGIC);
    buf.extend_from_slice(&SIDECAR_VERSION.to_le_bytes());
    buf.extend_from_slice(&index.source_mtime.to_le_bytes());
    buf.extend_from_slice(&count.to_le_bytes());
    for entry in &index.entries {
        buf.extend_from_slice(&entry.offset.to_le_bytes());
        buf.extend_from_slice(&entry.size.to_le_bytes());
    }
    Ok(buf)
}

pub fn decode(bytes: &[u8]) -> Result<SidecarIndex> {
    if bytes.len() < SIDECAR_HEADER_SIZE {
        return Err(VtabError::InvalidSidecar {
            reason: "truncated header".into(),
        });
    }
    if bytes[..4] != SIDECAR_MAGIC {
        return Err(VtabError::InvalidSidecar {
            reason: "magic mismatch".into(),
        });
    }
    let version = u32::from_le_bytes(array(&bytes[4..8]));
    if version != SIDECAR_VERSION {
        return Err(VtabError::InvalidSidecar {
            reason: format!("unsupported version {version}"),
        });
    }
    let source_mtime = i64::from_le_bytes(array(&bytes[8..16]));
    let count = u32::from_le_bytes(array(&bytes[16..20])) as usize;
    let body = &bytes[SIDECAR_HEADER_SIZE..];
    if body.len() != count * SIDECAR_ENTRY_SIZE {
        return Err(VtabError::InvalidSidecar {
            reason: format!(
                "expected {count} entries, found {} bytes of entry data",
                body.len()
            ),
        });
    }
    let entries = body
        .chunks_exact(SIDECAR_ENTRY_SIZE)
        .map(|chunk| RowLocation {
            offset: u64::from_le_bytes(array(&chunk[..8])),
            size: u32::from_le_bytes(array(&chunk[8..12])),
        })
        .collect();
    Ok(SidecarIndex {
        source_mtime,
        entries,
    })
}

/// Replace the sidecar atomically.
pub fn write(path: &Path, index: &SidecarIndex) -> Result<()> {
    let bytes = encode(index)?;
    let mut file = AtomicWriteFile::options().open(path)?;
    file.write_all(&bytes)?;
    file.commit()?;
    Ok(())
}

/// Load a sidecar; `Ok(None)` when none exists.
pub fn read(path: &Path) -> Result<Option<SidecarIndex>> {
    match std::fs::read(path) {
        Ok(bytes) => decode(&bytes).map(Some),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

pub fn remove(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

fn array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    out
}
