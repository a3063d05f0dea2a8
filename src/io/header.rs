use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};

use crate::constants::{FORMAT_VERSION, HEADER_SIZE, MAGIC};
use crate::error::{Result, VtabError};
use crate::types::FileHeader;

// [magic: 8][format: u32][schema: u32][rows: u64][columns: u32]
// [created: i64][updated: i64][compression: u8][reserved: 19]
const HEADER_LEN: usize = HEADER_SIZE as usize;

pub struct HeaderCodec;

impl HeaderCodec {
    pub fn write<W: Write + Seek>(writer: &mut W, header: &FileHeader) -> Result<()> {
        writer.seek(SeekFrom::Start(0))?;
        writer.write_all(&Self::encode(header))?;
        Ok(())
    }

    pub fn read<R: Read + Seek>(reader: &mut R) -> Result<FileHeader> {
        reader.seek(SeekFrom::Start(0))?;
        let mut buf = [0u8; HEADER_LEN];
        reader.read_exact(&mut buf).map_err(|err| {
            if err.kind() == ErrorKind::UnexpectedEof {
                VtabError::InvalidHeader {
                    reason: "file shorter than header".into(),
                }
            } else {
                VtabError::Io(err)
            }
        })?;
        Self::decode(&buf)
    }

    #[must_use]
    pub fn encode(header: &FileHeader) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[..8].copy_from_slice(&header.magic);
        buf[8..12].copy_from_slice(&header.format_version.to_le_bytes());
        buf[12..16].copy_from_slice(&header.schema_version.to_le_bytes());
        buf[16..24].copy_from_slice(&header.row_count.to_le_bytes());
        buf[24..28].copy_from_slice(&header.column_count.to_le_bytes());
        buf[28..36].copy_from_slice(&header.created_at.to_le_bytes());
        buf[36..44].copy_from_slice(&header.updated_at.to_le_bytes());
        buf[44] = header.compression;
        buf
    }

    pub fn decode(buf: &[u8; HEADER_LEN]) -> Result<FileHeader> {
        let mut magic = [0u8; 8];
        magic.copy_from_slice(&buf[..8]);
        if magic != MAGIC {
            return Err(VtabError::InvalidHeader {
                reason: "magic mismatch".into(),
            });
        }
        let format_version = u32::from_le_bytes(field(buf, 8));
        if format_version != FORMAT_VERSION {
            return Err(VtabError::InvalidHeader {
                reason: format!("unsupported format version {format_version}"),
            });
        }
        Ok(FileHeader {
            magic,
            format_version,
            schema_version: u32::from_le_bytes(field(buf, 12)),
            row_count: u64::from_le_bytes(field(buf, 16)),
            column_count: u32::from_le_bytes(field(buf, 24)),
            created_at: i64::from_le_bytes(field(buf, 28)),
            updated_at: i64::from_le_bytes(field(buf, 36)),
            compression: buf[44],
        })
    }
}

fn field<const N: usize>(buf: &[u8; HEADER_LEN], at: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&buf[at..at + N]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn header_layout_is_stable() {
        let header = FileHeader {
            row_count: 3,
            ..FileHeader::new(7, 4, 1_700_000_000_000)
        };
        let mut cursor = Cursor::new(Vec::new());
        HeaderCodec::write(&mut cursor, &header).expect("write");
        let bytes = cursor.get_ref().clone();
        assert_eq!(bytes.len(), HEADER_LEN);
        assert_eq!(&bytes[..8], b"VTABBIN\0");
        assert_eq!(&bytes[12..16], &7u32.to_le_bytes());
        assert_eq!(&bytes[16..24], &3u64.to_le_bytes());
        assert!(bytes[45..].iter().all(|b| *b == 0));

        assert_eq!(HeaderCodec::read(&mut cursor).expect("read"), header);
    }

    #[test]
    fn bad_magic_and_truncation_are_rejected() {
        let mut bytes = HeaderCodec::encode(&FileHeader::new(1, 1, 0)).to_vec();
        bytes[0] = b'X';
        let err = HeaderCodec::read(&mut Cursor::new(bytes)).expect_err("magic");
        assert!(matches!(err, VtabError::InvalidHeader { .. }));

        let short = HeaderCodec::encode(&FileHeader::new(1, 1, 0))[..40].to_vec();
        let err = HeaderCodec::read(&mut Cursor::new(short)).expect_err("short");
        assert!(matches!(err, VtabError::InvalidHeader { reason } if reason.contains("shorter")));
    }
}
