//! Framing for on-disk index files.
//!
//! Every frame is:
//! ```text
//! [version: 1 byte][length: 4 bytes LE][data: N bytes JSON][crc32: 4 bytes LE]
//! ```
//! Files start with [`MAGIC`] followed by the codec version.

use std::io::{Error as IoError, ErrorKind, Read, Result as IoResult, Write};

use crc32fast::Hasher;
use serde::{de::DeserializeOwned, Serialize};

const CODEC_VERSION: u8 = 1;

/// Frames larger than this are rejected before allocating.
const MAX_FRAME_SIZE: usize = 256 * 1024 * 1024;

/// Identifies company-matching index files.
pub const MAGIC: [u8; 4] = *b"CMIX";

/// Length of the file header.
pub const HEADER_LEN: u64 = 5;

fn checksum(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Serializes `value` into one checksummed frame.
pub fn encode<T: Serialize>(value: &T) -> IoResult<Vec<u8>> {
    let data = serde_json::to_vec(value)
        .map_err(|e| IoError::new(ErrorKind::InvalidData, format!("serialization failed: {e}")))?;
    if data.len() > MAX_FRAME_SIZE {
        return Err(IoError::new(
            ErrorKind::InvalidInput,
            format!("frame size {} exceeds maximum {MAX_FRAME_SIZE}", data.len()),
        ));
    }
    let len = u32::try_from(data.len())
        .map_err(|_| IoError::new(ErrorKind::InvalidInput, "frame length overflows u32"))?;

    let mut out = Vec::with_capacity(1 + 4 + data.len() + 4);
    out.push(CODEC_VERSION);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&data);
    out.extend_from_slice(&checksum(&data).to_le_bytes());
    Ok(out)
}

/// Reads one frame, verifying version and checksum.
///
/// A frame cut short by the end of the input yields
/// [`ErrorKind::UnexpectedEof`]; every other defect yields
/// [`ErrorKind::InvalidData`].
pub fn decode<T: DeserializeOwned>(reader: &mut impl Read) -> IoResult<T> {
    let mut version = [0u8; 1];
    reader.read_exact(&mut version)?;
    if version[0] != CODEC_VERSION {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("unsupported codec version: {} (expected {CODEC_VERSION})", version[0]),
        ));
    }

    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes)?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("frame size {len} exceeds maximum {MAX_FRAME_SIZE}"),
        ));
    }

    let mut data = vec![0u8; len];
    reader.read_exact(&mut data)?;

    let mut crc_bytes = [0u8; 4];
    reader.read_exact(&mut crc_bytes)?;
    let stored = u32::from_le_bytes(crc_bytes);
    let computed = checksum(&data);
    if stored != computed {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("CRC mismatch: stored={stored:08x}, computed={computed:08x}"),
        ));
    }

    serde_json::from_slice(&data)
        .map_err(|e| IoError::new(ErrorKind::InvalidData, format!("deserialization failed: {e}")))
}

/// Writes the file header.
pub fn write_header(writer: &mut impl Write) -> IoResult<()> {
    writer.write_all(&MAGIC)?;
    writer.write_all(&[CODEC_VERSION])
}

/// Reads and validates the file header, returning its version.
pub fn read_header(reader: &mut impl Read) -> IoResult<u8> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if magic != MAGIC {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("invalid magic bytes: expected {MAGIC:?}, got {magic:?}"),
        ));
    }

    let mut version = [0u8; 1];
    reader.read_exact(&mut version)?;
    if version[0] != CODEC_VERSION {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("unsupported file version: {}", version[0]),
        ));
    }
    Ok(version[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::Attribute;
    use crate::cluster::ClusterId;
    use crate::storage::{IndexEntry, JournalRecord, PassCommit};
    use chrono::{TimeZone, Utc};
    use std::io::Cursor;

    fn commit() -> PassCommit {
        PassCommit {
            records: vec![JournalRecord {
                attribute: Attribute::ContactEmail,
                entry: IndexEntry {
                    value: "domain.com".to_string(),
                    cluster_id: ClusterId::new(2),
                    prior_cluster_id: ClusterId::new(1),
                    source: "dit.datahub".to_string(),
                    timestamp: Utc.with_ymd_and_hms(2019, 1, 1, 0, 0, 0).unwrap(),
                },
            }],
            high_water: Some(ClusterId::new(2)),
        }
    }

    #[test]
    fn test_frame_carries_a_pass() {
        let encoded = encode(&commit()).unwrap();
        let decoded: PassCommit = decode(&mut Cursor::new(encoded)).unwrap();
        assert_eq!(decoded, commit());
    }

    #[test]
    fn test_detects_corruption() {
        let mut encoded = encode(&commit()).unwrap();
        encoded[10] ^= 0xFF;

        let err = decode::<PassCommit>(&mut Cursor::new(encoded)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }

    #[test]
    fn test_short_frame_is_unexpected_eof() {
        let encoded = encode(&commit()).unwrap();
        let torn = &encoded[..encoded.len() - 3];

        let err = decode::<PassCommit>(&mut Cursor::new(torn)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_rejects_oversized_frame() {
        let mut bad = vec![CODEC_VERSION];
        bad.extend_from_slice(&u32::MAX.to_le_bytes());

        let err = decode::<PassCommit>(&mut Cursor::new(bad)).unwrap_err();
        assert!(err.to_string().contains("exceeds maximum"));
    }

    #[test]
    fn test_header() {
        let mut buf = Vec::new();
        write_header(&mut buf).unwrap();
        assert_eq!(buf.len() as u64, HEADER_LEN);
        assert_eq!(read_header(&mut Cursor::new(&buf)).unwrap(), CODEC_VERSION);

        buf[0] = b'X';
        assert!(read_header(&mut Cursor::new(&buf)).is_err());
    }
}
