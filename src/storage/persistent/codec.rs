//! Framing for journal records.
//!
//! ```text
//! file:   [MAGIC: 4 bytes][VERSION: 1 byte][record]*
//! record: [version: 1 byte][length: 4 bytes LE][JSON payload][crc32: 4 bytes LE]
//! ```
//!
//! JSON keeps the payload readable with ordinary tools; the checksum catches
//! torn or corrupted tails after a crash.

use std::io::{Error as IoError, ErrorKind, Read, Result as IoResult, Write};

use crc32fast::Hasher;
use serde::{de::DeserializeOwned, Serialize};

const CODEC_VERSION: u8 = 1;

/// Identifies a case journal file.
pub(crate) const MAGIC: [u8; 4] = *b"CASE";

fn checksum(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

fn invalid(message: String) -> IoError {
    IoError::new(ErrorKind::InvalidData, message)
}

/// Frame one record. Payloads larger than `max_len` are refused so that a
/// record written here can always be read back.
pub(crate) fn encode<T: Serialize>(value: &T, max_len: usize) -> IoResult<Vec<u8>> {
    let data = serde_json::to_vec(value).map_err(|e| invalid(format!("serialization failed: {e}")))?;
    if data.len() > max_len {
        return Err(invalid(format!(
            "record of {} bytes exceeds limit of {max_len}",
            data.len()
        )));
    }
    let len = u32::try_from(data.len())
        .map_err(|_| invalid(format!("record of {} bytes is not addressable", data.len())))?;

    let mut out = Vec::with_capacity(data.len() + 9);
    out.push(CODEC_VERSION);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&data);
    out.extend_from_slice(&checksum(&data).to_le_bytes());
    Ok(out)
}

/// Read one record, verifying version, length limit and checksum.
pub(crate) fn decode<T: DeserializeOwned>(reader: &mut impl Read, max_len: usize) -> IoResult<T> {
    let mut version = [0u8; 1];
    reader.read_exact(&mut version)?;
    if version[0] != CODEC_VERSION {
        return Err(invalid(format!(
            "unsupported record version {} (expected {CODEC_VERSION})",
            version[0]
        )));
    }

    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes)?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > max_len {
        return Err(invalid(format!("record of {len} bytes exceeds limit of {max_len}")));
    }

    let mut data = vec![0u8; len];
    reader.read_exact(&mut data)?;

    let mut crc_bytes = [0u8; 4];
    reader.read_exact(&mut crc_bytes)?;
    let stored = u32::from_le_bytes(crc_bytes);
    let computed = checksum(&data);
    if stored != computed {
        return Err(invalid(format!(
            "checksum mismatch: stored={stored:08x}, computed={computed:08x}"
        )));
    }

    serde_json::from_slice(&data).map_err(|e| invalid(format!("deserialization failed: {e}")))
}

pub(crate) fn write_header(writer: &mut impl Write) -> IoResult<()> {
    writer.write_all(&MAGIC)?;
    writer.write_all(&[CODEC_VERSION])
}

pub(crate) fn read_header(reader: &mut impl Read) -> IoResult<u8> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if magic != MAGIC {
        return Err(invalid(format!("not a case journal: magic {magic:?}")));
    }
    let mut version = [0u8; 1];
    reader.read_exact(&mut version)?;
    Ok(version[0])
}
