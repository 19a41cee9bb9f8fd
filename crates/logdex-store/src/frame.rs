//! The framed record layout shared by every store.
//!
//! `[8-byte payload length][key || value]*`, with no record count. Readers
//! consume records until the declared payload length is exhausted.

use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use tracing::warn;

use crate::codec::BinaryCodec;
use crate::error::Result;

/// Size of the big-endian payload length prefix.
pub const LENGTH_PREFIX: u64 = 8;

/// Writes `records` as one frame and returns the measured payload length.
///
/// The prefix is reserved up front and patched once the records are on the
/// stream. If the codecs' reported sizes disagree with the measured stream
/// advance, the measured value wins and a warning is logged.
pub fn write_frame<'a, W, K, V, I>(writer: &mut W, records: I) -> Result<u64>
where
    W: Write + Seek,
    K: BinaryCodec + 'a,
    V: BinaryCodec + 'a,
    I: IntoIterator<Item = (&'a K, &'a V)>,
{
    let start = writer.stream_position()?;
    writer.write_all(&[0u8; LENGTH_PREFIX as usize])?;

    let mut reported = 0u64;
    for (key, value) in records {
        reported += key.encode(writer)?;
        reported += value.encode(writer)?;
    }

    let end = writer.stream_position()?;
    let measured = end - start - LENGTH_PREFIX;
    if measured != reported {
        warn!(measured, reported, "store payload length mismatch after write");
    }

    writer.seek(SeekFrom::Start(start))?;
    writer.write_all(&measured.to_be_bytes())?;
    writer.seek(SeekFrom::Start(end))?;
    writer.flush()?;
    Ok(measured)
}

/// Replaces `path` with `bytes` through a synced temporary file and a rename.
pub fn write_file_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Reads one frame, handing every record to `sink`.
///
/// Returns `None` when fewer than [`LENGTH_PREFIX`] bytes remain, which
/// covers both a missing and an empty store file. Otherwise returns the
/// number of payload bytes the records actually occupied.
pub fn read_frame<R, K, V, F>(reader: &mut R, mut sink: F) -> Result<Option<u64>>
where
    R: Read + Seek,
    K: BinaryCodec,
    V: BinaryCodec,
    F: FnMut(K, V) -> Result<()>,
{
    let start = reader.stream_position()?;
    let end = reader.seek(SeekFrom::End(0))?;
    reader.seek(SeekFrom::Start(start))?;

    let remaining = end.saturating_sub(start);
    if remaining < LENGTH_PREFIX {
        return Ok(None);
    }

    let mut prefix = [0u8; LENGTH_PREFIX as usize];
    reader.read_exact(&mut prefix)?;
    let mut declared = u64::from_be_bytes(prefix);
    let available = remaining - LENGTH_PREFIX;
    if declared > available {
        warn!(declared, available, "store length prefix exceeds file size");
        declared = available;
    }

    let mut consumed = 0u64;
    while consumed < declared {
        let (key, key_len) = K::decode(reader)?;
        let (value, value_len) = V::decode(reader)?;
        consumed += key_len + value_len;
        sink(key, value)?;
    }
    if consumed != declared {
        warn!(declared, consumed, "store records overran the declared payload length");
    }
    Ok(Some(consumed))
}
