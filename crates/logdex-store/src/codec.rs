//! Big-endian binary codecs for store records.
//!
//! Every value type stored in a [`PersistentMap`](crate::PersistentMap) or a
//! [`PersistentBiMap`](crate::PersistentBiMap) implements [`BinaryCodec`].
//! Fixed-width integers are written in network byte order, strings and
//! collections carry a 32-bit length or count prefix.

use std::collections::BTreeSet;
use std::io::{self, Read, Write};

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Upper bound on speculative preallocation when decoding collections.
const MAX_PREALLOCATE: usize = 1024;

/// A value that can be written to and read back from a binary stream.
///
/// Both directions report the number of bytes they touched so callers can
/// account for payload lengths without querying stream positions.
pub trait BinaryCodec: Sized {
    /// Writes `self` and returns the number of bytes written.
    fn encode<W: Write + ?Sized>(&self, writer: &mut W) -> io::Result<u64>;

    /// Reads one value and returns it with the number of bytes consumed.
    fn decode<R: Read + ?Sized>(reader: &mut R) -> Result<(Self, u64)>;
}

macro_rules! fixed_width_codec {
    ($($ty:ty),* $(,)?) => {
        $(
            impl BinaryCodec for $ty {
                fn encode<W: Write + ?Sized>(&self, writer: &mut W) -> io::Result<u64> {
                    writer.write_all(&self.to_be_bytes())?;
                    Ok(size_of::<$ty>() as u64)
                }

                fn decode<R: Read + ?Sized>(reader: &mut R) -> Result<(Self, u64)> {
                    let mut buf = [0u8; size_of::<$ty>()];
                    reader.read_exact(&mut buf)?;
                    Ok((<$ty>::from_be_bytes(buf), size_of::<$ty>() as u64))
                }
            }
        )*
    };
}

fixed_width_codec!(u8, i16, i32, i64);

fn encode_len<W: Write + ?Sized>(len: usize, writer: &mut W) -> io::Result<u64> {
    let len = i32::try_from(len).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("length {len} does not fit a 32-bit prefix"),
        )
    })?;
    len.encode(writer)
}

fn decode_len<R: Read + ?Sized>(reader: &mut R) -> Result<(usize, u64)> {
    let (len, read) = i32::decode(reader)?;
    let len = usize::try_from(len)
        .map_err(|_| StoreError::Corrupt(format!("negative length prefix {len}")))?;
    Ok((len, read))
}

impl BinaryCodec for String {
    fn encode<W: Write + ?Sized>(&self, writer: &mut W) -> io::Result<u64> {
        let prefix = encode_len(self.len(), writer)?;
        writer.write_all(self.as_bytes())?;
        Ok(prefix + self.len() as u64)
    }

    fn decode<R: Read + ?Sized>(reader: &mut R) -> Result<(Self, u64)> {
        let (len, prefix) = decode_len(reader)?;
        let mut bytes = Vec::with_capacity(len.min(MAX_PREALLOCATE * 64));
        reader.take(len as u64).read_to_end(&mut bytes)?;
        if bytes.len() != len {
            return Err(StoreError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("string record truncated at {} of {len} bytes", bytes.len()),
            )));
        }
        Ok((Self::from_utf8(bytes)?, prefix + len as u64))
    }
}

impl<T: BinaryCodec> BinaryCodec for Vec<T> {
    fn encode<W: Write + ?Sized>(&self, writer: &mut W) -> io::Result<u64> {
        let mut written = encode_len(self.len(), writer)?;
        for item in self {
            written += item.encode(writer)?;
        }
        Ok(written)
    }

    fn decode<R: Read + ?Sized>(reader: &mut R) -> Result<(Self, u64)> {
        let (count, mut read) = decode_len(reader)?;
        let mut items = Self::with_capacity(count.min(MAX_PREALLOCATE));
        for _ in 0..count {
            let (item, n) = T::decode(reader)?;
            read += n;
            items.push(item);
        }
        Ok((items, read))
    }
}

impl<T: BinaryCodec + Ord> BinaryCodec for BTreeSet<T> {
    fn encode<W: Write + ?Sized>(&self, writer: &mut W) -> io::Result<u64> {
        let mut written = encode_len(self.len(), writer)?;
        for item in self {
            written += item.encode(writer)?;
        }
        Ok(written)
    }

    fn decode<R: Read + ?Sized>(reader: &mut R) -> Result<(Self, u64)> {
        let (count, mut read) = decode_len(reader)?;
        let mut items = Self::new();
        for _ in 0..count {
            let (item, n) = T::decode(reader)?;
            read += n;
            items.insert(item);
        }
        Ok((items, read))
    }
}

/// An inclusive span of millisecond timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    /// Earliest timestamp in the span.
    pub begin: i64,
    /// Latest timestamp in the span.
    pub end: i64,
}

impl TimeRange {
    /// Creates a range covering `begin..=end`.
    #[must_use]
    pub const fn new(begin: i64, end: i64) -> Self {
        Self { begin, end }
    }

    /// Widens this range so it also covers `other`.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        Self {
            begin: self.begin.min(other.begin),
            end: self.end.max(other.end),
        }
    }

    /// Returns true if `timestamp` lies inside the range.
    #[must_use]
    pub const fn contains(&self, timestamp: i64) -> bool {
        timestamp >= self.begin && timestamp <= self.end
    }

    /// Returns true if the range shares any instant with `[begin, end)`.
    #[must_use]
    pub const fn overlaps_half_open(&self, begin: i64, end: i64) -> bool {
        self.begin < end && self.end >= begin
    }
}

impl BinaryCodec for TimeRange {
    fn encode<W: Write + ?Sized>(&self, writer: &mut W) -> io::Result<u64> {
        Ok(self.begin.encode(writer)? + self.end.encode(writer)?)
    }

    fn decode<R: Read + ?Sized>(reader: &mut R) -> Result<(Self, u64)> {
        let (begin, a) = i64::decode(reader)?;
        let (end, b) = i64::decode(reader)?;
        Ok((Self { begin, end }, a + b))
    }
}
