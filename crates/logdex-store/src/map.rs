//! Persistent key/value map.
//!
//! [`PersistentMap`] keeps its entries in memory and serializes them as a
//! single frame (see [`crate::frame`]) when saved.

use std::collections::HashMap;
use std::collections::hash_map;
use std::fs::File;
use std::hash::Hash;
use std::io::{BufReader, Cursor, Read, Seek, Write};
use std::path::Path;

use tracing::{debug, warn};

use crate::codec::BinaryCodec;
use crate::error::Result;
use crate::frame::{read_frame, write_file_atomically, write_frame};

/// An in-memory map that can be written to and restored from a binary file.
#[derive(Debug, Clone)]
pub struct PersistentMap<K, V> {
    entries: HashMap<K, V>,
    recorded_len: Option<u64>,
    dirty: bool,
}

impl<K, V> Default for PersistentMap<K, V> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            recorded_len: None,
            dirty: false,
        }
    }
}

impl<K: Eq + Hash, V> PersistentMap<K, V> {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the map holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    /// Returns true if `key` is present.
    #[must_use]
    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Stores `value` under `key`, returning the previous value.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        self.dirty = true;
        self.entries.insert(key, value)
    }

    /// Returns a mutable handle to the value under `key`, inserting one
    /// built by `default` first if absent.
    pub fn get_or_insert_with(&mut self, key: K, default: impl FnOnce() -> V) -> &mut V {
        self.dirty = true;
        self.entries.entry(key).or_insert_with(default)
    }

    /// Removes and returns the value under `key`.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let removed = self.entries.remove(key);
        self.dirty |= removed.is_some();
        removed
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.dirty = true;
        self.entries.clear();
    }

    /// Iterates over all entries in arbitrary order.
    pub fn iter(&self) -> hash_map::Iter<'_, K, V> {
        self.entries.iter()
    }

    /// Payload length recorded by the last successful read or write.
    #[must_use]
    pub const fn recorded_len(&self) -> Option<u64> {
        self.recorded_len
    }
}

impl<K, V> PersistentMap<K, V>
where
    K: BinaryCodec + Eq + Hash,
    V: BinaryCodec,
{
    /// Serializes the map as one frame at the writer's current position.
    pub fn write_to<W: Write + Seek>(&mut self, writer: &mut W) -> Result<u64> {
        let measured = write_frame(writer, self.entries.iter())?;
        if let Some(expected) = self.recorded_len {
            if !self.dirty && expected != measured {
                warn!(expected, measured, "unchanged store re-encoded to a different length");
            }
        }
        self.recorded_len = Some(measured);
        self.dirty = false;
        Ok(measured)
    }

    /// Reads a map from one frame at the reader's current position.
    ///
    /// A stream with fewer than eight remaining bytes yields an empty map.
    pub fn read_from<R: Read + Seek>(reader: &mut R) -> Result<Self> {
        let mut entries = HashMap::new();
        let recorded_len = read_frame(reader, |key: K, value: V| {
            entries.insert(key, value);
            Ok(())
        })?;
        Ok(Self {
            entries,
            recorded_len,
            dirty: false,
        })
    }

    /// Serializes the map into an in-memory image of its store file.
    pub fn encode(&mut self) -> Result<Vec<u8>> {
        let mut buffer = Cursor::new(Vec::new());
        self.write_to(&mut buffer)?;
        Ok(buffer.into_inner())
    }

    /// Writes the map to `path`, replacing any previous file.
    pub fn save(&mut self, path: &Path) -> Result<()> {
        write_file_atomically(path, &self.encode()?)?;
        debug!(path = %path.display(), entries = self.len(), "saved store");
        Ok(())
    }

    /// Loads the map stored at `path`; a missing file yields an empty map.
    pub fn load(path: &Path) -> Result<Self> {
        match File::open(path) {
            Ok(file) => {
                let map = Self::read_from(&mut BufReader::new(file))?;
                debug!(path = %path.display(), entries = map.len(), "loaded store");
                Ok(map)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::new()),
            Err(e) => Err(e.into()),
        }
    }
}

impl<'a, K, V> IntoIterator for &'a PersistentMap<K, V> {
    type Item = (&'a K, &'a V);
    type IntoIter = hash_map::Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl<K: Eq + Hash, V> FromIterator<(K, V)> for PersistentMap<K, V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
            recorded_len: None,
            dirty: true,
        }
    }
}
