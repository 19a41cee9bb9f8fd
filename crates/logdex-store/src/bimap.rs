//! Persistent bidirectional map with dense key allocation.

use std::collections::HashMap;
use std::fs::File;
use std::hash::Hash;
use std::io::{BufReader, Cursor, Read, Seek, Write};
use std::path::Path;

use tracing::debug;

use crate::codec::BinaryCodec;
use crate::error::{Result, StoreError};
use crate::frame::{read_frame, write_file_atomically, write_frame};

/// A key type that can be allocated densely from a zero-based position.
pub trait DenseKey: Copy {
    /// Converts the `index`-th allocation into a key, if it fits.
    fn from_index(index: usize) -> Option<Self>;
}

impl DenseKey for i16 {
    fn from_index(index: usize) -> Option<Self> {
        Self::try_from(index).ok()
    }
}

impl DenseKey for i32 {
    fn from_index(index: usize) -> Option<Self> {
        Self::try_from(index).ok()
    }
}

impl DenseKey for i64 {
    fn from_index(index: usize) -> Option<Self> {
        Self::try_from(index).ok()
    }
}

/// A map whose keys and values are both unique, with lookups either way.
///
/// Keys handed out by [`add_if_absent`](Self::add_if_absent) are dense: the
/// n-th distinct value receives key `n`, starting at zero.
#[derive(Debug, Clone)]
pub struct PersistentBiMap<K, V> {
    forward: HashMap<K, V>,
    reverse: HashMap<V, K>,
    recorded_len: Option<u64>,
}

impl<K, V> Default for PersistentBiMap<K, V> {
    fn default() -> Self {
        Self {
            forward: HashMap::new(),
            reverse: HashMap::new(),
            recorded_len: None,
        }
    }
}

impl<K, V> PersistentBiMap<K, V>
where
    K: Eq + Hash + Copy,
    V: Eq + Hash + Clone,
{
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.forward.len()
    }

    /// Returns true if the map holds no pairs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    /// Looks up the value bound to `key`.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<&V> {
        self.forward.get(key)
    }

    /// Looks up the key bound to `value`.
    #[must_use]
    pub fn key_of(&self, value: &V) -> Option<K> {
        self.reverse.get(value).copied()
    }

    /// Returns true if `value` is bound to some key.
    #[must_use]
    pub fn contains_value(&self, value: &V) -> bool {
        self.reverse.contains_key(value)
    }

    /// Binds `key` to `value`.
    ///
    /// Re-inserting an identical pair is a no-op. Binding either side to a
    /// different partner fails and leaves the map unchanged.
    pub fn insert(&mut self, key: K, value: V) -> Result<()> {
        match (self.forward.get(&key), self.reverse.get(&value)) {
            (Some(existing), Some(_)) if *existing == value => return Ok(()),
            (Some(_), _) => return Err(StoreError::DuplicateKey),
            (None, Some(_)) => return Err(StoreError::DuplicateValue),
            (None, None) => {}
        }
        self.reverse.insert(value.clone(), key);
        self.forward.insert(key, value);
        Ok(())
    }

    /// Removes every pair.
    pub fn clear(&mut self) {
        self.forward.clear();
        self.reverse.clear();
    }

    /// Iterates over all `(key, value)` pairs in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.forward.iter()
    }

    /// Payload length recorded by the last successful read or write.
    #[must_use]
    pub const fn recorded_len(&self) -> Option<u64> {
        self.recorded_len
    }
}

impl<K, V> PersistentBiMap<K, V>
where
    K: DenseKey + Eq + Hash,
    V: Eq + Hash + Clone,
{
    /// Returns the key bound to `value`, allocating the next dense key if
    /// the value is new.
    pub fn add_if_absent(&mut self, value: V) -> Result<K> {
        if let Some(key) = self.key_of(&value) {
            return Ok(key);
        }
        let index = self.forward.len();
        let key = K::from_index(index).ok_or(StoreError::KeySpaceExhausted(index))?;
        self.insert(key, value)?;
        Ok(key)
    }
}

impl<K, V> PersistentBiMap<K, V>
where
    K: BinaryCodec + Eq + Hash + Copy,
    V: BinaryCodec + Eq + Hash + Clone,
{
    /// Serializes the pairs as one frame at the writer's current position.
    pub fn write_to<W: Write + Seek>(&mut self, writer: &mut W) -> Result<u64> {
        let measured = write_frame(writer, self.forward.iter())?;
        self.recorded_len = Some(measured);
        Ok(measured)
    }

    /// Reads pairs from one frame, rejecting duplicates on either side.
    pub fn read_from<R: Read + Seek>(reader: &mut R) -> Result<Self> {
        let mut map = Self::new();
        let recorded_len = read_frame(reader, |key: K, value: V| map.insert(key, value))?;
        map.recorded_len = recorded_len;
        Ok(map)
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
        debug!(path = %path.display(), entries = self.len(), "saved id map");
        Ok(())
    }

    /// Loads the map stored at `path`; a missing file yields an empty map.
    pub fn load(path: &Path) -> Result<Self> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::new()),
            Err(e) => return Err(e.into()),
        };
        let map = Self::read_from(&mut BufReader::new(file))?;
        debug!(path = %path.display(), entries = map.len(), "loaded id map");
        Ok(map)
    }
}
