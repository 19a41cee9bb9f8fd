//! Metadata stores backing the index.
//!
//! [`IndexMetadata`] bundles the id maps and per-file records and knows
//! where each one lives under the index directory.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use logdex_store::{PersistentBiMap, PersistentMap, TimeRange, write_file_atomically};
use tracing::debug;

use crate::error::Result;
use crate::types::{FileId, LogLevel, NameId};

const FILE_IDS: &str = "file_ids.bin";
const MODULE_IDS: &str = "module_ids.bin";
const CLASS_IDS: &str = "class_ids.bin";
const EXCEPTION_IDS: &str = "exception_ids.bin";
const FILE_LEVELS: &str = "file_levels.bin";
const FILE_DATES: &str = "file_dates.bin";
const BYTES_INDEXED: &str = "bytes_indexed.bin";

const STORE_FILES: [&str; 7] = [
    FILE_IDS,
    MODULE_IDS,
    CLASS_IDS,
    EXCEPTION_IDS,
    FILE_LEVELS,
    FILE_DATES,
    BYTES_INDEXED,
];

/// Everything the index remembers about files and names between runs.
#[derive(Debug, Default)]
pub struct IndexMetadata {
    files: PersistentBiMap<FileId, String>,
    modules: PersistentBiMap<NameId, String>,
    classes: PersistentBiMap<NameId, String>,
    exceptions: PersistentBiMap<NameId, String>,
    levels: PersistentMap<FileId, BTreeSet<u8>>,
    dates: PersistentMap<FileId, TimeRange>,
    bytes_indexed: PersistentMap<FileId, i64>,
}

impl IndexMetadata {
    /// Creates empty metadata.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads every store from `dir`; missing files load as empty.
    pub fn load(dir: &Path) -> Result<Self> {
        let metadata = Self {
            files: PersistentBiMap::load(&dir.join(FILE_IDS))?,
            modules: PersistentBiMap::load(&dir.join(MODULE_IDS))?,
            classes: PersistentBiMap::load(&dir.join(CLASS_IDS))?,
            exceptions: PersistentBiMap::load(&dir.join(EXCEPTION_IDS))?,
            levels: PersistentMap::load(&dir.join(FILE_LEVELS))?,
            dates: PersistentMap::load(&dir.join(FILE_DATES))?,
            bytes_indexed: PersistentMap::load(&dir.join(BYTES_INDEXED))?,
        };
        debug!(dir = %dir.display(), files = metadata.files.len(), "loaded index metadata");
        Ok(metadata)
    }

    /// Writes every store into `dir`.
    pub fn save(&mut self, dir: &Path) -> Result<()> {
        self.encode()?.write(dir)
    }

    /// Serializes every store in memory; no file is touched.
    pub fn encode(&mut self) -> Result<EncodedMetadata> {
        Ok(EncodedMetadata {
            images: [
                (FILE_IDS, self.files.encode()?),
                (MODULE_IDS, self.modules.encode()?),
                (CLASS_IDS, self.classes.encode()?),
                (EXCEPTION_IDS, self.exceptions.encode()?),
                (FILE_LEVELS, self.levels.encode()?),
                (FILE_DATES, self.dates.encode()?),
                (BYTES_INDEXED, self.bytes_indexed.encode()?),
            ],
        })
    }

    /// Removes the store files from `dir`.
    pub fn delete_files(dir: &Path) -> Result<()> {
        for name in STORE_FILES {
            match fs::remove_file(dir.join(name)) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Paths of every store file under `dir`.
    #[must_use]
    pub fn store_paths(dir: &Path) -> Vec<PathBuf> {
        STORE_FILES.iter().map(|name| dir.join(name)).collect()
    }

    /// Forgets everything.
    pub fn clear(&mut self) {
        *self = Self::new();
    }

    // ----- files -----

    /// Returns the id of `file_name`, allocating one on first sight.
    pub fn register_file(&mut self, file_name: &str) -> Result<FileId> {
        Ok(self.files.add_if_absent(file_name.to_string())?)
    }

    /// Looks up the id of `file_name`.
    #[must_use]
    pub fn file_id(&self, file_name: &str) -> Option<FileId> {
        self.files.key_of(&file_name.to_string())
    }

    /// Looks up the name of file `id`.
    #[must_use]
    pub fn file_name(&self, id: FileId) -> Option<&str> {
        self.files.get(&id).map(String::as_str)
    }

    /// Lists every known file, ordered by id.
    #[must_use]
    pub fn files(&self) -> Vec<(FileId, String)> {
        let mut files: Vec<(FileId, String)> =
            self.files.iter().map(|(id, name)| (*id, name.clone())).collect();
        files.sort_unstable_by_key(|(id, _)| *id);
        files
    }

    /// Bytes of file `id` already parsed into the index.
    #[must_use]
    pub fn bytes_indexed(&self, id: FileId) -> u64 {
        self.bytes_indexed.get(&id).map_or(0, |n| (*n).max(0) as u64)
    }

    /// Moves the checkpoint of file `id` forward by `consumed` bytes.
    pub fn advance_checkpoint(&mut self, id: FileId, consumed: u64) -> u64 {
        let next = self.bytes_indexed(id).saturating_add(consumed);
        self.bytes_indexed.insert(id, next as i64);
        next
    }

    /// Time span covered by file `id`.
    #[must_use]
    pub fn date_range(&self, id: FileId) -> Option<TimeRange> {
        self.dates.get(&id).copied()
    }

    /// Widens the time span of file `id` to cover `range`.
    pub fn merge_date_range(&mut self, id: FileId, range: TimeRange) {
        let merged = self.date_range(id).map_or(range, |existing| existing.merge(range));
        self.dates.insert(id, merged);
    }

    /// Levels seen so far in file `id`.
    #[must_use]
    pub fn levels(&self, id: FileId) -> BTreeSet<LogLevel> {
        self.levels
            .get(&id)
            .map(|ids| ids.iter().filter_map(|level| LogLevel::from_id(*level)).collect())
            .unwrap_or_default()
    }

    /// Records that `level` occurs in file `id`.
    pub fn record_level(&mut self, id: FileId, level: LogLevel) {
        self.levels.get_or_insert_with(id, BTreeSet::new).insert(level.id());
    }

    // ----- names -----

    /// Returns the id of `module`, allocating one on first sight.
    pub fn intern_module(&mut self, module: &str) -> Result<NameId> {
        Ok(self.modules.add_if_absent(module.to_string())?)
    }

    /// Returns the id of `class_name`, allocating one on first sight.
    pub fn intern_class(&mut self, class_name: &str) -> Result<NameId> {
        Ok(self.classes.add_if_absent(class_name.to_string())?)
    }

    /// Returns the id of `exception`, allocating one on first sight.
    pub fn intern_exception(&mut self, exception: &str) -> Result<NameId> {
        Ok(self.exceptions.add_if_absent(exception.to_string())?)
    }

    /// Looks up the id of `module`.
    #[must_use]
    pub fn module_id(&self, module: &str) -> Option<NameId> {
        self.modules.key_of(&module.to_string())
    }

    /// Looks up the id of `class_name`.
    #[must_use]
    pub fn class_id(&self, class_name: &str) -> Option<NameId> {
        self.classes.key_of(&class_name.to_string())
    }

    /// Looks up the id of `exception`.
    #[must_use]
    pub fn exception_id(&self, exception: &str) -> Option<NameId> {
        self.exceptions.key_of(&exception.to_string())
    }

    /// Every known module name, sorted.
    #[must_use]
    pub fn module_names(&self) -> Vec<String> {
        sorted_values(&self.modules)
    }

    /// Every known class name, sorted.
    #[must_use]
    pub fn class_names(&self) -> Vec<String> {
        sorted_values(&self.classes)
    }

    /// Every known exception name, sorted.
    #[must_use]
    pub fn exception_names(&self) -> Vec<String> {
        sorted_values(&self.exceptions)
    }
}

/// Store file images produced by [`IndexMetadata::encode`].
#[derive(Debug, Clone)]
pub struct EncodedMetadata {
    images: [(&'static str, Vec<u8>); STORE_FILES.len()],
}

impl EncodedMetadata {
    /// Replaces each store file under `dir` with its image.
    pub fn write(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        for (name, bytes) in &self.images {
            write_file_atomically(&dir.join(name), bytes)?;
        }
        debug!(dir = %dir.display(), "saved index metadata");
        Ok(())
    }
}

fn sorted_values(map: &PersistentBiMap<NameId, String>) -> Vec<String> {
    let mut names: Vec<String> = map.iter().map(|(_, name)| name.clone()).collect();
    names.sort_unstable();
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn populated() -> IndexMetadata {
        let mut metadata = IndexMetadata::new();
        let a = metadata.register_file("a.log").expect("register");
        let b = metadata.register_file("b.log").expect("register");
        metadata.advance_checkpoint(a, 120);
        metadata.merge_date_range(a, TimeRange::new(10, 20));
        metadata.record_level(a, LogLevel::Error);
        metadata.record_level(b, LogLevel::Info);
        metadata.intern_module("core").expect("intern");
        metadata.intern_class("Loader").expect("intern");
        metadata.intern_exception("IOException").expect("intern");
        metadata
    }

    #[test]
    fn files_get_dense_ids() {
        let mut metadata = IndexMetadata::new();
        assert_eq!(metadata.register_file("a.log").expect("register"), FileId(0));
        assert_eq!(metadata.register_file("b.log").expect("register"), FileId(1));
        assert_eq!(metadata.register_file("a.log").expect("register"), FileId(0));
        assert_eq!(metadata.file_name(FileId(1)), Some("b.log"));
        assert_eq!(metadata.file_id("c.log"), None);
    }

    #[test]
    fn checkpoint_accumulates() {
        let mut metadata = IndexMetadata::new();
        let id = metadata.register_file("a.log").expect("register");
        assert_eq!(metadata.bytes_indexed(id), 0);
        assert_eq!(metadata.advance_checkpoint(id, 100), 100);
        assert_eq!(metadata.advance_checkpoint(id, 0), 100);
        assert_eq!(metadata.advance_checkpoint(id, 50), 150);
    }

    #[test]
    fn date_range_merges() {
        let mut metadata = IndexMetadata::new();
        let id = metadata.register_file("a.log").expect("register");
        metadata.merge_date_range(id, TimeRange::new(100, 200));
        metadata.merge_date_range(id, TimeRange::new(150, 300));
        assert_eq!(metadata.date_range(id), Some(TimeRange::new(100, 300)));
    }

    #[test]
    fn levels_are_a_set() {
        let mut metadata = IndexMetadata::new();
        let id = metadata.register_file("a.log").expect("register");
        metadata.record_level(id, LogLevel::Warn);
        metadata.record_level(id, LogLevel::Info);
        metadata.record_level(id, LogLevel::Warn);
        let levels: Vec<LogLevel> = metadata.levels(id).into_iter().collect();
        assert_eq!(levels, vec![LogLevel::Info, LogLevel::Warn]);
        assert!(metadata.levels(FileId(9)).is_empty());
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = TempDir::new().expect("create temp dir");
        let mut metadata = populated();
        metadata.save(dir.path()).expect("save");

        let loaded = IndexMetadata::load(dir.path()).expect("load");
        assert_eq!(loaded.files(), metadata.files());
        assert_eq!(loaded.bytes_indexed(FileId(0)), 120);
        assert_eq!(loaded.date_range(FileId(0)), Some(TimeRange::new(10, 20)));
        assert_eq!(loaded.levels(FileId(1)), metadata.levels(FileId(1)));
        assert_eq!(loaded.module_id("core"), Some(NameId(0)));
        assert_eq!(loaded.class_names(), vec!["Loader".to_string()]);
        assert_eq!(loaded.exception_id("IOException"), Some(NameId(0)));
    }

    #[test]
    fn encoded_snapshot_ignores_later_changes() {
        let dir = TempDir::new().expect("create temp dir");
        let mut metadata = populated();
        let encoded = metadata.encode().expect("encode");
        metadata.register_file("late.log").expect("register");

        encoded.write(dir.path()).expect("write");
        let loaded = IndexMetadata::load(dir.path()).expect("load");
        assert_eq!(loaded.files().len(), 2);
        assert_eq!(loaded.file_id("late.log"), None);
    }

    #[test]
    fn delete_files_then_load_is_empty() {
        let dir = TempDir::new().expect("create temp dir");
        populated().save(dir.path()).expect("save");
        for path in IndexMetadata::store_paths(dir.path()) {
            assert!(path.exists(), "{} should exist", path.display());
        }

        IndexMetadata::delete_files(dir.path()).expect("delete");
        IndexMetadata::delete_files(dir.path()).expect("delete twice");
        let loaded = IndexMetadata::load(dir.path()).expect("load");
        assert!(loaded.files().is_empty());
    }

    #[test]
    fn clear_forgets_everything() {
        let mut metadata = populated();
        metadata.clear();
        assert!(metadata.files().is_empty());
        assert!(metadata.module_names().is_empty());
        assert_eq!(metadata.bytes_indexed(FileId(0)), 0);
    }
}
