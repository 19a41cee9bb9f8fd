//! Document index adapter over tantivy.
//!
//! [`DocumentIndex`] holds a manually reloaded reader and, once indexing
//! starts, the single tantivy writer. Searches run on the reader's last
//! committed snapshot, so queries never observe a half-written batch.
//! An index opened with [`DocumentIndex::open_existing`] never takes the
//! writer lock and can sit beside another process that is indexing.
//!
//! Matches are read from fast fields into [`Hit`]s. Ordered scans keep
//! only the best `limit` hits per segment; grouping keeps one record per
//! group.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap};
use std::fmt;
use std::fs;
use std::ops::Bound;
use std::path::Path;
use std::str::FromStr;

use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use serde::{Serialize, Serializer};
use tantivy::collector::{Collector, SegmentCollector};
use tantivy::columnar::Column;
use tantivy::directory::MmapDirectory;
use tantivy::query::{
    BooleanQuery, EmptyQuery, EnableScoring, Occur as TantivyOccur, Query, RangeQuery, TermQuery,
    Weight,
};
use tantivy::schema::{Field, IndexRecordOption, Schema, FAST, INDEXED, TEXT};
use tantivy::tokenizer::TokenStream;
use tantivy::{
    DocId, DocSet, Index, IndexReader, IndexWriter, ReloadPolicy, Score, SegmentOrdinal,
    SegmentReader, TantivyDocument, TantivyError, Term, TERMINATED,
};
use tracing::debug;

use crate::error::{IndexError, Result};
use crate::query::{LogQuery, NumericField, Occur, Predicate};
use crate::types::{FileId, LogLevel, NameId};

/// Subdirectory of the index directory owned by the engine.
pub const ENGINE_DIR: &str = "documents";

const FIELD_DATE: &str = "date";
const FIELD_ENTRY_ID: &str = "entry_id";
const FIELD_FILE_ID: &str = "file_id";
const FIELD_LEVEL: &str = "level";
const FIELD_MODULE: &str = "module";
const FIELD_CLASS: &str = "class";
const FIELD_EXCEPTION: &str = "exception";
const FIELD_MESSAGE: &str = "message";

/// Fields of one log entry as submitted to the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogDocument<'a> {
    /// Byte offset of the entry in its file.
    pub entry_id: u64,
    /// Owning file.
    pub file_id: FileId,
    /// Severity.
    pub level: LogLevel,
    /// Module id.
    pub module: NameId,
    /// Class id.
    pub class: NameId,
    /// Exception id, when the message names one.
    pub exception: Option<NameId>,
    /// Milliseconds since epoch.
    pub timestamp: i64,
    /// Message text.
    pub message: &'a str,
}

/// A matching document, as read from fast fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Hit {
    /// Owning file.
    pub file_id: FileId,
    /// Byte offset of the entry in its file.
    pub entry_id: u64,
    /// Severity.
    pub level: LogLevel,
    /// Milliseconds since epoch.
    pub timestamp: i64,
}

impl Hit {
    const fn position(&self) -> (FileId, u64) {
        (self.file_id, self.entry_id)
    }
}

/// Resume point for [`DocumentIndex::search_after`].
///
/// Opaque to callers; round-trips through its string form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Cursor {
    file_id: FileId,
    entry_id: u64,
}

impl Cursor {
    const fn after(hit: &Hit) -> Self {
        Self {
            file_id: hit.file_id,
            entry_id: hit.entry_id,
        }
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}-{:x}", self.file_id.0, self.entry_id)
    }
}

impl FromStr for Cursor {
    type Err = IndexError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || IndexError::InvalidCursor(s.to_string());
        let (file, entry) = s.split_once('-').ok_or_else(invalid)?;
        let file_id = i16::from_str_radix(file, 16).map_err(|_| invalid())?;
        let entry_id = u64::from_str_radix(entry, 16).map_err(|_| invalid())?;
        if file_id < 0 {
            return Err(invalid());
        }
        Ok(Self {
            file_id: FileId(file_id),
            entry_id,
        })
    }
}

impl Serialize for Cursor {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// One page of a paginated scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page {
    /// Hits on this page, in scan order.
    pub hits: Vec<Hit>,
    /// Where the next page starts, if this page was full.
    pub next: Option<Cursor>,
}

/// Field a [`DocumentIndex::group_by`] aggregates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupField {
    /// Group by owning file.
    File,
    /// Group by level id.
    Level,
    /// Group by file and level; see [`GroupField::split_file_level`].
    FileLevel,
}

impl GroupField {
    fn key(self, hit: &Hit) -> u64 {
        match self {
            Self::File => hit.file_id.as_u64(),
            Self::Level => u64::from(hit.level.id()),
            Self::FileLevel => (hit.file_id.as_u64() << 8) | u64::from(hit.level.id()),
        }
    }

    /// Decodes a [`GroupField::FileLevel`] key.
    #[must_use]
    pub fn split_file_level(key: u64) -> Option<(FileId, LogLevel)> {
        let level = u8::try_from(key & 0xff).ok().and_then(LogLevel::from_id)?;
        Some((FileId::from_u64(key >> 8)?, level))
    }
}

/// One group of hits sharing a field value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Group {
    /// Shared field value.
    pub key: u64,
    /// Number of hits in the group.
    pub count: u64,
    /// Earliest hit of the group in scan order.
    pub first: Hit,
}

impl Group {
    fn absorb(&mut self, other: &Self) {
        self.count += other.count;
        if other.first.position() < self.first.position() {
            self.first = other.first;
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Fields {
    date: Field,
    entry_id: Field,
    file_id: Field,
    level: Field,
    module: Field,
    class: Field,
    exception: Field,
    message: Field,
}

impl Fields {
    fn schema() -> (Schema, Self) {
        let mut builder = Schema::builder();
        let fields = Self {
            date: builder.add_i64_field(FIELD_DATE, INDEXED | FAST),
            entry_id: builder.add_u64_field(FIELD_ENTRY_ID, INDEXED | FAST),
            file_id: builder.add_u64_field(FIELD_FILE_ID, INDEXED | FAST),
            level: builder.add_u64_field(FIELD_LEVEL, INDEXED | FAST),
            module: builder.add_u64_field(FIELD_MODULE, INDEXED),
            class: builder.add_u64_field(FIELD_CLASS, INDEXED),
            exception: builder.add_u64_field(FIELD_EXCEPTION, INDEXED),
            message: builder.add_text_field(FIELD_MESSAGE, TEXT),
        };
        (builder.build(), fields)
    }

    fn from_schema(schema: &Schema) -> Result<Self> {
        Ok(Self {
            date: schema.get_field(FIELD_DATE)?,
            entry_id: schema.get_field(FIELD_ENTRY_ID)?,
            file_id: schema.get_field(FIELD_FILE_ID)?,
            level: schema.get_field(FIELD_LEVEL)?,
            module: schema.get_field(FIELD_MODULE)?,
            class: schema.get_field(FIELD_CLASS)?,
            exception: schema.get_field(FIELD_EXCEPTION)?,
            message: schema.get_field(FIELD_MESSAGE)?,
        })
    }

    const fn numeric(&self, field: NumericField) -> Field {
        match field {
            NumericField::File => self.file_id,
            NumericField::Level => self.level,
            NumericField::Module => self.module,
            NumericField::Class => self.class,
            NumericField::Exception => self.exception,
        }
    }
}

/// The document index holding one document per log entry.
pub struct DocumentIndex {
    index: Index,
    fields: Fields,
    /// `None` for an index opened read-only.
    writer_heap_bytes: Option<usize>,
    writer: Mutex<Option<IndexWriter>>,
    reader: IndexReader,
}

impl fmt::Debug for DocumentIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentIndex")
            .field("docs", &self.num_docs())
            .field("read_only", &self.is_read_only())
            .field("writer", &self.writer.lock().is_some())
            .finish_non_exhaustive()
    }
}

impl DocumentIndex {
    /// Opens the index in `dir`, creating it if absent.
    ///
    /// The writer, and with it tantivy's directory lock, is only taken by
    /// the first write or by [`acquire_writer`](Self::acquire_writer).
    pub fn open(dir: &Path, writer_heap_bytes: usize) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let (schema, fields) = Fields::schema();
        let directory = MmapDirectory::open(dir).map_err(TantivyError::from)?;
        let index = Index::open_or_create(directory, schema)?;
        debug!(dir = %dir.display(), "opened document index");
        Self::with_index(index, fields, Some(writer_heap_bytes))
    }

    /// Opens the existing index in `dir` for searching only.
    ///
    /// Fails with [`IndexError::MissingIndex`] if nothing was ever committed there.
    pub fn open_existing(dir: &Path) -> Result<Self> {
        if !dir.is_dir() {
            return Err(IndexError::MissingIndex(dir.to_path_buf()));
        }
        let directory = MmapDirectory::open(dir).map_err(TantivyError::from)?;
        if !Index::exists(&directory).map_err(TantivyError::from)? {
            return Err(IndexError::MissingIndex(dir.to_path_buf()));
        }
        let index = Index::open(directory)?;
        let fields = Fields::from_schema(&index.schema())?;
        debug!(dir = %dir.display(), "opened document index read-only");
        Self::with_index(index, fields, None)
    }

    /// Creates a throwaway index held in memory.
    pub fn in_memory(writer_heap_bytes: usize) -> Result<Self> {
        let (schema, fields) = Fields::schema();
        Self::with_index(Index::create_in_ram(schema), fields, Some(writer_heap_bytes))
    }

    fn with_index(index: Index, fields: Fields, writer_heap_bytes: Option<usize>) -> Result<Self> {
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        Ok(Self {
            index,
            fields,
            writer_heap_bytes,
            writer: Mutex::new(None),
            reader,
        })
    }

    /// Returns true if this index can never write.
    #[must_use]
    pub const fn is_read_only(&self) -> bool {
        self.writer_heap_bytes.is_none()
    }

    fn writer(&self) -> Result<MappedMutexGuard<'_, IndexWriter>> {
        let mut slot = self.writer.lock();
        if slot.is_none() {
            let heap = self.writer_heap_bytes.ok_or(IndexError::ReadOnly)?;
            *slot = Some(self.index.writer_with_num_threads(1, heap)?);
            debug!("acquired index writer");
        }
        MutexGuard::try_map(slot, Option::as_mut).map_err(|_| IndexError::ReadOnly)
    }

    /// Takes the writer lock now rather than on the first write.
    pub fn acquire_writer(&self) -> Result<()> {
        self.writer().map(drop)
    }

    /// Drops the writer, discarding uncommitted documents and freeing the lock.
    pub fn release_writer(&self) {
        if self.writer.lock().take().is_some() {
            debug!("released index writer");
        }
    }

    /// Queues `doc` for the next commit.
    pub fn add_document(&self, doc: &LogDocument<'_>) -> Result<()> {
        let f = &self.fields;
        let mut document = TantivyDocument::default();
        document.add_i64(f.date, doc.timestamp);
        document.add_u64(f.entry_id, doc.entry_id);
        document.add_u64(f.file_id, doc.file_id.as_u64());
        document.add_u64(f.level, u64::from(doc.level.id()));
        document.add_u64(f.module, doc.module.as_u64());
        document.add_u64(f.class, doc.class.as_u64());
        if let Some(exception) = doc.exception {
            document.add_u64(f.exception, exception.as_u64());
        }
        document.add_text(f.message, doc.message);
        self.writer()?.add_document(document)?;
        Ok(())
    }
    /// Makes queued documents durable and visible to searches.
    pub fn commit(&self) -> Result<()> {
        self.writer()?.commit()?;
        self.reader.reload()?;
        Ok(())
    }

    /// Drops documents queued since the last commit.
    pub fn rollback(&self) -> Result<()> {
        if let Some(writer) = self.writer.lock().as_mut() {
            writer.rollback()?;
        }
        Ok(())
    }

    /// Removes every document and commits.
    pub fn delete_all(&self) -> Result<()> {
        let mut writer = self.writer()?;
        writer.delete_all_documents()?;
        writer.commit()?;
        drop(writer);
        self.reader.reload()?;
        Ok(())
    }

    /// Picks up commits made since the last reload, including other processes'.
    pub fn reload(&self) -> Result<()> {
        self.reader.reload()?;
        Ok(())
    }

    /// Number of committed documents.
    #[must_use]
    pub fn num_docs(&self) -> u64 {
        self.reader.searcher().num_docs()
    }

    fn to_tantivy(&self, query: &LogQuery) -> Result<Box<dyn Query>> {
        let mut subqueries: Vec<(TantivyOccur, Box<dyn Query>)> = Vec::new();
        for clause in query.clauses() {
            let occur = match clause.occur {
                Occur::Must => TantivyOccur::Must,
                Occur::MustNot => TantivyOccur::MustNot,
            };
            let primitive: Box<dyn Query> = match &clause.predicate {
                Predicate::DateRange { begin, end } => {
                    Box::new(RangeQuery::new_i64(FIELD_DATE.to_string(), *begin..*end))
                }
                Predicate::Equals { field, value } => self.equals(self.fields.numeric(*field), *value),
                Predicate::Words(text) => self.words_query(text)?,
                Predicate::Nothing => Box::new(EmptyQuery),
            };
            subqueries.push((occur, primitive));
        }
        Ok(Box::new(BooleanQuery::new(subqueries)))
    }

    fn equals(&self, field: Field, value: u64) -> Box<dyn Query> {
        Box::new(TermQuery::new(
            Term::from_field_u64(field, value),
            IndexRecordOption::Basic,
        ))
    }

    /// Every analyzed word of `text` must occur in the message.
    fn words_query(&self, text: &str) -> Result<Box<dyn Query>> {
        let mut analyzer = self.index.tokenizer_for_field(self.fields.message)?;
        let mut stream = analyzer.token_stream(text);
        let mut terms: Vec<(TantivyOccur, Box<dyn Query>)> = Vec::new();
        while stream.advance() {
            let term = Term::from_field_text(self.fields.message, &stream.token().text);
            terms.push((
                TantivyOccur::Must,
                Box::new(TermQuery::new(term, IndexRecordOption::Basic)),
            ));
        }
        if terms.is_empty() {
            return Ok(Box::new(EmptyQuery));
        }
        Ok(Box::new(BooleanQuery::new(terms)))
    }

    /// Matches documents strictly after `cursor` in (file, offset) order.
    fn after_query(&self, cursor: Cursor) -> Box<dyn Query> {
        let later_file = RangeQuery::new_u64_bounds(
            FIELD_FILE_ID.to_string(),
            Bound::Excluded(cursor.file_id.as_u64()),
            Bound::Unbounded,
        );
        let same_file = BooleanQuery::new(vec![
            (
                TantivyOccur::Must,
                self.equals(self.fields.file_id, cursor.file_id.as_u64()),
            ),
            (
                TantivyOccur::Must,
                Box::new(RangeQuery::new_u64_bounds(
                    FIELD_ENTRY_ID.to_string(),
                    Bound::Excluded(cursor.entry_id),
                    Bound::Unbounded,
                )),
            ),
        ]);
        Box::new(BooleanQuery::new(vec![
            (TantivyOccur::Should, Box::new(later_file)),
            (TantivyOccur::Should, Box::new(same_file)),
        ]))
    }

    /// Returns every match ordered by file then entry offset.
    pub fn search(&self, query: &LogQuery) -> Result<Vec<Hit>> {
        let query = self.to_tantivy(query)?;
        let mut hits = self.reader.searcher().search(query.as_ref(), &HitCollector)?;
        hits.sort_unstable_by_key(Hit::position);
        Ok(hits)
    }

    /// Returns matches ordered by timestamp, ties broken by position.
    ///
    /// With a `limit`, only the earliest `limit` matches are ever held.
    pub fn sorted_search(&self, query: &LogQuery, limit: Option<usize>) -> Result<Vec<Hit>> {
        let query = self.to_tantivy(query)?;
        let searcher = self.reader.searcher();
        match limit {
            Some(limit) => Ok(searcher.search(query.as_ref(), &TopHitCollector::new(limit, HitOrder::Time))?),
            None => {
                let mut hits = searcher.search(query.as_ref(), &HitCollector)?;
                hits.sort_unstable_by_key(|hit| HitOrder::Time.key(hit));
                Ok(hits)
            }
        }
    }

    /// Returns up to `limit` matches following `after` in [`search`](Self::search) order.
    pub fn search_after(&self, query: &LogQuery, after: Option<Cursor>, limit: usize) -> Result<Page> {
        if limit == 0 {
            return Ok(Page {
                hits: Vec::new(),
                next: None,
            });
        }
        let mut query = self.to_tantivy(query)?;
        if let Some(cursor) = after {
            query = Box::new(BooleanQuery::new(vec![
                (TantivyOccur::Must, query),
                (TantivyOccur::Must, self.after_query(cursor)),
            ]));
        }
        let hits = self
            .reader
            .searcher()
            .search(query.as_ref(), &TopHitCollector::new(limit, HitOrder::Position))?;
        let next = if hits.len() == limit {
            hits.last().map(Cursor::after)
        } else {
            None
        };
        Ok(Page { hits, next })
    }

    /// Groups matches by `field`, ordered by key, keeping at most `limit` groups.
    pub fn group_by(&self, query: &LogQuery, field: GroupField, limit: Option<usize>) -> Result<Vec<Group>> {
        let query = self.to_tantivy(query)?;
        let groups = self
            .reader
            .searcher()
            .search(query.as_ref(), &GroupCollector { field })?
            .into_values();
        Ok(match limit {
            Some(limit) => groups.take(limit).collect(),
            None => groups.collect(),
        })
    }

    /// Returns the `candidates` holding at least one match, in the given order.
    ///
    /// Each file is checked on its own, stopping at its first live match.
    pub fn files_with_matches(&self, query: &LogQuery, candidates: &[FileId]) -> Result<Vec<FileId>> {
        let searcher = self.reader.searcher();
        let mut found = Vec::new();
        for &file in candidates {
            let per_file = BooleanQuery::new(vec![
                (TantivyOccur::Must, self.to_tantivy(query)?),
                (TantivyOccur::Must, self.equals(self.fields.file_id, file.as_u64())),
            ]);
            let weight = per_file.weight(EnableScoring::disabled_from_searcher(&searcher))?;
            if any_live_match(weight.as_ref(), searcher.segment_readers())? {
                found.push(file);
            }
        }
        Ok(found)
    }
}

fn any_live_match(weight: &dyn Weight, segments: &[SegmentReader]) -> Result<bool> {
    for segment in segments {
        let mut scorer = weight.scorer(segment, 1.0)?;
        let mut doc = scorer.doc();
        while doc != TERMINATED {
            if !segment.is_deleted(doc) {
                return Ok(true);
            }
            doc = scorer.advance();
        }
    }
    Ok(false)
}

/// Fast-field columns of one segment.
struct HitColumns {
    file_id: Column<u64>,
    entry_id: Column<u64>,
    level: Column<u64>,
    date: Column<i64>,
}

impl HitColumns {
    fn open(reader: &SegmentReader) -> tantivy::Result<Self> {
        let fast_fields = reader.fast_fields();
        Ok(Self {
            file_id: fast_fields.u64(FIELD_FILE_ID)?,
            entry_id: fast_fields.u64(FIELD_ENTRY_ID)?,
            level: fast_fields.u64(FIELD_LEVEL)?,
            date: fast_fields.i64(FIELD_DATE)?,
        })
    }

    fn hit(&self, doc: DocId) -> Option<Hit> {
        let level = self
            .level
            .first(doc)
            .and_then(|id| u8::try_from(id).ok())
            .and_then(LogLevel::from_id)?;
        Some(Hit {
            file_id: self.file_id.first(doc).and_then(FileId::from_u64)?,
            entry_id: self.entry_id.first(doc)?,
            level,
            timestamp: self.date.first(doc)?,
        })
    }
}

/// Collects a [`Hit`] for every matching document.
struct HitCollector;

struct HitSegmentCollector {
    columns: HitColumns,
    hits: Vec<Hit>,
}

impl Collector for HitCollector {
    type Fruit = Vec<Hit>;
    type Child = HitSegmentCollector;

    fn for_segment(
        &self,
        _segment_local_id: SegmentOrdinal,
        reader: &SegmentReader,
    ) -> tantivy::Result<Self::Child> {
        Ok(HitSegmentCollector {
            columns: HitColumns::open(reader)?,
            hits: Vec::new(),
        })
    }

    fn requires_scoring(&self) -> bool {
        false
    }

    fn merge_fruits(&self, segment_fruits: Vec<Vec<Hit>>) -> tantivy::Result<Vec<Hit>> {
        Ok(segment_fruits.into_iter().flatten().collect())
    }
}

impl SegmentCollector for HitSegmentCollector {
    type Fruit = Vec<Hit>;

    fn collect(&mut self, doc: DocId, _score: Score) {
        if let Some(hit) = self.columns.hit(doc) {
            self.hits.push(hit);
        }
    }

    fn harvest(self) -> Vec<Hit> {
        self.hits
    }
}

type OrderKey = (i64, FileId, u64);

/// Order of a bounded scan.
#[derive(Debug, Clone, Copy)]
enum HitOrder {
    /// File id, then offset.
    Position,
    /// Timestamp, then position.
    Time,
}

impl HitOrder {
    const fn key(self, hit: &Hit) -> OrderKey {
        match self {
            Self::Position => (0, hit.file_id, hit.entry_id),
            Self::Time => (hit.timestamp, hit.file_id, hit.entry_id),
        }
    }
}

/// A hit ranked by its order key; the heap's top is the worst kept hit.
struct Ranked {
    key: OrderKey,
    hit: Hit,
}

impl PartialEq for Ranked {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Ranked {}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ranked {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}

/// Keeps the first `limit` hits in `order`.
struct TopHitCollector {
    limit: usize,
    order: HitOrder,
}

impl TopHitCollector {
    const fn new(limit: usize, order: HitOrder) -> Self {
        Self { limit, order }
    }
}

struct TopHitSegmentCollector {
    columns: HitColumns,
    limit: usize,
    order: HitOrder,
    heap: BinaryHeap<Ranked>,
}

impl Collector for TopHitCollector {
    type Fruit = Vec<Hit>;
    type Child = TopHitSegmentCollector;

    fn for_segment(
        &self,
        _segment_local_id: SegmentOrdinal,
        reader: &SegmentReader,
    ) -> tantivy::Result<Self::Child> {
        Ok(TopHitSegmentCollector {
            columns: HitColumns::open(reader)?,
            limit: self.limit,
            order: self.order,
            heap: BinaryHeap::with_capacity(self.limit.min(1024)),
        })
    }

    fn requires_scoring(&self) -> bool {
        false
    }

    fn merge_fruits(&self, segment_fruits: Vec<Vec<Hit>>) -> tantivy::Result<Vec<Hit>> {
        let mut hits: Vec<Hit> = segment_fruits.into_iter().flatten().collect();
        hits.sort_unstable_by_key(|hit| self.order.key(hit));
        hits.truncate(self.limit);
        Ok(hits)
    }
}

impl SegmentCollector for TopHitSegmentCollector {
    type Fruit = Vec<Hit>;

    fn collect(&mut self, doc: DocId, _score: Score) {
        let Some(hit) = self.columns.hit(doc) else {
            return;
        };
        let ranked = Ranked {
            key: self.order.key(&hit),
            hit,
        };
        if self.heap.len() < self.limit {
            self.heap.push(ranked);
        } else if self.heap.peek().is_some_and(|worst| ranked.key < worst.key) {
            self.heap.pop();
            self.heap.push(ranked);
        }
    }

    fn harvest(self) -> Vec<Hit> {
        self.heap.into_sorted_vec().into_iter().map(|ranked| ranked.hit).collect()
    }
}

/// Counts matches per group key.
struct GroupCollector {
    field: GroupField,
}

struct GroupSegmentCollector {
    columns: HitColumns,
    field: GroupField,
    groups: BTreeMap<u64, Group>,
}

impl Collector for GroupCollector {
    type Fruit = BTreeMap<u64, Group>;
    type Child = GroupSegmentCollector;

    fn for_segment(
        &self,
        _segment_local_id: SegmentOrdinal,
        reader: &SegmentReader,
    ) -> tantivy::Result<Self::Child> {
        Ok(GroupSegmentCollector {
            columns: HitColumns::open(reader)?,
            field: self.field,
            groups: BTreeMap::new(),
        })
    }

    fn requires_scoring(&self) -> bool {
        false
    }

    fn merge_fruits(
        &self,
        segment_fruits: Vec<BTreeMap<u64, Group>>,
    ) -> tantivy::Result<BTreeMap<u64, Group>> {
        let mut merged: BTreeMap<u64, Group> = BTreeMap::new();
        for group in segment_fruits.into_iter().flat_map(BTreeMap::into_values) {
            merged
                .entry(group.key)
                .and_modify(|existing| existing.absorb(&group))
                .or_insert(group);
        }
        Ok(merged)
    }
}

impl SegmentCollector for GroupSegmentCollector {
    type Fruit = BTreeMap<u64, Group>;

    fn collect(&mut self, doc: DocId, _score: Score) {
        let Some(hit) = self.columns.hit(doc) else {
            return;
        };
        let single = Group {
            key: self.field.key(&hit),
            count: 1,
            first: hit,
        };
        self.groups
            .entry(single.key)
            .and_modify(|group| group.absorb(&single))
            .or_insert(single);
    }

    fn harvest(self) -> BTreeMap<u64, Group> {
        self.groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{translate, Filter};
    use crate::store::IndexMetadata;
    use tempfile::TempDir;

    const HEAP: usize = 20_000_000;

    fn doc(file: i16, entry_id: u64, level: LogLevel, timestamp: i64, message: &str) -> LogDocument<'_> {
        LogDocument {
            entry_id,
            file_id: FileId(file),
            level,
            module: NameId(0),
            class: NameId(i32::from(file)),
            exception: message.contains("IOException").then_some(NameId(0)),
            timestamp,
            message,
        }
    }

    fn sample_index() -> DocumentIndex {
        let index = DocumentIndex::in_memory(HEAP).expect("open");
        let docs = [
            doc(1, 0, LogLevel::Info, 300, "service started"),
            doc(0, 90, LogLevel::Error, 200, "write failed IOException disk full"),
            doc(0, 0, LogLevel::Debug, 100, "opening disk cache"),
            doc(1, 50, LogLevel::Warn, 150, "disk almost full"),
            doc(2, 0, LogLevel::Error, 50, "connection reset"),
        ];
        for d in &docs {
            index.add_document(d).expect("add");
        }
        index.commit().expect("commit");
        index
    }

    fn query(filter: &Filter) -> LogQuery {
        translate(filter, &IndexMetadata::new())
    }

    fn positions(hits: &[Hit]) -> Vec<(i16, u64)> {
        hits.iter().map(|h| (h.file_id.0, h.entry_id)).collect()
    }

    // ===== Writing =====

    #[test]
    fn uncommitted_documents_are_invisible() {
        let index = DocumentIndex::in_memory(HEAP).expect("open");
        index.add_document(&doc(0, 0, LogLevel::Info, 1, "x")).expect("add");
        assert_eq!(index.num_docs(), 0);
        index.commit().expect("commit");
        assert_eq!(index.num_docs(), 1);
    }

    #[test]
    fn rollback_discards_pending() {
        let index = DocumentIndex::in_memory(HEAP).expect("open");
        index.add_document(&doc(0, 0, LogLevel::Info, 1, "x")).expect("add");
        index.rollback().expect("rollback");
        index.commit().expect("commit");
        assert_eq!(index.num_docs(), 0);
    }

    #[test]
    fn delete_all_empties_the_index() {
        let index = sample_index();
        assert_eq!(index.num_docs(), 5);
        index.delete_all().expect("delete");
        assert_eq!(index.num_docs(), 0);
    }

    #[test]
    fn reopen_from_disk_keeps_documents() {
        let dir = TempDir::new().expect("create temp dir");
        {
            let index = DocumentIndex::open(dir.path(), HEAP).expect("open");
            index.add_document(&doc(0, 0, LogLevel::Info, 1, "x")).expect("add");
            index.commit().expect("commit");
        }
        let index = DocumentIndex::open(dir.path(), HEAP).expect("reopen");
        assert_eq!(index.num_docs(), 1);
    }

    // ===== Searching =====

    #[test]
    fn search_orders_by_position() {
        let hits = sample_index().search(&query(&Filter::default())).expect("search");
        assert_eq!(positions(&hits), vec![(0, 0), (0, 90), (1, 0), (1, 50), (2, 0)]);
    }

    #[test]
    fn date_range_is_half_open() {
        let hits = sample_index().search(&query(&Filter::between(100, 200))).expect("search");
        assert_eq!(positions(&hits), vec![(0, 0), (1, 50)]);
    }

    #[test]
    fn level_filter_uses_exclusions() {
        let filter = Filter::default().with_level(LogLevel::Error);
        let hits = sample_index().search(&query(&filter)).expect("search");
        assert_eq!(positions(&hits), vec![(0, 90), (2, 0)]);
    }

    #[test]
    fn words_must_all_appear() {
        let index = sample_index();
        let hits = index.search(&query(&Filter::default().with_phrase("disk full"))).expect("search");
        assert_eq!(positions(&hits), vec![(0, 90), (1, 50)]);

        let hits = index.search(&query(&Filter::default().with_phrase("Full DISK"))).expect("search");
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn file_scope() {
        let hits = sample_index()
            .search(&query(&Filter::default().with_file(FileId(1))))
            .expect("search");
        assert_eq!(positions(&hits), vec![(1, 0), (1, 50)]);
    }

    #[test]
    fn exception_scope() {
        let mut metadata = IndexMetadata::new();
        metadata.intern_exception("IOException").expect("intern");
        let q = translate(&Filter::default().with_exception("IOException"), &metadata);
        let hits = sample_index().search(&q).expect("search");
        assert_eq!(positions(&hits), vec![(0, 90)]);
    }

    #[test]
    fn sorted_search_orders_by_time() {
        let hits = sample_index().sorted_search(&query(&Filter::default()), None).expect("search");
        let times: Vec<i64> = hits.iter().map(|h| h.timestamp).collect();
        assert_eq!(times, vec![50, 100, 150, 200, 300]);
    }

    #[test]
    fn sorted_search_limit_keeps_earliest() {
        let index = sample_index();
        let q = query(&Filter::default());
        let hits = index.sorted_search(&q, Some(2)).expect("search");
        let times: Vec<i64> = hits.iter().map(|h| h.timestamp).collect();
        assert_eq!(times, vec![50, 100]);
        assert!(index.sorted_search(&q, Some(0)).expect("search").is_empty());
    }

    #[test]
    fn sorted_search_limit_spans_segments() {
        let index = DocumentIndex::in_memory(HEAP).expect("open");
        for (entry_id, timestamp) in [(0, 40), (10, 10)] {
            index.add_document(&doc(0, entry_id, LogLevel::Info, timestamp, "x")).expect("add");
            index.commit().expect("commit");
        }
        for (entry_id, timestamp) in [(0, 30), (10, 20)] {
            index.add_document(&doc(1, entry_id, LogLevel::Info, timestamp, "x")).expect("add");
            index.commit().expect("commit");
        }
        let hits = index.sorted_search(&query(&Filter::default()), Some(3)).expect("search");
        let times: Vec<i64> = hits.iter().map(|h| h.timestamp).collect();
        assert_eq!(times, vec![10, 20, 30]);
    }

    // ===== Pagination and grouping =====

    #[test]
    fn pages_cover_the_full_scan() {
        let index = sample_index();
        let q = query(&Filter::default());
        let full = index.search(&q).expect("search");

        let mut collected = Vec::new();
        let mut cursor = None;
        loop {
            let page = index.search_after(&q, cursor, 2).expect("page");
            collected.extend(page.hits);
            match page.next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        assert_eq!(collected, full);
    }

    #[test]
    fn page_after_cursor_skips_earlier_positions() {
        let index = sample_index();
        let q = query(&Filter::default());
        let cursor = Cursor {
            file_id: FileId(0),
            entry_id: 90,
        };
        let page = index.search_after(&q, Some(cursor), 10).expect("page");
        assert_eq!(positions(&page.hits), vec![(1, 0), (1, 50), (2, 0)]);
        assert_eq!(page.next, None);

        let mid_file = Cursor {
            file_id: FileId(1),
            entry_id: 0,
        };
        let page = index.search_after(&q, Some(mid_file), 1).expect("page");
        assert_eq!(positions(&page.hits), vec![(1, 50)]);
        assert_eq!(page.next.map(|c| c.to_string()).as_deref(), Some("1-32"));
    }

    #[test]
    fn zero_limit_page_is_empty() {
        let page = sample_index()
            .search_after(&query(&Filter::default()), None, 0)
            .expect("page");
        assert!(page.hits.is_empty());
        assert_eq!(page.next, None);
    }

    #[test]
    fn cursor_round_trips_as_text() {
        let cursor = Cursor {
            file_id: FileId(10),
            entry_id: 4096,
        };
        let text = cursor.to_string();
        assert_eq!(text, "a-1000");
        assert_eq!(text.parse::<Cursor>().expect("parse"), cursor);
        assert!("zz".parse::<Cursor>().is_err());
        assert!("-1-0".parse::<Cursor>().is_err());
    }

    #[test]
    fn group_by_level_counts() {
        let groups = sample_index()
            .group_by(&query(&Filter::default()), GroupField::Level, None)
            .expect("group");
        let counts: Vec<(u64, u64)> = groups.iter().map(|g| (g.key, g.count)).collect();
        assert_eq!(counts, vec![(1, 1), (2, 1), (3, 1), (4, 2)]);
    }

    #[test]
    fn group_by_file_keeps_first_hit() {
        let groups = sample_index()
            .group_by(&query(&Filter::default()), GroupField::File, Some(2))
            .expect("group");
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].first.entry_id, 0);
        assert_eq!(groups[0].count, 2);
        assert_eq!(groups[1].key, 1);
    }

    #[test]
    fn group_by_file_and_level() {
        let groups = sample_index()
            .group_by(&query(&Filter::default()), GroupField::FileLevel, None)
            .expect("group");
        let pairs: Vec<(FileId, LogLevel)> = groups
            .iter()
            .filter_map(|g| GroupField::split_file_level(g.key))
            .collect();
        assert_eq!(
            pairs,
            vec![
                (FileId(0), LogLevel::Debug),
                (FileId(0), LogLevel::Error),
                (FileId(1), LogLevel::Info),
                (FileId(1), LogLevel::Warn),
                (FileId(2), LogLevel::Error),
            ]
        );
    }

    #[test]
    fn files_with_matches_checks_each_candidate() {
        let index = sample_index();
        let candidates = [FileId(0), FileId(1), FileId(2), FileId(7)];
        let all = index
            .files_with_matches(&query(&Filter::default()), &candidates)
            .expect("files with matches");
        assert_eq!(all, vec![FileId(0), FileId(1), FileId(2)]);

        let errors = index
            .files_with_matches(&query(&Filter::default().with_level(LogLevel::Error)), &candidates)
            .expect("files with matches");
        assert_eq!(errors, vec![FileId(0), FileId(2)]);
    }

    // ===== Writer lock =====

    #[test]
    fn opening_does_not_take_the_writer_lock() {
        let dir = TempDir::new().expect("create temp dir");
        let first = DocumentIndex::open(dir.path(), HEAP).expect("open");
        let second = DocumentIndex::open(dir.path(), HEAP).expect("open again");
        first.acquire_writer().expect("first writer");
        assert!(matches!(second.acquire_writer(), Err(IndexError::Engine(_))));

        first.release_writer();
        second.acquire_writer().expect("writer after release");
    }

    #[test]
    fn read_only_index_searches_beside_a_writer() {
        let dir = TempDir::new().expect("create temp dir");
        let writer = DocumentIndex::open(dir.path(), HEAP).expect("open");
        writer.add_document(&doc(0, 0, LogLevel::Info, 1, "first")).expect("add");
        writer.commit().expect("commit");

        let reader = DocumentIndex::open_existing(dir.path()).expect("open read-only");
        assert!(reader.is_read_only());
        assert_eq!(reader.num_docs(), 1);
        assert!(matches!(reader.acquire_writer(), Err(IndexError::ReadOnly)));

        writer.add_document(&doc(0, 10, LogLevel::Warn, 2, "second")).expect("add");
        writer.commit().expect("commit");
        assert_eq!(reader.num_docs(), 1);
        reader.reload().expect("reload");
        assert_eq!(reader.num_docs(), 2);
    }

    #[test]
    fn open_existing_requires_an_index() {
        let dir = TempDir::new().expect("create temp dir");
        assert!(matches!(
            DocumentIndex::open_existing(dir.path()),
            Err(IndexError::MissingIndex(_))
        ));
        assert!(matches!(
            DocumentIndex::open_existing(&dir.path().join("absent")),
            Err(IndexError::MissingIndex(_))
        ));
    }
}
