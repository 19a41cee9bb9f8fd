//! Filter to query translation.
//!
//! A [`Filter`] is what callers ask for; a [`LogQuery`] is the conjunction
//! of primitive clauses the document index understands. Translation
//! resolves names to ids through [`IndexMetadata`] and turns the level set
//! into exclusions, because documents carry a single positive level value.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::store::IndexMetadata;
use crate::types::{FileId, LogLevel};

/// What a caller wants to find.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    /// Inclusive lower bound, ms since epoch.
    pub begin: i64,
    /// Exclusive upper bound, ms since epoch.
    pub end: i64,
    /// Levels to include; empty means every level.
    pub levels: BTreeSet<LogLevel>,
    /// Exact module name.
    pub module: Option<String>,
    /// Exact class name.
    pub class_name: Option<String>,
    /// Exact exception name.
    pub exception: Option<String>,
    /// Restrict to one file.
    pub file: Option<FileId>,
    /// Words that must all appear in the message.
    pub phrase: Option<String>,
}

impl Default for Filter {
    fn default() -> Self {
        Self::between(i64::MIN, i64::MAX)
    }
}

impl Filter {
    /// Creates a filter over `[begin, end)` with no other restriction.
    #[must_use]
    pub const fn between(begin: i64, end: i64) -> Self {
        Self {
            begin,
            end,
            levels: BTreeSet::new(),
            module: None,
            class_name: None,
            exception: None,
            file: None,
            phrase: None,
        }
    }

    /// Adds `level` to the included levels.
    #[must_use]
    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.levels.insert(level);
        self
    }

    /// Replaces the included levels.
    #[must_use]
    pub fn with_levels(mut self, levels: impl IntoIterator<Item = LogLevel>) -> Self {
        self.levels = levels.into_iter().collect();
        self
    }

    /// Restricts to one module.
    #[must_use]
    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }

    /// Restricts to one class.
    #[must_use]
    pub fn with_class(mut self, class_name: impl Into<String>) -> Self {
        self.class_name = Some(class_name.into());
        self
    }

    /// Restricts to one exception name.
    #[must_use]
    pub fn with_exception(mut self, exception: impl Into<String>) -> Self {
        self.exception = Some(exception.into());
        self
    }

    /// Restricts to one file.
    #[must_use]
    pub const fn with_file(mut self, file: FileId) -> Self {
        self.file = Some(file);
        self
    }

    /// Requires every word of `phrase` in the message.
    #[must_use]
    pub fn with_phrase(mut self, phrase: impl Into<String>) -> Self {
        self.phrase = Some(phrase.into());
        self
    }
}

/// A numeric document field that supports exact matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NumericField {
    /// Owning file id.
    File,
    /// Level id.
    Level,
    /// Module id.
    Module,
    /// Class id.
    Class,
    /// Exception id.
    Exception,
}

/// One primitive condition on a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    /// Timestamp within `[begin, end)`.
    DateRange {
        /// Inclusive lower bound.
        begin: i64,
        /// Exclusive upper bound.
        end: i64,
    },
    /// Field holds exactly `value`.
    Equals {
        /// Field to test.
        field: NumericField,
        /// Required value.
        value: u64,
    },
    /// Message contains every word of the text.
    Words(String),
    /// Matches no document.
    Nothing,
}

/// Whether a clause must or must not hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Occur {
    /// The predicate must hold.
    Must,
    /// The predicate must not hold.
    MustNot,
}

/// A predicate paired with its occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clause {
    /// Must or must not.
    pub occur: Occur,
    /// The condition.
    pub predicate: Predicate,
}

impl Clause {
    const fn must(predicate: Predicate) -> Self {
        Self {
            occur: Occur::Must,
            predicate,
        }
    }

    const fn must_not(predicate: Predicate) -> Self {
        Self {
            occur: Occur::MustNot,
            predicate,
        }
    }
}

/// A conjunction of clauses, always led by a date range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogQuery {
    clauses: Vec<Clause>,
}

impl LogQuery {
    /// Returns the clauses in evaluation order.
    #[must_use]
    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }
}

/// Translates `filter` into a [`LogQuery`], resolving names via `metadata`.
///
/// A name the metadata has never seen cannot match any document, so it
/// becomes [`Predicate::Nothing`].
#[must_use]
pub fn translate(filter: &Filter, metadata: &IndexMetadata) -> LogQuery {
    let mut clauses = Vec::new();

    if filter.begin < filter.end {
        clauses.push(Clause::must(Predicate::DateRange {
            begin: filter.begin,
            end: filter.end,
        }));
    } else {
        clauses.push(Clause::must(Predicate::Nothing));
    }

    if !filter.levels.is_empty() {
        for level in LogLevel::ALL {
            if !filter.levels.contains(&level) {
                clauses.push(Clause::must_not(Predicate::Equals {
                    field: NumericField::Level,
                    value: u64::from(level.id()),
                }));
            }
        }
    }

    let named = [
        (NumericField::Module, filter.module.as_deref().map(|n| metadata.module_id(n))),
        (NumericField::Class, filter.class_name.as_deref().map(|n| metadata.class_id(n))),
        (NumericField::Exception, filter.exception.as_deref().map(|n| metadata.exception_id(n))),
    ];
    for (field, lookup) in named {
        match lookup {
            None => {}
            Some(Some(id)) => clauses.push(Clause::must(Predicate::Equals {
                field,
                value: id.as_u64(),
            })),
            Some(None) => clauses.push(Clause::must(Predicate::Nothing)),
        }
    }

    if let Some(file) = filter.file {
        clauses.push(Clause::must(Predicate::Equals {
            field: NumericField::File,
            value: file.as_u64(),
        }));
    }

    if let Some(phrase) = filter.phrase.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
        clauses.push(Clause::must(Predicate::Words(phrase.to_string())));
    }

    LogQuery { clauses }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn excluded_levels(query: &LogQuery) -> BTreeSet<u64> {
        query
            .clauses()
            .iter()
            .filter_map(|c| match (&c.occur, &c.predicate) {
                (
                    Occur::MustNot,
                    Predicate::Equals {
                        field: NumericField::Level,
                        value,
                    },
                ) => Some(*value),
                _ => None,
            })
            .collect()
    }

    /// Evaluates the level clauses against a document of `level`.
    fn admits_level(query: &LogQuery, level: LogLevel) -> bool {
        !excluded_levels(query).contains(&u64::from(level.id()))
    }

    #[test]
    fn date_range_always_leads() {
        let query = translate(&Filter::between(10, 20), &IndexMetadata::new());
        assert_eq!(
            query.clauses()[0],
            Clause::must(Predicate::DateRange { begin: 10, end: 20 })
        );
        assert_eq!(query.clauses().len(), 1);
    }

    #[test]
    fn empty_date_range_matches_nothing() {
        let query = translate(&Filter::between(20, 20), &IndexMetadata::new());
        assert_eq!(query.clauses()[0], Clause::must(Predicate::Nothing));
    }

    #[test]
    fn empty_level_set_excludes_nothing() {
        let query = translate(&Filter::default(), &IndexMetadata::new());
        assert!(excluded_levels(&query).is_empty());
    }

    #[test]
    fn error_and_fatal_exclude_the_rest() {
        let filter = Filter::default()
            .with_level(LogLevel::Error)
            .with_level(LogLevel::Fatal);
        let query = translate(&filter, &IndexMetadata::new());
        let excluded: Vec<u64> = excluded_levels(&query).into_iter().collect();
        assert_eq!(excluded, vec![1, 2, 3, 5]);
        assert!(admits_level(&query, LogLevel::Error));
        assert!(admits_level(&query, LogLevel::Fatal));
        assert!(!admits_level(&query, LogLevel::Info));
    }

    #[test]
    fn known_names_resolve_to_ids() {
        let mut metadata = IndexMetadata::new();
        metadata.intern_module("core").expect("intern");
        let net = metadata.intern_module("net").expect("intern");
        let query = translate(&Filter::default().with_module("net"), &metadata);
        assert!(query.clauses().contains(&Clause::must(Predicate::Equals {
            field: NumericField::Module,
            value: net.as_u64(),
        })));
    }

    #[test]
    fn unknown_names_match_nothing() {
        let filter = Filter::default()
            .with_class("Ghost")
            .with_exception("NoSuchException");
        let query = translate(&filter, &IndexMetadata::new());
        let nothing = query
            .clauses()
            .iter()
            .filter(|c| **c == Clause::must(Predicate::Nothing))
            .count();
        assert_eq!(nothing, 2);
    }

    #[test]
    fn file_scope_and_phrase() {
        let filter = Filter::default()
            .with_file(FileId(3))
            .with_phrase("  disk full ");
        let query = translate(&filter, &IndexMetadata::new());
        assert!(query.clauses().contains(&Clause::must(Predicate::Equals {
            field: NumericField::File,
            value: 3,
        })));
        assert!(query
            .clauses()
            .contains(&Clause::must(Predicate::Words("disk full".to_string()))));
    }

    #[test]
    fn blank_phrase_is_ignored() {
        let query = translate(&Filter::default().with_phrase("   "), &IndexMetadata::new());
        assert_eq!(query.clauses().len(), 1);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn level_complement_matches_membership(mask in 0u8..64) {
                let included: BTreeSet<LogLevel> = LogLevel::ALL
                    .into_iter()
                    .enumerate()
                    .filter(|(i, _)| mask & (1 << i) != 0)
                    .map(|(_, level)| level)
                    .collect();
                let filter = Filter::default().with_levels(included.clone());
                let query = translate(&filter, &IndexMetadata::new());

                for level in LogLevel::ALL {
                    let expected = included.is_empty() || included.contains(&level);
                    prop_assert_eq!(admits_level(&query, level), expected);
                }
            }
        }
    }
}
