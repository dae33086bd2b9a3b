// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Relational storage backend for authorization policy rules.
//!
//! A policy engine holds its rules as short string tuples grouped by rule type
//! (`p`, `p2`, ... for permissions; `g`, `g2`, ... for role grouping). This
//! crate persists those tuples as rows of a single SQLite table and loads them
//! back into the engine's model.
//!
//! # Row Identity
//!
//! Every row is keyed by [`rule_id`]: a BLAKE3 fingerprint over the rule type
//! and all six field slots. Identical rules always hash to the same key, so
//! inserting a rule that is already stored is a no-op rather than a duplicate
//! row or a constraint error.
//!
//! # Trailing Empties
//!
//! A rule's stored length is not recorded. Empty fields inside a rule survive
//! a round-trip (`["alice", "", "read"]`), but an empty tail is dropped
//! (`["bob", "data1", ""]` loads back as `["bob", "data1"]`). The engine's line
//! parser cannot tell the two apart, and neither can the table.
//!
//! # Transactions
//!
//! [`RuleStore`] holds no state beyond the connection and the
//! [`is_filtered`](RuleStore::is_filtered) flag. Every multi-row mutation runs
//! inside one SQLite transaction and rolls back on the first failure. Nothing
//! is retried.
#![forbid(unsafe_code)]

mod filter;
mod ident;
mod model;
mod record;
mod store;

pub use filter::{FieldFilter, Filter, LoadFilter};
pub use ident::{rule_id, RuleId};
pub use model::{load_policy_line, load_policy_text, split_line, MemoryModel, PolicyModel, Section};
pub use record::{RuleRecord, FIELD_COUNT, LINE_SEPARATOR};
pub use store::{Descriptor, RuleStore, StoreOptions, DEFAULT_TABLE_NAME};

/// Errors returned by [`RuleStore`] and the codec.
///
/// Shape errors (`RuleTooLong`, `FilterOutOfRange`, `SectionMismatch`, ...) are
/// raised before any statement is issued. [`StoreError::Storage`] carries the
/// SQLite error verbatim; when it surfaces from a batch operation the
/// surrounding transaction has already been rolled back.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The connection descriptor could not be understood.
    #[error("[STORE_BAD_DESCRIPTOR] unsupported connection descriptor {descriptor:?}")]
    InvalidDescriptor {
        /// The descriptor as supplied.
        descriptor: String,
    },
    /// The table name is not a plain SQL identifier.
    #[error("[STORE_BAD_TABLE] invalid table name {name:?}")]
    InvalidTableName {
        /// The rejected name.
        name: String,
    },
    /// A rule tuple has more positional fields than a row can hold.
    #[error("[RULE_TOO_LONG] rule of type {ptype:?} has {len} fields, at most {max} are supported", max = FIELD_COUNT)]
    RuleTooLong {
        /// Rule type of the offending tuple.
        ptype: String,
        /// Number of fields supplied.
        len: usize,
    },
    /// A filter addresses a field slot beyond the last one.
    #[error("[FILTER_OUT_OF_RANGE] filter starting at slot {start} with {len} values exceeds {max} fields", max = FIELD_COUNT)]
    FilterOutOfRange {
        /// First slot addressed by the filter.
        start: usize,
        /// Number of values in the filter.
        len: usize,
    },
    /// The rule type does not belong to a known section.
    #[error("[RULE_UNKNOWN_SECTION] rule type {ptype:?} is neither a policy nor a grouping type")]
    UnknownSection {
        /// The rule type as supplied.
        ptype: String,
    },
    /// The caller addressed a rule type under the wrong section.
    #[error("[RULE_SECTION_MISMATCH] rule type {ptype:?} does not belong to section {section}")]
    SectionMismatch {
        /// Section named by the caller.
        section: Section,
        /// Rule type named by the caller.
        ptype: String,
    },
    /// A policy line could not be tokenized.
    #[error("[LINE_MALFORMED] cannot parse policy line {line:?}")]
    MalformedLine {
        /// The offending line.
        line: String,
    },
    /// An update batch paired a different number of old and new rules.
    #[error("[UPDATE_BATCH_MISMATCH] {old} old rules paired with {new} new rules")]
    BatchLengthMismatch {
        /// Number of old rules.
        old: usize,
        /// Number of new rules.
        new: usize,
    },
    /// An update found no stored row equal to the old rule.
    #[error("[UPDATE_NO_MATCH] no stored rule of type {ptype:?} equals {rule:?}")]
    NoMatchingRule {
        /// Rule type of the old rule.
        ptype: String,
        /// Fields of the old rule.
        rule: Vec<String>,
    },
    /// An update touched an unexpected number of rows.
    #[error("[UPDATE_AFFECTED_ROWS] expected {expected} affected row(s), got {actual}")]
    AffectedRows {
        /// Rows the statement should have touched.
        expected: usize,
        /// Rows it actually touched.
        actual: usize,
    },
    /// The store was closed.
    #[error("[STORE_CLOSED] store connection is closed")]
    Closed,
    /// Error reported by SQLite.
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}
