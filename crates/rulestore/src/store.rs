// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! SQLite-backed rule store.
//!
//! [`RuleStore`] owns one connection and one table. It keeps no cache: every
//! load reads the table, every mutation writes it. Multi-row mutations run in
//! a single transaction which is rolled back when any step fails (dropping an
//! uncommitted [`rusqlite::Transaction`] rolls it back).

use std::path::PathBuf;
use std::str::FromStr;

use rusqlite::{params, params_from_iter, Connection, Row};
use tracing::{debug, instrument};

use crate::filter::{FieldFilter, LoadFilter, Predicate};
use crate::model::{load_policy_line, PolicyModel, Section};
use crate::record::{RuleRecord, FIELD_COUNT};
use crate::StoreError;

/// Table used when no name is configured.
pub const DEFAULT_TABLE_NAME: &str = "casbin_rule";

const COLUMNS: &str = "id, ptype, v0, v1, v2, v3, v4, v5";

/// Where the store's database lives.
///
/// Parsed from a connection descriptor string:
///
/// | Descriptor | Meaning |
/// |---|---|
/// | `sqlite::memory:`, `:memory:` | private in-memory database |
/// | `sqlite://<path>`, `sqlite:<path>` | database file at `<path>` |
/// | `<path>` | database file at `<path>` |
///
/// Any other `scheme://` prefix is rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Descriptor {
    /// In-memory database, discarded on close.
    Memory,
    /// Database file, created if missing.
    File(PathBuf),
}

impl FromStr for Descriptor {
    type Err = StoreError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = || StoreError::InvalidDescriptor {
            descriptor: raw.to_owned(),
        };
        let trimmed = raw.trim();
        if matches!(trimmed, "sqlite::memory:" | ":memory:") {
            return Ok(Self::Memory);
        }
        let path = if let Some(rest) = trimmed.strip_prefix("sqlite://") {
            rest
        } else if let Some(rest) = trimmed.strip_prefix("sqlite:") {
            rest
        } else if trimmed.contains("://") {
            return Err(invalid());
        } else {
            trimmed
        };
        if path.is_empty() {
            return Err(invalid());
        }
        Ok(Self::File(PathBuf::from(path)))
    }
}

/// Construction options for [`RuleStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOptions {
    table_name: String,
    skip_table_create: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            table_name: DEFAULT_TABLE_NAME.to_owned(),
            skip_table_create: false,
        }
    }
}

impl StoreOptions {
    /// Store rules in `table_name` instead of [`DEFAULT_TABLE_NAME`].
    pub fn with_table_name(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = table_name.into();
        self
    }

    /// Do not create the table on construction. Operations fail with a storage
    /// error if it does not exist.
    pub fn skip_table_create(mut self) -> Self {
        self.skip_table_create = true;
        self
    }

    /// Configured table name.
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Whether table creation is skipped.
    pub fn skips_table_create(&self) -> bool {
        self.skip_table_create
    }
}

/// Table names are interpolated into SQL, so only plain identifiers pass.
fn validate_table_name(name: &str) -> Result<(), StoreError> {
    let mut chars = name.chars();
    let valid_head = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if valid_head && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(StoreError::InvalidTableName {
            name: name.to_owned(),
        })
    }
}

/// Persistent rule storage over one SQLite table.
///
/// # Layout
///
/// `id TEXT PRIMARY KEY, ptype TEXT, v0..v5 TEXT`. `id` is the record's
/// [`rule_id`](crate::rule_id) in hex. `NULL` slots read back as empty.
///
/// # Filtered Loads
///
/// [`is_filtered`](Self::is_filtered) reports whether the last load was
/// partial. Saving a model obtained from a partial load replaces the whole
/// table with that subset; callers are expected to check the flag first.
#[derive(Debug)]
pub struct RuleStore {
    conn: Option<Connection>,
    table: String,
    filtered: bool,
}

impl RuleStore {
    /// Open the database named by `descriptor` and prepare the rule table.
    ///
    /// The descriptor and table name are validated before the database is
    /// touched.
    pub fn open(descriptor: &str, options: StoreOptions) -> Result<Self, StoreError> {
        let descriptor: Descriptor = descriptor.parse()?;
        validate_table_name(options.table_name())?;
        let conn = match descriptor {
            Descriptor::Memory => Connection::open_in_memory()?,
            Descriptor::File(path) => Connection::open(path)?,
        };
        Self::with_connection(conn, options)
    }

    /// Wrap an existing connection. Creates the rule table unless told not to.
    pub fn with_connection(conn: Connection, options: StoreOptions) -> Result<Self, StoreError> {
        validate_table_name(options.table_name())?;
        let store = Self {
            conn: Some(conn),
            table: options.table_name,
            filtered: false,
        };
        if !options.skip_table_create {
            store.create_table()?;
        }
        Ok(store)
    }

    fn create_table(&self) -> Result<(), StoreError> {
        let table = &self.table;
        self.conn()?.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id TEXT NOT NULL PRIMARY KEY,
                ptype TEXT NOT NULL DEFAULT '',
                v0 TEXT DEFAULT '',
                v1 TEXT DEFAULT '',
                v2 TEXT DEFAULT '',
                v3 TEXT DEFAULT '',
                v4 TEXT DEFAULT '',
                v5 TEXT DEFAULT ''
            );
            CREATE INDEX IF NOT EXISTS {table}_rule_idx ON {table} (ptype, v0, v1, v2);"
        ))?;
        debug!(table = %table, "rule table ready");
        Ok(())
    }

    fn conn(&self) -> Result<&Connection, StoreError> {
        self.conn.as_ref().ok_or(StoreError::Closed)
    }

    /// Name of the backing table.
    pub fn table_name(&self) -> &str {
        &self.table
    }

    /// Whether the last load was a filtered one.
    pub fn is_filtered(&self) -> bool {
        self.filtered
    }

    /// Returns `true` once [`close`](Self::close) has run.
    pub fn is_closed(&self) -> bool {
        self.conn.is_none()
    }

    /// Release the connection. Closing twice is a no-op.
    pub fn close(&mut self) -> Result<(), StoreError> {
        if let Some(conn) = self.conn.take() {
            conn.close().map_err(|(_, err)| StoreError::Storage(err))?;
        }
        Ok(())
    }

    /// Number of stored rows.
    pub fn count(&self) -> Result<usize, StoreError> {
        let count: i64 = self.conn()?.query_row(
            &format!("SELECT COUNT(*) FROM {}", self.table),
            [],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    /// Read every row into `model`.
    #[instrument(level = "debug", skip_all, fields(table = %self.table))]
    pub fn load_policy<M>(&mut self, model: &mut M) -> Result<(), StoreError>
    where
        M: PolicyModel + ?Sized,
    {
        let records = select_records(self.conn()?, &self.table, None)?;
        for record in &records {
            load_policy_line(&record.to_line(), model)?;
        }
        self.filtered = false;
        debug!(rules = records.len(), "loaded policy");
        Ok(())
    }

    /// Read only the rows selected by `filter` into `model`.
    ///
    /// [`LoadFilter::All`] behaves exactly like [`load_policy`](Self::load_policy).
    /// A typed filter is validated in full before any query runs.
    #[instrument(level = "debug", skip_all, fields(table = %self.table))]
    pub fn load_filtered_policy<M>(
        &mut self,
        model: &mut M,
        filter: impl Into<LoadFilter>,
    ) -> Result<(), StoreError>
    where
        M: PolicyModel + ?Sized,
    {
        let filter = match filter.into() {
            LoadFilter::All => return self.load_policy(model),
            LoadFilter::Typed(filter) => filter,
        };
        let field_filters = filter.field_filters()?;
        let conn = self.conn()?;
        let mut records = Vec::new();
        for (ptype, field_filter) in &field_filters {
            let predicate = Predicate::matching(ptype, field_filter);
            records.extend(select_records(conn, &self.table, Some(&predicate))?);
        }
        for record in &records {
            load_policy_line(&record.to_line(), model)?;
        }
        self.filtered = true;
        debug!(rules = records.len(), "loaded filtered policy");
        Ok(())
    }

    /// Replace the whole table with the rules of `model`.
    ///
    /// Runs as one transaction: the table is emptied, then every rule is
    /// encoded and inserted. Duplicate rules collapse onto one row. If any
    /// rule fails to encode or insert, or a rule type is filed under the wrong
    /// section, the table keeps its previous contents.
    #[instrument(level = "debug", skip_all, fields(table = %self.table))]
    pub fn save_policy<M>(&mut self, model: &M) -> Result<(), StoreError>
    where
        M: PolicyModel + ?Sized,
    {
        let table = &self.table;
        let tx = self.conn.as_mut().ok_or(StoreError::Closed)?.transaction()?;
        tx.execute(&format!("DELETE FROM {table}"), [])?;
        let mut inserted = 0;
        for sec in Section::ALL {
            for (ptype, rules) in model.rule_sets(sec) {
                check_section(sec, ptype)?;
                for rule in rules {
                    let record = RuleRecord::from_rule(ptype, rule)?;
                    inserted += insert_record(&tx, table, &record)?;
                }
            }
        }
        tx.commit()?;
        debug!(rows = inserted, "saved policy");
        Ok(())
    }

    /// Store one rule. Returns `false` if an identical rule was already stored.
    #[instrument(level = "debug", skip(self, rule), fields(table = %self.table))]
    pub fn add_policy<S: AsRef<str>>(
        &mut self,
        sec: Section,
        ptype: &str,
        rule: &[S],
    ) -> Result<bool, StoreError> {
        check_section(sec, ptype)?;
        let record = RuleRecord::from_rule(ptype, rule)?;
        let inserted = insert_record(self.conn()?, &self.table, &record)?;
        Ok(inserted == 1)
    }

    /// Store several rules in one transaction. Rules already stored are
    /// skipped. Returns the number of rows actually inserted.
    #[instrument(level = "debug", skip(self, rules), fields(table = %self.table, count = rules.len()))]
    pub fn add_policies<S: AsRef<str>>(
        &mut self,
        sec: Section,
        ptype: &str,
        rules: &[Vec<S>],
    ) -> Result<usize, StoreError> {
        check_section(sec, ptype)?;
        let records = encode_all(ptype, rules)?;
        let table = &self.table;
        let tx = self.conn.as_mut().ok_or(StoreError::Closed)?.transaction()?;
        let mut inserted = 0;
        for record in &records {
            inserted += insert_record(&tx, table, record)?;
        }
        tx.commit()?;
        debug!(rows = inserted, "added policies");
        Ok(inserted)
    }

    /// Delete one rule by identity. Returns `false` if it was not stored.
    #[instrument(level = "debug", skip(self, rule), fields(table = %self.table))]
    pub fn remove_policy<S: AsRef<str>>(
        &mut self,
        sec: Section,
        ptype: &str,
        rule: &[S],
    ) -> Result<bool, StoreError> {
        check_section(sec, ptype)?;
        let record = RuleRecord::from_rule(ptype, rule)?;
        let removed = delete_by_id(self.conn()?, &self.table, record.id())?;
        Ok(removed == 1)
    }

    /// Delete several rules by identity in one transaction. Returns the number
    /// of rows removed.
    #[instrument(level = "debug", skip(self, rules), fields(table = %self.table, count = rules.len()))]
    pub fn remove_policies<S: AsRef<str>>(
        &mut self,
        sec: Section,
        ptype: &str,
        rules: &[Vec<S>],
    ) -> Result<usize, StoreError> {
        check_section(sec, ptype)?;
        let records = encode_all(ptype, rules)?;
        let table = &self.table;
        let tx = self.conn.as_mut().ok_or(StoreError::Closed)?.transaction()?;
        let mut removed = 0;
        for record in &records {
            removed += delete_by_id(&tx, table, record.id())?;
        }
        tx.commit()?;
        debug!(rows = removed, "removed policies");
        Ok(removed)
    }

    /// Delete every `ptype` rule matching `values` laid over slots
    /// `start..start + values.len()`. Empty values are wildcards. Returns the
    /// number of rows removed.
    #[instrument(level = "debug", skip(self, values), fields(table = %self.table))]
    pub fn remove_filtered_policy<S: AsRef<str>>(
        &mut self,
        sec: Section,
        ptype: &str,
        start: usize,
        values: &[S],
    ) -> Result<usize, StoreError> {
        check_section(sec, ptype)?;
        let predicate = Predicate::matching(ptype, &FieldFilter::new(start, values)?);
        let table = &self.table;
        let tx = self.conn.as_mut().ok_or(StoreError::Closed)?.transaction()?;
        let removed = delete_where(&tx, table, &predicate)?;
        tx.commit()?;
        debug!(rows = removed, "removed filtered policies");
        Ok(removed)
    }

    /// Replace the stored rule equal to `old` with `new`.
    ///
    /// The old row is found by comparing the rule type and all six slots, not
    /// by identity. Fails with [`StoreError::NoMatchingRule`] if no row matches.
    pub fn update_policy<S: AsRef<str>>(
        &mut self,
        sec: Section,
        ptype: &str,
        old: &[S],
        new: &[S],
    ) -> Result<(), StoreError> {
        check_section(sec, ptype)?;
        let old = RuleRecord::from_rule(ptype, old)?;
        let new = RuleRecord::from_rule(ptype, new)?;
        self.update_records(&[(old, new)])
    }

    /// Apply `old[i] -> new[i]` for every pair in one transaction. The first
    /// pair that matches no row aborts the batch and rolls back the rest.
    pub fn update_policies<S: AsRef<str>>(
        &mut self,
        sec: Section,
        ptype: &str,
        old: &[Vec<S>],
        new: &[Vec<S>],
    ) -> Result<(), StoreError> {
        check_section(sec, ptype)?;
        if old.len() != new.len() {
            return Err(StoreError::BatchLengthMismatch {
                old: old.len(),
                new: new.len(),
            });
        }
        let pairs = encode_all(ptype, old)?
            .into_iter()
            .zip(encode_all(ptype, new)?)
            .collect::<Vec<_>>();
        self.update_records(&pairs)
    }

    #[instrument(level = "debug", skip_all, fields(table = %self.table, count = pairs.len()))]
    fn update_records(&mut self, pairs: &[(RuleRecord, RuleRecord)]) -> Result<(), StoreError> {
        let table = &self.table;
        let tx = self.conn.as_mut().ok_or(StoreError::Closed)?.transaction()?;
        for (old, new) in pairs {
            let predicate = Predicate::exact(old);
            let sql = format!(
                "UPDATE {table} SET id = ?, ptype = ?, v0 = ?, v1 = ?, v2 = ?, v3 = ?, v4 = ?, v5 = ? WHERE {}",
                predicate.clause
            );
            let values = record_params(new).into_iter().chain(predicate.params);
            let affected = tx.execute(&sql, params_from_iter(values))?;
            match affected {
                1 => {}
                0 => {
                    return Err(StoreError::NoMatchingRule {
                        ptype: old.ptype().to_owned(),
                        rule: old.rule(),
                    })
                }
                actual => return Err(StoreError::AffectedRows { expected: 1, actual }),
            }
        }
        tx.commit()?;
        debug!("updated policies");
        Ok(())
    }

    /// Delete every `ptype` rule matching the filter, then insert `new_rules`,
    /// all in one transaction.
    ///
    /// Returns the deleted rules as tuples (rule type first, empty tail
    /// trimmed), so the caller can drop exactly those from its model.
    #[instrument(level = "debug", skip(self, new_rules, values), fields(table = %self.table, count = new_rules.len()))]
    pub fn update_filtered_policies<S: AsRef<str>>(
        &mut self,
        sec: Section,
        ptype: &str,
        new_rules: &[Vec<S>],
        start: usize,
        values: &[S],
    ) -> Result<Vec<Vec<String>>, StoreError> {
        check_section(sec, ptype)?;
        let predicate = Predicate::matching(ptype, &FieldFilter::new(start, values)?);
        let records = encode_all(ptype, new_rules)?;
        let table = &self.table;
        let tx = self.conn.as_mut().ok_or(StoreError::Closed)?.transaction()?;
        let removed = select_records(&tx, table, Some(&predicate))?;
        delete_where(&tx, table, &predicate)?;
        let mut inserted = 0;
        for record in &records {
            inserted += insert_record(&tx, table, record)?;
        }
        tx.commit()?;
        debug!(removed = removed.len(), inserted, "updated filtered policies");
        Ok(removed.iter().map(RuleRecord::to_tuple).collect())
    }
}

fn check_section(sec: Section, ptype: &str) -> Result<(), StoreError> {
    if Section::of(ptype)? == sec {
        Ok(())
    } else {
        Err(StoreError::SectionMismatch {
            section: sec,
            ptype: ptype.to_owned(),
        })
    }
}

fn encode_all<S: AsRef<str>>(ptype: &str, rules: &[Vec<S>]) -> Result<Vec<RuleRecord>, StoreError> {
    rules
        .iter()
        .map(|rule| RuleRecord::from_rule(ptype, rule))
        .collect()
}

fn record_params(record: &RuleRecord) -> Vec<String> {
    let mut values = Vec::with_capacity(FIELD_COUNT + 2);
    values.push(record.id().to_owned());
    values.push(record.ptype().to_owned());
    values.extend(record.fields().iter().cloned());
    values
}

fn read_record(row: &Row<'_>) -> rusqlite::Result<RuleRecord> {
    let id: String = row.get(0)?;
    let ptype: Option<String> = row.get(1)?;
    let mut fields: [String; FIELD_COUNT] = Default::default();
    for (slot, field) in fields.iter_mut().enumerate() {
        let value: Option<String> = row.get(slot + 2)?;
        *field = value.unwrap_or_default();
    }
    Ok(RuleRecord::from_row(id, ptype.unwrap_or_default(), fields))
}

fn select_records(
    conn: &Connection,
    table: &str,
    predicate: Option<&Predicate>,
) -> Result<Vec<RuleRecord>, StoreError> {
    let (sql, values) = match predicate {
        Some(predicate) => (
            format!(
                "SELECT {COLUMNS} FROM {table} WHERE {} ORDER BY rowid",
                predicate.clause
            ),
            predicate.params.as_slice(),
        ),
        None => (format!("SELECT {COLUMNS} FROM {table} ORDER BY rowid"), &[][..]),
    };
    let mut stmt = conn.prepare(&sql)?;
    let records = stmt
        .query_map(params_from_iter(values), read_record)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(records)
}

fn insert_record(conn: &Connection, table: &str, record: &RuleRecord) -> Result<usize, StoreError> {
    let sql = format!("INSERT OR IGNORE INTO {table} ({COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)");
    let mut stmt = conn.prepare_cached(&sql)?;
    Ok(stmt.execute(params_from_iter(record_params(record)))?)
}

fn delete_by_id(conn: &Connection, table: &str, id: &str) -> Result<usize, StoreError> {
    let mut stmt = conn.prepare_cached(&format!("DELETE FROM {table} WHERE id = ?1"))?;
    Ok(stmt.execute(params![id])?)
}

fn delete_where(conn: &Connection, table: &str, predicate: &Predicate) -> Result<usize, StoreError> {
    let sql = format!("DELETE FROM {table} WHERE {}", predicate.clause);
    Ok(conn.execute(&sql, params_from_iter(&predicate.params))?)
}
