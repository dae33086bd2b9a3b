// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Sparse field filters and the SQL predicates built from them.

use crate::record::{RuleRecord, FIELD_COUNT};
use crate::StoreError;

/// Offset-addressed sparse match on a rule's field slots.
///
/// The value at list position `i` constrains slot `start + i`. Non-empty
/// values must match exactly; empty values match anything. A filter with no
/// non-empty value matches every rule of the addressed type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldFilter {
    start: usize,
    values: Vec<String>,
}

impl FieldFilter {
    /// Build a filter whose first value constrains slot `start`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::FilterOutOfRange`] if `start` is not a valid slot
    /// or the values would run past the last slot.
    pub fn new<S: AsRef<str>>(start: usize, values: &[S]) -> Result<Self, StoreError> {
        if start >= FIELD_COUNT || start + values.len() > FIELD_COUNT {
            return Err(StoreError::FilterOutOfRange {
                start,
                len: values.len(),
            });
        }
        Ok(Self {
            start,
            values: values.iter().map(|v| v.as_ref().to_owned()).collect(),
        })
    }

    /// Filter that matches every rule.
    pub fn any() -> Self {
        Self {
            start: 0,
            values: Vec::new(),
        }
    }

    /// First slot addressed.
    pub fn start(&self) -> usize {
        self.start
    }

    /// Values as supplied, empties included.
    pub fn values(&self) -> &[String] {
        &self.values
    }

    /// `(slot, value)` for every non-empty value.
    pub fn constraints(&self) -> impl Iterator<Item = (usize, &str)> + '_ {
        self.values
            .iter()
            .enumerate()
            .filter(|(_, value)| !value.is_empty())
            .map(move |(offset, value)| (self.start + offset, value.as_str()))
    }

    /// In-memory counterpart of the SQL predicate.
    pub fn matches(&self, record: &RuleRecord) -> bool {
        self.constraints()
            .all(|(slot, value)| record.fields()[slot] == value)
    }
}

/// Per-section filter for partial loads.
///
/// `None` leaves that section untouched; `Some(vec![])` loads all of its rows.
/// Only the literal rule types `p` and `g` are consulted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    /// Values for `p` rules, starting at slot 0.
    pub p: Option<Vec<String>>,
    /// Values for `g` rules, starting at slot 0.
    pub g: Option<Vec<String>>,
}

impl Filter {
    /// Validate both halves and pair them with their rule types.
    pub(crate) fn field_filters(&self) -> Result<Vec<(&'static str, FieldFilter)>, StoreError> {
        [("p", &self.p), ("g", &self.g)]
            .into_iter()
            .filter_map(|(ptype, values)| {
                values
                    .as_deref()
                    .map(|values| FieldFilter::new(0, values).map(|filter| (ptype, filter)))
            })
            .collect()
    }
}

/// Argument of a filtered load: everything, or a typed [`Filter`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LoadFilter {
    /// Load every row; equivalent to an unfiltered load.
    #[default]
    All,
    /// Load only rows matching the filter.
    Typed(Filter),
}

impl From<Filter> for LoadFilter {
    fn from(filter: Filter) -> Self {
        Self::Typed(filter)
    }
}

impl From<Option<Filter>> for LoadFilter {
    fn from(filter: Option<Filter>) -> Self {
        filter.map_or(Self::All, Self::Typed)
    }
}

/// `WHERE` clause with positional `?` parameters, bound in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Predicate {
    pub(crate) clause: String,
    pub(crate) params: Vec<String>,
}

impl Predicate {
    /// Rows of `ptype` satisfying `filter`.
    pub(crate) fn matching(ptype: &str, filter: &FieldFilter) -> Self {
        let mut clause = String::from("ptype = ?");
        let mut params = vec![ptype.to_owned()];
        for (slot, value) in filter.constraints() {
            clause.push_str(&format!(" AND v{slot} = ?"));
            params.push(value.to_owned());
        }
        Self { clause, params }
    }

    /// Rows whose type and all six slots equal `record`'s. NULL slots count as
    /// empty.
    pub(crate) fn exact(record: &RuleRecord) -> Self {
        let mut clause = String::from("ptype = ?");
        let mut params = vec![record.ptype().to_owned()];
        for (slot, value) in record.fields().iter().enumerate() {
            clause.push_str(&format!(" AND COALESCE(v{slot}, '') = ?"));
            params.push(value.clone());
        }
        Self { clause, params }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn record(rule: &[&str]) -> RuleRecord {
        RuleRecord::from_rule("p", rule).unwrap()
    }

    #[test]
    fn offset_addresses_later_slots() {
        let filter = FieldFilter::new(1, &["data2", "", "x"]).unwrap();
        let constraints: Vec<_> = filter.constraints().collect();
        assert_eq!(constraints, [(1, "data2"), (3, "x")]);
    }

    #[test]
    fn empty_values_are_wildcards() {
        let filter = FieldFilter::new(0, &["", "", "read"]).unwrap();
        assert!(filter.matches(&record(&["alice", "data1", "read"])));
        assert!(filter.matches(&record(&["data2_admin", "data2", "read"])));
        assert!(!filter.matches(&record(&["bob", "data2", "write"])));
    }

    #[test]
    fn empty_filter_matches_everything() {
        let filter = FieldFilter::new::<&str>(0, &[]).unwrap();
        assert!(filter.matches(&record(&[])));
        assert!(filter.matches(&record(&["a", "b"])));
        assert_eq!(filter, FieldFilter::any());
    }

    #[test]
    fn slot_past_end_rejected() {
        assert!(FieldFilter::new(0, &["1", "2", "3", "4", "5", "6"]).is_ok());
        assert!(matches!(
            FieldFilter::new(0, &["1", "2", "3", "4", "5", "6", "7"]),
            Err(StoreError::FilterOutOfRange { start: 0, len: 7 })
        ));
        assert!(FieldFilter::new(5, &["a", "b"]).is_err());
        assert!(FieldFilter::new::<&str>(6, &[]).is_err());
    }

    #[test]
    fn matching_predicate_binds_in_order() {
        let filter = FieldFilter::new(0, &["", "data2"]).unwrap();
        let predicate = Predicate::matching("p", &filter);
        assert_eq!(predicate.clause, "ptype = ? AND v1 = ?");
        assert_eq!(predicate.params, ["p", "data2"]);
    }

    #[test]
    fn exact_predicate_covers_all_slots() {
        let predicate = Predicate::exact(&record(&["alice", "", "read"]));
        assert_eq!(predicate.params, ["p", "alice", "", "read", "", "", ""]);
        assert_eq!(predicate.clause.matches(" = ?").count(), FIELD_COUNT + 1);
    }

    #[test]
    fn typed_filter_skips_absent_sections() {
        let filter = Filter {
            p: None,
            g: Some(vec!["alice".to_owned()]),
        };
        let pairs = filter.field_filters().unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].0, "g");
    }

    #[test]
    fn typed_filter_validates_length() {
        let filter = Filter {
            p: Some(vec![String::new(); 7]),
            g: None,
        };
        assert!(filter.field_filters().is_err());
    }

    #[test]
    fn load_filter_from_option() {
        assert_eq!(LoadFilter::from(None::<Filter>), LoadFilter::All);
        assert!(matches!(
            LoadFilter::from(Some(Filter::default())),
            LoadFilter::Typed(_)
        ));
    }
}
