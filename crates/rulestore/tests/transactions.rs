// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs)]
#![allow(clippy::unwrap_used)]

//! Rollback behavior, driven by a trigger that aborts any insert whose first
//! slot is `boom`.

use rulestore::{MemoryModel, PolicyModel, RuleStore, Section, StoreError, StoreOptions};
use rusqlite::Connection;

const SCHEMA: &str = "
CREATE TABLE casbin_rule (
    id TEXT NOT NULL PRIMARY KEY,
    ptype TEXT NOT NULL DEFAULT '',
    v0 TEXT, v1 TEXT, v2 TEXT, v3 TEXT, v4 TEXT, v5 TEXT
);
CREATE TRIGGER casbin_rule_boom BEFORE INSERT ON casbin_rule
WHEN NEW.v0 = 'boom'
BEGIN
    SELECT RAISE(ABORT, 'boom rejected');
END;
";

fn trapped_store() -> RuleStore {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch(SCHEMA).unwrap();
    let mut store = RuleStore::with_connection(conn, StoreOptions::default()).unwrap();
    store
        .add_policies(
            Section::Policy,
            "p",
            &[vec!["alice", "data1", "read"], vec!["bob", "data2", "write"]],
        )
        .unwrap();
    store
}

fn snapshot(store: &mut RuleStore) -> MemoryModel {
    let mut model = MemoryModel::new();
    store.load_policy(&mut model).unwrap();
    model
}

fn owned(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| (*v).to_owned()).collect()
}

/// Model that reports whatever rule sets it was built with, regardless of
/// whether the rule types fit their section.
struct UncheckedModel(Vec<(Section, &'static str, Vec<Vec<String>>)>);

impl PolicyModel for UncheckedModel {
    fn rule_sets(&self, sec: Section) -> Vec<(&str, &[Vec<String>])> {
        self.0
            .iter()
            .filter(|(s, _, _)| *s == sec)
            .map(|(_, ptype, rules)| (*ptype, rules.as_slice()))
            .collect()
    }

    fn add_policy(&mut self, _sec: Section, _ptype: &str, _rule: Vec<String>) -> bool {
        false
    }
}

#[test]
fn failed_save_keeps_previous_contents() {
    let mut store = trapped_store();
    let before = snapshot(&mut store);

    let mut model = MemoryModel::new();
    model.add_policy(Section::Policy, "p", owned(&["carol", "data3", "read"]));
    model.add_policy(Section::Policy, "p", owned(&["boom", "data3", "read"]));
    let err = store.save_policy(&model).unwrap_err();
    assert!(matches!(err, StoreError::Storage(_)));

    assert_eq!(snapshot(&mut store), before);
}

#[test]
fn unencodable_rule_mid_save_rolls_back() {
    let mut store = trapped_store();
    let before = snapshot(&mut store);

    let mut model = MemoryModel::new();
    model.add_policy(Section::Policy, "p", owned(&["carol", "data3", "read"]));
    model.add_policy(
        Section::Policy,
        "p2",
        owned(&["1", "2", "3", "4", "5", "6", "7"]),
    );
    let err = store.save_policy(&model).unwrap_err();
    assert!(matches!(err, StoreError::RuleTooLong { .. }));

    assert_eq!(snapshot(&mut store), before);
}

#[test]
fn failed_batch_add_inserts_nothing() {
    let mut store = trapped_store();
    let err = store
        .add_policies(
            Section::Policy,
            "p",
            &[vec!["carol", "data3", "read"], vec!["boom"]],
        )
        .unwrap_err();
    assert!(matches!(err, StoreError::Storage(_)));
    assert_eq!(store.count().unwrap(), 2);
}

#[test]
fn failed_filtered_update_keeps_deleted_rows() {
    let mut store = trapped_store();
    let before = snapshot(&mut store);
    let err = store
        .update_filtered_policies(Section::Policy, "p", &[vec!["boom"]], 0, &["alice"])
        .unwrap_err();
    assert!(matches!(err, StoreError::Storage(_)));
    assert_eq!(snapshot(&mut store), before);
}

#[test]
fn store_survives_a_rolled_back_transaction() {
    let mut store = trapped_store();
    assert!(store
        .add_policy(Section::Policy, "p", &["boom"])
        .is_err());
    assert!(store
        .add_policy(Section::Policy, "p", &["carol", "data3", "read"])
        .unwrap());
    assert_eq!(store.count().unwrap(), 3);
}

#[test]
fn null_slots_read_and_match_as_empty() {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch(SCHEMA).unwrap();
    conn.execute(
        "INSERT INTO casbin_rule (id, ptype, v0, v1, v2) VALUES ('legacy-1', 'p', 'alice', NULL, 'read')",
        [],
    )
    .unwrap();
    let mut store = RuleStore::with_connection(conn, StoreOptions::default()).unwrap();

    assert_eq!(snapshot(&mut store).rules("p"), [owned(&["alice", "", "read"])]);

    store
        .update_policy(
            Section::Policy,
            "p",
            &["alice", "", "read"],
            &["alice", "", "write"],
        )
        .unwrap();
    assert_eq!(snapshot(&mut store).rules("p"), [owned(&["alice", "", "write"])]);
    assert!(!store
        .add_policy(Section::Policy, "p", &["alice", "", "write"])
        .unwrap());
}

#[test]
fn save_rejects_unknown_rule_type_and_rolls_back() {
    let mut store = trapped_store();
    let before = snapshot(&mut store);

    let model = UncheckedModel(vec![
        (Section::Policy, "p", vec![owned(&["carol", "data3", "read"])]),
        (Section::Policy, "x", vec![owned(&["bob"])]),
    ]);
    let err = store.save_policy(&model).unwrap_err();
    assert!(matches!(err, StoreError::UnknownSection { .. }));

    assert_eq!(snapshot(&mut store), before);
}

#[test]
fn save_rejects_rule_type_under_wrong_section() {
    let mut store = trapped_store();
    let before = snapshot(&mut store);

    let model = UncheckedModel(vec![(
        Section::Policy,
        "g",
        vec![owned(&["alice", "data2_admin"])],
    )]);
    let err = store.save_policy(&model).unwrap_err();
    assert!(matches!(err, StoreError::SectionMismatch { .. }));

    assert_eq!(snapshot(&mut store), before);
}
