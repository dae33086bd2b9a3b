// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The engine-facing side: policy model port and the policy line parser.

use std::collections::BTreeMap;

use crate::StoreError;

/// Which half of the policy model a rule type lives in.
///
/// Rule types are grouped by their first letter: `p`, `p2`, ... are
/// [`Policy`](Section::Policy) rules, `g`, `g2`, ... are
/// [`Grouping`](Section::Grouping) rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Section {
    /// Permission rules (`p*`).
    Policy,
    /// Role-grouping rules (`g*`).
    Grouping,
}

impl Section {
    /// Both sections, in save order.
    pub const ALL: [Section; 2] = [Section::Policy, Section::Grouping];

    /// Single-letter key of the section.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Policy => "p",
            Self::Grouping => "g",
        }
    }

    /// Section a rule type belongs to.
    pub fn of(ptype: &str) -> Result<Self, StoreError> {
        match ptype.as_bytes().first() {
            Some(b'p') => Ok(Self::Policy),
            Some(b'g') => Ok(Self::Grouping),
            _ => Err(StoreError::UnknownSection {
                ptype: ptype.to_owned(),
            }),
        }
    }
}

impl std::fmt::Display for Section {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Port onto the policy engine's in-memory model.
///
/// The store only ever reads whole rule sets (on save) and appends single
/// rules (on load). It never removes from or reorders the model.
pub trait PolicyModel {
    /// Every rule type of `sec` with its rules, in model order.
    fn rule_sets(&self, sec: Section) -> Vec<(&str, &[Vec<String>])>;

    /// Append one rule. Returns `false` if the model already holds it or
    /// refuses it.
    fn add_policy(&mut self, sec: Section, ptype: &str, rule: Vec<String>) -> bool;
}

/// Ordered, de-duplicating [`PolicyModel`] kept in memory.
///
/// A rule whose type does not belong to the given section is refused, so
/// every stored rule stays reachable through [`rules`](Self::rules).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryModel {
    sections: BTreeMap<Section, BTreeMap<String, Vec<Vec<String>>>>,
}

impl MemoryModel {
    /// Create an empty model.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rules of `ptype`, in insertion order. Unknown types yield an empty
    /// slice.
    pub fn rules(&self, ptype: &str) -> &[Vec<String>] {
        Section::of(ptype)
            .ok()
            .and_then(|sec| self.sections.get(&sec))
            .and_then(|types| types.get(ptype))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Remove one rule. Returns `false` if it was not present.
    pub fn remove_policy(&mut self, sec: Section, ptype: &str, rule: &[String]) -> bool {
        let Some(rules) = self
            .sections
            .get_mut(&sec)
            .and_then(|types| types.get_mut(ptype))
        else {
            return false;
        };
        let before = rules.len();
        rules.retain(|existing| existing.as_slice() != rule);
        rules.len() != before
    }

    /// Total number of rules across both sections.
    pub fn len(&self) -> usize {
        self.sections
            .values()
            .flat_map(BTreeMap::values)
            .map(Vec::len)
            .sum()
    }

    /// Returns `true` if no rules are held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every rule.
    pub fn clear(&mut self) {
        self.sections.clear();
    }
}

impl PolicyModel for MemoryModel {
    fn rule_sets(&self, sec: Section) -> Vec<(&str, &[Vec<String>])> {
        self.sections.get(&sec).map_or_else(Vec::new, |types| {
            types
                .iter()
                .map(|(ptype, rules)| (ptype.as_str(), rules.as_slice()))
                .collect()
        })
    }

    fn add_policy(&mut self, sec: Section, ptype: &str, rule: Vec<String>) -> bool {
        if Section::of(ptype).ok() != Some(sec) {
            return false;
        }
        let rules = self
            .sections
            .entry(sec)
            .or_default()
            .entry(ptype.to_owned())
            .or_default();
        if rules.contains(&rule) {
            return false;
        }
        rules.push(rule);
        true
    }
}

/// Split a policy line into tokens.
///
/// Tokens are separated by `,`. Leading whitespace before each token is
/// skipped; trailing whitespace is kept. A token may be double-quoted, in
/// which case `""` stands for one literal quote and commas are literal.
///
/// # Errors
///
/// Returns [`StoreError::MalformedLine`] for an unterminated quote or for text
/// between a closing quote and the next separator.
pub fn split_line(line: &str) -> Result<Vec<String>, StoreError> {
    let malformed = || StoreError::MalformedLine {
        line: line.to_owned(),
    };
    let mut tokens = Vec::new();
    let mut chars = line.chars().peekable();
    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        let mut token = String::new();
        if chars.next_if_eq(&'"').is_some() {
            loop {
                match chars.next() {
                    Some('"') => {
                        if chars.next_if_eq(&'"').is_none() {
                            break;
                        }
                        token.push('"');
                    }
                    Some(c) => token.push(c),
                    None => return Err(malformed()),
                }
            }
            tokens.push(token);
            match chars.next() {
                None => return Ok(tokens),
                Some(',') => continue,
                Some(_) => return Err(malformed()),
            }
        }
        loop {
            match chars.next() {
                None => {
                    tokens.push(token);
                    return Ok(tokens);
                }
                Some(',') => break,
                Some(c) => token.push(c),
            }
        }
        tokens.push(token);
    }
}

/// Parse one policy line and append it to `model`.
///
/// The first token names the rule type; the rest are the rule's fields. Blank
/// lines and `#` comments are ignored.
///
/// # Errors
///
/// Returns [`StoreError::MalformedLine`] if the line cannot be tokenized and
/// [`StoreError::UnknownSection`] if the rule type is neither `p*` nor `g*`.
pub fn load_policy_line<M>(line: &str, model: &mut M) -> Result<(), StoreError>
where
    M: PolicyModel + ?Sized,
{
    let trimmed = line.trim_start();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(());
    }
    let mut tokens = split_line(line)?.into_iter();
    let ptype = tokens.next().unwrap_or_default();
    let sec = Section::of(&ptype)?;
    model.add_policy(sec, &ptype, tokens.collect());
    Ok(())
}

/// Feed every line of a policy text through [`load_policy_line`]. Returns the
/// number of rule lines seen.
pub fn load_policy_text<M>(text: &str, model: &mut M) -> Result<usize, StoreError>
where
    M: PolicyModel + ?Sized,
{
    let mut seen = 0;
    for line in text.lines() {
        let trimmed = line.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        load_policy_line(line, model)?;
        seen += 1;
    }
    Ok(seen)
}
