// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Rule records and their canonical line/tuple encodings.

use crate::ident::rule_id;
use crate::StoreError;

/// Number of positional field slots in a stored rule.
pub const FIELD_COUNT: usize = 6;

/// Token separator of the engine's policy line format.
pub const LINE_SEPARATOR: &str = ", ";

/// One stored policy rule: identity, rule type, and six left-aligned slots.
///
/// Records are never edited in place. Updates replace the whole row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleRecord {
    id: String,
    ptype: String,
    fields: [String; FIELD_COUNT],
}

impl RuleRecord {
    /// Build a record from an engine tuple. Slots past the tuple's length stay
    /// empty and the identity is computed from the result.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::RuleTooLong`] if `rule` has more than
    /// [`FIELD_COUNT`] entries.
    pub fn from_rule<S: AsRef<str>>(ptype: &str, rule: &[S]) -> Result<Self, StoreError> {
        if rule.len() > FIELD_COUNT {
            return Err(StoreError::RuleTooLong {
                ptype: ptype.to_owned(),
                len: rule.len(),
            });
        }
        let mut fields: [String; FIELD_COUNT] = Default::default();
        for (slot, value) in fields.iter_mut().zip(rule) {
            value.as_ref().clone_into(slot);
        }
        let id = rule_id(ptype, &fields).to_hex();
        Ok(Self {
            id,
            ptype: ptype.to_owned(),
            fields,
        })
    }

    /// Rebuild a record read back from a row. The stored identity is kept as
    /// is, even if it predates the current fingerprint scheme.
    pub(crate) fn from_row(id: String, ptype: String, fields: [String; FIELD_COUNT]) -> Self {
        Self { id, ptype, fields }
    }

    /// Primary key of the row.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Rule type discriminator (`p`, `g`, ...).
    pub fn ptype(&self) -> &str {
        &self.ptype
    }

    /// All six slots, including the empty tail.
    pub fn fields(&self) -> &[String; FIELD_COUNT] {
        &self.fields
    }

    /// Number of slots up to and including the last non-empty one.
    pub fn effective_len(&self) -> usize {
        self.fields
            .iter()
            .rposition(|field| !field.is_empty())
            .map_or(0, |last| last + 1)
    }

    /// The rule's fields with the empty tail trimmed, as the engine's model
    /// holds them.
    pub fn rule(&self) -> Vec<String> {
        self.fields[..self.effective_len()].to_vec()
    }

    /// Rule type (when non-empty) followed by [`rule`](Self::rule).
    pub fn to_tuple(&self) -> Vec<String> {
        let mut tuple = Vec::with_capacity(self.effective_len() + 1);
        if !self.ptype.is_empty() {
            tuple.push(self.ptype.clone());
        }
        tuple.extend(self.rule());
        tuple
    }

    /// Encode as one policy line: the rule type, then every slot up to the last
    /// non-empty one, each preceded by [`LINE_SEPARATOR`].
    ///
    /// Interior empty slots are emitted as empty tokens. Tokens the line parser
    /// would otherwise mangle are double-quoted.
    pub fn to_line(&self) -> String {
        let len = self.effective_len();
        let mut line = String::with_capacity(
            self.ptype.len() + self.fields[..len].iter().map(String::len).sum::<usize>() + len * 2,
        );
        push_token(&mut line, &self.ptype);
        for field in &self.fields[..len] {
            line.push_str(LINE_SEPARATOR);
            push_token(&mut line, field);
        }
        line
    }
}

impl std::fmt::Display for RuleRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_line())
    }
}

fn needs_quoting(token: &str) -> bool {
    token.starts_with(char::is_whitespace) || token.contains([',', '"', '\n', '\r'])
}

fn push_token(line: &mut String, token: &str) {
    if needs_quoting(token) {
        line.push('"');
        line.push_str(&token.replace('"', "\"\""));
        line.push('"');
    } else {
        line.push_str(token);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn record(ptype: &str, rule: &[&str]) -> RuleRecord {
        RuleRecord::from_rule(ptype, rule).unwrap()
    }

    #[test]
    fn short_tuple_leaves_tail_empty() {
        let rec = record("p", &["alice", "data1", "read"]);
        assert_eq!(rec.ptype(), "p");
        assert_eq!(rec.fields()[2], "read");
        assert!(rec.fields()[3..].iter().all(String::is_empty));
        assert_eq!(rec.effective_len(), 3);
    }

    #[test]
    fn seven_fields_rejected() {
        let err = RuleRecord::from_rule("p", &["1", "2", "3", "4", "5", "6", "7"]).unwrap_err();
        assert!(matches!(err, StoreError::RuleTooLong { len: 7, .. }));
    }

    #[test]
    fn six_fields_accepted() {
        let rec = record("p", &["1", "2", "3", "4", "5", "6"]);
        assert_eq!(rec.to_line(), "p, 1, 2, 3, 4, 5, 6");
    }

    #[test]
    fn line_keeps_interior_empties() {
        assert_eq!(record("p", &["alice", "", "read"]).to_line(), "p, alice, , read");
    }

    #[test]
    fn line_trims_empty_tail() {
        assert_eq!(record("p", &["bob", "data1", ""]).to_line(), "p, bob, data1");
        assert_eq!(record("p", &["charlie", "", ""]).to_line(), "p, charlie");
    }

    #[test]
    fn all_empty_emits_rule_type_only() {
        assert_eq!(record("g", &[]).to_line(), "g");
        assert_eq!(record("g", &["", ""]).to_line(), "g");
    }

    #[test]
    fn tuple_includes_rule_type_and_interior_empties() {
        let rec = record("p", &["alice", "", "read", ""]);
        assert_eq!(rec.to_tuple(), ["p", "alice", "", "read"]);
        assert_eq!(rec.rule(), ["alice", "", "read"]);
    }

    #[test]
    fn tuple_without_rule_type() {
        let rec = record("", &["x"]);
        assert_eq!(rec.to_tuple(), ["x"]);
    }

    #[test]
    fn awkward_tokens_are_quoted() {
        let rec = record("p", &["a,b", "say \"hi\"", " lead", "trail "]);
        assert_eq!(rec.to_line(), "p, \"a,b\", \"say \"\"hi\"\"\", \" lead\", trail ");
    }

    #[test]
    fn trailing_empty_shares_identity_with_shorter_rule() {
        assert_eq!(record("p", &["bob", "data1", ""]).id(), record("p", &["bob", "data1"]).id());
        assert_ne!(record("p", &["alice", "", "read"]).id(), record("p", &["alice", "read"]).id());
    }

    #[test]
    fn display_matches_line() {
        let rec = record("g", &["alice", "admin"]);
        assert_eq!(rec.to_string(), rec.to_line());
    }
}
