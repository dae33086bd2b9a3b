// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Content fingerprints used as row keys.
use blake3::Hasher;

use crate::record::FIELD_COUNT;

/// 32-byte BLAKE3 fingerprint of a rule's content.
///
/// The `Display` impl renders lowercase hex; that string is what lands in the
/// `id` column.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct RuleId(pub [u8; 32]);

impl RuleId {
    /// View the fingerprint as raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex rendering, 64 characters wide.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Display for RuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Fingerprint a rule: domain prefix `b"rule:"`, then the rule type and all
/// six slots, each framed by its little-endian `u64` byte length.
///
/// Framing means no field content can imitate a boundary, so `("a,b", "")` and
/// `("a", "b,")` never collide. Empty slots are hashed like any other value:
/// a rule with an empty third field and a rule with only two fields hash the
/// same, because they are stored the same.
pub fn rule_id(ptype: &str, fields: &[String; FIELD_COUNT]) -> RuleId {
    let mut hasher = Hasher::new();
    hasher.update(b"rule:");
    frame(&mut hasher, ptype);
    for field in fields {
        frame(&mut hasher, field);
    }
    RuleId(hasher.finalize().into())
}

fn frame(hasher: &mut Hasher, value: &str) {
    hasher.update(&u64::try_from(value.len()).unwrap_or(u64::MAX).to_le_bytes());
    hasher.update(value.as_bytes());
}
