//! Term-to-shard routing.
//!
//! A [`ShardKeyFunction`] maps every term to the identifier of the shard that
//! stores it. Both the build pipeline and the query engine route through the
//! same function, so it must be total and stable for the lifetime of an index.

use std::fmt::Debug;

/// Bucket for empty terms and terms starting with punctuation or control characters.
pub const OTHER_SHARD: &str = "other";

/// Bucket for non-alphanumeric terms whose first character sorts after `'z'`.
pub const OTHER2_SHARD: &str = "other2";

/// Deterministic mapping from a term to a shard identifier.
pub trait ShardKeyFunction: Send + Sync + Debug {
    /// Return the shard identifier for `term`. Defined for every input.
    fn shard_of(&self, term: &str) -> String;

    /// Number of leading characters that fully determine the shard id.
    ///
    /// The merge step only recomputes the shard when this prefix changes.
    /// `None` means the shard must be recomputed for every new prefix.
    fn routing_prefix_len(&self) -> Option<usize> {
        None
    }

    /// Sort shard identifiers into vocabulary scan order.
    fn order_shards(&self, shard_ids: &mut Vec<String>) {
        shard_ids.sort();
        shard_ids.dedup();
    }
}

/// Routes on the first character of the term.
///
/// Alphanumeric first characters give their lowercase form, characters after
/// `'z'` give [`OTHER2_SHARD`] and everything else gives [`OTHER_SHARD`].
#[derive(Debug, Clone, Copy, Default)]
pub struct LeadingCharShardKey;

impl LeadingCharShardKey {
    pub fn new() -> Self {
        LeadingCharShardKey
    }

    fn rank(shard_id: &str) -> u8 {
        match shard_id {
            OTHER_SHARD => 0,
            OTHER2_SHARD => 2,
            _ => 1,
        }
    }
}

impl ShardKeyFunction for LeadingCharShardKey {
    fn shard_of(&self, term: &str) -> String {
        match term.chars().next() {
            None => OTHER_SHARD.to_string(),
            Some(c) if c.is_alphanumeric() => c.to_lowercase().collect(),
            Some(c) if c > 'z' => OTHER2_SHARD.to_string(),
            Some(_) => OTHER_SHARD.to_string(),
        }
    }

    fn routing_prefix_len(&self) -> Option<usize> {
        Some(1)
    }

    fn order_shards(&self, shard_ids: &mut Vec<String>) {
        shard_ids.sort_by(|a, b| {
            Self::rank(a)
                .cmp(&Self::rank(b))
                .then_with(|| a.as_bytes().cmp(b.as_bytes()))
        });
        shard_ids.dedup();
    }
}

/// Routes on the first two alphanumeric characters of the term.
///
/// Digits keep a single-character bucket; a lone letter is padded with `0`;
/// non-alphanumeric characters in second position are stripped until an
/// alphanumeric one is found.
#[derive(Debug, Clone, Copy, Default)]
pub struct LeadingPairShardKey;

impl LeadingPairShardKey {
    pub fn new() -> Self {
        LeadingPairShardKey
    }
}

impl ShardKeyFunction for LeadingPairShardKey {
    fn shard_of(&self, term: &str) -> String {
        let mut chars = term.chars();
        let first = match chars.next() {
            None => return OTHER_SHARD.to_string(),
            Some(c) => c,
        };

        if first.is_numeric() {
            return first.to_string();
        }
        if !first.is_alphabetic() {
            return OTHER_SHARD.to_string();
        }

        let mut shard: String = first.to_lowercase().collect();
        match chars.find(|c| c.is_alphanumeric()) {
            Some(second) => shard.extend(second.to_lowercase()),
            None => shard.push('0'),
        }
        shard
    }

    fn order_shards(&self, shard_ids: &mut Vec<String>) {
        shard_ids.sort_by(|a, b| {
            let rank = |s: &str| u8::from(s != OTHER_SHARD);
            rank(a)
                .cmp(&rank(b))
                .then_with(|| a.as_bytes().cmp(b.as_bytes()))
        });
        shard_ids.dedup();
    }
}
