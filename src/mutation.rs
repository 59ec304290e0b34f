//! Identifier scrambling and the per-case memoized mutation map.

use std::collections::HashSet;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use indexmap::IndexMap;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::warn;

use crate::constants::mutation::{
    MIN_PERMUTABLE_SEGMENT, MUTATION_RETRY_LIMIT, SEGMENT_DELIMITER,
};
use crate::types::Identifier;

/// Scramble an identifier by permuting the characters of each `.`-separated segment.
///
/// Segment count and each segment's character multiset are preserved; segments
/// shorter than two characters are returned unchanged. This is the raw,
/// non-memoized function: calling it twice on the same input generally yields
/// two different outputs. Use [`MutationMap`] wherever an identifier must stay
/// consistent across files.
pub fn scramble_identifier<R: Rng + ?Sized>(identifier: &str, rng: &mut R) -> Identifier {
    let mut out = String::with_capacity(identifier.len());
    for (idx, segment) in identifier.split(SEGMENT_DELIMITER).enumerate() {
        if idx > 0 {
            out.push(SEGMENT_DELIMITER);
        }
        let mut chars: Vec<char> = segment.chars().collect();
        if chars.len() >= MIN_PERMUTABLE_SEGMENT {
            chars.shuffle(rng);
        }
        out.extend(chars);
    }
    out
}

/// Derive the seed of a case folder's mutation map from the run seed.
///
/// Stable for a given toolchain, so replaying a run seed reproduces every case.
pub fn case_seed(run_seed: u64, case: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    run_seed.hash(&mut hasher);
    case.hash(&mut hasher);
    hasher.finish()
}

/// True if no segment of `identifier` can be permuted.
pub fn is_unscramblable(identifier: &str) -> bool {
    identifier
        .split(SEGMENT_DELIMITER)
        .all(|segment| segment.chars().count() < MIN_PERMUTABLE_SEGMENT)
}

/// Memoized original -> mutated identifier mapping for one case folder pass.
///
/// The first request for an identifier draws a permutation from the map's own
/// RNG; every later request returns the same value. Insertion order is kept so
/// a seeded map built from the same identifier sequence is reproducible.
#[derive(Debug)]
pub struct MutationMap {
    rng: StdRng,
    forward: IndexMap<Identifier, Identifier>,
    assigned: HashSet<Identifier>,
}

impl MutationMap {
    /// Create an empty map drawing permutations from a seeded RNG.
    pub fn new(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    /// Create an empty map drawing permutations from `rng`.
    pub fn with_rng(rng: StdRng) -> Self {
        Self {
            rng,
            forward: IndexMap::new(),
            assigned: HashSet::new(),
        }
    }

    /// Build a map covering every identifier in `identifiers`, in iteration order.
    pub fn build<I, S>(seed: u64, identifiers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut map = Self::new(seed);
        for identifier in identifiers {
            map.mutate(identifier.as_ref());
        }
        map
    }

    /// Return the mutated value for `original`, drawing one on first use.
    pub fn mutate(&mut self, original: &str) -> &str {
        if !self.forward.contains_key(original) {
            let mutated = self.draw_unique(original);
            self.assigned.insert(mutated.clone());
            self.forward.insert(original.to_string(), mutated);
        }
        self.forward
            .get(original)
            .map(String::as_str)
            .unwrap_or_default()
    }

    /// Look up a previously mutated identifier.
    pub fn get(&self, original: &str) -> Option<&str> {
        self.forward.get(original).map(String::as_str)
    }

    /// Number of distinct identifiers mapped.
    pub fn len(&self) -> usize {
        self.forward.len()
    }

    /// True when no identifier has been mapped yet.
    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    /// Iterate `(original, mutated)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.forward
            .iter()
            .map(|(original, mutated)| (original.as_str(), mutated.as_str()))
    }

    fn draw_unique(&mut self, original: &str) -> Identifier {
        let mut candidate = scramble_identifier(original, &mut self.rng);
        if is_unscramblable(original) {
            return candidate;
        }
        let mut attempts = 1;
        while self.assigned.contains(&candidate) && attempts < MUTATION_RETRY_LIMIT {
            candidate = scramble_identifier(original, &mut self.rng);
            attempts += 1;
        }
        if self.assigned.contains(&candidate) {
            warn!(
                identifier = %original,
                mutated = %candidate,
                attempts,
                "mutated identifier collides with another mapping"
            );
        }
        candidate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_seeds_differ_per_case_and_repeat_per_input() {
        let a = case_seed(7, "case_a/ct");
        assert_ne!(a, case_seed(7, "case_b/ct"));
        assert_ne!(a, case_seed(8, "case_a/ct"));
        assert_eq!(a, case_seed(7, "case_a/ct"));
    }

    fn sorted_chars(segment: &str) -> Vec<char> {
        let mut chars: Vec<char> = segment.chars().collect();
        chars.sort_unstable();
        chars
    }

    #[test]
    fn scramble_preserves_segments_and_multisets() {
        let mut rng = StdRng::from_seed([3_u8; 32]);
        let inputs = [
            "1.3.6.1.4.1.14519.5.2.1.6279.6001.298806137288633453246975630178",
            "2.25.31415926535897932384626",
            "..12..",
            "abc",
            "",
        ];
        for input in inputs {
            let mutated = scramble_identifier(input, &mut rng);
            let before: Vec<&str> = input.split('.').collect();
            let after: Vec<&str> = mutated.split('.').collect();
            assert_eq!(before.len(), after.len(), "segment count for {input}");
            for (left, right) in before.iter().zip(after.iter()) {
                assert_eq!(sorted_chars(left), sorted_chars(right));
            }
        }
    }

    #[test]
    fn short_segment_identifiers_are_unchanged() {
        let mut rng = StdRng::from_seed([9_u8; 32]);
        for input in ["1.2.3.4", "7", "", "a.b..c"] {
            assert!(is_unscramblable(input));
            assert_eq!(scramble_identifier(input, &mut rng), input);
        }
        assert!(!is_unscramblable("1.23"));
    }

    #[test]
    fn long_segments_are_eventually_permuted() {
        let mut rng = StdRng::from_seed([1_u8; 32]);
        let original = "1.2.840.113619.2.55.3.604688119";
        let changed = (0..16).any(|_| scramble_identifier(original, &mut rng) != original);
        assert!(changed);
    }

    #[test]
    fn map_memoizes_each_identifier() {
        let mut map = MutationMap::new(11);
        let first = map.mutate("1.2.840.10008.123456789").to_string();
        let second = map.mutate("1.2.840.10008.123456789").to_string();
        assert_eq!(first, second);
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("1.2.840.10008.123456789"), Some(first.as_str()));
        assert_eq!(map.get("unknown"), None);
    }

    #[test]
    fn seeded_maps_reproduce_for_the_same_order() {
        let ids = ["1.22.333.4444", "9.88.777.6666", "1.22.333.4444"];
        let left = MutationMap::build(42, ids);
        let right = MutationMap::build(42, ids);
        let left_pairs: Vec<_> = left.iter().collect();
        let right_pairs: Vec<_> = right.iter().collect();
        assert_eq!(left_pairs, right_pairs);
        assert_eq!(left.len(), 2);
    }

    #[test]
    fn distinct_originals_avoid_shared_mutations_when_possible() {
        let ids = ["12.345", "21.345", "12.354", "21.354"];
        let map = MutationMap::build(5, ids);
        let mutated: HashSet<&str> = map.iter().map(|(_, mutated)| mutated).collect();
        assert_eq!(mutated.len(), ids.len());
    }
}
