use std::collections::BTreeSet;

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::SplitError;
use crate::split::assignment::{Split, SplitAssignment};

/// Identity of a recording as seen by the assigner.
#[derive(Debug, Clone, PartialEq)]
pub struct Recording {
    pub name: String,
    /// Hex digest of the recording payload.
    pub fingerprint: String,
    pub duration: f64,
    pub num_events: usize,
}

impl Recording {
    pub fn new(name: impl Into<String>, fingerprint: impl Into<String>) -> Self {
        Recording {
            name: name.into(),
            fingerprint: fingerprint.into(),
            duration: 0.0,
            num_events: 0,
        }
    }
}

/// Result of one assignment pass.
#[derive(Debug, Clone)]
pub struct CohortAssignment {
    /// The full store after the pass: previous entries plus the cohort.
    pub assignment: SplitAssignment,
    /// Names newly assigned in this pass, in cohort order.
    pub cohort: Vec<(String, Split)>,
    /// Names skipped because their identity was missing or unusable.
    pub skipped: Vec<String>,
}

impl CohortAssignment {
    pub fn cohort_train(&self) -> usize {
        self.cohort.iter().filter(|(_, s)| *s == Split::Train).count()
    }

    pub fn cohort_test(&self) -> usize {
        self.cohort.len() - self.cohort_train()
    }
}

fn check_ratio(train_ratio: f64) -> Result<(), SplitError> {
    if train_ratio > 0.0 && train_ratio < 1.0 {
        Ok(())
    } else {
        Err(SplitError::InvalidRatio(train_ratio))
    }
}

/// Stable ordering key for a recording name: the leading 128 bits of the
/// SHA-256 digest of the lowercased, trimmed name, read big-endian.
pub fn partition_key(name: &str) -> u128 {
    let cleaned = name.trim().to_lowercase();
    let digest = Sha256::digest(cleaned.as_bytes());
    let mut head = [0u8; 16];
    head.copy_from_slice(&digest[..16]);
    u128::from_be_bytes(head)
}

/// Position of `name` in [0, 1), derived from [`partition_key`].
pub fn partition_value(name: &str) -> f64 {
    // Keep the top 53 bits so the quotient is exact and strictly below 1.
    (partition_key(name) >> 75) as f64 / (1u64 << 53) as f64
}

/// Single-name classifier used to bootstrap or repair a store.
pub fn classify(name: &str, train_ratio: f64) -> Split {
    if partition_value(name) < train_ratio {
        Split::Train
    } else {
        Split::Test
    }
}

/// Number of cohort members that go to train: `floor(n * ratio)`, and never
/// the whole cohort.
pub fn cohort_cutoff(n: usize, train_ratio: f64) -> usize {
    let cutoff = (n as f64 * train_ratio).floor() as usize;
    if n > 0 && cutoff >= n {
        n - 1
    } else {
        cutoff
    }
}

/// Assign every recording not yet present in `existing`.
///
/// Existing entries are carried over untouched. The cohort of new names is
/// sorted by [`partition_key`] (ties broken by name) and sliced at
/// [`cohort_cutoff`], so the result depends only on the set of names.
pub fn assign(
    recordings: &[Recording],
    existing: &SplitAssignment,
    train_ratio: f64,
) -> Result<CohortAssignment, SplitError> {
    check_ratio(train_ratio)?;

    let mut skipped = Vec::new();
    let mut fresh: BTreeSet<&str> = BTreeSet::new();
    for recording in recordings {
        let name = recording.name.as_str();
        if name.trim().is_empty() {
            warn!(fingerprint = %recording.fingerprint, "skipping recording with empty name");
            skipped.push(recording.name.clone());
            continue;
        }
        if recording.fingerprint.trim().is_empty() {
            warn!(recording = name, "skipping recording with missing fingerprint");
            skipped.push(recording.name.clone());
            continue;
        }
        if !existing.contains(name) {
            fresh.insert(name);
        }
    }

    let mut keyed: Vec<(u128, &str)> = fresh.into_iter().map(|n| (partition_key(n), n)).collect();
    keyed.sort_unstable();

    let cutoff = cohort_cutoff(keyed.len(), train_ratio);
    let mut assignment = existing.clone();
    let mut cohort = Vec::with_capacity(keyed.len());
    for (idx, (_, name)) in keyed.into_iter().enumerate() {
        let split = if idx < cutoff { Split::Train } else { Split::Test };
        assignment.insert_new(name, split);
        cohort.push((name.to_string(), split));
    }

    debug!(
        existing = existing.len(),
        cohort = cohort.len(),
        cutoff,
        skipped = skipped.len(),
        "assignment pass complete"
    );

    Ok(CohortAssignment {
        assignment,
        cohort,
        skipped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn recs(names: &[&str]) -> Vec<Recording> {
        names
            .iter()
            .map(|n| Recording::new(*n, format!("h-{n}")))
            .collect()
    }

    #[test]
    fn test_four_names_at_ninety_percent() {
        let recordings = vec![
            Recording::new("a", "h1"),
            Recording::new("b", "h2"),
            Recording::new("c", "h3"),
            Recording::new("d", "h4"),
        ];
        let first = assign(&recordings, &SplitAssignment::new(), 0.9).unwrap();
        assert_eq!(first.assignment.len(), 4);
        assert_eq!(first.assignment.test_count(), 1);
        assert_eq!(first.cohort_train(), 3);

        let mut more = recordings.clone();
        more.push(Recording::new("e", "h5"));
        let second = assign(&more, &first.assignment, 0.9).unwrap();
        for name in ["a", "b", "c", "d"] {
            assert_eq!(second.assignment.get(name), first.assignment.get(name));
        }
        // a one-name cohort always goes to test
        assert_eq!(second.cohort, vec![("e".to_string(), Split::Test)]);
    }

    #[test]
    fn test_input_order_does_not_matter() {
        let forward = recs(&["r1", "r2", "r3", "r4", "r5", "r6", "r7"]);
        let mut backward = forward.clone();
        backward.reverse();

        let a = assign(&forward, &SplitAssignment::new(), 0.7).unwrap();
        let b = assign(&backward, &SplitAssignment::new(), 0.7).unwrap();
        assert_eq!(a.assignment, b.assignment);
        assert_eq!(a.cohort, b.cohort);
    }

    #[test]
    fn test_repeated_pass_is_noop() {
        let recordings = recs(&["x", "y", "z"]);
        let first = assign(&recordings, &SplitAssignment::new(), 0.5).unwrap();
        let second = assign(&recordings, &first.assignment, 0.5).unwrap();
        assert!(second.cohort.is_empty());
        assert_eq!(second.assignment, first.assignment);
    }

    #[test]
    fn test_skips_missing_identity() {
        let recordings = vec![
            Recording::new("ok", "h1"),
            Recording::new("   ", "h2"),
            Recording::new("nofp", ""),
        ];
        let out = assign(&recordings, &SplitAssignment::new(), 0.9).unwrap();
        assert_eq!(out.assignment.len(), 1);
        assert_eq!(out.skipped.len(), 2);
    }

    #[test]
    fn test_duplicate_names_counted_once() {
        let recordings = recs(&["dup", "dup", "other"]);
        let out = assign(&recordings, &SplitAssignment::new(), 0.9).unwrap();
        assert_eq!(out.cohort.len(), 2);
    }

    #[test]
    fn test_rejects_out_of_range_ratio() {
        let recordings = recs(&["a"]);
        assert!(assign(&recordings, &SplitAssignment::new(), 1.0).is_err());
        assert!(assign(&recordings, &SplitAssignment::new(), 0.0).is_err());
    }

    #[test]
    fn test_key_ignores_case_and_whitespace() {
        assert_eq!(partition_key("Rec-01"), partition_key("  rec-01 "));
        assert_ne!(partition_key("rec-01"), partition_key("rec-02"));
    }

    #[test]
    fn test_cutoff() {
        assert_eq!(cohort_cutoff(0, 0.9), 0);
        assert_eq!(cohort_cutoff(1, 0.9), 0);
        assert_eq!(cohort_cutoff(4, 0.9), 3);
        assert_eq!(cohort_cutoff(10, 0.5), 5);
        assert_eq!(cohort_cutoff(3, 0.999_999), 2);
    }

    #[test]
    fn test_classify_agrees_with_cohort_order() {
        // The cohort is ordered by classifier value, so every train name sits
        // below every test name on the [0, 1) line.
        let names: Vec<String> = (0..40).map(|i| format!("rec-{i:03}")).collect();
        let recordings: Vec<Recording> =
            names.iter().map(|n| Recording::new(n.clone(), "h")).collect();
        let out = assign(&recordings, &SplitAssignment::new(), 0.75).unwrap();

        let max_train = out
            .cohort
            .iter()
            .filter(|(_, s)| *s == Split::Train)
            .map(|(n, _)| partition_value(n))
            .fold(f64::MIN, f64::max);
        let min_test = out
            .cohort
            .iter()
            .filter(|(_, s)| *s == Split::Test)
            .map(|(n, _)| partition_value(n))
            .fold(f64::MAX, f64::min);
        assert!(max_train < min_test);
    }

    #[test]
    fn test_classify_test_implies_single_name_cohort_test() {
        let mut train_name = None;
        let mut test_name = None;
        for i in 0..200 {
            let name = format!("single-{i}");
            let from_scratch = assign(
                &[Recording::new(name.clone(), "h")],
                &SplitAssignment::new(),
                0.9,
            )
            .unwrap();
            assert_eq!(from_scratch.assignment.get(&name), Some(Split::Test));
            match classify(&name, 0.9) {
                Split::Test => {
                    assert!(partition_value(&name) >= 0.9);
                    test_name.get_or_insert(name);
                }
                Split::Train => {
                    assert!(partition_value(&name) < 0.9);
                    train_name.get_or_insert(name);
                }
            }
        }

        // two-name cohort: cutoff 1, so the order decides and must match classify
        let (train_name, test_name) = (train_name.unwrap(), test_name.unwrap());
        let out = assign(
            &[
                Recording::new(test_name.clone(), "h"),
                Recording::new(train_name.clone(), "h"),
            ],
            &SplitAssignment::new(),
            0.9,
        )
        .unwrap();
        assert_eq!(out.assignment.get(&train_name), Some(classify(&train_name, 0.9)));
        assert_eq!(out.assignment.get(&test_name), Some(classify(&test_name, 0.9)));
    }

    #[test]
    fn test_classify_threshold_matches_value() {
        for i in 0..100 {
            let name = format!("n{i}");
            let v = partition_value(&name);
            assert!((0.0..1.0).contains(&v));
            assert_eq!(classify(&name, 0.6) == Split::Train, v < 0.6);
        }
    }

    proptest! {
        #[test]
        fn prop_existing_values_never_change(
            first in proptest::collection::btree_set("[a-z]{1,8}", 0..30),
            second in proptest::collection::btree_set("[a-z]{1,8}", 0..30),
            ratio in 0.05f64..0.95,
        ) {
            let first: Vec<Recording> = first.iter().map(|n| Recording::new(n.clone(), "h")).collect();
            let base = assign(&first, &SplitAssignment::new(), ratio).unwrap();

            let mut all = first.clone();
            all.extend(second.iter().map(|n| Recording::new(n.clone(), "h")));
            let next = assign(&all, &base.assignment, ratio).unwrap();

            for (name, split) in base.assignment.iter() {
                prop_assert_eq!(next.assignment.get(name), Some(split));
            }
        }

        #[test]
        fn prop_cohort_fraction_within_one_unit(
            names in proptest::collection::btree_set("[a-z0-9]{1,10}", 1..80),
            ratio in 0.05f64..0.95,
        ) {
            let recordings: Vec<Recording> = names.iter().map(|n| Recording::new(n.clone(), "h")).collect();
            let out = assign(&recordings, &SplitAssignment::new(), ratio).unwrap();
            let n = out.cohort.len() as f64;
            let frac = out.cohort_train() as f64 / n;
            prop_assert!((frac - ratio).abs() <= 1.0 / n + 1e-9);
            prop_assert!(out.cohort_test() >= 1);
        }
    }
}
