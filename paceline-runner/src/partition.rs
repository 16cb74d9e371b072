// Copyright (c) The paceline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Splitting a run across shards.
//!
//! A shard specification `M/N` selects the `M`-th of `N` contiguous,
//! near-equal count ranges over the ordered test sequence. Filtering operates
//! on whole groups: a group belongs to the shard whose range contains its
//! first test, so groups are never split even when they straddle a range
//! boundary.

use crate::{errors::ShardSpecParseError, groups::TestGroup};
use std::{fmt, str::FromStr};

/// A shard specification: which slice of the run this invocation executes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShardSpec {
    current: usize,
    total: usize,
}

impl ShardSpec {
    /// Creates a shard specification, validating `1 <= current <= total`.
    pub fn new(current: usize, total: usize) -> Result<Self, ShardSpecParseError> {
        if total == 0 {
            return Err(ShardSpecParseError::new(
                "M/N",
                "total shards must be at least 1",
            ));
        }
        if current == 0 || current > total {
            return Err(ShardSpecParseError::new(
                "M/N",
                format!("current shard must be between 1 and {total} inclusive"),
            ));
        }
        Ok(Self { current, total })
    }

    /// The 1-based index of this shard.
    pub fn current(&self) -> usize {
        self.current
    }

    /// Total number of shards.
    pub fn total(&self) -> usize {
        self.total
    }

    /// The half-open range of test positions this shard covers, given the
    /// total number of tests.
    ///
    /// Every shard receives `total_tests / total` positions, and the first
    /// `total_tests % total` shards receive one more each, so the ranges
    /// tile `0..total_tests` exactly.
    fn count_range(&self, total_tests: usize) -> std::ops::Range<usize> {
        let base = total_tests / self.total;
        let extra = total_tests - base * self.total;
        let current = self.current - 1;
        let from = base * current + extra.min(current);
        let to = from + base + usize::from(current < extra);
        from..to
    }
}

impl FromStr for ShardSpec {
    type Err = ShardSpecParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((current, total)) = s.split_once('/') else {
            return Err(ShardSpecParseError::new(
                "M/N",
                "expected two integers separated by '/'",
            ));
        };
        let current: usize = current
            .parse()
            .map_err(|err| ShardSpecParseError::new("M/N", format!("error parsing M: {err}")))?;
        let total: usize = total
            .parse()
            .map_err(|err| ShardSpecParseError::new("M/N", format!("error parsing N: {err}")))?;
        Self::new(current, total)
    }
}

impl fmt::Display for ShardSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.current, self.total)
    }
}

/// Restricts an ordered group sequence to the given shard, in place.
///
/// Membership is decided by the position of each group's first test in the
/// cumulative test count, so a boundary-straddling group lands wholly in the
/// shard containing its first test. For an empty sequence every shard
/// retains nothing.
pub fn filter_for_shard(groups: &mut Vec<TestGroup>, shard: ShardSpec) {
    let total_tests: usize = groups.iter().map(TestGroup::test_count).sum();
    let range = shard.count_range(total_tests);
    let mut position = 0;
    groups.retain(|group| {
        let starts_at = position;
        position += group.test_count();
        range.contains(&starts_at)
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{SourceLocation, TestCase};
    use pretty_assertions::assert_eq;

    #[test]
    fn shard_spec_from_str() {
        let successes = vec![
            ("1/1", (1, 1)),
            ("1/2", (1, 2)),
            ("2/2", (2, 2)),
            ("3/10", (3, 10)),
        ];

        let failures = vec!["", "1", "1/", "/2", "0/2", "3/2", "1/0", "a/b", "1/2/3", "-1/2"];

        for (input, (current, total)) in successes {
            let spec = ShardSpec::from_str(input)
                .unwrap_or_else(|err| panic!("expected input '{input}' to succeed, failed with: {err}"));
            assert_eq!((spec.current(), spec.total()), (current, total));
        }

        for input in failures {
            ShardSpec::from_str(input).expect_err(&format!("expected input '{input}' to fail"));
        }
    }

    #[test]
    fn shard_spec_display_round_trips() {
        let spec = ShardSpec::new(2, 5).unwrap();
        assert_eq!(spec.to_string(), "2/5");
        assert_eq!(ShardSpec::from_str("2/5").unwrap(), spec);
    }

    fn group_of(ids: &[&str]) -> TestGroup {
        let tests: Vec<_> = ids
            .iter()
            .map(|id| TestCase::new(*id, vec![(*id).to_owned()], SourceLocation::new("a.test.ts", 1, 1)))
            .collect();
        TestGroup {
            fingerprint: tests[0].fingerprint.clone(),
            source_unit: tests[0].source_unit.clone(),
            repeat_index: 0,
            project: tests[0].project.clone(),
            kind: crate::groups::GroupKind::General,
            tests,
        }
    }

    fn first_ids(groups: &[TestGroup]) -> Vec<&str> {
        groups.iter().map(|g| g.first_test_id().as_str()).collect()
    }

    #[test]
    fn ten_tests_over_three_shards() {
        // Five groups of two: ranges are [0, 4), [4, 7), [7, 10).
        let make = || {
            vec![
                group_of(&["t0", "t1"]),
                group_of(&["t2", "t3"]),
                group_of(&["t4", "t5"]),
                group_of(&["t6", "t7"]),
                group_of(&["t8", "t9"]),
            ]
        };

        let mut shard1 = make();
        filter_for_shard(&mut shard1, ShardSpec::new(1, 3).unwrap());
        assert_eq!(first_ids(&shard1), ["t0", "t2"]);

        // The group starting at position 6 straddles the [4, 7) boundary and
        // lands wholly in shard 2.
        let mut shard2 = make();
        filter_for_shard(&mut shard2, ShardSpec::new(2, 3).unwrap());
        assert_eq!(first_ids(&shard2), ["t4", "t6"]);

        let mut shard3 = make();
        filter_for_shard(&mut shard3, ShardSpec::new(3, 3).unwrap());
        assert_eq!(first_ids(&shard3), ["t8"]);

        // Every group lands in exactly one shard.
        let total: usize = [&shard1, &shard2, &shard3]
            .iter()
            .map(|groups| groups.iter().map(TestGroup::test_count).sum::<usize>())
            .sum();
        assert_eq!(total, 10);
    }

    #[test]
    fn count_ranges_tile_the_run() {
        for total_tests in 0..40 {
            for shards in 1..7 {
                let mut positions = Vec::new();
                for current in 1..=shards {
                    let spec = ShardSpec::new(current, shards).unwrap();
                    positions.extend(spec.count_range(total_tests));
                }
                let expected: Vec<_> = (0..total_tests).collect();
                assert_eq!(
                    positions, expected,
                    "ranges must tile 0..{total_tests} across {shards} shards"
                );
            }
        }
    }

    #[test]
    fn single_shard_keeps_everything() {
        let mut groups = vec![group_of(&["t0"]), group_of(&["t1", "t2"])];
        filter_for_shard(&mut groups, ShardSpec::new(1, 1).unwrap());
        assert_eq!(first_ids(&groups), ["t0", "t1"]);
    }

    #[test]
    fn more_shards_than_tests_leaves_later_shards_empty() {
        let make = || vec![group_of(&["t0"])];

        let mut shard1 = make();
        filter_for_shard(&mut shard1, ShardSpec::new(1, 3).unwrap());
        assert_eq!(first_ids(&shard1), ["t0"]);

        let mut shard2 = make();
        filter_for_shard(&mut shard2, ShardSpec::new(2, 3).unwrap());
        assert!(shard2.is_empty());
    }

    #[test]
    fn empty_sequence_stays_empty() {
        let mut groups = Vec::new();
        filter_for_shard(&mut groups, ShardSpec::new(1, 2).unwrap());
        assert!(groups.is_empty());
    }
}
