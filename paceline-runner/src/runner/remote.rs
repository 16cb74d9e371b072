// Copyright (c) The paceline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Remote-coordinated dispatch: jobs come from the coordinator, one test id
//! at a time, and results go back over the same channel.

use super::internal_events::{GroupOutcome, Job};
use crate::{
    coordinator::CoordinatorConnection,
    errors::CoordinatorError,
    groups::{GroupKind, TestGroup},
    plan::{ProjectId, TestCaseId, TestStatus},
};
use indexmap::IndexMap;
use paceline_protocol::{CoordinatorMessage, RunnerMessage, TestResultMessage, WireStatus};
use std::{
    collections::{HashSet, VecDeque},
    fmt::Write,
};
use tracing::warn;

/// A job source driven by coordinator `test_case` messages.
///
/// The coordinator dictates order; this source resolves each requested id to
/// its whole scheduled group, front-loads a project's setup groups the first
/// time one of its tests is requested, and reports one wire result per
/// ordinary group.
pub(super) struct RemoteJobSource {
    conn: CoordinatorConnection,

    /// Ordinary groups not yet requested, keyed by first-test id.
    queue: IndexMap<TestCaseId, TestGroup>,

    /// Setup groups not yet queued, per project, in declared order.
    setup_pool: IndexMap<ProjectId, Vec<TestGroup>>,

    /// Projects whose setup failed. Their later groups run in skip-all mode.
    poisoned: HashSet<ProjectId>,

    /// Groups resolved but not yet handed to the dispatcher.
    pending: VecDeque<PendingJob>,
}

struct PendingJob {
    group: TestGroup,
    is_setup: bool,
}

impl RemoteJobSource {
    pub(super) fn new(conn: CoordinatorConnection, groups: Vec<TestGroup>) -> Self {
        let mut queue = IndexMap::new();
        let mut setup_pool: IndexMap<ProjectId, Vec<TestGroup>> = IndexMap::new();
        for group in groups {
            if group.kind == GroupKind::Setup {
                setup_pool
                    .entry(group.project.clone())
                    .or_default()
                    .push(group);
            } else {
                queue.insert(group.first_test_id().clone(), group);
            }
        }
        Self {
            conn,
            queue,
            setup_pool,
            poisoned: HashSet::new(),
            pending: VecDeque::new(),
        }
    }

    pub(super) async fn next_job(&mut self) -> Result<Option<Job>, CoordinatorError> {
        loop {
            if let Some(pending) = self.pending.pop_front() {
                // Poisoning is decided at dispatch time, so a setup failure
                // also covers groups already queued behind it.
                let poisoned = self.poisoned.contains(&pending.group.project);
                let halt_on_failure = !poisoned
                    && (pending.is_setup || pending.group.kind == GroupKind::Serial);
                return Ok(Some(Job {
                    skip_all: poisoned,
                    halt_on_failure,
                    report_result: !pending.is_setup,
                    group: pending.group,
                }));
            }

            match self.conn.next_message().await? {
                None => return Ok(None),
                Some(CoordinatorMessage::TestCase(request)) => {
                    let id = TestCaseId::new(&request.id);
                    let Some(group) = self.queue.shift_remove(&id) else {
                        warn!(id = %id, "coordinator requested an unknown test id, ignoring");
                        continue;
                    };
                    if let Some(setups) = self.setup_pool.shift_remove(&group.project) {
                        self.pending.extend(
                            setups
                                .into_iter()
                                .map(|group| PendingJob { group, is_setup: true }),
                        );
                    }
                    self.pending.push_back(PendingJob { group, is_setup: false });
                }
                Some(CoordinatorMessage::Init(_)) => {
                    warn!("coordinator sent a second init, ignoring");
                }
            }
        }
    }

    pub(super) async fn group_finished(
        &mut self,
        outcome: &GroupOutcome,
    ) -> Result<(), CoordinatorError> {
        if outcome.group.kind == GroupKind::Setup && should_poison(&outcome.group) {
            warn!(
                project = %outcome.group.project,
                "project setup failed, skipping the project's remaining tests",
            );
            self.poisoned.insert(outcome.group.project.clone());
        }
        if outcome.report_result {
            let message = group_result_message(&outcome.group);
            self.conn.send(&RunnerMessage::TestResult(message)).await?;
        }
        Ok(())
    }

    pub(super) fn drain_remaining(&mut self) -> Vec<TestGroup> {
        let mut remaining: Vec<TestGroup> = self
            .pending
            .drain(..)
            .map(|pending| pending.group)
            .collect();
        remaining.extend(self.queue.drain(..).map(|(_, group)| group));
        remaining.extend(self.setup_pool.drain(..).flat_map(|(_, setups)| setups));
        remaining
    }
}

/// Whether a finished setup group poisons its project: any member result
/// other than passed or skipped counts.
fn should_poison(group: &TestGroup) -> bool {
    group.tests.iter().any(|test| {
        test.latest_result().is_some_and(|result| {
            !matches!(result.status, TestStatus::Passed | TestStatus::Skipped)
        })
    })
}

/// Builds the wire result for a finished group. The coordinator dispatched a
/// single id, so it gets a single result, taken from the group's first test.
fn group_result_message(group: &TestGroup) -> TestResultMessage {
    let first = group.tests.first().expect("a test group is never empty");
    let result = first
        .latest_result()
        .expect("finished groups record a result for every test");
    let mut output = String::new();
    for failure in &result.failures {
        let _ = write!(output, "\n{}", failure.message);
    }
    TestResultMessage {
        status: wire_status(result.status),
        id: first.id.to_string(),
        display_name: first.display_name(),
        output,
        runtime_ns: runtime_ns(result.duration_ms),
        meta: serde_json::json!({}),
    }
}

fn wire_status(status: TestStatus) -> WireStatus {
    match status {
        TestStatus::Passed => WireStatus::Success,
        TestStatus::Failed => WireStatus::Failure,
        TestStatus::TimedOut => WireStatus::TimedOut,
        TestStatus::Skipped => WireStatus::Skipped,
        TestStatus::Interrupted => WireStatus::Error,
    }
}

/// Milliseconds to whole nanoseconds, truncating fractional nanoseconds.
fn runtime_ns(duration_ms: f64) -> u64 {
    (duration_ms * 1_000_000.0).trunc() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{SourceLocation, SourceUnit, TestCase, TestFailure, TestResult, WorkerFingerprint};
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn finished_case(id: &str, result: TestResult) -> TestCase {
        let mut case = TestCase::new(
            id,
            vec!["suite".to_owned(), id.to_owned()],
            SourceLocation::new("a.test.ts", 1, 1),
        );
        case.push_result(result);
        case
    }

    fn group_of(tests: Vec<TestCase>) -> TestGroup {
        TestGroup {
            fingerprint: WorkerFingerprint::new(""),
            source_unit: SourceUnit::new("a.test.ts"),
            repeat_index: 0,
            project: ProjectId::new("default"),
            kind: GroupKind::General,
            tests,
        }
    }

    fn result_with(status: TestStatus, duration_ms: f64, failures: Vec<TestFailure>) -> TestResult {
        TestResult {
            status,
            duration_ms,
            failures,
            worker_slot: Some(0),
        }
    }

    #[test_case(TestStatus::Passed, WireStatus::Success)]
    #[test_case(TestStatus::Failed, WireStatus::Failure)]
    #[test_case(TestStatus::TimedOut, WireStatus::TimedOut)]
    #[test_case(TestStatus::Skipped, WireStatus::Skipped)]
    #[test_case(TestStatus::Interrupted, WireStatus::Error)]
    fn status_maps_onto_the_wire_vocabulary(status: TestStatus, expected: WireStatus) {
        assert_eq!(wire_status(status), expected);
    }

    #[test_case(1.5, 1_500_000)]
    #[test_case(1.9999, 1_999_900)]
    #[test_case(0.0, 0)]
    #[test_case(0.0004, 400)]
    #[test_case(12.25, 12_250_000)]
    fn runtime_truncates_to_whole_nanoseconds(duration_ms: f64, expected: u64) {
        assert_eq!(runtime_ns(duration_ms), expected);
    }

    #[test]
    fn result_message_concatenates_prefixed_failures() {
        let result = result_with(
            TestStatus::Failed,
            3.0,
            vec![
                TestFailure::new("expected 2, got 3"),
                TestFailure::new("teardown raced"),
            ],
        );
        let group = group_of(vec![finished_case("t1", result)]);

        let message = group_result_message(&group);
        assert_eq!(message.status, WireStatus::Failure);
        assert_eq!(message.id, "t1");
        assert_eq!(message.display_name, "suite › t1");
        assert_eq!(message.output, "\nexpected 2, got 3\nteardown raced");
        assert_eq!(message.runtime_ns, 3_000_000);
        assert_eq!(message.meta, serde_json::json!({}));
    }

    #[test]
    fn result_message_reflects_the_latest_result() {
        let mut case = finished_case(
            "t1",
            result_with(TestStatus::Failed, 5.0, vec![TestFailure::new("flaked")]),
        );
        case.push_result(result_with(TestStatus::Passed, 2.0, Vec::new()));
        let group = group_of(vec![case]);

        let message = group_result_message(&group);
        assert_eq!(message.status, WireStatus::Success);
        assert_eq!(message.output, "");
        assert_eq!(message.runtime_ns, 2_000_000);
    }

    #[test]
    fn setup_poisons_on_any_non_pass() {
        let passed = group_of(vec![finished_case(
            "s1",
            result_with(TestStatus::Passed, 1.0, Vec::new()),
        )]);
        assert!(!should_poison(&passed));

        let skipped = group_of(vec![finished_case(
            "s1",
            result_with(TestStatus::Skipped, 0.0, Vec::new()),
        )]);
        assert!(!should_poison(&skipped));

        let failed = group_of(vec![
            finished_case("s1", result_with(TestStatus::Passed, 1.0, Vec::new())),
            finished_case("s2", result_with(TestStatus::TimedOut, 30.0, Vec::new())),
        ]);
        assert!(should_poison(&failed));
    }
}
