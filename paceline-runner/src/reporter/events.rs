// Copyright (c) The paceline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Events emitted during a test run.
//!
//! These are produced by the runner as it executes groups, and consumed by
//! the callback passed to
//! [`TestRunner::execute`](crate::runner::TestRunner::execute). Reporters are
//! expected to be pure observers: no event requires a response.

use crate::{
    partition::ShardSpec,
    plan::{TestCase, TestResult, TestStatus},
};
use chrono::{DateTime, FixedOffset};
use std::time::Duration;
use uuid::Uuid;

/// An event emitted during a test run.
#[derive(Clone, Debug)]
pub struct RunEvent {
    /// The time at which the event was generated.
    pub timestamp: DateTime<FixedOffset>,

    /// The amount of time elapsed since the start of the run.
    pub elapsed: Duration,

    /// The kind of event.
    pub kind: RunEventKind,
}

/// The kind of an event emitted during a test run.
#[derive(Clone, Debug)]
pub enum RunEventKind {
    /// The run started.
    RunStarted {
        /// The unique identifier for this run.
        run_id: Uuid,

        /// Number of tests scheduled to run, after shard filtering.
        test_count: usize,

        /// Number of groups the tests were packed into.
        group_count: usize,

        /// Number of worker slots.
        worker_count: usize,

        /// The shard this run executes, if the run is sharded.
        shard: Option<ShardSpec>,
    },

    /// A test began executing, or was reported as skipped.
    ///
    /// Every test produces exactly one started and one finished event, in
    /// that order, and events for one test never interleave with each other.
    TestStarted {
        /// The test case, as known at start time.
        test: TestCase,

        /// The worker slot the test runs on. `None` when the test is being
        /// reported without reaching a worker.
        worker_slot: Option<usize>,

        /// Number of tests currently running, including this one.
        running: usize,
    },

    /// A test finished, in any terminal status.
    TestFinished {
        /// The test case, including the new result.
        test: TestCase,

        /// The result that was just recorded.
        result: TestResult,

        /// Current statistics for the run.
        current_stats: RunStats,

        /// Number of tests still running.
        running: usize,
    },

    /// A cancellation was requested. No new work is admitted after this
    /// event.
    RunBeginCancel {
        /// The reason the run is being cancelled.
        reason: CancelReason,

        /// Number of tests still running.
        running: usize,
    },

    /// A run-level error occurred. The run winds down with status failed.
    Error {
        /// The error, formatted with its source chain.
        error: String,
    },

    /// The run finished.
    RunFinished {
        /// The unique identifier for this run.
        run_id: Uuid,

        /// The time at which the run started.
        start_time: DateTime<FixedOffset>,

        /// The total amount of time the run took.
        elapsed: Duration,

        /// Statistics for the run.
        stats: RunStats,
    },
}

/// The reason a run is being cancelled.
///
/// Reasons are ordered by severity: a cancellation in progress is only
/// escalated by a strictly more severe reason.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
#[cfg_attr(test, derive(test_strategy::Arbitrary))]
pub enum CancelReason {
    /// The failure budget was exhausted.
    TestFailure,

    /// The coordinator channel was lost mid-run.
    ConnectionLost,

    /// The run-wide timeout expired.
    GlobalTimeout,

    /// A termination signal (on Unix, SIGTERM or SIGHUP) was received.
    Signal,

    /// An interrupt (on Unix, SIGINT) or a programmatic interrupt was
    /// received.
    Interrupt,
}

impl CancelReason {
    pub(crate) fn to_static_str(self) -> &'static str {
        match self {
            CancelReason::TestFailure => "test failure",
            CancelReason::ConnectionLost => "connection lost",
            CancelReason::GlobalTimeout => "global timeout",
            CancelReason::Signal => "signal",
            CancelReason::Interrupt => "interrupt",
        }
    }
}

/// Statistics for a test run.
#[derive(Copy, Clone, Default, Debug, Eq, PartialEq)]
pub struct RunStats {
    /// The total number of tests that were expected to be run at the
    /// beginning. If the run is cancelled, this will be more than
    /// `finished_count` at the end.
    pub initial_run_count: usize,

    /// The total number of tests that finished in any terminal status.
    pub finished_count: usize,

    /// The number of tests that passed.
    pub passed: usize,

    /// The number of tests that failed.
    pub failed: usize,

    /// The number of tests that timed out.
    pub timed_out: usize,

    /// The number of tests that were skipped.
    pub skipped: usize,

    /// The number of tests aborted by cancellation.
    pub interrupted: usize,

    /// The number of worker faults recorded over the run.
    pub worker_faults: usize,

    /// The number of run-level errors recorded over the run.
    pub run_errors: usize,
}

impl RunStats {
    /// Returns true if any test failed, timed out, or was lost to a worker
    /// fault, or a run-level error was recorded.
    pub fn has_failures(&self) -> bool {
        self.failed > 0 || self.timed_out > 0 || self.worker_faults > 0 || self.run_errors > 0
    }

    /// Returns true if any worker fault was recorded.
    pub fn has_worker_faults(&self) -> bool {
        self.worker_faults > 0
    }

    /// Summarizes the run into a final status, given the cancellation state
    /// the run ended with.
    pub fn summarize_final(&self, cancel_reason: Option<CancelReason>) -> RunStatus {
        match cancel_reason {
            Some(CancelReason::Interrupt | CancelReason::Signal) => RunStatus::Interrupted,
            Some(CancelReason::GlobalTimeout) => RunStatus::TimedOut,
            Some(CancelReason::TestFailure | CancelReason::ConnectionLost) | None => {
                if self.has_failures() {
                    RunStatus::Failed
                } else {
                    RunStatus::Passed
                }
            }
        }
    }

    pub(crate) fn on_test_finished(&mut self, result: &TestResult) {
        self.finished_count += 1;
        match result.status {
            TestStatus::Passed => self.passed += 1,
            TestStatus::Failed => self.failed += 1,
            TestStatus::TimedOut => self.timed_out += 1,
            TestStatus::Skipped => self.skipped += 1,
            TestStatus::Interrupted => self.interrupted += 1,
        }
    }
}

/// Overall status of a completed run.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RunStatus {
    /// Every test that ran passed or was skipped.
    Passed,

    /// At least one test failed, a worker fault occurred, or a run-level
    /// error was recorded.
    Failed,

    /// The run-wide timeout expired.
    TimedOut,

    /// The run was interrupted.
    Interrupted,
}

impl RunStatus {
    /// Returns true for [`RunStatus::Passed`].
    pub fn is_success(self) -> bool {
        matches!(self, RunStatus::Passed)
    }

    /// The process exit code conventionally associated with this status.
    pub fn exit_code(self) -> i32 {
        match self {
            RunStatus::Passed => RunExitCode::SUCCESS,
            RunStatus::Failed => RunExitCode::TEST_RUN_FAILED,
            RunStatus::TimedOut => RunExitCode::GLOBAL_TIMEOUT,
            RunStatus::Interrupted => RunExitCode::INTERRUPTED,
        }
    }
}

/// Exit codes returned for a completed run.
pub enum RunExitCode {}

impl RunExitCode {
    /// The run completed with every executed test passing or skipped.
    pub const SUCCESS: i32 = 0;

    /// At least one test failed, or a run-level error occurred.
    pub const TEST_RUN_FAILED: i32 = 100;

    /// The run-wide timeout expired.
    pub const GLOBAL_TIMEOUT: i32 = 124;

    /// The run was interrupted by the operator.
    pub const INTERRUPTED: i32 = 130;
}

/// Summary of a completed run, returned by
/// [`TestRunner::execute`](crate::runner::TestRunner::execute).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RunSummary {
    /// The unique identifier for this run.
    pub run_id: Uuid,

    /// Final statistics.
    pub stats: RunStats,

    /// Overall status.
    pub status: RunStatus,
}

impl RunSummary {
    /// The process exit code conventionally associated with this run's
    /// status.
    pub fn exit_code(&self) -> i32 {
        self.status.exit_code()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn cancel_reasons_order_by_severity() {
        assert!(CancelReason::TestFailure < CancelReason::ConnectionLost);
        assert!(CancelReason::ConnectionLost < CancelReason::GlobalTimeout);
        assert!(CancelReason::GlobalTimeout < CancelReason::Signal);
        assert!(CancelReason::Signal < CancelReason::Interrupt);
    }

    #[test_case(None, false => RunStatus::Passed; "clean run passes")]
    #[test_case(None, true => RunStatus::Failed; "failures without cancel fail")]
    #[test_case(Some(CancelReason::TestFailure), true => RunStatus::Failed; "failure budget fails")]
    #[test_case(Some(CancelReason::ConnectionLost), true => RunStatus::Failed; "connection loss fails")]
    #[test_case(Some(CancelReason::GlobalTimeout), false => RunStatus::TimedOut; "timeout wins over pass")]
    #[test_case(Some(CancelReason::GlobalTimeout), true => RunStatus::TimedOut; "timeout wins over failure")]
    #[test_case(Some(CancelReason::Signal), true => RunStatus::Interrupted; "signal interrupts")]
    #[test_case(Some(CancelReason::Interrupt), true => RunStatus::Interrupted; "interrupt wins over everything")]
    fn summarize_final(cancel: Option<CancelReason>, with_failure: bool) -> RunStatus {
        let stats = RunStats {
            initial_run_count: 3,
            finished_count: 3,
            passed: if with_failure { 2 } else { 3 },
            failed: usize::from(with_failure),
            ..RunStats::default()
        };
        stats.summarize_final(cancel)
    }

    #[test]
    fn stats_account_for_every_terminal_status() {
        let mut stats = RunStats {
            initial_run_count: 5,
            ..RunStats::default()
        };
        for status in [
            TestStatus::Passed,
            TestStatus::Failed,
            TestStatus::TimedOut,
            TestStatus::Skipped,
            TestStatus::Interrupted,
        ] {
            stats.on_test_finished(&TestResult {
                status,
                duration_ms: 1.0,
                failures: Vec::new(),
                worker_slot: None,
            });
        }
        assert_eq!(stats.finished_count, 5);
        assert_eq!(
            (stats.passed, stats.failed, stats.timed_out, stats.skipped, stats.interrupted),
            (1, 1, 1, 1, 1)
        );
        assert!(stats.has_failures());
    }

    #[test]
    fn exit_codes_are_zero_only_on_success() {
        assert_eq!(RunStatus::Passed.exit_code(), 0);
        assert!(RunStatus::Passed.is_success());
        for status in [RunStatus::Failed, RunStatus::TimedOut, RunStatus::Interrupted] {
            assert_ne!(status.exit_code(), 0, "{status:?} must be non-zero");
            assert!(!status.is_success(), "{status:?} is not a success");
        }
    }
}
