// Copyright (c) The paceline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Internal events used between the runner components.
//!
//! These often mirror the events in [`crate::reporter::events`], but are used
//! within the runner and carry scheduling detail the reporter doesn't need.

use crate::{
    groups::TestGroup,
    plan::{TestCase, TestResult},
    runner::executor::WorkerFault,
};

/// An internal event.
///
/// These events are sent by the executor side (the group futures actually
/// driving tests) to the dispatcher (the part of the runner that coordinates
/// with the external world).
#[derive(Debug)]
pub(super) enum ExecutorEvent {
    /// A test is about to run, or is being recorded as skipped.
    ///
    /// `worker_slot` is `None` for tests that are skipped without occupying a
    /// slot.
    Started {
        test: TestCase,
        worker_slot: Option<usize>,
    },

    /// A test finished and its result has been recorded.
    Finished { test: TestCase, result: TestResult },
}

/// A cancellation request broadcast from the dispatcher to running groups.
///
/// Requests only ever escalate: once `Immediate` has been observed, no
/// `Graceful` request follows.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub(super) enum CancelRequest {
    /// Let in-flight tests finish, then stop.
    Graceful,

    /// Abort in-flight tests right away.
    Immediate,
}

/// One unit of dispatch: a test group plus instructions for running it.
#[derive(Debug)]
pub(super) struct Job {
    pub(super) group: TestGroup,

    /// Record every test in the group as skipped without executing any.
    pub(super) skip_all: bool,

    /// Stop executing the group after the first test that doesn't pass.
    pub(super) halt_on_failure: bool,

    /// Report the group's outcome back to the job source once it finishes.
    pub(super) report_result: bool,
}

/// What a finished group future hands back to the dispatcher.
#[derive(Debug)]
pub(super) struct GroupOutcome {
    /// The worker slot the group occupied, now free again.
    pub(super) worker_slot: usize,

    /// The group, with a result recorded against every test.
    pub(super) group: TestGroup,

    /// Carried over from [`Job::report_result`].
    pub(super) report_result: bool,

    /// Set if a worker fault surfaced while running the group.
    pub(super) fault: Option<WorkerFault>,
}
