// Copyright (c) The paceline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The controller for the test runner.
//!
//! This module interfaces with the external world and the executor side. It
//! turns internal events into run events for the caller's callback, and owns
//! the statistics and cancellation state for one run.

use super::{executor::WorkerFault, internal_events::ExecutorEvent};
use crate::{
    config::MaxFail,
    errors::DisplayErrorChain,
    groups::TestGroup,
    partition::ShardSpec,
    plan::TestResult,
    reporter::events::{CancelReason, RunEvent, RunEventKind, RunStats},
    time::{StopwatchStart, stopwatch},
};
use chrono::Local;
use debug_ignore::DebugIgnore;
use derive_where::derive_where;
use std::error::Error;
use tracing::debug;
use uuid::Uuid;

/// Context for the dispatcher.
///
/// Coordinates events from the executor side and the outside world, and owns
/// the statistics and cancellation state for one run.
#[derive_where(Debug)]
pub(super) struct DispatcherContext<F> {
    callback: DebugIgnore<F>,
    run_id: Uuid,
    stopwatch: StopwatchStart,
    run_stats: RunStats,
    max_fail: MaxFail,
    running: usize,
    cancel_state: Option<CancelReason>,
}

impl<F: FnMut(RunEvent)> DispatcherContext<F> {
    pub(super) fn new(
        callback: F,
        run_id: Uuid,
        max_fail: MaxFail,
        initial_run_count: usize,
    ) -> Self {
        Self {
            callback: DebugIgnore(callback),
            run_id,
            stopwatch: stopwatch(),
            run_stats: RunStats {
                initial_run_count,
                ..RunStats::default()
            },
            max_fail,
            running: 0,
            cancel_state: None,
        }
    }

    pub(super) fn run_started(
        &mut self,
        test_count: usize,
        group_count: usize,
        worker_count: usize,
        shard: Option<ShardSpec>,
    ) {
        self.basic_callback(RunEventKind::RunStarted {
            run_id: self.run_id,
            test_count,
            group_count,
            worker_count,
            shard,
        });
    }

    pub(super) fn handle_executor_event(&mut self, event: ExecutorEvent) {
        match event {
            ExecutorEvent::Started { test, worker_slot } => {
                self.running += 1;
                let running = self.running;
                self.basic_callback(RunEventKind::TestStarted {
                    test,
                    worker_slot,
                    running,
                });
            }
            ExecutorEvent::Finished { test, result } => {
                self.running = self.running.saturating_sub(1);
                self.run_stats.on_test_finished(&result);
                let current_stats = self.run_stats;
                let running = self.running;
                self.basic_callback(RunEventKind::TestFinished {
                    test,
                    result,
                    current_stats,
                    running,
                });
            }
        }
    }

    /// Records results and events for a group skipped wholesale, without it
    /// ever reaching a worker slot.
    pub(super) fn mass_skip_group(&mut self, mut group: TestGroup) {
        for test in &mut group.tests {
            let result = TestResult::skipped();
            test.push_result(result.clone());
            self.handle_executor_event(ExecutorEvent::Started {
                test: test.clone(),
                worker_slot: None,
            });
            self.handle_executor_event(ExecutorEvent::Finished {
                test: test.clone(),
                result,
            });
        }
    }

    /// Begins cancellation, or escalates one already in progress. Returns
    /// true if the cancellation state changed.
    ///
    /// An equal or less severe reason never replaces the current one, so the
    /// first begin-cancel event of each severity level is also the last.
    pub(super) fn begin_cancel(&mut self, reason: CancelReason) -> bool {
        if self.cancel_state < Some(reason) {
            debug!(reason = reason.to_static_str(), "beginning cancellation");
            self.cancel_state = Some(reason);
            let running = self.running;
            self.basic_callback(RunEventKind::RunBeginCancel { reason, running });
            true
        } else {
            false
        }
    }

    /// Records a run-level error and reports it through the callback.
    pub(super) fn report_error(&mut self, error: &dyn Error) {
        self.run_stats.run_errors += 1;
        let error = DisplayErrorChain::new(error).to_string();
        self.basic_callback(RunEventKind::Error { error });
    }

    /// Records a worker fault surfaced by a finished group.
    pub(super) fn record_worker_fault(&mut self, fault: &WorkerFault) {
        debug!(fault = %fault, "worker fault recorded");
        self.run_stats.worker_faults += 1;
    }

    pub(super) fn run_finished(&mut self) {
        let snapshot = self.stopwatch.snapshot();
        let stats = self.run_stats;
        self.basic_callback(RunEventKind::RunFinished {
            run_id: self.run_id,
            start_time: snapshot.start_time.fixed_offset(),
            elapsed: snapshot.active,
            stats,
        });
    }

    /// Whether enough tests have failed to exhaust the failure budget.
    pub(super) fn max_fail_exceeded(&self) -> bool {
        self.max_fail
            .is_exceeded(self.run_stats.failed + self.run_stats.timed_out)
    }

    pub(super) fn run_stats(&self) -> RunStats {
        self.run_stats
    }

    pub(super) fn cancel_state(&self) -> Option<CancelReason> {
        self.cancel_state
    }

    fn basic_callback(&mut self, kind: RunEventKind) {
        let event = RunEvent {
            timestamp: Local::now().fixed_offset(),
            elapsed: self.stopwatch.snapshot().active,
            kind,
        };
        (self.callback.0)(event);
    }
}
