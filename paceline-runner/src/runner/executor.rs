// Copyright (c) The paceline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The seam between the scheduler and whatever actually runs tests.
//!
//! The runner owns ordering, worker slots and cancellation; implementations
//! of [`TestExecutor`] own everything that happens inside a single test.

use super::internal_events::{CancelRequest, ExecutorEvent, GroupOutcome, Job};
use crate::plan::{ProjectId, TestCase, TestFailure, TestResult, TestStatus, WorkerFingerprint};
use std::{future::Future, pin::pin, time::Instant};
use thiserror::Error;
use tokio::sync::{mpsc::UnboundedSender, watch};
use tracing::debug;
use uuid::Uuid;

/// Runs individual tests on behalf of the scheduler.
///
/// The runner decides when and where a test runs; the executor decides how.
/// Implementations report each test's outcome through [`ExecuteStatus`], or a
/// [`WorkerFault`] when the execution environment itself broke down.
pub trait TestExecutor: Send + Sync {
    /// Executes one test to completion.
    ///
    /// Returning `Err` indicates a fault in the execution environment rather
    /// than a test failure: the runner records the fault, fails the test, and
    /// skips the rest of its group.
    fn execute(
        &self,
        test: &TestCase,
        cx: &ExecuteContext<'_>,
    ) -> impl Future<Output = Result<ExecuteStatus, WorkerFault>> + Send;

    /// Called once before the first test of a run.
    fn global_setup(&self) -> impl Future<Output = ()> + Send {
        std::future::ready(())
    }

    /// Called once after the last test of a run, including cancelled runs.
    fn global_teardown(&self) -> impl Future<Output = ()> + Send {
        std::future::ready(())
    }
}

/// Ambient information handed to [`TestExecutor::execute`] for one test.
#[derive(Clone, Copy, Debug)]
pub struct ExecuteContext<'a> {
    /// Unique identifier of the enclosing run.
    pub run_id: Uuid,

    /// The worker slot the test occupies.
    pub worker_slot: usize,

    /// Capability fingerprint of the group being run.
    pub fingerprint: &'a WorkerFingerprint,

    /// The project the test belongs to.
    pub project: &'a ProjectId,
}

/// What an executor reports back for one completed test.
#[derive(Clone, Debug, PartialEq)]
pub struct ExecuteStatus {
    /// The verdict. Executors report [`TestStatus::Passed`],
    /// [`TestStatus::Failed`], [`TestStatus::TimedOut`] or
    /// [`TestStatus::Skipped`]; the runner itself records
    /// [`TestStatus::Interrupted`] for tests it aborted.
    pub status: TestStatus,

    /// Wall-clock runtime in milliseconds, as measured by the executor.
    pub duration_ms: f64,

    /// Failure detail in occurrence order. Empty for tests that produced no
    /// errors.
    pub failures: Vec<TestFailure>,
}

/// A fault in the execution environment, as opposed to a test failure.
///
/// A fault fails the current test and skips the rest of its group; the run
/// continues on the remaining groups.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum WorkerFault {
    /// The worker process (or equivalent) died.
    #[error("worker crashed: {message}")]
    Crash {
        /// Human-readable description of the crash.
        message: String,
    },

    /// The worker and the scheduler disagree about session state.
    #[error("worker desynchronized: {message}")]
    Desynchronized {
        /// Human-readable description of the mismatch.
        message: String,
    },
}

/// Drives one job on one worker slot, recording a result for every member
/// test and streaming progress to the dispatcher.
pub(super) async fn run_group<E: TestExecutor>(
    mut job: Job,
    worker_slot: usize,
    run_id: Uuid,
    executor: &E,
    events: UnboundedSender<ExecutorEvent>,
    mut cancel_rx: watch::Receiver<Option<CancelRequest>>,
) -> GroupOutcome {
    let mut fault = None;
    let mut skip_rest = job.skip_all;

    for index in 0..job.group.tests.len() {
        // A cancellation requested between tests skips everything that
        // hasn't started yet.
        if !skip_rest && cancel_rx.borrow().is_some() {
            skip_rest = true;
        }

        if skip_rest {
            let _ = events.send(ExecutorEvent::Started {
                test: job.group.tests[index].clone(),
                worker_slot: None,
            });
            let result = TestResult::skipped();
            job.group.tests[index].push_result(result.clone());
            let _ = events.send(ExecutorEvent::Finished {
                test: job.group.tests[index].clone(),
                result,
            });
            continue;
        }

        let _ = events.send(ExecutorEvent::Started {
            test: job.group.tests[index].clone(),
            worker_slot: Some(worker_slot),
        });

        let started_at = Instant::now();
        let exec_result = {
            let cx = ExecuteContext {
                run_id,
                worker_slot,
                fingerprint: &job.group.fingerprint,
                project: &job.group.project,
            };
            let mut exec_fut = pin!(executor.execute(&job.group.tests[index], &cx));
            let mut cancel_done = false;
            loop {
                tokio::select! {
                    result = &mut exec_fut => break Some(result),
                    changed = cancel_rx.changed(), if !cancel_done => match changed {
                        Ok(()) => {
                            if *cancel_rx.borrow() == Some(CancelRequest::Immediate) {
                                break None;
                            }
                            // Graceful: the running test gets to finish.
                        }
                        Err(_) => cancel_done = true,
                    },
                }
            }
        };

        let result = match exec_result {
            Some(Ok(status)) => TestResult {
                status: status.status,
                duration_ms: status.duration_ms,
                failures: status.failures,
                worker_slot: Some(worker_slot),
            },
            Some(Err(worker_fault)) => {
                debug!(
                    test = %job.group.tests[index].id,
                    fault = %worker_fault,
                    "worker fault, skipping the rest of the group",
                );
                skip_rest = true;
                let result = TestResult {
                    status: TestStatus::Failed,
                    duration_ms: duration_ms_since(started_at),
                    failures: vec![TestFailure::new(worker_fault.to_string())],
                    worker_slot: Some(worker_slot),
                };
                fault = Some(worker_fault);
                result
            }
            None => {
                skip_rest = true;
                TestResult::interrupted(duration_ms_since(started_at), worker_slot)
            }
        };

        if job.halt_on_failure && result.status.is_failure() {
            skip_rest = true;
        }

        job.group.tests[index].push_result(result.clone());
        let _ = events.send(ExecutorEvent::Finished {
            test: job.group.tests[index].clone(),
            result,
        });
    }

    GroupOutcome {
        worker_slot,
        group: job.group,
        report_result: job.report_result,
        fault,
    }
}

fn duration_ms_since(started_at: Instant) -> f64 {
    started_at.elapsed().as_secs_f64() * 1000.0
}
