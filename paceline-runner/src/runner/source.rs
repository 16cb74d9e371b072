// Copyright (c) The paceline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Job sources: where the dispatcher gets its next unit of work.
//!
//! A local run drains a queue seeded with the full scheduling order. A
//! remote run asks the coordinator, one test id at a time.

use super::{
    internal_events::{GroupOutcome, Job},
    remote::RemoteJobSource,
};
use crate::{
    errors::CoordinatorError,
    groups::{GroupKind, TestGroup},
    plan::TestCaseId,
};
use indexmap::IndexMap;

/// Hands jobs to the dispatcher, from the local queue or from a remote
/// coordinator.
pub(super) enum JobSource {
    Local(LocalQueueSource),
    Remote(RemoteJobSource),
}

impl JobSource {
    pub(super) fn local(groups: Vec<TestGroup>) -> Self {
        Self::Local(LocalQueueSource::new(groups))
    }

    pub(super) fn remote(source: RemoteJobSource) -> Self {
        Self::Remote(source)
    }

    /// The next job to dispatch. `Ok(None)` means the source is exhausted
    /// and will never produce another job.
    pub(super) async fn next_job(&mut self) -> Result<Option<Job>, CoordinatorError> {
        match self {
            Self::Local(source) => Ok(source.next_job()),
            Self::Remote(source) => source.next_job().await,
        }
    }

    /// Records that a previously dispatched group has finished.
    pub(super) async fn group_finished(
        &mut self,
        outcome: &GroupOutcome,
    ) -> Result<(), CoordinatorError> {
        match self {
            Self::Local(_) => Ok(()),
            Self::Remote(source) => source.group_finished(outcome).await,
        }
    }

    /// Removes and returns every group not yet dispatched. Called when a
    /// cancellation stops admission.
    pub(super) fn drain_remaining(&mut self) -> Vec<TestGroup> {
        match self {
            Self::Local(source) => source.drain_remaining(),
            Self::Remote(source) => source.drain_remaining(),
        }
    }
}

/// The local scheduling order: groups are dispatched front to back as worker
/// slots free up.
pub(super) struct LocalQueueSource {
    queue: IndexMap<TestCaseId, TestGroup>,
}

impl LocalQueueSource {
    fn new(groups: Vec<TestGroup>) -> Self {
        let queue = groups
            .into_iter()
            .map(|group| (group.first_test_id().clone(), group))
            .collect();
        Self { queue }
    }

    fn next_job(&mut self) -> Option<Job> {
        let (_, group) = self.queue.shift_remove_index(0)?;
        // A failure inside a serial scope skips the rest of the scope.
        let halt_on_failure = group.kind == GroupKind::Serial;
        Some(Job {
            group,
            skip_all: false,
            halt_on_failure,
            report_result: false,
        })
    }

    fn drain_remaining(&mut self) -> Vec<TestGroup> {
        self.queue.drain(..).map(|(_, group)| group).collect()
    }
}
