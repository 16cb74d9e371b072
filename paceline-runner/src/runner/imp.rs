// Copyright (c) The paceline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{
    dispatcher::DispatcherContext,
    executor::{TestExecutor, run_group},
    internal_events::CancelRequest,
    remote::RemoteJobSource,
    source::JobSource,
};
use crate::{
    config::{MaxFail, WorkerCount},
    coordinator::{CoordinatorConnection, RemoteOptions, build_manifest},
    errors::{ConfigIncompatibility, ExecuteError, RunnerBuildError},
    groups::{TestGroup, build_test_groups},
    partition::{ShardSpec, filter_for_shard},
    plan::TestPlan,
    reporter::events::{CancelReason, RunEvent, RunSummary},
    signal::{ShutdownEvent, SignalEvent, SignalHandler, SignalHandlerKind},
};
use futures::stream::{FuturesUnordered, StreamExt};
use paceline_protocol::RunnerMessage;
use std::{collections::HashSet, mem, time::Duration};
use tokio::{
    runtime::Runtime,
    sync::{
        mpsc::{self, UnboundedReceiver, UnboundedSender},
        watch,
    },
    time::{Instant, sleep_until},
};
use tracing::debug;
use uuid::Uuid;

/// How long a cancelled run waits for in-flight tests before aborting them.
const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Test runner options.
#[derive(Debug, Default)]
pub struct TestRunnerBuilder {
    worker_count: Option<WorkerCount>,
    max_fail: Option<MaxFail>,
    global_timeout: Option<Duration>,
    grace_period: Option<Duration>,
    shard: Option<ShardSpec>,
    forbid_only: bool,
    remote: Option<RemoteOptions>,
}

impl TestRunnerBuilder {
    /// Sets the number of worker slots.
    pub fn set_worker_count(&mut self, worker_count: WorkerCount) -> &mut Self {
        self.worker_count = Some(worker_count);
        self
    }

    /// Sets the maximum number of failing tests before the run is cancelled.
    pub fn set_max_fail(&mut self, max_fail: MaxFail) -> &mut Self {
        self.max_fail = Some(max_fail);
        self
    }

    /// Sets a wall-clock budget for the whole run.
    pub fn set_global_timeout(&mut self, global_timeout: Duration) -> &mut Self {
        self.global_timeout = Some(global_timeout);
        self
    }

    /// Sets how long a cancelled run waits for in-flight tests before
    /// aborting them. Defaults to ten seconds.
    pub fn set_grace_period(&mut self, grace_period: Duration) -> &mut Self {
        self.grace_period = Some(grace_period);
        self
    }

    /// Restricts the run to one shard of the scheduled groups.
    pub fn set_shard(&mut self, shard: ShardSpec) -> &mut Self {
        self.shard = Some(shard);
        self
    }

    /// Treats focus markers in the plan as structural errors. Used on
    /// continuous-integration runs, where a focused test silently disabling
    /// the rest of the suite is never wanted.
    pub fn set_forbid_only(&mut self, forbid_only: bool) -> &mut Self {
        self.forbid_only = forbid_only;
        self
    }

    /// Hands scheduling order over to a remote coordinator.
    pub fn set_remote(&mut self, remote: RemoteOptions) -> &mut Self {
        self.remote = Some(remote);
        self
    }

    /// Creates a new test runner.
    pub fn build(
        self,
        plan: TestPlan,
        handler_kind: SignalHandlerKind,
    ) -> Result<TestRunner, RunnerBuildError> {
        let worker_count = match (&self.remote, self.worker_count) {
            // Remote dispatch runs on one slot unless told otherwise.
            (Some(_), None) => 1,
            (_, requested) => requested.unwrap_or_default().resolve(),
        };
        if self.remote.is_some() {
            if worker_count != 1 {
                return Err(ConfigIncompatibility::RemoteRequiresSingleWorker {
                    requested: worker_count,
                }
                .into());
            }
            if let Some(shard) = self.shard {
                return Err(ConfigIncompatibility::RemoteForbidsSharding { shard }.into());
            }
            let projects = plan.project_ids();
            if projects.len() > 1 {
                return Err(
                    ConfigIncompatibility::RemoteRequiresSingleProject { projects }.into(),
                );
            }
        }

        plan.validate(self.forbid_only)?;

        let mut plan = plan;
        let mut groups = build_test_groups(&plan, worker_count);
        if let Some(shard) = self.shard {
            filter_for_shard(&mut groups, shard);
            let retained: HashSet<_> = groups
                .iter()
                .flat_map(|group| group.tests.iter().map(|test| test.id.clone()))
                .collect();
            plan.retain_cases(&retained);
        }

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("paceline-runner-worker")
            .build()
            .map_err(RunnerBuildError::RuntimeCreate)?;
        let _guard = runtime.enter();

        // handler_kind.build() must be called from within the guard.
        let signal_handler = handler_kind
            .build()
            .map_err(RunnerBuildError::SignalHandlerSetup)?;

        let (interrupt_tx, interrupt_rx) = mpsc::unbounded_channel();

        Ok(TestRunner {
            inner: TestRunnerInner {
                run_id: Uuid::new_v4(),
                plan,
                groups,
                worker_count,
                max_fail: self.max_fail.unwrap_or(MaxFail::All),
                global_timeout: self.global_timeout,
                grace_period: self.grace_period.unwrap_or(DEFAULT_GRACE_PERIOD),
                shard: self.shard,
                remote: self.remote,
                runtime,
            },
            signal_handler,
            interrupt_tx,
            interrupt_rx,
        })
    }
}

/// Context for running tests.
///
/// Created using [`TestRunnerBuilder::build`].
#[derive(Debug)]
pub struct TestRunner {
    inner: TestRunnerInner,
    signal_handler: SignalHandler,
    interrupt_tx: UnboundedSender<()>,
    interrupt_rx: UnboundedReceiver<()>,
}

impl TestRunner {
    /// Returns a handle that can interrupt the run from another thread, the
    /// same way an operator signal would.
    pub fn interrupt_handle(&self) -> InterruptHandle {
        InterruptHandle {
            tx: self.interrupt_tx.clone(),
        }
    }

    /// Executes the scheduled tests through the given executor.
    ///
    /// The callback is called with an event stream describing the run. On
    /// success the summary carries the final statistics and run status; an
    /// error means the run could not get underway, and no run-finished event
    /// was delivered.
    pub fn execute<E, F>(self, executor: &E, callback: F) -> Result<RunSummary, ExecuteError>
    where
        E: TestExecutor,
        F: FnMut(RunEvent),
    {
        let Self {
            mut inner,
            mut signal_handler,
            interrupt_tx,
            mut interrupt_rx,
        } = self;
        // The runner's own sender stays alive so that dropping every
        // InterruptHandle doesn't close the channel mid-run.
        let _interrupt_tx = interrupt_tx;

        let mut cx = DispatcherContext::new(
            callback,
            inner.run_id,
            inner.max_fail,
            inner.plan.test_count(),
        );
        let result = inner.execute(executor, &mut signal_handler, &mut interrupt_rx, &mut cx);

        // Shut the runtime down aggressively; executors may hold tasks that
        // would otherwise keep a plain drop stuck.
        inner.runtime.shutdown_background();

        result.map(|()| {
            cx.run_finished();
            let stats = cx.run_stats();
            let status = stats.summarize_final(cx.cancel_state());
            RunSummary {
                run_id: inner.run_id,
                stats,
                status,
            }
        })
    }
}

/// A cloneable handle for interrupting a run in progress.
///
/// The first interrupt cancels the run but lets in-flight tests finish; a
/// second one aborts them immediately.
#[derive(Clone, Debug)]
pub struct InterruptHandle {
    tx: UnboundedSender<()>,
}

impl InterruptHandle {
    /// Requests that the run stop, as if an interrupt signal had been
    /// received.
    pub fn interrupt(&self) {
        let _ = self.tx.send(());
    }
}

#[derive(Debug)]
struct TestRunnerInner {
    run_id: Uuid,
    plan: TestPlan,
    groups: Vec<TestGroup>,
    worker_count: usize,
    max_fail: MaxFail,
    global_timeout: Option<Duration>,
    grace_period: Duration,
    shard: Option<ShardSpec>,
    remote: Option<RemoteOptions>,
    runtime: Runtime,
}

impl TestRunnerInner {
    fn execute<E, F>(
        &mut self,
        executor: &E,
        signal_handler: &mut SignalHandler,
        interrupt_rx: &mut UnboundedReceiver<()>,
        cx: &mut DispatcherContext<F>,
    ) -> Result<(), ExecuteError>
    where
        E: TestExecutor,
        F: FnMut(RunEvent),
    {
        let args = RunArgs {
            run_id: self.run_id,
            worker_count: self.worker_count,
            global_timeout: self.global_timeout,
            grace_period: self.grace_period,
            shard: self.shard,
            test_count: self.plan.test_count(),
        };
        let groups = mem::take(&mut self.groups);
        let remote = self.remote.take();
        self.runtime.block_on(run_all(
            args,
            groups,
            remote,
            executor,
            signal_handler,
            interrupt_rx,
            cx,
        ))
    }
}

#[derive(Clone, Copy, Debug)]
struct RunArgs {
    run_id: Uuid,
    worker_count: usize,
    global_timeout: Option<Duration>,
    grace_period: Duration,
    shard: Option<ShardSpec>,
    test_count: usize,
}

async fn run_all<E: TestExecutor, F: FnMut(RunEvent)>(
    args: RunArgs,
    groups: Vec<TestGroup>,
    remote: Option<RemoteOptions>,
    executor: &E,
    signal_handler: &mut SignalHandler,
    interrupt_rx: &mut UnboundedReceiver<()>,
    cx: &mut DispatcherContext<F>,
) -> Result<(), ExecuteError> {
    let group_count = groups.len();
    let mut source = match remote {
        Some(options) => {
            let RemoteOptions {
                endpoint,
                generate_manifest,
            } = options;
            let (mut conn, init) = CoordinatorConnection::connect(endpoint).await?;
            cx.run_started(args.test_count, group_count, args.worker_count, args.shard);
            if init.fast_exit {
                debug!("coordinator requested a fast exit");
                return Ok(());
            }
            if generate_manifest {
                let manifest = build_manifest(&groups, init.init_meta);
                conn.send(&RunnerMessage::Manifest(manifest)).await?;
                return Ok(());
            }
            JobSource::remote(RemoteJobSource::new(conn, groups))
        }
        None => {
            cx.run_started(args.test_count, group_count, args.worker_count, args.shard);
            JobSource::local(groups)
        }
    };

    executor.global_setup().await;
    dispatch_loop(&args, &mut source, executor, signal_handler, interrupt_rx, cx).await;
    executor.global_teardown().await;
    Ok(())
}

#[derive(Debug, Default)]
struct WorkerSlot {
    busy: bool,
}

struct LoopState {
    source_done: bool,
    signals_done: bool,
    shutdown_count: usize,
    grace_period: Duration,
    grace_deadline: Option<Instant>,
    global_deadline: Option<Instant>,
    global_timeout_armed: bool,
}

async fn dispatch_loop<E: TestExecutor, F: FnMut(RunEvent)>(
    args: &RunArgs,
    source: &mut JobSource,
    executor: &E,
    signal_handler: &mut SignalHandler,
    interrupt_rx: &mut UnboundedReceiver<()>,
    cx: &mut DispatcherContext<F>,
) {
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let (cancel_tx, cancel_rx) = watch::channel(None);
    let mut slots: Vec<WorkerSlot> = (0..args.worker_count)
        .map(|_| WorkerSlot::default())
        .collect();
    let mut running_groups = FuturesUnordered::new();
    let mut state = LoopState {
        source_done: false,
        signals_done: false,
        shutdown_count: 0,
        grace_period: args.grace_period,
        grace_deadline: None,
        global_deadline: args.global_timeout.map(|timeout| Instant::now() + timeout),
        global_timeout_armed: args.global_timeout.is_some(),
    };

    loop {
        if state.source_done && running_groups.is_empty() {
            break;
        }

        let free_slot = slots.iter().position(|slot| !slot.busy);
        let can_admit = !state.source_done && cx.cancel_state().is_none() && free_slot.is_some();

        // The deadline arms fall back to now() because their expressions are
        // evaluated even while the precondition is false.
        tokio::select! {
            next = source.next_job(), if can_admit => {
                match next {
                    Ok(Some(job)) => {
                        let slot = free_slot.expect("admission requires a free slot");
                        slots[slot].busy = true;
                        debug!(group = %job.group.first_test_id(), slot, "dispatching group");
                        running_groups.push(run_group(
                            job,
                            slot,
                            args.run_id,
                            executor,
                            event_tx.clone(),
                            cancel_rx.clone(),
                        ));
                    }
                    Ok(None) => {
                        debug!("job source exhausted");
                        state.source_done = true;
                    }
                    Err(error) => {
                        cx.report_error(&error);
                        begin_cancel(
                            &mut state,
                            cx,
                            source,
                            &cancel_tx,
                            CancelReason::ConnectionLost,
                            CancelRequest::Graceful,
                        );
                    }
                }
            }
            Some(outcome) = running_groups.next(), if !running_groups.is_empty() => {
                // Events recorded by this group are delivered before its
                // completion is processed.
                while let Ok(event) = event_rx.try_recv() {
                    cx.handle_executor_event(event);
                }
                slots[outcome.worker_slot].busy = false;
                if let Some(fault) = &outcome.fault {
                    cx.record_worker_fault(fault);
                }
                if let Err(error) = source.group_finished(&outcome).await {
                    cx.report_error(&error);
                    begin_cancel(
                        &mut state,
                        cx,
                        source,
                        &cancel_tx,
                        CancelReason::ConnectionLost,
                        CancelRequest::Graceful,
                    );
                }
                if cx.max_fail_exceeded() {
                    begin_cancel(
                        &mut state,
                        cx,
                        source,
                        &cancel_tx,
                        CancelReason::TestFailure,
                        CancelRequest::Graceful,
                    );
                }
            }
            Some(event) = event_rx.recv() => {
                cx.handle_executor_event(event);
                if cx.max_fail_exceeded() {
                    begin_cancel(
                        &mut state,
                        cx,
                        source,
                        &cancel_tx,
                        CancelReason::TestFailure,
                        CancelRequest::Graceful,
                    );
                }
            }
            signal = signal_handler.recv(), if !state.signals_done => {
                match signal {
                    Some(SignalEvent::Shutdown(event)) => {
                        state.shutdown_count += 1;
                        let request = if state.shutdown_count > 1 {
                            CancelRequest::Immediate
                        } else {
                            CancelRequest::Graceful
                        };
                        begin_cancel(
                            &mut state,
                            cx,
                            source,
                            &cancel_tx,
                            shutdown_reason(event),
                            request,
                        );
                    }
                    None => state.signals_done = true,
                }
            }
            Some(()) = interrupt_rx.recv() => {
                state.shutdown_count += 1;
                let request = if state.shutdown_count > 1 {
                    CancelRequest::Immediate
                } else {
                    CancelRequest::Graceful
                };
                begin_cancel(
                    &mut state,
                    cx,
                    source,
                    &cancel_tx,
                    CancelReason::Interrupt,
                    request,
                );
            }
            _ = sleep_until(state.global_deadline.unwrap_or_else(Instant::now)),
                if state.global_timeout_armed =>
            {
                state.global_timeout_armed = false;
                begin_cancel(
                    &mut state,
                    cx,
                    source,
                    &cancel_tx,
                    CancelReason::GlobalTimeout,
                    CancelRequest::Graceful,
                );
            }
            _ = sleep_until(state.grace_deadline.unwrap_or_else(Instant::now)),
                if state.grace_deadline.is_some() =>
            {
                state.grace_deadline = None;
                debug!("grace period expired, aborting tests still running");
                request_cancel(&cancel_tx, CancelRequest::Immediate);
            }
        }
    }

    // Deliver anything recorded by the final group completions.
    while let Ok(event) = event_rx.try_recv() {
        cx.handle_executor_event(event);
    }
}

/// Begins or escalates cancellation. On a newly recorded reason the job
/// source is drained and its groups are reported as skipped; the broadcast
/// request escalates independently, so a repeated interrupt still upgrades a
/// graceful stop to an immediate one.
fn begin_cancel<F: FnMut(RunEvent)>(
    state: &mut LoopState,
    cx: &mut DispatcherContext<F>,
    source: &mut JobSource,
    cancel_tx: &watch::Sender<Option<CancelRequest>>,
    reason: CancelReason,
    request: CancelRequest,
) {
    if cx.begin_cancel(reason) {
        for group in source.drain_remaining() {
            cx.mass_skip_group(group);
        }
        state.source_done = true;
        let timed = matches!(
            reason,
            CancelReason::GlobalTimeout | CancelReason::Signal | CancelReason::Interrupt
        );
        if timed && state.grace_deadline.is_none() {
            state.grace_deadline = Some(Instant::now() + state.grace_period);
        }
    }
    request_cancel(cancel_tx, request);
}

fn request_cancel(cancel_tx: &watch::Sender<Option<CancelRequest>>, request: CancelRequest) {
    cancel_tx.send_if_modified(|current| {
        if *current < Some(request) {
            *current = Some(request);
            true
        } else {
            false
        }
    });
}

fn shutdown_reason(event: ShutdownEvent) -> CancelReason {
    match event {
        #[cfg(unix)]
        ShutdownEvent::Hangup | ShutdownEvent::Term => CancelReason::Signal,
        ShutdownEvent::Interrupt => CancelReason::Interrupt,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        coordinator::CoordinatorEndpoint,
        plan::{SourceLocation, Suite, SuiteKind, TestCase},
    };
    use pretty_assertions::assert_eq;

    fn plan_with_projects(projects: &[&str]) -> TestPlan {
        let mut root = Suite::new(SuiteKind::Root, "");
        for project in projects {
            let mut project_suite = Suite::new(SuiteKind::Project, *project);
            let mut file = Suite::new(SuiteKind::File, "a.test.ts");
            let mut case = TestCase::new(
                format!("{project}:t1"),
                vec!["t1".to_owned()],
                SourceLocation::new("a.test.ts", 1, 1),
            );
            case.set_project(*project);
            file.push_test(case);
            project_suite.push_suite(file);
            root.push_suite(project_suite);
        }
        TestPlan::new(root)
    }

    fn remote_options() -> RemoteOptions {
        let (near, _far) = tokio::io::duplex(64);
        RemoteOptions::new(CoordinatorEndpoint::io(near))
    }

    #[test]
    fn remote_requires_a_single_worker() {
        let mut builder = TestRunnerBuilder::default();
        builder
            .set_remote(remote_options())
            .set_worker_count(WorkerCount::Count(4));
        let error = builder
            .build(plan_with_projects(&["web"]), SignalHandlerKind::Noop)
            .expect_err("four workers with remote dispatch");
        assert_eq!(
            error.to_string(),
            "remote coordination requires exactly 1 worker, but 4 were requested"
        );
    }

    #[test]
    fn remote_defaults_to_a_single_worker() {
        let mut builder = TestRunnerBuilder::default();
        builder.set_remote(remote_options());
        builder
            .build(plan_with_projects(&["web"]), SignalHandlerKind::Noop)
            .expect("unset worker count defaults to one");
    }

    #[test]
    fn remote_cannot_be_combined_with_sharding() {
        let mut builder = TestRunnerBuilder::default();
        builder
            .set_remote(remote_options())
            .set_shard("1/2".parse().expect("valid shard"));
        let error = builder
            .build(plan_with_projects(&["web"]), SignalHandlerKind::Noop)
            .expect_err("sharding with remote dispatch");
        assert_eq!(
            error.to_string(),
            "remote coordination cannot be combined with sharding (shard 1/2 requested)"
        );
    }

    #[test]
    fn remote_requires_a_single_project() {
        let mut builder = TestRunnerBuilder::default();
        builder.set_remote(remote_options());
        let error = builder
            .build(plan_with_projects(&["web", "api"]), SignalHandlerKind::Noop)
            .expect_err("two projects with remote dispatch");
        assert_eq!(
            error.to_string(),
            "remote coordination requires a single project, but the plan spans \
             2 projects (web, api)"
        );
    }

    #[test]
    fn forbid_only_surfaces_structural_errors() {
        let mut root = Suite::new(SuiteKind::Root, "");
        let mut file = Suite::new(SuiteKind::File, "a.test.ts");
        let mut case = TestCase::new(
            "t1",
            vec!["t1".to_owned()],
            SourceLocation::new("a.test.ts", 3, 1),
        );
        case.set_only(true);
        file.push_test(case);
        root.push_suite(file);

        let mut builder = TestRunnerBuilder::default();
        builder.set_forbid_only(true);
        let error = builder
            .build(TestPlan::new(root), SignalHandlerKind::Noop)
            .expect_err("focused test with forbid_only");
        assert!(matches!(error, RunnerBuildError::Structural(_)));
    }

    #[test]
    fn local_builds_with_default_options() {
        let runner = TestRunnerBuilder::default()
            .build(plan_with_projects(&["web"]), SignalHandlerKind::Noop)
            .expect("default local build");
        let _handle = runner.interrupt_handle();
    }
}
