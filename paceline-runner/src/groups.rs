// Copyright (c) The paceline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Building schedulable test groups from a test plan.
//!
//! A [`TestGroup`] is the unit of scheduling: all tests in a group run on the
//! same worker slot, in order. Grouping is driven by three facts about each
//! test's position in the suite tree, precomputed in a single walk: whether
//! any ancestor declares parallel mode, the nearest serial-mode ancestor if
//! any, and whether any ancestor declares a before-all or after-all hook.
//!
//! The builder is deterministic: the same plan and worker count always
//! produce the same groups in the same order.

use crate::plan::{
    CaseKind, ProjectId, SourceUnit, Suite, SuiteEntry, SuiteMode, TestCase, TestCaseId, TestPlan,
    WorkerFingerprint,
};
use indexmap::IndexMap;

/// How a group came to be, and therefore how its tests relate to each other.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GroupKind {
    /// Tests outside any parallel scope. Run in declared order.
    General,

    /// Tests merged under one serial-mode scope. Run in declared order, and a
    /// failure skips the remainder of the group.
    Serial,

    /// A single independently schedulable test.
    Parallel,

    /// A contiguous chunk of the parallel-with-hooks pool. Chunking bounds
    /// how many times the scope's before-all and after-all hooks re-run.
    HooksChunk,

    /// Project-setup cases. Under remote coordination these gate the
    /// project's ordinary groups.
    Setup,
}

/// A set of tests that must run on the same worker slot, in order.
///
/// All member tests share the worker fingerprint, source unit, and repeat
/// index. Groups are never split by later pipeline stages; the shard
/// partitioner and the job queue both treat them as atomic.
#[derive(Clone, Debug, PartialEq)]
pub struct TestGroup {
    /// Worker-capability fingerprint shared by all member tests.
    pub fingerprint: WorkerFingerprint,

    /// Source unit shared by all member tests.
    pub source_unit: SourceUnit,

    /// Repeat-run index shared by all member tests.
    pub repeat_index: usize,

    /// The project the group belongs to.
    pub project: ProjectId,

    /// How the group was formed.
    pub kind: GroupKind,

    /// Member tests in execution order. Never empty.
    pub tests: Vec<TestCase>,
}

impl TestGroup {
    /// The identifier of the group's first test, which doubles as the group's
    /// key in the job queue.
    pub fn first_test_id(&self) -> &TestCaseId {
        &self
            .tests
            .first()
            .expect("a test group is never empty")
            .id
    }

    /// Number of member tests.
    pub fn test_count(&self) -> usize {
        self.tests.len()
    }
}

/// Position of a suite node in the tree, assigned in preorder. Used to merge
/// tests that share a serial-mode ancestor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct ScopeKey(usize);

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum ParallelKey {
    /// Tests merged under their nearest serial-mode ancestor.
    Scope(ScopeKey),
    /// A test that is schedulable on its own.
    Single(TestCaseId),
}

#[derive(Clone, Copy, Debug, Default)]
struct ScopeState {
    inside_parallel: bool,
    nearest_serial: Option<ScopeKey>,
    hooks_in_scope: bool,
}

impl ScopeState {
    fn enter(self, suite: &Suite, key: ScopeKey) -> Self {
        Self {
            inside_parallel: self.inside_parallel || suite.mode == SuiteMode::Parallel,
            nearest_serial: if suite.mode == SuiteMode::Serial {
                Some(key)
            } else {
                self.nearest_serial
            },
            hooks_in_scope: self.hooks_in_scope || suite.has_all_hooks,
        }
    }
}

struct CaseFacts<'a> {
    test: &'a TestCase,
    state: ScopeState,
}

fn collect_facts(plan: &TestPlan) -> Vec<CaseFacts<'_>> {
    let mut facts = Vec::with_capacity(plan.test_count());
    let mut next_ordinal = 0;
    let root_key = ScopeKey(next_ordinal);
    next_ordinal += 1;
    let root_state = ScopeState::default().enter(plan.root(), root_key);
    walk(plan.root(), root_state, &mut next_ordinal, &mut facts);
    facts
}

fn walk<'a>(
    suite: &'a Suite,
    state: ScopeState,
    next_ordinal: &mut usize,
    facts: &mut Vec<CaseFacts<'a>>,
) {
    for entry in &suite.entries {
        match entry {
            SuiteEntry::Test(test) => facts.push(CaseFacts { test, state }),
            SuiteEntry::Suite(child) => {
                let key = ScopeKey(*next_ordinal);
                *next_ordinal += 1;
                walk(child, state.enter(child, key), next_ordinal, facts);
            }
        }
    }
}

#[derive(Default)]
struct FileBucket<'a> {
    setup: Vec<&'a TestCase>,
    general: Vec<&'a TestCase>,
    parallel: IndexMap<ParallelKey, Vec<&'a TestCase>>,
    with_hooks: Vec<&'a TestCase>,
}

/// Builds the schedulable groups for a plan.
///
/// Tests are bucketed first by worker fingerprint, then by source unit and
/// repeat index, preserving first-seen order throughout. Within a bucket each
/// test is classified by its scheduling facts:
///
/// - outside any parallel scope: joins the bucket's single general group;
/// - inside a parallel scope with a serial-mode ancestor: merged with the
///   other tests sharing the nearest such ancestor;
/// - inside a parallel scope with a before-all or after-all hook in scope and
///   no serial ancestor: pooled, then split into contiguous chunks of at most
///   `ceil(pool / worker_count)` tests so hook re-runs stay bounded;
/// - otherwise: its own singleton group.
///
/// Project-setup cases are bucketed the same way but always emitted as
/// [`GroupKind::Setup`] groups ahead of every ordinary group.
pub fn build_test_groups(plan: &TestPlan, worker_count: usize) -> Vec<TestGroup> {
    let worker_count = worker_count.max(1);
    let facts = collect_facts(plan);

    let mut buckets: IndexMap<WorkerFingerprint, IndexMap<(SourceUnit, usize), FileBucket<'_>>> =
        IndexMap::new();
    for CaseFacts { test, state } in &facts {
        let bucket = buckets
            .entry(test.fingerprint.clone())
            .or_default()
            .entry((test.source_unit.clone(), test.repeat_index))
            .or_default();

        if test.kind == CaseKind::ProjectSetup {
            bucket.setup.push(test);
        } else if !state.inside_parallel {
            bucket.general.push(test);
        } else if let Some(scope) = state.nearest_serial {
            bucket
                .parallel
                .entry(ParallelKey::Scope(scope))
                .or_default()
                .push(test);
        } else if state.hooks_in_scope {
            bucket.with_hooks.push(test);
        } else {
            bucket
                .parallel
                .entry(ParallelKey::Single(test.id.clone()))
                .or_default()
                .push(test);
        }
    }

    let mut setup_groups = Vec::new();
    let mut ordinary = Vec::new();
    for (fingerprint, files) in &buckets {
        for ((source_unit, repeat_index), bucket) in files {
            let make = |kind: GroupKind, tests: &[&TestCase]| TestGroup {
                fingerprint: fingerprint.clone(),
                source_unit: source_unit.clone(),
                repeat_index: *repeat_index,
                project: tests[0].project.clone(),
                kind,
                tests: tests.iter().map(|test| (*test).clone()).collect(),
            };

            if !bucket.setup.is_empty() {
                setup_groups.push(make(GroupKind::Setup, &bucket.setup));
            }
            if !bucket.general.is_empty() {
                ordinary.push(make(GroupKind::General, &bucket.general));
            }
            for (key, tests) in &bucket.parallel {
                let kind = match key {
                    ParallelKey::Scope(_) => GroupKind::Serial,
                    ParallelKey::Single(_) => GroupKind::Parallel,
                };
                ordinary.push(make(kind, tests));
            }
            if !bucket.with_hooks.is_empty() {
                let chunk_size = bucket.with_hooks.len().div_ceil(worker_count);
                for chunk in bucket.with_hooks.chunks(chunk_size) {
                    ordinary.push(make(GroupKind::HooksChunk, chunk));
                }
            }
        }
    }

    let mut groups = setup_groups;
    groups.append(&mut ordinary);
    groups
}
