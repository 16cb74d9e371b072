// Copyright (c) The paceline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The suite tree produced by discovery.

use crate::plan::TestCase;

/// What kind of node a [`Suite`] is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SuiteKind {
    /// The root of the whole plan.
    Root,

    /// A project (configuration variant) node.
    Project,

    /// A source file node.
    File,

    /// A nested describe block.
    Describe,
}

/// Execution mode declared on a suite.
///
/// Modes combine along the ancestor chain: a test is *inside a parallel
/// scope* if any ancestor is [`Parallel`](SuiteMode::Parallel), and its
/// *serial scope* is the nearest [`Serial`](SuiteMode::Serial) ancestor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SuiteMode {
    /// No declared mode; inherits scheduling behavior from ancestors.
    #[default]
    Default,

    /// Descendant tests are independently schedulable.
    Parallel,

    /// Descendant tests run in declared order on one worker, and a failure
    /// skips the remainder of the scope's group.
    Serial,
}

/// An entry in a suite: either a nested suite or a test case.
#[derive(Clone, Debug, PartialEq)]
pub enum SuiteEntry {
    /// A nested suite.
    Suite(Suite),

    /// A leaf test case.
    Test(TestCase),
}

/// A node in the discovery tree.
///
/// Suites carry the structure scheduling decisions are derived from: the
/// execution mode, whether the suite declares any before-all or after-all
/// hooks, and the entries in declaration order.
#[derive(Clone, Debug, PartialEq)]
pub struct Suite {
    /// What kind of node this is.
    pub kind: SuiteKind,

    /// Title of the suite. Empty for the root.
    pub title: String,

    /// Declared execution mode.
    pub mode: SuiteMode,

    /// Whether the suite declares a before-all or after-all hook.
    pub has_all_hooks: bool,

    /// Whether the suite carries a focus marker.
    pub only: bool,

    /// Entries in declaration order.
    pub entries: Vec<SuiteEntry>,
}

impl Suite {
    /// Creates an empty suite with [`SuiteMode::Default`] and no hooks.
    pub fn new(kind: SuiteKind, title: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            mode: SuiteMode::default(),
            has_all_hooks: false,
            only: false,
            entries: Vec::new(),
        }
    }

    /// Sets the execution mode.
    pub fn set_mode(&mut self, mode: SuiteMode) -> &mut Self {
        self.mode = mode;
        self
    }

    /// Records that the suite declares a before-all or after-all hook.
    pub fn set_all_hooks(&mut self) -> &mut Self {
        self.has_all_hooks = true;
        self
    }

    /// Marks the suite as carrying a focus marker.
    pub fn set_only(&mut self, only: bool) -> &mut Self {
        self.only = only;
        self
    }

    /// Appends a nested suite.
    pub fn push_suite(&mut self, suite: Suite) -> &mut Self {
        self.entries.push(SuiteEntry::Suite(suite));
        self
    }

    /// Appends a test case.
    pub fn push_test(&mut self, test: TestCase) -> &mut Self {
        self.entries.push(SuiteEntry::Test(test));
        self
    }

    /// Number of test cases in this suite and all nested suites.
    pub fn test_count(&self) -> usize {
        self.entries
            .iter()
            .map(|entry| match entry {
                SuiteEntry::Suite(suite) => suite.test_count(),
                SuiteEntry::Test(_) => 1,
            })
            .sum()
    }
}
