// Copyright (c) The paceline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Individual test cases and their recorded results.

use camino::Utf8PathBuf;
use smol_str::SmolStr;
use std::fmt;

/// Opaque, stable identifier for a single test case.
///
/// Identifiers are assigned at discovery time and are the currency of the
/// entire scheduling pipeline: groups are keyed by their first test's
/// identifier, and remote coordinators request work by sending identifiers
/// back over the wire.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TestCaseId(SmolStr);

impl TestCaseId {
    /// Creates a new identifier from a string.
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(SmolStr::new(id))
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TestCaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TestCaseId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for TestCaseId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// A fingerprint of the worker capabilities a test requires.
///
/// Tests only share a [`TestGroup`](crate::groups::TestGroup) if their
/// fingerprints are equal, so a worker that picked up one test of a group can
/// execute all of them.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct WorkerFingerprint(SmolStr);

impl WorkerFingerprint {
    /// Creates a new fingerprint from a string.
    pub fn new(fingerprint: impl AsRef<str>) -> Self {
        Self(SmolStr::new(fingerprint))
    }

    /// Returns the fingerprint as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkerFingerprint {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for WorkerFingerprint {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Identifier for the project (configuration variant) a test belongs to.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ProjectId(SmolStr);

impl ProjectId {
    /// Creates a new project identifier from a string.
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(SmolStr::new(id))
    }

    /// Returns the project identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProjectId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ProjectId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// The source unit (file path) a test was declared in.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SourceUnit(Utf8PathBuf);

impl SourceUnit {
    /// Creates a new source unit from a path.
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self(path.into())
    }
}

impl fmt::Display for SourceUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl From<&str> for SourceUnit {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

impl From<Utf8PathBuf> for SourceUnit {
    fn from(path: Utf8PathBuf) -> Self {
        Self::new(path)
    }
}

/// The location a test was declared at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceLocation {
    /// Path to the declaring file.
    pub file: Utf8PathBuf,

    /// 1-based line number.
    pub line: u32,

    /// 1-based column number.
    pub column: u32,
}

impl SourceLocation {
    /// Creates a new source location.
    pub fn new(file: impl Into<Utf8PathBuf>, line: u32, column: u32) -> Self {
        Self {
            file: file.into(),
            line,
            column,
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// Distinguishes ordinary tests from project-setup cases.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaseKind {
    /// An ordinary test case.
    Test,

    /// A project-setup case: a failure poisons the whole project under remote
    /// coordination.
    ProjectSetup,
}

/// A single schedulable test case.
///
/// Cases are produced by discovery and cloned into [`TestGroup`]s by the group
/// builder; each case belongs to exactly one group at schedule time. Results
/// accumulate on the group's copy as the run progresses.
///
/// [`TestGroup`]: crate::groups::TestGroup
#[derive(Clone, Debug, PartialEq)]
pub struct TestCase {
    /// Stable identifier.
    pub id: TestCaseId,

    /// Where the test was declared.
    pub location: SourceLocation,

    /// Titles from the outermost suite down to the test itself.
    pub title_path: Vec<String>,

    /// Worker-capability fingerprint.
    pub fingerprint: WorkerFingerprint,

    /// The file the test was declared in.
    pub source_unit: SourceUnit,

    /// Index of the repeat-run this case instance belongs to.
    pub repeat_index: usize,

    /// The project this case belongs to.
    pub project: ProjectId,

    /// Ordinary test or project-setup case.
    pub kind: CaseKind,

    /// Whether the test carries a focus marker.
    pub only: bool,

    results: Vec<TestResult>,
}

impl TestCase {
    /// Creates a new test case with default scheduling attributes.
    ///
    /// The fingerprint defaults to the empty fingerprint, the source unit to
    /// the declaring file, the project to `"default"`, and the kind to
    /// [`CaseKind::Test`].
    pub fn new(
        id: impl Into<TestCaseId>,
        title_path: Vec<String>,
        location: SourceLocation,
    ) -> Self {
        let source_unit = SourceUnit::new(location.file.clone());
        Self {
            id: id.into(),
            location,
            title_path,
            fingerprint: WorkerFingerprint::new(""),
            source_unit,
            repeat_index: 0,
            project: ProjectId::new("default"),
            kind: CaseKind::Test,
            only: false,
            results: Vec::new(),
        }
    }

    /// Sets the worker-capability fingerprint.
    pub fn set_fingerprint(&mut self, fingerprint: impl Into<WorkerFingerprint>) -> &mut Self {
        self.fingerprint = fingerprint.into();
        self
    }

    /// Sets the source unit, if it differs from the declaring file.
    pub fn set_source_unit(&mut self, source_unit: impl Into<SourceUnit>) -> &mut Self {
        self.source_unit = source_unit.into();
        self
    }

    /// Sets the repeat-run index.
    pub fn set_repeat_index(&mut self, repeat_index: usize) -> &mut Self {
        self.repeat_index = repeat_index;
        self
    }

    /// Sets the owning project.
    pub fn set_project(&mut self, project: impl Into<ProjectId>) -> &mut Self {
        self.project = project.into();
        self
    }

    /// Marks this case as a project-setup case.
    pub fn set_project_setup(&mut self) -> &mut Self {
        self.kind = CaseKind::ProjectSetup;
        self
    }

    /// Marks this case as carrying a focus marker.
    pub fn set_only(&mut self, only: bool) -> &mut Self {
        self.only = only;
        self
    }

    /// The test's display name: all titles joined with a `›` separator.
    pub fn display_name(&self) -> String {
        self.title_path.join(" › ")
    }

    /// All recorded results, oldest first.
    pub fn results(&self) -> &[TestResult] {
        &self.results
    }

    /// The most recently recorded result, if any.
    pub fn latest_result(&self) -> Option<&TestResult> {
        self.results.last()
    }

    /// Appends a result. The result list is append-only.
    pub(crate) fn push_result(&mut self, result: TestResult) {
        self.results.push(result);
    }
}

/// Terminal status of a single test result.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TestStatus {
    /// The test ran to completion successfully.
    Passed,

    /// The test ran and failed.
    Failed,

    /// The test exceeded its time budget.
    TimedOut,

    /// The test was skipped without executing.
    Skipped,

    /// The test was aborted by run cancellation.
    Interrupted,
}

impl TestStatus {
    /// Whether this status counts against the failure budget.
    pub fn is_failure(self) -> bool {
        matches!(self, TestStatus::Failed | TestStatus::TimedOut)
    }

    /// Returns a static string describing the status.
    pub fn to_static_str(self) -> &'static str {
        match self {
            TestStatus::Passed => "passed",
            TestStatus::Failed => "failed",
            TestStatus::TimedOut => "timed out",
            TestStatus::Skipped => "skipped",
            TestStatus::Interrupted => "interrupted",
        }
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_static_str())
    }
}

/// A single failure recorded against a test result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TestFailure {
    /// Fully formatted failure message.
    pub message: String,
}

impl TestFailure {
    /// Creates a new failure from a formatted message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for TestFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// The recorded outcome of one execution of a test case.
#[derive(Clone, Debug, PartialEq)]
pub struct TestResult {
    /// Terminal status.
    pub status: TestStatus,

    /// Wall-clock duration in milliseconds, as measured by the execution
    /// collaborator. Zero for results that never ran.
    pub duration_ms: f64,

    /// Failures recorded during execution, in occurrence order.
    pub failures: Vec<TestFailure>,

    /// The worker slot the test ran on. `None` for results that never reached
    /// a worker, such as skips.
    pub worker_slot: Option<usize>,
}

impl TestResult {
    /// Creates a skipped result that never reached a worker.
    pub(crate) fn skipped() -> Self {
        Self {
            status: TestStatus::Skipped,
            duration_ms: 0.0,
            failures: Vec::new(),
            worker_slot: None,
        }
    }

    /// Creates an interrupted result for a test aborted mid-flight.
    pub(crate) fn interrupted(duration_ms: f64, worker_slot: usize) -> Self {
        Self {
            status: TestStatus::Interrupted,
            duration_ms,
            failures: Vec::new(),
            worker_slot: Some(worker_slot),
        }
    }
}
