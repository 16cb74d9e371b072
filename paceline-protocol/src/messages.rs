// Copyright (c) The paceline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Message shapes for the coordination channel.
//!
//! Every message travels as one line of JSON terminated by `\n`. The
//! coordinator writes [`CoordinatorMessage`]s, the runner writes
//! [`RunnerMessage`]s; neither side pipelines, so at most one message per
//! direction is in flight at a time.

use crate::errors::MessageParseError;
use serde::{Deserialize, Serialize};

/// A message sent by the coordinator to the runner.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinatorMessage {
    /// Opens the session. Sent exactly once, before anything else.
    Init(InitMessage),

    /// Names the next test case to run, by manifest id.
    TestCase(TestCaseRef),
}

impl CoordinatorMessage {
    /// Parses one line of the channel, without its trailing newline.
    pub fn from_line(line: &str) -> Result<Self, MessageParseError> {
        serde_json::from_str(line).map_err(|error| MessageParseError::new(line, error))
    }

    /// Renders the message as a single JSON line, without a trailing newline.
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Session parameters supplied by the coordinator before any test runs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InitMessage {
    /// Opaque metadata the runner echoes back in its manifest.
    pub init_meta: serde_json::Value,

    /// When true, the runner completes immediately without running any
    /// tests. Used by coordinators that only needed the handshake.
    #[serde(default)]
    pub fast_exit: bool,
}

/// A reference to a single schedulable test, as listed in the manifest.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCaseRef {
    /// The id the manifest listed for this test.
    pub id: String,
}

/// A message sent by the runner to the coordinator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerMessage {
    /// Acknowledges `init`. The first message the runner writes.
    InitSuccess(InitSuccessMessage),

    /// The full set of runnable tests. Sent only when the coordinator asked
    /// for manifest generation.
    Manifest(ManifestMessage),

    /// The outcome of one dispatched test case. Written before the next
    /// inbound message is read.
    TestResult(TestResultMessage),
}

impl RunnerMessage {
    /// Parses one line of the channel, without its trailing newline.
    pub fn from_line(line: &str) -> Result<Self, MessageParseError> {
        serde_json::from_str(line).map_err(|error| MessageParseError::new(line, error))
    }

    /// Renders the message as a single JSON line, without a trailing newline.
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// The payload of [`RunnerMessage::InitSuccess`]. Carries no data; encoded
/// as an empty object.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitSuccessMessage {}

/// The manifest of runnable tests, nested the way the source tree groups
/// them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ManifestMessage {
    /// Top-level members, in scheduling order.
    pub members: Vec<ManifestMember>,

    /// The `init_meta` supplied at session start, echoed back unchanged.
    pub init_meta: serde_json::Value,
}

/// One entry in the manifest: a named group of tests, or a single test.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ManifestMember {
    /// A named collection of members.
    Group(GroupMember),

    /// A single schedulable test.
    Test(TestMember),
}

/// A named collection of manifest members.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GroupMember {
    /// Display name of the group.
    pub name: String,

    /// `@tag` tokens that apply to every member.
    pub tags: Vec<String>,

    /// Opaque metadata for the coordinator's consumption.
    pub meta: serde_json::Value,

    /// Nested members, in scheduling order.
    pub members: Vec<ManifestMember>,
}

/// A single schedulable test in the manifest.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TestMember {
    /// The id to hand back in a `test_case` message to run this test.
    pub id: String,

    /// `@tag` tokens extracted from the test title.
    pub tags: Vec<String>,

    /// Opaque metadata for the coordinator's consumption.
    pub meta: serde_json::Value,
}

/// The outcome of one dispatched test case.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TestResultMessage {
    /// Final status of the test.
    pub status: WireStatus,

    /// The id the coordinator dispatched.
    pub id: String,

    /// Human-readable name: the full title path of the test.
    pub display_name: String,

    /// Combined failure output. Empty for tests that produced no errors.
    pub output: String,

    /// Wall-clock runtime in nanoseconds.
    pub runtime_ns: u64,

    /// Opaque metadata for the coordinator's consumption.
    pub meta: serde_json::Value,
}

/// Test status vocabulary of the wire protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireStatus {
    /// The test ran to completion and passed.
    Success,

    /// The test ran to completion and failed.
    Failure,

    /// No pass/fail verdict could be produced (harness fault or interrupt).
    Error,

    /// The test was skipped without running.
    Skipped,

    /// The test exceeded its time allowance.
    TimedOut,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test]
    fn parse_init() {
        let msg = CoordinatorMessage::from_line(
            r#"{"init":{"init_meta":{"suite":"checkout"},"fast_exit":false}}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            CoordinatorMessage::Init(InitMessage {
                init_meta: serde_json::json!({"suite": "checkout"}),
                fast_exit: false,
            })
        );
    }

    #[test]
    fn parse_init_defaults_fast_exit() {
        let msg = CoordinatorMessage::from_line(r#"{"init":{"init_meta":{}}}"#).unwrap();
        let CoordinatorMessage::Init(init) = msg else {
            panic!("expected init, got {msg:?}");
        };
        assert!(!init.fast_exit);
    }

    #[test]
    fn parse_test_case() {
        let msg = CoordinatorMessage::from_line(r#"{"test_case":{"id":"t-42"}}"#).unwrap();
        assert_eq!(
            msg,
            CoordinatorMessage::TestCase(TestCaseRef { id: "t-42".into() })
        );
    }

    #[test]
    fn parse_error_carries_line() {
        let error = CoordinatorMessage::from_line("not json").unwrap_err();
        assert_eq!(error.line(), "not json");
    }

    #[test]
    fn render_init_success() {
        let line = RunnerMessage::InitSuccess(InitSuccessMessage {})
            .to_line()
            .unwrap();
        assert_eq!(line, r#"{"init_success":{}}"#);
    }

    #[test]
    fn render_manifest() {
        let manifest = RunnerMessage::Manifest(ManifestMessage {
            members: vec![ManifestMember::Group(GroupMember {
                name: "cart.test.ts".into(),
                tags: vec![],
                meta: serde_json::json!({}),
                members: vec![ManifestMember::Test(TestMember {
                    id: "t-1".into(),
                    tags: vec!["@smoke".into()],
                    meta: serde_json::json!({}),
                })],
            })],
            init_meta: serde_json::json!({"suite": "checkout"}),
        });
        assert_eq!(
            manifest.to_line().unwrap(),
            r#"{"manifest":{"members":[{"type":"group","name":"cart.test.ts","tags":[],"meta":{},"members":[{"type":"test","id":"t-1","tags":["@smoke"],"meta":{}}]}],"init_meta":{"suite":"checkout"}}}"#,
        );
    }

    #[test]
    fn render_test_result() {
        let result = RunnerMessage::TestResult(TestResultMessage {
            status: WireStatus::Failure,
            id: "t-1".into(),
            display_name: "cart › adds item".into(),
            output: "\nexpected 2, got 3".into(),
            runtime_ns: 1_500_000,
            meta: serde_json::json!({}),
        });
        assert_eq!(
            result.to_line().unwrap(),
            r#"{"test_result":{"status":"failure","id":"t-1","display_name":"cart › adds item","output":"\nexpected 2, got 3","runtime_ns":1500000,"meta":{}}}"#,
        );
    }

    #[test_case(WireStatus::Success, "success")]
    #[test_case(WireStatus::Failure, "failure")]
    #[test_case(WireStatus::Error, "error")]
    #[test_case(WireStatus::Skipped, "skipped")]
    #[test_case(WireStatus::TimedOut, "timed_out")]
    fn wire_status_render(status: WireStatus, expected: &str) {
        assert_eq!(
            serde_json::to_string(&status).unwrap(),
            format!("\"{expected}\"")
        );
        assert_eq!(
            serde_json::from_str::<WireStatus>(&format!("\"{expected}\"")).unwrap(),
            status
        );
    }

    #[test]
    fn runner_message_round_trips_through_from_line() {
        let line = RunnerMessage::TestResult(TestResultMessage {
            status: WireStatus::Success,
            id: "t-9".into(),
            display_name: "suite › case".into(),
            output: String::new(),
            runtime_ns: 42,
            meta: serde_json::json!({}),
        })
        .to_line()
        .unwrap();
        let parsed = RunnerMessage::from_line(&line).unwrap();
        let RunnerMessage::TestResult(result) = parsed else {
            panic!("expected test_result, got {parsed:?}");
        };
        assert_eq!(result.id, "t-9");
        assert_eq!(result.runtime_ns, 42);
    }
}
