// Copyright (c) The paceline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The coordinator session: endpoints, the handshake, and the line-oriented
//! message channel.
//!
//! Messages travel as JSON lines, [`paceline_protocol`] shapes on the wire.
//! The runner never reads and writes concurrently: it answers one inbound
//! message at a time.

use crate::{
    errors::CoordinatorError,
    groups::{GroupKind, TestGroup},
};
use debug_ignore::DebugIgnore;
use indexmap::IndexMap;
use paceline_protocol::{
    CoordinatorMessage, GroupMember, InitMessage, InitSuccessMessage, ManifestMember,
    ManifestMessage, RunnerMessage, TestMember, extract_tags,
};
use std::net::SocketAddr;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf, WriteHalf},
    net::TcpStream,
};
use tracing::debug;

/// A bidirectional byte stream usable as a coordinator channel.
///
/// Implemented for every type that is both [`AsyncRead`] and [`AsyncWrite`],
/// so TCP streams, Unix sockets and in-memory pipes all qualify.
pub trait DuplexIo: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> DuplexIo for T {}

/// Where to reach the coordinator.
#[derive(Debug)]
pub enum CoordinatorEndpoint {
    /// Dial a TCP address.
    Tcp(SocketAddr),

    /// Use an already-established stream.
    Io(DebugIgnore<Box<dyn DuplexIo>>),
}

impl CoordinatorEndpoint {
    /// Wraps an established stream, for transports other than TCP.
    pub fn io(io: impl DuplexIo + 'static) -> Self {
        Self::Io(DebugIgnore(Box::new(io)))
    }
}

/// Options for handing scheduling order over to a remote coordinator.
#[derive(Debug)]
pub struct RemoteOptions {
    pub(crate) endpoint: CoordinatorEndpoint,
    pub(crate) generate_manifest: bool,
}

impl RemoteOptions {
    /// Creates options for the given endpoint.
    pub fn new(endpoint: CoordinatorEndpoint) -> Self {
        Self {
            endpoint,
            generate_manifest: false,
        }
    }

    /// Requests a manifest-generation session: after the handshake the
    /// runner sends its manifest of runnable tests and completes without
    /// executing any.
    pub fn set_generate_manifest(&mut self, generate_manifest: bool) -> &mut Self {
        self.generate_manifest = generate_manifest;
        self
    }
}

/// An established coordinator session.
///
/// By the time a connection is handed out the handshake has happened:
/// [`connect`](Self::connect) consumed the `init` message and acknowledged
/// it.
pub(crate) struct CoordinatorConnection {
    reader: BufReader<ReadHalf<Box<dyn DuplexIo>>>,
    writer: WriteHalf<Box<dyn DuplexIo>>,
}

impl std::fmt::Debug for CoordinatorConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoordinatorConnection").finish_non_exhaustive()
    }
}

impl CoordinatorConnection {
    /// Establishes the session and performs the handshake. The first inbound
    /// message must be `init`; anything else fails the session.
    pub(crate) async fn connect(
        endpoint: CoordinatorEndpoint,
    ) -> Result<(Self, InitMessage), CoordinatorError> {
        let io: Box<dyn DuplexIo> = match endpoint {
            CoordinatorEndpoint::Tcp(address) => {
                let stream = TcpStream::connect(address)
                    .await
                    .map_err(|error| CoordinatorError::Connect { address, error })?;
                Box::new(stream)
            }
            CoordinatorEndpoint::Io(io) => io.0,
        };
        let (read_half, writer) = tokio::io::split(io);
        let mut conn = Self {
            reader: BufReader::new(read_half),
            writer,
        };

        let Some(line) = conn.next_line().await? else {
            return Err(CoordinatorError::ClosedDuringHandshake);
        };
        let init = match CoordinatorMessage::from_line(&line)
            .map_err(CoordinatorError::Malformed)?
        {
            CoordinatorMessage::Init(init) => init,
            CoordinatorMessage::TestCase(_) => {
                return Err(CoordinatorError::HandshakeExpectedInit { received: line });
            }
        };
        conn.send(&RunnerMessage::InitSuccess(InitSuccessMessage {}))
            .await?;
        debug!(fast_exit = init.fast_exit, "coordinator session established");
        Ok((conn, init))
    }

    /// The next inbound message, or `None` once the coordinator has closed
    /// the channel.
    pub(crate) async fn next_message(
        &mut self,
    ) -> Result<Option<CoordinatorMessage>, CoordinatorError> {
        match self.next_line().await? {
            Some(line) => {
                let message =
                    CoordinatorMessage::from_line(&line).map_err(CoordinatorError::Malformed)?;
                Ok(Some(message))
            }
            None => Ok(None),
        }
    }

    /// Writes one message and flushes it.
    pub(crate) async fn send(&mut self, message: &RunnerMessage) -> Result<(), CoordinatorError> {
        let mut line = message.to_line().map_err(CoordinatorError::Encode)?;
        line.push('\n');
        self.writer
            .write_all(line.as_bytes())
            .await
            .map_err(CoordinatorError::Write)?;
        self.writer.flush().await.map_err(CoordinatorError::Write)
    }

    /// The next non-blank line, without its terminator. `None` on a clean
    /// close.
    async fn next_line(&mut self) -> Result<Option<String>, CoordinatorError> {
        loop {
            let mut line = String::new();
            let read = self
                .reader
                .read_line(&mut line)
                .await
                .map_err(CoordinatorError::Read)?;
            if read == 0 {
                return Ok(None);
            }
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            return Ok(Some(line.to_owned()));
        }
    }
}

/// Builds the manifest for a manifest-generation session: one group per
/// source unit, one test entry per schedulable group, in scheduling order.
///
/// Setup groups are queued automatically when their project is first
/// requested, so they are never listed. The `init_meta` from the handshake is
/// echoed back unchanged.
pub(crate) fn build_manifest(
    groups: &[TestGroup],
    init_meta: serde_json::Value,
) -> ManifestMessage {
    let mut by_unit: IndexMap<String, Vec<ManifestMember>> = IndexMap::new();
    for group in groups {
        if group.kind == GroupKind::Setup {
            continue;
        }
        let first = group.tests.first().expect("a test group is never empty");
        by_unit
            .entry(group.source_unit.to_string())
            .or_default()
            .push(ManifestMember::Test(TestMember {
                id: first.id.to_string(),
                tags: extract_tags(&first.display_name()),
                meta: serde_json::json!({}),
            }));
    }
    let members = by_unit
        .into_iter()
        .map(|(name, members)| {
            ManifestMember::Group(GroupMember {
                name,
                tags: Vec::new(),
                meta: serde_json::json!({}),
                members,
            })
        })
        .collect();
    ManifestMessage { members, init_meta }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{ProjectId, SourceLocation, SourceUnit, TestCase, WorkerFingerprint};
    use pretty_assertions::assert_eq;

    async fn read_reply(far: &mut (impl AsyncRead + Unpin)) -> RunnerMessage {
        let mut reader = BufReader::new(far);
        let mut line = String::new();
        reader
            .read_line(&mut line)
            .await
            .expect("reply line available");
        RunnerMessage::from_line(line.trim()).expect("reply parses")
    }

    #[tokio::test]
    async fn handshake_acknowledges_init() {
        let (near, mut far) = tokio::io::duplex(1024);
        far.write_all(b"{\"init\":{\"init_meta\":{\"session\":7},\"fast_exit\":false}}\n")
            .await
            .expect("init written");

        let (_conn, init) = CoordinatorConnection::connect(CoordinatorEndpoint::io(near))
            .await
            .expect("handshake succeeds");
        assert_eq!(init.init_meta, serde_json::json!({"session": 7}));
        assert!(!init.fast_exit);

        let reply = read_reply(&mut far).await;
        assert!(matches!(reply, RunnerMessage::InitSuccess(_)));
    }

    #[tokio::test]
    async fn handshake_skips_blank_lines() {
        let (near, mut far) = tokio::io::duplex(1024);
        far.write_all(b"\n\r\n{\"init\":{\"init_meta\":null,\"fast_exit\":true}}\n")
            .await
            .expect("init written");

        let (_conn, init) = CoordinatorConnection::connect(CoordinatorEndpoint::io(near))
            .await
            .expect("handshake succeeds");
        assert!(init.fast_exit);
    }

    #[tokio::test]
    async fn handshake_rejects_a_non_init_opening() {
        let (near, mut far) = tokio::io::duplex(1024);
        far.write_all(b"{\"test_case\":{\"id\":\"t1\"}}\n")
            .await
            .expect("line written");

        let error = CoordinatorConnection::connect(CoordinatorEndpoint::io(near))
            .await
            .expect_err("handshake must fail");
        assert_eq!(
            error.to_string(),
            "expected an init message to open the session, \
             received \"{\\\"test_case\\\":{\\\"id\\\":\\\"t1\\\"}}\""
        );
    }

    #[tokio::test]
    async fn handshake_fails_on_a_closed_channel() {
        let (near, far) = tokio::io::duplex(1024);
        drop(far);

        let error = CoordinatorConnection::connect(CoordinatorEndpoint::io(near))
            .await
            .expect_err("handshake must fail");
        assert!(matches!(error, CoordinatorError::ClosedDuringHandshake));
    }

    #[tokio::test]
    async fn malformed_inbound_line_is_an_error() {
        let (near, mut far) = tokio::io::duplex(1024);
        far.write_all(b"{\"init\":{\"init_meta\":null,\"fast_exit\":false}}\nnot json\n")
            .await
            .expect("lines written");

        let (mut conn, _init) = CoordinatorConnection::connect(CoordinatorEndpoint::io(near))
            .await
            .expect("handshake succeeds");
        let error = conn.next_message().await.expect_err("malformed line");
        assert!(matches!(error, CoordinatorError::Malformed(_)));
    }

    fn group_with(id: &str, title: &str, unit: &str, kind: GroupKind) -> TestGroup {
        TestGroup {
            fingerprint: WorkerFingerprint::new(""),
            source_unit: SourceUnit::new(unit),
            repeat_index: 0,
            project: ProjectId::new("default"),
            kind,
            tests: vec![TestCase::new(
                id,
                vec![title.to_owned()],
                SourceLocation::new(unit, 1, 1),
            )],
        }
    }

    #[test]
    fn manifest_groups_by_source_unit_and_skips_setups() {
        let groups = vec![
            group_with("a1", "checkout @smoke", "a.test.ts", GroupKind::General),
            group_with("s1", "prepare db", "setup.ts", GroupKind::Setup),
            group_with("a2", "refunds", "a.test.ts", GroupKind::Parallel),
            group_with("b1", "search", "b.test.ts", GroupKind::General),
        ];

        let manifest = build_manifest(&groups, serde_json::json!({"token": "abc"}));
        assert_eq!(manifest.init_meta, serde_json::json!({"token": "abc"}));
        assert_eq!(manifest.members.len(), 2);

        let ManifestMember::Group(a) = &manifest.members[0] else {
            panic!("expected a group member");
        };
        assert_eq!(a.name, "a.test.ts");
        assert_eq!(a.members.len(), 2);
        let ManifestMember::Test(first) = &a.members[0] else {
            panic!("expected a test member");
        };
        assert_eq!(first.id, "a1");
        assert_eq!(first.tags, vec!["@smoke".to_owned()]);

        let ManifestMember::Group(b) = &manifest.members[1] else {
            panic!("expected a group member");
        };
        assert_eq!(b.name, "b.test.ts");
        assert_eq!(b.members.len(), 1);
    }
}
