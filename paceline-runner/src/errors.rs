// Copyright (c) The paceline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by paceline-runner.

use crate::{
    partition::ShardSpec,
    plan::{ProjectId, SourceLocation, SourceUnit},
};
use paceline_protocol::MessageParseError;
use std::{borrow::Cow, error, fmt, io, net::SocketAddr};
use thiserror::Error;

/// An error that occurred while parsing a shard specification.
#[derive(Clone, Debug, Error)]
pub struct ShardSpecParseError {
    expected_format: &'static str,
    message: Cow<'static, str>,
}

impl ShardSpecParseError {
    pub(crate) fn new(
        expected_format: &'static str,
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            expected_format,
            message: message.into(),
        }
    }
}

impl fmt::Display for ShardSpecParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "shard specification must be in the format \"{}\"\n(error: {})",
            self.expected_format, self.message
        )
    }
}

/// An error that occurred while parsing a [`MaxFail`](crate::config::MaxFail)
/// input.
#[derive(Clone, Debug, Error)]
#[error("unrecognized value for max-fail: {0}\n(hint: expected either an integer or \"all\")")]
pub struct MaxFailParseError(pub String);

impl MaxFailParseError {
    pub(crate) fn new(input: impl Into<String>) -> Self {
        Self(input.into())
    }
}

/// An error that occurred while parsing a
/// [`WorkerCount`](crate::config::WorkerCount) input.
#[derive(Clone, Debug, Error)]
#[error("unrecognized value for workers: {0}\n(hint: expected either a positive integer or \"auto\")")]
pub struct WorkerCountParseError(pub String);

impl WorkerCountParseError {
    pub(crate) fn new(input: impl Into<String>) -> Self {
        Self(input.into())
    }
}

/// A single structural problem detected while validating a test plan.
#[derive(Clone, Debug)]
pub enum StructuralError {
    /// Two tests in the same source unit share a full title path.
    DuplicateTitle {
        /// The source unit both tests were declared in.
        source_unit: SourceUnit,
        /// The shared title path.
        title: String,
        /// Where the title first appeared.
        first: SourceLocation,
        /// Where it appeared again.
        second: SourceLocation,
    },

    /// A focus marker was found while focus markers are forbidden.
    FocusedItem {
        /// Title path of the focused item.
        title: String,
        /// Declaration site, if the item is a test.
        location: Option<SourceLocation>,
    },
}

impl fmt::Display for StructuralError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StructuralError::DuplicateTitle {
                source_unit,
                title,
                first,
                second,
            } => {
                write!(
                    f,
                    "duplicate title \"{title}\" in {source_unit}: first declared at {first}, declared again at {second}"
                )
            }
            StructuralError::FocusedItem { title, location } => {
                write!(f, "focus marker on \"{title}\"")?;
                if let Some(location) = location {
                    write!(f, " at {location}")?;
                }
                Ok(())
            }
        }
    }
}

impl error::Error for StructuralError {}

/// Every structural problem found in a test plan, collected up front and
/// reported once.
///
/// Structural validation short-circuits the run before global setup: no test
/// executes when this error is returned.
#[derive(Clone, Debug)]
pub struct StructuralErrors {
    errors: Vec<StructuralError>,
}

impl StructuralErrors {
    pub(crate) fn new(errors: Vec<StructuralError>) -> Self {
        debug_assert!(!errors.is_empty(), "at least one error must be present");
        Self { errors }
    }

    /// Number of problems found.
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Whether the list is empty. Always false in practice.
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Iterates over the individual problems in source order.
    pub fn iter(&self) -> impl Iterator<Item = &StructuralError> + '_ {
        self.errors.iter()
    }
}

impl fmt::Display for StructuralErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.errors.len() == 1 {
            return fmt::Display::fmt(&self.errors[0], f);
        }
        write!(f, "{} structural problems found:", self.errors.len())?;
        for error in &self.errors {
            write!(f, "\n  - {error}")?;
        }
        Ok(())
    }
}

impl error::Error for StructuralErrors {}

/// A configuration combination the runner refuses to execute.
///
/// These are fatal: the run aborts before global setup with zero tests
/// executed, and the condition is never silently corrected.
#[derive(Clone, Debug, Error)]
pub enum ConfigIncompatibility {
    /// Remote coordination was requested with more than one worker.
    #[error("remote coordination requires exactly 1 worker, but {requested} were requested")]
    RemoteRequiresSingleWorker {
        /// The resolved worker count.
        requested: usize,
    },

    /// Remote coordination was combined with sharding.
    #[error("remote coordination cannot be combined with sharding (shard {shard} requested)")]
    RemoteForbidsSharding {
        /// The requested shard.
        shard: ShardSpec,
    },

    /// Remote coordination was requested against a plan spanning several
    /// projects.
    #[error(
        "remote coordination requires a single project, but the plan spans {}",
        display_projects(.projects)
    )]
    RemoteRequiresSingleProject {
        /// The projects found in the plan, in first-seen order.
        projects: Vec<ProjectId>,
    },
}

fn display_projects(projects: &[ProjectId]) -> String {
    let names: Vec<_> = projects.iter().map(ProjectId::as_str).collect();
    format!("{} projects ({})", projects.len(), names.join(", "))
}

/// An error that occurred while building a
/// [`TestRunner`](crate::runner::TestRunner).
#[derive(Debug, Error)]
pub enum RunnerBuildError {
    /// The requested configuration is incompatible with itself.
    #[error(transparent)]
    Incompatible(#[from] ConfigIncompatibility),

    /// The test plan failed structural validation.
    #[error(transparent)]
    Structural(#[from] StructuralErrors),

    /// Creating the tokio runtime failed.
    #[error("error creating tokio runtime")]
    RuntimeCreate(#[source] io::Error),

    /// Registering signal handlers failed.
    #[error("error setting up signal handler")]
    SignalHandlerSetup(#[source] io::Error),
}

/// An error on the coordinator channel.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// Connecting to the coordinator's TCP endpoint failed.
    #[error("failed to connect to coordinator at {address}")]
    Connect {
        /// The address that was dialed.
        address: SocketAddr,
        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// Reading from the channel failed.
    #[error("failed to read from the coordinator channel")]
    Read(#[source] io::Error),

    /// Writing to the channel failed.
    #[error("failed to write to the coordinator channel")]
    Write(#[source] io::Error),

    /// Serializing an outbound message failed.
    #[error("failed to encode an outbound message")]
    Encode(#[source] serde_json::Error),

    /// An inbound line did not parse as a coordinator message.
    #[error("malformed coordinator message")]
    Malformed(#[source] MessageParseError),

    /// The first inbound message was not `init`.
    #[error("expected an init message to open the session, received {received:?}")]
    HandshakeExpectedInit {
        /// The line that was received instead.
        received: String,
    },

    /// The channel closed before the handshake completed.
    #[error("coordinator channel closed during the handshake")]
    ClosedDuringHandshake,
}

/// An error returned by [`TestRunner::execute`](crate::runner::TestRunner::execute).
///
/// Failures after the run is underway are reported through run events and the
/// final run status instead; this error covers problems that prevent the run
/// from starting at all.
#[derive(Debug, Error)]
pub enum ExecuteError {
    /// Establishing the coordinator session failed.
    #[error("failed to establish the coordinator session")]
    Coordinator(#[from] CoordinatorError),
}

/// Displays an error along with its entire source chain, one `caused by` line
/// per link.
pub struct DisplayErrorChain<'a>(&'a dyn error::Error);

impl<'a> DisplayErrorChain<'a> {
    /// Creates a new display wrapper around an error.
    pub fn new(error: &'a dyn error::Error) -> Self {
        Self(error)
    }
}

impl fmt::Display for DisplayErrorChain<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)?;
        let mut source = self.0.source();
        while let Some(error) = source {
            write!(f, "\n  caused by: {error}")?;
            source = error.source();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_error_chain_includes_sources() {
        let inner = io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed");
        let error = CoordinatorError::Read(inner);
        let chain = DisplayErrorChain::new(&error).to_string();
        assert_eq!(
            chain,
            "failed to read from the coordinator channel\n  caused by: pipe closed"
        );
    }

    #[test]
    fn structural_errors_display_single_and_multiple() {
        let one = StructuralErrors::new(vec![StructuralError::FocusedItem {
            title: "a › b".to_owned(),
            location: None,
        }]);
        assert_eq!(one.to_string(), "focus marker on \"a › b\"");

        let two = StructuralErrors::new(vec![
            StructuralError::FocusedItem {
                title: "a".to_owned(),
                location: None,
            },
            StructuralError::FocusedItem {
                title: "b".to_owned(),
                location: Some(SourceLocation::new("x.test.ts", 4, 2)),
            },
        ]);
        let message = two.to_string();
        assert!(message.starts_with("2 structural problems found:"));
        assert!(message.contains("focus marker on \"b\" at x.test.ts:4:2"));
    }
}
