// Copyright (c) The paceline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use thiserror::Error;

/// An error returned while parsing a single message line off the channel.
///
/// Carries the offending line so the runner can log it verbatim.
#[derive(Debug, Error)]
#[error("invalid coordinator channel message: {line:?}")]
pub struct MessageParseError {
    line: String,
    #[source]
    source: serde_json::Error,
}

impl MessageParseError {
    pub(crate) fn new(line: impl Into<String>, source: serde_json::Error) -> Self {
        Self {
            line: line.into(),
            source,
        }
    }

    /// Returns the line as received, without the trailing newline.
    pub fn line(&self) -> &str {
        &self.line
    }
}
