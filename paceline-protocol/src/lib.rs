// Copyright (c) The paceline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Wire types for the paceline remote-coordination channel.
//!
//! A paceline runner in remote-coordinated mode hands control of run order to
//! an external coordinator. The two sides exchange newline-delimited JSON
//! messages: the coordinator opens the session with `init`, then names one
//! test case at a time; the runner answers with its manifest and a result per
//! dispatched test. This crate defines those message shapes so coordinators
//! and other tooling can speak the protocol without depending on the runner
//! itself.
//!
//! The runner side of the channel lives in `paceline-runner`.

mod errors;
mod messages;
mod tags;

pub use errors::*;
pub use messages::*;
pub use tags::*;
