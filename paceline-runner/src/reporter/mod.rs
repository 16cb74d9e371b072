// Copyright (c) The paceline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Run events and statistics.
//!
//! Rendering events for humans or CI systems is the business of reporter
//! implementations layered on top of this crate; the runner itself only
//! produces the event stream.

pub mod events;

pub use events::*;
