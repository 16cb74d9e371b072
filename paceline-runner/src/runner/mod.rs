// Copyright (c) The paceline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The test runner.
//!
//! The main structure in this module is [`TestRunner`].

mod dispatcher;
mod executor;
mod imp;
mod internal_events;
mod remote;
mod source;

pub use executor::*;
pub use imp::*;
