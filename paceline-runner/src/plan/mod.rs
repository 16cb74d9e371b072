// Copyright (c) The paceline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test plans: the discovery output the scheduler consumes.
//!
//! Discovery (out of scope for this crate) produces a [`Suite`] tree of
//! [`TestCase`]s; a [`TestPlan`] wraps that tree and offers the operations the
//! rest of the crate builds on: iteration, structural validation, and
//! restriction to an id set.

mod case;
mod suite;
mod test_plan;

pub use case::*;
pub use suite::*;
pub use test_plan::*;
