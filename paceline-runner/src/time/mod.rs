// Copyright (c) The paceline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Time-related utilities.

mod stopwatch;

pub(crate) use stopwatch::*;
