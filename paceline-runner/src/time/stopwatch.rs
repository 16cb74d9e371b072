// Copyright (c) The paceline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tracking elapsed run time.

use chrono::{DateTime, Local};
use std::time::{Duration, Instant};

pub(crate) fn stopwatch() -> StopwatchStart {
    StopwatchStart::new()
}

/// The start of a stopwatch: a wall-clock timestamp paired with a monotonic
/// instant.
#[derive(Clone, Debug)]
pub(crate) struct StopwatchStart {
    start_time: DateTime<Local>,
    instant: Instant,
}

impl StopwatchStart {
    fn new() -> Self {
        Self {
            start_time: Local::now(),
            instant: Instant::now(),
        }
    }

    pub(crate) fn snapshot(&self) -> StopwatchSnapshot {
        StopwatchSnapshot {
            start_time: self.start_time,
            active: self.instant.elapsed(),
        }
    }
}

/// A snapshot of the stopwatch at a point in time.
#[derive(Clone, Debug)]
pub(crate) struct StopwatchSnapshot {
    /// The time at which the stopwatch was started.
    pub(crate) start_time: DateTime<Local>,

    /// The duration for which the stopwatch has been active.
    pub(crate) active: Duration,
}
