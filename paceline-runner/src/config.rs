// Copyright (c) The paceline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Run configuration knobs.

use crate::errors::{MaxFailParseError, WorkerCountParseError};
use std::{fmt, num::NonZeroUsize, str::FromStr};

/// Type for the max-fail flag.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MaxFail {
    /// Allow a specific number of tests to fail before stopping the run.
    Count(usize),

    /// Run all tests regardless of failures.
    All,
}

impl MaxFail {
    /// Returns true if the max-fail has been exceeded.
    pub fn is_exceeded(&self, failed: usize) -> bool {
        match self {
            Self::Count(n) => failed >= *n,
            Self::All => false,
        }
    }
}

impl FromStr for MaxFail {
    type Err = MaxFailParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.to_lowercase() == "all" {
            return Ok(Self::All);
        }

        match s.parse::<isize>() {
            Err(e) => Err(MaxFailParseError::new(format!("Error: {e} parsing {s}"))),
            Ok(j) if j <= 0 => Err(MaxFailParseError::new("max-fail may not be <= 0")),
            Ok(j) => Ok(MaxFail::Count(j as usize)),
        }
    }
}

impl fmt::Display for MaxFail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::Count(n) => write!(f, "{n}"),
        }
    }
}

/// Type for the worker-count flag.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum WorkerCount {
    /// A specific number of workers.
    Count(usize),

    /// One worker per available logical CPU.
    #[default]
    Auto,
}

impl WorkerCount {
    /// Resolves to a concrete count of at least 1.
    pub fn resolve(self) -> usize {
        match self {
            Self::Count(n) => n.max(1),
            Self::Auto => std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1),
        }
    }
}

impl FromStr for WorkerCount {
    type Err = WorkerCountParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.to_lowercase() == "auto" {
            return Ok(Self::Auto);
        }

        match s.parse::<isize>() {
            Err(e) => Err(WorkerCountParseError::new(format!("Error: {e} parsing {s}"))),
            Ok(j) if j <= 0 => Err(WorkerCountParseError::new("workers may not be <= 0")),
            Ok(j) => Ok(WorkerCount::Count(j as usize)),
        }
    }
}

impl fmt::Display for WorkerCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Count(n) => write!(f, "{n}"),
        }
    }
}
