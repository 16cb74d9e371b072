// Copyright (c) The paceline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Scheduling and dispatch for paceline test runs.
//!
//! This crate turns a discovered test plan into schedulable groups, partitions
//! them across shards, and dispatches them to a pool of worker slots. Order
//! either comes from the plan itself or is handed over to a remote coordinator
//! speaking the [`paceline_protocol`] line protocol.
//!
//! The entry point is [`runner::TestRunnerBuilder`].

pub mod config;
pub mod coordinator;
pub mod errors;
pub mod groups;
pub mod partition;
pub mod plan;
pub mod reporter;
pub mod runner;
pub mod signal;
mod time;
