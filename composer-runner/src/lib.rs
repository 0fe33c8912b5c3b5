// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core functionality for composer, a runner for instrumentation tests on one or more attached
//! devices.
//!
//! The basic flow of operations is:
//!
//! 1. The [`fleet`] orchestrator discovers devices through a [`bridge::DeviceBridge`] and selects
//!    the ones to run on.
//! 2. One [`pipeline::DevicePipeline`] per device installs the packages, starts the
//!    instrumentation and joins three sources: the [`instrumentation`] stream, the [`logcat`]
//!    correlator and the process exit.
//! 3. Per-device results are merged into [`suite::Suite`]s, which the [`reporter`] writes out.

pub mod artifacts;
pub mod bridge;
pub mod config;
pub mod errors;
pub mod fleet;
pub mod helpers;
pub mod instrumentation;
pub mod logcat;
pub mod pipeline;
pub mod plan;
pub mod reporter;
pub mod suite;
pub mod tail;
mod time;

