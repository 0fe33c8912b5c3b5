// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Runs Android instrumentation tests on every connected device.
//!
//! composer installs the application and test packages on each device, runs the instrumentation
//! (optionally sharded across devices), and writes per-test logs, screenshots, JUnit reports and
//! a JSON summary to the output directory.

#![warn(missing_docs)]

mod dispatch;
mod errors;
mod output;

#[doc(hidden)]
pub use dispatch::*;
#[doc(hidden)]
pub use errors::*;
