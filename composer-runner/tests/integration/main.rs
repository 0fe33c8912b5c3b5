// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Runs whole fleets of fake devices through composer-runner.

mod fixtures;
mod fleet;
