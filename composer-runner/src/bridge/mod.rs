// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Talking to devices.
//!
//! Everything composer does on a device goes through a [`DeviceBridge`]. [`AdbBridge`] implements
//! it with the `adb` command-line tool; tests use in-memory implementations.

mod aapt;
mod adb;

pub use aapt::*;
pub use adb::*;

use crate::errors::BridgeError;
use async_trait::async_trait;
use camino::Utf8Path;
use futures::{FutureExt, future::BoxFuture};
use std::{fmt, future::Future};

/// A device reported by the transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Device {
    /// The serial number of the device.
    pub id: String,

    /// Whether the device is ready to accept commands.
    pub online: bool,
}

/// The result of copying a directory from a device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PullOutcome {
    /// The directory was copied.
    Pulled,

    /// The directory doesn't exist on the device.
    Missing,
}

/// How a device process exited.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProcessExit {
    /// The exit code, or `None` if the process was terminated by a signal.
    pub code: Option<i32>,
}

impl ProcessExit {
    /// Returns true if the process exited with code 0.
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// A process running on behalf of a device, with its output redirected to a file.
///
/// Dropping a `DeviceProcess` kills the process.
pub struct DeviceProcess {
    wait: BoxFuture<'static, Result<ProcessExit, BridgeError>>,
}

impl DeviceProcess {
    /// Creates a new `DeviceProcess` from a future that resolves when the process exits.
    pub fn new<F>(wait: F) -> Self
    where
        F: Future<Output = Result<ProcessExit, BridgeError>> + Send + 'static,
    {
        Self { wait: wait.boxed() }
    }

    /// Creates a `DeviceProcess` that has already exited.
    pub fn exited(exit: ProcessExit) -> Self {
        Self::new(futures::future::ready(Ok(exit)))
    }

    /// Waits for the process to exit.
    pub async fn wait(self) -> Result<ProcessExit, BridgeError> {
        self.wait.await
    }
}

impl fmt::Debug for DeviceProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceProcess").finish_non_exhaustive()
    }
}

/// The device transport.
#[async_trait]
pub trait DeviceBridge: fmt::Debug + Send + Sync {
    /// Lists attached devices, online or not.
    async fn devices(&self) -> Result<Vec<Device>, BridgeError>;

    /// Installs (or reinstalls) a package.
    async fn install(&self, device: &str, package: &Utf8Path) -> Result<(), BridgeError>;

    /// Runs a shell command to completion and returns its output.
    async fn shell(&self, device: &str, command: &str) -> Result<String, BridgeError>;

    /// Starts a shell command, writing its output to `output`.
    ///
    /// `output` is created (or truncated) before this returns.
    async fn spawn_shell(
        &self,
        device: &str,
        command: &str,
        output: &Utf8Path,
    ) -> Result<DeviceProcess, BridgeError>;

    /// Starts streaming the device log to `output`.
    ///
    /// `output` is created (or truncated) before this returns.
    async fn spawn_logcat(&self, device: &str, output: &Utf8Path)
    -> Result<DeviceProcess, BridgeError>;

    /// Copies the contents of the device directory `remote` into `local`, which must not exist
    /// yet. Its parent directory must exist.
    async fn pull_dir(
        &self,
        device: &str,
        remote: &str,
        local: &Utf8Path,
    ) -> Result<PullOutcome, BridgeError>;
}

/// A bridge with no devices, where every directory is missing.
#[cfg(test)]
#[derive(Debug)]
pub(crate) struct NullBridge;

#[cfg(test)]
#[async_trait]
impl DeviceBridge for NullBridge {
    async fn devices(&self) -> Result<Vec<Device>, BridgeError> {
        Ok(Vec::new())
    }

    async fn install(&self, _device: &str, _package: &Utf8Path) -> Result<(), BridgeError> {
        Ok(())
    }

    async fn shell(&self, _device: &str, _command: &str) -> Result<String, BridgeError> {
        Ok(String::new())
    }

    async fn spawn_shell(
        &self,
        _device: &str,
        _command: &str,
        _output: &Utf8Path,
    ) -> Result<DeviceProcess, BridgeError> {
        Ok(DeviceProcess::exited(ProcessExit { code: Some(0) }))
    }

    async fn spawn_logcat(
        &self,
        _device: &str,
        _output: &Utf8Path,
    ) -> Result<DeviceProcess, BridgeError> {
        Ok(DeviceProcess::exited(ProcessExit { code: Some(0) }))
    }

    async fn pull_dir(
        &self,
        _device: &str,
        _remote: &str,
        _local: &Utf8Path,
    ) -> Result<PullOutcome, BridgeError> {
        Ok(PullOutcome::Missing)
    }
}
