// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{Device, DeviceBridge, DeviceProcess, ProcessExit, PullOutcome};
use crate::errors::BridgeError;
use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

const DEVICES_HEADER: &str = "List of devices attached";
const DEVICES_ATTEMPTS: usize = 5;

/// A [`DeviceBridge`] backed by the `adb` command-line tool.
#[derive(Clone, Debug)]
pub struct AdbBridge {
    adb: Utf8PathBuf,
}

impl AdbBridge {
    /// Creates a new bridge using the `adb` binary at `adb`.
    pub fn new(adb: impl Into<Utf8PathBuf>) -> Self {
        Self { adb: adb.into() }
    }

    fn command(&self, device: Option<&str>) -> Command {
        let mut command = Command::new(&self.adb);
        if let Some(device) = device {
            command.arg("-s").arg(device);
        }
        command.stdin(Stdio::null()).kill_on_drop(true);
        command
    }

    /// Runs `adb` to completion, returning its exit status and combined output.
    async fn run(
        &self,
        device: Option<&str>,
        args: &[&str],
    ) -> Result<(ProcessExit, String), BridgeError> {
        let mut command = self.command(device);
        command.args(args);
        let display_cmd = display_command(&self.adb, device, args);
        debug!("running `{display_cmd}`");

        let output = command
            .output()
            .await
            .map_err(|err| BridgeError::Exec {
                command: display_cmd,
                err,
            })?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok((
            ProcessExit {
                code: output.status.code(),
            },
            text,
        ))
    }

    async fn spawn(
        &self,
        device: &str,
        args: &[&str],
        output: &Utf8Path,
    ) -> Result<DeviceProcess, BridgeError> {
        let output_err = |err| BridgeError::OutputFile {
            path: output.to_owned(),
            err,
        };
        let stdout = tokio::fs::File::create(output)
            .await
            .map_err(output_err)?
            .into_std()
            .await;
        let stderr = stdout.try_clone().map_err(output_err)?;

        let mut command = self.command(Some(device));
        command.args(args).stdout(stdout).stderr(stderr);
        let display_cmd = display_command(&self.adb, Some(device), args);
        debug!("spawning `{display_cmd}`, output to {output}");

        let mut child = command.spawn().map_err(|err| BridgeError::Exec {
            command: display_cmd.clone(),
            err,
        })?;

        Ok(DeviceProcess::new(async move {
            let status = child
                .wait()
                .await
                .map_err(|err| BridgeError::Exec { command: display_cmd, err })?;
            Ok(ProcessExit {
                code: status.code(),
            })
        }))
    }
}

#[async_trait]
impl DeviceBridge for AdbBridge {
    async fn devices(&self) -> Result<Vec<Device>, BridgeError> {
        let mut attempt = 1;
        loop {
            let (_, output) = self.run(None, &["devices"]).await?;
            match parse_devices(&output) {
                Ok(devices) => return Ok(devices),
                Err(err) if attempt < DEVICES_ATTEMPTS => {
                    warn!("listing devices failed (attempt {attempt}/{DEVICES_ATTEMPTS}), retrying: {err}");
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn install(&self, device: &str, package: &Utf8Path) -> Result<(), BridgeError> {
        let (_, output) = self
            .run(Some(device), &["install", "-r", package.as_str()])
            .await?;
        if install_succeeded(&output) {
            Ok(())
        } else {
            Err(BridgeError::InstallFailed {
                package: package.to_owned(),
                output,
            })
        }
    }

    async fn shell(&self, device: &str, command: &str) -> Result<String, BridgeError> {
        let (exit, output) = self.run(Some(device), &["shell", command]).await?;
        if exit.success() {
            Ok(output)
        } else {
            Err(BridgeError::CommandFailed {
                command: display_command(&self.adb, Some(device), &["shell", command]),
                exit_code: exit.code,
                output,
            })
        }
    }

    async fn spawn_shell(
        &self,
        device: &str,
        command: &str,
        output: &Utf8Path,
    ) -> Result<DeviceProcess, BridgeError> {
        self.spawn(device, &["shell", command], output).await
    }

    async fn spawn_logcat(
        &self,
        device: &str,
        output: &Utf8Path,
    ) -> Result<DeviceProcess, BridgeError> {
        self.spawn(device, &["logcat"], output).await
    }

    async fn pull_dir(
        &self,
        device: &str,
        remote: &str,
        local: &Utf8Path,
    ) -> Result<PullOutcome, BridgeError> {
        let args = ["pull", remote, local.as_str()];
        let (exit, output) = self.run(Some(device), &args).await?;
        if exit.success() {
            Ok(PullOutcome::Pulled)
        } else if output.contains("does not exist") {
            Ok(PullOutcome::Missing)
        } else {
            Err(BridgeError::CommandFailed {
                command: display_command(&self.adb, Some(device), &args),
                exit_code: exit.code,
                output,
            })
        }
    }
}

/// Parses the output of `adb devices`.
///
/// Every `<serial>\t<state>` line after the header is a device; it's online if its state is
/// `device`.
pub fn parse_devices(output: &str) -> Result<Vec<Device>, BridgeError> {
    let Some((_, list)) = output.split_once(DEVICES_HEADER) else {
        return Err(BridgeError::UnexpectedDevicesOutput {
            output: output.to_owned(),
        });
    };

    let devices = list
        .lines()
        .map(str::trim)
        .filter_map(|line| {
            let (id, state) = line.split_once(char::is_whitespace)?;
            Some(Device {
                id: id.to_owned(),
                online: state.trim() == "device",
            })
        })
        .collect();
    Ok(devices)
}

fn install_succeeded(output: &str) -> bool {
    output
        .lines()
        .map(str::trim)
        .any(|line| line.eq_ignore_ascii_case("success"))
}

fn display_command(adb: &Utf8Path, device: Option<&str>, args: &[&str]) -> String {
    let mut words = vec![adb.as_str()];
    if let Some(device) = device {
        words.extend(["-s", device]);
    }
    words.extend(args);
    shell_words::join(words)
}
