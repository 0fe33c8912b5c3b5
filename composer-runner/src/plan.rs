// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! What to run, and where.
//!
//! A [`TestPlan`] is built once from the command line and configuration, then shared by every
//! device pipeline.

use crate::errors::InstrumentationArgumentsError;
use camino::Utf8PathBuf;
use std::time::Duration;

const ORCHESTRATOR_COMPONENT: &str =
    "android.support.test.orchestrator/android.support.test.orchestrator.AndroidTestOrchestrator";
const TEST_SERVICES_PACKAGE: &str = "android.support.test.services";
const SHELL_MAIN_CLASS: &str = "android.support.test.services.shellexecutor.ShellMain";

/// The settings shared by every device in a run.
#[derive(Clone, Debug)]
pub struct TestPlan {
    /// The application package under test.
    pub app_package: Utf8PathBuf,

    /// The package containing the tests.
    pub test_package_path: Utf8PathBuf,

    /// Further packages installed after the test package, in order.
    pub extra_packages: Vec<Utf8PathBuf>,

    /// The Android package name of the test package.
    pub test_package: String,

    /// The fully qualified instrumentation runner class.
    pub test_runner: String,

    /// Key-value pairs passed to the runner with `-e`.
    pub instrumentation_args: Vec<(String, String)>,

    /// Whether to run the tests through the test orchestrator.
    pub with_orchestrator: bool,

    /// The directory all output is written to.
    pub output_dir: Utf8PathBuf,

    /// Whether to keep intermediate output after a successful run.
    pub keep_output: bool,

    /// Time limits for device operations.
    pub timeouts: Timeouts,

    /// How often followed files are checked for new data.
    pub poll_interval: Duration,
}

/// Time limits for device operations.
///
/// The instrumentation itself has no time limit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timeouts {
    /// Time limit for installing a single package.
    pub install: Duration,

    /// Time limit for pulling a single artifact directory.
    pub pull: Duration,

    /// Time limit for short shell commands.
    pub shell: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            install: Duration::from_secs(120),
            pull: Duration::from_secs(60),
            shell: Duration::from_secs(30),
        }
    }
}

/// The shard a device runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShardAssignment {
    /// The 0-based shard index.
    pub index: usize,

    /// The total number of shards.
    pub total: usize,
}

impl ShardAssignment {
    /// Returns the assignment for the device at `index` out of `device_count` devices.
    ///
    /// Sharding only applies if it's enabled and there's more than one device.
    pub fn for_device(shard: bool, index: usize, device_count: usize) -> Option<Self> {
        (shard && device_count > 1).then_some(Self {
            index,
            total: device_count,
        })
    }
}

impl TestPlan {
    /// Returns the `<package>/<runner>` component of the instrumentation.
    pub fn component(&self) -> String {
        format!("{}/{}", self.test_package, self.test_runner)
    }

    /// Returns the shell command that runs the instrumentation on a device.
    pub fn instrumentation_command(&self, shard: Option<ShardAssignment>) -> String {
        let mut args: Vec<(&str, String)> = Vec::new();
        if let Some(shard) = shard {
            args.push(("numShards", shard.total.to_string()));
            args.push(("shardIndex", shard.index.to_string()));
        }
        args.extend(
            self.instrumentation_args
                .iter()
                .map(|(key, value)| (key.as_str(), value.clone())),
        );

        let mut command = if self.with_orchestrator {
            format!(
                "CLASSPATH=$(pm path {TEST_SERVICES_PACKAGE}) app_process / {SHELL_MAIN_CLASS} \
                 am instrument -w -r -e targetInstrumentation {}",
                self.component()
            )
        } else {
            "am instrument -w -r".to_owned()
        };

        for (key, value) in &args {
            command.push_str(" -e ");
            command.push_str(&shell_words::quote(key));
            command.push(' ');
            command.push_str(&shell_words::quote(value));
        }

        command.push(' ');
        if self.with_orchestrator {
            command.push_str(ORCHESTRATOR_COMPONENT);
        } else {
            command.push_str(&self.component());
        }
        command
    }
}

/// Pairs up a flat `key value key value ...` argument list.
pub fn parse_instrumentation_arguments(
    args: Vec<String>,
) -> Result<Vec<(String, String)>, InstrumentationArgumentsError> {
    if args.len() % 2 != 0 {
        return Err(InstrumentationArgumentsError::new(args));
    }

    let mut pairs = Vec::with_capacity(args.len() / 2);
    let mut iter = args.into_iter();
    while let (Some(key), Some(value)) = (iter.next(), iter.next()) {
        pairs.push((key, value));
    }
    Ok(pairs)
}
