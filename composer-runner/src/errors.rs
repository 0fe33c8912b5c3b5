// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by composer.

use crate::{instrumentation::StatusCode, pipeline::PipelineState};
use camino::Utf8PathBuf;
use config::ConfigError;
use std::{fmt, time::Duration};
use thiserror::Error;
use tokio::task::JoinError;

/// An error that occurred while parsing the config.
#[derive(Debug, Error)]
#[error("failed to parse composer config at `{config_file}`")]
#[non_exhaustive]
pub struct ConfigParseError {
    config_file: Utf8PathBuf,
    #[source]
    err: ConfigError,
}

impl ConfigParseError {
    pub(crate) fn new(config_file: impl Into<Utf8PathBuf>, err: ConfigError) -> Self {
        Self {
            config_file: config_file.into(),
            err,
        }
    }

    /// Returns the config file for this error.
    pub fn config_file(&self) -> &Utf8PathBuf {
        &self.config_file
    }
}

/// An error that occurred while resolving the paths to the Android SDK tools.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ToolPathError {
    /// Neither `tools.android-home` nor `ANDROID_HOME` was set.
    #[error(
        "unable to locate the Android SDK: set ANDROID_HOME or `tools.android-home` in the config"
    )]
    AndroidHomeMissing,

    /// `ANDROID_HOME` was not valid UTF-8.
    #[error("ANDROID_HOME is not valid UTF-8")]
    AndroidHomeInvalidUtf8,

    /// The build-tools directory could not be read.
    #[error("failed to read build-tools directory `{dir}`")]
    BuildToolsRead {
        /// The directory that was read.
        dir: Utf8PathBuf,

        /// The underlying error.
        #[source]
        err: std::io::Error,
    },
}

/// An error that occurs while building a [`DeviceSelection`](crate::fleet::DeviceSelection).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DeviceSelectionError {
    /// Both `--devices` and `--device-pattern` were specified.
    #[error("specifying both --devices and --device-pattern is prohibited")]
    ConflictingFilters,

    /// The device pattern is not a valid regular expression.
    #[error("invalid device pattern `{pattern}`")]
    InvalidPattern {
        /// The pattern that failed to compile.
        pattern: String,

        /// The underlying error.
        #[source]
        err: regex::Error,
    },
}

/// An error that occurs while parsing instrumentation arguments from the command line.
#[derive(Clone, Debug, Error)]
#[error(
    "instrumentation arguments must be key-value pairs, found an odd number of values: {}",
    shell_words::join(.args)
)]
pub struct InstrumentationArgumentsError {
    args: Vec<String>,
}

impl InstrumentationArgumentsError {
    pub(crate) fn new(args: Vec<String>) -> Self {
        Self { args }
    }
}

/// An error that occurs while following a growing file.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TailError {
    /// The file to follow does not exist.
    #[error("`{path}` was not found")]
    NotFound {
        /// The path that was followed.
        path: Utf8PathBuf,
    },

    /// The file shrank while it was being followed.
    #[error("output rotation detected for `{path}` (read {position} bytes, file is now {len} bytes)")]
    Rotated {
        /// The path that was followed.
        path: Utf8PathBuf,

        /// The number of bytes read so far.
        position: u64,

        /// The new length of the file.
        len: u64,
    },

    /// An I/O error occurred while reading the file.
    #[error("error reading `{path}`")]
    Io {
        /// The path that was followed.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        err: std::io::Error,
    },
}

/// An error produced while decoding the instrumentation output or reconstructing tests from it.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum InstrumentationError {
    /// Reading the instrumentation output failed.
    #[error("failed to read instrumentation output")]
    Tail(#[from] TailError),

    /// A status block carried a status code that isn't known.
    #[error("unknown instrumentation status code {code}")]
    UnknownStatusCode {
        /// The status code.
        code: i32,

        /// The block the code was found in.
        block: String,
    },

    /// A status block had a missing or unparseable value.
    #[error("malformed instrumentation status block: invalid value `{value}` for `{key}`")]
    MalformedBlock {
        /// The key whose value was invalid.
        key: &'static str,

        /// The value found, or an empty string if the key was missing.
        value: String,

        /// The whole block.
        block: String,
    },

    /// Two status entries for the same test were paired in an impossible order.
    #[error(
        "invalid status pairing for {class_name}#{test_name} (index {index}): \
         {first} followed by {second}"
    )]
    InvalidPairing {
        /// The class name of the test.
        class_name: String,

        /// The name of the test.
        test_name: String,

        /// The index of the test.
        index: usize,

        /// The status code of the earlier entry.
        first: StatusCode,

        /// The status code of the later entry.
        second: StatusCode,
    },

    /// Fewer tests were observed than the instrumentation reported.
    #[error("fewer tests were observed than instrumentation reported: expected {expected}, got {actual}")]
    CountMismatch {
        /// The number of tests reported by the instrumentation.
        expected: usize,

        /// The number of tests observed.
        actual: usize,
    },

    /// The application under test crashed.
    #[error("application process crashed: {message}")]
    Crash {
        /// The short message printed by the instrumentation.
        message: String,
    },

    /// The instrumentation runner isn't installed on the device.
    #[error("unable to find instrumentation info for `{component}`")]
    RunnerNotFound {
        /// The full component name, `<package>/<runner>`.
        component: String,

        /// The runner class name.
        runner: String,
    },
}

impl InstrumentationError {
    /// Returns a multi-line hint on how to fix this error, if any.
    pub fn remediation(&self) -> Option<String> {
        match self {
            Self::Crash { .. } => Some(
                "the application crashed while running tests\n\
                 check full.log for the device for the stacktrace of the crash"
                    .to_owned(),
            ),
            Self::RunnerNotFound { runner, .. } => Some(format!(
                "the test runner `{runner}` is not declared by the test package\n\
                 pass the runner declared in the test package's manifest with --test-runner, \
                 or omit --test-runner to detect it"
            )),
            _ => None,
        }
    }
}

/// An error produced by the device transport.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BridgeError {
    /// A command could not be executed.
    #[error("failed to execute `{command}`")]
    Exec {
        /// The command that was run.
        command: String,

        /// The underlying error.
        #[source]
        err: std::io::Error,
    },

    /// A command exited unsuccessfully.
    #[error("`{command}` failed with exit code {}", DisplayExitCode(*.exit_code))]
    CommandFailed {
        /// The command that was run.
        command: String,

        /// The exit code, or `None` if the process was terminated by a signal.
        exit_code: Option<i32>,

        /// The combined output of the command.
        output: String,
    },

    /// `adb devices` produced output that couldn't be understood.
    #[error("adb output is not correct: {output}")]
    UnexpectedDevicesOutput {
        /// The output.
        output: String,
    },

    /// A package could not be installed.
    #[error("failed to install `{package}`")]
    InstallFailed {
        /// The package that failed to install.
        package: Utf8PathBuf,

        /// The output of the install command.
        output: String,
    },

    /// A file used for process output could not be created.
    #[error("failed to create output file `{path}`")]
    OutputFile {
        /// The path to the file.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        err: std::io::Error,
    },
}

/// An error that occurs while inspecting a test package.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PackageInspectError {
    /// No `aapt` binary could be found.
    #[error("aapt not found: set `tools.aapt` in the config, or pass --test-package and --test-runner")]
    AaptUnavailable,

    /// `aapt` could not be executed.
    #[error("failed to execute `{command}`")]
    Exec {
        /// The command that was run.
        command: String,

        /// The underlying error.
        #[source]
        err: std::io::Error,
    },

    /// The package name wasn't found in the `aapt` output.
    #[error("cannot parse test package from `aapt dump badging {apk}` output")]
    TestPackageNotFound {
        /// The package that was inspected.
        apk: Utf8PathBuf,
    },

    /// The instrumentation runner wasn't found in the `aapt` output.
    #[error("cannot parse test runner from `aapt dump xmltree {apk} AndroidManifest.xml` output")]
    TestRunnerNotFound {
        /// The package that was inspected.
        apk: Utf8PathBuf,
    },
}

/// An error that caused a single device pipeline to fail.
#[derive(Debug, Error)]
#[error("[{device}] device pipeline failed while {state}")]
pub struct DevicePipelineError {
    device: String,
    state: PipelineState,
    #[source]
    kind: DevicePipelineErrorKind,
}

impl DevicePipelineError {
    pub(crate) fn new(
        device: impl Into<String>,
        state: PipelineState,
        kind: DevicePipelineErrorKind,
    ) -> Self {
        Self {
            device: device.into(),
            state,
            kind,
        }
    }

    /// Returns the identifier of the device the pipeline was running on.
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Returns the state the pipeline was in when it failed.
    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Returns the triggering error.
    pub fn kind(&self) -> &DevicePipelineErrorKind {
        &self.kind
    }
}

/// The triggering error of a [`DevicePipelineError`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DevicePipelineErrorKind {
    /// A time-bounded device operation didn't finish in time.
    #[error("`{operation}` timed out after {timeout:?}")]
    ProcessTimeout {
        /// A description of the operation.
        operation: String,

        /// The timeout that was exceeded.
        timeout: Duration,
    },

    /// The device transport failed.
    #[error(transparent)]
    Bridge(#[from] BridgeError),

    /// The instrumentation output could not be turned into tests.
    #[error(transparent)]
    Instrumentation(#[from] InstrumentationError),

    /// The instrumentation process exited unsuccessfully.
    #[error("instrumentation exited with code {}", DisplayExitCode(*.exit_code))]
    NonZeroExit {
        /// The exit code, or `None` if the process was terminated by a signal.
        exit_code: Option<i32>,

        /// The output captured from the process.
        output: String,
    },

    /// A host-side file operation failed.
    #[error("error accessing `{path}`")]
    Fs {
        /// The path being accessed.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        err: std::io::Error,
    },

    /// An artifact-collection task panicked.
    #[error("artifact collection task panicked")]
    ArtifactTask(#[source] JoinError),
}

/// An error that occurs while building a [`FleetRunner`](crate::fleet::FleetRunner).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FleetRunnerBuildError {
    /// An error occurred while creating the Tokio runtime.
    #[error("error creating Tokio runtime")]
    TokioRuntimeCreate(#[source] std::io::Error),
}

/// An error that caused the whole run to fail.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FleetRunError {
    /// Connected devices could not be listed.
    #[error("failed to list connected devices")]
    DeviceDiscovery(#[source] BridgeError),

    /// No online devices were left after selection.
    #[error("no devices available for tests ({discovered} discovered)")]
    NoDevices {
        /// The number of devices discovered before selection.
        discovered: usize,
    },

    /// A device pipeline failed.
    #[error(transparent)]
    DevicePipeline(#[from] DevicePipelineError),

    /// A device pipeline task panicked.
    #[error("[{device}] device pipeline task panicked")]
    TaskPanicked {
        /// The device the task was running for.
        device: String,

        /// The underlying error.
        #[source]
        err: JoinError,
    },
}

/// An error that occurs while writing a report.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ReportWriteError {
    /// A filesystem operation failed.
    #[error("error writing to `{path}`")]
    Fs {
        /// The path being written.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        err: std::io::Error,
    },

    /// Serializing a JUnit report failed.
    #[error("error serializing JUnit report to `{path}`")]
    Junit {
        /// The report path.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        err: quick_junit::SerializeError,
    },

    /// Serializing the suites summary failed.
    #[error("error serializing suites to `{path}`")]
    Json {
        /// The summary path.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        err: serde_json::Error,
    },
}

struct DisplayExitCode(Option<i32>);

impl fmt::Display for DisplayExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(code) => write!(f, "{code}"),
            None => write!(f, "(terminated by signal)"),
        }
    }
}
