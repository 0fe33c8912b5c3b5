// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::output::{NO_HEADING_TARGET, StderrStyles};
use composer_runner::{errors::*, helpers::plural};
use owo_colors::OwoColorize;
use std::{error::Error, path::PathBuf};
use thiserror::Error;
use tracing::error;

pub(crate) type Result<T, E = ExpectedError> = std::result::Result<T, E>;

/// Documented exit codes for `composer` failures.
///
/// Unknown/unexpected failures will always result in exit code 1.
pub enum ComposerExitCode {}

impl ComposerExitCode {
    /// Every test that ran passed.
    pub const OK: i32 = 0;

    /// No devices were available, a test failed, no tests ran, or composer itself failed.
    pub const FAILED: i32 = 1;
}

// Note that the #[error()] strings are mostly placeholder messages -- the expected way to print out
// errors is with the display_to_stderr method, which colorizes errors.

/// An error that composer expects and reports without a backtrace.
#[derive(Debug, Error)]
#[doc(hidden)]
pub enum ExpectedError {
    #[error("could not determine the current directory")]
    CurrentDir {
        #[source]
        err: std::io::Error,
    },
    #[error("current directory is not valid UTF-8")]
    CurrentDirInvalidUtf8 { path: PathBuf },
    #[error("config parse error")]
    ConfigParse {
        #[from]
        err: ConfigParseError,
    },
    #[error("tool path error")]
    ToolPath {
        #[from]
        err: ToolPathError,
    },
    #[error("device selection error")]
    DeviceSelection {
        #[from]
        err: DeviceSelectionError,
    },
    #[error("instrumentation arguments error")]
    InstrumentationArguments {
        #[from]
        err: InstrumentationArgumentsError,
    },
    #[error("package inspection error")]
    PackageInspect {
        #[from]
        err: PackageInspectError,
    },
    #[error("fleet runner build error")]
    FleetRunnerBuild {
        #[from]
        err: FleetRunnerBuildError,
    },
    #[error("fleet run error")]
    FleetRun {
        #[from]
        err: FleetRunError,
    },
    #[error("report write error")]
    ReportWrite {
        #[from]
        err: ReportWriteError,
    },
    #[error("no tests were run")]
    NoTestsRun,
    #[error("test run failed")]
    TestRunFailed { failed: usize },
}

impl ExpectedError {
    /// Returns the exit code for the process.
    pub fn process_exit_code(&self) -> i32 {
        ComposerExitCode::FAILED
    }

    /// Displays this error to stderr.
    pub fn display_to_stderr(&self, styles: &StderrStyles) {
        let mut next_error = match &self {
            Self::CurrentDir { err } => {
                error!("could not determine the current directory");
                Some(err as &dyn Error)
            }
            Self::CurrentDirInvalidUtf8 { path } => {
                error!(
                    "current directory `{}` is not valid UTF-8",
                    path.display().style(styles.bold)
                );
                None
            }
            Self::ConfigParse { err } => {
                error!(
                    "failed to parse composer config at `{}`",
                    err.config_file().style(styles.bold)
                );
                err.source()
            }
            Self::ToolPath { err } => {
                error!("{err}");
                err.source()
            }
            Self::DeviceSelection { err } => {
                error!("{err}");
                err.source()
            }
            Self::InstrumentationArguments { err } => {
                error!("{err}");
                None
            }
            Self::PackageInspect { err } => {
                error!("failed to inspect the test package");
                Some(err as &dyn Error)
            }
            Self::FleetRunnerBuild { err } => {
                error!("failed to start the runner");
                Some(err as &dyn Error)
            }
            Self::FleetRun { err } => {
                error!("{err}");
                match err {
                    FleetRunError::DevicePipeline(err) => {
                        display_pipeline_details(err.kind(), styles);
                    }
                    FleetRunError::NoDevices { .. } => {
                        hint(
                            "connect a device or start an emulator, and check that it's listed \
                             as `device` by `adb devices`",
                            styles,
                        );
                    }
                    _ => {}
                }
                err.source()
            }
            Self::ReportWrite { err } => {
                error!("{err}");
                err.source()
            }
            Self::NoTestsRun => {
                error!("no tests were run");
                hint(
                    "pass `--fail-if-no-tests false` to allow runs without tests",
                    styles,
                );
                None
            }
            Self::TestRunFailed { failed } => {
                error!(
                    "{} {} failed",
                    failed.style(styles.bold),
                    plural::tests_str(*failed)
                );
                None
            }
        };

        while let Some(err) = next_error {
            error!(target: NO_HEADING_TARGET, "\nCaused by:\n  {}", err);
            next_error = err.source();
        }
    }
}

fn display_pipeline_details(kind: &DevicePipelineErrorKind, styles: &StderrStyles) {
    match kind {
        DevicePipelineErrorKind::Instrumentation(err) => {
            if let Some(remediation) = err.remediation() {
                hint(&remediation, styles);
            }
        }
        DevicePipelineErrorKind::NonZeroExit { output, .. } if !output.trim().is_empty() => {
            error!(
                target: NO_HEADING_TARGET,
                "\n{}\n{}",
                "instrumentation output:".style(styles.bold),
                output.trim_end()
            );
        }
        _ => {}
    }
}

fn hint(message: &str, styles: &StderrStyles) {
    for line in message.lines() {
        error!(target: NO_HEADING_TARGET, "  {}: {line}", "hint".style(styles.hint));
    }
}
