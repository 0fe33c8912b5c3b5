// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Results of a run: per device, per suite and in total.

use crate::{
    helpers::{DisplayHumanDuration, duration_nanos},
    instrumentation::{Test, TestStatus},
};
use camino::Utf8PathBuf;
use chrono::{DateTime, FixedOffset};
use serde::Serialize;
use std::{fmt, time::Duration};

/// A test that ran on a device, along with everything collected for it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ExecutedTest {
    /// The test and its outcome.
    #[serde(flatten)]
    pub test: Test,

    /// The device log segment for the test.
    ///
    /// The file may not exist: the device log can lag behind the instrumentation output, so the
    /// last tests of a run may have no segment.
    pub log_path: Utf8PathBuf,

    /// Files pulled from the device for the test.
    pub file_paths: Vec<Utf8PathBuf>,

    /// Screenshots pulled from the device for the test.
    pub screenshot_paths: Vec<Utf8PathBuf>,
}

/// Counts of test outcomes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct TestCounts {
    /// The number of tests that passed.
    pub passed: usize,

    /// The number of tests that were ignored.
    pub ignored: usize,

    /// The number of tests that failed.
    pub failed: usize,
}

impl TestCounts {
    /// Counts the outcomes of `tests`.
    pub fn of<'a>(tests: impl IntoIterator<Item = &'a ExecutedTest>) -> Self {
        tests
            .into_iter()
            .fold(Self::default(), |mut counts, executed| {
                match executed.test.status {
                    TestStatus::Passed => counts.passed += 1,
                    TestStatus::Ignored { .. } => counts.ignored += 1,
                    TestStatus::Failed { .. } => counts.failed += 1,
                }
                counts
            })
    }

    /// Returns the total number of tests.
    pub fn total(&self) -> usize {
        self.passed + self.ignored + self.failed
    }
}

impl std::ops::Add for TestCounts {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self {
            passed: self.passed + other.passed,
            ignored: self.ignored + other.ignored,
            failed: self.failed + other.failed,
        }
    }
}

/// The results of running the tests on one device.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct DeviceTestRun {
    /// The device the tests ran on.
    pub device: String,

    /// The tests, in the order their results were reported.
    pub tests: Vec<ExecutedTest>,

    /// Outcome counts for `tests`.
    #[serde(flatten)]
    pub counts: TestCounts,

    /// How long the run took, from the start of installation to the end of the instrumentation.
    #[serde(rename = "duration-nanos", with = "duration_nanos")]
    pub duration: Duration,

    /// When the run started.
    pub timestamp: DateTime<FixedOffset>,

    /// The full device log.
    pub device_log_path: Utf8PathBuf,

    /// The raw instrumentation output, if it was kept.
    pub instrumentation_output_path: Option<Utf8PathBuf>,
}

impl DeviceTestRun {
    /// Creates a new run, computing outcome counts from `tests`.
    pub fn new(
        device: impl Into<String>,
        tests: Vec<ExecutedTest>,
        duration: Duration,
        timestamp: DateTime<FixedOffset>,
        device_log_path: Utf8PathBuf,
        instrumentation_output_path: Option<Utf8PathBuf>,
    ) -> Self {
        let counts = TestCounts::of(&tests);
        Self {
            device: device.into(),
            tests,
            counts,
            duration,
            timestamp,
            device_log_path,
            instrumentation_output_path,
        }
    }

    /// Returns a displayable summary of the run.
    pub fn summary(&self) -> DisplaySummary {
        DisplaySummary {
            counts: self.counts,
            duration: self.duration,
        }
    }
}

/// An aggregated, reportable collection of test results.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Suite {
    /// The Android package name of the test package.
    pub test_package: String,

    /// The devices that contributed to the suite.
    pub devices: Vec<String>,

    /// The tests.
    pub tests: Vec<ExecutedTest>,

    /// Outcome counts for `tests`.
    #[serde(flatten)]
    pub counts: TestCounts,

    /// The longest device run duration.
    #[serde(rename = "duration-nanos", with = "duration_nanos")]
    pub duration: Duration,

    /// The earliest device run start.
    pub timestamp: DateTime<FixedOffset>,
}

impl Suite {
    /// Creates a suite from a single device run.
    pub fn from_run(test_package: &str, run: &DeviceTestRun) -> Self {
        Self {
            test_package: test_package.to_owned(),
            devices: vec![run.device.clone()],
            tests: run.tests.clone(),
            counts: run.counts,
            duration: run.duration,
            timestamp: run.timestamp,
        }
    }

    /// Merges two suites: tests and devices are concatenated and counts summed, while the
    /// duration and timestamp span the widest window.
    pub fn merge(mut self, other: Suite) -> Suite {
        self.devices.extend(other.devices);
        self.tests.extend(other.tests);
        self.counts = self.counts + other.counts;
        self.duration = self.duration.max(other.duration);
        self.timestamp = self.timestamp.min(other.timestamp);
        self
    }
}

/// Builds the suites for a set of device runs.
///
/// With `shard` set, all runs are merged into one suite. Otherwise, there's one suite per run.
pub fn aggregate(test_package: &str, runs: &[DeviceTestRun], shard: bool) -> Vec<Suite> {
    let suites = runs.iter().map(|run| Suite::from_run(test_package, run));
    if shard {
        suites.reduce(Suite::merge).into_iter().collect()
    } else {
        suites.collect()
    }
}

/// Totals across every device in a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunSummary {
    /// Outcome counts across all devices.
    pub counts: TestCounts,

    /// Wall-clock duration of the whole run.
    pub duration: Duration,
}

impl RunSummary {
    /// Sums the counts of `runs`.
    pub fn from_runs(runs: &[DeviceTestRun], duration: Duration) -> Self {
        let counts = runs
            .iter()
            .fold(TestCounts::default(), |acc, run| acc + run.counts);
        Self { counts, duration }
    }

    /// Decides the outcome of the run.
    pub fn verdict(&self, fail_if_no_tests: bool) -> RunVerdict {
        if self.counts.failed > 0 {
            RunVerdict::FailedTests
        } else if self.counts.passed == 0 && fail_if_no_tests {
            RunVerdict::NoTests
        } else {
            RunVerdict::Ok
        }
    }

    /// Returns a displayable summary of the run.
    pub fn summary(&self) -> DisplaySummary {
        DisplaySummary {
            counts: self.counts,
            duration: self.duration,
        }
    }
}

/// The outcome of a completed run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunVerdict {
    /// Every test that ran passed.
    Ok,

    /// No test passed or failed.
    NoTests,

    /// At least one test failed.
    FailedTests,
}

/// Displays `N passed, M failed, K ignored, took <duration>`.
#[derive(Clone, Copy, Debug)]
pub struct DisplaySummary {
    counts: TestCounts,
    duration: Duration,
}

impl fmt::Display for DisplaySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} passed, {} failed, {} ignored, took {}",
            self.counts.passed,
            self.counts.failed,
            self.counts.ignored,
            DisplayHumanDuration(self.duration),
        )
    }
}
