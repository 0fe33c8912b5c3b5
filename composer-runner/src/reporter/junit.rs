// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::create_parent;
use crate::{errors::ReportWriteError, instrumentation::TestStatus, suite::DeviceTestRun};
use camino::Utf8Path;
use quick_junit::{NonSuccessKind, Report, TestCase, TestCaseStatus, TestSuite};
use std::{fs::File, io::BufWriter};

/// Builds the JUnit report for a single device run.
///
/// The report holds one test suite named after the test package, with one test case per executed
/// test.
pub fn junit_report(test_package: &str, run: &DeviceTestRun) -> Report {
    let mut suite = TestSuite::new(test_package);
    suite
        .set_timestamp(run.timestamp)
        .set_time(run.duration)
        .add_property(("device", run.device.as_str()));

    for executed in &run.tests {
        let test = &executed.test;
        let status = match &test.status {
            TestStatus::Passed => TestCaseStatus::success(),
            TestStatus::Ignored { stacktrace } => {
                let mut status = TestCaseStatus::skipped();
                if let Some(stacktrace) = stacktrace {
                    status.set_description(stacktrace.as_str());
                }
                status
            }
            TestStatus::Failed { stacktrace } => {
                let mut status = TestCaseStatus::non_success(NonSuccessKind::Failure);
                if let Some(message) = stacktrace.lines().next() {
                    status.set_message(message);
                }
                status.set_description(stacktrace.as_str());
                status
            }
        };

        let mut testcase = TestCase::new(test.test_name.as_str(), status);
        testcase
            .set_classname(test.class_name.as_str())
            .set_time(test.duration);
        suite.add_test_case(testcase);
    }

    let mut report = Report::new(test_package);
    report
        .set_timestamp(run.timestamp)
        .set_time(run.duration)
        .add_test_suite(suite);
    report
}

/// Writes `report` to `path`, creating parent directories as needed.
pub fn write_junit(path: &Utf8Path, report: &Report) -> Result<(), ReportWriteError> {
    create_parent(path)?;
    let f = File::create(path).map_err(|err| ReportWriteError::Fs {
        path: path.to_owned(),
        err,
    })?;
    report
        .serialize(BufWriter::new(f))
        .map_err(|err| ReportWriteError::Junit {
            path: path.to_owned(),
            err,
        })
}
