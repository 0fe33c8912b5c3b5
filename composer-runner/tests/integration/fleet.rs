// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use camino::Utf8Path;
use camino_tempfile::Utf8TempDir;
use color_eyre::eyre::{Result, ensure};
use composer_runner::{
    bridge::DeviceBridge,
    errors::{DevicePipelineErrorKind, FleetRunError, InstrumentationError},
    fleet::{DeviceSelection, FleetRunOutcome, FleetRunnerBuilder},
    instrumentation::TestStatus,
    pipeline::PipelineState,
    plan::TestPlan,
    reporter::ReportWriter,
    suite::{RunVerdict, TestCounts},
};
use pretty_assertions::assert_eq;
use std::{sync::Arc, time::Duration};
use test_case::test_case;

const FOO_PASSES: TestFixture =
    TestFixture::new("com.example.FooTest", "passes", FixtureOutcome::Pass);
const FOO_FAILS: TestFixture = TestFixture::new("com.example.FooTest", "fails", FixtureOutcome::Fail);
const BAR_IGNORED: TestFixture =
    TestFixture::new("com.example.BarTest", "ignored", FixtureOutcome::Ignore);
const BAR_PASSES: TestFixture =
    TestFixture::new("com.example.BarTest", "passes", FixtureOutcome::Pass);

fn run_fleet(
    bridge: Arc<FakeBridge>,
    plan: TestPlan,
    selection: DeviceSelection,
    shard: bool,
) -> Result<FleetRunOutcome, FleetRunError> {
    let mut builder = FleetRunnerBuilder::default();
    builder.set_shard(shard).set_worker_threads(2);
    let bridge: Arc<dyn DeviceBridge> = bridge;
    let runner = builder
        .build(bridge, plan, selection)
        .expect("runtime created");
    runner.execute()
}

fn all() -> DeviceSelection {
    DeviceSelection::new(Vec::new(), None).expect("valid selection")
}

#[test]
fn sharded_run_merges_suites() -> Result<()> {
    let dir = Utf8TempDir::new()?;
    let bridge = Arc::new(FakeBridge::new(vec![
        FakeDevice::new("emulator-5554", &[FOO_PASSES, FOO_FAILS])
            .with_screenshots(&FOO_PASSES, vec![("b.png", "b"), ("a.png", "a")]),
        FakeDevice::new("emulator-5556", &[BAR_IGNORED, BAR_PASSES]),
        FakeDevice::new("emulator-5558", &[]).offline(),
    ]));

    let outcome = run_fleet(bridge.clone(), plan(dir.path()), all(), true)?;

    // Shard arguments follow the selection order, and offline devices aren't run on.
    assert_eq!(
        bridge.instrument_command("emulator-5554").as_deref(),
        Some(
            "am instrument -w -r -e numShards 2 -e shardIndex 0 \
             com.example.test/androidx.test.runner.AndroidJUnitRunner"
        )
    );
    assert_eq!(
        bridge.instrument_command("emulator-5556").as_deref(),
        Some(
            "am instrument -w -r -e numShards 2 -e shardIndex 1 \
             com.example.test/androidx.test.runner.AndroidJUnitRunner"
        )
    );
    assert_eq!(bridge.instrument_command("emulator-5558"), None);

    // Packages are installed app first, then tests.
    let installs: Vec<_> = bridge
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            BridgeCall::Install { device, package } if device == "emulator-5554" => Some(package),
            _ => None,
        })
        .collect();
    assert_eq!(installs, vec!["app-debug.apk", "app-debug-androidTest.apk"]);

    assert_eq!(outcome.device_runs.len(), 2);
    assert_eq!(outcome.device_runs[0].device, "emulator-5554");
    assert_eq!(outcome.device_runs[1].device, "emulator-5556");

    assert_eq!(outcome.suites.len(), 1, "sharded runs merge into one suite");
    let suite = &outcome.suites[0];
    assert_eq!(suite.test_package, TEST_PACKAGE);
    assert_eq!(suite.devices, vec!["emulator-5554", "emulator-5556"]);
    assert_eq!(
        suite.counts,
        TestCounts {
            passed: 2,
            ignored: 1,
            failed: 1,
        }
    );
    assert_eq!(suite.counts.total(), suite.tests.len());
    assert_eq!(outcome.summary.verdict(true), RunVerdict::FailedTests);

    let first = &outcome.device_runs[0];
    assert_eq!(first.tests[0].test.test_name, "passes");
    assert_eq!(first.tests[0].test.index, 1);
    assert_eq!(first.tests[0].test.total, 2);
    assert_eq!(
        first.tests[0].screenshot_paths,
        vec![
            dir.path()
                .join("screenshots/emulator-5554/com.example.FooTest/passes/a.png"),
            dir.path()
                .join("screenshots/emulator-5554/com.example.FooTest/passes/b.png"),
        ],
        "screenshots are pulled and sorted by name"
    );
    assert!(first.tests[0].file_paths.is_empty());
    match &first.tests[1].test.status {
        TestStatus::Failed { stacktrace } => {
            ensure!(
                stacktrace.starts_with("java.lang.AssertionError: fails failed"),
                "unexpected stacktrace: {stacktrace}"
            );
        }
        other => panic!("unexpected status: {other:?}"),
    }

    // Per-test log segments.
    let segment = std::fs::read_to_string(&first.tests[1].log_path)?;
    assert_eq!(
        first.tests[1].log_path,
        dir.path().join("logs/emulator-5554/com.example.FooTest/fails.log")
    );
    ensure!(segment.contains("inside fails"), "segment: {segment}");
    ensure!(!segment.contains("inside passes"), "segment: {segment}");

    // Working files are removed on success.
    assert_eq!(first.instrumentation_output_path, None);
    ensure!(
        !dir.path()
            .join("logs/emulator-5554/instrumentation.output")
            .exists(),
        "instrumentation output removed"
    );
    ensure!(first.device_log_path.exists(), "full log kept");

    ReportWriter::new(dir.path()).write(TEST_PACKAGE, &outcome)?;
    assert_reports(dir.path(), &["emulator-5554", "emulator-5556"])?;

    Ok(())
}

fn assert_reports(output_dir: &Utf8Path, devices: &[&str]) -> Result<()> {
    for device in devices {
        let path = output_dir.join(format!("junit4-reports/{device}.xml"));
        let xml = std::fs::read_to_string(&path)?;
        ensure!(xml.contains(TEST_PACKAGE), "{path}: {xml}");
    }
    let suites: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(output_dir.join("suites.json"))?)?;
    ensure!(suites.is_array(), "suites.json is an array: {suites}");
    Ok(())
}

#[test]
fn unsharded_run_has_suite_per_device() -> Result<()> {
    let dir = Utf8TempDir::new()?;
    let bridge = Arc::new(FakeBridge::new(vec![
        FakeDevice::new("emulator-5554", &[FOO_PASSES, BAR_PASSES]),
        FakeDevice::new("emulator-5556", &[FOO_PASSES, BAR_PASSES]),
    ]));
    let mut plan = plan(dir.path());
    plan.keep_output = true;
    plan.instrumentation_args = vec![("package".to_owned(), "com.example".to_owned())];

    let outcome = run_fleet(bridge.clone(), plan, all(), false)?;

    assert_eq!(
        bridge.instrument_command("emulator-5556").as_deref(),
        Some(
            "am instrument -w -r -e package com.example \
             com.example.test/androidx.test.runner.AndroidJUnitRunner"
        ),
        "no shard arguments without sharding"
    );
    assert_eq!(outcome.suites.len(), 2);
    for suite in &outcome.suites {
        assert_eq!(suite.counts.passed, 2);
    }
    assert_eq!(outcome.summary.counts.passed, 4);
    assert_eq!(outcome.summary.verdict(true), RunVerdict::Ok);

    let output = dir.path().join("logs/emulator-5554/instrumentation.output");
    assert_eq!(
        outcome.device_runs[0].instrumentation_output_path,
        Some(output.clone())
    );
    ensure!(output.exists(), "instrumentation output kept");
    Ok(())
}

#[test]
fn selected_device_only() -> Result<()> {
    let dir = Utf8TempDir::new()?;
    let bridge = Arc::new(FakeBridge::new(vec![
        FakeDevice::new("emulator-5554", &[FOO_PASSES]),
        FakeDevice::new("emulator-5556", &[FOO_PASSES]),
    ]));
    let selection = DeviceSelection::new(vec!["emulator-5556".to_owned()], None)?;

    let outcome = run_fleet(bridge.clone(), plan(dir.path()), selection, true)?;

    assert_eq!(outcome.device_runs.len(), 1);
    assert_eq!(
        bridge.instrument_command("emulator-5556").as_deref(),
        Some("am instrument -w -r com.example.test/androidx.test.runner.AndroidJUnitRunner"),
        "a single device isn't sharded"
    );
    assert_eq!(bridge.instrument_command("emulator-5554"), None);
    Ok(())
}

#[test_case(PullBehavior::Fail; "pull fails")]
#[test_case(PullBehavior::Hang; "pull hangs")]
fn artifact_pull_errors_are_recovered(pulls: PullBehavior) -> Result<()> {
    let dir = Utf8TempDir::new()?;
    let bridge = Arc::new(FakeBridge::new(vec![
        FakeDevice::new("emulator-5554", &[FOO_PASSES, BAR_PASSES])
            .with_screenshots(&FOO_PASSES, vec![("a.png", "a")])
            .with_pulls(pulls),
    ]));
    let mut plan = plan(dir.path());
    plan.timeouts.pull = Duration::from_millis(100);

    let outcome = run_fleet(bridge, plan, all(), true)?;

    let run = &outcome.device_runs[0];
    assert_eq!(run.tests.len(), 2);
    for test in &run.tests {
        assert_eq!(test.test.status, TestStatus::Passed);
        ensure!(
            test.screenshot_paths.is_empty() && test.file_paths.is_empty(),
            "no artifacts for {}: {test:?}",
            test.test.test_name
        );
    }
    assert_eq!(outcome.summary.verdict(true), RunVerdict::Ok);
    Ok(())
}

#[test]
fn empty_run() -> Result<()> {
    let dir = Utf8TempDir::new()?;
    let bridge = Arc::new(FakeBridge::new(vec![FakeDevice::new("emulator-5554", &[])]));

    let outcome = run_fleet(bridge, plan(dir.path()), all(), true)?;

    assert_eq!(outcome.summary.counts, TestCounts::default());
    assert_eq!(outcome.summary.verdict(true), RunVerdict::NoTests);
    assert_eq!(outcome.summary.verdict(false), RunVerdict::Ok);
    Ok(())
}

#[test]
fn no_online_devices() {
    let dir = Utf8TempDir::new().expect("created temp dir");
    let bridge = Arc::new(FakeBridge::new(vec![
        FakeDevice::new("emulator-5554", &[FOO_PASSES]).offline(),
    ]));

    let err = run_fleet(bridge, plan(dir.path()), all(), true).expect_err("no devices");
    assert!(
        matches!(err, FleetRunError::NoDevices { discovered: 1 }),
        "unexpected error: {err}"
    );
}

#[test]
fn crash_fails_run() {
    let dir = Utf8TempDir::new().expect("created temp dir");
    let crash = indoc::indoc! {"
        INSTRUMENTATION_STATUS: class=com.example.FooTest
        INSTRUMENTATION_STATUS: current=1
        INSTRUMENTATION_STATUS: id=AndroidJUnitRunner
        INSTRUMENTATION_STATUS: numtests=2
        INSTRUMENTATION_STATUS: stream=
        INSTRUMENTATION_STATUS: test=passes
        INSTRUMENTATION_STATUS_CODE: 1
        INSTRUMENTATION_RESULT: shortMsg=Process crashed.
        INSTRUMENTATION_CODE: 0
    "};
    let bridge = Arc::new(FakeBridge::new(vec![
        FakeDevice::new("emulator-5554", &[FOO_PASSES]),
        FakeDevice::new("emulator-5556", &[]).with_output(crash),
    ]));

    let err = run_fleet(bridge, plan(dir.path()), all(), true).expect_err("crash");
    let FleetRunError::DevicePipeline(err) = err else {
        panic!("unexpected error: {err}");
    };
    assert_eq!(err.device(), "emulator-5556");
    assert_eq!(err.state(), PipelineState::Joining);
    match err.kind() {
        DevicePipelineErrorKind::Instrumentation(err @ InstrumentationError::Crash { message }) => {
            assert_eq!(message, "Process crashed.");
            assert!(err.remediation().is_some(), "crashes come with a hint");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn count_mismatch_fails_run() {
    let dir = Utf8TempDir::new().expect("created temp dir");
    // The runner reports four tests, but only three are paired before the end of the output.
    let tests = [FOO_PASSES, FOO_FAILS, BAR_PASSES];
    let output = instrumentation_output(&tests)
        .replace("numtests=3", "numtests=4");
    let bridge = Arc::new(FakeBridge::new(vec![
        FakeDevice::new("emulator-5554", &tests).with_output(output),
    ]));

    let err = run_fleet(bridge, plan(dir.path()), all(), true).expect_err("count mismatch");
    let FleetRunError::DevicePipeline(err) = err else {
        panic!("unexpected error: {err}");
    };
    assert!(
        matches!(
            err.kind(),
            DevicePipelineErrorKind::Instrumentation(InstrumentationError::CountMismatch {
                expected: 4,
                actual: 3,
            })
        ),
        "unexpected error: {:?}",
        err.kind()
    );
}

#[test]
fn non_zero_exit_fails_run() {
    let dir = Utf8TempDir::new().expect("created temp dir");
    let bridge = Arc::new(FakeBridge::new(vec![
        FakeDevice::new("emulator-5554", &[FOO_PASSES]).with_exit_code(255),
    ]));

    let err = run_fleet(bridge, plan(dir.path()), all(), true).expect_err("non-zero exit");
    let FleetRunError::DevicePipeline(err) = err else {
        panic!("unexpected error: {err}");
    };
    match err.kind() {
        DevicePipelineErrorKind::NonZeroExit { exit_code, output } => {
            assert_eq!(*exit_code, Some(255));
            assert!(output.contains("INSTRUMENTATION_CODE"), "output: {output}");
        }
        other => panic!("unexpected error: {other}"),
    }
}
