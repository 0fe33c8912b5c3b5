// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The per-device pipeline.
//!
//! A [`DevicePipeline`] moves through [`PipelineState`]s:
//!
//! ```text
//! Installing -> Running -> Joining -> Done
//!          \         \          \
//!           +---------+----------+--> Failed
//! ```
//!
//! While joining, three branches run concurrently and the first error cancels the others:
//!
//! 1. the instrumentation output is decoded into tests, with artifacts pulled for each test as it
//!    completes;
//! 2. the device log is split into per-test segments;
//! 3. the instrumentation process is waited on. Once it exits, both followed files are told to
//!    stop, so that the other two branches drain what's on disk and finish.

use crate::{
    artifacts::{ArtifactCollector, TestArtifacts},
    bridge::{DeviceBridge, DeviceProcess},
    errors::{DevicePipelineError, DevicePipelineErrorKind, InstrumentationError},
    helpers::plural,
    instrumentation::{InstrumentationStream, Test},
    logcat::{LogCorrelator, segment_path},
    plan::{ShardAssignment, TestPlan},
    suite::{DeviceTestRun, ExecutedTest},
    tail::{FileTail, StopSignal, stop_channel},
    time::stopwatch,
};
use camino::{Utf8Path, Utf8PathBuf};
use std::{fmt, future::Future, sync::Arc, time::Duration};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

const DEFAULT_EXTERNAL_STORAGE: &str = "/sdcard";

/// The state of a [`DevicePipeline`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    /// Packages are being installed.
    Installing,

    /// The instrumentation is being started.
    Running,

    /// Tests, the device log and the instrumentation process are being joined.
    Joining,

    /// The pipeline completed successfully.
    Done,

    /// The pipeline failed.
    Failed,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Installing => write!(f, "installing"),
            Self::Running => write!(f, "starting instrumentation"),
            Self::Joining => write!(f, "running tests"),
            Self::Done => write!(f, "done"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Runs the tests on a single device.
#[derive(Debug)]
pub struct DevicePipeline {
    device: String,
    index: usize,
    bridge: Arc<dyn DeviceBridge>,
    plan: Arc<TestPlan>,
    shard: Option<ShardAssignment>,
}

impl DevicePipeline {
    /// Creates a new pipeline for `device`, the device at position `index` in the selection.
    pub fn new(
        device: impl Into<String>,
        index: usize,
        bridge: Arc<dyn DeviceBridge>,
        plan: Arc<TestPlan>,
        shard: Option<ShardAssignment>,
    ) -> Self {
        Self {
            device: device.into(),
            index,
            bridge,
            plan,
            shard,
        }
    }

    /// Returns the device this pipeline runs on.
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Returns the directory that logs for this device are written to.
    pub fn logs_dir(&self) -> Utf8PathBuf {
        self.plan.output_dir.join("logs").join(&self.device)
    }

    /// Runs the pipeline to completion.
    pub async fn run(self) -> Result<DeviceTestRun, DevicePipelineError> {
        let stopwatch = stopwatch();

        self.transition(PipelineState::Installing);
        self.install()
            .await
            .map_err(|kind| self.fail(PipelineState::Installing, kind))?;

        self.transition(PipelineState::Running);
        let started = self
            .start()
            .await
            .map_err(|kind| self.fail(PipelineState::Running, kind))?;

        self.transition(PipelineState::Joining);
        let tests = self
            .join(started)
            .await
            .map_err(|kind| self.fail(PipelineState::Joining, kind))?;

        let snapshot = stopwatch.snapshot();
        let instrumentation_output_path = self.clean_up().await;
        let run = DeviceTestRun::new(
            self.device.clone(),
            tests,
            snapshot.duration,
            snapshot.start_time.fixed_offset(),
            self.logs_dir().join("full.log"),
            instrumentation_output_path,
        );

        self.transition(PipelineState::Done);
        info!(
            "[{}] ran {} {}: {}",
            self.device,
            run.tests.len(),
            plural::tests_str(run.tests.len()),
            run.summary(),
        );
        Ok(run)
    }

    fn transition(&self, state: PipelineState) {
        debug!(device = %self.device, index = self.index, "pipeline state: {state}");
    }

    fn fail(&self, state: PipelineState, kind: DevicePipelineErrorKind) -> DevicePipelineError {
        self.transition(PipelineState::Failed);
        DevicePipelineError::new(self.device.clone(), state, kind)
    }

    async fn install(&self) -> Result<(), DevicePipelineErrorKind> {
        let packages = [&self.plan.app_package, &self.plan.test_package_path]
            .into_iter()
            .chain(&self.plan.extra_packages);

        for package in packages {
            info!("[{}] installing {package}", self.device);
            with_timeout(
                self.plan.timeouts.install,
                || format!("install {package}"),
                self.bridge.install(&self.device, package),
            )
            .await??;
        }
        Ok(())
    }

    async fn start(&self) -> Result<StartedInstrumentation, DevicePipelineErrorKind> {
        let logs_dir = self.logs_dir();
        tokio::fs::create_dir_all(&logs_dir)
            .await
            .map_err(|err| DevicePipelineErrorKind::Fs {
                path: logs_dir.clone(),
                err,
            })?;

        let external_storage = self.external_storage().await?;

        let full_log = logs_dir.join("full.log");
        let logcat = self.bridge.spawn_logcat(&self.device, &full_log).await?;

        let command = self.plan.instrumentation_command(self.shard);
        info!("[{}] starting instrumentation", self.device);
        debug!("[{}] instrumentation command: {command}", self.device);
        let output = logs_dir.join("instrumentation.output");
        let instrumentation = self
            .bridge
            .spawn_shell(&self.device, &command, &output)
            .await?;

        Ok(StartedInstrumentation {
            logs_dir,
            full_log,
            output,
            external_storage,
            logcat,
            instrumentation,
        })
    }

    async fn external_storage(&self) -> Result<String, DevicePipelineErrorKind> {
        const COMMAND: &str = "echo $EXTERNAL_STORAGE";
        let output = with_timeout(
            self.plan.timeouts.shell,
            || COMMAND.to_owned(),
            self.bridge.shell(&self.device, COMMAND),
        )
        .await??;

        let storage = output.trim();
        if storage.is_empty() {
            debug!(
                "[{}] EXTERNAL_STORAGE is unset, using {DEFAULT_EXTERNAL_STORAGE}",
                self.device
            );
            Ok(DEFAULT_EXTERNAL_STORAGE.to_owned())
        } else {
            Ok(storage.to_owned())
        }
    }

    async fn join(
        &self,
        started: StartedInstrumentation,
    ) -> Result<Vec<ExecutedTest>, DevicePipelineErrorKind> {
        let StartedInstrumentation {
            logs_dir,
            full_log,
            output,
            external_storage,
            logcat,
            instrumentation,
        } = started;

        let (instrumentation_stop, instrumentation_signal) = stop_channel();
        let (log_stop, log_signal) = stop_channel();

        let collector = ArtifactCollector::new(
            self.bridge.clone(),
            self.device.clone(),
            self.plan.output_dir.clone(),
            external_storage,
            self.plan.timeouts.pull,
        );
        let correlator = LogCorrelator::new(
            self.device.clone(),
            logs_dir.clone(),
            self.plan.poll_interval,
        );

        let tests = self.collect_tests(&output, instrumentation_signal, collector, &logs_dir);
        let logs = correlator.run(&full_log, log_signal);
        let exit = async {
            let exit = instrumentation.wait().await?;
            debug!("[{}] instrumentation exited: {exit:?}", self.device);
            instrumentation_stop.stop();
            log_stop.stop();
            // Kills the log stream.
            drop(logcat);

            if exit.success() {
                Ok::<_, DevicePipelineErrorKind>(())
            } else {
                Err(DevicePipelineErrorKind::NonZeroExit {
                    exit_code: exit.code,
                    output: read_output(&self.device, &output).await,
                })
            }
        };

        let (tests, segments, ()) = tokio::try_join!(tests, logs, exit)?;
        debug!("[{}] {segments} log segments written", self.device);
        Ok(tests)
    }

    async fn collect_tests(
        &self,
        output: &Utf8Path,
        stop: StopSignal,
        collector: ArtifactCollector,
        logs_dir: &Utf8Path,
    ) -> Result<Vec<ExecutedTest>, DevicePipelineErrorKind> {
        let tail = FileTail::open(output, stop, self.plan.poll_interval)
            .await
            .map_err(InstrumentationError::from)?;
        let mut stream = InstrumentationStream::new(tail);

        // Artifacts are pulled while later tests run. Each pull is tagged with the order its test
        // was reported in, so that results keep that order.
        let mut pulls = JoinSet::new();
        let mut reported = 0;
        while let Some(test) = stream.next_test().await? {
            debug!(
                "[{}] {}#{} ({}/{}): {:?}",
                self.device, test.class_name, test.test_name, test.index, test.total, test.status,
            );
            let collector = collector.clone();
            let sequence = reported;
            pulls.spawn(async move {
                let artifacts = collector.collect(&test).await;
                (sequence, test, artifacts)
            });
            reported += 1;
        }

        let mut tests = Vec::with_capacity(reported);
        while let Some(res) = pulls.join_next().await {
            let (sequence, test, artifacts) = res.map_err(DevicePipelineErrorKind::ArtifactTask)?;
            tests.push((sequence, executed(logs_dir, test, artifacts)));
        }
        tests.sort_by_key(|(sequence, _)| *sequence);

        Ok(tests.into_iter().map(|(_, test)| test).collect())
    }

    /// Removes working files, returning the path to the instrumentation output if it was kept.
    async fn clean_up(&self) -> Option<Utf8PathBuf> {
        let output = self.logs_dir().join("instrumentation.output");
        if self.plan.keep_output {
            return Some(output);
        }

        match tokio::fs::remove_file(&output).await {
            Ok(()) => None,
            Err(err) => {
                warn!("[{}] failed to remove `{output}`: {err}", self.device);
                Some(output)
            }
        }
    }
}

#[derive(Debug)]
struct StartedInstrumentation {
    logs_dir: Utf8PathBuf,
    full_log: Utf8PathBuf,
    output: Utf8PathBuf,
    external_storage: String,
    logcat: DeviceProcess,
    instrumentation: DeviceProcess,
}

fn executed(logs_dir: &Utf8Path, test: Test, artifacts: TestArtifacts) -> ExecutedTest {
    let log_path = segment_path(logs_dir, &test.class_name, &test.test_name);
    ExecutedTest {
        test,
        log_path,
        file_paths: artifacts.file_paths,
        screenshot_paths: artifacts.screenshot_paths,
    }
}

async fn with_timeout<T>(
    timeout: Duration,
    operation: impl FnOnce() -> String,
    fut: impl Future<Output = T>,
) -> Result<T, DevicePipelineErrorKind> {
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| DevicePipelineErrorKind::ProcessTimeout {
            operation: operation(),
            timeout,
        })
}

/// Reads the instrumentation output for an error report. An unreadable file reads as empty.
async fn read_output(device: &str, output: &Utf8Path) -> String {
    match tokio::fs::read_to_string(output).await {
        Ok(contents) => contents,
        Err(err) => {
            warn!("[{device}] failed to read instrumentation output `{output}`: {err}");
            String::new()
        }
    }
}
