// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Running tests across every selected device.
//!
//! The [`FleetRunner`] discovers devices, applies the [`DeviceSelection`], runs one
//! [`DevicePipeline`] per device concurrently and aggregates the results. The first pipeline to
//! fail fails the whole run, and the remaining pipelines are cancelled.

use crate::{
    bridge::{Device, DeviceBridge},
    errors::{DeviceSelectionError, FleetRunError, FleetRunnerBuildError},
    helpers::plural,
    pipeline::DevicePipeline,
    plan::{ShardAssignment, TestPlan},
    suite::{DeviceTestRun, RunSummary, Suite, aggregate},
    time::stopwatch,
};
use itertools::Itertools;
use regex::Regex;
use std::{collections::HashMap, sync::Arc};
use tokio::{runtime::Runtime, task::JoinSet};
use tracing::{debug, info};

/// Which of the discovered devices to run on.
#[derive(Clone, Debug)]
pub enum DeviceSelection {
    /// Every online device.
    All,

    /// Online devices with one of these identifiers.
    Ids(Vec<String>),

    /// Online devices whose entire identifier matches this pattern.
    Pattern(Regex),
}

impl DeviceSelection {
    /// Builds a selection from `--devices` and `--device-pattern`, which are mutually exclusive.
    pub fn new(ids: Vec<String>, pattern: Option<&str>) -> Result<Self, DeviceSelectionError> {
        match (ids.is_empty(), pattern) {
            (false, Some(_)) => Err(DeviceSelectionError::ConflictingFilters),
            (false, None) => Ok(Self::Ids(ids)),
            (true, Some(pattern)) => {
                let regex = Regex::new(&format!("^(?:{pattern})$")).map_err(|err| {
                    DeviceSelectionError::InvalidPattern {
                        pattern: pattern.to_owned(),
                        err,
                    }
                })?;
                Ok(Self::Pattern(regex))
            }
            (true, None) => Ok(Self::All),
        }
    }

    /// Returns true if the device should be run on.
    pub fn is_selected(&self, device: &Device) -> bool {
        if !device.online {
            return false;
        }
        match self {
            Self::All => true,
            Self::Ids(ids) => ids.iter().any(|id| *id == device.id),
            Self::Pattern(regex) => regex.is_match(&device.id),
        }
    }

    /// Filters `devices`, preserving their order.
    pub fn apply(&self, devices: Vec<Device>) -> Vec<Device> {
        devices
            .into_iter()
            .filter(|device| self.is_selected(device))
            .collect()
    }
}

/// Fleet runner options.
#[derive(Debug, Default)]
pub struct FleetRunnerBuilder {
    shard: bool,
    worker_threads: Option<usize>,
}

impl FleetRunnerBuilder {
    /// Sets whether tests are split across devices.
    pub fn set_shard(&mut self, shard: bool) -> &mut Self {
        self.shard = shard;
        self
    }

    /// Sets the number of runtime worker threads. Defaults to the number of CPUs.
    pub fn set_worker_threads(&mut self, worker_threads: usize) -> &mut Self {
        self.worker_threads = Some(worker_threads);
        self
    }

    /// Creates a new fleet runner.
    pub fn build(
        self,
        bridge: Arc<dyn DeviceBridge>,
        plan: TestPlan,
        selection: DeviceSelection,
    ) -> Result<FleetRunner, FleetRunnerBuildError> {
        let mut builder = tokio::runtime::Builder::new_multi_thread();
        builder.enable_all().thread_name("composer-worker");
        if let Some(worker_threads) = self.worker_threads {
            builder.worker_threads(worker_threads);
        }
        let runtime = builder
            .build()
            .map_err(FleetRunnerBuildError::TokioRuntimeCreate)?;

        Ok(FleetRunner {
            bridge,
            plan: Arc::new(plan),
            selection,
            shard: self.shard,
            runtime,
        })
    }
}

/// Context for running tests on a fleet of devices.
///
/// Created using [`FleetRunnerBuilder::build`].
#[derive(Debug)]
pub struct FleetRunner {
    bridge: Arc<dyn DeviceBridge>,
    plan: Arc<TestPlan>,
    selection: DeviceSelection,
    shard: bool,
    runtime: Runtime,
}

/// The results of a successful run.
#[derive(Clone, Debug)]
pub struct FleetRunOutcome {
    /// Per-device results, in selection order.
    pub device_runs: Vec<DeviceTestRun>,

    /// The aggregated suites.
    pub suites: Vec<Suite>,

    /// Totals across every device.
    pub summary: RunSummary,
}

impl FleetRunner {
    /// Returns the plan shared by every device.
    pub fn plan(&self) -> &TestPlan {
        &self.plan
    }

    /// Runs the tests on every selected device and waits for them to finish.
    pub fn execute(self) -> Result<FleetRunOutcome, FleetRunError> {
        let res = self.runtime.block_on(Self::run_all(
            self.bridge.clone(),
            self.plan.clone(),
            &self.selection,
            self.shard,
        ));
        // Device processes that are still running after a failure are killed on drop. Don't wait
        // for them.
        self.runtime.shutdown_background();
        res
    }

    async fn run_all(
        bridge: Arc<dyn DeviceBridge>,
        plan: Arc<TestPlan>,
        selection: &DeviceSelection,
        shard: bool,
    ) -> Result<FleetRunOutcome, FleetRunError> {
        let stopwatch = stopwatch();

        let discovered = bridge
            .devices()
            .await
            .map_err(FleetRunError::DeviceDiscovery)?;
        debug!("discovered devices: {discovered:?}");
        let discovered_count = discovered.len();
        let devices = selection.apply(discovered);
        if devices.is_empty() {
            return Err(FleetRunError::NoDevices {
                discovered: discovered_count,
            });
        }
        info!(
            "{} connected {}: {}",
            devices.len(),
            plural::devices_str(devices.len()),
            devices.iter().map(|device| &device.id).join(", "),
        );

        let device_count = devices.len();
        let mut pipelines = JoinSet::new();
        let mut task_devices = HashMap::new();
        for (index, device) in devices.into_iter().enumerate() {
            let pipeline = DevicePipeline::new(
                device.id.clone(),
                index,
                bridge.clone(),
                plan.clone(),
                ShardAssignment::for_device(shard, index, device_count),
            );
            let handle = pipelines.spawn(async move { (index, pipeline.run().await) });
            task_devices.insert(handle.id(), device.id);
        }

        let mut runs: Vec<Option<DeviceTestRun>> = vec![None; device_count];
        while let Some(res) = pipelines.join_next().await {
            match res {
                Ok((index, Ok(run))) => runs[index] = Some(run),
                // Returning drops the join set, which cancels every other pipeline.
                Ok((_, Err(err))) => return Err(err.into()),
                Err(err) => {
                    let device = task_devices.remove(&err.id()).unwrap_or_default();
                    return Err(FleetRunError::TaskPanicked { device, err });
                }
            }
        }
        let device_runs: Vec<_> = runs.into_iter().flatten().collect();

        let suites = aggregate(&plan.test_package, &device_runs, shard);
        let summary = RunSummary::from_runs(&device_runs, stopwatch.elapsed());
        info!(
            "test run finished on {} {}: {}",
            device_count,
            plural::devices_str(device_count),
            summary.summary(),
        );

        Ok(FleetRunOutcome {
            device_runs,
            suites,
            summary,
        })
    }
}
