// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use composer_runner::{
    bridge::{Device, DeviceBridge, DeviceProcess, ProcessExit, PullOutcome},
    errors::BridgeError,
    plan::{TestPlan, Timeouts},
};
use std::{collections::BTreeMap, fmt::Write as _, sync::Mutex, time::Duration};

pub(crate) const TEST_PACKAGE: &str = "com.example.test";
pub(crate) const TEST_RUNNER: &str = "androidx.test.runner.AndroidJUnitRunner";
pub(crate) const EXTERNAL_STORAGE: &str = "/storage/emulated/0";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum FixtureOutcome {
    Pass,
    Fail,
    Ignore,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct TestFixture {
    pub(crate) class_name: &'static str,
    pub(crate) test_name: &'static str,
    pub(crate) outcome: FixtureOutcome,
}

impl TestFixture {
    pub(crate) const fn new(
        class_name: &'static str,
        test_name: &'static str,
        outcome: FixtureOutcome,
    ) -> Self {
        Self {
            class_name,
            test_name,
            outcome,
        }
    }

    pub(crate) fn stack(&self) -> String {
        format!(
            "java.lang.AssertionError: {} failed\n\tat {}.{}({}.kt:10)",
            self.test_name, self.class_name, self.test_name, self.test_name
        )
    }
}

/// Produces `am instrument -r` output for `tests`, run one after the other.
pub(crate) fn instrumentation_output(tests: &[TestFixture]) -> String {
    let total = tests.len();
    let mut out = String::new();
    for (index, test) in tests.iter().enumerate() {
        let current = index + 1;
        status_block(&mut out, test, total, current, 1, None);
        let (code, stack) = match test.outcome {
            FixtureOutcome::Pass => (0, None),
            FixtureOutcome::Fail => (-2, Some(test.stack())),
            FixtureOutcome::Ignore => (-3, None),
        };
        status_block(&mut out, test, total, current, code, stack.as_deref());
    }
    out.push_str(&terminal_block(total));
    out
}

fn status_block(
    out: &mut String,
    test: &TestFixture,
    total: usize,
    current: usize,
    code: i32,
    stack: Option<&str>,
) {
    writeln!(out, "INSTRUMENTATION_STATUS: class={}", test.class_name).unwrap();
    writeln!(out, "INSTRUMENTATION_STATUS: current={current}").unwrap();
    writeln!(out, "INSTRUMENTATION_STATUS: id=AndroidJUnitRunner").unwrap();
    writeln!(out, "INSTRUMENTATION_STATUS: numtests={total}").unwrap();
    if let Some(stack) = stack {
        writeln!(out, "INSTRUMENTATION_STATUS: stack={stack}").unwrap();
    }
    writeln!(out, "INSTRUMENTATION_STATUS: stream=").unwrap();
    writeln!(out, "{}:", test.class_name).unwrap();
    writeln!(out, "INSTRUMENTATION_STATUS: test={}", test.test_name).unwrap();
    writeln!(out, "INSTRUMENTATION_STATUS_CODE: {code}").unwrap();
}

pub(crate) fn terminal_block(total: usize) -> String {
    format!(
        "INSTRUMENTATION_RESULT: stream=\n\nTime: 0.42\n\nOK ({total} tests)\n\n\n\
         INSTRUMENTATION_CODE: -1\n"
    )
}

/// Produces a device log with start and finish markers for `tests`.
pub(crate) fn device_log(tests: &[TestFixture]) -> String {
    let mut out = String::from("01-01 00:00:00.000  100  100 I ActivityManager: boot\n");
    for test in tests {
        writeln!(
            out,
            "01-01 00:00:01.000  200  210 I TestRunner: started: {}({})",
            test.test_name, test.class_name
        )
        .unwrap();
        writeln!(
            out,
            "01-01 00:00:01.500  200  210 D Example: inside {}",
            test.test_name
        )
        .unwrap();
        writeln!(
            out,
            "01-01 00:00:02.000  200  210 I TestRunner: finished: {}({})",
            test.test_name, test.class_name
        )
        .unwrap();
    }
    out
}

/// How a [`FakeDevice`] responds to pulls.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum PullBehavior {
    Copy,
    Fail,
    Hang,
}

/// A scripted device.
#[derive(Clone, Debug)]
pub(crate) struct FakeDevice {
    pub(crate) id: &'static str,
    pub(crate) online: bool,
    pub(crate) instrumentation_output: String,
    pub(crate) device_log: String,
    pub(crate) exit_code: i32,
    /// Remote directory -> files (name, contents) in it.
    pub(crate) remote_dirs: BTreeMap<String, Vec<(&'static str, &'static str)>>,
    pub(crate) pulls: PullBehavior,
}

impl FakeDevice {
    pub(crate) fn new(id: &'static str, tests: &[TestFixture]) -> Self {
        Self {
            id,
            online: true,
            instrumentation_output: instrumentation_output(tests),
            device_log: device_log(tests),
            exit_code: 0,
            remote_dirs: BTreeMap::new(),
            pulls: PullBehavior::Copy,
        }
    }

    pub(crate) fn offline(mut self) -> Self {
        self.online = false;
        self
    }

    pub(crate) fn with_output(mut self, output: impl Into<String>) -> Self {
        self.instrumentation_output = output.into();
        self
    }

    pub(crate) fn with_exit_code(mut self, exit_code: i32) -> Self {
        self.exit_code = exit_code;
        self
    }

    pub(crate) fn with_pulls(mut self, pulls: PullBehavior) -> Self {
        self.pulls = pulls;
        self
    }

    pub(crate) fn with_screenshots(
        mut self,
        test: &TestFixture,
        files: Vec<(&'static str, &'static str)>,
    ) -> Self {
        self.remote_dirs.insert(
            format!(
                "{EXTERNAL_STORAGE}/app_spoon-screenshots/{}/{}",
                test.class_name, test.test_name
            ),
            files,
        );
        self
    }
}

/// Something a [`FakeBridge`] was asked to do.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum BridgeCall {
    Install { device: String, package: Utf8PathBuf },
    Instrument { device: String, command: String },
}

#[derive(Debug)]
pub(crate) struct FakeBridge {
    devices: Vec<FakeDevice>,
    calls: Mutex<Vec<BridgeCall>>,
}

impl FakeBridge {
    pub(crate) fn new(devices: Vec<FakeDevice>) -> Self {
        Self {
            devices,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn calls(&self) -> Vec<BridgeCall> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn instrument_command(&self, device: &str) -> Option<String> {
        self.calls().into_iter().find_map(|call| match call {
            BridgeCall::Instrument {
                device: d,
                command,
            } if d == device => Some(command),
            _ => None,
        })
    }

    fn device(&self, id: &str) -> &FakeDevice {
        self.devices
            .iter()
            .find(|device| device.id == id)
            .unwrap_or_else(|| panic!("unknown device {id}"))
    }

    fn record(&self, call: BridgeCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl DeviceBridge for FakeBridge {
    async fn devices(&self) -> Result<Vec<Device>, BridgeError> {
        Ok(self
            .devices
            .iter()
            .map(|device| Device {
                id: device.id.to_owned(),
                online: device.online,
            })
            .collect())
    }

    async fn install(&self, device: &str, package: &Utf8Path) -> Result<(), BridgeError> {
        self.record(BridgeCall::Install {
            device: device.to_owned(),
            package: package.to_owned(),
        });
        Ok(())
    }

    async fn shell(&self, _device: &str, command: &str) -> Result<String, BridgeError> {
        match command {
            "echo $EXTERNAL_STORAGE" => Ok(format!("{EXTERNAL_STORAGE}\n")),
            _ => Ok(String::new()),
        }
    }

    async fn spawn_shell(
        &self,
        device: &str,
        command: &str,
        output: &Utf8Path,
    ) -> Result<DeviceProcess, BridgeError> {
        self.record(BridgeCall::Instrument {
            device: device.to_owned(),
            command: command.to_owned(),
        });
        let fake = self.device(device);
        tokio::fs::write(output, &fake.instrumentation_output)
            .await
            .map_err(|err| BridgeError::OutputFile {
                path: output.to_owned(),
                err,
            })?;
        Ok(DeviceProcess::exited(ProcessExit {
            code: Some(fake.exit_code),
        }))
    }

    async fn spawn_logcat(
        &self,
        device: &str,
        output: &Utf8Path,
    ) -> Result<DeviceProcess, BridgeError> {
        let fake = self.device(device);
        tokio::fs::write(output, &fake.device_log)
            .await
            .map_err(|err| BridgeError::OutputFile {
                path: output.to_owned(),
                err,
            })?;
        // Log streams only end when they're killed.
        Ok(DeviceProcess::new(async {
            std::future::pending::<()>().await;
            Ok(ProcessExit { code: None })
        }))
    }

    async fn pull_dir(
        &self,
        device: &str,
        remote: &str,
        local: &Utf8Path,
    ) -> Result<PullOutcome, BridgeError> {
        let fake = self.device(device);
        match fake.pulls {
            PullBehavior::Copy => {}
            PullBehavior::Fail => {
                return Err(BridgeError::CommandFailed {
                    command: format!("adb -s {device} pull {remote}"),
                    exit_code: Some(1),
                    output: "adb: error: remote object does not exist".to_owned(),
                });
            }
            PullBehavior::Hang => std::future::pending::<()>().await,
        }
        let Some(files) = fake.remote_dirs.get(remote) else {
            return Ok(PullOutcome::Missing);
        };
        std::fs::create_dir_all(local).unwrap();
        for (name, contents) in files {
            std::fs::write(local.join(name), contents).unwrap();
        }
        Ok(PullOutcome::Pulled)
    }
}

pub(crate) fn plan(output_dir: &Utf8Path) -> TestPlan {
    TestPlan {
        app_package: "app-debug.apk".into(),
        test_package_path: "app-debug-androidTest.apk".into(),
        extra_packages: Vec::new(),
        test_package: TEST_PACKAGE.to_owned(),
        test_runner: TEST_RUNNER.to_owned(),
        instrumentation_args: Vec::new(),
        with_orchestrator: false,
        output_dir: output_dir.to_owned(),
        keep_output: false,
        timeouts: Timeouts::default(),
        poll_interval: Duration::from_millis(5),
    }
}
