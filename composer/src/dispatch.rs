// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    errors::{ComposerExitCode, ExpectedError, Result},
    output::{OutputContext, OutputOpts},
};
use camino::Utf8PathBuf;
use clap::{ArgAction, Args, Parser};
use composer_runner::{
    bridge::{AdbBridge, PackageInspector},
    config::{ComposerConfig, ToolPaths},
    fleet::{DeviceSelection, FleetRunnerBuilder},
    plan::{TestPlan, parse_instrumentation_arguments},
    reporter::ReportWriter,
    suite::RunVerdict,
};
use std::{sync::Arc, time::Duration};
use tracing::{debug, info};

/// Run Android instrumentation tests on every connected device.
///
/// composer installs the application and test packages, runs the instrumentation on each selected
/// device, and writes JUnit reports, per-test logs and screenshots to the output directory.
#[derive(Debug, Parser)]
#[command(name = "composer", version, max_term_width = 100)]
pub struct ComposerApp {
    #[clap(flatten)]
    run: RunOpts,

    #[clap(flatten)]
    output: OutputOpts,

    /// Config file [default: .config/composer.toml if present]
    #[arg(long, value_name = "PATH", help_heading = "Config options")]
    config_file: Option<Utf8PathBuf>,
}

impl ComposerApp {
    /// Initializes the output context.
    pub fn init_output(&self) -> OutputContext {
        self.output.init()
    }

    /// Executes the app.
    ///
    /// Returns the exit code of a run in which every test passed.
    pub fn exec(self) -> Result<i32> {
        let cwd = current_dir()?;
        let config = ComposerConfig::from_sources(&cwd, self.config_file.as_deref())?;
        self.run.exec(&config)
    }
}

#[derive(Debug, Args)]
#[command(next_help_heading = "Run options")]
struct RunOpts {
    /// Application package to test
    #[arg(long, value_name = "PATH")]
    apk: Utf8PathBuf,

    /// Package containing the tests
    #[arg(long, value_name = "PATH")]
    test_apk: Utf8PathBuf,

    /// Android package name of the test package [default: read from the test package]
    #[arg(long, value_name = "NAME")]
    test_package: Option<String>,

    /// Instrumentation runner class [default: read from the test package]
    #[arg(long, value_name = "CLASS")]
    test_runner: Option<String>,

    /// Either `true` or `false` to split tests across devices
    #[arg(long, action = ArgAction::Set, default_value_t = true, value_name = "BOOL")]
    shard: bool,

    /// Either `true` or `false` to fail if no tests passed or failed
    #[arg(long, action = ArgAction::Set, default_value_t = true, value_name = "BOOL")]
    fail_if_no_tests: bool,

    /// Either `true` or `false` to run tests through the test orchestrator
    #[arg(long, action = ArgAction::Set, default_value_t = false, value_name = "BOOL")]
    with_orchestrator: bool,

    /// Identifiers of the devices to run on, exclusive with --device-pattern
    #[arg(long, num_args = 1.., value_name = "ID")]
    devices: Vec<String>,

    /// Regular expression matching entire identifiers of the devices to run on
    #[arg(long, value_name = "REGEX")]
    device_pattern: Option<String>,

    /// Time limit in seconds for installing each package [default: from config]
    #[arg(long, value_name = "SECONDS")]
    install_timeout: Option<u64>,

    /// Key-value pairs passed to the instrumentation runner, as `key value key value ...`
    #[arg(
        long,
        num_args = 1..,
        action = ArgAction::Append,
        allow_negative_numbers = true,
        value_name = "ARGS"
    )]
    instrumentation_arguments: Vec<String>,

    /// Further packages to install after the test package, in order
    #[arg(long, num_args = 1.., value_name = "PATH")]
    extra_apks: Vec<Utf8PathBuf>,

    /// Keep intermediate instrumentation output after a successful run
    #[arg(long)]
    keep_output_on_exit: bool,

    /// Directory to write reports, logs and screenshots to
    #[arg(long, default_value = "composer-output", value_name = "DIR")]
    output_directory: Utf8PathBuf,
}

impl RunOpts {
    fn exec(self, config: &ComposerConfig) -> Result<i32> {
        let selection = DeviceSelection::new(self.devices, self.device_pattern.as_deref())?;
        let instrumentation_args = parse_instrumentation_arguments(self.instrumentation_arguments)?;
        let tool_paths = ToolPaths::resolve(config.tools(), std::env::var_os("ANDROID_HOME"))?;

        let inspector = PackageInspector::new(tool_paths.aapt.clone());
        let test_package = match self.test_package {
            Some(test_package) => test_package,
            None => inspector.test_package(&self.test_apk)?,
        };
        let test_runner = match self.test_runner {
            Some(test_runner) => test_runner,
            None => inspector.test_runner(&self.test_apk)?,
        };
        debug!(%test_package, %test_runner, "resolved instrumentation");

        let mut timeouts = config.timeouts();
        if let Some(secs) = self.install_timeout {
            timeouts.install = Duration::from_secs(secs);
        }

        let plan = TestPlan {
            app_package: self.apk,
            test_package_path: self.test_apk,
            extra_packages: self.extra_apks,
            test_package,
            test_runner,
            instrumentation_args,
            with_orchestrator: self.with_orchestrator,
            output_dir: self.output_directory,
            keep_output: self.keep_output_on_exit,
            timeouts,
            poll_interval: config.poll_interval(),
        };
        let output_dir = plan.output_dir.clone();
        let report_writer = ReportWriter::new(output_dir.clone());
        let test_package = plan.test_package.clone();

        let bridge = Arc::new(AdbBridge::new(tool_paths.adb));
        let mut builder = FleetRunnerBuilder::default();
        builder.set_shard(self.shard);
        let runner = builder.build(bridge, plan, selection)?;

        let outcome = runner.execute()?;
        report_writer.write(&test_package, &outcome)?;
        info!("reports written to {output_dir}");

        match outcome.summary.verdict(self.fail_if_no_tests) {
            RunVerdict::Ok => Ok(ComposerExitCode::OK),
            RunVerdict::NoTests => Err(ExpectedError::NoTestsRun),
            RunVerdict::FailedTests => Err(ExpectedError::TestRunFailed {
                failed: outcome.summary.counts.failed,
            }),
        }
    }
}

fn current_dir() -> Result<Utf8PathBuf> {
    let cwd = std::env::current_dir().map_err(|err| ExpectedError::CurrentDir { err })?;
    Utf8PathBuf::try_from(cwd)
        .map_err(|err| ExpectedError::CurrentDirInvalidUtf8 { path: err.into_path_buf() })
}
