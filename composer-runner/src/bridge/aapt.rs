// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::errors::PackageInspectError;
use camino::{Utf8Path, Utf8PathBuf};
use std::borrow::Cow;
use tracing::{debug, trace};

/// Reads the package name and instrumentation runner out of a test package with `aapt`.
#[derive(Clone, Debug)]
pub struct PackageInspector {
    aapt: Option<Utf8PathBuf>,
}

impl PackageInspector {
    /// Creates a new inspector. `aapt` is `None` if no `aapt` binary could be located.
    pub fn new(aapt: Option<Utf8PathBuf>) -> Self {
        Self { aapt }
    }

    /// Returns the package name declared by `apk`.
    pub fn test_package(&self, apk: &Utf8Path) -> Result<String, PackageInspectError> {
        let output = self.aapt_cli()?.dump_badging(apk).read()?;
        parse_test_package(&output).ok_or_else(|| PackageInspectError::TestPackageNotFound {
            apk: apk.to_owned(),
        })
    }

    /// Returns the instrumentation runner class declared by `apk`.
    pub fn test_runner(&self, apk: &Utf8Path) -> Result<String, PackageInspectError> {
        let output = self.aapt_cli()?.dump_manifest(apk).read()?;
        parse_test_runner(&output).ok_or_else(|| PackageInspectError::TestRunnerNotFound {
            apk: apk.to_owned(),
        })
    }

    fn aapt_cli(&self) -> Result<AaptCli<'_>, PackageInspectError> {
        self.aapt
            .as_deref()
            .map(AaptCli::new)
            .ok_or(PackageInspectError::AaptUnavailable)
    }
}

/// An `aapt` invocation.
#[derive(Clone, Debug)]
struct AaptCli<'a> {
    aapt: &'a Utf8Path,
    args: Vec<Cow<'a, str>>,
}

impl<'a> AaptCli<'a> {
    fn new(aapt: &'a Utf8Path) -> Self {
        Self {
            aapt,
            args: Vec::new(),
        }
    }

    /// `aapt dump badging <apk>`
    fn dump_badging(mut self, apk: &'a Utf8Path) -> Self {
        self.add_arg("dump").add_arg("badging").add_arg(apk.as_str());
        self
    }

    /// `aapt dump xmltree <apk> AndroidManifest.xml`
    fn dump_manifest(mut self, apk: &'a Utf8Path) -> Self {
        self.add_arg("dump")
            .add_arg("xmltree")
            .add_arg(apk.as_str())
            .add_arg("AndroidManifest.xml");
        self
    }

    fn add_arg(&mut self, arg: impl Into<Cow<'a, str>>) -> &mut Self {
        self.args.push(arg.into());
        self
    }

    fn to_expression(&self) -> duct::Expression {
        duct::cmd(self.aapt.as_str(), self.args.iter().map(|arg| &**arg))
    }

    fn read(&self) -> Result<String, PackageInspectError> {
        let expression = self.to_expression();
        trace!("executing command: {:?}", expression);
        let output = expression
            .stdout_capture()
            .stderr_capture()
            .unchecked()
            .run()
            .map_err(|err| PackageInspectError::Exec {
                command: shell_words::join(
                    std::iter::once(self.aapt.as_str()).chain(self.args.iter().map(|a| &**a)),
                ),
                err,
            })?;
        if !output.status.success() {
            debug!(
                "aapt exited with {}, stderr:\n{}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Extracts the package name from `aapt dump badging` output.
///
/// The relevant line looks like `package: name='com.example.test' versionCode='1' ...`.
pub fn parse_test_package(output: &str) -> Option<String> {
    let line = output.lines().find(|line| line.contains("package"))?;
    let name = line
        .split(' ')
        .find(|word| word.starts_with("name="))?
        .split('\'')
        .nth(1)?;
    (!name.is_empty()).then(|| name.to_owned())
}

/// Extracts the instrumentation runner class from `aapt dump xmltree ... AndroidManifest.xml`
/// output: the first `android:name` attribute after the `instrumentation` element.
pub fn parse_test_runner(output: &str) -> Option<String> {
    let runner = output
        .lines()
        .skip_while(|line| !line.contains("instrumentation"))
        .find(|line| line.contains("android:name"))?
        .split('"')
        .nth(1)?;
    (!runner.is_empty()).then(|| runner.to_owned())
}
