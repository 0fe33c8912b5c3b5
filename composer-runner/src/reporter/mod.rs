// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reports written at the end of a run.
//!
//! Two kinds of reports are produced under the output directory:
//!
//! * `junit4-reports/<device>.xml`: one JUnit XML report per device run.
//! * `suites.json`: the aggregated suites, for downstream viewers.

mod json;
mod junit;

pub use json::*;
pub use junit::*;

use crate::{errors::ReportWriteError, fleet::FleetRunOutcome};
use camino::{Utf8Path, Utf8PathBuf};
use tracing::debug;

/// Writes every report for a run.
#[derive(Clone, Debug)]
pub struct ReportWriter {
    output_dir: Utf8PathBuf,
}

impl ReportWriter {
    /// Creates a new writer targeting `output_dir`.
    pub fn new(output_dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Returns the path the JUnit report for `device` is written to.
    pub fn junit_path(&self, device: &str) -> Utf8PathBuf {
        self.output_dir
            .join("junit4-reports")
            .join(format!("{device}.xml"))
    }

    /// Returns the path the suites are written to.
    pub fn suites_path(&self) -> Utf8PathBuf {
        self.output_dir.join("suites.json")
    }

    /// Writes a JUnit report per device run, then the suites.
    pub fn write(
        &self,
        test_package: &str,
        outcome: &FleetRunOutcome,
    ) -> Result<(), ReportWriteError> {
        for run in &outcome.device_runs {
            let path = self.junit_path(&run.device);
            write_junit(&path, &junit_report(test_package, run))?;
            debug!("wrote JUnit report to {path}");
        }

        let path = self.suites_path();
        write_suites(&path, &outcome.suites)?;
        debug!("wrote suites to {path}");
        Ok(())
    }
}

fn create_parent(path: &Utf8Path) -> Result<(), ReportWriteError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|err| ReportWriteError::Fs {
            path: dir.to_owned(),
            err,
        })?;
    }
    Ok(())
}
