// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Slicing the device log into per-test segments.
//!
//! The test runner logs `TestRunner: started: <test>(<class>)` and
//! `TestRunner: finished: <test>(<class>)` around every test. The [`LogSplitter`] accumulates log
//! lines and cuts a [`LogSegment`] whenever the finished marker matches the last started marker.
//! [`LogCorrelator`] follows `full.log` and writes each segment to
//! `logs/<device>/<class>/<test>.log`.

use crate::{
    errors::DevicePipelineErrorKind,
    tail::{FileTail, StopSignal},
};
use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use std::{sync::LazyLock, time::Duration};
use tracing::{debug, warn};

// Matches both `I TestRunner: ...` (threadtime format) and `I/TestRunner( 123): ...` (brief
// format).
static TEST_RUNNER_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"TestRunner(?:\(\s*\d+\))?:\s+(started|finished):\s+(.+?)\((.+)\)\s*$")
        .expect("marker regex is valid")
});

/// A start or finish marker parsed from a log line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogMarker {
    /// A test started.
    Started(TestId),

    /// A test finished.
    Finished(TestId),
}

/// Identifies a test by class and method name.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TestId {
    /// The fully qualified class name.
    pub class_name: String,

    /// The method name.
    pub test_name: String,
}

/// Parses a marker from a device log line.
pub fn parse_marker(line: &str) -> Option<LogMarker> {
    let captures = TEST_RUNNER_MARKER.captures(line)?;
    let id = TestId {
        class_name: captures[3].to_owned(),
        test_name: captures[2].to_owned(),
    };
    match &captures[1] {
        "started" => Some(LogMarker::Started(id)),
        _ => Some(LogMarker::Finished(id)),
    }
}

/// The device log lines belonging to one test.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogSegment {
    /// The test the segment belongs to.
    pub test: TestId,

    /// The log text, one line per device log line.
    pub text: String,
}

/// Splits device log lines into [`LogSegment`]s.
#[derive(Clone, Debug, Default)]
pub struct LogSplitter {
    buffer: String,
    started: Option<TestId>,
}

impl LogSplitter {
    /// Creates a new splitter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one line, returning a segment if the line finished the current test.
    pub fn push_line(&mut self, line: &str) -> Option<LogSegment> {
        self.buffer.push_str(line);
        self.buffer.push('\n');

        match parse_marker(line) {
            Some(LogMarker::Started(id)) => {
                self.started = Some(id);
                None
            }
            Some(LogMarker::Finished(id)) if self.started.as_ref() == Some(&id) => {
                self.started = None;
                Some(LogSegment {
                    test: id,
                    text: std::mem::take(&mut self.buffer),
                })
            }
            Some(LogMarker::Finished(_)) | None => None,
        }
    }
}

/// Returns the path the log segment for a test is written to.
pub fn segment_path(logs_dir: &Utf8Path, class_name: &str, test_name: &str) -> Utf8PathBuf {
    logs_dir.join(class_name).join(format!("{test_name}.log"))
}

/// Follows a device log and writes per-test segments.
#[derive(Debug)]
pub struct LogCorrelator {
    device: String,
    logs_dir: Utf8PathBuf,
    poll_interval: Duration,
}

impl LogCorrelator {
    /// Creates a new correlator writing segments under `logs_dir`.
    pub fn new(device: impl Into<String>, logs_dir: Utf8PathBuf, poll_interval: Duration) -> Self {
        Self {
            device: device.into(),
            logs_dir,
            poll_interval,
        }
    }

    /// Follows `full_log` until `stop` fires, returning the number of segments written.
    ///
    /// A device log that can't be read is not an error: tests simply don't get log segments.
    /// Failing to write a segment is an error.
    pub async fn run(
        &self,
        full_log: &Utf8Path,
        stop: StopSignal,
    ) -> Result<usize, DevicePipelineErrorKind> {
        let mut tail = match FileTail::open(full_log, stop, self.poll_interval).await {
            Ok(tail) => tail,
            Err(err) => {
                warn!("[{}] device log unavailable, skipping per-test logs: {err}", self.device);
                return Ok(0);
            }
        };

        let mut splitter = LogSplitter::new();
        let mut written = 0;
        loop {
            let line = match tail.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(err) => {
                    warn!("[{}] stopped reading device log: {err}", self.device);
                    break;
                }
            };

            if let Some(segment) = splitter.push_line(&line) {
                self.write_segment(&segment).await?;
                written += 1;
            }
        }

        debug!("[{}] wrote {written} log segments", self.device);
        Ok(written)
    }

    async fn write_segment(&self, segment: &LogSegment) -> Result<(), DevicePipelineErrorKind> {
        let path = segment_path(
            &self.logs_dir,
            &segment.test.class_name,
            &segment.test.test_name,
        );
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| DevicePipelineErrorKind::Fs {
                    path: parent.to_owned(),
                    err,
                })?;
        }
        tokio::fs::write(&path, &segment.text)
            .await
            .map_err(|err| DevicePipelineErrorKind::Fs { path, err })
    }
}
