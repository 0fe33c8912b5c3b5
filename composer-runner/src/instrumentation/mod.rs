// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The instrumentation status protocol.
//!
//! `am instrument -r` prints a sequence of status blocks while tests run:
//!
//! ```text
//! INSTRUMENTATION_STATUS: numtests=2
//! INSTRUMENTATION_STATUS: class=com.example.FooTest
//! INSTRUMENTATION_STATUS: test=bar
//! INSTRUMENTATION_STATUS: current=1
//! INSTRUMENTATION_STATUS_CODE: 1
//! ```
//!
//! followed by an optional `INSTRUMENTATION_RESULT:` block and a terminal `INSTRUMENTATION_CODE:`
//! line. The [`InstrumentationDecoder`] turns lines into [`ProtocolEntry`] values, and the
//! [`TestReconstructor`] pairs those entries into [`Test`]s. [`InstrumentationStream`] drives
//! both from a [`FileTail`].

mod decoder;
mod reconstructor;

pub use decoder::*;
pub use reconstructor::*;

use crate::{errors::InstrumentationError, tail::FileTail, time::StopwatchStart};
use serde::Serialize;
use std::{fmt, time::Duration};

/// A status code reported at the end of an instrumentation status block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StatusCode {
    /// A test started.
    Start,

    /// A test passed.
    Ok,

    /// A test failed.
    Failure,

    /// A test was ignored.
    Ignored,

    /// A test's assumption failed.
    AssumptionFailure,
}

impl StatusCode {
    /// Converts a raw status code, returning `None` for unknown codes.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(Self::Start),
            0 => Some(Self::Ok),
            -2 => Some(Self::Failure),
            -3 => Some(Self::Ignored),
            -4 => Some(Self::AssumptionFailure),
            _ => None,
        }
    }

    /// Returns the raw status code.
    pub fn code(self) -> i32 {
        match self {
            Self::Start => 1,
            Self::Ok => 0,
            Self::Failure => -2,
            Self::Ignored => -3,
            Self::AssumptionFailure => -4,
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Start => "start",
            Self::Ok => "ok",
            Self::Failure => "failure",
            Self::Ignored => "ignored",
            Self::AssumptionFailure => "assumption failure",
        };
        write!(f, "{name} ({})", self.code())
    }
}

/// One logical entry decoded from the instrumentation output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProtocolEntry {
    /// A status block.
    Status(StatusEntry),

    /// An `INSTRUMENTATION_RESULT:` block.
    Result(ResultEntry),
}

/// A decoded status block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusEntry {
    /// The total number of tests the runner will run.
    pub num_tests: usize,

    /// The `stream` value, usually a human-readable description.
    pub stream: String,

    /// The runner's identifier.
    pub id: String,

    /// The test method name.
    pub test_name: String,

    /// The fully qualified test class name.
    pub class_name: String,

    /// The 1-based index of the test.
    pub current: usize,

    /// The stacktrace, empty if there isn't one.
    pub stack: String,

    /// The status code closing the block.
    pub status_code: StatusCode,

    /// When the block was completed, relative to the start of the stream.
    pub timestamp: Duration,
}

/// A decoded `INSTRUMENTATION_RESULT:` block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResultEntry {
    /// The text following `INSTRUMENTATION_RESULT:`.
    pub message: String,

    /// When the block was completed, relative to the start of the stream.
    pub timestamp: Duration,
}

/// A test whose outcome is known.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Test {
    /// The 1-based index assigned by the runner.
    pub index: usize,

    /// The total number of tests reported by the runner.
    pub total: usize,

    /// The fully qualified test class name.
    pub class_name: String,

    /// The test method name.
    pub test_name: String,

    /// The outcome.
    #[serde(flatten)]
    pub status: TestStatus,

    /// The time between the start and the end of the test.
    #[serde(rename = "duration-nanos", with = "crate::helpers::duration_nanos")]
    pub duration: Duration,
}

/// The outcome of a [`Test`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum TestStatus {
    /// The test passed.
    Passed,

    /// The test was ignored, or one of its assumptions failed.
    Ignored {
        /// The stacktrace of the assumption failure, if any.
        #[serde(skip_serializing_if = "Option::is_none")]
        stacktrace: Option<String>,
    },

    /// The test failed.
    Failed {
        /// The failure stacktrace, or the runner's message if the test never finished.
        stacktrace: String,
    },
}

impl TestStatus {
    /// Returns true if the test failed.
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Decodes tests from a followed instrumentation output file.
#[derive(Debug)]
pub struct InstrumentationStream {
    tail: FileTail,
    decoder: InstrumentationDecoder,
    reconstructor: TestReconstructor,
    clock: StopwatchStart,
    done: bool,
}

impl InstrumentationStream {
    /// Creates a new stream reading from `tail`.
    pub fn new(tail: FileTail) -> Self {
        Self {
            tail,
            decoder: InstrumentationDecoder::new(),
            reconstructor: TestReconstructor::new(),
            clock: crate::time::stopwatch(),
            done: false,
        }
    }

    /// Returns the next test, in the order results were reported.
    ///
    /// Returns `Ok(None)` once the run is complete. If the output ends before every reported test
    /// was observed, returns [`InstrumentationError::CountMismatch`].
    pub async fn next_test(&mut self) -> Result<Option<Test>, InstrumentationError> {
        loop {
            if self.done {
                return Ok(None);
            }
            if self.reconstructor.is_complete() {
                self.done = true;
                return Ok(None);
            }

            let Some(line) = self.tail.next_line().await? else {
                self.done = true;
                self.reconstructor.finish()?;
                return Ok(None);
            };

            match self.decoder.push_line(&line, self.clock.elapsed())? {
                DecodeStep::Pending => {}
                DecodeStep::Entry(entry) => {
                    if let Some(test) = self.reconstructor.push(entry)? {
                        return Ok(Some(test));
                    }
                }
                DecodeStep::Finished(entry) => {
                    self.done = true;
                    let test = match entry {
                        Some(entry) => self.reconstructor.push(entry)?,
                        None => None,
                    };
                    self.reconstructor.finish()?;
                    return Ok(test);
                }
            }
        }
    }
}
