// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{ProtocolEntry, ResultEntry, StatusCode, StatusEntry};
use crate::{errors::InstrumentationError, helpers::substring_between};
use std::time::Duration;
use tracing::debug;

const STATUS_PREFIX: &str = "INSTRUMENTATION_STATUS";
const STATUS_CODE_PREFIX: &str = "INSTRUMENTATION_STATUS_CODE";
const TERMINAL_PREFIX: &str = "INSTRUMENTATION_CODE";
const RESULT_MARKER: &str = "INSTRUMENTATION_RESULT:";
const CRASH_MARKER: &str = "INSTRUMENTATION_RESULT: shortMsg=";
const RUNNER_NOT_FOUND_MARKER: &str = "Unable to find instrumentation info for";

/// The outcome of feeding one line to an [`InstrumentationDecoder`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DecodeStep {
    /// The line was buffered; no block is complete yet.
    Pending,

    /// The line completed a block.
    Entry(ProtocolEntry),

    /// The terminal line was reached. Carries the result entry buffered before it, if any.
    Finished(Option<ProtocolEntry>),
}

/// Splits instrumentation output lines into [`ProtocolEntry`] values.
///
/// The decoder doesn't do any I/O: it's driven by [`push_line`](Self::push_line).
#[derive(Clone, Debug, Default)]
pub struct InstrumentationDecoder {
    block: String,
    finished: bool,
}

impl InstrumentationDecoder {
    /// Creates a new decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true once the terminal line has been seen.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Feeds one line of output to the decoder.
    ///
    /// `timestamp` is the time the line was read, relative to the start of the stream.
    pub fn push_line(
        &mut self,
        line: &str,
        timestamp: Duration,
    ) -> Result<DecodeStep, InstrumentationError> {
        if self.finished {
            return Ok(DecodeStep::Finished(None));
        }

        let line = line.trim();

        if line.starts_with(TERMINAL_PREFIX) {
            self.finished = true;
            let block = std::mem::take(&mut self.block);
            check_fatal(&block)?;
            let entry = block.find(RESULT_MARKER).map(|index| {
                ProtocolEntry::Result(ResultEntry {
                    message: block[index + RESULT_MARKER.len()..].trim().to_owned(),
                    timestamp,
                })
            });
            debug!(?entry, "instrumentation output finished with `{line}`");
            return Ok(DecodeStep::Finished(entry));
        }

        if !self.block.is_empty() {
            self.block.push('\n');
        }
        self.block.push_str(line);

        if line.starts_with(STATUS_CODE_PREFIX) {
            let block = std::mem::take(&mut self.block);
            check_fatal(&block)?;
            let entry = parse_status_block(&block, timestamp)?;
            return Ok(DecodeStep::Entry(ProtocolEntry::Status(entry)));
        }

        Ok(DecodeStep::Pending)
    }
}

fn check_fatal(block: &str) -> Result<(), InstrumentationError> {
    if block.contains(CRASH_MARKER) {
        let message = substring_between(block, CRASH_MARKER, "\n").trim();
        return Err(InstrumentationError::Crash {
            message: message.to_owned(),
        });
    }

    if block.contains(RUNNER_NOT_FOUND_MARKER) {
        let component = substring_between(block, "ComponentInfo{", "}").trim();
        let runner = component
            .split_once('/')
            .map_or(component, |(_, runner)| runner);
        return Err(InstrumentationError::RunnerNotFound {
            component: component.to_owned(),
            runner: runner.to_owned(),
        });
    }

    Ok(())
}

fn status_value<'a>(block: &'a str, key: &str) -> &'a str {
    substring_between(block, &format!("{STATUS_PREFIX}: {key}="), STATUS_PREFIX).trim()
}

fn parse_int<T: std::str::FromStr>(
    block: &str,
    key: &'static str,
    value: &str,
) -> Result<T, InstrumentationError> {
    value
        .parse()
        .map_err(|_| InstrumentationError::MalformedBlock {
            key,
            value: value.to_owned(),
            block: block.to_owned(),
        })
}

fn parse_status_block(block: &str, timestamp: Duration) -> Result<StatusEntry, InstrumentationError> {
    let num_tests = parse_int(block, "numtests", status_value(block, "numtests"))?;
    let current = parse_int(block, "current", status_value(block, "current"))?;

    let raw_code = substring_between(block, &format!("{STATUS_CODE_PREFIX}: "), STATUS_PREFIX).trim();
    let code: i32 = parse_int(block, "status code", raw_code)?;
    let status_code =
        StatusCode::from_code(code).ok_or_else(|| InstrumentationError::UnknownStatusCode {
            code,
            block: block.to_owned(),
        })?;

    Ok(StatusEntry {
        num_tests,
        stream: status_value(block, "stream").to_owned(),
        id: status_value(block, "id").to_owned(),
        test_name: status_value(block, "test").to_owned(),
        class_name: status_value(block, "class").to_owned(),
        current,
        stack: status_value(block, "stack").to_owned(),
        status_code,
        timestamp,
    })
}
