// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{ProtocolEntry, ResultEntry, StatusCode, StatusEntry, Test, TestStatus};
use crate::errors::InstrumentationError;
use std::collections::HashSet;
use tracing::debug;

/// Pairs [`ProtocolEntry`] values into [`Test`]s.
///
/// Runners that execute tests on several threads may interleave the start and end entries of
/// different tests, so every unpaired entry is kept until its partner arrives.
#[derive(Clone, Debug, Default)]
pub struct TestReconstructor {
    pending: Vec<StatusEntry>,
    emitted: HashSet<(String, String, usize)>,
    expected: usize,
    end_markers: usize,
    complete: bool,
}

impl TestReconstructor {
    /// Creates a new reconstructor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true once every test reported by the runner has been observed.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Returns the number of tests emitted so far.
    pub fn emitted_count(&self) -> usize {
        self.emitted.len()
    }

    /// Returns the number of tests the runner reported it would run.
    pub fn expected_count(&self) -> usize {
        self.expected
    }

    /// Feeds one entry, returning a test if the entry completed one.
    pub fn push(&mut self, entry: ProtocolEntry) -> Result<Option<Test>, InstrumentationError> {
        if self.complete {
            debug!(?entry, "ignoring entry after the run completed");
            return Ok(None);
        }

        match entry {
            ProtocolEntry::Status(status) => self.push_status(status),
            ProtocolEntry::Result(result) => Ok(self.push_result(result)),
        }
    }

    /// Checks the final state once the entry stream has ended.
    pub fn finish(&mut self) -> Result<(), InstrumentationError> {
        if !self.complete && self.emitted_count() < self.expected {
            return Err(InstrumentationError::CountMismatch {
                expected: self.expected,
                actual: self.emitted_count(),
            });
        }
        self.complete = true;
        Ok(())
    }

    fn push_status(&mut self, entry: StatusEntry) -> Result<Option<Test>, InstrumentationError> {
        self.expected = self.expected.max(entry.num_tests);
        if entry.num_tests > 0 && entry.current == entry.num_tests {
            self.end_markers += 1;
        }

        let partner = self.pending.iter().rposition(|pending| {
            pending.class_name == entry.class_name
                && pending.test_name == entry.test_name
                && pending.current == entry.current
                && pending.status_code != entry.status_code
        });

        let test = match partner {
            Some(position) => {
                let first = self.pending.remove(position);
                self.pair(first, entry)?
            }
            None => {
                self.pending.push(entry);
                None
            }
        };

        self.check_termination()?;
        Ok(test)
    }

    fn push_result(&mut self, result: ResultEntry) -> Option<Test> {
        let Some(position) = self
            .pending
            .iter()
            .rposition(|pending| pending.status_code == StatusCode::Start)
        else {
            debug!(message = %result.message, "instrumentation result with no test in progress");
            return None;
        };

        let start = self.pending.remove(position);
        let duration = result.timestamp.saturating_sub(start.timestamp);
        self.emit(
            start,
            TestStatus::Failed {
                stacktrace: result.message,
            },
            duration,
        )
    }

    fn pair(
        &mut self,
        first: StatusEntry,
        second: StatusEntry,
    ) -> Result<Option<Test>, InstrumentationError> {
        let status = match (first.status_code, second.status_code) {
            (StatusCode::Start, StatusCode::Ok) => TestStatus::Passed,
            (StatusCode::Start, StatusCode::Ignored | StatusCode::AssumptionFailure) => {
                TestStatus::Ignored {
                    stacktrace: (!second.stack.is_empty()).then_some(second.stack),
                }
            }
            (StatusCode::Start, StatusCode::Failure) => TestStatus::Failed {
                stacktrace: second.stack,
            },
            (first_code, second_code) => {
                return Err(InstrumentationError::InvalidPairing {
                    class_name: second.class_name,
                    test_name: second.test_name,
                    index: second.current,
                    first: first_code,
                    second: second_code,
                });
            }
        };
        let duration = second.timestamp.saturating_sub(first.timestamp);
        Ok(self.emit(first, status, duration))
    }

    fn emit(
        &mut self,
        start: StatusEntry,
        status: TestStatus,
        duration: std::time::Duration,
    ) -> Option<Test> {
        let key = (start.class_name, start.test_name, start.current);
        if self.emitted.contains(&key) {
            debug!(class = %key.0, test = %key.1, index = key.2, "dropping duplicate test");
            return None;
        }

        let test = Test {
            index: key.2,
            total: start.num_tests,
            class_name: key.0.clone(),
            test_name: key.1.clone(),
            status,
            duration,
        };
        self.emitted.insert(key);
        Some(test)
    }

    fn check_termination(&mut self) -> Result<(), InstrumentationError> {
        if self.end_markers < 2 {
            return Ok(());
        }
        if self.emitted_count() >= self.expected {
            self.complete = true;
            return Ok(());
        }
        // With interleaved tests, the end markers can arrive while other tests are still running.
        let in_progress = self
            .pending
            .iter()
            .any(|pending| pending.status_code == StatusCode::Start);
        if in_progress {
            return Ok(());
        }
        Err(InstrumentationError::CountMismatch {
            expected: self.expected,
            actual: self.emitted_count(),
        })
    }
}
