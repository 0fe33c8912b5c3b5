// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! General support code for composer-runner.

use std::{fmt, time::Duration};

/// Utilities for pluralizing various words based on count.
pub mod plural {
    /// Returns "test" if `count` is 1, otherwise "tests".
    pub fn tests_str(count: usize) -> &'static str {
        if count == 1 { "test" } else { "tests" }
    }

    /// Returns "device" if `count` is 1, otherwise "devices".
    pub fn devices_str(count: usize) -> &'static str {
        if count == 1 { "device" } else { "devices" }
    }
}

/// Returns the text between the first occurrence of `first` and the next occurrence of `second`
/// after it, or the rest of the string if `second` doesn't follow.
///
/// Returns an empty string if `first` doesn't occur at all.
pub(crate) fn substring_between<'a>(s: &'a str, first: &str, second: &str) -> &'a str {
    let Some(index) = s.find(first) else {
        return "";
    };
    let start = index + first.len();
    let rest = &s[start..];
    match rest.find(second) {
        Some(end) => &rest[..end],
        None => rest,
    }
}

/// Displays a duration as hours, minutes and seconds, for example `1 minute 5 seconds`.
///
/// Sub-second precision is truncated. Hours are only shown if non-zero, and minutes are shown if
/// either they or the hours are non-zero.
#[derive(Clone, Copy, Debug)]
pub struct DisplayHumanDuration(pub Duration);

impl fmt::Display for DisplayHumanDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total = self.0.as_secs();
        let hours = total / 3600;
        let minutes = total % 3600 / 60;
        let seconds = total % 60;

        if hours != 0 {
            write!(f, "{hours} hour{} ", if hours > 1 { "s" } else { "" })?;
        }
        if minutes != 0 || hours != 0 {
            write!(f, "{minutes} minute{} ", if minutes != 1 { "s" } else { "" })?;
        }
        write!(f, "{seconds} second{}", if seconds != 1 { "s" } else { "" })
    }
}

/// Serializes a [`Duration`] as an integer number of nanoseconds.
pub(crate) mod duration_nanos {
    use serde::Serializer;
    use std::time::Duration;

    pub(crate) fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        // u64 nanoseconds covers several centuries.
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        serializer.serialize_u64(nanos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("a[b]c", "[", "]", "b"; "both present")]
    #[test_case("a[bc", "[", "]", "bc"; "second missing")]
    #[test_case("abc", "[", "]", ""; "first missing")]
    #[test_case("]a[b]", "[", "]", "b"; "second only counted after first")]
    #[test_case("key=value", "key=", "INSTRUMENTATION_STATUS", "value"; "key at end")]
    fn substring_between_cases(input: &str, first: &str, second: &str, expected: &str) {
        assert_eq!(substring_between(input, first, second), expected);
    }

    #[test_case(Duration::from_secs(1), "1 second"; "one second")]
    #[test_case(Duration::from_secs(59), "59 seconds"; "fifty nine seconds")]
    #[test_case(Duration::from_secs(60), "1 minute 0 seconds"; "one minute")]
    #[test_case(Duration::from_secs(61), "1 minute 1 second"; "one minute one second")]
    #[test_case(Duration::from_secs(62), "1 minute 2 seconds"; "one minute two seconds")]
    #[test_case(Duration::from_secs(3600), "1 hour 0 minutes 0 seconds"; "one hour")]
    #[test_case(Duration::from_secs(3660), "1 hour 1 minute 0 seconds"; "one hour one minute")]
    #[test_case(Duration::from_secs(7322), "2 hours 2 minutes 2 seconds"; "two of everything")]
    #[test_case(Duration::from_millis(999), "0 seconds"; "sub-second truncated")]
    fn display_human_duration(duration: Duration, expected: &str) {
        assert_eq!(DisplayHumanDuration(duration).to_string(), expected);
    }

    #[test_case(0 => "tests"; "zero")]
    #[test_case(1 => "test"; "one")]
    #[test_case(2 => "tests"; "two")]
    fn plural_tests(count: usize) -> &'static str {
        plural::tests_str(count)
    }
}
