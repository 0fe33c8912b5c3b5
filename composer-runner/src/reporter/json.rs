// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::create_parent;
use crate::{errors::ReportWriteError, suite::Suite};
use camino::Utf8Path;
use std::{
    fs::File,
    io::{BufWriter, Write},
};

/// Writes `suites` to `path` as a JSON array.
pub fn write_suites(path: &Utf8Path, suites: &[Suite]) -> Result<(), ReportWriteError> {
    create_parent(path)?;
    let f = File::create(path).map_err(|err| ReportWriteError::Fs {
        path: path.to_owned(),
        err,
    })?;
    let mut writer = BufWriter::new(f);
    serde_json::to_writer_pretty(&mut writer, suites).map_err(|err| ReportWriteError::Json {
        path: path.to_owned(),
        err,
    })?;
    writer.flush().map_err(|err| ReportWriteError::Fs {
        path: path.to_owned(),
        err,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::Utf8TempDir;
    use chrono::DateTime;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    #[test]
    fn writes_suites() {
        let dir = Utf8TempDir::new().expect("created temp dir");
        let path = dir.path().join("out/suites.json");
        let suite = Suite {
            test_package: "com.example.test".to_owned(),
            devices: vec!["emulator-5554".to_owned()],
            tests: Vec::new(),
            counts: Default::default(),
            duration: Duration::from_millis(2),
            timestamp: DateTime::parse_from_rfc3339("2024-01-02T03:04:05+01:00")
                .expect("valid timestamp"),
        };
        write_suites(&path, &[suite]).expect("suites written");

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).expect("readable"))
                .expect("valid json");
        assert_eq!(value[0]["devices"][0], "emulator-5554");
        assert_eq!(value[0]["passed"], 0);
        assert_eq!(value[0]["duration-nanos"], 2_000_000);
        assert_eq!(value[0]["timestamp"], "2024-01-02T03:04:05+01:00");
    }
}
