// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Pulling files produced by tests off the device.
//!
//! Tests using the spoon conventions write screenshots to
//! `<external storage>/app_spoon-screenshots/<class>/<test>` and other files to
//! `<external storage>/app_spoon-files/<class>/<test>`. Artifacts are optional, so any failure to
//! pull them is logged and results in an empty list.

use crate::{
    bridge::{DeviceBridge, PullOutcome},
    errors::BridgeError,
    instrumentation::Test,
};
use camino::{Utf8Path, Utf8PathBuf};
use std::{sync::Arc, time::Duration};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Attempts made to pull each artifact directory, all within one pull timeout.
const PULL_ATTEMPTS: usize = 3;

/// The kinds of artifacts pulled for every test.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArtifactKind {
    /// Screenshots.
    Screenshots,

    /// Arbitrary files.
    Files,
}

impl ArtifactKind {
    /// The directory under external storage the artifacts are written to on the device.
    pub fn remote_dir_name(self) -> &'static str {
        match self {
            Self::Screenshots => "app_spoon-screenshots",
            Self::Files => "app_spoon-files",
        }
    }

    /// The directory under the output directory the artifacts are copied to.
    pub fn local_dir_name(self) -> &'static str {
        match self {
            Self::Screenshots => "screenshots",
            Self::Files => "files",
        }
    }
}

/// The artifacts pulled for one test.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TestArtifacts {
    /// Paths to pulled files, sorted by name.
    pub file_paths: Vec<Utf8PathBuf>,

    /// Paths to pulled screenshots, sorted by name.
    pub screenshot_paths: Vec<Utf8PathBuf>,
}

/// Pulls per-test artifacts from a single device.
#[derive(Clone, Debug)]
pub struct ArtifactCollector {
    bridge: Arc<dyn DeviceBridge>,
    device: String,
    output_dir: Utf8PathBuf,
    external_storage: String,
    pull_timeout: Duration,
}

impl ArtifactCollector {
    /// Creates a new collector.
    ///
    /// `external_storage` is the device's external storage root, for example `/sdcard`.
    pub fn new(
        bridge: Arc<dyn DeviceBridge>,
        device: impl Into<String>,
        output_dir: Utf8PathBuf,
        external_storage: impl Into<String>,
        pull_timeout: Duration,
    ) -> Self {
        Self {
            bridge,
            device: device.into(),
            output_dir,
            external_storage: external_storage.into(),
            pull_timeout,
        }
    }

    /// Returns the remote directory holding `kind` artifacts for `test`.
    pub fn remote_dir(&self, kind: ArtifactKind, test: &Test) -> String {
        format!(
            "{}/{}/{}/{}",
            self.external_storage.trim_end_matches('/'),
            kind.remote_dir_name(),
            test.class_name,
            test.test_name,
        )
    }

    /// Returns the local directory `kind` artifacts for `test` are copied to.
    pub fn local_dir(&self, kind: ArtifactKind, test: &Test) -> Utf8PathBuf {
        self.output_dir
            .join(kind.local_dir_name())
            .join(&self.device)
            .join(&test.class_name)
            .join(&test.test_name)
    }

    /// Pulls screenshots and files for `test` concurrently.
    pub async fn collect(&self, test: &Test) -> TestArtifacts {
        let (screenshot_paths, file_paths) = tokio::join!(
            self.pull(ArtifactKind::Screenshots, test),
            self.pull(ArtifactKind::Files, test),
        );
        TestArtifacts {
            file_paths,
            screenshot_paths,
        }
    }

    async fn pull(&self, kind: ArtifactKind, test: &Test) -> Vec<Utf8PathBuf> {
        let remote = self.remote_dir(kind, test);
        let local = self.local_dir(kind, test);

        if let Some(parent) = local.parent()
            && let Err(err) = tokio::fs::create_dir_all(parent).await
        {
            warn!("[{}] failed to create `{parent}`: {err}", self.device);
            return Vec::new();
        }

        let pull = self.pull_with_retries(&remote, &local);
        match tokio::time::timeout(self.pull_timeout, pull).await {
            Ok(Ok(PullOutcome::Pulled)) => list_files(&local),
            Ok(Ok(PullOutcome::Missing)) => {
                debug!("[{}] no {} at {remote}", self.device, kind.local_dir_name());
                Vec::new()
            }
            Ok(Err(err)) => {
                warn!("[{}] failed to pull {remote}: {err}", self.device);
                Vec::new()
            }
            Err(_) => {
                warn!(
                    "[{}] pulling {remote} timed out after {:?}",
                    self.device, self.pull_timeout
                );
                Vec::new()
            }
        }
    }

    async fn pull_with_retries(
        &self,
        remote: &str,
        local: &Utf8Path,
    ) -> Result<PullOutcome, BridgeError> {
        let mut attempt = 1;
        loop {
            match self.bridge.pull_dir(&self.device, remote, local).await {
                Err(err) if attempt < PULL_ATTEMPTS => {
                    warn!(
                        "[{}] failed to pull {remote} (attempt {attempt}/{PULL_ATTEMPTS}), retrying: {err}",
                        self.device
                    );
                    attempt += 1;
                    // The bridge expects `local` not to exist.
                    if let Err(err) = tokio::fs::remove_dir_all(local).await
                        && err.kind() != std::io::ErrorKind::NotFound
                    {
                        debug!("[{}] failed to remove partial pull `{local}`: {err}", self.device);
                    }
                }
                result => return result,
            }
        }
    }
}

/// Lists the files under `dir`, sorted by name. A missing directory has no files.
fn list_files(dir: &Utf8Path) -> Vec<Utf8PathBuf> {
    WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(err) => {
                debug!("skipping unreadable artifact entry: {err}");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| Utf8PathBuf::from_path_buf(entry.into_path()).ok())
        .collect()
}
