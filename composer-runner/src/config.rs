// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Composer configuration.
//!
//! Configuration is read from `.config/composer.toml` (or a file passed on the command line),
//! layered over the defaults in `default-config.toml`.

use crate::{
    errors::{ConfigParseError, ToolPathError},
    plan::Timeouts,
};
use camino::{Utf8Path, Utf8PathBuf};
use config::{Config, File, FileFormat};
use serde::Deserialize;
use std::{ffi::OsString, io, time::Duration};
use tracing::debug;

/// Overall configuration for composer.
#[derive(Clone, Debug)]
pub struct ComposerConfig {
    inner: ComposerConfigImpl,
}

impl ComposerConfig {
    /// The default location of the config relative to the working directory.
    pub const CONFIG_PATH: &'static str = ".config/composer.toml";

    /// Contains the default config as a TOML file.
    pub const DEFAULT_CONFIG: &'static str = include_str!("../default-config.toml");

    /// Reads the config from `config_file`, or if not specified from `.config/composer.toml` in
    /// `cwd` if it exists.
    pub fn from_sources(
        cwd: &Utf8Path,
        config_file: Option<&Utf8Path>,
    ) -> Result<Self, ConfigParseError> {
        let (config_file, source) = match config_file {
            Some(file) => (file.to_owned(), File::new(file.as_str(), FileFormat::Toml)),
            None => {
                let config_file = cwd.join(Self::CONFIG_PATH);
                let source = File::new(config_file.as_str(), FileFormat::Toml).required(false);
                (config_file, source)
            }
        };
        debug!("reading config from {config_file} (layered over defaults)");

        let inner = Config::builder()
            .add_source(File::from_str(Self::DEFAULT_CONFIG, FileFormat::Toml))
            .add_source(source)
            .build()
            .and_then(|config| config.try_deserialize::<ComposerConfigImpl>())
            .map_err(|err| ConfigParseError::new(&config_file, err))?;

        Ok(Self { inner })
    }

    /// Returns the default config.
    pub fn default_config() -> Self {
        let inner = Config::builder()
            .add_source(File::from_str(Self::DEFAULT_CONFIG, FileFormat::Toml))
            .build()
            .and_then(|config| config.try_deserialize())
            .expect("default config is always valid");
        Self { inner }
    }

    /// Returns the configured tool locations.
    pub fn tools(&self) -> &ToolsConfig {
        &self.inner.tools
    }

    /// Returns the configured time limits.
    pub fn timeouts(&self) -> Timeouts {
        let timeouts = &self.inner.timeouts;
        Timeouts {
            install: timeouts.install,
            pull: timeouts.pull,
            shell: timeouts.shell,
        }
    }

    /// Returns how often followed files are polled.
    pub fn poll_interval(&self) -> Duration {
        self.inner.tail.poll_interval
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ComposerConfigImpl {
    #[serde(default)]
    tools: ToolsConfig,
    timeouts: TimeoutsConfig,
    tail: TailConfig,
}

/// The `[tools]` section.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ToolsConfig {
    /// The root of the Android SDK.
    pub android_home: Option<Utf8PathBuf>,

    /// The adb binary.
    pub adb: Option<Utf8PathBuf>,

    /// The aapt binary.
    pub aapt: Option<Utf8PathBuf>,
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct TimeoutsConfig {
    #[serde(with = "humantime_serde")]
    install: Duration,
    #[serde(with = "humantime_serde")]
    pull: Duration,
    #[serde(with = "humantime_serde")]
    shell: Duration,
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct TailConfig {
    #[serde(with = "humantime_serde")]
    poll_interval: Duration,
}

/// Resolved locations of the Android SDK tools.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolPaths {
    /// The adb binary.
    pub adb: Utf8PathBuf,

    /// The aapt binary, if one was found.
    pub aapt: Option<Utf8PathBuf>,
}

impl ToolPaths {
    /// Resolves tool locations from the config, falling back to the SDK at `android_home_env`
    /// (the value of `ANDROID_HOME`).
    pub fn resolve(
        tools: &ToolsConfig,
        android_home_env: Option<OsString>,
    ) -> Result<Self, ToolPathError> {
        let android_home = match (&tools.android_home, android_home_env) {
            (Some(home), _) => Some(home.clone()),
            (None, Some(env)) => Some(
                Utf8PathBuf::from_path_buf(env.into())
                    .map_err(|_| ToolPathError::AndroidHomeInvalidUtf8)?,
            ),
            (None, None) => None,
        };

        let adb = match (&tools.adb, &android_home) {
            (Some(adb), _) => adb.clone(),
            (None, Some(home)) => home.join("platform-tools").join("adb"),
            (None, None) => return Err(ToolPathError::AndroidHomeMissing),
        };

        let aapt = match (&tools.aapt, &android_home) {
            (Some(aapt), _) => Some(aapt.clone()),
            (None, Some(home)) => newest_build_tools(&home.join("build-tools"))?
                .map(|dir| dir.join("aapt")),
            (None, None) => None,
        };

        debug!(%adb, ?aapt, "resolved tool paths");
        Ok(Self { adb, aapt })
    }
}

/// Returns the build-tools directory with the highest version, if any.
fn newest_build_tools(dir: &Utf8Path) -> Result<Option<Utf8PathBuf>, ToolPathError> {
    let entries = match dir.read_dir_utf8() {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(ToolPathError::BuildToolsRead {
                dir: dir.to_owned(),
                err,
            });
        }
    };

    let mut newest: Option<(semver::Version, Utf8PathBuf)> = None;
    for entry in entries {
        let entry = entry.map_err(|err| ToolPathError::BuildToolsRead {
            dir: dir.to_owned(),
            err,
        })?;
        // Directories that aren't plain versions (for example, previews) are skipped.
        let Ok(version) = semver::Version::parse(entry.file_name()) else {
            continue;
        };
        if newest.as_ref().is_none_or(|(current, _)| version > *current) {
            newest = Some((version, entry.into_path()));
        }
    }

    Ok(newest.map(|(_, path)| path))
}
