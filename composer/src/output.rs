// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use clap::{ArgAction, Args, ValueEnum};
use owo_colors::{OwoColorize, Style, style};
use std::fmt;
use tracing::{
    Event, Level, Subscriber,
    field::{Field, Visit},
    level_filters::LevelFilter,
};
use tracing_subscriber::{
    Layer,
    filter::Targets,
    fmt::{FmtContext, FormatEvent, FormatFields, format},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
};

/// The target used for log lines that shouldn't be prefixed with their level.
pub(crate) const NO_HEADING_TARGET: &str = "composer::no_heading";

const LOG_ENV: &str = "COMPOSER_LOG";

#[derive(Copy, Clone, Debug, Args)]
#[command(next_help_heading = "Output options")]
#[must_use]
pub(crate) struct OutputOpts {
    /// Either `true` or `false` to enable or disable debug output
    #[arg(
        long,
        action = ArgAction::Set,
        default_value_t = false,
        value_name = "BOOL",
        env = "COMPOSER_VERBOSE"
    )]
    pub(crate) verbose_output: bool,

    /// Produce color output: auto, always, never
    #[arg(
        long,
        value_enum,
        default_value_t,
        hide_possible_values = true,
        value_name = "WHEN",
        env = "COMPOSER_COLOR"
    )]
    pub(crate) color: Color,
}

impl OutputOpts {
    pub(crate) fn init(self) -> OutputContext {
        let OutputOpts {
            verbose_output,
            color,
        } = self;

        color.init(verbose_output);

        OutputContext { color }
    }
}

/// How output is written for this invocation.
#[derive(Copy, Clone, Debug)]
#[must_use]
pub struct OutputContext {
    pub(crate) color: Color,
}

impl OutputContext {
    /// Returns general stderr styles for the current output context.
    pub fn stderr_styles(&self) -> StderrStyles {
        let mut styles = StderrStyles::default();

        if self.color.should_colorize(supports_color::Stream::Stderr) {
            styles.colorize();
        }

        styles
    }
}

/// When to produce color output.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
#[must_use]
pub enum Color {
    /// Colorize if the stream is a terminal that supports it.
    #[default]
    Auto,
    /// Always colorize.
    Always,
    /// Never colorize.
    Never,
}

static INIT_LOGGER: std::sync::Once = std::sync::Once::new();

/// Writes `level: message` lines, or bare messages for [`NO_HEADING_TARGET`].
struct SimpleFormatter {
    colorize: bool,
}

impl SimpleFormatter {
    fn heading(&self, level: Level) -> (&'static str, Style) {
        let (heading, colored) = match level {
            Level::ERROR => ("error", style().red().bold()),
            Level::WARN => ("warning", style().yellow().bold()),
            Level::INFO => ("info", style().bold()),
            Level::DEBUG => ("debug", style().bold()),
            Level::TRACE => ("trace", style().dimmed()),
        };
        (heading, if self.colorize { colored } else { style() })
    }
}

impl<S, N> FormatEvent<S, N> for SimpleFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();
        if metadata.target() != NO_HEADING_TARGET {
            let (heading, heading_style) = self.heading(*metadata.level());
            write!(writer, "{}: ", heading.style(heading_style))?;
        }

        let mut visitor = MessageVisitor {
            writer: &mut writer,
            result: Ok(()),
        };
        event.record(&mut visitor);
        visitor.result?;

        writeln!(writer)
    }
}

/// Writes only the `message` field of an event.
struct MessageVisitor<'writer, 'a> {
    writer: &'a mut format::Writer<'writer>,
    result: fmt::Result,
}

impl Visit for MessageVisitor<'_, '_> {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" && self.result.is_ok() {
            self.result = write!(self.writer, "{value:?}");
        }
    }
}

/// Parses the `COMPOSER_LOG` filter, falling back to `default` if it's unset or empty.
fn log_targets(env: Option<&str>, default: LevelFilter) -> Result<Targets, String> {
    match env {
        None | Some("") => Ok(Targets::new().with_default(default)),
        Some(level_str) => level_str
            .parse()
            .map_err(|err| format!("invalid {LOG_ENV} `{level_str}`: {err}")),
    }
}

impl Color {
    pub(crate) fn init(self, verbose: bool) {
        let colorize = self.should_colorize(supports_color::Stream::Stderr);

        INIT_LOGGER.call_once(|| {
            let default = if verbose {
                LevelFilter::DEBUG
            } else {
                LevelFilter::INFO
            };
            let env = std::env::var(LOG_ENV).ok();
            let (targets, parse_error) = match log_targets(env.as_deref(), default) {
                Ok(targets) => (targets, None),
                Err(error) => (Targets::new().with_default(default), Some(error)),
            };

            let layer = tracing_subscriber::fmt::layer()
                .event_format(SimpleFormatter { colorize })
                .with_writer(std::io::stderr)
                .with_filter(targets);

            tracing_subscriber::registry().with(layer).init();

            if let Some(error) = parse_error {
                tracing::warn!("{error}, using default log level");
            }
        });
    }

    pub(crate) fn should_colorize(self, stream: supports_color::Stream) -> bool {
        match self {
            Color::Auto => supports_color::on_cached(stream).is_some(),
            Color::Always => true,
            Color::Never => false,
        }
    }
}

/// Styles for messages written directly to stderr.
#[derive(Debug, Default)]
pub struct StderrStyles {
    pub(crate) bold: Style,
    pub(crate) hint: Style,
}

impl StderrStyles {
    fn colorize(&mut self) {
        self.bold = style().bold();
        self.hint = style().cyan();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(None, LevelFilter::INFO => Some(LevelFilter::INFO); "unset")]
    #[test_case(Some(""), LevelFilter::DEBUG => Some(LevelFilter::DEBUG); "empty")]
    #[test_case(Some("warn"), LevelFilter::INFO => Some(LevelFilter::WARN); "level only")]
    fn default_level(env: Option<&str>, default: LevelFilter) -> Option<LevelFilter> {
        log_targets(env, default)
            .expect("valid filter")
            .default_level()
    }

    #[test]
    fn per_target_level() {
        let targets: Targets =
            log_targets(Some("composer_runner::instrumentation=trace,info"), LevelFilter::INFO)
                .expect("valid filter");
        assert!(targets.would_enable("composer_runner::instrumentation::decoder", &Level::TRACE));
        assert!(!targets.would_enable("composer_runner::fleet", &Level::DEBUG));
    }

    #[test_case(Level::ERROR => "error"; "error")]
    #[test_case(Level::WARN => "warning"; "warn")]
    #[test_case(Level::TRACE => "trace"; "trace")]
    fn plain_heading(level: Level) -> String {
        let (heading, heading_style) = SimpleFormatter { colorize: false }.heading(level);
        heading.style(heading_style).to_string()
    }

    #[test]
    fn invalid_filter() {
        let err = log_targets(Some("composer=loud"), LevelFilter::INFO).expect_err("bad level");
        assert!(err.contains("COMPOSER_LOG"), "{err}");
    }
}
