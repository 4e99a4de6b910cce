//! Logging configuration and setup.
//!
//! OffKit crates log at the configured level while HTTP dependencies stay at
//! `warn` unless asked otherwise. Logs go to stderr so that command output on
//! stdout stays clean.
//!
//! Two environment variables override the programmatic settings:
//!
//! - `OFFKIT_LOG`: a full `EnvFilter` directive string
//! - `OFFKIT_LOG_FORMAT`: `pretty`, `compact` or `json`

use std::fmt as std_fmt;
use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
    EnvFilter,
};

/// Filter override variable.
pub const LOG_ENV: &str = "OFFKIT_LOG";

/// Format override variable.
pub const LOG_FORMAT_ENV: &str = "OFFKIT_LOG_FORMAT";

/// Targets that follow [`LogConfig::level`].
const OFFKIT_TARGETS: [&str; 4] = ["offkit", "offkit_common", "offkit_net", "offkit_sw"];

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line, human-readable.
    Pretty,
    /// One line per event.
    #[default]
    Compact,
    /// One JSON object per event.
    Json,
}

impl LogFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogFormat::Pretty => "pretty",
            LogFormat::Compact => "compact",
            LogFormat::Json => "json",
        }
    }
}

impl std_fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std_fmt::Formatter<'_>) -> std_fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(format!(
                "unknown log format {other:?} (expected pretty, compact or json)"
            )),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Level for OffKit's own targets.
    pub level: Level,
    /// Level for everything else (reqwest, hyper, ...).
    pub dependency_level: Level,
    pub format: LogFormat,
    /// Include source file and line.
    pub include_location: bool,
    /// Full directive string; replaces the per-target levels when set.
    pub filter: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            dependency_level: Level::WARN,
            format: LogFormat::default(),
            include_location: false,
            filter: None,
        }
    }
}

impl LogConfig {
    /// Configuration for a `-v` count.
    ///
    /// | count | OffKit | dependencies | location |
    /// |-------|--------|--------------|----------|
    /// | 0     | info   | warn         | no       |
    /// | 1     | debug  | warn         | no       |
    /// | 2     | trace  | warn         | yes      |
    /// | 3+    | trace  | debug        | yes      |
    pub fn from_verbosity(verbosity: u8) -> Self {
        let (level, dependency_level) = match verbosity {
            0 => (Level::INFO, Level::WARN),
            1 => (Level::DEBUG, Level::WARN),
            2 => (Level::TRACE, Level::WARN),
            _ => (Level::TRACE, Level::DEBUG),
        };
        Self {
            level,
            dependency_level,
            include_location: verbosity >= 2,
            ..Default::default()
        }
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Apply `OFFKIT_LOG` and `OFFKIT_LOG_FORMAT` from the process environment.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides from `lookup`. Empty values and unknown formats are
    /// ignored.
    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(filter) = lookup(LOG_ENV).filter(|f| !f.trim().is_empty()) {
            self.filter = Some(filter);
        }
        if let Some(format) = lookup(LOG_FORMAT_ENV).and_then(|f| f.parse().ok()) {
            self.format = format;
        }
        self
    }

    /// The `EnvFilter` directive string this configuration installs.
    pub fn directives(&self) -> String {
        if let Some(filter) = &self.filter {
            return filter.clone();
        }

        let level = self.level.as_str().to_ascii_lowercase();
        let mut directives = vec![self.dependency_level.as_str().to_ascii_lowercase()];
        directives.extend(OFFKIT_TARGETS.iter().map(|target| format!("{target}={level}")));
        directives.join(",")
    }

    /// An unparsable custom filter falls back to the per-target levels.
    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_new(self.directives()).unwrap_or_else(|_| {
            let fallback = Self {
                filter: None,
                ..self.clone()
            };
            EnvFilter::new(fallback.directives())
        })
    }
}

/// Install the global subscriber, writing to stderr.
///
/// Fails if a global subscriber is already installed.
pub fn init_logging(config: LogConfig) -> Result<(), TryInitError> {
    let filter = config.env_filter();

    match config.format {
        LogFormat::Pretty => {
            let fmt_layer = fmt::layer()
                .pretty()
                .with_writer(std::io::stderr)
                .with_file(config.include_location)
                .with_line_number(config.include_location);

            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer)
                .try_init()
        }
        LogFormat::Compact => {
            let fmt_layer = fmt::layer()
                .compact()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_file(config.include_location)
                .with_line_number(config.include_location);

            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer)
                .try_init()
        }
        LogFormat::Json => {
            let fmt_layer = fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_current_span(true)
                .with_span_events(FmtSpan::CLOSE);

            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer)
                .try_init()
        }
    }
}
