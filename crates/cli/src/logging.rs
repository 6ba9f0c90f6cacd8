//! Subscriber setup for the `vlm` binary.
//!
//! Output goes to stderr so JSON printed on stdout stays parseable.
//! `RUST_LOG` wins over `--log-level`; `VLM_LOG_FORMAT=json` switches to
//! one JSON object per event.

use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

const FORMAT_VAR: &str = "VLM_LOG_FORMAT";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines (default).
    Pretty,
    Json,
}

impl LogFormat {
    pub fn from_env() -> Self {
        std::env::var(FORMAT_VAR)
            .map(|v| Self::parse(&v))
            .unwrap_or(Self::Pretty)
    }

    fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Pretty
        }
    }
}

/// Install the global subscriber. `level` applies only when `RUST_LOG` is unset.
pub fn init(level: Option<&str>, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.unwrap_or("info")));

    // Exactly one of the two layers is Some.
    let (pretty, json) = match format {
        LogFormat::Pretty => (
            Some(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true),
            ),
            None,
        ),
        LogFormat::Json => (
            None,
            Some(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_span_events(FmtSpan::CLOSE)
                    .with_current_span(true)
                    .with_file(true)
                    .with_line_number(true),
            ),
        ),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(pretty)
        .with(json)
        .init();
}
