use anyhow::Result;

use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

const DEFAULT_FILTER: &str = "info,chat_memory_server=debug,sqlx=warn";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Output encoding shared by every sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    /// Anything but `json` (case-insensitive) falls back to pretty
    pub fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Pretty
        }
    }

    fn from_env() -> Self {
        std::env::var("LOG_FORMAT")
            .map(|v| Self::parse(&v))
            .unwrap_or(Self::Pretty)
    }

    /// One layer per sink: stdout and the rolling file
    fn layers(self, file_appender: RollingFileAppender) -> Vec<BoxedLayer> {
        match self {
            Self::Json => vec![
                fmt::layer()
                    .json()
                    .with_writer(std::io::stdout)
                    .with_thread_ids(true)
                    .boxed(),
                fmt::layer()
                    .json()
                    .with_writer(file_appender)
                    .with_thread_ids(true)
                    .boxed(),
            ],
            Self::Pretty => vec![
                fmt::layer().pretty().with_writer(std::io::stdout).boxed(),
                fmt::layer()
                    .with_writer(file_appender)
                    .with_ansi(false)
                    .boxed(),
            ],
        }
    }
}

/// Stdout plus a daily-rotated `logs/chat-memory.log`.
///
/// `RUST_LOG` sets the filter, `LOG_FORMAT=json` switches both sinks to JSON.
pub fn init_logger() -> Result<()> {
    let filter = match std::env::var("RUST_LOG") {
        Ok(directives) => EnvFilter::try_new(directives)?,
        Err(_) => EnvFilter::new(DEFAULT_FILTER),
    };

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("chat-memory")
        .filename_suffix("log")
        .build("logs")?;

    tracing_subscriber::registry()
        .with(LogFormat::from_env().layers(file_appender))
        .with(filter)
        .init();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse("json"), LogFormat::Json);
        assert_eq!(LogFormat::parse(" JSON "), LogFormat::Json);
        assert_eq!(LogFormat::parse("pretty"), LogFormat::Pretty);
        assert_eq!(LogFormat::parse(""), LogFormat::Pretty);
        assert_eq!(LogFormat::parse("yaml"), LogFormat::Pretty);
    }

    #[test]
    fn test_default_filter_is_valid() {
        assert!(EnvFilter::try_new(DEFAULT_FILTER).is_ok());
    }
}
