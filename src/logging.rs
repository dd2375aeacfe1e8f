//! Logging setup
//!
//! One rolling file (text or JSON) plus ANSI stdout in text mode. `RUST_LOG` replaces the
//! configured directives entirely.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{self, RollingFileAppender};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::AppConfig;
use crate::error::{SettlementError, SettlementResult};

/// Statement-level sqlx logs drown out settlement progress; keep only its warnings.
const QUIET_DEPENDENCIES: &[&str] = &["sqlx=warn", "sqlx::query=error"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rotation {
    Hourly,
    Daily,
    Never,
}

impl Rotation {
    fn parse(value: &str) -> SettlementResult<Self> {
        match value {
            "hourly" => Ok(Rotation::Hourly),
            "daily" => Ok(Rotation::Daily),
            "never" | "" => Ok(Rotation::Never),
            other => Err(SettlementError::Config(format!(
                "unknown log rotation: {}",
                other
            ))),
        }
    }

    fn appender(self, dir: &str, file: &str) -> RollingFileAppender {
        match self {
            Rotation::Hourly => rolling::hourly(dir, file),
            Rotation::Daily => rolling::daily(dir, file),
            Rotation::Never => rolling::never(dir, file),
        }
    }
}

fn default_directives(log_level: &str) -> String {
    std::iter::once(log_level)
        .chain(QUIET_DEPENDENCIES.iter().copied())
        .collect::<Vec<_>>()
        .join(",")
}

/// Install the global subscriber. Keep the returned guard alive for the life of the process,
/// dropping it flushes the file writer.
pub fn init_logging(config: &AppConfig) -> SettlementResult<WorkerGuard> {
    let rotation = Rotation::parse(&config.rotation)?;
    let (writer, guard) =
        tracing_appender::non_blocking(rotation.appender(&config.log_dir, &config.log_file));

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_directives(&config.log_level))
            .map_err(|e| SettlementError::Config(format!("log_level: {}", e)))?,
    };
    let registry = tracing_subscriber::registry().with(filter);

    let installed = if config.use_json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_current_span(false)
                    .with_writer(writer)
                    .with_ansi(false),
            )
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(writer).with_ansi(false))
            .with(fmt::layer().with_target(false).with_ansi(true))
            .try_init()
    };
    installed.map_err(|e| SettlementError::Config(format!("logging already initialised: {}", e)))?;

    Ok(guard)
}
