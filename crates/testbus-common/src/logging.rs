//! ---
//! tb_section: "01-core-functionality"
//! tb_subsection: "module"
//! tb_type: "source"
//! tb_scope: "code"
//! tb_description: "Shared settings and tracing primitives for the broker simulation."
//! tb_version: "v0.0.0-prealpha"
//! tb_owner: "tbd"
//! ---
use anyhow::Result;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_appender::rolling::daily;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

const LOG_ENV: &str = "TESTBUS_LOG";

static FILE_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();
static INITIALISED: OnceCell<()> = OnceCell::new();

/// Available log formats.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    StructuredJson,
    #[default]
    Pretty,
}

/// Initialize the tracing subscriber from configuration and environment variables.
///
/// * `TESTBUS_LOG` overrides the filter (e.g. `info`, `debug,testbus_msg=trace`).
///   When unset `RUST_LOG` is honoured, then the configured filter, finally `warn`
///   so test output stays quiet unless asked.
/// * Output goes through the test writer so `cargo test` captures it per test.
/// * When `directory` is configured a daily rolling JSON file is written as well.
///
/// Safe to call from every test; only the first call installs a subscriber.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    if INITIALISED.get().is_some() {
        return Ok(());
    }

    let filter = match std::env::var(LOG_ENV) {
        Ok(directive) => EnvFilter::try_new(directive).unwrap_or_else(|err| {
            eprintln!("invalid {} directive ({}); defaulting to warn", LOG_ENV, err);
            EnvFilter::new("warn")
        }),
        Err(_) => EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(config.filter.clone().unwrap_or_else(|| "warn".to_owned()))
        }),
    };

    let fmt_layer = match config.format {
        LogFormat::StructuredJson => fmt::layer()
            .with_target(false)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .json()
            .with_test_writer()
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_target(true)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_test_writer()
            .boxed(),
    };

    let file_layer = match &config.directory {
        Some(directory) => {
            std::fs::create_dir_all(directory)?;
            let (file_writer, file_guard) =
                tracing_appender::non_blocking(daily(directory, "testbus.log"));
            let _ = FILE_GUARD.set(file_guard);
            Some(
                fmt::layer()
                    .with_target(true)
                    .with_timer(fmt::time::UtcTime::rfc_3339())
                    .json()
                    .with_writer(file_writer)
                    .boxed(),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(file_layer)
        .try_init()
        .ok();
    let _ = INITIALISED.set(());

    info!(format = ?config.format, log_dir = ?config.directory, "tracing initialised");
    Ok(())
}
