//! Tracing subscriber setup.
//!
//! Filtering honours `ALERTFLOW_LOG` first, then `RUST_LOG`. Console output
//! always goes to stderr so stdout stays clean for `--ui json`.

use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

use crate::config::{LogFormat, LoggingSection};

pub const LOG_ENV: &str = "ALERTFLOW_LOG";

fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "alertflow=debug,info"
    } else {
        "alertflow=info,warn"
    }
}

fn env_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)))
}

/// Install the global subscriber.
///
/// The returned guard must be held for the process lifetime when file
/// output is enabled, otherwise buffered lines are lost on exit.
pub fn init(settings: &LoggingSection, verbose: bool) -> Result<Option<WorkerGuard>> {
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    let console = fmt::layer().with_writer(std::io::stderr).with_target(false);
    layers.push(match settings.format {
        LogFormat::Text => console.boxed(),
        LogFormat::Json => console.json().boxed(),
    });

    let guard = match settings.directory.as_deref() {
        Some(dir) => {
            let (writer, guard) = file_writer(dir)?;
            layers.push(
                fmt::layer()
                    .json()
                    .with_ansi(false)
                    .with_writer(writer)
                    .boxed(),
            );
            Some(guard)
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter(verbose))
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}

fn file_writer(dir: &Path) -> Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
    let appender = tracing_appender::rolling::daily(dir, "alertflow.log");
    Ok(tracing_appender::non_blocking(appender))
}
