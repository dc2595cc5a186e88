use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;

/// Installs the global subscriber. `RUST_LOG` overrides the configured level;
/// `verbose` (from `-v` flags) raises it to debug or trace.
pub fn init(config: &LoggingConfig, verbose: u8) -> anyhow::Result<()> {
    let level = match verbose {
        0 => config.level.as_str(),
        1 => "debug",
        _ => "trace",
    };
    let filter = match std::env::var("RUST_LOG") {
        Ok(directives) => EnvFilter::new(directives),
        Err(_) => EnvFilter::new(format!("storage_ledger={level}")),
    };

    // logs go to stderr so command output on stdout stays machine readable
    let registry = tracing_subscriber::registry().with(filter);
    match config.format.as_str() {
        "json" => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()?,
        "compact" => registry
            .with(
                fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()?,
        _ => {
            let show_location = matches!(level, "debug" | "trace");
            registry
                .with(
                    fmt::layer()
                        .with_target(show_location)
                        .with_line_number(show_location)
                        .with_file(show_location)
                        .with_writer(std::io::stderr),
                )
                .try_init()?
        }
    }
    Ok(())
}
