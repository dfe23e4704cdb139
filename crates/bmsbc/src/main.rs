mod app;
mod cli;
mod runtime;

use clap::error::ErrorKind;
use clap::Parser;
use tracing::level_filters::LevelFilter;

use crate::cli::{Cli, LogFormat, LogLevel};

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            // Configuration errors print usage and exit 1; help and
            // version requests are not errors.
            let code = match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            let _ = err.print();
            std::process::exit(code);
        }
    };
    init_diagnostics(cli.log_format, cli.log_level);

    match runtime::run(cli) {
        Ok(()) => {}
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.exit_code());
        }
    }
}

/// Diagnostics go to stderr only: stdout belongs to the contract
/// tokens (`NEIGHBOR_UP`, `PUBSUB_RX`, the ping-reply glyph, "stack
/// initialized") that observing harnesses grep line by line.
fn init_diagnostics(format: LogFormat, level: LogLevel) {
    let filter = match level {
        LogLevel::Error => LevelFilter::ERROR,
        LogLevel::Warn => LevelFilter::WARN,
        LogLevel::Info => LevelFilter::INFO,
        LogLevel::Debug => LevelFilter::DEBUG,
        LogLevel::Trace => LevelFilter::TRACE,
    };
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(filter)
        .with_ansi(false)
        .with_target(false);
    let _ = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}
