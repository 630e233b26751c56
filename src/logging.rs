//! Logging setup for the daemon.
//!
//! Uses the `log` facade with the `env_logger` backend. The level is taken
//! from, in priority order:
//!
//! 1. `RUST_LOG` environment variable (if set)
//! 2. CLI flags: `--quiet` (error only) or `--verbose` (debug/trace)
//! 3. Default: info level
//!
//! When stderr is not a terminal (running under systemd, output going to the
//! journal) timestamps are left out because the journal adds its own.

use env_logger::Builder;
use log::LevelFilter;
use std::env;
use std::io::{IsTerminal, Write};

/// Initialize the logging subsystem based on CLI verbosity flags.
///
/// Must be called once, before any log output. Later calls are ignored.
///
/// # Example
///
/// ```rust,no_run
/// use scan_relay::logging::init_logging;
///
/// init_logging(1, false);
/// log::debug!("Debug info here");
/// ```
pub fn init_logging(verbose: u8, quiet: bool) {
    let use_env = env::var("RUST_LOG").is_ok();
    let level = determine_level(verbose, quiet);

    let mut builder = Builder::new();
    if use_env {
        builder.parse_default_env();
    } else {
        builder.filter_level(level);
    }
    configure_format(&mut builder, verbose, std::io::stderr().is_terminal());

    if builder.try_init().is_err() {
        return;
    }

    if use_env {
        log::debug!(
            "Logging initialized from RUST_LOG: {:?}",
            env::var("RUST_LOG").ok()
        );
    } else {
        log::debug!("Logging initialized at level: {:?}", level);
    }
}

/// Determine the log level from CLI flags.
fn determine_level(verbose: u8, quiet: bool) -> LevelFilter {
    if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }
}

/// Module paths are shown from `-v` on; timestamps only on a terminal.
fn configure_format(builder: &mut Builder, verbose: u8, terminal: bool) {
    builder.format(move |buf, record| {
        let level = record.level();
        let level_style = buf.default_level_style(level);

        if terminal {
            write!(buf, "{} ", buf.timestamp_seconds())?;
        }
        write!(buf, "{level_style}{:<5}{level_style:#} ", level)?;
        if verbose >= 1 {
            write!(buf, "[{}] ", record.module_path().unwrap_or("unknown"))?;
        }
        writeln!(buf, "{}", record.args())
    });
}

/// Log an error with its full cause chain.
pub fn log_error_chain(context: &str, err: &anyhow::Error) {
    log::error!("{}: {}", context, err);
    for cause in err.chain().skip(1) {
        log::error!("  caused by: {}", cause);
    }
}
