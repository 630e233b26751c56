//! scan-relay - scanner button daemon
//!
//! Entry point for the scan-relay binary.

use clap::Parser;
use scan_relay::{
    cli::Cli,
    config::ConfigError,
    error::{ExitCode, StructuredError},
    logging::log_error_chain,
};

fn main() {
    let cli = Cli::parse();
    let json_errors = cli.json_errors;

    match scan_relay::run_app(cli) {
        Ok(code) => std::process::exit(code.as_i32()),
        Err(err) => {
            let exit_code = if err.downcast_ref::<ConfigError>().is_some() {
                ExitCode::ConfigError
            } else {
                ExitCode::GeneralError
            };

            if json_errors {
                let structured = StructuredError::new(&err, exit_code);
                if let Ok(json) = serde_json::to_string_pretty(&structured) {
                    eprintln!("{}", json);
                } else {
                    eprintln!("[{}] Error: {:#}", exit_code.code_prefix(), err);
                }
            } else {
                log_error_chain(&format!("[{}] CRITICAL ERROR", exit_code.code_prefix()), &err);
            }

            std::process::exit(exit_code.as_i32());
        }
    }
}
