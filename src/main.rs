use std::process::ExitCode;

use clap::Parser;
use native_host::config::{Cli, HostConfig, MAIN_SCRIPT_ENV};
use native_host::logging::init_logging;

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log.as_deref());

    let env_script = std::env::var_os(MAIN_SCRIPT_ENV).map(Into::into);
    let config = match HostConfig::from_cli(cli, env_script) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::from(1);
        }
    };

    match native_host::app::run(&config) {
        Ok(code) => exit_code(code),
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "host failed");
            eprintln!("{e:#}");
            ExitCode::from(1)
        }
    }
}

/// Process exit codes are a byte; anything outside that range is a failure.
fn exit_code(code: i32) -> ExitCode {
    u8::try_from(code).map(ExitCode::from).unwrap_or(ExitCode::FAILURE)
}
