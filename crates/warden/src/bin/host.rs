//! Host entrypoint.

use std::io::{self, Write};
use std::process::ExitCode;

use clap::Parser;
use tracing::error;

use warden::{host, telemetry};
use warden_config::HostArgs;

fn main() -> ExitCode {
    let args = HostArgs::parse();
    if let Err(cause) = telemetry::initialise(&args.logging) {
        writeln!(io::stderr().lock(), "warden-host: {cause}").ok();
        return ExitCode::FAILURE;
    }
    match host::run(&args) {
        Ok(report) if report.is_success() => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(cause) => {
            error!(target: "warden::host", error = %cause, "host failed");
            ExitCode::FAILURE
        }
    }
}
