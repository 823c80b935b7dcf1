//! Container entrypoint.
//!
//! Startup failures exit without writing to the reply pipe, so the host sees
//! a failed handshake rather than a stray byte.

use std::io::{self, Write};
use std::process::ExitCode;

use clap::Parser;
use tracing::error;

use warden::container::{self, LoopEnd};
use warden::telemetry;
use warden_config::ContainerArgs;

fn main() -> ExitCode {
    let args = ContainerArgs::parse();
    if let Err(cause) = telemetry::initialise(&args.logging) {
        writeln!(io::stderr().lock(), "warden-container: {cause}").ok();
        return ExitCode::FAILURE;
    }
    match container::run(&args) {
        Ok(LoopEnd::Exited | LoopEnd::Disconnected) => ExitCode::SUCCESS,
        Err(cause) => {
            error!(target: "warden::container", label = %args.label, error = %cause, "container failed");
            ExitCode::FAILURE
        }
    }
}
