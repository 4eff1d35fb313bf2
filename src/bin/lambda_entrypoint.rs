//! Runs inside a lambda container: reads one framed request from stdin,
//! invokes the artifact's entry and writes one framed outcome to stdout.
//!
//! Usage: `lambda-entrypoint <artifact>`

use std::io;
use std::process::ExitCode;

use smartlambda_core::execution::frame::write_frame;
use smartlambda_core::execution::{Entrypoint, ErrorKind, ExecutionReturnValue, ProcessResolver};
use smartlambda_core::logging::init_tracing;

fn main() -> ExitCode {
    // stdout carries the protocol; logs go to stderr.
    if let Err(e) = init_tracing("warn") {
        eprintln!("lambda-entrypoint: {}", e);
    }

    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut input = stdin.lock();
    let mut output = stdout.lock();

    let artifact = match std::env::args_os().nth(1) {
        Some(path) => std::fs::read(&path).map_err(|e| format!("cannot read artifact {:?}: {}", path, e)),
        None => Err("usage: lambda-entrypoint <artifact>".to_string()),
    };
    let artifact = match artifact {
        Ok(bytes) => bytes,
        Err(message) => {
            tracing::error!(%message, "no artifact");
            let reply = ExecutionReturnValue::error(ErrorKind::Internal, message);
            return match write_frame(&mut output, &reply.encode()) {
                Ok(()) => ExitCode::SUCCESS,
                Err(_) => ExitCode::FAILURE,
            };
        }
    };

    match Entrypoint::new(ProcessResolver::new()).run(&artifact, &mut input, &mut output) {
        Ok(reply) => {
            tracing::debug!(failed = reply.error.is_some(), "reply written");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "could not write the reply");
            ExitCode::FAILURE
        }
    }
}
