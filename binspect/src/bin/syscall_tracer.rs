// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::path::PathBuf;
use std::process::Command;

use anyhow::Result;
use clap::Parser;
use tracer::{syscall, StopReason, TraceeSession};

/// Trace the system calls made by a program.
#[derive(Parser, Debug)]
#[command(name = "syscall-tracer")]
struct Args {
    /// Program to spawn under trace
    program: PathBuf,

    /// Arguments passed to the program
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();

    let mut cmd = Command::new(&args.program);
    cmd.args(&args.args);

    let mut session = TraceeSession::spawn(cmd)?;
    println!("[*] Tracing syscalls for PID {}\n", session.pid());

    let reason = syscall::trace(&mut session)?;

    if let StopReason::Terminated(signal) = reason {
        eprintln!("\n[*] Process terminated by signal {}", signal.as_ref());
    }

    std::process::exit(binspect::exit_status_code(reason));
}
