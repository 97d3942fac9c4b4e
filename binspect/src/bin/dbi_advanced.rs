// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::path::PathBuf;
use std::process::Command;

use anyhow::Result;
use binview::{ElfView, Image};
use clap::Parser;
use tracer::{hook, images, Resume, StopReason, TraceeSession};

/// Hook functions by symbol name and report their arguments on entry.
#[derive(Parser, Debug)]
#[command(name = "dbi-advanced")]
struct Args {
    /// Program to spawn under trace
    program: PathBuf,

    /// Function symbols to hook
    #[arg(required = true)]
    symbols: Vec<String>,
}

fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();

    let mut session = TraceeSession::spawn(Command::new(&args.program))?;

    let main = images::main_image(session.pid())?;
    let image = Image::open(&main.path)?;
    let elf = ElfView::parse(image.data())?;

    for name in &args.symbols {
        match hook::install(&mut session, &elf, main.base, name) {
            Ok(hook) => println!("[+] Hooked {} at 0x{:x}", hook.name, hook.addr),
            Err(err) => eprintln!("[-] Unable to hook '{name}': {err:#}"),
        }
    }

    println!("\n[*] Starting trace...\n");
    let reason = run(&mut session)?;

    if matches!(reason, StopReason::Exited(_)) {
        println!("\n[*] Process exited");
    }

    std::process::exit(binspect::exit_status_code(reason));
}

fn run(session: &mut TraceeSession) -> Result<StopReason> {
    loop {
        session.resume(Resume::Continue)?;

        match session.wait()? {
            StopReason::BreakpointTrap { addr } => {
                let label = session
                    .breakpoint_label(addr)
                    .unwrap_or("<unlabeled>")
                    .to_owned();

                let regs = session.registers()?;
                println!("{}", hook::entry_report(&label, &regs));

                let reason = session.step_over(addr)?;
                if reason.is_terminal() {
                    return Ok(reason);
                }
            }
            reason if reason.is_terminal() => return Ok(reason),
            _ => {}
        }
    }
}
