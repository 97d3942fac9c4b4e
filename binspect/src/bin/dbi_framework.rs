// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::path::PathBuf;
use std::process::Command;

use anyhow::Result;
use binview::Address;
use clap::Parser;
use iced_x86::{Decoder, Formatter, NasmFormatter};
use libc::user_regs_struct;
use tracer::{Resume, StopReason, TraceeSession};

const STACK_WORDS: u64 = 8;
const DISASM_BYTES: usize = 64;
const DISASM_COUNT: usize = 5;

/// Run a program with a breakpoint at a fixed address, dumping machine
/// state on every hit.
#[derive(Parser, Debug)]
#[command(name = "dbi-framework")]
struct Args {
    /// Program to spawn under trace
    program: PathBuf,

    /// Breakpoint address (hex, e.g. 0x401000)
    addr: String,
}

fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();
    let addr = Address(binspect::parse_hex(&args.addr)?);

    let mut session = TraceeSession::spawn(Command::new(&args.program))?;

    println!("[*] Setting breakpoint at 0x{addr:x}");
    session.add_breakpoint(addr)?;

    println!("\n[*] Starting traced process...");
    let reason = run(&mut session)?;

    if let StopReason::Exited(code) = reason {
        println!("\n[*] Process exited with status {code}");
    }

    std::process::exit(binspect::exit_status_code(reason));
}

fn run(session: &mut TraceeSession) -> Result<StopReason> {
    loop {
        session.resume(Resume::Continue)?;

        match session.wait()? {
            StopReason::BreakpointTrap { addr } => {
                println!("\n[*] Breakpoint hit at 0x{addr:x}");

                let regs = session.registers()?;
                dump_registers(&regs);
                dump_stack(session, &regs);
                disassemble_at(session, regs.rip, DISASM_COUNT)?;

                let reason = session.step_over(addr)?;
                if reason.is_terminal() {
                    return Ok(reason);
                }
            }
            StopReason::Signal(signal) => {
                println!("\n[*] Signal: {}", signal.as_ref());
            }
            reason if reason.is_terminal() => return Ok(reason),
            _ => {}
        }
    }
}

fn dump_registers(regs: &user_regs_struct) {
    println!("  RAX: 0x{:016x}  RBX: 0x{:016x}", regs.rax, regs.rbx);
    println!("  RCX: 0x{:016x}  RDX: 0x{:016x}", regs.rcx, regs.rdx);
    println!("  RSI: 0x{:016x}  RDI: 0x{:016x}", regs.rsi, regs.rdi);
    println!("  RBP: 0x{:016x}  RSP: 0x{:016x}", regs.rbp, regs.rsp);
    println!("  RIP: 0x{:016x}", regs.rip);
}

fn dump_stack(session: &mut TraceeSession, regs: &user_regs_struct) {
    println!("  Stack (RSP=0x{:x}):", regs.rsp);

    for i in 0..STACK_WORDS {
        match session.peek_word(regs.rsp + i * 8) {
            Ok(word) => println!("    [RSP+0x{:02x}] 0x{word:016x}", i * 8),
            Err(_) => println!("    [RSP+0x{:02x}] <unreadable>", i * 8),
        }
    }
}

fn disassemble_at(session: &mut TraceeSession, rip: u64, count: usize) -> Result<()> {
    let mut code = [0u8; DISASM_BYTES];
    session.read_memory(rip, &mut code)?;

    // Present the displaced instruction, not our trap byte.
    if let Some(breakpoint) = session.breakpoint(Address(rip)) {
        if breakpoint.is_armed() {
            code[0] = breakpoint.saved_byte();
        }
    }

    let mut decoder = Decoder::new(64, &code, 0);
    decoder.set_ip(rip);

    let mut fmt = NasmFormatter::new();
    let opts = fmt.options_mut();
    opts.set_hex_prefix("0x");
    opts.set_hex_suffix("");
    opts.set_uppercase_hex(false);
    opts.set_space_after_operand_separator(true);

    println!("  Disassembly at 0x{rip:x}:");

    for _ in 0..count {
        if !decoder.can_decode() {
            break;
        }

        let inst = decoder.decode();

        let mut display = String::new();
        fmt.format(&inst, &mut display);

        println!("    0x{:x}: {display}", inst.ip());
    }

    Ok(())
}
