// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg(all(target_os = "linux", target_arch = "x86_64"))]

use std::process::Command;
use std::time::Duration;

use anyhow::Result;
use binview::elf::ElfType;
use binview::{Address, ElfView, Image};
use pretty_assertions::assert_eq;
use tracer::{images, AttachedProcess, Resume, StopReason, TraceError, TraceeSession};

const TARGET: &str = "/bin/true";

fn spawn_true() -> Result<TraceeSession> {
    TraceeSession::spawn(Command::new(TARGET))
}

// Runtime address of the target's ELF entry point: an address that is
// executed exactly once per run.
fn runtime_entry(pid: i32) -> Result<Address> {
    let main = images::main_image(pid)?;

    let image = Image::open(&main.path)?;
    let elf = ElfView::parse(image.data())?;

    let entry = elf.entry();

    match elf.elf_type() {
        ElfType::SharedObject => Ok(Address(main.base.0 + entry.0)),
        _ => Ok(entry),
    }
}

#[test]
fn syscall_stops_alternate_until_exit() -> Result<()> {
    let mut session = spawn_true()?;

    let mut expect_entry = true;
    let mut last_entry = None;

    let reason = loop {
        session.resume(Resume::Syscall)?;

        match session.wait()? {
            StopReason::SyscallEnter => {
                assert!(expect_entry, "two syscall entries in a row");
                last_entry = Some(session.registers()?.orig_rax);
                expect_entry = false;
            }
            StopReason::SyscallExit => {
                assert!(!expect_entry, "syscall exit without a matching entry");
                expect_entry = true;
            }
            StopReason::Signal(_) => {}
            reason if reason.is_terminal() => break reason,
            other => panic!("unexpected stop during syscall trace: {other:?}"),
        }
    };

    assert_eq!(reason, StopReason::Exited(0));

    // The final syscall a process enters is its exit.
    let last = last_entry.expect("no syscall entries observed");
    assert!(
        last == 60 || last == 231,
        "last syscall entry was {last}, expected exit or exit_group"
    );

    Ok(())
}

#[test]
fn breakpoint_at_entry_hits_once() -> Result<()> {
    let mut session = spawn_true()?;
    let entry = runtime_entry(session.pid())?;

    session.add_breakpoint(entry)?;

    let mut trapped = [0u8; 1];
    session.read_memory(entry.0, &mut trapped)?;
    assert_eq!(trapped[0], 0xcc, "trap byte installed");

    let mut hits = 0;

    let reason = loop {
        session.resume(Resume::Continue)?;

        match session.wait()? {
            StopReason::BreakpointTrap { addr } => {
                hits += 1;
                assert_eq!(addr, entry);

                let regs = session.registers()?;
                assert_eq!(regs.rip, entry.0, "rip rewound to the breakpoint address");

                let after = session.step_over(entry)?;
                if after.is_terminal() {
                    break after;
                }

                let mut byte = [0u8; 1];
                session.read_memory(entry.0, &mut byte)?;
                assert_eq!(byte[0], 0xcc, "trap byte re-armed after service");
            }
            reason if reason.is_terminal() => break reason,
            _ => {}
        }
    };

    assert_eq!(reason, StopReason::Exited(0));
    assert_eq!(hits, 1, "the entry point executes exactly once");

    Ok(())
}

#[test]
fn breakpoint_removal_restores_memory() -> Result<()> {
    let mut session = spawn_true()?;
    let entry = runtime_entry(session.pid())?;

    let mut before = [0u8; 1];
    session.read_memory(entry.0, &mut before)?;

    session.add_breakpoint(entry)?;
    assert!(session.has_breakpoints());

    assert!(session.remove_breakpoint(entry)?);

    let mut after = [0u8; 1];
    session.read_memory(entry.0, &mut after)?;
    assert_eq!(after, before, "displaced byte restored on removal");

    session.resume(Resume::Continue)?;
    loop {
        let reason = session.wait()?;
        if reason.is_terminal() {
            assert_eq!(reason, StopReason::Exited(0));
            break;
        }
        session.resume(Resume::Continue)?;
    }

    Ok(())
}

#[test]
fn duplicate_breakpoint_rejected() -> Result<()> {
    let mut session = spawn_true()?;
    let entry = runtime_entry(session.pid())?;

    session.add_breakpoint(entry)?;

    let err = session.add_breakpoint(entry).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<TraceError>(),
        Some(TraceError::DuplicateBreakpoint { .. })
    ));

    Ok(())
}

#[test]
fn poke_of_peeked_word_is_noop() -> Result<()> {
    let mut session = spawn_true()?;
    let entry = runtime_entry(session.pid())?;

    let word = session.peek_word(entry.0)?;
    session.poke_word(entry.0, word)?;
    assert_eq!(session.peek_word(entry.0)?, word);

    // The image is untouched, so the program still runs to success.
    session.resume(Resume::Continue)?;
    loop {
        let reason = session.wait()?;
        if reason.is_terminal() {
            assert_eq!(reason, StopReason::Exited(0));
            break;
        }
        session.resume(Resume::Continue)?;
    }

    Ok(())
}

#[test]
fn resume_while_running_is_misuse() -> Result<()> {
    let mut session = spawn_true()?;

    session.resume(Resume::Continue)?;

    let err = session.resume(Resume::Continue).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<TraceError>(),
        Some(TraceError::NotStopped)
    ));

    loop {
        if session.wait()?.is_terminal() {
            break;
        }
        session.resume(Resume::Continue)?;
    }

    Ok(())
}

#[test]
fn attach_reads_remote_memory() -> Result<()> {
    let mut child = Command::new("/bin/sleep").arg("30").spawn()?;

    // Give the child time to finish its execve.
    std::thread::sleep(Duration::from_millis(200));

    let result = (|| -> Result<()> {
        let attached = AttachedProcess::attach(child.id() as i32)?;

        let main = images::main_image(attached.pid())?;
        let bytes = attached.read_bytes(main.base.0, 4)?;
        assert_eq!(&bytes, &[0x7f, b'E', b'L', b'F']);

        attached.detach()?;

        Ok(())
    })();

    let _ = child.kill();
    let _ = child.wait();

    result
}
