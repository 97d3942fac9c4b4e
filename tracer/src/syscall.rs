// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::io::Write;

use anyhow::Result;
use libc::user_regs_struct;

use crate::session::{Resume, StopReason, TraceeSession};

/// Well-known x86-64 syscall numbers. The table is a fixed mapping; the
/// renderer falls back to `sys_<n>` for anything else.
pub fn name(number: u64) -> Option<&'static str> {
    let name = match number {
        0 => "read",
        1 => "write",
        2 => "open",
        3 => "close",
        4 => "stat",
        5 => "fstat",
        8 => "lseek",
        9 => "mmap",
        10 => "mprotect",
        11 => "munmap",
        12 => "brk",
        13 => "rt_sigaction",
        14 => "rt_sigprocmask",
        17 => "pread64",
        21 => "access",
        32 => "dup",
        33 => "dup2",
        39 => "getpid",
        41 => "socket",
        42 => "connect",
        56 => "clone",
        57 => "fork",
        59 => "execve",
        60 => "exit",
        61 => "wait4",
        62 => "kill",
        89 => "readlink",
        158 => "arch_prctl",
        218 => "set_tid_address",
        228 => "clock_gettime",
        231 => "exit_group",
        257 => "openat",
        262 => "newfstatat",
        273 => "set_robust_list",
        302 => "prlimit64",
        318 => "getrandom",
        334 => "rseq",
        _ => return None,
    };

    Some(name)
}

/// Which syscall boundary the next stop is expected to be.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SyscallPhase {
    Entry,
    Exit,
}

impl SyscallPhase {
    pub fn toggle(&mut self) {
        *self = match self {
            SyscallPhase::Entry => SyscallPhase::Exit,
            SyscallPhase::Exit => SyscallPhase::Entry,
        };
    }
}

/// Render a syscall-entry stop: table-driven name and the six argument
/// registers of the x86-64 syscall convention.
pub fn format_entry(regs: &user_regs_struct) -> String {
    let number = regs.orig_rax;

    let name = match name(number) {
        Some(name) => name.to_owned(),
        None => format!("sys_{number}"),
    };

    format!(
        "{name}(0x{:x}, 0x{:x}, 0x{:x}, 0x{:x}, 0x{:x}, 0x{:x})",
        regs.rdi, regs.rsi, regs.rdx, regs.r10, regs.r8, regs.r9,
    )
}

/// Render a syscall-exit stop: the return value in `rax`.
pub fn format_exit(regs: &user_regs_struct) -> String {
    format!(" = {}", regs.rax as i64)
}

/// Run the session in syscall-tracing mode until the tracee terminates,
/// printing one line per completed syscall.
///
/// Mutually exclusive with breakpoints on the same session. A signal
/// delivered mid-trace is logged and tracing continues.
pub fn trace(session: &mut TraceeSession) -> Result<StopReason> {
    session.begin_syscall_trace()?;

    let mut phase = SyscallPhase::Entry;
    let mut stdout = std::io::stdout();

    loop {
        session.resume(Resume::Syscall)?;

        match session.wait()? {
            StopReason::SyscallEnter => {
                if phase != SyscallPhase::Entry {
                    warn!("syscall-enter while awaiting exit; resynchronizing");
                    phase = SyscallPhase::Entry;
                }

                let regs = session.registers()?;
                write!(stdout, "{}", format_entry(&regs))?;
                stdout.flush()?;

                phase.toggle();
            }
            StopReason::SyscallExit => {
                if phase != SyscallPhase::Exit {
                    warn!("syscall-exit while awaiting entry; resynchronizing");
                    phase = SyscallPhase::Exit;
                }

                let regs = session.registers()?;
                writeln!(stdout, "{}", format_exit(&regs))?;

                phase.toggle();
            }
            StopReason::Signal(signal) => {
                // Non-fatal; the signal is delivered on the next resume.
                warn!("signal {} delivered during syscall trace", signal.as_ref());
            }
            reason if reason.is_terminal() => return Ok(reason),
            reason => {
                debug!("unexpected stop during syscall trace: {reason:?}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_name_table() {
        assert_eq!(name(0), Some("read"));
        assert_eq!(name(1), Some("write"));
        assert_eq!(name(59), Some("execve"));
        assert_eq!(name(60), Some("exit"));
        assert_eq!(name(231), Some("exit_group"));
        assert_eq!(name(257), Some("openat"));
        assert_eq!(name(9999), None);
    }

    #[test]
    fn test_phase_toggle() {
        let mut phase = SyscallPhase::Entry;

        phase.toggle();
        assert_eq!(phase, SyscallPhase::Exit);

        phase.toggle();
        assert_eq!(phase, SyscallPhase::Entry);
    }

    #[test]
    fn test_format_entry() {
        let mut regs: user_regs_struct = unsafe { std::mem::zeroed() };
        regs.orig_rax = 1;
        regs.rdi = 1;
        regs.rsi = 0x7000;
        regs.rdx = 5;

        assert_eq!(
            format_entry(&regs),
            "write(0x1, 0x7000, 0x5, 0x0, 0x0, 0x0)"
        );
    }

    #[test]
    fn test_format_entry_unknown_number() {
        let mut regs: user_regs_struct = unsafe { std::mem::zeroed() };
        regs.orig_rax = 9999;

        assert!(format_entry(&regs).starts_with("sys_9999(0x0"));
    }

    #[test]
    fn test_format_exit_is_signed() {
        let mut regs: user_regs_struct = unsafe { std::mem::zeroed() };

        regs.rax = 5;
        assert_eq!(format_exit(&regs), " = 5");

        regs.rax = (-2i64) as u64;
        assert_eq!(format_exit(&regs), " = -2");
    }
}
