// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::os::unix::process::ExitStatusExt;
use std::process::{Child, Command};

use anyhow::{bail, Context, Result};
use binview::Address;
use libc::user_regs_struct;
use pete::{Ptracer, Restart, Signal, Stop, Tracee};

use crate::breakpoint::Breakpoints;
use crate::TraceError;

/// How to resume a stopped tracee.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Resume {
    Continue,
    Step,
    Syscall,
}

/// Classification of a tracee stop or termination.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StopReason {
    /// An armed breakpoint trapped. `rip` has already been rewound to the
    /// breakpoint address, so register reads observe the pre-trap state.
    BreakpointTrap { addr: Address },
    SingleStep,
    SyscallEnter,
    SyscallExit,
    Signal(Signal),
    Exited(i32),
    Terminated(Signal),
}

impl StopReason {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StopReason::Exited(_) | StopReason::Terminated(_))
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Mode {
    Idle,
    Breakpoints,
    Syscalls,
}

/// A child process under trace.
///
/// The session alternates between attached-stopped (after `spawn` or a
/// non-terminal `wait`) and running (after `resume`). Register, memory,
/// and breakpoint operations require the stopped state. The tracee is
/// killed on drop unless it already terminated or was detached.
pub struct TraceeSession {
    tracer: Ptracer,
    child: Child,
    pid: pete::Pid,
    stopped: Option<Tracee>,
    breakpoints: Breakpoints,
    last_resume: Option<Resume>,
    pending_exit: Option<StopReason>,
    terminal: bool,
    detached: bool,
    mode: Mode,
}

impl TraceeSession {
    /// Spawn `cmd` under trace and run it to the return of its initial
    /// `execve()`. The session starts attached-stopped.
    pub fn spawn(cmd: Command) -> Result<Self> {
        use pete::ptracer::Options;

        let mut tracer = Ptracer::new();
        let child = tracer.spawn(cmd).context("spawning tracee")?;

        let mut tracee = continue_to_init_execve(&mut tracer)?;

        // Do not follow forks; any forked child runs untraced.
        let mut options = Options::all();
        options.remove(Options::PTRACE_O_TRACEFORK);
        options.remove(Options::PTRACE_O_TRACEVFORK);
        options.remove(Options::PTRACE_O_TRACEEXEC);
        tracee
            .set_options(options)
            .context("setting tracee options")?;

        let pid = tracee.pid;

        Ok(Self {
            tracer,
            child,
            pid,
            stopped: Some(tracee),
            breakpoints: Breakpoints::default(),
            last_resume: None,
            pending_exit: None,
            terminal: false,
            detached: false,
            mode: Mode::Idle,
        })
    }

    pub fn pid(&self) -> i32 {
        self.pid.as_raw()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.is_some()
    }

    fn stopped_mut(&mut self) -> Result<&mut Tracee> {
        self.stopped
            .as_mut()
            .ok_or_else(|| TraceError::NotStopped.into())
    }

    pub fn registers(&mut self) -> Result<user_regs_struct> {
        let tracee = self.stopped_mut()?;
        let regs = tracee.registers().context("reading registers")?;

        Ok(regs)
    }

    pub fn set_registers(&mut self, regs: user_regs_struct) -> Result<()> {
        let tracee = self.stopped_mut()?;
        tracee.set_registers(regs).context("writing registers")?;

        Ok(())
    }

    pub fn read_memory(&mut self, addr: u64, data: &mut [u8]) -> Result<()> {
        let tracee = self.stopped_mut()?;
        tracee
            .read_memory_mut(addr, data)
            .with_context(|| format!("reading {} tracee bytes at {addr:x}", data.len()))?;

        Ok(())
    }

    pub fn write_memory(&mut self, addr: u64, data: &[u8]) -> Result<()> {
        let tracee = self.stopped_mut()?;
        tracee
            .write_memory(addr, data)
            .with_context(|| format!("writing {} tracee bytes at {addr:x}", data.len()))?;

        Ok(())
    }

    /// Read one 64-bit word from the tracee.
    pub fn peek_word(&mut self, addr: u64) -> Result<u64> {
        let mut data = [0u8; 8];
        self.read_memory(addr, &mut data)?;

        Ok(u64::from_le_bytes(data))
    }

    /// Write one 64-bit word into the tracee.
    pub fn poke_word(&mut self, addr: u64, word: u64) -> Result<()> {
        self.write_memory(addr, &word.to_le_bytes())
    }

    /// Resume the tracee. The session leaves the stopped state until the
    /// next `wait()`.
    pub fn resume(&mut self, kind: Resume) -> Result<()> {
        let tracee = self
            .stopped
            .take()
            .ok_or_else(|| anyhow::Error::new(TraceError::NotStopped))?;

        let restart = match kind {
            Resume::Continue => Restart::Continue,
            Resume::Step => Restart::Step,
            Resume::Syscall => Restart::Syscall,
        };

        self.tracer
            .restart(tracee, restart)
            .context("restarting tracee")?;
        self.last_resume = Some(kind);

        Ok(())
    }

    /// Block until the next reportable stop and classify it.
    ///
    /// Exit-class kernel events are folded into the terminal reasons, and
    /// bookkeeping stops (thread creation and the like) are restarted
    /// transparently.
    pub fn wait(&mut self) -> Result<StopReason> {
        if self.terminal {
            bail!(TraceError::NotStopped);
        }

        loop {
            let Some(mut tracee) = self.tracer.wait().context("waiting for tracee stop")? else {
                self.terminal = true;
                return Ok(self.harvest_exit());
            };

            let reason = match tracee.stop {
                Stop::SyscallEnter => Some(StopReason::SyscallEnter),
                Stop::SyscallExit => Some(StopReason::SyscallExit),
                Stop::SignalDelivery {
                    signal: Signal::SIGTRAP,
                } => Some(self.classify_trap(&mut tracee)?),
                Stop::SignalDelivery { signal } => Some(StopReason::Signal(signal)),
                Stop::Exiting { exit_code } => {
                    self.pending_exit = Some(StopReason::Exited(exit_code));
                    None
                }
                Stop::Signaling { signal, .. } => {
                    self.pending_exit = Some(StopReason::Terminated(signal));
                    None
                }
                _ => {
                    debug!("transparent stop: {:?}", tracee.stop);
                    None
                }
            };

            match reason {
                Some(reason) => {
                    trace!("stop: {reason:?}");
                    self.stopped = Some(tracee);
                    return Ok(reason);
                }
                None => {
                    let restart = match self.last_resume {
                        Some(Resume::Syscall) => Restart::Syscall,
                        _ => Restart::Continue,
                    };
                    self.tracer
                        .restart(tracee, restart)
                        .context("restarting after transparent stop")?;
                }
            }
        }
    }

    fn classify_trap(&mut self, tracee: &mut Tracee) -> Result<StopReason> {
        let mut regs = tracee.registers().context("reading registers at SIGTRAP")?;

        // The PC one past a trap byte, if this is a soft-breakpoint stop.
        let pc = Address(regs.rip.saturating_sub(1));

        if self.breakpoints.is_armed(pc) {
            // Rewind to the displaced instruction before handing control
            // back, so the caller observes the hardware-breakpoint view.
            regs.rip = pc.0;
            tracee
                .set_registers(regs)
                .context("rewinding rip at breakpoint")?;

            return Ok(StopReason::BreakpointTrap { addr: pc });
        }

        if self.last_resume == Some(Resume::Step) {
            return Ok(StopReason::SingleStep);
        }

        warn!("no registered breakpoint for SIGTRAP delivery at {pc:x}");
        Ok(StopReason::Signal(Signal::SIGTRAP))
    }

    fn harvest_exit(&mut self) -> StopReason {
        if let Some(reason) = self.pending_exit.take() {
            return reason;
        }

        // The exit-class stop was not observed; fall back to the child
        // handle in case the status is still unreaped.
        if let Ok(Some(status)) = self.child.try_wait() {
            if let Some(signal) = status.signal() {
                let signal = Signal::try_from(signal).unwrap_or(Signal::SIGKILL);
                return StopReason::Terminated(signal);
            }

            return StopReason::Exited(status.code().unwrap_or(0));
        }

        warn!("tracee ended without an observed exit status");
        StopReason::Exited(0)
    }

    /// Install a breakpoint at `addr`.
    pub fn add_breakpoint(&mut self, addr: Address) -> Result<()> {
        self.add_labeled_breakpoint(addr, None)
    }

    /// Install a breakpoint carrying a symbolic label for display.
    pub fn add_labeled_breakpoint(&mut self, addr: Address, label: Option<String>) -> Result<()> {
        if self.mode == Mode::Syscalls {
            bail!(TraceError::ModeConflict);
        }
        self.mode = Mode::Breakpoints;

        let tracee = self
            .stopped
            .as_mut()
            .ok_or_else(|| anyhow::Error::new(TraceError::NotStopped))?;

        self.breakpoints.set(tracee, addr, label)
    }

    /// Remove a breakpoint, restoring the displaced byte.
    pub fn remove_breakpoint(&mut self, addr: Address) -> Result<bool> {
        let tracee = self
            .stopped
            .as_mut()
            .ok_or_else(|| anyhow::Error::new(TraceError::NotStopped))?;

        self.breakpoints.clear(tracee, addr)
    }

    pub fn breakpoint_label(&self, addr: Address) -> Option<&str> {
        self.breakpoints.label(addr)
    }

    pub fn breakpoint(&self, addr: Address) -> Option<&crate::breakpoint::Breakpoint> {
        self.breakpoints.get(addr)
    }

    pub fn has_breakpoints(&self) -> bool {
        !self.breakpoints.is_empty()
    }

    /// Service a hit breakpoint: restore the displaced byte, single-step
    /// the original instruction, then re-arm the trap.
    ///
    /// Call after `wait()` returned `BreakpointTrap { addr }` (and after
    /// any register or memory inspection). If the tracee terminates while
    /// stepping, the terminal reason is returned and no re-arm happens. If
    /// the breakpoint was removed before this call, the step still runs
    /// but nothing is re-armed.
    pub fn step_over(&mut self, addr: Address) -> Result<StopReason> {
        if self.breakpoints.contains(addr) {
            let tracee = self
                .stopped
                .as_mut()
                .ok_or_else(|| anyhow::Error::new(TraceError::NotStopped))?;

            self.breakpoints.disarm(tracee, addr)?;
        }

        self.resume(Resume::Step)?;
        let reason = self.wait()?;

        if reason.is_terminal() {
            return Ok(reason);
        }

        if !matches!(reason, StopReason::SingleStep) {
            debug!("unexpected stop while stepping over breakpoint at {addr:x}: {reason:?}");
        }

        if self.breakpoints.contains(addr) {
            let tracee = self
                .stopped
                .as_mut()
                .ok_or_else(|| anyhow::Error::new(TraceError::NotStopped))?;

            self.breakpoints.arm(tracee, addr)?;
        }

        Ok(reason)
    }

    /// Switch the session into syscall-tracing mode. Rejected once any
    /// breakpoint has been installed.
    pub(crate) fn begin_syscall_trace(&mut self) -> Result<()> {
        if !self.breakpoints.is_empty() {
            bail!(TraceError::ModeConflict);
        }
        self.mode = Mode::Syscalls;

        Ok(())
    }

    /// Detach from the tracee and let it run free. Every armed breakpoint
    /// byte is restored first.
    pub fn detach(&mut self) -> Result<()> {
        {
            let tracee = self
                .stopped
                .as_mut()
                .ok_or_else(|| anyhow::Error::new(TraceError::NotStopped))?;

            self.breakpoints.restore_all(tracee)?;
        }

        self.stopped = None;

        let pid = nix::unistd::Pid::from_raw(self.pid.as_raw());
        nix::sys::ptrace::detach(pid, None).context("detaching from tracee")?;

        self.detached = true;
        self.terminal = true;

        Ok(())
    }

    /// Kill the tracee outright.
    pub fn kill(&mut self) -> Result<()> {
        self.child.kill().context("killing tracee")?;
        let _ = self.child.wait();
        self.terminal = true;

        Ok(())
    }
}

impl Drop for TraceeSession {
    fn drop(&mut self) {
        // Avoid dangling or zombie tracees when a session ends early.
        if !self.terminal {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

fn continue_to_init_execve(tracer: &mut Ptracer) -> Result<Tracee> {
    while let Some(tracee) = tracer.wait()? {
        if let Stop::SyscallExit = &tracee.stop {
            return Ok(tracee);
        }

        tracer.restart(tracee, Restart::Continue)?;
    }

    bail!("tracee ended before the initial execve() completed");
}
