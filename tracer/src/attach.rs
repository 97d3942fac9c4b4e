// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use anyhow::{bail, Context, Result};
use nix::errno::Errno;
use nix::sys::ptrace;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::Pid;

use crate::TraceError;

/// An existing process stopped under `PTRACE_ATTACH` for inspection.
///
/// This path never installs breakpoints, so detaching needs no restore
/// pass. The process is detached (and so resumed) on drop if the caller
/// did not detach explicitly.
pub struct AttachedProcess {
    pid: Pid,
    detached: bool,
}

impl AttachedProcess {
    /// Attach to `pid` and wait for the induced stop.
    pub fn attach(pid: i32) -> Result<Self> {
        let pid = Pid::from_raw(pid);

        ptrace::attach(pid).map_err(|errno| attach_error(pid, errno))?;

        match waitpid(pid, None).context("waiting for attach stop")? {
            WaitStatus::Stopped(..) => {}
            other => bail!("unexpected wait status after attach: {other:?}"),
        }

        debug!("attached to pid {pid}");

        Ok(Self {
            pid,
            detached: false,
        })
    }

    pub fn pid(&self) -> i32 {
        self.pid.as_raw()
    }

    /// Read one word from the attached process.
    pub fn peek_word(&self, addr: u64) -> Result<u64> {
        let word = ptrace::read(self.pid, addr as usize as ptrace::AddressType)
            .map_err(|errno| memory_error(self.pid, addr, errno))?;

        Ok(word as u64)
    }

    /// Read `len` bytes starting at `addr`, word by word.
    pub fn read_bytes(&self, addr: u64, len: usize) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(len + 8);

        while out.len() < len {
            let word = self.peek_word(addr + out.len() as u64)?;
            out.extend_from_slice(&word.to_le_bytes());
        }

        out.truncate(len);

        Ok(out)
    }

    /// Detach, letting the process resume.
    pub fn detach(mut self) -> Result<()> {
        ptrace::detach(self.pid, None).context("detaching from process")?;
        self.detached = true;

        Ok(())
    }
}

impl Drop for AttachedProcess {
    fn drop(&mut self) {
        if !self.detached {
            let _ = ptrace::detach(self.pid, None);
        }
    }
}

fn attach_error(pid: Pid, errno: Errno) -> anyhow::Error {
    match errno {
        Errno::EPERM | Errno::EACCES => TraceError::AttachRefused { pid: pid.as_raw() }.into(),
        Errno::ESRCH => TraceError::Vanished { pid: pid.as_raw() }.into(),
        other => anyhow::Error::new(other).context("ptrace attach failed"),
    }
}

fn memory_error(pid: Pid, addr: u64, errno: Errno) -> anyhow::Error {
    match errno {
        Errno::EIO | Errno::EFAULT => TraceError::UnmappedAddress { addr }.into(),
        Errno::ESRCH => TraceError::Vanished { pid: pid.as_raw() }.into(),
        other => anyhow::Error::new(other).context(format!("ptrace read at {addr:x} failed")),
    }
}
