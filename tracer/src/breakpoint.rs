// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use binview::Address;
use pete::Tracee;

use crate::TraceError;

/// The x86 single-byte trap instruction.
pub const INT3: u8 = 0xcc;

/// A software breakpoint record.
///
/// While armed, the byte at `addr` in the tracee is `INT3` and the
/// displaced byte is held here. The record survives disarming so that the
/// service cycle can re-arm without re-reading tracee memory.
#[derive(Clone, Debug)]
pub struct Breakpoint {
    addr: Address,
    saved: u8,
    label: Option<String>,
    armed: bool,
}

impl Breakpoint {
    pub fn addr(&self) -> Address {
        self.addr
    }

    pub fn saved_byte(&self) -> u8 {
        self.saved
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }
}

/// Active breakpoints for one tracee, keyed by address.
#[derive(Clone, Debug, Default)]
pub struct Breakpoints {
    map: BTreeMap<Address, Breakpoint>,
}

impl Breakpoints {
    /// Install a breakpoint: save the displaced byte, then write `INT3`.
    ///
    /// A second install at the same address is rejected; accepting it would
    /// record `INT3` as the displaced byte.
    pub fn set(&mut self, tracee: &mut Tracee, addr: Address, label: Option<String>) -> Result<()> {
        if self.map.contains_key(&addr) {
            return Err(TraceError::DuplicateBreakpoint { addr: addr.0 }.into());
        }

        let mut data = [0u8];
        tracee
            .read_memory_mut(addr.0, &mut data)
            .with_context(|| format!("reading displaced byte at {addr:x}"))?;

        write_byte(tracee, addr, INT3).context("setting breakpoint, writing int3")?;

        let breakpoint = Breakpoint {
            addr,
            saved: data[0],
            label,
            armed: true,
        };
        self.map.insert(addr, breakpoint);

        Ok(())
    }

    /// Remove a breakpoint, restoring the displaced byte if it is armed.
    /// Returns false if no breakpoint was registered at `addr`.
    pub fn clear(&mut self, tracee: &mut Tracee, addr: Address) -> Result<bool> {
        let Some(breakpoint) = self.map.remove(&addr) else {
            return Ok(false);
        };

        if breakpoint.armed {
            write_byte(tracee, addr, breakpoint.saved)
                .context("clearing breakpoint, restoring byte")?;
        }

        Ok(true)
    }

    /// Restore the displaced byte but keep the record, so the breakpoint
    /// can be re-armed after the original instruction retires.
    pub fn disarm(&mut self, tracee: &mut Tracee, addr: Address) -> Result<()> {
        let breakpoint = self
            .map
            .get_mut(&addr)
            .ok_or(TraceError::UnknownBreakpoint { addr: addr.0 })?;

        if breakpoint.armed {
            // A failed restore leaves the tracee with a stray int3; the
            // session is unrecoverable past this point.
            write_byte(tracee, addr, breakpoint.saved)
                .context("restoring displaced byte; tracee state is inconsistent")?;
            breakpoint.armed = false;
        }

        Ok(())
    }

    /// Rewrite `INT3` over a disarmed breakpoint.
    pub fn arm(&mut self, tracee: &mut Tracee, addr: Address) -> Result<()> {
        let breakpoint = self
            .map
            .get_mut(&addr)
            .ok_or(TraceError::UnknownBreakpoint { addr: addr.0 })?;

        if !breakpoint.armed {
            write_byte(tracee, addr, INT3).context("re-arming breakpoint, writing int3")?;
            breakpoint.armed = true;
        }

        Ok(())
    }

    /// Restore every armed breakpoint's byte. Required before detach, or
    /// the tracee would run into stray traps.
    pub fn restore_all(&mut self, tracee: &mut Tracee) -> Result<()> {
        let addrs: Vec<_> = self.map.keys().copied().collect();

        for addr in addrs {
            self.disarm(tracee, addr)?;
        }

        Ok(())
    }

    pub fn contains(&self, addr: Address) -> bool {
        self.map.contains_key(&addr)
    }

    /// True iff an armed breakpoint lives at `addr`. This is the stop
    /// classification predicate: a SIGTRAP is ours only while the trap byte
    /// is actually in place.
    pub fn is_armed(&self, addr: Address) -> bool {
        self.map.get(&addr).map(|b| b.armed).unwrap_or(false)
    }

    pub fn get(&self, addr: Address) -> Option<&Breakpoint> {
        self.map.get(&addr)
    }

    pub fn label(&self, addr: Address) -> Option<&str> {
        self.map.get(&addr).and_then(|b| b.label())
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

fn write_byte(tracee: &mut Tracee, addr: Address, byte: u8) -> Result<()> {
    tracee
        .write_memory(addr.0, &[byte])
        .with_context(|| format!("writing byte at {addr:x}"))?;

    Ok(())
}
