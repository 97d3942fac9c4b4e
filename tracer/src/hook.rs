// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use anyhow::Result;
use binview::{Address, ElfView};
use libc::user_regs_struct;

use crate::resolve;
use crate::session::TraceeSession;

/// A breakpoint keyed by symbol name.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Hook {
    pub name: String,
    pub addr: Address,
}

/// Resolve `name` in the tracee's main image and install a labeled
/// breakpoint on it. A resolution failure installs nothing and is reported
/// to the caller.
pub fn install(
    session: &mut TraceeSession,
    elf: &ElfView,
    base: Address,
    name: &str,
) -> Result<Hook> {
    let addr = resolve::runtime_address(elf, base, name)?;

    session.add_labeled_breakpoint(addr, Some(name.to_owned()))?;
    info!("hooked {name} at {addr:x}");

    Ok(Hook {
        name: name.to_owned(),
        addr,
    })
}

/// Render a hook entry: the label plus the six integer argument registers
/// of the System V x86-64 call convention.
pub fn entry_report(label: &str, regs: &user_regs_struct) -> String {
    format!(
        "[HOOK] {label}()\n  \
         RDI: 0x{:x}  RSI: 0x{:x}  RDX: 0x{:x}\n  \
         RCX: 0x{:x}  R8:  0x{:x}  R9:  0x{:x}",
        regs.rdi, regs.rsi, regs.rdx, regs.rcx, regs.r8, regs.r9,
    )
}
