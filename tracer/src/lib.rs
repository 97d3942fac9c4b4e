// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#[macro_use]
extern crate log;

pub mod attach;
pub mod breakpoint;
pub mod hook;
pub mod images;
pub mod resolve;
pub mod session;
pub mod syscall;

#[doc(inline)]
pub use attach::AttachedProcess;
#[doc(inline)]
pub use session::{Resume, StopReason, TraceeSession};

pub use binview::Address;
pub use pete::Signal;

/// Errors from the tracing engine. Kernel-level causes are chained below
/// these with their verbatim text.
#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    #[error("ptrace attach refused for pid {pid} (check privileges and yama/ptrace_scope)")]
    AttachRefused { pid: i32 },

    #[error("target process {pid} vanished")]
    Vanished { pid: i32 },

    #[error("operation requires a stopped tracee")]
    NotStopped,

    #[error("breakpoint already set at {addr:x}")]
    DuplicateBreakpoint { addr: u64 },

    #[error("no breakpoint at {addr:x}")]
    UnknownBreakpoint { addr: u64 },

    #[error("address {addr:x} is not mapped in the tracee")]
    UnmappedAddress { addr: u64 },

    #[error("symbol not found: {name}")]
    SymbolNotFound { name: String },

    #[error("no executable mapping backed by the main image of pid {pid}")]
    NoExecutableMapping { pid: i32 },

    #[error("breakpoints and syscall tracing are mutually exclusive on one session")]
    ModeConflict,
}
