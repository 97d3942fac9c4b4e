// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Shared plumbing for the command-line tools.

use anyhow::{Context, Result};
use tracer::StopReason;

/// Parse a hexadecimal argument, with or without a `0x` prefix.
pub fn parse_hex(value: &str) -> Result<u64> {
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value);

    u64::from_str_radix(digits, 16).with_context(|| format!("invalid hexadecimal value: {value}"))
}

/// Map a terminal stop to the tool's exit code: the child's own exit code,
/// or `128 + signo` for signal termination.
pub fn exit_status_code(reason: StopReason) -> i32 {
    match reason {
        StopReason::Exited(code) => code,
        StopReason::Terminated(signal) => 128 + signal as i32,
        _ => 0,
    }
}
