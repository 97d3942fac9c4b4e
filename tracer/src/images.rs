// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::path::PathBuf;

use anyhow::{Context, Result};
use binview::Address;
use procfs::process::{MMPermissions, MMapPath, Process};

use crate::TraceError;

/// The runtime load placement of a process's main executable image.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MainImage {
    /// Load base: the address file offset zero is mapped at.
    pub base: Address,
    /// Resolved path of the executable backing the mapping.
    pub path: PathBuf,
}

/// Locate the main executable image of `pid`.
///
/// Only mappings backed by the process's own executable (path-matched
/// against `/proc/<pid>/exe`) are considered, so interpreter mappings for
/// dynamically linked programs never win. Among the executable mappings of
/// that file, the lowest load base is taken; the mapping's file offset is
/// subtracted so that split segment mappings still yield the image base.
pub fn main_image(pid: i32) -> Result<MainImage> {
    let proc = Process::new(pid).map_err(|err| match &err {
        procfs::ProcError::NotFound(_) => anyhow::Error::new(TraceError::Vanished { pid }),
        _ => anyhow::Error::new(err).context("reading process info"),
    })?;

    let exe = proc.exe().context("reading tracee executable link")?;

    let mut base: Option<u64> = None;

    for map in proc.maps().context("reading tracee memory map")? {
        if !map.perms.contains(MMPermissions::EXECUTE) {
            continue;
        }

        let MMapPath::Path(path) = &map.pathname else {
            continue;
        };

        if *path != exe {
            continue;
        }

        let image_base = map.address.0.saturating_sub(map.offset);
        base = Some(base.map_or(image_base, |b| b.min(image_base)));
    }

    let base = base.ok_or(TraceError::NoExecutableMapping { pid })?;

    Ok(MainImage {
        base: Address(base),
        path: exe,
    })
}
