// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracer::AttachedProcess;

const MAX_DUMP_SIZE: u64 = 10 * 1024 * 1024;

/// Dump a memory range from a running process.
#[derive(Parser, Debug)]
#[command(name = "memdump")]
struct Args {
    /// Process ID to dump from
    pid: i32,

    /// Memory address (hex, e.g. 0x400000)
    addr: String,

    /// Number of bytes (hex, e.g. 0x1000)
    size: String,

    /// Optional file to save the raw dump to
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();

    let addr = binspect::parse_hex(&args.addr)?;
    let size = binspect::parse_hex(&args.size)?;

    if size == 0 {
        bail!("invalid size");
    }

    if size > MAX_DUMP_SIZE {
        bail!("size too large (max 10MB)");
    }

    let attached = AttachedProcess::attach(args.pid)?;
    let data = attached.read_bytes(addr, size as usize)?;

    match &args.output {
        Some(path) => {
            println!("[*] Dumping 0x{size:x} bytes from 0x{addr:x}");

            std::fs::write(path, &data)
                .with_context(|| format!("writing dump to {}", path.display()))?;

            println!("[+] Saved to {}", path.display());
        }
        None => hex_dump(&data, addr),
    }

    attached.detach()?;

    Ok(())
}

fn hex_dump(data: &[u8], base_addr: u64) {
    for (i, chunk) in data.chunks(16).enumerate() {
        print!("0x{:08x}: ", base_addr + (i as u64) * 16);

        for j in 0..16 {
            match chunk.get(j) {
                Some(byte) => print!("{byte:02x} "),
                None => print!("   "),
            }
        }

        print!(" |");
        for byte in chunk {
            let c = if byte.is_ascii_graphic() || *byte == b' ' {
                *byte as char
            } else {
                '.'
            };
            print!("{c}");
        }
        println!("|");
    }
}
