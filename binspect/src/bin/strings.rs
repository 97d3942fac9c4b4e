// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::path::PathBuf;

use anyhow::{bail, Result};
use binview::strings::{self, StringHit, MIN_LEN_DEFAULT, MIN_LEN_LIMIT};
use binview::Image;
use clap::Parser;
use serde::Serialize;

/// Extract printable strings from a binary file.
#[derive(Parser, Debug)]
#[command(name = "strings")]
struct Args {
    /// File to scan
    file: PathBuf,

    /// Minimum string length (1-1024)
    min_len: Option<usize>,

    /// Emit JSON instead of a plain listing
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct Output<'a> {
    tool: &'static str,
    file: String,
    strings: &'a [StringHit],
}

fn main() {
    env_logger::init();

    let args = Args::parse();

    if let Err(err) = run(&args) {
        if args.json {
            println!("{}", serde_json::json!({ "error": format!("{err:#}") }));
        } else {
            eprintln!("Error: {err:#}");
        }
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<()> {
    let min_len = args.min_len.unwrap_or(MIN_LEN_DEFAULT);

    if !(1..=MIN_LEN_LIMIT).contains(&min_len) {
        bail!("invalid min_length (must be 1-{MIN_LEN_LIMIT})");
    }

    let image = Image::open(&args.file)?;
    let hits = strings::extract(image.data(), min_len);

    if args.json {
        let output = Output {
            tool: "strings",
            file: args.file.display().to_string(),
            strings: &hits,
        };

        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        for hit in &hits {
            println!("0x{:08x}: {}", hit.offset, hit.value);
        }
    }

    Ok(())
}
