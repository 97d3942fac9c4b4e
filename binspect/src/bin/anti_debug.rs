// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::path::PathBuf;

use antidebug::{Report, Risk};
use anyhow::Result;
use binview::Image;
use clap::Parser;

/// Scan a binary for anti-debugging techniques.
#[derive(Parser, Debug)]
#[command(name = "anti-debug")]
struct Args {
    /// Binary to scan
    file: PathBuf,

    /// Emit JSON instead of the report layout
    #[arg(long)]
    json: bool,
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
    let image = Image::open(&args.file)?;
    let report = antidebug::scan(args.file.display().to_string(), image.data());

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    Ok(())
}

fn print_report(report: &Report) {
    let mark = |flagged: bool| if flagged { 'X' } else { ' ' };

    println!("=== Anti-Debug Detection Report ===");
    println!("File: {}\n", report.file);

    println!("Techniques Detected:");
    println!("  [{}] Ptrace detection", mark(report.techniques.ptrace_detection));
    println!("  [{}] Timing checks", mark(report.techniques.timing_checks));
    println!(
        "  [{}] Breakpoint detection",
        mark(report.techniques.breakpoint_detection)
    );
    println!(
        "  [{}] Parent process check",
        mark(report.techniques.parent_process_check)
    );
    println!("  [{}] LD_PRELOAD check", mark(report.techniques.ld_preload_check));

    println!("\nStatistics:");
    println!("  INT3 instructions: {}", report.statistics.int3_instructions);
    println!("  Suspicious strings: {}", report.statistics.suspicious_strings);

    println!("\nRisk Assessment:");
    match report.risk() {
        Risk::None => println!("  ✓ No anti-debug techniques detected"),
        risk => println!("  ⚠ {risk}"),
    }
}
