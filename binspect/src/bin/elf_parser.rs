// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::path::PathBuf;

use anyhow::Result;
use binview::{ElfView, Image};
use clap::Parser;

const SYMBOL_CAP: usize = 50;
const RULE: &str = "─────────────────────────────────────────────────────────────────────";

/// Static inspection of ELF images.
#[derive(Parser, Debug)]
#[command(name = "elf-parser")]
struct Args {
    /// ELF file to inspect
    file: PathBuf,
}

fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();

    let image = Image::open(&args.file)?;
    let elf = ElfView::parse(image.data())?;

    println!("ELF File: {}", args.file.display());

    print_header(&image, &elf);
    print_programs(&elf);
    print_sections(&elf);
    print_symbols(&elf);

    Ok(())
}

fn print_header(image: &Image, elf: &ElfView) {
    let magic = image.data();

    println!("\n=== ELF Header ===");
    println!(
        "Magic:           {:02x} {:02x} {:02x} {:02x}",
        magic[0], magic[1], magic[2], magic[3]
    );
    println!("Class:           {}", elf.class());
    println!(
        "Data:            {}",
        if elf.little_endian() {
            "Little Endian"
        } else {
            "Big Endian"
        }
    );
    println!("Type:            {}", elf.elf_type());
    println!("Machine:         {}", elf.machine());
    println!("Entry Point:     0x{:x}", elf.entry());

    let (phnum, phoff) = elf.program_header_info();
    println!("Program Headers: {phnum} (offset: 0x{phoff:x})");

    let (shnum, shoff) = elf.section_header_info();
    println!("Section Headers: {shnum} (offset: 0x{shoff:x})");
}

fn print_programs(elf: &ElfView) {
    println!("\n=== Program Headers ===");
    println!(
        "{:<12} {:<12} {:<12} {:<10} {}",
        "Type", "Offset", "VirtAddr", "FileSize", "Flags"
    );
    println!("{RULE}");

    for segment in elf.programs() {
        println!(
            "{:<12} 0x{:010x} 0x{:010x} {:<10} {}",
            segment.type_name(),
            segment.offset,
            segment.vaddr.0,
            segment.file_size,
            segment.flags_display(),
        );
    }
}

fn print_sections(elf: &ElfView) {
    println!("\n=== Section Headers ===");
    println!(
        "{:<20} {:<12} {:<12} {:<10} {}",
        "Name", "Type", "Address", "Size", "Flags"
    );
    println!("{RULE}");

    for section in elf.sections() {
        println!(
            "{:<20} {:<12} 0x{:010x} {:<10} {}",
            section.name,
            section.type_name(),
            section.addr.0,
            section.size,
            section.flags,
        );
    }
}

fn print_symbols(elf: &ElfView) {
    let symbols = elf.symbols();
    let listable: Vec<_> = symbols.iter().filter(|s| !s.is_trivial()).collect();

    if symbols.is_empty() {
        println!("\n=== Symbols ===");
        println!("No symbol table found");
        return;
    }

    println!("\n=== Symbols (showing first {SYMBOL_CAP}) ===");
    println!("{:<40} {:<12} {:<8}", "Name", "Address", "Type");
    println!("{RULE}");

    for symbol in listable.iter().take(SYMBOL_CAP) {
        println!(
            "{:<40} 0x{:010x} {:<8}",
            symbol.name, symbol.value.0, symbol.kind
        );
    }

    if listable.len() > SYMBOL_CAP {
        println!("... ({} more symbols)", listable.len() - SYMBOL_CAP);
    }
}
