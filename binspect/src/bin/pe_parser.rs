// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::path::PathBuf;

use anyhow::Result;
use binview::{Image, PeView};
use clap::Parser;

/// Static inspection of PE images.
#[derive(Parser, Debug)]
#[command(name = "pe-parser")]
struct Args {
    /// PE file to inspect
    file: PathBuf,
}

fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();

    let image = Image::open(&args.file)?;
    let pe = PeView::parse(image.data())?;

    println!("===========================================");
    println!("         PE File Structure");
    println!("===========================================\n");

    println!("DOS Header:");
    println!("   Magic: MZ (0x5A4D)");
    println!("   PE Offset: 0x{:X}\n", pe.pe_offset());

    println!("PE Signature: PE (0x00004550)\n");

    println!("COFF File Header:");
    println!("   Machine: 0x{:X} ({})", pe.machine(), pe.machine_name());
    println!("   Sections: {}", pe.sections().len());
    println!("   Timestamp: 0x{:X}", pe.timestamp());
    println!(
        "   Characteristics: 0x{:X} ({})\n",
        pe.coff_characteristics(),
        if pe.is_dll() { "DLL" } else { "EXE" }
    );

    println!("Optional Header:");
    println!("   Magic: {}", pe.format());
    println!("   Entry Point: 0x{:X}", pe.entry().0);
    println!("   Image Base: 0x{:X}", pe.image_base().0);
    println!("   Code Size: 0x{:X}\n", pe.size_of_code());

    println!("Sections:");
    for (index, section) in pe.sections().iter().enumerate() {
        println!("   [{index}] {:<8}", section.name);
        println!("       Virtual Address: 0x{:08X}", section.virtual_address);
        println!("       Virtual Size: 0x{:X}", section.virtual_size);
        println!("       Raw Size: 0x{:X}", section.size_of_raw_data);
        println!("       Raw Offset: 0x{:X}", section.pointer_to_raw_data);
        println!(
            "       Flags: 0x{:08X} {}\n",
            section.characteristics,
            section.flags_display()
        );
    }

    Ok(())
}
