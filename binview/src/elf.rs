// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;

use goblin::elf::{header, program_header, section_header, sym, Elf};

use crate::{Address, FormatError};

/// A parsed ELF view over a borrowed image.
///
/// Any class and byte order parses for static reporting; the dynamic
/// tracing path additionally requires `require_native()`.
pub struct ElfView<'data> {
    data: &'data [u8],
    elf: Elf<'data>,
}

impl<'data> ElfView<'data> {
    pub fn parse(data: &'data [u8]) -> Result<Self, FormatError> {
        if data.len() < 4 || data[..4] != [0x7f, b'E', b'L', b'F'] {
            return Err(FormatError::NotElf);
        }

        let elf = Elf::parse(data).map_err(|err| FormatError::Malformed {
            format: "ELF",
            reason: err.to_string(),
        })?;

        let view = Self { data, elf };
        view.validate()?;

        Ok(view)
    }

    fn validate(&self) -> Result<(), FormatError> {
        let header = &self.elf.header;

        if header.e_shnum > 0 && header.e_shstrndx >= header.e_shnum {
            return Err(FormatError::Malformed {
                format: "ELF",
                reason: format!(
                    "section name table index {} out of range (shnum = {})",
                    header.e_shstrndx, header.e_shnum
                ),
            });
        }

        let image_size = self.data.len() as u64;

        for (index, shdr) in self.elf.section_headers.iter().enumerate() {
            if shdr.sh_type == section_header::SHT_NULL
                || shdr.sh_type == section_header::SHT_NOBITS
            {
                continue;
            }

            let in_range = shdr
                .sh_offset
                .checked_add(shdr.sh_size)
                .map(|end| end <= image_size)
                .unwrap_or(false);

            if !in_range {
                return Err(FormatError::Truncated {
                    format: "ELF",
                    what: format!("section {index}"),
                    offset: shdr.sh_offset,
                    size: shdr.sh_size,
                    image_size,
                });
            }
        }

        Ok(())
    }

    pub fn class(&self) -> Class {
        if self.elf.is_64 {
            Class::Elf64
        } else {
            Class::Elf32
        }
    }

    pub fn little_endian(&self) -> bool {
        self.elf.little_endian
    }

    pub fn machine(&self) -> Machine {
        match self.elf.header.e_machine {
            header::EM_386 => Machine::X86,
            header::EM_X86_64 => Machine::X86_64,
            header::EM_ARM => Machine::Arm,
            header::EM_AARCH64 => Machine::Arm64,
            other => Machine::Other(other),
        }
    }

    pub fn elf_type(&self) -> ElfType {
        match self.elf.header.e_type {
            header::ET_EXEC => ElfType::Executable,
            header::ET_DYN => ElfType::SharedObject,
            header::ET_REL => ElfType::Relocatable,
            other => ElfType::Other(other),
        }
    }

    pub fn entry(&self) -> Address {
        Address(self.elf.entry)
    }

    pub fn program_header_info(&self) -> (usize, u64) {
        (self.elf.program_headers.len(), self.elf.header.e_phoff)
    }

    pub fn section_header_info(&self) -> (usize, u64) {
        (self.elf.section_headers.len(), self.elf.header.e_shoff)
    }

    /// The dynamic tracing path is x86-64 little-endian only.
    pub fn require_native(&self) -> Result<(), FormatError> {
        if self.class() != Class::Elf64 {
            return Err(FormatError::Unsupported {
                reason: "tracing requires an ELF64 image".into(),
            });
        }

        if !self.little_endian() {
            return Err(FormatError::Unsupported {
                reason: "tracing requires a little-endian image".into(),
            });
        }

        if self.machine() != Machine::X86_64 {
            return Err(FormatError::Unsupported {
                reason: format!("tracing requires an x86-64 image, found {}", self.machine()),
            });
        }

        Ok(())
    }

    pub fn sections(&self) -> impl Iterator<Item = Section<'data>> + '_ {
        self.elf.section_headers.iter().map(|shdr| {
            let name = self.elf.shdr_strtab.get_at(shdr.sh_name).unwrap_or("");

            Section {
                name,
                section_type: shdr.sh_type,
                addr: Address(shdr.sh_addr),
                offset: shdr.sh_offset,
                size: shdr.sh_size,
                flags: SectionFlags::from_sh_flags(shdr.sh_flags),
            }
        })
    }

    pub fn programs(&self) -> impl Iterator<Item = Segment> + '_ {
        self.elf.program_headers.iter().map(|phdr| Segment {
            segment_type: phdr.p_type,
            offset: phdr.p_offset,
            vaddr: Address(phdr.p_vaddr),
            file_size: phdr.p_filesz,
            readable: phdr.p_flags & program_header::PF_R != 0,
            writable: phdr.p_flags & program_header::PF_W != 0,
            executable: phdr.p_flags & program_header::PF_X != 0,
        })
    }

    /// All symbols, `SYMTAB` entries first, then `DYNSYM`.
    ///
    /// Trivial entries (no name, or zero value) are preserved for static
    /// listing; `resolve()` skips them.
    pub fn symbols(&self) -> Vec<Symbol<'data>> {
        let mut symbols = vec![];

        for s in self.elf.syms.iter() {
            let name = self.elf.strtab.get_at(s.st_name).unwrap_or("");
            symbols.push(Symbol::new(name, &s, SymbolTable::Symtab));
        }

        for s in self.elf.dynsyms.iter() {
            let name = self.elf.dynstrtab.get_at(s.st_name).unwrap_or("");
            symbols.push(Symbol::new(name, &s, SymbolTable::Dynsym));
        }

        symbols
    }

    /// File virtual address of the named symbol.
    ///
    /// `SYMTAB` is preferred over `DYNSYM` when both define the name. On a
    /// stripped binary only `DYNSYM` remains, which still covers externally
    /// visible functions.
    pub fn resolve(&self, name: &str) -> Option<Address> {
        self.symbols()
            .into_iter()
            .find(|s| !s.is_trivial() && s.name == name)
            .map(|s| s.value)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Class {
    Elf32,
    Elf64,
}

impl fmt::Display for Class {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Class::Elf32 => write!(f, "ELF32"),
            Class::Elf64 => write!(f, "ELF64"),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Machine {
    X86,
    X86_64,
    Arm,
    Arm64,
    Other(u16),
}

impl fmt::Display for Machine {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Machine::X86 => write!(f, "x86"),
            Machine::X86_64 => write!(f, "x86-64"),
            Machine::Arm => write!(f, "ARM"),
            Machine::Arm64 => write!(f, "ARM64"),
            Machine::Other(m) => write!(f, "Unknown (0x{m:x})"),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ElfType {
    Executable,
    SharedObject,
    Relocatable,
    Other(u16),
}

impl fmt::Display for ElfType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ElfType::Executable => write!(f, "Executable"),
            ElfType::SharedObject => write!(f, "Shared Object"),
            ElfType::Relocatable => write!(f, "Relocatable"),
            ElfType::Other(t) => write!(f, "Unknown (0x{t:x})"),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Section<'data> {
    pub name: &'data str,
    pub section_type: u32,
    pub addr: Address,
    pub offset: u64,
    pub size: u64,
    pub flags: SectionFlags,
}

impl Section<'_> {
    pub fn type_name(&self) -> String {
        match self.section_type {
            section_header::SHT_NULL => "NULL".into(),
            section_header::SHT_PROGBITS => "PROGBITS".into(),
            section_header::SHT_SYMTAB => "SYMTAB".into(),
            section_header::SHT_STRTAB => "STRTAB".into(),
            section_header::SHT_RELA => "RELA".into(),
            section_header::SHT_HASH => "HASH".into(),
            section_header::SHT_DYNAMIC => "DYNAMIC".into(),
            section_header::SHT_NOBITS => "NOBITS".into(),
            section_header::SHT_DYNSYM => "DYNSYM".into(),
            other => format!("0x{other:x}"),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SectionFlags {
    pub write: bool,
    pub alloc: bool,
    pub execute: bool,
}

impl SectionFlags {
    fn from_sh_flags(sh_flags: u64) -> Self {
        Self {
            write: sh_flags & u64::from(section_header::SHF_WRITE) != 0,
            alloc: sh_flags & u64::from(section_header::SHF_ALLOC) != 0,
            execute: sh_flags & u64::from(section_header::SHF_EXECINSTR) != 0,
        }
    }
}

impl fmt::Display for SectionFlags {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if !(self.write || self.alloc || self.execute) {
            return write!(f, "-");
        }

        if self.write {
            write!(f, "W")?;
        }
        if self.alloc {
            write!(f, "A")?;
        }
        if self.execute {
            write!(f, "X")?;
        }

        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Segment {
    pub segment_type: u32,
    pub offset: u64,
    pub vaddr: Address,
    pub file_size: u64,
    pub readable: bool,
    pub writable: bool,
    pub executable: bool,
}

impl Segment {
    pub fn type_name(&self) -> String {
        match self.segment_type {
            program_header::PT_NULL => "NULL".into(),
            program_header::PT_LOAD => "LOAD".into(),
            program_header::PT_DYNAMIC => "DYNAMIC".into(),
            program_header::PT_INTERP => "INTERP".into(),
            program_header::PT_NOTE => "NOTE".into(),
            program_header::PT_PHDR => "PHDR".into(),
            program_header::PT_GNU_STACK => "GNU_STACK".into(),
            other => format!("0x{other:x}"),
        }
    }

    pub fn flags_display(&self) -> String {
        let mut flags = String::new();

        if self.readable {
            flags.push('R');
        }
        if self.writable {
            flags.push('W');
        }
        if self.executable {
            flags.push('X');
        }

        flags
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SymbolTable {
    Symtab,
    Dynsym,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SymbolKind {
    NoType,
    Object,
    Function,
    Section,
    File,
    Other(u8),
}

impl fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SymbolKind::NoType => write!(f, "NOTYPE"),
            SymbolKind::Object => write!(f, "OBJECT"),
            SymbolKind::Function => write!(f, "FUNC"),
            SymbolKind::Section => write!(f, "SECTION"),
            SymbolKind::File => write!(f, "FILE"),
            SymbolKind::Other(t) => write!(f, "{t}"),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SymbolBind {
    Local,
    Global,
    Weak,
    Other(u8),
}

impl fmt::Display for SymbolBind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SymbolBind::Local => write!(f, "LOCAL"),
            SymbolBind::Global => write!(f, "GLOBAL"),
            SymbolBind::Weak => write!(f, "WEAK"),
            SymbolBind::Other(b) => write!(f, "{b}"),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Symbol<'data> {
    pub name: &'data str,
    pub value: Address,
    pub size: u64,
    pub kind: SymbolKind,
    pub bind: SymbolBind,
    pub table: SymbolTable,
}

impl<'data> Symbol<'data> {
    fn new(name: &'data str, s: &sym::Sym, table: SymbolTable) -> Self {
        let kind = match s.st_type() {
            sym::STT_NOTYPE => SymbolKind::NoType,
            sym::STT_OBJECT => SymbolKind::Object,
            sym::STT_FUNC => SymbolKind::Function,
            sym::STT_SECTION => SymbolKind::Section,
            sym::STT_FILE => SymbolKind::File,
            other => SymbolKind::Other(other),
        };

        let bind = match s.st_bind() {
            sym::STB_LOCAL => SymbolBind::Local,
            sym::STB_GLOBAL => SymbolBind::Global,
            sym::STB_WEAK => SymbolBind::Weak,
            other => SymbolBind::Other(other),
        };

        Self {
            name,
            value: Address(s.st_value),
            size: s.st_size,
            kind,
            bind,
            table,
        }
    }

    /// Unnamed or zero-value entries are listed statically but never used
    /// for address resolution.
    pub fn is_trivial(&self) -> bool {
        self.name.is_empty() || self.value.0 == 0
    }
}
