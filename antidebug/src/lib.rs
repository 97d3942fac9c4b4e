// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Heuristic detection of anti-debugging techniques in binary images.
//!
//! The scan is a cheap, case-sensitive byte-pattern heuristic plus an INT3
//! density check over executable sections; it is not a semantic analysis.

#[macro_use]
extern crate log;

use std::fmt;

use binview::ElfView;
use serde::Serialize;

const PTRACE_PATTERNS: &[&[u8]] = &[
    b"ptrace",
    b"PTRACE",
    b"PT_DENY_ATTACH",
    b"debugger",
    b"DEBUGGER",
    b"IsDebuggerPresent",
];

const TIMING_PATTERNS: &[&[u8]] = &[
    b"rdtsc",
    b"RDTSC",
    b"clock_gettime",
    b"gettimeofday",
    b"QueryPerformanceCounter",
    b"GetTickCount",
];

const PARENT_PATTERNS: &[&[u8]] = &[b"getppid", b"PPID", b"/proc/self/status", b"TracerPid"];

const LD_PRELOAD_PATTERNS: &[&[u8]] = &[b"LD_PRELOAD", b"LD_DEBUG", b"/proc/self/maps"];

const PACKER_SECTION_MARKERS: &[&str] = &["UPX", ".packed"];

/// INT3 counts above this flag breakpoint-based debugger detection.
pub const INT3_THRESHOLD: usize = 10;

#[derive(Clone, Debug, Serialize)]
pub struct Report {
    pub file: String,
    pub anti_debug_detected: bool,
    pub techniques: Techniques,
    pub statistics: Statistics,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct Techniques {
    pub ptrace_detection: bool,
    pub timing_checks: bool,
    pub breakpoint_detection: bool,
    pub parent_process_check: bool,
    pub ld_preload_check: bool,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct Statistics {
    pub int3_instructions: usize,
    pub suspicious_strings: usize,
    pub risk_score: u32,
}

impl Report {
    pub fn risk(&self) -> Risk {
        Risk::from_score(self.statistics.risk_score)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Risk {
    None,
    Low,
    Medium,
    High,
}

impl Risk {
    pub fn from_score(score: u32) -> Self {
        match score {
            0 => Risk::None,
            1..=2 => Risk::Low,
            3..=4 => Risk::Medium,
            _ => Risk::High,
        }
    }
}

impl fmt::Display for Risk {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Risk::None => write!(f, "none"),
            Risk::Low => write!(f, "LOW - Basic anti-debug detected"),
            Risk::Medium => write!(f, "MEDIUM - Multiple techniques detected"),
            Risk::High => write!(f, "HIGH - Heavily protected binary"),
        }
    }
}

/// Scan a whole image for anti-debug indicators.
///
/// String categories run over the entire image. The INT3 density check
/// runs only inside ELF executable sections; a non-ELF image reports zero
/// INT3 instructions. Adding bytes to an image can only add matches, so
/// the risk score is monotonic in the input.
pub fn scan(file: impl Into<String>, data: &[u8]) -> Report {
    let mut techniques = Techniques::default();
    let mut statistics = Statistics::default();

    techniques.ptrace_detection = match_category(data, PTRACE_PATTERNS, &mut statistics);
    techniques.timing_checks = match_category(data, TIMING_PATTERNS, &mut statistics);
    techniques.parent_process_check = match_category(data, PARENT_PATTERNS, &mut statistics);
    techniques.ld_preload_check = match_category(data, LD_PRELOAD_PATTERNS, &mut statistics);

    if let Ok(elf) = ElfView::parse(data) {
        scan_elf_sections(data, &elf, &mut techniques, &mut statistics);
    }

    statistics.risk_score = [
        techniques.ptrace_detection,
        techniques.timing_checks,
        techniques.breakpoint_detection,
        techniques.parent_process_check,
        techniques.ld_preload_check,
    ]
    .iter()
    .filter(|&&flagged| flagged)
    .count() as u32;

    let report = Report {
        file: file.into(),
        anti_debug_detected: statistics.risk_score > 0,
        techniques,
        statistics,
    };

    debug!(
        "scan of {}: risk score {}, {} suspicious strings",
        report.file, report.statistics.risk_score, report.statistics.suspicious_strings
    );

    report
}

fn match_category(data: &[u8], patterns: &[&[u8]], statistics: &mut Statistics) -> bool {
    let matched = patterns.iter().filter(|p| contains(data, p)).count();

    statistics.suspicious_strings += matched;

    matched > 0
}

fn scan_elf_sections(
    data: &[u8],
    elf: &ElfView,
    techniques: &mut Techniques,
    statistics: &mut Statistics,
) {
    for section in elf.sections() {
        if PACKER_SECTION_MARKERS
            .iter()
            .any(|marker| section.name.contains(marker))
        {
            statistics.suspicious_strings += 1;
        }

        if !section.flags.execute {
            continue;
        }

        let lo = section.offset as usize;
        let hi = lo.saturating_add(section.size as usize);

        // Parse validated content-bearing sections; this also skips
        // executable NOBITS oddities with no file extent.
        let Some(bytes) = data.get(lo..hi) else {
            continue;
        };

        statistics.int3_instructions += bytes.iter().filter(|&&b| b == 0xcc).count();
    }

    if statistics.int3_instructions > INT3_THRESHOLD {
        techniques.breakpoint_detection = true;
    }
}

fn contains(data: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() || needle.len() > data.len() {
        return false;
    }

    data.windows(needle.len()).any(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    // Minimal ELF64 with two sections: one named `name` carrying `payload`
    // with the given flags, and the section name table.
    fn build_elf64(name: &str, payload: &[u8], executable: bool) -> Vec<u8> {
        let payload_off = 0x80u64;
        let shstr_off = payload_off + payload.len() as u64;

        let mut shstr = vec![0u8];
        let name_idx = shstr.len() as u32;
        shstr.extend_from_slice(name.as_bytes());
        shstr.push(0);
        let shstrtab_idx = shstr.len() as u32;
        shstr.extend_from_slice(b".shstrtab");
        shstr.push(0);

        let shoff = (shstr_off + shstr.len() as u64 + 7) & !7;
        let total = shoff + 3 * 64;

        let mut out = vec![0u8; total as usize];

        let p16 = |out: &mut Vec<u8>, off: usize, v: u16| {
            out[off..off + 2].copy_from_slice(&v.to_le_bytes())
        };
        let p32 = |out: &mut Vec<u8>, off: usize, v: u32| {
            out[off..off + 4].copy_from_slice(&v.to_le_bytes())
        };
        let p64 = |out: &mut Vec<u8>, off: usize, v: u64| {
            out[off..off + 8].copy_from_slice(&v.to_le_bytes())
        };

        out[0..4].copy_from_slice(&[0x7f, b'E', b'L', b'F']);
        out[4] = 2; // ELFCLASS64
        out[5] = 1; // little endian
        out[6] = 1; // EV_CURRENT
        p16(&mut out, 16, 2); // ET_EXEC
        p16(&mut out, 18, 62); // EM_X86_64
        p32(&mut out, 20, 1);
        p64(&mut out, 24, 0x400000); // e_entry
        p64(&mut out, 40, shoff); // e_shoff
        p16(&mut out, 52, 64); // e_ehsize
        p16(&mut out, 58, 64); // e_shentsize
        p16(&mut out, 60, 3); // e_shnum
        p16(&mut out, 62, 2); // e_shstrndx

        out[payload_off as usize..payload_off as usize + payload.len()].copy_from_slice(payload);
        out[shstr_off as usize..shstr_off as usize + shstr.len()].copy_from_slice(&shstr);

        let put_shdr = |out: &mut Vec<u8>,
                            index: u64,
                            name: u32,
                            flags: u64,
                            offset: u64,
                            size: u64| {
            let off = (shoff + index * 64) as usize;
            p32(out, off, name);
            p32(out, off + 4, 1); // SHT_PROGBITS
            p64(out, off + 8, flags);
            p64(out, off + 24, offset);
            p64(out, off + 32, size);
        };

        let flags = if executable { 0x6 } else { 0x2 }; // ALLOC (| EXECINSTR)

        put_shdr(
            &mut out,
            1,
            name_idx,
            flags,
            payload_off,
            payload.len() as u64,
        );
        put_shdr(
            &mut out,
            2,
            shstrtab_idx,
            0,
            shstr_off,
            shstr.len() as u64,
        );

        // Keep .shstrtab typed as a string table.
        let shstrtab_type = (shoff + 2 * 64 + 4) as usize;
        out[shstrtab_type..shstrtab_type + 4].copy_from_slice(&3u32.to_le_bytes());

        out
    }

    #[test]
    fn test_clean_image() {
        let report = scan("clean.bin", &[0u8; 4096]);

        assert!(!report.anti_debug_detected);
        assert_eq!(report.techniques, Techniques::default());
        assert_eq!(report.statistics.risk_score, 0);
        assert_eq!(report.risk(), Risk::None);
    }

    #[test]
    fn test_appending_ptrace_escalates() {
        let clean = vec![0u8; 4096];
        let before = scan("a", &clean);

        let mut suspicious = clean;
        suspicious.extend_from_slice(b"ptrace");
        let after = scan("b", &suspicious);

        assert!(!before.techniques.ptrace_detection);
        assert!(after.techniques.ptrace_detection);
        assert!(after.statistics.risk_score > before.statistics.risk_score);
        assert_eq!(after.statistics.suspicious_strings, 1);
    }

    #[test]
    fn test_category_patterns() {
        let report = scan("t", b"\x00rdtsc\x00TracerPid\x00LD_PRELOAD\x00");

        assert!(report.techniques.timing_checks);
        assert!(report.techniques.parent_process_check);
        assert!(report.techniques.ld_preload_check);
        assert!(!report.techniques.ptrace_detection);
        assert_eq!(report.statistics.risk_score, 3);
        assert_eq!(report.risk(), Risk::Medium);
    }

    #[test]
    fn test_each_matched_pattern_counts() {
        let report = scan("t", b"ptrace PTRACE rdtsc");

        assert_eq!(report.statistics.suspicious_strings, 3);
        assert_eq!(report.statistics.risk_score, 2);
        assert_eq!(report.risk(), Risk::Low);
    }

    #[test]
    fn test_int3_density_in_executable_section() {
        let data = build_elf64(".text", &[0xcc; 12], true);
        let report = scan("t", &data);

        assert_eq!(report.statistics.int3_instructions, 12);
        assert!(report.techniques.breakpoint_detection);
    }

    #[test]
    fn test_int3_threshold() {
        let data = build_elf64(".text", &[0xcc; 10], true);
        let report = scan("t", &data);

        assert_eq!(report.statistics.int3_instructions, 10);
        assert!(!report.techniques.breakpoint_detection);
    }

    #[test]
    fn test_int3_ignored_outside_executable_sections() {
        let data = build_elf64(".data", &[0xcc; 64], false);
        let report = scan("t", &data);

        assert_eq!(report.statistics.int3_instructions, 0);
        assert!(!report.techniques.breakpoint_detection);
    }

    #[test]
    fn test_int3_ignored_in_non_elf() {
        let report = scan("t", &[0xcc; 64]);

        assert_eq!(report.statistics.int3_instructions, 0);
        assert!(!report.techniques.breakpoint_detection);
    }

    #[test]
    fn test_packer_section_names_are_suspicious() {
        let data = build_elf64("UPX0", &[0u8; 16], false);
        let report = scan("t", &data);

        assert_eq!(report.statistics.suspicious_strings, 1);
    }

    #[test]
    fn test_risk_buckets() {
        assert_eq!(Risk::from_score(0), Risk::None);
        assert_eq!(Risk::from_score(1), Risk::Low);
        assert_eq!(Risk::from_score(2), Risk::Low);
        assert_eq!(Risk::from_score(3), Risk::Medium);
        assert_eq!(Risk::from_score(4), Risk::Medium);
        assert_eq!(Risk::from_score(5), Risk::High);
    }

    #[test]
    fn test_json_shape() {
        let report = scan("sample.bin", b"ptrace");
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["file"], "sample.bin");
        assert_eq!(json["anti_debug_detected"], true);
        assert_eq!(json["techniques"]["ptrace_detection"], true);
        assert_eq!(json["techniques"]["timing_checks"], false);
        assert_eq!(json["statistics"]["risk_score"], 1);
        assert_eq!(json["statistics"]["int3_instructions"], 0);
        assert_eq!(json["statistics"]["suspicious_strings"], 1);
    }
}
