//! Human readable rendering of boot tables and memory maps

use std::fmt::Write;

use crate::boot::{BootTable, Image};
use crate::memory::{EraseCheck, MemoryRegion, FLASH_END};

const BOX_WIDTH: usize = 30;

/// Escape bytes the way they would appear in a string literal
pub fn escape(bytes: &[u8]) -> String {
    bytes
        .iter()
        .flat_map(|b| core::ascii::escape_default(*b))
        .map(char::from)
        .collect()
}

/// Escape bytes and wrap them in single quotes
pub fn quote(bytes: &[u8]) -> String {
    format!("'{}'", escape(bytes))
}

/// Break `s` into lines of at most `width` characters
fn wrap(s: &str, width: usize) -> Vec<String> {
    let chars: Vec<char> = s.chars().collect();
    chars.chunks(width).map(|c| c.iter().collect()).collect()
}

fn image_line(out: &mut String, name: &str, image: &Image) {
    let _ = writeln!(
        out,
        "  {} {:08X} - {:08X} ({:X} bytes)",
        name,
        image.start,
        image.end().wrapping_sub(1),
        image.length
    );
}

/// Render every valid entry of a boot table
pub fn boot_table(table: &BootTable) -> String {
    let mut out = String::new();

    for (i, entry) in table.entries() {
        let _ = writeln!(out, "Boot {}:", i);

        let flags: Vec<String> = entry
            .flags
            .labels()
            .map(|(f, label)| format!("{:08X}: {}", f.bits(), label))
            .collect();
        if !flags.is_empty() {
            let _ = writeln!(out, "  Flags: {}", flags.join(&format!("\n{:9}", "")));
        }

        if !entry.ram_image.is_empty() {
            image_line(&mut out, "RAM Image:", &entry.ram_image);
        }
        if !entry.rom_image.is_empty() {
            image_line(&mut out, "ROM Image:", &entry.rom_image);
        }
        let _ = writeln!(
            out,
            "  ROM Start Offset: {:X} (CPSR = {:08X})",
            entry.rom_exec_offset, entry.rom_exec_cpsr
        );
        if !entry.spartan_image.is_empty() {
            image_line(&mut out, "Spartan Image:", &entry.spartan_image);
        }
        if !entry.virtex_image.is_empty() {
            image_line(&mut out, "Virtex Image: ", &entry.virtex_image);
        }

        if !entry.lcd_message.is_empty() {
            let lines = wrap(&quote(&entry.lcd_message), 65);
            let _ = writeln!(out, "  LCD Message: {}", lines.join(&format!("\n{:15}", "")));
        }
        if !entry.tail.is_empty() {
            let lines = wrap(&quote(&entry.tail), 72);
            let _ = writeln!(out, "  Tail: {}", lines.join(&format!("\n{:8}", "")));
        }

        out.push('\n');
    }

    let mut out = out.trim().to_string();
    out.push('\n');
    out
}

fn gap(out: &mut String, top: u32, bottom: u32) {
    let _ = writeln!(out, "  +{}+", "-".repeat(BOX_WIDTH));
    let _ = writeln!(out, "  '{}' {:06X}", " ".repeat(BOX_WIDTH), top.wrapping_sub(1));
    let _ = writeln!(out, "  ,{}, {:06X}", " ".repeat(BOX_WIDTH), bottom);
}

/// Draw the flash allocation from the top of flash down.
///
/// Expects `map` in the order produced by
/// [`build_memory_map`](crate::memory::build_memory_map).
pub fn memory_map(map: &[MemoryRegion]) -> String {
    let mut out = String::from("ROM Allocation:\n");
    let inner = BOX_WIDTH - 2;

    let mut last = FLASH_END;
    for region in map {
        if region.end != last {
            gap(&mut out, last, region.end);
        }

        let size = format!("({:X} bytes)", region.len());

        let _ = writeln!(out, "  +{}+", "-".repeat(BOX_WIDTH));
        let _ = writeln!(
            out,
            "  |{}| {:06X}",
            " ".repeat(BOX_WIDTH),
            region.end.wrapping_sub(1)
        );
        let _ = writeln!(out, "  | {:^w$} |", region.label, w = inner);
        let _ = writeln!(out, "  | {:^w$} |", size, w = inner);
        let _ = writeln!(out, "  |{}| {:06X}", " ".repeat(BOX_WIDTH), region.start);

        last = region.start;
    }

    if last != 0 {
        gap(&mut out, last, 0);
    }
    let _ = writeln!(out, "  +{}+", "-".repeat(BOX_WIDTH));

    out
}

/// Describe the sector an erase would hit and what it contains
pub fn erase_check(check: &EraseCheck) -> String {
    let s = &check.sector;
    let mut out = format!(
        "Block {:06X} - {:06X} ({:X} bytes) will be erased.\n",
        s.start,
        s.end - 1,
        s.len()
    );

    if !check.clobbered.is_empty() {
        out.push_str("This block contains:\n");
        for r in &check.clobbered {
            let _ = writeln!(out, "  {}", r);
        }
    }

    out
}
