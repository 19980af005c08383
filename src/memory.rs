//! Flash memory map and erase safety checks

use core::fmt;

use embedded_hal::blocking::delay::DelayMs;

use crate::boot::{BootTable, CONTROL_BLOCK, NUM_BOOTS, SLOT_SIZE};
use crate::{Error, Programmer, SerialPort};

/// Default MMU translation table, always present in flash
pub const MMU_TABLE: (u32, u32) = (0x008000, 0x010000);

/// An individually erasable flash sector, `end` exclusive
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Sector {
    pub start: u32,
    pub end: u32,
}

impl Sector {
    const fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> u32 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn contains(&self, address: u32) -> bool {
        self.start <= address && address < self.end
    }
}

/// Individually erasable sectors in the flash, lowest first
pub const SECTORS: [Sector; 35] = [
    Sector::new(0x000000, 0x004000),
    Sector::new(0x004000, 0x006000),
    Sector::new(0x006000, 0x008000),
    Sector::new(0x008000, 0x010000),
    Sector::new(0x010000, 0x020000),
    Sector::new(0x020000, 0x030000),
    Sector::new(0x030000, 0x040000),
    Sector::new(0x040000, 0x050000),
    Sector::new(0x050000, 0x060000),
    Sector::new(0x060000, 0x070000),
    Sector::new(0x070000, 0x080000),
    Sector::new(0x080000, 0x090000),
    Sector::new(0x090000, 0x0A0000),
    Sector::new(0x0A0000, 0x0B0000),
    Sector::new(0x0B0000, 0x0C0000),
    Sector::new(0x0C0000, 0x0D0000),
    Sector::new(0x0D0000, 0x0E0000),
    Sector::new(0x0E0000, 0x0F0000),
    Sector::new(0x0F0000, 0x100000),
    Sector::new(0x100000, 0x110000),
    Sector::new(0x110000, 0x120000),
    Sector::new(0x120000, 0x130000),
    Sector::new(0x130000, 0x140000),
    Sector::new(0x140000, 0x150000),
    Sector::new(0x150000, 0x160000),
    Sector::new(0x160000, 0x170000),
    Sector::new(0x170000, 0x180000),
    Sector::new(0x180000, 0x190000),
    Sector::new(0x190000, 0x1A0000),
    Sector::new(0x1A0000, 0x1B0000),
    Sector::new(0x1B0000, 0x1C0000),
    Sector::new(0x1C0000, 0x1D0000),
    Sector::new(0x1D0000, 0x1E0000),
    Sector::new(0x1E0000, 0x1F0000),
    Sector::new(0x1F0000, 0x200000),
];

/// End of the flash address space
pub const FLASH_END: u32 = SECTORS[SECTORS.len() - 1].end;

/// Address not within any sector
#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("address 0x{0:06X} is not within any flash sector")]
pub struct OutOfRange(pub u32);

/// Find the sector containing `address`
pub fn sector_containing(address: u32) -> Result<Sector, OutOfRange> {
    SECTORS
        .iter()
        .find(|s| s.contains(address))
        .copied()
        .ok_or(OutOfRange(address))
}

/// A labelled span of flash in use, `end` exclusive. Regions may overlap.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemoryRegion {
    pub start: u32,
    pub end: u32,
    pub label: String,
}

impl MemoryRegion {
    pub fn new(start: u32, end: u32, label: impl Into<String>) -> Self {
        Self {
            start,
            end,
            label: label.into(),
        }
    }

    pub fn len(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for MemoryRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:06X} - {:06X} {} ({:X} bytes)",
            self.start,
            self.end.wrapping_sub(1),
            self.label,
            self.len()
        )
    }
}

/// Build the list of regions referenced by a boot table, highest start
/// address first. Regions sharing a start address keep discovery order.
pub fn build_memory_map(table: &BootTable) -> Vec<MemoryRegion> {
    let mut regions = vec![
        MemoryRegion::new(
            CONTROL_BLOCK,
            CONTROL_BLOCK + (SLOT_SIZE * NUM_BOOTS) as u32,
            "Boot Table",
        ),
        MemoryRegion::new(MMU_TABLE.0, MMU_TABLE.1, "MMU Default Table"),
    ];

    for (i, entry) in table.entries() {
        for (kind, image) in entry.images().iter() {
            if image.is_empty() {
                continue;
            }
            regions.push(MemoryRegion::new(
                image.start,
                image.end(),
                format!("Boot {} {} Image", i, kind),
            ));
        }
    }

    // Stable, so ties stay in discovery order
    regions.sort_by(|a, b| b.start.cmp(&a.start));
    regions
}

/// Result of checking an erase address against a memory map
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EraseCheck {
    /// Sector that would be erased
    pub sector: Sector,
    /// Regions that would be clobbered, in memory map order
    pub clobbered: Vec<MemoryRegion>,
}

/// Work out which sector an erase of `address` hits and what lives there.
///
/// A region is reported when either end of the sector falls inside it.
pub fn erase_safety(address: u32, map: &[MemoryRegion]) -> Result<EraseCheck, OutOfRange> {
    let sector = sector_containing(address)?;

    let clobbered = map
        .iter()
        .filter(|m| {
            (m.start <= sector.start && sector.start < m.end)
                || (m.start <= sector.end && sector.end < m.end)
        })
        .cloned()
        .collect();

    Ok(EraseCheck { sector, clobbered })
}

impl<P, D, E> Programmer<P, D, E>
where
    P: SerialPort<E>,
    D: DelayMs<u32>,
    E: core::fmt::Debug,
{
    /// Read the boot table and build a memory map from it
    pub fn memory_map(&mut self) -> Result<Vec<MemoryRegion>, Error<E>> {
        let table = self.boot_table()?;
        Ok(build_memory_map(&table))
    }

    /// Check what an erase of `address` would clobber with a freshly read map
    pub fn check_erase(&mut self, address: u32) -> Result<EraseCheck, Error<E>> {
        // Reject bad addresses before reading the table
        sector_containing(address)?;

        let map = self.memory_map()?;
        Ok(erase_safety(address, &map)?)
    }
}
