//! Boot table codec.
//!
//! The control block holds [`NUM_BOOTS`] fixed size slots, each describing one
//! bootable configuration. A slot is only in use when it starts with
//! [`BOOT_MAGIC`]; anything else decodes to `None`.
//!
//! Slot layout (all words little endian):
//!
//! | Offset | Field             |
//! |--------|-------------------|
//! | 0x00   | magic `CODE`      |
//! | 0x04   | flags             |
//! | 0x08   | RAM image start   |
//! | 0x0C   | RAM image length  |
//! | 0x10   | ROM image start   |
//! | 0x14   | ROM image length  |
//! | 0x18   | ROM exec offset   |
//! | 0x1C   | ROM exec CPSR     |
//! | 0x20   | Spartan start     |
//! | 0x24   | Spartan length    |
//! | 0x28   | Virtex start      |
//! | 0x2C   | Virtex length     |
//! | 0x30   | LCD message, NUL, tail, `0xFF` padding |

use core::fmt;

use bitflags::bitflags;
use embedded_hal::blocking::delay::DelayMs;

use crate::wire::WireInt;
use crate::{Error, Programmer, SerialPort};

/// Address of the start of the control block
pub const CONTROL_BLOCK: u32 = 0x4000;

/// Number of boot table entries
pub const NUM_BOOTS: usize = 16;

pub const SLOT_SIZE: usize = 0x100;

pub const BOOT_MAGIC: &[u8; 4] = b"CODE";

const MESSAGE_OFFSET: usize = 0x30;

/// Bytes available for the message, its terminator and the tail
pub const MESSAGE_CAPACITY: usize = SLOT_SIZE - MESSAGE_OFFSET;

const PADDING: u8 = 0xFF;

bitflags! {
    /// Boot options, unnamed bits are retained
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
    pub struct BootFlags: u32 {
        const PRINT_LCD_MESSAGE = 1 << 0;
        const LCD_BACKLIGHT = 1 << 1;
        const LEDS_ENABLED = 1 << 2;
        const START_IN_RAM = 1 << 3;
        const CHECKSUM_ROM = 1 << 4;
        const ZERO_INTERNAL_RAM = 1 << 8;
        const ZERO_EXTERNAL_RAM = 1 << 9;
        const DISABLE_RESET_BUTTON = 1 << 16;
        const KEEP_WATCHDOG = 1 << 17;
        const INSTRUCTION_CACHE = 1 << 18;
        const DATA_CACHE = 1 << 19;
    }
}

/// Display labels for each named flag, lowest bit first
pub const BOOT_FLAG_LABELS: &[(BootFlags, &str)] = &[
    (BootFlags::PRINT_LCD_MESSAGE, "Print LCD Message"),
    (BootFlags::LCD_BACKLIGHT, "LCD Backlight Enabled"),
    (BootFlags::LEDS_ENABLED, "LEDs Enabled"),
    (BootFlags::START_IN_RAM, "Start in RAM"),
    (BootFlags::CHECKSUM_ROM, "Checksum ROM"),
    (BootFlags::ZERO_INTERNAL_RAM, "Zero Internal RAM"),
    (BootFlags::ZERO_EXTERNAL_RAM, "Zero External RAM"),
    (BootFlags::DISABLE_RESET_BUTTON, "Disable Reset Button"),
    (BootFlags::KEEP_WATCHDOG, "Do-not Disable Watchdog"),
    (BootFlags::INSTRUCTION_CACHE, "Enable Instruction Cache"),
    (BootFlags::DATA_CACHE, "Enable Data Cache"),
];

impl BootFlags {
    /// Labels of the named flags that are set, lowest bit first
    pub fn labels(&self) -> impl Iterator<Item = (BootFlags, &'static str)> + '_ {
        BOOT_FLAG_LABELS
            .iter()
            .filter(move |(f, _)| self.contains(*f))
            .copied()
    }
}

/// An image referenced by a boot entry
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct Image {
    pub start: u32,
    pub length: u32,
}

impl Image {
    pub fn new(start: u32, length: u32) -> Self {
        Self { start, length }
    }

    /// Exclusive end address, saturating at the top of the address space
    pub fn end(&self) -> u32 {
        self.start.saturating_add(self.length)
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ImageKind {
    Ram,
    Rom,
    /// Spartan FPGA bitstream
    Spartan,
    /// Virtex FPGA bitstream
    Virtex,
}

impl fmt::Display for ImageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ImageKind::Ram => "RAM",
            ImageKind::Rom => "ROM",
            ImageKind::Spartan => "Spartan",
            ImageKind::Virtex => "Virtex",
        };
        f.write_str(s)
    }
}

/// A valid boot table slot
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct BootEntry {
    pub flags: BootFlags,
    pub ram_image: Image,
    pub rom_image: Image,
    pub rom_exec_offset: u32,
    pub rom_exec_cpsr: u32,
    pub spartan_image: Image,
    pub virtex_image: Image,
    pub lcd_message: Vec<u8>,
    /// Bytes following the message terminator, less trailing padding
    pub tail: Vec<u8>,
}

/// Message and tail do not fit in a slot
#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("slot message needs {needed} bytes, {} available", MESSAGE_CAPACITY)]
pub struct SlotOverflow {
    pub needed: usize,
}

impl BootEntry {
    /// Decode a slot, returning `None` if it is not in use
    pub fn decode(slot: &[u8]) -> Option<Self> {
        if slot.get(..BOOT_MAGIC.len())? != BOOT_MAGIC {
            return None;
        }

        let fields = &slot[BOOT_MAGIC.len()..];
        let (flags, fields) = u32::read_le(fields)?;
        let (ram_image, fields) = read_image(fields)?;
        let (rom_image, fields) = read_image(fields)?;
        let (rom_exec_offset, fields) = u32::read_le(fields)?;
        let (rom_exec_cpsr, fields) = u32::read_le(fields)?;
        let (spartan_image, fields) = read_image(fields)?;
        let (virtex_image, _) = read_image(fields)?;

        let message = &slot[MESSAGE_OFFSET..slot.len().min(SLOT_SIZE)];
        let used = message
            .iter()
            .rposition(|b| *b != PADDING)
            .map_or(0, |i| i + 1);
        let message = &message[..used];

        let (lcd_message, tail) = match message.iter().position(|b| *b == 0) {
            Some(i) => (&message[..i], &message[i + 1..]),
            None => (message, &[][..]),
        };

        Some(Self {
            flags: BootFlags::from_bits_retain(flags),
            ram_image,
            rom_image,
            rom_exec_offset,
            rom_exec_cpsr,
            spartan_image,
            virtex_image,
            lcd_message: lcd_message.to_vec(),
            tail: tail.to_vec(),
        })
    }

    /// Encode into a slot, padding with `0xFF`
    pub fn encode(&self) -> Result<[u8; SLOT_SIZE], SlotOverflow> {
        let needed = self.lcd_message.len() + 1 + self.tail.len();
        if needed > MESSAGE_CAPACITY {
            return Err(SlotOverflow { needed });
        }

        let mut out = Vec::with_capacity(SLOT_SIZE);
        out.extend_from_slice(BOOT_MAGIC);
        self.flags.bits().write_le(&mut out);
        for field in &[
            self.ram_image.start,
            self.ram_image.length,
            self.rom_image.start,
            self.rom_image.length,
            self.rom_exec_offset,
            self.rom_exec_cpsr,
            self.spartan_image.start,
            self.spartan_image.length,
            self.virtex_image.start,
            self.virtex_image.length,
        ] {
            field.write_le(&mut out);
        }
        out.extend_from_slice(&self.lcd_message);
        out.push(0);
        out.extend_from_slice(&self.tail);

        let mut slot = [PADDING; SLOT_SIZE];
        slot[..out.len()].copy_from_slice(&out);
        Ok(slot)
    }

    /// Images in slot order, including empty ones
    pub fn images(&self) -> [(ImageKind, Image); 4] {
        [
            (ImageKind::Ram, self.ram_image),
            (ImageKind::Rom, self.rom_image),
            (ImageKind::Spartan, self.spartan_image),
            (ImageKind::Virtex, self.virtex_image),
        ]
    }
}

fn read_image(fields: &[u8]) -> Option<(Image, &[u8])> {
    let (start, fields) = u32::read_le(fields)?;
    let (length, fields) = u32::read_le(fields)?;
    Some((Image { start, length }, fields))
}

/// Address of a boot table slot
pub fn slot_address(index: usize) -> u32 {
    CONTROL_BLOCK + (index * SLOT_SIZE) as u32
}

/// Decoded contents of the control block
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct BootTable {
    slots: Vec<Option<BootEntry>>,
}

impl BootTable {
    pub fn from_slots(slots: Vec<Option<BootEntry>>) -> Self {
        Self { slots }
    }

    /// Decode a raw control block image, one slot per `SLOT_SIZE` bytes
    pub fn decode(control_block: &[u8]) -> Self {
        let slots = control_block
            .chunks(SLOT_SIZE)
            .take(NUM_BOOTS)
            .map(BootEntry::decode)
            .collect();
        Self { slots }
    }

    pub fn slots(&self) -> &[Option<BootEntry>] {
        &self.slots
    }

    /// Valid entries with their slot index
    pub fn entries(&self) -> impl Iterator<Item = (usize, &BootEntry)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|e| (i, e)))
    }
}

impl<P, D, E> Programmer<P, D, E>
where
    P: SerialPort<E>,
    D: DelayMs<u32>,
    E: core::fmt::Debug,
{
    /// Read and decode the boot table, one slot per transfer
    pub fn boot_table(&mut self) -> Result<BootTable, Error<E>> {
        let mut slots = Vec::with_capacity(NUM_BOOTS);

        for i in 0..NUM_BOOTS {
            let data = self.read(slot_address(i), SLOT_SIZE as u32)?;
            let entry = BootEntry::decode(&data);
            debug!("Boot slot {}: {}", i, if entry.is_some() { "valid" } else { "empty" });
            slots.push(entry);
        }

        Ok(BootTable { slots })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> BootEntry {
        BootEntry {
            flags: BootFlags::PRINT_LCD_MESSAGE | BootFlags::DATA_CACHE,
            ram_image: Image::new(0x0000_0000, 0x1000),
            rom_image: Image::new(0x0001_0000, 0x2_0000),
            rom_exec_offset: 0x40,
            rom_exec_cpsr: 0x0000_00D3,
            spartan_image: Image::default(),
            virtex_image: Image::new(0x0010_0000, 0x8_0000),
            lcd_message: b"Hello lab".to_vec(),
            tail: vec![0x01, 0x02],
        }
    }

    #[test]
    fn decode_layout() {
        let mut slot = [0xFFu8; SLOT_SIZE];
        slot[..4].copy_from_slice(b"CODE");
        slot[0x04..0x08].copy_from_slice(&[0x01, 0x00, 0x08, 0x00]);
        slot[0x10..0x14].copy_from_slice(&[0x00, 0x00, 0x01, 0x00]);
        slot[0x14..0x18].copy_from_slice(&[0x00, 0x00, 0x02, 0x00]);
        slot[0x18..0x1C].copy_from_slice(&[0x40, 0x00, 0x00, 0x00]);
        slot[0x1C..0x20].copy_from_slice(&[0xD3, 0x00, 0x00, 0x00]);
        for b in &mut slot[0x08..0x10] {
            *b = 0;
        }
        for b in &mut slot[0x20..0x30] {
            *b = 0;
        }
        slot[0x30..0x34].copy_from_slice(b"hi\0x");

        let e = BootEntry::decode(&slot).unwrap();
        assert_eq!(e.flags, BootFlags::PRINT_LCD_MESSAGE | BootFlags::DATA_CACHE);
        assert_eq!(e.ram_image, Image::new(0, 0));
        assert_eq!(e.rom_image, Image::new(0x1_0000, 0x2_0000));
        assert_eq!(e.rom_exec_offset, 0x40);
        assert_eq!(e.rom_exec_cpsr, 0xD3);
        assert!(e.spartan_image.is_empty());
        assert!(e.virtex_image.is_empty());
        assert_eq!(e.lcd_message, b"hi");
        assert_eq!(e.tail, b"x");
    }

    #[test]
    fn bad_magic_is_absent() {
        let mut slot = entry().encode().unwrap();
        slot[3] = b'X';
        assert_eq!(BootEntry::decode(&slot), None);

        assert_eq!(BootEntry::decode(&[0xFF; SLOT_SIZE]), None);
        assert_eq!(BootEntry::decode(&[0x00; SLOT_SIZE]), None);
    }

    #[test]
    fn encode_then_decode() {
        let e = entry();
        let slot = e.encode().unwrap();
        assert_eq!(&slot[..4], b"CODE");
        assert_eq!(slot[SLOT_SIZE - 1], 0xFF);
        assert_eq!(BootEntry::decode(&slot), Some(e));
    }

    #[test]
    fn message_without_terminator() {
        let mut slot = [0xFFu8; SLOT_SIZE];
        slot[..MESSAGE_OFFSET].copy_from_slice(&entry().encode().unwrap()[..MESSAGE_OFFSET]);
        slot[MESSAGE_OFFSET..MESSAGE_OFFSET + 3].copy_from_slice(b"abc");

        let e = BootEntry::decode(&slot).unwrap();
        assert_eq!(e.lcd_message, b"abc");
        assert!(e.tail.is_empty());
    }

    #[test]
    fn tail_keeps_inner_padding() {
        let mut e = entry();
        e.tail = vec![0xFF, 0x10];
        let d = BootEntry::decode(&e.encode().unwrap()).unwrap();
        assert_eq!(d.tail, vec![0xFF, 0x10]);
    }

    #[test]
    fn oversized_message() {
        let mut e = entry();
        e.lcd_message = vec![b'x'; MESSAGE_CAPACITY];
        e.tail.clear();
        assert_eq!(
            e.encode(),
            Err(SlotOverflow {
                needed: MESSAGE_CAPACITY + 1
            })
        );

        e.lcd_message.pop();
        assert!(e.encode().is_ok());
    }

    #[test]
    fn unknown_flags_retained() {
        let mut e = entry();
        e.flags = BootFlags::from_bits_retain(0x8000_0001);
        let d = BootEntry::decode(&e.encode().unwrap()).unwrap();
        assert_eq!(d.flags.bits(), 0x8000_0001);
        let labels: Vec<_> = d.flags.labels().map(|(_, l)| l).collect();
        assert_eq!(labels, vec!["Print LCD Message"]);
    }

    #[test]
    fn table_from_control_block() {
        let mut block = vec![0xFFu8; SLOT_SIZE * NUM_BOOTS];
        block[SLOT_SIZE * 3..SLOT_SIZE * 4].copy_from_slice(&entry().encode().unwrap());

        let table = BootTable::decode(&block);
        assert_eq!(table.slots().len(), NUM_BOOTS);

        let entries: Vec<_> = table.entries().map(|(i, _)| i).collect();
        assert_eq!(entries, vec![3]);
    }

    #[test]
    fn slot_addresses() {
        assert_eq!(slot_address(0), 0x4000);
        assert_eq!(slot_address(1), 0x4100);
        assert_eq!(slot_address(NUM_BOOTS - 1), 0x4F00);
    }
}
