//! Loader wire protocol constants

/// Sent by the host on connection
pub const MAGIC_CHALLENGE: [u8; 4] = [0xFE, 0xA5, 0x1B, 0x1E];

/// Returned by the board in reply to the challenge
pub const MAGIC_RESPONSE: [u8; 4] = [0xFE, 0xE1, 0x90, 0x0D];

pub const ACK: u8 = b'A';

/// Number of bytes transferred before an ack
pub const ACK_PERIOD: usize = 16;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Check the board is responding, answered with an ack
    Ping = b'P' as isize,

    /// Gets the flash manufacturer and part codes
    Identify = b'I' as isize,

    /// Erases the flash sector containing a 32-bit address.
    Erase = b'E' as isize,

    /// Reads a 32-bit length of flash from a 32-bit address, acked by the host
    /// every `ACK_PERIOD` bytes.
    Read = b'R' as isize,

    /// Writes a 32-bit length of flash at a 32-bit address, acked by the board
    /// every `ACK_PERIOD` bytes.
    Write = b'W' as isize,
}

impl Command {
    pub fn opcode(self) -> u8 {
        self as u8
    }
}
