//! Lab board flash loader.
//!
//! Host side of the serial flash loader protocol: a fixed handshake followed by
//! single byte commands, with bulk transfers flow controlled by an
//! acknowledgement every [`ACK_PERIOD`](protocol::ACK_PERIOD) bytes.
//! On top of this sits a decoder for the boot table stored in the control block
//! and an analyzer that works out what an erase would destroy.

use core::convert::TryFrom;
use core::marker::PhantomData;

#[macro_use]
extern crate log;

#[macro_use(block)]
extern crate nb;

extern crate embedded_hal;
use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::serial::{Read, Write};

#[cfg(feature = "structopt")]
extern crate structopt;

#[cfg(feature = "linux")]
extern crate linux_embedded_hal;

#[cfg(feature = "linux")]
pub mod linux;

pub mod boot;
pub mod display;
pub mod memory;
pub mod protocol;
pub mod transfer;
pub mod wire;

pub use boot::{BootEntry, BootFlags, BootTable, Image, ImageKind};
pub use memory::{build_memory_map, erase_safety, EraseCheck, MemoryRegion, Sector};
pub use transfer::{ReadChunks, WriteChunks};

use memory::FLASH_END;
use protocol::{Command, ACK, MAGIC_CHALLENGE, MAGIC_RESPONSE};
use wire::WireInt;

/// Serial port usable by the programmer
pub trait SerialPort<E>: Write<u8, Error = E> + Read<u8, Error = E> {}

impl<T, E> SerialPort<E> for T where T: Write<u8, Error = E> + Read<u8, Error = E> {}

#[derive(Clone, PartialEq, Debug, thiserror::Error)]
pub enum Error<SerialError> {
    #[error("serial error: {0:?}")]
    Serial(SerialError),

    /// The board did not answer the challenge with the expected response
    #[error("board not responding to handshake (received {received:02x?})")]
    HandshakeFailed { received: Vec<u8> },

    /// A single byte response other than the one expected for the command
    #[error("command '{}' expected response 'A', got 0x{received:02x}", ascii(.opcode))]
    UnexpectedResponse { opcode: u8, received: u8 },

    /// The port timed out before the requested number of bytes arrived
    #[error("expected {expected} bytes, got {actual}")]
    ShortRead { expected: usize, actual: usize },

    /// Address not covered by the flash sector table
    #[error("address 0x{0:06X} is not within any flash sector")]
    OutOfRange(u32),

    /// An earlier transfer was abandoned or failed part way, so the board and
    /// host byte streams no longer line up
    #[error("connection desynchronized by an incomplete transfer")]
    Desynchronized,

    /// Transfer length does not fit the 32-bit length field
    #[error("transfer of {0} bytes exceeds the protocol length field")]
    InvalidLength(usize),
}

fn ascii(b: &u8) -> char {
    char::from(*b)
}

impl<SerialError> From<memory::OutOfRange> for Error<SerialError> {
    fn from(e: memory::OutOfRange) -> Self {
        Self::OutOfRange(e.0)
    }
}

#[derive(Clone, PartialEq, Debug)]
#[cfg_attr(feature = "structopt", derive(structopt::StructOpt))]
pub struct Options {
    /// Timeout to wait for each byte of a board response
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "1000"))]
    pub response_timeout_ms: u32,

    /// Period to poll for board responses
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "1"))]
    pub poll_delay_ms: u32,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            response_timeout_ms: 1000,
            poll_delay_ms: 1,
        }
    }
}

/// Manufacturer and part codes reported by the flash device
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct RomId {
    pub manufacturer: u8,
    pub part: u8,
}

/// A connection to the board.
///
/// The protocol is strictly half duplex. Bulk transfers borrow the programmer
/// mutably for as long as their chunk iterator lives, so no other command can
/// be issued until the transfer is dropped. A transfer that is dropped before
/// it is exhausted, or that fails, leaves the board mid-command; every later
/// command is refused with [`Error::Desynchronized`].
pub struct Programmer<P, D, E> {
    options: Options,
    port: P,
    pub(crate) desynced: bool,
    delay: D,
    _err: PhantomData<E>,
}

impl<P, D, E> Programmer<P, D, E>
where
    P: SerialPort<E>,
    D: DelayMs<u32>,
    E: core::fmt::Debug,
{
    /// Connect to the board, failing if it does not complete the handshake
    pub fn connect(port: P, delay: D, options: Options) -> Result<Self, Error<E>> {
        let mut p = Self {
            options,
            port,
            delay,
            desynced: false,
            _err: PhantomData,
        };

        p.handshake()?;

        Ok(p)
    }

    fn handshake(&mut self) -> Result<(), Error<E>> {
        debug!("Sending handshake challenge");
        self.send(&MAGIC_CHALLENGE)?;

        debug!("Awaiting handshake response");
        let mut received = Vec::with_capacity(MAGIC_RESPONSE.len());
        while received.len() < MAGIC_RESPONSE.len() {
            match self.recv_byte()? {
                Some(b) => received.push(b),
                None => break,
            }
        }

        if received != MAGIC_RESPONSE {
            error!("Board not responding (received {:02x?})", received);
            return Err(Error::HandshakeFailed { received });
        }

        debug!("Board connected");
        Ok(())
    }

    /// Check the board is alive
    pub fn ping(&mut self) -> Result<(), Error<E>> {
        self.command(Command::Ping, &[])?;
        self.expect_ack(Command::Ping)
    }

    /// Fetch the flash manufacturer and part codes
    pub fn identify(&mut self) -> Result<RomId, Error<E>> {
        self.command(Command::Identify, &[])?;

        let id = self.recv_exact(2)?;
        Ok(RomId {
            manufacturer: id[0],
            part: id[1],
        })
    }

    /// Erase the flash sector containing `address`
    pub fn erase(&mut self, address: u32) -> Result<(), Error<E>> {
        let mut args = Vec::with_capacity(4);
        address.write_le(&mut args);

        self.command(Command::Erase, &args)?;
        self.expect_ack(Command::Erase)
    }

    /// Start reading `length` bytes from `address`, returning an iterator over
    /// acknowledged chunks. Dropping it early desynchronizes the connection.
    pub fn read_chunks(
        &mut self,
        address: u32,
        length: u32,
    ) -> Result<ReadChunks<'_, P, D, E>, Error<E>> {
        let mut args = Vec::with_capacity(8);
        address.write_le(&mut args);
        length.write_le(&mut args);

        self.command(Command::Read, &args)?;

        Ok(ReadChunks::new(self, length))
    }

    /// Read `length` bytes from `address`
    pub fn read(&mut self, address: u32, length: u32) -> Result<Vec<u8>, Error<E>> {
        let mut data = Vec::with_capacity(length.min(FLASH_END) as usize);
        for chunk in self.read_chunks(address, length)? {
            data.extend_from_slice(&chunk?);
        }
        Ok(data)
    }

    /// Start writing `data` at `address`, returning an iterator over the length
    /// of each chunk sent. Dropping it early desynchronizes the connection.
    pub fn write_chunks<'d>(
        &mut self,
        address: u32,
        data: &'d [u8],
    ) -> Result<WriteChunks<'_, 'd, P, D, E>, Error<E>> {
        let length = u32::try_from(data.len()).map_err(|_| Error::InvalidLength(data.len()))?;

        let mut args = Vec::with_capacity(8);
        address.write_le(&mut args);
        length.write_le(&mut args);

        self.command(Command::Write, &args)?;

        Ok(WriteChunks::new(self, data))
    }

    /// Write `data` at `address`
    pub fn write(&mut self, address: u32, data: &[u8]) -> Result<(), Error<E>> {
        for chunk in self.write_chunks(address, data)? {
            chunk?;
        }
        Ok(())
    }

    /// Whether commands can still be issued
    pub fn is_synchronized(&self) -> bool {
        !self.desynced
    }

    /// Release the underlying serial port
    pub fn close(self) -> P {
        self.port
    }

    fn command(&mut self, command: Command, args: &[u8]) -> Result<(), Error<E>> {
        if self.desynced {
            warn!("Refusing {:?}, connection is desynchronized", command);
            return Err(Error::Desynchronized);
        }

        debug!("Sending command {:?} args: {:02x?}", command, args);

        self.send(&[command.opcode()])?;
        self.send(args)
    }

    pub(crate) fn send(&mut self, data: &[u8]) -> Result<(), Error<E>> {
        for b in data {
            block!(self.port.write(*b)).map_err(Error::Serial)?;
        }
        block!(self.port.flush()).map_err(Error::Serial)
    }

    pub(crate) fn send_ack(&mut self) -> Result<(), Error<E>> {
        trace!("Sending ack");
        self.send(&[ACK])
    }

    /// Read one response byte and require it to be an ack
    pub(crate) fn expect_ack(&mut self, command: Command) -> Result<(), Error<E>> {
        let v = self.recv_exact(1)?[0];
        if v != ACK {
            warn!("Received unexpected response to {:?}: 0x{:02x}", command, v);
            return Err(Error::UnexpectedResponse {
                opcode: command.opcode(),
                received: v,
            });
        }

        trace!("Received ack");
        Ok(())
    }

    /// Read exactly `length` bytes, failing if the port times out first
    pub(crate) fn recv_exact(&mut self, length: usize) -> Result<Vec<u8>, Error<E>> {
        let mut data = Vec::with_capacity(length);

        while data.len() < length {
            match self.recv_byte()? {
                Some(b) => data.push(b),
                None => {
                    error!("Receive timeout ({} of {} bytes)", data.len(), length);
                    return Err(Error::ShortRead {
                        expected: length,
                        actual: data.len(),
                    });
                }
            }
        }

        Ok(data)
    }

    /// Poll for a single byte, returning `None` on timeout
    fn recv_byte(&mut self) -> Result<Option<u8>, Error<E>> {
        let mut t: u32 = 0;

        loop {
            match self.port.read() {
                Err(nb::Error::WouldBlock) => (),
                Err(nb::Error::Other(e)) => return Err(Error::Serial(e)),
                Ok(v) => return Ok(Some(v)),
            };

            if t > self.options.response_timeout_ms {
                return Ok(None);
            }

            // Wait for delay period
            self.delay.delay_ms(self.options.poll_delay_ms);
            t = t.saturating_add(self.options.poll_delay_ms.max(1));
        }
    }
}
