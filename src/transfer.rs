//! Ack-chunked bulk transfers.
//!
//! Both directions move data in windows of [`ACK_PERIOD`] bytes. On read the
//! board waits for the host to ack each window before sending the next, on
//! write the host waits for the board. The iterators here step through one
//! window per call so callers can report progress, and stop after the first
//! error. A transfer that fails or is dropped before it is exhausted marks the
//! programmer desynchronized.

use core::cmp::min;
use core::iter::FusedIterator;

use embedded_hal::blocking::delay::DelayMs;

use crate::protocol::{Command, ACK_PERIOD};
use crate::{Error, Programmer, SerialPort};

/// Chunks of an in-progress read, each at most `ACK_PERIOD` bytes
pub struct ReadChunks<'a, P, D, E> {
    programmer: &'a mut Programmer<P, D, E>,
    remaining: u32,
    failed: bool,
}

impl<'a, P, D, E> ReadChunks<'a, P, D, E> {
    pub(crate) fn new(programmer: &'a mut Programmer<P, D, E>, length: u32) -> Self {
        Self {
            programmer,
            remaining: length,
            failed: false,
        }
    }

    /// Bytes still to be received
    pub fn remaining(&self) -> u32 {
        self.remaining
    }
}

impl<'a, P, D, E> Iterator for ReadChunks<'a, P, D, E>
where
    P: SerialPort<E>,
    D: DelayMs<u32>,
    E: core::fmt::Debug,
{
    type Item = Result<Vec<u8>, Error<E>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.remaining == 0 {
            return None;
        }

        let n = min(ACK_PERIOD, self.remaining as usize);

        // Ack before yielding, the board sends nothing more until it arrives
        let res = self
            .programmer
            .recv_exact(n)
            .and_then(|chunk| self.programmer.send_ack().map(|_| chunk));

        match res {
            Ok(chunk) => {
                self.remaining -= n as u32;
                Some(Ok(chunk))
            }
            Err(e) => {
                self.failed = true;
                self.programmer.desynced = true;
                Some(Err(e))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.failed {
            return (0, Some(0));
        }
        let n = (self.remaining as usize + ACK_PERIOD - 1) / ACK_PERIOD;
        (0, Some(n))
    }
}

impl<'a, P, D, E> FusedIterator for ReadChunks<'a, P, D, E>
where
    P: SerialPort<E>,
    D: DelayMs<u32>,
    E: core::fmt::Debug,
{
}

impl<'a, P, D, E> Drop for ReadChunks<'a, P, D, E> {
    fn drop(&mut self) {
        if !self.failed && self.remaining != 0 {
            warn!("Read dropped with {} bytes outstanding", self.remaining);
            self.programmer.desynced = true;
        }
    }
}

/// Lengths of the chunks sent by an in-progress write.
///
/// The ack for each chunk is awaited on the following call, so the iterator
/// must be driven until it returns `None` for the final ack to be consumed.
pub struct WriteChunks<'a, 'd, P, D, E> {
    programmer: &'a mut Programmer<P, D, E>,
    data: &'d [u8],
    ack_pending: bool,
    failed: bool,
}

impl<'a, 'd, P, D, E> WriteChunks<'a, 'd, P, D, E> {
    pub(crate) fn new(programmer: &'a mut Programmer<P, D, E>, data: &'d [u8]) -> Self {
        Self {
            programmer,
            data,
            ack_pending: false,
            failed: false,
        }
    }

    /// Bytes not yet sent
    pub fn remaining(&self) -> usize {
        self.data.len()
    }
}

impl<'a, 'd, P, D, E> Iterator for WriteChunks<'a, 'd, P, D, E>
where
    P: SerialPort<E>,
    D: DelayMs<u32>,
    E: core::fmt::Debug,
{
    type Item = Result<usize, Error<E>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        if self.ack_pending {
            self.ack_pending = false;
            if let Err(e) = self.programmer.expect_ack(Command::Write) {
                self.failed = true;
                self.programmer.desynced = true;
                return Some(Err(e));
            }
        }

        if self.data.is_empty() {
            return None;
        }

        let (chunk, rest) = self.data.split_at(min(ACK_PERIOD, self.data.len()));
        if let Err(e) = self.programmer.send(chunk) {
            self.failed = true;
            self.programmer.desynced = true;
            return Some(Err(e));
        }

        self.data = rest;
        self.ack_pending = true;

        Some(Ok(chunk.len()))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.failed {
            return (0, Some(0));
        }
        let n = (self.data.len() + ACK_PERIOD - 1) / ACK_PERIOD;
        (0, Some(n.max(self.ack_pending as usize)))
    }
}

impl<'a, 'd, P, D, E> FusedIterator for WriteChunks<'a, 'd, P, D, E>
where
    P: SerialPort<E>,
    D: DelayMs<u32>,
    E: core::fmt::Debug,
{
}

impl<'a, 'd, P, D, E> Drop for WriteChunks<'a, 'd, P, D, E> {
    fn drop(&mut self) {
        if !self.failed && (!self.data.is_empty() || self.ack_pending) {
            warn!("Write dropped with {} bytes outstanding", self.data.len());
            self.programmer.desynced = true;
        }
    }
}
