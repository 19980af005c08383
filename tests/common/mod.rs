//! Simulated lab board speaking the device side of the loader protocol

#![allow(dead_code)]

use std::cell::Cell;
use std::collections::VecDeque;
use std::convert::Infallible;
use std::rc::Rc;

use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::serial;

use lab_flash::memory::{sector_containing, FLASH_END};
use lab_flash::protocol::{ACK, ACK_PERIOD, MAGIC_CHALLENGE, MAGIC_RESPONSE};
use lab_flash::{Options, Programmer};

pub type SimProgrammer = Programmer<SimBoard, NoDelay, Infallible>;

pub struct NoDelay;

impl DelayMs<u32> for NoDelay {
    fn delay_ms(&mut self, _ms: u32) {}
}

/// Delay that only adds up the time it was asked to sleep
#[derive(Clone, Default)]
pub struct CountingDelay(pub Rc<Cell<u32>>);

impl CountingDelay {
    pub fn total_ms(&self) -> u32 {
        self.0.get()
    }
}

impl DelayMs<u32> for CountingDelay {
    fn delay_ms(&mut self, ms: u32) {
        self.0.set(self.0.get() + ms);
    }
}

#[derive(Debug)]
enum State {
    Challenge(Vec<u8>),
    Idle,
    Args { opcode: u8, args: Vec<u8> },
    /// A chunk has been sent and the board is waiting for the host ack
    Sending { next: usize, remaining: usize },
    Receiving { next: usize, remaining: usize, since_ack: usize },
}

pub struct SimBoard {
    pub flash: Vec<u8>,
    pub rom_id: Vec<u8>,
    /// Reply to the challenge
    pub handshake_reply: Vec<u8>,
    /// Reply to ping and erase, and the write ack
    pub reply: u8,
    /// Stop streaming read data after this many bytes
    pub stall_after: Option<usize>,

    /// Every byte the host sent
    pub from_host: Vec<u8>,
    /// Read acks received from the host
    pub host_acks: usize,
    /// Write acks sent to the host
    pub board_acks: usize,
    pub erased: Vec<u32>,
    /// Protocol violations seen by the board
    pub errors: Vec<String>,

    streamed: usize,
    to_host: VecDeque<u8>,
    state: State,
}

impl Default for SimBoard {
    fn default() -> Self {
        Self {
            flash: vec![0xFF; FLASH_END as usize],
            rom_id: vec![0x01, 0x02],
            handshake_reply: MAGIC_RESPONSE.to_vec(),
            reply: ACK,
            stall_after: None,
            from_host: vec![],
            host_acks: 0,
            board_acks: 0,
            erased: vec![],
            errors: vec![],
            streamed: 0,
            to_host: VecDeque::new(),
            state: State::Challenge(vec![]),
        }
    }
}

impl SimBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handshake with default options
    pub fn connect(self) -> SimProgrammer {
        Programmer::connect(self, NoDelay, options()).expect("handshake")
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.state, State::Idle) && self.to_host.is_empty()
    }

    fn push(&mut self, data: &[u8]) {
        self.to_host.extend(data.iter().copied());
    }

    fn send_chunk(&mut self, next: usize, remaining: usize) -> State {
        let mut n = remaining.min(ACK_PERIOD);
        if let Some(limit) = self.stall_after {
            n = n.min(limit.saturating_sub(self.streamed));
        }

        let chunk = self.flash[next..next + n].to_vec();
        self.push(&chunk);
        self.streamed += n;

        State::Sending {
            next: next + n,
            remaining: remaining - n,
        }
    }

    fn run_command(&mut self, opcode: u8, args: &[u8]) -> State {
        let word = |i: usize| {
            let mut b = [0u8; 4];
            b.copy_from_slice(&args[i..i + 4]);
            u32::from_le_bytes(b) as usize
        };

        match opcode {
            b'E' => {
                let address = word(0) as u32;
                if let Ok(s) = sector_containing(address) {
                    for b in &mut self.flash[s.start as usize..s.end as usize] {
                        *b = 0xFF;
                    }
                }
                self.erased.push(address);
                self.push(&[self.reply]);
                State::Idle
            }
            b'R' => {
                let (next, remaining) = (word(0), word(4));
                if remaining == 0 {
                    State::Idle
                } else {
                    self.send_chunk(next, remaining)
                }
            }
            b'W' => {
                let (next, remaining) = (word(0), word(4));
                if remaining == 0 {
                    State::Idle
                } else {
                    State::Receiving {
                        next,
                        remaining,
                        since_ack: 0,
                    }
                }
            }
            _ => unreachable!(),
        }
    }

    fn receive(&mut self, b: u8) {
        self.from_host.push(b);

        let state = std::mem::replace(&mut self.state, State::Idle);
        self.state = match state {
            State::Challenge(mut c) => {
                c.push(b);
                if c.len() < MAGIC_CHALLENGE.len() {
                    State::Challenge(c)
                } else {
                    if c != MAGIC_CHALLENGE {
                        self.errors.push(format!("bad challenge {:02x?}", c));
                    }
                    let reply = self.handshake_reply.clone();
                    self.push(&reply);
                    State::Idle
                }
            }
            State::Idle => match b {
                b'P' => {
                    self.push(&[self.reply]);
                    State::Idle
                }
                b'I' => {
                    let id = self.rom_id.clone();
                    self.push(&id);
                    State::Idle
                }
                b'E' | b'R' | b'W' => State::Args {
                    opcode: b,
                    args: vec![],
                },
                _ => {
                    self.errors.push(format!("unknown opcode 0x{:02x}", b));
                    State::Idle
                }
            },
            State::Args { opcode, mut args } => {
                args.push(b);
                let need = if opcode == b'E' { 4 } else { 8 };
                if args.len() < need {
                    State::Args { opcode, args }
                } else {
                    self.run_command(opcode, &args)
                }
            }
            State::Sending { next, remaining } => {
                if b != ACK {
                    self.errors.push(format!("expected read ack, got 0x{:02x}", b));
                }
                if !self.to_host.is_empty() {
                    self.errors.push("ack before chunk was drained".to_string());
                }
                self.host_acks += 1;
                if remaining == 0 {
                    State::Idle
                } else {
                    self.send_chunk(next, remaining)
                }
            }
            State::Receiving {
                next,
                remaining,
                since_ack,
            } => {
                if !self.to_host.is_empty() {
                    self.errors.push("data sent before ack was read".to_string());
                }
                self.flash[next] = b;
                let (remaining, since_ack) = (remaining - 1, since_ack + 1);
                if since_ack == ACK_PERIOD || remaining == 0 {
                    self.push(&[self.reply]);
                    self.board_acks += 1;
                }
                if remaining == 0 {
                    State::Idle
                } else {
                    State::Receiving {
                        next: next + 1,
                        remaining,
                        since_ack: since_ack % ACK_PERIOD,
                    }
                }
            }
        };
    }
}

impl serial::Read<u8> for SimBoard {
    type Error = Infallible;

    fn read(&mut self) -> nb::Result<u8, Infallible> {
        self.to_host.pop_front().ok_or(nb::Error::WouldBlock)
    }
}

impl serial::Write<u8> for SimBoard {
    type Error = Infallible;

    fn write(&mut self, word: u8) -> nb::Result<(), Infallible> {
        self.receive(word);
        Ok(())
    }

    fn flush(&mut self) -> nb::Result<(), Infallible> {
        Ok(())
    }
}

pub fn options() -> Options {
    Options {
        response_timeout_ms: 5,
        poll_delay_ms: 1,
    }
}
