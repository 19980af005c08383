use std::io::ErrorKind as IoErrorKind;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use linux_embedded_hal::{Delay, Serial};
use serial_core::{
    BaudRate, CharSize, FlowControl, Parity, SerialDevice as _, SerialPortSettings as _, StopBits,
};

use crate::{Options, Programmer};

/// Default board serial baud rate
pub const DEFAULT_BAUD: usize = 115200;

impl Programmer<Serial, Delay, IoErrorKind> {
    /// Open a linux serial port and connect to the board
    pub fn linux<P: AsRef<Path>>(port: P, baud: usize, options: Options) -> anyhow::Result<Self> {
        let path = port.as_ref();

        // Open port
        let mut port = Serial::open(path)
            .with_context(|| format!("opening serial port {}", path.display()))?;

        // Apply settings
        let mut settings = port.0.read_settings()?;

        settings.set_char_size(CharSize::Bits8);
        settings.set_stop_bits(StopBits::Stop1);
        settings.set_baud_rate(BaudRate::from_speed(baud))?;
        settings.set_flow_control(FlowControl::FlowNone);
        settings.set_parity(Parity::ParityNone);

        port.0.write_settings(&settings)?;

        // Non-blocking reads, the programmer paces polling and tracks the
        // response timeout itself
        port.0.set_timeout(Duration::from_millis(0))?;

        debug!("Opened {} at {} baud", path.display(), baud);

        // Handshake with the board
        let p = Self::connect(port, Delay {}, options).context("connecting to board")?;

        Ok(p)
    }
}
