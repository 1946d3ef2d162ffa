//! Blocking serial transport for protocol frames.
//!
//! Owns the physical port and a [`FrameDecoder`]. Reads block for at most
//! [`READ_TIMEOUT`]; running out of bytes mid-frame surfaces
//! [`NodeError::Timeout`], which the reader loop treats as "keep reading",
//! never as a protocol failure.

use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use serialport::{DataBits, Parity, SerialPort, StopBits};
use wslora_radio_protocol::{encode_frame, Frame, FrameDecoder, DEFAULT_BAUD_RATE};

use crate::error::{NodeError, Result};

/// Bounded blocking read timeout on the serial port.
pub const READ_TIMEOUT: Duration = Duration::from_secs(1);

/// The receive half of the serial link. Owns the frame decoder.
pub struct SerialLink {
    port: Box<dyn SerialPort>,
    decoder: FrameDecoder,
}

/// The transmit half of the serial link (a cloned port handle).
pub struct SerialWriter {
    port: Box<dyn SerialPort>,
}

impl SerialLink {
    /// Open the dongle's serial port at 115200 8N1.
    pub fn open(port_name: &str) -> Result<Self> {
        let port = serialport::new(port_name, DEFAULT_BAUD_RATE)
            .data_bits(DataBits::Eight)
            .stop_bits(StopBits::One)
            .parity(Parity::None)
            .timeout(READ_TIMEOUT)
            .open()?;

        Ok(SerialLink {
            port,
            decoder: FrameDecoder::new(),
        })
    }

    /// Clone a writer handle onto the same port.
    pub fn writer(&self) -> Result<SerialWriter> {
        Ok(SerialWriter {
            port: self.port.try_clone()?,
        })
    }

    /// Receive the next complete frame.
    ///
    /// Returns [`NodeError::Timeout`] when no complete frame arrived
    /// within the read timeout (partial input stays buffered),
    /// [`NodeError::Protocol`] on a malformed frame, and an I/O error when
    /// the port is gone.
    pub fn recv_frame(&mut self) -> Result<Frame> {
        let mut buf = [0u8; 256];
        loop {
            if let Some(frame) = self.decoder.decode()? {
                return Ok(frame);
            }

            match self.port.read(&mut buf) {
                Ok(0) => return Err(NodeError::Timeout),
                Ok(n) => self.decoder.push(&buf[..n]),
                Err(e) if e.kind() == ErrorKind::TimedOut => return Err(NodeError::Timeout),
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl SerialWriter {
    /// Serialize and write one frame.
    pub fn send_frame(&mut self, frame: &Frame) -> Result<()> {
        let wire = encode_frame(frame)?;
        self.port.write_all(&wire)?;
        Ok(())
    }
}
