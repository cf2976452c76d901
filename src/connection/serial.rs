//! Serial line transport

use std::{
    io::{Read, Write},
    time::Duration,
};

use log::{debug, info};
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};

#[cfg(unix)]
use super::lock::PortLock;
use super::{adjust_bitrate, Transport, BOOT_MODE_INQUIRY, RECEIVE_TIMEOUT};
use crate::error::{ConnectionError, Error, TimedOutCommand};

/// Bitrate every boot ROM starts out with
pub const INITIAL_BAUD: u32 = 9600;
/// Bitrates the host side can switch to
pub const SUPPORTED_BAUDS: [u32; 5] = [9600, 19200, 38400, 57600, 115200];

/// How long to wait for the echo of one adjustment burst
const BURST_REPLY_TIMEOUT: Duration = Duration::from_secs(1);

/// Transport over a locked serial device
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    #[cfg(unix)]
    _lock: PortLock,
}

impl SerialTransport {
    /// Lock and open `path` at the initial bitrate, 8N1 without flow control
    pub fn open(path: &str) -> Result<Self, Error> {
        #[cfg(unix)]
        let lock = PortLock::acquire(path)?;

        let port = serialport::new(path, INITIAL_BAUD)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(RECEIVE_TIMEOUT)
            .open()?;
        debug!("Opened serial port {}", path);

        Ok(SerialTransport {
            port,
            #[cfg(unix)]
            _lock: lock,
        })
    }
}

impl Transport for SerialTransport {
    fn send(&mut self, data: &[u8]) -> Result<usize, Error> {
        self.port.write_all(data)?;
        self.port.flush()?;

        Ok(data.len())
    }

    fn receive_byte(&mut self) -> Result<u8, Error> {
        let mut byte = [0u8; 1];
        match self.port.read(&mut byte)? {
            1 => Ok(byte[0]),
            _ => Err(Error::Connection(ConnectionError::Timeout(
                TimedOutCommand::default(),
            ))),
        }
    }

    fn connect_target(&mut self) -> Result<u8, Error> {
        info!("Waiting for the target to answer the bitrate adjustment");

        self.port.set_timeout(BURST_REPLY_TIMEOUT)?;
        let adjusted = adjust_bitrate(&mut *self.port);
        self.port.set_timeout(RECEIVE_TIMEOUT)?;
        adjusted?;

        self.send(&[BOOT_MODE_INQUIRY])?;
        self.receive_byte()
    }

    fn set_baud(&mut self, bitrate: u32) -> Result<(), Error> {
        if !SUPPORTED_BAUDS.contains(&bitrate) {
            return Err(Error::UnsupportedBaud(bitrate));
        }

        self.port.set_baud_rate(bitrate)?;

        Ok(())
    }

    fn close(&mut self) -> Result<(), Error> {
        self.port.flush()?;

        Ok(())
    }
}
