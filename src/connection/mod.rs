//! Establish a connection with a target device
//!
//! The [Transport] trait abstracts over the byte channel to the boot ROM (a
//! serial line or a USB bulk pipe). The [Connection] struct owns one transport
//! for the lifetime of a session and provides the framing-independent
//! operations the protocol engines are built on.

use std::{
    io::{self, Read, Write},
    str::FromStr,
    thread::sleep,
    time::Duration,
};

use log::debug;

pub use self::serial::SerialTransport;
#[cfg(feature = "usb")]
pub use self::usb::UsbTransport;
use crate::{
    error::{ConnectionError, Error},
    protocol::ProtocolVersion,
};

#[cfg(unix)]
mod lock;
#[cfg(test)]
pub(crate) mod mock;
mod serial;
#[cfg(feature = "usb")]
mod usb;

/// How long to wait for any single byte of a response
pub const RECEIVE_TIMEOUT: Duration = Duration::from_secs(60);
/// Quiet period both ends need after a bitrate change
pub const BAUD_SETTLE_DELAY: Duration = Duration::from_millis(10);

/// Number of zero bytes in one bitrate adjustment burst
pub(crate) const BAUD_ADJUST_LEN: usize = 30;
/// Number of bursts sent before the target is declared unreachable
pub(crate) const MAX_CONNECT_ATTEMPTS: usize = 60;
/// Byte sent once the target answered the adjustment burst
pub(crate) const BOOT_MODE_INQUIRY: u8 = 0x55;

/// Default USB vendor ID of the boot mode USB function
pub const DEFAULT_USB_VID: u16 = 0x045b;
/// Default USB product ID of the boot mode USB function
pub const DEFAULT_USB_PID: u16 = 0x0025;

/// Raw byte channel to a target in boot mode
pub trait Transport {
    /// Send a buffer, returning the number of bytes written
    fn send(&mut self, data: &[u8]) -> Result<usize, Error>;

    /// Receive one byte, failing with a timeout after [RECEIVE_TIMEOUT]
    fn receive_byte(&mut self) -> Result<u8, Error>;

    /// Run the boot mode handshake and return the signature byte the target
    /// answered with
    fn connect_target(&mut self) -> Result<u8, Error>;

    /// Change the host side bitrate
    fn set_baud(&mut self, bitrate: u32) -> Result<(), Error>;

    /// Release the underlying device
    fn close(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

/// Where the target is attached
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Port {
    /// Serial device path, e.g. `/dev/ttyUSB0`
    Serial(String),
    /// USB boot mode function
    Usb { vid: u16, pid: u16 },
}

impl Port {
    /// Open the transport for this port
    pub fn open(&self) -> Result<Box<dyn Transport>, Error> {
        match self {
            Port::Serial(path) => Ok(Box::new(SerialTransport::open(path)?)),
            #[cfg(feature = "usb")]
            Port::Usb { vid, pid } => Ok(Box::new(UsbTransport::open(*vid, *pid)?)),
            #[cfg(not(feature = "usb"))]
            Port::Usb { .. } => Err(Error::UsbDisabled),
        }
    }
}

impl FromStr for Port {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let is_usb = s
            .get(..3)
            .map(|prefix| prefix.eq_ignore_ascii_case("usb"))
            .unwrap_or(false);

        if !is_usb {
            return Ok(Port::Serial(s.to_owned()));
        }

        let ids = &s[3..];
        if ids.is_empty() {
            return Ok(Port::Usb {
                vid: DEFAULT_USB_VID,
                pid: DEFAULT_USB_PID,
            });
        }

        let parse = |id: &str| u16::from_str_radix(id, 16).ok();
        match ids.strip_prefix(':').and_then(|ids| ids.split_once(':')) {
            Some((vid, pid)) => match (parse(vid), parse(pid)) {
                (Some(vid), Some(pid)) => Ok(Port::Usb { vid, pid }),
                _ => Err(Error::InvalidUsbId(s.to_owned())),
            },
            None => Err(Error::InvalidUsbId(s.to_owned())),
        }
    }
}

/// An established connection with a target device
pub struct Connection {
    transport: Box<dyn Transport>,
}

impl Connection {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Connection { transport }
    }

    /// Run the boot mode handshake and identify the protocol generation
    pub fn begin(&mut self) -> Result<ProtocolVersion, Error> {
        let signature = self.transport.connect_target()?;
        debug!("Handshake answered with {:#04x}", signature);

        ProtocolVersion::try_from(signature)
    }

    /// Write a complete buffer to the target
    pub fn write(&mut self, data: &[u8]) -> Result<(), Error> {
        let written = self.transport.send(data)?;
        if written != data.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short write, {} of {} bytes sent", written, data.len()),
            )
            .into());
        }

        Ok(())
    }

    /// Read a single byte
    pub fn read_byte(&mut self) -> Result<u8, Error> {
        self.transport.receive_byte()
    }

    /// Read exactly `len` bytes
    pub fn read_exact(&mut self, len: usize) -> Result<Vec<u8>, Error> {
        (0..len).map(|_| self.read_byte()).collect()
    }

    /// Switch the host bitrate and wait for the line to settle
    pub fn change_baud(&mut self, bitrate: u32) -> Result<(), Error> {
        debug!("Switching host bitrate to {} bps", bitrate);
        self.transport.set_baud(bitrate)?;
        sleep(BAUD_SETTLE_DELAY);

        Ok(())
    }

    /// Close the connection, releasing the transport
    pub fn close(mut self) -> Result<(), Error> {
        self.transport.close()
    }
}

/// Send zero bursts until the target has locked onto the host bitrate and
/// echoes a single zero byte
///
/// The port must be configured with a short read timeout; a read timing out
/// just means the next burst is due.
pub(crate) fn adjust_bitrate<P>(port: &mut P) -> Result<(), Error>
where
    P: Read + Write + ?Sized,
{
    let burst = [0u8; BAUD_ADJUST_LEN];

    for attempt in 0..MAX_CONNECT_ATTEMPTS {
        port.write_all(&burst)?;
        port.flush()?;

        let mut reply = [0xffu8; 1];
        match port.read(&mut reply) {
            Ok(1) if reply[0] == 0x00 => {
                debug!("Target synchronised after {} bursts", attempt + 1);
                return Ok(());
            }
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::TimedOut => {}
            Err(e) => return Err(e.into()),
        }

        debug!("No reply to bitrate adjustment burst {}", attempt + 1);
    }

    Err(Error::Connection(ConnectionError::ConnectionFailed))
}
