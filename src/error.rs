//! Library and application errors

use std::{
    fmt::{Display, Formatter},
    io,
};

use miette::Diagnostic;
use thiserror::Error;

use crate::protocol::ProtocolVersion;

/// All possible errors returned by h8flash
#[derive(Debug, Diagnostic, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("Error while connecting to device")]
    #[diagnostic(transparent)]
    Connection(#[source] ConnectionError),

    #[error("Communication error while writing flash")]
    #[diagnostic(transparent)]
    Flashing(#[source] ConnectionError),

    #[error("The boot ROM returned an error")]
    #[diagnostic(transparent)]
    RomError(#[from] RomError),

    #[error("Unknown target, handshake answered with {0:#04x}")]
    #[diagnostic(
        code(h8flash::unknown_target),
        help("Supported boot ROMs answer 0xe6 (v1 protocol) or 0xc1 (v2 protocol)")
    )]
    UnknownTarget(u8),

    #[error("Unexpected response {actual:#04x} to {command}, expected {expected:#04x}")]
    #[diagnostic(code(h8flash::unexpected_response))]
    UnexpectedResponse {
        command: &'static str,
        expected: u8,
        actual: u8,
    },

    #[error("Malformed {0} response")]
    #[diagnostic(code(h8flash::malformed_response))]
    MalformedResponse(&'static str),

    #[error("No multiplier brings the {slot} clock into range ({min}..={max}) from input {input}")]
    #[diagnostic(
        code(h8flash::frequency_out_of_range),
        help("Check the `--freq` value against the target's crystal or external clock")
    )]
    FrequencyOutOfRange {
        slot: &'static str,
        input: u32,
        min: u32,
        max: u32,
    },

    #[error("No usable bitrate for a peripheral clock of {0} Hz")]
    #[diagnostic(
        code(h8flash::bitrate_unattainable),
        help("Every candidate bitrate exceeds the 4% error margin of the target UART")
    )]
    BitrateUnattainable(u32),

    #[error("Address range {start:#010x}..={end:#010x} is outside of the writable areas")]
    #[diagnostic(
        code(h8flash::area_out_of_range),
        help("Check that the image was linked for the selected memory area (user or user boot)")
    )]
    AreaOutOfRange { start: u32, end: u32 },

    #[error("Requested {kind} index {index}, but the target reports only {available}")]
    #[diagnostic(code(h8flash::device_unsupported))]
    DeviceUnsupported {
        kind: &'static str,
        index: usize,
        available: usize,
    },

    #[error("Invalid endian '{0}'")]
    #[diagnostic(
        code(h8flash::invalid_endian),
        help("Use 'l' for little endian or 'b' for big endian")
    )]
    InvalidEndian(char),

    #[error("Invalid frequency '{0}'")]
    #[diagnostic(
        code(h8flash::invalid_frequency),
        help("The input clock is given in MHz with up to two decimals, e.g. `12.5`")
    )]
    InvalidFrequency(String),

    #[error("No input clock frequency given")]
    #[diagnostic(
        code(h8flash::no_frequency),
        help("Pass `--freq` or set `frequency` in h8flash.toml")
    )]
    NoFrequency,

    #[error("Invalid USB device id '{0}'")]
    #[diagnostic(
        code(h8flash::invalid_usb_id),
        help("USB ports are written as `usb` or `usb:VVVV:PPPP` with hexadecimal ids")
    )]
    InvalidUsbId(String),

    #[error("USB support was not enabled in this build")]
    #[diagnostic(
        code(h8flash::usb_disabled),
        help("Rebuild with `--features usb`")
    )]
    UsbDisabled,

    #[error("Serial port {0} is locked by another process")]
    #[diagnostic(
        code(h8flash::port_locked),
        help("Close the other program using the port, or remove a stale lock file")
    )]
    PortLocked(String),

    #[error("Unsupported host bitrate {0} bps")]
    #[diagnostic(code(h8flash::unsupported_baud))]
    UnsupportedBaud(u32),

    #[error("Operation requires a connected target, but the {version} engine is {state}")]
    #[diagnostic(code(h8flash::not_ready))]
    NotReady {
        version: ProtocolVersion,
        state: String,
    },

    #[error("The {0} memory area list is empty")]
    #[diagnostic(code(h8flash::no_areas))]
    NoAreas(crate::image::Mat),

    #[error("Supplied image is not valid")]
    #[diagnostic(transparent)]
    Image(#[source] ImageError),

    #[error("Failed to open file: {0}")]
    #[diagnostic(code(h8flash::file_open))]
    FileOpenError(String, #[source] io::Error),
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::Connection(err.into())
    }
}

impl From<serialport::Error> for Error {
    fn from(err: serialport::Error) -> Self {
        Self::Connection(err.into())
    }
}

#[cfg(feature = "usb")]
impl From<rusb::Error> for Error {
    fn from(err: rusb::Error) -> Self {
        Self::Connection(err.into())
    }
}

/// Connection-related errors
#[derive(Debug, Diagnostic, Error)]
#[non_exhaustive]
pub enum ConnectionError {
    #[error("Failed to connect to the device")]
    #[diagnostic(
        code(h8flash::connection_failed),
        help("Ensure that the target is powered and strapped into boot mode")
    )]
    ConnectionFailed,

    #[error("Serial port not found")]
    #[diagnostic(
        code(h8flash::device_not_found),
        help("Ensure that the device is connected and your host recognizes the serial adapter")
    )]
    DeviceNotFound,

    #[error("Received frame has an invalid checksum")]
    #[diagnostic(
        code(h8flash::frame_corrupt),
        help("Check the cabling and the input clock frequency, then retry")
    )]
    FrameCorrupt,

    #[error("Timeout while waiting for {0}response")]
    #[diagnostic(code(h8flash::timeout))]
    Timeout(TimedOutCommand),

    #[error("IO error while using serial port: {0}")]
    #[diagnostic(code(h8flash::serial_error))]
    Serial(#[source] serialport::Error),

    #[cfg(feature = "usb")]
    #[error("USB error: {0}")]
    #[diagnostic(code(h8flash::usb_error))]
    Usb(#[source] rusb::Error),

    #[error("USB device {vid:04x}:{pid:04x} not found")]
    #[diagnostic(code(h8flash::usb_not_found))]
    UsbDeviceNotFound { vid: u16, pid: u16 },
}

impl From<io::Error> for ConnectionError {
    fn from(err: io::Error) -> Self {
        from_error_kind(err.kind(), err)
    }
}

impl From<serialport::Error> for ConnectionError {
    fn from(err: serialport::Error) -> Self {
        use serialport::ErrorKind;

        match err.kind() {
            ErrorKind::Io(kind) => from_error_kind(kind, err),
            ErrorKind::NoDevice => ConnectionError::DeviceNotFound,
            _ => ConnectionError::Serial(err),
        }
    }
}

#[cfg(feature = "usb")]
impl From<rusb::Error> for ConnectionError {
    fn from(err: rusb::Error) -> Self {
        match err {
            rusb::Error::Timeout => ConnectionError::Timeout(TimedOutCommand::default()),
            rusb::Error::NoDevice | rusb::Error::NotFound => ConnectionError::DeviceNotFound,
            _ => ConnectionError::Usb(err),
        }
    }
}

/// A command whose response never arrived
#[derive(Clone, Debug, Default)]
pub struct TimedOutCommand {
    command: Option<&'static str>,
}

impl Display for TimedOutCommand {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.command {
            Some(command) => write!(f, "{} ", command),
            None => Ok(()),
        }
    }
}

impl From<&'static str> for TimedOutCommand {
    fn from(command: &'static str) -> Self {
        TimedOutCommand {
            command: Some(command),
        }
    }
}

/// A negative acknowledgement sent by the boot ROM
#[derive(Clone, Copy, Debug, Diagnostic, Error, PartialEq, Eq)]
#[error("{command} was rejected with {response:#04x} (error code {code:#04x})")]
#[diagnostic(code(h8flash::rom::nak))]
#[non_exhaustive]
pub struct RomError {
    pub command: &'static str,
    pub response: u8,
    pub code: u8,
}

impl RomError {
    pub fn new(command: &'static str, response: u8, code: u8) -> RomError {
        RomError {
            command,
            response,
            code,
        }
    }
}

/// Errors produced while placing an input file into the memory areas
#[derive(Debug, Diagnostic, Error)]
#[non_exhaustive]
pub enum ImageError {
    #[error("S-record checksum mismatch on line {line}")]
    #[diagnostic(code(h8flash::image::srec_checksum))]
    SrecChecksum { line: usize },

    #[error("Malformed S-record on line {line}")]
    #[diagnostic(code(h8flash::image::srec_syntax))]
    InvalidSrec { line: usize },

    #[error("Invalid ELF file: {0}")]
    #[diagnostic(
        code(h8flash::image::elf),
        help("Pass `--binary` to write the file verbatim")
    )]
    InvalidElf(String),

    #[error("{start:#010x}..{end:#010x} is out of ROM")]
    #[diagnostic(
        code(h8flash::image::out_of_rom),
        help("Check that the image was linked for the selected memory area (user or user boot)")
    )]
    OutOfRom { start: u32, end: u32 },
}

impl From<ImageError> for Error {
    fn from(err: ImageError) -> Self {
        match err {
            ImageError::OutOfRom { start, end } => Error::AreaOutOfRange { start, end },
            err => Error::Image(err),
        }
    }
}

pub(crate) trait ResultExt {
    /// Mark an error as having occurred during the flashing stage
    fn flashing(self) -> Self;
    /// Mark the command from which this error originates
    fn for_command(self, command: &'static str) -> Self;
}

impl<T> ResultExt for Result<T, Error> {
    fn flashing(self) -> Self {
        match self {
            Err(Error::Connection(err)) => Err(Error::Flashing(err)),
            res => res,
        }
    }

    fn for_command(self, command: &'static str) -> Self {
        match self {
            Err(Error::Connection(ConnectionError::Timeout(_))) => {
                Err(Error::Connection(ConnectionError::Timeout(command.into())))
            }
            Err(Error::Flashing(ConnectionError::Timeout(_))) => {
                Err(Error::Flashing(ConnectionError::Timeout(command.into())))
            }
            res => res,
        }
    }
}

fn from_error_kind<E>(kind: io::ErrorKind, err: E) -> ConnectionError
where
    E: Into<serialport::Error>,
{
    use io::ErrorKind;

    match kind {
        ErrorKind::TimedOut => ConnectionError::Timeout(TimedOutCommand::default()),
        ErrorKind::NotFound => ConnectionError::DeviceNotFound,
        _ => ConnectionError::Serial(err.into()),
    }
}
