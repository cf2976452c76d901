//! Frame codec of the v2 boot mode protocol
//!
//! Every frame is `[head, len(u16), opcode, payload.., checksum, tail]`,
//! where `len` counts the opcode and payload and the checksum covers the
//! length field through the payload.

use std::io::Write;

use strum::IntoStaticStr;

use crate::{
    connection::Connection,
    error::{ConnectionError, Error, ResultExt, RomError},
    protocol::{checksum, Endian},
};

/// Head of a command frame, or of the first frame of a query
pub const SOH: u8 = 0x01;
/// Head of a data frame
pub const SOD: u8 = 0x81;
/// Tail of the last frame of a sequence
pub const ETX: u8 = 0x03;
/// Tail of a frame followed by further data frames
pub const ETB: u8 = 0x17;

/// Response codes above this signal an error
pub const ERROR_THRESHOLD: u8 = 0x80;

#[derive(Copy, Clone, Debug, PartialEq, Eq, IntoStaticStr)]
#[repr(u8)]
#[non_exhaustive]
pub enum CommandType {
    Sync = 0x00,
    Erase = 0x12,
    Write = 0x13,
    SetFrequency = 0x32,
    SetBitrate = 0x34,
    SetEndian = 0x36,
    DeviceType = 0x38,
    Signature = 0x3a,
}

impl CommandType {
    pub fn name(self) -> &'static str {
        self.into()
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Command<'a> {
    Sync,
    Erase {
        address: u32,
    },
    /// Announce the address range the following data frames fill
    WriteRange {
        start: u32,
        end: u32,
    },
    WriteData {
        data: &'a [u8],
    },
    SetFrequency {
        input_hz: u32,
        system_hz: u32,
    },
    SetBitrate {
        bps: u32,
    },
    SetEndian(Endian),
    DeviceType,
    Signature,
    /// Second step of a query, fetching the data it prepared
    DataRequest(CommandType),
}

impl Command<'_> {
    pub fn command_type(&self) -> CommandType {
        match self {
            Command::Sync => CommandType::Sync,
            Command::Erase { .. } => CommandType::Erase,
            Command::WriteRange { .. } | Command::WriteData { .. } => CommandType::Write,
            Command::SetFrequency { .. } => CommandType::SetFrequency,
            Command::SetBitrate { .. } => CommandType::SetBitrate,
            Command::SetEndian(_) => CommandType::SetEndian,
            Command::DeviceType => CommandType::DeviceType,
            Command::Signature => CommandType::Signature,
            Command::DataRequest(kind) => *kind,
        }
    }

    /// Encode the complete frame into `writer`
    pub fn write<W: Write>(&self, mut writer: W, head: u8, tail: u8) -> std::io::Result<()> {
        let mut body = vec![self.command_type() as u8];

        match *self {
            Command::Erase { address } => body.extend_from_slice(&address.to_be_bytes()),
            Command::WriteRange { start, end } => {
                body.extend_from_slice(&start.to_be_bytes());
                body.extend_from_slice(&end.to_be_bytes());
            }
            Command::WriteData { data } => body.extend_from_slice(data),
            Command::SetFrequency {
                input_hz,
                system_hz,
            } => {
                body.extend_from_slice(&input_hz.to_be_bytes());
                body.extend_from_slice(&system_hz.to_be_bytes());
            }
            Command::SetBitrate { bps } => body.extend_from_slice(&bps.to_be_bytes()),
            Command::SetEndian(endian) => body.push(endian.code()),
            _ => {}
        }

        let len = (body.len() as u16).to_be_bytes();
        let sum = checksum(len.iter().chain(body.iter()));

        writer.write_all(&[head])?;
        writer.write_all(&len)?;
        writer.write_all(&body)?;
        writer.write_all(&[sum, tail])
    }

    /// Encoded frame as an owned buffer
    pub fn frame(&self, head: u8, tail: u8) -> Vec<u8> {
        let mut frame = Vec::new();
        // Writing into a `Vec` cannot fail
        let _ = self.write(&mut frame, head, tail);
        frame
    }
}

/// A decoded, checksum verified response
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    pub code: u8,
    pub body: Vec<u8>,
}

impl Response {
    /// Fail on error response codes, the first body byte being the error code
    pub fn check(self, command: CommandType) -> Result<Self, Error> {
        if self.code > ERROR_THRESHOLD {
            let error = self.body.first().copied().unwrap_or_default();
            return Err(RomError::new(command.name(), self.code, error).into());
        }

        Ok(self)
    }

    /// Require the response code to echo `command`
    pub fn require_code(self, command: CommandType) -> Result<Self, Error> {
        if self.code != command as u8 {
            return Err(Error::UnexpectedResponse {
                command: command.name(),
                expected: command as u8,
                actual: self.code,
            });
        }

        Ok(self)
    }
}

pub fn send(connection: &mut Connection, command: Command<'_>, head: u8, tail: u8) -> Result<(), Error> {
    connection.write(&command.frame(head, tail))
}

/// Read one response frame
pub fn read_response(connection: &mut Connection, command: CommandType) -> Result<Response, Error> {
    let name = command.name();

    let header = connection.read_exact(3).for_command(name)?;
    let len = u16::from_be_bytes([header[1], header[2]]) as usize;
    let body = connection.read_exact(len).for_command(name)?;
    let trailer = connection.read_exact(2).for_command(name)?;

    let sum = header[1..]
        .iter()
        .chain(body.iter())
        .fold(trailer[0], |sum, &b| sum.wrapping_add(b));
    if sum != 0 {
        return Err(Error::Connection(ConnectionError::FrameCorrupt));
    }

    match body.split_first() {
        Some((&code, rest)) => Ok(Response {
            code,
            body: rest.to_vec(),
        }),
        None => Err(Error::MalformedResponse(name)),
    }
}

/// Send one frame and read its checked response
pub fn exchange(
    connection: &mut Connection,
    command: Command<'_>,
    head: u8,
    tail: u8,
) -> Result<Response, Error> {
    let kind = command.command_type();
    send(connection, command, head, tail)?;

    read_response(connection, kind)?.check(kind)
}

/// Send a standalone command
pub fn transact(connection: &mut Connection, command: Command<'_>) -> Result<Response, Error> {
    exchange(connection, command, SOH, ETX)
}

/// Two step query: the command itself, then a data request with the same
/// opcode whose response carries the answer
pub fn query(connection: &mut Connection, command: Command<'_>) -> Result<Vec<u8>, Error> {
    let kind = command.command_type();
    transact(connection, command)?;

    let response = exchange(connection, Command::DataRequest(kind), SOD, ETX)?.require_code(kind)?;
    Ok(response.body)
}
