//! Frame codec of the v1 boot mode protocol
//!
//! Commands are a bare opcode, or `[opcode, len, payload.., checksum]` when
//! they carry data. Programming frames have no length byte. Responses are a
//! single ACK, a NAK followed by an error code, or a checksummed data frame.

use std::io::Write;

use strum::IntoStaticStr;

use crate::{
    connection::Connection,
    error::{ConnectionError, Error, ResultExt, RomError},
    image::Mat,
    protocol::checksum,
};

pub const ACK: u8 = 0x06;

/// Response codes that signal a rejected command, followed by an error code
pub const NAK_CODES: [u8; 13] = [
    0x80, 0x90, 0x91, 0xbf, 0xc0, 0xc2, 0xc3, 0xc8, 0xcc, 0xcd, 0xd0, 0xd2, 0xd8,
];

/// Address of the frame closing a programming sequence
pub const PROGRAM_END: u32 = 0xffff_ffff;

#[derive(Copy, Clone, Debug, PartialEq, Eq, IntoStaticStr)]
#[repr(u8)]
#[non_exhaustive]
pub enum CommandType {
    SelectDevice = 0x10,
    SetClockMode = 0x11,
    QueryDevice = 0x20,
    QueryClockMode = 0x21,
    QueryMultiplier = 0x22,
    QueryFrequency = 0x23,
    QueryBootArea = 0x24,
    QueryUserArea = 0x25,
    QueryWriteSize = 0x27,
    SetBitrate = 0x3f,
    EnterProgramming = 0x40,
    SelectUserBoot = 0x42,
    SelectUser = 0x43,
    Program = 0x50,
    Ack = ACK,
}

impl CommandType {
    /// Code of the data response answering an inquiry
    pub fn response_code(self) -> u8 {
        self as u8 + 0x10
    }

    pub fn name(self) -> &'static str {
        self.into()
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Command<'a> {
    QueryDevice,
    QueryClockMode,
    QueryMultiplier,
    QueryFrequency,
    QueryArea(Mat),
    QueryWriteSize,
    SelectDevice {
        code: [u8; 4],
    },
    SetClockMode {
        mode: u8,
    },
    SetBitrate {
        /// Bitrate in units of 100 bps
        bitrate: u16,
        /// Input clock in hundredths of a MHz
        input_freq: u16,
        core_multiplier: i8,
        peripheral_multiplier: Option<i8>,
    },
    EnterProgramming,
    SelectMat(Mat),
    Program {
        address: u32,
        data: &'a [u8],
    },
    Ack,
}

impl Command<'_> {
    pub fn command_type(&self) -> CommandType {
        match self {
            Command::QueryDevice => CommandType::QueryDevice,
            Command::QueryClockMode => CommandType::QueryClockMode,
            Command::QueryMultiplier => CommandType::QueryMultiplier,
            Command::QueryFrequency => CommandType::QueryFrequency,
            Command::QueryArea(Mat::User) => CommandType::QueryUserArea,
            Command::QueryArea(Mat::UserBoot) => CommandType::QueryBootArea,
            Command::QueryWriteSize => CommandType::QueryWriteSize,
            Command::SelectDevice { .. } => CommandType::SelectDevice,
            Command::SetClockMode { .. } => CommandType::SetClockMode,
            Command::SetBitrate { .. } => CommandType::SetBitrate,
            Command::EnterProgramming => CommandType::EnterProgramming,
            Command::SelectMat(Mat::User) => CommandType::SelectUser,
            Command::SelectMat(Mat::UserBoot) => CommandType::SelectUserBoot,
            Command::Program { .. } => CommandType::Program,
            Command::Ack => CommandType::Ack,
        }
    }

    /// Encode the complete frame into `writer`
    pub fn write<W: Write>(&self, mut writer: W) -> std::io::Result<()> {
        let opcode = self.command_type() as u8;

        match *self {
            Command::SelectDevice { code } => with_length(writer, opcode, &code),
            Command::SetClockMode { mode } => with_length(writer, opcode, &[mode]),
            Command::SetBitrate {
                bitrate,
                input_freq,
                core_multiplier,
                peripheral_multiplier,
            } => {
                let mut payload = Vec::with_capacity(7);
                payload.extend_from_slice(&bitrate.to_be_bytes());
                payload.extend_from_slice(&input_freq.to_be_bytes());
                payload.push(if peripheral_multiplier.is_some() { 2 } else { 1 });
                payload.push(core_multiplier as u8);
                payload.push(peripheral_multiplier.unwrap_or(0) as u8);
                with_length(writer, opcode, &payload)
            }
            Command::Program { address, data } => {
                let mut frame = Vec::with_capacity(data.len() + 6);
                frame.push(opcode);
                frame.extend_from_slice(&address.to_be_bytes());
                frame.extend_from_slice(data);
                frame.push(checksum(&frame));
                writer.write_all(&frame)
            }
            _ => writer.write_all(&[opcode]),
        }
    }

    /// Encoded frame as an owned buffer
    pub fn frame(&self) -> Vec<u8> {
        let mut frame = Vec::new();
        // Writing into a `Vec` cannot fail
        let _ = self.write(&mut frame);
        frame
    }
}

fn with_length<W: Write>(mut writer: W, opcode: u8, payload: &[u8]) -> std::io::Result<()> {
    let mut frame = Vec::with_capacity(payload.len() + 3);
    frame.push(opcode);
    frame.push(payload.len() as u8);
    frame.extend_from_slice(payload);
    frame.push(checksum(&frame));

    writer.write_all(&frame)
}

/// A decoded, checksum verified response
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Response {
    Ack,
    Data { code: u8, payload: Vec<u8> },
}

/// Send a command frame
pub fn send(connection: &mut Connection, command: Command<'_>) -> Result<(), Error> {
    connection.write(&command.frame())
}

/// Read one response to `command`
pub fn read_response(connection: &mut Connection, command: CommandType) -> Result<Response, Error> {
    let name = command.name();

    let code = connection.read_byte().for_command(name)?;
    if code == ACK {
        return Ok(Response::Ack);
    }

    if NAK_CODES.contains(&code) {
        let error = connection.read_byte().for_command(name)?;
        return Err(RomError::new(name, code, error).into());
    }

    let len = connection.read_byte().for_command(name)?;
    let rest = connection.read_exact(len as usize + 1).for_command(name)?;

    let sum = rest
        .iter()
        .fold(code.wrapping_add(len), |sum, &b| sum.wrapping_add(b));
    if sum != 0 {
        return Err(Error::Connection(ConnectionError::FrameCorrupt));
    }

    let payload = rest[..len as usize].to_vec();
    Ok(Response::Data { code, payload })
}

/// Send `command` and require a plain ACK
pub fn transact_ack(connection: &mut Connection, command: Command<'_>) -> Result<(), Error> {
    let kind = command.command_type();
    send(connection, command)?;

    match read_response(connection, kind)? {
        Response::Ack => Ok(()),
        Response::Data { code, .. } => Err(Error::UnexpectedResponse {
            command: kind.name(),
            expected: ACK,
            actual: code,
        }),
    }
}

/// Send an inquiry and return the payload of its data response
pub fn inquire(connection: &mut Connection, command: Command<'_>) -> Result<Vec<u8>, Error> {
    let kind = command.command_type();
    let expected = kind.response_code();
    send(connection, command)?;

    match read_response(connection, kind)? {
        Response::Data { code, payload } if code == expected => Ok(payload),
        Response::Data { code, .. } => Err(Error::UnexpectedResponse {
            command: kind.name(),
            expected,
            actual: code,
        }),
        Response::Ack => Err(Error::UnexpectedResponse {
            command: kind.name(),
            expected,
            actual: ACK,
        }),
    }
}
