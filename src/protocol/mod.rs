//! Boot mode protocol engines
//!
//! Two incompatible protocol generations are spoken by the boot ROMs: the
//! legacy one (v1) used by H8/300H, H8S and early SH parts, and the newer one
//! (v2) used by RX and later SH parts. Both are driven through the
//! [FlashProtocol] trait; which one applies is decided by the byte the target
//! answers the boot mode handshake with.

use std::{fmt, str::FromStr};

use strum::Display;

pub use self::{
    bitrate::{select_bitrate, select_multiplier, Bitrate, ClockChoice},
    v1::V1Protocol,
    v2::V2Protocol,
};
use crate::{
    connection::Connection,
    error::Error,
    image::{Mat, MemoryArea},
    progress::ProgressCallbacks,
};

pub mod bitrate;
mod cursor;
pub mod v1;
pub mod v2;

/// Handshake answer of a v1 boot ROM
pub const V1_SIGNATURE: u8 = 0xe6;
/// Handshake answer of a v2 boot ROM
pub const V2_SIGNATURE: u8 = 0xc1;

/// Protocol generation spoken by the target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ProtocolVersion {
    #[strum(serialize = "v1")]
    V1,
    #[strum(serialize = "v2")]
    V2,
}

impl TryFrom<u8> for ProtocolVersion {
    type Error = Error;

    fn try_from(signature: u8) -> Result<Self, Self::Error> {
        match signature {
            V1_SIGNATURE => Ok(ProtocolVersion::V1),
            V2_SIGNATURE => Ok(ProtocolVersion::V2),
            other => Err(Error::UnknownTarget(other)),
        }
    }
}

/// Input clock frequency in hundredths of a MHz
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Frequency(u32);

impl Frequency {
    /// Largest frequency still representable in Hz as a `u32`
    const MAX_HUNDREDTHS: u32 = u32::MAX / 10_000;

    pub fn from_hundredths(hundredths: u32) -> Result<Self, Error> {
        if hundredths == 0 || hundredths > Self::MAX_HUNDREDTHS {
            return Err(Error::InvalidFrequency(format!("{}", hundredths)));
        }

        Ok(Frequency(hundredths))
    }

    pub fn hundredths(self) -> u32 {
        self.0
    }

    pub fn hz(self) -> u32 {
        self.0 * 10_000
    }
}

impl FromStr for Frequency {
    type Err = Error;

    /// Parse a MHz value with at most two decimals, e.g. `12.5`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidFrequency(s.to_owned());
        let digits = |part: &str| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit());

        let value = s.trim();
        let (whole, fraction) = match value.split_once('.') {
            Some((whole, fraction)) => (whole, Some(fraction)),
            None => (value, None),
        };
        if !digits(whole) || fraction.map_or(false, |f| !digits(f) || f.len() > 2) {
            return Err(invalid());
        }

        let fraction = fraction.unwrap_or_default();
        let whole: u32 = whole.parse().map_err(|_| invalid())?;
        let fraction: u32 = format!("{:0<2}", fraction).parse().map_err(|_| invalid())?;
        let hundredths = whole
            .checked_mul(100)
            .and_then(|mhz| mhz.checked_add(fraction))
            .ok_or_else(invalid)?;

        Frequency::from_hundredths(hundredths).map_err(|_| invalid())
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02} MHz", self.0 / 100, self.0 % 100)
    }
}

/// Byte order the v2 target is switched to
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Display)]
pub enum Endian {
    #[default]
    #[strum(serialize = "little")]
    Little,
    #[strum(serialize = "big")]
    Big,
}

impl Endian {
    /// Wire encoding of the endian command
    pub fn code(self) -> u8 {
        match self {
            Endian::Big => 0,
            Endian::Little => 1,
        }
    }
}

impl TryFrom<char> for Endian {
    type Error = Error;

    fn try_from(c: char) -> Result<Self, Self::Error> {
        match c.to_ascii_lowercase() {
            'l' => Ok(Endian::Little),
            'b' => Ok(Endian::Big),
            _ => Err(Error::InvalidEndian(c)),
        }
    }
}

impl FromStr for Endian {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "little" => Ok(Endian::Little),
            "big" => Ok(Endian::Big),
            _ => {
                let mut chars = s.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Endian::try_from(c),
                    (Some(c), Some(_)) => Err(Error::InvalidEndian(c)),
                    (None, _) => Err(Error::InvalidEndian(' ')),
                }
            }
        }
    }
}

/// Caller supplied parameters for the connection setup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectParams {
    /// Clock fed to the target
    pub input_freq: Frequency,
    /// Byte order of the written image, v2 only
    pub endian: Endian,
    /// Index into the reported device list, v1 only
    pub device: usize,
    /// Index into the reported clock mode list, v1 only
    pub clock_mode: usize,
}

impl ConnectParams {
    pub fn new(input_freq: Frequency) -> Self {
        ConnectParams {
            input_freq,
            endian: Endian::default(),
            device: 0,
            clock_mode: 0,
        }
    }
}

/// Configuration reported by the target in list mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetInfo {
    V1(v1::TargetInfo),
    V2(v2::DeviceType),
}

impl fmt::Display for TargetInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetInfo::V1(info) => info.fmt(f),
            TargetInfo::V2(info) => info.fmt(f),
        }
    }
}

/// Operations shared by both protocol generations
pub trait FlashProtocol {
    /// Protocol generation implemented
    fn version(&self) -> ProtocolVersion;

    /// Query the configuration of a freshly connected target
    fn target_info(&mut self, connection: &mut Connection) -> Result<TargetInfo, Error>;

    /// Negotiate device, clocks and bitrate until the target is ready for
    /// programming
    fn setup_connection(
        &mut self,
        connection: &mut Connection,
        params: &ConnectParams,
    ) -> Result<(), Error>;

    /// Query the writable areas of `mat`, each with a blank image
    fn area_list(&mut self, connection: &mut Connection, mat: Mat)
        -> Result<Vec<MemoryArea>, Error>;

    /// Write the non-blank parts of `areas`, returning the number of image
    /// bytes transmitted
    fn write_rom(
        &mut self,
        connection: &mut Connection,
        areas: &[MemoryArea],
        mat: Mat,
        progress: &mut Option<&mut dyn ProgressCallbacks>,
    ) -> Result<usize, Error>;
}

/// Engine for the protocol generation the target answered with
pub fn for_version(version: ProtocolVersion) -> Box<dyn FlashProtocol> {
    match version {
        ProtocolVersion::V1 => Box::new(V1Protocol::new()),
        ProtocolVersion::V2 => Box::new(V2Protocol::new()),
    }
}

/// Two's complement of the byte sum, the checksum both generations append
pub(crate) fn checksum<'a>(bytes: impl IntoIterator<Item = &'a u8>) -> u8 {
    bytes
        .into_iter()
        .fold(0u8, |sum, &b| sum.wrapping_add(b))
        .wrapping_neg()
}
