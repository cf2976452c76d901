//! Decoders for the v1 inquiry responses

use std::{fmt, ops::RangeInclusive};

use crate::{error::Error, protocol::cursor::Cursor};

/// A device the boot ROM can be configured for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub code: [u8; 4],
    pub name: String,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, String::from_utf8_lossy(&self.code))
    }
}

/// Operating range of one clock, in hundredths of a MHz
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrequencyRange {
    pub min: u32,
    pub max: u32,
}

impl FrequencyRange {
    pub fn range(&self) -> RangeInclusive<u32> {
        self.min..=self.max
    }
}

/// Everything a v1 boot ROM reports about itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetInfo {
    pub devices: Vec<Device>,
    pub clock_modes: Vec<u8>,
    pub multipliers: Vec<Vec<i8>>,
    pub frequencies: Vec<FrequencyRange>,
    pub user_boot_areas: Vec<(u32, u32)>,
    pub user_areas: Vec<(u32, u32)>,
    pub write_size: u16,
}

impl fmt::Display for TargetInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Devices:")?;
        for device in &self.devices {
            writeln!(f, "  {}", device)?;
        }

        let modes = self
            .clock_modes
            .iter()
            .map(|mode| mode.to_string())
            .collect::<Vec<_>>();
        writeln!(f, "Clock modes: {}", modes.join(", "))?;

        for (slot, (rates, range)) in self
            .multipliers
            .iter()
            .zip(self.frequencies.iter())
            .enumerate()
        {
            let rates = rates
                .iter()
                .map(|rate| match rate {
                    r if *r < 0 => format!("1/{}", r.unsigned_abs()),
                    r => format!("x{}", r),
                })
                .collect::<Vec<_>>();
            writeln!(
                f,
                "Clock {}: {}.{:02} - {}.{:02} MHz, multipliers {}",
                slot,
                range.min / 100,
                range.min % 100,
                range.max / 100,
                range.max % 100,
                rates.join(" ")
            )?;
        }

        writeln!(f, "User boot area:")?;
        for (start, end) in &self.user_boot_areas {
            writeln!(f, "  {:08x} - {:08x}", start, end)?;
        }
        writeln!(f, "User area:")?;
        for (start, end) in &self.user_areas {
            writeln!(f, "  {:08x} - {:08x}", start, end)?;
        }
        write!(f, "Write page size: {} bytes", self.write_size)
    }
}

/// `[count, {len, code(4), name(len - 4)}..]`
pub fn parse_devices(payload: &[u8]) -> Result<Vec<Device>, Error> {
    const WHAT: &str = "device list";
    let mut cursor = Cursor::new(payload, WHAT);

    let count = cursor.u8()?;
    (0..count)
        .map(|_| -> Result<Device, Error> {
            let len = cursor.u8()? as usize;
            if len < 4 {
                return Err(Error::MalformedResponse(WHAT));
            }

            let mut code = [0u8; 4];
            code.copy_from_slice(cursor.bytes(4)?);
            let name = String::from_utf8_lossy(cursor.bytes(len - 4)?).into_owned();

            Ok(Device { code, name })
        })
        .collect()
}

/// `[count, mode..]`
pub fn parse_clock_modes(payload: &[u8]) -> Result<Vec<u8>, Error> {
    let mut cursor = Cursor::new(payload, "clock mode list");

    let count = cursor.u8()? as usize;
    Ok(cursor.bytes(count)?.to_vec())
}

/// `[slots, {count, rate(i8)..}..]`
pub fn parse_multipliers(payload: &[u8]) -> Result<Vec<Vec<i8>>, Error> {
    let mut cursor = Cursor::new(payload, "multiplier list");

    let slots = cursor.u8()?;
    (0..slots)
        .map(|_| -> Result<Vec<i8>, Error> {
            let count = cursor.u8()?;
            (0..count).map(|_| cursor.i8()).collect()
        })
        .collect()
}

/// `[count, {min(u16), max(u16)}..]`
pub fn parse_frequencies(payload: &[u8]) -> Result<Vec<FrequencyRange>, Error> {
    let mut cursor = Cursor::new(payload, "frequency list");

    let count = cursor.u8()?;
    (0..count)
        .map(|_| -> Result<FrequencyRange, Error> {
            let min = cursor.u16()? as u32;
            let max = cursor.u16()? as u32;
            Ok(FrequencyRange { min, max })
        })
        .collect()
}

/// `[count, {start(u32), end(u32)}..]`
pub fn parse_areas(payload: &[u8]) -> Result<Vec<(u32, u32)>, Error> {
    let mut cursor = Cursor::new(payload, "area list");

    let count = cursor.u8()?;
    (0..count)
        .map(|_| -> Result<(u32, u32), Error> { Ok((cursor.u32()?, cursor.u32()?)) })
        .collect()
}

/// `[size(u16)]`
pub fn parse_write_size(payload: &[u8]) -> Result<u16, Error> {
    const WHAT: &str = "write size";
    let mut cursor = Cursor::new(payload, WHAT);

    let size = cursor.u16()?;
    if size == 0 || !cursor.is_empty() {
        return Err(Error::MalformedResponse(WHAT));
    }

    Ok(size)
}
