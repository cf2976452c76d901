//! Bitrate and clock multiplier selection
//!
//! The target UART divides its peripheral clock by `32 * (N + 1)`, with `N`
//! the 8-bit bit rate register value. A candidate bitrate is usable when the
//! closest divisor brings the real rate within [MAX_ERROR_PPM] of it.

use std::ops::RangeInclusive;

use log::debug;

use crate::error::Error;

/// Bitrates tried for the programming phase, fastest first
pub const CANDIDATES: [u32; 5] = [115_200, 57_600, 38_400, 19_200, 9_600];

/// Largest tolerated deviation from the nominal bitrate, 4%
pub const MAX_ERROR_PPM: u32 = 40_000;

/// A bitrate and the divisor that yields it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bitrate {
    /// Nominal rate in bits per second
    pub bps: u32,
    /// Bit rate register value, `N`
    pub brr: u8,
    /// Deviation of the real rate from `bps`, in parts per million
    pub error_ppm: u32,
}

impl Bitrate {
    /// Rate in units of 100 bps as used on the v1 wire
    pub fn wire_v1(&self) -> u16 {
        (self.bps / 100) as u16
    }
}

/// Pick the fastest candidate bitrate the peripheral clock can generate
pub fn select_bitrate(peripheral_hz: u32) -> Result<Bitrate, Error> {
    let clock = peripheral_hz as u64;

    for &bps in CANDIDATES.iter() {
        let step = 32 * bps as u64;
        let divisor = (clock + step / 2) / step;
        if !(1..=256).contains(&divisor) {
            continue;
        }

        let generated = step * divisor;
        let error_ppm = (clock.abs_diff(generated) * 1_000_000 / generated) as u32;
        debug!(
            "{} bps: N = {}, error {}.{:02}%",
            bps,
            divisor - 1,
            error_ppm / 10_000,
            error_ppm % 10_000 / 100
        );

        if error_ppm <= MAX_ERROR_PPM {
            return Ok(Bitrate {
                bps,
                brr: (divisor - 1) as u8,
                error_ppm,
            });
        }
    }

    Err(Error::BitrateUnattainable(peripheral_hz))
}

/// A clock multiplier and the frequency it produces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockChoice {
    pub multiplier: i8,
    pub frequency: u32,
}

/// Clock derived from `input` by a multiplier slot entry; negative entries
/// divide
pub fn apply_multiplier(input: u32, multiplier: i8) -> Option<u32> {
    match multiplier {
        0 => None,
        m if m > 0 => input.checked_mul(m as u32),
        m => Some(input / m.unsigned_abs() as u32),
    }
}

/// Keep the multiplier giving the highest clock inside `range`
pub fn select_multiplier(
    input: u32,
    multipliers: &[i8],
    range: &RangeInclusive<u32>,
) -> Option<ClockChoice> {
    multipliers
        .iter()
        .filter_map(|&multiplier| {
            apply_multiplier(input, multiplier).map(|frequency| ClockChoice {
                multiplier,
                frequency,
            })
        })
        .filter(|choice| range.contains(&choice.frequency))
        .max_by_key(|choice| choice.frequency)
}
