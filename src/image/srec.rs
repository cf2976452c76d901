//! Motorola S-record loader

use super::{place, MemoryArea};
use crate::error::{Error, ImageError};

/// A decoded S-record line
#[derive(Debug, PartialEq, Eq)]
struct Record {
    kind: u8,
    address: u32,
    data: Vec<u8>,
}

/// Number of address bytes for each record type
fn address_len(kind: u8) -> Option<usize> {
    match kind {
        0 | 1 | 5 | 9 => Some(2),
        2 | 6 | 8 => Some(3),
        3 | 7 => Some(4),
        _ => None,
    }
}

fn decode_hex(text: &str) -> Option<Vec<u8>> {
    if text.len() % 2 != 0 {
        return None;
    }

    (0..text.len())
        .step_by(2)
        .map(|i| text.get(i..i + 2).and_then(|pair| u8::from_str_radix(pair, 16).ok()))
        .collect()
}

/// Decode one line, `None` for lines that are not S-records at all
fn parse_line(line: &str, line_no: usize) -> Option<Result<Record, ImageError>> {
    let line = line.trim_end();
    let rest = line.strip_prefix('S')?;
    let kind = rest.chars().next()?.to_digit(10)? as u8;

    Some(decode_record(kind, &rest[1..], line_no))
}

fn decode_record(kind: u8, hex: &str, line: usize) -> Result<Record, ImageError> {
    let bytes = decode_hex(hex).ok_or(ImageError::InvalidSrec { line })?;
    let addr_len = address_len(kind).ok_or(ImageError::InvalidSrec { line })?;

    let (&count, body) = bytes.split_first().ok_or(ImageError::InvalidSrec { line })?;
    if count as usize != body.len() || body.len() < addr_len + 1 {
        return Err(ImageError::InvalidSrec { line });
    }

    let sum = bytes.iter().fold(0u8, |sum, &b| sum.wrapping_add(b));
    if sum != 0xff {
        return Err(ImageError::SrecChecksum { line });
    }

    let address = body[..addr_len]
        .iter()
        .fold(0u32, |addr, &b| (addr << 8) | b as u32);
    let data = body[addr_len..body.len() - 1].to_vec();

    Ok(Record {
        kind,
        address,
        data,
    })
}

/// True when the first line of `data` is a well formed S-record
pub(super) fn is_srec(data: &[u8]) -> bool {
    let first = data.split(|&b| b == b'\n').next().unwrap_or_default();

    std::str::from_utf8(first)
        .ok()
        .and_then(|line| parse_line(line, 1))
        .map_or(false, |record| record.is_ok())
}

/// Copy the data records of an S-record file into `areas`
pub fn load_srec(data: &[u8], areas: &mut [MemoryArea]) -> Result<(), Error> {
    let text = String::from_utf8_lossy(data);

    for (index, line) in text.lines().enumerate() {
        let Some(record) = parse_line(line, index + 1) else {
            continue;
        };
        let record = record?;

        if matches!(record.kind, 1..=3) && !record.data.is_empty() {
            place(areas, record.address, &record.data)?;
        }
    }

    Ok(())
}
