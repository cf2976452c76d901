//! Decoders for the v2 query responses

use std::fmt;

use crate::{
    error::Error,
    image::{Mat, MemoryArea},
    protocol::cursor::Cursor,
};

/// Number of bank entries in a signature response
pub const BANK_COUNT: usize = 6;

/// Device type and clock limits, as reported by the device type query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceType {
    pub type_code: u64,
    /// Input clock limits, in Hz
    pub input_max: u32,
    pub input_min: u32,
    /// System clock limits, in Hz
    pub system_max: u32,
    pub system_min: u32,
}

impl DeviceType {
    /// `[type(u64), input max, input min, system max, system min]`
    pub fn parse(body: &[u8]) -> Result<Self, Error> {
        let mut cursor = Cursor::new(body, "device type");

        Ok(DeviceType {
            type_code: cursor.u64()?,
            input_max: cursor.u32()?,
            input_min: cursor.u32()?,
            system_max: cursor.u32()?,
            system_min: cursor.u32()?,
        })
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Type code: {:016x}", self.type_code)?;
        writeln!(f, "Input max: {} Hz", self.input_max)?;
        writeln!(f, "Input min: {} Hz", self.input_min)?;
        writeln!(f, "System max: {} Hz", self.system_max)?;
        write!(f, "System min: {} Hz", self.system_min)
    }
}

/// A run of equally sized flash blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bank {
    pub kind: u8,
    pub size: u32,
    pub count: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub device: String,
    pub banks: Vec<Bank>,
}

impl Signature {
    /// `[device name(16), {kind, size(u32), count(u16)} x 6]`
    pub fn parse(body: &[u8]) -> Result<Self, Error> {
        let mut cursor = Cursor::new(body, "signature");

        let name = cursor.bytes(16)?;
        let device = String::from_utf8_lossy(name)
            .trim_end_matches(['\0', ' '])
            .to_owned();

        let banks = (0..BANK_COUNT)
            .map(|_| -> Result<Bank, Error> {
                Ok(Bank {
                    kind: cursor.u8()?,
                    size: cursor.u32()?,
                    count: cursor.u16()?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Signature { device, banks })
    }

    /// Areas of `mat`, laid out downwards from the top of the address space
    pub fn areas(&self, mat: Mat) -> Result<Vec<MemoryArea>, Error> {
        let kind = bank_kind(mat);
        let mut top = 0u32;
        let mut areas = Vec::new();

        for bank in self.banks.iter().filter(|bank| bank.kind == kind && bank.size != 0) {
            for _ in 0..bank.count {
                let start = top.wrapping_sub(bank.size);
                areas.push(MemoryArea::new(start, top.wrapping_sub(1))?);
                top = start;
            }
        }

        Ok(areas)
    }
}

/// Bank kind code of a MAT
pub fn bank_kind(mat: Mat) -> u8 {
    match mat {
        Mat::User => 0x00,
        Mat::UserBoot => 0x02,
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn signature_body(banks: &[(u8, u32, u16)]) -> Vec<u8> {
        let mut body = b"R5F56218\0\0\0\0\0\0\0\0".to_vec();
        for i in 0..BANK_COUNT {
            let (kind, size, count) = banks.get(i).copied().unwrap_or((0xff, 0, 0));
            body.push(kind);
            body.extend_from_slice(&size.to_be_bytes());
            body.extend_from_slice(&count.to_be_bytes());
        }
        body
    }

    #[test]
    fn device_type_fields() {
        let mut body = 0x0123_4567_89ab_cdefu64.to_be_bytes().to_vec();
        for value in [20_000_000u32, 8_000_000, 100_000_000, 8_000_000] {
            body.extend_from_slice(&value.to_be_bytes());
        }

        let device = DeviceType::parse(&body).unwrap();

        assert_eq!(device.type_code, 0x0123_4567_89ab_cdef);
        assert_eq!(device.system_max, 100_000_000);
        assert!(device.to_string().starts_with("Type code: 0123456789abcdef\n"));
        assert!(DeviceType::parse(&body[..20]).is_err());
    }

    #[test]
    fn areas_descend_from_top_of_memory() {
        let signature = Signature::parse(&signature_body(&[
            (0x00, 0x400, 2),
            (0x02, 0x2000, 1),
            (0x00, 0x1000, 1),
        ]))
        .unwrap();
        assert_eq!(signature.device, "R5F56218");

        let user = signature
            .areas(Mat::User)
            .unwrap()
            .iter()
            .map(|area| (area.start(), area.end()))
            .collect::<Vec<_>>();
        assert_eq!(
            user,
            vec![
                (0xffff_fc00, 0xffff_ffff),
                (0xffff_f800, 0xffff_fbff),
                (0xffff_e800, 0xffff_f7ff),
            ]
        );

        let boot = signature.areas(Mat::UserBoot).unwrap();
        assert_eq!(boot.len(), 1);
        assert_eq!((boot[0].start(), boot[0].end()), (0xffff_e000, 0xffff_ffff));
        assert_eq!(boot[0].size(), 0x2000);
    }

    #[test]
    fn short_signature_is_malformed() {
        let body = signature_body(&[]);

        assert!(matches!(
            Signature::parse(&body[..40]),
            Err(Error::MalformedResponse("signature"))
        ));
    }
}
