//! Writable memory areas and the loaders that fill them
//!
//! A [MemoryArea] is created from what the target reports and starts out
//! blank (all bytes 0xFF). The loaders in this module copy program data from
//! a raw binary, a Motorola S-record or an ELF file into the matching areas
//! before they are handed to the protocol for writing.

use std::{fmt, path::Path};

use log::debug;
use strum::Display;

pub use self::{elf::load_elf, srec::load_srec};
use crate::error::{Error, ImageError};

mod elf;
mod srec;

/// Value of an erased flash byte
pub const BLANK: u8 = 0xff;

const ELF_MAGIC: &[u8] = b"\x7fELF";

/// Memory area type, the flash region a write is directed at
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Display)]
#[non_exhaustive]
pub enum Mat {
    /// User program area
    #[default]
    #[strum(serialize = "user")]
    User,
    /// User boot area
    #[strum(serialize = "user boot")]
    UserBoot,
}

/// A contiguous writable flash region and the image destined for it
#[derive(Clone, PartialEq, Eq)]
pub struct MemoryArea {
    start: u32,
    end: u32,
    image: Vec<u8>,
}

impl MemoryArea {
    /// A blank area covering `start..=end`
    pub fn new(start: u32, end: u32) -> Result<Self, Error> {
        if end < start {
            return Err(Error::AreaOutOfRange { start, end });
        }

        let size = (end - start) as usize + 1;
        Ok(MemoryArea {
            start,
            end,
            image: vec![BLANK; size],
        })
    }

    pub fn start(&self) -> u32 {
        self.start
    }

    /// Last address of the area, inclusive
    pub fn end(&self) -> u32 {
        self.end
    }

    pub fn size(&self) -> usize {
        self.image.len()
    }

    pub fn image(&self) -> &[u8] {
        &self.image
    }

    pub fn image_mut(&mut self) -> &mut [u8] {
        &mut self.image
    }

    pub fn contains(&self, addr: u32) -> bool {
        (self.start..=self.end).contains(&addr)
    }

    /// True when no byte of the image differs from erased flash
    pub fn is_blank(&self) -> bool {
        is_blank(&self.image)
    }
}

impl fmt::Debug for MemoryArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryArea")
            .field("start", &format_args!("{:#010x}", self.start))
            .field("end", &format_args!("{:#010x}", self.end))
            .field("size", &self.size())
            .finish()
    }
}

impl fmt::Display for MemoryArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:08x} - {:08x} {:08x} bytes",
            self.start,
            self.end,
            self.size()
        )
    }
}

pub fn is_blank(data: &[u8]) -> bool {
    data.iter().all(|&b| b == BLANK)
}

/// Find the area containing `addr`
pub fn lookup_area(areas: &mut [MemoryArea], addr: u32) -> Option<&mut MemoryArea> {
    areas.iter_mut().find(|area| area.contains(addr))
}

/// Copy `data` to `addr`, spilling over into whichever areas hold the
/// following addresses
pub fn place(areas: &mut [MemoryArea], addr: u32, data: &[u8]) -> Result<(), ImageError> {
    let mut addr = addr;
    let mut remaining = data;

    while !remaining.is_empty() {
        let out_of_rom = ImageError::OutOfRom {
            start: addr,
            end: addr.saturating_add(remaining.len() as u32 - 1),
        };
        let area = lookup_area(areas, addr).ok_or(out_of_rom)?;

        let offset = (addr - area.start) as usize;
        let len = remaining.len().min(area.size() - offset);
        area.image[offset..offset + len].copy_from_slice(&remaining[..len]);

        remaining = &remaining[len..];
        match addr.checked_add(len as u32) {
            Some(next) => addr = next,
            None if remaining.is_empty() => break,
            None => {
                return Err(ImageError::OutOfRom {
                    start: u32::MAX,
                    end: u32::MAX,
                })
            }
        }
    }

    Ok(())
}

/// Input file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ImageFormat {
    #[strum(serialize = "raw binary")]
    Binary,
    #[strum(serialize = "S-record")]
    Srec,
    #[strum(serialize = "ELF")]
    Elf,
}

impl ImageFormat {
    /// Guess the format of `data` from its first bytes
    pub fn detect(data: &[u8]) -> Self {
        if data.starts_with(ELF_MAGIC) {
            ImageFormat::Elf
        } else if srec::is_srec(data) {
            ImageFormat::Srec
        } else {
            ImageFormat::Binary
        }
    }
}

/// Place a raw binary at consecutive addresses from the lowest area start
pub fn load_binary(data: &[u8], areas: &mut [MemoryArea]) -> Result<(), Error> {
    let base = areas.iter().map(MemoryArea::start).min();
    match base {
        Some(base) => place(areas, base, data).map_err(Error::from),
        None if data.is_empty() => Ok(()),
        None => Err(ImageError::OutOfRom {
            start: 0,
            end: data.len() as u32 - 1,
        }
        .into()),
    }
}

/// Load `data` into `areas`, returning the format that was used
pub fn load_image(
    data: &[u8],
    force_binary: bool,
    areas: &mut [MemoryArea],
) -> Result<ImageFormat, Error> {
    let format = if force_binary {
        ImageFormat::Binary
    } else {
        ImageFormat::detect(data)
    };
    debug!("Loading {} image of {} bytes", format, data.len());

    match format {
        ImageFormat::Binary => load_binary(data, areas)?,
        ImageFormat::Srec => load_srec(data, areas)?,
        ImageFormat::Elf => load_elf(data, areas)?,
    }

    Ok(format)
}

/// Read `path` and load it into `areas`
pub fn load_file(
    path: &Path,
    force_binary: bool,
    areas: &mut [MemoryArea],
) -> Result<ImageFormat, Error> {
    let data = std::fs::read(path)
        .map_err(|e| Error::FileOpenError(path.display().to_string(), e))?;

    load_image(&data, force_binary, areas)
}
