//! ELF loader, placing loadable segments at their physical address

use log::debug;
use object::{
    elf::PT_LOAD,
    read::elf::{ElfFile32 as ElfFile, ProgramHeader},
    Endianness,
};

use super::{place, MemoryArea};
use crate::error::{Error, ImageError};

/// Copy every loadable segment with file contents into `areas`
pub fn load_elf(data: &[u8], areas: &mut [MemoryArea]) -> Result<(), Error> {
    let elf = ElfFile::<Endianness>::parse(data)
        .map_err(|e| ImageError::InvalidElf(e.to_string()))?;
    let endian = elf.endian();

    for (index, header) in elf.elf_program_headers().iter().enumerate() {
        if header.p_type(endian) != PT_LOAD {
            continue;
        }

        let paddr = header.p_paddr(endian);
        let filesz = header.p_filesz(endian);
        debug!(
            "Segment {}: offset {:08x} paddr {:08x} size {:08x}",
            index,
            header.p_offset(endian),
            paddr,
            filesz
        );
        if filesz == 0 {
            continue;
        }

        let segment = header.data(endian, data).map_err(|_| {
            ImageError::InvalidElf(format!("segment {} extends past the end of the file", index))
        })?;
        place(areas, paddr, segment)?;
    }

    Ok(())
}
