use crate::scribe::Scribe;
use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};
use core::fmt;

/// Parse the section table from a byte array at a given offset.
/// `number_of_sections` should be equal to the number of sections
/// defined in the COFF header.
///
/// Headers that run past the end of the binary are dropped.
pub fn parse_section_table(
    binary: &[u8],
    offset: usize,
    number_of_sections: u16,
) -> Vec<SectionHeader> {
    let mut offset = offset;
    let mut headers: Vec<SectionHeader> = Vec::new();

    for _ in 0..number_of_sections {
        match binary.read_pod::<SectionHeader>(offset) {
            Ok(header) => headers.push(header),
            Err(_) => break,
        }
        offset += SectionHeader::SIZE;
    }

    headers
}

/// Contains information such as name, size, characteristics
/// and location of a section in the binary
#[derive(Copy, Clone, Pod, Zeroable, Default)]
#[repr(C)]
pub struct SectionHeader {
    /// An 8-byte, null-padded UTF-8 encoded string.
    /// If the string is exactly 8 characters long, there is no terminating null.
    pub name: [u8; 8],
    /// The total size of the section when loaded into memory.
    /// If this value is greater than `size_of_raw_data`, the section is zero-padded.
    pub virtual_size: u32,
    /// The address of the first byte of the section relative to the image base.
    pub virtual_address: u32,
    /// The size of the initialized data on disk.
    /// Because this field is rounded to `file_alignment` but `virtual_size` is not,
    /// it can be larger or smaller than `virtual_size`.
    pub size_of_raw_data: u32,
    /// The file pointer to the first page of the section within the COFF file.
    pub pointer_to_raw_data: u32,
    /// The file pointer to the beginning of relocation entries for the section.
    pub pointer_to_relocations: u32,
    /// The file pointer to the beginning of line-number entries for the section.
    pub pointer_to_linenumbers: u32,
    /// The number of relocation entries for the section.
    pub number_of_relocations: u16,
    /// The number of line-number entries for the section.
    pub number_of_linenumbers: u16,
    /// The flags that describe the characteristics of the section.
    pub characteristics: u32,
}

impl SectionHeader {
    /// Size of one section header on disk.
    pub const SIZE: usize = 40;

    /// Get the name of a section as a string, without NUL padding.
    pub fn name(&self) -> String {
        let end = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.name.len());
        String::from_utf8_lossy(&self.name[..end]).into_owned()
    }

    /// Returns the Section Characteristics as bitflags
    pub fn flags(&self) -> SectionFlags {
        SectionFlags::from_bits_retain(self.characteristics)
    }

    /// True if `rva` falls inside this section when loaded.
    ///
    /// Some linkers emit `virtual_size == 0`; the larger of the two
    /// size fields decides.
    pub fn contains_rva(&self, rva: u32) -> bool {
        let span = self.virtual_size.max(self.size_of_raw_data);
        rva >= self.virtual_address && (rva - self.virtual_address) < span
    }

    /// Translates an RVA inside this section to a file offset.
    pub fn rva_to_file_offset(&self, rva: u32) -> Option<u32> {
        if !self.contains_rva(rva) {
            return None;
        }
        Some(rva - self.virtual_address + self.pointer_to_raw_data)
    }
}

impl fmt::Display for SectionHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Section Header")?;
        writeln!(f, "--------------")?;
        writeln!(f, "Name:                    {}", self.name())?;
        writeln!(f, "Virtual Size:            {}", self.virtual_size)?;
        writeln!(f, "Virtual Address:         {:#010x}", self.virtual_address)?;
        writeln!(f, "Size of Raw Data:        {}", self.size_of_raw_data)?;
        writeln!(f, "Pointer to Raw Data:     {}", self.pointer_to_raw_data)?;
        writeln!(f, "Characteristics:         {:?}", self.flags())?;

        Ok(())
    }
}

bitflags! {
    /// Bitflags that describe how a section should be loaded
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SectionFlags: u32 {
        /// The section contains executable code.
        const CNT_CODE = 0x0000_0020;
        /// The section contains initialized data.
        const CNT_INITIALIZED_DATA = 0x0000_0040;
        /// The section contains uninitialized data.
        const CNT_UNINITIALIZED_DATA = 0x0000_0080;
        /// The section contains comments or other information.
        const LNK_INFO = 0x0000_0200;
        /// The section will not become part of the image.
        const LNK_REMOVE = 0x0000_0800;
        /// The section contains COMDAT data.
        const LNK_COMDAT = 0x0000_1000;
        /// The section contains data referenced through the global pointer.
        const GPREL = 0x0000_8000;
        /// The section contains extended relocations.
        const LNK_NRELOC_OVFL = 0x0100_0000;
        /// The section can be discarded as needed.
        const MEM_DISCARDABLE = 0x0200_0000;
        /// The section cannot be cached.
        const MEM_NOT_CACHED = 0x0400_0000;
        /// The section is not pageable.
        const MEM_NOT_PAGED = 0x0800_0000;
        /// The section can be shared in memory.
        const MEM_SHARED = 0x1000_0000;
        /// The section can be executed as code.
        const MEM_EXECUTE = 0x2000_0000;
        /// The section can be read.
        const MEM_READ = 0x4000_0000;
        /// The section can be written to.
        const MEM_WRITE = 0x8000_0000;
    }
}
