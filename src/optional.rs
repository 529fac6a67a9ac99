use crate::scribe::Scribe;
use crate::Error;
use bytemuck::{Pod, Zeroable};
use core::fmt;
use num_derive::FromPrimitive;

/// Magic values that determine if an Optional Header is
/// PE32 (32-bit) or PE32+ (64-bit)
#[derive(FromPrimitive, Debug, Clone, Copy, PartialEq)]
#[repr(u16)]
pub enum Magic {
    /// Magic value for 32-bit PEs
    PE32 = 0x10b,
    /// Magic value for 64-bit PEs
    PE64 = 0x20b,
}

/// Each data directory gives the address and size of a table or string that Windows uses.
/// A data directory is an 8-byte field with an RVA and a size.
#[derive(Copy, Clone, Pod, Zeroable, Default, Debug, PartialEq)]
#[repr(C)]
pub struct DataDirectory {
    /// RVA of the table, relative to the image base when loaded.
    /// The security directory is the exception: its value is a file offset.
    pub virtual_address: u32,
    /// Size of the table in bytes.
    pub size: u32,
}

impl DataDirectory {
    /// Size of one directory entry on disk.
    pub const SIZE: usize = 8;

    /// True when both fields are zero, i.e. the directory is absent.
    pub fn is_empty(&self) -> bool {
        self.virtual_address == 0 && self.size == 0
    }
}

/// Indices into the optional header's data-directory table.
#[derive(Debug, Clone, Copy, PartialEq)]
#[repr(usize)]
pub enum DirectoryType {
    /// The export table (.edata).
    Export = 0,
    /// The import table (.idata).
    Import = 1,
    /// The resource table (.rsrc).
    Resource = 2,
    /// The attribute certificate table (Authenticode signature blob).
    Security = 4,
    /// The debug data (.debug).
    Debug = 6,
    /// The delay import descriptor.
    DelayImport = 13,
}

/// The data-directory table that trails the optional header's fixed
/// part. Only `number_of_rva_and_sizes` entries exist on disk.
#[derive(Default)]
pub struct DataDirectories {
    entries: Vec<DataDirectory>,
    file_offset: usize,
}

impl DataDirectories {
    /// Reads `count` directory entries starting at `offset`.
    pub fn parse(binary: &[u8], offset: usize, count: usize) -> Result<Self, Error> {
        // 16 is all the PE format defines; higher counts are garbage
        let count = count.min(16);
        let mut entries = Vec::with_capacity(count);
        for i in 0..count {
            entries.push(binary.read_pod(offset + i * DataDirectory::SIZE)?);
        }
        Ok(Self {
            entries,
            file_offset: offset,
        })
    }

    /// Returns a directory entry, or `None` if the table is too short
    /// or the entry is all zeroes.
    pub fn entry(&self, which: DirectoryType) -> Option<DataDirectory> {
        self.entries
            .get(which as usize)
            .copied()
            .filter(|dir| !dir.is_empty())
    }

    /// True when the table is long enough to hold `which` at all.
    pub fn contains_slot(&self, which: DirectoryType) -> bool {
        (which as usize) < self.entries.len()
    }

    /// File offset of a directory entry itself (not its target).
    pub fn entry_offset(&self, which: DirectoryType) -> usize {
        self.file_offset + (which as usize) * DataDirectory::SIZE
    }

    /// Total size of the table on disk.
    pub fn byte_len(&self) -> usize {
        self.entries.len() * DataDirectory::SIZE
    }
}

/// PE32 Optional Header fixed part (Image Only). The data directories
/// follow it on disk and are parsed separately.
#[derive(Copy, Clone, Pod, Zeroable, Default)]
#[repr(C)]
pub struct OptionalHeader32 {
    /// The unsigned integer that identifies the state of the image file.
    pub magic: u16,
    /// The linker major version number.
    pub major_linker_version: u8,
    /// The linker minor version number.
    pub minor_linker_version: u8,
    /// The size of the code (text) section, or the sum of all code sections.
    pub size_of_code: u32,
    /// The size of the initialized data section.
    pub size_of_initialized_data: u32,
    /// The size of the uninitialized data section (BSS).
    pub size_of_uninitialized_data: u32,
    /// The address of the entry point relative to the image base.
    pub address_of_entry_point: u32,
    /// The address relative to the image base of the beginning-of-code section.
    pub base_of_code: u32,
    /// (PE32 Only) The address relative to the image base of the beginning-of-data section.
    pub base_of_data: u32,
    /// The preferred address of the first byte of image when loaded into memory.
    pub image_base: u32,
    /// The alignment (in bytes) of sections when they are loaded into memory.
    pub section_alignment: u32,
    /// The alignment factor (in bytes) used to align the raw data of sections.
    pub file_alignment: u32,
    /// The major version number of the required operating system.
    pub major_operating_system_version: u16,
    /// The minor version number of the required operating system.
    pub minor_operating_system_version: u16,
    /// The major version number of the image.
    pub major_image_version: u16,
    /// The minor version number of the image.
    pub minor_image_version: u16,
    /// The major version number of the subsystem.
    pub major_subsystem_version: u16,
    /// The minor version number of the subsystem.
    pub minor_subsystem_version: u16,
    /// Reserved, must be zero.
    pub win32_version_value: u32,
    /// The size (in bytes) of the image as loaded in memory.
    pub size_of_image: u32,
    /// The combined size of the MS-DOS stub, PE header, and section headers.
    pub size_of_headers: u32,
    /// The image file checksum, computed by the linker.
    pub check_sum: u32,
    /// The subsystem that is required to run this image.
    pub subsystem: u16,
    /// DLL characteristics flags.
    pub dll_characteristics: u16,
    /// The size of the stack to reserve.
    pub size_of_stack_reserve: u32,
    /// The size of the stack to commit.
    pub size_of_stack_commit: u32,
    /// The size of the local heap space to reserve.
    pub size_of_heap_reserve: u32,
    /// The size of the local heap space to commit.
    pub size_of_heap_commit: u32,
    /// Reserved, must be zero.
    pub loader_flags: u32,
    /// The number of data-directory entries that follow.
    pub number_of_rva_and_sizes: u32,
}

/// PE32+ Optional Header fixed part (Image Only).
#[derive(Copy, Clone, Pod, Zeroable, Default)]
#[repr(C)]
pub struct OptionalHeader64 {
    /// The unsigned integer that identifies the state of the image file.
    pub magic: u16,
    /// The linker major version number.
    pub major_linker_version: u8,
    /// The linker minor version number.
    pub minor_linker_version: u8,
    /// The size of the code (text) section, or the sum of all code sections.
    pub size_of_code: u32,
    /// The size of the initialized data section.
    pub size_of_initialized_data: u32,
    /// The size of the uninitialized data section (BSS).
    pub size_of_uninitialized_data: u32,
    /// The address of the entry point relative to the image base.
    pub address_of_entry_point: u32,
    /// The address relative to the image base of the beginning-of-code section.
    pub base_of_code: u32,
    /// The preferred address of the first byte of image when loaded into memory.
    pub image_base: u64,
    /// The alignment (in bytes) of sections when they are loaded into memory.
    pub section_alignment: u32,
    /// The alignment factor (in bytes) used to align the raw data of sections.
    pub file_alignment: u32,
    /// The major version number of the required operating system.
    pub major_operating_system_version: u16,
    /// The minor version number of the required operating system.
    pub minor_operating_system_version: u16,
    /// The major version number of the image.
    pub major_image_version: u16,
    /// The minor version number of the image.
    pub minor_image_version: u16,
    /// The major version number of the subsystem.
    pub major_subsystem_version: u16,
    /// The minor version number of the subsystem.
    pub minor_subsystem_version: u16,
    /// Reserved, must be zero.
    pub win32_version_value: u32,
    /// The size (in bytes) of the image as loaded in memory.
    pub size_of_image: u32,
    /// The combined size of the MS-DOS stub, PE header, and section headers.
    pub size_of_headers: u32,
    /// The image file checksum, computed by the linker.
    pub check_sum: u32,
    /// The subsystem that is required to run this image.
    pub subsystem: u16,
    /// DLL characteristics flags.
    pub dll_characteristics: u16,
    /// The size of the stack to reserve.
    pub size_of_stack_reserve: u64,
    /// The size of the stack to commit.
    pub size_of_stack_commit: u64,
    /// The size of the local heap space to reserve.
    pub size_of_heap_reserve: u64,
    /// The size of the local heap space to commit.
    pub size_of_heap_commit: u64,
    /// Reserved, must be zero.
    pub loader_flags: u32,
    /// The number of data-directory entries that follow.
    pub number_of_rva_and_sizes: u32,
}

/// Byte offset of `check_sum` in either optional header flavor.
pub const CHECKSUM_OFFSET: usize = 64;

impl OptionalHeader32 {
    /// Size of the fixed part on disk.
    pub const SIZE: usize = 96;

    /// Decodes the fixed part at `offset`.
    pub fn parse(binary: &[u8], offset: usize) -> Result<Self, Error> {
        binary.read_pod(offset)
    }
}

impl OptionalHeader64 {
    /// Size of the fixed part on disk.
    pub const SIZE: usize = 112;

    /// Decodes the fixed part at `offset`.
    pub fn parse(binary: &[u8], offset: usize) -> Result<Self, Error> {
        binary.read_pod(offset)
    }
}

impl fmt::Display for OptionalHeader32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Optional Header (PE32)")?;
        writeln!(f, "----------------------")?;
        writeln!(f, "Linker Version:          {}.{}", self.major_linker_version, self.minor_linker_version)?;
        writeln!(f, "Address of Entry Point:  {:#010x}", self.address_of_entry_point)?;
        writeln!(f, "Image Base:              {:#010x}", self.image_base)?;
        writeln!(f, "Section Alignment:       {:#x}", self.section_alignment)?;
        writeln!(f, "File Alignment:          {:#x}", self.file_alignment)?;
        writeln!(f, "Size of Image:           {}", self.size_of_image)?;
        writeln!(f, "Size of Headers:         {}", self.size_of_headers)?;
        writeln!(f, "Checksum:                {:#010x}", self.check_sum)?;
        writeln!(f, "Subsystem:               {}", self.subsystem)?;

        Ok(())
    }
}

impl fmt::Display for OptionalHeader64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Optional Header (PE32+)")?;
        writeln!(f, "-----------------------")?;
        writeln!(f, "Linker Version:          {}.{}", self.major_linker_version, self.minor_linker_version)?;
        writeln!(f, "Address of Entry Point:  {:#010x}", self.address_of_entry_point)?;
        writeln!(f, "Image Base:              {:#018x}", self.image_base)?;
        writeln!(f, "Section Alignment:       {:#x}", self.section_alignment)?;
        writeln!(f, "File Alignment:          {:#x}", self.file_alignment)?;
        writeln!(f, "Size of Image:           {}", self.size_of_image)?;
        writeln!(f, "Size of Headers:         {}", self.size_of_headers)?;
        writeln!(f, "Checksum:                {:#010x}", self.check_sum)?;
        writeln!(f, "Subsystem:               {}", self.subsystem)?;

        Ok(())
    }
}
