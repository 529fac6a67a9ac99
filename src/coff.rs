use crate::scribe::Scribe;
use crate::Error;
use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};
use core::fmt;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

/// COFF File Header (Object and Image)
#[derive(Copy, Clone, Pod, Zeroable, Default)]
#[repr(C)]
pub struct CoffFileHeader {
    /// The number that identifies the type of target machine.
    pub machine: u16,
    /// The number of sections. This indicates the size of the section table, which immediately follows the headers.
    pub number_of_sections: u16,
    /// The low 32 bits of the number of seconds since 00:00 January 1, 1970 (a C run-time time_t value), which indicates when the file was created.
    pub time_date_stamp: u32,
    /// The file offset of the COFF symbol table, or zero if no COFF symbol table is present.
    pub pointer_to_symbol_table: u32,
    /// The number of entries in the symbol table.
    pub number_of_symbols: u32,
    /// The size of the optional header, which is required for executable files but not for object files.
    pub size_of_optional_header: u16,
    /// The flags that indicate the attributes of the file.
    pub characteristics: u16,
}

impl CoffFileHeader {
    /// Byte offset of `time_date_stamp` from the start of the header.
    pub const TIME_DATE_STAMP_OFFSET: usize = 4;

    /// Decodes the header at `offset`.
    pub fn parse(binary: &[u8], offset: usize) -> Result<Self, Error> {
        binary.read_pod(offset)
    }

    /// Returns the machine type as an enum
    pub fn machine_type(&self) -> Option<MachineType> {
        MachineType::from_u16(self.machine)
    }

    /// Returns the Characteristics as bitflags
    pub fn characteristics(&self) -> Characteristics {
        Characteristics::from_bits_retain(self.characteristics)
    }

    /// Returns the Unix epoch timestamp as a `DateTime<Utc>`
    pub fn time_date_stamp(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        chrono::DateTime::from_timestamp(self.time_date_stamp.into(), 0)
    }
}

impl fmt::Display for CoffFileHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "COFF Header")?;
        writeln!(f, "-----------")?;
        match self.machine_type() {
            Some(machine) => writeln!(f, "Machine Type:            {machine:?}")?,
            None => writeln!(f, "Machine Type:            {:#06x}", self.machine)?,
        }
        writeln!(f, "Number of Sections:      {}", self.number_of_sections)?;
        match self.time_date_stamp() {
            Some(time) => writeln!(f, "Time Date Stamp:         {time}")?,
            None => writeln!(f, "Time Date Stamp:         {}", self.time_date_stamp)?,
        }
        writeln!(f, "Size of Optional Header: {}", self.size_of_optional_header)?;
        writeln!(f, "Characteristics:         {:?}", self.characteristics())?;

        Ok(())
    }
}

/// The Machine field has one of the following values, which specify the CPU type.
/// An image file can be run only on the specified machine or on a system that emulates the specified machine.
#[derive(FromPrimitive, Debug, PartialEq)]
#[repr(u16)]
pub enum MachineType {
    /// The content of this field is assumed to be applicable to any machine type
    Unknown = 0x0,
    /// Alpha AXP, 32-bit address space
    Alpha = 0x184,
    /// Alpha 64/AXP 64, 64-bit address space
    Alpha64 = 0x284,
    /// Matsushita AM33
    AM33 = 0x1d3,
    /// x64
    AMD64 = 0x8664,
    /// ARM little endian
    ARM = 0x1c0,
    /// ARM64 little endian
    ARM64 = 0xaa64,
    /// ARM Thumb-2 little endian
    ARMNT = 0x1c4,
    /// EFI byte code
    EBC = 0xebc,
    /// Intel 386 or later processors and compatible processors
    I386 = 0x14c,
    /// Intel Itanium processor family
    IA64 = 0x200,
    /// LoongArch 32-bit processor family
    LoongArch32 = 0x6232,
    /// LoongArch 64-bit processor family
    LoongArch64 = 0x6264,
    /// Mitsubishi M32R little endian
    M32R = 0x9041,
    /// MIPS16
    MIPS16 = 0x266,
    /// MIPS with FPU
    MIPSFPU = 0x366,
    /// MIPS16 with FPU
    MIPSFPU16 = 0x466,
    /// Power PC little endian
    PowerPC = 0x1f0,
    /// Power PC with floating point support
    PowerPCFP = 0x1f1,
    /// MIPS little endian
    R4000 = 0x166,
    /// RISC-V 32-bit address space
    RISCV32 = 0x5032,
    /// RISC-V 64-bit address space
    RISCV64 = 0x5064,
    /// RISC-V 128-bit address space
    RISCV128 = 0x5128,
    /// Hitachi SH3
    SH3 = 0x1a2,
    /// Hitachi SH3 DSP
    SH3DSP = 0x1a3,
    /// Hitachi SH4
    SH4 = 0x1a6,
    /// Hitachi SH5
    SH5 = 0x1a8,
    /// Thumb
    Thumb = 0x1c2,
    /// MIPS little-endian WCE v2
    WCEMIPSV2 = 0x169,
}

bitflags! {
    /// The Characteristics field contains flags that indicate attributes of the object or image file.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Characteristics: u16 {
        /// The file does not contain base relocations and must be loaded at its preferred base address.
        const RELOCS_STRIPPED = 0x0001;
        /// The image file is valid and can be run.
        const EXECUTABLE_IMAGE = 0x0002;
        /// COFF line numbers have been removed. Deprecated, should be zero.
        const LINE_NUMS_STRIPPED = 0x0004;
        /// COFF symbol table entries for local symbols have been removed. Deprecated, should be zero.
        const LOCAL_SYMS_STRIPPED = 0x0008;
        /// Obsolete. Aggressively trim working set.
        const AGGRESSIVE_WS_TRIM = 0x0010;
        /// Application can handle > 2-GB addresses.
        const LARGE_ADDRESS_AWARE = 0x0020;
        /// Little endian. Deprecated, should be zero.
        const BYTES_RESERVED_LO = 0x0080;
        /// Machine is based on a 32-bit-word architecture.
        const MACHINE_32BIT = 0x0100;
        /// Debugging information is removed from the image file.
        const DEBUG_STRIPPED = 0x0200;
        /// If the image is on removable media, fully load it and copy it to the swap file.
        const REMOVABLE_RUN_FROM_SWAP = 0x0400;
        /// If the image is on network media, fully load it and copy it to the swap file.
        const NET_RUN_FROM_SWAP = 0x0800;
        /// The image file is a system file, not a user program.
        const SYSTEM = 0x1000;
        /// The image file is a dynamic-link library (DLL).
        const DLL = 0x2000;
        /// The file should be run only on a uniprocessor machine.
        const UP_SYSTEM_ONLY = 0x4000;
        /// Big endian. Deprecated, should be zero.
        const BYTES_RESERVED_HI = 0x8000;
    }
}
