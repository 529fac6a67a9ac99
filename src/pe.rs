use crate::block::{Block, BlockList};
use crate::coff::CoffFileHeader;
use crate::mapped::MappedImage;
use crate::optional::{
    DataDirectories, DirectoryType, Magic, OptionalHeader32, OptionalHeader64, CHECKSUM_OFFSET,
};
use crate::resource::{self, ResourceEntry, RT_VERSION};
use crate::scribe::Scribe;
use crate::section::{parse_section_table, SectionHeader};
use crate::version::VersionString;
use crate::versioninfo::{FixedFileInfo, StringField, VersionField, VsVersionInfo};
use crate::Error;
use bytemuck::{Pod, Zeroable};
use log::{debug, warn};
use num_traits::FromPrimitive;
use std::io::{self, Write};
use std::path::Path;

const DOS_MAGIC: u16 = 0x5a4d; // "MZ"
const NT_SIGNATURE: u32 = 0x0000_4550; // "PE\0\0"
const PE_SIGNATURE_OFFSET: usize = 0x3c;
const NT_SIGNATURE_SIZE: usize = 4;

const IMAGE_DEBUG_TYPE_CODEVIEW: u32 = 2;
const CODEVIEW_RSDS: u32 = 0x5344_5352; // "RSDS" read as a little-endian DWORD

// ImgDelayDescr.grAttrs value meaning all fields are RVAs
const DELAY_LOAD_ATTRS_RVA: u32 = 1;

/// IMAGE_IMPORT_DESCRIPTOR record.
#[derive(Copy, Clone, Pod, Zeroable, Default)]
#[repr(C)]
struct ImportDescriptor {
    characteristics: u32,
    time_date_stamp: u32,
    forwarder_chain: u32,
    name: u32,
    first_thunk: u32,
}

/// ImgDelayDescr record (delayimp.h).
#[derive(Copy, Clone, Pod, Zeroable, Default)]
#[repr(C)]
struct DelayDescriptor {
    attributes: u32,
    name_rva: u32,
    module_handle_rva: u32,
    iat_rva: u32,
    int_rva: u32,
    bound_iat_rva: u32,
    unload_iat_rva: u32,
    time_stamp: u32,
}

/// IMAGE_DEBUG_DIRECTORY record.
#[derive(Copy, Clone, Pod, Zeroable, Default)]
#[repr(C)]
struct DebugDirectoryEntry {
    characteristics: u32,
    time_date_stamp: u32,
    major_version: u16,
    minor_version: u16,
    entry_type: u32,
    size_of_data: u32,
    address_of_raw_data: u32,
    pointer_to_raw_data: u32,
}

impl DebugDirectoryEntry {
    const SIZE: usize = 28;
}

#[derive(Copy, Clone, Pod, Zeroable, Default)]
#[repr(C)]
struct Guid {
    data1: u32,
    data2: u16,
    data3: u16,
    data4: [u8; 8],
}

// Canonical brace-and-dash form, e.g.
// {3F2504E0-4F89-11D3-9A0C-0305E82C3301}
fn format_guid(guid: &Guid) -> String {
    format!(
        "{{{:08X}-{:04X}-{:04X}-{:02X}{:02X}-{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}}}",
        guid.data1,
        guid.data2,
        guid.data3,
        guid.data4[0],
        guid.data4[1],
        guid.data4[2],
        guid.data4[3],
        guid.data4[4],
        guid.data4[5],
        guid.data4[6],
        guid.data4[7],
    )
}

/// Byte ranges of the mapping that may be rewritten in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModifiableKind {
    /// The file-version DWORD pair in `VS_FIXEDFILEINFO`.
    FileVersion,
    /// The product-version DWORD pair in `VS_FIXEDFILEINFO`.
    ProductVersion,
    /// The UTF-16 `FileVersion` value slot in a string table.
    FileVersionString,
    /// The UTF-16 `ProductVersion` value slot in a string table.
    ProductVersionString,
    /// The security data-directory entry in the optional header.
    SignatureDirectory,
}

/// Memory-mapped reader for one PE binary.
///
/// Opening parses headers and the directories of interest and
/// classifies every known byte range as *interesting* (content) or
/// *ignored* (linker noise: timestamps, checksum, debug identifiers,
/// signatures, version fields). Parse failures leave the reader
/// queryable; check [`is_valid_pe`](Self::is_valid_pe) before trusting
/// parsed data.
pub struct PeReader {
    image: MappedImage,

    valid_pe: bool,
    corrupted: bool,
    pe32_plus: bool,
    signed: bool,

    coff: CoffFileHeader,
    optional_header_32: Option<OptionalHeader32>,
    optional_header_64: Option<OptionalHeader64>,
    directories: DataDirectories,
    section_table: Vec<SectionHeader>,

    pdb_path: String,
    pdb_guid: String,
    file_version: String,

    resources: Option<ResourceEntry>,
    dll_imports: Vec<String>,
    delayed_dll_imports: Vec<String>,

    ignored: BlockList,
    interesting: BlockList,
    resource_blocks: BlockList,
    sections: BlockList,
    modifiable: Vec<(ModifiableKind, Block)>,
}

impl PeReader {
    /// Opens and maps `path`, then parses it.
    ///
    /// Only file-level problems (missing file, directory, mapping
    /// failure) are returned as errors; format problems are recorded
    /// in the reader's flags.
    pub fn open<P: AsRef<Path>>(path: P, read_write: bool) -> Result<Self, Error> {
        let image = MappedImage::open(path, read_write)?;

        let mut reader = Self {
            image,
            valid_pe: false,
            corrupted: false,
            pe32_plus: false,
            signed: false,
            coff: CoffFileHeader::default(),
            optional_header_32: None,
            optional_header_64: None,
            directories: DataDirectories::default(),
            section_table: Vec::new(),
            pdb_path: String::new(),
            pdb_guid: String::new(),
            file_version: String::new(),
            resources: None,
            dll_imports: Vec::new(),
            delayed_dll_imports: Vec::new(),
            ignored: BlockList::default(),
            interesting: BlockList::default(),
            resource_blocks: BlockList::default(),
            sections: BlockList::default(),
            modifiable: Vec::new(),
        };

        if let Err(err) = reader.initialize() {
            warn!(
                "{}: initialize failed: {err}",
                reader.image.path().display()
            );
            reader.valid_pe = false;
            if matches!(err, Error::Corrupted(_)) {
                reader.corrupted = true;
            }
        }

        Ok(reader)
    }

    /// True when headers and all directories parsed cleanly.
    pub fn is_valid_pe(&self) -> bool {
        self.valid_pe
    }

    /// True when some structure points outside the file.
    pub fn is_corrupted(&self) -> bool {
        self.corrupted
    }

    /// True for PE32+ (64-bit) images.
    pub fn is_64bit(&self) -> bool {
        self.pe32_plus
    }

    /// True when the security directory references a signature blob.
    pub fn is_signed(&self) -> bool {
        self.signed
    }

    /// Size of the mapped file in bytes.
    pub fn file_size(&self) -> usize {
        self.image.len()
    }

    /// Path the reader was opened from.
    pub fn path(&self) -> &Path {
        self.image.path()
    }

    /// The mapped bytes.
    pub fn bytes(&self) -> &[u8] {
        self.image.bytes()
    }

    /// PDB path from the CodeView debug record, empty if none.
    pub fn pdb_path(&self) -> &str {
        &self.pdb_path
    }

    /// PDB GUID in canonical brace form, empty if none.
    pub fn pdb_guid(&self) -> &str {
        &self.pdb_guid
    }

    /// File version from the version resource, empty if none.
    pub fn file_version(&self) -> &str {
        &self.file_version
    }

    /// Imported DLL names in import-table order.
    pub fn dll_imports(&self) -> &[String] {
        &self.dll_imports
    }

    /// Delay-loaded DLL names.
    pub fn delayed_dll_imports(&self) -> &[String] {
        &self.delayed_dll_imports
    }

    /// Normal imports followed by delay-loaded imports.
    pub fn all_dll_imports(&self) -> Vec<String> {
        let mut imports = self.dll_imports.clone();
        imports.extend(self.delayed_dll_imports.iter().cloned());
        imports
    }

    /// Root of the resource tree, if the binary has one.
    pub fn resource_directory(&self) -> Option<&ResourceEntry> {
        self.resources.as_ref()
    }

    /// Linker version from the optional header.
    pub fn linker_version(&self) -> Option<(u8, u8)> {
        if let Some(header) = &self.optional_header_32 {
            return Some((header.major_linker_version, header.minor_linker_version));
        }
        self.optional_header_64
            .as_ref()
            .map(|header| (header.major_linker_version, header.minor_linker_version))
    }

    /// Ranges that do not affect functional equivalence.
    pub fn ignored(&self) -> &BlockList {
        &self.ignored
    }

    /// Ranges whose bytes carry meaning.
    pub fn interesting(&self) -> &BlockList {
        &self.interesting
    }

    /// One block per resource-leaf payload.
    pub fn resource_blocks(&self) -> &BlockList {
        &self.resource_blocks
    }

    /// One block per section, named after the section.
    pub fn sections(&self) -> &BlockList {
        &self.sections
    }

    /// In-place writable ranges, keyed by what they hold.
    pub fn modifiable(&self) -> &[(ModifiableKind, Block)] {
        &self.modifiable
    }

    /// Manually marks a range as irrelevant when comparing binaries.
    pub fn add_ignored_range(&mut self, block: Block) {
        self.ignored.push(block);
    }

    /// Manually marks a list of ranges as irrelevant when comparing
    /// binaries.
    pub fn add_ignored_ranges(&mut self, blocks: &BlockList) {
        self.ignored.extend(blocks);
    }

    /// Raw contents of a named PE section.
    ///
    /// Can be used to look at custom sections (`#pragma section`)
    /// among other things.
    pub fn section_data(&self, name: &str) -> Result<&[u8], Error> {
        let section = self
            .section_table
            .iter()
            .find(|section| section.name() == name)
            .ok_or_else(|| Error::SectionMissing(name.to_string()))?;

        self.image.bytes().read_slice(
            section.pointer_to_raw_data as usize,
            section.size_of_raw_data as usize,
        )
    }

    /// Payload bytes of the resource at `path`.
    ///
    /// A directory with a single child stands for that child, so
    /// `16/1` finds a version resource with one language.
    pub fn resource_data(&self, path: &str) -> Result<&[u8], Error> {
        let missing = || Error::ResourceMissing(path.to_string());

        let root = self.resources.as_ref().ok_or_else(missing)?;
        let node = root.at(path).ok_or_else(missing)?;
        let node = if node.is_data() {
            node
        } else {
            node.sole_child()
                .filter(|child| child.is_data())
                .ok_or_else(missing)?
        };
        node.data(self.image.bytes()).ok_or_else(missing)
    }

    /// True when the binary embeds a manifest resource (`RT_MANIFEST`).
    pub fn has_manifest(&self) -> bool {
        self.resources
            .as_ref()
            .and_then(|root| root.at(&resource::RT_MANIFEST.to_string()))
            .is_some()
    }

    // ----------------------------------------------------------------

    fn initialize(&mut self) -> Result<(), Error> {
        let bytes = self.image.bytes();

        if bytes.read_u16(0)? != DOS_MAGIC {
            return Err(Error::NotPe);
        }
        let e_lfanew = bytes.read_u32(PE_SIGNATURE_OFFSET)? as usize;
        if bytes.read_u32(e_lfanew)? != NT_SIGNATURE {
            return Err(Error::NotPe);
        }

        let coff_offset = e_lfanew + NT_SIGNATURE_SIZE;
        self.coff = CoffFileHeader::parse(bytes, coff_offset)?;

        let optional_offset = coff_offset + core::mem::size_of::<CoffFileHeader>();
        let magic = Magic::from_u16(bytes.read_u16(optional_offset)?).ok_or(Error::NotPe)?;

        let directories_offset;
        let directory_count;
        match magic {
            Magic::PE32 => {
                let header = OptionalHeader32::parse(bytes, optional_offset)?;
                directories_offset = optional_offset + OptionalHeader32::SIZE;
                directory_count = header.number_of_rva_and_sizes as usize;
                self.optional_header_32 = Some(header);
                self.pe32_plus = false;
            }
            Magic::PE64 => {
                let header = OptionalHeader64::parse(bytes, optional_offset)?;
                directories_offset = optional_offset + OptionalHeader64::SIZE;
                directory_count = header.number_of_rva_and_sizes as usize;
                self.optional_header_64 = Some(header);
                self.pe32_plus = true;
            }
        }
        self.directories = DataDirectories::parse(bytes, directories_offset, directory_count)?;

        self.interesting.push(Block::new("DOS stub", 0, e_lfanew));
        self.interesting.push(Block::new(
            "PE header",
            e_lfanew,
            NT_SIGNATURE_SIZE
                + core::mem::size_of::<CoffFileHeader>()
                + self.coff.size_of_optional_header as usize,
        ));
        self.ignored.push(Block::new(
            "PE timestamp",
            coff_offset + CoffFileHeader::TIME_DATE_STAMP_OFFSET,
            4,
        ));
        self.ignored.push(Block::new(
            "PE checksum",
            optional_offset + CHECKSUM_OFFSET,
            4,
        ));

        // headers are sound from here on
        self.valid_pe = true;

        let section_table_offset = optional_offset + self.coff.size_of_optional_header as usize;
        self.read_sections(section_table_offset)?;
        self.read_imports_directory()?;
        self.read_exports_directory()?;
        self.read_debug_directory()?;
        self.read_signature_directory()?;
        self.read_resource_directory()?;

        Ok(())
    }

    fn read_sections(&mut self, table_offset: usize) -> Result<(), Error> {
        let bytes = self.image.bytes();

        self.interesting.push(Block::new(
            "Section headers",
            table_offset,
            usize::from(self.coff.number_of_sections) * SectionHeader::SIZE,
        ));

        self.section_table = parse_section_table(bytes, table_offset, self.coff.number_of_sections);
        if self.section_table.len() != usize::from(self.coff.number_of_sections) {
            return Err(Error::Corrupted("section table past end of file"));
        }

        for section in &self.section_table {
            let block = Block::new(
                section.name(),
                section.pointer_to_raw_data as usize,
                section.size_of_raw_data as usize,
            );
            self.sections.push(block.clone());
            self.interesting.push(block);
        }

        Ok(())
    }

    fn find_file_offset(&self, rva: u32) -> Option<usize> {
        self.section_table
            .iter()
            .find_map(|section| section.rva_to_file_offset(rva))
            .map(|offset| offset as usize)
    }

    fn read_imports_directory(&mut self) -> Result<(), Error> {
        let Some(import_dir) = self.directories.entry(DirectoryType::Import) else {
            return Ok(());
        };
        let Some(table_offset) = self.find_file_offset(import_dir.virtual_address) else {
            return Err(Error::Corrupted("import directory outside any section"));
        };

        let bytes = self.image.bytes();
        let mut offset = table_offset;
        loop {
            let descriptor: ImportDescriptor = bytes.read_pod(offset)?;
            if descriptor.characteristics == 0 {
                break;
            }
            let Some(name_offset) = self.find_file_offset(descriptor.name) else {
                return Err(Error::Corrupted("import name outside any section"));
            };
            self.dll_imports.push(bytes.read_cstr(name_offset)?);
            offset += core::mem::size_of::<ImportDescriptor>();
        }

        let Some(delay_dir) = self.directories.entry(DirectoryType::DelayImport) else {
            return Ok(());
        };
        let Some(table_offset) = self.find_file_offset(delay_dir.virtual_address) else {
            return Err(Error::Corrupted("delay-import directory outside any section"));
        };

        let mut offset = table_offset;
        loop {
            let descriptor: DelayDescriptor = bytes.read_pod(offset)?;
            if descriptor.attributes != DELAY_LOAD_ATTRS_RVA || descriptor.name_rva == 0 {
                break;
            }
            let Some(name_offset) = self.find_file_offset(descriptor.name_rva) else {
                return Err(Error::Corrupted("delay-import name outside any section"));
            };
            self.delayed_dll_imports.push(bytes.read_cstr(name_offset)?);
            offset += core::mem::size_of::<DelayDescriptor>();
        }

        Ok(())
    }

    fn read_exports_directory(&mut self) -> Result<(), Error> {
        let Some(export_dir) = self.directories.entry(DirectoryType::Export) else {
            return Ok(());
        };
        let Some(offset) = self.find_file_offset(export_dir.virtual_address) else {
            return Err(Error::Corrupted("export directory outside any section"));
        };

        // IMAGE_EXPORT_DIRECTORY.TimeDateStamp sits right after Characteristics
        self.ignored
            .push(Block::new("Export table timestamp", offset + 4, 4));

        Ok(())
    }

    fn read_debug_directory(&mut self) -> Result<(), Error> {
        let Some(debug_dir) = self.directories.entry(DirectoryType::Debug) else {
            return Ok(());
        };
        let Some(table_offset) = self.find_file_offset(debug_dir.virtual_address) else {
            return Err(Error::Corrupted("debug directory outside any section"));
        };

        let bytes = self.image.bytes();
        let count = debug_dir.size as usize / DebugDirectoryEntry::SIZE;

        for i in 0..count {
            let entry_offset = table_offset + i * DebugDirectoryEntry::SIZE;
            let entry: DebugDirectoryEntry = bytes.read_pod(entry_offset)?;

            self.ignored
                .push(Block::new("Debug timestamp", entry_offset + 4, 4));

            if entry.entry_type != IMAGE_DEBUG_TYPE_CODEVIEW {
                continue;
            }

            let payload = entry.pointer_to_raw_data as usize;
            if bytes.read_u32(payload)? != CODEVIEW_RSDS {
                debug!(
                    "{}: CodeView entry without RSDS signature",
                    self.image.path().display()
                );
                continue;
            }

            // RSDSI: DWORD sig, GUID, DWORD age, char szPdb[]
            let guid: Guid = bytes.read_pod(payload + 4)?;
            let path = bytes.read_cstr(payload + 24)?;

            self.ignored.push(Block::new("PDB GUID", payload + 4, 16));
            self.ignored.push(Block::new("PDB age", payload + 20, 4));
            self.ignored
                .push(Block::new("PDB path", payload + 24, path.len() + 1));

            self.pdb_guid = format_guid(&guid);
            self.pdb_path = path;
        }

        Ok(())
    }

    fn read_signature_directory(&mut self) -> Result<(), Error> {
        if !self.directories.contains_slot(DirectoryType::Security) {
            return Ok(());
        }

        let entry_offset = self.directories.entry_offset(DirectoryType::Security);
        let entry_block = Block::new("Signature directory", entry_offset, 8);
        self.ignored.push(entry_block.clone());
        self.modifiable
            .push((ModifiableKind::SignatureDirectory, entry_block));

        let Some(security) = self.directories.entry(DirectoryType::Security) else {
            return Ok(());
        };

        // the security directory holds a file offset, not an RVA
        let blob_offset = security.virtual_address as usize;
        let blob_size = security.size as usize;
        if blob_offset + blob_size > self.image.len() {
            self.signed = false;
            return Err(Error::Corrupted("signature blob past end of file"));
        }

        self.ignored
            .push(Block::new("Signature", blob_offset, blob_size));
        self.signed = true;

        Ok(())
    }

    fn read_resource_directory(&mut self) -> Result<(), Error> {
        let Some(resource_dir) = self.directories.entry(DirectoryType::Resource) else {
            return Ok(());
        };
        let Some(section_offset) = self.find_file_offset(resource_dir.virtual_address) else {
            return Err(Error::Corrupted("resource directory outside any section"));
        };

        let root = resource::parse_resource_directory(
            self.image.bytes(),
            section_offset,
            resource_dir.virtual_address,
            &mut self.resource_blocks,
        )?;
        self.resources = Some(root);

        self.read_version_resources();

        Ok(())
    }

    // Decodes every RT_VERSION leaf; records the in-place version
    // slots and remembers the first file version seen.
    fn read_version_resources(&mut self) {
        let mut slots: Vec<(ModifiableKind, Block)> = Vec::new();
        let mut file_version = String::new();

        if let Some(version_type) = self
            .resources
            .as_ref()
            .and_then(|root| root.at(&RT_VERSION.to_string()))
        {
            for name in version_type.entries().into_iter().flatten().map(|(_, e)| e) {
                let leaves: Vec<&ResourceEntry> = match name.entries() {
                    Some(languages) => languages.values().collect(),
                    None => vec![name],
                };

                for leaf in leaves {
                    let Some((leaf_offset, _)) = leaf.data_location() else {
                        continue;
                    };
                    let Some(data) = leaf.data(self.image.bytes()) else {
                        continue;
                    };

                    let info = VsVersionInfo::parse(data);
                    if !info.is_well_formed() {
                        debug!(
                            "{}: malformed VS_VERSIONINFO at {}",
                            self.image.path().display(),
                            leaf.full_path()
                        );
                        continue;
                    }

                    if file_version.is_empty() {
                        file_version = info.fixed_info().file_version();
                    }

                    let fixed = leaf_offset + info.fixed_info_offset();
                    slots.push((
                        ModifiableKind::FileVersion,
                        Block::new(
                            "VS fixed file version",
                            fixed + FixedFileInfo::FILE_VERSION_OFFSET,
                            8,
                        ),
                    ));
                    slots.push((
                        ModifiableKind::ProductVersion,
                        Block::new(
                            "VS fixed product version",
                            fixed + FixedFileInfo::PRODUCT_VERSION_OFFSET,
                            8,
                        ),
                    ));

                    for (offset, chars) in info.string_slots(StringField::FileVersion) {
                        slots.push((
                            ModifiableKind::FileVersionString,
                            Block::new("VS file version string", leaf_offset + offset, chars * 2),
                        ));
                    }
                    for (offset, chars) in info.string_slots(StringField::ProductVersion) {
                        slots.push((
                            ModifiableKind::ProductVersionString,
                            Block::new(
                                "VS product version string",
                                leaf_offset + offset,
                                chars * 2,
                            ),
                        ));
                    }
                }
            }
        }

        for (kind, block) in slots {
            self.ignored.push(block.clone());
            self.modifiable.push((kind, block));
        }
        if !file_version.is_empty() {
            self.file_version = file_version;
        }
    }

    // ----------------------------------------------------------------

    /// Modifies the file version in place without rebuilding
    /// resources.
    ///
    /// Writes the four version WORDs into the `VS_FIXEDFILEINFO`
    /// pair and overwrites the UTF-16 value slots, right-padding
    /// shorter strings with spaces. Fails with
    /// [`Error::NewValueTooLarge`] when the new string does not fit
    /// an existing slot (a resource rebuild is required then). No
    /// bytes outside the recorded slots are touched.
    pub fn set_version(&mut self, version: &VersionString, field: VersionField) -> Result<(), Error> {
        let (ms, ls) = crate::versioninfo::version_dwords(version);
        let text = version.for_resources();
        let wide: Vec<u16> = text.encode_utf16().collect();

        let targets: Vec<(ModifiableKind, Block)> = self
            .modifiable
            .iter()
            .filter(|(kind, _)| match kind {
                ModifiableKind::FileVersion | ModifiableKind::FileVersionString => {
                    matches!(field, VersionField::Both | VersionField::FileOnly)
                }
                ModifiableKind::ProductVersion | ModifiableKind::ProductVersionString => {
                    matches!(field, VersionField::Both | VersionField::ProductOnly)
                }
                ModifiableKind::SignatureDirectory => false,
            })
            .cloned()
            .collect();

        // no usable VS_VERSIONINFO was found during initialize
        if targets.is_empty() {
            return Err(Error::MalformedVersion);
        }

        // validate string slots before touching anything
        for (kind, block) in &targets {
            if matches!(
                kind,
                ModifiableKind::FileVersionString | ModifiableKind::ProductVersionString
            ) && wide.len() * 2 > block.size
            {
                return Err(Error::NewValueTooLarge {
                    have: block.size,
                    need: wide.len() * 2,
                });
            }
        }

        let bytes = self
            .image
            .bytes_mut()
            .ok_or_else(|| Error::Io(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "reader not opened read-write",
            )))?;

        for (kind, block) in &targets {
            match kind {
                ModifiableKind::FileVersion | ModifiableKind::ProductVersion => {
                    bytes[block.offset..block.offset + 4].copy_from_slice(&ms.to_le_bytes());
                    bytes[block.offset + 4..block.offset + 8].copy_from_slice(&ls.to_le_bytes());
                }
                ModifiableKind::FileVersionString | ModifiableKind::ProductVersionString => {
                    let chars = block.size / 2;
                    for i in 0..chars {
                        let unit = wide.get(i).copied().unwrap_or(b' ' as u16);
                        let at = block.offset + i * 2;
                        bytes[at..at + 2].copy_from_slice(&unit.to_le_bytes());
                    }
                }
                ModifiableKind::SignatureDirectory => {}
            }
        }

        self.image.flush()?;
        Ok(())
    }

    /// Zeroes the security data-directory entry.
    ///
    /// External resource updaters strip the signature blob without
    /// wiping the directory entry; this call fixes the dangling
    /// reference.
    pub fn erase_signature_directory(&mut self) -> Result<(), Error> {
        let targets: Vec<Block> = self
            .modifiable
            .iter()
            .filter(|(kind, _)| *kind == ModifiableKind::SignatureDirectory)
            .map(|(_, block)| block.clone())
            .collect();

        let bytes = self
            .image
            .bytes_mut()
            .ok_or_else(|| Error::Io(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "reader not opened read-write",
            )))?;

        for block in targets {
            bytes[block.offset..block.offset + block.size].fill(0);
        }

        self.image.flush()?;
        Ok(())
    }

    // ----------------------------------------------------------------

    /// Writes a plain-text report of everything the reader learned.
    pub fn write_info<W: Write + ?Sized>(&self, out: &mut W, verbose: bool) -> io::Result<()> {
        writeln!(out, "Valid PE:     {}", self.valid_pe)?;
        if self.corrupted {
            writeln!(out, "Corrupted:    true")?;
        }
        if !self.valid_pe {
            return Ok(());
        }

        writeln!(out, "Format:       {}", if self.pe32_plus { "PE32+" } else { "PE32" })?;
        writeln!(out, "Signed:       {}", self.signed)?;
        if !self.file_version.is_empty() {
            writeln!(out, "File version: {}", self.file_version)?;
        }
        if !self.pdb_guid.is_empty() {
            writeln!(out, "PDB GUID:     {}", self.pdb_guid)?;
            writeln!(out, "PDB path:     {}", self.pdb_path)?;
        }

        if !self.dll_imports.is_empty() {
            writeln!(out, "Imports:")?;
            for import in &self.dll_imports {
                writeln!(out, "\t{import}")?;
            }
        }
        if !self.delayed_dll_imports.is_empty() {
            writeln!(out, "Delay-loaded imports:")?;
            for import in &self.delayed_dll_imports {
                writeln!(out, "\t{import}")?;
            }
        }

        writeln!(out, "Sections:")?;
        for block in self.sections.iter() {
            writeln!(out, "\t{block}")?;
        }

        if verbose {
            writeln!(out)?;
            write!(out, "{}", self.coff)?;
            if let Some(header) = &self.optional_header_32 {
                write!(out, "{header}")?;
            }
            if let Some(header) = &self.optional_header_64 {
                write!(out, "{header}")?;
            }

            writeln!(out, "Interesting ranges:")?;
            for block in self.interesting.iter() {
                writeln!(out, "\t{block}")?;
            }
            writeln!(out, "Ignored ranges:")?;
            for block in self.ignored.iter() {
                writeln!(out, "\t{block}")?;
            }
            if let Some(root) = &self.resources {
                writeln!(out, "Resources:")?;
                write!(out, "{root}")?;
            }
        }

        Ok(())
    }
}
