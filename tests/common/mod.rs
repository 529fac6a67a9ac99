//! Builds minimal but structurally honest PE32 images for tests, so
//! no binary fixtures need to live in the repository.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

pub const FILE_ALIGNMENT: usize = 0x200;
pub const NT_OFFSET: usize = 0x80;
pub const FIRST_SECTION_OFFSET: usize = 0x200;

pub const DIR_EXPORT: usize = 0;
pub const DIR_IMPORT: usize = 1;
pub const DIR_RESOURCE: usize = 2;
pub const DIR_SECURITY: usize = 4;
pub const DIR_DEBUG: usize = 6;
pub const DIR_DELAY_IMPORT: usize = 13;

pub fn file_align(value: usize) -> usize {
    (value + FILE_ALIGNMENT - 1) & !(FILE_ALIGNMENT - 1)
}

struct Section {
    name: [u8; 8],
    rva: u32,
    data: Vec<u8>,
}

/// Assembles a PE32 image from sections, data-directory entries and
/// an optional overlay (for signature blobs).
pub struct PeBuilder {
    timestamp: u32,
    checksum: u32,
    sections: Vec<Section>,
    directories: [(u32, u32); 16],
    overlay: Vec<u8>,
}

impl PeBuilder {
    pub fn new() -> Self {
        Self {
            timestamp: 0x5f00_0000,
            checksum: 0x0001_2345,
            sections: Vec::new(),
            directories: [(0, 0); 16],
            overlay: Vec::new(),
        }
    }

    pub fn timestamp(mut self, timestamp: u32) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn checksum(mut self, checksum: u32) -> Self {
        self.checksum = checksum;
        self
    }

    pub fn section(mut self, name: &str, rva: u32, data: Vec<u8>) -> Self {
        let mut fixed = [0u8; 8];
        fixed[..name.len()].copy_from_slice(name.as_bytes());
        self.sections.push(Section {
            name: fixed,
            rva,
            data,
        });
        self
    }

    pub fn directory(mut self, index: usize, rva: u32, size: u32) -> Self {
        self.directories[index] = (rva, size);
        self
    }

    pub fn overlay(mut self, bytes: Vec<u8>) -> Self {
        self.overlay = bytes;
        self
    }

    /// File offset each section's raw data will land at.
    pub fn section_offsets(&self) -> Vec<usize> {
        let mut offsets = Vec::new();
        let mut at = FIRST_SECTION_OFFSET;
        for section in &self.sections {
            offsets.push(at);
            at += file_align(section.data.len());
        }
        offsets
    }

    /// File offset the overlay will land at.
    pub fn overlay_offset(&self) -> usize {
        FIRST_SECTION_OFFSET
            + self
                .sections
                .iter()
                .map(|section| file_align(section.data.len()))
                .sum::<usize>()
    }

    pub fn build(self) -> Vec<u8> {
        let mut image = Vec::new();

        // IMAGE_DOS_HEADER: e_magic plus e_lfanew is all the reader
        // touches; the stub is zero padding.
        image.extend_from_slice(b"MZ");
        image.resize(0x3c, 0);
        image.extend_from_slice(&(NT_OFFSET as u32).to_le_bytes());
        image.resize(NT_OFFSET, 0);

        image.extend_from_slice(b"PE\0\0");

        // COFF file header
        image.extend_from_slice(&0x014cu16.to_le_bytes()); // i386
        image.extend_from_slice(&(self.sections.len() as u16).to_le_bytes());
        image.extend_from_slice(&self.timestamp.to_le_bytes());
        image.extend_from_slice(&0u32.to_le_bytes());
        image.extend_from_slice(&0u32.to_le_bytes());
        image.extend_from_slice(&224u16.to_le_bytes()); // 96 + 16 * 8
        image.extend_from_slice(&0x0102u16.to_le_bytes());

        let size_of_image = self
            .sections
            .iter()
            .map(|section| section.rva as usize + ((section.data.len() + 0xfff) & !0xfff))
            .max()
            .unwrap_or(0x1000);

        // Optional header (PE32)
        image.extend_from_slice(&0x10bu16.to_le_bytes());
        image.push(14); // linker 14.29
        image.push(29);
        image.extend_from_slice(&0x200u32.to_le_bytes()); // size of code
        image.extend_from_slice(&0x200u32.to_le_bytes());
        image.extend_from_slice(&0u32.to_le_bytes());
        image.extend_from_slice(&0x1000u32.to_le_bytes()); // entry point
        image.extend_from_slice(&0x1000u32.to_le_bytes()); // base of code
        image.extend_from_slice(&0x2000u32.to_le_bytes()); // base of data
        image.extend_from_slice(&0x0040_0000u32.to_le_bytes()); // image base
        image.extend_from_slice(&0x1000u32.to_le_bytes()); // section alignment
        image.extend_from_slice(&(FILE_ALIGNMENT as u32).to_le_bytes());
        image.extend_from_slice(&6u16.to_le_bytes()); // os version
        image.extend_from_slice(&0u16.to_le_bytes());
        image.extend_from_slice(&0u16.to_le_bytes()); // image version
        image.extend_from_slice(&0u16.to_le_bytes());
        image.extend_from_slice(&6u16.to_le_bytes()); // subsystem version
        image.extend_from_slice(&0u16.to_le_bytes());
        image.extend_from_slice(&0u32.to_le_bytes()); // win32 version value
        image.extend_from_slice(&(size_of_image as u32).to_le_bytes());
        image.extend_from_slice(&(FIRST_SECTION_OFFSET as u32).to_le_bytes()); // size of headers
        image.extend_from_slice(&self.checksum.to_le_bytes());
        image.extend_from_slice(&3u16.to_le_bytes()); // console subsystem
        image.extend_from_slice(&0u16.to_le_bytes()); // dll characteristics
        image.extend_from_slice(&0x0010_0000u32.to_le_bytes()); // stack reserve
        image.extend_from_slice(&0x1000u32.to_le_bytes()); // stack commit
        image.extend_from_slice(&0x0010_0000u32.to_le_bytes()); // heap reserve
        image.extend_from_slice(&0x1000u32.to_le_bytes()); // heap commit
        image.extend_from_slice(&0u32.to_le_bytes()); // loader flags
        image.extend_from_slice(&16u32.to_le_bytes()); // rva-and-size count

        for (rva, size) in self.directories {
            image.extend_from_slice(&rva.to_le_bytes());
            image.extend_from_slice(&size.to_le_bytes());
        }

        // section headers
        let offsets = self.section_offsets();
        for (section, offset) in self.sections.iter().zip(&offsets) {
            image.extend_from_slice(&section.name);
            image.extend_from_slice(&(section.data.len() as u32).to_le_bytes());
            image.extend_from_slice(&section.rva.to_le_bytes());
            image.extend_from_slice(&(file_align(section.data.len()) as u32).to_le_bytes());
            image.extend_from_slice(&(*offset as u32).to_le_bytes());
            image.extend_from_slice(&[0u8; 12]); // relocations, line numbers
            image.extend_from_slice(&0x6000_0020u32.to_le_bytes());
        }

        assert!(
            image.len() <= FIRST_SECTION_OFFSET,
            "too many sections for the fixed header area"
        );
        image.resize(FIRST_SECTION_OFFSET, 0);
        for section in &self.sections {
            image.extend_from_slice(&section.data);
            image.resize(file_align(image.len()), 0);
        }

        image.extend_from_slice(&self.overlay);
        image
    }
}

// ------------------------------------------------------------------
// section payloads

/// Import table bytes for a section mapped at `rva`: descriptors
/// followed by DLL name strings.
pub fn import_section(rva: u32, dlls: &[&str]) -> Vec<u8> {
    let descriptor_bytes = (dlls.len() + 1) * 20;
    let mut names = Vec::new();
    let mut name_rvas = Vec::new();
    for dll in dlls {
        name_rvas.push(rva + descriptor_bytes as u32 + names.len() as u32);
        names.extend_from_slice(dll.as_bytes());
        names.push(0);
    }

    let mut data = Vec::new();
    for name_rva in name_rvas {
        data.extend_from_slice(&1u32.to_le_bytes()); // original first thunk
        data.extend_from_slice(&0u32.to_le_bytes()); // timestamp
        data.extend_from_slice(&0u32.to_le_bytes()); // forwarder chain
        data.extend_from_slice(&name_rva.to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes()); // first thunk
    }
    data.resize(descriptor_bytes, 0); // terminator
    data.extend_from_slice(&names);
    data
}

/// Delay-import descriptors for a section mapped at `rva`.
pub fn delay_import_section(rva: u32, dlls: &[&str]) -> Vec<u8> {
    let descriptor_bytes = (dlls.len() + 1) * 32;
    let mut names = Vec::new();
    let mut name_rvas = Vec::new();
    for dll in dlls {
        name_rvas.push(rva + descriptor_bytes as u32 + names.len() as u32);
        names.extend_from_slice(dll.as_bytes());
        names.push(0);
    }

    let mut data = Vec::new();
    for name_rva in name_rvas {
        data.extend_from_slice(&1u32.to_le_bytes()); // dlattrRva
        data.extend_from_slice(&name_rva.to_le_bytes());
        data.extend_from_slice(&[0u8; 24]);
    }
    data.resize(descriptor_bytes, 0); // terminator
    data.extend_from_slice(&names);
    data
}

/// One CodeView debug-directory entry plus its RSDS payload. The
/// section must land at `file_offset`.
pub fn debug_section(file_offset: usize, guid: [u8; 16], age: u32, pdb_path: &str) -> Vec<u8> {
    let payload_offset = file_offset + 28;

    let mut data = Vec::new();
    data.extend_from_slice(&0u32.to_le_bytes()); // characteristics
    data.extend_from_slice(&0x5e00_0000u32.to_le_bytes()); // timestamp
    data.extend_from_slice(&0u16.to_le_bytes());
    data.extend_from_slice(&0u16.to_le_bytes());
    data.extend_from_slice(&2u32.to_le_bytes()); // IMAGE_DEBUG_TYPE_CODEVIEW
    let payload_size = 4 + 16 + 4 + pdb_path.len() + 1;
    data.extend_from_slice(&(payload_size as u32).to_le_bytes());
    data.extend_from_slice(&0u32.to_le_bytes()); // address of raw data
    data.extend_from_slice(&(payload_offset as u32).to_le_bytes());

    data.extend_from_slice(b"RSDS");
    data.extend_from_slice(&guid);
    data.extend_from_slice(&age.to_le_bytes());
    data.extend_from_slice(pdb_path.as_bytes());
    data.push(0);
    data
}

// ------------------------------------------------------------------
// resource section

/// Resource type selector for [`resource_section`].
pub enum ResName {
    Id(u32),
    Str(&'static str),
}

/// Builds a resource section for a list of `(type, name id,
/// language, payload)` tuples. String-named types must come first,
/// matching the on-disk sort order.
pub fn resource_section(section_rva: u32, entries: &[(ResName, u32, u32, Vec<u8>)]) -> Vec<u8> {
    let count = entries.len();
    let root_size = 16 + count * 8;
    let per_type = 24 + 24; // name directory + language directory
    let dirs_start = root_size;

    let mut string_bytes = Vec::new();
    let mut string_offsets = Vec::new();
    let strings_start = dirs_start + count * per_type;
    for (name, _, _, _) in entries {
        if let ResName::Str(text) = name {
            string_offsets.push(Some(strings_start + string_bytes.len()));
            let units: Vec<u16> = text.encode_utf16().collect();
            string_bytes.extend_from_slice(&(units.len() as u16).to_le_bytes());
            for unit in units {
                string_bytes.extend_from_slice(&unit.to_le_bytes());
            }
        } else {
            string_offsets.push(None);
        }
    }

    let data_entries_start = strings_start + string_bytes.len();
    let payloads_start = data_entries_start + count * 16;

    let mut payload_offsets = Vec::new();
    let mut payload_bytes = Vec::new();
    for (_, _, _, payload) in entries {
        payload_offsets.push(payloads_start + payload_bytes.len());
        payload_bytes.extend_from_slice(payload);
        while payload_bytes.len() % 4 != 0 {
            payload_bytes.push(0);
        }
    }

    let named = entries
        .iter()
        .filter(|(name, _, _, _)| matches!(name, ResName::Str(_)))
        .count();

    let mut section = Vec::new();
    push_resource_dir(&mut section, named as u16, (count - named) as u16);
    for (i, (name, _, _, _)) in entries.iter().enumerate() {
        let name_field = match (name, string_offsets[i]) {
            (ResName::Str(_), Some(offset)) => 0x8000_0000 | offset as u32,
            (ResName::Id(id), _) => *id,
            _ => unreachable!(),
        };
        section.extend_from_slice(&name_field.to_le_bytes());
        let target = dirs_start + i * per_type;
        section.extend_from_slice(&(0x8000_0000 | target as u32).to_le_bytes());
    }

    for (i, (_, name_id, language, _)) in entries.iter().enumerate() {
        // name level
        push_resource_dir(&mut section, 0, 1);
        section.extend_from_slice(&name_id.to_le_bytes());
        let lang_dir = dirs_start + i * per_type + 24;
        section.extend_from_slice(&(0x8000_0000 | lang_dir as u32).to_le_bytes());
        // language level
        push_resource_dir(&mut section, 0, 1);
        section.extend_from_slice(&language.to_le_bytes());
        section.extend_from_slice(&((data_entries_start + i * 16) as u32).to_le_bytes());
    }

    section.extend_from_slice(&string_bytes);

    for (i, (_, _, _, payload)) in entries.iter().enumerate() {
        section.extend_from_slice(&(section_rva + payload_offsets[i] as u32).to_le_bytes());
        section.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        section.extend_from_slice(&0u32.to_le_bytes());
        section.extend_from_slice(&0u32.to_le_bytes());
    }

    section.extend_from_slice(&payload_bytes);
    section
}

fn push_resource_dir(out: &mut Vec<u8>, named: u16, ids: u16) {
    out.extend_from_slice(&[0u8; 12]);
    out.extend_from_slice(&named.to_le_bytes());
    out.extend_from_slice(&ids.to_le_bytes());
}

// ------------------------------------------------------------------
// VS_VERSIONINFO blob

fn vi_alignment(size: usize) -> usize {
    if size % 4 == 0 {
        0
    } else {
        2
    }
}

fn wide_len(text: &str) -> usize {
    (text.encode_utf16().count() + 1) * 2
}

fn push_vi_header(out: &mut Vec<u8>, length: u16, value_length: u16, value_type: u16) {
    out.extend_from_slice(&length.to_le_bytes());
    out.extend_from_slice(&value_length.to_le_bytes());
    out.extend_from_slice(&value_type.to_le_bytes());
}

fn push_wide(out: &mut Vec<u8>, text: &str, add_to_align: usize) {
    let start = out.len();
    for unit in text.encode_utf16() {
        out.extend_from_slice(&unit.to_le_bytes());
    }
    out.extend_from_slice(&[0, 0]);
    let size = out.len() - start;
    out.resize(out.len() + vi_alignment(add_to_align + size), 0);
}

fn string_entry(key: &str, value: &str) -> Vec<u8> {
    let length = 6 + wide_len(key) + vi_alignment(6 + wide_len(key)) + wide_len(value);
    let mut out = Vec::new();
    push_vi_header(
        &mut out,
        length as u16,
        (value.encode_utf16().count() + 1) as u16,
        1,
    );
    push_wide(&mut out, key, 6);
    // value carries no trailing padding of its own
    for unit in value.encode_utf16() {
        out.extend_from_slice(&unit.to_le_bytes());
    }
    out.extend_from_slice(&[0, 0]);
    out
}

/// A canonical VS_VERSIONINFO blob with the given fixed version and
/// string-table pairs.
pub fn version_blob(fixed: (u16, u16, u16, u16), strings: &[(&str, &str)]) -> Vec<u8> {
    let mut entries = Vec::new();
    for (i, (key, value)) in strings.iter().enumerate() {
        let entry = string_entry(key, value);
        let size = entry.len();
        entries.extend_from_slice(&entry);
        if i + 1 != strings.len() {
            entries.resize(entries.len() + vi_alignment(size), 0);
        }
    }

    let table_len = 6 + wide_len("040904B0") + vi_alignment(6 + wide_len("040904B0")) + entries.len();
    let mut table = Vec::new();
    push_vi_header(&mut table, table_len as u16, 0, 1);
    push_wide(&mut table, "040904B0", 6);
    table.extend_from_slice(&entries);

    let sfi_len =
        6 + wide_len("StringFileInfo") + vi_alignment(6 + wide_len("StringFileInfo")) + table.len();
    let mut sfi = Vec::new();
    push_vi_header(&mut sfi, sfi_len as u16, 0, 1);
    push_wide(&mut sfi, "StringFileInfo", 6);
    sfi.extend_from_slice(&table);

    let (major, minor, build, patch) = fixed;
    let ms = (u32::from(major) << 16) | u32::from(minor);
    let ls = (u32::from(build) << 16) | u32::from(patch);

    let total = 6
        + wide_len("VS_VERSION_INFO")
        + vi_alignment(6 + wide_len("VS_VERSION_INFO"))
        + 52
        + sfi.len()
        + vi_alignment(sfi.len());
    let mut blob = Vec::new();
    push_vi_header(&mut blob, total as u16, 52, 0);
    push_wide(&mut blob, "VS_VERSION_INFO", 6);

    blob.extend_from_slice(&0xfeef_04bdu32.to_le_bytes());
    blob.extend_from_slice(&0x0001_0000u32.to_le_bytes());
    blob.extend_from_slice(&ms.to_le_bytes());
    blob.extend_from_slice(&ls.to_le_bytes());
    blob.extend_from_slice(&ms.to_le_bytes());
    blob.extend_from_slice(&ls.to_le_bytes());
    blob.extend_from_slice(&[0u8; 28]);

    blob.extend_from_slice(&sfi);
    blob.resize(blob.len() + vi_alignment(sfi.len()), 0);
    blob
}

// ------------------------------------------------------------------

/// Writes `bytes` under `dir` and returns the full path.
pub fn write_file(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, bytes).expect("write fixture");
    path
}

/// A ready-made image: `.text` with the given bytes, `.rsrc` with a
/// version resource, debug info and an import table.
pub fn standard_image(timestamp: u32, text: &[u8], version: (u16, u16, u16, u16)) -> Vec<u8> {
    let blob = version_blob(
        version,
        &[
            ("FileVersion", "1.2.3.4 "),
            ("ProductVersion", "1.2.3.4"),
            ("ProductName", "Widget"),
        ],
    );
    let rsrc = resource_section(0x3000, &[(ResName::Id(16), 1, 1033, blob)]);

    let mut text_data = text.to_vec();
    text_data.resize(text.len().max(0x40), 0x90);

    PeBuilder::new()
        .timestamp(timestamp)
        .section(".text", 0x1000, text_data)
        .section(".rsrc", 0x3000, rsrc.clone())
        .directory(DIR_RESOURCE, 0x3000, rsrc.len() as u32)
        .build()
}
