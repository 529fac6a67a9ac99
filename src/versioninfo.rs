use crate::scribe::Scribe;
use crate::version::VersionString;
use crate::Error;
use bytemuck::{Pod, Zeroable};

/// `VS_FIXEDFILEINFO.dwSignature`.
pub const FIXED_INFO_SIGNATURE: u32 = 0xfeef04bd;

/// Record header shared by every entity inside a version resource.
#[derive(Copy, Clone, Pod, Zeroable, Default, Debug)]
#[repr(C)]
pub struct VersionInfoHeader {
    /// Length of the record including children.
    pub length: u16,
    /// Length of the value field. Characters for text values, bytes
    /// for binary ones.
    pub value_length: u16,
    /// 1 for text data, 0 for binary data.
    pub value_type: u16,
}

impl VersionInfoHeader {
    /// Size of the header on disk.
    pub const SIZE: usize = 6;
}

/// VS_FIXEDFILEINFO: the binary version record.
#[derive(Copy, Clone, Pod, Zeroable, Default, Debug, PartialEq)]
#[repr(C)]
pub struct FixedFileInfo {
    /// Must contain [`FIXED_INFO_SIGNATURE`].
    pub signature: u32,
    /// Binary version number of this structure.
    pub struc_version: u32,
    /// Most significant 32 bits of the file version number.
    pub file_version_ms: u32,
    /// Least significant 32 bits of the file version number.
    pub file_version_ls: u32,
    /// Most significant 32 bits of the product version number.
    pub product_version_ms: u32,
    /// Least significant 32 bits of the product version number.
    pub product_version_ls: u32,
    /// Mask of valid bits in `file_flags`.
    pub file_flags_mask: u32,
    /// Attributes of the file (debug, prerelease, patched, …).
    pub file_flags: u32,
    /// Operating system the file was designed for.
    pub file_os: u32,
    /// General type of the file (application, DLL, driver, …).
    pub file_type: u32,
    /// Function of the file within its type.
    pub file_subtype: u32,
    /// Most significant 32 bits of the creation date.
    pub file_date_ms: u32,
    /// Least significant 32 bits of the creation date.
    pub file_date_ls: u32,
}

impl FixedFileInfo {
    /// Size of the record on disk.
    pub const SIZE: usize = 52;

    /// Byte offset of `file_version_ms` within the record.
    pub const FILE_VERSION_OFFSET: usize = 8;
    /// Byte offset of `product_version_ms` within the record.
    pub const PRODUCT_VERSION_OFFSET: usize = 16;

    /// File version formatted as `Major.Minor.Build.Patch`.
    pub fn file_version(&self) -> String {
        format_version(self.file_version_ms, self.file_version_ls)
    }

    /// Product version formatted as `Major.Minor.Build.Patch`.
    pub fn product_version(&self) -> String {
        format_version(self.product_version_ms, self.product_version_ls)
    }
}

fn format_version(ms: u32, ls: u32) -> String {
    format!("{}.{}.{}.{}", ms >> 16, ms & 0xffff, ls >> 16, ls & 0xffff)
}

/// Packs a four-part version into the `(MS, LS)` DWORD pair.
pub fn version_dwords(version: &VersionString) -> (u32, u32) {
    (
        (version.major() << 16) | (version.minor() & 0xffff),
        (version.build() << 16) | (version.patch() & 0xffff),
    )
}

/// Padding needed so the next entity starts on a 4-byte boundary.
pub fn alignment(size: usize) -> usize {
    if size % 4 == 0 {
        0
    } else {
        2
    }
}

/// The closed set of string-table fields the editor understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringField {
    /// `FileDescription`
    FileDescription,
    /// `FileVersion`
    FileVersion,
    /// `InternalName`
    InternalName,
    /// `LegalCopyright`
    LegalCopyright,
    /// `OriginalFilename`
    OriginalFilename,
    /// `ProductName`
    ProductName,
    /// `ProductVersion`
    ProductVersion,
}

impl StringField {
    /// The key exactly as it appears in string tables.
    pub fn key(&self) -> &'static str {
        match self {
            StringField::FileDescription => "FileDescription",
            StringField::FileVersion => "FileVersion",
            StringField::InternalName => "InternalName",
            StringField::LegalCopyright => "LegalCopyright",
            StringField::OriginalFilename => "OriginalFilename",
            StringField::ProductName => "ProductName",
            StringField::ProductVersion => "ProductVersion",
        }
    }
}

/// Which of the two version numbers an edit applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionField {
    /// File and product version.
    Both,
    /// File version only.
    FileOnly,
    /// Product version only.
    ProductOnly,
}

impl VersionField {
    fn covers_file(&self) -> bool {
        matches!(self, VersionField::Both | VersionField::FileOnly)
    }

    fn covers_product(&self) -> bool {
        matches!(self, VersionField::Both | VersionField::ProductOnly)
    }
}

// Reads a NUL-terminated UTF-16 string at `offset` and returns it
// together with the offset of the next entity. `add_to_align` is the
// size of whatever precedes the string in its record.
fn read_wide_shift(
    data: &[u8],
    offset: usize,
    add_to_align: usize,
) -> Result<(String, usize), Error> {
    let text = data.read_wide_nul(offset, data.len().saturating_sub(offset))?;
    let size = (text.encode_utf16().count() + 1) * 2;
    Ok((text, offset + size + alignment(add_to_align + size)))
}

fn write_wide(out: &mut Vec<u8>, text: &str, add_to_align: usize, pad: bool) {
    let start = out.len();
    for unit in text.encode_utf16() {
        out.extend_from_slice(&unit.to_le_bytes());
    }
    out.extend_from_slice(&[0, 0]);
    let size = out.len() - start;
    if pad {
        out.resize(out.len() + alignment(add_to_align + size), 0);
    }
}

fn write_header(out: &mut Vec<u8>, header: VersionInfoHeader) {
    out.extend_from_slice(bytemuck::bytes_of(&header));
}

fn wide_len(text: &str) -> usize {
    (text.encode_utf16().count() + 1) * 2
}

/// One `key = value` pair of a string table.
pub struct StringValue {
    key: String,
    value: String,
    value_offset: usize,
    value_chars: usize,
}

impl StringValue {
    /// The field name, e.g. `FileVersion`.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Current (possibly edited) value, without the terminator.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// In-file slot of the value: offset relative to the resource
    /// start and capacity in characters, both excluding the
    /// terminator. Zero capacity for values added after parsing.
    pub fn slot(&self) -> (usize, usize) {
        (self.value_offset, self.value_chars)
    }

    fn entry_size(&self) -> usize {
        let key_bytes = wide_len(&self.key);
        VersionInfoHeader::SIZE
            + key_bytes
            + alignment(VersionInfoHeader::SIZE + key_bytes)
            + wide_len(&self.value)
    }

    fn write(&self, out: &mut Vec<u8>) {
        write_header(
            out,
            VersionInfoHeader {
                length: self.entry_size() as u16,
                value_length: (self.value.encode_utf16().count() + 1) as u16,
                value_type: 1,
            },
        );
        write_wide(out, &self.key, VersionInfoHeader::SIZE, true);
        write_wide(out, &self.value, 0, false);
    }
}

/// A `StringTable`: one locale's worth of `key = value` pairs.
pub struct StringTable {
    original: Vec<u8>,
    well_formed: bool,
    name: String,
    strings: Vec<StringValue>,
}

impl StringTable {
    /// `base` is the offset of this table within the whole resource;
    /// value slots are recorded relative to the resource start.
    fn parse(data: &[u8], base: usize) -> Self {
        let mut table = Self {
            original: data.to_vec(),
            well_formed: false,
            name: String::new(),
            strings: Vec::new(),
        };

        let Ok(header) = data.read_pod::<VersionInfoHeader>(0) else {
            return table;
        };
        if header.length as usize != data.len() {
            return table;
        }

        let Ok((name, mut offset)) = read_wide_shift(data, VersionInfoHeader::SIZE, VersionInfoHeader::SIZE) else {
            return table;
        };
        table.name = name;

        while offset < data.len() {
            let Ok(entry) = data.read_pod::<VersionInfoHeader>(offset) else {
                return table;
            };
            if entry.length == 0 {
                break;
            }
            if offset + entry.length as usize > data.len() {
                return table;
            }

            let Ok((key, value_at)) = read_wide_shift(
                data,
                offset + VersionInfoHeader::SIZE,
                VersionInfoHeader::SIZE,
            ) else {
                return table;
            };

            let value_units = entry.value_length as usize;
            let Ok(raw_value) = data.read_wide(value_at, value_units) else {
                return table;
            };
            let value = match raw_value.split_once('\0') {
                Some((text, _)) => text.to_string(),
                None => raw_value,
            };

            table.strings.push(StringValue {
                key,
                value,
                value_offset: base + value_at,
                value_chars: value_units.saturating_sub(1),
            });

            offset += entry.length as usize + alignment(entry.length as usize);
        }

        table.well_formed = true;
        table
    }

    /// Locale name, e.g. `040904B0`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True when the table parsed cleanly.
    pub fn is_well_formed(&self) -> bool {
        self.well_formed
    }

    /// All `key = value` pairs in table order.
    pub fn values(&self) -> &[StringValue] {
        &self.strings
    }

    /// Looks a value up by key.
    pub fn value(&self, key: &str) -> Option<&str> {
        self.strings
            .iter()
            .find(|entry| entry.key == key)
            .map(|entry| entry.value.as_str())
    }

    /// Replaces a value, appending the pair if the key is new.
    pub fn set_value(&mut self, key: &str, value: &str) {
        if let Some(entry) = self.strings.iter_mut().find(|entry| entry.key == key) {
            entry.value = value.to_string();
            return;
        }
        self.strings.push(StringValue {
            key: key.to_string(),
            value: value.to_string(),
            value_offset: 0,
            value_chars: 0,
        });
    }

    fn new_size(&self) -> usize {
        if !self.well_formed {
            return self.original.len();
        }

        let name_bytes = wide_len(&self.name);
        let mut size =
            VersionInfoHeader::SIZE + name_bytes + alignment(VersionInfoHeader::SIZE + name_bytes);
        for (i, entry) in self.strings.iter().enumerate() {
            size += entry.entry_size();
            if i + 1 != self.strings.len() {
                size += alignment(entry.entry_size());
            }
        }
        size
    }

    fn write(&self, out: &mut Vec<u8>) {
        if !self.well_formed {
            out.extend_from_slice(&self.original);
            return;
        }

        write_header(
            out,
            VersionInfoHeader {
                length: self.new_size() as u16,
                value_length: 0,
                value_type: 1,
            },
        );
        write_wide(out, &self.name, VersionInfoHeader::SIZE, true);

        for (i, entry) in self.strings.iter().enumerate() {
            entry.write(out);
            if i + 1 != self.strings.len() {
                out.resize(out.len() + alignment(entry.entry_size()), 0);
            }
        }
    }
}

/// A `StringFileInfo` record holding one or more string tables.
///
/// `VarFileInfo` siblings fail the key check, stay opaque and are
/// re-emitted byte-for-byte.
pub struct StringFileInfo {
    original: Vec<u8>,
    well_formed: bool,
    key: String,
    tables: Vec<StringTable>,
}

impl StringFileInfo {
    fn parse(data: &[u8], base: usize) -> Self {
        let mut info = Self {
            original: data.to_vec(),
            well_formed: false,
            key: String::new(),
            tables: Vec::new(),
        };

        let Ok(header) = data.read_pod::<VersionInfoHeader>(0) else {
            return info;
        };
        if header.length as usize != data.len() {
            return info;
        }

        let Ok((key, mut offset)) = read_wide_shift(data, VersionInfoHeader::SIZE, VersionInfoHeader::SIZE) else {
            return info;
        };
        info.key = key;
        if info.key != "StringFileInfo" {
            return info;
        }

        while offset < data.len() {
            let Ok(table_header) = data.read_pod::<VersionInfoHeader>(offset) else {
                return info;
            };
            if table_header.length == 0 {
                break;
            }
            let end = offset + table_header.length as usize;
            if end > data.len() {
                return info;
            }

            info.tables
                .push(StringTable::parse(&data[offset..end], base + offset));

            offset = end + alignment(table_header.length as usize);
        }

        info.well_formed = true;
        info
    }

    /// True when the record parsed cleanly as a `StringFileInfo`.
    pub fn is_well_formed(&self) -> bool {
        self.well_formed
    }

    /// The string tables, one per locale.
    pub fn tables(&self) -> &[StringTable] {
        &self.tables
    }

    /// Replaces `field` in every table.
    pub fn set_field(&mut self, field: StringField, value: &str) {
        for table in &mut self.tables {
            table.set_value(field.key(), value);
        }
    }

    fn new_size(&self) -> usize {
        if !self.well_formed {
            return self.original.len();
        }

        let key_bytes = wide_len(&self.key);
        let mut size =
            VersionInfoHeader::SIZE + key_bytes + alignment(VersionInfoHeader::SIZE + key_bytes);
        for (i, table) in self.tables.iter().enumerate() {
            size += table.new_size();
            if i + 1 != self.tables.len() {
                size += alignment(table.new_size());
            }
        }
        size
    }

    fn write(&self, out: &mut Vec<u8>) {
        if !self.well_formed {
            out.extend_from_slice(&self.original);
            return;
        }

        write_header(
            out,
            VersionInfoHeader {
                length: self.new_size() as u16,
                value_length: 0,
                value_type: 1,
            },
        );
        write_wide(out, &self.key, VersionInfoHeader::SIZE, true);

        for (i, table) in self.tables.iter().enumerate() {
            table.write(out);
            if i + 1 != self.tables.len() {
                out.resize(out.len() + alignment(table.new_size()), 0);
            }
        }
    }
}

/// A decoded `VS_VERSIONINFO` resource: fixed binary record plus
/// localized string tables.
///
/// A malformed resource keeps `well_formed == false` and re-emits its
/// original bytes unchanged.
pub struct VsVersionInfo {
    original: Vec<u8>,
    well_formed: bool,
    key: String,
    fixed: FixedFileInfo,
    fixed_offset: usize,
    children: Vec<StringFileInfo>,
}

impl VsVersionInfo {
    /// Decodes a version resource. Never fails; check
    /// [`is_well_formed`](Self::is_well_formed).
    pub fn parse(data: &[u8]) -> Self {
        let mut info = Self {
            original: data.to_vec(),
            well_formed: false,
            key: String::new(),
            fixed: FixedFileInfo::default(),
            fixed_offset: 0,
            children: Vec::new(),
        };

        let Ok(header) = data.read_pod::<VersionInfoHeader>(0) else {
            return info;
        };
        if header.length as usize != data.len() {
            return info;
        }
        if header.value_length as usize != FixedFileInfo::SIZE {
            return info;
        }

        let Ok((key, fixed_offset)) = read_wide_shift(data, VersionInfoHeader::SIZE, VersionInfoHeader::SIZE) else {
            return info;
        };
        info.key = key;

        let Ok(fixed) = data.read_pod::<FixedFileInfo>(fixed_offset) else {
            return info;
        };
        if fixed.signature != FIXED_INFO_SIGNATURE {
            return info;
        }
        info.fixed = fixed;
        info.fixed_offset = fixed_offset;

        let mut offset = fixed_offset + FixedFileInfo::SIZE;
        while offset < data.len() {
            let Ok(child_header) = data.read_pod::<VersionInfoHeader>(offset) else {
                return info;
            };
            if child_header.length == 0 {
                return info;
            }
            let end = offset + child_header.length as usize;
            if end > data.len() {
                return info;
            }

            info.children
                .push(StringFileInfo::parse(&data[offset..end], offset));

            offset = end + alignment(child_header.length as usize);
        }

        info.well_formed = true;
        info
    }

    /// True when the resource parsed cleanly.
    pub fn is_well_formed(&self) -> bool {
        self.well_formed
    }

    /// The decoded fixed record.
    pub fn fixed_info(&self) -> &FixedFileInfo {
        &self.fixed
    }

    /// Offset of the fixed record within the resource bytes.
    pub fn fixed_info_offset(&self) -> usize {
        self.fixed_offset
    }

    /// The `StringFileInfo` children (well-formed or opaque).
    pub fn children(&self) -> &[StringFileInfo] {
        &self.children
    }

    /// First value found for `field` across all string tables.
    pub fn string_value(&self, field: StringField) -> Option<&str> {
        self.children
            .iter()
            .flat_map(|child| child.tables())
            .find_map(|table| table.value(field.key()))
    }

    /// Every in-file slot holding `field`, as
    /// `(offset within resource, capacity in characters)`.
    pub fn string_slots(&self, field: StringField) -> Vec<(usize, usize)> {
        self.children
            .iter()
            .flat_map(|child| child.tables())
            .flat_map(|table| table.values())
            .filter(|value| value.key() == field.key())
            .map(|value| value.slot())
            .filter(|&(_, chars)| chars > 0)
            .collect()
    }

    /// Sets the version in the fixed record and the matching string
    /// fields.
    pub fn set_version(&mut self, field: VersionField, version: &VersionString) {
        let (ms, ls) = version_dwords(version);

        if field.covers_file() {
            self.fixed.file_version_ms = ms;
            self.fixed.file_version_ls = ls;
            self.set_field(StringField::FileVersion, &version.for_resources());
        }
        if field.covers_product() {
            self.fixed.product_version_ms = ms;
            self.fixed.product_version_ls = ls;
            self.set_field(StringField::ProductVersion, &version.for_resources());
        }
    }

    /// Replaces `field` in every string table of every child.
    pub fn set_field(&mut self, field: StringField, value: &str) {
        for child in &mut self.children {
            child.set_field(field, value);
        }
    }

    /// Size of the re-serialized resource.
    pub fn new_size(&self) -> usize {
        if !self.well_formed {
            return self.original.len();
        }

        let key_bytes = wide_len(&self.key);
        let mut size = VersionInfoHeader::SIZE
            + key_bytes
            + alignment(VersionInfoHeader::SIZE + key_bytes)
            + FixedFileInfo::SIZE;
        for child in &self.children {
            let child_size = child.new_size();
            size += child_size + alignment(child_size);
        }
        size
    }

    /// Serializes the current state. Malformed resources come back
    /// byte-identical to the input.
    pub fn to_bytes(&self) -> Vec<u8> {
        if !self.well_formed {
            return self.original.clone();
        }

        let mut out = Vec::with_capacity(self.new_size());
        write_header(
            &mut out,
            VersionInfoHeader {
                length: self.new_size() as u16,
                value_length: FixedFileInfo::SIZE as u16,
                value_type: 0,
            },
        );
        write_wide(&mut out, &self.key, VersionInfoHeader::SIZE, true);
        out.extend_from_slice(bytemuck::bytes_of(&self.fixed));

        for child in &self.children {
            child.write(&mut out);
            out.resize(out.len() + alignment(child.new_size()), 0);
        }

        out
    }
}

// Canonical two-string blob for the unit tests below.
#[cfg(test)]
pub(crate) mod testdata {
    use super::*;

    fn push_wide(out: &mut Vec<u8>, text: &str, add_to_align: usize) {
        write_wide(out, text, add_to_align, true);
    }

    fn string_entry(key: &str, value: &str) -> Vec<u8> {
        let mut out = Vec::new();
        let key_bytes = wide_len(key);
        let length = VersionInfoHeader::SIZE
            + key_bytes
            + alignment(VersionInfoHeader::SIZE + key_bytes)
            + wide_len(value);
        write_header(
            &mut out,
            VersionInfoHeader {
                length: length as u16,
                value_length: (value.encode_utf16().count() + 1) as u16,
                value_type: 1,
            },
        );
        push_wide(&mut out, key, VersionInfoHeader::SIZE);
        write_wide(&mut out, value, 0, false);
        out
    }

    pub(crate) fn sample_blob() -> Vec<u8> {
        let mut entries = Vec::new();
        let file_version = string_entry("FileVersion", "1.2.3.4 ");
        entries.extend_from_slice(&file_version);
        entries.resize(entries.len() + alignment(file_version.len()), 0);
        entries.extend_from_slice(&string_entry("ProductVersion", "1.2.3.4"));

        let mut table = Vec::new();
        let table_len =
            VersionInfoHeader::SIZE + wide_len("040904B0") + alignment(6 + wide_len("040904B0")) + entries.len();
        write_header(
            &mut table,
            VersionInfoHeader {
                length: table_len as u16,
                value_length: 0,
                value_type: 1,
            },
        );
        push_wide(&mut table, "040904B0", VersionInfoHeader::SIZE);
        table.extend_from_slice(&entries);

        let mut sfi = Vec::new();
        let sfi_len = VersionInfoHeader::SIZE
            + wide_len("StringFileInfo")
            + alignment(6 + wide_len("StringFileInfo"))
            + table.len();
        write_header(
            &mut sfi,
            VersionInfoHeader {
                length: sfi_len as u16,
                value_length: 0,
                value_type: 1,
            },
        );
        push_wide(&mut sfi, "StringFileInfo", VersionInfoHeader::SIZE);
        sfi.extend_from_slice(&table);

        let fixed = FixedFileInfo {
            signature: FIXED_INFO_SIGNATURE,
            struc_version: 0x0001_0000,
            file_version_ms: 0x0001_0002,
            file_version_ls: 0x0003_0004,
            product_version_ms: 0x0001_0002,
            product_version_ls: 0x0003_0004,
            ..Default::default()
        };

        let mut blob = Vec::new();
        let total = VersionInfoHeader::SIZE
            + wide_len("VS_VERSION_INFO")
            + alignment(6 + wide_len("VS_VERSION_INFO"))
            + FixedFileInfo::SIZE
            + sfi.len()
            + alignment(sfi.len());
        write_header(
            &mut blob,
            VersionInfoHeader {
                length: total as u16,
                value_length: FixedFileInfo::SIZE as u16,
                value_type: 0,
            },
        );
        push_wide(&mut blob, "VS_VERSION_INFO", VersionInfoHeader::SIZE);
        blob.extend_from_slice(bytemuck::bytes_of(&fixed));
        blob.extend_from_slice(&sfi);
        blob.resize(blob.len() + alignment(sfi.len()), 0);
        blob
    }
}
