use crate::block::{Block, BlockList};
use crate::scribe::Scribe;
use crate::Error;
use bytemuck::{Pod, Zeroable};
use core::fmt;
use std::collections::BTreeMap;

// Resource format description:
// http://www.csn.ul.ie/~caolan/publink/winresdump/winresdump/doc/resfmt.txt

/// Resource type id of `RT_VERSION`.
pub const RT_VERSION: u32 = 16;
/// Resource type id of `RT_MANIFEST`.
pub const RT_MANIFEST: u32 = 24;

/// IMAGE_RESOURCE_DIRECTORY record.
#[derive(Copy, Clone, Pod, Zeroable, Default)]
#[repr(C)]
pub struct ResourceDirectory {
    /// Resource flags, reserved.
    pub characteristics: u32,
    /// Time the resource data was created by the compiler.
    pub time_date_stamp: u32,
    /// Major version number set by the user.
    pub major_version: u16,
    /// Minor version number set by the user.
    pub minor_version: u16,
    /// Number of entries named with strings.
    pub number_of_named_entries: u16,
    /// Number of entries named with 16-bit ids.
    pub number_of_id_entries: u16,
}

impl ResourceDirectory {
    /// Size of the record on disk.
    pub const SIZE: usize = 16;

    /// Total number of child entries that follow the record.
    pub fn entry_count(&self) -> usize {
        usize::from(self.number_of_named_entries) + usize::from(self.number_of_id_entries)
    }
}

/// IMAGE_RESOURCE_DIRECTORY_ENTRY record. Both fields overload their
/// top bit.
#[derive(Copy, Clone, Pod, Zeroable, Default)]
#[repr(C)]
pub struct ResourceDirectoryEntry {
    /// Id, or offset to a name string when the top bit is set.
    pub name: u32,
    /// Offset to a data entry, or to a subdirectory when the top bit
    /// is set. Relative to the start of the resource section.
    pub offset: u32,
}

impl ResourceDirectoryEntry {
    /// Size of the record on disk.
    pub const SIZE: usize = 8;

    /// True when the entry is named by a counted UTF-16 string.
    pub fn name_is_string(&self) -> bool {
        self.name & 0x8000_0000 != 0
    }

    /// Offset of the name string within the resource section.
    pub fn name_offset(&self) -> usize {
        (self.name & 0x7fff_ffff) as usize
    }

    /// 16-bit id for id-named entries.
    pub fn id(&self) -> u32 {
        self.name & 0xffff
    }

    /// True when the entry points at a subdirectory.
    pub fn is_directory(&self) -> bool {
        self.offset & 0x8000_0000 != 0
    }

    /// Offset of the pointed-to record within the resource section.
    pub fn target_offset(&self) -> usize {
        (self.offset & 0x7fff_ffff) as usize
    }
}

/// IMAGE_RESOURCE_DATA_ENTRY record: one resource leaf payload.
#[derive(Copy, Clone, Pod, Zeroable, Default)]
#[repr(C)]
pub struct ResourceDataEntry {
    /// RVA of the payload bytes.
    pub offset_to_data: u32,
    /// Payload size in bytes.
    pub size: u32,
    /// Code page used to decode code-point values.
    pub code_page: u32,
    /// Reserved, must be zero.
    pub reserved: u32,
}

/// Directory-or-leaf payload of a [`ResourceEntry`].
pub enum ResourceKind {
    /// A directory with children keyed by their textual name.
    Directory(BTreeMap<String, ResourceEntry>),
    /// A data leaf.
    Leaf {
        /// Offset of the payload in the mapped file.
        file_offset: usize,
        /// Payload size in bytes.
        size: usize,
    },
}

/// One node of the parsed resource tree.
///
/// Id-named entries get the decimal form of their id as name;
/// string-named entries get `@` followed by the UTF-16 literal.
/// Paths are slash-joined from the root, e.g. `16/1/1033`.
pub struct ResourceEntry {
    id: u32,
    name: String,
    path: String,
    kind: ResourceKind,
}

impl ResourceEntry {
    /// Numeric id; zero for string-named entries.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Name of this node.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Slash-joined path of the parent.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Slash-joined path from the root, including this node.
    pub fn full_path(&self) -> String {
        if self.path.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", self.path, self.name)
        }
    }

    /// True for data leaves.
    pub fn is_data(&self) -> bool {
        matches!(self.kind, ResourceKind::Leaf { .. })
    }

    /// Child map for directories, `None` for leaves.
    pub fn entries(&self) -> Option<&BTreeMap<String, ResourceEntry>> {
        match &self.kind {
            ResourceKind::Directory(children) => Some(children),
            ResourceKind::Leaf { .. } => None,
        }
    }

    /// Payload location for leaves, `None` for directories.
    pub fn data_location(&self) -> Option<(usize, usize)> {
        match self.kind {
            ResourceKind::Leaf { file_offset, size } => Some((file_offset, size)),
            ResourceKind::Directory(_) => None,
        }
    }

    /// Payload bytes of a leaf, sliced out of the mapped file.
    pub fn data<'a>(&self, binary: &'a [u8]) -> Option<&'a [u8]> {
        let (offset, size) = self.data_location()?;
        binary.get(offset..offset + size)
    }

    /// Descends along a `/`-separated path. Missing segments yield
    /// `None`.
    pub fn at(&self, path: &str) -> Option<&ResourceEntry> {
        let (head, rest) = match path.split_once('/') {
            Some((head, rest)) => (head, Some(rest)),
            None => (path, None),
        };

        let child = self.entries()?.get(head)?;
        match rest {
            Some(rest) => child.at(rest),
            None => Some(child),
        }
    }

    /// The only child of a single-child directory. Lets callers name
    /// `16/1` in a binary whose `RT_VERSION` has one language.
    pub fn sole_child(&self) -> Option<&ResourceEntry> {
        let entries = self.entries()?;
        if entries.len() == 1 {
            entries.values().next()
        } else {
            None
        }
    }

    fn print(&self, f: &mut fmt::Formatter<'_>, prefix: &str) -> fmt::Result {
        writeln!(f, "{}{}", prefix, self.full_path())?;
        if let Some(entries) = self.entries() {
            for child in entries.values() {
                child.print(f, prefix)?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for ResourceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.print(f, "")
    }
}

// Nesting deeper than type/name/language does not occur in real
// binaries; corrupt files can loop, so cap the walk.
const MAX_DEPTH: usize = 8;

/// Parses the resource section into a [`ResourceEntry`] tree.
///
/// `section_offset` is the file offset of the resource directory and
/// `section_rva` its RVA; the difference translates payload RVAs to
/// file offsets. Every leaf payload is appended to `resource_blocks`
/// as `Resource: <full-path>`.
pub fn parse_resource_directory(
    binary: &[u8],
    section_offset: usize,
    section_rva: u32,
    resource_blocks: &mut BlockList,
) -> Result<ResourceEntry, Error> {
    let mut root = ResourceEntry {
        id: 0,
        name: String::new(),
        path: String::new(),
        kind: ResourceKind::Directory(BTreeMap::new()),
    };

    parse_directory(
        binary,
        section_offset,
        section_rva,
        0,
        &mut root,
        resource_blocks,
        0,
    )?;

    Ok(root)
}

fn parse_directory(
    binary: &[u8],
    section_offset: usize,
    section_rva: u32,
    dir_offset: usize,
    parent: &mut ResourceEntry,
    resource_blocks: &mut BlockList,
    depth: usize,
) -> Result<(), Error> {
    if depth > MAX_DEPTH {
        return Err(Error::Corrupted("resource directory nests too deep"));
    }

    let directory: ResourceDirectory = binary.read_pod(section_offset + dir_offset)?;
    let mut entry_offset = section_offset + dir_offset + ResourceDirectory::SIZE;

    let parent_path = parent.full_path();

    for _ in 0..directory.entry_count() {
        let raw: ResourceDirectoryEntry = binary.read_pod(entry_offset)?;
        entry_offset += ResourceDirectoryEntry::SIZE;

        let (id, name) = if raw.name_is_string() {
            let at = section_offset + raw.name_offset();
            let length = binary.read_u16(at)? as usize;
            let literal = binary.read_wide(at + 2, length)?;
            (0, format!("@{literal}"))
        } else {
            (raw.id(), raw.id().to_string())
        };

        let mut child = ResourceEntry {
            id,
            name,
            path: parent_path.clone(),
            kind: ResourceKind::Directory(BTreeMap::new()),
        };

        if raw.is_directory() {
            parse_directory(
                binary,
                section_offset,
                section_rva,
                raw.target_offset(),
                &mut child,
                resource_blocks,
                depth + 1,
            )?;
        } else {
            let data: ResourceDataEntry = binary.read_pod(section_offset + raw.target_offset())?;
            let file_offset = (section_offset + data.offset_to_data as usize)
                .checked_sub(section_rva as usize)
                .ok_or(Error::Corrupted("resource payload before section"))?;
            let size = data.size as usize;

            if binary.read_slice(file_offset, size).is_err() {
                return Err(Error::Corrupted("resource payload past end of file"));
            }

            child.kind = ResourceKind::Leaf { file_offset, size };
            resource_blocks.push(Block::new(
                format!("Resource: {}", child.full_path()),
                file_offset,
                size,
            ));
        }

        if let ResourceKind::Directory(children) = &mut parent.kind {
            children.insert(child.name.clone(), child);
        }
    }

    Ok(())
}
