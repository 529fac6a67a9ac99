//! # pekit: inspect, compare and patch Windows Portable Executables.
//!
//! `pekit` memory-maps a PE binary, classifies every byte range of the
//! file as either meaningful content or linker-generated noise, and
//! builds on that classification to answer three questions release
//! engineers keep asking:
//! - what is in this binary (headers, imports, debug info, resources)?
//! - are these two builds *functionally equivalent* even though their
//!   bytes differ?
//! - can the version resource be rewritten in place?
//!
//! ## Examples
//! ```no_run
//! use pekit::pe::PeReader;
//!
//! # fn main() -> Result<(), pekit::Error> {
//! let pe = PeReader::open("demo.dll", false)?;
//! assert!(pe.is_valid_pe());
//! for import in pe.dll_imports() {
//!     println!("{import}");
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

/// Byte ranges, range lists and the nested range tree
pub mod block;
/// COFF file header definitions and helper functions
pub mod coff;
/// Functional-equivalence comparison of two opened readers
pub mod compare;
/// Recursive DLL dependency walking
pub mod depends;
/// Compiler-artifact detectors used by the comparator
pub mod heuristics;
/// Memory-mapped file views
pub mod mapped;
/// Optional header definitions and helper functions
pub mod optional;
/// The PE reader: parsing, classification and in-place edits
pub mod pe;
/// Resource directory tree
pub mod resource;
/// Bounds-checked little-endian reads over raw bytes
pub mod scribe;
/// Section header definitions and helper functions
pub mod section;
/// Four-part version numbers
pub mod version;
/// VS_VERSIONINFO decoding, re-serialization and edits
pub mod versioninfo;

use std::path::PathBuf;

/// Errors reported by the library.
///
/// Parsers inside [`pe::PeReader`] degrade rather than fail: a
/// malformed directory leaves the reader queryable with
/// `valid_pe == false`. `Error` is returned where an operation has
/// nothing sensible to degrade to (opening, editing, range parsing).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Opening was attempted on something that is not a regular file.
    #[error("not a file: {0}")]
    NotAFile(PathBuf),
    /// The host failed to open, map or flush the file.
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),
    /// DOS or NT magic did not match; the file is not a PE binary.
    #[error("not a PE binary")]
    NotPe,
    /// A read was attempted past the end of the mapping.
    #[error("offset out of range")]
    OffsetOutOfRange,
    /// A directory points outside the file or a blob is unreadable.
    #[error("corrupted binary: {0}")]
    Corrupted(&'static str),
    /// VS_VERSIONINFO length or signature check failed.
    #[error("malformed VS_VERSIONINFO")]
    MalformedVersion,
    /// An in-place edit would overflow the existing slot.
    #[error("new value needs {need} bytes, slot holds {have}")]
    NewValueTooLarge {
        /// Size of the slot recorded in the mapping.
        have: usize,
        /// Size the new value would need.
        need: usize,
    },
    /// An ignored-range list did not match `{desc:offset:size|…}`.
    #[error("error parsing block list: {0}")]
    RangeParse(String),
    /// No resource exists at the requested path.
    #[error("resource not found: {0}")]
    ResourceMissing(String),
    /// No section with the requested name exists.
    #[error("section not found: {0}")]
    SectionMissing(String),
}
