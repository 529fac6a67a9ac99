use crate::Error;
use memmap2::{Mmap, MmapMut};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

enum Mapping {
    ReadOnly(Mmap),
    ReadWrite(MmapMut),
}

/// A whole file exposed as one contiguous byte region.
///
/// Acquisition opens and maps; dropping unmaps and, for read-write
/// views, flushes dirty pages back to the file on every exit path.
pub struct MappedImage {
    path: PathBuf,
    mapping: Mapping,
    len: usize,
}

impl MappedImage {
    /// Opens and maps `path`.
    ///
    /// Directories are rejected up front; everything else that fails
    /// to open or map surfaces as [`Error::Io`].
    pub fn open<P: AsRef<Path>>(path: P, read_write: bool) -> Result<Self, Error> {
        let path = path.as_ref();

        let metadata = fs::metadata(path)?;
        if !metadata.is_file() {
            return Err(Error::NotAFile(path.to_path_buf()));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(read_write)
            .open(path)?;

        let mapping = if read_write {
            Mapping::ReadWrite(unsafe { MmapMut::map_mut(&file)? })
        } else {
            Mapping::ReadOnly(unsafe { Mmap::map(&file)? })
        };

        let len = metadata.len() as usize;

        Ok(Self {
            path: path.to_path_buf(),
            mapping,
            len,
        })
    }

    /// Path the mapping was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size of the mapped file in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True for zero-length files.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The mapped bytes.
    pub fn bytes(&self) -> &[u8] {
        match &self.mapping {
            Mapping::ReadOnly(map) => map,
            Mapping::ReadWrite(map) => map,
        }
    }

    /// The mapped bytes, writable. `None` for read-only views.
    pub fn bytes_mut(&mut self) -> Option<&mut [u8]> {
        match &mut self.mapping {
            Mapping::ReadOnly(_) => None,
            Mapping::ReadWrite(map) => Some(map),
        }
    }

    /// Flushes dirty pages for read-write views. No-op otherwise.
    pub fn flush(&self) -> Result<(), Error> {
        if let Mapping::ReadWrite(map) = &self.mapping {
            map.flush()?;
        }
        Ok(())
    }
}

impl Drop for MappedImage {
    fn drop(&mut self) {
        if let Err(err) = self.flush() {
            log::warn!("failed to flush {}: {err}", self.path.display());
        }
    }
}
