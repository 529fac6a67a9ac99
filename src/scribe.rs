use crate::Error;
use bytemuck::AnyBitPattern;

/// Bounds-checked reads over a raw byte region.
///
/// Every structured access into a mapping goes through this trait:
/// a "pointer" is always an offset, and a decode is always a checked
/// copy out of the slice. Multi-byte fields are little-endian.
pub trait Scribe {
    /// Reads a single byte.
    fn read_u8(&self, offset: usize) -> Result<u8, Error>;
    /// Reads a little-endian `u16`.
    fn read_u16(&self, offset: usize) -> Result<u16, Error>;
    /// Reads a little-endian `u32`.
    fn read_u32(&self, offset: usize) -> Result<u32, Error>;
    /// Decodes a fixed-size record at `offset`.
    fn read_pod<T: AnyBitPattern>(&self, offset: usize) -> Result<T, Error>;
    /// Returns `size` raw bytes starting at `offset`.
    fn read_slice(&self, offset: usize, size: usize) -> Result<&[u8], Error>;
    /// Reads a null-terminated single-byte string.
    fn read_cstr(&self, offset: usize) -> Result<String, Error>;
    /// Reads `chars` UTF-16 code units.
    fn read_wide(&self, offset: usize, chars: usize) -> Result<String, Error>;
    /// Reads UTF-16 code units up to (not including) a null terminator.
    ///
    /// The scan gives up at `offset + max_bytes` or the end of the
    /// region, whichever comes first.
    fn read_wide_nul(&self, offset: usize, max_bytes: usize) -> Result<String, Error>;
}

impl Scribe for [u8] {
    fn read_u8(&self, offset: usize) -> Result<u8, Error> {
        self.get(offset).copied().ok_or(Error::OffsetOutOfRange)
    }

    fn read_u16(&self, offset: usize) -> Result<u16, Error> {
        let slice = self
            .get(offset..offset.wrapping_add(2))
            .ok_or(Error::OffsetOutOfRange)?;
        Ok(u16::from_le_bytes(slice.try_into().unwrap()))
    }

    fn read_u32(&self, offset: usize) -> Result<u32, Error> {
        let slice = self
            .get(offset..offset.wrapping_add(4))
            .ok_or(Error::OffsetOutOfRange)?;
        Ok(u32::from_le_bytes(slice.try_into().unwrap()))
    }

    fn read_pod<T: AnyBitPattern>(&self, offset: usize) -> Result<T, Error> {
        let size = core::mem::size_of::<T>();
        let slice = self
            .get(offset..offset.wrapping_add(size))
            .ok_or(Error::OffsetOutOfRange)?;
        // mappings give no alignment promises, so decode by copy
        Ok(bytemuck::pod_read_unaligned(slice))
    }

    fn read_slice(&self, offset: usize, size: usize) -> Result<&[u8], Error> {
        self.get(offset..offset.wrapping_add(size))
            .ok_or(Error::OffsetOutOfRange)
    }

    fn read_cstr(&self, offset: usize) -> Result<String, Error> {
        let tail = self.get(offset..).ok_or(Error::OffsetOutOfRange)?;
        let end = tail
            .iter()
            .position(|&b| b == 0)
            .ok_or(Error::OffsetOutOfRange)?;
        Ok(String::from_utf8_lossy(&tail[..end]).into_owned())
    }

    fn read_wide(&self, offset: usize, chars: usize) -> Result<String, Error> {
        let slice = self
            .get(offset..offset.wrapping_add(chars.wrapping_mul(2)))
            .ok_or(Error::OffsetOutOfRange)?;
        let units: Vec<u16> = slice
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes(pair.try_into().unwrap()))
            .collect();
        Ok(String::from_utf16_lossy(&units))
    }

    fn read_wide_nul(&self, offset: usize, max_bytes: usize) -> Result<String, Error> {
        let mut units = Vec::new();
        let mut at = offset;
        let stop = offset.wrapping_add(max_bytes);
        loop {
            if at >= stop {
                return Err(Error::OffsetOutOfRange);
            }
            let unit = self.read_u16(at)?;
            if unit == 0 {
                break;
            }
            units.push(unit);
            at += 2;
        }
        Ok(String::from_utf16_lossy(&units))
    }
}
