use std::io::{self, Read, Seek, SeekFrom};

use binrw::io::Cursor;
use zerocopy::{ByteOrder, LittleEndian};

use crate::{ensure_data, error::ImportError};

/// Forward-only reader over the locked data of one object.
///
/// Every read is bounds checked against the remaining length, so a short
/// object is reported as [`ImportError::InvalidData`] instead of reading past
/// its end. Implements [`Read`] + [`Seek`] so `binrw` records can be read
/// through it directly.
#[derive(Debug, Clone)]
pub struct DataCursor<'a> {
    inner: Cursor<&'a [u8]>,
}

impl<'a> DataCursor<'a> {
    #[inline]
    pub fn new(data: &'a [u8]) -> Self { Self { inner: Cursor::new(data) } }

    /// Creates a cursor over data that must be exactly `size` bytes long.
    pub fn with_size(data: &'a [u8], size: usize) -> Result<Self, ImportError> {
        ensure_data!(
            data.len() == size,
            "Object size mismatch: expected {:#X} bytes, got {:#X}",
            size,
            data.len()
        );
        Ok(Self::new(data))
    }

    #[inline]
    pub fn position(&self) -> usize { self.inner.position() as usize }

    #[inline]
    pub fn len(&self) -> usize { self.inner.get_ref().len() }

    #[inline]
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    #[inline]
    pub fn remaining(&self) -> usize { self.len().saturating_sub(self.position()) }

    /// Fails unless every byte of the object has been consumed.
    pub fn expect_end(&self) -> Result<(), ImportError> {
        ensure_data!(
            self.remaining() == 0,
            "{:#X} trailing bytes after object data ({:#X} total)",
            self.remaining(),
            self.len()
        );
        Ok(())
    }

    /// Fails unless `count` records of at least `record_size` bytes can still fit.
    pub fn ensure_fits(&self, count: usize, record_size: usize) -> Result<(), ImportError> {
        let fits = count.checked_mul(record_size).map_or(false, |n| n <= self.remaining());
        ensure_data!(
            fits,
            "{} records of {} bytes overrun object at {:#X} ({:#X} remaining)",
            count,
            record_size,
            self.position(),
            self.remaining()
        );
        Ok(())
    }

    pub fn read_bytes(&mut self, count: usize) -> Result<&'a [u8], ImportError> {
        self.ensure_fits(count, 1)?;
        let start = self.position();
        let data: &'a [u8] = *self.inner.get_ref();
        self.inner.set_position((start + count) as u64);
        Ok(&data[start..start + count])
    }

    #[inline]
    pub fn read_u16(&mut self) -> Result<u16, ImportError> {
        Ok(LittleEndian::read_u16(self.read_bytes(2)?))
    }

    #[inline]
    pub fn read_u32(&mut self) -> Result<u32, ImportError> {
        Ok(LittleEndian::read_u32(self.read_bytes(4)?))
    }

    #[inline]
    pub fn read_f32(&mut self) -> Result<f32, ImportError> {
        Ok(LittleEndian::read_f32(self.read_bytes(4)?))
    }

    /// Reads a DWORD count widened to `usize`.
    #[inline]
    pub fn read_count(&mut self) -> Result<usize, ImportError> {
        Ok(self.read_u32()? as usize)
    }

    /// Reads a null-terminated string.
    pub fn read_cstr(&mut self) -> Result<String, ImportError> {
        let data: &'a [u8] = *self.inner.get_ref();
        let rest = &data[self.position().min(data.len())..];
        let Some(end) = rest.iter().position(|&b| b == 0) else {
            crate::bail_data!("Unterminated string at {:#X}", self.position());
        };
        let text = String::from_utf8_lossy(&rest[..end]).into_owned();
        self.read_bytes(end + 1)?;
        Ok(text)
    }

    pub fn read_u32_list(&mut self, count: usize) -> Result<Vec<u32>, ImportError> {
        self.read_list(count, 4, Self::read_u32)
    }

    pub fn read_f32_list(&mut self, count: usize) -> Result<Vec<f32>, ImportError> {
        self.read_list(count, 4, Self::read_f32)
    }

    /// Reads `count` records, each at least `record_size` bytes long.
    ///
    /// The count is checked against the remaining length before anything is
    /// allocated.
    pub fn read_list<T, F>(
        &mut self,
        count: usize,
        record_size: usize,
        mut read: F,
    ) -> Result<Vec<T>, ImportError>
    where
        F: FnMut(&mut Self) -> Result<T, ImportError>,
    {
        self.ensure_fits(count, record_size)?;
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(read(self)?);
        }
        Ok(out)
    }
}

impl Read for DataCursor<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> { self.inner.read(buf) }
}

impl Seek for DataCursor<'_> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> { self.inner.seek(pos) }
}
