/**
 * A bounded cursor over a byte region, used by every decode path.
 *
 * The reader covers `[base, limit)` of a borrowed buffer and keeps a movable
 * offset. It implements `std::io::Read` and `std::io::Seek`; the big-endian
 * helpers fail with `StunError::MalformedMessage` on any short read.
 */
use std::io::{self, Read, Seek, SeekFrom};

use super::error::{StunError, StunResult};

#[derive(Debug, Clone)]
pub struct StunReader<'a> {
    buf: &'a [u8],
    base: usize,
    off: usize,
    limit: usize,
}

impl<'a> StunReader<'a> {
    /// Reader over the whole buffer
    pub fn new(buf: &'a [u8]) -> Self {
        Self::section(buf, 0, buf.len())
    }

    /// Reader over `n` bytes of `buf` starting at `off`, clamped to the buffer end
    fn section(buf: &'a [u8], off: usize, n: usize) -> Self {
        let base = off.min(buf.len());
        let limit = base.saturating_add(n).min(buf.len());
        StunReader {
            buf,
            base,
            off: base,
            limit,
        }
    }

    /// Bytes left between the current offset and the end of the section
    pub fn remaining(&self) -> usize {
        self.limit.saturating_sub(self.off)
    }

    /// Current offset relative to the start of the section
    pub fn position(&self) -> usize {
        self.off - self.base
    }

    /// Rewind to the start of the section
    pub fn reset(&mut self) {
        self.off = self.base;
    }

    /// Advance without copying. Never moves past the end of the section.
    pub fn skip(&mut self, n: usize) {
        self.off = self.off.saturating_add(n).min(self.limit.max(self.off));
    }

    /// Advance to the next 4-byte boundary (relative to the section start), stopping at the end
    pub fn align(&mut self) {
        while self.position() % 4 != 0 && self.remaining() > 0 {
            self.off += 1;
        }
    }

    /// Borrow the next `n` bytes and advance past them
    pub fn read_bytes(&mut self, n: usize) -> StunResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(StunError::MalformedMessage);
        }
        if n == 0 {
            return Ok(&[]);
        }
        let bytes = &self.buf[self.off..self.off + n];
        self.off += n;
        Ok(bytes)
    }

    pub fn read_array<const N: usize>(&mut self) -> StunResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> StunResult<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_u16(&mut self) -> StunResult<u16> {
        Ok(u16::from_be_bytes(self.read_array()?))
    }

    pub fn read_u32(&mut self) -> StunResult<u32> {
        Ok(u32::from_be_bytes(self.read_array()?))
    }

    pub fn read_u64(&mut self) -> StunResult<u64> {
        Ok(u64::from_be_bytes(self.read_array()?))
    }
}

impl Read for StunReader<'_> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let n = out.len().min(self.remaining());
        if n == 0 {
            return Ok(0);
        }
        out[..n].copy_from_slice(&self.buf[self.off..self.off + n]);
        self.off += n;
        Ok(n)
    }
}

impl Seek for StunReader<'_> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => (self.base as i128) + n as i128,
            SeekFrom::Current(n) => (self.off as i128) + n as i128,
            SeekFrom::End(n) => (self.limit as i128) + n as i128,
        };
        if target < self.base as i128 || target > usize::MAX as i128 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before the start of the section",
            ));
        }
        self.off = target as usize;
        Ok((self.off - self.base) as u64)
    }
}
