//! Bit granular reading and writing of byte buffers.
//!
//! Values are stored LSB first: bit `i` of the stream is bit `i % 8` of byte `i / 8`.
//! Fields are at most 32 bits wide. Every access is bounds checked and reports `Error::OutOfBounds`
//! instead of reading or writing past the buffer.

use crate::error::*;

#[inline]
fn check_bounds(len: usize, position: usize, bits: u8) -> Result<()> {
    debug_assert!(bits <= 32);
    if position + bits as usize > len * 8 {
        return Err(Error::OutOfBounds { position, bits, len });
    }
    Ok(())
}

/// Read a `bits` wide value starting at bit `position`.
pub fn read_bits(buffer: &[u8], mut position: usize, bits: u8) -> Result<u32> {
    check_bounds(buffer.len(), position, bits)?;
    let mut value = 0u64;
    let mut read = 0;
    while read < bits as usize {
        let offset = position & 7;
        let take = (8 - offset).min(bits as usize - read);
        let chunk = (buffer[position >> 3] as u64 >> offset) & ((1 << take) - 1);
        value |= chunk << read;
        read += take;
        position += take;
    }
    Ok(value as u32)
}

/// Sequential reader over a byte buffer.
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Self::at(buffer, 0)
    }

    /// A reader starting at bit `position`.
    pub fn at(buffer: &'a [u8], position: usize) -> Self {
        BitReader { buffer, position }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn read(&mut self, bits: u8) -> Result<u32> {
        let value = read_bits(self.buffer, self.position, bits)?;
        self.position += bits as usize;
        Ok(value)
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read(1)? == 1)
    }
}

/// Sequential writer into a zero initialized byte buffer.
#[derive(Debug)]
pub struct BitWriter<'a> {
    buffer: &'a mut [u8],
    position: usize,
}

impl<'a> BitWriter<'a> {
    pub fn new(buffer: &'a mut [u8]) -> Self {
        BitWriter { buffer, position: 0 }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    /// Append the lowest `bits` bits of `value`. Higher bits must be zero.
    pub fn write(&mut self, value: u32, bits: u8) -> Result<()> {
        check_bounds(self.buffer.len(), self.position, bits)?;
        debug_assert!(bits == 32 || value >> bits == 0, "{} does not fit into {} bits", value, bits);
        let mut written = 0;
        while written < bits as usize {
            let offset = self.position & 7;
            let take = (8 - offset).min(bits as usize - written);
            let chunk = ((value as u64 >> written) & ((1 << take) - 1)) as u8;
            self.buffer[self.position >> 3] |= chunk << offset;
            written += take;
            self.position += take;
        }
        Ok(())
    }

    pub fn write_bool(&mut self, value: bool) -> Result<()> {
        self.write(value as u32, 1)
    }
}
