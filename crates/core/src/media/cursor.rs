use crate::error::{DepayError, Result};

/// Sequential reader over an RTP payload.
///
/// Supports big-endian byte reads and MSB-first bit reads. Every read is
/// bounds-checked; running past the end yields
/// [`DepayError::MalformedPayload`] instead of a panic.
///
/// A byte read following a partial bit read starts at the next byte
/// boundary.
#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
    data: &'a [u8],
    pos: usize,
    bit_offset: u8,
}

impl<'a> ByteCursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            bit_offset: 0,
        }
    }

    /// Byte position of the next byte read.
    pub fn position(&self) -> usize {
        self.pos + usize::from(self.bit_offset > 0)
    }

    /// Bytes left for byte-aligned reads.
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.position())
    }

    /// Remaining bytes without consuming them.
    pub fn rest(&self) -> &'a [u8] {
        &self.data[self.position().min(self.data.len())..]
    }

    fn align(&mut self) {
        if self.bit_offset > 0 {
            self.pos += 1;
            self.bit_offset = 0;
        }
    }

    fn ensure(&self, needed: usize) -> Result<()> {
        let available = self.remaining();
        if available < needed {
            return Err(DepayError::truncated(self.position() + needed, self.data.len()));
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.ensure(1)?;
        self.align();
        let byte = self.data[self.pos];
        self.pos += 1;
        Ok(byte)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        self.ensure(2)?;
        self.align();
        let value = u16::from_be_bytes([self.data[self.pos], self.data[self.pos + 1]]);
        self.pos += 2;
        Ok(value)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Borrow the next `len` bytes and advance past them.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        self.ensure(len)?;
        self.align();
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    pub fn skip(&mut self, len: usize) -> Result<()> {
        self.read_bytes(len).map(|_| ())
    }

    /// Read `count` bits (at most 32), most significant bit first.
    pub fn read_bits(&mut self, count: u8) -> Result<u32> {
        debug_assert!(count <= 32);
        let available_bits = (self.data.len().saturating_sub(self.pos)) * 8 - self.bit_offset as usize;
        if available_bits < count as usize {
            let needed = self.pos + (self.bit_offset as usize + count as usize).div_ceil(8);
            return Err(DepayError::truncated(needed, self.data.len()));
        }

        let mut value = 0u32;
        for _ in 0..count {
            let bit = (self.data[self.pos] >> (7 - self.bit_offset)) & 1;
            value = (value << 1) | u32::from(bit);
            self.bit_offset += 1;
            if self.bit_offset == 8 {
                self.bit_offset = 0;
                self.pos += 1;
            }
        }
        Ok(value)
    }

    pub fn read_flag(&mut self) -> Result<bool> {
        Ok(self.read_bits(1)? == 1)
    }
}
