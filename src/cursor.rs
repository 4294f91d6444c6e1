//! Bit cursor: MSB-first bit packing over a byte buffer.
//!
//! Bit 0 is the high bit of the first byte. A field of `width` bits is written
//! most significant bit first, so a byte-aligned `uint16` lands in big-endian
//! order. Byte-aligned 8/16/32/64-bit accesses go through [`byteorder`].

use crate::codec::CodecError;
use byteorder::{BigEndian, ByteOrder};

fn mask(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

fn is_whole_bytes(width: u32) -> bool {
    matches!(width, 8 | 16 | 32 | 64)
}

/// Number of bits needed to hold `value` (0 for 0).
pub fn bit_length(value: u64) -> u32 {
    64 - value.leading_zeros()
}

/// Rounds `bits` up to the next multiple of `n` (`n` = 0 or 1 leaves it unchanged).
pub fn align_up(bits: u64, n: u64) -> u64 {
    if n <= 1 {
        bits
    } else {
        bits.div_ceil(n) * n
    }
}

/// Write cursor bounded by a maximum capacity in bits.
///
/// Invariant: `buf.len() == ceil(bit_offset / 8)`; unused low bits of the last
/// byte are zero.
#[derive(Debug)]
pub struct BitWriter {
    buf: Vec<u8>,
    bit_offset: u64,
    capacity_bits: u64,
}

impl BitWriter {
    /// Pre-allocates `ceil(capacity_bits / 8)` bytes; writing past `capacity_bits` fails.
    pub fn with_capacity(capacity_bits: u64) -> Self {
        let bytes = usize::try_from(capacity_bits.div_ceil(8)).unwrap_or(0);
        BitWriter {
            buf: Vec::with_capacity(bytes),
            bit_offset: 0,
            capacity_bits,
        }
    }

    pub fn bit_offset(&self) -> u64 {
        self.bit_offset
    }

    pub fn capacity_bits(&self) -> u64 {
        self.capacity_bits
    }

    fn reserve(&self, width: u64) -> Result<(), CodecError> {
        let requested = self.bit_offset.saturating_add(width);
        if requested > self.capacity_bits {
            return Err(CodecError::CapacityExceeded {
                requested_bits: requested,
                capacity_bits: self.capacity_bits,
            });
        }
        Ok(())
    }

    /// Appends the low `width` bits of `value`, most significant first.
    pub fn write_bits(&mut self, value: u64, width: u32) -> Result<(), CodecError> {
        if width > 64 {
            return Err(CodecError::InvalidWidth(width));
        }
        if width == 0 {
            return Ok(());
        }
        self.reserve(u64::from(width))?;
        let value = value & mask(width);

        if self.bit_offset % 8 == 0 && is_whole_bytes(width) {
            let n = (width / 8) as usize;
            let start = self.buf.len();
            self.buf.resize(start + n, 0);
            BigEndian::write_uint(&mut self.buf[start..], value, n);
            self.bit_offset += u64::from(width);
            return Ok(());
        }

        let mut remaining = width;
        while remaining > 0 {
            let used = (self.bit_offset % 8) as u32;
            if used == 0 {
                self.buf.push(0);
            }
            let free = 8 - used;
            let take = free.min(remaining);
            let chunk = ((value >> (remaining - take)) & mask(take)) as u8;
            if let Some(last) = self.buf.last_mut() {
                *last |= chunk << (free - take);
            }
            remaining -= take;
            self.bit_offset += u64::from(take);
        }
        Ok(())
    }

    pub fn write_bool(&mut self, value: bool) -> Result<(), CodecError> {
        self.write_bits(u64::from(value), 1)
    }

    /// Writes `width` zero bits; `width` may exceed 64.
    pub fn write_zeros(&mut self, width: u64) -> Result<(), CodecError> {
        self.reserve(width)?;
        let end = self.bit_offset + width;
        let bytes = usize::try_from(end.div_ceil(8)).map_err(|_| CodecError::CapacityExceeded {
            requested_bits: end,
            capacity_bits: self.capacity_bits,
        })?;
        self.buf.resize(bytes, 0);
        self.bit_offset = end;
        Ok(())
    }

    /// Appends whole bytes at the current (possibly unaligned) offset.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        self.reserve((bytes.len() as u64).saturating_mul(8))?;
        if self.bit_offset % 8 == 0 {
            self.buf.extend_from_slice(bytes);
            self.bit_offset += bytes.len() as u64 * 8;
            return Ok(());
        }
        for &b in bytes {
            self.write_bits(u64::from(b), 8)?;
        }
        Ok(())
    }

    /// Zero-fills up to the next multiple of `n` bits.
    pub fn align(&mut self, n: u32) -> Result<(), CodecError> {
        let target = align_up(self.bit_offset, u64::from(n));
        self.write_zeros(target - self.bit_offset)
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Read cursor over a byte slice.
///
/// In strict mode reading past the end fails with [`CodecError::BufferUnderrun`].
/// In zero-extended mode the slice behaves as if followed by infinitely many zero
/// bits, which is how extensible messages accept shorter, older encodings.
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    data: &'a [u8],
    bit_offset: u64,
    zero_extend: bool,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        BitReader {
            data,
            bit_offset: 0,
            zero_extend: false,
        }
    }

    pub fn zero_extended(data: &'a [u8]) -> Self {
        BitReader {
            data,
            bit_offset: 0,
            zero_extend: true,
        }
    }

    pub fn bit_offset(&self) -> u64 {
        self.bit_offset
    }

    pub fn len_bits(&self) -> u64 {
        self.data.len() as u64 * 8
    }

    /// Bits left before the end of the underlying slice (0 once past it).
    pub fn remaining_bits(&self) -> u64 {
        self.len_bits().saturating_sub(self.bit_offset)
    }

    fn check(&self, width: u64) -> Result<(), CodecError> {
        if !self.zero_extend && width > self.remaining_bits() {
            return Err(CodecError::BufferUnderrun {
                offset_bits: self.bit_offset,
                requested_bits: width,
                available_bits: self.remaining_bits(),
            });
        }
        Ok(())
    }

    /// Reads `width` bits as an unsigned integer, MSB-first.
    pub fn read_bits(&mut self, width: u32) -> Result<u64, CodecError> {
        if width > 64 {
            return Err(CodecError::InvalidWidth(width));
        }
        if width == 0 {
            return Ok(0);
        }
        self.check(u64::from(width))?;

        if self.bit_offset % 8 == 0
            && is_whole_bytes(width)
            && u64::from(width) <= self.remaining_bits()
        {
            let start = (self.bit_offset / 8) as usize;
            let n = (width / 8) as usize;
            let v = BigEndian::read_uint(&self.data[start..start + n], n);
            self.bit_offset += u64::from(width);
            return Ok(v);
        }

        let mut out = 0u64;
        let mut remaining = width;
        while remaining > 0 {
            let used = (self.bit_offset % 8) as u32;
            let free = 8 - used;
            let take = free.min(remaining);
            let byte = usize::try_from(self.bit_offset / 8)
                .ok()
                .and_then(|i| self.data.get(i).copied())
                .unwrap_or(0);
            let chunk = (u64::from(byte) >> (free - take)) & mask(take);
            out = (out << take) | chunk;
            remaining -= take;
            self.bit_offset += u64::from(take);
        }
        Ok(out)
    }

    pub fn read_bool(&mut self) -> Result<bool, CodecError> {
        Ok(self.read_bits(1)? != 0)
    }

    /// Advances by `width` bits without interpreting them.
    pub fn skip(&mut self, width: u64) -> Result<(), CodecError> {
        self.check(width)?;
        self.bit_offset = self.bit_offset.saturating_add(width);
        Ok(())
    }

    /// Skips to the next multiple of `n` bits.
    pub fn align(&mut self, n: u32) -> Result<(), CodecError> {
        let target = align_up(self.bit_offset, u64::from(n));
        self.skip(target - self.bit_offset)
    }

    /// Reads `len` whole bytes at the current (possibly unaligned) offset.
    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>, CodecError> {
        self.check((len as u64).saturating_mul(8))?;
        let mut out = Vec::with_capacity(len);
        for _ in 0..len {
            out.push(self.read_bits(8)? as u8);
        }
        Ok(out)
    }
}

/// Clears `width` bits starting at `bit_offset` inside `buf`; bits past the end are ignored.
pub fn clear_bits(buf: &mut [u8], bit_offset: u64, width: u64) {
    let end = bit_offset.saturating_add(width).min(buf.len() as u64 * 8);
    let mut pos = bit_offset;
    while pos < end {
        let byte = (pos / 8) as usize;
        let bit = (pos % 8) as u32;
        if bit == 0 && end - pos >= 8 {
            buf[byte] = 0;
            pos += 8;
            continue;
        }
        buf[byte] &= !(0x80u8 >> bit);
        pos += 1;
    }
}
