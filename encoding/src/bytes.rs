//! A bounded cursor over a byte buffer
//! with endian-aware integer access and explicit position semantics.
use byteordered::Endianness;
use snafu::Snafu;

/// An attempted read past the end of the buffer.
#[derive(Debug, Snafu)]
#[snafu(display(
    "unexpected end of input at position {} ({} bytes needed, {} available)",
    position,
    needed,
    available
))]
pub struct OutOfBoundsError {
    pub position: usize,
    pub needed: usize,
    pub available: usize,
}

pub type Result<T> = std::result::Result<T, OutOfBoundsError>;

/// A reading cursor over a byte slice.
///
/// All multi-byte reads honor the endianness the cursor was created with.
/// Reads past the end fail with [`OutOfBoundsError`]
/// and leave the position unchanged.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
    endianness: Endianness,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8], endianness: Endianness) -> Self {
        ByteReader {
            buf,
            pos: 0,
            endianness,
        }
    }

    #[inline]
    pub fn endianness(&self) -> Endianness {
        self.endianness
    }

    /// The current position, in bytes from the start of the buffer.
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// The number of bytes left to read.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    /// Take the next `n` bytes, advancing the cursor.
    pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return OutOfBoundsSnafu {
                position: self.pos,
                needed: n,
                available: self.remaining(),
            }
            .fail();
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    /// Advance the cursor by `n` bytes without inspecting them.
    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n).map(|_| ())
    }

    /// Create a sub-reader bounded to the next `n` bytes,
    /// advancing this cursor past them.
    pub fn sub_reader(&mut self, n: usize) -> Result<ByteReader<'a>> {
        let buf = self.take(n)?;
        Ok(ByteReader::new(buf, self.endianness))
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(match self.endianness {
            Endianness::Little => u16::from_le_bytes([b[0], b[1]]),
            Endianness::Big => u16::from_be_bytes([b[0], b[1]]),
        })
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(match self.endianness {
            Endianness::Little => u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
            Endianness::Big => u32::from_be_bytes([b[0], b[1], b[2], b[3]]),
        })
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        self.read_u16().map(|v| v as i16)
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        self.read_u32().map(|v| v as i32)
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        self.read_u32().map(f32::from_bits)
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        let b = self.take(8)?;
        let bits = match self.endianness {
            Endianness::Little => {
                u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
            }
            Endianness::Big => {
                u64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
            }
        };
        Ok(f64::from_bits(bits))
    }
}

/// A writing cursor accumulating into an owned buffer.
#[derive(Debug)]
pub struct ByteWriter {
    buf: Vec<u8>,
    endianness: Endianness,
}

impl ByteWriter {
    pub fn new(endianness: Endianness) -> Self {
        ByteWriter {
            buf: Vec::new(),
            endianness,
        }
    }

    pub fn with_capacity(endianness: Endianness, capacity: usize) -> Self {
        ByteWriter {
            buf: Vec::with_capacity(capacity),
            endianness,
        }
    }

    #[inline]
    pub fn endianness(&self) -> Endianness {
        self.endianness
    }

    /// The number of bytes written so far.
    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    pub fn write_all(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn write_u16(&mut self, v: u16) {
        match self.endianness {
            Endianness::Little => self.buf.extend_from_slice(&v.to_le_bytes()),
            Endianness::Big => self.buf.extend_from_slice(&v.to_be_bytes()),
        }
    }

    pub fn write_u32(&mut self, v: u32) {
        match self.endianness {
            Endianness::Little => self.buf.extend_from_slice(&v.to_le_bytes()),
            Endianness::Big => self.buf.extend_from_slice(&v.to_be_bytes()),
        }
    }

    pub fn write_i16(&mut self, v: i16) {
        self.write_u16(v as u16);
    }

    pub fn write_i32(&mut self, v: i32) {
        self.write_u32(v as u32);
    }

    pub fn write_f32(&mut self, v: f32) {
        self.write_u32(v.to_bits());
    }

    pub fn write_f64(&mut self, v: f64) {
        let bits = v.to_bits();
        match self.endianness {
            Endianness::Little => self.buf.extend_from_slice(&bits.to_le_bytes()),
            Endianness::Big => self.buf.extend_from_slice(&bits.to_be_bytes()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_reads() {
        let data = [0x01, 0x02, 0x03, 0x04];
        let mut r = ByteReader::new(&data, Endianness::Little);
        assert_eq!(r.read_u16().unwrap(), 0x0201);
        assert_eq!(r.position(), 2);
        assert_eq!(r.remaining(), 2);
        let err = r.read_u32().unwrap_err();
        assert_eq!(err.position, 2);
        assert_eq!(err.needed, 4);
        // failed read leaves the position unchanged
        assert_eq!(r.position(), 2);
        assert_eq!(r.read_u16().unwrap(), 0x0403);
        assert!(r.is_empty());
    }

    #[test]
    fn endian_symmetry() {
        let data = [0x12, 0x34, 0x56, 0x78];
        let mut le = ByteReader::new(&data, Endianness::Little);
        let mut be = ByteReader::new(&data, Endianness::Big);
        assert_eq!(le.read_u32().unwrap(), 0x7856_3412);
        assert_eq!(be.read_u32().unwrap(), 0x1234_5678);

        let mut w = ByteWriter::new(Endianness::Big);
        w.write_u32(0x1234_5678);
        assert_eq!(w.into_inner(), data);
    }

    #[test]
    fn sub_reader_bounds() {
        let data = [1, 2, 3, 4, 5];
        let mut r = ByteReader::new(&data, Endianness::Little);
        let mut sub = r.sub_reader(3).unwrap();
        assert_eq!(sub.remaining(), 3);
        assert_eq!(r.remaining(), 2);
        assert_eq!(sub.take(3).unwrap(), &[1, 2, 3]);
        assert!(sub.take(1).is_err());
    }
}
