//! Fixed-offset reads and writes with explicit byte order.
//!
//! Every layout in ".shp", ".shx" and ".dbf" is a run of fixed-width fields,
//! some big-endian and some little-endian. Reads go through `ByteCursor` so a
//! short file becomes a `TruncatedFile` error naming the offending offset
//! instead of a panic.

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use super::error::{FileKind, ShapefileError};

#[derive(Debug)]
pub struct ByteCursor<'a> {
    buf: &'a [u8],
    pos: usize,
    file: FileKind,
}

impl<'a> ByteCursor<'a> {
    pub fn new(buf: &'a [u8], file: FileKind) -> ByteCursor<'a> {
        ByteCursor {
            buf: buf,
            pos: 0,
            file: file,
        }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Moves to an absolute offset. Seeking past the end is an error.
    pub fn seek(&mut self, pos: usize) -> Result<(), ShapefileError> {
        if pos > self.buf.len() {
            return Err(self.truncated(pos));
        }
        self.pos = pos;
        Ok(())
    }

    /// Returns the next `n` bytes and advances past them.
    pub fn take(&mut self, n: usize) -> Result<&'a [u8], ShapefileError> {
        let end = self.pos.checked_add(n).ok_or_else(|| self.truncated(usize::max_value()))?;
        if end > self.buf.len() {
            return Err(self.truncated(end));
        }
        let buf: &'a [u8] = self.buf;
        let ret = &buf[self.pos..end];
        self.pos = end;
        Ok(ret)
    }

    /// Returns the next byte without consuming it.
    pub fn peek(&self) -> Result<u8, ShapefileError> {
        self.buf.get(self.pos).cloned().ok_or_else(|| self.truncated(self.pos + 1))
    }

    pub fn skip(&mut self, n: usize) -> Result<(), ShapefileError> {
        self.take(n).map(|_| ())
    }

    pub fn u8(&mut self) -> Result<u8, ShapefileError> {
        Ok(self.take(1)?[0])
    }

    pub fn u16_le(&mut self) -> Result<u16, ShapefileError> {
        Ok(LittleEndian::read_u16(self.take(2)?))
    }

    pub fn u32_le(&mut self) -> Result<u32, ShapefileError> {
        Ok(LittleEndian::read_u32(self.take(4)?))
    }

    pub fn i32_le(&mut self) -> Result<i32, ShapefileError> {
        Ok(LittleEndian::read_i32(self.take(4)?))
    }

    pub fn u32_be(&mut self) -> Result<u32, ShapefileError> {
        Ok(BigEndian::read_u32(self.take(4)?))
    }

    pub fn i32_be(&mut self) -> Result<i32, ShapefileError> {
        Ok(BigEndian::read_i32(self.take(4)?))
    }

    pub fn f64_le(&mut self) -> Result<f64, ShapefileError> {
        Ok(LittleEndian::read_f64(self.take(8)?))
    }

    fn truncated(&self, expected: usize) -> ShapefileError {
        ShapefileError::TruncatedFile {
            file: self.file,
            expected: expected,
            actual: self.buf.len(),
        }
    }
}

/// Growable output buffer; the write-side twin of `ByteCursor`.
#[derive(Debug, Default)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    pub fn with_capacity(n: usize) -> ByteWriter {
        ByteWriter { buf: Vec::with_capacity(n) }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn zeroes(&mut self, n: usize) {
        let len = self.buf.len();
        self.buf.resize(len + n, 0);
    }

    pub fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn u16_le(&mut self, v: u16) {
        let mut b = [ 0u8; 2 ];
        LittleEndian::write_u16(&mut b, v);
        self.bytes(&b);
    }

    pub fn u32_le(&mut self, v: u32) {
        let mut b = [ 0u8; 4 ];
        LittleEndian::write_u32(&mut b, v);
        self.bytes(&b);
    }

    pub fn i32_le(&mut self, v: i32) {
        let mut b = [ 0u8; 4 ];
        LittleEndian::write_i32(&mut b, v);
        self.bytes(&b);
    }

    pub fn u32_be(&mut self, v: u32) {
        let mut b = [ 0u8; 4 ];
        BigEndian::write_u32(&mut b, v);
        self.bytes(&b);
    }

    pub fn i32_be(&mut self, v: i32) {
        let mut b = [ 0u8; 4 ];
        BigEndian::write_i32(&mut b, v);
        self.bytes(&b);
    }

    pub fn f64_le(&mut self, v: f64) {
        let mut b = [ 0u8; 8 ];
        LittleEndian::write_f64(&mut b, v);
        self.bytes(&b);
    }

    /// Overwrites a big-endian u32 at an absolute offset already written.
    pub fn patch_u32_be(&mut self, pos: usize, v: u32) {
        BigEndian::write_u32(&mut self.buf[pos..pos + 4], v);
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mixed_endianness() {
        let buf = [ 0x00, 0x00, 0x27, 0x0a, 0xe8, 0x03, 0x00, 0x00 ];
        let mut cursor = ByteCursor::new(&buf, FileKind::Shp);
        assert_eq!(9994, cursor.u32_be().unwrap());
        assert_eq!(1000, cursor.u32_le().unwrap());
        assert_eq!(0, cursor.remaining());
    }

    #[test]
    fn short_read_is_truncated_file() {
        let buf = [ 0u8; 6 ];
        let mut cursor = ByteCursor::new(&buf, FileKind::Shx);
        cursor.u32_be().unwrap();
        match cursor.u32_be() {
            Err(ShapefileError::TruncatedFile { file, expected, actual }) => {
                assert_eq!(FileKind::Shx, file);
                assert_eq!(8, expected);
                assert_eq!(6, actual);
            }
            other => panic!("expected TruncatedFile, got {:?}", other),
        }
    }

    #[test]
    fn writer_matches_cursor() {
        let mut w = ByteWriter::default();
        w.u32_be(9994);
        w.i32_le(-5);
        w.f64_le(1.5);
        w.u16_le(513);
        w.patch_u32_be(0, 42);
        let bytes = w.into_inner();

        let mut cursor = ByteCursor::new(&bytes, FileKind::Shp);
        assert_eq!(42, cursor.u32_be().unwrap());
        assert_eq!(-5, cursor.i32_le().unwrap());
        assert_eq!(1.5, cursor.f64_le().unwrap());
        assert_eq!(513, cursor.u16_le().unwrap());
    }
}
