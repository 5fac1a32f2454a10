//! Reads and writes ".shx" index files: the ".shp" header, then one
//! (offset, content length) pair per record, both big-endian and both counted
//! in 16-bit words.
//!
//! A ".shx" is only ever built from its ".shp": from the record sizes of the
//! geometries it indexes (`ShpGeometryStream::index()`), or from the offsets
//! actually found in the ".shp" file on open.

use std::fs;
use std::path::Path;
use super::cursor::{ByteCursor, ByteWriter};
use super::error::{FileKind, ShapefileError};
use super::shp::{self, BoundingBox, ShapeType, SHP_HEADER_LENGTH};

const SHX_ENTRY_LENGTH: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    /// Where the record header starts in the ".shp", in 16-bit words.
    pub offset_words: u32,
    /// Length of the record content (not counting its 8-byte header), in
    /// 16-bit words.
    pub content_length_words: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShxIndex {
    shape_type: ShapeType,
    bounding_box: BoundingBox,
    entries: Vec<IndexEntry>,
}

impl ShxIndex {
    pub(crate) fn new(shape_type: ShapeType, bounding_box: BoundingBox, entries: Vec<IndexEntry>) -> ShxIndex {
        ShxIndex {
            shape_type: shape_type,
            bounding_box: bounding_box,
            entries: entries,
        }
    }

    pub fn parse(bytes: &[u8]) -> Result<ShxIndex, ShapefileError> {
        let header = shp::read_header(bytes, FileKind::Shx)?;

        let body = bytes.len() - SHP_HEADER_LENGTH;
        if body % SHX_ENTRY_LENGTH != 0 {
            return Err(ShapefileError::corrupt(FileKind::Shx, 24, format!("{} bytes after the header is not a whole number of {}-byte entries", body, SHX_ENTRY_LENGTH)));
        }

        let mut cursor = ByteCursor::new(bytes, FileKind::Shx);
        cursor.seek(SHP_HEADER_LENGTH)?;

        let mut entries = Vec::<IndexEntry>::with_capacity(body / SHX_ENTRY_LENGTH);
        while cursor.remaining() > 0 {
            entries.push(IndexEntry {
                offset_words: cursor.u32_be()?,
                content_length_words: cursor.u32_be()?,
            });
        }

        debug!("Read .shx: {} entries", entries.len());

        Ok(ShxIndex::new(header.shape_type, header.bounding_box, entries))
    }

    pub fn open(path: &Path) -> Result<ShxIndex, ShapefileError> {
        let bytes = fs::read(path).map_err(|err| ShapefileError::io(path, err))?;
        ShxIndex::parse(&bytes)
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn shape_type(&self) -> ShapeType {
        self.shape_type
    }

    pub fn bounding_box(&self) -> BoundingBox {
        self.bounding_box
    }

    /// Checks every entry against where the records really are in the
    /// ".shp".
    pub(crate) fn check_against(&self, actual: &[IndexEntry]) -> Result<(), ShapefileError> {
        for (i, (entry, real)) in self.entries.iter().zip(actual.iter()).enumerate() {
            if entry != real {
                return Err(ShapefileError::corrupt(FileKind::Shx, SHP_HEADER_LENGTH + i * SHX_ENTRY_LENGTH, format!(
                    "entry {} says offset {} and length {} words, but the .shp record is at offset {} with length {} words",
                    i, entry.offset_words, entry.content_length_words, real.offset_words, real.content_length_words
                )));
            }
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let file_n_bytes = SHP_HEADER_LENGTH + SHX_ENTRY_LENGTH * self.entries.len();
        let mut w = ByteWriter::with_capacity(file_n_bytes);
        shp::write_header(&mut w, file_n_bytes, self.shape_type, &self.bounding_box);
        for entry in self.entries.iter() {
            w.u32_be(entry.offset_words);
            w.u32_be(entry.content_length_words);
        }
        w.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::shp::{Geometry, ShpGeometryStream, ShpPoint};

    fn three_points() -> ShpGeometryStream {
        let mut stream = ShpGeometryStream::new(ShapeType::Point);
        for i in 0..3 {
            stream.push(Geometry::Point(ShpPoint(i as f64, -(i as f64))));
        }
        stream
    }

    #[test]
    fn header_matches_shp() {
        let (shp_bytes, shx) = three_points().encode();
        let bytes = shx.to_bytes();
        assert_eq!(100 + 3 * 8, bytes.len());
        // everything but the file length is identical
        assert_eq!(&shp_bytes[0..24], &bytes[0..24]);
        assert_eq!(&shp_bytes[28..100], &bytes[28..100]);

        let mut cursor = ByteCursor::new(&bytes, FileKind::Shx);
        cursor.seek(24).unwrap();
        assert_eq!(50 + 3 * 4, cursor.u32_be().unwrap());
    }

    #[test]
    fn entries_point_at_records() {
        let (shp_bytes, shx) = three_points().encode();
        let parsed = ShxIndex::parse(&shx.to_bytes()).unwrap();
        assert_eq!(shx, parsed);

        let (_, actual) = ShpGeometryStream::parse_indexed(&shp_bytes).unwrap();
        parsed.check_against(&actual).unwrap();
        assert_eq!(IndexEntry { offset_words: 50 + 14, content_length_words: 10 }, parsed.entries()[1]);
    }

    #[test]
    fn drifted_entry_is_corrupt_header() {
        let (shp_bytes, shx) = three_points().encode();
        let mut bytes = shx.to_bytes();
        // second entry's offset
        bytes[100 + 8 + 3] += 1;
        let parsed = ShxIndex::parse(&bytes).unwrap();
        let (_, actual) = ShpGeometryStream::parse_indexed(&shp_bytes).unwrap();
        match parsed.check_against(&actual) {
            Err(ShapefileError::CorruptHeader { file: FileKind::Shx, offset: 108, .. }) => {}
            other => panic!("expected CorruptHeader, got {:?}", other),
        }
    }

    #[test]
    fn partial_entry_is_corrupt_header() {
        let (_, shx) = three_points().encode();
        let mut bytes = shx.to_bytes();
        bytes.truncate(bytes.len() - 4);
        // keep the file length field honest so only the entry size is wrong
        let words = (bytes.len() / 2) as u32;
        bytes[24..28].copy_from_slice(&words.to_be_bytes());
        match ShxIndex::parse(&bytes) {
            Err(ShapefileError::CorruptHeader { file: FileKind::Shx, .. }) => {}
            other => panic!("expected CorruptHeader, got {:?}", other),
        }
    }
}
