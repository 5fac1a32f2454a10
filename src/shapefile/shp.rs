//! Reads and writes ESRI ".shp" geometry files, as per
//! https://www.esri.com/library/whitepapers/pdfs/shapefile.pdf
//!
//! Point and Polygon records are decoded. Records of any other shape type are
//! carried along as raw bytes, so a file can be filtered without us
//! understanding every record in it.

use std::fmt;
use std::fs;
use std::path::Path;
use itertools::Itertools;
use super::cursor::{ByteCursor, ByteWriter};
use super::error::{FileKind, ShapefileError};
use super::shx::{IndexEntry, ShxIndex};

pub const SHP_HEADER_LENGTH: usize = 100;
const SHP_RECORD_HEADER_LENGTH: usize = 8;
const SHP_MAGIC_NUMBER: i32 = 9994;
const SHP_VERSION: i32 = 1000;
const SHP_POINT_LENGTH: usize = 16;
const SHP_POLYGON_FIXED_LENGTH: usize = 44;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ShapeType {
    Null,
    Point,
    PolyLine,
    Polygon,
    MultiPoint,
    PointZ,
    PolyLineZ,
    PolygonZ,
    MultiPointZ,
    PointM,
    PolyLineM,
    PolygonM,
    MultiPointM,
    MultiPatch,
}

impl ShapeType {
    pub fn from_i32(i: i32) -> Option<ShapeType> {
        match i {
            0  => Some(ShapeType::Null),
            1  => Some(ShapeType::Point),
            3  => Some(ShapeType::PolyLine),
            5  => Some(ShapeType::Polygon),
            8  => Some(ShapeType::MultiPoint),
            11 => Some(ShapeType::PointZ),
            13 => Some(ShapeType::PolyLineZ),
            15 => Some(ShapeType::PolygonZ),
            18 => Some(ShapeType::MultiPointZ),
            21 => Some(ShapeType::PointM),
            23 => Some(ShapeType::PolyLineM),
            25 => Some(ShapeType::PolygonM),
            28 => Some(ShapeType::MultiPointM),
            31 => Some(ShapeType::MultiPatch),
            _ => None,
        }
    }

    pub fn to_i32(&self) -> i32 {
        match *self {
            ShapeType::Null => 0,
            ShapeType::Point => 1,
            ShapeType::PolyLine => 3,
            ShapeType::Polygon => 5,
            ShapeType::MultiPoint => 8,
            ShapeType::PointZ => 11,
            ShapeType::PolyLineZ => 13,
            ShapeType::PolygonZ => 15,
            ShapeType::MultiPointZ => 18,
            ShapeType::PointM => 21,
            ShapeType::PolyLineM => 23,
            ShapeType::PolygonM => 25,
            ShapeType::MultiPointM => 28,
            ShapeType::MultiPatch => 31,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct BoundingBox {
    pub x_min: f64,
    pub y_min: f64,
    pub x_max: f64,
    pub y_max: f64,
}

impl BoundingBox {
    pub fn of_point(p: ShpPoint) -> BoundingBox {
        BoundingBox { x_min: p.0, y_min: p.1, x_max: p.0, y_max: p.1 }
    }

    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            x_min: self.x_min.min(other.x_min),
            y_min: self.y_min.min(other.y_min),
            x_max: self.x_max.max(other.x_max),
            y_max: self.y_max.max(other.y_max),
        }
    }

    /// Union of all boxes, or None if there are none.
    pub fn union_all<I: IntoIterator<Item=BoundingBox>>(boxes: I) -> Option<BoundingBox> {
        boxes.into_iter().reduce(|a, b| a.union(&b))
    }

    fn zero() -> BoundingBox {
        BoundingBox { x_min: 0., y_min: 0., x_max: 0., y_max: 0. }
    }

    fn read(cursor: &mut ByteCursor) -> Result<BoundingBox, ShapefileError> {
        Ok(BoundingBox {
            x_min: cursor.f64_le()?,
            y_min: cursor.f64_le()?,
            x_max: cursor.f64_le()?,
            y_max: cursor.f64_le()?,
        })
    }

    fn write(&self, w: &mut ByteWriter) {
        w.f64_le(self.x_min);
        w.f64_le(self.y_min);
        w.f64_le(self.x_max);
        w.f64_le(self.y_max);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct ShpPoint(pub f64, pub f64);

impl fmt::Display for ShpPoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({},{})", self.0, self.1)
    }
}

/// Rings stored the way the file stores them: one flat point list, and the
/// index where each ring starts.
///
/// Rings aren't classified as outer or inner. Every ring counts towards
/// `area()`.
#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    parts: Vec<u32>,
    points: Vec<ShpPoint>,
}

impl Polygon {
    pub fn from_rings<R: IntoIterator<Item=Vec<ShpPoint>>>(rings: R) -> Polygon {
        let mut parts = Vec::<u32>::new();
        let mut points = Vec::<ShpPoint>::new();
        for ring in rings {
            parts.push(points.len() as u32);
            points.extend(ring);
        }
        Polygon {
            parts: parts,
            points: points,
        }
    }

    pub fn parts(&self) -> &[u32] {
        &self.parts
    }

    pub fn points(&self) -> &[ShpPoint] {
        &self.points
    }

    /// Each ring, `points[parts[i]..parts[i + 1]]`.
    pub fn rings<'a>(&'a self) -> impl Iterator<Item=&'a [ShpPoint]> + 'a {
        let points = &self.points[..];
        self.parts.iter()
            .map(|&p| p as usize)
            .chain(Some(points.len()))
            .tuple_windows()
            .map(move |(start, end)| &points[start..end])
    }

    pub fn bounding_box(&self) -> Option<BoundingBox> {
        BoundingBox::union_all(self.points.iter().map(|&p| BoundingBox::of_point(p)))
    }

    /// Sum of every ring's absolute shoelace area. Holes are added, not
    /// subtracted.
    pub fn area(&self) -> f64 {
        self.rings().map(ring_area).sum()
    }

    fn content_length(&self) -> usize {
        SHP_POLYGON_FIXED_LENGTH + 4 * self.parts.len() + SHP_POINT_LENGTH * self.points.len()
    }
}

/// Absolute shoelace area of one ring. An unclosed ring is treated as closed.
pub fn ring_area(ring: &[ShpPoint]) -> f64 {
    let mut a = 0f64;
    for (p1, p2) in ring.iter().chain(ring.first()).tuple_windows() {
        a += p1.0 * p2.1 - p2.0 * p1.1;
    }
    a.abs() / 2.
}

/// Square metres in one pyeong, the unit Korean parcel areas are quoted in.
pub const SQUARE_METERS_PER_PYEONG: f64 = 3.3058;

pub fn to_pyeong(square_meters: f64) -> f64 {
    square_meters / SQUARE_METERS_PER_PYEONG
}

#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    Null,
    Point(ShpPoint),
    Polygon(Polygon),
    /// A record of a shape type we don't decode, copied verbatim. `content`
    /// starts with the 4-byte shape type.
    Other { shape_type: i32, content: Vec<u8> },
}

impl Geometry {
    pub fn shape_type(&self) -> i32 {
        match *self {
            Geometry::Null => 0,
            Geometry::Point(_) => 1,
            Geometry::Polygon(_) => 5,
            Geometry::Other { shape_type, .. } => shape_type,
        }
    }

    pub fn bounding_box(&self) -> Option<BoundingBox> {
        match *self {
            Geometry::Null => None,
            Geometry::Point(p) => Some(BoundingBox::of_point(p)),
            Geometry::Polygon(ref polygon) => polygon.bounding_box(),
            Geometry::Other { shape_type, ref content } => other_bounding_box(shape_type, content),
        }
    }

    /// Area in square map units. Points and Nulls have none.
    ///
    /// Returns UnsupportedShapeType for records we carry without decoding.
    pub fn area(&self) -> Result<f64, ShapefileError> {
        match *self {
            Geometry::Null | Geometry::Point(_) => Ok(0.),
            Geometry::Polygon(ref polygon) => Ok(polygon.area()),
            Geometry::Other { shape_type, .. } => Err(ShapefileError::UnsupportedShapeType {
                file: FileKind::Shp,
                record: None,
                shape_type: shape_type,
            }),
        }
    }

    fn write(&self, w: &mut ByteWriter) {
        match *self {
            Geometry::Null => w.i32_le(0),
            Geometry::Point(p) => {
                w.i32_le(1);
                w.f64_le(p.0);
                w.f64_le(p.1);
            }
            Geometry::Polygon(ref polygon) => {
                w.i32_le(5);
                polygon.bounding_box().unwrap_or_else(BoundingBox::zero).write(w);
                w.i32_le(polygon.parts.len() as i32);
                w.i32_le(polygon.points.len() as i32);
                for &part in polygon.parts.iter() {
                    w.i32_le(part as i32);
                }
                for p in polygon.points.iter() {
                    w.f64_le(p.0);
                    w.f64_le(p.1);
                }
            }
            Geometry::Other { ref content, .. } => {
                w.bytes(content);
                // content lengths are counted in 16-bit words
                if content.len() % 2 == 1 {
                    w.u8(0);
                }
            }
        }
    }

    fn content_length(&self) -> usize {
        match *self {
            Geometry::Null => 4,
            Geometry::Point(_) => 4 + SHP_POINT_LENGTH,
            Geometry::Polygon(ref polygon) => polygon.content_length(),
            Geometry::Other { ref content, .. } => content.len() + content.len() % 2,
        }
    }
}

/// Shape types we don't decode still put a bounding box or a point right
/// after the shape type.
fn other_bounding_box(shape_type: i32, content: &[u8]) -> Option<BoundingBox> {
    let mut cursor = ByteCursor::new(content, FileKind::Shp);
    cursor.skip(4).ok()?;
    match ShapeType::from_i32(shape_type) {
        Some(ShapeType::PointZ) | Some(ShapeType::PointM) => {
            let x = cursor.f64_le().ok()?;
            let y = cursor.f64_le().ok()?;
            Some(BoundingBox::of_point(ShpPoint(x, y)))
        }
        Some(ShapeType::Null) | None => None,
        Some(_) => BoundingBox::read(&mut cursor).ok(),
    }
}

/// The 100-byte header shared by ".shp" and ".shx".
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ShpHeader {
    pub file_n_bytes: usize,
    pub shape_type: ShapeType,
    pub bounding_box: BoundingBox,
}

/// Reads the first 100 bytes of a ".shp" or ".shx" file and checks the
/// declared file length against the real one.
pub(crate) fn read_header(bytes: &[u8], file: FileKind) -> Result<ShpHeader, ShapefileError> {
    let mut cursor = ByteCursor::new(bytes, file);

    let magic_number = cursor.i32_be()?;
    if magic_number != SHP_MAGIC_NUMBER {
        return Err(ShapefileError::NotAShapefile { file: file, found: magic_number });
    }
    if bytes.len() < SHP_HEADER_LENGTH {
        return Err(ShapefileError::TruncatedFile { file: file, expected: SHP_HEADER_LENGTH, actual: bytes.len() });
    }

    cursor.seek(24)?;
    let file_n_bytes = cursor.u32_be()? as usize * 2;
    let version = cursor.i32_le()?;
    let shape_type_i32 = cursor.i32_le()?;
    let bounding_box = BoundingBox::read(&mut cursor)?;

    if version != SHP_VERSION {
        return Err(ShapefileError::corrupt(file, 28, format!("version is {}, expected {}", version, SHP_VERSION)));
    }

    let shape_type = ShapeType::from_i32(shape_type_i32).ok_or_else(|| ShapefileError::UnsupportedShapeType {
        file: file,
        record: None,
        shape_type: shape_type_i32,
    })?;

    if file_n_bytes > bytes.len() {
        return Err(ShapefileError::TruncatedFile { file: file, expected: file_n_bytes, actual: bytes.len() });
    }
    if file_n_bytes < bytes.len() {
        return Err(ShapefileError::corrupt(file, 24, format!("file length field says {} bytes, but the file is {} bytes", file_n_bytes, bytes.len())));
    }

    Ok(ShpHeader {
        file_n_bytes: file_n_bytes,
        shape_type: shape_type,
        bounding_box: bounding_box,
    })
}

pub(crate) fn write_header(w: &mut ByteWriter, file_n_bytes: usize, shape_type: ShapeType, bounding_box: &BoundingBox) {
    w.i32_be(SHP_MAGIC_NUMBER);
    w.zeroes(20);
    w.u32_be((file_n_bytes / 2) as u32);
    w.i32_le(SHP_VERSION);
    w.i32_le(shape_type.to_i32());
    bounding_box.write(w);
    // Z and M ranges
    w.zeroes(32);
}

fn parse_polygon(content: &[u8], record_start: usize) -> Result<Polygon, ShapefileError> {
    let corrupt = |message: String| ShapefileError::corrupt(FileKind::Shp, record_start, message);
    if content.len() < SHP_POLYGON_FIXED_LENGTH {
        return Err(corrupt(format!("Polygon record needs at least {} bytes, but has {}", SHP_POLYGON_FIXED_LENGTH, content.len())));
    }

    let mut cursor = ByteCursor::new(content, FileKind::Shp);
    cursor.seek(36)?;
    let num_parts = cursor.i32_le()?;
    let num_points = cursor.i32_le()?;
    if num_parts < 0 || num_points < 0 {
        return Err(corrupt(format!("Polygon record has {} parts and {} points", num_parts, num_points)));
    }
    let (num_parts, num_points) = (num_parts as usize, num_points as usize);

    let needed_len = SHP_POLYGON_FIXED_LENGTH + 4 * num_parts + SHP_POINT_LENGTH * num_points;
    if needed_len != content.len() {
        return Err(corrupt(format!("Polygon record needs {} bytes (it has {} parts and {} points), but the record header says it has {} bytes", needed_len, num_parts, num_points, content.len())));
    }

    let mut parts = Vec::<u32>::with_capacity(num_parts);
    for _ in 0..num_parts {
        parts.push(cursor.u32_le()?);
    }

    if parts.first().map(|&p| p != 0).unwrap_or(false) {
        return Err(corrupt(format!("Polygon record's first ring starts at point {}, not 0", parts[0])));
    }
    let end_of_points = num_points as u32;
    for (&start, &end) in parts.iter().chain(Some(&end_of_points)).tuple_windows() {
        if start > end {
            return Err(corrupt(format!("Polygon record has a ring with points {}-{}, but there are {} points in the record", start, end, num_points)));
        }
    }

    let mut points = Vec::<ShpPoint>::with_capacity(num_points);
    for _ in 0..num_points {
        let x = cursor.f64_le()?;
        let y = cursor.f64_le()?;
        points.push(ShpPoint(x, y));
    }

    Ok(Polygon {
        parts: parts,
        points: points,
    })
}

fn parse_geometry(content: &[u8], record_start: usize) -> Result<Geometry, ShapefileError> {
    let mut cursor = ByteCursor::new(content, FileKind::Shp);
    let shape_type = cursor.i32_le().map_err(|_| ShapefileError::corrupt(FileKind::Shp, record_start, "record is too short to hold a shape type"))?;

    match shape_type {
        0 => Ok(Geometry::Null),
        1 => {
            if content.len() < 4 + SHP_POINT_LENGTH {
                return Err(ShapefileError::corrupt(FileKind::Shp, record_start, format!("Point record needs {} bytes, but has {}", 4 + SHP_POINT_LENGTH, content.len())));
            }
            let x = cursor.f64_le()?;
            let y = cursor.f64_le()?;
            Ok(Geometry::Point(ShpPoint(x, y)))
        }
        5 => parse_polygon(content, record_start).map(Geometry::Polygon),
        _ => Ok(Geometry::Other {
            shape_type: shape_type,
            content: content.to_vec(),
        }),
    }
}

/// All records of a ".shp" file, in file order.
///
/// Record numbers, content lengths, the file length and the bounding box are
/// not stored: `encode()` derives them from the geometries.
#[derive(Debug, Clone, PartialEq)]
pub struct ShpGeometryStream {
    shape_type: ShapeType,
    geometries: Vec<Geometry>,
}

impl ShpGeometryStream {
    pub fn new(shape_type: ShapeType) -> ShpGeometryStream {
        ShpGeometryStream {
            shape_type: shape_type,
            geometries: vec![],
        }
    }

    pub fn parse(bytes: &[u8]) -> Result<ShpGeometryStream, ShapefileError> {
        ShpGeometryStream::parse_indexed(bytes).map(|(stream, _)| stream)
    }

    /// Parses the file and also returns where each record actually sits, for
    /// checking a ".shx" against.
    pub(crate) fn parse_indexed(bytes: &[u8]) -> Result<(ShpGeometryStream, Vec<IndexEntry>), ShapefileError> {
        let header = read_header(bytes, FileKind::Shp)?;
        let mut cursor = ByteCursor::new(bytes, FileKind::Shp);
        cursor.seek(SHP_HEADER_LENGTH)?;

        let mut geometries = Vec::<Geometry>::new();
        let mut entries = Vec::<IndexEntry>::new();

        while cursor.remaining() > 0 {
            let record_start = cursor.position();
            if cursor.remaining() < SHP_RECORD_HEADER_LENGTH {
                return Err(ShapefileError::TruncatedFile {
                    file: FileKind::Shp,
                    expected: record_start + SHP_RECORD_HEADER_LENGTH,
                    actual: bytes.len(),
                });
            }

            let record_number = cursor.u32_be()?;
            let content_length_words = cursor.u32_be()?;
            if record_number as usize != geometries.len() + 1 {
                debug!(".shp record {} is numbered {}; renumbering", geometries.len() + 1, record_number);
            }

            let content = cursor.take(content_length_words as usize * 2)?;
            geometries.push(parse_geometry(content, record_start)?);
            entries.push(IndexEntry {
                offset_words: (record_start / 2) as u32,
                content_length_words: content_length_words,
            });
        }

        debug!("Read .shp: {} records of type {:?}", geometries.len(), header.shape_type);

        Ok((ShpGeometryStream { shape_type: header.shape_type, geometries: geometries }, entries))
    }

    pub fn open(path: &Path) -> Result<ShpGeometryStream, ShapefileError> {
        let bytes = fs::read(path).map_err(|err| ShapefileError::io(path, err))?;
        ShpGeometryStream::parse(&bytes)
    }

    pub fn shape_type(&self) -> ShapeType {
        self.shape_type
    }

    pub fn geometries(&self) -> &[Geometry] {
        &self.geometries
    }

    pub fn len(&self) -> usize {
        self.geometries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.geometries.is_empty()
    }

    pub fn push(&mut self, geometry: Geometry) {
        self.geometries.push(geometry);
    }

    /// Union of every record's box; all zeroes when there are none.
    pub fn bounding_box(&self) -> BoundingBox {
        BoundingBox::union_all(self.geometries.iter().filter_map(|g| g.bounding_box()))
            .unwrap_or_else(BoundingBox::zero)
    }

    /// Indices must already be checked against `len()`.
    pub(crate) fn select(&self, indices: &[usize]) -> ShpGeometryStream {
        ShpGeometryStream {
            shape_type: self.shape_type,
            geometries: indices.iter().map(|&i| self.geometries[i].clone()).collect(),
        }
    }

    /// The ".shx" index `encode()` would produce, computed from record sizes
    /// without serializing anything.
    pub fn index(&self) -> ShxIndex {
        let mut offset = SHP_HEADER_LENGTH;
        let entries = self.geometries.iter().map(|g| {
            let content_length = g.content_length();
            let entry = IndexEntry {
                offset_words: (offset / 2) as u32,
                content_length_words: (content_length / 2) as u32,
            };
            offset += SHP_RECORD_HEADER_LENGTH + content_length;
            entry
        }).collect();

        ShxIndex::new(self.shape_type, self.bounding_box(), entries)
    }

    /// Serializes the ".shp" file along with its ".shx" index. Each record is
    /// written at the offset and with the length its index entry gives.
    pub fn encode(&self) -> (Vec<u8>, ShxIndex) {
        let shx = self.index();
        let file_n_bytes = shx.entries().last()
            .map(|e| 2 * (e.offset_words + 4 + e.content_length_words) as usize)
            .unwrap_or(SHP_HEADER_LENGTH);

        let mut w = ByteWriter::with_capacity(file_n_bytes);
        write_header(&mut w, file_n_bytes, self.shape_type, &shx.bounding_box());

        for (i, (geometry, entry)) in self.geometries.iter().zip(shx.entries().iter()).enumerate() {
            debug_assert_eq!(2 * entry.offset_words as usize, w.len());
            w.u32_be(i as u32 + 1);
            w.u32_be(entry.content_length_words);

            let content_start = w.len();
            geometry.write(&mut w);
            debug_assert_eq!(2 * entry.content_length_words as usize, w.len() - content_start);
        }

        let bytes = w.into_inner();
        debug_assert_eq!(file_n_bytes, bytes.len());

        (bytes, shx)
    }
}
