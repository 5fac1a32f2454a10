//! Reads and writes ".shp", ".shx" and ".dbf" files as one unit.
//!
//! There are two pieces of information these files _don't_ contain:
//!
//! * The _projection_ isn't specified. Sometimes there's a ".prj" file that
//!   contains that information. This library copies it byte for byte and
//!   returns `f64` coordinates as they are in the file.
//! * The _text encoding_ of the ".dbf" isn't reliable. A ".cpg" file or the
//!   ".dbf" language driver byte may name one; otherwise we assume CP949,
//!   which is what Korean cadastral data ships in.
//!
//! Nothing in a header is trusted on write: file lengths, record counts,
//! record numbers, ".shx" offsets and bounding boxes are all recomputed from
//! the records.
//!
//! # Examples
//!
//! Open by base name (or by any of the three filenames):
//!
//! ```no_run
//! use std::path::Path;
//! use cadastre_shapefile::shapefile::ShapefileSet;
//!
//! let set = ShapefileSet::open(Path::new("data/AL_D160_50_20250924.shp")).unwrap();
//!
//! for (record, geometry) in set.records() {
//!     println!("{:?} {:?}", record.get("A5"), geometry.bounding_box());
//! }
//! ```
//!
//! Build a set from scratch and write it:
//!
//! ```
//! # extern crate cadastre_shapefile;
//! # extern crate tempfile;
//! # fn main() {
//! use cadastre_shapefile::shapefile::{DbfTable, FieldDescriptor, Geometry, Record,
//!     ShapeType, ShapefileSet, ShpGeometryStream, ShpPoint, TextCodec};
//!
//! let mut dbf = DbfTable::new(vec![ FieldDescriptor::character("APT_NM", 20) ], TextCodec::korean()).unwrap();
//! let mut shp = ShpGeometryStream::new(ShapeType::Point);
//!
//! dbf.push_record(Record::new(vec![ "래미안".to_string() ])).unwrap();
//! shp.push(Geometry::Point(ShpPoint(127.0286, 37.4837)));
//!
//! let set = ShapefileSet::from_parts(dbf, shp, None).unwrap();
//!
//! let dir = tempfile::tempdir().unwrap();
//! let base = dir.path().join("apartments");
//! set.write(&base).unwrap();
//!
//! let reread = ShapefileSet::open(&base).unwrap();
//! assert_eq!(Some("래미안"), reread.record(0).unwrap().0.get("APT_NM"));
//! # }
//! ```

mod cursor;
pub mod dbf;
pub mod error;
pub mod shapefile;
pub mod shp;
pub mod shx;
pub mod text;

pub use self::dbf::{DbfTable, FieldDescriptor, FieldType, Record, RecordRef};
pub use self::error::{EncodingFallback, FileKind, ShapefileError};
pub use self::shapefile::{FieldTransform, OpenOptions, ShapefileSet};
pub use self::shp::{BoundingBox, Geometry, Polygon, ShapeType, ShpGeometryStream, ShpPoint};
pub use self::shx::{IndexEntry, ShxIndex};
pub use self::text::{Justify, TextCodec};
