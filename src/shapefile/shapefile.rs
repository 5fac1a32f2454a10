use std::collections::HashSet;
use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use super::dbf::{DbfTable, FieldDescriptor, RecordRef};
use super::error::{EncodingFallback, FileKind, ShapefileError};
use super::shp::{BoundingBox, Geometry, ShpGeometryStream};
use super::shx::ShxIndex;
use super::text::TextCodec;

/// How to read a shapefile set.
///
/// # Examples
///
/// ```no_run
/// use std::path::Path;
/// use cadastre_shapefile::shapefile::{OpenOptions, TextCodec};
///
/// let set = OpenOptions::new()
///     .codec(TextCodec::korean())
///     .include_deleted(true)
///     .open(Path::new("data/AL_D160_50_20250924"))
///     .unwrap();
///
/// println!("{} records", set.record_count());
/// ```
#[derive(Debug, Clone, Default)]
pub struct OpenOptions {
    codec: Option<TextCodec>,
    include_deleted: bool,
}

impl OpenOptions {
    pub fn new() -> OpenOptions {
        OpenOptions::default()
    }

    /// Forces the ".dbf" code page. Without this, a ".cpg" file decides, then
    /// the ".dbf" language driver byte, then CP949.
    pub fn codec(mut self, codec: TextCodec) -> OpenOptions {
        self.codec = Some(codec);
        self
    }

    /// Whether `records()` shows soft-deleted ".dbf" records.
    pub fn include_deleted(mut self, include_deleted: bool) -> OpenOptions {
        self.include_deleted = include_deleted;
        self
    }

    /// Opens `base.shp`, `base.shx` and `base.dbf` (plus `base.prj` and
    /// `base.cpg` if they exist). `base` may also name any one of them.
    pub fn open(&self, base: &Path) -> Result<ShapefileSet, ShapefileError> {
        let shp_path = sibling(base, FileKind::Shp);
        let shx_path = sibling(base, FileKind::Shx);
        let dbf_path = sibling(base, FileKind::Dbf);

        let shp_bytes = fs::read(&shp_path).map_err(|err| ShapefileError::io(&shp_path, err))?;
        let shx_bytes = fs::read(&shx_path).map_err(|err| ShapefileError::io(&shx_path, err))?;
        let dbf_bytes = fs::read(&dbf_path).map_err(|err| ShapefileError::io(&dbf_path, err))?;
        let prj = read_optional(&sibling(base, FileKind::Prj))?;
        let cpg = read_optional(&sibling(base, FileKind::Cpg))?;

        let cpg_codec = cpg.as_ref().and_then(|bytes| {
            let label = String::from_utf8_lossy(bytes);
            let codec = TextCodec::from_label(&label);
            if codec.is_none() {
                warn!("Ignoring unrecognized .cpg code page {:?}", label.trim());
            }
            codec
        });

        let dbf = DbfTable::parse(&dbf_bytes, self.codec.or(cpg_codec), self.include_deleted)?;
        let (shp, actual_entries) = ShpGeometryStream::parse_indexed(&shp_bytes)?;
        let shx_file = ShxIndex::parse(&shx_bytes)?;

        check_counts(&dbf, &shp, &shx_file)?;
        if shx_file.shape_type() != shp.shape_type() {
            return Err(ShapefileError::corrupt(FileKind::Shx, 32, format!("shape type is {:?}, but the .shp says {:?}", shx_file.shape_type(), shp.shape_type())));
        }
        shx_file.check_against(&actual_entries)?;

        // entries match the .shp; the header box is recomputed like the .shp's
        let shx = ShxIndex::new(shp.shape_type(), shp.bounding_box(), actual_entries);

        debug!("Opened {}: {} records", shp_path.display(), shp.len());

        Ok(ShapefileSet {
            dbf: dbf,
            shp: shp,
            shx: shx,
            prj: prj,
            has_cpg: cpg.is_some(),
        })
    }
}

/// Rewrites the ".dbf" field table of a subset.
pub enum FieldTransform<'f> {
    /// Adds a field at the end; the closure computes its value for each
    /// record of the subset. `RecordRef::index()` is the record's position in
    /// the subset.
    Append {
        descriptor: FieldDescriptor,
        value: Box<dyn FnMut(RecordRef) -> String + 'f>,
    },
    Rename { from: String, to: String },
}

impl<'f> FieldTransform<'f> {
    pub fn append<F>(descriptor: FieldDescriptor, value: F) -> FieldTransform<'f>
        where F: FnMut(RecordRef) -> String + 'f
    {
        FieldTransform::Append {
            descriptor: descriptor,
            value: Box::new(value),
        }
    }

    pub fn rename(from: &str, to: &str) -> FieldTransform<'f> {
        FieldTransform::Rename {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    fn apply(self, mut dbf: DbfTable) -> Result<DbfTable, ShapefileError> {
        match self {
            FieldTransform::Append { descriptor, value } => dbf.with_additional_field(descriptor, value),
            FieldTransform::Rename { from, to } => {
                dbf.rename_field(&from, &to)?;
                Ok(dbf)
            }
        }
    }
}

impl<'f> fmt::Debug for FieldTransform<'f> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            FieldTransform::Append { ref descriptor, .. } => write!(f, "Append({})", descriptor),
            FieldTransform::Rename { ref from, ref to } => write!(f, "Rename({} -> {})", from, to),
        }
    }
}

/// A ".shp", ".shx" and ".dbf" triple held in memory.
///
/// Record `i` of the ".dbf" is geometry `i` of the ".shp" and entry `i` of
/// the ".shx"; all three always have the same length.
///
/// # Examples
///
/// Keep only some parcels and tag them:
///
/// ```no_run
/// use std::path::Path;
/// use cadastre_shapefile::shapefile::{FieldDescriptor, FieldTransform, ShapefileSet};
///
/// let set = ShapefileSet::open(Path::new("data/AL_D160_50_20250924")).unwrap();
///
/// let subset = set.select_where(
///     |record, _| record.get("A2").map(|a2| a2.contains("행원리")).unwrap_or(false),
///     Some(FieldTransform::append(FieldDescriptor::character("CATEGORY", 10), |_| "GREEN".to_string())),
/// ).unwrap();
///
/// subset.write(Path::new("output/haengwonri_categorized")).unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct ShapefileSet {
    dbf: DbfTable,
    shp: ShpGeometryStream,
    shx: ShxIndex,
    prj: Option<Vec<u8>>,
    has_cpg: bool,
}

impl ShapefileSet {
    /// Opens with default options: code page detected, deleted records
    /// hidden.
    pub fn open(base: &Path) -> Result<ShapefileSet, ShapefileError> {
        OpenOptions::new().open(base)
    }

    /// Pairs a table with geometries built in memory. `prj` is copied as-is
    /// when writing.
    pub fn from_parts(dbf: DbfTable, shp: ShpGeometryStream, prj: Option<Vec<u8>>) -> Result<ShapefileSet, ShapefileError> {
        let shx = shp.index();
        check_counts(&dbf, &shp, &shx)?;
        Ok(ShapefileSet {
            dbf: dbf,
            shp: shp,
            shx: shx,
            prj: prj,
            has_cpg: false,
        })
    }

    pub fn dbf(&self) -> &DbfTable {
        &self.dbf
    }

    pub fn shp(&self) -> &ShpGeometryStream {
        &self.shp
    }

    pub fn shx(&self) -> &ShxIndex {
        &self.shx
    }

    /// The ".prj" file's bytes. Never parsed.
    pub fn prj(&self) -> Option<&[u8]> {
        self.prj.as_ref().map(|p| &p[..])
    }

    /// Number of records, deleted ones included.
    pub fn record_count(&self) -> usize {
        self.shp.len()
    }

    pub fn record(&self, index: usize) -> Option<(RecordRef, &Geometry)> {
        match (self.dbf.record(index), self.shp.geometries().get(index)) {
            (Some(record), Some(geometry)) => Some((record, geometry)),
            _ => None,
        }
    }

    /// Each record with its geometry. Deleted records are skipped unless the
    /// set was opened with `include_deleted`.
    pub fn records<'a>(&'a self) -> impl Iterator<Item=(RecordRef<'a>, &'a Geometry)> + 'a {
        let geometries = self.shp.geometries();
        self.dbf.records().map(move |r| (r, &geometries[r.index()]))
    }

    pub fn bounding_box(&self) -> BoundingBox {
        self.shp.bounding_box()
    }

    /// Area of record `index`'s geometry, in square map units.
    pub fn area(&self, index: usize) -> Result<f64, ShapefileError> {
        let geometry = self.shp.geometries().get(index).ok_or_else(|| out_of_range(index, self.record_count()))?;
        geometry.area().map_err(|err| match err {
            ShapefileError::UnsupportedShapeType { file, shape_type, .. } => ShapefileError::UnsupportedShapeType {
                file: file,
                record: Some(index),
                shape_type: shape_type,
            },
            other => other,
        })
    }

    pub fn codec(&self) -> TextCodec {
        self.dbf.codec()
    }

    /// Changes the code page the ".dbf" (and ".cpg", if there was one) will
    /// be written in.
    pub fn set_codec(&mut self, codec: TextCodec) {
        self.dbf.set_codec(codec);
    }

    /// A new set holding only `indices`, in that order, with a freshly
    /// computed bounding box and index.
    ///
    /// Indices are record positions, deleted records included. Each may
    /// appear only once.
    pub fn select_subset(&self, indices: &[usize], transform: Option<FieldTransform>) -> Result<ShapefileSet, ShapefileError> {
        let n = self.record_count();
        let mut seen = HashSet::<usize>::with_capacity(indices.len());
        for &i in indices {
            if i >= n {
                return Err(out_of_range(i, n));
            }
            if !seen.insert(i) {
                return Err(ShapefileError::InvalidSelection {
                    message: format!("record {} is selected twice", i),
                });
            }
        }

        let mut dbf = self.dbf.select(indices);
        if let Some(transform) = transform {
            dbf = transform.apply(dbf)?;
        }
        let shp = self.shp.select(indices);
        let shx = shp.index();
        check_counts(&dbf, &shp, &shx)?;

        debug!("Selected {} of {} records", indices.len(), n);

        Ok(ShapefileSet {
            dbf: dbf,
            shp: shp,
            shx: shx,
            prj: self.prj.clone(),
            has_cpg: self.has_cpg,
        })
    }

    /// Like `select_subset()`, keeping the records (in file order) that the
    /// predicate accepts. Only records `records()` would show are offered.
    pub fn select_where<P>(&self, mut predicate: P, transform: Option<FieldTransform>) -> Result<ShapefileSet, ShapefileError>
        where P: FnMut(RecordRef, &Geometry) -> bool
    {
        let indices: Vec<usize> = self.records()
            .filter(|&(record, geometry)| predicate(record, geometry))
            .map(|(record, _)| record.index())
            .collect();
        self.select_subset(&indices, transform)
    }

    /// Serializes the ".shp", ".shx" and ".dbf", in that order. Every length,
    /// offset, record number and bounding box is recomputed.
    pub fn to_bytes(&self) -> (Vec<u8>, Vec<u8>, Vec<u8>) {
        let (shp, shx) = self.shp.encode();
        (shp, shx.to_bytes(), self.dbf.to_bytes())
    }

    /// Writes `base.shp`, `base.shx` and `base.dbf`, plus `base.prj` and
    /// `base.cpg` if the set has them.
    ///
    /// Every file is first written next to its target with a ".tmp" suffix
    /// and only renamed into place once all of them are written. A failure
    /// while writing leaves any existing set untouched.
    ///
    /// Returns the ".dbf" values that lost characters the code page can't
    /// represent.
    pub fn write(&self, base: &Path) -> Result<Vec<EncodingFallback>, ShapefileError> {
        let (shp, shx) = self.shp.encode();
        let (dbf, fallbacks) = self.dbf.to_bytes_checked();

        let mut files = vec![
            (FileKind::Shp, shp),
            (FileKind::Shx, shx.to_bytes()),
            (FileKind::Dbf, dbf),
        ];
        if let Some(ref prj) = self.prj {
            files.push((FileKind::Prj, prj.clone()));
        }
        if self.has_cpg {
            files.push((FileKind::Cpg, self.codec().label().into_bytes()));
        }

        let mut staged = Vec::<(PathBuf, PathBuf)>::with_capacity(files.len());
        for (kind, bytes) in files {
            let path = sibling(base, kind);
            let tmp = tmp_path(&path);
            if let Err(err) = write_file(&tmp, &bytes) {
                remove_staged(&staged);
                let _ = fs::remove_file(&tmp);
                return Err(err);
            }
            staged.push((tmp, path));
        }

        for (i, &(ref tmp, ref path)) in staged.iter().enumerate() {
            if let Err(err) = fs::rename(tmp, path) {
                remove_staged(&staged[i..]);
                return Err(ShapefileError::io(path.as_path(), err));
            }
        }

        debug!("Wrote {}: {} records", sibling(base, FileKind::Shp).display(), self.record_count());
        Ok(fallbacks)
    }
}

fn check_counts(dbf: &DbfTable, shp: &ShpGeometryStream, shx: &ShxIndex) -> Result<(), ShapefileError> {
    if dbf.record_count() != shp.len() || shp.len() != shx.len() {
        return Err(ShapefileError::RecordMismatch {
            dbf: dbf.record_count(),
            shp: shp.len(),
            shx: shx.len(),
        });
    }
    Ok(())
}

fn out_of_range(index: usize, n: usize) -> ShapefileError {
    ShapefileError::InvalidSelection {
        message: format!("record {} is out of range; there are {} records", index, n),
    }
}

/// `base` with the given extension. A `base` that already ends in one of the
/// set's extensions has it replaced; anything else is kept, so
/// "AL_D160_50_20250924.v2" becomes "AL_D160_50_20250924.v2.shp".
fn sibling(base: &Path, kind: FileKind) -> PathBuf {
    let has_set_extension = base.extension()
        .and_then(|e| e.to_str())
        .map(|e| ["shp", "shx", "dbf", "prj", "cpg"].iter().any(|k| k.eq_ignore_ascii_case(e)))
        .unwrap_or(false);

    if has_set_extension {
        base.with_extension(kind.extension())
    } else {
        let mut s = OsString::from(base.as_os_str());
        s.push(".");
        s.push(kind.extension());
        PathBuf::from(s)
    }
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, ShapefileError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(ref err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(ShapefileError::io(path, err)),
    }
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<(), ShapefileError> {
    fs::write(path, bytes).map_err(|err| ShapefileError::io(path, err))
}

/// "parcels.shp" -> "parcels.shp.tmp"
fn tmp_path(path: &Path) -> PathBuf {
    let mut s = OsString::from(path.as_os_str());
    s.push(".tmp");
    PathBuf::from(s)
}

fn remove_staged(staged: &[(PathBuf, PathBuf)]) {
    for &(ref tmp, _) in staged {
        if let Err(err) = fs::remove_file(tmp) {
            warn!("Could not remove {}: {}", tmp.display(), err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::dbf::Record;
    use super::super::shp::{Polygon, ShapeType, ShpPoint};

    fn square(x: f64, y: f64, size: f64) -> Geometry {
        Geometry::Polygon(Polygon::from_rings(vec![
            vec![ ShpPoint(x, y), ShpPoint(x, y + size), ShpPoint(x + size, y + size), ShpPoint(x + size, y), ShpPoint(x, y) ],
        ]))
    }

    fn parcels() -> ShapefileSet {
        let mut dbf = DbfTable::new(vec![
            FieldDescriptor::character("A5", 10),
            FieldDescriptor::numeric("A22", 12, 2),
        ], TextCodec::korean()).unwrap();
        let mut shp = ShpGeometryStream::new(ShapeType::Polygon);
        for i in 0..4 {
            dbf.push_record(Record::new(vec![ format!("{}-1", i + 100), format!("{}", (i + 1) * 100) ])).unwrap();
            shp.push(square(i as f64 * 10., i as f64 * -10., (i + 1) as f64));
        }
        ShapefileSet::from_parts(dbf, shp, Some(b"PROJCS[\"Korea 2000\"]".to_vec())).unwrap()
    }

    #[test]
    fn sibling_paths() {
        assert_eq!(PathBuf::from("a/b.shx"), sibling(Path::new("a/b"), FileKind::Shx));
        assert_eq!(PathBuf::from("a/b.dbf"), sibling(Path::new("a/b.SHP"), FileKind::Dbf));
        assert_eq!(PathBuf::from("a/b.v2.prj"), sibling(Path::new("a/b.v2"), FileKind::Prj));
    }

    #[test]
    fn from_parts_rejects_mismatch() {
        let dbf = DbfTable::new(vec![ FieldDescriptor::character("A5", 10) ], TextCodec::korean()).unwrap();
        let mut shp = ShpGeometryStream::new(ShapeType::Point);
        shp.push(Geometry::Point(ShpPoint(1., 2.)));
        match ShapefileSet::from_parts(dbf, shp, None) {
            Err(ShapefileError::RecordMismatch { dbf: 0, shp: 1, shx: 1 }) => {}
            other => panic!("expected RecordMismatch, got {:?}", other),
        }
    }

    #[test]
    fn subset_order_and_bounding_box() {
        let set = parcels();
        let subset = set.select_subset(&[ 3, 1 ], None).unwrap();

        assert_eq!(2, subset.record_count());
        assert_eq!(2, subset.dbf().record_count());
        assert_eq!(2, subset.shx().len());
        assert_eq!(Some("103-1"), subset.record(0).unwrap().0.get("A5"));
        assert_eq!(Some("101-1"), subset.record(1).unwrap().0.get("A5"));

        // squares at (30,-30) size 4 and (10,-10) size 2
        let bbox = subset.bounding_box();
        assert!((bbox.x_min - 10.).abs() < 1e-9);
        assert!((bbox.y_min - -30.).abs() < 1e-9);
        assert!((bbox.x_max - 34.).abs() < 1e-9);
        assert!((bbox.y_max - -8.).abs() < 1e-9);
        assert_eq!(bbox, subset.shx().bounding_box());

        assert_eq!(Some(&b"PROJCS[\"Korea 2000\"]"[..]), subset.prj());
    }

    #[test]
    fn subset_rejects_bad_indices() {
        let set = parcels();
        match set.select_subset(&[ 0, 4 ], None) {
            Err(ShapefileError::InvalidSelection { .. }) => {}
            other => panic!("expected InvalidSelection, got {:?}", other),
        }
        match set.select_subset(&[ 1, 1 ], None) {
            Err(ShapefileError::InvalidSelection { .. }) => {}
            other => panic!("expected InvalidSelection, got {:?}", other),
        }
    }

    #[test]
    fn subset_with_category() {
        let set = parcels();
        let green: HashSet<&str> = [ "100-1", "102-1" ].iter().cloned().collect();

        let subset = set.select_where(
            |record, _| record.get("A5") != Some("101-1"),
            Some(FieldTransform::append(FieldDescriptor::character("CATEGORY", 10), |record| {
                if record.get("A5").map(|j| green.contains(j)).unwrap_or(false) { "GREEN".to_string() } else { "RED".to_string() }
            })),
        ).unwrap();

        assert_eq!(set.dbf().header_length() + 32, subset.dbf().header_length());
        assert_eq!(set.dbf().record_length() + 10, subset.dbf().record_length());

        let categories: Vec<&str> = subset.records().map(|(r, _)| r.get("CATEGORY").unwrap()).collect();
        assert_eq!(vec![ "GREEN", "GREEN", "RED" ], categories);
    }

    #[test]
    fn subset_with_rename() {
        let subset = parcels().select_subset(&[ 0 ], Some(FieldTransform::rename("A5", "JIBUN"))).unwrap();
        assert_eq!(Some("100-1"), subset.record(0).unwrap().0.get("JIBUN"));
    }

    #[test]
    fn area_reports_record() {
        let mut dbf = DbfTable::new(vec![ FieldDescriptor::character("A5", 10) ], TextCodec::korean()).unwrap();
        let mut shp = ShpGeometryStream::new(ShapeType::Polygon);
        dbf.push_record(Record::new(vec![ "1".to_string() ])).unwrap();
        shp.push(square(0., 0., 10.));
        dbf.push_record(Record::new(vec![ "2".to_string() ])).unwrap();
        shp.push(Geometry::Other { shape_type: 31, content: vec![ 31, 0, 0, 0 ] });
        let set = ShapefileSet::from_parts(dbf, shp, None).unwrap();

        assert_eq!(100.0, set.area(0).unwrap());
        match set.area(1) {
            Err(ShapefileError::UnsupportedShapeType { record: Some(1), shape_type: 31, .. }) => {}
            other => panic!("expected UnsupportedShapeType, got {:?}", other),
        }
        assert!(set.area(2).is_err());
    }

    #[test]
    fn counts_agree_after_every_operation() {
        let set = parcels();
        let subsets = vec![
            set.select_subset(&[], None).unwrap(),
            set.select_subset(&[ 2 ], None).unwrap(),
            set.select_where(|_, _| true, Some(FieldTransform::rename("A22", "AREA"))).unwrap(),
        ];
        for s in subsets.iter().chain(Some(&set)) {
            assert_eq!(s.dbf().record_count(), s.shp().len());
            assert_eq!(s.shp().len(), s.shx().len());
        }
    }
}
